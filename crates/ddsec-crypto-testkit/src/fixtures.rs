//! Test fixtures for common scenarios.

use ddsec_crypto::{
    BasicProtectionKind, CryptoConfig, CryptoPlugin, EndpointSecurityAttributes, Handle,
    ParticipantSecurityAttributes, ProtectionKind, PropertySet, SharedSecret,
};
use ddsec_crypto_core::wire::FLAG_LITTLE_ENDIAN;

/// RTPS DATA submessage id.
pub const DATA: u8 = 0x15;

/// One participant's view: its plugin, its local participant and the
/// remote participant standing for the other side.
pub struct Peer {
    pub plugin: CryptoPlugin,
    pub local: Handle,
    pub remote: Handle,
}

/// Handles of a writer on one peer matched with a reader on the other.
#[derive(Debug, Clone, Copy)]
pub struct MatchedEndpoints {
    /// Local writer on the sending peer.
    pub writer: Handle,
    /// The reader as seen by the sending peer.
    pub remote_reader: Handle,
    /// Local reader on the receiving peer.
    pub reader: Handle,
    /// The writer as seen by the receiving peer.
    pub remote_writer: Handle,
}

/// Two plugins whose participants are matched and have exchanged
/// participant tokens.
pub struct PeerFixture {
    pub alice: Peer,
    pub bob: Peer,
}

impl PeerFixture {
    /// Both participants use `rtps` protection and a fresh random secret.
    pub fn new(rtps: ProtectionKind) -> Self {
        Self::with_config(CryptoConfig::default(), rtps, &PropertySet::new())
    }

    pub fn with_config(config: CryptoConfig, rtps: ProtectionKind, properties: &PropertySet) -> Self {
        let challenge1: [u8; 32] = rand::random();
        let challenge2: [u8; 32] = rand::random();
        let secret: [u8; 32] = rand::random();
        let shared = || SharedSecret::new(challenge1, challenge2, secret.to_vec());
        let attributes = ParticipantSecurityAttributes::rtps(rtps);

        let peer = |identity: u64, other: u64| {
            let plugin = CryptoPlugin::new(config);
            let local = plugin
                .register_local_participant(identity, identity, properties, &attributes)
                .expect("register local participant");
            let remote = plugin
                .register_matched_remote_participant(local, other, other, &shared())
                .expect("register remote participant");
            Peer { plugin, local, remote }
        };
        let fixture = Self {
            alice: peer(1, 2),
            bob: peer(2, 1),
        };

        let tokens = fixture
            .alice
            .plugin
            .create_local_participant_crypto_tokens(fixture.alice.local, fixture.alice.remote)
            .expect("alice participant tokens");
        fixture
            .bob
            .plugin
            .set_remote_participant_crypto_tokens(fixture.bob.local, fixture.bob.remote, &tokens)
            .expect("bob accepts participant tokens");
        let tokens = fixture
            .bob
            .plugin
            .create_local_participant_crypto_tokens(fixture.bob.local, fixture.bob.remote)
            .expect("bob participant tokens");
        fixture
            .alice
            .plugin
            .set_remote_participant_crypto_tokens(fixture.alice.local, fixture.alice.remote, &tokens)
            .expect("alice accepts participant tokens");
        fixture
    }

    /// A writer on alice matched with a reader on bob, tokens exchanged
    /// both ways.
    pub fn alice_writes_to_bob(&self, attributes: &EndpointSecurityAttributes) -> MatchedEndpoints {
        match_endpoints(&self.alice, &self.bob, attributes)
    }

    /// A writer on bob matched with a reader on alice.
    pub fn bob_writes_to_alice(&self, attributes: &EndpointSecurityAttributes) -> MatchedEndpoints {
        match_endpoints(&self.bob, &self.alice, attributes)
    }
}

fn match_endpoints(from: &Peer, to: &Peer, attributes: &EndpointSecurityAttributes) -> MatchedEndpoints {
    let props = PropertySet::new();
    let writer = from
        .plugin
        .register_local_datawriter(from.local, &props, attributes)
        .expect("register writer");
    let reader = to
        .plugin
        .register_local_datareader(to.local, &props, attributes)
        .expect("register reader");
    let remote_reader = from
        .plugin
        .register_matched_remote_datareader(writer, from.remote)
        .expect("match reader");
    let remote_writer = to
        .plugin
        .register_matched_remote_datawriter(reader, to.remote)
        .expect("match writer");

    let tokens = from
        .plugin
        .create_local_datawriter_crypto_tokens(writer, remote_reader)
        .expect("writer tokens");
    to.plugin
        .set_remote_datawriter_crypto_tokens(reader, remote_writer, &tokens)
        .expect("reader accepts writer tokens");
    let tokens = to
        .plugin
        .create_local_datareader_crypto_tokens(reader, remote_writer)
        .expect("reader tokens");
    from.plugin
        .set_remote_datareader_crypto_tokens(writer, remote_reader, &tokens)
        .expect("writer accepts reader tokens");

    MatchedEndpoints {
        writer,
        remote_reader,
        reader,
        remote_writer,
    }
}

/// Endpoint attributes with the given submessage and payload protection.
pub fn endpoint_attributes(
    submessage: ProtectionKind,
    payload: BasicProtectionKind,
) -> EndpointSecurityAttributes {
    EndpointSecurityAttributes::protected(submessage, payload)
}

/// A little-endian DATA submessage around `body`.
pub fn data_submessage(body: &[u8]) -> Vec<u8> {
    let mut out = vec![DATA, FLAG_LITTLE_ENDIAN];
    out.extend_from_slice(&(body.len() as u16).to_le_bytes());
    out.extend_from_slice(body);
    out
}

/// An RTPS 2.4 message header for `guid_prefix` followed by `submessages`.
pub fn rtps_message(guid_prefix: [u8; 12], submessages: &[u8]) -> Vec<u8> {
    let mut out = b"RTPS".to_vec();
    out.extend_from_slice(&[2, 4, 0x01, 0x0f]);
    out.extend_from_slice(&guid_prefix);
    out.extend_from_slice(submessages);
    out
}
