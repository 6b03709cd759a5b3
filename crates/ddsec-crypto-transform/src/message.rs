//! Whole RTPS message transforms.

use std::sync::Arc;

use ddsec_crypto_core::wire::{INFO_SRC_SIZE, RTPS_HEADER_SIZE, RTPS_MAGIC, SUBMESSAGE_HEADER_SIZE};
use ddsec_crypto_core::{smid, ByteReader, CryptoError, CryptoHeader, Handle, Mac, Result, SubmessageHeader};
use ddsec_crypto_registry::{LocalParticipant, ParticipantKeyMaterial, RemoteParticipant};

use crate::envelope::{append_receiver_mac, build_rtps_message, info_source, split_rtps_message};
use crate::error::Rejection;
use crate::transform::{bare_postfix_offset, check_cursor, not_an_envelope, rejected, CryptoTransform, Decoded};

/// Check that `plain` is an RTPS header followed by whole submessages,
/// none of which is a secure RTPS postfix.
fn check_rtps_message(plain: &[u8]) -> Result<()> {
    if plain.len() <= RTPS_HEADER_SIZE || !plain.starts_with(RTPS_MAGIC) {
        return Err(CryptoError::InvalidArgument("not an RTPS message".into()));
    }
    let mut reader = ByteReader::new(&plain[RTPS_HEADER_SIZE..]);
    while !reader.is_empty() {
        let header = SubmessageHeader::read(&mut reader)
            .and_then(|h| reader.skip(h.length as usize).map(|_| h))
            .map_err(|_| CryptoError::InvalidArgument("submessage length exceeds message".into()))?;
        if header.id == smid::SRTPS_POSTFIX {
            return Err(CryptoError::InvalidArgument(
                "plain RTPS message carries a secure postfix".into(),
            ));
        }
    }
    Ok(())
}

impl CryptoTransform {
    /// Encode a whole RTPS message for `remotes`, with the same cursor
    /// protocol as [`CryptoTransform::encode_datawriter_submessage`].
    pub fn encode_rtps_message(
        &self,
        encoded: &mut Vec<u8>,
        plain: &[u8],
        local_participant: Handle,
        remotes: &[Handle],
        cursor: &mut usize,
    ) -> Result<()> {
        local_participant.require("local participant")?;
        check_cursor(remotes.len(), *cursor)?;
        let local = self.factory().registry().find::<LocalParticipant>(local_participant)?;
        let origin_auth = local.rtps_protection.has_origin_authentication();

        if *cursor == 0 {
            check_rtps_message(plain)?;
            let first = self.participant_pair(&local, local_participant, remotes[0])?;
            let session = local.session.as_ref().ok_or_else(|| {
                CryptoError::InvalidArgument(format!("{local_participant} does not protect RTPS messages"))
            })?;
            let (rtps_header, body) = plain.split_at(RTPS_HEADER_SIZE);
            let mut secured = Vec::with_capacity(INFO_SRC_SIZE + body.len());
            secured.extend_from_slice(&info_source(rtps_header)?);
            secured.extend_from_slice(body);

            let protected = self.protect(session, &secured)?;
            let mut out = build_rtps_message(rtps_header, &protected)?;
            if origin_auth {
                let postfix_offset = bare_postfix_offset(&out);
                self.add_participant_mac(&mut out, postfix_offset, &protected.header, &protected.common_mac, &first)?;
                *cursor = 1;
            } else {
                *cursor = remotes.len();
            }
            *encoded = out;
            return Ok(());
        }

        if encoded.is_empty() {
            return Err(CryptoError::InvalidArgument(
                "continuing an encode needs the message of the first call".into(),
            ));
        }
        let pair = self.participant_pair(&local, local_participant, remotes[*cursor])?;
        let (header, common_mac, postfix_offset) = {
            let (_, envelope) = split_rtps_message(encoded).map_err(|_| not_an_envelope())?;
            (envelope.header, envelope.footer.common_mac, envelope.postfix_offset)
        };
        if origin_auth {
            self.add_participant_mac(encoded, postfix_offset, &header, &common_mac, &pair)?;
        }
        *cursor += 1;
        Ok(())
    }

    fn participant_pair(
        &self,
        local: &LocalParticipant,
        local_participant: Handle,
        remote_participant: Handle,
    ) -> Result<Arc<ParticipantKeyMaterial>> {
        remote_participant.require("remote participant")?;
        self.factory().registry().find::<RemoteParticipant>(remote_participant)?;
        local.pair(remote_participant).ok_or_else(|| {
            CryptoError::InvalidArgument(format!(
                "{remote_participant} is not matched with {local_participant}"
            ))
        })
    }

    fn add_participant_mac(
        &self,
        encoded: &mut Vec<u8>,
        postfix_offset: usize,
        header: &CryptoHeader,
        common_mac: &Mac,
        pair: &ParticipantKeyMaterial,
    ) -> Result<()> {
        let key_material = &pair.local_p2p_key_material;
        if key_material.receiver_specific_key_id() == 0 {
            return Ok(());
        }
        let mac = self.receiver_mac(key_material, header, common_mac)?;
        append_receiver_mac(encoded, postfix_offset, mac)
    }

    /// Decode an RTPS message from `remote_participant`, restoring the
    /// RTPS header from the protected INFO_SRC.
    pub fn decode_rtps_message(
        &self,
        encoded: &[u8],
        local_participant: Handle,
        remote_participant: Handle,
    ) -> Result<Vec<u8>> {
        if encoded.is_empty() {
            return Err(CryptoError::InvalidArgument("empty encoded message".into()));
        }
        local_participant.require("local participant")?;
        remote_participant.require("remote participant")?;
        self.factory().registry().find::<LocalParticipant>(local_participant)?;
        let remote = self.factory().registry().find::<RemoteParticipant>(remote_participant)?;
        let pair = remote.pair(local_participant).ok_or_else(|| {
            CryptoError::InvalidArgument(format!(
                "{remote_participant} is not matched with {local_participant}"
            ))
        })?;
        self.decode_message(encoded, local_participant, remote_participant, &remote, &pair)
            .map_err(rejected("decode_rtps_message"))
    }

    fn decode_message(
        &self,
        encoded: &[u8],
        local_participant: Handle,
        remote_participant: Handle,
        remote: &RemoteParticipant,
        pair: &ParticipantKeyMaterial,
    ) -> Decoded<Vec<u8>> {
        let (_, envelope) = split_rtps_message(encoded).map_err(|_| Rejection::Malformed)?;
        let key_material = pair.remote_key_material().ok_or(Rejection::KeysNotReady)?;
        if key_material.sender_key_id() != envelope.header.key_id {
            return Err(Rejection::UnknownKey(envelope.header.key_id));
        }
        let protection = remote.rtps_protection();
        let expected = protection.accepts(envelope.header.transform_kind);
        let body = self.unprotect(&key_material, expected, &envelope)?;
        if protection.has_origin_authentication() {
            self.verify_receiver_mac(remote_participant, local_participant, &envelope)?;
        }

        if body.len() < INFO_SRC_SIZE || body[0] != smid::INFO_SRC {
            return Err(Rejection::Malformed);
        }
        let guid_at = SUBMESSAGE_HEADER_SIZE + RTPS_MAGIC.len();
        let mut plain = Vec::with_capacity(RTPS_MAGIC.len() + body.len() - guid_at);
        plain.extend_from_slice(RTPS_MAGIC);
        plain.extend_from_slice(&body[guid_at..]);
        Ok(plain)
    }
}
