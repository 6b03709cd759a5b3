//! Datawriter and datareader submessage transforms.
//!
//! A writer submessage is built once and then extended with one receiver
//! MAC per call, the caller stepping `cursor` through its reader list.

use std::sync::Arc;

use tracing::trace;

use ddsec_crypto_core::{CryptoError, CryptoHeader, Handle, Mac, Result};
use ddsec_crypto_registry::{
    LocalDatareader, LocalDatawriter, RemoteDatareader, RemoteDatawriter, SharedSession,
};

use crate::envelope::{append_receiver_mac, build_submessage, split_submessage, Envelope};
use crate::error::Rejection;
use crate::transform::{
    bare_postfix_offset, check_cursor, check_single_submessage, check_submessages, not_an_envelope,
    rejected, CryptoTransform, Decoded,
};

impl CryptoTransform {
    /// Encode a datawriter submessage for `readers`.
    ///
    /// With `*cursor == 0` the envelope is built into `encoded`. Each call
    /// then adds at most one receiver MAC and moves the cursor; the caller
    /// is done when `*cursor == readers.len()`.
    pub fn encode_datawriter_submessage(
        &self,
        encoded: &mut Vec<u8>,
        plain: &[u8],
        writer: Handle,
        readers: &[Handle],
        cursor: &mut usize,
    ) -> Result<()> {
        writer.require("local datawriter")?;
        check_cursor(readers.len(), *cursor)?;
        let local = self.factory().registry().find::<LocalDatawriter>(writer)?;
        let origin_auth = local.metadata_protection.has_origin_authentication();

        if *cursor == 0 {
            check_single_submessage(plain)?;
            let first = self.remote_reader(writer, readers[0])?;
            let session = if local.is_builtin_volatile {
                first.writer_session.clone()
            } else {
                local.message_session.clone()
            };
            let protected = self.protect(&require_session(session, writer)?, plain)?;
            let mut out = build_submessage(&protected)?;
            if origin_auth {
                let postfix_offset = bare_postfix_offset(&out);
                self.add_reader_mac(&mut out, postfix_offset, &protected.header, &protected.common_mac, &first)?;
                *cursor = 1;
            } else {
                *cursor = readers.len();
            }
            *encoded = out;
            return Ok(());
        }

        if encoded.is_empty() {
            return Err(CryptoError::InvalidArgument(
                "continuing an encode needs the envelope of the first call".into(),
            ));
        }
        let reader = self.remote_reader(writer, readers[*cursor])?;
        let (header, common_mac, postfix_offset) = {
            let envelope = split_submessage(encoded).map_err(|_| not_an_envelope())?;
            (envelope.header, envelope.footer.common_mac, envelope.postfix_offset)
        };
        if origin_auth {
            self.add_reader_mac(encoded, postfix_offset, &header, &common_mac, &reader)?;
        }
        *cursor += 1;
        Ok(())
    }

    fn add_reader_mac(
        &self,
        encoded: &mut Vec<u8>,
        postfix_offset: usize,
        header: &CryptoHeader,
        common_mac: &Mac,
        reader: &RemoteDatareader,
    ) -> Result<()> {
        if !reader.metadata_protection.has_origin_authentication() {
            return Ok(());
        }
        let Some(key_material) = reader.writer2reader_message_key_material.as_ref() else {
            return Ok(());
        };
        if key_material.receiver_specific_key_id() == 0 {
            return Ok(());
        }
        let mac = self.receiver_mac(key_material, header, common_mac)?;
        trace!(key_id = mac.key_id, "receiver mac added");
        append_receiver_mac(encoded, postfix_offset, mac)
    }

    /// Encode a datareader submessage for `writers`. All receiver MACs are
    /// added in one call.
    pub fn encode_datareader_submessage(
        &self,
        plain: &[u8],
        reader: Handle,
        writers: &[Handle],
    ) -> Result<Vec<u8>> {
        reader.require("local datareader")?;
        check_cursor(writers.len(), 0)?;
        check_submessages(plain)?;
        let local = self.factory().registry().find::<LocalDatareader>(reader)?;
        let remotes = writers
            .iter()
            .map(|&w| self.matched_remote_writer(reader, w))
            .collect::<Result<Vec<_>>>()?;

        let session = if local.is_builtin_volatile {
            remotes[0].reader_session.clone()
        } else {
            local.reader_session.clone()
        };
        let protected = self.protect(&require_session(session, reader)?, plain)?;
        let mut out = build_submessage(&protected)?;
        if local.metadata_protection.has_origin_authentication() {
            let postfix_offset = bare_postfix_offset(&out);
            for remote in remotes
                .iter()
                .filter(|w| w.metadata_protection.has_origin_authentication())
            {
                let Some(key_material) = remote.reader2writer_key_material.as_ref() else {
                    continue;
                };
                if key_material.receiver_specific_key_id() == 0 {
                    continue;
                }
                let mac = self.receiver_mac(key_material, &protected.header, &protected.common_mac)?;
                append_receiver_mac(&mut out, postfix_offset, mac)?;
            }
        }
        Ok(out)
    }

    /// Decode a submessage sent by `remote_writer` to `local_reader`.
    pub fn decode_datawriter_submessage(
        &self,
        encoded: &[u8],
        local_reader: Handle,
        remote_writer: Handle,
    ) -> Result<Vec<u8>> {
        if encoded.is_empty() {
            return Err(CryptoError::InvalidArgument("empty encoded submessage".into()));
        }
        let writer = self.matched_remote_writer(local_reader, remote_writer)?;
        self.decode_from_writer(encoded, local_reader, &writer)
            .map_err(rejected("decode_datawriter_submessage"))
    }

    fn decode_from_writer(
        &self,
        encoded: &[u8],
        local_reader: Handle,
        writer: &RemoteDatawriter,
    ) -> Decoded<Vec<u8>> {
        let envelope = split_submessage(encoded).map_err(|_| Rejection::Malformed)?;
        let key_id = envelope.header.key_id;
        let key_material = writer
            .writer_key_material_by_id(key_id)
            .ok_or(Rejection::UnknownKey(key_id))?;
        let expected = writer.metadata_protection.accepts(envelope.header.transform_kind);
        let plain = self.unprotect(&key_material, expected, &envelope)?;
        if needs_receiver_mac(writer.metadata_protection.has_origin_authentication(), writer.is_builtin_volatile) {
            self.verify_receiver_mac(writer.participant, local_reader, &envelope)?;
        }
        Ok(plain)
    }

    /// Decode a submessage sent by `remote_reader` to `local_writer`.
    pub fn decode_datareader_submessage(
        &self,
        encoded: &[u8],
        local_writer: Handle,
        remote_reader: Handle,
    ) -> Result<Vec<u8>> {
        if encoded.is_empty() {
            return Err(CryptoError::InvalidArgument("empty encoded submessage".into()));
        }
        local_writer.require("local datawriter")?;
        self.factory().registry().find::<LocalDatawriter>(local_writer)?;
        let reader = self.remote_reader(local_writer, remote_reader)?;
        self.decode_from_reader(encoded, local_writer, &reader)
            .map_err(rejected("decode_datareader_submessage"))
    }

    fn decode_from_reader(
        &self,
        encoded: &[u8],
        local_writer: Handle,
        reader: &RemoteDatareader,
    ) -> Decoded<Vec<u8>> {
        let envelope: Envelope<'_> = split_submessage(encoded).map_err(|_| Rejection::Malformed)?;
        let key_material = reader
            .reader2writer_key_material()
            .ok_or(Rejection::KeysNotReady)?;
        if key_material.sender_key_id() != envelope.header.key_id {
            return Err(Rejection::UnknownKey(envelope.header.key_id));
        }
        let expected = reader.metadata_protection.accepts(envelope.header.transform_kind);
        let plain = self.unprotect(&key_material, expected, &envelope)?;
        if needs_receiver_mac(reader.metadata_protection.has_origin_authentication(), reader.is_builtin_volatile) {
            self.verify_receiver_mac(reader.participant, local_writer, &envelope)?;
        }
        Ok(plain)
    }

    /// A remote reader matched to `local_writer`.
    fn remote_reader(&self, local_writer: Handle, remote_reader: Handle) -> Result<Arc<RemoteDatareader>> {
        remote_reader.require("remote datareader")?;
        let reader = self.factory().registry().find::<RemoteDatareader>(remote_reader)?;
        if reader.local_writer != local_writer {
            return Err(CryptoError::InvalidArgument(format!(
                "{remote_reader} is not matched with {local_writer}"
            )));
        }
        Ok(reader)
    }
}

/// The volatile endpoints key with the participant exchange key, which
/// has no receiver-specific part.
fn needs_receiver_mac(origin_auth: bool, builtin_volatile: bool) -> bool {
    origin_auth && !builtin_volatile
}

fn require_session(session: Option<SharedSession>, endpoint: Handle) -> Result<SharedSession> {
    session.ok_or_else(|| {
        CryptoError::InvalidArgument(format!("{endpoint} has no protected submessage session"))
    })
}
