//! Routing of a received secure submessage before it is decoded.

use tracing::trace;

use ddsec_crypto_core::{smid, ByteReader, CryptoError, CryptoHeader, Handle, Result, SubmessageHeader, TransformKind};
use ddsec_crypto_registry::SecureSubmessageCategory;

use crate::transform::CryptoTransform;

/// The endpoint pair a secure submessage belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmessageRoute {
    pub datawriter: Handle,
    pub datareader: Handle,
    pub category: SecureSubmessageCategory,
}

impl CryptoTransform {
    /// Read the prefix of a secure submessage and find the endpoints it
    /// is addressed between. The key id is looked up in the specific-key
    /// index first, then among the endpoint relations.
    ///
    /// For a writer submessage `datawriter` is the remote writer and
    /// `datareader` the local reader; for a reader submessage the roles
    /// are swapped.
    pub fn preprocess_secure_submsg(
        &self,
        encoded: &[u8],
        local_participant: Handle,
        remote_participant: Handle,
    ) -> Result<SubmessageRoute> {
        local_participant.require("local participant")?;
        remote_participant.require("remote participant")?;
        let mut reader = ByteReader::new(encoded);
        let prefix = SubmessageHeader::read(&mut reader)
            .map_err(|_| CryptoError::InvalidArgument("short secure submessage".into()))?;
        if prefix.id != smid::SEC_PREFIX {
            return Err(CryptoError::InvalidArgument(format!(
                "submessage id {:#04x} is not a secure prefix",
                prefix.id
            )));
        }
        let header = CryptoHeader::read(&mut reader)
            .map_err(|_| CryptoError::InvalidArgument("unreadable crypto header".into()))?;
        if header.transform_kind == TransformKind::None {
            return Err(CryptoError::InvalidArgument("secure prefix with no transform".into()));
        }

        let factory = self.factory();
        let relation = match factory.find_specific_endpoint_relation(
            local_participant,
            remote_participant,
            header.key_id,
        )? {
            Some(relation) => relation,
            None => factory.get_endpoint_relation(local_participant, remote_participant, header.key_id)?,
        };
        let route = match relation.category {
            SecureSubmessageCategory::DatawriterSubmessage => SubmessageRoute {
                datawriter: relation.remote,
                datareader: relation.local,
                category: relation.category,
            },
            category => SubmessageRoute {
                datawriter: relation.local,
                datareader: relation.remote,
                category,
            },
        };
        trace!(key_id = header.key_id, ?route, "secure submessage routed");
        Ok(route)
    }
}
