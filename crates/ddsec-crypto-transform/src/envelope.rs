//! Building and splitting the secure envelope.
//!
//! ```text
//! submessage : PREFIX(crypto header) | SEC_BODY(len | ciphertext) or plain submessage | POSTFIX(footer)
//! rtps       : RTPS header(20) | SRTPS_PREFIX | SEC_BODY or INFO_SRC + submessages | SRTPS_POSTFIX
//! payload    : crypto header | len | ciphertext or plain payload | common mac | count(0)
//! ```
//!
//! Splitting is strict. A prefix must carry exactly one crypto header, a
//! postfix exactly its footer, and nothing may follow the postfix.

use bytes::{BufMut, BytesMut};

use ddsec_crypto_core::wire::{
    CRYPTO_FOOTER_MIN_SIZE, CRYPTO_HEADER_SIZE, FLAG_LITTLE_ENDIAN, INFO_SRC_SIZE,
    RECEIVER_MAC_SIZE, RTPS_HEADER_SIZE, RTPS_MAGIC, SUBMESSAGE_HEADER_SIZE,
};
use ddsec_crypto_core::{
    smid, ByteReader, CryptoError, CryptoFooter, CryptoHeader, Mac, ReceiverMac, Result,
    SubmessageHeader, MAC_SIZE,
};

/// What sits between the prefix and the postfix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Content<'a> {
    /// Ciphertext taken out of a SEC_BODY.
    Encrypted(&'a [u8]),
    /// Authenticated-only bytes, exactly as they were protected.
    Plain(&'a [u8]),
}

/// A split secure envelope borrowing from the received buffer.
#[derive(Debug, Clone)]
pub struct Envelope<'a> {
    pub header: CryptoHeader,
    pub content: Content<'a>,
    pub footer: CryptoFooter,
    /// Offset of the postfix submessage (or of the footer for payloads).
    pub postfix_offset: usize,
}

/// Output of one protect operation, ready to be framed.
#[derive(Debug, Clone)]
pub struct Protected {
    pub header: CryptoHeader,
    pub content: Vec<u8>,
    pub encrypted: bool,
    pub common_mac: Mac,
}

fn malformed() -> CryptoError {
    CryptoError::DecodeFailed
}

fn read_prefix(reader: &mut ByteReader<'_>, id: u8) -> Result<CryptoHeader> {
    let prefix = SubmessageHeader::read(reader)?;
    if prefix.id != id || prefix.length as usize != CRYPTO_HEADER_SIZE {
        return Err(malformed());
    }
    CryptoHeader::read(reader)
}

/// Read one submessage as the body: SEC_BODY yields its ciphertext, any
/// other submessage is returned whole, header included.
fn read_body<'a>(reader: &mut ByteReader<'a>) -> Result<Content<'a>> {
    let start = reader.rest();
    let body = SubmessageHeader::read(reader)?;
    let data = reader.read_bytes(body.length as usize)?;
    if body.id != smid::SEC_BODY {
        return Ok(Content::Plain(&start[..SUBMESSAGE_HEADER_SIZE + data.len()]));
    }
    let mut inner = ByteReader::new(data);
    let len = inner.read_u32_be()? as usize;
    if len != inner.remaining() {
        return Err(malformed());
    }
    Ok(Content::Encrypted(inner.rest()))
}

fn read_postfix(reader: &mut ByteReader<'_>, id: u8) -> Result<CryptoFooter> {
    let postfix = SubmessageHeader::read(reader)?;
    if postfix.id != id {
        return Err(malformed());
    }
    let data = reader.read_bytes(postfix.length as usize)?;
    let footer = CryptoFooter::read(&mut ByteReader::new(data))?;
    if footer.encoded_len() != data.len() {
        return Err(malformed());
    }
    Ok(footer)
}

/// Split an encoded writer or reader submessage.
pub fn split_submessage(data: &[u8]) -> Result<Envelope<'_>> {
    let mut reader = ByteReader::new(data);
    let header = read_prefix(&mut reader, smid::SEC_PREFIX)?;
    let content = read_body(&mut reader)?;
    let postfix_offset = reader.position();
    let footer = read_postfix(&mut reader, smid::SEC_POSTFIX)?;
    if !reader.is_empty() {
        return Err(malformed());
    }
    Ok(Envelope {
        header,
        content,
        footer,
        postfix_offset,
    })
}

/// Split an encoded RTPS message into its RTPS header and envelope.
///
/// Encrypted messages carry a single SEC_BODY. Signed messages carry
/// INFO_SRC followed by the original submessages up to the postfix.
pub fn split_rtps_message(data: &[u8]) -> Result<(&[u8], Envelope<'_>)> {
    let mut reader = ByteReader::new(data);
    let rtps_header = reader.read_bytes(RTPS_HEADER_SIZE)?;
    if &rtps_header[..RTPS_MAGIC.len()] != RTPS_MAGIC {
        return Err(malformed());
    }
    let header = read_prefix(&mut reader, smid::SRTPS_PREFIX)?;

    let content = if header.transform_kind.is_encryption() {
        match read_body(&mut reader)? {
            content @ Content::Encrypted(_) => content,
            Content::Plain(_) => return Err(malformed()),
        }
    } else {
        let start = reader.position();
        let info_src = SubmessageHeader::read(&mut reader)?;
        if info_src.id != smid::INFO_SRC {
            return Err(malformed());
        }
        reader.skip(info_src.length as usize)?;
        loop {
            let next = SubmessageHeader::peek(&reader)?;
            if next.id == smid::SRTPS_POSTFIX {
                break;
            }
            reader.skip(SUBMESSAGE_HEADER_SIZE + next.length as usize)?;
        }
        Content::Plain(&data[start..reader.position()])
    };

    let postfix_offset = reader.position();
    let footer = read_postfix(&mut reader, smid::SRTPS_POSTFIX)?;
    if !reader.is_empty() {
        return Err(malformed());
    }
    Ok((
        rtps_header,
        Envelope {
            header,
            content,
            footer,
            postfix_offset,
        },
    ))
}

/// Split an encoded serialized payload. Payloads never carry receiver MACs.
pub fn split_payload(data: &[u8]) -> Result<Envelope<'_>> {
    let mut reader = ByteReader::new(data);
    let header = CryptoHeader::read(&mut reader)?;
    let body_len = reader
        .remaining()
        .checked_sub(CRYPTO_FOOTER_MIN_SIZE)
        .ok_or_else(malformed)?;
    let body = reader.read_bytes(body_len)?;
    let postfix_offset = reader.position();
    let footer = CryptoFooter::read(&mut reader)?;
    if !footer.receiver_macs.is_empty() || !reader.is_empty() {
        return Err(malformed());
    }

    let content = if header.transform_kind.is_encryption() {
        let mut inner = ByteReader::new(body);
        let len = inner.read_u32_be()? as usize;
        if len != inner.remaining() {
            return Err(malformed());
        }
        Content::Encrypted(inner.rest())
    } else {
        Content::Plain(body)
    };
    Ok(Envelope {
        header,
        content,
        footer,
        postfix_offset,
    })
}

fn write_content(buf: &mut BytesMut, protected: &Protected) -> Result<()> {
    if protected.encrypted {
        SubmessageHeader::new(smid::SEC_BODY, 4 + protected.content.len())?.write(buf);
        buf.put_u32(protected.content.len() as u32);
    }
    buf.put_slice(&protected.content);
    Ok(())
}

fn write_envelope(buf: &mut BytesMut, prefix: u8, postfix: u8, protected: &Protected) -> Result<()> {
    SubmessageHeader::new(prefix, CRYPTO_HEADER_SIZE)?.write(buf);
    protected.header.write(buf);
    write_content(buf, protected)?;
    let footer = CryptoFooter::new(protected.common_mac);
    SubmessageHeader::new(postfix, footer.encoded_len())?.write(buf);
    footer.write(buf);
    Ok(())
}

/// Frame a protected submessage. The footer starts without receiver MACs.
pub fn build_submessage(protected: &Protected) -> Result<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(envelope_capacity(protected));
    write_envelope(&mut buf, smid::SEC_PREFIX, smid::SEC_POSTFIX, protected)?;
    Ok(buf.to_vec())
}

/// Frame a protected RTPS body behind a copy of `rtps_header`.
pub fn build_rtps_message(rtps_header: &[u8], protected: &Protected) -> Result<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(RTPS_HEADER_SIZE + envelope_capacity(protected));
    buf.put_slice(rtps_header);
    write_envelope(&mut buf, smid::SRTPS_PREFIX, smid::SRTPS_POSTFIX, protected)?;
    Ok(buf.to_vec())
}

/// Frame a protected serialized payload.
pub fn build_payload(protected: &Protected) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(envelope_capacity(protected));
    protected.header.write(&mut buf);
    if protected.encrypted {
        buf.put_u32(protected.content.len() as u32);
    }
    buf.put_slice(&protected.content);
    CryptoFooter::new(protected.common_mac).write(&mut buf);
    buf.to_vec()
}

fn envelope_capacity(protected: &Protected) -> usize {
    3 * SUBMESSAGE_HEADER_SIZE + CRYPTO_HEADER_SIZE + 4 + protected.content.len() + CRYPTO_FOOTER_MIN_SIZE
}

/// INFO_SRC submessage standing in for the RTPS header inside the
/// protected body: 4 reserved bytes, then version, vendor and guid prefix.
pub fn info_source(rtps_header: &[u8]) -> Result<[u8; INFO_SRC_SIZE]> {
    if rtps_header.len() < RTPS_HEADER_SIZE {
        return Err(CryptoError::InvalidArgument("short RTPS header".into()));
    }
    let mut out = [0u8; INFO_SRC_SIZE];
    out[0] = smid::INFO_SRC;
    out[1] = FLAG_LITTLE_ENDIAN;
    out[2..4].copy_from_slice(&((INFO_SRC_SIZE - SUBMESSAGE_HEADER_SIZE) as u16).to_le_bytes());
    out[8..].copy_from_slice(&rtps_header[RTPS_MAGIC.len()..RTPS_HEADER_SIZE]);
    Ok(out)
}

/// Append one receiver MAC to the postfix at `postfix_offset`, which must
/// be the last submessage of `encoded`.
pub fn append_receiver_mac(encoded: &mut Vec<u8>, postfix_offset: usize, mac: ReceiverMac) -> Result<()> {
    let tail = encoded
        .get(postfix_offset..)
        .ok_or_else(|| CryptoError::InvalidArgument("postfix offset out of range".into()))?;
    let mut reader = ByteReader::new(tail);
    let postfix = SubmessageHeader::read(&mut reader)?;
    reader.skip(MAC_SIZE)?;
    let count = reader.read_u32_be()? as usize;
    let expected = CRYPTO_FOOTER_MIN_SIZE + count * RECEIVER_MAC_SIZE;
    if postfix.length as usize != expected || tail.len() != SUBMESSAGE_HEADER_SIZE + expected {
        return Err(CryptoError::InvalidArgument("postfix is not the last submessage".into()));
    }

    let count_at = postfix_offset + SUBMESSAGE_HEADER_SIZE + MAC_SIZE;
    SubmessageHeader::patch_length(encoded, postfix_offset, expected + RECEIVER_MAC_SIZE)?;
    encoded[count_at..count_at + 4].copy_from_slice(&(count as u32 + 1).to_be_bytes());
    encoded.extend_from_slice(&mac.key_id.to_be_bytes());
    encoded.extend_from_slice(&mac.mac);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddsec_crypto_core::TransformKind;

    fn protected(encrypted: bool, content: &[u8]) -> Protected {
        Protected {
            header: CryptoHeader {
                transform_kind: if encrypted {
                    TransformKind::Aes128Gcm
                } else {
                    TransformKind::Aes128Gmac
                },
                key_id: 7,
                session_id: 3,
                iv_suffix: 9,
            },
            content: content.to_vec(),
            encrypted,
            common_mac: [0xcc; MAC_SIZE],
        }
    }

    fn plain_submessage() -> Vec<u8> {
        // DATA-like submessage: id 0x15, LE, 8 bytes of body
        vec![0x15, 0x01, 8, 0, 1, 2, 3, 4, 5, 6, 7, 8]
    }

    fn rtps_header() -> Vec<u8> {
        let mut h = b"RTPS".to_vec();
        h.extend_from_slice(&[2, 3, 1, 0x10]);
        h.extend_from_slice(&[0xab; 12]);
        h
    }

    #[test]
    fn test_submessage_layout_encrypted() {
        let p = protected(true, &[0xee; 10]);
        let encoded = build_submessage(&p).unwrap();
        assert_eq!(&encoded[..4], &[smid::SEC_PREFIX, FLAG_LITTLE_ENDIAN, 20, 0]);
        assert_eq!(&encoded[24..28], &[smid::SEC_BODY, FLAG_LITTLE_ENDIAN, 14, 0]);
        assert_eq!(&encoded[28..32], &[0, 0, 0, 10]);

        let env = split_submessage(&encoded).unwrap();
        assert_eq!(env.header, p.header);
        assert_eq!(env.content, Content::Encrypted(&[0xee; 10]));
        assert_eq!(env.footer.common_mac, p.common_mac);
        assert_eq!(env.postfix_offset, 42);
        assert_eq!(encoded[env.postfix_offset], smid::SEC_POSTFIX);
    }

    #[test]
    fn test_submessage_layout_signed_keeps_plain() {
        let plain = plain_submessage();
        let encoded = build_submessage(&protected(false, &plain)).unwrap();
        assert_eq!(&encoded[24..24 + plain.len()], plain.as_slice());
        let env = split_submessage(&encoded).unwrap();
        assert_eq!(env.content, Content::Plain(&plain));
    }

    #[test]
    fn test_split_rejects_trailing_bytes() {
        let mut encoded = build_submessage(&protected(true, &[1; 8])).unwrap();
        encoded.push(0);
        assert_eq!(split_submessage(&encoded).unwrap_err(), CryptoError::DecodeFailed);
    }

    #[test]
    fn test_split_rejects_bad_prefix_length() {
        let mut encoded = build_submessage(&protected(true, &[1; 8])).unwrap();
        encoded[2] = 24;
        assert!(split_submessage(&encoded).is_err());
        encoded[2] = 16;
        assert!(split_submessage(&encoded).is_err());
    }

    #[test]
    fn test_split_rejects_wrong_ids() {
        let encoded = build_submessage(&protected(true, &[1; 8])).unwrap();
        let mut bad = encoded.clone();
        bad[0] = smid::SRTPS_PREFIX;
        assert!(split_submessage(&bad).is_err());

        let postfix = split_submessage(&encoded).unwrap().postfix_offset;
        let mut bad = encoded;
        bad[postfix] = smid::SEC_BODY;
        assert!(split_submessage(&bad).is_err());
    }

    #[test]
    fn test_split_rejects_inner_length_mismatch() {
        let mut encoded = build_submessage(&protected(true, &[1; 8])).unwrap();
        encoded[31] = 7;
        assert!(split_submessage(&encoded).is_err());
    }

    #[test]
    fn test_big_endian_headers_accepted() {
        let mut encoded = build_submessage(&protected(true, &[1; 8])).unwrap();
        // Rewrite the prefix header as big-endian
        encoded[1] = 0;
        encoded[2] = 0;
        encoded[3] = 20;
        assert!(split_submessage(&encoded).is_ok());
    }

    #[test]
    fn test_append_receiver_macs() {
        let mut encoded = build_submessage(&protected(false, &plain_submessage())).unwrap();
        let offset = split_submessage(&encoded).unwrap().postfix_offset;
        append_receiver_mac(&mut encoded, offset, ReceiverMac { key_id: 11, mac: [1; MAC_SIZE] }).unwrap();
        append_receiver_mac(&mut encoded, offset, ReceiverMac { key_id: 12, mac: [2; MAC_SIZE] }).unwrap();

        let env = split_submessage(&encoded).unwrap();
        assert_eq!(env.footer.receiver_macs.len(), 2);
        assert_eq!(env.footer.receiver_macs[1].key_id, 12);
        assert_eq!(encoded[offset + 2] as usize, CRYPTO_FOOTER_MIN_SIZE + 2 * RECEIVER_MAC_SIZE);
    }

    #[test]
    fn test_append_receiver_mac_needs_last_postfix() {
        let mut encoded = build_submessage(&protected(true, &[1; 8])).unwrap();
        assert!(append_receiver_mac(&mut encoded, 0, ReceiverMac { key_id: 1, mac: [0; MAC_SIZE] }).is_err());
        let len = encoded.len();
        assert!(append_receiver_mac(&mut encoded, len + 1, ReceiverMac { key_id: 1, mac: [0; MAC_SIZE] }).is_err());
    }

    #[test]
    fn test_info_source_layout() {
        let header = rtps_header();
        let info = info_source(&header).unwrap();
        assert_eq!(&info[..4], &[smid::INFO_SRC, FLAG_LITTLE_ENDIAN, 20, 0]);
        assert_eq!(&info[4..8], &[0; 4]);
        assert_eq!(&info[8..], &header[4..]);
    }

    #[test]
    fn test_rtps_signed_walks_to_postfix() {
        let header = rtps_header();
        let mut body = info_source(&header).unwrap().to_vec();
        body.extend_from_slice(&plain_submessage());
        body.extend_from_slice(&plain_submessage());
        let encoded = build_rtps_message(&header, &protected(false, &body)).unwrap();

        let (h, env) = split_rtps_message(&encoded).unwrap();
        assert_eq!(h, header.as_slice());
        assert_eq!(env.content, Content::Plain(&body));
    }

    #[test]
    fn test_rtps_encrypted_requires_sec_body() {
        let header = rtps_header();
        let mut body = info_source(&header).unwrap().to_vec();
        body.extend_from_slice(&plain_submessage());
        // Signed framing under an encrypting transform kind
        let mut p = protected(false, &body);
        p.header.transform_kind = TransformKind::Aes128Gcm;
        let encoded = build_rtps_message(&header, &p).unwrap();
        assert!(split_rtps_message(&encoded).is_err());
    }

    #[test]
    fn test_rtps_signed_without_postfix_rejected() {
        let header = rtps_header();
        let mut body = info_source(&header).unwrap().to_vec();
        body.extend_from_slice(&plain_submessage());
        let encoded = build_rtps_message(&header, &protected(false, &body)).unwrap();
        let postfix = split_rtps_message(&encoded).unwrap().1.postfix_offset;
        assert!(split_rtps_message(&encoded[..postfix]).is_err());
    }

    #[test]
    fn test_payload_layout() {
        let p = protected(true, &[5; 12]);
        let encoded = build_payload(&p);
        assert_eq!(encoded.len(), CRYPTO_HEADER_SIZE + 4 + 12 + CRYPTO_FOOTER_MIN_SIZE);
        let env = split_payload(&encoded).unwrap();
        assert_eq!(env.content, Content::Encrypted(&[5; 12]));

        let signed = build_payload(&protected(false, &[6; 8]));
        assert_eq!(split_payload(&signed).unwrap().content, Content::Plain(&[6; 8]));
    }

    #[test]
    fn test_payload_with_receiver_macs_rejected() {
        let mut encoded = build_payload(&protected(false, &[6; 8]));
        let len = encoded.len();
        encoded[len - 1] = 1;
        assert!(split_payload(&encoded).is_err());
        assert!(split_payload(&encoded[..CRYPTO_HEADER_SIZE + 4]).is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_split_never_panics(data in proptest::collection::vec(proptest::num::u8::ANY, 0..160)) {
            let _ = split_submessage(&data);
            let _ = split_rtps_message(&data);
            let _ = split_payload(&data);
        }
    }
}
