//! Symmetric cipher capability.
//!
//! The plugin only needs four things from a cipher: authenticated
//! encryption, authenticated decryption, a MAC over arbitrary data and
//! constant-time verification of that MAC. AES-GCM provides the first two
//! and GMAC (GCM over an empty plaintext) the other two.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use subtle::ConstantTimeEq;

use crate::error::{CryptoError, Result};

/// Length of the GCM initialization vector.
pub const IV_SIZE: usize = 12;

/// Length of a GCM tag / GMAC.
pub const MAC_SIZE: usize = 16;

/// A 96-bit initialization vector.
pub type Iv = [u8; IV_SIZE];

/// A 128-bit authentication tag.
pub type Mac = [u8; MAC_SIZE];

/// Cipher capability used by the secure transforms.
///
/// Keys are passed as raw slices; their length (16 or 32 bytes) selects the
/// AES variant.
pub trait Cipher: Send + Sync {
    /// Encrypt `plaintext`, authenticating `aad` alongside it.
    fn encrypt(&self, key: &[u8], iv: &Iv, aad: &[u8], plaintext: &[u8]) -> Result<(Vec<u8>, Mac)>;

    /// Decrypt and verify. Any failure is `DecodeFailed`.
    fn decrypt(&self, key: &[u8], iv: &Iv, aad: &[u8], ciphertext: &[u8], tag: &Mac)
        -> Result<Vec<u8>>;

    /// Compute a MAC over `data`.
    fn mac(&self, key: &[u8], iv: &Iv, data: &[u8]) -> Result<Mac> {
        let (_, tag) = self.encrypt(key, iv, data, &[])?;
        Ok(tag)
    }

    /// Verify a MAC in constant time. A mismatch is `DecodeFailed`.
    fn verify_mac(&self, key: &[u8], iv: &Iv, data: &[u8], expected: &Mac) -> Result<()> {
        let actual = self.mac(key, iv, data)?;
        if bool::from(actual.ct_eq(expected)) {
            Ok(())
        } else {
            Err(CryptoError::DecodeFailed)
        }
    }
}

/// AES-GCM / GMAC implementation of [`Cipher`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmCipher;

impl AesGcmCipher {
    pub fn new() -> Self {
        Self
    }
}

fn seal<C: AeadInPlace + KeyInit>(
    key: &[u8],
    iv: &Iv,
    aad: &[u8],
    buffer: &mut Vec<u8>,
) -> Result<Mac> {
    let cipher = C::new_from_slice(key)
        .map_err(|e| CryptoError::InvalidArgument(format!("cipher key: {e}")))?;
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(&iv[..]), aad, buffer)
        .map_err(|e| CryptoError::InvalidArgument(format!("encryption failed: {e}")))?;
    let mut mac = [0u8; MAC_SIZE];
    mac.copy_from_slice(tag.as_slice());
    Ok(mac)
}

fn open<C: AeadInPlace + KeyInit>(
    key: &[u8],
    iv: &Iv,
    aad: &[u8],
    buffer: &mut Vec<u8>,
    tag: &Mac,
) -> Result<()> {
    let cipher = C::new_from_slice(key).map_err(|_| CryptoError::DecodeFailed)?;
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(&iv[..]),
            aad,
            buffer,
            GenericArray::from_slice(&tag[..]),
        )
        .map_err(|_| CryptoError::DecodeFailed)
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, key: &[u8], iv: &Iv, aad: &[u8], plaintext: &[u8]) -> Result<(Vec<u8>, Mac)> {
        let mut buffer = plaintext.to_vec();
        let tag = match key.len() {
            16 => seal::<Aes128Gcm>(key, iv, aad, &mut buffer)?,
            32 => seal::<Aes256Gcm>(key, iv, aad, &mut buffer)?,
            n => return Err(CryptoError::Unsupported(format!("AES key length {n}"))),
        };
        Ok((buffer, tag))
    }

    fn decrypt(
        &self,
        key: &[u8],
        iv: &Iv,
        aad: &[u8],
        ciphertext: &[u8],
        tag: &Mac,
    ) -> Result<Vec<u8>> {
        let mut buffer = ciphertext.to_vec();
        match key.len() {
            16 => open::<Aes128Gcm>(key, iv, aad, &mut buffer, tag)?,
            32 => open::<Aes256Gcm>(key, iv, aad, &mut buffer, tag)?,
            _ => return Err(CryptoError::DecodeFailed),
        }
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IV: Iv = [7u8; IV_SIZE];

    #[test]
    fn test_encrypt_decrypt_128() {
        let cipher = AesGcmCipher::new();
        let key = [0x11u8; 16];
        let (ct, tag) = cipher.encrypt(&key, &IV, b"", b"hello secure world").unwrap();
        assert_ne!(ct.as_slice(), b"hello secure world");

        let pt = cipher.decrypt(&key, &IV, b"", &ct, &tag).unwrap();
        assert_eq!(pt, b"hello secure world");
    }

    #[test]
    fn test_encrypt_decrypt_256() {
        let cipher = AesGcmCipher::new();
        let key = [0x22u8; 32];
        let (ct, tag) = cipher.encrypt(&key, &IV, b"aad", b"payload").unwrap();
        assert_eq!(cipher.decrypt(&key, &IV, b"aad", &ct, &tag).unwrap(), b"payload");

        // Wrong aad must fail
        assert_eq!(
            cipher.decrypt(&key, &IV, b"other", &ct, &tag),
            Err(CryptoError::DecodeFailed)
        );
    }

    #[test]
    fn test_decrypt_tampered_tag_fails() {
        let cipher = AesGcmCipher::new();
        let key = [0x33u8; 32];
        let (ct, mut tag) = cipher.encrypt(&key, &IV, b"", b"data").unwrap();
        tag[0] ^= 1;
        assert_eq!(
            cipher.decrypt(&key, &IV, b"", &ct, &tag),
            Err(CryptoError::DecodeFailed)
        );
    }

    #[test]
    fn test_mac_verify() {
        let cipher = AesGcmCipher::new();
        let key = [0x44u8; 16];
        let mac = cipher.mac(&key, &IV, b"authenticated only").unwrap();
        assert!(cipher.verify_mac(&key, &IV, b"authenticated only", &mac).is_ok());
        assert!(cipher.verify_mac(&key, &IV, b"authenticated-only", &mac).is_err());
    }

    #[test]
    fn test_gmac_known_answer() {
        // NIST GCM test case 1: zero key, zero IV, empty input.
        let cipher = AesGcmCipher::new();
        let mac = cipher.mac(&[0u8; 16], &[0u8; IV_SIZE], b"").unwrap();
        assert_eq!(hex::encode(mac), "58e2fccefa7e3061367f1d57a4e7455a");
    }

    #[test]
    fn test_unsupported_key_length() {
        let cipher = AesGcmCipher::new();
        assert!(matches!(
            cipher.encrypt(&[0u8; 24], &IV, b"", b"x"),
            Err(CryptoError::Unsupported(_))
        ));
    }
}
