// Licensed under the Apache-2.0 license

use super::{PrimitiveError, PrimitiveResult};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes128Gcm, Aes256Gcm, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;

pub const MAX_AEAD_KEY_SIZE: usize = 32;
pub const AEAD_IV_SIZE: usize = 12;
pub const AEAD_TAG_SIZE: usize = 16;

/// Negotiated AEAD cipher suites. All three carry a 12-byte nonce and a
/// 16-byte tag; only the key size differs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AeadCipherSuite {
    Aes128Gcm,
    #[default]
    Aes256Gcm,
    ChaCha20Poly1305,
}

impl AeadCipherSuite {
    pub fn key_size(&self) -> usize {
        match self {
            AeadCipherSuite::Aes128Gcm => 16,
            AeadCipherSuite::Aes256Gcm => 32,
            AeadCipherSuite::ChaCha20Poly1305 => 32,
        }
    }

    pub fn iv_size(&self) -> usize {
        AEAD_IV_SIZE
    }

    pub fn tag_size(&self) -> usize {
        AEAD_TAG_SIZE
    }
}

/// Seal `plaintext` into `ciphertext` and return the detached tag.
///
/// `ciphertext` must be at least `plaintext.len()` bytes; the tag is not
/// appended, matching the record layout where it sits past the cipher text.
pub fn aead_encrypt(
    suite: AeadCipherSuite,
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    plaintext: &[u8],
    ciphertext: &mut [u8],
) -> PrimitiveResult<[u8; AEAD_TAG_SIZE]> {
    if key.len() != suite.key_size() || iv.len() != AEAD_IV_SIZE {
        return Err(PrimitiveError::InvalidKey);
    }
    if ciphertext.len() < plaintext.len() {
        return Err(PrimitiveError::BufferTooSmall);
    }
    let buf = &mut ciphertext[..plaintext.len()];
    buf.copy_from_slice(plaintext);

    let nonce = GenericArray::from_slice(iv);
    let tag = match suite {
        AeadCipherSuite::Aes128Gcm => Aes128Gcm::new_from_slice(key)
            .map_err(|_| PrimitiveError::InvalidKey)?
            .encrypt_in_place_detached(nonce, aad, buf),
        AeadCipherSuite::Aes256Gcm => Aes256Gcm::new_from_slice(key)
            .map_err(|_| PrimitiveError::InvalidKey)?
            .encrypt_in_place_detached(nonce, aad, buf),
        AeadCipherSuite::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| PrimitiveError::InvalidKey)?
            .encrypt_in_place_detached(nonce, aad, buf),
    }
    .map_err(|_| PrimitiveError::Backend)?;

    let mut out = [0u8; AEAD_TAG_SIZE];
    out.copy_from_slice(&tag);
    Ok(out)
}

/// Open `ciphertext` into `plaintext`, verifying `tag` over `aad`.
///
/// The tag comparison is constant-time inside the backend. Any mismatch is
/// reported as `VerifyFailed` with nothing written.
pub fn aead_decrypt(
    suite: AeadCipherSuite,
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    plaintext: &mut [u8],
) -> PrimitiveResult<usize> {
    if key.len() != suite.key_size() || iv.len() != AEAD_IV_SIZE {
        return Err(PrimitiveError::InvalidKey);
    }
    if tag.len() != AEAD_TAG_SIZE {
        return Err(PrimitiveError::VerifyFailed);
    }
    if plaintext.len() < ciphertext.len() {
        return Err(PrimitiveError::BufferTooSmall);
    }
    let buf = &mut plaintext[..ciphertext.len()];
    buf.copy_from_slice(ciphertext);

    let nonce = GenericArray::from_slice(iv);
    let tag = GenericArray::from_slice(tag);
    let result = match suite {
        AeadCipherSuite::Aes128Gcm => Aes128Gcm::new_from_slice(key)
            .map_err(|_| PrimitiveError::InvalidKey)?
            .decrypt_in_place_detached(nonce, aad, buf, tag),
        AeadCipherSuite::Aes256Gcm => Aes256Gcm::new_from_slice(key)
            .map_err(|_| PrimitiveError::InvalidKey)?
            .decrypt_in_place_detached(nonce, aad, buf, tag),
        AeadCipherSuite::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| PrimitiveError::InvalidKey)?
            .decrypt_in_place_detached(nonce, aad, buf, tag),
    };

    match result {
        Ok(()) => Ok(ciphertext.len()),
        Err(_) => {
            buf.fill(0);
            Err(PrimitiveError::VerifyFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip_all_suites() {
        let key256 = [0x42; 32];
        let key128 = [0x42; 16];
        let iv = [0x07; AEAD_IV_SIZE];
        let aad = [0xA0, 0xA1, 0xA2];
        let msg = b"record payload";

        for suite in [
            AeadCipherSuite::Aes128Gcm,
            AeadCipherSuite::Aes256Gcm,
            AeadCipherSuite::ChaCha20Poly1305,
        ] {
            let key = &[&key128[..], &key256[..], &key256[..]]
                [suite as usize][..suite.key_size()];
            let mut ct = [0u8; 64];
            let tag = aead_encrypt(suite, key, &iv, &aad, msg, &mut ct).unwrap();

            let mut pt = [0u8; 64];
            let n = aead_decrypt(suite, key, &iv, &aad, &ct[..msg.len()], &tag, &mut pt).unwrap();
            assert_eq!(&pt[..n], msg);
        }
    }

    #[test]
    fn tampered_tag_rejected() {
        let key = [0x42; 32];
        let iv = [0x07; AEAD_IV_SIZE];
        let mut ct = [0u8; 16];
        let mut tag =
            aead_encrypt(AeadCipherSuite::Aes256Gcm, &key, &iv, &[], b"payload", &mut ct).unwrap();
        tag[0] ^= 1;

        let mut pt = [0u8; 16];
        assert_eq!(
            aead_decrypt(AeadCipherSuite::Aes256Gcm, &key, &iv, &[], &ct[..7], &tag, &mut pt),
            Err(PrimitiveError::VerifyFailed)
        );
    }

    #[test]
    fn mac_only_empty_plaintext() {
        // MAC_ONLY records carry the payload in the AAD and encrypt nothing.
        let key = [0x11; 32];
        let iv = [0x00; AEAD_IV_SIZE];
        let aad = b"header and app payload";
        let mut ct = [0u8; 0];
        let tag = aead_encrypt(AeadCipherSuite::Aes256Gcm, &key, &iv, aad, &[], &mut ct).unwrap();

        let mut pt = [0u8; 0];
        assert_eq!(
            aead_decrypt(AeadCipherSuite::Aes256Gcm, &key, &iv, aad, &[], &tag, &mut pt).unwrap(),
            0
        );
    }
}
