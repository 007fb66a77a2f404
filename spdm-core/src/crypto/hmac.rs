// Licensed under the Apache-2.0 license

use super::hash::{HashAlgo, MAX_HASH_SIZE};
use super::{PrimitiveError, PrimitiveResult};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384, Sha512};

/// Incremental HMAC context keyed by raw bytes. The request- and
/// response-finished-key flavors are the same context constructed from the
/// respective key.
#[derive(Clone)]
pub struct HmacContext {
    inner: HmacInner,
}

#[derive(Clone)]
enum HmacInner {
    Sha256(Hmac<Sha256>),
    Sha384(Hmac<Sha384>),
    Sha512(Hmac<Sha512>),
}

impl HmacContext {
    pub fn init(algo: HashAlgo, key: &[u8]) -> PrimitiveResult<Self> {
        let inner = match algo {
            HashAlgo::Sha256 => HmacInner::Sha256(
                Hmac::new_from_slice(key).map_err(|_| PrimitiveError::InvalidKey)?,
            ),
            HashAlgo::Sha384 => HmacInner::Sha384(
                Hmac::new_from_slice(key).map_err(|_| PrimitiveError::InvalidKey)?,
            ),
            HashAlgo::Sha512 => HmacInner::Sha512(
                Hmac::new_from_slice(key).map_err(|_| PrimitiveError::InvalidKey)?,
            ),
        };
        Ok(Self { inner })
    }

    pub fn algo(&self) -> HashAlgo {
        match self.inner {
            HmacInner::Sha256(_) => HashAlgo::Sha256,
            HmacInner::Sha384(_) => HashAlgo::Sha384,
            HmacInner::Sha512(_) => HashAlgo::Sha512,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.inner {
            HmacInner::Sha256(m) => m.update(data),
            HmacInner::Sha384(m) => m.update(data),
            HmacInner::Sha512(m) => m.update(data),
        }
    }

    /// Consume the context and write the MAC into `mac`.
    pub fn finalize(self, mac: &mut [u8]) -> PrimitiveResult<usize> {
        let size = self.algo().size();
        if mac.len() < size {
            return Err(PrimitiveError::BufferTooSmall);
        }
        match self.inner {
            HmacInner::Sha256(m) => mac[..size].copy_from_slice(&m.finalize().into_bytes()),
            HmacInner::Sha384(m) => mac[..size].copy_from_slice(&m.finalize().into_bytes()),
            HmacInner::Sha512(m) => mac[..size].copy_from_slice(&m.finalize().into_bytes()),
        }
        Ok(size)
    }

    /// MAC over the bytes absorbed so far, leaving the stream usable.
    pub fn peek(&self, mac: &mut [u8]) -> PrimitiveResult<usize> {
        self.clone().finalize(mac)
    }
}

/// One-shot HMAC.
pub fn hmac(algo: HashAlgo, key: &[u8], data: &[u8], mac: &mut [u8]) -> PrimitiveResult<usize> {
    let mut ctx = HmacContext::init(algo, key)?;
    ctx.update(data);
    ctx.finalize(mac)
}

/// HKDF-Extract (RFC 5869). Writes `H.len` bytes of PRK into `prk`.
pub fn hkdf_extract(
    algo: HashAlgo,
    salt: &[u8],
    ikm: &[u8],
    prk: &mut [u8],
) -> PrimitiveResult<usize> {
    let size = algo.size();
    if prk.len() < size {
        return Err(PrimitiveError::BufferTooSmall);
    }
    match algo {
        HashAlgo::Sha256 => {
            let (out, _) = Hkdf::<Sha256>::extract(Some(salt), ikm);
            prk[..size].copy_from_slice(&out);
        }
        HashAlgo::Sha384 => {
            let (out, _) = Hkdf::<Sha384>::extract(Some(salt), ikm);
            prk[..size].copy_from_slice(&out);
        }
        HashAlgo::Sha512 => {
            let (out, _) = Hkdf::<Sha512>::extract(Some(salt), ikm);
            prk[..size].copy_from_slice(&out);
        }
    }
    Ok(size)
}

/// HKDF-Expand (RFC 5869). Fills all of `okm` from `prk` and `info`.
pub fn hkdf_expand(algo: HashAlgo, prk: &[u8], info: &[u8], okm: &mut [u8]) -> PrimitiveResult<()> {
    match algo {
        HashAlgo::Sha256 => Hkdf::<Sha256>::from_prk(prk)
            .map_err(|_| PrimitiveError::InvalidKey)?
            .expand(info, okm)
            .map_err(|_| PrimitiveError::BufferTooSmall),
        HashAlgo::Sha384 => Hkdf::<Sha384>::from_prk(prk)
            .map_err(|_| PrimitiveError::InvalidKey)?
            .expand(info, okm)
            .map_err(|_| PrimitiveError::BufferTooSmall),
        HashAlgo::Sha512 => Hkdf::<Sha512>::from_prk(prk)
            .map_err(|_| PrimitiveError::InvalidKey)?
            .expand(info, okm)
            .map_err(|_| PrimitiveError::BufferTooSmall),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 5869 test case 1 (SHA-256).
    #[test]
    fn hkdf_rfc5869_case_1() {
        let ikm = [0x0b; 22];
        let salt: [u8; 13] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        let info: [u8; 10] = [0xf0, 0xf1, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8, 0xf9];

        let mut prk = [0u8; MAX_HASH_SIZE];
        let n = hkdf_extract(HashAlgo::Sha256, &salt, &ikm, &mut prk).unwrap();
        assert_eq!(n, 32);
        assert_eq!(
            prk[..4],
            [0x07, 0x77, 0x09, 0x36],
            "PRK prefix mismatch against RFC vector"
        );

        let mut okm = [0u8; 42];
        hkdf_expand(HashAlgo::Sha256, &prk[..n], &info, &mut okm).unwrap();
        assert_eq!(okm[..4], [0x3c, 0xb2, 0x5f, 0x25]);
        assert_eq!(okm[38..], [0x87, 0x18, 0x58, 0x65]);
    }

    #[test]
    fn incremental_hmac_matches_one_shot() {
        let key = [0x5a; 48];
        let mut whole = [0u8; MAX_HASH_SIZE];
        let mut split = [0u8; MAX_HASH_SIZE];

        let n = hmac(HashAlgo::Sha384, &key, b"finished-key transcript", &mut whole).unwrap();

        let mut ctx = HmacContext::init(HashAlgo::Sha384, &key).unwrap();
        ctx.update(b"finished-key ");
        ctx.update(b"transcript");
        let m = ctx.finalize(&mut split).unwrap();
        assert_eq!(whole[..n], split[..m]);
    }
}
