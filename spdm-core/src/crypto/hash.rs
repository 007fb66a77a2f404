// Licensed under the Apache-2.0 license

use super::{PrimitiveError, PrimitiveResult};
use sha2::{Digest, Sha256, Sha384, Sha512};

pub const SHA256_HASH_SIZE: usize = 32;
pub const SHA384_HASH_SIZE: usize = 48;
pub const SHA512_HASH_SIZE: usize = 64;
pub const MAX_HASH_SIZE: usize = 64;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    Sha256,
    #[default]
    Sha384,
    Sha512,
}

impl HashAlgo {
    pub fn size(&self) -> usize {
        match self {
            HashAlgo::Sha256 => SHA256_HASH_SIZE,
            HashAlgo::Sha384 => SHA384_HASH_SIZE,
            HashAlgo::Sha512 => SHA512_HASH_SIZE,
        }
    }
}

/// Incremental hash context, duplicable at any point so a running transcript
/// digest can be finalized without consuming the stream.
#[derive(Clone)]
pub struct HashContext {
    inner: HashInner,
}

#[derive(Clone)]
enum HashInner {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl HashContext {
    /// Start a new context; `seed` is absorbed first when present.
    pub fn init(algo: HashAlgo, seed: Option<&[u8]>) -> Self {
        let inner = match algo {
            HashAlgo::Sha256 => HashInner::Sha256(Sha256::new()),
            HashAlgo::Sha384 => HashInner::Sha384(Sha384::new()),
            HashAlgo::Sha512 => HashInner::Sha512(Sha512::new()),
        };
        let mut ctx = Self { inner };
        if let Some(seed) = seed {
            ctx.update(seed);
        }
        ctx
    }

    pub fn algo(&self) -> HashAlgo {
        match self.inner {
            HashInner::Sha256(_) => HashAlgo::Sha256,
            HashInner::Sha384(_) => HashAlgo::Sha384,
            HashInner::Sha512(_) => HashAlgo::Sha512,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.inner {
            HashInner::Sha256(d) => d.update(data),
            HashInner::Sha384(d) => d.update(data),
            HashInner::Sha512(d) => d.update(data),
        }
    }

    /// Consume the context and write the digest into `hash`.
    pub fn finalize(self, hash: &mut [u8]) -> PrimitiveResult<usize> {
        let size = self.algo().size();
        if hash.len() < size {
            return Err(PrimitiveError::BufferTooSmall);
        }
        match self.inner {
            HashInner::Sha256(d) => hash[..size].copy_from_slice(&d.finalize()),
            HashInner::Sha384(d) => hash[..size].copy_from_slice(&d.finalize()),
            HashInner::Sha512(d) => hash[..size].copy_from_slice(&d.finalize()),
        }
        Ok(size)
    }

    /// Digest of the bytes absorbed so far, leaving the stream usable.
    pub fn peek(&self, hash: &mut [u8]) -> PrimitiveResult<usize> {
        self.clone().finalize(hash)
    }
}

/// One-shot hash.
pub fn hash_all(algo: HashAlgo, data: &[u8], hash: &mut [u8]) -> PrimitiveResult<usize> {
    let mut ctx = HashContext::init(algo, None);
    ctx.update(data);
    ctx.finalize(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_matches_one_shot() {
        let data = b"spdm transcript bytes";
        let mut whole = [0u8; MAX_HASH_SIZE];
        let mut split = [0u8; MAX_HASH_SIZE];

        for algo in [HashAlgo::Sha256, HashAlgo::Sha384, HashAlgo::Sha512] {
            let n = hash_all(algo, data, &mut whole).unwrap();
            assert_eq!(n, algo.size());

            let mut ctx = HashContext::init(algo, Some(&data[..4]));
            ctx.update(&data[4..]);
            let m = ctx.finalize(&mut split).unwrap();
            assert_eq!(whole[..n], split[..m]);
        }
    }

    #[test]
    fn duplicate_preserves_stream() {
        let mut ctx = HashContext::init(HashAlgo::Sha384, None);
        ctx.update(b"prefix");

        let mut early = [0u8; SHA384_HASH_SIZE];
        ctx.peek(&mut early).unwrap();

        ctx.update(b"suffix");
        let mut late = [0u8; SHA384_HASH_SIZE];
        ctx.finalize(&mut late).unwrap();

        let mut expect = [0u8; SHA384_HASH_SIZE];
        hash_all(HashAlgo::Sha384, b"prefix", &mut expect).unwrap();
        assert_eq!(early, expect);
        hash_all(HashAlgo::Sha384, b"prefixsuffix", &mut expect).unwrap();
        assert_eq!(late, expect);
    }
}
