// Licensed under the Apache-2.0 license

//! Software primitive facade.
//!
//! One concrete dispatch table over the pure-Rust crypto stack. The rest of
//! the crate only speaks in terms of these wrappers, so swapping the backend
//! means swapping this module, not its callers.

pub mod aead;
pub mod asym;
pub mod hash;
pub mod hmac;
pub mod rand;

pub use aead::{AeadCipherSuite, AEAD_IV_SIZE, AEAD_TAG_SIZE, MAX_AEAD_KEY_SIZE};
pub use hash::{HashAlgo, HashContext, MAX_HASH_SIZE};
pub use hmac::HmacContext;

/// Single failure kind for every primitive; callers map it onto the
/// SPDM-layer taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveError {
    BufferTooSmall,
    InvalidKey,
    InvalidPoint,
    VerifyFailed,
    Backend,
}

pub type PrimitiveResult<T> = Result<T, PrimitiveError>;
