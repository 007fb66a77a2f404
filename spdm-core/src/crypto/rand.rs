// Licensed under the Apache-2.0 license

use super::{PrimitiveError, PrimitiveResult};
use rand::rngs::OsRng;
use rand::RngCore;

/// Fill `buf` from the OS entropy source.
pub fn rand_bytes(buf: &mut [u8]) -> PrimitiveResult<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|_| PrimitiveError::Backend)
}

/// A random u32, used for record pad-length selection.
pub fn rand_u32() -> PrimitiveResult<u32> {
    let mut bytes = [0u8; 4];
    rand_bytes(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}
