// Licensed under the Apache-2.0 license

use super::{PrimitiveError, PrimitiveResult};
use p384::ecdh::EphemeralSecret;
use p384::ecdsa::signature::{Signer, Verifier};
use p384::ecdsa::{Signature, SigningKey, VerifyingKey};
use p384::elliptic_curve::sec1::ToEncodedPoint;
use p384::PublicKey;
use rand::rngs::OsRng;

/// Raw `r || s` signature length for ECDSA-P384.
pub const ECDSA_P384_SIGNATURE_SIZE: usize = 96;
/// Raw `x || y` exchange-data length for ECDHE over P-384.
pub const ECDH_P384_EXCHANGE_DATA_SIZE: usize = 96;
/// Shared-secret length (the x coordinate) for ECDHE over P-384.
pub const ECDH_P384_SHARED_SECRET_SIZE: usize = 48;

/// Negotiated asymmetric algorithm.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AsymAlgo {
    #[default]
    EcdsaP384,
}

impl AsymAlgo {
    pub fn signature_size(&self) -> usize {
        ECDSA_P384_SIGNATURE_SIZE
    }
}

/// Sign `message` with a raw P-384 private scalar. The message is hashed
/// with SHA-384 internally.
pub fn asym_sign(
    algo: AsymAlgo,
    private_key: &[u8],
    message: &[u8],
    signature: &mut [u8],
) -> PrimitiveResult<usize> {
    let AsymAlgo::EcdsaP384 = algo;
    if signature.len() < ECDSA_P384_SIGNATURE_SIZE {
        return Err(PrimitiveError::BufferTooSmall);
    }
    let key = SigningKey::from_slice(private_key).map_err(|_| PrimitiveError::InvalidKey)?;
    let sig: Signature = key.sign(message);
    signature[..ECDSA_P384_SIGNATURE_SIZE].copy_from_slice(&sig.to_bytes());
    Ok(ECDSA_P384_SIGNATURE_SIZE)
}

/// Verify a raw `r || s` signature against an uncompressed SEC1 public key.
pub fn asym_verify(
    algo: AsymAlgo,
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> PrimitiveResult<()> {
    let AsymAlgo::EcdsaP384 = algo;
    let key = VerifyingKey::from_sec1_bytes(public_key).map_err(|_| PrimitiveError::InvalidPoint)?;
    let sig = Signature::from_slice(signature).map_err(|_| PrimitiveError::VerifyFailed)?;
    key.verify(message, &sig)
        .map_err(|_| PrimitiveError::VerifyFailed)
}

/// Ephemeral DHE key pair for one KEY_EXCHANGE round.
pub struct DheKeyPair {
    secret: EphemeralSecret,
}

impl DheKeyPair {
    pub fn generate() -> Self {
        Self {
            secret: EphemeralSecret::random(&mut OsRng),
        }
    }

    /// The local `x || y` exchange data to put on the wire.
    pub fn exchange_data(&self) -> [u8; ECDH_P384_EXCHANGE_DATA_SIZE] {
        let mut out = [0u8; ECDH_P384_EXCHANGE_DATA_SIZE];
        let point = self.secret.public_key().to_encoded_point(false);
        // Skip the 0x04 uncompressed-point marker.
        out.copy_from_slice(&point.as_bytes()[1..]);
        out
    }

    /// Consume the key pair and derive the shared secret from the peer's
    /// `x || y` exchange data.
    pub fn compute_shared_secret(
        self,
        peer_exchange_data: &[u8],
    ) -> PrimitiveResult<[u8; ECDH_P384_SHARED_SECRET_SIZE]> {
        if peer_exchange_data.len() != ECDH_P384_EXCHANGE_DATA_SIZE {
            return Err(PrimitiveError::InvalidPoint);
        }
        let mut sec1 = [0u8; ECDH_P384_EXCHANGE_DATA_SIZE + 1];
        sec1[0] = 0x04;
        sec1[1..].copy_from_slice(peer_exchange_data);
        let peer = PublicKey::from_sec1_bytes(&sec1).map_err(|_| PrimitiveError::InvalidPoint)?;

        let shared = self.secret.diffie_hellman(&peer);
        let mut out = [0u8; ECDH_P384_SHARED_SECRET_SIZE];
        out.copy_from_slice(shared.raw_secret_bytes());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecdhe_both_sides_agree() {
        let alice = DheKeyPair::generate();
        let bob = DheKeyPair::generate();
        let alice_data = alice.exchange_data();
        let bob_data = bob.exchange_data();

        let s1 = alice.compute_shared_secret(&bob_data).unwrap();
        let s2 = bob.compute_shared_secret(&alice_data).unwrap();
        assert_eq!(s1, s2);
        assert_ne!(s1, [0u8; ECDH_P384_SHARED_SECRET_SIZE]);
    }

    #[test]
    fn sign_verify_round_trip() {
        let signing = SigningKey::random(&mut OsRng);
        let private = signing.to_bytes();
        let public = VerifyingKey::from(&signing)
            .to_encoded_point(false)
            .to_bytes();

        let mut sig = [0u8; ECDSA_P384_SIGNATURE_SIZE];
        let msg = b"challenge auth over M1M2";
        asym_sign(AsymAlgo::EcdsaP384, private.as_slice(), msg, &mut sig).unwrap();
        asym_verify(AsymAlgo::EcdsaP384, &public, msg, &sig).unwrap();

        assert_eq!(
            asym_verify(AsymAlgo::EcdsaP384, &public, b"tampered", &sig),
            Err(PrimitiveError::VerifyFailed)
        );
    }
}
