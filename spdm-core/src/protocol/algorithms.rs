// Licensed under the Apache-2.0 license

use crate::crypto::{AeadCipherSuite, HashAlgo};
use crate::error::SpdmError;
use bitfield::bitfield;
use zerocopy::{FromBytes, Immutable, IntoBytes};

// Measurement Specification field
bitfield! {
#[derive(FromBytes, IntoBytes, Immutable, Default, Clone, Copy)]
#[repr(C)]
pub struct MeasurementSpecification(u8);
impl Debug;
u8;
pub dmtf_measurement_spec, set_dmtf_measurement_spec: 0, 0;
reserved, _: 7, 1;
}

// Measurement Hash Algorithm field
bitfield! {
#[derive(FromBytes, IntoBytes, Immutable, Default, Clone, Copy)]
#[repr(C)]
pub struct MeasurementHashAlgo(u32);
impl Debug;
u8;
pub raw_bit_stream, set_raw_bit_stream: 0, 0;
pub tpm_alg_sha_256, set_tpm_alg_sha_256: 1, 1;
pub tpm_alg_sha_384, set_tpm_alg_sha_384: 2, 2;
pub tpm_alg_sha_512, set_tpm_alg_sha_512: 3, 3;
reserved, _: 31, 4;
}

// Base Asymmetric Algorithm field
bitfield! {
#[derive(FromBytes, IntoBytes, Immutable, Default, Clone, Copy)]
#[repr(C)]
pub struct BaseAsymAlgoFlags(u32);
impl Debug;
u8;
pub tpm_alg_rsassa_2048, set_tpm_alg_rsassa_2048: 0, 0;
pub tpm_alg_rsapss_2048, set_tpm_alg_rsapss_2048: 1, 1;
pub tpm_alg_rsassa_3072, set_tpm_alg_rsassa_3072: 2, 2;
pub tpm_alg_rsapss_3072, set_tpm_alg_rsapss_3072: 3, 3;
pub tpm_alg_ecdsa_ecc_nist_p256, set_tpm_alg_ecdsa_ecc_nist_p256: 4, 4;
pub tpm_alg_rsassa_4096, set_tpm_alg_rsassa_4096: 5, 5;
pub tpm_alg_rsapss_4096, set_tpm_alg_rsapss_4096: 6, 6;
pub tpm_alg_ecdsa_ecc_nist_p384, set_tpm_alg_ecdsa_ecc_nist_p384: 7, 7;
pub tpm_alg_ecdsa_ecc_nist_p521, set_tpm_alg_ecdsa_ecc_nist_p521: 8, 8;
reserved, _: 31, 9;
}

// Base Hash Algorithm field
bitfield! {
#[derive(FromBytes, IntoBytes, Immutable, Default, Clone, Copy)]
#[repr(C)]
pub struct BaseHashAlgoFlags(u32);
impl Debug;
u8;
pub tpm_alg_sha_256, set_tpm_alg_sha_256: 0, 0;
pub tpm_alg_sha_384, set_tpm_alg_sha_384: 1, 1;
pub tpm_alg_sha_512, set_tpm_alg_sha_512: 2, 2;
reserved, _: 31, 3;
}

// DHE Named Group field
bitfield! {
#[derive(FromBytes, IntoBytes, Immutable, Default, Clone, Copy)]
#[repr(C)]
pub struct DheNamedGroupFlags(u16);
impl Debug;
u8;
pub ffdhe_2048, set_ffdhe_2048: 0, 0;
pub ffdhe_3072, set_ffdhe_3072: 1, 1;
pub ffdhe_4096, set_ffdhe_4096: 2, 2;
pub secp_256_r1, set_secp_256_r1: 3, 3;
pub secp_384_r1, set_secp_384_r1: 4, 4;
pub secp_521_r1, set_secp_521_r1: 5, 5;
reserved, _: 15, 6;
}

// AEAD Cipher Suite field
bitfield! {
#[derive(FromBytes, IntoBytes, Immutable, Default, Clone, Copy)]
#[repr(C)]
pub struct AeadCipherSuiteFlags(u16);
impl Debug;
u8;
pub aes_128_gcm, set_aes_128_gcm: 0, 0;
pub aes_256_gcm, set_aes_256_gcm: 1, 1;
pub chacha20_poly1305, set_chacha20_poly1305: 2, 2;
reserved, _: 15, 3;
}

// Key Schedule field
bitfield! {
#[derive(FromBytes, IntoBytes, Immutable, Default, Clone, Copy)]
#[repr(C)]
pub struct KeyScheduleFlags(u16);
impl Debug;
u8;
pub spdm_key_schedule, set_spdm_key_schedule: 0, 0;
reserved, _: 15, 1;
}

// Other Param Support field
bitfield! {
#[derive(FromBytes, IntoBytes, Immutable, Default, Clone, Copy)]
#[repr(C)]
pub struct OtherParamSupport(u8);
impl Debug;
u8;
pub opaque_data_fmt0, set_opaque_data_fmt0: 0, 0;
pub opaque_data_fmt1, set_opaque_data_fmt1: 1, 1;
reserved1, _: 3, 2;
pub multi_key_conn, set_multi_key_conn: 4, 4;
reserved2, _: 7, 5;
}

/// Base hash algorithm selected for the connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum BaseHashAlgoType {
    TpmAlgSha256 = 0,
    #[default]
    TpmAlgSha384 = 1,
    TpmAlgSha512 = 2,
}

impl TryFrom<u8> for BaseHashAlgoType {
    type Error = SpdmError;
    fn try_from(value: u8) -> Result<Self, SpdmError> {
        match value {
            0 => Ok(BaseHashAlgoType::TpmAlgSha256),
            1 => Ok(BaseHashAlgoType::TpmAlgSha384),
            2 => Ok(BaseHashAlgoType::TpmAlgSha512),
            _ => Err(SpdmError::Unsupported),
        }
    }
}

impl From<BaseHashAlgoType> for HashAlgo {
    fn from(algo: BaseHashAlgoType) -> Self {
        match algo {
            BaseHashAlgoType::TpmAlgSha256 => HashAlgo::Sha256,
            BaseHashAlgoType::TpmAlgSha384 => HashAlgo::Sha384,
            BaseHashAlgoType::TpmAlgSha512 => HashAlgo::Sha512,
        }
    }
}

/// AEAD suite selected for the connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AeadCipherSuiteType {
    Aes128Gcm = 0,
    #[default]
    Aes256Gcm = 1,
    ChaCha20Poly1305 = 2,
}

impl TryFrom<u8> for AeadCipherSuiteType {
    type Error = SpdmError;
    fn try_from(value: u8) -> Result<Self, SpdmError> {
        match value {
            0 => Ok(AeadCipherSuiteType::Aes128Gcm),
            1 => Ok(AeadCipherSuiteType::Aes256Gcm),
            2 => Ok(AeadCipherSuiteType::ChaCha20Poly1305),
            _ => Err(SpdmError::Unsupported),
        }
    }
}

impl From<AeadCipherSuiteType> for AeadCipherSuite {
    fn from(suite: AeadCipherSuiteType) -> Self {
        match suite {
            AeadCipherSuiteType::Aes128Gcm => AeadCipherSuite::Aes128Gcm,
            AeadCipherSuiteType::Aes256Gcm => AeadCipherSuite::Aes256Gcm,
            AeadCipherSuiteType::ChaCha20Poly1305 => AeadCipherSuite::ChaCha20Poly1305,
        }
    }
}

/// DHE group selected for the connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DheGroupType {
    #[default]
    Secp384r1 = 0,
}

/// Algorithm sets advertised by the local endpoint before negotiation.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceAlgorithms {
    pub measurement_spec: MeasurementSpecification,
    pub other_param_support: OtherParamSupport,
    pub measurement_hash_algo: MeasurementHashAlgo,
    pub base_asym_algo: BaseAsymAlgoFlags,
    pub base_hash_algo: BaseHashAlgoFlags,
    pub dhe_group: DheNamedGroupFlags,
    pub aead_cipher_suite: AeadCipherSuiteFlags,
    pub req_base_asym_algo: BaseAsymAlgoFlags,
    pub key_schedule: KeyScheduleFlags,
}

/// Exactly one algorithm per category, fixed once the connection reaches
/// the negotiated state.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelectedAlgorithms {
    pub measurement_spec: MeasurementSpecification,
    pub other_param_selection: OtherParamSupport,
    pub measurement_hash_algo: MeasurementHashAlgo,
    pub base_asym_algo: crate::crypto::asym::AsymAlgo,
    pub base_hash_algo: BaseHashAlgoType,
    pub dhe_group: DheGroupType,
    pub aead_cipher_suite: AeadCipherSuiteType,
    pub req_base_asym_algo: crate::crypto::asym::AsymAlgo,
    pub key_schedule: KeyScheduleFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selected_algorithm_conversions() {
        let hash: HashAlgo = BaseHashAlgoType::TpmAlgSha512.into();
        assert_eq!(hash.size(), 64);

        let aead: AeadCipherSuite = AeadCipherSuiteType::Aes128Gcm.into();
        assert_eq!(aead.key_size(), 16);
        assert!(BaseHashAlgoType::try_from(3).is_err());
    }

    #[test]
    fn algorithm_flag_bits() {
        let mut flags = BaseHashAlgoFlags::default();
        flags.set_tpm_alg_sha_384(1);
        assert_eq!(flags.0, 0x0000_0002);

        let mut dhe = DheNamedGroupFlags::default();
        dhe.set_secp_384_r1(1);
        assert_eq!(dhe.0, 0x0010);
    }
}
