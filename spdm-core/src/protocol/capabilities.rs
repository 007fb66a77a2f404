// Licensed under the Apache-2.0 license

use bitfield::bitfield;
use zerocopy::{FromBytes, Immutable, IntoBytes};

// Maximum cryptographic processing timeout exponent
pub const MAX_CT_EXPONENT: u8 = 31;

pub const MIN_DATA_TRANSFER_SIZE_V12: u32 = 42;

/// Measurements Capability
#[derive(Debug, Clone, Copy)]
pub enum MeasCapability {
    NoMeasurement = 0,
    MeasurementsWithNoSignature = 1,
    MeasurementsWithSignature = 2,
    Reserved = 3,
}

/// Pre-shared Key (PSK) Capability
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PskCapability {
    NoPsk = 0,
    PskWithNoContext = 1,
    PskWithContext = 2,
    Reserved = 3,
}

/// Device Capabilities
#[derive(Default, Debug, Clone, Copy)]
pub struct DeviceCapabilities {
    pub ct_exponent: u8,
    pub flags: CapabilityFlags,
    // Only used for >= SPDM 1.2
    pub data_transfer_size: u32,
    pub max_spdm_msg_size: u32,
}

bitfield! {
#[derive(FromBytes, IntoBytes, Immutable, Default, Clone, Copy)]
#[repr(C)]
pub struct CapabilityFlags(u32);
impl Debug;
u8;
pub cache_cap, set_cache_cap: 0, 0;
pub cert_cap, set_cert_cap: 1, 1;
pub chal_cap, set_chal_cap: 2, 2;
pub meas_cap, set_meas_cap: 4, 3;
pub meas_fresh_cap, set_meas_fresh_cap: 5, 5;
pub encrypt_cap, set_encrypt_cap: 6, 6;
pub mac_cap, set_mac_cap: 7, 7;
pub mut_auth_cap, set_mut_auth_cap: 8, 8;
pub key_ex_cap, set_key_ex_cap: 9, 9;
pub psk_cap, set_psk_cap: 11, 10;
pub encap_cap, set_encap_cap: 12, 12;
pub hbeat_cap, set_hbeat_cap: 13, 13;
pub key_upd_cap, set_key_upd_cap: 14, 14;
pub handshake_in_the_clear_cap, set_handshake_in_the_clear_cap: 15, 15;
pub pub_key_id_cap, set_pub_key_id_cap: 16, 16;
pub chunk_cap, set_chunk_cap: 17, 17;
pub alias_cert_cap, set_alias_cert_cap: 18, 18;
reserved, _: 31, 19;
}

impl CapabilityFlags {
    /// Mask of the defined (non-reserved) flag bits.
    pub const DEFINED_MASK: u32 = 0x0007_FFFF;

    pub fn new(flags: u32) -> Self {
        Self(flags)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn has_reserved_bits(raw: u32) -> bool {
        raw & !Self::DEFINED_MASK != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_bits_detected() {
        assert!(!CapabilityFlags::has_reserved_bits(0x0000_F6B2));
        assert!(CapabilityFlags::has_reserved_bits(0x0008_0000));
        assert!(CapabilityFlags::has_reserved_bits(0x8000_0000));
    }

    #[test]
    fn flag_accessors() {
        let flags = CapabilityFlags::new(0x0000_F6B2);
        assert_eq!(flags.cert_cap(), 1);
        assert_eq!(flags.chal_cap(), 0);
        assert_eq!(flags.encrypt_cap(), 0);
        assert_eq!(flags.mac_cap(), 1);
        assert_eq!(flags.key_ex_cap(), 1);
        assert_eq!(flags.hbeat_cap(), 1);
        assert_eq!(flags.key_upd_cap(), 1);
        assert_eq!(flags.handshake_in_the_clear_cap(), 1);
        assert_eq!(flags.raw(), 0x0000_F6B2);
    }
}
