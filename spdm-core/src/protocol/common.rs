// Licensed under the Apache-2.0 license

use crate::codec::CommonCodec;
use crate::error::SpdmError;
use crate::protocol::version::SpdmVersion;
use bitfield::bitfield;
use zerocopy::{FromBytes, Immutable, IntoBytes};

/// SPDM request/response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqRespCode {
    GetDigests = 0x81,
    GetCertificate = 0x82,
    Challenge = 0x83,
    GetVersion = 0x84,
    GetMeasurements = 0xE0,
    GetCapabilities = 0xE1,
    NegotiateAlgorithms = 0xE3,
    KeyExchange = 0xE4,
    Finish = 0xE5,
    PskExchange = 0xE6,
    PskFinish = 0xE7,
    Heartbeat = 0xE8,
    KeyUpdate = 0xE9,
    GetEncapsulatedRequest = 0xEA,
    DeliverEncapsulatedResponse = 0xEB,
    EndSession = 0xEC,
    Digests = 0x01,
    Certificate = 0x02,
    ChallengeAuth = 0x03,
    Version = 0x04,
    Measurements = 0x60,
    Capabilities = 0x61,
    Algorithms = 0x63,
    KeyExchangeRsp = 0x64,
    FinishRsp = 0x65,
    PskExchangeRsp = 0x66,
    PskFinishRsp = 0x67,
    HeartbeatAck = 0x68,
    KeyUpdateAck = 0x69,
    EncapsulatedRequest = 0x6A,
    EncapsulatedResponseAck = 0x6B,
    EndSessionAck = 0x6C,
    Error = 0x7F,
}

impl TryFrom<u8> for ReqRespCode {
    type Error = SpdmError;
    fn try_from(value: u8) -> Result<Self, SpdmError> {
        match value {
            0x81 => Ok(ReqRespCode::GetDigests),
            0x82 => Ok(ReqRespCode::GetCertificate),
            0x83 => Ok(ReqRespCode::Challenge),
            0x84 => Ok(ReqRespCode::GetVersion),
            0xE0 => Ok(ReqRespCode::GetMeasurements),
            0xE1 => Ok(ReqRespCode::GetCapabilities),
            0xE3 => Ok(ReqRespCode::NegotiateAlgorithms),
            0xE4 => Ok(ReqRespCode::KeyExchange),
            0xE5 => Ok(ReqRespCode::Finish),
            0xE6 => Ok(ReqRespCode::PskExchange),
            0xE7 => Ok(ReqRespCode::PskFinish),
            0xE8 => Ok(ReqRespCode::Heartbeat),
            0xE9 => Ok(ReqRespCode::KeyUpdate),
            0xEA => Ok(ReqRespCode::GetEncapsulatedRequest),
            0xEB => Ok(ReqRespCode::DeliverEncapsulatedResponse),
            0xEC => Ok(ReqRespCode::EndSession),
            0x01 => Ok(ReqRespCode::Digests),
            0x02 => Ok(ReqRespCode::Certificate),
            0x03 => Ok(ReqRespCode::ChallengeAuth),
            0x04 => Ok(ReqRespCode::Version),
            0x60 => Ok(ReqRespCode::Measurements),
            0x61 => Ok(ReqRespCode::Capabilities),
            0x63 => Ok(ReqRespCode::Algorithms),
            0x64 => Ok(ReqRespCode::KeyExchangeRsp),
            0x65 => Ok(ReqRespCode::FinishRsp),
            0x66 => Ok(ReqRespCode::PskExchangeRsp),
            0x67 => Ok(ReqRespCode::PskFinishRsp),
            0x68 => Ok(ReqRespCode::HeartbeatAck),
            0x69 => Ok(ReqRespCode::KeyUpdateAck),
            0x6A => Ok(ReqRespCode::EncapsulatedRequest),
            0x6B => Ok(ReqRespCode::EncapsulatedResponseAck),
            0x6C => Ok(ReqRespCode::EndSessionAck),
            0x7F => Ok(ReqRespCode::Error),
            _ => Err(SpdmError::Unsupported),
        }
    }
}

impl From<ReqRespCode> for u8 {
    fn from(code: ReqRespCode) -> Self {
        code as u8
    }
}

bitfield! {
#[derive(FromBytes, IntoBytes, Immutable, Clone, Copy)]
#[repr(C)]
pub struct SpdmMsgHdr(u16);
impl Debug;
u8;
version_raw, set_version_raw: 7, 0;
req_resp_code_raw, set_req_resp_code_raw: 15, 8;
}

impl SpdmMsgHdr {
    pub fn new(version: SpdmVersion, req_resp_code: ReqRespCode) -> Self {
        let mut hdr = SpdmMsgHdr(0);
        hdr.set_version_raw(version.into());
        hdr.set_req_resp_code_raw(req_resp_code.into());
        hdr
    }

    pub fn version(&self) -> Result<SpdmVersion, SpdmError> {
        self.version_raw().try_into()
    }

    pub fn req_resp_code(&self) -> Result<ReqRespCode, SpdmError> {
        self.req_resp_code_raw().try_into()
    }
}

impl CommonCodec for SpdmMsgHdr {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, MessageBuf};

    #[test]
    fn msg_header_round_trip() {
        let hdr = SpdmMsgHdr::new(SpdmVersion::V12, ReqRespCode::KeyExchange);

        let mut storage = [0u8; 4];
        let mut buf = MessageBuf::new(&mut storage);
        assert_eq!(hdr.encode(&mut buf).unwrap(), 2);
        assert_eq!(buf.message_data(), &[] as &[u8]);
        buf.push_data(2).unwrap();
        assert_eq!(buf.message_data(), &[0x12, 0xE4]);

        let decoded = SpdmMsgHdr::decode(&mut buf).unwrap();
        assert_eq!(decoded.version().unwrap(), SpdmVersion::V12);
        assert_eq!(decoded.req_resp_code().unwrap(), ReqRespCode::KeyExchange);
    }

    #[test]
    fn unknown_codes_are_rejected() {
        assert!(ReqRespCode::try_from(0x7Eu8).is_err());
        for code in [0x84u8, 0xE0, 0xE4, 0xE9, 0xEC, 0x7F] {
            let parsed = ReqRespCode::try_from(code).unwrap();
            assert_eq!(u8::from(parsed), code);
        }
    }
}
