// Licensed under the Apache-2.0 license

use crate::codec::CodecError;
use crate::crypto::PrimitiveError;
use crate::session::SessionError;
use crate::transcript::TranscriptError;
use crate::transport::TransportError;

/// Error taxonomy surfaced to the application.
///
/// Every internal failure collapses into one of these kinds at the public
/// API boundary; the per-module error enums below the boundary keep the
/// detail needed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpdmError {
    /// Caller supplied a value failing a declared precondition.
    InvalidParameter,
    /// Data type, algorithm or operation not negotiated or compiled in.
    Unsupported,
    /// Caller's output buffer is shorter than needed.
    BufferTooSmall,
    /// Transcript buffer full, session table full or sequence counter exhausted.
    OutOfResources,
    /// Transport or primitive backend failed.
    DeviceError,
    /// AEAD decrypt failed after the shadow retry, sequence or session_id
    /// mismatch, or a transcript-bound signature/HMAC check failed.
    SecurityViolation,
    /// Transport deadline expired.
    Timeout,
    /// Peer produced no response within the deadline.
    NoResponse,
    /// The response-state machine refuses the request.
    NotReady,
}

pub type SpdmResult<T> = Result<T, SpdmError>;

/// SPDM error codes as carried in the last-error descriptor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SpdmErrorCode {
    #[default]
    None = 0x00,
    InvalidRequest = 0x01,
    InvalidSession = 0x02,
    Busy = 0x03,
    UnexpectedRequest = 0x04,
    Unspecified = 0x05,
    DecryptError = 0x06,
    UnsupportedRequest = 0x07,
    RequestInFlight = 0x08,
    InvalidResponseCode = 0x09,
    SessionLimitExceeded = 0x0A,
    SessionRequired = 0x0B,
    ResponseNotReady = 0x42,
    RequestResynch = 0x43,
}

/// Last-error descriptor, cleared at the start of each top-level API call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LastSpdmError {
    pub error_code: SpdmErrorCode,
    pub session_id: u32,
}

impl LastSpdmError {
    pub(crate) fn clear(&mut self) {
        *self = LastSpdmError::default();
    }

    pub(crate) fn set(&mut self, error_code: SpdmErrorCode, session_id: u32) {
        self.error_code = error_code;
        self.session_id = session_id;
    }
}

impl From<CodecError> for SpdmError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::BufferTooSmall => SpdmError::BufferTooSmall,
            _ => SpdmError::InvalidParameter,
        }
    }
}

impl From<PrimitiveError> for SpdmError {
    fn from(err: PrimitiveError) -> Self {
        match err {
            PrimitiveError::BufferTooSmall => SpdmError::BufferTooSmall,
            PrimitiveError::VerifyFailed => SpdmError::SecurityViolation,
            _ => SpdmError::DeviceError,
        }
    }
}

impl From<TranscriptError> for SpdmError {
    fn from(err: TranscriptError) -> Self {
        match err {
            TranscriptError::BufferOverflow => SpdmError::OutOfResources,
            TranscriptError::Primitive(e) => e.into(),
            _ => SpdmError::InvalidParameter,
        }
    }
}

impl From<SessionError> for SpdmError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::SessionsLimitReached
            | SessionError::SequenceNumberOverflow
            | SessionError::RecordTooLarge => SpdmError::OutOfResources,
            SessionError::BufferTooSmall => SpdmError::BufferTooSmall,
            SessionError::DecryptFailed
            | SessionError::SequenceMismatch
            | SessionError::InvalidSessionId => SpdmError::SecurityViolation,
            SessionError::DuplicateSessionId | SessionError::InvalidState => {
                SpdmError::InvalidParameter
            }
            SessionError::Codec(e) => e.into(),
            SessionError::KeySchedule(_) | SessionError::RandomSource => SpdmError::DeviceError,
        }
    }
}

impl From<TransportError> for SpdmError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => SpdmError::Timeout,
            TransportError::NoResponse => SpdmError::NoResponse,
            TransportError::BufferTooSmall => SpdmError::BufferTooSmall,
            _ => SpdmError::DeviceError,
        }
    }
}
