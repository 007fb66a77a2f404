// Licensed under the Apache-2.0 license

use crate::codec::{CodecError, MessageBuf};

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, PartialEq)]
pub enum TransportError {
    Timeout,
    NoResponse,
    BufferTooSmall,
    InvalidFrame,
    UnsupportedMessageType,
    DriverError,
    Codec(CodecError),
}

impl From<CodecError> for TransportError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::BufferTooSmall => TransportError::BufferTooSmall,
            e => TransportError::Codec(e),
        }
    }
}

/// Endpoint hooks supplied by the integrator. These are the only calls in
/// the core allowed to block; both take a deadline in microseconds.
pub trait SpdmDeviceIo {
    fn send(&mut self, message: &[u8], timeout_us: u32) -> TransportResult<()>;

    /// Receive one complete frame into `buffer`, returning its length.
    fn receive(&mut self, buffer: &mut [u8], timeout_us: u32) -> TransportResult<usize>;
}

/// Transport framing hooks. The record layer asks the transport how many
/// low-order sequence-number bytes go on the wire and how much random pad
/// a record may carry; both are transport constants, not per-call choices.
pub trait SpdmTransport {
    /// Bytes of framing prepended by `encode_frame`.
    fn header_size(&self) -> usize;

    /// Wrap the message in transport framing. When `session_id` is present
    /// the payload is already a secured record.
    fn encode_frame(
        &self,
        session_id: Option<u32>,
        msg: &mut MessageBuf,
    ) -> TransportResult<()>;

    /// Strip the framing. Returns the record's session id iff the frame
    /// carries a secured record; the record bytes themselves stay in the
    /// buffer window.
    fn decode_frame(&self, msg: &mut MessageBuf) -> TransportResult<Option<u32>>;

    /// Number of on-wire sequence-number bytes, 0..=8.
    fn sequence_number_size(&self) -> usize;

    /// Upper bound for the record random pad; 0 disables padding.
    fn max_random_count(&self) -> u32;
}
