// Licensed under the Apache-2.0 license

use zerocopy::{FromBytes, Immutable, IntoBytes};

pub type CodecResult<T> = Result<T, CodecError>;

#[derive(Debug, PartialEq)]
pub enum CodecError {
    BufferTooSmall,
    BufferOverflow,
    BufferUnderflow,
    ReadError,
    WriteError,
}

/// Encode/decode against a [`MessageBuf`].
pub trait Codec {
    fn encode(&self, buffer: &mut MessageBuf) -> CodecResult<usize>;
    fn decode(buffer: &mut MessageBuf) -> CodecResult<Self>
    where
        Self: Sized;
}

/// Marker for plain-old-data wire types. Anything zerocopy can transmute
/// gets `Codec` for free through the blanket impl below.
pub trait CommonCodec: FromBytes + IntoBytes + Immutable {}

impl CommonCodec for u8 {}
impl CommonCodec for u16 {}
impl CommonCodec for u32 {}
impl CommonCodec for u64 {}

impl<T: CommonCodec> Codec for T {
    fn encode(&self, buffer: &mut MessageBuf) -> CodecResult<usize> {
        let len = core::mem::size_of::<T>();
        buffer.put_data(len)?;
        let out = buffer.data_mut(len)?;
        self.write_to(out).map_err(|_| CodecError::WriteError)?;
        buffer.pull_data(len)?;
        Ok(len)
    }

    fn decode(buffer: &mut MessageBuf) -> CodecResult<T> {
        let len = core::mem::size_of::<T>();
        if buffer.data_len() < len {
            Err(CodecError::BufferTooSmall)?;
        }
        let data = buffer.data(len)?;
        let value = T::read_from_bytes(data).map_err(|_| CodecError::ReadError)?;
        buffer.pull_data(len)?;
        Ok(value)
    }
}

/// Append a raw byte run to the buffer tail.
pub fn encode_u8_slice(data: &[u8], buffer: &mut MessageBuf) -> CodecResult<usize> {
    let len = data.len();
    buffer.put_data(len)?;
    buffer.data_mut(len)?.copy_from_slice(data);
    buffer.pull_data(len)?;
    Ok(len)
}

/// Sliding-window message buffer.
///
/// `data..tail` is the unprocessed payload window. Decoding pulls `data`
/// forward past consumed headers; encoding pushes `data` back to prepend
/// them. [`MessageBuf::reserve`] leaves headroom in front of the window so
/// inner payloads can be written first and wrapped afterwards.
#[derive(Debug)]
pub struct MessageBuf<'a> {
    buffer: &'a mut [u8],
    data: usize,
    tail: usize,
}

impl<'a> MessageBuf<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            data: 0,
            tail: 0,
        }
    }

    /// Reserve headroom at the front of an empty buffer.
    pub fn reserve(&mut self, header_len: usize) -> CodecResult<()> {
        if self.tail + header_len > self.buffer.len() {
            Err(CodecError::BufferTooSmall)?;
        }
        self.data += header_len;
        self.tail += header_len;
        Ok(())
    }

    /// Length of the current payload window.
    pub fn data_len(&self) -> usize {
        self.tail - self.data
    }

    /// Grow the buffer tail by `len` bytes.
    pub fn put_data(&mut self, len: usize) -> CodecResult<()> {
        if self.tail + len > self.buffer.len() {
            Err(CodecError::BufferTooSmall)?;
        }
        self.tail += len;
        Ok(())
    }

    /// Move the data pointer back, exposing `len` bytes of headroom as the
    /// new window start (header prepend).
    pub fn push_data(&mut self, len: usize) -> CodecResult<()> {
        if self.data < len {
            Err(CodecError::BufferUnderflow)?;
        }
        self.data -= len;
        Ok(())
    }

    /// Advance the data pointer past `len` consumed bytes.
    pub fn pull_data(&mut self, len: usize) -> CodecResult<()> {
        if self.data + len > self.tail {
            Err(CodecError::BufferOverflow)?;
        }
        self.data += len;
        Ok(())
    }

    /// Shrink the message so the window holds exactly `len` bytes.
    pub fn trim(&mut self, len: usize) -> CodecResult<()> {
        if self.data + len > self.buffer.len() {
            Err(CodecError::BufferUnderflow)?;
        }
        self.tail = self.data + len;
        Ok(())
    }

    pub fn data(&self, len: usize) -> CodecResult<&[u8]> {
        if self.data + len > self.tail {
            Err(CodecError::BufferOverflow)?;
        }
        Ok(&self.buffer[self.data..self.data + len])
    }

    pub fn data_mut(&mut self, len: usize) -> CodecResult<&mut [u8]> {
        if self.data + len > self.tail {
            Err(CodecError::BufferOverflow)?;
        }
        Ok(&mut self.buffer[self.data..self.data + len])
    }

    /// The current window as one slice.
    pub fn message_data(&self) -> &[u8] {
        &self.buffer[self.data..self.tail]
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn msg_len(&self) -> usize {
        self.tail
    }

    /// Zero the storage and rewind all pointers.
    pub fn reset(&mut self) {
        self.buffer.fill(0);
        self.data = 0;
        self.tail = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_prepend_round_trip() {
        let mut storage = [0u8; 32];
        let mut buf = MessageBuf::new(&mut storage);

        // Encode with 3 bytes of headroom for two outer headers.
        assert!(buf.reserve(3).is_ok());
        let payload = [0xAA, 0xBB, 0xCC, 0xDD];
        assert_eq!(encode_u8_slice(&payload, &mut buf).unwrap(), 4);

        assert!(buf.push_data(4).is_ok());
        assert!(buf.push_data(2).is_ok());
        buf.data_mut(2).unwrap().copy_from_slice(&[0x10, 0x84]);
        assert!(buf.push_data(1).is_ok());
        buf.data_mut(1).unwrap().copy_from_slice(&[0x05]);

        assert_eq!(buf.msg_len(), 7);
        assert_eq!(
            buf.message_data(),
            &[0x05, 0x10, 0x84, 0xAA, 0xBB, 0xCC, 0xDD]
        );

        // Decode strips the headers again.
        assert_eq!(buf.data(1).unwrap(), &[0x05]);
        assert!(buf.pull_data(3).is_ok());
        assert_eq!(buf.data(4).unwrap(), &payload);
    }

    #[test]
    fn typed_codec_little_endian() {
        let mut storage = [0u8; 16];
        let mut buf = MessageBuf::new(&mut storage);

        let id: u32 = 0xDEADBEEF;
        let len: u16 = 0x0113;
        assert_eq!(id.encode(&mut buf).unwrap(), 4);
        assert_eq!(len.encode(&mut buf).unwrap(), 2);
        assert_eq!(
            buf.message_data(),
            &[0xEF, 0xBE, 0xAD, 0xDE, 0x13, 0x01][4 + 2..]
        );

        // Rewind the window and decode both fields back.
        assert!(buf.push_data(6).is_ok());
        assert_eq!(
            buf.message_data(),
            &[0xEF, 0xBE, 0xAD, 0xDE, 0x13, 0x01]
        );
        assert_eq!(u32::decode(&mut buf).unwrap(), id);
        assert_eq!(u16::decode(&mut buf).unwrap(), len);
        assert_eq!(buf.data_len(), 0);
    }

    #[test]
    fn bounds_are_enforced() {
        let mut storage = [0u8; 4];
        let mut buf = MessageBuf::new(&mut storage);
        assert_eq!(buf.put_data(8), Err(CodecError::BufferTooSmall));
        assert!(buf.put_data(4).is_ok());
        assert_eq!(buf.data(5), Err(CodecError::BufferOverflow));
        assert_eq!(buf.push_data(1), Err(CodecError::BufferUnderflow));
    }
}
