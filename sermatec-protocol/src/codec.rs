//! Incremental frame decoder for byte streams.

use crate::frame::Frame;
use bytes::BytesMut;

/// Accumulates bytes read from a socket and splits them into frames.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(512),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to split the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Option<Frame> {
        Frame::decode(&mut self.buffer)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_frame_decoding() {
        let frame = Frame::response(0x0a, &[0x01, 0x02, 0x03, 0x04]).unwrap();
        let encoded = frame.as_bytes();

        let mut decoder = Decoder::new();

        // Feed partial data
        decoder.extend(&encoded[..5]);
        assert!(decoder.decode_frame().is_none());

        decoder.extend(&encoded[5..9]);
        assert!(decoder.decode_frame().is_none());

        // Feed the rest
        decoder.extend(&encoded[9..]);
        let decoded = decoder.decode_frame().unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let first = Frame::response(0x95, &[0xaa; 10]).unwrap();
        let second = Frame::response(0x9d, &[0xbb; 3]).unwrap();

        let mut decoder = Decoder::new();
        decoder.extend(first.as_bytes());
        decoder.extend(second.as_bytes());

        assert_eq!(decoder.decode_frame(), Some(first));
        assert_eq!(decoder.decode_frame(), Some(second));
        assert!(decoder.decode_frame().is_none());
    }

    #[test]
    fn test_clear_drops_stale_bytes() {
        let mut decoder = Decoder::new();
        decoder.extend(&[0xfe, 0x55, 0x14]);
        assert_eq!(decoder.buffered(), 3);

        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }
}
