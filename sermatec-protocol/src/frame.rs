//! Binary frame format.
//!
//! Frame layout (7 byte header + payload + 2 byte trailer):
//!
//! ```text
//! +-----------+--------+----------+---------+------+-------------+
//! | signature | sender | receiver | command | zero | payload_len |
//! |  FE 55    | 1 byte |  1 byte  | 1 byte  |  00  |   1 byte    |
//! +-----------+--------+----------+---------+------+-------------+
//! | payload              | checksum | footer |
//! | payload_len bytes    |  1 byte  |   AE   |
//! +----------------------+----------+--------+
//! ```
//!
//! The checksum is a running XOR over every preceding byte, seeded with `0x0F`.

use crate::error::{IntegrityError, ProtocolError};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

/// Signature opening every frame.
pub const SIGNATURE: [u8; 2] = [0xFE, 0x55];

/// Address of the client application.
pub const APP_ADDRESS: u8 = 0x64;

/// Address of the inverter.
pub const INVERTER_ADDRESS: u8 = 0x14;

/// Footer closing every frame.
pub const FOOTER: u8 = 0xAE;

/// Seed of the XOR checksum.
pub const CHECKSUM_SEED: u8 = 0x0F;

/// Size of the fixed frame header (signature, addresses, command, zero, length).
pub const FRAME_HEADER_SIZE: usize = 7;

/// Size of the trailer (checksum + footer).
pub const FRAME_TRAILER_SIZE: usize = 2;

/// Shortest byte sequence that can pass validation.
pub const MIN_FRAME_SIZE: usize = 8;

/// Largest payload the one-byte length field can describe.
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize;

/// Computes the XOR-fold checksum of `data`.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(CHECKSUM_SEED, |acc, byte| acc ^ byte)
}

/// A single frame, in either direction.
///
/// Frames are immutable once built. Received frames are kept verbatim so
/// they can be validated (and decoded) byte by byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
}

impl Frame {
    /// Builds a frame from its parts, appending checksum and footer.
    pub fn encode(
        sender: u8,
        receiver: u8,
        command: u8,
        payload: &[u8],
    ) -> Result<Self, ProtocolError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut buf =
            BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len() + FRAME_TRAILER_SIZE);
        buf.put_slice(&SIGNATURE);
        buf.put_u8(sender);
        buf.put_u8(receiver);
        buf.put_u8(command);
        buf.put_u8(0x00);
        buf.put_u8(payload.len() as u8);
        buf.put_slice(payload);

        let sum = checksum(&buf);
        buf.put_u8(sum);
        buf.put_u8(FOOTER);

        Ok(Self {
            bytes: buf.freeze(),
        })
    }

    /// Builds a request frame (application to inverter).
    pub fn request(command: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        let frame = Self::encode(APP_ADDRESS, INVERTER_ADDRESS, command, payload)?;
        tracing::debug!("Built request: {:02x?}", frame.as_bytes());
        Ok(frame)
    }

    /// Builds a response frame (inverter to application).
    pub fn response(command: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        Self::encode(INVERTER_ADDRESS, APP_ADDRESS, command, payload)
    }

    /// Wraps raw received bytes without validating them.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Raw frame bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Command byte, if the frame is long enough to carry one.
    pub fn command(&self) -> Option<u8> {
        self.bytes.get(4).copied()
    }

    /// Payload bytes between header and trailer.
    pub fn payload(&self) -> &[u8] {
        if self.bytes.len() < FRAME_HEADER_SIZE + FRAME_TRAILER_SIZE {
            return &[];
        }
        &self.bytes[FRAME_HEADER_SIZE..self.bytes.len() - FRAME_TRAILER_SIZE]
    }

    /// Splits one frame off the front of `buf`.
    ///
    /// Returns `None` until the header and the announced payload plus trailer
    /// are buffered. No validation happens here; see [`Frame::check`].
    pub fn decode(buf: &mut BytesMut) -> Option<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return None;
        }

        let payload_len = buf[FRAME_HEADER_SIZE - 1] as usize;
        let total_len = FRAME_HEADER_SIZE + payload_len + FRAME_TRAILER_SIZE;
        if buf.len() < total_len {
            return None;
        }

        Some(Self {
            bytes: buf.split_to(total_len).freeze(),
        })
    }

    /// Validates this frame as an inverter response carrying `expected_command`.
    pub fn check(&self, expected_command: u8) -> Result<(), IntegrityError> {
        let data = self.as_bytes();
        let len = data.len();

        if len < MIN_FRAME_SIZE {
            return Err(IntegrityError::TooShort {
                len,
                min: MIN_FRAME_SIZE,
            });
        }

        if data[0..2] != SIGNATURE {
            return Err(IntegrityError::BadSignature([data[0], data[1]]));
        }

        if data[2] != INVERTER_ADDRESS {
            return Err(IntegrityError::BadSender(data[2]));
        }

        if data[3] != APP_ADDRESS {
            return Err(IntegrityError::BadReceiver(data[3]));
        }

        if data[4] != expected_command {
            return Err(IntegrityError::UnexpectedCommand {
                expected: expected_command,
                actual: data[4],
            });
        }

        if data[5] != 0 {
            return Err(IntegrityError::NonZeroReserved(data[5]));
        }

        let expected = checksum(&data[..len - 2]);
        if data[len - 2] != expected {
            return Err(IntegrityError::ChecksumMismatch {
                expected,
                actual: data[len - 2],
            });
        }

        if data[len - 1] != FOOTER {
            return Err(IntegrityError::BadFooter(data[len - 1]));
        }

        Ok(())
    }
}

/// Maps a sent command to the response codes it produces, in order.
///
/// Commands without an entry answer with exactly one frame carrying their
/// own code.
#[derive(Debug, Clone)]
pub struct ResponseCorrelation {
    map: HashMap<u8, Vec<u8>>,
}

impl ResponseCorrelation {
    /// A correlation where every command answers with itself.
    pub fn identity() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Overrides the response codes of `command`.
    pub fn with(mut self, command: u8, responses: impl Into<Vec<u8>>) -> Self {
        self.map.insert(command, responses.into());
        self
    }

    /// Response codes expected for `command`.
    pub fn expected(&self, command: u8) -> Vec<u8> {
        self.map
            .get(&command)
            .cloned()
            .unwrap_or_else(|| vec![command])
    }
}

impl Default for ResponseCorrelation {
    fn default() -> Self {
        Self::identity()
            .with(0x95, vec![0x95, 0x9D])
            .with(0x64, Vec::new())
            .with(0x66, Vec::new())
    }
}

/// Validates a full set of response frames for `command`.
///
/// Fails on the first violation; there is no partial success.
pub fn validate_responses(
    frames: &[Frame],
    command: u8,
    correlation: &ResponseCorrelation,
) -> Result<(), IntegrityError> {
    let expected = correlation.expected(command);
    if frames.len() != expected.len() {
        return Err(IntegrityError::ResponseCount {
            expected: expected.len(),
            actual: frames.len(),
        });
    }

    for (frame, &code) in frames.iter().zip(expected.iter()) {
        frame.check(code).map_err(|e| {
            tracing::debug!("Response to {:#04x} failed integrity check: {}", command, e);
            e
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn as_response(request: &Frame) -> Frame {
        let mut bytes = request.as_bytes().to_vec();
        bytes.swap(2, 3);
        Frame::from_bytes(bytes)
    }

    #[test]
    fn test_known_request_bytes() {
        let frame = Frame::request(0x98, &[]).unwrap();
        assert_eq!(
            frame.as_bytes(),
            &[0xfe, 0x55, 0x64, 0x14, 0x98, 0x00, 0x00, 0x4c, 0xae]
        );

        let frame = Frame::request(0x0a, &[]).unwrap();
        assert_eq!(
            frame.as_bytes(),
            &[0xfe, 0x55, 0x64, 0x14, 0x0a, 0x00, 0x00, 0xde, 0xae]
        );
    }

    #[test]
    fn test_checksum_is_running_xor() {
        assert_eq!(checksum(&[]), CHECKSUM_SEED);
        assert_eq!(checksum(&[0x0F]), 0x00);
        assert_eq!(checksum(&[0x01, 0x02]), 0x0F ^ 0x01 ^ 0x02);
    }

    #[test]
    fn test_payload_accessor() {
        let frame = Frame::response(0x0a, &[1, 2, 3]).unwrap();
        assert_eq!(frame.payload(), &[1, 2, 3]);
        assert_eq!(frame.command(), Some(0x0a));
        assert_eq!(frame.len(), 12);
    }

    #[test]
    fn test_frame_too_large() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let result = Frame::request(0x66, &payload);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_truncated_frame() {
        let frame = Frame::from_bytes(vec![0xfe, 0x55, 0x14, 0x64, 0x0a, 0x00, 0x00]);
        assert!(matches!(
            frame.check(0x0a),
            Err(IntegrityError::TooShort { len: 7, .. })
        ));
    }

    #[test]
    fn test_request_is_not_a_valid_response() {
        let frame = Frame::request(0x0a, &[]).unwrap();
        assert!(matches!(
            frame.check(0x0a),
            Err(IntegrityError::BadSender(APP_ADDRESS))
        ));
    }

    #[test]
    fn test_bad_footer() {
        let mut bytes = Frame::response(0x0b, &[9, 9]).unwrap().as_bytes().to_vec();
        let last = bytes.len() - 1;
        bytes[last] = 0x00;
        let frame = Frame::from_bytes(bytes);
        assert!(matches!(frame.check(0x0b), Err(IntegrityError::BadFooter(0))));
    }

    #[test]
    fn test_nonzero_reserved_byte() {
        let mut bytes = Frame::response(0x0b, &[]).unwrap().as_bytes().to_vec();
        bytes[5] = 0x01;
        let frame = Frame::from_bytes(bytes);
        assert!(matches!(
            frame.check(0x0b),
            Err(IntegrityError::NonZeroReserved(1))
        ));
    }

    #[test]
    fn test_validate_two_frame_response() {
        let correlation = ResponseCorrelation::default();
        let frames = vec![
            Frame::response(0x95, &[1]).unwrap(),
            Frame::response(0x9d, &[2]).unwrap(),
        ];
        assert!(validate_responses(&frames, 0x95, &correlation).is_ok());

        // Wrong order
        let swapped = vec![frames[1].clone(), frames[0].clone()];
        assert!(validate_responses(&swapped, 0x95, &correlation).is_err());

        // Missing second frame
        assert!(matches!(
            validate_responses(&frames[..1], 0x95, &correlation),
            Err(IntegrityError::ResponseCount {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_write_commands_expect_no_response() {
        let correlation = ResponseCorrelation::default();
        assert!(correlation.expected(0x64).is_empty());
        assert!(correlation.expected(0x66).is_empty());
        assert!(validate_responses(&[], 0x66, &correlation).is_ok());
        assert_eq!(correlation.expected(0x0c), vec![0x0c]);
    }

    #[test]
    fn test_decode_splits_frames() {
        let first = Frame::response(0x95, &[1, 2, 3]).unwrap();
        let second = Frame::response(0x9d, &[4]).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(first.as_bytes());
        buf.extend_from_slice(&second.as_bytes()[..5]);

        assert_eq!(Frame::decode(&mut buf), Some(first));
        assert_eq!(Frame::decode(&mut buf), None);

        buf.extend_from_slice(&second.as_bytes()[5..]);
        assert_eq!(Frame::decode(&mut buf), Some(second));
        assert!(buf.is_empty());
    }

    proptest! {
        #[test]
        fn prop_request_validates_as_response(
            command in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD_SIZE),
        ) {
            let request = Frame::request(command, &payload).unwrap();
            let correlation = ResponseCorrelation::identity();
            prop_assert!(validate_responses(&[as_response(&request)], command, &correlation).is_ok());
        }

        #[test]
        fn prop_corrupted_checksum_fails(
            command in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..64),
            flip in 1u8..=255,
        ) {
            let response = Frame::response(command, &payload).unwrap();
            let mut bytes = response.as_bytes().to_vec();
            let idx = bytes.len() - 2;
            bytes[idx] ^= flip;
            let correlation = ResponseCorrelation::identity();
            prop_assert!(validate_responses(&[Frame::from_bytes(bytes)], command, &correlation).is_err());
        }

        #[test]
        fn prop_truncated_frame_fails(
            command in any::<u8>(),
            cut in 0usize..MIN_FRAME_SIZE,
        ) {
            let response = Frame::response(command, &[]).unwrap();
            let truncated = Frame::from_bytes(response.as_bytes()[..cut].to_vec());
            let correlation = ResponseCorrelation::identity();
            prop_assert!(validate_responses(&[truncated], command, &correlation).is_err());
        }

        #[test]
        fn prop_unrelated_command_fails(
            command in any::<u8>(),
            other in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..16),
        ) {
            prop_assume!(command != other);
            let response = Frame::response(command, &payload).unwrap();
            let mut bytes = response.as_bytes().to_vec();
            bytes[4] = other;
            let correlation = ResponseCorrelation::identity();
            prop_assert!(validate_responses(&[Frame::from_bytes(bytes)], command, &correlation).is_err());
        }
    }
}
