//! Protocol error types.
//!
//! Errors are split by kind so callers can tell a corrupted frame from a
//! schema problem or a rejected write:
//!
//! - [`IntegrityError`]: the bytes on the wire do not form the expected frame(s).
//! - [`SchemaError`]: the command/field description cannot serve the request.
//! - [`WriteError`]: a parameter write was refused before anything was sent.

use std::fmt;
use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("write error: {0}")]
    Write(#[from] WriteError),

    #[error("frame too large: {size} byte payload (max {max})")]
    FrameTooLarge { size: usize, max: usize },
}

impl ProtocolError {
    /// Returns the taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Integrity(_) => ErrorKind::Integrity,
            ProtocolError::Schema(_) => ErrorKind::Schema,
            ProtocolError::Write(_) => ErrorKind::Write,
            ProtocolError::FrameTooLarge { .. } => ErrorKind::Write,
        }
    }
}

/// A received frame (or set of frames) failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("frame too short: {len} bytes (min {min})")]
    TooShort { len: usize, min: usize },

    #[error("bad signature: {0:02x?}")]
    BadSignature([u8; 2]),

    #[error("bad sender address: {0:#04x}")]
    BadSender(u8),

    #[error("bad receiver address: {0:#04x}")]
    BadReceiver(u8),

    #[error("unexpected response command: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedCommand { expected: u8, actual: u8 },

    #[error("reserved byte is not zero: {0:#04x}")]
    NonZeroReserved(u8),

    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("bad footer: {0:#04x}")]
    BadFooter(u8),

    #[error("wrong number of response frames: expected {expected}, got {actual}")]
    ResponseCount { expected: usize, actual: usize },

    #[error("field '{tag}' needs bytes {offset}..{end} but the frame has {len}")]
    Truncated {
        tag: String,
        offset: usize,
        end: usize,
        len: usize,
    },
}

/// The protocol description cannot serve a request.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("command {command:#04x} not found in protocol for version {version}")]
    CommandNotFound { command: u8, version: u32 },

    #[error("unknown command name: {0}")]
    UnknownCommandName(String),

    #[error("malformed protocol description: {reason}")]
    Malformed { reason: String },

    #[error("unknown converter '{0}'")]
    UnknownConverter(String),

    #[error("duplicate friendly value '{value}' in converter")]
    DuplicateConverterValue { value: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchemaError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        SchemaError::Malformed {
            reason: reason.into(),
        }
    }
}

/// A parameter write was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("parameter not found: {0}")]
    ParameterNotFound(String),

    #[error("snapshot is missing tagged data: {0}")]
    MissingTaggedData(String),

    #[error("invalid value {value} for parameter '{tag}'")]
    InvalidValue { tag: String, value: String },

    #[error("inverter must be switched off to change '{0}'")]
    InverterIsNotOff(String),

    #[error("command {0:#04x} has no write layout")]
    CommandNotFoundInProtocol(u8),
}

/// Coarse error classification shared with the client crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connectivity,
    Integrity,
    Schema,
    Write,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Connectivity => write!(f, "CONNECTIVITY"),
            ErrorKind::Integrity => write!(f, "INTEGRITY"),
            ErrorKind::Schema => write!(f, "SCHEMA"),
            ErrorKind::Write => write!(f, "WRITE"),
        }
    }
}
