//! Client error types.

use crate::config::ConfigError;
use sermatec_protocol::{ErrorKind, ProtocolError, SchemaError, WriteError};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,

    #[error("connection to {addr} timed out")]
    ConnectTimeout { addr: String },

    #[error("command {command:#04x} failed after {attempts} attempts")]
    CommunicationFailed { command: u8, attempts: u32 },

    #[error("connection reset by inverter")]
    ConnectionReset,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("malformed PCU version: {0}")]
    PcuVersionMalformed(String),

    #[error("response has no field '{0}'")]
    MissingField(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<SchemaError> for ClientError {
    fn from(e: SchemaError) -> Self {
        ClientError::Protocol(e.into())
    }
}

impl From<WriteError> for ClientError {
    fn from(e: WriteError) -> Self {
        ClientError::Protocol(e.into())
    }
}

impl ClientError {
    /// Returns whether retrying (after reconnecting if needed) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectTimeout { .. }
                | ClientError::CommunicationFailed { .. }
                | ClientError::ConnectionReset
                | ClientError::Io(_)
        )
    }

    /// Returns the taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::NotConnected
            | ClientError::ConnectTimeout { .. }
            | ClientError::CommunicationFailed { .. }
            | ClientError::ConnectionReset
            | ClientError::Io(_) => ErrorKind::Connectivity,
            ClientError::Protocol(e) => e.kind(),
            ClientError::PcuVersionMalformed(_) | ClientError::MissingField(_) => {
                ErrorKind::Integrity
            }
            ClientError::Config(_) => ErrorKind::Schema,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(ClientError::ConnectionReset.kind(), ErrorKind::Connectivity);
        assert_eq!(
            ClientError::from(WriteError::ParameterNotFound("x".into())).kind(),
            ErrorKind::Write
        );
        assert_eq!(
            ClientError::from(SchemaError::UnknownCommandName("x".into())).kind(),
            ErrorKind::Schema
        );
    }

    #[test]
    fn test_retryable() {
        assert!(ClientError::CommunicationFailed {
            command: 0x0a,
            attempts: 5
        }
        .is_retryable());
        assert!(!ClientError::NotConnected.is_retryable());
        assert!(!ClientError::from(WriteError::InverterIsNotOff("soc".into())).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ClientError::CommunicationFailed {
            command: 0x0a,
            attempts: 5,
        };
        assert_eq!(err.to_string(), "command 0x0a failed after 5 attempts");
    }
}
