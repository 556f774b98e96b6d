//! # sermatec-protocol
//!
//! Wire protocol of Sermatec hybrid solar inverters.
//!
//! This crate provides:
//! - Binary framing with XOR checksum validation
//! - A versioned, JSON-described schema of command responses
//! - Field decoding with unit scaling and value converters
//! - Assembly of parameter write payloads from a read snapshot

pub mod codec;
pub mod converter;
pub mod error;
pub mod field;
pub mod frame;
pub mod parameter;
pub mod protocol;
pub mod schema;
pub mod translation;

pub use codec::Decoder;
pub use converter::{Converter, ConverterRegistry, FriendlyValue, MapConverter, Validator};
pub use error::{ErrorKind, IntegrityError, ProtocolError, SchemaError, WriteError};
pub use field::{decode_fields, decode_raw_parameter_fields, DecodedField, DecodedFields, FieldValue};
pub use frame::{validate_responses, Frame, ResponseCorrelation, FRAME_HEADER_SIZE};
pub use parameter::{
    ParameterDescriptor, ParameterKind, ParameterRegistry, ParameterSnapshot, WriteRequest,
    ON_OFF_TAG,
};
pub use protocol::Protocol;
pub use schema::{command_code, CommandDefinition, FieldDescriptor, FieldKind, ProtocolSchema};
pub use translation::Translations;

/// Default TCP port of the inverter's WiFi module.
pub const DEFAULT_PORT: u16 = 8899;

/// PCU version assumed when none is known.
pub const UNKNOWN_VERSION: u32 = 0;
