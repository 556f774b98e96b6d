//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use serde::Serialize;
use sermatec_protocol::parameter::SNAPSHOT_COMMAND;
use sermatec_protocol::schema::command_code;
use sermatec_protocol::{
    DecodedFields, FieldValue, Frame, FriendlyValue, IntegrityError, ParameterDescriptor,
    ParameterKind, ParameterSnapshot, Protocol, ProtocolError, UNKNOWN_VERSION,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Command answering with the PCU version and serial number.
const SYSTEM_INFORMATION: &str = "systemInformation";

/// Field of the system information response holding the serial number.
const SERIAL_NUMBER_TAG: &str = "product_sn";

/// A writable parameter, as presented to a user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterInfo {
    pub tag: String,
    pub name: String,
    /// Decoded field holding the current value.
    pub status_tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<FriendlyValue>,
    pub should_be_off: bool,
}

impl From<&ParameterDescriptor> for ParameterInfo {
    fn from(p: &ParameterDescriptor) -> Self {
        let (min, max) = match p.kind {
            ParameterKind::Number { min, max } => (Some(min), Some(max)),
            _ => (None, None),
        };
        let options = match p.kind {
            ParameterKind::Select => p.converter.list_friendly(),
            _ => Vec::new(),
        };

        Self {
            tag: p.tag.clone(),
            name: p.name.clone(),
            status_tag: p.status_tag.clone(),
            min,
            max,
            options,
            should_be_off: p.should_be_off,
        }
    }
}

/// High-level client for a Sermatec inverter.
pub struct Client {
    conn: Connection,
    protocol: Arc<Protocol>,
    /// PCU version used to pick response layouts; 0 when unknown.
    version: AtomicU32,
}

impl Client {
    /// Creates a new client with the given configuration and protocol.
    pub fn new(config: ConnectionConfig, protocol: Arc<Protocol>) -> Self {
        let correlation = protocol.correlation.clone();
        Self {
            conn: Connection::new(config, correlation),
            protocol,
            version: AtomicU32::new(UNKNOWN_VERSION),
        }
    }

    /// Connects to the inverter.
    ///
    /// With `version` set, that PCU version is used as is. Otherwise it is
    /// queried from the inverter; a failed query falls back to version 0.
    pub async fn connect(&self, version: Option<u32>) -> Result<(), ClientError> {
        self.conn.connect().await?;

        let version = match version {
            Some(v) => v,
            None => {
                self.version.store(UNKNOWN_VERSION, Ordering::SeqCst);
                self.discover_version().await?
            }
        };
        self.version.store(version, Ordering::SeqCst);

        Ok(())
    }

    /// Queries the PCU version; only a reset is fatal.
    async fn discover_version(&self) -> Result<u32, ClientError> {
        match self.get_pcu_version().await {
            Ok(v) => {
                tracing::info!("Inverter reports PCU version {}", v);
                Ok(v)
            }
            Err(ClientError::ConnectionReset) => Err(ClientError::ConnectionReset),
            Err(e) => {
                tracing::warn!(
                    "Could not read PCU version ({}), assuming {}",
                    e,
                    UNKNOWN_VERSION
                );
                Ok(UNKNOWN_VERSION)
            }
        }
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Closes the connection.
    pub async fn disconnect(&self) {
        self.conn.close().await
    }

    /// PCU version in use.
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Queries a command by its short name.
    pub async fn get(&self, name: &str) -> Result<DecodedFields, ClientError> {
        let code = command_code(name)?;
        self.get_custom(code).await
    }

    /// Queries a command by its code.
    pub async fn get_custom(&self, command: u8) -> Result<DecodedFields, ClientError> {
        let version = self.version();
        // Fail before touching the wire when the layout is unknown
        self.protocol.describe(command, version)?;

        let frames = self.conn.send_query(command, &[]).await?;
        Ok(self.protocol.decode(command, version, &frames)?)
    }

    /// Queries a command by its code and returns the validated frames undecoded.
    pub async fn get_custom_raw(&self, command: u8) -> Result<Vec<Frame>, ClientError> {
        self.conn.send_query(command, &[]).await
    }

    /// Reads the raw settings block a parameter write starts from.
    pub async fn get_parameter_snapshot(&self) -> Result<ParameterSnapshot, ClientError> {
        let frames = self.conn.send_query(SNAPSHOT_COMMAND, &[]).await?;
        let frame = frames.first().ok_or_else(|| {
            ProtocolError::from(IntegrityError::ResponseCount {
                expected: 1,
                actual: 0,
            })
        })?;
        Ok(self.protocol.decode_parameters(self.version(), frame)?)
    }

    /// Writes one parameter, starting from `snapshot`.
    ///
    /// The snapshot is updated with the new raw value.
    pub async fn set(
        &self,
        tag: &str,
        value: &FriendlyValue,
        snapshot: &mut ParameterSnapshot,
    ) -> Result<(), ClientError> {
        let write = self.protocol.parameters.prepare_write(tag, value, snapshot)?;
        tracing::debug!("Setting '{}' to {}", tag, value);
        self.conn.send_query(write.command, &write.payload).await?;
        Ok(())
    }

    /// Query commands available for the current version.
    pub fn get_query_commands(&self) -> Vec<u8> {
        self.protocol.schema.query_commands(self.version())
    }

    /// Reads the PCU version from the system information response.
    pub async fn get_pcu_version(&self) -> Result<u32, ClientError> {
        let info = self.get(SYSTEM_INFORMATION).await?;
        let value = info.value("protocol_version_number");
        value
            .and_then(FieldValue::as_i64)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| {
                ClientError::PcuVersionMalformed(
                    value.map_or_else(|| "missing".to_string(), |v| v.to_string()),
                )
            })
    }

    /// Reads the inverter serial number.
    pub async fn get_serial(&self) -> Result<String, ClientError> {
        let info = self.get(SYSTEM_INFORMATION).await?;
        info.value(SERIAL_NUMBER_TAG)
            .and_then(FieldValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClientError::MissingField(SERIAL_NUMBER_TAG.into()))
    }

    // =========================================================================
    // Capability listings
    // =========================================================================

    pub fn list_sensors(&self) -> Result<DecodedFields, ClientError> {
        Ok(self.protocol.list_sensors(self.version())?)
    }

    pub fn list_binary_sensors(&self) -> Result<DecodedFields, ClientError> {
        Ok(self.protocol.list_binary_sensors(self.version())?)
    }

    pub fn list_switches(&self) -> Vec<ParameterInfo> {
        self.protocol.parameters.switches().map(Into::into).collect()
    }

    pub fn list_numbers(&self) -> Vec<ParameterInfo> {
        self.protocol.parameters.numbers().map(Into::into).collect()
    }

    pub fn list_selects(&self) -> Vec<ParameterInfo> {
        self.protocol.parameters.selects().map(Into::into).collect()
    }
}
