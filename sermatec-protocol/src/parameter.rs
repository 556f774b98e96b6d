//! Writable parameters and write payload assembly.
//!
//! The inverter has no per-parameter write command. Settings are written as a
//! whole block, so a write starts from the raw bytes last read from the
//! running-status response (a [`ParameterSnapshot`]), replaces one entry and
//! re-sends the complete block.

use crate::converter::{Converter, ConverterRegistry, FriendlyValue, Validator, POWER_OFF};
use crate::error::{SchemaError, WriteError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Tag of the power-state entry in a snapshot.
pub const ON_OFF_TAG: &str = "onOff";

/// Command switching the inverter on or off.
pub const POWER_COMMAND: u8 = 0x64;

/// Command writing the settings block.
pub const SETTINGS_COMMAND: u8 = 0x66;

/// Command whose response carries the current settings block.
pub const SNAPSHOT_COMMAND: u8 = 0x0c;

/// Entries of the settings block, in wire order.
pub const SETTINGS_LAYOUT: &[&str] = &[
    "price1",
    "price2",
    "price3",
    "price4",
    "con",
    "chargePower",
    "operatingMode",
    "gridSwitch",
    "adjustMethod",
    "antiBackflow",
    "batteryCharge",
    "soc",
];

/// Bytes closing the settings block.
const SETTINGS_TRAILER: [u8; 2] = [0x00, 0x00];

/// Raw bytes keyed by write tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParameterSnapshot {
    entries: HashMap<String, Vec<u8>>,
}

impl ParameterSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: impl Into<String>, raw: Vec<u8>) {
        self.entries.insert(tag.into(), raw);
    }

    pub fn get(&self, tag: &str) -> Option<&[u8]> {
        self.entries.get(tag).map(Vec::as_slice)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries
            .iter()
            .map(|(tag, raw)| (tag.as_str(), raw.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn required(&self, tag: &str) -> Result<&[u8], WriteError> {
        self.get(tag)
            .ok_or_else(|| WriteError::MissingTaggedData(tag.to_string()))
    }
}

/// How a parameter is presented to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterKind {
    /// On/off.
    Switch,
    /// Integer within bounds.
    Number { min: i64, max: i64 },
    /// One of the converter's friendly values.
    Select,
}

/// A writable inverter setting.
#[derive(Debug, Clone)]
pub struct ParameterDescriptor {
    /// Key in a [`ParameterSnapshot`].
    pub tag: String,
    pub name: String,
    /// Command the write is sent under.
    pub command: u8,
    pub byte_len: usize,
    pub converter: Arc<Converter>,
    pub validator: Validator,
    pub kind: ParameterKind,
    /// The write is only accepted while the inverter is switched off.
    pub should_be_off: bool,
    /// Tag of the decoded field reporting the current value.
    pub status_tag: String,
}

impl ParameterDescriptor {
    /// Converts and validates a friendly value, returning its wire bytes.
    pub fn encode(&self, value: &FriendlyValue) -> Result<Vec<u8>, WriteError> {
        let invalid = || WriteError::InvalidValue {
            tag: self.tag.clone(),
            value: value.to_string(),
        };

        let raw = self.converter.from_friendly(value).ok_or_else(invalid)?;
        if !self.validator.validate(raw) {
            return Err(invalid());
        }

        let bytes = raw.to_be_bytes();
        let len = self.byte_len.min(bytes.len());
        Ok(bytes[bytes.len() - len..].to_vec())
    }
}

/// An assembled write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub command: u8,
    pub payload: Vec<u8>,
}

/// Writable parameters, in presentation order.
#[derive(Debug, Clone)]
pub struct ParameterRegistry {
    parameters: Vec<ParameterDescriptor>,
}

impl ParameterRegistry {
    pub fn new(parameters: Vec<ParameterDescriptor>) -> Self {
        Self { parameters }
    }

    /// The parameters of the Sermatec residential hybrid inverters.
    pub fn standard(converters: &ConverterRegistry) -> Result<Self, SchemaError> {
        let named = |name: &str| {
            converters
                .get(name)
                .ok_or_else(|| SchemaError::UnknownConverter(name.to_string()))
        };

        Ok(Self::new(vec![
            ParameterDescriptor {
                tag: ON_OFF_TAG.into(),
                name: "Inverter power".into(),
                command: POWER_COMMAND,
                byte_len: 1,
                converter: named("powerState")?,
                validator: Validator::OneOf(vec![0x55, 0xAA]),
                kind: ParameterKind::Switch,
                should_be_off: false,
                status_tag: "inverter_switched_on".into(),
            },
            ParameterDescriptor {
                tag: "antiBackflow".into(),
                name: "Anti-backflow".into(),
                command: SETTINGS_COMMAND,
                byte_len: 2,
                converter: named("binary")?,
                validator: Validator::OneOf(vec![0, 1]),
                kind: ParameterKind::Switch,
                should_be_off: true,
                status_tag: "anti_backflow".into(),
            },
            ParameterDescriptor {
                tag: "batteryCharge".into(),
                name: "Battery charging from grid".into(),
                command: SETTINGS_COMMAND,
                byte_len: 2,
                converter: named("binary")?,
                validator: Validator::OneOf(vec![0, 1]),
                kind: ParameterKind::Switch,
                should_be_off: true,
                status_tag: "battery_charging_from_grid".into(),
            },
            ParameterDescriptor {
                tag: "operatingMode".into(),
                name: "Operating mode".into(),
                command: SETTINGS_COMMAND,
                byte_len: 2,
                converter: named("operatingMode")?,
                validator: Validator::OneOf(vec![1, 2, 3, 4, 5]),
                kind: ParameterKind::Select,
                should_be_off: true,
                status_tag: "operating_mode_setting".into(),
            },
            ParameterDescriptor {
                tag: "soc".into(),
                name: "Minimum SOC".into(),
                command: SETTINGS_COMMAND,
                byte_len: 2,
                converter: Arc::new(Converter::Identity),
                validator: Validator::Range { min: 10, max: 100 },
                kind: ParameterKind::Number { min: 10, max: 100 },
                should_be_off: false,
                status_tag: "minimum_soc_setting".into(),
            },
        ]))
    }

    pub fn get(&self, tag: &str) -> Option<&ParameterDescriptor> {
        self.parameters.iter().find(|p| p.tag == tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterDescriptor> {
        self.parameters.iter()
    }

    pub fn switches(&self) -> impl Iterator<Item = &ParameterDescriptor> {
        self.iter().filter(|p| p.kind == ParameterKind::Switch)
    }

    pub fn numbers(&self) -> impl Iterator<Item = &ParameterDescriptor> {
        self.iter()
            .filter(|p| matches!(p.kind, ParameterKind::Number { .. }))
    }

    pub fn selects(&self) -> impl Iterator<Item = &ParameterDescriptor> {
        self.iter().filter(|p| p.kind == ParameterKind::Select)
    }

    /// Applies `value` to `snapshot` and assembles the resulting write.
    ///
    /// The snapshot is updated even when a later precondition fails, so a
    /// rejected write can be retried once the inverter is switched off.
    pub fn prepare_write(
        &self,
        tag: &str,
        value: &FriendlyValue,
        snapshot: &mut ParameterSnapshot,
    ) -> Result<WriteRequest, WriteError> {
        let param = self
            .get(tag)
            .ok_or_else(|| WriteError::ParameterNotFound(tag.to_string()))?;

        let raw = param.encode(value)?;
        snapshot.insert(param.tag.clone(), raw);

        if param.should_be_off && param.tag != ON_OFF_TAG {
            let state = snapshot.required(ON_OFF_TAG)?;
            if state != [POWER_OFF] {
                return Err(WriteError::InverterIsNotOff(param.tag.clone()));
            }
        }

        let payload = match param.command {
            SETTINGS_COMMAND => {
                let mut payload = Vec::new();
                for entry in SETTINGS_LAYOUT {
                    payload.extend_from_slice(snapshot.required(entry)?);
                }
                payload.extend_from_slice(&SETTINGS_TRAILER);
                payload
            }
            POWER_COMMAND => snapshot.required(ON_OFF_TAG)?.to_vec(),
            other => return Err(WriteError::CommandNotFoundInProtocol(other)),
        };

        tracing::debug!(
            "Prepared write of '{}' under {:#04x}: {:02x?}",
            param.tag,
            param.command,
            payload
        );

        Ok(WriteRequest {
            command: param.command,
            payload,
        })
    }
}
