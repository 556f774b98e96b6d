//! Versioned command/field schema.
//!
//! The protocol description is a JSON document listing, per PCU version, the
//! commands whose layout changed in that version:
//!
//! ```json
//! {
//!   "versions": [
//!     {
//!       "version": 0,
//!       "queryCommands": ["0x98", "0x0a"],
//!       "commands": [
//!         {
//!           "code": "0x0a",
//!           "comment": "Battery status",
//!           "fields": [
//!             {"name": "Battery voltage", "byteLen": 2, "type": "uInt", "unitValue": 0.1, "unitType": "V"}
//!           ]
//!         }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! A command is looked up in the highest version entry not above the
//! requested version.

use crate::converter::{Converter, ConverterRegistry};
use crate::error::SchemaError;
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Protocol description shipped with the crate.
pub const BUNDLED_SCHEMA: &str = include_str!("../resources/protocol.json");

/// Short names accepted in place of command codes.
pub const COMMAND_NAMES: &[(&str, u8)] = &[
    ("systemInformation", 0x98),
    ("batteryStatus", 0x0a),
    ("gridPVStatus", 0x0b),
    ("runningStatus", 0x0c),
    ("workingParameters", 0x95),
    ("bmsStatus", 0x0d),
    // Same as bmsStatus, kept for older callers.
    ("load", 0x0d),
];

/// Resolves a command short name to its code.
pub fn command_code(name: &str) -> Result<u8, SchemaError> {
    COMMAND_NAMES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, code)| *code)
        .ok_or_else(|| SchemaError::UnknownCommandName(name.to_string()))
}

/// Derives a field tag from its display name.
///
/// Every non-alphanumeric character becomes `_` and the result is lower-cased.
pub fn tag_from_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Unit multiplier with the rounding precision implied by its notation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub multiplier: f64,
    pub decimals: u32,
}

impl Scale {
    pub const UNIT: Scale = Scale {
        multiplier: 1.0,
        decimals: 0,
    };

    /// Parses a multiplier written as e.g. `0.1`, `10` or `"0.01"`.
    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        let text = text.trim();
        let multiplier: f64 = text
            .parse()
            .map_err(|_| SchemaError::malformed(format!("bad unit multiplier '{}'", text)))?;
        if !multiplier.is_finite() || multiplier == 0.0 {
            return Err(SchemaError::malformed(format!(
                "unit multiplier must be finite and non-zero, got '{}'",
                text
            )));
        }
        let decimals = match text.split_once('.') {
            Some((_, frac)) => frac.len() as u32,
            None => 0,
        };
        Ok(Self {
            multiplier,
            decimals,
        })
    }

    pub fn is_unit(&self) -> bool {
        self.multiplier == 1.0 && self.decimals == 0
    }
}

/// How a field's bytes are interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Big-endian integer (`int`, `long`, `uInt`) scaled by a unit multiplier.
    Integer { signed: bool, scale: Scale },
    /// Null-terminated ASCII.
    Text,
    /// Single bit of a big-endian unsigned integer.
    Bit { position: u32 },
    /// Bits `from..end` of a big-endian unsigned integer.
    BitRange { from: u32, end: u32 },
    /// Unsigned integer shown in hexadecimal.
    Hex,
    /// Reserved bytes, never reported.
    Preserve,
}

impl FieldKind {
    pub fn is_bit(&self) -> bool {
        matches!(self, FieldKind::Bit { .. })
    }
}

/// A decoded field layout.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub tag: String,
    pub byte_len: usize,
    pub kind: FieldKind,
    pub unit: Option<String>,
    pub device_class: Option<String>,
    pub converter: Option<Arc<Converter>>,
    /// Key of this field in a parameter snapshot.
    pub write_tag: Option<String>,
    pub repeat: Option<usize>,
    pub same_offset_as_previous: bool,
    pub list_ignore: bool,
}

impl FieldDescriptor {
    /// Bytes consumed by this field, repeats included.
    pub fn span(&self) -> usize {
        self.byte_len * self.repeat.unwrap_or(1)
    }

    /// Whether the field appears in decoded output.
    pub fn is_reported(&self) -> bool {
        self.repeat.is_none() && self.kind != FieldKind::Preserve
    }
}

/// Response layout of one command.
#[derive(Debug, Clone)]
pub struct CommandDefinition {
    pub code: u8,
    pub comment: String,
    pub fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaRaw {
    versions: Vec<VersionRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionRaw {
    version: u32,
    #[serde(default)]
    query_commands: Vec<String>,
    #[serde(default)]
    commands: Vec<CommandRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandRaw {
    code: String,
    #[serde(default)]
    comment: String,
    fields: Vec<FieldRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldRaw {
    name: String,
    byte_len: usize,
    #[serde(rename = "type")]
    kind: String,
    bit_position: Option<u32>,
    from_bit: Option<u32>,
    end_bit: Option<u32>,
    unit_value: Option<serde_json::Value>,
    unit_type: Option<String>,
    device_class: Option<String>,
    converter: Option<String>,
    tag: Option<String>,
    repeat: Option<usize>,
    #[serde(default)]
    same: bool,
    #[serde(default)]
    list_ignore: bool,
}

fn parse_code(text: &str) -> Result<u8, SchemaError> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u8::from_str_radix(digits, 16)
        .map_err(|_| SchemaError::malformed(format!("bad command code '{}'", text)))
}

fn device_class_for_unit(unit: &str) -> Option<&'static str> {
    match unit {
        "V" => Some("VOLTAGE"),
        "W" => Some("POWER"),
        "VA" => Some("APPARENT_POWER"),
        "A" => Some("CURRENT"),
        "var" => Some("REACTIVE_POWER"),
        "°C" => Some("TEMPERATURE"),
        "Hz" => Some("FREQUENCY"),
        "kWh" => Some("ENERGY"),
        "%" => Some("BATTERY"),
        _ => None,
    }
}

impl FieldRaw {
    fn into_descriptor(
        self,
        command: u8,
        converters: &ConverterRegistry,
    ) -> Result<FieldDescriptor, SchemaError> {
        let tag = tag_from_name(&self.name);
        let context = |reason: String| {
            SchemaError::malformed(format!(
                "command {:#04x}, field '{}': {}",
                command, self.name, reason
            ))
        };

        if self.byte_len == 0 {
            return Err(context("byteLen must be at least 1".into()));
        }

        let scale = match &self.unit_value {
            None => Scale::UNIT,
            Some(serde_json::Value::Number(n)) => Scale::parse(&n.to_string())?,
            Some(serde_json::Value::String(s)) => Scale::parse(s)?,
            Some(other) => return Err(context(format!("bad unitValue {}", other))),
        };

        let bits = (self.byte_len * 8) as u32;
        let kind = match self.kind.as_str() {
            "int" | "long" => FieldKind::Integer {
                signed: true,
                scale,
            },
            "uInt" => {
                // Decoded values are i64; a full 8-byte unsigned would wrap
                if self.byte_len >= 8 {
                    return Err(context(format!(
                        "uInt cannot span {} bytes, use 'long' or 'hex'",
                        self.byte_len
                    )));
                }
                FieldKind::Integer {
                    signed: false,
                    scale,
                }
            }
            "string" => FieldKind::Text,
            "bit" => {
                let position = self
                    .bit_position
                    .ok_or_else(|| context("type 'bit' needs 'bitPosition'".into()))?;
                if position >= bits {
                    return Err(context(format!(
                        "bitPosition {} outside {} bits",
                        position, bits
                    )));
                }
                FieldKind::Bit { position }
            }
            "bitRange" => {
                let (from, end) = match (self.from_bit, self.end_bit) {
                    (Some(from), Some(end)) => (from, end),
                    _ => return Err(context("type 'bitRange' needs 'fromBit' and 'endBit'".into())),
                };
                if from >= end || end > bits || end - from >= 64 {
                    return Err(context(format!(
                        "bit range {}..{} invalid for {} bits",
                        from, end, bits
                    )));
                }
                FieldKind::BitRange { from, end }
            }
            "hex" => FieldKind::Hex,
            "preserve" => FieldKind::Preserve,
            other => return Err(context(format!("unsupported field type '{}'", other))),
        };

        let numeric = matches!(
            kind,
            FieldKind::Integer { .. }
                | FieldKind::Bit { .. }
                | FieldKind::BitRange { .. }
                | FieldKind::Hex
        );
        if numeric && self.byte_len > 8 {
            return Err(context(format!(
                "numeric field cannot span {} bytes",
                self.byte_len
            )));
        }

        if self.repeat == Some(0) {
            return Err(context("repeat must be at least 1".into()));
        }

        let converter = match &self.converter {
            Some(name) => Some(
                converters
                    .get(name)
                    .ok_or_else(|| SchemaError::UnknownConverter(name.clone()))?,
            ),
            None => converters.for_field_tag(&tag),
        };

        let device_class = self.device_class.clone().or_else(|| {
            self.unit_type
                .as_deref()
                .and_then(device_class_for_unit)
                .map(str::to_string)
        });

        Ok(FieldDescriptor {
            name: self.name,
            tag,
            byte_len: self.byte_len,
            kind,
            unit: self.unit_type,
            device_class,
            converter,
            write_tag: self.tag,
            repeat: self.repeat,
            same_offset_as_previous: self.same,
            list_ignore: self.list_ignore,
        })
    }
}

/// Versioned set of command definitions.
#[derive(Debug)]
pub struct ProtocolSchema {
    /// Per command code, definitions sorted by version.
    commands: HashMap<u8, Vec<(u32, Arc<CommandDefinition>)>>,
    /// Query commands introduced per version, sorted by version.
    query_commands: Vec<(u32, Vec<u8>)>,
    cache: DashMap<(u8, u32), Arc<CommandDefinition>>,
}

impl ProtocolSchema {
    /// Loads the schema shipped with the crate.
    pub fn bundled(converters: &ConverterRegistry) -> Result<Self, SchemaError> {
        Self::from_json_str(BUNDLED_SCHEMA, converters)
    }

    /// Loads a schema from a JSON file.
    pub fn from_file(
        path: impl AsRef<std::path::Path>,
        converters: &ConverterRegistry,
    ) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content, converters)
    }

    /// Parses and validates a schema.
    pub fn from_json_str(json: &str, converters: &ConverterRegistry) -> Result<Self, SchemaError> {
        let raw: SchemaRaw = serde_json::from_str(json)?;

        let mut commands: HashMap<u8, Vec<(u32, Arc<CommandDefinition>)>> = HashMap::new();
        let mut query_commands = Vec::with_capacity(raw.versions.len());

        for version in raw.versions {
            let queries = version
                .query_commands
                .iter()
                .map(|c| parse_code(c))
                .collect::<Result<Vec<_>, _>>()?;
            query_commands.push((version.version, queries));

            for cmd in version.commands {
                let code = parse_code(&cmd.code)?;
                let fields = cmd
                    .fields
                    .into_iter()
                    .map(|f| f.into_descriptor(code, converters))
                    .collect::<Result<Vec<_>, _>>()?;

                let entries = commands.entry(code).or_default();
                if entries.iter().any(|(v, _)| *v == version.version) {
                    return Err(SchemaError::malformed(format!(
                        "command {:#04x} defined twice in version {}",
                        code, version.version
                    )));
                }
                entries.push((
                    version.version,
                    Arc::new(CommandDefinition {
                        code,
                        comment: cmd.comment,
                        fields,
                    }),
                ));
            }
        }

        for entries in commands.values_mut() {
            entries.sort_by_key(|(v, _)| *v);
        }
        query_commands.sort_by_key(|(v, _)| *v);

        tracing::debug!("Loaded protocol schema with {} commands", commands.len());

        Ok(Self {
            commands,
            query_commands,
            cache: DashMap::new(),
        })
    }

    /// Returns the definition of `code` valid for `version`.
    pub fn command(&self, code: u8, version: u32) -> Result<Arc<CommandDefinition>, SchemaError> {
        if let Some(def) = self.cache.get(&(code, version)) {
            return Ok(def.clone());
        }

        let not_found = || SchemaError::CommandNotFound {
            command: code,
            version,
        };
        let entries = self.commands.get(&code).ok_or_else(not_found)?;
        let idx = entries.partition_point(|(v, _)| *v <= version);
        if idx == 0 {
            return Err(not_found());
        }

        let def = entries[idx - 1].1.clone();
        self.cache.insert((code, version), def.clone());
        Ok(def)
    }

    /// Query commands available in `version`, sorted by code.
    pub fn query_commands(&self, version: u32) -> Vec<u8> {
        let set: BTreeSet<u8> = self
            .query_commands
            .iter()
            .filter(|(v, _)| *v <= version)
            .flat_map(|(_, codes)| codes.iter().copied())
            .collect();
        set.into_iter().collect()
    }
}
