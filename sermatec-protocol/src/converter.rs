//! Raw code ↔ friendly value converters and write-side validators.

use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Raw power-state byte meaning "switched on".
pub const POWER_ON: u8 = 0x55;

/// Raw power-state byte meaning "switched off".
pub const POWER_OFF: u8 = 0xAA;

/// Human-meaningful representation of a raw wire code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FriendlyValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<bool> for FriendlyValue {
    fn from(v: bool) -> Self {
        FriendlyValue::Bool(v)
    }
}

impl From<i64> for FriendlyValue {
    fn from(v: i64) -> Self {
        FriendlyValue::Int(v)
    }
}

impl From<&str> for FriendlyValue {
    fn from(v: &str) -> Self {
        FriendlyValue::Text(v.to_string())
    }
}

impl From<String> for FriendlyValue {
    fn from(v: String) -> Self {
        FriendlyValue::Text(v)
    }
}

impl fmt::Display for FriendlyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FriendlyValue::Bool(v) => write!(f, "{}", v),
            FriendlyValue::Int(v) => write!(f, "{}", v),
            FriendlyValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Bijective table between raw codes and friendly values.
///
/// Lookups that miss the table return the default of the target direction.
#[derive(Debug, Clone)]
pub struct MapConverter {
    entries: Vec<(i64, FriendlyValue)>,
    to_friendly: HashMap<i64, FriendlyValue>,
    from_friendly: HashMap<FriendlyValue, i64>,
    default_raw: i64,
    default_friendly: FriendlyValue,
}

impl MapConverter {
    /// Builds a converter, rejecting tables where two codes share a friendly value.
    pub fn new<I, V>(
        entries: I,
        default_raw: i64,
        default_friendly: impl Into<FriendlyValue>,
    ) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = (i64, V)>,
        V: Into<FriendlyValue>,
    {
        let entries: Vec<(i64, FriendlyValue)> =
            entries.into_iter().map(|(k, v)| (k, v.into())).collect();

        let mut to_friendly = HashMap::with_capacity(entries.len());
        let mut from_friendly = HashMap::with_capacity(entries.len());
        for (raw, friendly) in &entries {
            if from_friendly.insert(friendly.clone(), *raw).is_some() {
                return Err(SchemaError::DuplicateConverterValue {
                    value: friendly.to_string(),
                });
            }
            to_friendly.insert(*raw, friendly.clone());
        }

        Ok(Self {
            entries,
            to_friendly,
            from_friendly,
            default_raw,
            default_friendly: default_friendly.into(),
        })
    }

    pub fn to_friendly(&self, raw: i64) -> FriendlyValue {
        self.to_friendly
            .get(&raw)
            .cloned()
            .unwrap_or_else(|| self.default_friendly.clone())
    }

    pub fn from_friendly(&self, value: &FriendlyValue) -> i64 {
        self.from_friendly
            .get(value)
            .copied()
            .unwrap_or(self.default_raw)
    }

    /// Friendly values in table order.
    pub fn list_friendly(&self) -> Vec<FriendlyValue> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }
}

/// Converter attached to a field or a writable parameter.
#[derive(Debug, Clone)]
pub enum Converter {
    /// Table lookup.
    Map(MapConverter),
    /// Numeric values pass through unchanged.
    Identity,
}

impl Converter {
    pub fn to_friendly(&self, raw: i64) -> FriendlyValue {
        match self {
            Converter::Map(map) => map.to_friendly(raw),
            Converter::Identity => FriendlyValue::Int(raw),
        }
    }

    /// Converts a friendly value back to its raw code.
    ///
    /// Returns `None` only when an identity conversion is handed text that is
    /// not an integer.
    pub fn from_friendly(&self, value: &FriendlyValue) -> Option<i64> {
        match self {
            Converter::Map(map) => Some(map.from_friendly(value)),
            Converter::Identity => match value {
                FriendlyValue::Int(v) => Some(*v),
                FriendlyValue::Bool(v) => Some(*v as i64),
                FriendlyValue::Text(v) => v.trim().parse().ok(),
            },
        }
    }

    pub fn list_friendly(&self) -> Vec<FriendlyValue> {
        match self {
            Converter::Map(map) => map.list_friendly(),
            Converter::Identity => Vec::new(),
        }
    }
}

/// Predicate over a raw integer, checked before a write is assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validator {
    /// Value must be one of the listed codes.
    OneOf(Vec<i64>),
    /// Value must lie in `min..=max`.
    Range { min: i64, max: i64 },
}

impl Validator {
    pub fn validate(&self, raw: i64) -> bool {
        match self {
            Validator::OneOf(allowed) => allowed.contains(&raw),
            Validator::Range { min, max } => (*min..=*max).contains(&raw),
        }
    }
}

/// Named converters known to the protocol description.
#[derive(Debug, Clone)]
pub struct ConverterRegistry {
    named: HashMap<String, Arc<Converter>>,
    by_field_tag: HashMap<String, Arc<Converter>>,
}

impl ConverterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            named: HashMap::new(),
            by_field_tag: HashMap::new(),
        }
    }

    /// Registers a converter under `name`, for use by a field's `converter` key.
    pub fn register(&mut self, name: impl Into<String>, converter: Converter) {
        self.named.insert(name.into(), Arc::new(converter));
    }

    /// Binds the converter registered as `name` to every field carrying `tag`.
    pub fn bind_field_tag(
        &mut self,
        tag: impl Into<String>,
        name: &str,
    ) -> Result<(), SchemaError> {
        let converter = self
            .get(name)
            .ok_or_else(|| SchemaError::UnknownConverter(name.to_string()))?;
        self.by_field_tag.insert(tag.into(), converter);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Converter>> {
        self.named.get(name).cloned()
    }

    pub fn for_field_tag(&self, tag: &str) -> Option<Arc<Converter>> {
        self.by_field_tag.get(tag).cloned()
    }

    /// The converters of the Sermatec residential hybrid inverters.
    pub fn standard() -> Result<Self, SchemaError> {
        let mut registry = Self::new();

        registry.register(
            "batteryStatus",
            Converter::Map(MapConverter::new(
                [
                    (0x0011, "charging"),
                    (0x0022, "discharging"),
                    (0x0033, "stand-by"),
                ],
                0x0000,
                "unknown",
            )?),
        );

        registry.register(
            "operatingMode",
            Converter::Map(MapConverter::new(
                [
                    (0x0001, "General Mode"),
                    (0x0002, "Energy Storage Mode"),
                    (0x0003, "Micro-grid"),
                    (0x0004, "Peak-Valley"),
                    (0x0005, "AC Coupling"),
                ],
                0x0000,
                "unknown",
            )?),
        );

        registry.register(
            "batteryManufacturer",
            Converter::Map(MapConverter::new(
                [
                    (1, "No battery"),
                    (2, "PylonTech High Voltage Battery"),
                    (3, "PylonTech Low Voltage Battery"),
                    (9, "Nelumbo HV Battery"),
                    (12, "Generic High Voltage Battery"),
                    (13, "Generic Low Voltage Battery"),
                    (14, "Dyness High Voltage Battery"),
                    (22, "BYD High Voltage Battery"),
                    (23, "BYD Low Voltage Battery"),
                    (25, "AOBO Battery"),
                    (26, "Soluna 15K Pack HV"),
                    (27, "Soluna 4K LV"),
                    (28, "Soluna 3K LV"),
                    (30, "Pylon Low Voltage Battery 485"),
                ],
                0,
                "unknown",
            )?),
        );

        registry.register(
            "batteryType",
            Converter::Map(MapConverter::new(
                [(1, "Lithium Battery"), (2, "Lead-acid Battery")],
                0,
                "unknown",
            )?),
        );

        registry.register(
            "meterProtocol",
            Converter::Map(MapConverter::new(
                [
                    (1, "Not installed"),
                    (2, "Acrel Three-phase meter"),
                    (3, "Acrel Single-phase meter"),
                    (4, "Three-phase Eastron meter"),
                    (5, "Single-phase Eastron meter"),
                ],
                0,
                "unknown",
            )?),
        );

        registry.register(
            "acStatus",
            Converter::Map(MapConverter::new(
                [(0, "stand-by"), (1, "running"), (2, "fault")],
                0xFF,
                "unknown",
            )?),
        );

        registry.register(
            "acMode",
            Converter::Map(MapConverter::new(
                [(1, "grid-tied"), (2, "off-grid")],
                0,
                "unknown",
            )?),
        );

        registry.register(
            "binary",
            Converter::Map(MapConverter::new([(0, false), (1, true)], 0, false)?),
        );

        registry.register(
            "binaryInverted",
            Converter::Map(MapConverter::new([(0, true), (1, false)], 1, false)?),
        );

        registry.register(
            "model",
            Converter::Map(MapConverter::new(
                [
                    (0x0001, "10 kW"),
                    (0x0002, "5 kW"),
                    (0x0003, "6 kW"),
                    (0x0005, "3 kW"),
                ],
                0,
                "unknown",
            )?),
        );

        registry.register(
            "eeBool",
            Converter::Map(MapConverter::new(
                [(0xEE00, true), (0x00EE, false)],
                0x00EE,
                false,
            )?),
        );

        registry.register(
            "powerState",
            Converter::Map(MapConverter::new(
                [(POWER_ON as i64, true), (POWER_OFF as i64, false)],
                POWER_OFF as i64,
                false,
            )?),
        );

        registry.register(
            "batteryComStatus",
            Converter::Map(MapConverter::new(
                [(0x0000, "OK"), (0x0001, "Disconnected")],
                0xFFFF,
                "Unknown",
            )?),
        );
        registry.bind_field_tag("battery_communication_connection_status", "batteryComStatus")?;

        Ok(registry)
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_value_rejected() {
        let result = MapConverter::new([(1, "a"), (2, "a")], 0, "unknown");
        assert!(matches!(
            result,
            Err(SchemaError::DuplicateConverterValue { .. })
        ));
    }

    #[test]
    fn test_map_converter_both_directions() {
        let conv = MapConverter::new([(0x11, "charging"), (0x22, "discharging")], 0, "unknown")
            .unwrap();

        assert_eq!(conv.to_friendly(0x22), FriendlyValue::from("discharging"));
        assert_eq!(conv.to_friendly(0x99), FriendlyValue::from("unknown"));
        assert_eq!(conv.from_friendly(&"charging".into()), 0x11);
        assert_eq!(conv.from_friendly(&"flying".into()), 0);
        assert_eq!(
            conv.list_friendly(),
            vec![
                FriendlyValue::from("charging"),
                FriendlyValue::from("discharging")
            ]
        );
    }

    #[test]
    fn test_identity_converter() {
        let conv = Converter::Identity;
        assert_eq!(conv.to_friendly(42), FriendlyValue::Int(42));
        assert_eq!(conv.from_friendly(&FriendlyValue::Int(7)), Some(7));
        assert_eq!(conv.from_friendly(&"15".into()), Some(15));
        assert_eq!(conv.from_friendly(&"fifteen".into()), None);
        assert!(conv.list_friendly().is_empty());
    }

    #[test]
    fn test_validators() {
        let one_of = Validator::OneOf(vec![1, 2, 5]);
        assert!(one_of.validate(5));
        assert!(!one_of.validate(3));

        let range = Validator::Range { min: 10, max: 100 };
        assert!(range.validate(10));
        assert!(range.validate(100));
        assert!(!range.validate(9));
        assert!(!range.validate(101));
    }

    #[test]
    fn test_standard_registry() {
        let registry = ConverterRegistry::standard().unwrap();

        let power = registry.get("powerState").unwrap();
        assert_eq!(power.from_friendly(&true.into()), Some(POWER_ON as i64));
        assert_eq!(power.from_friendly(&false.into()), Some(POWER_OFF as i64));

        let ee = registry.get("eeBool").unwrap();
        assert_eq!(ee.to_friendly(0xEE00), FriendlyValue::Bool(true));
        assert_eq!(ee.to_friendly(0x00EE), FriendlyValue::Bool(false));

        let inverted = registry.get("binaryInverted").unwrap();
        assert_eq!(inverted.to_friendly(0), FriendlyValue::Bool(true));

        let com = registry
            .for_field_tag("battery_communication_connection_status")
            .unwrap();
        assert_eq!(com.to_friendly(1), FriendlyValue::from("Disconnected"));

        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn test_bind_unknown_converter() {
        let mut registry = ConverterRegistry::new();
        let result = registry.bind_field_tag("x", "missing");
        assert!(matches!(result, Err(SchemaError::UnknownConverter(_))));
    }
}
