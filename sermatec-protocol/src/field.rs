//! Field decoding.
//!
//! Fields are read from a response frame in declaration order, starting right
//! after the frame header. All integers are big-endian.

use crate::converter::{Converter, FriendlyValue};
use crate::error::{IntegrityError, ProtocolError};
use crate::frame::{FRAME_HEADER_SIZE, FRAME_TRAILER_SIZE};
use crate::parameter::{ParameterSnapshot, ON_OFF_TAG};
use crate::schema::{CommandDefinition, FieldDescriptor, FieldKind, Scale};
use crate::translation::Translations;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt;

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    /// Integer meant to be shown in hexadecimal.
    Hex(u64),
}

impl FieldValue {
    /// Integer view of the value, used to read version numbers and codes.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Bool(v) => Some(*v as i64),
            FieldValue::Hex(v) => i64::try_from(*v).ok(),
            FieldValue::Text(v) => v.trim().parse().ok(),
            FieldValue::Float(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<FriendlyValue> for FieldValue {
    fn from(v: FriendlyValue) -> Self {
        match v {
            FriendlyValue::Bool(b) => FieldValue::Bool(b),
            FriendlyValue::Int(i) => FieldValue::Int(i),
            FriendlyValue::Text(s) => FieldValue::Text(s),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::Text(v) => write!(f, "{}", v),
            FieldValue::Hex(v) => write!(f, "{:#x}", v),
        }
    }
}

/// One entry of a decoded response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedField {
    #[serde(skip)]
    pub tag: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<FieldValue>,
    pub list_ignore: bool,
    /// Decoded from a single bit.
    #[serde(skip)]
    pub binary: bool,
}

/// Decoded fields keyed by tag, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedFields {
    entries: Vec<DecodedField>,
}

impl DecodedFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a field; a field with the same tag is replaced in place.
    pub fn insert(&mut self, field: DecodedField) {
        match self.entries.iter_mut().find(|f| f.tag == field.tag) {
            Some(existing) => *existing = field,
            None => self.entries.push(field),
        }
    }

    /// Merges `other` into `self`, keeping the order of first appearance.
    pub fn extend(&mut self, other: DecodedFields) {
        for field in other.entries {
            self.insert(field);
        }
    }

    pub fn get(&self, tag: &str) -> Option<&DecodedField> {
        self.entries.iter().find(|f| f.tag == tag)
    }

    /// Value of `tag`, if present and decoded.
    pub fn value(&self, tag: &str) -> Option<&FieldValue> {
        self.get(tag).and_then(|f| f.value.as_ref())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.get(tag).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DecodedField> {
        self.entries.iter()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|f| f.tag.as_str())
    }

    /// Keeps only the fields matching `keep`.
    pub fn retain(&mut self, keep: impl FnMut(&DecodedField) -> bool) {
        self.entries.retain(keep);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for DecodedFields {
    type Item = DecodedField;
    type IntoIter = std::vec::IntoIter<DecodedField>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for DecodedFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for field in &self.entries {
            map.serialize_entry(&field.tag, field)?;
        }
        map.end()
    }
}

/// Bytes of one field, bounded by the end of the payload.
///
/// The checksum and footer are never read as field data.
fn field_bytes<'a>(
    frame: &'a [u8],
    field: &FieldDescriptor,
    offset: usize,
    len: usize,
) -> Result<&'a [u8], IntegrityError> {
    let payload_end = frame.len().saturating_sub(FRAME_TRAILER_SIZE);
    frame[..payload_end]
        .get(offset..offset + len)
        .ok_or_else(|| IntegrityError::Truncated {
            tag: field.tag.clone(),
            offset,
            end: offset + len,
            len: payload_end,
        })
}

/// Big-endian unsigned integer of up to 8 bytes.
pub fn be_unsigned(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

/// Big-endian two's complement integer of up to 8 bytes.
pub fn be_signed(bytes: &[u8]) -> i64 {
    let bits = (bytes.len() * 8) as u32;
    let raw = be_unsigned(bytes);
    if bits == 0 || bits >= 64 {
        return raw as i64;
    }
    let shift = 64 - bits;
    ((raw << shift) as i64) >> shift
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn scaled(raw: i64, scale: Scale) -> FieldValue {
    if scale.is_unit() {
        return FieldValue::Int(raw);
    }
    let value = raw as f64 * scale.multiplier;
    if scale.decimals == 0 {
        FieldValue::Int(value.round() as i64)
    } else {
        FieldValue::Float(round_to(value, scale.decimals))
    }
}

/// Decodes the value of a single field from its bytes.
///
/// Returns `None` for kinds that never produce a value.
pub fn decode_value(field: &FieldDescriptor, bytes: &[u8]) -> Option<FieldValue> {
    // Integer the converter sees, when the kind has one.
    let (value, code) = match &field.kind {
        FieldKind::Integer { signed, scale } => {
            let raw = if *signed {
                be_signed(bytes)
            } else {
                be_unsigned(bytes) as i64
            };
            (scaled(raw, *scale), Some(raw))
        }
        FieldKind::Text => {
            let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
            (
                FieldValue::Text(String::from_utf8_lossy(&bytes[..end]).into_owned()),
                None,
            )
        }
        FieldKind::Bit { position } => {
            let bit = (be_unsigned(bytes) >> position) & 1;
            (FieldValue::Bool(bit == 1), Some(bit as i64))
        }
        FieldKind::BitRange { from, end } => {
            let mask = u64::MAX
                .checked_shr(64u32.saturating_sub(end - from))
                .unwrap_or(0);
            let shifted = be_unsigned(bytes).checked_shr(*from).unwrap_or(0);
            let raw = (shifted & mask) as i64;
            (FieldValue::Int(raw), Some(raw))
        }
        FieldKind::Hex => {
            let raw = be_unsigned(bytes);
            (FieldValue::Hex(raw), i64::try_from(raw).ok())
        }
        FieldKind::Preserve => return None,
    };

    match (&field.converter, code) {
        (Some(converter), Some(code)) => Some(converter.to_friendly(code).into()),
        _ => Some(value),
    }
}

/// Walks the fields of `def`, yielding each with its byte offset.
///
/// The cursor starts after the frame header, returns to the previous field's
/// offset for `same`-flagged fields, and always advances by the full
/// (repeat-multiplied) span.
fn walk(def: &CommandDefinition) -> impl Iterator<Item = (&FieldDescriptor, usize)> {
    let mut cursor = FRAME_HEADER_SIZE;
    let mut previous = FRAME_HEADER_SIZE;
    def.fields.iter().map(move |field| {
        if field.same_offset_as_previous {
            cursor = previous;
        }
        let offset = cursor;
        previous = cursor;
        cursor += field.span();
        (field, offset)
    })
}

/// Decodes a response frame into display-ready fields.
///
/// With `dry_run` set, `frame` is ignored and only metadata is produced; this
/// is how available sensors are listed without a connection.
pub fn decode_fields(
    def: &CommandDefinition,
    frame: &[u8],
    translations: &Translations,
    dry_run: bool,
) -> Result<DecodedFields, ProtocolError> {
    if !dry_run {
        tracing::debug!(
            "Decoding {:#04x} ({}) with {} fields: {:02x?}",
            def.code,
            def.comment,
            def.fields.len(),
            frame.get(FRAME_HEADER_SIZE..).unwrap_or(&[])
        );
    }

    let mut decoded = DecodedFields::new();
    for (field, offset) in walk(def) {
        if !field.is_reported() {
            continue;
        }

        let value = if dry_run {
            None
        } else {
            let bytes = field_bytes(frame, field, offset, field.byte_len)?;
            decode_value(field, bytes)
        };

        decoded.insert(DecodedField {
            tag: field.tag.clone(),
            name: translations.display_name(&field.tag, &field.name),
            unit: field.unit.clone(),
            device_class: field.device_class.clone(),
            value,
            list_ignore: field.list_ignore,
            binary: field.kind.is_bit(),
        });
    }

    Ok(decoded)
}

/// Collects the raw bytes of every write-tagged field of a response.
///
/// No scaling or conversion is applied, except for the power-state bit tagged
/// `onOff`, which is stored as the byte the power command expects.
pub fn decode_raw_parameter_fields(
    def: &CommandDefinition,
    frame: &[u8],
    power_state: &Converter,
) -> Result<ParameterSnapshot, ProtocolError> {
    let mut snapshot = ParameterSnapshot::new();

    for (field, offset) in walk(def) {
        let Some(write_tag) = &field.write_tag else {
            continue;
        };
        let bytes = field_bytes(frame, field, offset, field.span())?;

        if write_tag == ON_OFF_TAG {
            let on = match field.kind {
                FieldKind::Bit { position } => (be_unsigned(bytes) >> position) & 1 == 1,
                _ => be_unsigned(bytes) != 0,
            };
            let raw = power_state
                .from_friendly(&FriendlyValue::Bool(on))
                .unwrap_or_default();
            snapshot.insert(ON_OFF_TAG, vec![raw as u8]);
        } else {
            snapshot.insert(write_tag.clone(), bytes.to_vec());
        }
    }

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::{ConverterRegistry, MapConverter, POWER_OFF, POWER_ON};
    use crate::frame::Frame;
    use crate::schema::tag_from_name;
    use std::sync::Arc;

    fn field(name: &str, byte_len: usize, kind: FieldKind) -> FieldDescriptor {
        FieldDescriptor {
            name: name.to_string(),
            tag: tag_from_name(name),
            byte_len,
            kind,
            unit: None,
            device_class: None,
            converter: None,
            write_tag: None,
            repeat: None,
            same_offset_as_previous: false,
            list_ignore: false,
        }
    }

    fn unsigned(scale: Scale) -> FieldKind {
        FieldKind::Integer {
            signed: false,
            scale,
        }
    }

    fn signed() -> FieldKind {
        FieldKind::Integer {
            signed: true,
            scale: Scale::UNIT,
        }
    }

    fn command(fields: Vec<FieldDescriptor>) -> CommandDefinition {
        CommandDefinition {
            code: 0x0a,
            comment: "test".into(),
            fields,
        }
    }

    fn decode(def: &CommandDefinition, payload: &[u8]) -> DecodedFields {
        let frame = Frame::response(def.code, payload).unwrap();
        decode_fields(def, frame.as_bytes(), &Translations::default(), false).unwrap()
    }

    #[test]
    fn test_unsigned_with_multiplier() {
        let def = command(vec![field("Voltage", 2, unsigned(Scale::parse("0.1").unwrap()))]);
        let out = decode(&def, &[0x00, 0x0a]);
        assert_eq!(out.value("voltage"), Some(&FieldValue::Float(1.0)));
    }

    #[test]
    fn test_rounding_to_multiplier_precision() {
        let def = command(vec![field(
            "Frequency",
            2,
            unsigned(Scale::parse("0.01").unwrap()),
        )]);
        // 5001 * 0.01 = 50.010000000000005 before rounding
        let out = decode(&def, &[0x13, 0x89]);
        assert_eq!(out.value("frequency"), Some(&FieldValue::Float(50.01)));
    }

    #[test]
    fn test_signed_integer() {
        let def = command(vec![field("Current", 2, signed())]);
        let out = decode(&def, &[0xff, 0xf6]);
        assert_eq!(out.value("current"), Some(&FieldValue::Int(-10)));
    }

    #[test]
    fn test_be_signed_widths() {
        assert_eq!(be_signed(&[0x80]), -128);
        assert_eq!(be_signed(&[0x7f, 0xff]), 32767);
        assert_eq!(be_signed(&[0xff, 0xff, 0xff, 0xfe]), -2);
        assert_eq!(be_signed(&[0xff; 8]), -1);
        assert_eq!(be_unsigned(&[0x01, 0x00]), 256);
    }

    #[test]
    fn test_string_truncated_at_nul() {
        let def = command(vec![field("Product SN", 8, FieldKind::Text)]);
        let out = decode(&def, b"AB12\0xyz");
        assert_eq!(out.value("product_sn"), Some(&FieldValue::Text("AB12".into())));
    }

    #[test]
    fn test_bit_and_bit_range() {
        let mut second = field("Second", 1, FieldKind::Bit { position: 1 });
        second.same_offset_as_previous = true;
        let mut range = field("Range", 1, FieldKind::BitRange { from: 2, end: 6 });
        range.same_offset_as_previous = true;

        let def = command(vec![
            field("First", 1, FieldKind::Bit { position: 0 }),
            second,
            range,
            field("Next", 1, unsigned(Scale::UNIT)),
        ]);

        let out = decode(&def, &[0b0011_1101, 0x07]);
        assert_eq!(out.value("first"), Some(&FieldValue::Bool(true)));
        assert_eq!(out.value("second"), Some(&FieldValue::Bool(false)));
        assert_eq!(out.value("range"), Some(&FieldValue::Int(0b1111)));
        assert_eq!(out.value("next"), Some(&FieldValue::Int(7)));
        assert!(out.get("first").unwrap().binary);
        assert!(!out.get("range").unwrap().binary);
    }

    #[test]
    fn test_bit_range_over_single_byte() {
        let f = field("Range", 1, FieldKind::BitRange { from: 2, end: 6 });
        assert_eq!(decode_value(&f, &[0b0011_1100]), Some(FieldValue::Int(15)));

        let bit0 = field("B", 1, FieldKind::Bit { position: 0 });
        let bit1 = field("B", 1, FieldKind::Bit { position: 1 });
        assert_eq!(decode_value(&bit0, &[0x01]), Some(FieldValue::Bool(true)));
        assert_eq!(decode_value(&bit1, &[0x01]), Some(FieldValue::Bool(false)));
    }

    #[test]
    fn test_hex_keeps_integer() {
        let def = command(vec![field("DSP version", 2, FieldKind::Hex)]);
        let out = decode(&def, &[0x01, 0x2c]);
        let value = out.value("dsp_version").unwrap();
        assert_eq!(value, &FieldValue::Hex(0x012c));
        assert_eq!(value.to_string(), "0x12c");
    }

    #[test]
    fn test_preserve_and_repeat_skipped_but_advance_cursor() {
        let mut cells = field("Cells", 2, unsigned(Scale::UNIT));
        cells.repeat = Some(3);

        let def = command(vec![
            field("Reserved", 2, FieldKind::Preserve),
            cells,
            field("After", 1, unsigned(Scale::UNIT)),
        ]);

        let mut payload = vec![0xee, 0xee];
        payload.extend_from_slice(&[0x11; 6]);
        payload.push(0x2a);

        let out = decode(&def, &payload);
        assert_eq!(out.len(), 1);
        assert!(!out.contains("reserved"));
        assert!(!out.contains("cells"));
        assert_eq!(out.value("after"), Some(&FieldValue::Int(42)));
    }

    #[test]
    fn test_converter_applied() {
        let conv = MapConverter::new([(0x11, "charging"), (0x22, "discharging")], 0, "unknown")
            .unwrap();
        let mut state = field("Battery state", 2, unsigned(Scale::UNIT));
        state.converter = Some(Arc::new(Converter::Map(conv)));

        let def = command(vec![state]);
        let out = decode(&def, &[0x00, 0x22]);
        assert_eq!(
            out.value("battery_state"),
            Some(&FieldValue::Text("discharging".into()))
        );
    }

    #[test]
    fn test_truncated_frame_is_integrity_error() {
        let def = command(vec![
            field("A", 2, unsigned(Scale::UNIT)),
            field("B", 2, unsigned(Scale::UNIT)),
        ]);
        let frame = Frame::response(0x0a, &[0x00, 0x01]).unwrap();
        let result = decode_fields(&def, frame.as_bytes(), &Translations::default(), false);
        assert!(matches!(
            result,
            Err(ProtocolError::Integrity(IntegrityError::Truncated { .. }))
        ));
    }

    #[test]
    fn test_checksum_and_footer_never_read_as_data() {
        let def = command(vec![field("A", 1, unsigned(Scale::UNIT))]);
        let frame = Frame::response(0x0a, &[]).unwrap();
        let result = decode_fields(&def, frame.as_bytes(), &Translations::default(), false);
        assert!(matches!(
            result,
            Err(ProtocolError::Integrity(IntegrityError::Truncated { len: 7, .. }))
        ));

        let registry = ConverterRegistry::standard().unwrap();
        let power = registry.get("powerState").unwrap();
        let mut soc = field("Minimum SOC", 2, unsigned(Scale::UNIT));
        soc.write_tag = Some("soc".into());
        let def = command(vec![soc]);
        let frame = Frame::response(0x0c, &[0x00]).unwrap();
        assert!(matches!(
            decode_raw_parameter_fields(&def, frame.as_bytes(), &power),
            Err(ProtocolError::Integrity(IntegrityError::Truncated { .. }))
        ));
    }

    #[test]
    fn test_wide_bit_ranges() {
        let low = field("Low", 8, FieldKind::BitRange { from: 0, end: 63 });
        assert_eq!(decode_value(&low, &[0xff; 8]), Some(FieldValue::Int(i64::MAX)));

        let high = field("High", 8, FieldKind::BitRange { from: 60, end: 64 });
        assert_eq!(
            decode_value(&high, &[0xf0, 0, 0, 0, 0, 0, 0, 0]),
            Some(FieldValue::Int(15))
        );

        // Full width is refused by the schema loader but must not panic here
        let full = field("Full", 8, FieldKind::BitRange { from: 0, end: 64 });
        assert!(decode_value(&full, &[0xff; 8]).is_some());
    }

    #[test]
    fn test_dry_run_produces_metadata_only() {
        let mut volts = field("Battery voltage", 2, unsigned(Scale::UNIT));
        volts.unit = Some("V".into());
        volts.device_class = Some("VOLTAGE".into());
        let mut ignored = field("Internal", 2, unsigned(Scale::UNIT));
        ignored.list_ignore = true;

        let def = command(vec![volts, ignored]);
        let translations =
            Translations::from_yaml_str("battery_voltage: Battery pack voltage\n").unwrap();
        let out = decode_fields(&def, &[], &translations, true).unwrap();

        let v = out.get("battery_voltage").unwrap();
        assert_eq!(v.name, "Battery pack voltage");
        assert_eq!(v.unit.as_deref(), Some("V"));
        assert_eq!(v.device_class.as_deref(), Some("VOLTAGE"));
        assert!(v.value.is_none());
        assert!(out.get("internal").unwrap().list_ignore);
    }

    #[test]
    fn test_serialized_in_declaration_order() {
        let def = command(vec![
            field("Zeta", 1, unsigned(Scale::UNIT)),
            field("Alpha", 1, unsigned(Scale::UNIT)),
        ]);
        let out = decode(&def, &[1, 2]);
        let json = serde_json::to_string(&out).unwrap();
        assert_eq!(
            json,
            r#"{"zeta":{"name":"Zeta","value":1,"listIgnore":false},"alpha":{"name":"Alpha","value":2,"listIgnore":false}}"#
        );
    }

    #[test]
    fn test_raw_parameter_fields() {
        let registry = ConverterRegistry::standard().unwrap();
        let power = registry.get("powerState").unwrap();

        let mut soc = field("Minimum SOC", 2, unsigned(Scale::UNIT));
        soc.write_tag = Some("soc".into());
        let mut on = field("Switched on", 1, FieldKind::Bit { position: 0 });
        on.write_tag = Some(ON_OFF_TAG.into());
        let untagged = field("Other", 1, unsigned(Scale::UNIT));

        let def = command(vec![soc, on, untagged]);

        let frame = Frame::response(0x0c, &[0x00, 0x14, 0x01, 0x09]).unwrap();
        let snapshot = decode_raw_parameter_fields(&def, frame.as_bytes(), &power).unwrap();
        assert_eq!(snapshot.get("soc"), Some(&[0x00, 0x14][..]));
        assert_eq!(snapshot.get(ON_OFF_TAG), Some(&[POWER_ON][..]));
        assert!(snapshot.get("other").is_none());

        let frame = Frame::response(0x0c, &[0x00, 0x14, 0x00, 0x09]).unwrap();
        let snapshot = decode_raw_parameter_fields(&def, frame.as_bytes(), &power).unwrap();
        assert_eq!(snapshot.get(ON_OFF_TAG), Some(&[POWER_OFF][..]));
    }
}
