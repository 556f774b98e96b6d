//! The immutable protocol registry handed to a client.

use crate::converter::{Converter, ConverterRegistry};
use crate::error::{ProtocolError, SchemaError};
use crate::field::{decode_fields, decode_raw_parameter_fields, DecodedFields};
use crate::frame::{Frame, ResponseCorrelation};
use crate::parameter::{ParameterRegistry, ParameterSnapshot, SNAPSHOT_COMMAND};
use crate::schema::ProtocolSchema;
use crate::translation::Translations;
use std::path::Path;
use std::sync::Arc;

/// Everything needed to build, check and interpret frames.
///
/// Built once at startup and shared read-only.
#[derive(Debug)]
pub struct Protocol {
    pub schema: ProtocolSchema,
    pub converters: ConverterRegistry,
    pub parameters: ParameterRegistry,
    pub translations: Translations,
    pub correlation: ResponseCorrelation,
    power_state: Arc<Converter>,
}

impl Protocol {
    /// Assembles a registry from its parts.
    pub fn new(
        schema: ProtocolSchema,
        converters: ConverterRegistry,
        parameters: ParameterRegistry,
        translations: Translations,
        correlation: ResponseCorrelation,
    ) -> Result<Self, SchemaError> {
        let power_state = converters
            .get("powerState")
            .ok_or_else(|| SchemaError::UnknownConverter("powerState".into()))?;

        Ok(Self {
            schema,
            converters,
            parameters,
            translations,
            correlation,
            power_state,
        })
    }

    /// The protocol description and English names shipped with the crate.
    pub fn bundled() -> Result<Self, SchemaError> {
        Self::load(None, None, "en")
    }

    /// Loads the registry, reading the schema and translations from files
    /// when given and falling back to the bundled ones otherwise.
    pub fn load(
        schema_path: Option<&Path>,
        translations_path: Option<&Path>,
        language: &str,
    ) -> Result<Self, SchemaError> {
        let converters = ConverterRegistry::standard()?;
        let schema = match schema_path {
            Some(path) => ProtocolSchema::from_file(path, &converters)?,
            None => ProtocolSchema::bundled(&converters)?,
        };
        let translations = match translations_path {
            Some(path) => Translations::from_file(path)?,
            None => Translations::bundled(language)?,
        };
        let parameters = ParameterRegistry::standard(&converters)?;

        Self::new(
            schema,
            converters,
            parameters,
            translations,
            ResponseCorrelation::default(),
        )
    }

    /// Decodes the validated responses to `command`.
    ///
    /// Each frame is decoded with the definition of its own response code and
    /// the results are merged in frame order.
    pub fn decode(
        &self,
        command: u8,
        version: u32,
        frames: &[Frame],
    ) -> Result<DecodedFields, ProtocolError> {
        let mut decoded = DecodedFields::new();
        for (frame, code) in frames.iter().zip(self.correlation.expected(command)) {
            let def = self.schema.command(code, version)?;
            decoded.extend(decode_fields(
                &def,
                frame.as_bytes(),
                &self.translations,
                false,
            )?);
        }
        Ok(decoded)
    }

    /// Field metadata of every response to `command`, without values.
    pub fn describe(&self, command: u8, version: u32) -> Result<DecodedFields, ProtocolError> {
        let mut decoded = DecodedFields::new();
        for code in self.correlation.expected(command) {
            let def = self.schema.command(code, version)?;
            decoded.extend(decode_fields(&def, &[], &self.translations, true)?);
        }
        Ok(decoded)
    }

    /// Raw write-tagged entries of a running-status response.
    pub fn decode_parameters(
        &self,
        version: u32,
        frame: &Frame,
    ) -> Result<ParameterSnapshot, ProtocolError> {
        let def = self.schema.command(SNAPSHOT_COMMAND, version)?;
        decode_raw_parameter_fields(&def, frame.as_bytes(), &self.power_state)
    }

    /// Metadata of every field the query commands of `version` report.
    fn describe_all(&self, version: u32) -> Result<DecodedFields, ProtocolError> {
        let mut all = DecodedFields::new();
        for command in self.schema.query_commands(version) {
            all.extend(self.describe(command, version)?);
        }
        Ok(all)
    }

    /// Numeric and text readings available for `version`.
    pub fn list_sensors(&self, version: u32) -> Result<DecodedFields, ProtocolError> {
        let mut fields = self.describe_all(version)?;
        fields.retain(|f| !f.binary && !f.list_ignore);
        Ok(fields)
    }

    /// Single-bit readings available for `version`.
    pub fn list_binary_sensors(&self, version: u32) -> Result<DecodedFields, ProtocolError> {
        let mut fields = self.describe_all(version)?;
        fields.retain(|f| f.binary && !f.list_ignore);
        Ok(fields)
    }
}
