//! Tag → display-name tables.

use crate::error::SchemaError;
use std::collections::HashMap;
use std::path::Path;

/// English display names shipped with the crate.
pub const BUNDLED_EN: &str = include_str!("../resources/translations/en.yaml");

/// Display names keyed by field tag.
#[derive(Debug, Clone, Default)]
pub struct Translations {
    names: HashMap<String, String>,
}

impl Translations {
    /// The bundled table for `language`, if one ships with the crate.
    pub fn bundled(language: &str) -> Result<Self, SchemaError> {
        match language {
            "en" => Self::from_yaml_str(BUNDLED_EN),
            other => Err(SchemaError::malformed(format!(
                "no bundled translation for language '{}'",
                other
            ))),
        }
    }

    /// Loads a YAML mapping of `tag: display name`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, SchemaError> {
        let names: HashMap<String, String> = serde_yaml::from_str(yaml)?;
        Ok(Self { names })
    }

    /// Display name of `tag`, or `fallback` when the table has none.
    pub fn display_name(&self, tag: &str, fallback: &str) -> String {
        self.names
            .get(tag)
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_fallback() {
        let t = Translations::from_yaml_str("battery_soc: Battery state of charge\n").unwrap();
        assert_eq!(
            t.display_name("battery_soc", "Battery SOC"),
            "Battery state of charge"
        );
        assert_eq!(t.display_name("pv1_power", "PV1 power"), "PV1 power");
    }

    #[test]
    fn test_bundled_english() {
        let t = Translations::bundled("en").unwrap();
        assert!(!t.is_empty());
        assert!(Translations::bundled("xx").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cs.yaml");
        std::fs::write(&path, "pv1_power: Výkon PV1\n").unwrap();

        let t = Translations::from_file(&path).unwrap();
        assert_eq!(t.display_name("pv1_power", "PV1 power"), "Výkon PV1");
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            Translations::from_yaml_str("- just\n- a list\n"),
            Err(SchemaError::Yaml(_))
        ));
    }
}
