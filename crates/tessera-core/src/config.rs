//! # Graph Configuration
//!
//! Everything needed to open a [`crate::Graph`]. Deserializes from TOML:
//!
//! ```toml
//! backend = "columnar"
//! path = "graph.redb"
//! default_max_versions = 1
//! strict_decoding = false
//! scan_error_policy = "skip_and_log"
//!
//! [name_substitutions]
//! "http://example.org/name" = "n"
//! ```

use crate::TesseraError;
use crate::encoding::{
    CodecSettings, IdentityNameSubstitution, NameSubstitution, PostcardSerializer,
    TableNameSubstitution,
};
use crate::scanner::ScanErrorPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Which physical layout backs the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    InMemory,
    Columnar,
}

/// Graph settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphConfig {
    pub backend: BackendKind,
    /// Database file. Required by the columnar backend.
    pub path: Option<PathBuf>,
    /// Versions kept per column when a read does not say. `None` keeps all.
    pub default_max_versions: Option<usize>,
    /// Fail on unknown column families instead of skipping them.
    pub strict_decoding: bool,
    pub scan_error_policy: ScanErrorPolicy,
    /// Logical name to physical code.
    pub name_substitutions: BTreeMap<String, String>,
}

impl GraphConfig {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn columnar(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::Columnar,
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, TesseraError> {
        let config: Self =
            toml::from_str(text).map_err(|e| TesseraError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TesseraError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            TesseraError::IoError(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, TesseraError> {
        toml::to_string(self).map_err(|e| TesseraError::ConfigError(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), TesseraError> {
        if self.backend == BackendKind::Columnar && self.path.is_none() {
            return Err(TesseraError::ConfigError(
                "the columnar backend needs a path".to_string(),
            ));
        }
        if self.default_max_versions == Some(0) {
            return Err(TesseraError::ConfigError(
                "default_max_versions must be at least 1".to_string(),
            ));
        }
        self.name_substitution()?;
        Ok(())
    }

    /// Name substitution described by `name_substitutions`.
    pub fn name_substitution(&self) -> Result<Arc<dyn NameSubstitution>, TesseraError> {
        if self.name_substitutions.is_empty() {
            return Ok(Arc::new(IdentityNameSubstitution));
        }
        Ok(Arc::new(TableNameSubstitution::new(
            self.name_substitutions
                .iter()
                .map(|(name, code)| (name.as_str(), code.as_str())),
        )?))
    }

    pub fn codec_settings(&self) -> Result<CodecSettings, TesseraError> {
        Ok(
            CodecSettings::new(Arc::new(PostcardSerializer), self.name_substitution()?)
                .strict(self.strict_decoding),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::SUBSTITUTION_MARKER;

    #[test]
    fn parses_a_full_document() {
        let config = GraphConfig::from_toml_str(
            r#"
            backend = "columnar"
            path = "graph.redb"
            default_max_versions = 2
            strict_decoding = true
            scan_error_policy = "abort"

            [name_substitutions]
            "first_name" = "f"
            "#,
        )
        .expect("config");
        assert_eq!(config.backend, BackendKind::Columnar);
        assert_eq!(config.path.as_deref(), Some(Path::new("graph.redb")));
        assert_eq!(config.default_max_versions, Some(2));
        assert!(config.strict_decoding);
        assert_eq!(config.scan_error_policy, ScanErrorPolicy::Abort);
        let names = config.name_substitution().expect("names");
        assert_eq!(names.deflate("first_name"), format!("{SUBSTITUTION_MARKER}f"));
    }

    #[test]
    fn empty_document_is_in_memory() {
        let config = GraphConfig::from_toml_str("").expect("config");
        assert_eq!(config, GraphConfig::in_memory());
    }

    #[test]
    fn rejects_bad_settings() {
        assert!(matches!(
            GraphConfig::from_toml_str("backend = \"columnar\""),
            Err(TesseraError::ConfigError(_))
        ));
        assert!(matches!(
            GraphConfig::from_toml_str("default_max_versions = 0"),
            Err(TesseraError::ConfigError(_))
        ));
        assert!(matches!(
            GraphConfig::from_toml_str("unknown = 1"),
            Err(TesseraError::ConfigError(_))
        ));
        assert!(matches!(
            GraphConfig::from_toml_str("[name_substitutions]\na = \"x\"\nb = \"x\""),
            Err(TesseraError::ConfigError(_))
        ));
    }

    #[test]
    fn toml_round_trip() {
        let mut config = GraphConfig::columnar("/tmp/g.redb");
        config.name_substitutions.insert("name".into(), "n".into());
        let text = config.to_toml_string().expect("serialize");
        assert_eq!(GraphConfig::from_toml_str(&text).expect("parse"), config);
    }
}
