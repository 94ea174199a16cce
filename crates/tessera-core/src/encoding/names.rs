//! Name substitution (interning) for physical keys.
//!
//! Property names, metadata names and edge labels repeat in every row, so
//! the columnar layout can replace them by short codes. A code is written
//! as [`SUBSTITUTION_MARKER`] followed by the code text; a real name that
//! happens to start with the marker is escaped by doubling it.

use crate::TesseraError;
use crate::primitives::SUBSTITUTION_MARKER;
use std::collections::BTreeMap;
use std::fmt;

/// A lossless, invertible mapping between names and their physical form.
pub trait NameSubstitution: Send + Sync + fmt::Debug {
    /// Physical form of `name`.
    fn deflate(&self, name: &str) -> String;

    /// Logical name of a physical value. Unknown codes are corruption.
    fn inflate(&self, value: &str) -> Result<String, TesseraError>;
}

/// Stores names as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityNameSubstitution;

impl NameSubstitution for IdentityNameSubstitution {
    fn deflate(&self, name: &str) -> String {
        name.to_string()
    }

    fn inflate(&self, value: &str) -> Result<String, TesseraError> {
        Ok(value.to_string())
    }
}

/// Substitutes names found in a fixed table.
#[derive(Debug, Clone, Default)]
pub struct TableNameSubstitution {
    codes: BTreeMap<String, String>,
    names: BTreeMap<String, String>,
}

impl TableNameSubstitution {
    /// Build from `(name, code)` pairs. Both sides must be unique and
    /// non-empty, and codes must not start with the marker.
    pub fn new<I, N, C>(pairs: I) -> Result<Self, TesseraError>
    where
        I: IntoIterator<Item = (N, C)>,
        N: Into<String>,
        C: Into<String>,
    {
        let mut table = Self::default();
        for (name, code) in pairs {
            let (name, code) = (name.into(), code.into());
            if name.is_empty() || code.is_empty() {
                return Err(TesseraError::ConfigError(
                    "name substitution entries must be non-empty".to_string(),
                ));
            }
            if code.starts_with(SUBSTITUTION_MARKER) {
                return Err(TesseraError::ConfigError(format!(
                    "substitution code {code:?} starts with the marker character"
                )));
            }
            if table.names.contains_key(&code) {
                return Err(TesseraError::ConfigError(format!(
                    "substitution code {code:?} is used twice"
                )));
            }
            if table.codes.contains_key(&name) {
                return Err(TesseraError::ConfigError(format!(
                    "name {name:?} is substituted twice"
                )));
            }
            table.codes.insert(name.clone(), code.clone());
            table.names.insert(code, name);
        }
        Ok(table)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl NameSubstitution for TableNameSubstitution {
    fn deflate(&self, name: &str) -> String {
        if let Some(code) = self.codes.get(name) {
            let mut out = String::with_capacity(code.len() + 1);
            out.push(SUBSTITUTION_MARKER);
            out.push_str(code);
            return out;
        }
        if name.starts_with(SUBSTITUTION_MARKER) {
            let mut out = String::with_capacity(name.len() + 1);
            out.push(SUBSTITUTION_MARKER);
            out.push_str(name);
            return out;
        }
        name.to_string()
    }

    fn inflate(&self, value: &str) -> Result<String, TesseraError> {
        let Some(rest) = value.strip_prefix(SUBSTITUTION_MARKER) else {
            return Ok(value.to_string());
        };
        if rest.starts_with(SUBSTITUTION_MARKER) {
            return Ok(rest.to_string());
        }
        self.names.get(rest).cloned().ok_or_else(|| {
            TesseraError::corrupt(value, format!("unknown substitution code {rest:?}"))
        })
    }
}
