//! Pluggable value serialization.
//!
//! The serializer name is recorded in graph metadata when a graph is
//! created and checked on every open, so cells written by one serializer
//! are never read by another.

use crate::{TesseraError, Value};
use std::fmt;

/// Typed value to bytes and back.
pub trait ValueSerializer: Send + Sync + fmt::Debug {
    /// Stable identifier stored in graph metadata.
    fn name(&self) -> &'static str;

    fn serialize(&self, value: &Value) -> Result<Vec<u8>, TesseraError>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, TesseraError>;
}

/// Compact binary encoding with `postcard`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostcardSerializer;

impl PostcardSerializer {
    pub const NAME: &'static str = "postcard";
}

impl ValueSerializer for PostcardSerializer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn serialize(&self, value: &Value) -> Result<Vec<u8>, TesseraError> {
        postcard::to_allocvec(value).map_err(|e| TesseraError::SerializationError(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, TesseraError> {
        postcard::from_bytes(bytes).map_err(|e| TesseraError::SerializationError(e.to_string()))
    }
}
