//! # Core Type Definitions
//!
//! This module contains the identifiers, typed values and the error type
//! shared by every other module of the kernel:
//! - Element identifiers (`ElementType`, `ElementId`, `Direction`)
//! - Typed property values (`Value`, `StreamingValue`, `StreamingValueRef`)
//! - Error types (`TesseraError`)
//!
//! ## Ordering Guarantees
//!
//! Identifier types implement `Ord` so they can key `BTreeMap`/`BTreeSet`
//! collections; every fold in the kernel iterates in a deterministic order.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Milliseconds since the Unix epoch. Every mutation carries one.
pub type Timestamp = i64;

/// Opaque payload attached to soft-delete, hide/show and visibility mutations.
///
/// The kernel never interprets it; it is carried into historical events.
pub type EventData = Option<Vec<u8>>;

// =============================================================================
// ELEMENT IDENTIFIERS
// =============================================================================

/// The two kinds of graph element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Vertex,
    Edge,
}

impl ElementType {
    /// Single-character tag used in physical keys and metadata entries.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Vertex => "V",
            Self::Edge => "E",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => f.write_str("vertex"),
            Self::Edge => f.write_str("edge"),
        }
    }
}

/// Edge direction relative to a vertex.
///
/// Edge references stored on a vertex are always `Out` or `In`; `Both` is
/// only meaningful in queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    Out,
    In,
    Both,
}

impl Direction {
    /// Whether a stored reference direction satisfies this query direction.
    #[must_use]
    pub fn matches(self, stored: Direction) -> bool {
        self == Direction::Both || self == stored
    }

    /// The direction seen from the other endpoint.
    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Self::Out => Self::In,
            Self::In => Self::Out,
            Self::Both => Self::Both,
        }
    }
}

/// Fully-qualified element identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementId {
    pub element_type: ElementType,
    pub id: String,
}

impl ElementId {
    #[must_use]
    pub fn vertex(id: impl Into<String>) -> Self {
        Self {
            element_type: ElementType::Vertex,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn edge(id: impl Into<String>) -> Self {
        Self {
            element_type: ElementType::Edge,
            id: id.into(),
        }
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.element_type, self.id)
    }
}

// =============================================================================
// VALUES
// =============================================================================

/// A large value supplied by the caller, stored out-of-line on commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingValue {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

impl StreamingValue {
    #[must_use]
    pub fn new(data: Vec<u8>, content_type: Option<String>) -> Self {
        Self { data, content_type }
    }
}

/// Reference to a value held by a [`crate::storage::StreamingValueStore`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamingValueRef {
    /// Content address (BLAKE3 hex digest) inside the store.
    pub store_key: String,
    pub length: u64,
    pub content_type: Option<String>,
}

/// A typed property, metadata or extended-data value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(Timestamp),
    Streaming(StreamingValue),
    StreamingRef(StreamingValueRef),
}

impl Value {
    /// Convenience constructor for text values.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) | Self::Timestamp(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Tessera kernel.
///
/// - Absence and unreadable visibility are NOT errors: reads return `Ok(None)`
///   so that "does not exist" and "exists but hidden" are indistinguishable
/// - `MissingFetchHint` is a programming error and is always surfaced
/// - `CorruptElement` is fatal for one row, never for a whole scan
#[derive(Debug, Error)]
pub enum TesseraError {
    /// A visibility expression could not be parsed.
    #[error("Invalid visibility expression {expression:?}: {reason}")]
    InvalidVisibility { expression: String, reason: String },

    /// The caller touched a facet its fetch hints did not request.
    #[error("Fetch hints do not include {0}")]
    MissingFetchHint(String),

    /// A fetch hints builder was given a contradictory combination.
    #[error("Invalid fetch hints: {0}")]
    InvalidFetchHints(String),

    /// A physical row (or interned name) could not be decoded.
    #[error("Corrupt element {row:?}: {reason}")]
    CorruptElement { row: String, reason: String },

    /// Strict decoding met a column family outside the facet table.
    #[error("Unknown column family {0:?}")]
    UnknownColumnFamily(String),

    /// A write would place a mutation before the element's last mutation.
    #[error("Mutation at {attempted} precedes last mutation at {last} for {element}")]
    InvalidMutationOrdering {
        element: String,
        last: Timestamp,
        attempted: Timestamp,
    },

    /// A mutation is not valid for its target (e.g. edge setup on a vertex).
    #[error("Invalid mutation: {0}")]
    InvalidMutation(String),

    /// A write targeted an element that does not exist for the caller.
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The embedded store reported an error.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// The graph configuration is invalid or does not match the stored graph.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl TesseraError {
    /// Build a `CorruptElement` error for `row`.
    pub fn corrupt(row: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptElement {
            row: row.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
