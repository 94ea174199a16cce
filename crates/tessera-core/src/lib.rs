//! # tessera-core
//!
//! Temporal element reconstruction for a versioned, visibility-filtered
//! property graph.
//!
//! Every element is stored as a stream of timestamped, visibility-labelled
//! mutations. A read folds that stream into the element as one requester
//! sees it at one instant, honoring:
//! - the requester's authorizations (cell visibility expressions)
//! - fetch hints selecting which facets to load
//! - soft deletes, hard deletes and hide markers
//! - an optional as-of timestamp and a max-versions bound
//!
//! ## Physical Layouts
//!
//! Two backends share one mutation model and one materializer:
//! - `InMemoryStore`: per-element append-only mutation logs
//! - `ColumnarStore`: sorted wide-column rows in an embedded `redb` file,
//!   with the column-family layout of an Accumulo-style store
//!
//! ## Architectural Constraints
//!
//! - Pure synchronous Rust: NO async, NO network dependencies
//! - Deterministic: folds are pure functions of (mutations, read context)
//! - BTreeMap/BTreeSet only, so iteration order never depends on hashing

// =============================================================================
// MODULES
// =============================================================================

pub mod commit;
pub mod config;
pub mod element;
pub mod encoding;
pub mod extended_data;
pub mod fetch_hints;
pub mod graph;
pub mod history;
pub mod materializer;
pub mod metadata;
pub mod mutation;
pub mod primitives;
pub mod scanner;
pub mod storage;
pub mod types;
pub mod visibility;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Direction, ElementId, ElementType, EventData, StreamingValue, StreamingValueRef, TesseraError,
    Timestamp, Value,
};

// =============================================================================
// RE-EXPORTS: Data Model
// =============================================================================

pub use element::{EdgeInfo, EdgesSummary, Element, ElementKind, Metadata, Property};
pub use extended_data::{
    ExtendedDataCell, ExtendedDataMutation, ExtendedDataMutationKind, ExtendedDataRow,
    ExtendedDataRowId,
};
pub use fetch_hints::{FetchHints, FetchHintsBuilder};
pub use history::{
    HistoricalEvent, HistoricalEventId, HistoricalEventKind, HistoricalEventsFetchHints,
};
pub use mutation::{IncreasingTime, Mutation, MutationKind, MutationLog};
pub use visibility::{Authorizations, Visibility};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use commit::{
    CommitOutcome, EffectSink, ElementMutation, ElementOperation, GraphEffect, MutationTarget,
    TracingEffectSink,
};
pub use config::{BackendKind, GraphConfig};
pub use graph::{Graph, ReadOptions};
pub use materializer::{ReadContext, fold_extended_row, historical_events, materialize};
pub use metadata::{GraphMetadataCache, MetadataSnapshot};
pub use scanner::{
    ElementScanner, RowRange, ScanErrorPolicy, decode_element, encode_element,
};
pub use storage::{ColumnarStore, InMemoryStore, RowStore, StorageBackend};
