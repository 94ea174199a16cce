//! # Storage Backends
//!
//! Two physical layouts behind one [`RowStore`] interface:
//! - `InMemory`: one append-only [`crate::mutation::MutationLog`] per row,
//!   replayed on read
//! - `Columnar`: the sorted wide-column layout persisted in redb, decoded
//!   row by row through [`crate::scanner::RowCursor`]
//!
//! Both hand the same [`Mutation`] model to the materializer, and both prune
//! column families with [`crate::encoding::column_families_to_fetch`] before
//! a row is folded, so reads agree across backends.

pub mod columnar;
pub mod memory;
pub mod streaming;

pub use columnar::ColumnarStore;
pub use memory::InMemoryStore;
pub use streaming::{
    InMemoryStreamingStore, RedbStreamingStore, StreamingValueStore, content_key,
};

use crate::extended_data::{ExtendedDataMutation, ExtendedDataRowId};
use crate::mutation::Mutation;
use crate::scanner::{FamilyFilter, RowRange, RowSource};
use crate::{ElementType, TesseraError, Timestamp};
use std::collections::BTreeMap;
use std::fmt;

/// The mutations of one extended-data row.
pub type ExtendedRow = (ExtendedDataRowId, Vec<ExtendedDataMutation>);

/// Row-level storage contract shared by every backend.
pub trait RowStore: Send + Sync + fmt::Debug {
    /// Append `mutations` to one element row, in order.
    ///
    /// Rejects the whole batch with `InvalidMutationOrdering` if any
    /// mutation is older than the row's last one.
    fn append(
        &self,
        element_type: ElementType,
        id: &str,
        mutations: &[Mutation],
    ) -> Result<(), TesseraError>;

    /// Newest timestamp written to one element row, `None` if never
    /// written.
    fn last_timestamp(
        &self,
        element_type: ElementType,
        id: &str,
    ) -> Result<Option<Timestamp>, TesseraError>;

    /// Row-at-a-time cursor over every row of `element_type`.
    fn row_source(
        &self,
        element_type: ElementType,
        families: FamilyFilter,
    ) -> Result<Box<dyn RowSource>, TesseraError>;

    /// The mutations of one row, pruned to `families`. Empty if absent.
    fn read_row(
        &self,
        element_type: ElementType,
        id: &str,
        families: FamilyFilter,
    ) -> Result<Vec<Mutation>, TesseraError> {
        let mut rows = self.row_source(element_type, families)?;
        rows.seek(&RowRange::exact(id))?;
        Ok(rows
            .next_row()
            .transpose()?
            .map(|row| row.mutations)
            .unwrap_or_default())
    }

    fn append_extended(
        &self,
        id: &ExtendedDataRowId,
        mutations: &[ExtendedDataMutation],
    ) -> Result<(), TesseraError>;

    fn last_extended_timestamp(
        &self,
        id: &ExtendedDataRowId,
    ) -> Result<Option<Timestamp>, TesseraError>;

    /// Extended-data rows of one element, optionally of one table only,
    /// ordered by row key.
    fn extended_rows(
        &self,
        element_type: ElementType,
        element_id: &str,
        table_name: Option<&str>,
    ) -> Result<Vec<ExtendedRow>, TesseraError>;

    /// Every persisted graph metadata entry.
    fn metadata_entries(&self) -> Result<BTreeMap<String, Vec<u8>>, TesseraError>;

    fn put_metadata(&self, key: &str, value: &[u8]) -> Result<(), TesseraError>;

    fn streaming_values(&self) -> &dyn StreamingValueStore;
}

// =============================================================================
// BACKEND SELECTION
// =============================================================================

/// Storage backend of a graph.
#[derive(Debug)]
pub enum StorageBackend {
    /// Mutation logs in memory (fast, volatile).
    InMemory(InMemoryStore),
    /// Wide-column rows in redb (persistent).
    Columnar(ColumnarStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(InMemoryStore::new())
    }
}

// NOTE: StorageBackend does NOT implement Clone.
// ColumnarStore owns a database handle; share the backend behind an Arc.

impl StorageBackend {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InMemory(_) => "in_memory",
            Self::Columnar(_) => "columnar",
        }
    }

    fn store(&self) -> &dyn RowStore {
        match self {
            Self::InMemory(store) => store,
            Self::Columnar(store) => store,
        }
    }
}

impl RowStore for StorageBackend {
    fn append(
        &self,
        element_type: ElementType,
        id: &str,
        mutations: &[Mutation],
    ) -> Result<(), TesseraError> {
        self.store().append(element_type, id, mutations)
    }

    fn last_timestamp(
        &self,
        element_type: ElementType,
        id: &str,
    ) -> Result<Option<Timestamp>, TesseraError> {
        self.store().last_timestamp(element_type, id)
    }

    fn row_source(
        &self,
        element_type: ElementType,
        families: FamilyFilter,
    ) -> Result<Box<dyn RowSource>, TesseraError> {
        self.store().row_source(element_type, families)
    }

    fn read_row(
        &self,
        element_type: ElementType,
        id: &str,
        families: FamilyFilter,
    ) -> Result<Vec<Mutation>, TesseraError> {
        self.store().read_row(element_type, id, families)
    }

    fn append_extended(
        &self,
        id: &ExtendedDataRowId,
        mutations: &[ExtendedDataMutation],
    ) -> Result<(), TesseraError> {
        self.store().append_extended(id, mutations)
    }

    fn last_extended_timestamp(
        &self,
        id: &ExtendedDataRowId,
    ) -> Result<Option<Timestamp>, TesseraError> {
        self.store().last_extended_timestamp(id)
    }

    fn extended_rows(
        &self,
        element_type: ElementType,
        element_id: &str,
        table_name: Option<&str>,
    ) -> Result<Vec<ExtendedRow>, TesseraError> {
        self.store()
            .extended_rows(element_type, element_id, table_name)
    }

    fn metadata_entries(&self) -> Result<BTreeMap<String, Vec<u8>>, TesseraError> {
        self.store().metadata_entries()
    }

    fn put_metadata(&self, key: &str, value: &[u8]) -> Result<(), TesseraError> {
        self.store().put_metadata(key, value)
    }

    fn streaming_values(&self) -> &dyn StreamingValueStore {
        self.store().streaming_values()
    }
}
