//! # Streaming Value Store
//!
//! Large property values are kept out of element rows. Commit replaces a
//! [`Value::Streaming`](crate::Value::Streaming) by a [`StreamingValueRef`]
//! whose key is the BLAKE3 digest of the content, so identical payloads are
//! stored once and every read can verify what it got back.

use crate::types::{StreamingValue, StreamingValueRef};
use crate::TesseraError;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Content-addressed blobs, keyed by hex digest.
pub(super) const DATA: TableDefinition<&str, &[u8]> = TableDefinition::new("data");

/// Pluggable out-of-line value storage.
pub trait StreamingValueStore: Send + Sync + fmt::Debug {
    /// Store `value` and return the reference to put in its place.
    fn put(&self, value: &StreamingValue) -> Result<StreamingValueRef, TesseraError>;

    /// Load the value behind `reference`. `Ok(None)` if it is unknown.
    fn get(&self, reference: &StreamingValueRef) -> Result<Option<StreamingValue>, TesseraError>;
}

/// BLAKE3 hex digest of `data`.
#[must_use]
pub fn content_key(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

fn reference_for(value: &StreamingValue) -> StreamingValueRef {
    StreamingValueRef {
        store_key: content_key(&value.data),
        length: value.data.len() as u64,
        content_type: value.content_type.clone(),
    }
}

fn verified(
    reference: &StreamingValueRef,
    data: Vec<u8>,
) -> Result<StreamingValue, TesseraError> {
    if content_key(&data) != reference.store_key {
        return Err(TesseraError::corrupt(
            &reference.store_key,
            "streaming value does not match its content key",
        ));
    }
    Ok(StreamingValue::new(data, reference.content_type.clone()))
}

// =============================================================================
// IN-MEMORY
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryStreamingStore {
    values: RwLock<BTreeMap<String, Arc<Vec<u8>>>>,
}

impl InMemoryStreamingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamingValueStore for InMemoryStreamingStore {
    fn put(&self, value: &StreamingValue) -> Result<StreamingValueRef, TesseraError> {
        let reference = reference_for(value);
        self.values
            .write()
            .map_err(|_| TesseraError::StorageError("streaming store lock poisoned".to_string()))?
            .entry(reference.store_key.clone())
            .or_insert_with(|| Arc::new(value.data.clone()));
        Ok(reference)
    }

    fn get(&self, reference: &StreamingValueRef) -> Result<Option<StreamingValue>, TesseraError> {
        let data = self
            .values
            .read()
            .map_err(|_| TesseraError::StorageError("streaming store lock poisoned".to_string()))?
            .get(&reference.store_key)
            .cloned();
        data.map(|data| verified(reference, (*data).clone()))
            .transpose()
    }
}

// =============================================================================
// REDB
// =============================================================================

/// Streaming values in the `data` table of a columnar graph database.
pub struct RedbStreamingStore {
    db: Arc<Database>,
}

impl fmt::Debug for RedbStreamingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedbStreamingStore").finish_non_exhaustive()
    }
}

impl RedbStreamingStore {
    pub(super) fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl StreamingValueStore for RedbStreamingStore {
    fn put(&self, value: &StreamingValue) -> Result<StreamingValueRef, TesseraError> {
        let reference = reference_for(value);
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| TesseraError::StorageError(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(DATA)
                .map_err(|e| TesseraError::StorageError(e.to_string()))?;
            let exists = table
                .get(reference.store_key.as_str())
                .map_err(|e| TesseraError::StorageError(e.to_string()))?
                .is_some();
            if !exists {
                table
                    .insert(reference.store_key.as_str(), value.data.as_slice())
                    .map_err(|e| TesseraError::StorageError(e.to_string()))?;
            }
        }
        write_txn
            .commit()
            .map_err(|e| TesseraError::StorageError(e.to_string()))?;
        tracing::debug!(key = %reference.store_key, length = reference.length, "stored streaming value");
        Ok(reference)
    }

    fn get(&self, reference: &StreamingValueRef) -> Result<Option<StreamingValue>, TesseraError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| TesseraError::StorageError(e.to_string()))?;
        let table = read_txn
            .open_table(DATA)
            .map_err(|e| TesseraError::StorageError(e.to_string()))?;
        let data = table
            .get(reference.store_key.as_str())
            .map_err(|e| TesseraError::StorageError(e.to_string()))?
            .map(|guard| guard.value().to_vec());
        data.map(|data| verified(reference, data)).transpose()
    }
}
