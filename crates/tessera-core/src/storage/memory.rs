//! # In-Memory Backend
//!
//! One [`MutationLog`] per row. Appends to different rows never contend;
//! the maps are only write-locked to create a log. Reads snapshot the logs
//! and replay them.
//!
//! A row-delete marker compacts the row's log down to the marker itself.

use super::streaming::{InMemoryStreamingStore, StreamingValueStore};
use super::{ExtendedRow, RowStore};
use crate::extended_data::{ExtendedDataMutation, ExtendedDataMutationKind, ExtendedDataRowId};
use crate::mutation::{Mutation, MutationKind, MutationLog, Timestamped};
use crate::scanner::{FamilyFilter, LogCursor, RowSource};
use crate::{ElementType, TesseraError, Timestamp};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

type Logs<M> = RwLock<BTreeMap<String, Arc<MutationLog<M>>>>;

fn poisoned() -> TesseraError {
    TesseraError::StorageError("in-memory store lock poisoned".to_string())
}

/// Volatile backend over per-row mutation logs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    vertices: Logs<Mutation>,
    edges: Logs<Mutation>,
    extended: Logs<ExtendedDataMutation>,
    metadata: RwLock<BTreeMap<String, Vec<u8>>>,
    streaming: InMemoryStreamingStore,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn logs(&self, element_type: ElementType) -> &Logs<Mutation> {
        match element_type {
            ElementType::Vertex => &self.vertices,
            ElementType::Edge => &self.edges,
        }
    }

    /// Number of rows (live or deleted) of `element_type`.
    pub fn row_count(&self, element_type: ElementType) -> Result<usize, TesseraError> {
        Ok(self.logs(element_type).read().map_err(|_| poisoned())?.len())
    }
}

fn last_in<M: Timestamped + Clone>(
    logs: &Logs<M>,
    row: &str,
) -> Result<Option<Timestamp>, TesseraError> {
    let log = logs.read().map_err(|_| poisoned())?.get(row).cloned();
    match log {
        Some(log) => log.last_timestamp(),
        None => Ok(None),
    }
}

fn log_for<M: Timestamped + Clone>(
    logs: &Logs<M>,
    row: &str,
) -> Result<Arc<MutationLog<M>>, TesseraError> {
    if let Some(log) = logs.read().map_err(|_| poisoned())?.get(row) {
        return Ok(Arc::clone(log));
    }
    let mut guard = logs.write().map_err(|_| poisoned())?;
    Ok(Arc::clone(
        guard
            .entry(row.to_string())
            .or_insert_with(|| Arc::new(MutationLog::new(row))),
    ))
}

/// Append, then compact the log to its row-delete marker if the batch
/// carried one.
fn append_to<M: Timestamped + Clone>(
    logs: &Logs<M>,
    row: &str,
    mutations: &[M],
    is_delete: impl Fn(&M) -> bool,
) -> Result<(), TesseraError> {
    if mutations.is_empty() {
        return Ok(());
    }
    let log = log_for(logs, row)?;
    log.append(mutations.iter().cloned())?;
    if let Some(marker) = mutations.iter().find(|&m| is_delete(m)) {
        log.replace(vec![marker.clone()])?;
        tracing::debug!(row = %row.escape_debug(), "row hard-deleted, log compacted");
    }
    Ok(())
}

impl RowStore for InMemoryStore {
    fn append(
        &self,
        element_type: ElementType,
        id: &str,
        mutations: &[Mutation],
    ) -> Result<(), TesseraError> {
        append_to(self.logs(element_type), id, mutations, |m| {
            matches!(m.kind, MutationKind::DeleteRow)
        })
    }

    fn last_timestamp(
        &self,
        element_type: ElementType,
        id: &str,
    ) -> Result<Option<Timestamp>, TesseraError> {
        last_in(self.logs(element_type), id)
    }

    fn row_source(
        &self,
        element_type: ElementType,
        families: FamilyFilter,
    ) -> Result<Box<dyn RowSource>, TesseraError> {
        let logs: Vec<(String, Arc<MutationLog>)> = self
            .logs(element_type)
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .map(|(id, log)| (id.clone(), Arc::clone(log)))
            .collect();
        let rows = logs
            .into_iter()
            .map(|(id, log)| Ok((id, log.snapshot()?)))
            .collect::<Result<Vec<_>, TesseraError>>()?;
        Ok(Box::new(LogCursor::new(
            Arc::new(rows),
            element_type,
            families,
        )))
    }

    fn read_row(
        &self,
        element_type: ElementType,
        id: &str,
        families: FamilyFilter,
    ) -> Result<Vec<Mutation>, TesseraError> {
        let log = self
            .logs(element_type)
            .read()
            .map_err(|_| poisoned())?
            .get(id)
            .cloned();
        let Some(log) = log else {
            return Ok(Vec::new());
        };
        let rows = Arc::new(vec![(id.to_string(), log.snapshot()?)]);
        let mut cursor = LogCursor::new(rows, element_type, families);
        Ok(cursor
            .next_row()
            .transpose()?
            .map(|row| row.mutations)
            .unwrap_or_default())
    }

    fn append_extended(
        &self,
        id: &ExtendedDataRowId,
        mutations: &[ExtendedDataMutation],
    ) -> Result<(), TesseraError> {
        append_to(&self.extended, &id.row_key(), mutations, |m| {
            matches!(m.kind, ExtendedDataMutationKind::DeleteRow)
        })
    }

    fn last_extended_timestamp(
        &self,
        id: &ExtendedDataRowId,
    ) -> Result<Option<Timestamp>, TesseraError> {
        last_in(&self.extended, &id.row_key())
    }

    fn extended_rows(
        &self,
        element_type: ElementType,
        element_id: &str,
        table_name: Option<&str>,
    ) -> Result<Vec<ExtendedRow>, TesseraError> {
        let prefix = match table_name {
            Some(table) => ExtendedDataRowId::table_prefix(element_type, element_id, table),
            None => ExtendedDataRowId::element_prefix(element_type, element_id),
        };
        let logs: Vec<(String, Arc<MutationLog<ExtendedDataMutation>>)> = self
            .extended
            .read()
            .map_err(|_| poisoned())?
            .range(prefix.clone()..)
            .take_while(|(row, _)| row.starts_with(&prefix))
            .map(|(row, log)| (row.clone(), Arc::clone(log)))
            .collect();
        logs.into_iter()
            .map(|(row, log)| {
                Ok((
                    ExtendedDataRowId::parse(&row)?,
                    log.snapshot()?.as_ref().clone(),
                ))
            })
            .collect()
    }

    fn metadata_entries(&self) -> Result<BTreeMap<String, Vec<u8>>, TesseraError> {
        Ok(self.metadata.read().map_err(|_| poisoned())?.clone())
    }

    fn put_metadata(&self, key: &str, value: &[u8]) -> Result<(), TesseraError> {
        self.metadata
            .write()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn streaming_values(&self) -> &dyn StreamingValueStore {
        &self.streaming
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::column_families_to_fetch;
    use crate::visibility::Visibility;
    use crate::{FetchHints, Value};

    fn add(ts: i64, value: i64) -> Mutation {
        Mutation::add_property(ts, "k1", "age", Value::Integer(value), Visibility::empty())
    }

    #[test]
    fn out_of_order_append_is_rejected() {
        let store = InMemoryStore::new();
        store
            .append(ElementType::Vertex, "v1", &[add(10, 1)])
            .expect("append");
        assert!(matches!(
            store.append(ElementType::Vertex, "v1", &[add(5, 2)]),
            Err(TesseraError::InvalidMutationOrdering { last: 10, attempted: 5, .. })
        ));
        // other rows are independent
        store
            .append(ElementType::Vertex, "v2", &[add(5, 2)])
            .expect("append");
    }

    #[test]
    fn hard_delete_compacts_the_log() {
        let store = InMemoryStore::new();
        store
            .append(
                ElementType::Vertex,
                "v1",
                &[add(1, 1), Mutation::new(2, MutationKind::DeleteRow)],
            )
            .expect("append");
        let row = store
            .read_row(ElementType::Vertex, "v1", None)
            .expect("read");
        assert_eq!(row, vec![Mutation::new(2, MutationKind::DeleteRow)]);
    }

    #[test]
    fn read_row_prunes_families() {
        let store = InMemoryStore::new();
        store
            .append(
                ElementType::Vertex,
                "v1",
                &[Mutation::alter_visibility(1, Visibility::empty()), add(2, 1)],
            )
            .expect("append");
        let families = column_families_to_fetch(ElementType::Vertex, &FetchHints::none());
        let row = store
            .read_row(ElementType::Vertex, "v1", Some(families))
            .expect("read");
        assert_eq!(row.len(), 1);
        assert!(store
            .read_row(ElementType::Vertex, "missing", None)
            .expect("read")
            .is_empty());
    }

    #[test]
    fn extended_rows_are_grouped_by_table() {
        let store = InMemoryStore::new();
        let set = |ts| {
            ExtendedDataMutation::new(
                ts,
                ExtendedDataMutationKind::SetCell {
                    column: "c".into(),
                    key: String::new(),
                    value: Value::Integer(ts),
                    visibility: Visibility::empty(),
                },
            )
        };
        for (table, row) in [("t1", "r1"), ("t1", "r2"), ("t2", "r1")] {
            let id = ExtendedDataRowId::new(ElementType::Vertex, "v1", table, row);
            store.append_extended(&id, &[set(1)]).expect("append");
        }
        let other = ExtendedDataRowId::new(ElementType::Vertex, "v10", "t1", "r1");
        store.append_extended(&other, &[set(1)]).expect("append");

        let t1 = store
            .extended_rows(ElementType::Vertex, "v1", Some("t1"))
            .expect("rows");
        assert_eq!(
            t1.iter().map(|(id, _)| id.row_id.as_str()).collect::<Vec<_>>(),
            vec!["r1", "r2"]
        );
        let all = store
            .extended_rows(ElementType::Vertex, "v1", None)
            .expect("rows");
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn metadata_round_trips() {
        let store = InMemoryStore::new();
        store.put_metadata("k", b"v").expect("put");
        assert_eq!(
            store.metadata_entries().expect("entries").get("k"),
            Some(&b"v".to_vec())
        );
    }
}
