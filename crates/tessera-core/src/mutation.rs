//! # Mutation Model
//!
//! The closed set of timestamped mutations every backend stores, the
//! process-wide monotonic clock, and the append-only per-element log of the
//! in-memory backend.
//!
//! A mutation never changes once written. Reads fold the whole sequence of
//! an element's mutations (see [`crate::materializer`]), so "overwrite" is
//! simply a newer mutation on the same [`Column`].

use crate::element::Metadata;
use crate::primitives::{
    CF_ADDITIONAL_VISIBILITY, CF_DELETE_ROW, CF_EDGE_SIGNAL, CF_ELEMENT_TIMESTAMP,
    CF_EXTENDED_DATA, CF_HIDDEN, CF_IN_EDGE, CF_IN_EDGE_HIDDEN, CF_IN_EDGE_SOFT_DELETE,
    CF_OUT_EDGE, CF_OUT_EDGE_HIDDEN, CF_OUT_EDGE_SOFT_DELETE, CF_PROPERTY, CF_PROPERTY_HIDDEN,
    CF_PROPERTY_METADATA, CF_PROPERTY_SOFT_DELETE, CF_SOFT_DELETE, CF_VERTEX_SIGNAL,
    VALUE_SEPARATOR,
};
use crate::visibility::Visibility;
use crate::{Direction, ElementType, EventData, TesseraError, Timestamp, Value};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

// =============================================================================
// MUTATIONS
// =============================================================================

/// Every kind of change an element row can record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MutationKind {
    AddPropertyValue {
        key: String,
        name: String,
        value: Value,
        metadata: Metadata,
        visibility: Visibility,
    },
    /// Physical delete of a property instance and of every older version.
    DeletePropertyValue {
        key: String,
        name: String,
        visibility: Visibility,
    },
    SoftDeletePropertyValue {
        key: String,
        name: String,
        visibility: Visibility,
        data: EventData,
    },
    MarkPropertyHidden {
        key: String,
        name: String,
        property_visibility: Visibility,
        /// Visibility under which the property is hidden.
        visibility: Visibility,
        data: EventData,
    },
    MarkPropertyVisible {
        key: String,
        name: String,
        property_visibility: Visibility,
        visibility: Visibility,
        data: EventData,
    },
    SetPropertyMetadata {
        key: String,
        name: String,
        property_visibility: Visibility,
        metadata_name: String,
        value: Value,
        visibility: Visibility,
    },
    /// Element signal: sets the element's visibility (and creates it).
    AlterVisibility {
        visibility: Visibility,
        data: EventData,
    },
    AlterEdgeLabel {
        label: String,
    },
    EdgeSetup {
        out_vertex_id: String,
        in_vertex_id: String,
    },
    AddAdditionalVisibility {
        visibility: Visibility,
        data: EventData,
    },
    DeleteAdditionalVisibility {
        visibility: Visibility,
        data: EventData,
    },
    SoftDeleteElement {
        data: EventData,
    },
    MarkElementHidden {
        visibility: Visibility,
        data: EventData,
    },
    MarkElementVisible {
        visibility: Visibility,
        data: EventData,
    },
    /// Bumps the element timestamp without any other effect.
    ElementTimestamp,
    AddEdgeRef {
        direction: Direction,
        edge_id: String,
        other_vertex_id: String,
        label: String,
        visibility: Visibility,
    },
    DeleteEdgeRef {
        direction: Direction,
        edge_id: String,
        visibility: Visibility,
    },
    SoftDeleteEdgeRef {
        direction: Direction,
        edge_id: String,
        visibility: Visibility,
        data: EventData,
    },
    MarkEdgeRefHidden {
        direction: Direction,
        edge_id: String,
        edge_visibility: Visibility,
        visibility: Visibility,
        data: EventData,
    },
    MarkEdgeRefVisible {
        direction: Direction,
        edge_id: String,
        edge_visibility: Visibility,
        visibility: Visibility,
        data: EventData,
    },
    AddExtendedDataTable {
        table_name: String,
    },
    /// Hard delete. Irreversible; wins over everything else in the row.
    DeleteRow,
}

/// Discriminant of [`MutationKind`], for log searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MutationTag {
    AddPropertyValue,
    DeletePropertyValue,
    SoftDeletePropertyValue,
    MarkPropertyHidden,
    MarkPropertyVisible,
    SetPropertyMetadata,
    AlterVisibility,
    AlterEdgeLabel,
    EdgeSetup,
    AddAdditionalVisibility,
    DeleteAdditionalVisibility,
    SoftDeleteElement,
    MarkElementHidden,
    MarkElementVisible,
    ElementTimestamp,
    AddEdgeRef,
    DeleteEdgeRef,
    SoftDeleteEdgeRef,
    MarkEdgeRefHidden,
    MarkEdgeRefVisible,
    AddExtendedDataTable,
    DeleteRow,
}

/// Physical column identity of a mutation: (family, qualifier, visibility).
///
/// Two mutations on the same column at the same timestamp occupy the same
/// physical cell; the later arrival overwrites the earlier one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Column {
    pub family: &'static str,
    pub qualifier: String,
    pub visibility: Visibility,
}

impl Column {
    pub(crate) fn new(family: &'static str, qualifier: String, visibility: Visibility) -> Self {
        Self {
            family,
            qualifier,
            visibility,
        }
    }
}

/// Join qualifier parts with the separator character.
pub(crate) fn qualifier(parts: &[&str]) -> String {
    let mut out = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push(VALUE_SEPARATOR);
        }
        out.push_str(part);
    }
    out
}

/// A timestamped mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub timestamp: Timestamp,
    pub kind: MutationKind,
}

impl Mutation {
    #[must_use]
    pub fn new(timestamp: Timestamp, kind: MutationKind) -> Self {
        Self { timestamp, kind }
    }

    #[must_use]
    pub fn add_property(
        timestamp: Timestamp,
        key: impl Into<String>,
        name: impl Into<String>,
        value: Value,
        visibility: Visibility,
    ) -> Self {
        Self::new(
            timestamp,
            MutationKind::AddPropertyValue {
                key: key.into(),
                name: name.into(),
                value,
                metadata: Metadata::new(),
                visibility,
            },
        )
    }

    #[must_use]
    pub fn alter_visibility(timestamp: Timestamp, visibility: Visibility) -> Self {
        Self::new(
            timestamp,
            MutationKind::AlterVisibility {
                visibility,
                data: None,
            },
        )
    }

    #[must_use]
    pub fn tag(&self) -> MutationTag {
        match &self.kind {
            MutationKind::AddPropertyValue { .. } => MutationTag::AddPropertyValue,
            MutationKind::DeletePropertyValue { .. } => MutationTag::DeletePropertyValue,
            MutationKind::SoftDeletePropertyValue { .. } => MutationTag::SoftDeletePropertyValue,
            MutationKind::MarkPropertyHidden { .. } => MutationTag::MarkPropertyHidden,
            MutationKind::MarkPropertyVisible { .. } => MutationTag::MarkPropertyVisible,
            MutationKind::SetPropertyMetadata { .. } => MutationTag::SetPropertyMetadata,
            MutationKind::AlterVisibility { .. } => MutationTag::AlterVisibility,
            MutationKind::AlterEdgeLabel { .. } => MutationTag::AlterEdgeLabel,
            MutationKind::EdgeSetup { .. } => MutationTag::EdgeSetup,
            MutationKind::AddAdditionalVisibility { .. } => MutationTag::AddAdditionalVisibility,
            MutationKind::DeleteAdditionalVisibility { .. } => {
                MutationTag::DeleteAdditionalVisibility
            }
            MutationKind::SoftDeleteElement { .. } => MutationTag::SoftDeleteElement,
            MutationKind::MarkElementHidden { .. } => MutationTag::MarkElementHidden,
            MutationKind::MarkElementVisible { .. } => MutationTag::MarkElementVisible,
            MutationKind::ElementTimestamp => MutationTag::ElementTimestamp,
            MutationKind::AddEdgeRef { .. } => MutationTag::AddEdgeRef,
            MutationKind::DeleteEdgeRef { .. } => MutationTag::DeleteEdgeRef,
            MutationKind::SoftDeleteEdgeRef { .. } => MutationTag::SoftDeleteEdgeRef,
            MutationKind::MarkEdgeRefHidden { .. } => MutationTag::MarkEdgeRefHidden,
            MutationKind::MarkEdgeRefVisible { .. } => MutationTag::MarkEdgeRefVisible,
            MutationKind::AddExtendedDataTable { .. } => MutationTag::AddExtendedDataTable,
            MutationKind::DeleteRow => MutationTag::DeleteRow,
        }
    }

    /// Column tombstones remove same-column versions at or before their
    /// timestamp instead of adding a version.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        matches!(
            self.kind,
            MutationKind::DeletePropertyValue { .. } | MutationKind::DeleteEdgeRef { .. }
        )
    }

    /// The physical column this mutation occupies in a row of `element_type`.
    #[must_use]
    pub fn column(&self, element_type: ElementType) -> Column {
        let empty = Visibility::empty;
        match &self.kind {
            MutationKind::AddPropertyValue {
                key,
                name,
                visibility,
                ..
            }
            | MutationKind::DeletePropertyValue {
                key,
                name,
                visibility,
            } => Column::new(CF_PROPERTY, qualifier(&[name.as_str(), key.as_str()]), visibility.clone()),
            MutationKind::SoftDeletePropertyValue {
                key,
                name,
                visibility,
                ..
            } => Column::new(
                CF_PROPERTY_SOFT_DELETE,
                qualifier(&[name.as_str(), key.as_str()]),
                visibility.clone(),
            ),
            MutationKind::MarkPropertyHidden {
                key,
                name,
                property_visibility,
                visibility,
                ..
            }
            | MutationKind::MarkPropertyVisible {
                key,
                name,
                property_visibility,
                visibility,
                ..
            } => Column::new(
                CF_PROPERTY_HIDDEN,
                qualifier(&[name.as_str(), key.as_str(), property_visibility.as_str()]),
                visibility.clone(),
            ),
            MutationKind::SetPropertyMetadata {
                key,
                name,
                property_visibility,
                metadata_name,
                visibility,
                ..
            } => Column::new(
                CF_PROPERTY_METADATA,
                qualifier(&[
                    name.as_str(),
                    key.as_str(),
                    property_visibility.as_str(),
                    metadata_name.as_str(),
                ]),
                visibility.clone(),
            ),
            MutationKind::AlterVisibility { visibility, .. } => {
                let family = match element_type {
                    ElementType::Vertex => CF_VERTEX_SIGNAL,
                    ElementType::Edge => CF_EDGE_SIGNAL,
                };
                Column::new(family, String::new(), visibility.clone())
            }
            MutationKind::AlterEdgeLabel { label } => {
                Column::new(CF_EDGE_SIGNAL, label.clone(), empty())
            }
            MutationKind::EdgeSetup {
                out_vertex_id,
                in_vertex_id,
            } => Column::new(
                CF_OUT_EDGE,
                qualifier(&[out_vertex_id.as_str(), in_vertex_id.as_str()]),
                empty(),
            ),
            MutationKind::AddAdditionalVisibility { visibility, .. }
            | MutationKind::DeleteAdditionalVisibility { visibility, .. } => Column::new(
                CF_ADDITIONAL_VISIBILITY,
                visibility.as_str().to_string(),
                empty(),
            ),
            MutationKind::SoftDeleteElement { .. } => {
                Column::new(CF_SOFT_DELETE, String::new(), empty())
            }
            MutationKind::MarkElementHidden { visibility, .. }
            | MutationKind::MarkElementVisible { visibility, .. } => {
                Column::new(CF_HIDDEN, String::new(), visibility.clone())
            }
            MutationKind::ElementTimestamp => {
                Column::new(CF_ELEMENT_TIMESTAMP, String::new(), empty())
            }
            MutationKind::AddEdgeRef {
                direction,
                edge_id,
                visibility,
                ..
            }
            | MutationKind::DeleteEdgeRef {
                direction,
                edge_id,
                visibility,
            } => Column::new(
                edge_ref_family(*direction),
                edge_id.clone(),
                visibility.clone(),
            ),
            MutationKind::SoftDeleteEdgeRef {
                direction,
                edge_id,
                visibility,
                ..
            } => Column::new(
                match direction {
                    Direction::In => CF_IN_EDGE_SOFT_DELETE,
                    Direction::Out | Direction::Both => CF_OUT_EDGE_SOFT_DELETE,
                },
                edge_id.clone(),
                visibility.clone(),
            ),
            MutationKind::MarkEdgeRefHidden {
                direction,
                edge_id,
                edge_visibility,
                visibility,
                ..
            }
            | MutationKind::MarkEdgeRefVisible {
                direction,
                edge_id,
                edge_visibility,
                visibility,
                ..
            } => Column::new(
                match direction {
                    Direction::In => CF_IN_EDGE_HIDDEN,
                    Direction::Out | Direction::Both => CF_OUT_EDGE_HIDDEN,
                },
                qualifier(&[edge_id.as_str(), edge_visibility.as_str()]),
                visibility.clone(),
            ),
            MutationKind::AddExtendedDataTable { table_name } => {
                Column::new(CF_EXTENDED_DATA, table_name.clone(), empty())
            }
            MutationKind::DeleteRow => Column::new(CF_DELETE_ROW, String::new(), empty()),
        }
    }
}

pub(crate) fn edge_ref_family(direction: Direction) -> &'static str {
    match direction {
        Direction::In => CF_IN_EDGE,
        Direction::Out | Direction::Both => CF_OUT_EDGE,
    }
}

/// Anything stored in a timestamp-ordered log.
pub trait Timestamped {
    fn timestamp(&self) -> Timestamp;
}

impl Timestamped for Mutation {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

// =============================================================================
// MONOTONIC CLOCK
// =============================================================================

/// Thread-safe, strictly increasing millisecond clock.
///
/// If the wall clock is at or behind the last issued value (clock
/// adjustment, or several writes inside one millisecond), the next value is
/// `last + 1`.
#[derive(Debug, Default)]
pub struct IncreasingTime {
    last: AtomicI64,
}

static GLOBAL_CLOCK: IncreasingTime = IncreasingTime::new();

impl IncreasingTime {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
        }
    }

    /// The clock shared by every writer in the process.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL_CLOCK
    }

    /// Issue the next timestamp.
    pub fn now(&self) -> Timestamp {
        self.advance(wall_clock_millis())
    }

    /// Issue a timestamp that is at least `minimum` and greater than every
    /// timestamp issued before.
    pub fn advance(&self, minimum: Timestamp) -> Timestamp {
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let next = minimum.max(last.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }

    /// Record a timestamp written elsewhere so later values exceed it.
    pub fn observe(&self, timestamp: Timestamp) {
        self.last.fetch_max(timestamp, Ordering::AcqRel);
    }

    /// The last issued (or observed) value.
    #[must_use]
    pub fn last(&self) -> Timestamp {
        self.last.load(Ordering::Acquire)
    }
}

fn wall_clock_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

// =============================================================================
// MUTATION LOG
// =============================================================================

/// Append-only, timestamp-ordered log of one element's mutations.
///
/// Appends are serialised by a write lock. Readers take an immutable
/// snapshot (`Arc`) and never block writers for longer than a pointer copy;
/// an append while a snapshot is held copies the log first.
#[derive(Debug)]
pub struct MutationLog<M = Mutation> {
    element: String,
    entries: RwLock<Arc<Vec<M>>>,
}

impl<M: Timestamped + Clone> MutationLog<M> {
    #[must_use]
    pub fn new(element: impl Into<String>) -> Self {
        Self {
            element: element.into(),
            entries: RwLock::new(Arc::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn element(&self) -> &str {
        &self.element
    }

    /// Append `mutations` in order.
    ///
    /// Rejects the whole batch with `InvalidMutationOrdering` if any
    /// mutation is older than the one before it.
    pub fn append(&self, mutations: impl IntoIterator<Item = M>) -> Result<(), TesseraError> {
        let mut guard = self
            .entries
            .write()
            .map_err(|_| TesseraError::StorageError("mutation log lock poisoned".to_string()))?;
        let mut last = guard.last().map(Timestamped::timestamp);
        let batch: Vec<M> = mutations.into_iter().collect();
        for mutation in &batch {
            let attempted = mutation.timestamp();
            if let Some(last) = last.filter(|&last| attempted < last) {
                tracing::warn!(
                    element = %self.element,
                    last,
                    attempted,
                    "rejected out-of-order mutation"
                );
                return Err(TesseraError::InvalidMutationOrdering {
                    element: self.element.clone(),
                    last,
                    attempted,
                });
            }
            last = Some(attempted);
        }
        Arc::make_mut(&mut *guard).extend(batch);
        Ok(())
    }

    /// Immutable view of the log at this instant.
    pub fn snapshot(&self) -> Result<Arc<Vec<M>>, TesseraError> {
        self.entries
            .read()
            .map(|guard| Arc::clone(&*guard))
            .map_err(|_| TesseraError::StorageError("mutation log lock poisoned".to_string()))
    }

    /// Replace the whole log (used to compact a hard-deleted row).
    pub fn replace(&self, mutations: Vec<M>) -> Result<(), TesseraError> {
        let mut guard = self
            .entries
            .write()
            .map_err(|_| TesseraError::StorageError("mutation log lock poisoned".to_string()))?;
        *guard = Arc::new(mutations);
        Ok(())
    }

    pub fn last_timestamp(&self) -> Result<Option<Timestamp>, TesseraError> {
        Ok(self.snapshot()?.last().map(Timestamped::timestamp))
    }

    pub fn len(&self) -> Result<usize, TesseraError> {
        Ok(self.snapshot()?.len())
    }
}

impl MutationLog<Mutation> {
    /// Most recent mutation of kind `tag`, scanning backwards.
    pub fn find_last_mutation(&self, tag: MutationTag) -> Result<Option<Mutation>, TesseraError> {
        Ok(self
            .snapshot()?
            .iter()
            .rev()
            .find(|m| m.tag() == tag)
            .cloned())
    }
}

// =============================================================================
// TESTS
// =============================================================================
