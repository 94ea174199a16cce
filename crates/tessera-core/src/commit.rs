//! # Commit
//!
//! Writes are described by an [`ElementMutation`]: a plain value naming one
//! target element and an ordered list of operations. Committing it turns
//! the operations into per-row [`Mutation`] batches, including the rows
//! the caller never names directly:
//! - both endpoint vertices of an edge (their `EdgeInfo` references)
//! - every incident edge of a deleted, soft-deleted, hidden or shown vertex
//! - the element's extended-data rows
//!
//! Side effects are not pushed to listeners. The commit returns a list of
//! [`GraphEffect`]s and the caller hands them to its [`EffectSink`]s.
//!
//! Every mutation of one commit carries the same timestamp. Every touched
//! row's clock is checked before the first write, so a commit rejected for
//! ordering writes nothing. Rows are then written one after another.

use crate::element::{EdgeInfo, Element, Metadata};
use crate::extended_data::{ExtendedDataMutation, ExtendedDataMutationKind, ExtendedDataRowId};
use crate::materializer::{ReadContext, materialize};
use crate::mutation::{IncreasingTime, Mutation, MutationKind};
use crate::primitives::{
    MAX_ELEMENT_ID_LENGTH, MAX_NAME_LENGTH, SUBSTITUTION_MARKER, VALUE_SEPARATOR,
};
use crate::storage::RowStore;
use crate::visibility::{Authorizations, Visibility};
use crate::{
    Direction, ElementId, ElementType, EventData, FetchHints, TesseraError, Timestamp, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// MUTATION VALUE
// =============================================================================

/// The element a commit writes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationTarget {
    /// Create (or re-signal) a vertex. Hard-deleted ids are rejected.
    NewVertex { id: String, visibility: Visibility },
    /// Create an edge. Endpoints of an existing edge never change, and
    /// hard-deleted ids are rejected.
    NewEdge {
        id: String,
        out_vertex_id: String,
        in_vertex_id: String,
        label: String,
        visibility: Visibility,
    },
    /// An element the caller can currently read.
    Existing {
        element_type: ElementType,
        id: String,
    },
}

impl MutationTarget {
    #[must_use]
    pub fn element_id(&self) -> ElementId {
        match self {
            Self::NewVertex { id, .. } => ElementId::vertex(id.clone()),
            Self::NewEdge { id, .. } => ElementId::edge(id.clone()),
            Self::Existing { element_type, id } => ElementId {
                element_type: *element_type,
                id: id.clone(),
            },
        }
    }
}

/// One requested change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ElementOperation {
    AddPropertyValue {
        key: String,
        name: String,
        value: Value,
        #[serde(default)]
        metadata: Metadata,
        #[serde(default)]
        visibility: Visibility,
    },
    DeletePropertyValue {
        key: String,
        name: String,
        #[serde(default)]
        visibility: Visibility,
    },
    SoftDeletePropertyValue {
        key: String,
        name: String,
        #[serde(default)]
        visibility: Visibility,
        #[serde(default)]
        data: EventData,
    },
    MarkPropertyHidden {
        key: String,
        name: String,
        #[serde(default)]
        property_visibility: Visibility,
        visibility: Visibility,
        #[serde(default)]
        data: EventData,
    },
    MarkPropertyVisible {
        key: String,
        name: String,
        #[serde(default)]
        property_visibility: Visibility,
        visibility: Visibility,
        #[serde(default)]
        data: EventData,
    },
    SetPropertyMetadata {
        key: String,
        name: String,
        #[serde(default)]
        property_visibility: Visibility,
        metadata_name: String,
        value: Value,
        #[serde(default)]
        visibility: Visibility,
    },
    /// Soft delete of the old instance plus re-add under the new visibility.
    AlterPropertyVisibility {
        key: String,
        name: String,
        old_visibility: Visibility,
        new_visibility: Visibility,
    },
    AlterElementVisibility {
        visibility: Visibility,
        #[serde(default)]
        data: EventData,
    },
    AlterEdgeLabel {
        label: String,
    },
    AddAdditionalVisibility {
        visibility: Visibility,
        #[serde(default)]
        data: EventData,
    },
    DeleteAdditionalVisibility {
        visibility: Visibility,
        #[serde(default)]
        data: EventData,
    },
    SoftDelete {
        #[serde(default)]
        data: EventData,
    },
    MarkHidden {
        visibility: Visibility,
        #[serde(default)]
        data: EventData,
    },
    MarkVisible {
        visibility: Visibility,
        #[serde(default)]
        data: EventData,
    },
    /// Hard delete. Irreversible.
    Delete,
    /// Bump the element timestamp.
    Touch,
    SetExtendedData {
        table: String,
        row: String,
        column: String,
        #[serde(default)]
        key: String,
        value: Value,
        #[serde(default)]
        visibility: Visibility,
    },
    DeleteExtendedData {
        table: String,
        row: String,
        column: String,
        #[serde(default)]
        key: String,
        #[serde(default)]
        visibility: Visibility,
    },
    SoftDeleteExtendedData {
        table: String,
        row: String,
        column: String,
        #[serde(default)]
        key: String,
        #[serde(default)]
        visibility: Visibility,
        #[serde(default)]
        data: EventData,
    },
    AddExtendedDataAdditionalVisibility {
        table: String,
        row: String,
        visibility: Visibility,
        #[serde(default)]
        data: EventData,
    },
    DeleteExtendedDataAdditionalVisibility {
        table: String,
        row: String,
        visibility: Visibility,
        #[serde(default)]
        data: EventData,
    },
    DeleteExtendedDataRow {
        table: String,
        row: String,
    },
}

/// Everything one commit changes on one element.
///
/// Assemble it with the consuming builder methods and hand it to
/// [`crate::Graph::commit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementMutation {
    pub target: MutationTarget,
    /// Explicit commit timestamp. Defaults to the process clock.
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub operations: Vec<ElementOperation>,
}

impl ElementMutation {
    #[must_use]
    pub fn new(target: MutationTarget) -> Self {
        Self {
            target,
            timestamp: None,
            operations: Vec::new(),
        }
    }

    #[must_use]
    pub fn new_vertex(id: impl Into<String>, visibility: Visibility) -> Self {
        Self::new(MutationTarget::NewVertex {
            id: id.into(),
            visibility,
        })
    }

    #[must_use]
    pub fn new_edge(
        id: impl Into<String>,
        out_vertex_id: impl Into<String>,
        in_vertex_id: impl Into<String>,
        label: impl Into<String>,
        visibility: Visibility,
    ) -> Self {
        Self::new(MutationTarget::NewEdge {
            id: id.into(),
            out_vertex_id: out_vertex_id.into(),
            in_vertex_id: in_vertex_id.into(),
            label: label.into(),
            visibility,
        })
    }

    #[must_use]
    pub fn existing(element: ElementId) -> Self {
        Self::new(MutationTarget::Existing {
            element_type: element.element_type,
            id: element.id,
        })
    }

    #[must_use]
    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub fn operation(mut self, operation: ElementOperation) -> Self {
        self.operations.push(operation);
        self
    }

    #[must_use]
    pub fn add_property_value(
        self,
        key: impl Into<String>,
        name: impl Into<String>,
        value: Value,
        visibility: Visibility,
    ) -> Self {
        self.add_property_value_with_metadata(key, name, value, Metadata::new(), visibility)
    }

    #[must_use]
    pub fn add_property_value_with_metadata(
        self,
        key: impl Into<String>,
        name: impl Into<String>,
        value: Value,
        metadata: Metadata,
        visibility: Visibility,
    ) -> Self {
        self.operation(ElementOperation::AddPropertyValue {
            key: key.into(),
            name: name.into(),
            value,
            metadata,
            visibility,
        })
    }

    #[must_use]
    pub fn delete_property(
        self,
        key: impl Into<String>,
        name: impl Into<String>,
        visibility: Visibility,
    ) -> Self {
        self.operation(ElementOperation::DeletePropertyValue {
            key: key.into(),
            name: name.into(),
            visibility,
        })
    }

    #[must_use]
    pub fn soft_delete_property(
        self,
        key: impl Into<String>,
        name: impl Into<String>,
        visibility: Visibility,
        data: EventData,
    ) -> Self {
        self.operation(ElementOperation::SoftDeletePropertyValue {
            key: key.into(),
            name: name.into(),
            visibility,
            data,
        })
    }

    #[must_use]
    pub fn mark_property_hidden(
        self,
        key: impl Into<String>,
        name: impl Into<String>,
        property_visibility: Visibility,
        visibility: Visibility,
    ) -> Self {
        self.operation(ElementOperation::MarkPropertyHidden {
            key: key.into(),
            name: name.into(),
            property_visibility,
            visibility,
            data: None,
        })
    }

    #[must_use]
    pub fn mark_property_visible(
        self,
        key: impl Into<String>,
        name: impl Into<String>,
        property_visibility: Visibility,
        visibility: Visibility,
    ) -> Self {
        self.operation(ElementOperation::MarkPropertyVisible {
            key: key.into(),
            name: name.into(),
            property_visibility,
            visibility,
            data: None,
        })
    }

    #[must_use]
    pub fn set_property_metadata(
        self,
        key: impl Into<String>,
        name: impl Into<String>,
        property_visibility: Visibility,
        metadata_name: impl Into<String>,
        value: Value,
        visibility: Visibility,
    ) -> Self {
        self.operation(ElementOperation::SetPropertyMetadata {
            key: key.into(),
            name: name.into(),
            property_visibility,
            metadata_name: metadata_name.into(),
            value,
            visibility,
        })
    }

    #[must_use]
    pub fn alter_property_visibility(
        self,
        key: impl Into<String>,
        name: impl Into<String>,
        old_visibility: Visibility,
        new_visibility: Visibility,
    ) -> Self {
        self.operation(ElementOperation::AlterPropertyVisibility {
            key: key.into(),
            name: name.into(),
            old_visibility,
            new_visibility,
        })
    }

    #[must_use]
    pub fn alter_element_visibility(self, visibility: Visibility) -> Self {
        self.operation(ElementOperation::AlterElementVisibility {
            visibility,
            data: None,
        })
    }

    #[must_use]
    pub fn alter_edge_label(self, label: impl Into<String>) -> Self {
        self.operation(ElementOperation::AlterEdgeLabel {
            label: label.into(),
        })
    }

    #[must_use]
    pub fn add_additional_visibility(self, visibility: Visibility) -> Self {
        self.operation(ElementOperation::AddAdditionalVisibility {
            visibility,
            data: None,
        })
    }

    #[must_use]
    pub fn delete_additional_visibility(self, visibility: Visibility) -> Self {
        self.operation(ElementOperation::DeleteAdditionalVisibility {
            visibility,
            data: None,
        })
    }

    #[must_use]
    pub fn soft_delete(self, data: EventData) -> Self {
        self.operation(ElementOperation::SoftDelete { data })
    }

    #[must_use]
    pub fn mark_hidden(self, visibility: Visibility) -> Self {
        self.operation(ElementOperation::MarkHidden {
            visibility,
            data: None,
        })
    }

    #[must_use]
    pub fn mark_visible(self, visibility: Visibility) -> Self {
        self.operation(ElementOperation::MarkVisible {
            visibility,
            data: None,
        })
    }

    #[must_use]
    pub fn delete(self) -> Self {
        self.operation(ElementOperation::Delete)
    }

    #[must_use]
    pub fn touch(self) -> Self {
        self.operation(ElementOperation::Touch)
    }

    #[must_use]
    pub fn set_extended_data(
        self,
        table: impl Into<String>,
        row: impl Into<String>,
        column: impl Into<String>,
        value: Value,
        visibility: Visibility,
    ) -> Self {
        self.operation(ElementOperation::SetExtendedData {
            table: table.into(),
            row: row.into(),
            column: column.into(),
            key: String::new(),
            value,
            visibility,
        })
    }

    #[must_use]
    pub fn delete_extended_data(
        self,
        table: impl Into<String>,
        row: impl Into<String>,
        column: impl Into<String>,
        visibility: Visibility,
    ) -> Self {
        self.operation(ElementOperation::DeleteExtendedData {
            table: table.into(),
            row: row.into(),
            column: column.into(),
            key: String::new(),
            visibility,
        })
    }

    #[must_use]
    pub fn soft_delete_extended_data(
        self,
        table: impl Into<String>,
        row: impl Into<String>,
        column: impl Into<String>,
        visibility: Visibility,
    ) -> Self {
        self.operation(ElementOperation::SoftDeleteExtendedData {
            table: table.into(),
            row: row.into(),
            column: column.into(),
            key: String::new(),
            visibility,
            data: None,
        })
    }

    #[must_use]
    pub fn add_extended_data_additional_visibility(
        self,
        table: impl Into<String>,
        row: impl Into<String>,
        visibility: Visibility,
    ) -> Self {
        self.operation(ElementOperation::AddExtendedDataAdditionalVisibility {
            table: table.into(),
            row: row.into(),
            visibility,
            data: None,
        })
    }

    #[must_use]
    pub fn delete_extended_data_additional_visibility(
        self,
        table: impl Into<String>,
        row: impl Into<String>,
        visibility: Visibility,
    ) -> Self {
        self.operation(ElementOperation::DeleteExtendedDataAdditionalVisibility {
            table: table.into(),
            row: row.into(),
            visibility,
            data: None,
        })
    }

    #[must_use]
    pub fn delete_extended_data_row(self, table: impl Into<String>, row: impl Into<String>) -> Self {
        self.operation(ElementOperation::DeleteExtendedDataRow {
            table: table.into(),
            row: row.into(),
        })
    }
}

// =============================================================================
// EFFECTS
// =============================================================================

/// A notification produced by a commit, for observers such as a search
/// index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum GraphEffect {
    ElementAdded {
        element: ElementId,
        timestamp: Timestamp,
    },
    ElementUpdated {
        element: ElementId,
        timestamp: Timestamp,
    },
    ElementDeleted {
        element: ElementId,
        timestamp: Timestamp,
    },
    ElementSoftDeleted {
        element: ElementId,
        timestamp: Timestamp,
    },
    ElementHidden {
        element: ElementId,
        visibility: Visibility,
        timestamp: Timestamp,
    },
    ElementVisible {
        element: ElementId,
        visibility: Visibility,
        timestamp: Timestamp,
    },
    ExtendedDataUpdated {
        row: ExtendedDataRowId,
        timestamp: Timestamp,
    },
    ExtendedDataDeleted {
        row: ExtendedDataRowId,
        timestamp: Timestamp,
    },
}

/// Receiver of commit effects.
pub trait EffectSink {
    fn on_effect(&self, effect: &GraphEffect);
}

/// Sink that logs every effect at `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEffectSink;

impl EffectSink for TracingEffectSink {
    fn on_effect(&self, effect: &GraphEffect) {
        tracing::debug!(?effect, "graph effect");
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOutcome {
    /// Timestamp carried by every mutation of the commit.
    pub timestamp: Timestamp,
    pub effects: Vec<GraphEffect>,
}

impl CommitOutcome {
    /// Hand every effect, in order, to every sink.
    pub fn dispatch(&self, sinks: &[&dyn EffectSink]) {
        for effect in &self.effects {
            for sink in sinks {
                sink.on_effect(effect);
            }
        }
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

fn check_text(what: &str, text: &str, max: usize, allow_empty: bool) -> Result<(), TesseraError> {
    if !allow_empty && text.is_empty() {
        return Err(TesseraError::InvalidMutation(format!("{what} must not be empty")));
    }
    if text.len() > max {
        return Err(TesseraError::InvalidMutation(format!(
            "{what} is {} bytes, limit is {max}",
            text.len()
        )));
    }
    if text.contains([VALUE_SEPARATOR, SUBSTITUTION_MARKER]) {
        return Err(TesseraError::InvalidMutation(format!(
            "{what} {text:?} contains a reserved character"
        )));
    }
    Ok(())
}

fn check_id(what: &str, id: &str) -> Result<(), TesseraError> {
    check_text(what, id, MAX_ELEMENT_ID_LENGTH, false)
}

fn check_name(what: &str, name: &str) -> Result<(), TesseraError> {
    check_text(what, name, MAX_NAME_LENGTH, false)
}

fn check_key(what: &str, key: &str) -> Result<(), TesseraError> {
    check_text(what, key, MAX_NAME_LENGTH, true)
}

/// Reject ids, names and labels the physical layout cannot hold.
pub fn validate(mutation: &ElementMutation) -> Result<(), TesseraError> {
    match &mutation.target {
        MutationTarget::NewVertex { id, .. } | MutationTarget::Existing { id, .. } => {
            check_id("element id", id)?;
        }
        MutationTarget::NewEdge {
            id,
            out_vertex_id,
            in_vertex_id,
            label,
            ..
        } => {
            check_id("edge id", id)?;
            check_id("out vertex id", out_vertex_id)?;
            check_id("in vertex id", in_vertex_id)?;
            check_name("edge label", label)?;
        }
    }
    for operation in &mutation.operations {
        match operation {
            ElementOperation::AddPropertyValue {
                key,
                name,
                metadata,
                ..
            } => {
                check_key("property key", key)?;
                check_name("property name", name)?;
                for (metadata_name, _, _) in metadata.entries() {
                    check_name("metadata name", metadata_name)?;
                }
            }
            ElementOperation::DeletePropertyValue { key, name, .. }
            | ElementOperation::SoftDeletePropertyValue { key, name, .. }
            | ElementOperation::MarkPropertyHidden { key, name, .. }
            | ElementOperation::MarkPropertyVisible { key, name, .. }
            | ElementOperation::AlterPropertyVisibility { key, name, .. } => {
                check_key("property key", key)?;
                check_name("property name", name)?;
            }
            ElementOperation::SetPropertyMetadata {
                key,
                name,
                metadata_name,
                ..
            } => {
                check_key("property key", key)?;
                check_name("property name", name)?;
                check_name("metadata name", metadata_name)?;
            }
            ElementOperation::AlterEdgeLabel { label } => check_name("edge label", label)?,
            ElementOperation::SetExtendedData {
                table,
                row,
                column,
                key,
                ..
            }
            | ElementOperation::DeleteExtendedData {
                table,
                row,
                column,
                key,
                ..
            }
            | ElementOperation::SoftDeleteExtendedData {
                table,
                row,
                column,
                key,
                ..
            } => {
                check_name("extended data table", table)?;
                check_id("extended data row", row)?;
                check_name("extended data column", column)?;
                check_key("extended data key", key)?;
            }
            ElementOperation::AddExtendedDataAdditionalVisibility { table, row, .. }
            | ElementOperation::DeleteExtendedDataAdditionalVisibility { table, row, .. }
            | ElementOperation::DeleteExtendedDataRow { table, row } => {
                check_name("extended data table", table)?;
                check_id("extended data row", row)?;
            }
            ElementOperation::AlterElementVisibility { .. }
            | ElementOperation::AddAdditionalVisibility { .. }
            | ElementOperation::DeleteAdditionalVisibility { .. }
            | ElementOperation::SoftDelete { .. }
            | ElementOperation::MarkHidden { .. }
            | ElementOperation::MarkVisible { .. }
            | ElementOperation::Delete
            | ElementOperation::Touch => {}
        }
    }
    Ok(())
}

// =============================================================================
// PLANNING
// =============================================================================

/// Endpoints, label and visibility of the edge being written.
#[derive(Debug, Clone)]
struct EdgeState {
    out_vertex_id: String,
    in_vertex_id: String,
    label: String,
    visibility: Visibility,
    /// Active hide visibilities of the edge.
    hidden: BTreeSet<Visibility>,
}

impl EdgeState {
    fn of(edge: &Element) -> Option<Self> {
        Some(Self {
            out_vertex_id: edge.out_vertex_id()?.to_string(),
            in_vertex_id: edge.in_vertex_id()?.to_string(),
            label: edge.label()?.to_string(),
            visibility: edge.visibility().clone(),
            hidden: edge.hidden_visibilities().clone(),
        })
    }

    /// (vertex, direction of the edge seen from it) for both endpoints.
    fn endpoints(&self) -> [(ElementId, Direction); 2] {
        [
            (ElementId::vertex(self.out_vertex_id.clone()), Direction::Out),
            (ElementId::vertex(self.in_vertex_id.clone()), Direction::In),
        ]
    }

    fn edge_ref(&self, direction: Direction, edge_id: &str) -> MutationKind {
        // the out vertex's reference points at the in vertex and vice versa
        let other_vertex_id = match direction {
            Direction::In => self.out_vertex_id.clone(),
            Direction::Out | Direction::Both => self.in_vertex_id.clone(),
        };
        MutationKind::AddEdgeRef {
            direction,
            edge_id: edge_id.to_string(),
            other_vertex_id,
            label: self.label.clone(),
            visibility: self.visibility.clone(),
        }
    }

    /// A fresh endpoint reference plus one hide marker per active hide.
    /// Reference hides only cover references written at or before them.
    fn edge_refs(&self, direction: Direction, edge_id: &str) -> Vec<MutationKind> {
        let mut refs = vec![self.edge_ref(direction, edge_id)];
        refs.extend(
            self.hidden
                .iter()
                .map(|visibility| MutationKind::MarkEdgeRefHidden {
                    direction,
                    edge_id: edge_id.to_string(),
                    edge_visibility: self.visibility.clone(),
                    visibility: visibility.clone(),
                    data: None,
                }),
        );
        refs
    }
}

/// Per-row writes of one commit, ready to be appended.
#[derive(Debug)]
pub(crate) struct CommitPlan {
    timestamp: Timestamp,
    rows: BTreeMap<ElementId, Vec<Mutation>>,
    extended: BTreeMap<ExtendedDataRowId, Vec<ExtendedDataMutation>>,
    effects: Vec<GraphEffect>,
}

impl CommitPlan {
    fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            rows: BTreeMap::new(),
            extended: BTreeMap::new(),
            effects: Vec::new(),
        }
    }

    fn push(&mut self, element: &ElementId, kind: MutationKind) {
        self.rows
            .entry(element.clone())
            .or_default()
            .push(Mutation::new(self.timestamp, kind));
    }

    fn push_all(&mut self, element: &ElementId, kinds: Vec<MutationKind>) {
        for kind in kinds {
            self.push(element, kind);
        }
    }

    fn push_extended(&mut self, row: ExtendedDataRowId, kind: ExtendedDataMutationKind) {
        self.extended
            .entry(row)
            .or_default()
            .push(ExtendedDataMutation::new(self.timestamp, kind));
    }

    fn effect(&mut self, effect: GraphEffect) {
        if !self.effects.contains(&effect) {
            self.effects.push(effect);
        }
    }

    /// Reject the commit if any touched row already holds a newer mutation.
    fn check_ordering(&self, store: &dyn RowStore) -> Result<(), TesseraError> {
        for element in self.rows.keys() {
            let last = store.last_timestamp(element.element_type, &element.id)?;
            ordered(&element.id, last, self.timestamp)?;
        }
        for row in self.extended.keys() {
            let last = store.last_extended_timestamp(row)?;
            ordered(&row.row_key(), last, self.timestamp)?;
        }
        Ok(())
    }

    /// Append every row batch to `store`.
    pub(crate) fn apply(self, store: &dyn RowStore) -> Result<CommitOutcome, TesseraError> {
        self.check_ordering(store)?;
        for (element, mutations) in &self.rows {
            store.append(element.element_type, &element.id, mutations)?;
        }
        for (row, mutations) in &self.extended {
            store.append_extended(row, mutations)?;
        }
        tracing::debug!(
            timestamp = self.timestamp,
            rows = self.rows.len(),
            extended_rows = self.extended.len(),
            effects = self.effects.len(),
            "commit applied"
        );
        Ok(CommitOutcome {
            timestamp: self.timestamp,
            effects: self.effects,
        })
    }
}

fn ordered(row: &str, last: Option<Timestamp>, attempted: Timestamp) -> Result<(), TesseraError> {
    match last.filter(|&last| attempted < last) {
        Some(last) => {
            tracing::warn!(
                element = %row.escape_debug(),
                last,
                attempted,
                "rejected out-of-order commit"
            );
            Err(TesseraError::InvalidMutationOrdering {
                element: row.to_string(),
                last,
                attempted,
            })
        }
        None => Ok(()),
    }
}

struct Planner<'a> {
    store: &'a dyn RowStore,
    authorizations: &'a Authorizations,
    element: ElementId,
    /// Current state of the target as the caller sees it, hidden included.
    existing: Option<Element>,
    edge: Option<EdgeState>,
    plan: CommitPlan,
    updated: bool,
}

impl Planner<'_> {
    fn load(&self, element_type: ElementType, id: &str) -> Result<Option<Element>, TesseraError> {
        let mutations = self.store.read_row(element_type, id, None)?;
        let ctx = ReadContext::new(
            self.authorizations.clone(),
            FetchHints::all_including_hidden(),
        );
        materialize(element_type, id, &mutations, &ctx)
    }

    /// Replace caller-supplied streaming values by store references.
    fn stage(&self, value: &Value) -> Result<Value, TesseraError> {
        match value {
            Value::Streaming(streaming) => Ok(Value::StreamingRef(
                self.store.streaming_values().put(streaming)?,
            )),
            other => Ok(other.clone()),
        }
    }

    fn stage_metadata(&self, metadata: &Metadata) -> Result<Metadata, TesseraError> {
        let mut staged = Metadata::new();
        for (name, visibility, value) in metadata.entries() {
            staged.add(name, self.stage(value)?, visibility.clone());
        }
        Ok(staged)
    }

    fn push(&mut self, kind: MutationKind) {
        let element = self.element.clone();
        self.plan.push(&element, kind);
    }

    /// Ids of hard-deleted elements are never signalled again.
    fn ensure_not_deleted(&self) -> Result<(), TesseraError> {
        let stored = self
            .store
            .read_row(self.element.element_type, &self.element.id, None)?;
        if stored
            .iter()
            .any(|m| matches!(m.kind, MutationKind::DeleteRow))
        {
            return Err(TesseraError::InvalidMutation(format!(
                "{} was hard-deleted and cannot be created again",
                self.element
            )));
        }
        Ok(())
    }

    fn require_edge(&self, what: &str) -> Result<EdgeState, TesseraError> {
        self.edge.clone().ok_or_else(|| {
            TesseraError::InvalidMutation(format!("{what} applies to edges only, not {}", self.element))
        })
    }

    fn incident_edges(&self) -> Result<Vec<EdgeInfo>, TesseraError> {
        match (&self.existing, self.element.element_type) {
            (Some(vertex), ElementType::Vertex) => Ok(vertex
                .edge_infos(Direction::Both)?
                .into_iter()
                .cloned()
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    fn target(&mut self, target: &MutationTarget) -> Result<(), TesseraError> {
        let timestamp = self.plan.timestamp;
        match target {
            MutationTarget::NewVertex { visibility, .. } => {
                if self.existing.is_none() {
                    self.ensure_not_deleted()?;
                }
                self.push(MutationKind::AlterVisibility {
                    visibility: visibility.clone(),
                    data: None,
                });
                self.plan.effect(if self.existing.is_some() {
                    GraphEffect::ElementUpdated {
                        element: self.element.clone(),
                        timestamp,
                    }
                } else {
                    GraphEffect::ElementAdded {
                        element: self.element.clone(),
                        timestamp,
                    }
                });
            }
            MutationTarget::NewEdge {
                id,
                out_vertex_id,
                in_vertex_id,
                label,
                visibility,
            } => {
                if self.existing.is_none() {
                    self.ensure_not_deleted()?;
                }
                let stored = self.store.read_row(ElementType::Edge, id, None)?;
                let setup = stored.iter().rev().find_map(|m| match &m.kind {
                    MutationKind::EdgeSetup {
                        out_vertex_id,
                        in_vertex_id,
                    } => Some((out_vertex_id.clone(), in_vertex_id.clone())),
                    _ => None,
                });
                match setup {
                    Some((out, inn)) if &out != out_vertex_id || &inn != in_vertex_id => {
                        return Err(TesseraError::InvalidMutation(format!(
                            "edge {id} already connects {out} -> {inn}"
                        )));
                    }
                    Some(_) => {}
                    None => self.push(MutationKind::EdgeSetup {
                        out_vertex_id: out_vertex_id.clone(),
                        in_vertex_id: in_vertex_id.clone(),
                    }),
                }
                self.push(MutationKind::AlterVisibility {
                    visibility: visibility.clone(),
                    data: None,
                });
                self.push(MutationKind::AlterEdgeLabel {
                    label: label.clone(),
                });

                let next = EdgeState {
                    out_vertex_id: out_vertex_id.clone(),
                    in_vertex_id: in_vertex_id.clone(),
                    label: label.clone(),
                    visibility: visibility.clone(),
                    hidden: self
                        .edge
                        .as_ref()
                        .map(|edge| edge.hidden.clone())
                        .unwrap_or_default(),
                };
                let replaced = self
                    .edge
                    .replace(next.clone())
                    .map(|previous| previous.visibility)
                    .filter(|previous| previous != &next.visibility);
                for (vertex, direction) in next.endpoints() {
                    if let Some(previous) = &replaced {
                        self.plan.push(
                            &vertex,
                            MutationKind::DeleteEdgeRef {
                                direction,
                                edge_id: id.clone(),
                                visibility: previous.clone(),
                            },
                        );
                    }
                    self.plan.push_all(&vertex, next.edge_refs(direction, id));
                }
                self.plan.effect(if self.existing.is_some() {
                    GraphEffect::ElementUpdated {
                        element: self.element.clone(),
                        timestamp,
                    }
                } else {
                    GraphEffect::ElementAdded {
                        element: self.element.clone(),
                        timestamp,
                    }
                });
            }
            MutationTarget::Existing { .. } => {
                if self.existing.is_none() {
                    return Err(TesseraError::ElementNotFound(self.element.to_string()));
                }
            }
        }
        Ok(())
    }

    fn operation(
        &mut self,
        operation: &ElementOperation,
        earlier: &[ElementOperation],
    ) -> Result<(), TesseraError> {
        let timestamp = self.plan.timestamp;
        match operation {
            ElementOperation::AddPropertyValue {
                key,
                name,
                value,
                metadata,
                visibility,
            } => {
                self.push(MutationKind::AddPropertyValue {
                    key: key.clone(),
                    name: name.clone(),
                    value: self.stage(value)?,
                    metadata: self.stage_metadata(metadata)?,
                    visibility: visibility.clone(),
                });
                self.updated = true;
            }
            ElementOperation::DeletePropertyValue {
                key,
                name,
                visibility,
            } => {
                self.push(MutationKind::DeletePropertyValue {
                    key: key.clone(),
                    name: name.clone(),
                    visibility: visibility.clone(),
                });
                self.updated = true;
            }
            ElementOperation::SoftDeletePropertyValue {
                key,
                name,
                visibility,
                data,
            } => {
                self.push(MutationKind::SoftDeletePropertyValue {
                    key: key.clone(),
                    name: name.clone(),
                    visibility: visibility.clone(),
                    data: data.clone(),
                });
                self.updated = true;
            }
            ElementOperation::MarkPropertyHidden {
                key,
                name,
                property_visibility,
                visibility,
                data,
            } => {
                self.push(MutationKind::MarkPropertyHidden {
                    key: key.clone(),
                    name: name.clone(),
                    property_visibility: property_visibility.clone(),
                    visibility: visibility.clone(),
                    data: data.clone(),
                });
                self.updated = true;
            }
            ElementOperation::MarkPropertyVisible {
                key,
                name,
                property_visibility,
                visibility,
                data,
            } => {
                self.push(MutationKind::MarkPropertyVisible {
                    key: key.clone(),
                    name: name.clone(),
                    property_visibility: property_visibility.clone(),
                    visibility: visibility.clone(),
                    data: data.clone(),
                });
                self.updated = true;
            }
            ElementOperation::SetPropertyMetadata {
                key,
                name,
                property_visibility,
                metadata_name,
                value,
                visibility,
            } => {
                self.push(MutationKind::SetPropertyMetadata {
                    key: key.clone(),
                    name: name.clone(),
                    property_visibility: property_visibility.clone(),
                    metadata_name: metadata_name.clone(),
                    value: self.stage(value)?,
                    visibility: visibility.clone(),
                });
                self.updated = true;
            }
            ElementOperation::AlterPropertyVisibility {
                key,
                name,
                old_visibility,
                new_visibility,
            } => {
                if old_visibility == new_visibility {
                    return Ok(());
                }
                let (value, metadata) = self
                    .current_property(key, name, old_visibility, earlier)?
                    .ok_or_else(|| {
                        TesseraError::InvalidMutation(format!(
                            "property {name:?} (key {key:?}, visibility {old_visibility}) not found on {}",
                            self.element
                        ))
                    })?;
                self.push(MutationKind::SoftDeletePropertyValue {
                    key: key.clone(),
                    name: name.clone(),
                    visibility: old_visibility.clone(),
                    data: None,
                });
                self.push(MutationKind::AddPropertyValue {
                    key: key.clone(),
                    name: name.clone(),
                    value,
                    metadata,
                    visibility: new_visibility.clone(),
                });
                self.updated = true;
            }
            ElementOperation::AlterElementVisibility { visibility, data } => {
                self.push(MutationKind::AlterVisibility {
                    visibility: visibility.clone(),
                    data: data.clone(),
                });
                let changed = self
                    .edge
                    .clone()
                    .filter(|edge| &edge.visibility != visibility);
                if let Some(mut edge) = changed {
                    let old = std::mem::replace(&mut edge.visibility, visibility.clone());
                    for (vertex, direction) in edge.endpoints() {
                        self.plan.push(
                            &vertex,
                            MutationKind::DeleteEdgeRef {
                                direction,
                                edge_id: self.element.id.clone(),
                                visibility: old.clone(),
                            },
                        );
                        self.plan
                            .push_all(&vertex, edge.edge_refs(direction, &self.element.id));
                    }
                    self.edge = Some(edge);
                }
                self.updated = true;
            }
            ElementOperation::AlterEdgeLabel { label } => {
                let mut edge = self.require_edge("alter edge label")?;
                if &edge.label == label {
                    tracing::trace!(edge = %self.element, "edge label unchanged");
                    return Ok(());
                }
                edge.label = label.clone();
                self.push(MutationKind::AlterEdgeLabel {
                    label: label.clone(),
                });
                for (vertex, direction) in edge.endpoints() {
                    self.plan
                        .push_all(&vertex, edge.edge_refs(direction, &self.element.id));
                }
                self.edge = Some(edge);
                self.updated = true;
            }
            ElementOperation::AddAdditionalVisibility { visibility, data } => {
                self.push(MutationKind::AddAdditionalVisibility {
                    visibility: visibility.clone(),
                    data: data.clone(),
                });
                self.updated = true;
            }
            ElementOperation::DeleteAdditionalVisibility { visibility, data } => {
                self.push(MutationKind::DeleteAdditionalVisibility {
                    visibility: visibility.clone(),
                    data: data.clone(),
                });
                self.updated = true;
            }
            ElementOperation::SoftDelete { data } => self.soft_delete(data)?,
            ElementOperation::MarkHidden { visibility, data } => {
                self.mark(visibility, data, true)?;
            }
            ElementOperation::MarkVisible { visibility, data } => {
                self.mark(visibility, data, false)?;
            }
            ElementOperation::Delete => self.delete()?,
            ElementOperation::Touch => {
                self.push(MutationKind::ElementTimestamp);
                self.updated = true;
            }
            ElementOperation::SetExtendedData {
                table,
                row,
                column,
                key,
                value,
                visibility,
            } => {
                self.push(MutationKind::AddExtendedDataTable {
                    table_name: table.clone(),
                });
                let row = self.extended_row(table, row);
                self.plan.push_extended(
                    row.clone(),
                    ExtendedDataMutationKind::SetCell {
                        column: column.clone(),
                        key: key.clone(),
                        value: self.stage(value)?,
                        visibility: visibility.clone(),
                    },
                );
                self.plan
                    .effect(GraphEffect::ExtendedDataUpdated { row, timestamp });
            }
            ElementOperation::DeleteExtendedData {
                table,
                row,
                column,
                key,
                visibility,
            } => {
                let row = self.extended_row(table, row);
                self.plan.push_extended(
                    row.clone(),
                    ExtendedDataMutationKind::DeleteCell {
                        column: column.clone(),
                        key: key.clone(),
                        visibility: visibility.clone(),
                    },
                );
                self.plan
                    .effect(GraphEffect::ExtendedDataUpdated { row, timestamp });
            }
            ElementOperation::SoftDeleteExtendedData {
                table,
                row,
                column,
                key,
                visibility,
                data,
            } => {
                let row = self.extended_row(table, row);
                self.plan.push_extended(
                    row.clone(),
                    ExtendedDataMutationKind::SoftDeleteCell {
                        column: column.clone(),
                        key: key.clone(),
                        visibility: visibility.clone(),
                        data: data.clone(),
                    },
                );
                self.plan
                    .effect(GraphEffect::ExtendedDataUpdated { row, timestamp });
            }
            ElementOperation::AddExtendedDataAdditionalVisibility {
                table,
                row,
                visibility,
                data,
            } => {
                let row = self.extended_row(table, row);
                self.plan.push_extended(
                    row.clone(),
                    ExtendedDataMutationKind::AddAdditionalVisibility {
                        visibility: visibility.clone(),
                        data: data.clone(),
                    },
                );
                self.plan
                    .effect(GraphEffect::ExtendedDataUpdated { row, timestamp });
            }
            ElementOperation::DeleteExtendedDataAdditionalVisibility {
                table,
                row,
                visibility,
                data,
            } => {
                let row = self.extended_row(table, row);
                self.plan.push_extended(
                    row.clone(),
                    ExtendedDataMutationKind::DeleteAdditionalVisibility {
                        visibility: visibility.clone(),
                        data: data.clone(),
                    },
                );
                self.plan
                    .effect(GraphEffect::ExtendedDataUpdated { row, timestamp });
            }
            ElementOperation::DeleteExtendedDataRow { table, row } => {
                let row = self.extended_row(table, row);
                self.plan
                    .push_extended(row.clone(), ExtendedDataMutationKind::DeleteRow);
                self.plan
                    .effect(GraphEffect::ExtendedDataDeleted { row, timestamp });
            }
        }
        Ok(())
    }

    fn extended_row(&self, table: &str, row: &str) -> ExtendedDataRowId {
        ExtendedDataRowId::new(self.element.element_type, self.element.id.clone(), table, row)
    }

    /// Value and metadata of a property instance, from this commit's
    /// earlier operations or from the stored element.
    fn current_property(
        &self,
        key: &str,
        name: &str,
        visibility: &Visibility,
        earlier: &[ElementOperation],
    ) -> Result<Option<(Value, Metadata)>, TesseraError> {
        let pending = earlier.iter().rev().find_map(|operation| match operation {
            ElementOperation::AddPropertyValue {
                key: k,
                name: n,
                value,
                metadata,
                visibility: v,
            } if k == key && n == name && v == visibility => Some((value, metadata)),
            _ => None,
        });
        if let Some((value, metadata)) = pending {
            return Ok(Some((self.stage(value)?, self.stage_metadata(metadata)?)));
        }
        let Some(element) = &self.existing else {
            return Ok(None);
        };
        match element.property_instance(key, name, visibility)? {
            Some(property) => Ok(Some((property.value.clone(), property.metadata()?.clone()))),
            None => Ok(None),
        }
    }

    fn soft_delete(&mut self, data: &EventData) -> Result<(), TesseraError> {
        let timestamp = self.plan.timestamp;
        self.push(MutationKind::SoftDeleteElement { data: data.clone() });
        if let Some(edge) = self.edge.clone() {
            for (vertex, direction) in edge.endpoints() {
                self.plan.push(
                    &vertex,
                    MutationKind::SoftDeleteEdgeRef {
                        direction,
                        edge_id: self.element.id.clone(),
                        visibility: edge.visibility.clone(),
                        data: data.clone(),
                    },
                );
            }
        }
        for info in self.incident_edges()? {
            let edge = ElementId::edge(info.edge_id.clone());
            self.plan
                .push(&edge, MutationKind::SoftDeleteElement { data: data.clone() });
            for (vertex, direction) in [
                (self.element.clone(), info.direction),
                (ElementId::vertex(info.other_vertex_id.clone()), info.direction.reverse()),
            ] {
                self.plan.push(
                    &vertex,
                    MutationKind::SoftDeleteEdgeRef {
                        direction,
                        edge_id: info.edge_id.clone(),
                        visibility: info.visibility.clone(),
                        data: data.clone(),
                    },
                );
            }
            self.plan.effect(GraphEffect::ElementSoftDeleted {
                element: edge,
                timestamp,
            });
        }
        self.plan.effect(GraphEffect::ElementSoftDeleted {
            element: self.element.clone(),
            timestamp,
        });
        Ok(())
    }

    fn mark(
        &mut self,
        visibility: &Visibility,
        data: &EventData,
        hidden: bool,
    ) -> Result<(), TesseraError> {
        let timestamp = self.plan.timestamp;
        let element_marker = |visibility: &Visibility| {
            if hidden {
                MutationKind::MarkElementHidden {
                    visibility: visibility.clone(),
                    data: data.clone(),
                }
            } else {
                MutationKind::MarkElementVisible {
                    visibility: visibility.clone(),
                    data: data.clone(),
                }
            }
        };
        let ref_marker = |direction: Direction, edge_id: &str, edge_visibility: &Visibility| {
            if hidden {
                MutationKind::MarkEdgeRefHidden {
                    direction,
                    edge_id: edge_id.to_string(),
                    edge_visibility: edge_visibility.clone(),
                    visibility: visibility.clone(),
                    data: data.clone(),
                }
            } else {
                MutationKind::MarkEdgeRefVisible {
                    direction,
                    edge_id: edge_id.to_string(),
                    edge_visibility: edge_visibility.clone(),
                    visibility: visibility.clone(),
                    data: data.clone(),
                }
            }
        };
        let effect = |element: ElementId| {
            if hidden {
                GraphEffect::ElementHidden {
                    element,
                    visibility: visibility.clone(),
                    timestamp,
                }
            } else {
                GraphEffect::ElementVisible {
                    element,
                    visibility: visibility.clone(),
                    timestamp,
                }
            }
        };

        self.push(element_marker(visibility));
        if let Some(mut edge) = self.edge.clone() {
            for (vertex, direction) in edge.endpoints() {
                self.plan.push(
                    &vertex,
                    ref_marker(direction, &self.element.id, &edge.visibility),
                );
            }
            if hidden {
                edge.hidden.insert(visibility.clone());
            } else {
                edge.hidden.remove(visibility);
            }
            self.edge = Some(edge);
        }
        for info in self.incident_edges()? {
            let edge = ElementId::edge(info.edge_id.clone());
            self.plan.push(&edge, element_marker(visibility));
            self.plan.push(
                &self.element.clone(),
                ref_marker(info.direction, &info.edge_id, &info.visibility),
            );
            self.plan.push(
                &ElementId::vertex(info.other_vertex_id.clone()),
                ref_marker(info.direction.reverse(), &info.edge_id, &info.visibility),
            );
            self.plan.effect(effect(edge));
        }
        self.plan.effect(effect(self.element.clone()));
        Ok(())
    }

    fn delete(&mut self) -> Result<(), TesseraError> {
        let timestamp = self.plan.timestamp;
        if let Some(edge) = self.edge.clone() {
            for (vertex, direction) in edge.endpoints() {
                self.plan.push(
                    &vertex,
                    MutationKind::DeleteEdgeRef {
                        direction,
                        edge_id: self.element.id.clone(),
                        visibility: edge.visibility.clone(),
                    },
                );
            }
        }
        for info in self.incident_edges()? {
            let edge = ElementId::edge(info.edge_id.clone());
            self.plan.push(
                &ElementId::vertex(info.other_vertex_id.clone()),
                MutationKind::DeleteEdgeRef {
                    direction: info.direction.reverse(),
                    edge_id: info.edge_id.clone(),
                    visibility: info.visibility.clone(),
                },
            );
            self.delete_extended_rows(&edge)?;
            self.plan.push(&edge, MutationKind::DeleteRow);
            self.plan.effect(GraphEffect::ElementDeleted {
                element: edge,
                timestamp,
            });
        }
        let element = self.element.clone();
        self.delete_extended_rows(&element)?;
        self.push(MutationKind::DeleteRow);
        self.plan.effect(GraphEffect::ElementDeleted { element, timestamp });
        Ok(())
    }

    fn delete_extended_rows(&mut self, element: &ElementId) -> Result<(), TesseraError> {
        let rows = self
            .store
            .extended_rows(element.element_type, &element.id, None)?;
        for (row, _) in rows {
            self.plan
                .push_extended(row, ExtendedDataMutationKind::DeleteRow);
        }
        Ok(())
    }
}

/// Validate `mutation` and turn it into per-row writes.
///
/// Reads the current state of the target (and, for vertices, of its
/// incident edges) as `authorizations` sees it, hidden data included.
pub(crate) fn plan_commit(
    store: &dyn RowStore,
    mutation: &ElementMutation,
    authorizations: &Authorizations,
    clock: &IncreasingTime,
) -> Result<CommitPlan, TesseraError> {
    validate(mutation)?;
    let timestamp = match mutation.timestamp {
        Some(timestamp) => {
            clock.observe(timestamp);
            timestamp
        }
        None => clock.now(),
    };
    let element = mutation.target.element_id();

    let mut planner = Planner {
        store,
        authorizations,
        element: element.clone(),
        existing: None,
        edge: None,
        plan: CommitPlan::new(timestamp),
        updated: false,
    };
    planner.existing = planner.load(element.element_type, &element.id)?;
    planner.edge = planner.existing.as_ref().and_then(EdgeState::of);

    planner.target(&mutation.target)?;
    for (i, operation) in mutation.operations.iter().enumerate() {
        planner.operation(operation, &mutation.operations[..i])?;
    }

    if planner.updated && matches!(mutation.target, MutationTarget::Existing { .. }) {
        planner.plan.effect(GraphEffect::ElementUpdated {
            element,
            timestamp,
        });
    }
    Ok(planner.plan)
}

// =============================================================================
// TESTS
// =============================================================================
