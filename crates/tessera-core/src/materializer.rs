//! # Element Materializer
//!
//! Folds the mutations of exactly one element into a read-only
//! [`Element`], a [`HistoricalEvent`] sequence, or (for side tables) an
//! [`ExtendedDataRow`]. Both backends feed this module the same
//! [`Mutation`] model, so the rules below hold regardless of storage.
//!
//! ## Canonical order
//!
//! Mutations are sorted by (timestamp, column, arrival). Two mutations on
//! the same column at the same timestamp are one physical cell: the later
//! arrival wins and the earlier one is dropped. Every state rule compares
//! timestamps, never arrival order, so the result does not depend on the
//! backend.
//!
//! ## Pipeline
//!
//! 1. A row-delete marker anywhere means the element does not exist.
//! 2. Drop mutations newer than the as-of ceiling.
//! 3. Apply column tombstones (they remove same-column versions at or
//!    before their timestamp; a property tombstone also removes the
//!    property's metadata).
//! 4. Canonical sort and same-cell dedup.
//! 5. Keep at most `max_versions` versions per column.
//! 6. Fold: latest version per column wins; soft deletes, hide markers,
//!    visibilities and additional visibilities gate what survives.

use crate::element::{EdgeInfo, EdgesSummary, Element, ElementKind, Metadata, Property, hidden_for};
use crate::extended_data::{
    ExtendedDataCell, ExtendedDataMutation, ExtendedDataMutationKind, ExtendedDataRow,
    ExtendedDataRowId,
};
use crate::history::{HistoricalEvent, HistoricalEventId, HistoricalEventKind, HistoricalEventsFetchHints};
use crate::mutation::{Column, Mutation, MutationKind};
use crate::primitives::{CF_PROPERTY, CF_PROPERTY_METADATA, VALUE_SEPARATOR};
use crate::visibility::{Authorizations, Visibility};
use crate::{Direction, ElementType, FetchHints, TesseraError, Timestamp, Value};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// READ CONTEXT
// =============================================================================

/// Everything a single read needs besides the mutations themselves.
#[derive(Debug, Clone)]
pub struct ReadContext {
    pub authorizations: Authorizations,
    pub fetch_hints: FetchHints,
    /// Ignore mutations newer than this timestamp.
    pub as_of: Option<Timestamp>,
    /// Keep at most this many versions per column.
    pub max_versions: Option<usize>,
    /// With `include_hidden`, bypasses the element visibility gate.
    pub administrative: bool,
}

impl ReadContext {
    #[must_use]
    pub fn new(authorizations: Authorizations, fetch_hints: FetchHints) -> Self {
        Self {
            authorizations,
            fetch_hints,
            as_of: None,
            max_versions: None,
            administrative: false,
        }
    }

    #[must_use]
    pub fn with_as_of(mut self, as_of: Option<Timestamp>) -> Self {
        self.as_of = as_of;
        self
    }

    #[must_use]
    pub fn with_max_versions(mut self, max_versions: Option<usize>) -> Self {
        self.max_versions = max_versions;
        self
    }

    #[must_use]
    pub fn administrative(mut self, administrative: bool) -> Self {
        self.administrative = administrative;
        self
    }

    fn bypasses_element_visibility(&self) -> bool {
        self.administrative && self.fetch_hints.include_hidden()
    }
}

// =============================================================================
// NORMALIZATION
// =============================================================================

/// A mutation-like value the normalizer can order and prune.
trait Versioned {
    fn timestamp(&self) -> Timestamp;
    fn column(&self, element_type: ElementType) -> Column;
    fn is_tombstone(&self) -> bool;
}

impl Versioned for Mutation {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn column(&self, element_type: ElementType) -> Column {
        Mutation::column(self, element_type)
    }

    fn is_tombstone(&self) -> bool {
        Mutation::is_tombstone(self)
    }
}

impl Versioned for ExtendedDataMutation {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn column(&self, _element_type: ElementType) -> Column {
        ExtendedDataMutation::column(self)
    }

    fn is_tombstone(&self) -> bool {
        ExtendedDataMutation::is_tombstone(self)
    }
}

struct Entry<M> {
    mutation: M,
    column: Column,
    tombstone: bool,
    arrival: usize,
}

struct NormalizeOptions {
    as_of: Option<Timestamp>,
    max_versions: Option<usize>,
    apply_tombstones: bool,
}

/// Whether `tombstone` (a tombstone's column) removes versions of `column`.
fn tombstone_covers(tombstone: &Column, column: &Column) -> bool {
    if tombstone == column {
        return true;
    }
    if tombstone.family != CF_PROPERTY || column.family != CF_PROPERTY_METADATA {
        return false;
    }
    let mut prefix = tombstone.qualifier.clone();
    prefix.push(VALUE_SEPARATOR);
    prefix.push_str(tombstone.visibility.as_str());
    prefix.push(VALUE_SEPARATOR);
    column.qualifier.starts_with(&prefix)
}

fn normalize<M: Versioned>(
    element_type: ElementType,
    mutations: Vec<M>,
    options: &NormalizeOptions,
) -> Vec<Entry<M>> {
    let mut entries: Vec<Entry<M>> = mutations
        .into_iter()
        .enumerate()
        .filter(|(_, m)| options.as_of.is_none_or(|ceiling| m.timestamp() <= ceiling))
        .map(|(arrival, mutation)| Entry {
            column: mutation.column(element_type),
            tombstone: mutation.is_tombstone(),
            arrival,
            mutation,
        })
        .collect();

    if options.apply_tombstones {
        let tombstones: Vec<(Column, Timestamp)> = entries
            .iter()
            .filter(|e| e.tombstone)
            .map(|e| (e.column.clone(), e.mutation.timestamp()))
            .collect();
        entries.retain(|e| {
            !e.tombstone
                && !tombstones.iter().any(|(column, ts)| {
                    *ts >= e.mutation.timestamp() && tombstone_covers(column, &e.column)
                })
        });
    }

    entries.sort_by(|a, b| {
        a.mutation
            .timestamp()
            .cmp(&b.mutation.timestamp())
            .then_with(|| a.column.cmp(&b.column))
            .then_with(|| b.tombstone.cmp(&a.tombstone))
            .then_with(|| a.arrival.cmp(&b.arrival))
    });

    let mut deduped: Vec<Entry<M>> = Vec::with_capacity(entries.len());
    for entry in entries {
        match deduped.last_mut() {
            Some(previous)
                if previous.mutation.timestamp() == entry.mutation.timestamp()
                    && previous.column == entry.column
                    && previous.tombstone == entry.tombstone =>
            {
                *previous = entry;
            }
            _ => deduped.push(entry),
        }
    }

    if let Some(max_versions) = options.max_versions {
        let max_versions = max_versions.max(1);
        let mut seen: BTreeMap<(&Column, bool), usize> = BTreeMap::new();
        let mut keep = vec![false; deduped.len()];
        for (i, entry) in deduped.iter().enumerate().rev() {
            let count = seen.entry((&entry.column, entry.tombstone)).or_insert(0);
            *count += 1;
            keep[i] = *count <= max_versions;
        }
        let mut keep = keep.into_iter();
        deduped.retain(|_| keep.next().unwrap_or(false));
    }

    deduped
}

/// Split inline property metadata into separate metadata mutations, the
/// same shape the columnar layout stores.
fn expand_property_metadata(mutations: &[Mutation]) -> Vec<Mutation> {
    let mut expanded = Vec::with_capacity(mutations.len());
    for mutation in mutations {
        match &mutation.kind {
            MutationKind::AddPropertyValue {
                key,
                name,
                value,
                metadata,
                visibility,
            } if !metadata.is_empty() => {
                expanded.push(Mutation::new(
                    mutation.timestamp,
                    MutationKind::AddPropertyValue {
                        key: key.clone(),
                        name: name.clone(),
                        value: value.clone(),
                        metadata: Metadata::new(),
                        visibility: visibility.clone(),
                    },
                ));
                for (metadata_name, metadata_visibility, metadata_value) in metadata.entries() {
                    expanded.push(Mutation::new(
                        mutation.timestamp,
                        MutationKind::SetPropertyMetadata {
                            key: key.clone(),
                            name: name.clone(),
                            property_visibility: visibility.clone(),
                            metadata_name: metadata_name.to_string(),
                            value: metadata_value.clone(),
                            visibility: metadata_visibility.clone(),
                        },
                    ));
                }
            }
            _ => expanded.push(mutation.clone()),
        }
    }
    expanded
}

fn is_hard_deleted(mutations: &[Mutation]) -> bool {
    mutations
        .iter()
        .any(|m| matches!(m.kind, MutationKind::DeleteRow))
}

// =============================================================================
// FOLD
// =============================================================================

/// Latest hide/show marker for one hiding visibility.
#[derive(Debug, Clone, Copy)]
struct Marker {
    timestamp: Timestamp,
    hidden: bool,
}

type PropertyKey<'a> = (&'a str, &'a str, &'a Visibility);
type EdgeRefKey<'a> = (Direction, &'a str, &'a Visibility);
type Markers<'a> = BTreeMap<&'a Visibility, Marker>;

struct EdgeRefState<'a> {
    timestamp: Timestamp,
    other_vertex_id: &'a str,
    label: &'a str,
}

#[derive(Default)]
struct RowState<'a> {
    signal: Option<(Timestamp, &'a Visibility)>,
    first_timestamp: Option<Timestamp>,
    label: Option<&'a str>,
    setup: Option<(&'a str, &'a str)>,
    soft_deleted_at: Option<Timestamp>,
    hides: Markers<'a>,
    additional: BTreeMap<&'a Visibility, bool>,
    properties: BTreeMap<PropertyKey<'a>, (Timestamp, &'a Value)>,
    property_soft_deletes: BTreeMap<PropertyKey<'a>, Timestamp>,
    property_hides: BTreeMap<PropertyKey<'a>, Markers<'a>>,
    metadata: BTreeMap<PropertyKey<'a>, BTreeMap<(&'a str, &'a Visibility), &'a Value>>,
    edge_refs: BTreeMap<EdgeRefKey<'a>, EdgeRefState<'a>>,
    edge_ref_soft_deletes: BTreeMap<EdgeRefKey<'a>, Timestamp>,
    edge_ref_hides: BTreeMap<EdgeRefKey<'a>, Markers<'a>>,
    extended_tables: BTreeSet<&'a str>,
}

impl<'a> RowState<'a> {
    fn fold(entries: &'a [Entry<Mutation>]) -> Self {
        let mut state = Self::default();
        for entry in entries {
            state.apply(&entry.mutation);
        }
        state
    }

    fn apply(&mut self, mutation: &'a Mutation) {
        let ts = mutation.timestamp;
        if self.first_timestamp.is_none() {
            self.first_timestamp = Some(ts);
        }
        match &mutation.kind {
            MutationKind::AddPropertyValue {
                key,
                name,
                value,
                visibility,
                ..
            } => {
                self.properties
                    .insert((key.as_str(), name.as_str(), visibility), (ts, value));
            }
            MutationKind::SoftDeletePropertyValue {
                key,
                name,
                visibility,
                ..
            } => {
                self.property_soft_deletes
                    .insert((key.as_str(), name.as_str(), visibility), ts);
            }
            MutationKind::MarkPropertyHidden {
                key,
                name,
                property_visibility,
                visibility,
                ..
            } => {
                self.property_hides
                    .entry((key.as_str(), name.as_str(), property_visibility))
                    .or_default()
                    .insert(visibility, Marker { timestamp: ts, hidden: true });
            }
            MutationKind::MarkPropertyVisible {
                key,
                name,
                property_visibility,
                visibility,
                ..
            } => {
                self.property_hides
                    .entry((key.as_str(), name.as_str(), property_visibility))
                    .or_default()
                    .insert(visibility, Marker { timestamp: ts, hidden: false });
            }
            MutationKind::SetPropertyMetadata {
                key,
                name,
                property_visibility,
                metadata_name,
                value,
                visibility,
            } => {
                self.metadata
                    .entry((key.as_str(), name.as_str(), property_visibility))
                    .or_default()
                    .insert((metadata_name.as_str(), visibility), value);
            }
            MutationKind::AlterVisibility { visibility, .. } => {
                self.signal = Some((ts, visibility));
            }
            MutationKind::AlterEdgeLabel { label } => self.label = Some(label),
            MutationKind::EdgeSetup {
                out_vertex_id,
                in_vertex_id,
            } => self.setup = Some((out_vertex_id, in_vertex_id)),
            MutationKind::AddAdditionalVisibility { visibility, .. } => {
                self.additional.insert(visibility, true);
            }
            MutationKind::DeleteAdditionalVisibility { visibility, .. } => {
                self.additional.insert(visibility, false);
            }
            MutationKind::SoftDeleteElement { .. } => self.soft_deleted_at = Some(ts),
            MutationKind::MarkElementHidden { visibility, .. } => {
                self.hides
                    .insert(visibility, Marker { timestamp: ts, hidden: true });
            }
            MutationKind::MarkElementVisible { visibility, .. } => {
                self.hides
                    .insert(visibility, Marker { timestamp: ts, hidden: false });
            }
            MutationKind::AddEdgeRef {
                direction,
                edge_id,
                other_vertex_id,
                label,
                visibility,
            } => {
                self.edge_refs.insert(
                    (*direction, edge_id.as_str(), visibility),
                    EdgeRefState {
                        timestamp: ts,
                        other_vertex_id,
                        label,
                    },
                );
            }
            MutationKind::SoftDeleteEdgeRef {
                direction,
                edge_id,
                visibility,
                ..
            } => {
                self.edge_ref_soft_deletes
                    .insert((*direction, edge_id.as_str(), visibility), ts);
            }
            MutationKind::MarkEdgeRefHidden {
                direction,
                edge_id,
                edge_visibility,
                visibility,
                ..
            } => {
                self.edge_ref_hides
                    .entry((*direction, edge_id.as_str(), edge_visibility))
                    .or_default()
                    .insert(visibility, Marker { timestamp: ts, hidden: true });
            }
            MutationKind::MarkEdgeRefVisible {
                direction,
                edge_id,
                edge_visibility,
                visibility,
                ..
            } => {
                self.edge_ref_hides
                    .entry((*direction, edge_id.as_str(), edge_visibility))
                    .or_default()
                    .insert(visibility, Marker { timestamp: ts, hidden: false });
            }
            MutationKind::AddExtendedDataTable { table_name } => {
                self.extended_tables.insert(table_name);
            }
            // Tombstones were applied during normalization; the row-delete
            // marker never reaches the fold.
            MutationKind::DeletePropertyValue { .. }
            | MutationKind::DeleteEdgeRef { .. }
            | MutationKind::ElementTimestamp
            | MutationKind::DeleteRow => {}
        }
    }

    fn exists(&self) -> bool {
        self.signal.is_some() || self.setup.is_some() || !self.properties.is_empty()
    }
}

/// Hiding visibilities whose latest marker is a hide at or after `since`.
fn active_hides(markers: Option<&Markers<'_>>, since: Option<Timestamp>) -> BTreeSet<Visibility> {
    markers
        .into_iter()
        .flatten()
        .filter(|(_, marker)| marker.hidden && since.is_none_or(|since| marker.timestamp >= since))
        .map(|(visibility, _)| (*visibility).clone())
        .collect()
}

// =============================================================================
// MATERIALIZE
// =============================================================================

/// Fold one element's mutations into its current view.
///
/// Returns `Ok(None)` when the element is absent, hard-deleted,
/// soft-deleted, hidden from the requester, or unreadable. Errors only on
/// a corrupt row (an edge without label or endpoints).
pub fn materialize(
    element_type: ElementType,
    id: &str,
    mutations: &[Mutation],
    ctx: &ReadContext,
) -> Result<Option<Element>, TesseraError> {
    if is_hard_deleted(mutations) {
        return Ok(None);
    }
    let Some(timestamp) = mutations
        .iter()
        .map(|m| m.timestamp)
        .filter(|ts| ctx.as_of.is_none_or(|ceiling| *ts <= ceiling))
        .max()
    else {
        return Ok(None);
    };

    let entries = normalize(
        element_type,
        expand_property_metadata(mutations),
        &NormalizeOptions {
            as_of: ctx.as_of,
            max_versions: ctx.max_versions,
            apply_tombstones: true,
        },
    );
    let state = RowState::fold(&entries);
    if !state.exists() {
        return Ok(None);
    }

    let auths = &ctx.authorizations;
    let hints = &ctx.fetch_hints;

    let visibility = state
        .signal
        .map(|(_, v)| v.clone())
        .unwrap_or_default();
    if !auths.can_read(&visibility) && !ctx.bypasses_element_visibility() {
        return Ok(None);
    }

    let created_at = state.signal.map(|(ts, _)| ts).or(state.first_timestamp);
    if let (Some(deleted), Some(created)) = (state.soft_deleted_at, created_at) {
        if deleted >= created {
            return Ok(None);
        }
    }

    let hidden_visibilities = active_hides(Some(&state.hides), None);
    if !hints.include_hidden() && hidden_for(&hidden_visibilities, auths) {
        return Ok(None);
    }

    let additional_visibilities: BTreeSet<Visibility> = state
        .additional
        .iter()
        .filter(|(_, active)| **active)
        .map(|(v, _)| (*v).clone())
        .collect();
    if !hints.ignore_additional_visibilities()
        && additional_visibilities.iter().any(|v| !auths.can_read(v))
    {
        return Ok(None);
    }

    let properties = materialize_properties(&state, ctx);

    let kind = match element_type {
        ElementType::Vertex => {
            let visible_refs = materialize_edge_refs(&state, ctx);
            let edges_summary = if hints.include_edge_labels_and_counts() {
                EdgesSummary::from_edge_infos(&visible_refs)
            } else {
                EdgesSummary::default()
            };
            let edge_infos = visible_refs
                .into_iter()
                .filter(|info| hints.includes_edge_refs(info.direction, &info.label))
                .collect();
            ElementKind::Vertex {
                edge_infos,
                edges_summary,
            }
        }
        ElementType::Edge => {
            let label = state
                .label
                .ok_or_else(|| TesseraError::corrupt(id, "edge has no label"))?;
            let (out_vertex_id, in_vertex_id) = state
                .setup
                .ok_or_else(|| TesseraError::corrupt(id, "edge has no endpoints"))?;
            ElementKind::Edge {
                out_vertex_id: out_vertex_id.to_string(),
                in_vertex_id: in_vertex_id.to_string(),
                label: label.to_string(),
            }
        }
    };

    let extended_data_table_names = if hints.include_extended_data_table_names() {
        state.extended_tables.iter().map(|t| (*t).to_string()).collect()
    } else {
        BTreeSet::new()
    };

    Ok(Some(Element {
        id: id.to_string(),
        visibility,
        timestamp,
        properties,
        hidden_visibilities,
        additional_visibilities,
        extended_data_table_names,
        fetch_hints: hints.clone(),
        kind,
    }))
}

fn materialize_properties(state: &RowState<'_>, ctx: &ReadContext) -> Vec<Property> {
    let auths = &ctx.authorizations;
    let hints = &ctx.fetch_hints;
    let mut properties = Vec::new();
    for (property_key, (ts, value)) in &state.properties {
        let (key, name, visibility) = *property_key;
        if !hints.includes_property(name) || !auths.can_read(visibility) {
            continue;
        }
        if state
            .property_soft_deletes
            .get(property_key)
            .is_some_and(|deleted| deleted >= ts)
        {
            continue;
        }
        let hidden = active_hides(state.property_hides.get(property_key), Some(*ts));
        if !hints.include_hidden() && hidden_for(&hidden, auths) {
            continue;
        }

        let mut property = Property::new(
            key.to_string(),
            name.to_string(),
            (*value).clone(),
            visibility.clone(),
            *ts,
        );
        property.hidden_visibilities = hidden;
        if hints.is_include_property_metadata() {
            let mut metadata = Metadata::new();
            for ((metadata_name, metadata_visibility), metadata_value) in
                state.metadata.get(property_key).into_iter().flatten()
            {
                if hints.includes_property_metadata(metadata_name)
                    && auths.can_read(metadata_visibility)
                {
                    metadata.add(
                        *metadata_name,
                        (*metadata_value).clone(),
                        (*metadata_visibility).clone(),
                    );
                }
            }
            property.set_metadata(metadata, hints);
        }
        properties.push(property);
    }
    properties
}

/// Every edge reference the requester may see, before direction and label
/// filtering.
fn materialize_edge_refs(state: &RowState<'_>, ctx: &ReadContext) -> Vec<EdgeInfo> {
    let auths = &ctx.authorizations;
    let hints = &ctx.fetch_hints;
    if !hints.is_include_edge_refs() && !hints.include_edge_labels_and_counts() {
        return Vec::new();
    }
    let mut infos = Vec::new();
    for (ref_key, edge_ref) in &state.edge_refs {
        let (direction, edge_id, visibility) = *ref_key;
        if !auths.can_read(visibility) {
            continue;
        }
        if state
            .edge_ref_soft_deletes
            .get(ref_key)
            .is_some_and(|deleted| *deleted >= edge_ref.timestamp)
        {
            continue;
        }
        let hidden = active_hides(state.edge_ref_hides.get(ref_key), Some(edge_ref.timestamp));
        if !hints.include_hidden() && hidden_for(&hidden, auths) {
            continue;
        }
        infos.push(EdgeInfo {
            edge_id: edge_id.to_string(),
            other_vertex_id: edge_ref.other_vertex_id.to_string(),
            label: edge_ref.label.to_string(),
            direction,
            visibility: visibility.clone(),
            timestamp: edge_ref.timestamp,
            hidden_visibilities: hidden,
        });
    }
    infos
}

// =============================================================================
// HISTORY
// =============================================================================

/// Chronological events of one element.
///
/// Returns every event the requester may see; ordinals are assigned over
/// the complete history first, so they do not depend on the requester.
/// Windowing, resumption and limits are applied by
/// [`HistoricalEventsFetchHints::apply_to_results`].
pub fn historical_events(
    element_type: ElementType,
    id: &str,
    mutations: &[Mutation],
    authorizations: &Authorizations,
    hints: &HistoricalEventsFetchHints,
) -> Result<Vec<HistoricalEvent>, TesseraError> {
    if is_hard_deleted(mutations) {
        return Ok(Vec::new());
    }
    let mut entries = normalize(
        element_type,
        expand_property_metadata(mutations),
        &NormalizeOptions {
            as_of: None,
            max_versions: None,
            apply_tombstones: false,
        },
    );
    // Signals lead their timestamp so creation precedes what it created.
    entries.sort_by_key(|e| {
        (
            e.mutation.timestamp,
            !matches!(e.mutation.kind, MutationKind::AlterVisibility { .. }),
        )
    });

    let current_visibility = entries
        .iter()
        .rev()
        .find_map(|e| match &e.mutation.kind {
            MutationKind::AlterVisibility { visibility, .. } => Some(visibility.clone()),
            _ => None,
        })
        .unwrap_or_default();
    if !authorizations.can_read(&current_visibility) {
        return Ok(Vec::new());
    }

    let created_at = entries.iter().find_map(|e| match e.mutation.kind {
        MutationKind::AlterVisibility { .. } => Some(e.mutation.timestamp),
        _ => None,
    });
    let setup = entries.iter().find_map(|e| match &e.mutation.kind {
        MutationKind::EdgeSetup {
            out_vertex_id,
            in_vertex_id,
        } => Some((out_vertex_id.clone(), in_vertex_id.clone())),
        _ => None,
    });
    let create_label = entries
        .iter()
        .rev()
        .filter(|e| Some(e.mutation.timestamp) == created_at)
        .find_map(|e| match &e.mutation.kind {
            MutationKind::AlterEdgeLabel { label } => Some(label.clone()),
            _ => None,
        });

    // Metadata written together with a property is reported inside the
    // property's add event.
    let added: BTreeSet<(Timestamp, PropertyKey<'_>)> = entries
        .iter()
        .filter_map(|e| match &e.mutation.kind {
            MutationKind::AddPropertyValue {
                key,
                name,
                visibility,
                ..
            } => Some((e.mutation.timestamp, (key.as_str(), name.as_str(), visibility))),
            _ => None,
        })
        .collect();
    let mut merged_metadata: BTreeMap<(Timestamp, PropertyKey<'_>), Metadata> = BTreeMap::new();
    for entry in &entries {
        if let MutationKind::SetPropertyMetadata {
            key,
            name,
            property_visibility,
            metadata_name,
            value,
            visibility,
        } = &entry.mutation.kind
        {
            let target = (
                entry.mutation.timestamp,
                (key.as_str(), name.as_str(), property_visibility),
            );
            if added.contains(&target)
                && hints.include_property_values
                && authorizations.can_read(visibility)
            {
                merged_metadata.entry(target).or_default().add(
                    metadata_name.clone(),
                    value.clone(),
                    visibility.clone(),
                );
            }
        }
    }

    let value_of = |value: &Value| hints.include_property_values.then(|| value.clone());
    let mut previous_visibility: Option<&Visibility> = None;
    let mut current_label = create_label.clone();
    let mut last_timestamp = None;
    let mut ordinal: u32 = 0;
    let mut events = Vec::new();

    for entry in &entries {
        let ts = entry.mutation.timestamp;
        let event = match &entry.mutation.kind {
            MutationKind::AlterVisibility { visibility, data } => {
                let kind = match previous_visibility {
                    None => match element_type {
                        ElementType::Vertex => HistoricalEventKind::AddVertex {
                            visibility: visibility.clone(),
                            data: data.clone(),
                        },
                        ElementType::Edge => {
                            let (out_vertex_id, in_vertex_id) = setup.clone().unwrap_or_default();
                            HistoricalEventKind::AddEdge {
                                visibility: visibility.clone(),
                                label: create_label.clone().unwrap_or_default(),
                                out_vertex_id,
                                in_vertex_id,
                                data: data.clone(),
                            }
                        }
                    },
                    Some(old) => HistoricalEventKind::AlterVisibility {
                        old_visibility: old.clone(),
                        new_visibility: visibility.clone(),
                        data: data.clone(),
                    },
                };
                previous_visibility = Some(visibility);
                Some((kind, true))
            }
            MutationKind::AlterEdgeLabel { label } => {
                if Some(ts) == created_at {
                    None
                } else {
                    let old_label = current_label.replace(label.clone());
                    Some((
                        HistoricalEventKind::AlterEdgeLabel {
                            old_label,
                            new_label: label.clone(),
                        },
                        true,
                    ))
                }
            }
            MutationKind::EdgeSetup { .. }
            | MutationKind::ElementTimestamp
            | MutationKind::DeleteRow => None,
            MutationKind::AddPropertyValue {
                key,
                name,
                value,
                visibility,
                ..
            } => Some((
                HistoricalEventKind::AddProperty {
                    key: key.clone(),
                    name: name.clone(),
                    visibility: visibility.clone(),
                    value: value_of(value),
                    metadata: merged_metadata
                        .remove(&(ts, (key.as_str(), name.as_str(), visibility)))
                        .unwrap_or_default(),
                },
                authorizations.can_read(visibility),
            )),
            MutationKind::DeletePropertyValue {
                key,
                name,
                visibility,
            } => Some((
                HistoricalEventKind::DeleteProperty {
                    key: key.clone(),
                    name: name.clone(),
                    visibility: visibility.clone(),
                },
                authorizations.can_read(visibility),
            )),
            MutationKind::SoftDeletePropertyValue {
                key,
                name,
                visibility,
                data,
            } => Some((
                HistoricalEventKind::SoftDeleteProperty {
                    key: key.clone(),
                    name: name.clone(),
                    visibility: visibility.clone(),
                    data: data.clone(),
                },
                authorizations.can_read(visibility),
            )),
            MutationKind::MarkPropertyHidden {
                key,
                name,
                property_visibility,
                visibility,
                data,
            } => Some((
                HistoricalEventKind::MarkPropertyHidden {
                    key: key.clone(),
                    name: name.clone(),
                    property_visibility: property_visibility.clone(),
                    hidden_visibility: visibility.clone(),
                    data: data.clone(),
                },
                authorizations.can_read(property_visibility),
            )),
            MutationKind::MarkPropertyVisible {
                key,
                name,
                property_visibility,
                visibility,
                data,
            } => Some((
                HistoricalEventKind::MarkPropertyVisible {
                    key: key.clone(),
                    name: name.clone(),
                    property_visibility: property_visibility.clone(),
                    hidden_visibility: visibility.clone(),
                    data: data.clone(),
                },
                authorizations.can_read(property_visibility),
            )),
            MutationKind::SetPropertyMetadata {
                key,
                name,
                property_visibility,
                metadata_name,
                value,
                visibility,
            } => {
                if added.contains(&(ts, (key.as_str(), name.as_str(), property_visibility))) {
                    None
                } else {
                    Some((
                        HistoricalEventKind::SetPropertyMetadata {
                            key: key.clone(),
                            name: name.clone(),
                            property_visibility: property_visibility.clone(),
                            metadata_name: metadata_name.clone(),
                            visibility: visibility.clone(),
                            value: value_of(value),
                        },
                        authorizations.can_read(property_visibility)
                            && authorizations.can_read(visibility),
                    ))
                }
            }
            MutationKind::AddAdditionalVisibility { visibility, data } => Some((
                HistoricalEventKind::AddAdditionalVisibility {
                    visibility: visibility.clone(),
                    data: data.clone(),
                },
                true,
            )),
            MutationKind::DeleteAdditionalVisibility { visibility, data } => Some((
                HistoricalEventKind::DeleteAdditionalVisibility {
                    visibility: visibility.clone(),
                    data: data.clone(),
                },
                true,
            )),
            MutationKind::SoftDeleteElement { data } => Some((
                HistoricalEventKind::SoftDeleteElement { data: data.clone() },
                true,
            )),
            MutationKind::MarkElementHidden { visibility, data } => Some((
                HistoricalEventKind::MarkHidden {
                    hidden_visibility: visibility.clone(),
                    data: data.clone(),
                },
                true,
            )),
            MutationKind::MarkElementVisible { visibility, data } => Some((
                HistoricalEventKind::MarkVisible {
                    hidden_visibility: visibility.clone(),
                    data: data.clone(),
                },
                true,
            )),
            MutationKind::AddEdgeRef {
                direction,
                edge_id,
                other_vertex_id,
                label,
                visibility,
            } => Some((
                HistoricalEventKind::AddEdgeRef {
                    direction: *direction,
                    edge_id: edge_id.clone(),
                    other_vertex_id: other_vertex_id.clone(),
                    label: label.clone(),
                    edge_visibility: visibility.clone(),
                },
                authorizations.can_read(visibility),
            )),
            MutationKind::DeleteEdgeRef {
                direction,
                edge_id,
                visibility,
            } => Some((
                HistoricalEventKind::DeleteEdgeRef {
                    direction: *direction,
                    edge_id: edge_id.clone(),
                    edge_visibility: visibility.clone(),
                },
                authorizations.can_read(visibility),
            )),
            MutationKind::SoftDeleteEdgeRef {
                direction,
                edge_id,
                visibility,
                data,
            } => Some((
                HistoricalEventKind::SoftDeleteEdgeRef {
                    direction: *direction,
                    edge_id: edge_id.clone(),
                    edge_visibility: visibility.clone(),
                    data: data.clone(),
                },
                authorizations.can_read(visibility),
            )),
            MutationKind::MarkEdgeRefHidden {
                direction,
                edge_id,
                edge_visibility,
                visibility,
                data,
            } => Some((
                HistoricalEventKind::MarkEdgeRefHidden {
                    direction: *direction,
                    edge_id: edge_id.clone(),
                    edge_visibility: edge_visibility.clone(),
                    hidden_visibility: visibility.clone(),
                    data: data.clone(),
                },
                authorizations.can_read(edge_visibility),
            )),
            MutationKind::MarkEdgeRefVisible {
                direction,
                edge_id,
                edge_visibility,
                visibility,
                data,
            } => Some((
                HistoricalEventKind::MarkEdgeRefVisible {
                    direction: *direction,
                    edge_id: edge_id.clone(),
                    edge_visibility: edge_visibility.clone(),
                    hidden_visibility: visibility.clone(),
                    data: data.clone(),
                },
                authorizations.can_read(edge_visibility),
            )),
            MutationKind::AddExtendedDataTable { table_name } => Some((
                HistoricalEventKind::AddExtendedDataTable {
                    table_name: table_name.clone(),
                },
                true,
            )),
        };

        let Some((kind, readable)) = event else {
            continue;
        };
        if last_timestamp != Some(ts) {
            last_timestamp = Some(ts);
            ordinal = 0;
        }
        let event_id = HistoricalEventId {
            timestamp: ts,
            ordinal,
            element_type,
            element_id: id.to_string(),
        };
        ordinal = ordinal.saturating_add(1);
        if readable {
            events.push(HistoricalEvent { id: event_id, kind });
        }
    }

    Ok(events)
}

// =============================================================================
// EXTENDED DATA
// =============================================================================

/// Fold one extended-data row. Rows with no readable cell are absent.
pub fn fold_extended_row(
    id: &ExtendedDataRowId,
    mutations: &[ExtendedDataMutation],
    ctx: &ReadContext,
) -> Result<Option<ExtendedDataRow>, TesseraError> {
    if mutations
        .iter()
        .any(|m| matches!(m.kind, ExtendedDataMutationKind::DeleteRow))
    {
        return Ok(None);
    }
    let entries = normalize(
        id.element_type,
        mutations.to_vec(),
        &NormalizeOptions {
            as_of: ctx.as_of,
            max_versions: ctx.max_versions,
            apply_tombstones: true,
        },
    );
    let Some(timestamp) = entries.iter().map(|e| e.mutation.timestamp).max() else {
        return Ok(None);
    };

    type CellKey<'a> = (&'a str, &'a str, &'a Visibility);
    let mut cells: BTreeMap<CellKey<'_>, (Timestamp, &Value)> = BTreeMap::new();
    let mut soft_deletes: BTreeMap<CellKey<'_>, Timestamp> = BTreeMap::new();
    let mut additional: BTreeMap<&Visibility, bool> = BTreeMap::new();
    for entry in &entries {
        let ts = entry.mutation.timestamp;
        match &entry.mutation.kind {
            ExtendedDataMutationKind::SetCell {
                column,
                key,
                value,
                visibility,
            } => {
                cells.insert((column.as_str(), key.as_str(), visibility), (ts, value));
            }
            ExtendedDataMutationKind::SoftDeleteCell {
                column,
                key,
                visibility,
                ..
            } => {
                soft_deletes.insert((column.as_str(), key.as_str(), visibility), ts);
            }
            ExtendedDataMutationKind::AddAdditionalVisibility { visibility, .. } => {
                additional.insert(visibility, true);
            }
            ExtendedDataMutationKind::DeleteAdditionalVisibility { visibility, .. } => {
                additional.insert(visibility, false);
            }
            ExtendedDataMutationKind::DeleteCell { .. } | ExtendedDataMutationKind::DeleteRow => {}
        }
    }

    let auths = &ctx.authorizations;
    let additional_visibilities: BTreeSet<Visibility> = additional
        .into_iter()
        .filter(|(_, active)| *active)
        .map(|(v, _)| v.clone())
        .collect();
    if !ctx.fetch_hints.ignore_additional_visibilities()
        && additional_visibilities.iter().any(|v| !auths.can_read(v))
    {
        return Ok(None);
    }

    let cells: Vec<ExtendedDataCell> = cells
        .into_iter()
        .filter(|(cell_key, (ts, _))| {
            auths.can_read(cell_key.2)
                && !soft_deletes
                    .get(cell_key)
                    .is_some_and(|deleted| deleted >= ts)
        })
        .map(|((column, key, visibility), (ts, value))| ExtendedDataCell {
            column: column.to_string(),
            key: key.to_string(),
            value: value.clone(),
            visibility: visibility.clone(),
            timestamp: ts,
        })
        .collect();
    if cells.is_empty() {
        return Ok(None);
    }

    Ok(Some(ExtendedDataRow {
        id: id.clone(),
        cells,
        additional_visibilities,
        timestamp,
    }))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn vis(expr: &str) -> Visibility {
        Visibility::new(expr).expect("parse")
    }

    fn ctx(labels: &[&str]) -> ReadContext {
        ReadContext::new(Authorizations::new(labels.iter().copied()), FetchHints::all())
    }

    fn vertex(mutations: &[Mutation], ctx: &ReadContext) -> Option<Element> {
        materialize(ElementType::Vertex, "v1", mutations, ctx).expect("materialize")
    }

    fn m(ts: Timestamp, kind: MutationKind) -> Mutation {
        Mutation::new(ts, kind)
    }

    fn created(ts: Timestamp) -> Mutation {
        Mutation::alter_visibility(ts, Visibility::empty())
    }

    fn age(ts: Timestamp, value: i64, visibility: &str) -> Mutation {
        Mutation::add_property(ts, "k1", "age", Value::Integer(value), vis(visibility))
    }

    #[test]
    fn latest_version_of_a_property_wins() {
        let element = vertex(&[created(1), age(10, 30, ""), age(20, 31, "")], &ctx(&[]))
            .expect("exists");
        let properties = element.properties().expect("fetched");
        assert_eq!(properties.len(), 1);
        assert_eq!(properties[0].value, Value::Integer(31));
        assert_eq!(properties[0].timestamp, 20);
        assert_eq!(element.timestamp(), 20);
    }

    #[test]
    fn equal_timestamp_same_column_last_arrival_wins() {
        let element = vertex(&[created(1), age(10, 30, ""), age(10, 99, "")], &ctx(&[]))
            .expect("exists");
        assert_eq!(
            element.property_value("age").expect("fetched"),
            Some(&Value::Integer(99))
        );
    }

    #[test]
    fn soft_delete_suppresses_until_readded() {
        let soft_delete = m(
            200,
            MutationKind::SoftDeletePropertyValue {
                key: "k1".into(),
                name: "age".into(),
                visibility: Visibility::empty(),
                data: None,
            },
        );
        let muts = vec![created(1), age(100, 30, ""), soft_delete];
        let element = vertex(&muts, &ctx(&[])).expect("exists");
        assert!(element.property("age").expect("fetched").is_none());

        let mut readded = muts;
        readded.push(age(300, 32, ""));
        let element = vertex(&readded, &ctx(&[])).expect("exists");
        assert_eq!(
            element.property_value("age").expect("fetched"),
            Some(&Value::Integer(32))
        );
    }

    #[test]
    fn delete_property_removes_older_versions_and_metadata() {
        let add = m(
            10,
            MutationKind::AddPropertyValue {
                key: "k1".into(),
                name: "age".into(),
                value: Value::Integer(1),
                metadata: Metadata::new().with("src", Value::text("a"), Visibility::empty()),
                visibility: Visibility::empty(),
            },
        );
        let delete = m(
            20,
            MutationKind::DeletePropertyValue {
                key: "k1".into(),
                name: "age".into(),
                visibility: Visibility::empty(),
            },
        );
        let element = vertex(&[created(1), add, delete, age(30, 2, "")], &ctx(&[]))
            .expect("exists");
        let property = element.property("age").expect("fetched").expect("re-added");
        assert_eq!(property.value, Value::Integer(2));
        assert!(property.metadata().expect("fetched").is_empty());
    }

    #[test]
    fn multi_visibility_instances_coexist() {
        let muts = [created(1), age(10, 1, "public"), age(10, 2, "secret")];
        let public = vertex(&muts, &ctx(&["public"])).expect("exists");
        assert_eq!(public.properties().expect("fetched").len(), 1);
        let both = vertex(&muts, &ctx(&["public", "secret"])).expect("exists");
        assert_eq!(both.properties_named("age").expect("fetched").len(), 2);
    }

    #[test]
    fn hide_then_show_restores_property() {
        let hide = |ts, hidden: bool| {
            let (key, name) = ("k1".to_string(), "age".to_string());
            let property_visibility = Visibility::empty();
            let visibility = vis("audit");
            m(
                ts,
                if hidden {
                    MutationKind::MarkPropertyHidden {
                        key,
                        name,
                        property_visibility,
                        visibility,
                        data: None,
                    }
                } else {
                    MutationKind::MarkPropertyVisible {
                        key,
                        name,
                        property_visibility,
                        visibility,
                        data: None,
                    }
                },
            )
        };
        let hidden = [created(1), age(10, 30, ""), hide(20, true)];
        assert!(
            vertex(&hidden, &ctx(&[]))
                .expect("exists")
                .property("age")
                .expect("fetched")
                .is_none()
        );
        let readable = vertex(&hidden, &ctx(&["audit"])).expect("exists");
        assert!(readable.property("age").expect("fetched").is_some());

        let admin = ReadContext::new(Authorizations::empty(), FetchHints::all_including_hidden());
        let property = vertex(&hidden, &admin)
            .expect("exists")
            .property("age")
            .expect("fetched")
            .cloned()
            .expect("hidden data included");
        assert!(property.is_hidden(&Authorizations::empty()));

        let shown = [created(1), age(10, 30, ""), hide(20, true), hide(30, false)];
        assert!(
            vertex(&shown, &ctx(&[]))
                .expect("exists")
                .property("age")
                .expect("fetched")
                .is_some()
        );
    }

    #[test]
    fn hide_older_than_property_does_not_apply() {
        let hide = m(
            5,
            MutationKind::MarkPropertyHidden {
                key: "k1".into(),
                name: "age".into(),
                property_visibility: Visibility::empty(),
                visibility: vis("audit"),
                data: None,
            },
        );
        let element = vertex(&[created(1), hide, age(10, 30, "")], &ctx(&[])).expect("exists");
        assert!(element.property("age").expect("fetched").is_some());
    }

    #[test]
    fn hard_delete_wins() {
        let muts = [created(1), age(10, 30, ""), m(20, MutationKind::DeleteRow), created(30)];
        assert!(vertex(&muts, &ctx(&[])).is_none());
        assert!(
            historical_events(
                ElementType::Vertex,
                "v1",
                &muts,
                &Authorizations::empty(),
                &HistoricalEventsFetchHints::all()
            )
            .expect("history")
            .is_empty()
        );
    }

    #[test]
    fn element_visibility_gate_and_admin_bypass() {
        let muts = [Mutation::alter_visibility(1, vis("secret"))];
        assert!(vertex(&muts, &ctx(&[])).is_none());
        assert!(vertex(&muts, &ctx(&["secret"])).is_some());

        let admin = ReadContext::new(Authorizations::empty(), FetchHints::all_including_hidden())
            .administrative(true);
        assert!(vertex(&muts, &admin).is_some());
    }

    #[test]
    fn soft_deleted_element_resurrects_on_recreate() {
        let deleted = [created(1), m(5, MutationKind::SoftDeleteElement { data: None })];
        assert!(vertex(&deleted, &ctx(&[])).is_none());
        let recreated = [
            created(1),
            m(5, MutationKind::SoftDeleteElement { data: None }),
            created(9),
        ];
        assert!(vertex(&recreated, &ctx(&[])).is_some());
    }

    #[test]
    fn element_hide_applies_to_requesters_without_the_label() {
        let muts = [
            created(1),
            m(
                2,
                MutationKind::MarkElementHidden {
                    visibility: vis("a"),
                    data: None,
                },
            ),
        ];
        assert!(vertex(&muts, &ctx(&[])).is_none());
        assert!(vertex(&muts, &ctx(&["a"])).is_some());
    }

    #[test]
    fn additional_visibilities_gate_the_element() {
        let add = m(
            2,
            MutationKind::AddAdditionalVisibility {
                visibility: vis("extra"),
                data: None,
            },
        );
        let muts = vec![created(1), add];
        assert!(vertex(&muts, &ctx(&[])).is_none());
        assert!(vertex(&muts, &ctx(&["extra"])).is_some());

        let ignoring = ReadContext::new(
            Authorizations::empty(),
            FetchHints::builder()
                .include_all_properties(true)
                .ignore_additional_visibilities(true)
                .build()
                .expect("valid"),
        );
        assert!(vertex(&muts, &ignoring).is_some());

        let mut removed = muts;
        removed.push(m(
            3,
            MutationKind::DeleteAdditionalVisibility {
                visibility: vis("extra"),
                data: None,
            },
        ));
        assert!(vertex(&removed, &ctx(&[])).is_some());
    }

    #[test]
    fn as_of_reads_the_past() {
        let muts = [created(1), age(10, 30, ""), age(20, 31, "")];
        let past = vertex(&muts, &ctx(&[]).with_as_of(Some(15))).expect("exists");
        assert_eq!(
            past.property_value("age").expect("fetched"),
            Some(&Value::Integer(30))
        );
        assert!(vertex(&muts, &ctx(&[]).with_as_of(Some(0))).is_none());
    }

    #[test]
    fn max_versions_keeps_newest_per_column() {
        let muts = [created(1), age(1, 1, ""), age(2, 2, ""), age(3, 3, "")];
        let element = vertex(&muts, &ctx(&[]).with_max_versions(Some(1))).expect("exists");
        assert_eq!(
            element.property_value("age").expect("fetched"),
            Some(&Value::Integer(3))
        );
        let history = historical_events(
            ElementType::Vertex,
            "v1",
            &muts,
            &Authorizations::empty(),
            &HistoricalEventsFetchHints::all(),
        )
        .expect("history");
        let adds = history
            .iter()
            .filter(|e| matches!(e.kind, HistoricalEventKind::AddProperty { .. }))
            .count();
        assert_eq!(adds, 3);
    }

    #[test]
    fn edge_requires_label_and_endpoints() {
        let muts = [Mutation::alter_visibility(1, Visibility::empty())];
        let result = materialize(ElementType::Edge, "e1", &muts, &ctx(&[]));
        assert!(matches!(result, Err(TesseraError::CorruptElement { .. })));

        let muts = [
            Mutation::alter_visibility(1, Visibility::empty()),
            m(1, MutationKind::AlterEdgeLabel { label: "knows".into() }),
            m(
                1,
                MutationKind::EdgeSetup {
                    out_vertex_id: "v1".into(),
                    in_vertex_id: "v2".into(),
                },
            ),
            m(5, MutationKind::AlterEdgeLabel { label: "likes".into() }),
        ];
        let edge = materialize(ElementType::Edge, "e1", &muts, &ctx(&[]))
            .expect("materialize")
            .expect("exists");
        assert_eq!(edge.label(), Some("likes"));
        assert_eq!(edge.other_vertex_id("v2"), Some("v1"));
    }

    #[test]
    fn edge_refs_follow_hides_soft_deletes_and_hints() {
        let add_ref = |ts, edge_id: &str, direction| {
            m(
                ts,
                MutationKind::AddEdgeRef {
                    direction,
                    edge_id: edge_id.into(),
                    other_vertex_id: "v2".into(),
                    label: "knows".into(),
                    visibility: Visibility::empty(),
                },
            )
        };
        let muts = [
            created(1),
            add_ref(2, "e1", Direction::Out),
            add_ref(2, "e2", Direction::In),
            add_ref(2, "e3", Direction::Out),
            m(
                3,
                MutationKind::MarkEdgeRefHidden {
                    direction: Direction::Out,
                    edge_id: "e1".into(),
                    edge_visibility: Visibility::empty(),
                    visibility: vis("a"),
                    data: None,
                },
            ),
            m(
                4,
                MutationKind::SoftDeleteEdgeRef {
                    direction: Direction::Out,
                    edge_id: "e3".into(),
                    visibility: Visibility::empty(),
                    data: None,
                },
            ),
        ];
        let element = vertex(&muts, &ctx(&[])).expect("exists");
        assert_eq!(element.edge_ids(Direction::Both).expect("fetched"), vec!["e2"]);
        let element = vertex(&muts, &ctx(&["a"])).expect("exists");
        assert_eq!(
            element.edge_ids(Direction::Both).expect("fetched"),
            vec!["e1", "e2"]
        );
        assert_eq!(
            element.edges_summary().expect("fetched").count(Direction::Both),
            2
        );

        let out_only = ReadContext::new(
            Authorizations::new(["a"]),
            FetchHints::builder()
                .include_out_edge_refs(true)
                .build()
                .expect("valid"),
        );
        let element = vertex(&muts, &out_only).expect("exists");
        assert_eq!(element.edge_ids(Direction::Out).expect("fetched"), vec!["e1"]);
        assert!(element.edge_infos(Direction::In).is_err());
    }

    #[test]
    fn metadata_respects_hints_and_visibility() {
        let add = m(
            10,
            MutationKind::AddPropertyValue {
                key: "k1".into(),
                name: "age".into(),
                value: Value::Integer(30),
                metadata: Metadata::new()
                    .with("source", Value::text("census"), Visibility::empty())
                    .with("confidence", Value::Integer(9), vis("secret")),
                visibility: Visibility::empty(),
            },
        );
        let muts = [created(1), add];
        let element = vertex(&muts, &ctx(&[])).expect("exists");
        let property = element.property("age").expect("fetched").expect("present");
        assert_eq!(property.metadata().expect("fetched").len(), 1);

        let no_metadata = ReadContext::new(
            Authorizations::empty(),
            FetchHints::builder()
                .include_all_properties(true)
                .build()
                .expect("valid"),
        );
        let element = vertex(&muts, &no_metadata).expect("exists");
        let property = element.property("age").expect("fetched").expect("present");
        assert!(matches!(
            property.metadata(),
            Err(TesseraError::MissingFetchHint(_))
        ));
    }

    #[test]
    fn history_merges_creation_and_metadata() {
        let add = m(
            10,
            MutationKind::AddPropertyValue {
                key: "k1".into(),
                name: "age".into(),
                value: Value::Integer(30),
                metadata: Metadata::new().with("source", Value::text("census"), Visibility::empty()),
                visibility: Visibility::empty(),
            },
        );
        let muts = [
            Mutation::alter_visibility(1, Visibility::empty()),
            m(1, MutationKind::AlterEdgeLabel { label: "knows".into() }),
            m(
                1,
                MutationKind::EdgeSetup {
                    out_vertex_id: "v1".into(),
                    in_vertex_id: "v2".into(),
                },
            ),
            add,
            m(20, MutationKind::AlterEdgeLabel { label: "likes".into() }),
        ];
        let events = historical_events(
            ElementType::Edge,
            "e1",
            &muts,
            &Authorizations::empty(),
            &HistoricalEventsFetchHints::all(),
        )
        .expect("history");
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0].kind,
            HistoricalEventKind::AddEdge { label, out_vertex_id, .. }
                if label == "knows" && out_vertex_id == "v1"
        ));
        match &events[1].kind {
            HistoricalEventKind::AddProperty {
                value, metadata, ..
            } => {
                assert_eq!(value, &Some(Value::Integer(30)));
                assert_eq!(metadata.len(), 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            &events[2].kind,
            HistoricalEventKind::AlterEdgeLabel { old_label: Some(old), new_label }
                if old == "knows" && new_label == "likes"
        ));
    }

    #[test]
    fn history_is_empty_for_unreadable_element_and_keeps_ordinals() {
        let muts = [
            created(1),
            age(1, 1, "secret"),
            age(1, 2, "public"),
        ];
        let public = historical_events(
            ElementType::Vertex,
            "v1",
            &muts,
            &Authorizations::new(["public"]),
            &HistoricalEventsFetchHints::default(),
        )
        .expect("history");
        let all = historical_events(
            ElementType::Vertex,
            "v1",
            &muts,
            &Authorizations::new(["public", "secret"]),
            &HistoricalEventsFetchHints::default(),
        )
        .expect("history");
        assert_eq!(all.len(), 3);
        assert_eq!(public.len(), 2);
        assert!(public.iter().all(|e| all.iter().any(|a| a.id == e.id)));
        assert!(matches!(
            &public[1].kind,
            HistoricalEventKind::AddProperty { value: None, .. }
        ));

        let hidden = [Mutation::alter_visibility(1, vis("secret"))];
        assert!(
            historical_events(
                ElementType::Vertex,
                "v1",
                &hidden,
                &Authorizations::empty(),
                &HistoricalEventsFetchHints::all()
            )
            .expect("history")
            .is_empty()
        );
    }

    #[test]
    fn extended_rows_fold_like_properties() {
        let id = ExtendedDataRowId::new(ElementType::Vertex, "v1", "comments", "r1");
        let set = |ts, column: &str, value: &str, visibility: &str| {
            ExtendedDataMutation::new(
                ts,
                ExtendedDataMutationKind::SetCell {
                    column: column.into(),
                    key: String::new(),
                    value: Value::text(value),
                    visibility: vis(visibility),
                },
            )
        };
        let muts = vec![
            set(1, "text", "hello", ""),
            set(2, "text", "hello again", ""),
            set(2, "author", "alice", "secret"),
            ExtendedDataMutation::new(
                3,
                ExtendedDataMutationKind::SoftDeleteCell {
                    column: "author".into(),
                    key: String::new(),
                    visibility: vis("secret"),
                    data: None,
                },
            ),
        ];
        let row = fold_extended_row(&id, &muts, &ctx(&["secret"]))
            .expect("fold")
            .expect("present");
        assert_eq!(row.cells.len(), 1);
        assert_eq!(row.value("text"), Some(&Value::text("hello again")));

        let mut deleted = muts;
        deleted.push(ExtendedDataMutation::new(4, ExtendedDataMutationKind::DeleteRow));
        assert!(fold_extended_row(&id, &deleted, &ctx(&[])).expect("fold").is_none());
    }
}
