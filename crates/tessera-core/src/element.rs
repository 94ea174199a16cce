//! # Materialized Elements
//!
//! Read-only views produced by the materializer:
//! - `Property` identified by the triple (key, name, visibility)
//! - `Metadata` keyed by (name, visibility)
//! - `EdgeInfo` adjacency back-references and the per-label `EdgesSummary`
//! - `Element`, a vertex or an edge
//!
//! Every facet accessor validates the element's [`FetchHints`] and returns
//! [`TesseraError::MissingFetchHint`] for facets that were not fetched.

use crate::visibility::{Authorizations, Visibility};
use crate::{Direction, ElementId, ElementType, FetchHints, TesseraError, Timestamp, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// True when some active hide visibility is unreadable by `authorizations`.
pub(crate) fn hidden_for(
    hidden_visibilities: &BTreeSet<Visibility>,
    authorizations: &Authorizations,
) -> bool {
    hidden_visibilities
        .iter()
        .any(|v| !authorizations.can_read(v))
}

// =============================================================================
// METADATA
// =============================================================================

/// One metadata entry of a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub name: String,
    pub visibility: Visibility,
    pub value: Value,
}

/// Property metadata: at most one value per (name, visibility).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<MetadataEntry>", into = "Vec<MetadataEntry>")]
pub struct Metadata {
    entries: BTreeMap<(String, Visibility), Value>,
}

impl Metadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Metadata::add`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value, visibility: Visibility) -> Self {
        self.add(name, value, visibility);
        self
    }

    /// Insert or replace the entry for (name, visibility).
    pub fn add(&mut self, name: impl Into<String>, value: Value, visibility: Visibility) {
        self.entries.insert((name.into(), visibility), value);
    }

    #[must_use]
    pub fn get(&self, name: &str, visibility: &Visibility) -> Option<&Value> {
        self.entries.get(&(name.to_string(), visibility.clone()))
    }

    /// First value stored under `name`, whatever its visibility.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|((n, _), _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Visibility, &Value)> {
        self.entries
            .iter()
            .map(|((name, visibility), value)| (name.as_str(), visibility, value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<MetadataEntry>> for Metadata {
    fn from(entries: Vec<MetadataEntry>) -> Self {
        let mut metadata = Self::new();
        for entry in entries {
            metadata.add(entry.name, entry.value, entry.visibility);
        }
        metadata
    }
}

impl From<Metadata> for Vec<MetadataEntry> {
    fn from(metadata: Metadata) -> Self {
        metadata
            .entries
            .into_iter()
            .map(|((name, visibility), value)| MetadataEntry {
                name,
                visibility,
                value,
            })
            .collect()
    }
}

// =============================================================================
// PROPERTY
// =============================================================================

/// A materialized property instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub key: String,
    pub name: String,
    pub value: Value,
    pub visibility: Visibility,
    pub timestamp: Timestamp,
    /// Active hide markers. Only non-empty for hidden-inclusive reads or
    /// for requesters able to read every marker.
    pub hidden_visibilities: BTreeSet<Visibility>,
    metadata: Option<Metadata>,
    /// `None` when every metadata key was fetched.
    metadata_keys: Option<BTreeSet<String>>,
}

impl Property {
    pub(crate) fn new(
        key: String,
        name: String,
        value: Value,
        visibility: Visibility,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            key,
            name,
            value,
            visibility,
            timestamp,
            hidden_visibilities: BTreeSet::new(),
            metadata: None,
            metadata_keys: None,
        }
    }

    pub(crate) fn set_metadata(&mut self, metadata: Metadata, fetch_hints: &FetchHints) {
        self.metadata_keys = if fetch_hints.is_include_all_property_metadata() {
            None
        } else {
            Some(fetch_hints.metadata_keys().map(str::to_string).collect())
        };
        self.metadata = Some(metadata);
    }

    /// The (key, name, visibility) triple identifying this instance.
    #[must_use]
    pub fn identity(&self) -> (&str, &str, &Visibility) {
        (&self.key, &self.name, &self.visibility)
    }

    /// Whether the property is hidden from `authorizations`.
    #[must_use]
    pub fn is_hidden(&self, authorizations: &Authorizations) -> bool {
        hidden_for(&self.hidden_visibilities, authorizations)
    }

    pub fn metadata(&self) -> Result<&Metadata, TesseraError> {
        self.metadata
            .as_ref()
            .ok_or_else(|| TesseraError::MissingFetchHint("property metadata".to_string()))
    }

    /// Metadata value for `name`, checked against the fetched metadata keys.
    pub fn metadata_value(&self, name: &str) -> Result<Option<&Value>, TesseraError> {
        let metadata = self.metadata()?;
        if self
            .metadata_keys
            .as_ref()
            .is_some_and(|keys| !keys.contains(name))
        {
            return Err(TesseraError::MissingFetchHint(format!(
                "property metadata {name:?}"
            )));
        }
        Ok(metadata.value(name))
    }
}

// =============================================================================
// EDGE REFERENCES
// =============================================================================

/// Compact back-reference to an incident edge, stored on a vertex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeInfo {
    pub edge_id: String,
    pub other_vertex_id: String,
    pub label: String,
    pub direction: Direction,
    pub visibility: Visibility,
    pub timestamp: Timestamp,
    pub hidden_visibilities: BTreeSet<Visibility>,
}

impl EdgeInfo {
    #[must_use]
    pub fn is_hidden(&self, authorizations: &Authorizations) -> bool {
        hidden_for(&self.hidden_visibilities, authorizations)
    }
}

/// Edge labels and counts per direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgesSummary {
    pub out_edge_counts: BTreeMap<String, u64>,
    pub in_edge_counts: BTreeMap<String, u64>,
}

impl EdgesSummary {
    pub(crate) fn from_edge_infos<'a>(edge_infos: impl IntoIterator<Item = &'a EdgeInfo>) -> Self {
        let mut summary = Self::default();
        for info in edge_infos {
            let counts = match info.direction {
                Direction::In => &mut summary.in_edge_counts,
                Direction::Out | Direction::Both => &mut summary.out_edge_counts,
            };
            *counts.entry(info.label.clone()).or_insert(0) += 1;
        }
        summary
    }

    #[must_use]
    pub fn count(&self, direction: Direction) -> u64 {
        let out: u64 = self.out_edge_counts.values().sum();
        let inbound: u64 = self.in_edge_counts.values().sum();
        match direction {
            Direction::Out => out,
            Direction::In => inbound,
            Direction::Both => out + inbound,
        }
    }

    #[must_use]
    pub fn labels(&self, direction: Direction) -> BTreeSet<&str> {
        let out = self.out_edge_counts.keys().map(String::as_str);
        let inbound = self.in_edge_counts.keys().map(String::as_str);
        match direction {
            Direction::Out => out.collect(),
            Direction::In => inbound.collect(),
            Direction::Both => out.chain(inbound).collect(),
        }
    }
}

// =============================================================================
// ELEMENT
// =============================================================================

/// Element-kind specific state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementKind {
    Vertex {
        edge_infos: Vec<EdgeInfo>,
        edges_summary: EdgesSummary,
    },
    Edge {
        out_vertex_id: String,
        in_vertex_id: String,
        label: String,
    },
}

/// A materialized vertex or edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub(crate) id: String,
    pub(crate) visibility: Visibility,
    pub(crate) timestamp: Timestamp,
    pub(crate) properties: Vec<Property>,
    pub(crate) hidden_visibilities: BTreeSet<Visibility>,
    pub(crate) additional_visibilities: BTreeSet<Visibility>,
    pub(crate) extended_data_table_names: BTreeSet<String>,
    pub(crate) fetch_hints: FetchHints,
    pub(crate) kind: ElementKind,
}

impl Element {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn element_type(&self) -> ElementType {
        match self.kind {
            ElementKind::Vertex { .. } => ElementType::Vertex,
            ElementKind::Edge { .. } => ElementType::Edge,
        }
    }

    #[must_use]
    pub fn element_id(&self) -> ElementId {
        ElementId {
            element_type: self.element_type(),
            id: self.id.clone(),
        }
    }

    #[must_use]
    pub fn visibility(&self) -> &Visibility {
        &self.visibility
    }

    /// Timestamp of the latest mutation folded into this view.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    #[must_use]
    pub fn fetch_hints(&self) -> &FetchHints {
        &self.fetch_hints
    }

    #[must_use]
    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    #[must_use]
    pub fn hidden_visibilities(&self) -> &BTreeSet<Visibility> {
        &self.hidden_visibilities
    }

    #[must_use]
    pub fn is_hidden(&self, authorizations: &Authorizations) -> bool {
        hidden_for(&self.hidden_visibilities, authorizations)
    }

    #[must_use]
    pub fn additional_visibilities(&self) -> &BTreeSet<Visibility> {
        &self.additional_visibilities
    }

    // -------------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------------

    /// All fetched property instances, ordered by (key, name, visibility).
    pub fn properties(&self) -> Result<&[Property], TesseraError> {
        self.fetch_hints.check_properties()?;
        Ok(&self.properties)
    }

    /// Every instance named `name` (all keys and visibilities).
    pub fn properties_named(&self, name: &str) -> Result<Vec<&Property>, TesseraError> {
        self.fetch_hints.check_property(name)?;
        Ok(self.properties.iter().filter(|p| p.name == name).collect())
    }

    /// First instance named `name`.
    pub fn property(&self, name: &str) -> Result<Option<&Property>, TesseraError> {
        self.fetch_hints.check_property(name)?;
        Ok(self.properties.iter().find(|p| p.name == name))
    }

    /// Value of the first instance named `name`.
    pub fn property_value(&self, name: &str) -> Result<Option<&Value>, TesseraError> {
        Ok(self.property(name)?.map(|p| &p.value))
    }

    /// The instance identified by the full triple.
    pub fn property_instance(
        &self,
        key: &str,
        name: &str,
        visibility: &Visibility,
    ) -> Result<Option<&Property>, TesseraError> {
        self.fetch_hints.check_property(name)?;
        Ok(self
            .properties
            .iter()
            .find(|p| p.key == key && p.name == name && &p.visibility == visibility))
    }

    // -------------------------------------------------------------------------
    // Vertex facets
    // -------------------------------------------------------------------------

    /// Edge references in `direction`. Always empty for edges.
    pub fn edge_infos(&self, direction: Direction) -> Result<Vec<&EdgeInfo>, TesseraError> {
        self.fetch_hints.check_edge_refs(direction)?;
        Ok(match &self.kind {
            ElementKind::Vertex { edge_infos, .. } => edge_infos
                .iter()
                .filter(|info| direction.matches(info.direction))
                .collect(),
            ElementKind::Edge { .. } => Vec::new(),
        })
    }

    pub fn edge_ids(&self, direction: Direction) -> Result<Vec<&str>, TesseraError> {
        Ok(self
            .edge_infos(direction)?
            .into_iter()
            .map(|info| info.edge_id.as_str())
            .collect())
    }

    pub fn edges_summary(&self) -> Result<EdgesSummary, TesseraError> {
        self.fetch_hints.check_edge_labels_and_counts()?;
        Ok(match &self.kind {
            ElementKind::Vertex { edges_summary, .. } => edges_summary.clone(),
            ElementKind::Edge { .. } => EdgesSummary::default(),
        })
    }

    pub fn extended_data_table_names(&self) -> Result<&BTreeSet<String>, TesseraError> {
        self.fetch_hints.check_extended_data_table_names()?;
        Ok(&self.extended_data_table_names)
    }

    // -------------------------------------------------------------------------
    // Edge facets
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        match &self.kind {
            ElementKind::Edge { label, .. } => Some(label),
            ElementKind::Vertex { .. } => None,
        }
    }

    #[must_use]
    pub fn out_vertex_id(&self) -> Option<&str> {
        match &self.kind {
            ElementKind::Edge { out_vertex_id, .. } => Some(out_vertex_id),
            ElementKind::Vertex { .. } => None,
        }
    }

    #[must_use]
    pub fn in_vertex_id(&self) -> Option<&str> {
        match &self.kind {
            ElementKind::Edge { in_vertex_id, .. } => Some(in_vertex_id),
            ElementKind::Vertex { .. } => None,
        }
    }

    /// For an edge, the endpoint opposite `vertex_id`.
    #[must_use]
    pub fn other_vertex_id(&self, vertex_id: &str) -> Option<&str> {
        match &self.kind {
            ElementKind::Edge {
                out_vertex_id,
                in_vertex_id,
                ..
            } if out_vertex_id == vertex_id => Some(in_vertex_id),
            ElementKind::Edge {
                out_vertex_id,
                in_vertex_id,
                ..
            } if in_vertex_id == vertex_id => Some(out_vertex_id),
            _ => None,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
