//! # Column Layout
//!
//! Bidirectional mapping between [`Mutation`]s and physical cells of the
//! sorted wide-column layout.
//!
//! Element-kind differences live in data, not in code: a [`FacetTable`]
//! maps every column family of a row kind to the [`Facet`] it stores, and
//! one generic encoder/decoder works from that table.
//!
//! | Facet | Family | Qualifier | Visibility | Value |
//! |---|---|---|---|---|
//! | signal | `V` / `E` | empty | element visibility | event data |
//! | edge label | `E` | label | empty | empty |
//! | endpoint | `EOUT` / `EIN` (edges) | vertex id | empty | empty |
//! | property | `PROP` | name, key | property visibility | value |
//! | property soft delete | `PROPD` | name, key | property visibility | event data |
//! | property hidden | `PROPH` | name, key, property visibility | hiding visibility | marker, event data |
//! | property metadata | `PROPMETA` | name, key, property visibility, metadata name | metadata visibility | value |
//! | additional visibility | `AV` | visibility | empty | marker, event data |
//! | element soft delete | `SD` | empty | empty | event data |
//! | element hidden | `H` | empty | hiding visibility | marker, event data |
//! | edge reference | `EOUT` / `EIN` (vertices) | edge id | edge visibility | other vertex, label |
//! | edge ref soft delete | `EOUTD` / `EIND` | edge id | edge visibility | event data |
//! | edge ref hidden | `EOUTH` / `EINH` | edge id, edge visibility | hiding visibility | marker, event data |
//! | extended data table | `EXTDATA` | table name | empty | empty |
//! | timestamp bump | `TS` | empty | empty | empty |
//! | hard delete | `DELROW` | empty | empty | empty |
//!
//! Qualifier parts are joined with `U+001F`. Property names, metadata names
//! and edge labels pass through the configured [`NameSubstitution`].
//! Property and edge-reference tombstones are cells with the delete flag.

use super::fields::{FieldReader, FieldWriter};
use super::key::Key;
use super::names::NameSubstitution;
use super::serializer::ValueSerializer;
use crate::element::Metadata;
use crate::extended_data::{ExtendedDataMutation, ExtendedDataMutationKind, ExtendedDataRowId};
use crate::mutation::{Mutation, MutationKind, qualifier};
use crate::primitives::{
    CF_ADDITIONAL_VISIBILITY, CF_DELETE_ROW, CF_EDGE_SIGNAL, CF_ELEMENT_TIMESTAMP,
    CF_EXTENDED_COLUMN, CF_EXTENDED_COLUMN_SOFT_DELETE, CF_EXTENDED_DATA, CF_HIDDEN, CF_IN_EDGE,
    CF_IN_EDGE_HIDDEN, CF_IN_EDGE_SOFT_DELETE, CF_OUT_EDGE, CF_OUT_EDGE_HIDDEN,
    CF_OUT_EDGE_SOFT_DELETE, CF_PROPERTY, CF_PROPERTY_HIDDEN, CF_PROPERTY_METADATA,
    CF_PROPERTY_SOFT_DELETE, CF_SOFT_DELETE, CF_VERTEX_SIGNAL, MARKER_CLEARED, MARKER_SET,
    VALUE_SEPARATOR,
};
use crate::visibility::Visibility;
use crate::{Direction, ElementType, EventData, FetchHints, TesseraError, Timestamp, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One physical cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub key: Key,
    pub value: Vec<u8>,
}

impl Cell {
    #[must_use]
    pub fn new(key: Key, value: Vec<u8>) -> Self {
        Self { key, value }
    }
}

// =============================================================================
// FACET TABLES
// =============================================================================

/// What a column family stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facet {
    Signal,
    Property,
    PropertyMetadata,
    PropertyHidden,
    PropertySoftDelete,
    Hidden,
    SoftDelete,
    AdditionalVisibility,
    EdgeRef(Direction),
    EdgeRefHidden(Direction),
    EdgeRefSoftDelete(Direction),
    Endpoint(Direction),
    ExtendedDataTable,
    ElementTimestamp,
    DeleteRow,
}

/// Column families of one row kind.
#[derive(Debug)]
pub struct FacetTable {
    pub element_type: ElementType,
    pub signal: &'static str,
    pub families: &'static [(&'static str, Facet)],
}

impl FacetTable {
    #[must_use]
    pub fn facet(&self, family: &str) -> Option<Facet> {
        self.families
            .iter()
            .find(|(f, _)| *f == family)
            .map(|(_, facet)| *facet)
    }

    /// Family storing `facet`, if this row kind has it.
    #[must_use]
    pub fn family(&self, facet: Facet) -> Option<&'static str> {
        self.families
            .iter()
            .find(|(_, f)| *f == facet)
            .map(|(family, _)| *family)
    }
}

pub static VERTEX_FACETS: FacetTable = FacetTable {
    element_type: ElementType::Vertex,
    signal: CF_VERTEX_SIGNAL,
    families: &[
        (CF_VERTEX_SIGNAL, Facet::Signal),
        (CF_PROPERTY, Facet::Property),
        (CF_PROPERTY_METADATA, Facet::PropertyMetadata),
        (CF_PROPERTY_HIDDEN, Facet::PropertyHidden),
        (CF_PROPERTY_SOFT_DELETE, Facet::PropertySoftDelete),
        (CF_HIDDEN, Facet::Hidden),
        (CF_SOFT_DELETE, Facet::SoftDelete),
        (CF_ADDITIONAL_VISIBILITY, Facet::AdditionalVisibility),
        (CF_OUT_EDGE, Facet::EdgeRef(Direction::Out)),
        (CF_IN_EDGE, Facet::EdgeRef(Direction::In)),
        (CF_OUT_EDGE_HIDDEN, Facet::EdgeRefHidden(Direction::Out)),
        (CF_IN_EDGE_HIDDEN, Facet::EdgeRefHidden(Direction::In)),
        (CF_OUT_EDGE_SOFT_DELETE, Facet::EdgeRefSoftDelete(Direction::Out)),
        (CF_IN_EDGE_SOFT_DELETE, Facet::EdgeRefSoftDelete(Direction::In)),
        (CF_EXTENDED_DATA, Facet::ExtendedDataTable),
        (CF_ELEMENT_TIMESTAMP, Facet::ElementTimestamp),
        (CF_DELETE_ROW, Facet::DeleteRow),
    ],
};

pub static EDGE_FACETS: FacetTable = FacetTable {
    element_type: ElementType::Edge,
    signal: CF_EDGE_SIGNAL,
    families: &[
        (CF_EDGE_SIGNAL, Facet::Signal),
        (CF_PROPERTY, Facet::Property),
        (CF_PROPERTY_METADATA, Facet::PropertyMetadata),
        (CF_PROPERTY_HIDDEN, Facet::PropertyHidden),
        (CF_PROPERTY_SOFT_DELETE, Facet::PropertySoftDelete),
        (CF_HIDDEN, Facet::Hidden),
        (CF_SOFT_DELETE, Facet::SoftDelete),
        (CF_ADDITIONAL_VISIBILITY, Facet::AdditionalVisibility),
        (CF_OUT_EDGE, Facet::Endpoint(Direction::Out)),
        (CF_IN_EDGE, Facet::Endpoint(Direction::In)),
        (CF_EXTENDED_DATA, Facet::ExtendedDataTable),
        (CF_ELEMENT_TIMESTAMP, Facet::ElementTimestamp),
        (CF_DELETE_ROW, Facet::DeleteRow),
    ],
};

#[must_use]
pub fn facets(element_type: ElementType) -> &'static FacetTable {
    match element_type {
        ElementType::Vertex => &VERTEX_FACETS,
        ElementType::Edge => &EDGE_FACETS,
    }
}

/// Column families a read with `hints` needs. Everything else can be left
/// unfetched; both backends prune with this set before folding.
#[must_use]
pub fn column_families_to_fetch(
    element_type: ElementType,
    hints: &FetchHints,
) -> BTreeSet<&'static str> {
    let table = facets(element_type);
    let mut families: BTreeSet<&'static str> = [
        table.signal,
        CF_HIDDEN,
        CF_SOFT_DELETE,
        CF_ADDITIONAL_VISIBILITY,
        CF_ELEMENT_TIMESTAMP,
        CF_DELETE_ROW,
    ]
    .into_iter()
    .collect();

    if hints.is_include_properties() {
        families.extend([CF_PROPERTY, CF_PROPERTY_HIDDEN, CF_PROPERTY_SOFT_DELETE]);
        if hints.is_include_property_metadata() {
            families.insert(CF_PROPERTY_METADATA);
        }
    }
    if hints.include_extended_data_table_names() {
        families.insert(CF_EXTENDED_DATA);
    }

    match element_type {
        ElementType::Edge => {
            families.extend([CF_OUT_EDGE, CF_IN_EDGE]);
        }
        ElementType::Vertex => {
            let counts = hints.include_edge_labels_and_counts();
            if counts || hints.includes_edge_ref_direction(Direction::Out) {
                families.extend([CF_OUT_EDGE, CF_OUT_EDGE_HIDDEN, CF_OUT_EDGE_SOFT_DELETE]);
            }
            if counts || hints.includes_edge_ref_direction(Direction::In) {
                families.extend([CF_IN_EDGE, CF_IN_EDGE_HIDDEN, CF_IN_EDGE_SOFT_DELETE]);
            }
        }
    }
    families
}

// =============================================================================
// CODEC
// =============================================================================

/// Encoder/decoder bound to a value serializer and a name substitution.
#[derive(Debug, Clone, Copy)]
pub struct CellCodec<'a> {
    pub serializer: &'a dyn ValueSerializer,
    pub names: &'a dyn NameSubstitution,
    /// Reject unknown column families instead of skipping them.
    pub strict: bool,
}

/// Owned serializer and name substitution, shared by stores and cursors
/// that outlive a single call.
#[derive(Debug, Clone)]
pub struct CodecSettings {
    pub serializer: Arc<dyn ValueSerializer>,
    pub names: Arc<dyn NameSubstitution>,
    pub strict: bool,
}

impl CodecSettings {
    #[must_use]
    pub fn new(serializer: Arc<dyn ValueSerializer>, names: Arc<dyn NameSubstitution>) -> Self {
        Self {
            serializer,
            names,
            strict: false,
        }
    }

    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    #[must_use]
    pub fn codec(&self) -> CellCodec<'_> {
        CellCodec::new(self.serializer.as_ref(), self.names.as_ref()).strict(self.strict)
    }
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self::new(
            Arc::new(super::serializer::PostcardSerializer),
            Arc::new(super::names::IdentityNameSubstitution),
        )
    }
}

fn corrupt(key: &Key, reason: impl Into<String>) -> TesseraError {
    TesseraError::corrupt(key.to_string(), reason)
}

fn event_data(data: &EventData) -> Vec<u8> {
    FieldWriter::new().optional(data.as_deref()).finish()
}

fn marker_payload(marker: u8, data: &EventData) -> Vec<u8> {
    FieldWriter::with_marker(marker)
        .optional(data.as_deref())
        .finish()
}

fn marker(set: bool) -> u8 {
    if set { MARKER_SET } else { MARKER_CLEARED }
}

impl<'a> CellCodec<'a> {
    #[must_use]
    pub fn new(serializer: &'a dyn ValueSerializer, names: &'a dyn NameSubstitution) -> Self {
        Self {
            serializer,
            names,
            strict: false,
        }
    }

    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    fn property_qualifier(&self, name: &str, key: &str) -> String {
        qualifier(&[self.names.deflate(name).as_str(), key])
    }

    // -------------------------------------------------------------------------
    // Encode
    // -------------------------------------------------------------------------

    /// Cells for one element mutation written to `row`.
    pub fn encode_mutation(
        &self,
        table: &FacetTable,
        row: &str,
        mutation: &Mutation,
    ) -> Result<Vec<Cell>, TesseraError> {
        let ts = mutation.timestamp;
        let key = |family: &str, qualifier: String, visibility: &str| {
            Key::new(row, family, qualifier, visibility, ts)
        };
        let family_for = |facet: Facet| {
            table.family(facet).ok_or_else(|| {
                TesseraError::InvalidMutation(format!(
                    "{:?} cannot be stored on a {} row",
                    mutation.tag(),
                    table.element_type
                ))
            })
        };

        let cells = match &mutation.kind {
            MutationKind::AddPropertyValue {
                key: property_key,
                name,
                value,
                metadata,
                visibility,
            } => {
                let mut cells = vec![Cell::new(
                    key(
                        CF_PROPERTY,
                        self.property_qualifier(name, property_key),
                        visibility.as_str(),
                    ),
                    self.serializer.serialize(value)?,
                )];
                for (metadata_name, metadata_visibility, metadata_value) in metadata.entries() {
                    cells.push(self.metadata_cell(
                        row,
                        ts,
                        property_key,
                        name,
                        visibility,
                        metadata_name,
                        metadata_visibility,
                        metadata_value,
                    )?);
                }
                cells
            }
            MutationKind::DeletePropertyValue {
                key: property_key,
                name,
                visibility,
            } => vec![Cell::new(
                key(
                    CF_PROPERTY,
                    self.property_qualifier(name, property_key),
                    visibility.as_str(),
                )
                .deleted(true),
                Vec::new(),
            )],
            MutationKind::SoftDeletePropertyValue {
                key: property_key,
                name,
                visibility,
                data,
            } => vec![Cell::new(
                key(
                    CF_PROPERTY_SOFT_DELETE,
                    self.property_qualifier(name, property_key),
                    visibility.as_str(),
                ),
                event_data(data),
            )],
            MutationKind::MarkPropertyHidden {
                key: property_key,
                name,
                property_visibility,
                visibility,
                data,
            }
            | MutationKind::MarkPropertyVisible {
                key: property_key,
                name,
                property_visibility,
                visibility,
                data,
            } => {
                let hidden = matches!(mutation.kind, MutationKind::MarkPropertyHidden { .. });
                let qualifier = qualifier(&[
                    self.names.deflate(name).as_str(),
                    property_key.as_str(),
                    property_visibility.as_str(),
                ]);
                vec![Cell::new(
                    key(CF_PROPERTY_HIDDEN, qualifier, visibility.as_str()),
                    marker_payload(marker(hidden), data),
                )]
            }
            MutationKind::SetPropertyMetadata {
                key: property_key,
                name,
                property_visibility,
                metadata_name,
                value,
                visibility,
            } => vec![self.metadata_cell(
                row,
                ts,
                property_key,
                name,
                property_visibility,
                metadata_name,
                visibility,
                value,
            )?],
            MutationKind::AlterVisibility { visibility, data } => vec![Cell::new(
                key(table.signal, String::new(), visibility.as_str()),
                event_data(data),
            )],
            MutationKind::AlterEdgeLabel { label } => {
                if table.element_type != ElementType::Edge {
                    return Err(TesseraError::InvalidMutation(
                        "edge labels are only stored on edge rows".to_string(),
                    ));
                }
                if label.is_empty() {
                    return Err(TesseraError::InvalidMutation(
                        "edge label must not be empty".to_string(),
                    ));
                }
                vec![Cell::new(
                    key(table.signal, self.names.deflate(label), ""),
                    Vec::new(),
                )]
            }
            MutationKind::EdgeSetup {
                out_vertex_id,
                in_vertex_id,
            } => vec![
                Cell::new(
                    key(
                        family_for(Facet::Endpoint(Direction::Out))?,
                        out_vertex_id.clone(),
                        "",
                    ),
                    Vec::new(),
                ),
                Cell::new(
                    key(
                        family_for(Facet::Endpoint(Direction::In))?,
                        in_vertex_id.clone(),
                        "",
                    ),
                    Vec::new(),
                ),
            ],
            MutationKind::AddAdditionalVisibility { visibility, data }
            | MutationKind::DeleteAdditionalVisibility { visibility, data } => {
                let added = matches!(mutation.kind, MutationKind::AddAdditionalVisibility { .. });
                vec![Cell::new(
                    key(
                        CF_ADDITIONAL_VISIBILITY,
                        visibility.as_str().to_string(),
                        "",
                    ),
                    marker_payload(marker(added), data),
                )]
            }
            MutationKind::SoftDeleteElement { data } => vec![Cell::new(
                key(CF_SOFT_DELETE, String::new(), ""),
                event_data(data),
            )],
            MutationKind::MarkElementHidden { visibility, data }
            | MutationKind::MarkElementVisible { visibility, data } => {
                let hidden = matches!(mutation.kind, MutationKind::MarkElementHidden { .. });
                vec![Cell::new(
                    key(CF_HIDDEN, String::new(), visibility.as_str()),
                    marker_payload(marker(hidden), data),
                )]
            }
            MutationKind::ElementTimestamp => vec![Cell::new(
                key(CF_ELEMENT_TIMESTAMP, String::new(), ""),
                Vec::new(),
            )],
            MutationKind::AddEdgeRef {
                direction,
                edge_id,
                other_vertex_id,
                label,
                visibility,
            } => vec![Cell::new(
                key(
                    family_for(Facet::EdgeRef(*direction))?,
                    edge_id.clone(),
                    visibility.as_str(),
                ),
                FieldWriter::new()
                    .str(other_vertex_id)
                    .str(&self.names.deflate(label))
                    .finish(),
            )],
            MutationKind::DeleteEdgeRef {
                direction,
                edge_id,
                visibility,
            } => vec![Cell::new(
                key(
                    family_for(Facet::EdgeRef(*direction))?,
                    edge_id.clone(),
                    visibility.as_str(),
                )
                .deleted(true),
                Vec::new(),
            )],
            MutationKind::SoftDeleteEdgeRef {
                direction,
                edge_id,
                visibility,
                data,
            } => vec![Cell::new(
                key(
                    family_for(Facet::EdgeRefSoftDelete(*direction))?,
                    edge_id.clone(),
                    visibility.as_str(),
                ),
                event_data(data),
            )],
            MutationKind::MarkEdgeRefHidden {
                direction,
                edge_id,
                edge_visibility,
                visibility,
                data,
            }
            | MutationKind::MarkEdgeRefVisible {
                direction,
                edge_id,
                edge_visibility,
                visibility,
                data,
            } => {
                let hidden = matches!(mutation.kind, MutationKind::MarkEdgeRefHidden { .. });
                vec![Cell::new(
                    key(
                        family_for(Facet::EdgeRefHidden(*direction))?,
                        qualifier(&[edge_id.as_str(), edge_visibility.as_str()]),
                        visibility.as_str(),
                    ),
                    marker_payload(marker(hidden), data),
                )]
            }
            MutationKind::AddExtendedDataTable { table_name } => vec![Cell::new(
                key(CF_EXTENDED_DATA, table_name.clone(), ""),
                Vec::new(),
            )],
            MutationKind::DeleteRow => {
                vec![Cell::new(key(CF_DELETE_ROW, String::new(), ""), Vec::new())]
            }
        };
        Ok(cells)
    }

    fn metadata_cell(
        &self,
        row: &str,
        ts: Timestamp,
        property_key: &str,
        name: &str,
        property_visibility: &Visibility,
        metadata_name: &str,
        visibility: &Visibility,
        value: &Value,
    ) -> Result<Cell, TesseraError> {
        let qualifier = qualifier(&[
            self.names.deflate(name).as_str(),
            property_key,
            property_visibility.as_str(),
            self.names.deflate(metadata_name).as_str(),
        ]);
        Ok(Cell::new(
            Key::new(row, CF_PROPERTY_METADATA, qualifier, visibility.as_str(), ts),
            self.serializer.serialize(value)?,
        ))
    }

    // -------------------------------------------------------------------------
    // Decode
    // -------------------------------------------------------------------------

    /// Mutations stored in the cells of one row.
    ///
    /// Endpoint cells are re-paired into [`MutationKind::EdgeSetup`] by
    /// timestamp; an unpaired endpoint is corruption.
    pub fn decode_row(
        &self,
        table: &FacetTable,
        cells: &[Cell],
    ) -> Result<Vec<Mutation>, TesseraError> {
        let mut mutations = Vec::with_capacity(cells.len());
        let mut endpoints: BTreeMap<Timestamp, (Option<String>, Option<String>, &Key)> =
            BTreeMap::new();

        for cell in cells {
            let key = &cell.key;
            let Some(facet) = table.facet(&key.family) else {
                if self.strict {
                    return Err(TesseraError::UnknownColumnFamily(key.family.clone()));
                }
                tracing::trace!(key = %key, "ignoring unknown column family");
                continue;
            };
            if let Facet::Endpoint(direction) = facet {
                let slot = endpoints.entry(key.timestamp).or_insert((None, None, key));
                match direction {
                    Direction::In => slot.1 = Some(key.qualifier.clone()),
                    Direction::Out | Direction::Both => slot.0 = Some(key.qualifier.clone()),
                }
                continue;
            }
            mutations.push(Mutation::new(
                key.timestamp,
                self.decode_cell(table, facet, cell)?,
            ));
        }

        for (timestamp, (out_vertex_id, in_vertex_id, key)) in endpoints {
            let (Some(out_vertex_id), Some(in_vertex_id)) = (out_vertex_id, in_vertex_id) else {
                return Err(corrupt(key, "edge endpoint without its counterpart"));
            };
            mutations.push(Mutation::new(
                timestamp,
                MutationKind::EdgeSetup {
                    out_vertex_id,
                    in_vertex_id,
                },
            ));
        }
        Ok(mutations)
    }

    fn decode_cell(
        &self,
        table: &FacetTable,
        facet: Facet,
        cell: &Cell,
    ) -> Result<MutationKind, TesseraError> {
        let key = &cell.key;
        let tombstone_allowed = matches!(facet, Facet::Property | Facet::EdgeRef(_));
        if key.deleted && !tombstone_allowed {
            return Err(corrupt(key, "unexpected delete flag"));
        }
        let visibility = || parse_visibility(key, &key.visibility);

        let kind = match facet {
            Facet::Signal => {
                if key.qualifier.is_empty() {
                    MutationKind::AlterVisibility {
                        visibility: visibility()?,
                        data: read_event_data(cell)?,
                    }
                } else if table.element_type == ElementType::Edge {
                    MutationKind::AlterEdgeLabel {
                        label: self.inflate(key, &key.qualifier)?,
                    }
                } else {
                    return Err(corrupt(key, "vertex signal with a qualifier"));
                }
            }
            Facet::Property => {
                let [name, property_key] = split::<2>(key)?;
                let (key_text, name) = (property_key.to_string(), self.inflate(key, name)?);
                if key.deleted {
                    MutationKind::DeletePropertyValue {
                        key: key_text,
                        name,
                        visibility: visibility()?,
                    }
                } else {
                    MutationKind::AddPropertyValue {
                        key: key_text,
                        name,
                        value: self.read_value(cell)?,
                        metadata: Metadata::new(),
                        visibility: visibility()?,
                    }
                }
            }
            Facet::PropertySoftDelete => {
                let [name, property_key] = split::<2>(key)?;
                MutationKind::SoftDeletePropertyValue {
                    key: property_key.to_string(),
                    name: self.inflate(key, name)?,
                    visibility: visibility()?,
                    data: read_event_data(cell)?,
                }
            }
            Facet::PropertyHidden => {
                let [name, property_key, property_visibility] = split::<3>(key)?;
                let (hidden, data) = read_marker(cell)?;
                let key_text = property_key.to_string();
                let name = self.inflate(key, name)?;
                let property_visibility = parse_visibility(key, property_visibility)?;
                let visibility = visibility()?;
                if hidden {
                    MutationKind::MarkPropertyHidden {
                        key: key_text,
                        name,
                        property_visibility,
                        visibility,
                        data,
                    }
                } else {
                    MutationKind::MarkPropertyVisible {
                        key: key_text,
                        name,
                        property_visibility,
                        visibility,
                        data,
                    }
                }
            }
            Facet::PropertyMetadata => {
                let [name, property_key, property_visibility, metadata_name] = split::<4>(key)?;
                MutationKind::SetPropertyMetadata {
                    key: property_key.to_string(),
                    name: self.inflate(key, name)?,
                    property_visibility: parse_visibility(key, property_visibility)?,
                    metadata_name: self.inflate(key, metadata_name)?,
                    value: self.read_value(cell)?,
                    visibility: visibility()?,
                }
            }
            Facet::Hidden => {
                let (hidden, data) = read_marker(cell)?;
                let visibility = visibility()?;
                if hidden {
                    MutationKind::MarkElementHidden { visibility, data }
                } else {
                    MutationKind::MarkElementVisible { visibility, data }
                }
            }
            Facet::SoftDelete => MutationKind::SoftDeleteElement {
                data: read_event_data(cell)?,
            },
            Facet::AdditionalVisibility => {
                let (added, data) = read_marker(cell)?;
                let visibility = parse_visibility(key, &key.qualifier)?;
                if added {
                    MutationKind::AddAdditionalVisibility { visibility, data }
                } else {
                    MutationKind::DeleteAdditionalVisibility { visibility, data }
                }
            }
            Facet::EdgeRef(direction) => {
                if key.deleted {
                    MutationKind::DeleteEdgeRef {
                        direction,
                        edge_id: key.qualifier.clone(),
                        visibility: visibility()?,
                    }
                } else {
                    let context = key.to_string();
                    let mut reader = FieldReader::new(&cell.value, &context);
                    let other_vertex_id = reader.string()?;
                    let label = self.inflate(key, &reader.string()?)?;
                    reader.finish()?;
                    MutationKind::AddEdgeRef {
                        direction,
                        edge_id: key.qualifier.clone(),
                        other_vertex_id,
                        label,
                        visibility: visibility()?,
                    }
                }
            }
            Facet::EdgeRefSoftDelete(direction) => MutationKind::SoftDeleteEdgeRef {
                direction,
                edge_id: key.qualifier.clone(),
                visibility: visibility()?,
                data: read_event_data(cell)?,
            },
            Facet::EdgeRefHidden(direction) => {
                let [edge_id, edge_visibility] = split::<2>(key)?;
                let (hidden, data) = read_marker(cell)?;
                let edge_id = edge_id.to_string();
                let edge_visibility = parse_visibility(key, edge_visibility)?;
                let visibility = visibility()?;
                if hidden {
                    MutationKind::MarkEdgeRefHidden {
                        direction,
                        edge_id,
                        edge_visibility,
                        visibility,
                        data,
                    }
                } else {
                    MutationKind::MarkEdgeRefVisible {
                        direction,
                        edge_id,
                        edge_visibility,
                        visibility,
                        data,
                    }
                }
            }
            Facet::ExtendedDataTable => MutationKind::AddExtendedDataTable {
                table_name: key.qualifier.clone(),
            },
            Facet::ElementTimestamp => MutationKind::ElementTimestamp,
            Facet::DeleteRow => MutationKind::DeleteRow,
            Facet::Endpoint(_) => {
                return Err(corrupt(key, "endpoint cells are decoded per row"));
            }
        };
        Ok(kind)
    }

    fn inflate(&self, key: &Key, value: &str) -> Result<String, TesseraError> {
        self.names
            .inflate(value)
            .map_err(|e| corrupt(key, e.to_string()))
    }

    fn read_value(&self, cell: &Cell) -> Result<Value, TesseraError> {
        self.serializer
            .deserialize(&cell.value)
            .map_err(|e| corrupt(&cell.key, e.to_string()))
    }

    // -------------------------------------------------------------------------
    // Extended data
    // -------------------------------------------------------------------------

    /// Cells for one extended-data mutation.
    pub fn encode_extended(
        &self,
        id: &ExtendedDataRowId,
        mutation: &ExtendedDataMutation,
    ) -> Result<Vec<Cell>, TesseraError> {
        let row = id.row_key();
        let ts = mutation.timestamp;
        let cell = match &mutation.kind {
            ExtendedDataMutationKind::SetCell {
                column,
                key,
                value,
                visibility,
            } => Cell::new(
                Key::new(
                    row,
                    CF_EXTENDED_COLUMN,
                    qualifier(&[column.as_str(), key.as_str()]),
                    visibility.as_str(),
                    ts,
                ),
                self.serializer.serialize(value)?,
            ),
            ExtendedDataMutationKind::DeleteCell {
                column,
                key,
                visibility,
            } => Cell::new(
                Key::new(
                    row,
                    CF_EXTENDED_COLUMN,
                    qualifier(&[column.as_str(), key.as_str()]),
                    visibility.as_str(),
                    ts,
                )
                .deleted(true),
                Vec::new(),
            ),
            ExtendedDataMutationKind::SoftDeleteCell {
                column,
                key,
                visibility,
                data,
            } => Cell::new(
                Key::new(
                    row,
                    CF_EXTENDED_COLUMN_SOFT_DELETE,
                    qualifier(&[column.as_str(), key.as_str()]),
                    visibility.as_str(),
                    ts,
                ),
                event_data(data),
            ),
            ExtendedDataMutationKind::AddAdditionalVisibility { visibility, data }
            | ExtendedDataMutationKind::DeleteAdditionalVisibility { visibility, data } => {
                let added = matches!(
                    mutation.kind,
                    ExtendedDataMutationKind::AddAdditionalVisibility { .. }
                );
                Cell::new(
                    Key::new(row, CF_ADDITIONAL_VISIBILITY, visibility.as_str(), "", ts),
                    marker_payload(marker(added), data),
                )
            }
            ExtendedDataMutationKind::DeleteRow => Cell::new(
                Key::new(row, CF_DELETE_ROW, String::new(), "", ts),
                Vec::new(),
            ),
        };
        Ok(vec![cell])
    }

    /// Mutations stored in the cells of one extended-data row.
    pub fn decode_extended_row(
        &self,
        cells: &[Cell],
    ) -> Result<Vec<ExtendedDataMutation>, TesseraError> {
        let mut mutations = Vec::with_capacity(cells.len());
        for cell in cells {
            let key = &cell.key;
            let tombstone_allowed = key.family == CF_EXTENDED_COLUMN;
            if key.deleted && !tombstone_allowed {
                return Err(corrupt(key, "unexpected delete flag"));
            }
            let kind = match key.family.as_str() {
                CF_EXTENDED_COLUMN => {
                    let [column, cell_key] = split::<2>(key)?;
                    let (column, cell_key) = (column.to_string(), cell_key.to_string());
                    let visibility = parse_visibility(key, &key.visibility)?;
                    if key.deleted {
                        ExtendedDataMutationKind::DeleteCell {
                            column,
                            key: cell_key,
                            visibility,
                        }
                    } else {
                        ExtendedDataMutationKind::SetCell {
                            column,
                            key: cell_key,
                            value: self.read_value(cell)?,
                            visibility,
                        }
                    }
                }
                CF_EXTENDED_COLUMN_SOFT_DELETE => {
                    let [column, cell_key] = split::<2>(key)?;
                    ExtendedDataMutationKind::SoftDeleteCell {
                        column: column.to_string(),
                        key: cell_key.to_string(),
                        visibility: parse_visibility(key, &key.visibility)?,
                        data: read_event_data(cell)?,
                    }
                }
                CF_ADDITIONAL_VISIBILITY => {
                    let (added, data) = read_marker(cell)?;
                    let visibility = parse_visibility(key, &key.qualifier)?;
                    if added {
                        ExtendedDataMutationKind::AddAdditionalVisibility { visibility, data }
                    } else {
                        ExtendedDataMutationKind::DeleteAdditionalVisibility { visibility, data }
                    }
                }
                CF_DELETE_ROW => ExtendedDataMutationKind::DeleteRow,
                other => {
                    if self.strict {
                        return Err(TesseraError::UnknownColumnFamily(other.to_string()));
                    }
                    tracing::trace!(key = %key, "ignoring unknown column family");
                    continue;
                }
            };
            mutations.push(ExtendedDataMutation::new(key.timestamp, kind));
        }
        Ok(mutations)
    }
}

fn split<const N: usize>(key: &Key) -> Result<[&str; N], TesseraError> {
    let parts: Vec<&str> = key.qualifier.split(VALUE_SEPARATOR).collect();
    let found = parts.len();
    parts
        .try_into()
        .map_err(|_| corrupt(key, format!("expected {N} qualifier parts, found {found}")))
}

fn parse_visibility(key: &Key, expression: &str) -> Result<Visibility, TesseraError> {
    Visibility::new(expression).map_err(|e| corrupt(key, e.to_string()))
}

fn read_event_data(cell: &Cell) -> Result<EventData, TesseraError> {
    let context = cell.key.to_string();
    let mut reader = FieldReader::new(&cell.value, &context);
    let data = reader.optional()?.map(<[u8]>::to_vec);
    reader.finish()?;
    Ok(data)
}

fn read_marker(cell: &Cell) -> Result<(bool, EventData), TesseraError> {
    let context = cell.key.to_string();
    let mut reader = FieldReader::new(&cell.value, &context);
    let set = match reader.marker()? {
        MARKER_SET => true,
        MARKER_CLEARED => false,
        other => return Err(corrupt(&cell.key, format!("invalid marker byte {other}"))),
    };
    let data = reader.optional()?.map(<[u8]>::to_vec);
    reader.finish()?;
    Ok((set, data))
}

// =============================================================================
// TESTS
// =============================================================================
