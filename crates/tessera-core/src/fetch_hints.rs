//! # Fetch Hints
//!
//! An immutable selector of the element facets a caller wants materialized.
//!
//! Fetch hints serve two purposes:
//! - Pruning: the columnar backend never reads column families the hints
//!   exclude (see [`crate::encoding::column_families_to_fetch`]).
//! - Guarding: every facet accessor on [`crate::Element`] checks the hints
//!   and returns [`TesseraError::MissingFetchHint`] instead of an empty
//!   result, so "not fetched" can never be mistaken for "absent".

use crate::encoding::NameSubstitution;
use crate::{Direction, TesseraError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// FETCH HINTS
// =============================================================================

/// Immutable facet selector. Build with [`FetchHintsBuilder`] or a preset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchHints {
    include_all_properties: bool,
    property_names: BTreeSet<String>,
    include_all_property_metadata: bool,
    metadata_keys: BTreeSet<String>,
    include_hidden: bool,
    include_all_edge_refs: bool,
    include_out_edge_refs: bool,
    include_in_edge_refs: bool,
    /// `None` admits every label.
    edge_labels: Option<BTreeSet<String>>,
    include_edge_labels_and_counts: bool,
    include_extended_data_table_names: bool,
    ignore_additional_visibilities: bool,
}

impl FetchHints {
    /// Start building a custom selector.
    #[must_use]
    pub fn builder() -> FetchHintsBuilder {
        FetchHintsBuilder::default()
    }

    /// Every facet except hidden data.
    #[must_use]
    pub fn all() -> Self {
        Self {
            include_all_properties: true,
            include_all_property_metadata: true,
            include_all_edge_refs: true,
            include_edge_labels_and_counts: true,
            include_extended_data_table_names: true,
            ..Self::none()
        }
    }

    /// Every facet, hidden data included. Used by administrative reads.
    #[must_use]
    pub fn all_including_hidden() -> Self {
        Self {
            include_hidden: true,
            ..Self::all()
        }
    }

    /// Only the element's existence, visibility and (for edges) endpoints.
    #[must_use]
    pub fn none() -> Self {
        Self {
            include_all_properties: false,
            property_names: BTreeSet::new(),
            include_all_property_metadata: false,
            metadata_keys: BTreeSet::new(),
            include_hidden: false,
            include_all_edge_refs: false,
            include_out_edge_refs: false,
            include_in_edge_refs: false,
            edge_labels: None,
            include_edge_labels_and_counts: false,
            include_extended_data_table_names: false,
            ignore_additional_visibilities: false,
        }
    }

    /// Edge references only, for adjacency traversal.
    #[must_use]
    pub fn edge_refs() -> Self {
        Self {
            include_all_edge_refs: true,
            ..Self::none()
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Whether any property is requested.
    #[must_use]
    pub fn is_include_properties(&self) -> bool {
        self.include_all_properties || !self.property_names.is_empty()
    }

    #[must_use]
    pub fn is_include_all_properties(&self) -> bool {
        self.include_all_properties
    }

    #[must_use]
    pub fn includes_property(&self, name: &str) -> bool {
        self.include_all_properties || self.property_names.contains(name)
    }

    /// Whether any property metadata is requested.
    #[must_use]
    pub fn is_include_property_metadata(&self) -> bool {
        self.include_all_property_metadata || !self.metadata_keys.is_empty()
    }

    #[must_use]
    pub fn is_include_all_property_metadata(&self) -> bool {
        self.include_all_property_metadata
    }

    #[must_use]
    pub fn includes_property_metadata(&self, key: &str) -> bool {
        self.include_all_property_metadata || self.metadata_keys.contains(key)
    }

    #[must_use]
    pub fn is_include_edge_refs(&self) -> bool {
        self.include_all_edge_refs || self.include_out_edge_refs || self.include_in_edge_refs
    }

    /// Whether edge references in `direction` are requested at all.
    #[must_use]
    pub fn includes_edge_ref_direction(&self, direction: Direction) -> bool {
        let out = self.include_all_edge_refs || self.include_out_edge_refs;
        let inbound = self.include_all_edge_refs || self.include_in_edge_refs;
        match direction {
            Direction::Out => out,
            Direction::In => inbound,
            Direction::Both => out || inbound,
        }
    }

    /// Whether an edge reference with `label` in `direction` is requested.
    #[must_use]
    pub fn includes_edge_refs(&self, direction: Direction, label: &str) -> bool {
        self.includes_edge_ref_direction(direction)
            && self
                .edge_labels
                .as_ref()
                .is_none_or(|labels| labels.contains(label))
    }

    #[must_use]
    pub fn include_hidden(&self) -> bool {
        self.include_hidden
    }

    #[must_use]
    pub fn include_edge_labels_and_counts(&self) -> bool {
        self.include_edge_labels_and_counts
    }

    #[must_use]
    pub fn include_extended_data_table_names(&self) -> bool {
        self.include_extended_data_table_names
    }

    #[must_use]
    pub fn ignore_additional_visibilities(&self) -> bool {
        self.ignore_additional_visibilities
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.property_names.iter().map(String::as_str)
    }

    pub fn metadata_keys(&self) -> impl Iterator<Item = &str> {
        self.metadata_keys.iter().map(String::as_str)
    }

    #[must_use]
    pub fn edge_labels(&self) -> Option<&BTreeSet<String>> {
        self.edge_labels.as_ref()
    }

    // -------------------------------------------------------------------------
    // Checked access
    // -------------------------------------------------------------------------

    pub fn check_properties(&self) -> Result<(), TesseraError> {
        if self.is_include_properties() {
            Ok(())
        } else {
            Err(TesseraError::MissingFetchHint("properties".to_string()))
        }
    }

    pub fn check_property(&self, name: &str) -> Result<(), TesseraError> {
        if self.includes_property(name) {
            Ok(())
        } else {
            Err(TesseraError::MissingFetchHint(format!("property {name:?}")))
        }
    }

    pub fn check_property_metadata(&self) -> Result<(), TesseraError> {
        if self.is_include_property_metadata() {
            Ok(())
        } else {
            Err(TesseraError::MissingFetchHint("property metadata".to_string()))
        }
    }

    pub fn check_property_metadata_key(&self, key: &str) -> Result<(), TesseraError> {
        if self.includes_property_metadata(key) {
            Ok(())
        } else {
            Err(TesseraError::MissingFetchHint(format!("property metadata {key:?}")))
        }
    }

    pub fn check_edge_refs(&self, direction: Direction) -> Result<(), TesseraError> {
        if self.includes_edge_ref_direction(direction) {
            Ok(())
        } else {
            Err(TesseraError::MissingFetchHint(format!(
                "edge references ({direction:?})"
            )))
        }
    }

    pub fn check_edge_labels_and_counts(&self) -> Result<(), TesseraError> {
        if self.include_edge_labels_and_counts {
            Ok(())
        } else {
            Err(TesseraError::MissingFetchHint(
                "edge labels and counts".to_string(),
            ))
        }
    }

    pub fn check_extended_data_table_names(&self) -> Result<(), TesseraError> {
        if self.include_extended_data_table_names {
            Ok(())
        } else {
            Err(TesseraError::MissingFetchHint(
                "extended data table names".to_string(),
            ))
        }
    }

    // -------------------------------------------------------------------------
    // Wire form
    // -------------------------------------------------------------------------

    /// Encode for shipping to a server-side scanner. Names are deflated
    /// through `names` so the payload matches the physical key vocabulary.
    pub fn to_wire(&self, names: &dyn NameSubstitution) -> Result<Vec<u8>, TesseraError> {
        let wire = WireFetchHints {
            flags: self.flags(),
            property_names: self.property_names.iter().map(|n| names.deflate(n)).collect(),
            metadata_keys: self.metadata_keys.iter().map(|k| names.deflate(k)).collect(),
            edge_labels: self
                .edge_labels
                .as_ref()
                .map(|labels| labels.iter().map(|l| names.deflate(l)).collect()),
        };
        postcard::to_allocvec(&wire).map_err(|e| TesseraError::SerializationError(e.to_string()))
    }

    /// Decode a wire payload produced by [`FetchHints::to_wire`].
    pub fn from_wire(bytes: &[u8], names: &dyn NameSubstitution) -> Result<Self, TesseraError> {
        let wire: WireFetchHints = postcard::from_bytes(bytes)
            .map_err(|e| TesseraError::SerializationError(e.to_string()))?;
        let inflate_all = |values: Vec<String>| -> Result<BTreeSet<String>, TesseraError> {
            values.iter().map(|v| names.inflate(v)).collect()
        };
        let flag = |bit: u16| wire.flags & bit != 0;
        Ok(Self {
            include_all_properties: flag(FLAG_ALL_PROPERTIES),
            property_names: inflate_all(wire.property_names)?,
            include_all_property_metadata: flag(FLAG_ALL_PROPERTY_METADATA),
            metadata_keys: inflate_all(wire.metadata_keys)?,
            include_hidden: flag(FLAG_HIDDEN),
            include_all_edge_refs: flag(FLAG_ALL_EDGE_REFS),
            include_out_edge_refs: flag(FLAG_OUT_EDGE_REFS),
            include_in_edge_refs: flag(FLAG_IN_EDGE_REFS),
            edge_labels: wire.edge_labels.map(inflate_all).transpose()?,
            include_edge_labels_and_counts: flag(FLAG_EDGE_LABELS_AND_COUNTS),
            include_extended_data_table_names: flag(FLAG_EXTENDED_DATA_TABLE_NAMES),
            ignore_additional_visibilities: flag(FLAG_IGNORE_ADDITIONAL_VISIBILITIES),
        })
    }

    fn flags(&self) -> u16 {
        [
            (self.include_all_properties, FLAG_ALL_PROPERTIES),
            (self.include_all_property_metadata, FLAG_ALL_PROPERTY_METADATA),
            (self.include_hidden, FLAG_HIDDEN),
            (self.include_all_edge_refs, FLAG_ALL_EDGE_REFS),
            (self.include_out_edge_refs, FLAG_OUT_EDGE_REFS),
            (self.include_in_edge_refs, FLAG_IN_EDGE_REFS),
            (self.include_edge_labels_and_counts, FLAG_EDGE_LABELS_AND_COUNTS),
            (self.include_extended_data_table_names, FLAG_EXTENDED_DATA_TABLE_NAMES),
            (self.ignore_additional_visibilities, FLAG_IGNORE_ADDITIONAL_VISIBILITIES),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .fold(0, |acc, (_, bit)| acc | bit)
    }
}

impl Default for FetchHints {
    fn default() -> Self {
        Self::all()
    }
}

const FLAG_ALL_PROPERTIES: u16 = 1;
const FLAG_ALL_PROPERTY_METADATA: u16 = 1 << 1;
const FLAG_HIDDEN: u16 = 1 << 2;
const FLAG_ALL_EDGE_REFS: u16 = 1 << 3;
const FLAG_OUT_EDGE_REFS: u16 = 1 << 4;
const FLAG_IN_EDGE_REFS: u16 = 1 << 5;
const FLAG_EDGE_LABELS_AND_COUNTS: u16 = 1 << 6;
const FLAG_EXTENDED_DATA_TABLE_NAMES: u16 = 1 << 7;
const FLAG_IGNORE_ADDITIONAL_VISIBILITIES: u16 = 1 << 8;

#[derive(Serialize, Deserialize)]
struct WireFetchHints {
    flags: u16,
    property_names: Vec<String>,
    metadata_keys: Vec<String>,
    edge_labels: Option<Vec<String>>,
}

// =============================================================================
// BUILDER
// =============================================================================

/// Consuming builder for [`FetchHints`]. Starts from [`FetchHints::none`].
#[derive(Debug, Clone)]
pub struct FetchHintsBuilder {
    hints: FetchHints,
}

impl Default for FetchHintsBuilder {
    fn default() -> Self {
        Self {
            hints: FetchHints::none(),
        }
    }
}

impl FetchHintsBuilder {
    #[must_use]
    pub fn include_all_properties(mut self, value: bool) -> Self {
        self.hints.include_all_properties = value;
        self
    }

    #[must_use]
    pub fn property_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hints
            .property_names
            .extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn include_all_property_metadata(mut self, value: bool) -> Self {
        self.hints.include_all_property_metadata = value;
        self
    }

    #[must_use]
    pub fn metadata_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hints
            .metadata_keys
            .extend(keys.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn include_hidden(mut self, value: bool) -> Self {
        self.hints.include_hidden = value;
        self
    }

    #[must_use]
    pub fn include_all_edge_refs(mut self, value: bool) -> Self {
        self.hints.include_all_edge_refs = value;
        self
    }

    #[must_use]
    pub fn include_out_edge_refs(mut self, value: bool) -> Self {
        self.hints.include_out_edge_refs = value;
        self
    }

    #[must_use]
    pub fn include_in_edge_refs(mut self, value: bool) -> Self {
        self.hints.include_in_edge_refs = value;
        self
    }

    /// Restrict edge references to these labels.
    #[must_use]
    pub fn edge_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hints
            .edge_labels
            .get_or_insert_with(BTreeSet::new)
            .extend(labels.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn include_edge_labels_and_counts(mut self, value: bool) -> Self {
        self.hints.include_edge_labels_and_counts = value;
        self
    }

    #[must_use]
    pub fn include_extended_data_table_names(mut self, value: bool) -> Self {
        self.hints.include_extended_data_table_names = value;
        self
    }

    #[must_use]
    pub fn ignore_additional_visibilities(mut self, value: bool) -> Self {
        self.hints.ignore_additional_visibilities = value;
        self
    }

    /// Validate and freeze the selector.
    ///
    /// Requesting metadata without requesting any property is rejected.
    pub fn build(self) -> Result<FetchHints, TesseraError> {
        let hints = self.hints;
        if hints.is_include_property_metadata() && !hints.is_include_properties() {
            return Err(TesseraError::InvalidFetchHints(
                "property metadata requested without any property".to_string(),
            ));
        }
        Ok(hints)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{IdentityNameSubstitution, TableNameSubstitution};

    #[test]
    fn presets() {
        let all = FetchHints::all();
        assert!(all.includes_property("anything"));
        assert!(all.includes_property_metadata("anything"));
        assert!(all.includes_edge_refs(Direction::Both, "knows"));
        assert!(!all.include_hidden());
        assert!(FetchHints::all_including_hidden().include_hidden());

        let none = FetchHints::none();
        assert!(!none.is_include_properties());
        assert!(!none.is_include_edge_refs());

        let refs = FetchHints::edge_refs();
        assert!(refs.includes_edge_refs(Direction::Out, "x"));
        assert!(!refs.is_include_properties());
    }

    #[test]
    fn metadata_without_properties_is_rejected() {
        let result = FetchHints::builder()
            .include_all_property_metadata(true)
            .build();
        assert!(matches!(result, Err(TesseraError::InvalidFetchHints(_))));

        let ok = FetchHints::builder()
            .property_names(["age"])
            .metadata_keys(["source"])
            .build()
            .expect("valid");
        assert!(ok.includes_property("age"));
        assert!(!ok.includes_property("name"));
        assert!(ok.includes_property_metadata("source"));
        assert!(!ok.includes_property_metadata("confidence"));
    }

    #[test]
    fn edge_ref_direction_and_label_filter() {
        let hints = FetchHints::builder()
            .include_out_edge_refs(true)
            .edge_labels(["knows"])
            .build()
            .expect("valid");
        assert!(hints.includes_edge_refs(Direction::Out, "knows"));
        assert!(!hints.includes_edge_refs(Direction::Out, "likes"));
        assert!(!hints.includes_edge_refs(Direction::In, "knows"));
        assert!(hints.includes_edge_refs(Direction::Both, "knows"));
    }

    #[test]
    fn checked_access_reports_missing_facet() {
        let hints = FetchHints::none();
        assert!(matches!(
            hints.check_property("age"),
            Err(TesseraError::MissingFetchHint(_))
        ));
        assert!(hints.check_edge_refs(Direction::In).is_err());
        assert!(FetchHints::all().check_property_metadata_key("k").is_ok());
    }

    #[test]
    fn wire_round_trip_through_substitution() {
        let names = TableNameSubstitution::new([("knows", "k"), ("age", "a")]).expect("table");
        let hints = FetchHints::builder()
            .property_names(["age", "name"])
            .metadata_keys(["source"])
            .include_in_edge_refs(true)
            .edge_labels(["knows"])
            .include_hidden(true)
            .ignore_additional_visibilities(true)
            .build()
            .expect("valid");

        let bytes = hints.to_wire(&names).expect("encode");
        assert_eq!(FetchHints::from_wire(&bytes, &names).expect("decode"), hints);

        let identity = IdentityNameSubstitution;
        let bytes = FetchHints::all().to_wire(&identity).expect("encode");
        assert_eq!(
            FetchHints::from_wire(&bytes, &identity).expect("decode"),
            FetchHints::all()
        );
    }
}
