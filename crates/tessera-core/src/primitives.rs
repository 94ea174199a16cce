//! # Physical Layout Primitives
//!
//! Fixed constants of the wide-column layout and the kernel's input limits.
//!
//! The column-family names are part of the on-disk format and must match
//! exactly for interoperability with other readers of the same tables.

// =============================================================================
// COLUMN FAMILIES: ELEMENT ROWS
// =============================================================================

/// Vertex signal: row existence and vertex visibility.
pub const CF_VERTEX_SIGNAL: &str = "V";

/// Edge signal: row existence, edge visibility (empty qualifier) and label
/// (qualifier holds the interned label).
pub const CF_EDGE_SIGNAL: &str = "E";

/// Property values. Qualifier: `name SEP key`.
pub const CF_PROPERTY: &str = "PROP";

/// Property metadata. Qualifier: `name SEP key SEP property-visibility SEP metadata-name`.
pub const CF_PROPERTY_METADATA: &str = "PROPMETA";

/// Property hide/show markers. Qualifier: `name SEP key SEP property-visibility`.
pub const CF_PROPERTY_HIDDEN: &str = "PROPH";

/// Property soft deletes. Qualifier: `name SEP key`.
pub const CF_PROPERTY_SOFT_DELETE: &str = "PROPD";

/// Element hide/show markers.
pub const CF_HIDDEN: &str = "H";

/// Element soft delete.
pub const CF_SOFT_DELETE: &str = "SD";

/// Additional visibility grants. Qualifier: the additional visibility expression.
pub const CF_ADDITIONAL_VISIBILITY: &str = "AV";

/// Outgoing edge reference on a vertex / out-vertex id on an edge.
pub const CF_OUT_EDGE: &str = "EOUT";

/// Incoming edge reference on a vertex / in-vertex id on an edge.
pub const CF_IN_EDGE: &str = "EIN";

/// Hide/show markers of outgoing edge references.
pub const CF_OUT_EDGE_HIDDEN: &str = "EOUTH";

/// Hide/show markers of incoming edge references.
pub const CF_IN_EDGE_HIDDEN: &str = "EINH";

/// Soft deletes of outgoing edge references.
pub const CF_OUT_EDGE_SOFT_DELETE: &str = "EOUTD";

/// Soft deletes of incoming edge references.
pub const CF_IN_EDGE_SOFT_DELETE: &str = "EIND";

/// Row hard-delete marker. Wins over every other column of the row.
pub const CF_DELETE_ROW: &str = "DELROW";

/// Extended-data table names attached to the element. Qualifier: table name.
pub const CF_EXTENDED_DATA: &str = "EXTDATA";

/// Element timestamp bump with no other effect.
pub const CF_ELEMENT_TIMESTAMP: &str = "TS";

// =============================================================================
// COLUMN FAMILIES: EXTENDED DATA ROWS
// =============================================================================

/// Extended-data cell. Qualifier: `column SEP key`.
pub const CF_EXTENDED_COLUMN: &str = "EXTCOL";

/// Extended-data cell soft delete. Qualifier: `column SEP key`.
pub const CF_EXTENDED_COLUMN_SOFT_DELETE: &str = "EXTCOLD";

// =============================================================================
// SEPARATORS & MARKERS
// =============================================================================

/// Separator between the parts of a composite column qualifier.
pub const VALUE_SEPARATOR: char = '\u{1f}';

/// Prefix marking a substituted (interned) name in a physical key.
pub const SUBSTITUTION_MARKER: char = '\u{1e}';

/// Marker byte for a hide (or additional-visibility add) cell.
pub const MARKER_SET: u8 = 1;

/// Marker byte for a show (or additional-visibility delete) cell.
pub const MARKER_CLEARED: u8 = 0;

// =============================================================================
// FORMAT
// =============================================================================

/// Magic bytes stored in the graph metadata of persistent stores.
pub const MAGIC_BYTES: &[u8; 4] = b"TSRA";

/// Current physical format version.
///
/// Increment this when making breaking changes to the column layout.
pub const FORMAT_VERSION: u8 = 1;

/// Metadata key holding the format version.
pub const METADATA_FORMAT_VERSION_KEY: &str = "tessera.format.version";

/// Metadata key holding the value serializer name.
pub const METADATA_SERIALIZER_KEY: &str = "tessera.serializer";

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of an element id in bytes.
pub const MAX_ELEMENT_ID_LENGTH: usize = 1024;

/// Maximum length of a property name, key or edge label in bytes.
pub const MAX_NAME_LENGTH: usize = 1024;

/// Maximum nesting of parentheses and `!` in a visibility expression.
pub const MAX_VISIBILITY_DEPTH: usize = 64;

/// Number of physical entries fetched per page by persistent scans.
pub const SCAN_PAGE_SIZE: usize = 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separators_are_control_characters() {
        assert!(VALUE_SEPARATOR.is_control());
        assert!(SUBSTITUTION_MARKER.is_control());
        assert_ne!(VALUE_SEPARATOR, SUBSTITUTION_MARKER);
    }

    #[test]
    fn magic_bytes_correct() {
        assert_eq!(MAGIC_BYTES, b"TSRA");
    }
}
