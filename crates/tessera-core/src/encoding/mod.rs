//! # Encoding Layer
//!
//! Physical representation of the columnar backend:
//! - `key`: cell addresses and their order-preserving byte form
//! - `columns`: facet tables and the mutation <-> cell codec
//! - `fields`: length-prefixed multi-field cell values
//! - `serializer`: pluggable typed value serialization
//! - `names`: name substitution (interning) for names and labels

pub mod columns;
pub mod fields;
pub mod key;
pub mod names;
pub mod serializer;

pub use columns::{
    Cell, CellCodec, CodecSettings, EDGE_FACETS, Facet, FacetTable, VERTEX_FACETS, column_families_to_fetch,
    facets,
};
pub use fields::{FieldReader, FieldWriter};
pub use key::Key;
pub use names::{IdentityNameSubstitution, NameSubstitution, TableNameSubstitution};
pub use serializer::{PostcardSerializer, ValueSerializer};
