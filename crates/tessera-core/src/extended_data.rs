//! # Extended Data
//!
//! Schema-less side tables attached to an element. A row is keyed by
//! (element type, element id, table name, row id) and holds
//! (column, key) -> value cells with their own visibility and timestamp.
//!
//! Rows are folded with the same rules as element properties: column
//! tombstones, soft deletes, additional visibilities and the row-delete
//! marker (see [`crate::materializer::fold_extended_row`]).

use crate::mutation::{Column, Timestamped, qualifier};
use crate::primitives::{
    CF_ADDITIONAL_VISIBILITY, CF_DELETE_ROW, CF_EXTENDED_COLUMN, CF_EXTENDED_COLUMN_SOFT_DELETE,
    VALUE_SEPARATOR,
};
use crate::visibility::Visibility;
use crate::{ElementType, EventData, TesseraError, Timestamp, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifies one extended-data row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExtendedDataRowId {
    pub element_type: ElementType,
    pub element_id: String,
    pub table_name: String,
    pub row_id: String,
}

impl ExtendedDataRowId {
    #[must_use]
    pub fn new(
        element_type: ElementType,
        element_id: impl Into<String>,
        table_name: impl Into<String>,
        row_id: impl Into<String>,
    ) -> Self {
        Self {
            element_type,
            element_id: element_id.into(),
            table_name: table_name.into(),
            row_id: row_id.into(),
        }
    }

    /// Physical row key: `type SEP element SEP table SEP row`.
    #[must_use]
    pub fn row_key(&self) -> String {
        qualifier(&[
            self.element_type.tag(),
            self.element_id.as_str(),
            self.table_name.as_str(),
            self.row_id.as_str(),
        ])
    }

    /// Prefix shared by every extended-data row of one element.
    #[must_use]
    pub fn element_prefix(element_type: ElementType, element_id: &str) -> String {
        let mut prefix = qualifier(&[element_type.tag(), element_id]);
        prefix.push(VALUE_SEPARATOR);
        prefix
    }

    /// Prefix shared by every row of one table of one element.
    #[must_use]
    pub fn table_prefix(element_type: ElementType, element_id: &str, table_name: &str) -> String {
        let mut prefix = qualifier(&[element_type.tag(), element_id, table_name]);
        prefix.push(VALUE_SEPARATOR);
        prefix
    }

    pub fn parse(row_key: &str) -> Result<Self, TesseraError> {
        let parts: Vec<&str> = row_key.split(VALUE_SEPARATOR).collect();
        let [tag, element_id, table_name, row_id] = parts.as_slice() else {
            return Err(TesseraError::corrupt(
                row_key,
                "extended data row key must have four parts",
            ));
        };
        let element_type = match *tag {
            "V" => ElementType::Vertex,
            "E" => ElementType::Edge,
            other => {
                return Err(TesseraError::corrupt(
                    row_key,
                    format!("unknown element type tag {other:?}"),
                ));
            }
        };
        Ok(Self::new(element_type, *element_id, *table_name, *row_id))
    }
}

impl fmt::Display for ExtendedDataRowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}/{}",
            self.element_type, self.element_id, self.table_name, self.row_id
        )
    }
}

// =============================================================================
// MUTATIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExtendedDataMutationKind {
    SetCell {
        column: String,
        key: String,
        value: Value,
        visibility: Visibility,
    },
    DeleteCell {
        column: String,
        key: String,
        visibility: Visibility,
    },
    SoftDeleteCell {
        column: String,
        key: String,
        visibility: Visibility,
        data: EventData,
    },
    AddAdditionalVisibility {
        visibility: Visibility,
        data: EventData,
    },
    DeleteAdditionalVisibility {
        visibility: Visibility,
        data: EventData,
    },
    DeleteRow,
}

/// A timestamped change to one extended-data row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedDataMutation {
    pub timestamp: Timestamp,
    pub kind: ExtendedDataMutationKind,
}

impl ExtendedDataMutation {
    #[must_use]
    pub fn new(timestamp: Timestamp, kind: ExtendedDataMutationKind) -> Self {
        Self { timestamp, kind }
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        matches!(self.kind, ExtendedDataMutationKind::DeleteCell { .. })
    }

    #[must_use]
    pub fn column(&self) -> Column {
        match &self.kind {
            ExtendedDataMutationKind::SetCell {
                column,
                key,
                visibility,
                ..
            }
            | ExtendedDataMutationKind::DeleteCell {
                column,
                key,
                visibility,
            } => Column::new(
                CF_EXTENDED_COLUMN,
                qualifier(&[column.as_str(), key.as_str()]),
                visibility.clone(),
            ),
            ExtendedDataMutationKind::SoftDeleteCell {
                column,
                key,
                visibility,
                ..
            } => Column::new(
                CF_EXTENDED_COLUMN_SOFT_DELETE,
                qualifier(&[column.as_str(), key.as_str()]),
                visibility.clone(),
            ),
            ExtendedDataMutationKind::AddAdditionalVisibility { visibility, .. }
            | ExtendedDataMutationKind::DeleteAdditionalVisibility { visibility, .. } => {
                Column::new(
                    CF_ADDITIONAL_VISIBILITY,
                    visibility.as_str().to_string(),
                    Visibility::empty(),
                )
            }
            ExtendedDataMutationKind::DeleteRow => {
                Column::new(CF_DELETE_ROW, String::new(), Visibility::empty())
            }
        }
    }
}

impl Timestamped for ExtendedDataMutation {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

// =============================================================================
// MATERIALIZED ROWS
// =============================================================================

/// One readable cell of an extended-data row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedDataCell {
    pub column: String,
    pub key: String,
    pub value: Value,
    pub visibility: Visibility,
    pub timestamp: Timestamp,
}

/// A materialized extended-data row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedDataRow {
    pub id: ExtendedDataRowId,
    /// Ordered by (column, key, visibility).
    pub cells: Vec<ExtendedDataCell>,
    pub additional_visibilities: BTreeSet<Visibility>,
    pub timestamp: Timestamp,
}

impl ExtendedDataRow {
    /// First value of `column`, whatever its key and visibility.
    #[must_use]
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.cells
            .iter()
            .find(|cell| cell.column == column)
            .map(|cell| &cell.value)
    }

    #[must_use]
    pub fn column_names(&self) -> BTreeSet<&str> {
        self.cells.iter().map(|cell| cell.column.as_str()).collect()
    }
}
