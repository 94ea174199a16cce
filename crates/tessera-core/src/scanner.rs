//! # Row Scanner
//!
//! Streams sorted physical cells row by row into the materializer and
//! yields at most one element per row.
//!
//! Layers, bottom-up:
//! - [`SortedSource`]: a positioned cursor over sorted [`Cell`]s
//! - [`RowSource`]: one decoded row (its [`Mutation`]s) at a time, either
//!   from cells ([`RowCursor`]) or straight from mutation logs ([`LogCursor`])
//! - [`ElementScanner`]: folds each row with [`materialize`] and applies the
//!   per-row error policy
//!
//! A row carrying a row-delete marker is not decoded: the rest of the row is
//! skipped and the row is reported as deleted.

use crate::element::Element;
use crate::encoding::key::{prefix_successor, row_bounds, row_start_prefix};
use crate::encoding::{Cell, CodecSettings, FacetTable, facets};
use crate::materializer::{ReadContext, materialize};
use crate::mutation::{Mutation, MutationKind};
use crate::primitives::CF_DELETE_ROW;
use crate::{ElementType, TesseraError, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

/// Column families a cursor keeps; `None` keeps everything.
pub type FamilyFilter = Option<BTreeSet<&'static str>>;

pub(crate) fn wants(families: Option<&BTreeSet<&'static str>>, family: &str) -> bool {
    families.is_none_or(|families| families.contains(family))
}

// =============================================================================
// ROW RANGE
// =============================================================================

/// A contiguous range of rows, compared by row string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowRange {
    #[default]
    All,
    Exact(String),
    /// Every row starting with the prefix.
    Prefix(String),
    Between {
        start: Bound<String>,
        end: Bound<String>,
    },
}

impl RowRange {
    #[must_use]
    pub fn exact(row: impl Into<String>) -> Self {
        Self::Exact(row.into())
    }

    #[must_use]
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    #[must_use]
    pub fn between(start: Bound<String>, end: Bound<String>) -> Self {
        Self::Between { start, end }
    }

    /// `row` sorts before every row of the range.
    #[must_use]
    pub fn is_before(&self, row: &str) -> bool {
        match self {
            Self::All => false,
            Self::Exact(exact) => row < exact.as_str(),
            Self::Prefix(prefix) => row < prefix.as_str(),
            Self::Between { start, .. } => match start {
                Bound::Included(start) => row < start.as_str(),
                Bound::Excluded(start) => row <= start.as_str(),
                Bound::Unbounded => false,
            },
        }
    }

    /// `row` sorts after every row of the range.
    #[must_use]
    pub fn is_past(&self, row: &str) -> bool {
        match self {
            Self::All => false,
            Self::Exact(exact) => row > exact.as_str(),
            Self::Prefix(prefix) => row > prefix.as_str() && !row.starts_with(prefix.as_str()),
            Self::Between { end, .. } => match end {
                Bound::Included(end) => row > end.as_str(),
                Bound::Excluded(end) => row >= end.as_str(),
                Bound::Unbounded => false,
            },
        }
    }

    #[must_use]
    pub fn contains(&self, row: &str) -> bool {
        !self.is_before(row) && !self.is_past(row)
    }

    /// Bounds over encoded keys covering every cell of the range's rows.
    #[must_use]
    pub fn key_bounds(&self) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
        match self {
            Self::All => (Bound::Unbounded, Bound::Unbounded),
            Self::Exact(row) => row_bounds(Bound::Included(row), Bound::Included(row)),
            Self::Prefix(prefix) => {
                let start = row_start_prefix(prefix);
                let end = prefix_successor(&start).map_or(Bound::Unbounded, Bound::Excluded);
                (Bound::Included(start), end)
            }
            Self::Between { start, end } => row_bounds(
                start.as_ref().map(String::as_str),
                end.as_ref().map(String::as_str),
            ),
        }
    }
}

impl fmt::Display for RowRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "(-inf, +inf)"),
            Self::Exact(row) => write!(f, "[{row}]"),
            Self::Prefix(prefix) => write!(f, "[{prefix}*]"),
            Self::Between { start, end } => {
                match start {
                    Bound::Included(s) => write!(f, "[{s}")?,
                    Bound::Excluded(s) => write!(f, "({s}")?,
                    Bound::Unbounded => write!(f, "(-inf")?,
                }
                match end {
                    Bound::Included(e) => write!(f, ", {e}]"),
                    Bound::Excluded(e) => write!(f, ", {e})"),
                    Bound::Unbounded => write!(f, ", +inf)"),
                }
            }
        }
    }
}

// =============================================================================
// SORTED SOURCE
// =============================================================================

/// Positioned cursor over cells in [`crate::encoding::Key`] order.
pub trait SortedSource: Send + fmt::Debug {
    /// Position on the first cell of `range` whose family passes `families`.
    fn seek(
        &mut self,
        range: &RowRange,
        families: Option<&BTreeSet<&'static str>>,
    ) -> Result<(), TesseraError>;

    /// Current cell, `None` once the range is exhausted.
    fn top(&self) -> Option<&Cell>;

    fn advance(&mut self) -> Result<(), TesseraError>;

    /// Move past every remaining cell of the current row.
    fn skip_row(&mut self) -> Result<(), TesseraError> {
        let Some(row) = self.top().map(|cell| cell.key.row.clone()) else {
            return Ok(());
        };
        while self.top().is_some_and(|cell| cell.key.row == row) {
            self.advance()?;
        }
        Ok(())
    }

    /// Independent cursor over the same cells, at the same position.
    fn deep_copy(&self) -> Box<dyn SortedSource>;
}

/// Sorted source over an immutable in-memory cell snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    cells: Arc<Vec<Cell>>,
    pos: usize,
    range: RowRange,
    families: FamilyFilter,
}

impl SnapshotSource {
    /// Sorts `cells`; the last of several cells with the same key wins.
    #[must_use]
    pub fn new(mut cells: Vec<Cell>) -> Self {
        cells.reverse();
        cells.sort_by(|a, b| a.key.cmp(&b.key));
        cells.dedup_by(|later, earlier| later.key == earlier.key);
        Self {
            cells: Arc::new(cells),
            pos: 0,
            range: RowRange::All,
            families: None,
        }
    }

    fn settle(&mut self) {
        while let Some(cell) = self.cells.get(self.pos) {
            if self.range.is_past(&cell.key.row) || wants(self.families.as_ref(), &cell.key.family)
            {
                break;
            }
            self.pos += 1;
        }
    }
}

impl SortedSource for SnapshotSource {
    fn seek(
        &mut self,
        range: &RowRange,
        families: Option<&BTreeSet<&'static str>>,
    ) -> Result<(), TesseraError> {
        self.range = range.clone();
        self.families = families.cloned();
        self.pos = self
            .cells
            .partition_point(|cell| range.is_before(&cell.key.row));
        self.settle();
        Ok(())
    }

    fn top(&self) -> Option<&Cell> {
        self.cells
            .get(self.pos)
            .filter(|cell| !self.range.is_past(&cell.key.row))
    }

    fn advance(&mut self) -> Result<(), TesseraError> {
        if self.pos < self.cells.len() {
            self.pos += 1;
        }
        self.settle();
        Ok(())
    }

    fn skip_row(&mut self) -> Result<(), TesseraError> {
        if let Some(row) = self.top().map(|cell| cell.key.row.clone()) {
            self.pos = self
                .cells
                .partition_point(|cell| cell.key.row.as_str() <= row.as_str());
            self.settle();
        }
        Ok(())
    }

    fn deep_copy(&self) -> Box<dyn SortedSource> {
        Box::new(self.clone())
    }
}

// =============================================================================
// ROW SOURCES
// =============================================================================

/// The mutations of one row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowMutations {
    pub row: String,
    pub mutations: Vec<Mutation>,
}

impl RowMutations {
    fn deleted(row: String, timestamp: Timestamp) -> Self {
        Self {
            row,
            mutations: vec![Mutation::new(timestamp, MutationKind::DeleteRow)],
        }
    }

    /// Whether the row carries a row-delete marker.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.mutations
            .iter()
            .any(|m| matches!(m.kind, MutationKind::DeleteRow))
    }
}

/// Row-at-a-time cursor. Position it with `seek` before reading.
pub trait RowSource: Send + fmt::Debug {
    fn seek(&mut self, range: &RowRange) -> Result<(), TesseraError>;

    /// Next row, `None` at the end of the range. A decode error consumes
    /// the offending row, so the following call continues with the next.
    fn next_row(&mut self) -> Option<Result<RowMutations, TesseraError>>;

    fn deep_copy(&self) -> Box<dyn RowSource>;
}

/// Decodes rows out of a [`SortedSource`].
#[derive(Debug)]
pub struct RowCursor {
    source: Box<dyn SortedSource>,
    table: &'static FacetTable,
    settings: CodecSettings,
    families: FamilyFilter,
}

impl RowCursor {
    #[must_use]
    pub fn new(
        source: Box<dyn SortedSource>,
        element_type: ElementType,
        settings: CodecSettings,
        families: FamilyFilter,
    ) -> Self {
        Self {
            source,
            table: facets(element_type),
            settings,
            families,
        }
    }

    fn read_row(&mut self, row: String) -> Result<RowMutations, TesseraError> {
        let mut cells = Vec::new();
        while let Some(cell) = self.source.top() {
            if cell.key.row != row {
                break;
            }
            if cell.key.family == CF_DELETE_ROW {
                let timestamp = cell.key.timestamp;
                self.source.skip_row()?;
                tracing::trace!(row = %row.escape_debug(), "row-delete marker, skipping row");
                return Ok(RowMutations::deleted(row, timestamp));
            }
            cells.push(cell.clone());
            self.source.advance()?;
        }
        let mutations = self.settings.codec().decode_row(self.table, &cells)?;
        Ok(RowMutations { row, mutations })
    }
}

impl RowSource for RowCursor {
    fn seek(&mut self, range: &RowRange) -> Result<(), TesseraError> {
        self.source.seek(range, self.families.as_ref())
    }

    fn next_row(&mut self) -> Option<Result<RowMutations, TesseraError>> {
        let row = self.source.top()?.key.row.clone();
        Some(self.read_row(row))
    }

    fn deep_copy(&self) -> Box<dyn RowSource> {
        Box::new(Self {
            source: self.source.deep_copy(),
            table: self.table,
            settings: self.settings.clone(),
            families: self.families.clone(),
        })
    }
}

/// Snapshot of in-memory logs, sorted by row.
pub type LogSnapshot = Arc<Vec<(String, Arc<Vec<Mutation>>)>>;

/// Row source over mutation-log snapshots. Applies the same family pruning
/// as the columnar path.
#[derive(Debug, Clone)]
pub struct LogCursor {
    rows: LogSnapshot,
    pos: usize,
    range: RowRange,
    element_type: ElementType,
    families: FamilyFilter,
}

impl LogCursor {
    #[must_use]
    pub fn new(rows: LogSnapshot, element_type: ElementType, families: FamilyFilter) -> Self {
        Self {
            rows,
            pos: 0,
            range: RowRange::All,
            element_type,
            families,
        }
    }
}

impl RowSource for LogCursor {
    fn seek(&mut self, range: &RowRange) -> Result<(), TesseraError> {
        self.range = range.clone();
        self.pos = self.rows.partition_point(|(row, _)| range.is_before(row));
        Ok(())
    }

    fn next_row(&mut self) -> Option<Result<RowMutations, TesseraError>> {
        let (row, log) = self.rows.get(self.pos)?;
        if self.range.is_past(row) {
            return None;
        }
        self.pos += 1;
        if let Some(delete) = log
            .iter()
            .find(|m| matches!(m.kind, MutationKind::DeleteRow))
        {
            return Some(Ok(RowMutations::deleted(row.clone(), delete.timestamp)));
        }
        let mutations = log
            .iter()
            .filter(|m| wants(self.families.as_ref(), m.column(self.element_type).family))
            .cloned()
            .collect();
        Some(Ok(RowMutations {
            row: row.clone(),
            mutations,
        }))
    }

    fn deep_copy(&self) -> Box<dyn RowSource> {
        Box::new(self.clone())
    }
}

// =============================================================================
// ELEMENT SCANNER
// =============================================================================

/// What a multi-row scan does with a row that fails to decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanErrorPolicy {
    /// Log the row at `warn` and continue with the next one.
    #[default]
    SkipAndLog,
    /// Yield the error and end the scan.
    Abort,
}

/// Errors confined to a single row. Anything else ends a scan.
fn is_row_local(error: &TesseraError) -> bool {
    matches!(
        error,
        TesseraError::CorruptElement { .. }
            | TesseraError::UnknownColumnFamily(_)
            | TesseraError::SerializationError(_)
    )
}

/// Iterator of materialized elements over a row range.
#[derive(Debug)]
pub struct ElementScanner {
    rows: Option<Box<dyn RowSource>>,
    element_type: ElementType,
    ctx: ReadContext,
    policy: ScanErrorPolicy,
}

impl ElementScanner {
    /// Scanner over `rows`, positioned on `range`.
    pub fn new(
        mut rows: Box<dyn RowSource>,
        element_type: ElementType,
        range: &RowRange,
        ctx: ReadContext,
        policy: ScanErrorPolicy,
    ) -> Result<Self, TesseraError> {
        rows.seek(range)?;
        Ok(Self {
            rows: Some(rows),
            element_type,
            ctx,
            policy,
        })
    }

    /// Reposition on `range`.
    pub fn seek(&mut self, range: &RowRange) -> Result<(), TesseraError> {
        match self.rows.as_mut() {
            Some(rows) => rows.seek(range),
            None => Err(TesseraError::StorageError("scanner is closed".to_string())),
        }
    }

    /// Independent scanner at the same position. A closed scanner copies
    /// as closed.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        Self {
            rows: self.rows.as_ref().map(|rows| rows.deep_copy()),
            element_type: self.element_type,
            ctx: self.ctx.clone(),
            policy: self.policy,
        }
    }

    /// Release the underlying cursor. Idempotent.
    pub fn close(&mut self) {
        if self.rows.take().is_some() {
            tracing::trace!(element_type = %self.element_type, "scanner closed");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.rows.is_none()
    }

    /// Next element as one encoded record.
    pub fn next_encoded(&mut self) -> Option<Result<Vec<u8>, TesseraError>> {
        self.next().map(|element| element.and_then(|e| encode_element(&e)))
    }

    /// `Some(error)` when the scan must stop with it.
    fn handle(&mut self, row: Option<&str>, error: TesseraError) -> Option<TesseraError> {
        if self.policy == ScanErrorPolicy::SkipAndLog && is_row_local(&error) {
            tracing::warn!(
                element_type = %self.element_type,
                row = row.unwrap_or("?"),
                error = %error,
                "skipping undecodable row"
            );
            return None;
        }
        self.close();
        Some(error)
    }
}

impl Iterator for ElementScanner {
    type Item = Result<Element, TesseraError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let next = self.rows.as_mut()?.next_row()?;
            let row = match next {
                Ok(row) => row,
                Err(e) => match self.handle(None, e) {
                    Some(e) => return Some(Err(e)),
                    None => continue,
                },
            };
            if row.is_deleted() {
                continue;
            }
            match materialize(self.element_type, &row.row, &row.mutations, &self.ctx) {
                Ok(Some(element)) => return Some(Ok(element)),
                Ok(None) => {}
                Err(e) => {
                    if let Some(e) = self.handle(Some(&row.row), e) {
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}

/// Whole element as one compact record.
pub fn encode_element(element: &Element) -> Result<Vec<u8>, TesseraError> {
    postcard::to_allocvec(element).map_err(|e| TesseraError::SerializationError(e.to_string()))
}

pub fn decode_element(bytes: &[u8]) -> Result<Element, TesseraError> {
    postcard::from_bytes(bytes).map_err(|e| TesseraError::SerializationError(e.to_string()))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{Key, VERTEX_FACETS};
    use crate::primitives::{CF_PROPERTY, CF_VERTEX_SIGNAL};
    use crate::visibility::{Authorizations, Visibility};
    use crate::{FetchHints, Value};

    fn vertex(ts: i64, name: &str) -> Vec<Mutation> {
        vec![
            Mutation::alter_visibility(ts, Visibility::empty()),
            Mutation::add_property(ts, "k1", "name", Value::text(name), Visibility::empty()),
        ]
    }

    fn cells(rows: &[(&str, Vec<Mutation>)]) -> Vec<Cell> {
        let settings = CodecSettings::default();
        let codec = settings.codec();
        rows.iter()
            .flat_map(|(row, mutations)| {
                mutations
                    .iter()
                    .flat_map(|m| {
                        codec
                            .encode_mutation(&VERTEX_FACETS, row, m)
                            .expect("encode")
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn scanner(cells: Vec<Cell>, range: &RowRange, policy: ScanErrorPolicy) -> ElementScanner {
        let source = Box::new(SnapshotSource::new(cells));
        let rows = Box::new(RowCursor::new(
            source,
            ElementType::Vertex,
            CodecSettings::default(),
            None,
        ));
        let ctx = ReadContext::new(Authorizations::empty(), FetchHints::all());
        ElementScanner::new(rows, ElementType::Vertex, range, ctx, policy).expect("scanner")
    }

    fn ids(scanner: ElementScanner) -> Vec<String> {
        scanner
            .map(|e| e.expect("element").id().to_string())
            .collect()
    }

    fn corrupt_cell(row: &str) -> Cell {
        Cell::new(
            Key::new(row, CF_PROPERTY, "name\u{1f}k2", "", 9),
            vec![0xFF, 0xFF],
        )
    }

    #[test]
    fn range_membership() {
        let prefix = RowRange::prefix("v1");
        assert!(prefix.is_before("v0"));
        assert!(prefix.contains("v1") && prefix.contains("v10"));
        assert!(prefix.is_past("v2"));

        let between = RowRange::between(Bound::Excluded("a".into()), Bound::Included("c".into()));
        assert!(between.is_before("a"));
        assert!(between.contains("b") && between.contains("c"));
        assert!(between.is_past("c0"));
        assert!(RowRange::All.contains(""));
    }

    #[test]
    fn one_element_per_row_in_row_order() {
        let cells = cells(&[
            ("v2", vertex(1, "b")),
            ("v1", vertex(1, "a")),
            ("v3", vertex(1, "c")),
        ]);
        let scanner = scanner(cells, &RowRange::All, ScanErrorPolicy::Abort);
        assert_eq!(ids(scanner), vec!["v1", "v2", "v3"]);
    }

    #[test]
    fn deleted_rows_are_skipped_without_decoding() {
        let mut cells = cells(&[("v1", vertex(1, "a")), ("v2", vertex(1, "b"))]);
        cells.push(Cell::new(Key::new("v1", CF_DELETE_ROW, "", "", 5), Vec::new()));
        // undecodable cell after the marker is never read
        cells.push(corrupt_cell("v1"));
        let scanner = scanner(cells, &RowRange::All, ScanErrorPolicy::Abort);
        assert_eq!(ids(scanner), vec!["v2"]);
    }

    #[test]
    fn corrupt_row_is_isolated_or_aborts() {
        let mut cells = cells(&[
            ("v1", vertex(1, "a")),
            ("v2", vertex(1, "b")),
            ("v3", vertex(1, "c")),
        ]);
        cells.push(corrupt_cell("v2"));

        let lenient = scanner(cells.clone(), &RowRange::All, ScanErrorPolicy::SkipAndLog);
        assert_eq!(ids(lenient), vec!["v1", "v3"]);

        let mut strict = scanner(cells, &RowRange::All, ScanErrorPolicy::Abort);
        assert!(strict.next().expect("v1").is_ok());
        assert!(matches!(
            strict.next(),
            Some(Err(TesseraError::CorruptElement { .. }))
        ));
        assert!(strict.is_closed());
        assert!(strict.next().is_none());
    }

    #[test]
    fn seek_repositions() {
        let cells = cells(&[
            ("a1", vertex(1, "a")),
            ("b1", vertex(1, "b")),
            ("b2", vertex(1, "c")),
            ("c1", vertex(1, "d")),
        ]);
        let mut scanner = scanner(cells, &RowRange::prefix("b"), ScanErrorPolicy::Abort);
        assert_eq!(scanner.next().expect("row").expect("ok").id(), "b1");
        scanner.seek(&RowRange::exact("c1")).expect("seek");
        assert_eq!(ids(scanner), vec!["c1"]);
    }

    #[test]
    fn deep_copy_is_independent() {
        let cells = cells(&[("v1", vertex(1, "a")), ("v2", vertex(1, "b"))]);
        let mut original = scanner(cells, &RowRange::All, ScanErrorPolicy::Abort);
        assert!(original.next().is_some());
        let copy = original.deep_copy();
        assert_eq!(ids(copy), vec!["v2"]);
        assert_eq!(original.next().expect("row").expect("ok").id(), "v2");
    }

    #[test]
    fn close_is_idempotent() {
        let cells = cells(&[("v1", vertex(1, "a"))]);
        let mut scanner = scanner(cells, &RowRange::All, ScanErrorPolicy::Abort);
        scanner.close();
        scanner.close();
        assert!(scanner.is_closed());
        assert!(scanner.next().is_none());
        assert!(scanner.seek(&RowRange::All).is_err());
    }

    #[test]
    fn encoded_records_decode_to_the_same_element() {
        let cells = cells(&[("v1", vertex(1, "a"))]);
        let mut scanner = scanner(cells, &RowRange::All, ScanErrorPolicy::Abort);
        let record = scanner.next_encoded().expect("row").expect("encoded");
        let element = decode_element(&record).expect("decode");
        assert_eq!(element.id(), "v1");
        assert_eq!(
            element.property_value("name").expect("fetched"),
            Some(&Value::text("a"))
        );
    }

    #[test]
    fn family_filter_prunes_cells() {
        let families: BTreeSet<&'static str> = [CF_VERTEX_SIGNAL].into_iter().collect();
        let mut source = SnapshotSource::new(cells(&[("v1", vertex(1, "a"))]));
        source
            .seek(&RowRange::All, Some(&families))
            .expect("seek");
        let mut seen = Vec::new();
        while let Some(cell) = source.top() {
            seen.push(cell.key.family.clone());
            source.advance().expect("advance");
        }
        assert_eq!(seen, vec![CF_VERTEX_SIGNAL]);
    }

    #[test]
    fn log_cursor_matches_cell_cursor() {
        let rows: LogSnapshot = Arc::new(vec![
            ("v1".to_string(), Arc::new(vertex(1, "a"))),
            ("v2".to_string(), Arc::new(vertex(2, "b"))),
        ]);
        let families: FamilyFilter = Some([CF_VERTEX_SIGNAL].into_iter().collect());
        let mut cursor = LogCursor::new(rows, ElementType::Vertex, families);
        cursor.seek(&RowRange::exact("v2")).expect("seek");
        let row = cursor.next_row().expect("row").expect("ok");
        assert_eq!(row.row, "v2");
        assert_eq!(row.mutations.len(), 1);
        assert!(cursor.next_row().is_none());
    }
}
