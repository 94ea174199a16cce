//! # Columnar Backend
//!
//! Element rows as sorted wide-column cells in redb. One table per element
//! type plus one for extended data; keys are [`Key::to_bytes`], so a byte
//! range over a table is a row range.
//!
//! Writes go through one write transaction per batch and are checked
//! against a per-row clock (the newest timestamp written to the row).
//! Reads page through the table with short read transactions.

use super::streaming::{DATA, RedbStreamingStore, StreamingValueStore};
use super::{ExtendedRow, RowStore};
use crate::encoding::key::row_bounds;
use crate::encoding::{Cell, CodecSettings, Key, facets};
use crate::extended_data::{ExtendedDataMutation, ExtendedDataMutationKind, ExtendedDataRowId};
use crate::mutation::{IncreasingTime, Mutation, MutationKind, qualifier};
use crate::primitives::{
    CF_DELETE_ROW, FORMAT_VERSION, MAGIC_BYTES, METADATA_FORMAT_VERSION_KEY,
    METADATA_SERIALIZER_KEY, SCAN_PAGE_SIZE,
};
use crate::scanner::{FamilyFilter, RowCursor, RowRange, RowSource, SortedSource, wants};
use crate::{ElementType, TesseraError, Timestamp};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// =============================================================================
// TABLE DEFINITIONS
// =============================================================================

type CellTable = TableDefinition<'static, &'static [u8], &'static [u8]>;

/// Vertex rows: encoded key -> cell value.
const VERTICES: CellTable = TableDefinition::new("vertices");

/// Edge rows: encoded key -> cell value.
const EDGES: CellTable = TableDefinition::new("edges");

/// Extended-data rows: encoded key -> cell value.
const EXTENDED_DATA: CellTable = TableDefinition::new("extended_data");

/// Graph metadata: key -> opaque bytes.
const METADATA: TableDefinition<&str, &[u8]> = TableDefinition::new("metadata");

/// Newest timestamp written to each row.
const ROW_CLOCK: TableDefinition<&str, i64> = TableDefinition::new("row_clock");

const EXTENDED_CLOCK_TAG: &str = "X";

fn cell_table(element_type: ElementType) -> CellTable {
    match element_type {
        ElementType::Vertex => VERTICES,
        ElementType::Edge => EDGES,
    }
}

fn clock_key(tag: &str, row: &str) -> String {
    qualifier(&[tag, row])
}

fn format_marker() -> Vec<u8> {
    let mut marker = MAGIC_BYTES.to_vec();
    marker.push(FORMAT_VERSION);
    marker
}

fn storage(e: impl fmt::Display) -> TesseraError {
    TesseraError::StorageError(e.to_string())
}

// =============================================================================
// STORE
// =============================================================================

/// Persistent backend over a single redb file.
pub struct ColumnarStore {
    db: Arc<Database>,
    settings: CodecSettings,
    streaming: RedbStreamingStore,
    path: PathBuf,
}

impl fmt::Debug for ColumnarStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnarStore")
            .field("path", &self.path)
            .field("serializer", &self.settings.serializer.name())
            .finish_non_exhaustive()
    }
}

impl ColumnarStore {
    /// Open or create the graph database at `path`.
    ///
    /// A new database is stamped with the format version and the name of
    /// the configured serializer. An existing one must carry the same
    /// stamps, otherwise opening fails with `ConfigError`.
    pub fn open(path: impl AsRef<Path>, settings: CodecSettings) -> Result<Self, TesseraError> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(|e| TesseraError::IoError(e.to_string()))?;

        let write_txn = db.begin_write().map_err(storage)?;
        let newest = {
            for definition in [VERTICES, EDGES, EXTENDED_DATA] {
                write_txn.open_table(definition).map_err(storage)?;
            }
            write_txn.open_table(DATA).map_err(storage)?;

            let mut metadata = write_txn.open_table(METADATA).map_err(storage)?;
            let stored_serializer = metadata
                .get(METADATA_SERIALIZER_KEY)
                .map_err(storage)?
                .map(|guard| guard.value().to_vec());
            let configured = settings.serializer.name();
            match stored_serializer {
                None => {
                    metadata
                        .insert(METADATA_SERIALIZER_KEY, configured.as_bytes())
                        .map_err(storage)?;
                }
                Some(stored) if stored != configured.as_bytes() => {
                    return Err(TesseraError::ConfigError(format!(
                        "graph was written with serializer {:?}, configured {configured:?}",
                        String::from_utf8_lossy(&stored)
                    )));
                }
                Some(_) => {}
            }

            let stored_format = metadata
                .get(METADATA_FORMAT_VERSION_KEY)
                .map_err(storage)?
                .map(|guard| guard.value().to_vec());
            match stored_format {
                None => {
                    metadata
                        .insert(METADATA_FORMAT_VERSION_KEY, format_marker().as_slice())
                        .map_err(storage)?;
                }
                Some(stored) if !stored.starts_with(MAGIC_BYTES) => {
                    return Err(TesseraError::StorageError(format!(
                        "{} is not a tessera graph",
                        path.display()
                    )));
                }
                Some(stored) if stored.get(MAGIC_BYTES.len()) != Some(&FORMAT_VERSION) => {
                    return Err(TesseraError::ConfigError(format!(
                        "unsupported format version {:?}, expected {FORMAT_VERSION}",
                        stored.get(MAGIC_BYTES.len())
                    )));
                }
                Some(_) => {}
            }

            let clock = write_txn.open_table(ROW_CLOCK).map_err(storage)?;
            let mut newest: Option<Timestamp> = None;
            for entry in clock.iter().map_err(storage)? {
                let (_, timestamp) = entry.map_err(storage)?;
                newest = newest.max(Some(timestamp.value()));
            }
            newest
        };
        write_txn.commit().map_err(storage)?;

        // Timestamps handed out after reopening stay ahead of stored ones.
        if let Some(newest) = newest {
            IncreasingTime::global().observe(newest);
        }

        let db = Arc::new(db);
        tracing::debug!(path = %path.display(), serializer = settings.serializer.name(), "opened columnar store");
        Ok(Self {
            streaming: RedbStreamingStore::new(Arc::clone(&db)),
            db,
            settings,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `cells` to `row` in one transaction.
    ///
    /// Every timestamp must be at least the row clock and non-decreasing.
    /// With `hard_delete` the row's existing cells are removed and only its
    /// row-delete marker is written.
    fn write_row(
        &self,
        definition: CellTable,
        clock_key: &str,
        row: &str,
        timestamps: impl IntoIterator<Item = Timestamp>,
        cells: Vec<Cell>,
        hard_delete: bool,
    ) -> Result<(), TesseraError> {
        let write_txn = self.db.begin_write().map_err(storage)?;
        {
            let mut clock = write_txn.open_table(ROW_CLOCK).map_err(storage)?;
            let mut last = clock
                .get(clock_key)
                .map_err(storage)?
                .map(|guard| guard.value());
            for attempted in timestamps {
                if let Some(last) = last.filter(|&last| attempted < last) {
                    tracing::warn!(
                        element = %row.escape_debug(),
                        last,
                        attempted,
                        "rejected out-of-order mutation"
                    );
                    return Err(TesseraError::InvalidMutationOrdering {
                        element: row.to_string(),
                        last,
                        attempted,
                    });
                }
                last = Some(attempted);
            }

            let mut table = write_txn.open_table(definition).map_err(storage)?;
            if hard_delete {
                let (lower, upper) = RowRange::exact(row).key_bounds();
                let mut stale = Vec::new();
                for entry in table
                    .range::<&[u8]>((
                        lower.as_ref().map(Vec::as_slice),
                        upper.as_ref().map(Vec::as_slice),
                    ))
                    .map_err(storage)?
                {
                    let (key, _) = entry.map_err(storage)?;
                    stale.push(key.value().to_vec());
                }
                for key in &stale {
                    table.remove(key.as_slice()).map_err(storage)?;
                }
                tracing::debug!(row = %row.escape_debug(), removed = stale.len(), "row hard-deleted");
            }
            for cell in cells {
                if hard_delete && cell.key.family != CF_DELETE_ROW {
                    continue;
                }
                table
                    .insert(cell.key.to_bytes().as_slice(), cell.value.as_slice())
                    .map_err(storage)?;
            }
            if let Some(last) = last {
                clock.insert(clock_key, last).map_err(storage)?;
            }
        }
        write_txn.commit().map_err(storage)?;
        Ok(())
    }

    /// The row clock under `clock_key`.
    fn clock(&self, clock_key: &str) -> Result<Option<Timestamp>, TesseraError> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let clock = read_txn.open_table(ROW_CLOCK).map_err(storage)?;
        Ok(clock
            .get(clock_key)
            .map_err(storage)?
            .map(|guard| guard.value()))
    }

    /// Every cell of `definition` in `range`, in key order.
    fn read_cells(&self, definition: CellTable, range: &RowRange) -> Result<Vec<Cell>, TesseraError> {
        let (lower, upper) = range.key_bounds();
        if is_empty_range(&lower, &upper) {
            return Ok(Vec::new());
        }
        let read_txn = self.db.begin_read().map_err(storage)?;
        let table = read_txn.open_table(definition).map_err(storage)?;
        let mut cells = Vec::new();
        for entry in table
            .range::<&[u8]>((
                lower.as_ref().map(Vec::as_slice),
                upper.as_ref().map(Vec::as_slice),
            ))
            .map_err(storage)?
        {
            let (key, value) = entry.map_err(storage)?;
            cells.push(Cell::new(
                Key::from_bytes(key.value())?,
                value.value().to_vec(),
            ));
        }
        Ok(cells)
    }
}

impl RowStore for ColumnarStore {
    fn append(
        &self,
        element_type: ElementType,
        id: &str,
        mutations: &[Mutation],
    ) -> Result<(), TesseraError> {
        if mutations.is_empty() {
            return Ok(());
        }
        let codec = self.settings.codec();
        let table = facets(element_type);
        let mut cells = Vec::new();
        for mutation in mutations {
            cells.extend(codec.encode_mutation(table, id, mutation)?);
        }
        let hard_delete = mutations
            .iter()
            .any(|m| matches!(m.kind, MutationKind::DeleteRow));
        self.write_row(
            cell_table(element_type),
            &clock_key(element_type.tag(), id),
            id,
            mutations.iter().map(|m| m.timestamp),
            cells,
            hard_delete,
        )
    }

    fn last_timestamp(
        &self,
        element_type: ElementType,
        id: &str,
    ) -> Result<Option<Timestamp>, TesseraError> {
        self.clock(&clock_key(element_type.tag(), id))
    }

    fn row_source(
        &self,
        element_type: ElementType,
        families: FamilyFilter,
    ) -> Result<Box<dyn RowSource>, TesseraError> {
        let source = ColumnarSource::new(Arc::clone(&self.db), cell_table(element_type));
        Ok(Box::new(RowCursor::new(
            Box::new(source),
            element_type,
            self.settings.clone(),
            families,
        )))
    }

    fn append_extended(
        &self,
        id: &ExtendedDataRowId,
        mutations: &[ExtendedDataMutation],
    ) -> Result<(), TesseraError> {
        if mutations.is_empty() {
            return Ok(());
        }
        let codec = self.settings.codec();
        let mut cells = Vec::new();
        for mutation in mutations {
            cells.extend(codec.encode_extended(id, mutation)?);
        }
        let hard_delete = mutations
            .iter()
            .any(|m| matches!(m.kind, ExtendedDataMutationKind::DeleteRow));
        let row = id.row_key();
        self.write_row(
            EXTENDED_DATA,
            &clock_key(EXTENDED_CLOCK_TAG, &row),
            &row,
            mutations.iter().map(|m| m.timestamp),
            cells,
            hard_delete,
        )
    }

    fn last_extended_timestamp(
        &self,
        id: &ExtendedDataRowId,
    ) -> Result<Option<Timestamp>, TesseraError> {
        self.clock(&clock_key(EXTENDED_CLOCK_TAG, &id.row_key()))
    }

    fn extended_rows(
        &self,
        element_type: ElementType,
        element_id: &str,
        table_name: Option<&str>,
    ) -> Result<Vec<ExtendedRow>, TesseraError> {
        let prefix = match table_name {
            Some(table) => ExtendedDataRowId::table_prefix(element_type, element_id, table),
            None => ExtendedDataRowId::element_prefix(element_type, element_id),
        };
        let mut grouped: BTreeMap<String, Vec<Cell>> = BTreeMap::new();
        for cell in self.read_cells(EXTENDED_DATA, &RowRange::prefix(prefix))? {
            grouped.entry(cell.key.row.clone()).or_default().push(cell);
        }
        let codec = self.settings.codec();
        grouped
            .into_iter()
            .map(|(row, cells)| {
                Ok((
                    ExtendedDataRowId::parse(&row)?,
                    codec.decode_extended_row(&cells)?,
                ))
            })
            .collect()
    }

    fn metadata_entries(&self) -> Result<BTreeMap<String, Vec<u8>>, TesseraError> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let table = read_txn.open_table(METADATA).map_err(storage)?;
        let mut entries = BTreeMap::new();
        for entry in table.iter().map_err(storage)? {
            let (key, value) = entry.map_err(storage)?;
            entries.insert(key.value().to_string(), value.value().to_vec());
        }
        Ok(entries)
    }

    fn put_metadata(&self, key: &str, value: &[u8]) -> Result<(), TesseraError> {
        let write_txn = self.db.begin_write().map_err(storage)?;
        {
            let mut table = write_txn.open_table(METADATA).map_err(storage)?;
            table.insert(key, value).map_err(storage)?;
        }
        write_txn.commit().map_err(storage)?;
        Ok(())
    }

    fn streaming_values(&self) -> &dyn StreamingValueStore {
        &self.streaming
    }
}

// =============================================================================
// PAGED SOURCE
// =============================================================================

/// Whether no key can lie between `lower` and `upper`.
fn is_empty_range(lower: &Bound<Vec<u8>>, upper: &Bound<Vec<u8>>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l) | Bound::Excluded(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u)) => l >= u,
        _ => false,
    }
}

/// Sorted source over one redb table.
///
/// Cells are fetched `SCAN_PAGE_SIZE` keys at a time, each page in its own
/// read transaction. Writes committed between pages become visible to later
/// pages.
#[derive(Clone)]
struct ColumnarSource {
    db: Arc<Database>,
    definition: CellTable,
    families: FamilyFilter,
    page: VecDeque<Cell>,
    resume: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    exhausted: bool,
}

impl fmt::Debug for ColumnarSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnarSource")
            .field("buffered", &self.page.len())
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

impl ColumnarSource {
    fn new(db: Arc<Database>, definition: CellTable) -> Self {
        Self {
            db,
            definition,
            families: None,
            page: VecDeque::new(),
            resume: Bound::Unbounded,
            upper: Bound::Unbounded,
            exhausted: true,
        }
    }

    /// Read pages until one yields a wanted cell or the range ends.
    fn fill(&mut self) -> Result<(), TesseraError> {
        while self.page.is_empty() && !self.exhausted {
            if is_empty_range(&self.resume, &self.upper) {
                self.exhausted = true;
                break;
            }
            let lower = self.resume.clone();
            let upper = self.upper.clone();
            let read_txn = self.db.begin_read().map_err(storage)?;
            let table = read_txn.open_table(self.definition).map_err(storage)?;
            let range = table
                .range::<&[u8]>((
                    lower.as_ref().map(Vec::as_slice),
                    upper.as_ref().map(Vec::as_slice),
                ))
                .map_err(storage)?;
            let mut read = 0;
            for entry in range.take(SCAN_PAGE_SIZE) {
                let (key, value) = entry.map_err(storage)?;
                read += 1;
                let bytes = key.value();
                self.resume = Bound::Excluded(bytes.to_vec());
                let key = Key::from_bytes(bytes)?;
                if wants(self.families.as_ref(), &key.family) {
                    self.page.push_back(Cell::new(key, value.value().to_vec()));
                }
            }
            if read < SCAN_PAGE_SIZE {
                self.exhausted = true;
            }
        }
        Ok(())
    }
}

impl SortedSource for ColumnarSource {
    fn seek(
        &mut self,
        range: &RowRange,
        families: Option<&BTreeSet<&'static str>>,
    ) -> Result<(), TesseraError> {
        let (lower, upper) = range.key_bounds();
        self.resume = lower;
        self.upper = upper;
        self.families = families.cloned();
        self.page.clear();
        self.exhausted = false;
        self.fill()
    }

    fn top(&self) -> Option<&Cell> {
        self.page.front()
    }

    fn advance(&mut self) -> Result<(), TesseraError> {
        self.page.pop_front();
        self.fill()
    }

    fn skip_row(&mut self) -> Result<(), TesseraError> {
        let Some(row) = self.page.front().map(|cell| cell.key.row.clone()) else {
            return Ok(());
        };
        while self.page.front().is_some_and(|cell| cell.key.row == row) {
            self.page.pop_front();
        }
        if self.page.is_empty() {
            // jump over the unread tail of the row
            if let (Bound::Included(next), _) =
                row_bounds(Bound::Excluded(row.as_str()), Bound::Unbounded)
            {
                self.resume = Bound::Included(next);
            }
            self.fill()?;
        }
        Ok(())
    }

    fn deep_copy(&self) -> Box<dyn SortedSource> {
        Box::new(self.clone())
    }
}

// =============================================================================
// TESTS
// =============================================================================
