//! # Graph
//!
//! The facade tying a storage backend, the metadata cache and the commit
//! path together. Reads go: prune column families from the fetch hints,
//! read the row, fold it with the materializer.

use crate::commit::{CommitOutcome, ElementMutation, plan_commit};
use crate::config::{BackendKind, GraphConfig};
use crate::element::Element;
use crate::encoding::column_families_to_fetch;
use crate::extended_data::ExtendedDataRow;
use crate::history::{HistoricalEvent, HistoricalEventId, HistoricalEventsFetchHints};
use crate::materializer::{ReadContext, fold_extended_row, historical_events, materialize};
use crate::metadata::{GraphMetadataCache, MetadataSnapshot};
use crate::mutation::IncreasingTime;
use crate::scanner::{ElementScanner, RowRange};
use crate::storage::{ColumnarStore, InMemoryStore, RowStore, StorageBackend};
use crate::visibility::Authorizations;
use crate::{
    Direction, ElementId, ElementType, FetchHints, StreamingValue, StreamingValueRef,
    TesseraError, Timestamp,
};

// =============================================================================
// READ OPTIONS
// =============================================================================

/// Per-read knobs besides the requester's authorizations.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub fetch_hints: FetchHints,
    /// Read the graph as it was at this timestamp.
    pub as_of: Option<Timestamp>,
    /// Overrides the graph's `default_max_versions`.
    pub max_versions: Option<usize>,
    /// With `include_hidden` hints, reads elements regardless of their
    /// visibility.
    pub administrative: bool,
}

impl ReadOptions {
    #[must_use]
    pub fn new(fetch_hints: FetchHints) -> Self {
        Self {
            fetch_hints,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn as_of(mut self, timestamp: Timestamp) -> Self {
        self.as_of = Some(timestamp);
        self
    }

    #[must_use]
    pub fn max_versions(mut self, max_versions: usize) -> Self {
        self.max_versions = Some(max_versions);
        self
    }

    #[must_use]
    pub fn administrative(mut self, administrative: bool) -> Self {
        self.administrative = administrative;
        self
    }
}

// =============================================================================
// GRAPH
// =============================================================================

/// A versioned, visibility-filtered property graph.
///
/// NOTE: Graph does NOT implement Clone. Share it behind an `Arc`; every
/// method takes `&self`.
#[derive(Debug)]
pub struct Graph {
    backend: StorageBackend,
    metadata: GraphMetadataCache,
    config: GraphConfig,
    clock: &'static IncreasingTime,
}

impl Graph {
    /// Open (or create) the graph described by `config`.
    pub fn open(config: GraphConfig) -> Result<Self, TesseraError> {
        config.validate()?;
        let backend = match (config.backend, &config.path) {
            (BackendKind::InMemory, _) => StorageBackend::InMemory(InMemoryStore::new()),
            (BackendKind::Columnar, Some(path)) => {
                StorageBackend::Columnar(ColumnarStore::open(path, config.codec_settings()?)?)
            }
            (BackendKind::Columnar, None) => {
                return Err(TesseraError::ConfigError(
                    "the columnar backend needs a path".to_string(),
                ));
            }
        };
        let metadata = GraphMetadataCache::load(&backend)?;
        tracing::debug!(backend = backend.kind(), "graph opened");
        Ok(Self {
            backend,
            metadata,
            config,
            clock: IncreasingTime::global(),
        })
    }

    /// Volatile graph with default settings.
    pub fn in_memory() -> Result<Self, TesseraError> {
        Self::open(GraphConfig::in_memory())
    }

    #[must_use]
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    #[must_use]
    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    fn context(&self, authorizations: &Authorizations, options: &ReadOptions) -> ReadContext {
        ReadContext::new(authorizations.clone(), options.fetch_hints.clone())
            .with_as_of(options.as_of)
            .with_max_versions(options.max_versions.or(self.config.default_max_versions))
            .administrative(options.administrative)
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Apply one element mutation. The effects are returned, not
    /// dispatched.
    pub fn commit(
        &self,
        mutation: &ElementMutation,
        authorizations: &Authorizations,
    ) -> Result<CommitOutcome, TesseraError> {
        plan_commit(&self.backend, mutation, authorizations, self.clock)?.apply(&self.backend)
    }

    // -------------------------------------------------------------------------
    // Element reads
    // -------------------------------------------------------------------------

    /// `Ok(None)` when the element is absent, deleted or not readable.
    pub fn get_element(
        &self,
        element: &ElementId,
        authorizations: &Authorizations,
        options: &ReadOptions,
    ) -> Result<Option<Element>, TesseraError> {
        let families = column_families_to_fetch(element.element_type, &options.fetch_hints);
        let mutations = self
            .backend
            .read_row(element.element_type, &element.id, Some(families))?;
        materialize(
            element.element_type,
            &element.id,
            &mutations,
            &self.context(authorizations, options),
        )
    }

    pub fn get_vertex(
        &self,
        id: &str,
        authorizations: &Authorizations,
        options: &ReadOptions,
    ) -> Result<Option<Element>, TesseraError> {
        self.get_element(&ElementId::vertex(id), authorizations, options)
    }

    pub fn get_edge(
        &self,
        id: &str,
        authorizations: &Authorizations,
        options: &ReadOptions,
    ) -> Result<Option<Element>, TesseraError> {
        self.get_element(&ElementId::edge(id), authorizations, options)
    }

    /// Readable vertices among `ids`, in the order given.
    pub fn get_vertices<I, S>(
        &self,
        ids: I,
        authorizations: &Authorizations,
        options: &ReadOptions,
    ) -> Result<Vec<Element>, TesseraError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.get_many(ElementType::Vertex, ids, authorizations, options)
    }

    /// Readable edges among `ids`, in the order given.
    pub fn get_edges<I, S>(
        &self,
        ids: I,
        authorizations: &Authorizations,
        options: &ReadOptions,
    ) -> Result<Vec<Element>, TesseraError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.get_many(ElementType::Edge, ids, authorizations, options)
    }

    fn get_many<I, S>(
        &self,
        element_type: ElementType,
        ids: I,
        authorizations: &Authorizations,
        options: &ReadOptions,
    ) -> Result<Vec<Element>, TesseraError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut elements = Vec::new();
        for id in ids {
            let element = ElementId {
                element_type,
                id: id.as_ref().to_string(),
            };
            if let Some(found) = self.get_element(&element, authorizations, options)? {
                elements.push(found);
            }
        }
        Ok(elements)
    }

    /// Lazily materialize every readable element of `range`.
    pub fn scan(
        &self,
        element_type: ElementType,
        range: &RowRange,
        authorizations: &Authorizations,
        options: &ReadOptions,
    ) -> Result<ElementScanner, TesseraError> {
        let families = column_families_to_fetch(element_type, &options.fetch_hints);
        let rows = self.backend.row_source(element_type, Some(families))?;
        ElementScanner::new(
            rows,
            element_type,
            range,
            self.context(authorizations, options),
            self.config.scan_error_policy,
        )
    }

    /// Readable edges touching `vertex_id` in `direction`, fetched with
    /// `options`. Empty when the vertex itself is not readable.
    pub fn edges_of_vertex(
        &self,
        vertex_id: &str,
        direction: Direction,
        authorizations: &Authorizations,
        options: &ReadOptions,
    ) -> Result<Vec<Element>, TesseraError> {
        let adjacency = ReadOptions {
            fetch_hints: FetchHints::builder()
                .include_all_edge_refs(true)
                .include_hidden(options.fetch_hints.include_hidden())
                .build()?,
            ..options.clone()
        };
        let Some(vertex) = self.get_vertex(vertex_id, authorizations, &adjacency)? else {
            return Ok(Vec::new());
        };
        let mut edge_ids: Vec<&str> = vertex
            .edge_infos(direction)?
            .into_iter()
            .map(|info| info.edge_id.as_str())
            .collect();
        // a self-loop is referenced once per direction
        edge_ids.sort_unstable();
        edge_ids.dedup();
        self.get_edges(edge_ids, authorizations, options)
    }

    // -------------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------------

    /// Merged history of `elements`, ordered by event id and resumable
    /// after `after`.
    pub fn historical_events(
        &self,
        elements: &[ElementId],
        after: Option<&HistoricalEventId>,
        hints: &HistoricalEventsFetchHints,
        authorizations: &Authorizations,
    ) -> Result<Vec<HistoricalEvent>, TesseraError> {
        let mut events = Vec::new();
        for element in elements {
            let mutations = self
                .backend
                .read_row(element.element_type, &element.id, None)?;
            events.extend(historical_events(
                element.element_type,
                &element.id,
                &mutations,
                authorizations,
                hints,
            )?);
        }
        Ok(hints.apply_to_results(events, after))
    }

    // -------------------------------------------------------------------------
    // Extended data
    // -------------------------------------------------------------------------

    /// Readable rows of one extended-data table (every table when `None`)
    /// of a readable element, in row order.
    pub fn extended_data(
        &self,
        element: &ElementId,
        table_name: Option<&str>,
        authorizations: &Authorizations,
    ) -> Result<Vec<ExtendedDataRow>, TesseraError> {
        let gate = ReadOptions::new(FetchHints::none());
        if self.get_element(element, authorizations, &gate)?.is_none() {
            return Ok(Vec::new());
        }
        let ctx = self.context(authorizations, &ReadOptions::default());
        let mut rows = Vec::new();
        for (id, mutations) in
            self.backend
                .extended_rows(element.element_type, &element.id, table_name)?
        {
            if let Some(row) = fold_extended_row(&id, &mutations, &ctx)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Streaming values and metadata
    // -------------------------------------------------------------------------

    pub fn streaming_value(
        &self,
        reference: &StreamingValueRef,
    ) -> Result<Option<StreamingValue>, TesseraError> {
        self.backend.streaming_values().get(reference)
    }

    pub fn metadata(&self, key: &str) -> Result<Option<Vec<u8>>, TesseraError> {
        self.metadata.get(key)
    }

    pub fn metadata_snapshot(&self) -> Result<MetadataSnapshot, TesseraError> {
        self.metadata.snapshot()
    }

    pub fn set_metadata(&self, key: &str, value: &[u8]) -> Result<(), TesseraError> {
        self.metadata.set(&self.backend, key, value)
    }
}

// =============================================================================
// TESTS
// =============================================================================
