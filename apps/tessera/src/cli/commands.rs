//! # CLI Command Implementations
//!
//! Every command opens the graph described by the resolved config, does its
//! work and drops the graph before returning.

use super::ReadArgs;
use serde::{Deserialize, Serialize};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use tessera_core::{
    Authorizations, BackendKind, CommitOutcome, Direction, Element, ElementId, ElementMutation,
    ElementType, FetchHints, Graph, GraphConfig, HistoricalEventId, HistoricalEventsFetchHints,
    ReadOptions, RowRange, TesseraError, TracingEffectSink,
};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of a mutation file (64 MB).
const MAX_MUTATION_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Maximum size of a config file (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Maximum number of element mutations in one file.
pub const MAX_MUTATIONS_PER_FILE: usize = 100_000;

/// Database used when neither a config nor `--database` names one.
pub const DEFAULT_DATABASE: &str = "tessera.redb";

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), TesseraError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| TesseraError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(TesseraError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Canonicalize `path` and require a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, TesseraError> {
    let canonical = path.canonicalize().map_err(|e| {
        TesseraError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(TesseraError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Canonicalize the parent of an output path, which must be a directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, TesseraError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        TesseraError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(TesseraError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| TesseraError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

fn print_json(value: &impl Serialize) -> Result<(), TesseraError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| TesseraError::SerializationError(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

// =============================================================================
// CONFIG RESOLUTION
// =============================================================================

/// Parse a `--backend` flag.
pub fn parse_backend(name: &str) -> Result<BackendKind, TesseraError> {
    match name {
        "columnar" | "redb" => Ok(BackendKind::Columnar),
        "in_memory" | "memory" => Ok(BackendKind::InMemory),
        other => Err(TesseraError::ConfigError(format!(
            "unknown backend {other:?} (expected \"columnar\" or \"in_memory\")"
        ))),
    }
}

/// Load the config file (or the default columnar config), apply flag
/// overrides, then validate.
///
/// A relative `path` inside a config file is resolved against the file's
/// directory.
pub fn resolve_config(
    config_path: Option<&Path>,
    database: Option<&Path>,
    backend: Option<&str>,
) -> Result<GraphConfig, TesseraError> {
    let mut config = match config_path {
        Some(path) => {
            let validated = validate_file_path(path)?;
            validate_file_size(&validated, MAX_CONFIG_FILE_SIZE)?;
            let text = std::fs::read_to_string(&validated)
                .map_err(|e| TesseraError::IoError(format!("Read config: {}", e)))?;
            let mut config: GraphConfig =
                toml::from_str(&text).map_err(|e| TesseraError::ConfigError(e.to_string()))?;
            if let (Some(relative), Some(dir)) = (config.path.as_ref(), validated.parent()) {
                if relative.is_relative() {
                    config.path = Some(dir.join(relative));
                }
            }
            config
        }
        None => GraphConfig::columnar(DEFAULT_DATABASE),
    };

    if let Some(name) = backend {
        config.backend = parse_backend(name)?;
    }
    if let Some(database) = database {
        config.path = Some(database.to_path_buf());
    }

    config.validate()?;
    tracing::debug!(backend = ?config.backend, path = ?config.path, "resolved config");
    Ok(config)
}

/// Row range selected by `scan` flags.
pub fn row_range(prefix: Option<String>, start: Option<String>, end: Option<String>) -> RowRange {
    if let Some(prefix) = prefix {
        return RowRange::prefix(prefix);
    }
    match (start, end) {
        (None, None) => RowRange::All,
        (start, end) => RowRange::between(
            start.map_or(Bound::Unbounded, Bound::Included),
            end.map_or(Bound::Unbounded, Bound::Excluded),
        ),
    }
}

/// Read options selected by `get`/`scan` flags. Every facet is fetched;
/// `--properties` narrows the property set.
pub fn read_options(args: &ReadArgs) -> Result<ReadOptions, TesseraError> {
    let builder = FetchHints::builder()
        .include_all_property_metadata(true)
        .include_all_edge_refs(true)
        .include_edge_labels_and_counts(true)
        .include_extended_data_table_names(true)
        .include_hidden(args.include_hidden);
    let builder = if args.properties.is_empty() {
        builder.include_all_properties(true)
    } else {
        builder.property_names(args.properties.iter().cloned())
    };

    let mut options = ReadOptions::new(builder.build()?).administrative(args.admin);
    if let Some(timestamp) = args.as_of {
        options = options.as_of(timestamp);
    }
    if let Some(max_versions) = args.max_versions {
        if max_versions == 0 {
            return Err(TesseraError::ConfigError(
                "--max-versions must be at least 1".to_string(),
            ));
        }
        options = options.max_versions(max_versions);
    }
    Ok(options)
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create the graph described by `config`.
pub fn cmd_init(
    config: &GraphConfig,
    force: bool,
    write_config: Option<&Path>,
) -> Result<(), TesseraError> {
    let existing = match (&config.backend, &config.path) {
        (BackendKind::Columnar, Some(path)) if path.exists() => Some(path),
        _ => None,
    };
    if let Some(path) = existing {
        if !force {
            return Err(TesseraError::ConfigError(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(path)
            .map_err(|e| TesseraError::IoError(format!("Remove database: {}", e)))?;
    }

    let graph = Graph::open(config.clone())?;
    match graph.config().path.as_ref() {
        Some(path) if graph.config().backend == BackendKind::Columnar => {
            println!("Initialized new columnar graph at {:?}", path);
        }
        _ => println!("Initialized new in-memory graph (not persisted)"),
    }

    if let Some(output) = write_config {
        let output = validate_output_path(output)?;
        std::fs::write(&output, config.to_toml_string()?)
            .map_err(|e| TesseraError::IoError(format!("Write config: {}", e)))?;
        println!("Wrote config to {:?}", output);
    }

    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Element counts as seen by `auths`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphCounts {
    pub vertices: usize,
    pub edges: usize,
}

/// Count the readable vertices and edges of `graph`.
pub fn count_elements(graph: &Graph, auths: &Authorizations) -> Result<GraphCounts, TesseraError> {
    let options = ReadOptions::new(FetchHints::none());
    let mut counts = GraphCounts::default();
    for element in graph.scan(ElementType::Vertex, &RowRange::All, auths, &options)? {
        element?;
        counts.vertices += 1;
    }
    for element in graph.scan(ElementType::Edge, &RowRange::All, auths, &options)? {
        element?;
        counts.edges += 1;
    }
    Ok(counts)
}

/// Show graph status.
pub fn cmd_status(
    config: &GraphConfig,
    auths: &Authorizations,
    json_mode: bool,
) -> Result<(), TesseraError> {
    let graph = Graph::open(config.clone())?;
    let counts = count_elements(&graph, auths)?;
    let metadata = graph.metadata_snapshot()?;
    let keys: Vec<&str> = metadata.keys().map(String::as_str).collect();

    if json_mode {
        let output = serde_json::json!({
            "backend": graph.backend().kind(),
            "path": config.path.as_ref().map(|p| p.to_string_lossy().into_owned()),
            "vertices": counts.vertices,
            "edges": counts.edges,
            "metadata_keys": keys,
        });
        return print_json(&output);
    }

    println!("Tessera Graph Status");
    println!("====================");
    println!("Backend:  {}", graph.backend().kind());
    if let Some(path) = &config.path {
        println!("Database: {:?}", path);
    }
    println!();
    println!("Vertices: {}", counts.vertices);
    println!("Edges:    {}", counts.edges);
    println!("Metadata: {} entries", keys.len());
    for key in keys {
        println!("  {}", key);
    }

    Ok(())
}

// =============================================================================
// APPLY COMMAND
// =============================================================================

/// A mutation file holds one element mutation or an array of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MutationFile {
    Many(Vec<ElementMutation>),
    One(Box<ElementMutation>),
}

/// Read and validate the element mutations of a JSON file.
pub fn read_mutations(file: &Path) -> Result<Vec<ElementMutation>, TesseraError> {
    let validated = validate_file_path(file)?;
    validate_file_size(&validated, MAX_MUTATION_FILE_SIZE)?;

    let contents = std::fs::read(&validated)
        .map_err(|e| TesseraError::IoError(format!("Read file: {}", e)))?;
    let parsed: MutationFile = serde_json::from_slice(&contents)
        .map_err(|e| TesseraError::SerializationError(format!("Mutation file: {}", e)))?;
    let mutations = match parsed {
        MutationFile::Many(mutations) => mutations,
        MutationFile::One(mutation) => vec![*mutation],
    };

    if mutations.len() > MAX_MUTATIONS_PER_FILE {
        return Err(TesseraError::SerializationError(format!(
            "Mutation count {} exceeds maximum allowed {}",
            mutations.len(),
            MAX_MUTATIONS_PER_FILE
        )));
    }
    Ok(mutations)
}

/// Commit each mutation in file order. Stops at the first failure; earlier
/// commits stay applied.
pub fn apply_mutations(
    graph: &Graph,
    mutations: &[ElementMutation],
    auths: &Authorizations,
) -> Result<Vec<CommitOutcome>, TesseraError> {
    let sink = TracingEffectSink;
    let mut outcomes = Vec::with_capacity(mutations.len());
    for (index, mutation) in mutations.iter().enumerate() {
        let outcome = graph.commit(mutation, auths).inspect_err(|e| {
            tracing::warn!(index, element = %mutation.target.element_id(), error = %e, "commit rejected");
        })?;
        outcome.dispatch(&[&sink]);
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

/// Commit element mutations from a file.
pub fn cmd_apply(
    config: &GraphConfig,
    auths: &Authorizations,
    json_mode: bool,
    file: &Path,
) -> Result<(), TesseraError> {
    tracing::info!("Applying mutations from {:?}", file);

    let mutations = read_mutations(file)?;
    let graph = Graph::open(config.clone())?;
    let outcomes = apply_mutations(&graph, &mutations, auths)?;

    if json_mode {
        return print_json(&outcomes);
    }

    let effects: usize = outcomes.iter().map(|o| o.effects.len()).sum();
    println!(
        "Committed {} mutation(s) with {} effect(s)",
        outcomes.len(),
        effects
    );
    Ok(())
}

// =============================================================================
// READ COMMANDS
// =============================================================================

fn print_element(element: &Element) {
    println!(
        "{} {} (timestamp {})",
        element.element_type(),
        element.id(),
        element.timestamp()
    );
    println!("  visibility: {:?}", element.visibility().as_str());
    if let (Some(out), Some(label), Some(inv)) = (
        element.out_vertex_id(),
        element.label(),
        element.in_vertex_id(),
    ) {
        println!("  {} -[{}]-> {}", out, label, inv);
    }
    for hidden in element.hidden_visibilities() {
        println!("  hidden for: {:?}", hidden.as_str());
    }
    if let Ok(properties) = element.properties() {
        for property in properties {
            println!(
                "  {}[{}] = {:?} ({:?})",
                property.name,
                property.key,
                property.value,
                property.visibility.as_str()
            );
        }
    }
    if let Ok(edges) = element.edge_infos(Direction::Both) {
        for edge in edges {
            println!(
                "  {:?} {} -[{}]- {}",
                edge.direction, edge.edge_id, edge.label, edge.other_vertex_id
            );
        }
    }
}

/// Read one element.
pub fn cmd_get(
    config: &GraphConfig,
    auths: &Authorizations,
    json_mode: bool,
    element_type: ElementType,
    id: &str,
    read: &ReadArgs,
) -> Result<(), TesseraError> {
    let options = read_options(read)?;
    let graph = Graph::open(config.clone())?;
    let element_id = ElementId {
        element_type,
        id: id.to_string(),
    };
    let element = graph.get_element(&element_id, auths, &options)?;

    if json_mode {
        return print_json(&element);
    }

    match element {
        Some(element) => print_element(&element),
        None => println!("{} not found", element_id),
    }
    Ok(())
}

/// Flags of the `history` command.
#[derive(Debug, Clone, Default)]
pub struct HistoryRequest {
    pub vertices: Vec<String>,
    pub edges: Vec<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub limit: Option<usize>,
    pub include_property_values: bool,
    /// JSON-encoded event id to resume after.
    pub after: Option<String>,
}

impl HistoryRequest {
    fn elements(&self) -> Vec<ElementId> {
        self.vertices
            .iter()
            .map(ElementId::vertex)
            .chain(self.edges.iter().map(ElementId::edge))
            .collect()
    }

    fn hints(&self) -> HistoricalEventsFetchHints {
        HistoricalEventsFetchHints {
            start_time: self.start,
            end_time: self.end,
            include_property_values: self.include_property_values,
            limit: self.limit,
        }
    }

    fn after(&self) -> Result<Option<HistoricalEventId>, TesseraError> {
        self.after
            .as_deref()
            .map(|text| {
                serde_json::from_str(text)
                    .map_err(|e| TesseraError::SerializationError(format!("--after: {}", e)))
            })
            .transpose()
    }
}

/// Read the merged history of the requested elements.
pub fn cmd_history(
    config: &GraphConfig,
    auths: &Authorizations,
    json_mode: bool,
    request: &HistoryRequest,
) -> Result<(), TesseraError> {
    let elements = request.elements();
    if elements.is_empty() {
        return Err(TesseraError::ConfigError(
            "history needs at least one --vertex or --edge".to_string(),
        ));
    }
    let after = request.after()?;

    let graph = Graph::open(config.clone())?;
    let events = graph.historical_events(&elements, after.as_ref(), &request.hints(), auths)?;

    if json_mode {
        return print_json(&events);
    }

    for event in &events {
        println!("{}  {:?}", event.id, event.kind);
    }
    println!("{} event(s)", events.len());
    Ok(())
}

/// Read every readable element of a row range.
pub fn cmd_scan(
    config: &GraphConfig,
    auths: &Authorizations,
    json_mode: bool,
    element_type: ElementType,
    range: &RowRange,
    limit: Option<usize>,
    read: &ReadArgs,
) -> Result<(), TesseraError> {
    let options = read_options(read)?;
    let graph = Graph::open(config.clone())?;
    let mut scanner = graph.scan(element_type, range, auths, &options)?;

    let mut elements = Vec::new();
    for element in scanner.by_ref().take(limit.unwrap_or(usize::MAX)) {
        elements.push(element?);
    }
    scanner.close();

    if json_mode {
        return print_json(&elements);
    }

    for element in &elements {
        print_element(element);
    }
    println!("{} element(s) in {}", elements.len(), range);
    Ok(())
}

/// Read the extended-data rows of one element.
pub fn cmd_extended(
    config: &GraphConfig,
    auths: &Authorizations,
    json_mode: bool,
    element_type: ElementType,
    id: &str,
    table: Option<&str>,
) -> Result<(), TesseraError> {
    let graph = Graph::open(config.clone())?;
    let element_id = ElementId {
        element_type,
        id: id.to_string(),
    };
    let rows = graph.extended_data(&element_id, table, auths)?;

    if json_mode {
        return print_json(&rows);
    }

    for row in &rows {
        println!("{}", row.id);
        for cell in &row.cells {
            println!(
                "  {}[{}] = {:?} ({:?})",
                cell.column,
                cell.key,
                cell.value,
                cell.visibility.as_str()
            );
        }
    }
    Ok(())
}

// =============================================================================
// METADATA COMMAND
// =============================================================================

/// Read `key`, or write it when `value` is given.
pub fn cmd_metadata(
    config: &GraphConfig,
    json_mode: bool,
    key: &str,
    value: Option<&str>,
) -> Result<(), TesseraError> {
    let graph = Graph::open(config.clone())?;

    if let Some(value) = value {
        graph.set_metadata(key, value.as_bytes())?;
        tracing::info!(key, "metadata updated");
    }
    let stored = graph.metadata(key)?;
    let text = stored
        .as_deref()
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned());

    if json_mode {
        return print_json(&serde_json::json!({ "key": key, "value": text }));
    }

    match text {
        Some(text) => println!("{} = {}", key, text),
        None => println!("{} is not set", key),
    }
    Ok(())
}
