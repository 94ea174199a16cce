//! CLI command tests against on-disk graphs.

#![allow(clippy::unwrap_used, clippy::panic)]

use clap::Parser;
use std::path::{Path, PathBuf};
use tessera::cli::{
    self, Cli, Commands, HistoryRequest, ReadArgs, apply_mutations, cmd_apply, cmd_history,
    cmd_init, count_elements, parse_backend, read_mutations, read_options, resolve_config,
    row_range,
};
use tessera_core::{
    Authorizations, BackendKind, ElementMutation, ElementType, Graph, GraphConfig, ReadOptions,
    RowRange, TesseraError, Value, Visibility,
};

const MUTATIONS: &str = r#"[
  {
    "target": { "kind": "new_vertex", "id": "v1", "visibility": "a" },
    "timestamp": 10,
    "operations": [
      { "op": "add_property_value", "key": "", "name": "name", "value": { "Text": "alice" } }
    ]
  },
  {
    "target": { "kind": "new_vertex", "id": "v2", "visibility": "" },
    "timestamp": 10
  },
  {
    "target": {
      "kind": "new_edge", "id": "e1", "out_vertex_id": "v1", "in_vertex_id": "v2",
      "label": "knows", "visibility": ""
    },
    "timestamp": 20
  }
]"#;

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn columnar(dir: &tempfile::TempDir) -> GraphConfig {
    resolve_config(None, Some(&dir.path().join("graph.redb")), None).unwrap()
}

// =============================================================================
// CONFIG RESOLUTION TESTS
// =============================================================================

#[test]
fn test_default_config_is_columnar() {
    let config = resolve_config(None, None, None).unwrap();
    assert_eq!(config.backend, BackendKind::Columnar);
    assert_eq!(config.path, Some(PathBuf::from(cli::DEFAULT_DATABASE)));
}

#[test]
fn test_flags_override_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = write(
        dir.path(),
        "graph.toml",
        "backend = \"in_memory\"\ndefault_max_versions = 2\n",
    );

    let config = resolve_config(Some(&file), None, None).unwrap();
    assert_eq!(config.backend, BackendKind::InMemory);
    assert_eq!(config.default_max_versions, Some(2));

    let db = dir.path().join("other.redb");
    let config = resolve_config(Some(&file), Some(&db), Some("columnar")).unwrap();
    assert_eq!(config.backend, BackendKind::Columnar);
    assert_eq!(config.path, Some(db));
    assert_eq!(config.default_max_versions, Some(2));
}

#[test]
fn test_relative_config_path_resolves_against_config_dir() {
    let dir = tempfile::tempdir().unwrap();
    let file = write(
        dir.path(),
        "graph.toml",
        "backend = \"columnar\"\npath = \"data/graph.redb\"\n",
    );
    let config = resolve_config(Some(&file), None, None).unwrap();
    let expected = file.canonicalize().unwrap().parent().unwrap().join("data/graph.redb");
    assert_eq!(config.path, Some(expected));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let unknown = write(dir.path(), "unknown.toml", "colour = \"blue\"\n");
    assert!(matches!(
        resolve_config(Some(&unknown), None, None),
        Err(TesseraError::ConfigError(_))
    ));

    let pathless = write(dir.path(), "pathless.toml", "backend = \"columnar\"\n");
    assert!(matches!(
        resolve_config(Some(&pathless), None, None),
        Err(TesseraError::ConfigError(_))
    ));

    assert!(matches!(
        resolve_config(Some(&dir.path().join("missing.toml")), None, None),
        Err(TesseraError::IoError(_))
    ));
}

#[test]
fn test_parse_backend() {
    assert_eq!(parse_backend("columnar").unwrap(), BackendKind::Columnar);
    assert_eq!(parse_backend("in_memory").unwrap(), BackendKind::InMemory);
    assert!(parse_backend("cassandra").is_err());
}

// =============================================================================
// ARGUMENT PARSING TESTS
// =============================================================================

#[test]
fn test_cli_parses_global_flags() {
    let cli = Cli::try_parse_from([
        "tessera", "get", "-t", "edge", "e1", "-a", "a,b", "--as-of", "15", "--json-mode",
    ])
    .unwrap();
    assert!(cli.json_mode);
    assert!(cli.authorizations().contains("b"));
    let Some(Commands::Get {
        element_type,
        id,
        read,
    }) = cli.command
    else {
        panic!("expected get");
    };
    assert_eq!(ElementType::from(element_type), ElementType::Edge);
    assert_eq!(id, "e1");
    assert_eq!(read.as_of, Some(15));
}

#[test]
fn test_admin_requires_include_hidden() {
    assert!(Cli::try_parse_from(["tessera", "get", "v1", "--admin"]).is_err());
    assert!(Cli::try_parse_from(["tessera", "get", "v1", "--admin", "--include-hidden"]).is_ok());
}

#[test]
fn test_prefix_conflicts_with_bounds() {
    assert!(Cli::try_parse_from(["tessera", "scan", "--prefix", "v", "--start", "a"]).is_err());
}

#[test]
fn test_row_range_from_flags() {
    assert_eq!(row_range(None, None, None), RowRange::All);
    assert_eq!(
        row_range(Some("v".to_string()), None, None),
        RowRange::prefix("v")
    );
    let range = row_range(None, Some("b".to_string()), Some("d".to_string()));
    assert!(range.contains("b"));
    assert!(range.contains("c"));
    assert!(!range.contains("d"));
}

#[test]
fn test_read_options_from_flags() {
    let args = ReadArgs {
        properties: vec!["name".to_string()],
        ..ReadArgs::default()
    };
    let options = read_options(&args).unwrap();
    assert!(options.fetch_hints.includes_property("name"));
    assert!(!options.fetch_hints.includes_property("age"));

    let zero = ReadArgs {
        max_versions: Some(0),
        ..ReadArgs::default()
    };
    assert!(read_options(&zero).is_err());
}

// =============================================================================
// COMMAND TESTS
// =============================================================================

#[test]
fn test_init_refuses_existing_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = columnar(&dir);
    let written = dir.path().join("written.toml");

    cmd_init(&config, false, Some(&written)).unwrap();
    assert!(config.path.as_ref().unwrap().exists());
    let reloaded = GraphConfig::load(&written).unwrap();
    assert_eq!(reloaded, config);

    assert!(matches!(
        cmd_init(&config, false, None),
        Err(TesseraError::ConfigError(_))
    ));
    cmd_init(&config, true, None).unwrap();
}

#[test]
fn test_apply_persists_mutations() {
    let dir = tempfile::tempdir().unwrap();
    let config = columnar(&dir);
    let file = write(dir.path(), "mutations.json", MUTATIONS);
    let auths = Authorizations::new(["a"]);

    cmd_apply(&config, &auths, true, &file).unwrap();

    let graph = Graph::open(config).unwrap();
    let counts = count_elements(&graph, &auths).unwrap();
    assert_eq!(counts.vertices, 2);
    assert_eq!(counts.edges, 1);

    let v1 = graph
        .get_vertex("v1", &auths, &ReadOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(
        v1.property_value("name").unwrap(),
        Some(&Value::text("alice"))
    );

    // v1 is labelled "a"
    let public = count_elements(&graph, &Authorizations::empty()).unwrap();
    assert_eq!(public.vertices, 1);
}

#[test]
fn test_read_mutations_accepts_single_object() {
    let dir = tempfile::tempdir().unwrap();
    let file = write(
        dir.path(),
        "one.json",
        r#"{ "target": { "kind": "existing", "element_type": "Vertex", "id": "v1" },
             "operations": [ { "op": "touch" } ] }"#,
    );
    let mutations = read_mutations(&file).unwrap();
    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].operations.len(), 1);
}

#[test]
fn test_read_mutations_rejects_bad_input() {
    let dir = tempfile::tempdir().unwrap();
    let garbage = write(dir.path(), "garbage.json", "{ not json");
    assert!(matches!(
        read_mutations(&garbage),
        Err(TesseraError::SerializationError(_))
    ));
    assert!(read_mutations(dir.path()).is_err());
    assert!(read_mutations(&dir.path().join("missing.json")).is_err());
}

#[test]
fn test_apply_stops_at_first_rejected_commit() {
    let graph = Graph::in_memory().unwrap();
    let auths = Authorizations::empty();
    let mutations = vec![
        ElementMutation::new_vertex("v1", Visibility::empty()).at(5),
        ElementMutation::existing(tessera_core::ElementId::vertex("ghost")).touch(),
        ElementMutation::new_vertex("v2", Visibility::empty()).at(5),
    ];

    let result = apply_mutations(&graph, &mutations, &auths);
    assert!(matches!(result, Err(TesseraError::ElementNotFound(_))));
    assert_eq!(count_elements(&graph, &auths).unwrap().vertices, 1);
}

#[test]
fn test_history_requires_an_element() {
    let dir = tempfile::tempdir().unwrap();
    let config = columnar(&dir);
    let request = HistoryRequest::default();
    assert!(matches!(
        cmd_history(&config, &Authorizations::empty(), true, &request),
        Err(TesseraError::ConfigError(_))
    ));

    let bad_after = HistoryRequest {
        vertices: vec!["v1".to_string()],
        after: Some("not an id".to_string()),
        ..HistoryRequest::default()
    };
    assert!(matches!(
        cmd_history(&config, &Authorizations::empty(), true, &bad_after),
        Err(TesseraError::SerializationError(_))
    ));
}

#[test]
fn test_execute_runs_commands_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("graph.redb");
    let file = write(dir.path(), "mutations.json", MUTATIONS);
    let db_arg = db.to_string_lossy().into_owned();
    let file_arg = file.to_string_lossy().into_owned();

    let run = |args: &[&str]| {
        let mut argv = vec!["tessera", "-D", db_arg.as_str(), "--json-mode"];
        argv.extend_from_slice(args);
        cli::execute(Cli::try_parse_from(argv).unwrap())
    };

    run(&["init"]).unwrap();
    run(&["apply", "-f", file_arg.as_str(), "-a", "a"]).unwrap();
    run(&["get", "v1", "-a", "a"]).unwrap();
    run(&["scan", "-t", "edge", "--prefix", "e"]).unwrap();
    run(&["history", "--vertex", "v1", "--edge", "e1", "-a", "a"]).unwrap();
    run(&["extended", "v1"]).unwrap();
    run(&["metadata", "app.owner", "ops"]).unwrap();
    run(&["status"]).unwrap();

    let graph = Graph::open(columnar(&dir)).unwrap();
    assert_eq!(graph.metadata("app.owner").unwrap(), Some(b"ops".to_vec()));
}
