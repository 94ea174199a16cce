//! # Scenario Tests
//!
//! End-to-end behaviour through the `Graph` facade, run against both
//! backends.

use tessera_core::{
    Authorizations, Direction, ElementId, ElementMutation, FetchHints, Graph, GraphConfig,
    HistoricalEventKind, HistoricalEventsFetchHints, Metadata, ReadOptions, TesseraError, Value,
    Visibility,
};
use tempfile::TempDir;

// =============================================================================
// HELPERS
// =============================================================================

fn vis(expression: &str) -> Visibility {
    Visibility::new(expression).expect("visibility")
}

fn everyone() -> Authorizations {
    Authorizations::new(["public", "secret", "x"])
}

/// One in-memory and one columnar graph. The directory must outlive the
/// columnar graph.
fn graphs() -> Vec<(&'static str, Graph, Option<TempDir>)> {
    let dir = tempfile::tempdir().expect("tempdir");
    let columnar =
        Graph::open(GraphConfig::columnar(dir.path().join("graph.redb"))).expect("columnar");
    vec![
        ("in_memory", Graph::in_memory().expect("in-memory"), None),
        ("columnar", columnar, Some(dir)),
    ]
}

fn commit(graph: &Graph, mutation: &ElementMutation) {
    graph.commit(mutation, &everyone()).expect("commit");
}

// =============================================================================
// SCENARIO A: soft-deleted property
// =============================================================================

#[test]
fn soft_deleted_property_disappears_but_stays_in_history() {
    for (backend, graph, _dir) in graphs() {
        commit(
            &graph,
            &ElementMutation::new_vertex("v1", Visibility::empty())
                .add_property_value("k1", "age", Value::Integer(30), Visibility::empty())
                .at(100),
        );
        commit(
            &graph,
            &ElementMutation::existing(ElementId::vertex("v1"))
                .soft_delete_property("k1", "age", Visibility::empty(), None)
                .at(200),
        );

        let vertex = graph
            .get_vertex("v1", &everyone(), &ReadOptions::default())
            .expect("read")
            .expect("present");
        assert!(
            vertex.property("age").expect("hint").is_none(),
            "{backend}: age should be gone"
        );

        let history = graph
            .historical_events(
                &[ElementId::vertex("v1")],
                None,
                &HistoricalEventsFetchHints::all(),
                &everyone(),
            )
            .expect("history");
        let property_events: Vec<_> = history
            .iter()
            .filter_map(|event| match &event.kind {
                HistoricalEventKind::AddProperty { name, value, .. } if name == "age" => {
                    Some(("add", event.timestamp(), value.clone()))
                }
                HistoricalEventKind::SoftDeleteProperty { name, .. } if name == "age" => {
                    Some(("soft_delete", event.timestamp(), None))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            property_events,
            vec![
                ("add", 100, Some(Value::Integer(30))),
                ("soft_delete", 200, None)
            ],
            "{backend}"
        );
    }
}

// =============================================================================
// SCENARIO B: edge adjacency and hidden edges
// =============================================================================

#[test]
fn edge_appears_on_both_endpoints_and_hides_from_both() {
    for (backend, graph, _dir) in graphs() {
        commit(&graph, &ElementMutation::new_vertex("v1", Visibility::empty()).at(90));
        commit(&graph, &ElementMutation::new_vertex("v2", Visibility::empty()).at(90));
        commit(
            &graph,
            &ElementMutation::new_edge("e1", "v1", "v2", "knows", Visibility::empty()).at(100),
        );

        let public = Authorizations::new(["public"]);
        let options = ReadOptions::default();
        let v1 = graph
            .get_vertex("v1", &public, &options)
            .expect("read")
            .expect("v1");
        let out = v1.edge_infos(Direction::Out).expect("hint");
        assert_eq!(out.len(), 1, "{backend}");
        assert_eq!(
            (out[0].edge_id.as_str(), out[0].other_vertex_id.as_str(), out[0].label.as_str()),
            ("e1", "v2", "knows")
        );
        let v2 = graph
            .get_vertex("v2", &public, &options)
            .expect("read")
            .expect("v2");
        let inbound = v2.edge_infos(Direction::In).expect("hint");
        assert_eq!(
            (
                inbound[0].edge_id.as_str(),
                inbound[0].other_vertex_id.as_str(),
                inbound[0].label.as_str()
            ),
            ("e1", "v1", "knows")
        );

        commit(
            &graph,
            &ElementMutation::existing(ElementId::edge("e1"))
                .mark_hidden(vis("x"))
                .at(200),
        );

        for vertex in ["v1", "v2"] {
            let seen = graph
                .get_vertex(vertex, &public, &options)
                .expect("read")
                .expect("vertex");
            assert!(
                seen.edge_infos(Direction::Both).expect("hint").is_empty(),
                "{backend}: e1 still adjacent to {vertex}"
            );
        }
        assert!(
            graph
                .get_edge("e1", &public, &options)
                .expect("read")
                .is_none()
        );

        let admin = ReadOptions::new(FetchHints::all_including_hidden()).administrative(true);
        let edge = graph
            .get_edge("e1", &public, &admin)
            .expect("read")
            .expect("admin sees hidden edge");
        assert!(edge.hidden_visibilities().contains(&vis("x")), "{backend}");
    }
}

#[test]
fn hidden_edge_stays_hidden_through_label_and_visibility_changes() {
    let public = Authorizations::new(["public"]);
    let options = ReadOptions::default();
    for (backend, graph, _dir) in graphs() {
        for vertex in ["v1", "v2"] {
            commit(&graph, &ElementMutation::new_vertex(vertex, Visibility::empty()).at(1));
        }
        commit(
            &graph,
            &ElementMutation::new_edge("e1", "v1", "v2", "knows", Visibility::empty()).at(10),
        );
        commit(
            &graph,
            &ElementMutation::existing(ElementId::edge("e1"))
                .mark_hidden(vis("x"))
                .at(20),
        );
        commit(
            &graph,
            &ElementMutation::existing(ElementId::edge("e1"))
                .alter_edge_label("likes")
                .at(30),
        );
        commit(
            &graph,
            &ElementMutation::existing(ElementId::edge("e1"))
                .alter_element_visibility(vis("public"))
                .at(40),
        );

        assert!(graph.get_edge("e1", &public, &options).expect("read").is_none());
        for vertex in ["v1", "v2"] {
            let seen = graph
                .get_vertex(vertex, &public, &options)
                .expect("read")
                .expect("vertex");
            assert!(
                seen.edge_infos(Direction::Both).expect("hint").is_empty(),
                "{backend}: hidden e1 adjacent to {vertex}"
            );
        }

        // showing the edge again brings back the rewritten reference
        commit(
            &graph,
            &ElementMutation::existing(ElementId::edge("e1"))
                .mark_visible(vis("x"))
                .at(50),
        );
        let v1 = graph
            .get_vertex("v1", &public, &options)
            .expect("read")
            .expect("v1");
        let out = v1.edge_infos(Direction::Out).expect("hint");
        assert_eq!(out.len(), 1, "{backend}");
        assert_eq!(
            (out[0].label.as_str(), &out[0].visibility),
            ("likes", &vis("public")),
            "{backend}"
        );
    }
}

#[test]
fn out_of_order_commit_writes_nothing() {
    for (backend, graph, _dir) in graphs() {
        commit(&graph, &ElementMutation::new_vertex("v1", Visibility::empty()).at(1));
        commit(&graph, &ElementMutation::new_vertex("v2", Visibility::empty()).at(100));

        let rejected = graph.commit(
            &ElementMutation::new_edge("e1", "v1", "v2", "knows", Visibility::empty()).at(50),
            &everyone(),
        );
        assert!(
            matches!(
                rejected,
                Err(TesseraError::InvalidMutationOrdering {
                    last: 100,
                    attempted: 50,
                    ..
                })
            ),
            "{backend}: {rejected:?}"
        );

        let options = ReadOptions::default();
        let v1 = graph
            .get_vertex("v1", &everyone(), &options)
            .expect("read")
            .expect("v1");
        assert!(
            v1.edge_infos(Direction::Both).expect("hint").is_empty(),
            "{backend}: dangling reference on v1"
        );
        assert!(graph.get_edge("e1", &everyone(), &options).expect("read").is_none());

        // the same edge commits once its timestamp is current
        commit(
            &graph,
            &ElementMutation::new_edge("e1", "v1", "v2", "knows", Visibility::empty()).at(150),
        );
        assert!(graph.get_edge("e1", &everyone(), &options).expect("read").is_some());
    }
}

#[test]
fn label_change_reaches_endpoint_edge_infos() {
    for (backend, graph, _dir) in graphs() {
        for vertex in ["v1", "v2"] {
            commit(&graph, &ElementMutation::new_vertex(vertex, Visibility::empty()).at(1));
        }
        commit(
            &graph,
            &ElementMutation::new_edge("e1", "v1", "v2", "knows", Visibility::empty()).at(10),
        );
        commit(
            &graph,
            &ElementMutation::existing(ElementId::edge("e1"))
                .alter_edge_label("likes")
                .at(20),
        );
        for (vertex, direction) in [("v1", Direction::Out), ("v2", Direction::In)] {
            let seen = graph
                .get_vertex(vertex, &everyone(), &ReadOptions::default())
                .expect("read")
                .expect("vertex");
            let labels: Vec<_> = seen
                .edge_infos(direction)
                .expect("hint")
                .iter()
                .map(|info| info.label.clone())
                .collect();
            assert_eq!(labels, vec!["likes".to_string()], "{backend}: {vertex}");
        }
    }
}

// =============================================================================
// SCENARIO C: same key and name under two visibilities
// =============================================================================

#[test]
fn instances_under_different_visibilities_coexist() {
    for (backend, graph, _dir) in graphs() {
        commit(
            &graph,
            &ElementMutation::new_vertex("v1", Visibility::empty())
                .add_property_value("k", "name", Value::text("Joe"), vis("public"))
                .add_property_value("k", "name", Value::text("Joseph"), vis("secret"))
                .at(1),
        );
        let both = graph
            .get_vertex("v1", &everyone(), &ReadOptions::default())
            .expect("read")
            .expect("present");
        assert_eq!(both.properties_named("name").expect("hint").len(), 2, "{backend}");

        let public_only = graph
            .get_vertex("v1", &Authorizations::new(["public"]), &ReadOptions::default())
            .expect("read")
            .expect("present");
        let names = public_only.properties_named("name").expect("hint");
        assert_eq!(names.len(), 1, "{backend}");
        assert_eq!(names[0].value, Value::text("Joe"));
    }
}

// =============================================================================
// SCENARIO D: max versions
// =============================================================================

#[test]
fn max_versions_keeps_latest_but_history_keeps_all() {
    for (backend, graph, _dir) in graphs() {
        commit(
            &graph,
            &ElementMutation::new_vertex("v1", Visibility::empty())
                .add_property_value("k", "n", Value::Integer(1), Visibility::empty())
                .at(1),
        );
        for (value, ts) in [(2, 2), (3, 3)] {
            commit(
                &graph,
                &ElementMutation::existing(ElementId::vertex("v1"))
                    .add_property_value("k", "n", Value::Integer(value), Visibility::empty())
                    .at(ts),
            );
        }

        let vertex = graph
            .get_vertex("v1", &everyone(), &ReadOptions::default().max_versions(1))
            .expect("read")
            .expect("present");
        let versions = vertex.properties_named("n").expect("hint");
        assert_eq!(versions.len(), 1, "{backend}");
        assert_eq!(versions[0].value, Value::Integer(3));
        assert_eq!(versions[0].timestamp, 3);

        let adds = graph
            .historical_events(
                &[ElementId::vertex("v1")],
                None,
                &HistoricalEventsFetchHints::all(),
                &everyone(),
            )
            .expect("history")
            .into_iter()
            .filter(|event| matches!(event.kind, HistoricalEventKind::AddProperty { .. }))
            .count();
        assert_eq!(adds, 3, "{backend}");
    }
}

// =============================================================================
// HIDE / SHOW, FETCH HINTS, DELETES
// =============================================================================

#[test]
fn hide_then_show_restores_the_property() {
    for (backend, graph, _dir) in graphs() {
        commit(
            &graph,
            &ElementMutation::new_vertex("v1", Visibility::empty())
                .add_property_value("", "p", Value::Boolean(true), Visibility::empty())
                .at(1),
        );
        let hidden = ElementMutation::existing(ElementId::vertex("v1"))
            .mark_property_hidden("", "p", Visibility::empty(), vis("x"))
            .at(2);
        commit(&graph, &hidden);
        let public = Authorizations::new(["public"]);
        let read = |auths: &Authorizations| {
            graph
                .get_vertex("v1", auths, &ReadOptions::default())
                .expect("read")
                .expect("present")
                .property("p")
                .expect("hint")
                .is_some()
        };
        assert!(!read(&public), "{backend}: hidden for requesters without x");

        commit(
            &graph,
            &ElementMutation::existing(ElementId::vertex("v1"))
                .mark_property_visible("", "p", Visibility::empty(), vis("x"))
                .at(3),
        );
        assert!(read(&public), "{backend}: shown again");

        // a hide older than the show cannot be appended
        assert!(matches!(
            graph.commit(&hidden, &everyone()),
            Err(TesseraError::InvalidMutationOrdering { .. })
        ));
    }
}

#[test]
fn unfetched_metadata_is_a_missing_hint() {
    for (backend, graph, _dir) in graphs() {
        commit(
            &graph,
            &ElementMutation::new_vertex("v1", Visibility::empty())
                .add_property_value_with_metadata(
                    "",
                    "p",
                    Value::Integer(1),
                    Metadata::new().with("source", Value::text("import"), Visibility::empty()),
                    Visibility::empty(),
                )
                .at(1),
        );
        let hints = FetchHints::builder()
            .include_all_properties(true)
            .build()
            .expect("hints");
        let vertex = graph
            .get_vertex("v1", &everyone(), &ReadOptions::new(hints))
            .expect("read")
            .expect("present");
        let property = vertex.property("p").expect("hint").expect("p");
        assert!(
            matches!(property.metadata(), Err(TesseraError::MissingFetchHint(_))),
            "{backend}"
        );

        let full = graph
            .get_vertex("v1", &everyone(), &ReadOptions::default())
            .expect("read")
            .expect("present");
        let metadata = full
            .property("p")
            .expect("hint")
            .expect("p")
            .metadata()
            .expect("metadata")
            .clone();
        assert_eq!(metadata.value("source"), Some(&Value::text("import")));
    }
}

#[test]
fn deleting_a_vertex_removes_its_edges_everywhere() {
    for (backend, graph, _dir) in graphs() {
        for vertex in ["v1", "v2", "v3"] {
            commit(&graph, &ElementMutation::new_vertex(vertex, Visibility::empty()).at(1));
        }
        commit(
            &graph,
            &ElementMutation::new_edge("e1", "v1", "v2", "knows", Visibility::empty()).at(1),
        );
        commit(
            &graph,
            &ElementMutation::new_edge("e2", "v2", "v3", "knows", Visibility::empty()).at(1),
        );
        commit(
            &graph,
            &ElementMutation::existing(ElementId::vertex("v1"))
                .delete()
                .at(2),
        );
        let options = ReadOptions::default();
        assert!(graph.get_vertex("v1", &everyone(), &options).expect("read").is_none());
        assert!(graph.get_edge("e1", &everyone(), &options).expect("read").is_none());
        let v2 = graph
            .get_vertex("v2", &everyone(), &options)
            .expect("read")
            .expect("v2");
        assert_eq!(v2.edge_ids(Direction::Both).expect("hint"), vec!["e2"], "{backend}");

        // hard-deleted ids stay deleted
        let recreate = graph.commit(
            &ElementMutation::new_vertex("v1", Visibility::empty()).at(3),
            &everyone(),
        );
        assert!(
            matches!(recreate, Err(TesseraError::InvalidMutation(_))),
            "{backend}: {recreate:?}"
        );
        let reconnect = graph.commit(
            &ElementMutation::new_edge("e1", "v1", "v2", "knows", Visibility::empty()).at(3),
            &everyone(),
        );
        assert!(
            matches!(reconnect, Err(TesseraError::InvalidMutation(_))),
            "{backend}: {reconnect:?}"
        );
        assert!(graph.get_vertex("v1", &everyone(), &options).expect("read").is_none());
        let v2 = graph
            .get_vertex("v2", &everyone(), &options)
            .expect("read")
            .expect("v2");
        assert_eq!(v2.edge_ids(Direction::Both).expect("hint"), vec!["e2"], "{backend}");
    }
}

#[test]
fn soft_deleted_vertex_can_be_recreated() {
    for (backend, graph, _dir) in graphs() {
        commit(&graph, &ElementMutation::new_vertex("v1", Visibility::empty()).at(1));
        commit(
            &graph,
            &ElementMutation::existing(ElementId::vertex("v1"))
                .soft_delete(Some(b"cleanup".to_vec()))
                .at(2),
        );
        let options = ReadOptions::default();
        assert!(graph.get_vertex("v1", &everyone(), &options).expect("read").is_none());
        commit(&graph, &ElementMutation::new_vertex("v1", Visibility::empty()).at(3));
        assert!(
            graph.get_vertex("v1", &everyone(), &options).expect("read").is_some(),
            "{backend}"
        );
    }
}

#[test]
fn scans_return_readable_elements_in_row_order() {
    for (backend, graph, _dir) in graphs() {
        for (id, visibility) in [("a", ""), ("b", "secret"), ("c", ""), ("d", "")] {
            commit(&graph, &ElementMutation::new_vertex(id, vis(visibility)).at(1));
        }
        let ids: Vec<String> = graph
            .scan(
                tessera_core::ElementType::Vertex,
                &tessera_core::RowRange::All,
                &Authorizations::new(["public"]),
                &ReadOptions::new(FetchHints::none()),
            )
            .expect("scan")
            .map(|element| element.map(|e| e.id().to_string()))
            .collect::<Result<_, _>>()
            .expect("elements");
        assert_eq!(ids, vec!["a", "c", "d"], "{backend}");
    }
}
