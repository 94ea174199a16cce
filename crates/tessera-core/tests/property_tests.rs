//! # Property-Based Tests
//!
//! Invariants that must hold for any mutation stream:
//! - both physical layouts fold to the same element and the same history,
//!   for vertex and edge rows, with equal timestamps allowed
//! - re-applying an identical property mutation is a no-op
//! - a trailing row delete always wins

use proptest::collection::vec;
use proptest::prelude::*;
use tessera_core::encoding::CodecSettings;
use tessera_core::{
    Authorizations, ColumnarStore, Direction, ElementType, FetchHints, HistoricalEventsFetchHints,
    InMemoryStore, Metadata, Mutation, MutationKind, ReadContext, RowStore, Value, Visibility,
    historical_events, materialize,
};

// =============================================================================
// STRATEGIES
// =============================================================================

fn visibility() -> impl Strategy<Value = Visibility> {
    prop::sample::select(vec!["", "a", "b", "a|b"])
        .prop_map(|expression| Visibility::new(expression).expect("visibility"))
}

fn name() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["age", "name", "tag"]).prop_map(str::to_string)
}

fn key() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["", "k1"]).prop_map(str::to_string)
}

fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::Integer),
        "[a-z]{0,8}".prop_map(Value::Text),
        any::<bool>().prop_map(Value::Boolean),
    ]
}

fn data() -> impl Strategy<Value = Option<Vec<u8>>> {
    prop::option::of(vec(any::<u8>(), 0..4))
}

fn direction() -> impl Strategy<Value = Direction> {
    prop::sample::select(vec![Direction::Out, Direction::In])
}

fn edge_id() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["e1", "e2"]).prop_map(str::to_string)
}

fn label() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["knows", "likes"]).prop_map(str::to_string)
}

/// Endpoint references, only valid on vertex rows.
fn edge_ref_kind() -> impl Strategy<Value = MutationKind> {
    prop_oneof![
        3 => (direction(), edge_id(), label(), visibility()).prop_map(
            |(direction, edge_id, label, visibility)| MutationKind::AddEdgeRef {
                direction,
                edge_id,
                other_vertex_id: "v2".to_string(),
                label,
                visibility,
            }
        ),
        1 => (direction(), edge_id(), visibility()).prop_map(|(direction, edge_id, visibility)| {
            MutationKind::DeleteEdgeRef { direction, edge_id, visibility }
        }),
        1 => (direction(), edge_id(), visibility(), data()).prop_map(
            |(direction, edge_id, visibility, data)| MutationKind::SoftDeleteEdgeRef {
                direction,
                edge_id,
                visibility,
                data,
            }
        ),
        1 => (direction(), edge_id(), visibility(), visibility(), data()).prop_map(
            |(direction, edge_id, edge_visibility, visibility, data)| {
                MutationKind::MarkEdgeRefHidden {
                    direction,
                    edge_id,
                    edge_visibility,
                    visibility,
                    data,
                }
            }
        ),
        1 => (direction(), edge_id(), visibility(), visibility(), data()).prop_map(
            |(direction, edge_id, edge_visibility, visibility, data)| {
                MutationKind::MarkEdgeRefVisible {
                    direction,
                    edge_id,
                    edge_visibility,
                    visibility,
                    data,
                }
            }
        ),
    ]
}

fn vertex_mutation_kind() -> impl Strategy<Value = MutationKind> {
    prop_oneof![
        3 => element_mutation_kind(),
        1 => edge_ref_kind(),
    ]
}

fn edge_mutation_kind() -> impl Strategy<Value = MutationKind> {
    prop_oneof![
        5 => element_mutation_kind(),
        1 => label().prop_map(|label| MutationKind::AlterEdgeLabel { label }),
    ]
}

/// Mutations valid on any element row.
fn element_mutation_kind() -> impl Strategy<Value = MutationKind> {
    prop_oneof![
        4 => (key(), name(), value(), visibility()).prop_map(|(key, name, value, visibility)| {
            MutationKind::AddPropertyValue {
                key,
                name,
                value,
                metadata: Metadata::new(),
                visibility,
            }
        }),
        1 => (key(), name(), visibility()).prop_map(|(key, name, visibility)| {
            MutationKind::DeletePropertyValue { key, name, visibility }
        }),
        1 => (key(), name(), visibility(), data()).prop_map(|(key, name, visibility, data)| {
            MutationKind::SoftDeletePropertyValue { key, name, visibility, data }
        }),
        1 => (key(), name(), visibility(), visibility(), data()).prop_map(
            |(key, name, property_visibility, visibility, data)| MutationKind::MarkPropertyHidden {
                key,
                name,
                property_visibility,
                visibility,
                data,
            }
        ),
        1 => (key(), name(), visibility(), visibility(), data()).prop_map(
            |(key, name, property_visibility, visibility, data)| MutationKind::MarkPropertyVisible {
                key,
                name,
                property_visibility,
                visibility,
                data,
            }
        ),
        1 => (key(), name(), visibility(), value()).prop_map(
            |(key, name, property_visibility, value)| MutationKind::SetPropertyMetadata {
                key,
                name,
                property_visibility,
                metadata_name: "source".to_string(),
                value,
                visibility: Visibility::empty(),
            }
        ),
        1 => (visibility(), data()).prop_map(|(visibility, data)| {
            MutationKind::AlterVisibility { visibility, data }
        }),
        1 => (visibility(), data()).prop_map(|(visibility, data)| {
            MutationKind::MarkElementHidden { visibility, data }
        }),
        1 => (visibility(), data()).prop_map(|(visibility, data)| {
            MutationKind::MarkElementVisible { visibility, data }
        }),
        1 => (visibility(), data()).prop_map(|(visibility, data)| {
            MutationKind::AddAdditionalVisibility { visibility, data }
        }),
        1 => (visibility(), data()).prop_map(|(visibility, data)| {
            MutationKind::DeleteAdditionalVisibility { visibility, data }
        }),
        1 => data().prop_map(|data| MutationKind::SoftDeleteElement { data }),
    ]
}

/// `creation` at timestamp 1, then `steps` at non-decreasing timestamps.
fn history(creation: Vec<MutationKind>, steps: Vec<(i64, MutationKind)>) -> Vec<Mutation> {
    let mut timestamp = 1;
    let mut mutations: Vec<Mutation> = creation
        .into_iter()
        .map(|kind| Mutation::new(timestamp, kind))
        .collect();
    for (delta, kind) in steps {
        timestamp += delta;
        mutations.push(Mutation::new(timestamp, kind));
    }
    mutations
}

/// A vertex creation signal followed by mutations, ties included.
fn vertex_history() -> impl Strategy<Value = Vec<Mutation>> {
    vec((0i64..3, vertex_mutation_kind()), 0..24).prop_map(|steps| {
        history(
            vec![MutationKind::AlterVisibility {
                visibility: Visibility::empty(),
                data: None,
            }],
            steps,
        )
    })
}

/// An edge setup (endpoints, label, visibility) followed by mutations.
fn edge_history() -> impl Strategy<Value = Vec<Mutation>> {
    vec((0i64..3, edge_mutation_kind()), 0..24).prop_map(|steps| {
        history(
            vec![
                MutationKind::EdgeSetup {
                    out_vertex_id: "v1".to_string(),
                    in_vertex_id: "v2".to_string(),
                },
                MutationKind::AlterVisibility {
                    visibility: Visibility::empty(),
                    data: None,
                },
                MutationKind::AlterEdgeLabel {
                    label: "knows".to_string(),
                },
            ],
            steps,
        )
    })
}

fn any_row() -> impl Strategy<Value = (ElementType, Vec<Mutation>)> {
    prop_oneof![
        vertex_history().prop_map(|mutations| (ElementType::Vertex, mutations)),
        edge_history().prop_map(|mutations| (ElementType::Edge, mutations)),
    ]
}

fn contexts() -> Vec<ReadContext> {
    let auths = [
        Authorizations::empty(),
        Authorizations::new(["a"]),
        Authorizations::new(["a", "b"]),
    ];
    let hints = [
        FetchHints::all(),
        FetchHints::all_including_hidden(),
        FetchHints::edge_refs(),
    ];
    let mut contexts = Vec::new();
    for authorizations in &auths {
        for fetch_hints in &hints {
            contexts.push(ReadContext::new(authorizations.clone(), fetch_hints.clone()));
            contexts.push(
                ReadContext::new(authorizations.clone(), fetch_hints.clone())
                    .with_max_versions(Some(1)),
            );
        }
    }
    contexts
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The log layout and the wide-column layout fold to the same element
    /// and report the same history.
    #[test]
    fn backends_materialize_identically((element_type, mutations) in any_row()) {
        let memory = InMemoryStore::new();
        memory.append(element_type, "r1", &mutations).expect("append");

        let dir = tempfile::tempdir().expect("tempdir");
        let columnar = ColumnarStore::open(dir.path().join("g.redb"), CodecSettings::default())
            .expect("open");
        columnar.append(element_type, "r1", &mutations).expect("append");

        let from_log = memory.read_row(element_type, "r1", None).expect("read");
        let from_cells = columnar.read_row(element_type, "r1", None).expect("read");

        for ctx in contexts() {
            let a = materialize(element_type, "r1", &from_log, &ctx).expect("log fold");
            let b = materialize(element_type, "r1", &from_cells, &ctx).expect("cell fold");
            prop_assert_eq!(a, b);
        }

        let hints = HistoricalEventsFetchHints::all();
        for authorizations in [Authorizations::empty(), Authorizations::new(["a", "b"])] {
            let a = historical_events(element_type, "r1", &from_log, &authorizations, &hints)
                .expect("log history");
            let b = historical_events(element_type, "r1", &from_cells, &authorizations, &hints)
                .expect("cell history");
            prop_assert_eq!(a, b);
        }
    }

    /// Re-applying an identical property mutation yields one instance.
    #[test]
    fn identical_property_mutation_is_idempotent(
        key in key(),
        name in name(),
        value in value(),
        visibility in visibility(),
    ) {
        let add = Mutation::new(5, MutationKind::AddPropertyValue {
            key,
            name: name.clone(),
            value,
            metadata: Metadata::new(),
            visibility,
        });
        let once = vec![Mutation::alter_visibility(1, Visibility::empty()), add.clone()];
        let mut twice = once.clone();
        twice.push(add);

        let ctx = ReadContext::new(Authorizations::new(["a", "b"]), FetchHints::all());
        let a = materialize(ElementType::Vertex, "v1", &once, &ctx).expect("fold").expect("element");
        let b = materialize(ElementType::Vertex, "v1", &twice, &ctx).expect("fold").expect("element");
        prop_assert_eq!(a.properties_named(&name).expect("hint").len(), 1);
        prop_assert_eq!(a, b);
    }

    /// A trailing row delete hides the element whatever precedes it.
    #[test]
    fn hard_delete_wins(mut mutations in vertex_history()) {
        let last = mutations.last().map_or(1, |m| m.timestamp);
        mutations.push(Mutation::new(last + 1, MutationKind::DeleteRow));
        for ctx in contexts() {
            let ctx = ctx.administrative(true);
            prop_assert!(
                materialize(ElementType::Vertex, "v1", &mutations, &ctx)
                    .expect("fold")
                    .is_none()
            );
        }

        let memory = InMemoryStore::new();
        memory.append(ElementType::Vertex, "v1", &mutations).expect("append");
        let stored = memory.read_row(ElementType::Vertex, "v1", None).expect("read");
        prop_assert_eq!(stored.len(), 1);
    }

    /// Folding is a pure function of its input.
    #[test]
    fn materialize_is_deterministic(mutations in vertex_history()) {
        let ctx = ReadContext::new(Authorizations::new(["a"]), FetchHints::all());
        let first = materialize(ElementType::Vertex, "v1", &mutations, &ctx).expect("fold");
        let second = materialize(ElementType::Vertex, "v1", &mutations, &ctx).expect("fold");
        prop_assert_eq!(first, second);
    }
}
