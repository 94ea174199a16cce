//! # Historical Events
//!
//! A chronological view of an element: one event per causative mutation,
//! ordered by [`HistoricalEventId`] and resumable from any event id.

use crate::element::Metadata;
use crate::visibility::Visibility;
use crate::{Direction, ElementId, ElementType, EventData, Timestamp, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of an event in the global history stream.
///
/// Ordered by (timestamp, ordinal, element type, element id). `ordinal`
/// numbers the events of one element sharing a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HistoricalEventId {
    pub timestamp: Timestamp,
    pub ordinal: u32,
    pub element_type: ElementType,
    pub element_id: String,
}

impl HistoricalEventId {
    #[must_use]
    pub fn element(&self) -> ElementId {
        ElementId {
            element_type: self.element_type,
            id: self.element_id.clone(),
        }
    }
}

impl fmt::Display for HistoricalEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}@{}:{}",
            self.timestamp,
            self.ordinal,
            self.element_type.tag(),
            self.element_id
        )
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HistoricalEventKind {
    AddVertex {
        visibility: Visibility,
        data: EventData,
    },
    AddEdge {
        visibility: Visibility,
        label: String,
        out_vertex_id: String,
        in_vertex_id: String,
        data: EventData,
    },
    AlterVisibility {
        old_visibility: Visibility,
        new_visibility: Visibility,
        data: EventData,
    },
    AlterEdgeLabel {
        old_label: Option<String>,
        new_label: String,
    },
    AddProperty {
        key: String,
        name: String,
        visibility: Visibility,
        /// Present only when values were requested.
        value: Option<Value>,
        metadata: Metadata,
    },
    DeleteProperty {
        key: String,
        name: String,
        visibility: Visibility,
    },
    SoftDeleteProperty {
        key: String,
        name: String,
        visibility: Visibility,
        data: EventData,
    },
    MarkPropertyHidden {
        key: String,
        name: String,
        property_visibility: Visibility,
        hidden_visibility: Visibility,
        data: EventData,
    },
    MarkPropertyVisible {
        key: String,
        name: String,
        property_visibility: Visibility,
        hidden_visibility: Visibility,
        data: EventData,
    },
    SetPropertyMetadata {
        key: String,
        name: String,
        property_visibility: Visibility,
        metadata_name: String,
        visibility: Visibility,
        value: Option<Value>,
    },
    AddAdditionalVisibility {
        visibility: Visibility,
        data: EventData,
    },
    DeleteAdditionalVisibility {
        visibility: Visibility,
        data: EventData,
    },
    SoftDeleteElement {
        data: EventData,
    },
    MarkHidden {
        hidden_visibility: Visibility,
        data: EventData,
    },
    MarkVisible {
        hidden_visibility: Visibility,
        data: EventData,
    },
    AddEdgeRef {
        direction: Direction,
        edge_id: String,
        other_vertex_id: String,
        label: String,
        edge_visibility: Visibility,
    },
    DeleteEdgeRef {
        direction: Direction,
        edge_id: String,
        edge_visibility: Visibility,
    },
    SoftDeleteEdgeRef {
        direction: Direction,
        edge_id: String,
        edge_visibility: Visibility,
        data: EventData,
    },
    MarkEdgeRefHidden {
        direction: Direction,
        edge_id: String,
        edge_visibility: Visibility,
        hidden_visibility: Visibility,
        data: EventData,
    },
    MarkEdgeRefVisible {
        direction: Direction,
        edge_id: String,
        edge_visibility: Visibility,
        hidden_visibility: Visibility,
        data: EventData,
    },
    AddExtendedDataTable {
        table_name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalEvent {
    pub id: HistoricalEventId,
    pub kind: HistoricalEventKind,
}

impl HistoricalEvent {
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.id.timestamp
    }
}

// =============================================================================
// FETCH HINTS
// =============================================================================

/// Selects which part of the history stream to return.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalEventsFetchHints {
    /// Inclusive lower bound.
    pub start_time: Option<Timestamp>,
    /// Inclusive upper bound.
    pub end_time: Option<Timestamp>,
    pub include_property_values: bool,
    pub limit: Option<usize>,
}

impl HistoricalEventsFetchHints {
    /// Everything, property values included.
    #[must_use]
    pub fn all() -> Self {
        Self {
            include_property_values: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn in_window(&self, timestamp: Timestamp) -> bool {
        self.start_time.is_none_or(|start| timestamp >= start)
            && self.end_time.is_none_or(|end| timestamp <= end)
    }

    /// Order, window, resume after `after`, then apply the limit.
    #[must_use]
    pub fn apply_to_results(
        &self,
        mut events: Vec<HistoricalEvent>,
        after: Option<&HistoricalEventId>,
    ) -> Vec<HistoricalEvent> {
        events.sort_by(|a, b| a.id.cmp(&b.id));
        let iter = events
            .into_iter()
            .filter(|event| self.in_window(event.id.timestamp))
            .filter(|event| after.is_none_or(|after| &event.id > after));
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(timestamp: Timestamp, ordinal: u32, id: &str) -> HistoricalEvent {
        HistoricalEvent {
            id: HistoricalEventId {
                timestamp,
                ordinal,
                element_type: ElementType::Vertex,
                element_id: id.to_string(),
            },
            kind: HistoricalEventKind::SoftDeleteElement { data: None },
        }
    }

    #[test]
    fn ids_order_by_time_then_ordinal() {
        let a = event(100, 1, "a").id;
        let b = event(100, 0, "z").id;
        let c = event(99, 5, "z").id;
        let mut ids = vec![a.clone(), b.clone(), c.clone()];
        ids.sort();
        assert_eq!(ids, vec![c, b, a]);
    }

    #[test]
    fn apply_window_after_and_limit() {
        let events = vec![
            event(300, 0, "v"),
            event(100, 0, "v"),
            event(200, 0, "v"),
            event(200, 1, "v"),
        ];
        let hints = HistoricalEventsFetchHints {
            start_time: Some(150),
            limit: Some(2),
            ..HistoricalEventsFetchHints::all()
        };
        let page = hints.apply_to_results(events.clone(), None);
        assert_eq!(
            page.iter().map(|e| (e.id.timestamp, e.id.ordinal)).collect::<Vec<_>>(),
            vec![(200, 0), (200, 1)]
        );

        let next = hints.apply_to_results(events, Some(&page[1].id));
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].id.timestamp, 300);
    }
}
