use serde::{Deserialize, Serialize};

/// A directed edge between two nodes in the flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Unique identifier for this edge.
    pub id: String,
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
    /// Expression that must hold to traverse this edge. `None` means always.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Edge {
    /// Create an unconditional edge.
    pub fn always(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            condition: None,
        }
    }

    /// Create a conditional edge.
    pub fn when(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            condition: Some(condition.into()),
        }
    }

    /// The condition expression. An empty string counts as no condition.
    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref().filter(|c| !c.is_empty())
    }

    /// No condition, or an empty one.
    pub fn is_unconditional(&self) -> bool {
        self.condition().is_none()
    }
}

/// Pick the edge to follow from a node's outgoing edges.
///
/// `edges` must be in graph definition order. The rules, in order:
///
/// 1. No edges: `None` (dead end).
/// 2. The first edge is unconditional: take it.
/// 3. Take the first conditional edge whose condition `test` accepts.
///    Unconditional edges after the first position never match here.
/// 4. Nothing matched: fall back to the first edge, whatever its condition.
pub fn select_edge<'e, F>(edges: &[&'e Edge], mut test: F) -> Option<&'e Edge>
where
    F: FnMut(&str) -> bool,
{
    let first = *edges.first()?;

    if first.is_unconditional() {
        return Some(first);
    }

    for &edge in edges {
        if let Some(condition) = edge.condition() {
            if test(condition) {
                return Some(edge);
            }
        }
    }

    Some(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(edges: &[Edge]) -> Vec<&Edge> {
        edges.iter().collect()
    }

    #[test]
    fn test_edge_builders() {
        let e = Edge::always("e1", "a", "b");
        assert_eq!(e.source, "a");
        assert_eq!(e.target, "b");
        assert!(e.is_unconditional());

        let e = Edge::when("e2", "a", "c", "round < 3");
        assert_eq!(e.condition(), Some("round < 3"));
    }

    #[test]
    fn test_empty_condition_is_unconditional() {
        assert!(Edge::when("e1", "a", "b", "").is_unconditional());

        // Whitespace is a condition, and one that never holds
        let edges = vec![
            Edge::when("e1", "a", "b", "   "),
            Edge::when("e2", "a", "c", "x"),
        ];
        assert!(!edges[0].is_unconditional());
        let chosen = select_edge(&refs(&edges), |c| c == "x");
        assert_eq!(chosen.map(|e| e.id.as_str()), Some("e2"));
    }

    #[test]
    fn test_select_no_edges() {
        assert!(select_edge(&[], |_| true).is_none());
    }

    #[test]
    fn test_select_first_unconditional_wins() {
        let edges = vec![Edge::always("e1", "a", "b"), Edge::when("e2", "a", "c", "x")];
        let mut calls = 0;
        let chosen = select_edge(&refs(&edges), |_| {
            calls += 1;
            true
        });
        assert_eq!(chosen.unwrap().id, "e1");
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_select_first_true_condition() {
        let edges = vec![
            Edge::when("e1", "a", "b", "no"),
            Edge::when("e2", "a", "c", "yes"),
            Edge::when("e3", "a", "d", "yes"),
        ];
        let chosen = select_edge(&refs(&edges), |c| c == "yes");
        assert_eq!(chosen.unwrap().id, "e2");
    }

    #[test]
    fn test_later_unconditional_edge_is_not_a_default() {
        let edges = vec![
            Edge::when("e1", "a", "b", "no"),
            Edge::always("e2", "a", "c"),
        ];
        let chosen = select_edge(&refs(&edges), |_| false);
        assert_eq!(chosen.unwrap().id, "e1");
    }

    #[test]
    fn test_fallback_to_first_edge() {
        let edges = vec![
            Edge::when("e1", "a", "b", "no"),
            Edge::when("e2", "a", "c", "also no"),
        ];
        let chosen = select_edge(&refs(&edges), |_| false);
        assert_eq!(chosen.unwrap().id, "e1");
    }

    #[test]
    fn test_serialization_roundtrip() {
        let edge = Edge::when("e1", "a", "b", "round >= maxRounds");
        let json = serde_json::to_string(&edge).unwrap();
        let parsed: Edge = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, edge);

        let json = serde_json::to_string(&Edge::always("e2", "a", "b")).unwrap();
        assert!(!json.contains("condition"));
    }
}
