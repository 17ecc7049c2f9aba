//! Bridge from completion highlights to the graph visualization.
//!
//! [`to_highlight_set`] normalizes one [`HighlightPayload`] into a
//! [`HighlightSet`] tagged with the completing agent. The dispatcher hands
//! every non-empty set to a [`HighlightSink`] and forgets it; how sets are
//! combined across agents is the sink's business. [`HighlightMap`] is the
//! stock accumulating sink: overlapping nodes blend rather than overwrite.

use std::collections::BTreeMap;

use kgchat_core::protocol::{HighlightPayload, HighlightedEdge, HighlightedNode};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// Color used when neither the node nor the payload names one.
pub const FALLBACK_COLOR: &str = "#999999";

/// Nodes above this intensity pulse unless the backend says otherwise.
pub const PULSE_THRESHOLD: f64 = 0.7;

/// Weight of a later agent's intensity when blended onto an existing node.
pub const BLEND_WEIGHT: f64 = 0.5;

/// A node to emphasize.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NodeHighlight {
    /// Graph node id.
    pub node_id: String,
    /// Display color.
    pub color: String,
    /// Relevance in `[0, 1]`.
    pub intensity: f64,
    /// Whether the node pulses.
    pub pulse: bool,
    /// Agent whose completion produced this entry.
    pub source_agent_id: String,
}

/// An edge to emphasize.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EdgeHighlight {
    /// Graph edge id.
    pub edge_id: String,
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
    /// Display color.
    pub color: String,
    /// Relationship label, if the backend sent one.
    pub relationship: Option<String>,
    /// Agent whose completion produced this entry.
    pub source_agent_id: String,
}

/// Everything one agent completion asks the graph to emphasize.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HighlightSet {
    /// Agent that completed.
    pub agent_id: String,
    /// Nodes, in payload order.
    pub nodes: Vec<NodeHighlight>,
    /// Edges, in payload order.
    pub edges: Vec<EdgeHighlight>,
}

/// Normalize a completion's payload. `None` when it names no nodes.
pub fn to_highlight_set(agent_id: &str, payload: &HighlightPayload) -> Option<HighlightSet> {
    if payload.nodes.is_empty() {
        return None;
    }
    let agent_color = payload.agent_color.as_deref().unwrap_or(FALLBACK_COLOR);
    Some(HighlightSet {
        agent_id: agent_id.to_string(),
        nodes: payload
            .nodes
            .iter()
            .map(|node| node_highlight(agent_id, agent_color, node))
            .collect(),
        edges: payload
            .edges
            .iter()
            .map(|edge| edge_highlight(agent_id, agent_color, edge))
            .collect(),
    })
}

fn node_highlight(agent_id: &str, agent_color: &str, node: &HighlightedNode) -> NodeHighlight {
    let intensity = node
        .intensity
        .filter(|v| v.is_finite())
        .map_or(1.0, |v| v.clamp(0.0, 1.0));
    NodeHighlight {
        node_id: node.id.clone(),
        color: node.color.clone().unwrap_or_else(|| agent_color.to_string()),
        intensity,
        pulse: node.pulse.unwrap_or(intensity > PULSE_THRESHOLD),
        source_agent_id: agent_id.to_string(),
    }
}

fn edge_highlight(agent_id: &str, agent_color: &str, edge: &HighlightedEdge) -> EdgeHighlight {
    EdgeHighlight {
        edge_id: edge.id.clone(),
        source: edge.source.clone(),
        target: edge.target.clone(),
        color: edge.color.clone().unwrap_or_else(|| agent_color.to_string()),
        relationship: edge.relationship.clone(),
        source_agent_id: agent_id.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sinks
// ─────────────────────────────────────────────────────────────────────────────

/// Receives highlight sets as agents complete.
pub trait HighlightSink: Send {
    /// Take one set. Must not block.
    fn consume_highlight_set(&mut self, set: HighlightSet);
}

/// Forwards sets to another task.
impl HighlightSink for mpsc::UnboundedSender<HighlightSet> {
    fn consume_highlight_set(&mut self, set: HighlightSet) {
        if self.send(set).is_err() {
            debug!("highlight receiver dropped");
        }
    }
}

/// A node after blending every agent that referenced it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AccumulatedNode {
    /// Graph node id.
    pub node_id: String,
    /// Color of the first agent that referenced the node.
    pub color: String,
    /// Blended relevance, capped at 1.
    pub intensity: f64,
    /// Whether any contributing agent asked for a pulse.
    pub pulse: bool,
    /// Contributing agents, in first-seen order.
    pub agents: Vec<String>,
}

/// Current graph emphasis for a turn, blended across agents.
///
/// A node referenced again gains `BLEND_WEIGHT` of the new intensity.
/// Edges are keyed by id and the latest entry wins.
#[derive(Clone, Debug, Default)]
pub struct HighlightMap {
    nodes: BTreeMap<String, AccumulatedNode>,
    edges: BTreeMap<String, EdgeHighlight>,
}

impl HighlightMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blend one set into the map.
    pub fn merge(&mut self, set: HighlightSet) {
        for node in set.nodes {
            match self.nodes.get_mut(&node.node_id) {
                Some(existing) => {
                    existing.intensity =
                        (existing.intensity + node.intensity * BLEND_WEIGHT).min(1.0);
                    existing.pulse |= node.pulse;
                    if !existing.agents.contains(&node.source_agent_id) {
                        existing.agents.push(node.source_agent_id);
                    }
                }
                None => {
                    let _ = self.nodes.insert(
                        node.node_id.clone(),
                        AccumulatedNode {
                            node_id: node.node_id,
                            color: node.color,
                            intensity: node.intensity,
                            pulse: node.pulse,
                            agents: vec![node.source_agent_id],
                        },
                    );
                }
            }
        }
        for edge in set.edges {
            let _ = self.edges.insert(edge.edge_id.clone(), edge);
        }
    }

    /// Forget everything, e.g. when a new turn starts.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
    }

    /// Accumulated node by id.
    pub fn node(&self, node_id: &str) -> Option<&AccumulatedNode> {
        self.nodes.get(node_id)
    }

    /// All accumulated nodes, ordered by id.
    pub fn nodes(&self) -> impl Iterator<Item = &AccumulatedNode> {
        self.nodes.values()
    }

    /// All edges, ordered by id.
    pub fn edges(&self) -> impl Iterator<Item = &EdgeHighlight> {
        self.edges.values()
    }

    /// Whether nothing is highlighted.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

impl HighlightSink for HighlightMap {
    fn consume_highlight_set(&mut self, set: HighlightSet) {
        self.merge(set);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, intensity: Option<f64>) -> HighlightedNode {
        HighlightedNode {
            id: id.into(),
            color: None,
            intensity,
            pulse: None,
        }
    }

    fn payload(nodes: Vec<HighlightedNode>, color: Option<&str>) -> HighlightPayload {
        HighlightPayload {
            nodes,
            edges: vec![],
            agent_id: None,
            agent_color: color.map(str::to_string),
        }
    }

    #[test]
    fn empty_nodes_yield_nothing() {
        let mut p = payload(vec![], Some("#2196F3"));
        p.edges.push(HighlightedEdge {
            id: "a-b".into(),
            source: "a".into(),
            target: "b".into(),
            color: None,
            relationship: None,
        });
        assert!(to_highlight_set("mathew", &p).is_none());
    }

    #[test]
    fn tags_entries_with_agent() {
        let set = to_highlight_set("rahil", &payload(vec![node("n1", Some(0.5))], None)).unwrap();
        assert_eq!(set.agent_id, "rahil");
        assert_eq!(set.nodes[0].source_agent_id, "rahil");
    }

    #[test]
    fn color_falls_back_to_agent_then_default() {
        let set =
            to_highlight_set("a", &payload(vec![node("n1", Some(0.5))], Some("#4CAF50"))).unwrap();
        assert_eq!(set.nodes[0].color, "#4CAF50");

        let set = to_highlight_set("a", &payload(vec![node("n1", Some(0.5))], None)).unwrap();
        assert_eq!(set.nodes[0].color, FALLBACK_COLOR);

        let mut explicit = node("n1", Some(0.5));
        explicit.color = Some("#FF0000".into());
        let set = to_highlight_set("a", &payload(vec![explicit], Some("#4CAF50"))).unwrap();
        assert_eq!(set.nodes[0].color, "#FF0000");
    }

    #[test]
    fn intensity_is_clamped_and_drives_pulse() {
        let set = to_highlight_set(
            "a",
            &payload(
                vec![node("hi", Some(1.7)), node("lo", Some(0.3)), node("neg", Some(-2.0))],
                None,
            ),
        )
        .unwrap();
        assert!((set.nodes[0].intensity - 1.0).abs() < f64::EPSILON);
        assert!(set.nodes[0].pulse);
        assert!(!set.nodes[1].pulse);
        assert!(set.nodes[2].intensity.abs() < f64::EPSILON);
    }

    #[test]
    fn missing_or_nan_intensity_is_full() {
        let set = to_highlight_set(
            "a",
            &payload(vec![node("none", None), node("nan", Some(f64::NAN))], None),
        )
        .unwrap();
        assert!(set.nodes.iter().all(|n| (n.intensity - 1.0).abs() < f64::EPSILON));
    }

    #[test]
    fn explicit_pulse_wins() {
        let mut n = node("n1", Some(0.95));
        n.pulse = Some(false);
        let set = to_highlight_set("a", &payload(vec![n], None)).unwrap();
        assert!(!set.nodes[0].pulse);
    }

    #[test]
    fn edges_carry_relationship_and_color() {
        let mut p = payload(vec![node("a", Some(0.5))], Some("#7E57C2"));
        p.edges.push(HighlightedEdge {
            id: "a-b".into(),
            source: "a".into(),
            target: "b".into(),
            color: None,
            relationship: Some("USES".into()),
        });
        let set = to_highlight_set("rahil", &p).unwrap();
        assert_eq!(set.edges[0].color, "#7E57C2");
        assert_eq!(set.edges[0].relationship.as_deref(), Some("USES"));
        assert_eq!(set.edges[0].source_agent_id, "rahil");
    }

    #[test]
    fn map_blends_overlapping_nodes() {
        let mut map = HighlightMap::new();
        map.merge(to_highlight_set("a", &payload(vec![node("n", Some(0.6))], Some("#111111"))).unwrap());
        map.merge(to_highlight_set("b", &payload(vec![node("n", Some(0.4))], Some("#222222"))).unwrap());

        let n = map.node("n").unwrap();
        assert!((n.intensity - 0.8).abs() < 1e-9);
        assert_eq!(n.color, "#111111");
        assert_eq!(n.agents, vec!["a".to_string(), "b".to_string()]);
        assert!(!n.pulse);

        map.merge(to_highlight_set("c", &payload(vec![node("n", Some(0.9))], None)).unwrap());
        assert!(map.node("n").unwrap().pulse);
    }

    #[test]
    fn map_caps_intensity_and_dedups_agents() {
        let mut map = HighlightMap::new();
        for _ in 0..3 {
            map.merge(to_highlight_set("a", &payload(vec![node("n", Some(0.9))], None)).unwrap());
        }
        let n = map.node("n").unwrap();
        assert!((n.intensity - 1.0).abs() < f64::EPSILON);
        assert_eq!(n.agents.len(), 1);
    }

    #[test]
    fn map_clear_empties() {
        let mut map = HighlightMap::new();
        map.consume_highlight_set(
            to_highlight_set("a", &payload(vec![node("n", Some(0.5))], None)).unwrap(),
        );
        assert!(!map.is_empty());
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.nodes().count(), 0);
    }

    #[test]
    fn channel_sink_forwards() {
        let (mut tx, mut rx) = mpsc::unbounded_channel();
        tx.consume_highlight_set(HighlightSet {
            agent_id: "a".into(),
            ..HighlightSet::default()
        });
        assert_eq!(rx.try_recv().unwrap().agent_id, "a");
    }
}
