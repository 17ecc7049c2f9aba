//! Wire protocol between the dashboard client and the multi-agent backend.
//!
//! Frames are JSON objects over one persistent WebSocket. Every frame has a
//! string `type` discriminator.
//!
//! - **[`InboundEvent`]**: one variant per backend discriminator, with an
//!   explicit [`InboundEvent::Unknown`] arm so that new backend event types
//!   are ignored rather than treated as malformed.
//! - **[`ThinkTankEvent`]**: the deliberation sub-protocol carried inside
//!   `think_tank_system` frames, named by a `system_type` field.
//! - **[`OutboundRequest`]**: the frames the client sends.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::FrameError;

/// Round budget assumed when `round_start` omits `max_rounds`.
pub const DEFAULT_MAX_ROUNDS: u32 = 5;

fn default_max_rounds() -> u32 {
    DEFAULT_MAX_ROUNDS
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded backend frame.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// Handshake sent by the backend right after the socket opens.
    Connected {
        /// Agent roster advertised by the backend (opaque).
        #[serde(default)]
        agents: Option<Value>,
        /// Size of the knowledge graph.
        #[serde(default)]
        graph_stats: Option<GraphStats>,
    },

    /// A user turn was accepted and is being worked on.
    Processing {
        /// Human-readable status line.
        #[serde(default)]
        message: Option<String>,
    },

    /// An agent is about to respond.
    AgentTyping {
        /// Agent identifier.
        agent_id: String,
        /// Display name.
        #[serde(default)]
        agent_name: Option<String>,
    },

    /// An agent began streaming.
    AgentStart {
        /// Agent identifier.
        agent_id: String,
        /// Display name.
        #[serde(default)]
        agent_name: Option<String>,
        /// Start time in ms, shared by all chunks of this response.
        #[serde(default)]
        timestamp: Option<i64>,
    },

    /// Incremental text from an agent.
    AgentChunk {
        /// Agent identifier.
        agent_id: String,
        /// Text fragment.
        chunk: String,
        /// Start time of the response this chunk belongs to.
        #[serde(default)]
        timestamp: Option<i64>,
    },

    /// An agent finished. `full_response` is authoritative over the chunks.
    AgentComplete {
        /// Agent identifier.
        agent_id: String,
        /// Final text.
        #[serde(default)]
        full_response: Option<String>,
        /// Graph nodes/edges this response refers to.
        #[serde(default)]
        highlights: Option<HighlightPayload>,
    },

    /// Non-streaming response (orchestrator mode) or a deliberation chunk.
    AgentResponse {
        /// Agent identifier.
        agent_id: String,
        /// Complete text.
        #[serde(default)]
        response: Option<String>,
        /// Text fragment.
        #[serde(default)]
        chunk: Option<String>,
        /// Graph nodes/edges this response refers to.
        #[serde(default)]
        highlights: Option<HighlightPayload>,
    },

    /// Every agent in the turn finished.
    AllComplete,

    /// Application-level failure. The connection stays open.
    Error {
        /// Error text to show the user.
        #[serde(default)]
        message: String,
    },

    /// Server heartbeat.
    Keepalive,

    /// Reply to a client `ping`.
    Pong,

    /// Deliberation metadata.
    ThinkTankSystem(ThinkTankEvent),

    /// Fragment of the synthesized deliberation summary.
    ThinkTankSummary {
        /// Text fragment.
        chunk: String,
    },

    /// End of a deliberation turn.
    ResponseComplete {
        /// Whether the final summary has been fully streamed.
        #[serde(default)]
        final_summary: bool,
    },

    /// Any discriminator this client does not know.
    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    /// Wire discriminator of this event, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Processing { .. } => "processing",
            Self::AgentTyping { .. } => "agent_typing",
            Self::AgentStart { .. } => "agent_start",
            Self::AgentChunk { .. } => "agent_chunk",
            Self::AgentComplete { .. } => "agent_complete",
            Self::AgentResponse { .. } => "agent_response",
            Self::AllComplete => "all_complete",
            Self::Error { .. } => "error",
            Self::Keepalive => "keepalive",
            Self::Pong => "pong",
            Self::ThinkTankSystem(_) => "think_tank_system",
            Self::ThinkTankSummary { .. } => "think_tank_summary",
            Self::ResponseComplete { .. } => "response_complete",
            Self::Unknown => "unknown",
        }
    }
}

/// Deliberation ("think tank") sub-events.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "system_type", rename_all = "snake_case")]
pub enum ThinkTankEvent {
    /// A round began.
    RoundStart {
        /// 1-based round number.
        round: u32,
        /// Round budget for this turn.
        #[serde(default = "default_max_rounds")]
        max_rounds: u32,
    },

    /// Knowledge-graph citations made by one agent.
    Citations {
        /// Citing agent.
        agent_id: String,
        /// Cited entities, in order.
        #[serde(default)]
        citations: Vec<CitationRef>,
    },

    /// New consensus score from the backend.
    ConsensusUpdate {
        /// Score in `[0, 1]`.
        consensus: f64,
    },

    /// A round ended.
    RoundComplete {
        /// Number of agents that answered, as counted by the backend.
        #[serde(default)]
        agents_responded: u32,
    },

    /// The synthesized summary is about to stream.
    SummaryStart {
        /// Rounds run before summarizing.
        #[serde(default)]
        rounds_completed: Option<u32>,
    },

    /// Any sub-event this client does not know.
    #[serde(other)]
    Unknown,
}

impl ThinkTankEvent {
    /// Wire sub-discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RoundStart { .. } => "round_start",
            Self::Citations { .. } => "citations",
            Self::ConsensusUpdate { .. } => "consensus_update",
            Self::RoundComplete { .. } => "round_complete",
            Self::SummaryStart { .. } => "summary_start",
            Self::Unknown => "unknown",
        }
    }
}

/// Knowledge graph size reported in the handshake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    /// Node count.
    #[serde(default)]
    pub nodes: u64,
    /// Edge count.
    #[serde(default)]
    pub edges: u64,
}

/// One citation as emitted by the backend, e.g. `[Skill: Python]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationRef {
    /// Entity type (`Skill`, `Project`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Entity name.
    pub name: String,
    /// Citation exactly as written by the agent.
    #[serde(default)]
    pub original: String,
}

/// Highlight payload attached to an agent's completion.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HighlightPayload {
    /// Nodes to emphasize.
    #[serde(default)]
    pub nodes: Vec<HighlightedNode>,
    /// Edges between emphasized nodes.
    #[serde(default)]
    pub edges: Vec<HighlightedEdge>,
    /// Agent that produced the payload.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Agent's display color.
    #[serde(default)]
    pub agent_color: Option<String>,
}

/// A node entry in a [`HighlightPayload`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HighlightedNode {
    /// Graph node id.
    pub id: String,
    /// Color override.
    #[serde(default)]
    pub color: Option<String>,
    /// Relevance in `[0, 1]`.
    #[serde(default)]
    pub intensity: Option<f64>,
    /// Whether the node should pulse.
    #[serde(default)]
    pub pulse: Option<bool>,
}

/// An edge entry in a [`HighlightPayload`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightedEdge {
    /// Graph edge id.
    pub id: String,
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
    /// Color override.
    #[serde(default)]
    pub color: Option<String>,
    /// Relationship label.
    #[serde(default)]
    pub relationship: Option<String>,
}

/// Decode one text frame.
///
/// Unknown discriminators decode to [`InboundEvent::Unknown`]. Invalid JSON,
/// a missing/non-string `type`, or a known variant with missing required
/// fields are errors.
pub fn decode_frame(frame: &str) -> Result<InboundEvent, FrameError> {
    let value: Value = serde_json::from_str(frame)?;
    if !value.get("type").is_some_and(Value::is_string) {
        return Err(FrameError::MissingDiscriminator);
    }
    Ok(serde_json::from_value(value)?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// How the backend should route a user turn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    /// Every agent answers in turn.
    #[default]
    Group,
    /// The orchestrator picks which agents answer.
    Orchestrator,
    /// Multi-round deliberation with a consensus score and final summary.
    ThinkTank,
}

impl ChatMode {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Orchestrator => "orchestrator",
            Self::ThinkTank => "think_tank",
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "group" => Ok(Self::Group),
            "orchestrator" => Ok(Self::Orchestrator),
            "think_tank" | "think-tank" => Ok(Self::ThinkTank),
            other => Err(format!(
                "unknown chat mode `{other}` (expected group, orchestrator, think_tank)"
            )),
        }
    }
}

/// A frame sent by the client.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundRequest {
    /// Binds a fresh connection to the durable session identity.
    RegisterSession {
        /// Persisted client identity.
        browser_session_id: String,
    },
    /// A user turn.
    Chat {
        /// User text.
        message: String,
        /// Routing mode.
        mode: ChatMode,
    },
    /// Client keepalive.
    Ping,
}

impl OutboundRequest {
    /// Serialize to a single text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn decode(value: Value) -> InboundEvent {
        decode_frame(&value.to_string()).unwrap()
    }

    #[test]
    fn decodes_agent_chunk() {
        let event = decode(json!({
            "type": "agent_chunk",
            "agent_id": "mathew",
            "chunk": "Hel",
            "timestamp": 1_700_000_000_000_i64
        }));
        assert_eq!(
            event,
            InboundEvent::AgentChunk {
                agent_id: "mathew".into(),
                chunk: "Hel".into(),
                timestamp: Some(1_700_000_000_000),
            }
        );
    }

    #[test]
    fn decodes_agent_complete_with_highlights() {
        let event = decode(json!({
            "type": "agent_complete",
            "agent_id": "rahil",
            "full_response": "Hello there",
            "highlights": {
                "nodes": [{"id": "skill_python", "color": "#7E57C2", "intensity": 0.9, "pulse": true}],
                "edges": [{"id": "a-b", "source": "a", "target": "b", "relationship": "uses"}],
                "agent_id": "rahil",
                "agent_color": "#7E57C2"
            }
        }));
        assert_matches!(
            event,
            InboundEvent::AgentComplete { ref agent_id, full_response: Some(ref text), highlights: Some(ref h) }
                if agent_id == "rahil" && text == "Hello there" && h.nodes.len() == 1 && h.edges.len() == 1
        );
    }

    #[test]
    fn agent_complete_without_full_response_still_decodes() {
        let event = decode(json!({"type": "agent_complete", "agent_id": "x"}));
        assert_matches!(event, InboundEvent::AgentComplete { full_response: None, highlights: None, .. });
    }

    #[test]
    fn decodes_bare_events() {
        assert_eq!(decode(json!({"type": "all_complete"})), InboundEvent::AllComplete);
        assert_eq!(decode(json!({"type": "keepalive"})), InboundEvent::Keepalive);
        assert_eq!(decode(json!({"type": "pong"})), InboundEvent::Pong);
    }

    #[test]
    fn decodes_connected_handshake() {
        let event = decode(json!({
            "type": "connected",
            "agents": {"mathew": {"name": "Mathew"}},
            "graph_stats": {"nodes": 120, "edges": 340}
        }));
        assert_matches!(
            event,
            InboundEvent::Connected { graph_stats: Some(GraphStats { nodes: 120, edges: 340 }), .. }
        );
    }

    #[test]
    fn unknown_discriminator_is_not_an_error() {
        let event = decode(json!({"type": "agent_audio", "audio": "..."}));
        assert_eq!(event, InboundEvent::Unknown);
    }

    #[test]
    fn decodes_round_start() {
        let event = decode(json!({
            "type": "think_tank_system",
            "system_type": "round_start",
            "round": 1,
            "max_rounds": 5
        }));
        assert_eq!(
            event,
            InboundEvent::ThinkTankSystem(ThinkTankEvent::RoundStart { round: 1, max_rounds: 5 })
        );
    }

    #[test]
    fn round_start_defaults_max_rounds() {
        let event = decode(json!({
            "type": "think_tank_system",
            "system_type": "round_start",
            "round": 2
        }));
        assert_eq!(
            event,
            InboundEvent::ThinkTankSystem(ThinkTankEvent::RoundStart {
                round: 2,
                max_rounds: DEFAULT_MAX_ROUNDS
            })
        );
    }

    #[test]
    fn decodes_citations() {
        let event = decode(json!({
            "type": "think_tank_system",
            "system_type": "citations",
            "agent_id": "rahil",
            "citations": [{"type": "Skill", "name": "Python", "original": "[Skill: Python]"}]
        }));
        let InboundEvent::ThinkTankSystem(ThinkTankEvent::Citations { agent_id, citations }) = event
        else {
            panic!("expected citations");
        };
        assert_eq!(agent_id, "rahil");
        assert_eq!(citations[0].kind, "Skill");
        assert_eq!(citations[0].original, "[Skill: Python]");
    }

    #[test]
    fn unknown_think_tank_sub_event() {
        let event = decode(json!({"type": "think_tank_system", "system_type": "vote_cast"}));
        assert_eq!(event, InboundEvent::ThinkTankSystem(ThinkTankEvent::Unknown));
    }

    #[test]
    fn response_complete_flag_defaults_false() {
        assert_eq!(
            decode(json!({"type": "response_complete"})),
            InboundEvent::ResponseComplete { final_summary: false }
        );
        assert_eq!(
            decode(json!({"type": "response_complete", "final_summary": true})),
            InboundEvent::ResponseComplete { final_summary: true }
        );
    }

    #[test]
    fn malformed_json_is_error() {
        assert_matches!(decode_frame("{not json"), Err(FrameError::Json(_)));
    }

    #[test]
    fn missing_type_is_error() {
        assert_matches!(
            decode_frame(r#"{"agent_id":"x"}"#),
            Err(FrameError::MissingDiscriminator)
        );
        assert_matches!(
            decode_frame(r#"{"type":42}"#),
            Err(FrameError::MissingDiscriminator)
        );
        assert_matches!(decode_frame("[1,2,3]"), Err(FrameError::MissingDiscriminator));
    }

    #[test]
    fn known_type_missing_fields_is_error() {
        assert_matches!(
            decode_frame(r#"{"type":"agent_chunk","chunk":"x"}"#),
            Err(FrameError::Json(_))
        );
    }

    #[test]
    fn event_kind_matches_wire_name() {
        assert_eq!(decode(json!({"type": "all_complete"})).kind(), "all_complete");
        assert_eq!(
            decode(json!({"type": "agent_typing", "agent_id": "a"})).kind(),
            "agent_typing"
        );
    }

    #[test]
    fn register_session_wire_format() {
        let frame = OutboundRequest::RegisterSession {
            browser_session_id: "session_abc".into(),
        }
        .to_frame()
        .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({"type": "register_session", "browser_session_id": "session_abc"})
        );
    }

    #[test]
    fn chat_wire_format() {
        let frame = OutboundRequest::Chat {
            message: "hi".into(),
            mode: ChatMode::ThinkTank,
        }
        .to_frame()
        .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"type": "chat", "message": "hi", "mode": "think_tank"}));
    }

    #[test]
    fn ping_wire_format() {
        assert_eq!(OutboundRequest::Ping.to_frame().unwrap(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn chat_mode_parse() {
        assert_eq!("group".parse::<ChatMode>().unwrap(), ChatMode::Group);
        assert_eq!("think-tank".parse::<ChatMode>().unwrap(), ChatMode::ThinkTank);
        assert!("solo".parse::<ChatMode>().is_err());
        assert_eq!(ChatMode::Orchestrator.to_string(), "orchestrator");
    }
}
