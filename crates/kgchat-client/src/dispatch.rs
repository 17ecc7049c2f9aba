//! Inbound event routing.
//!
//! [`EventDispatcher::dispatch`] decodes one raw frame and routes it to the
//! conversation, the round tracker, or the highlight sink. Decoding failures
//! are logged and dropped; nothing here can fail the caller.

use kgchat_core::protocol::{GraphStats, HighlightPayload};
use kgchat_core::{ChatMode, InboundEvent, ThinkTankEvent, decode_frame};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::conversation::Conversation;
use crate::deliberation::RoundTracker;
use crate::highlight::{HighlightSink, to_highlight_set};

/// Owns all state derived from the event stream.
pub struct EventDispatcher {
    conversation: Conversation,
    rounds: RoundTracker,
    highlights: Box<dyn HighlightSink>,
    graph_stats: Option<GraphStats>,
    agents: Option<Value>,
    /// Mode of the turn in flight, set by [`Self::begin_turn`].
    turn_mode: Option<ChatMode>,
}

impl EventDispatcher {
    /// Dispatcher forwarding highlight sets to `highlights`.
    pub fn new(default_max_rounds: u32, highlights: Box<dyn HighlightSink>) -> Self {
        Self {
            conversation: Conversation::new(),
            rounds: RoundTracker::new(default_max_rounds),
            highlights,
            graph_stats: None,
            agents: None,
            turn_mode: None,
        }
    }

    /// Decode and apply one frame. Returns the event, or `None` if the frame
    /// was malformed and dropped.
    pub fn dispatch(&mut self, frame: &str) -> Option<InboundEvent> {
        match decode_frame(frame) {
            Ok(event) => {
                self.handle(&event);
                Some(event)
            }
            Err(e) => {
                warn!(error = %e, frame_len = frame.len(), "dropping malformed frame");
                None
            }
        }
    }

    /// Apply one decoded event.
    pub fn handle(&mut self, event: &InboundEvent) {
        match event {
            InboundEvent::Connected {
                agents,
                graph_stats,
            } => {
                info!(
                    nodes = graph_stats.map(|s| s.nodes),
                    edges = graph_stats.map(|s| s.edges),
                    "backend handshake"
                );
                self.graph_stats = *graph_stats;
                self.agents.clone_from(agents);
            }
            InboundEvent::Processing { .. } => self.conversation.set_processing(),
            InboundEvent::AgentTyping {
                agent_id,
                agent_name,
            } => self
                .conversation
                .agent_typing(agent_id, agent_name.as_deref()),
            InboundEvent::AgentStart {
                agent_id,
                agent_name,
                ..
            } => self
                .conversation
                .agent_start(agent_id, agent_name.as_deref()),
            InboundEvent::AgentChunk {
                agent_id,
                chunk,
                timestamp,
            } => {
                let _ = self.conversation.agent_chunk(agent_id, chunk, *timestamp);
            }
            InboundEvent::AgentComplete {
                agent_id,
                full_response,
                highlights,
            } => {
                let _ = self
                    .conversation
                    .agent_complete(agent_id, full_response.as_deref());
                if let Some(payload) = highlights {
                    self.forward_highlights(agent_id, payload);
                }
            }
            InboundEvent::AgentResponse {
                agent_id,
                response,
                chunk,
                highlights,
            } => {
                if let Some(chunk) = chunk {
                    let _ = self.conversation.agent_chunk(agent_id, chunk, None);
                }
                if let Some(response) = response {
                    let _ = self.conversation.agent_response(agent_id, response);
                    // Orchestrator turns end with their responses; no
                    // all_complete follows.
                    if self.turn_mode == Some(ChatMode::Orchestrator) {
                        self.conversation.all_complete();
                    }
                }
                if let Some(payload) = highlights {
                    self.forward_highlights(agent_id, payload);
                }
            }
            InboundEvent::AllComplete => self.conversation.all_complete(),
            InboundEvent::Error { message } => {
                warn!(error = %message, "backend reported an error");
                self.conversation.error(message);
            }
            InboundEvent::Keepalive | InboundEvent::Pong => {}
            InboundEvent::ThinkTankSystem(sub) => {
                debug!(system_type = sub.kind(), "think tank event");
                if matches!(
                    sub,
                    ThinkTankEvent::RoundStart { .. }
                        | ThinkTankEvent::RoundComplete { .. }
                        | ThinkTankEvent::SummaryStart { .. }
                ) {
                    self.conversation.finalize_streams(false);
                }
                self.rounds.apply(sub);
            }
            InboundEvent::ThinkTankSummary { chunk } => {
                let _ = self
                    .conversation
                    .upsert_summary(self.rounds.append_summary(chunk));
            }
            InboundEvent::ResponseComplete { final_summary } => {
                if *final_summary {
                    self.conversation.response_complete();
                } else {
                    debug!("response_complete without final_summary; turn continues");
                }
            }
            InboundEvent::Unknown => debug!("ignoring frame with unknown type"),
        }
    }

    /// Reset per-turn state before a new chat request goes out.
    pub fn begin_turn(&mut self, text: &str, mode: ChatMode) {
        self.conversation.begin_turn(text);
        self.rounds.reset();
        self.turn_mode = Some(mode);
    }

    fn forward_highlights(&mut self, agent_id: &str, payload: &HighlightPayload) {
        match to_highlight_set(agent_id, payload) {
            Some(set) => {
                debug!(
                    agent_id,
                    nodes = set.nodes.len(),
                    edges = set.edges.len(),
                    "forwarding highlights"
                );
                self.highlights.consume_highlight_set(set);
            }
            None => debug!(agent_id, "highlight payload has no nodes; not forwarding"),
        }
    }

    /// Conversation state.
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Deliberation state.
    pub fn rounds(&self) -> &RoundTracker {
        &self.rounds
    }

    /// Graph size from the handshake.
    pub fn graph_stats(&self) -> Option<GraphStats> {
        self.graph_stats
    }

    /// Agent roster from the handshake, as sent.
    pub fn agents(&self) -> Option<&Value> {
        self.agents.as_ref()
    }
}
