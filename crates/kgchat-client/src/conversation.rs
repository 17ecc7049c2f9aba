//! Conversation aggregation.
//!
//! Agents stream their answers as interleaved chunks. Each agent's text is
//! accumulated in its own buffer and mirrored into one in-place *streaming*
//! message, found through an explicit `agent_id -> position` index rather
//! than by scanning the message list. The index holds at most one entry per
//! agent, so at most one message per agent is ever streaming.
//!
//! Messages are only appended or updated in place, never removed, so stored
//! positions stay valid for the life of the conversation.

use std::collections::{BTreeSet, HashMap};

use kgchat_core::time::now_ms;
use serde::Serialize;
use tracing::{debug, warn};

/// Pseudo-agent id of the synthesized deliberation summary.
pub const SUMMARY_AGENT_ID: &str = "__think_tank_summary__";

/// Display name of the synthesized deliberation summary.
pub const SUMMARY_AGENT_NAME: &str = "Think Tank Summary";

/// Who a message came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// The local user.
    User,
    /// An agent, or the summary pseudo-agent.
    Agent,
    /// Client-generated notices such as backend errors.
    System,
}

/// One entry in the conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Author kind.
    pub kind: MessageKind,
    /// Authoring agent, for [`MessageKind::Agent`].
    pub agent_id: Option<String>,
    /// Display name, when the backend sent one.
    pub agent_name: Option<String>,
    /// Text.
    pub content: String,
    /// Creation time, ms since the Unix epoch.
    pub timestamp: i64,
    /// Still receiving chunks.
    pub streaming: bool,
}

impl Message {
    fn new(kind: MessageKind, content: String) -> Self {
        Self {
            kind,
            agent_id: None,
            agent_name: None,
            content,
            timestamp: now_ms(),
            streaming: false,
        }
    }
}

/// Ordered messages plus per-agent streaming state.
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    /// Position of the streaming message of each agent.
    streaming: HashMap<String, usize>,
    buffers: HashMap<String, String>,
    active_agents: BTreeSet<String>,
    typing: Option<String>,
    agent_names: HashMap<String, String>,
    turn_in_flight: bool,
}

impl Conversation {
    /// Empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Turn boundaries ─────────────────────────────────────────────────────

    /// Reset per-turn state and append the user's message.
    ///
    /// Messages still streaming from the previous turn are finalized with
    /// whatever text they have.
    pub fn begin_turn(&mut self, text: &str) {
        for (agent_id, idx) in self.streaming.drain() {
            debug!(agent_id, "finalizing message left streaming by previous turn");
            self.messages[idx].streaming = false;
        }
        self.buffers.clear();
        self.active_agents.clear();
        self.typing = None;
        self.messages.push(Message::new(MessageKind::User, text.to_string()));
    }

    /// The backend accepted the turn.
    pub fn set_processing(&mut self) {
        self.turn_in_flight = true;
    }

    /// Every agent finished. Anything still streaming is finalized.
    pub fn all_complete(&mut self) {
        self.end_turn();
        self.finalize_streams(true);
    }

    /// A deliberation turn ended with its final summary.
    pub fn response_complete(&mut self) {
        self.end_turn();
        self.finalize_streams(true);
    }

    /// Finalize every streaming agent message and drop its buffer, so the
    /// next chunk from the same agent starts a new message. The summary
    /// stream is left open unless `include_summary`.
    ///
    /// Deliberation rounds carry no per-agent start or completion frame;
    /// this is what separates one round's text from the next.
    pub fn finalize_streams(&mut self, include_summary: bool) {
        let open: Vec<String> = self
            .streaming
            .keys()
            .filter(|id| include_summary || id.as_str() != SUMMARY_AGENT_ID)
            .cloned()
            .collect();
        for agent_id in open {
            self.finalize(&agent_id);
            let _ = self.buffers.remove(&agent_id);
            let _ = self.active_agents.remove(&agent_id);
        }
    }

    /// Append a backend error as a system message and end the turn.
    pub fn error(&mut self, message: &str) {
        self.messages
            .push(Message::new(MessageKind::System, format!("Error: {message}")));
        self.end_turn();
    }

    fn end_turn(&mut self) {
        self.turn_in_flight = false;
        self.typing = None;
        self.active_agents.clear();
    }

    // ── Agent lifecycle ─────────────────────────────────────────────────────

    /// An agent is about to respond.
    pub fn agent_typing(&mut self, agent_id: &str, agent_name: Option<&str>) {
        self.remember_name(agent_id, agent_name);
        self.typing = Some(agent_id.to_string());
        let _ = self.active_agents.insert(agent_id.to_string());
    }

    /// An agent began streaming.
    pub fn agent_start(&mut self, agent_id: &str, agent_name: Option<&str>) {
        self.remember_name(agent_id, agent_name);
        self.typing = None;
        // A second start without a completion begins a new message.
        self.finalize(agent_id);
        let _ = self.buffers.insert(agent_id.to_string(), String::new());
        let _ = self.active_agents.insert(agent_id.to_string());
    }

    /// Append a chunk and mirror the accumulated text into the agent's
    /// streaming message.
    pub fn agent_chunk(&mut self, agent_id: &str, chunk: &str, timestamp: Option<i64>) -> &Message {
        let buffer = self.buffers.entry(agent_id.to_string()).or_default();
        buffer.push_str(chunk);
        let content = buffer.clone();
        if self.typing.as_deref() == Some(agent_id) {
            self.typing = None;
        }
        let _ = self.active_agents.insert(agent_id.to_string());
        self.upsert_streaming(agent_id, content, timestamp)
    }

    /// An agent finished.
    ///
    /// `full_response` replaces the streamed text. Without it the streamed
    /// text is kept.
    pub fn agent_complete(&mut self, agent_id: &str, full_response: Option<&str>) -> Option<&Message> {
        let _ = self.active_agents.remove(agent_id);
        if self.typing.as_deref() == Some(agent_id) {
            self.typing = None;
        }
        let buffered = self.buffers.remove(agent_id);
        let content = match full_response {
            Some(text) => text.to_string(),
            None => {
                warn!(agent_id, "agent_complete without full_response; keeping streamed text");
                buffered.unwrap_or_default()
            }
        };

        if let Some(idx) = self.streaming.remove(agent_id) {
            let message = &mut self.messages[idx];
            message.content = content;
            message.streaming = false;
            return Some(&self.messages[idx]);
        }
        if content.is_empty() {
            return None;
        }
        let message = self.agent_message(agent_id, content, None);
        self.messages.push(message);
        self.messages.last()
    }

    /// A complete, non-streamed response.
    pub fn agent_response(&mut self, agent_id: &str, response: &str) -> &Message {
        let _ = self.active_agents.remove(agent_id);
        if self.typing.as_deref() == Some(agent_id) {
            self.typing = None;
        }
        let _ = self.buffers.remove(agent_id);
        // A response supersedes anything streamed for the same agent.
        if let Some(idx) = self.streaming.remove(agent_id) {
            let message = &mut self.messages[idx];
            message.content = response.to_string();
            message.streaming = false;
            return &self.messages[idx];
        }
        let message = self.agent_message(agent_id, response.to_string(), None);
        self.messages.push(message);
        let idx = self.messages.len() - 1;
        &self.messages[idx]
    }

    /// Replace the summary message's text with `summary_so_far`.
    pub fn upsert_summary(&mut self, summary_so_far: &str) -> &Message {
        self.upsert_streaming(SUMMARY_AGENT_ID, summary_so_far.to_string(), None)
    }

    // ── Views ───────────────────────────────────────────────────────────────

    /// All messages in order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The agent's streaming message, if any.
    pub fn streaming_message(&self, agent_id: &str) -> Option<&Message> {
        self.streaming.get(agent_id).map(|&idx| &self.messages[idx])
    }

    /// Text accumulated for an agent since its `agent_start`.
    pub fn buffer(&self, agent_id: &str) -> Option<&str> {
        self.buffers.get(agent_id).map(String::as_str)
    }

    /// Agents currently typing or streaming.
    pub fn active_agents(&self) -> &BTreeSet<String> {
        &self.active_agents
    }

    /// Agent shown in the typing indicator.
    pub fn typing_agent(&self) -> Option<&str> {
        self.typing.as_deref()
    }

    /// Whether a turn is in flight.
    pub fn is_processing(&self) -> bool {
        self.turn_in_flight
    }

    /// Last display name seen for an agent.
    pub fn agent_name(&self, agent_id: &str) -> Option<&str> {
        self.agent_names.get(agent_id).map(String::as_str)
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn remember_name(&mut self, agent_id: &str, agent_name: Option<&str>) {
        if let Some(name) = agent_name {
            let _ = self
                .agent_names
                .insert(agent_id.to_string(), name.to_string());
        }
    }

    fn agent_message(&self, agent_id: &str, content: String, timestamp: Option<i64>) -> Message {
        let agent_name = if agent_id == SUMMARY_AGENT_ID {
            Some(SUMMARY_AGENT_NAME.to_string())
        } else {
            self.agent_names.get(agent_id).cloned()
        };
        Message {
            kind: MessageKind::Agent,
            agent_id: Some(agent_id.to_string()),
            agent_name,
            content,
            timestamp: timestamp.unwrap_or_else(now_ms),
            streaming: false,
        }
    }

    fn upsert_streaming(&mut self, agent_id: &str, content: String, timestamp: Option<i64>) -> &Message {
        let idx = match self.streaming.get(agent_id) {
            Some(&idx) => {
                self.messages[idx].content = content;
                idx
            }
            None => {
                let mut message = self.agent_message(agent_id, content, timestamp);
                message.streaming = true;
                self.messages.push(message);
                let idx = self.messages.len() - 1;
                let _ = self.streaming.insert(agent_id.to_string(), idx);
                idx
            }
        };
        &self.messages[idx]
    }

    fn finalize(&mut self, agent_id: &str) {
        if let Some(idx) = self.streaming.remove(agent_id) {
            self.messages[idx].streaming = false;
        }
    }
}
