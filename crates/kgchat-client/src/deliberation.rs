//! Round tracking for think-tank deliberation.
//!
//! A think-tank turn runs a bounded number of rounds. Each round the agents
//! cite knowledge-graph entities, the backend reports a consensus score, and
//! after the last round a summary streams in. [`RoundTracker`] keeps that
//! state for one turn and is reset when the next turn is sent.

use kgchat_core::protocol::{CitationRef, ThinkTankEvent};
use kgchat_core::time::now_ms;
use serde::Serialize;
use tracing::{debug, warn};

/// Phase of the current round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// No round has started this turn.
    #[default]
    Waiting,
    /// A round is in progress.
    Active,
    /// The latest round finished.
    Complete,
}

/// Round progress for the current turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RoundState {
    /// 1-based round number, `0` before the first round.
    pub current_round: u32,
    /// Round budget.
    pub max_rounds: u32,
    /// Phase.
    pub status: RoundStatus,
    /// Agents that answered in the latest completed round.
    pub agents_responded: u32,
}

impl RoundState {
    fn waiting(max_rounds: u32) -> Self {
        Self {
            current_round: 0,
            max_rounds,
            status: RoundStatus::Waiting,
            agents_responded: 0,
        }
    }
}

/// A citation attributed to the agent that made it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Citation {
    /// Entity type.
    pub kind: String,
    /// Entity name.
    pub name: String,
    /// Citation as written.
    pub original: String,
    /// Citing agent.
    pub agent_id: String,
}

/// Latest consensus score.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ConsensusSnapshot {
    /// Score in `[0, 1]`.
    pub score: f64,
    /// Round the score was reported in.
    pub round: u32,
    /// Receive time, ms since the Unix epoch.
    pub timestamp: i64,
}

/// Deliberation state for one turn.
#[derive(Clone, Debug)]
pub struct RoundTracker {
    default_max_rounds: u32,
    state: RoundState,
    citations: Vec<Citation>,
    consensus: Option<ConsensusSnapshot>,
    summary_started: bool,
    summary: String,
}

impl RoundTracker {
    /// Tracker that assumes `default_max_rounds` until a round announces one.
    pub fn new(default_max_rounds: u32) -> Self {
        Self {
            default_max_rounds,
            state: RoundState::waiting(default_max_rounds),
            citations: Vec::new(),
            consensus: None,
            summary_started: false,
            summary: String::new(),
        }
    }

    /// Drop all state from the previous turn.
    pub fn reset(&mut self) {
        self.state = RoundState::waiting(self.default_max_rounds);
        self.citations.clear();
        self.consensus = None;
        self.summary_started = false;
        self.summary.clear();
    }

    /// Apply one `think_tank_system` sub-event.
    pub fn apply(&mut self, event: &ThinkTankEvent) {
        match event {
            ThinkTankEvent::RoundStart { round, max_rounds } => self.round_start(*round, *max_rounds),
            ThinkTankEvent::Citations {
                agent_id,
                citations,
            } => self.add_citations(agent_id, citations),
            ThinkTankEvent::ConsensusUpdate { consensus } => self.consensus_update(*consensus),
            ThinkTankEvent::RoundComplete { agents_responded } => {
                self.round_complete(*agents_responded);
            }
            ThinkTankEvent::SummaryStart { rounds_completed } => {
                self.summary_start(*rounds_completed);
            }
            ThinkTankEvent::Unknown => debug!("ignoring unknown think_tank_system event"),
        }
    }

    /// A round began. Accepted in any status.
    pub fn round_start(&mut self, round: u32, max_rounds: u32) {
        self.state.current_round = round;
        self.state.max_rounds = max_rounds;
        self.state.status = RoundStatus::Active;
        self.state.agents_responded = 0;
        debug!(round, max_rounds, "round started");
    }

    /// Append citations in arrival order. Duplicates are kept.
    pub fn add_citations(&mut self, agent_id: &str, refs: &[CitationRef]) {
        self.citations.extend(refs.iter().map(|c| Citation {
            kind: c.kind.clone(),
            name: c.name.clone(),
            original: c.original.clone(),
            agent_id: agent_id.to_string(),
        }));
    }

    /// Replace the consensus score, clamped to `[0, 1]`.
    pub fn consensus_update(&mut self, score: f64) {
        if score.is_nan() {
            warn!("ignoring NaN consensus score");
            return;
        }
        if !(0.0..=1.0).contains(&score) {
            warn!(score, "consensus score out of range; clamping");
        }
        self.consensus = Some(ConsensusSnapshot {
            score: score.clamp(0.0, 1.0),
            round: self.state.current_round,
            timestamp: now_ms(),
        });
    }

    /// The current round ended.
    pub fn round_complete(&mut self, agents_responded: u32) {
        self.state.status = RoundStatus::Complete;
        self.state.agents_responded = agents_responded;
    }

    /// The summary is about to stream. Discards any partial earlier summary.
    pub fn summary_start(&mut self, rounds_completed: Option<u32>) {
        self.state.status = RoundStatus::Waiting;
        self.summary_started = true;
        self.summary.clear();
        debug!(?rounds_completed, "summary started");
    }

    /// Append a summary fragment and return the summary so far.
    pub fn append_summary(&mut self, chunk: &str) -> &str {
        self.summary.push_str(chunk);
        &self.summary
    }

    /// Round progress.
    pub fn state(&self) -> RoundState {
        self.state
    }

    /// All citations this turn.
    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    /// Latest consensus score.
    pub fn consensus(&self) -> Option<ConsensusSnapshot> {
        self.consensus
    }

    /// Whether `summary_start` was seen this turn.
    pub fn summary_started(&self) -> bool {
        self.summary_started
    }

    /// Summary text so far.
    pub fn summary(&self) -> &str {
        &self.summary
    }
}
