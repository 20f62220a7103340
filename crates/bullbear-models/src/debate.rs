use std::fmt;

use serde::{Deserialize, Serialize};

use crate::roles::AgentRole;
use crate::set_once::{SetOnce, StateInvariantViolation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateKind {
    /// Bull vs. bear, judged by the research manager.
    Research,
    /// Aggressive vs. conservative vs. neutral, judged by the portfolio manager.
    Risk,
}

impl fmt::Display for DebateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Research => f.write_str("research"),
            Self::Risk => f.write_str("risk"),
        }
    }
}

/// One utterance in a debate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebateTurn {
    pub role: AgentRole,
    /// Position of this turn in the rotation, counting skipped turns.
    pub turn_index: u32,
    /// Zero-based round the turn belongs to.
    pub round: u32,
    pub utterance: String,
}

/// Bounded round-robin debate record.
///
/// The turn cursor and round counter are explicit so the debate loop is a
/// plain state machine: ask `next_speaker`, then `record_turn` or `skip_turn`,
/// until `next_speaker` returns `None`; then `set_verdict` once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "DebateRecord")]
pub struct DebateState {
    kind: DebateKind,
    participants: Vec<AgentRole>,
    history: Vec<DebateTurn>,
    round_count: u32,
    max_rounds: u32,
    turns_taken: u32,
    stopped_early: bool,
    judge_verdict: SetOnce<String>,
}

/// Wire form of `DebateState`, checked before it becomes one.
#[derive(Deserialize)]
struct DebateRecord {
    kind: DebateKind,
    participants: Vec<AgentRole>,
    history: Vec<DebateTurn>,
    round_count: u32,
    max_rounds: u32,
    turns_taken: u32,
    stopped_early: bool,
    judge_verdict: SetOnce<String>,
}

impl TryFrom<DebateRecord> for DebateState {
    type Error = StateInvariantViolation;

    fn try_from(record: DebateRecord) -> Result<Self, Self::Error> {
        let mut state = Self::new(record.kind, record.participants, record.max_rounds)?;
        if record.round_count > record.max_rounds {
            return Err(StateInvariantViolation::new(
                "round_count",
                format!(
                    "{} rounds recorded against a limit of {}",
                    record.round_count, record.max_rounds
                ),
            ));
        }
        state.history = record.history;
        state.round_count = record.round_count;
        state.turns_taken = record.turns_taken;
        state.stopped_early = record.stopped_early;
        state.judge_verdict = record.judge_verdict;
        Ok(state)
    }
}

impl DebateState {
    pub fn new(
        kind: DebateKind,
        participants: Vec<AgentRole>,
        max_rounds: u32,
    ) -> Result<Self, StateInvariantViolation> {
        if participants.is_empty() {
            return Err(StateInvariantViolation::new(
                "participants",
                "a debate needs at least one participant",
            ));
        }
        Ok(Self {
            kind,
            participants,
            history: Vec::new(),
            round_count: 0,
            max_rounds,
            turns_taken: 0,
            stopped_early: false,
            judge_verdict: SetOnce::new(),
        })
    }

    pub fn research(max_rounds: u32) -> Self {
        Self::with_roles(DebateKind::Research, &AgentRole::RESEARCH_DEBATERS, max_rounds)
    }

    pub fn risk(max_rounds: u32) -> Self {
        Self::with_roles(DebateKind::Risk, &AgentRole::RISK_DEBATERS, max_rounds)
    }

    fn with_roles(kind: DebateKind, roles: &[AgentRole], max_rounds: u32) -> Self {
        Self {
            kind,
            participants: roles.to_vec(),
            history: Vec::new(),
            round_count: 0,
            max_rounds,
            turns_taken: 0,
            stopped_early: false,
            judge_verdict: SetOnce::new(),
        }
    }

    pub fn kind(&self) -> DebateKind {
        self.kind
    }

    pub fn participants(&self) -> &[AgentRole] {
        &self.participants
    }

    pub fn history(&self) -> &[DebateTurn] {
        &self.history
    }

    pub fn round_count(&self) -> u32 {
        self.round_count
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    pub fn stopped_early(&self) -> bool {
        self.stopped_early
    }

    pub fn judge_verdict(&self) -> Option<&str> {
        self.judge_verdict.get().map(String::as_str)
    }

    pub fn is_judged(&self) -> bool {
        self.judge_verdict.is_set()
    }

    /// No more turns will be taken.
    pub fn is_exhausted(&self) -> bool {
        self.stopped_early || self.round_count >= self.max_rounds
    }

    /// The participant whose turn it is, or `None` once the debate has terminated.
    pub fn next_speaker(&self) -> Option<AgentRole> {
        if self.is_exhausted() || self.is_judged() {
            return None;
        }
        let cursor = self.turns_taken as usize % self.participants.len();
        Some(self.participants[cursor])
    }

    /// The latest utterance of `role`, if it has spoken.
    pub fn last_utterance_of(&self, role: AgentRole) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|t| t.role == role)
            .map(|t| t.utterance.as_str())
    }

    /// Append the active participant's utterance and advance the cursor.
    pub fn record_turn(
        &mut self,
        role: AgentRole,
        utterance: String,
    ) -> Result<&DebateTurn, StateInvariantViolation> {
        self.check_speaker(role)?;
        let turn = DebateTurn {
            role,
            turn_index: self.turns_taken,
            round: self.round_count,
            utterance,
        };
        self.history.push(turn);
        self.advance();
        Ok(&self.history[self.history.len() - 1])
    }

    /// Advance past the active participant without appending anything.
    /// Returns the skipped turn index.
    pub fn skip_turn(&mut self, role: AgentRole) -> Result<u32, StateInvariantViolation> {
        self.check_speaker(role)?;
        let index = self.turns_taken;
        self.advance();
        Ok(index)
    }

    /// End the debate before `max_rounds`. Only completed rotations count
    /// toward `round_count`.
    pub fn stop_early(&mut self) -> Result<(), StateInvariantViolation> {
        if self.is_judged() {
            return Err(StateInvariantViolation::new(
                "history",
                "debate is already judged",
            ));
        }
        self.stopped_early = true;
        Ok(())
    }

    pub fn set_verdict(&mut self, verdict: String) -> Result<(), StateInvariantViolation> {
        if !self.is_exhausted() {
            return Err(StateInvariantViolation::new(
                "judge_verdict",
                format!(
                    "{} debate judged after {} of {} rounds",
                    self.kind, self.round_count, self.max_rounds
                ),
            ));
        }
        self.judge_verdict.set("judge_verdict", verdict)
    }

    fn check_speaker(&self, role: AgentRole) -> Result<(), StateInvariantViolation> {
        match self.next_speaker() {
            Some(expected) if expected == role => Ok(()),
            Some(expected) => Err(StateInvariantViolation::new(
                "history",
                format!("{role} spoke out of turn, expected {expected}"),
            )),
            None => Err(StateInvariantViolation::new(
                "history",
                format!("{} debate has terminated", self.kind),
            )),
        }
    }

    fn advance(&mut self) {
        self.turns_taken += 1;
        if self.turns_taken as usize % self.participants.len() == 0 {
            self.round_count += 1;
        }
    }
}
