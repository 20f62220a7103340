use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bullbear_models::{
    AgentRole, DebateState, DegradationKind, DeliberationState, Phase, RetrievedMemory,
    Transcript, TranscriptEntry,
};
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::prompts::CONSENSUS_MARKER;

/// What a debate turn or judgment can see.
pub struct DebateContext<'a> {
    pub state: &'a DeliberationState,
    pub memories: &'a [RetrievedMemory],
}

/// One side of a debate.
#[async_trait]
pub trait DebateParticipant: Send + Sync {
    fn role(&self) -> AgentRole;

    /// Produce the next utterance given everything said so far.
    async fn speak(
        &self,
        context: &DebateContext<'_>,
        debate: &DebateState,
    ) -> Result<String, AgentError>;
}

/// A judge's ruling: the verdict text recorded on the debate, plus the
/// structured decision derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict<T> {
    pub text: String,
    pub judgment: T,
}

/// Renders the verdict on a finished debate. Not a participant; judging
/// is not a round.
#[async_trait]
pub trait DebateJudge: Send + Sync {
    type Judgment: Send;

    fn role(&self) -> AgentRole;

    async fn judge(
        &self,
        context: &DebateContext<'_>,
        debate: &DebateState,
    ) -> Result<Verdict<Self::Judgment>, AgentError>;
}

/// Runs a bounded round-robin debate.
///
/// The loop is driven by the debate's own cursor: ask for the next speaker,
/// get one utterance, append it, repeat until the round limit (or an early
/// stop) is reached. An utterance is appended only after its generation has
/// succeeded, so retries inside the generator never duplicate history.
pub struct DebateController {
    participants: Vec<Arc<dyn DebateParticipant>>,
    phase: Phase,
    allow_early_stop: bool,
}

impl DebateController {
    pub fn new(participants: Vec<Arc<dyn DebateParticipant>>, phase: Phase) -> Self {
        Self {
            participants,
            phase,
            allow_early_stop: false,
        }
    }

    /// Let a participant end the debate by emitting the consensus marker.
    pub fn with_early_stop(mut self, allow: bool) -> Self {
        self.allow_early_stop = allow;
        self
    }

    fn participant(&self, role: AgentRole) -> Result<&Arc<dyn DebateParticipant>, AgentError> {
        self.participants
            .iter()
            .find(|p| p.role() == role)
            .ok_or_else(|| AgentError::StageFailed {
                stage: self.phase,
                reason: format!("no participant registered for {role}"),
            })
    }

    /// Take turns until the debate is exhausted.
    ///
    /// A content-policy refusal skips that turn and flags it in the
    /// transcript; any other error ends the debate.
    pub async fn run(
        &self,
        mut debate: DebateState,
        context: &DebateContext<'_>,
        transcript: &mut Transcript,
    ) -> Result<DebateState, AgentError> {
        info!(
            debate = %debate.kind(),
            max_rounds = debate.max_rounds(),
            participants = debate.participants().len(),
            "Debate starting"
        );

        while let Some(role) = debate.next_speaker() {
            let speaker = self.participant(role)?;
            let turn_start = Instant::now();

            match speaker.speak(context, &debate).await {
                Ok(utterance) => {
                    let consensus = self.allow_early_stop && utterance.contains(CONSENSUS_MARKER);
                    let elapsed_ms = turn_start.elapsed().as_millis() as u64;
                    let turn = debate.record_turn(role, utterance)?.clone();
                    debug!(
                        debate = %debate.kind(),
                        role = %role,
                        turn_index = turn.turn_index,
                        round = turn.round,
                        elapsed_ms,
                        "Debate turn"
                    );
                    transcript.push(TranscriptEntry::DebateTurn {
                        debate: debate.kind(),
                        role,
                        turn_index: turn.turn_index,
                        round: turn.round,
                        utterance: turn.utterance,
                        elapsed_ms,
                    });
                    if consensus {
                        info!(debate = %debate.kind(), role = %role, "Consensus reached, stopping early");
                        debate.stop_early()?;
                    }
                }
                Err(AgentError::ContentPolicy(reason)) => {
                    let turn_index = debate.skip_turn(role)?;
                    warn!(
                        debate = %debate.kind(),
                        role = %role,
                        turn_index,
                        reason = %reason,
                        "Debate turn refused, skipping"
                    );
                    transcript.degrade(
                        self.phase,
                        DegradationKind::SkippedTurn,
                        role.as_str(),
                        format!("turn {turn_index}: {reason}"),
                    );
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            debate = %debate.kind(),
            rounds = debate.round_count(),
            turns = debate.history().len(),
            stopped_early = debate.stopped_early(),
            "Debate finished"
        );
        Ok(debate)
    }

    /// The single judge step over a finished debate. Records the verdict on
    /// the debate and in the transcript.
    pub async fn judge<J>(
        &self,
        judge: &J,
        debate: &mut DebateState,
        context: &DebateContext<'_>,
        transcript: &mut Transcript,
    ) -> Result<J::Judgment, AgentError>
    where
        J: DebateJudge + ?Sized,
    {
        let verdict = judge.judge(context, debate).await?;
        debate.set_verdict(verdict.text.clone())?;
        transcript.push(TranscriptEntry::DebateVerdict {
            debate: debate.kind(),
            judge: judge.role(),
            verdict: verdict.text,
        });
        info!(debate = %debate.kind(), judge = %judge.role(), "Debate judged");
        Ok(verdict.judgment)
    }
}
