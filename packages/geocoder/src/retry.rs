//! Timeout-ladder retry policy.
//!
//! Each input gets one attempt per rung of the ladder at most. Only a
//! [`AttemptResult::Timeout`] moves on to the next rung; every other result
//! ends the sequence. A no-match is an authoritative answer, and malformed
//! or failed responses are not retried so a misbehaving endpoint is not
//! hammered.

use std::time::Duration;

use usgeocoder_models::{FailureKind, GeocoderConfig, MatchPayload};

use crate::AttemptResult;

/// What to do after looking at an input's attempt history.
#[derive(Debug, Clone, PartialEq)]
pub enum NextAction {
    /// Issue another attempt with this timeout.
    Retry(Duration),
    /// Stop: the input was located.
    Success(MatchPayload),
    /// Stop: the input failed for this reason.
    TerminalFailure(FailureKind),
}

/// Decides the next step for an input given every attempt made so far.
///
/// An empty history starts at the first rung. A history of `n` timeouts
/// continues at rung `n`, and fails once the ladder is exhausted.
#[must_use]
pub fn next_action(history: &[AttemptResult], ladder: &[Duration]) -> NextAction {
    let Some(last) = history.last() else {
        return ladder
            .first()
            .map_or(NextAction::TerminalFailure(FailureKind::Timeout), |t| {
                NextAction::Retry(*t)
            });
    };

    match last {
        AttemptResult::Success(payload) => NextAction::Success(payload.clone()),
        AttemptResult::NoMatch => NextAction::TerminalFailure(FailureKind::NoMatch),
        AttemptResult::DecodeError(_) => NextAction::TerminalFailure(FailureKind::Decode),
        AttemptResult::TransportError(_) => NextAction::TerminalFailure(FailureKind::Transport),
        AttemptResult::Timeout => ladder
            .get(history.len())
            .map_or(NextAction::TerminalFailure(FailureKind::Timeout), |t| {
                NextAction::Retry(*t)
            }),
    }
}

/// The ladder plus the pause observed after every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    ladder: Vec<Duration>,
    inter_attempt_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy from a ladder and an inter-attempt delay.
    #[must_use]
    pub const fn new(ladder: Vec<Duration>, inter_attempt_delay: Duration) -> Self {
        Self {
            ladder,
            inter_attempt_delay,
        }
    }

    /// Creates a policy from the configured ladder and delay.
    #[must_use]
    pub fn from_config(config: &GeocoderConfig) -> Self {
        Self::new(config.timeout_ladder(), config.inter_attempt_delay())
    }

    /// The pause observed after every attempt.
    #[must_use]
    pub const fn inter_attempt_delay(&self) -> Duration {
        self.inter_attempt_delay
    }

    /// See [`next_action`].
    #[must_use]
    pub fn next_action(&self, history: &[AttemptResult]) -> NextAction {
        next_action(history, &self.ladder)
    }
}
