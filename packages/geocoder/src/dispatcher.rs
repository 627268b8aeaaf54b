//! Bounded-concurrency batch dispatcher.
//!
//! Runs a [`Resolver`] under the [`RetryPolicy`] for every input of a batch,
//! keeping at most `concurrency` inputs in flight. Each input is driven to
//! exactly one [`GeocodeOutcome`] independently of the others, and the
//! dispatcher returns only after every input has terminated.
//!
//! Outcomes are collected, not streamed: in-flight work never touches the
//! result store, which is merged serially by the caller afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt as _};
use usgeocoder_models::{Direction, FailureKind, GeocodeInput, GeocodeOutcome};

use crate::progress::{ProgressCallback, null_progress};
use crate::retry::{NextAction, RetryPolicy};
use crate::{AttemptResult, GeocodeError, Resolver};

/// Caps `requested` at `limit`, logging when the cap applies.
///
/// Both values are floored at one worker.
#[must_use]
pub fn clamp_concurrency(requested: usize, limit: usize) -> usize {
    let limit = limit.max(1);
    if requested > limit {
        log::warn!(
            "Requested concurrency {requested} exceeds the limit of {limit}; using {limit} \
             to stay within the service's rate limits"
        );
        limit
    } else {
        requested.max(1)
    }
}

/// Everything a dispatch run produced.
#[derive(Debug, Clone, Default)]
pub struct DispatchResult {
    /// Inputs the service resolved.
    pub located: Vec<GeocodeOutcome>,
    /// Inputs that could not be resolved.
    pub failed: Vec<GeocodeOutcome>,
    /// Why the failed inputs failed.
    pub failure_kinds: BTreeMap<FailureKind, usize>,
    /// Total HTTP attempts across all inputs.
    pub attempts: usize,
}

impl DispatchResult {
    /// Number of inputs that reached an outcome.
    #[must_use]
    pub fn len(&self) -> usize {
        self.located.len() + self.failed.len()
    }

    /// Whether no inputs were dispatched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Resolved {
    outcome: GeocodeOutcome,
    failure: Option<FailureKind>,
    attempts: usize,
}

/// Runs batches of inputs against a [`Resolver`].
pub struct Dispatcher<R> {
    resolver: R,
    policy: RetryPolicy,
    concurrency_limit: usize,
    progress: Arc<dyn ProgressCallback>,
    today: fn() -> NaiveDate,
}

fn local_today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

impl<R: Resolver> Dispatcher<R> {
    /// Creates a dispatcher that never runs more than `concurrency_limit`
    /// inputs at once.
    #[must_use]
    pub fn new(resolver: R, policy: RetryPolicy, concurrency_limit: usize) -> Self {
        Self {
            resolver,
            policy,
            concurrency_limit,
            progress: null_progress(),
            today: local_today,
        }
    }

    /// Reports per-input progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Stamps outcomes with the date returned by `today` instead of the
    /// local calendar date.
    #[must_use]
    pub fn with_clock(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// The underlying resolver.
    #[must_use]
    pub const fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Resolves every input in `inputs` and partitions the outcomes.
    ///
    /// Completion order is unspecified. Every input yields exactly one
    /// outcome; individual failures never abort the run.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::DirectionMismatch`] before any request is
    /// sent if an input does not belong to `direction`.
    pub async fn run(
        &self,
        inputs: BTreeSet<GeocodeInput>,
        direction: Direction,
        concurrency: usize,
    ) -> Result<DispatchResult, GeocodeError> {
        if let Some(bad) = inputs.iter().find(|i| i.direction() != direction) {
            return Err(GeocodeError::DirectionMismatch {
                direction,
                input: bad.clone(),
            });
        }

        let workers = clamp_concurrency(concurrency, self.concurrency_limit);
        let date = (self.today)();
        let total = inputs.len();

        log::info!("Geocoding {total} inputs ({direction}, concurrency={workers})...");
        self.progress.set_message(format!("Geocoding {direction}"));
        self.progress.set_total(total as u64);

        let resolved: Vec<Resolved> = stream::iter(inputs)
            .map(|input| self.resolve_one(input, date))
            .buffer_unordered(workers)
            .inspect(|_| self.progress.inc(1))
            .collect()
            .await;

        let mut result = DispatchResult::default();
        for r in resolved {
            result.attempts += r.attempts;
            if let Some(kind) = r.failure {
                *result.failure_kinds.entry(kind).or_default() += 1;
                result.failed.push(r.outcome);
            } else {
                result.located.push(r.outcome);
            }
        }

        log::info!(
            "Geocoded {total} inputs in {} attempts: {} located, {} failed",
            result.attempts,
            result.located.len(),
            result.failed.len()
        );
        for (kind, count) in &result.failure_kinds {
            log::info!("  {kind}: {count}");
        }
        self.progress.finish(format!(
            "{} located, {} failed",
            result.located.len(),
            result.failed.len()
        ));

        Ok(result)
    }

    /// Drives one input through the retry ladder to its final outcome.
    async fn resolve_one(&self, input: GeocodeInput, date: NaiveDate) -> Resolved {
        let mut history: Vec<AttemptResult> = Vec::new();

        loop {
            match self.policy.next_action(&history) {
                NextAction::Retry(timeout) => {
                    if !history.is_empty() {
                        log::trace!("Retrying {input} with a {timeout:?} timeout");
                    }
                    let result = self.resolver.resolve(&input, timeout).await;
                    let delay = self.policy.inter_attempt_delay();
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    history.push(result);
                }
                NextAction::Success(payload) => {
                    return Resolved {
                        outcome: GeocodeOutcome::Located {
                            input,
                            date,
                            payload,
                        },
                        failure: None,
                        attempts: history.len(),
                    };
                }
                NextAction::TerminalFailure(kind) => {
                    match history.last() {
                        Some(
                            AttemptResult::DecodeError(detail)
                            | AttemptResult::TransportError(detail),
                        ) => log::debug!("Failed to geocode {input} ({kind}): {detail}"),
                        _ => log::debug!("Failed to geocode {input} ({kind})"),
                    }
                    return Resolved {
                        outcome: GeocodeOutcome::Failed { input, date },
                        failure: Some(kind),
                        attempts: history.len(),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use usgeocoder_models::{Coordinate, MatchPayload};

    use super::*;
    use crate::testing::ScriptedResolver;

    fn ladder() -> Vec<Duration> {
        [500, 1_000, 2_000, 5_000]
            .into_iter()
            .map(Duration::from_millis)
            .collect()
    }

    fn dispatcher(resolver: ScriptedResolver) -> Dispatcher<ScriptedResolver> {
        Dispatcher::new(resolver, RetryPolicy::new(ladder(), Duration::ZERO), 100)
    }

    fn address(s: &str) -> GeocodeInput {
        GeocodeInput::Address(s.to_string())
    }

    fn location() -> AttemptResult {
        AttemptResult::Success(MatchPayload::Location(Coordinate::new(-70.95, 42.98)))
    }

    #[tokio::test]
    async fn all_timeouts_fail_after_full_ladder() {
        let resolver = ScriptedResolver::new().script(address("a"), vec![AttemptResult::Timeout; 10]);
        let dispatcher = dispatcher(resolver);

        let result = dispatcher
            .run(BTreeSet::from([address("a")]), Direction::Forward, 4)
            .await
            .unwrap();

        assert_eq!(result.failed.len(), 1);
        assert!(result.located.is_empty());
        assert_eq!(result.attempts, 4);
        assert_eq!(result.failure_kinds.get(&FailureKind::Timeout), Some(&1));
        assert_eq!(dispatcher.resolver().timeouts_for(&address("a")), ladder());
    }

    #[tokio::test]
    async fn success_on_second_attempt_stops_retrying() {
        let resolver = ScriptedResolver::new()
            .script(address("a"), vec![AttemptResult::Timeout, location(), location()]);
        let dispatcher = dispatcher(resolver);

        let result = dispatcher
            .run(BTreeSet::from([address("a")]), Direction::Forward, 4)
            .await
            .unwrap();

        assert_eq!(result.attempts, 2);
        assert_eq!(result.located.len(), 1);
        assert_eq!(
            result.located[0].location(),
            Some(Coordinate::new(-70.95, 42.98))
        );
        assert_eq!(dispatcher.resolver().timeouts_for(&address("a")).len(), 2);
    }

    #[tokio::test]
    async fn terminal_failures_are_not_retried() {
        let resolver = ScriptedResolver::new()
            .script(address("nomatch"), vec![AttemptResult::NoMatch, location()])
            .script(
                address("decode"),
                vec![AttemptResult::DecodeError("bad".to_string()), location()],
            )
            .script(
                address("transport"),
                vec![AttemptResult::TransportError("refused".to_string()), location()],
            );
        let dispatcher = dispatcher(resolver);

        let inputs = BTreeSet::from([address("nomatch"), address("decode"), address("transport")]);
        let result = dispatcher.run(inputs, Direction::Forward, 2).await.unwrap();

        assert_eq!(result.failed.len(), 3);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.failure_kinds.len(), 3);
    }

    #[tokio::test]
    async fn every_input_lands_in_exactly_one_partition() {
        let mut resolver = ScriptedResolver::new();
        let mut inputs = BTreeSet::new();
        for i in 0..40 {
            let input = address(&format!("{i} Main St"));
            let script = match i % 4 {
                0 => vec![location()],
                1 => vec![AttemptResult::NoMatch],
                2 => vec![AttemptResult::Timeout, location()],
                _ => vec![AttemptResult::Timeout; 4],
            };
            resolver = resolver.script(input.clone(), script);
            inputs.insert(input);
        }
        let dispatcher = dispatcher(resolver);

        let result = dispatcher.run(inputs.clone(), Direction::Forward, 8).await.unwrap();

        let located: BTreeSet<_> = result.located.iter().map(|o| o.input().clone()).collect();
        let failed: BTreeSet<_> = result.failed.iter().map(|o| o.input().clone()).collect();
        assert_eq!(located.len(), 20);
        assert_eq!(failed.len(), 20);
        assert!(located.is_disjoint(&failed));
        assert_eq!(result.len(), inputs.len());
        assert_eq!(located.union(&failed).cloned().collect::<BTreeSet<_>>(), inputs);
    }

    #[tokio::test]
    async fn never_exceeds_concurrency() {
        let mut resolver = ScriptedResolver::new().with_latency(Duration::from_millis(5));
        let mut inputs = BTreeSet::new();
        for i in 0..30 {
            let input = address(&i.to_string());
            resolver = resolver.script(input.clone(), vec![location()]);
            inputs.insert(input);
        }
        let dispatcher = dispatcher(resolver);

        let result = dispatcher.run(inputs, Direction::Forward, 3).await.unwrap();

        assert_eq!(result.located.len(), 30);
        assert!(dispatcher.resolver().max_in_flight() <= 3);
    }

    #[derive(Default)]
    struct CountingProgress {
        total: std::sync::atomic::AtomicU64,
        done: std::sync::atomic::AtomicU64,
        finished: std::sync::Mutex<Option<String>>,
    }

    impl ProgressCallback for CountingProgress {
        fn set_total(&self, total: u64) {
            self.total.store(total, std::sync::atomic::Ordering::SeqCst);
        }
        fn inc(&self, delta: u64) {
            self.done.fetch_add(delta, std::sync::atomic::Ordering::SeqCst);
        }
        fn set_message(&self, _msg: String) {}
        fn finish(&self, msg: String) {
            *self.finished.lock().unwrap() = Some(msg);
        }
        fn finish_and_clear(&self) {}
    }

    #[tokio::test]
    async fn progress_counts_inputs_not_attempts() {
        let resolver = ScriptedResolver::new()
            .script(address("a"), vec![AttemptResult::Timeout, AttemptResult::Timeout, location()])
            .script(address("b"), vec![AttemptResult::NoMatch])
            .script(address("c"), vec![location()]);
        let progress = Arc::new(CountingProgress::default());
        let dispatcher = dispatcher(resolver).with_progress(progress.clone());

        let inputs = BTreeSet::from([address("a"), address("b"), address("c")]);
        let result = dispatcher.run(inputs, Direction::Forward, 2).await.unwrap();

        assert_eq!(result.attempts, 5);
        assert_eq!(progress.total.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(progress.done.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(
            progress.finished.lock().unwrap().as_deref(),
            Some("2 located, 1 failed")
        );
    }

    #[tokio::test]
    async fn pauses_after_every_attempt_while_holding_the_worker() {
        let delay = Duration::from_millis(80);
        let resolver = ScriptedResolver::new()
            .script(address("a"), vec![AttemptResult::Timeout, AttemptResult::NoMatch])
            .script(address("b"), vec![AttemptResult::Timeout, AttemptResult::NoMatch]);
        let dispatcher = Dispatcher::new(resolver, RetryPolicy::new(ladder(), delay), 100);

        let start = std::time::Instant::now();
        let result = dispatcher
            .run(BTreeSet::from([address("a"), address("b")]), Direction::Forward, 1)
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert_eq!(result.attempts, 4);
        assert_eq!(result.failure_kinds.get(&FailureKind::NoMatch), Some(&2));
        // One worker, two attempts per input, one pause after each attempt.
        assert!(elapsed >= delay * 4, "finished in {elapsed:?}");
        assert_eq!(dispatcher.resolver().max_in_flight(), 1);
    }

    #[tokio::test]
    async fn rejects_inputs_from_the_other_direction() {
        let dispatcher = dispatcher(ScriptedResolver::new());
        let inputs = BTreeSet::from([
            address("a"),
            GeocodeInput::Coordinate(Coordinate::new(-70.95, 42.98)),
        ]);

        let err = dispatcher.run(inputs, Direction::Forward, 1).await.unwrap_err();

        assert!(matches!(err, GeocodeError::DirectionMismatch { .. }));
        assert_eq!(dispatcher.resolver().total_calls(), 0);
    }

    #[tokio::test]
    async fn stamps_outcomes_with_the_run_date() {
        fn fixed() -> NaiveDate {
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
        }
        let resolver = ScriptedResolver::new().script(address("a"), vec![AttemptResult::NoMatch]);
        let dispatcher = dispatcher(resolver).with_clock(fixed);

        let result = dispatcher
            .run(BTreeSet::from([address("a")]), Direction::Forward, 1)
            .await
            .unwrap();

        assert_eq!(result.failed[0].date(), fixed());
    }

    #[test]
    fn clamps_requested_concurrency() {
        assert_eq!(clamp_concurrency(500, 100), 100);
        assert_eq!(clamp_concurrency(10, 100), 10);
        assert_eq!(clamp_concurrency(0, 100), 1);
        assert_eq!(clamp_concurrency(5, 0), 1);
    }
}
