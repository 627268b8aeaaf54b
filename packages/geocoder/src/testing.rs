//! Scripted [`Resolver`] for exercising the dispatcher and facade without
//! a network.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use usgeocoder_models::GeocodeInput;

use crate::{AttemptResult, Resolver};

/// Replays a per-input list of attempt results and records every call.
///
/// Inputs without a script (or whose script ran out) answer
/// [`AttemptResult::NoMatch`].
#[derive(Default)]
pub struct ScriptedResolver {
    scripts: Mutex<BTreeMap<GeocodeInput, VecDeque<AttemptResult>>>,
    calls: Mutex<BTreeMap<GeocodeInput, Vec<Duration>>>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, input: GeocodeInput, results: Vec<AttemptResult>) -> Self {
        self.scripts
            .get_mut()
            .unwrap()
            .insert(input, results.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Timeouts passed for `input`, in call order.
    pub fn timeouts_for(&self, input: &GeocodeInput) -> Vec<Duration> {
        self.calls
            .lock()
            .unwrap()
            .get(input)
            .cloned()
            .unwrap_or_default()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().map(Vec::len).sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Resolver for ScriptedResolver {
    async fn resolve(&self, input: &GeocodeInput, timeout: Duration) -> AttemptResult {
        self.calls
            .lock()
            .unwrap()
            .entry(input.clone())
            .or_default()
            .push(timeout);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.scripts
            .lock()
            .unwrap()
            .get_mut(input)
            .and_then(VecDeque::pop_front)
            .unwrap_or(AttemptResult::NoMatch)
    }
}
