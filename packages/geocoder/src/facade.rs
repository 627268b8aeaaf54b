//! The batch geocoding entry point.
//!
//! [`Geocoder`] owns the result store for the lifetime of a session. Each
//! call to [`Geocoder::forward`] or [`Geocoder::reverse`] skips inputs that
//! already have a recorded outcome, dispatches the rest, merges the
//! outcomes, and saves the store once the whole batch has finished.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use usgeocoder_models::{
    Coordinate, Direction, FailureKind, GeocodeInput, GeocoderConfig, PurgeScope,
};
use usgeocoder_store::{CsvPersistence, Persistence, PurgePlan, ResultStore};

use crate::census::CensusClient;
use crate::dispatcher::Dispatcher;
use crate::progress::ProgressCallback;
use crate::retry::RetryPolicy;
use crate::{GeocodeError, Resolver};

/// Counts describing one forward or reverse run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Which direction ran.
    pub direction: Direction,
    /// Distinct inputs after normalization.
    pub requested: usize,
    /// Inputs skipped because the store already had an outcome for them.
    pub already_seen: usize,
    /// Inputs sent to the service.
    pub dispatched: usize,
    /// Dispatched inputs that were located.
    pub located: usize,
    /// Dispatched inputs that failed.
    pub failed: usize,
    /// Failure counts by kind.
    pub failure_kinds: Vec<(FailureKind, usize)>,
}

impl RunSummary {
    const fn skipped(direction: Direction, requested: usize) -> Self {
        Self {
            direction,
            requested,
            already_seen: requested,
            dispatched: 0,
            located: 0,
            failed: 0,
            failure_kinds: Vec::new(),
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} requested, {} already seen, {} dispatched, {} located, {} failed",
            self.direction,
            self.requested,
            self.already_seen,
            self.dispatched,
            self.located,
            self.failed
        )?;
        if !self.failure_kinds.is_empty() {
            let kinds: Vec<String> = self
                .failure_kinds
                .iter()
                .map(|(kind, count)| format!("{kind}={count}"))
                .collect();
            write!(f, " ({})", kinds.join(", "))?;
        }
        Ok(())
    }
}

/// Batch geocoder over a [`Resolver`] and a [`Persistence`] backend.
pub struct Geocoder<R, P> {
    dispatcher: Dispatcher<R>,
    persistence: P,
    store: ResultStore,
    concurrency: usize,
}

impl Geocoder<CensusClient, CsvPersistence> {
    /// Creates a geocoder that queries the Census Bureau and keeps its
    /// tables as CSV files under [`GeocoderConfig::store_dir`].
    ///
    /// # Errors
    ///
    /// * [`GeocodeError::Http`] if the HTTP client cannot be built
    /// * any error from [`Geocoder::open`]
    pub fn from_config(config: &GeocoderConfig) -> Result<Self, GeocodeError> {
        let client = CensusClient::from_config(config)?;
        Self::open(client, CsvPersistence::new(&config.store_dir), config)
    }
}

impl<R: Resolver, P: Persistence> Geocoder<R, P> {
    /// Validates `config` and loads the persisted store.
    ///
    /// # Errors
    ///
    /// * [`GeocodeError::Config`] if `config` is unusable
    /// * [`GeocodeError::Store`] if the persisted tables are unreadable or
    ///   corrupt
    pub fn open(
        resolver: R,
        persistence: P,
        config: &GeocoderConfig,
    ) -> Result<Self, GeocodeError> {
        crate::config::validate(config)?;
        let store = persistence.load()?;
        log::debug!(
            "Loaded store: forward {}/{} located/failed, reverse {}/{} located/failed",
            store.located_count(Direction::Forward),
            store.failed_count(Direction::Forward),
            store.located_count(Direction::Reverse),
            store.failed_count(Direction::Reverse),
        );

        Ok(Self {
            dispatcher: Dispatcher::new(
                resolver,
                RetryPolicy::from_config(config),
                config.concurrency_limit,
            ),
            persistence,
            store,
            concurrency: config.concurrency,
        })
    }

    /// Reports per-input progress to `progress`.
    #[must_use]
    pub fn with_progress(self, progress: Arc<dyn ProgressCallback>) -> Self {
        Self {
            dispatcher: self.dispatcher.with_progress(progress),
            ..self
        }
    }

    /// Stamps outcomes with the date returned by `today`.
    #[must_use]
    pub fn with_clock(self, today: fn() -> NaiveDate) -> Self {
        Self {
            dispatcher: self.dispatcher.with_clock(today),
            ..self
        }
    }

    /// The current store contents.
    #[must_use]
    pub const fn store(&self) -> &ResultStore {
        &self.store
    }

    /// The underlying resolver.
    #[must_use]
    pub const fn resolver(&self) -> &R {
        self.dispatcher.resolver()
    }

    /// Geocodes addresses to coordinates.
    ///
    /// Addresses are trimmed; blank ones are dropped and duplicates
    /// collapse to one request.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Store`] if the updated store cannot be
    /// saved. Individual addresses never produce an error.
    pub async fn forward<I>(&mut self, addresses: I) -> Result<RunSummary, GeocodeError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let inputs = addresses
            .into_iter()
            .filter_map(|a| {
                let a = a.as_ref().trim();
                (!a.is_empty()).then(|| GeocodeInput::Address(a.to_string()))
            })
            .collect();
        self.run(Direction::Forward, inputs).await
    }

    /// Geocodes coordinates to census geographies.
    ///
    /// Non-finite coordinates are dropped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Store`] if the updated store cannot be
    /// saved. Individual coordinates never produce an error.
    pub async fn reverse(
        &mut self,
        coordinates: impl IntoIterator<Item = Coordinate>,
    ) -> Result<RunSummary, GeocodeError> {
        let inputs = coordinates
            .into_iter()
            .filter(|c| {
                if !c.is_finite() {
                    log::warn!("Skipping non-finite coordinate {c}");
                }
                c.is_finite()
            })
            .map(GeocodeInput::from)
            .collect();
        self.run(Direction::Reverse, inputs).await
    }

    /// Geocodes every input not already in the store for `direction`.
    ///
    /// # Errors
    ///
    /// * [`GeocodeError::DirectionMismatch`] if an input belongs to the
    ///   other direction; nothing is sent and the store is untouched
    /// * [`GeocodeError::Store`] if the updated store cannot be saved
    pub async fn run(
        &mut self,
        direction: Direction,
        inputs: BTreeSet<GeocodeInput>,
    ) -> Result<RunSummary, GeocodeError> {
        if let Some(bad) = inputs.iter().find(|i| i.direction() != direction) {
            return Err(GeocodeError::DirectionMismatch {
                direction,
                input: bad.clone(),
            });
        }

        let requested = inputs.len();
        let seen = self.store.already_seen(direction);
        let work: BTreeSet<GeocodeInput> = inputs.difference(&seen).cloned().collect();
        let already_seen = requested - work.len();

        if work.is_empty() {
            log::info!("Nothing to {direction} geocode: all {requested} inputs already seen");
            return Ok(RunSummary::skipped(direction, requested));
        }
        if already_seen > 0 {
            log::info!("Skipping {already_seen} of {requested} inputs already in the store");
        }

        let dispatched = work.len();
        let result = self.dispatcher.run(work, direction, self.concurrency).await?;
        let failure_kinds = result.failure_kinds.into_iter().collect();

        let stats = self
            .store
            .merge(direction, result.located.into_iter().chain(result.failed))?;
        log::debug!(
            "Merged {} located ({} promoted from failed) and {} failed {direction} outcomes",
            stats.located,
            stats.promoted,
            stats.failed
        );
        self.persistence.save(&self.store)?;

        Ok(RunSummary {
            direction,
            requested,
            already_seen,
            dispatched,
            located: stats.located,
            failed: stats.failed + stats.ignored,
            failure_kinds,
        })
    }

    /// Counts what a purge would remove without changing anything.
    #[must_use]
    pub fn purge_plan(
        &self,
        direction: Direction,
        scope: PurgeScope,
        cutoff: NaiveDate,
    ) -> PurgePlan {
        self.store.purge_plan(direction, scope, cutoff)
    }

    /// Applies `plan` and saves the store.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Store`] if the store cannot be saved.
    pub fn apply_purge(&mut self, plan: &PurgePlan) -> Result<usize, GeocodeError> {
        let removed = self.store.apply_purge(plan);
        if removed > 0 {
            self.persistence.save(&self.store)?;
        }
        Ok(removed)
    }
}
