#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Result store for the batch geocoder.
//!
//! Holds, per [`Direction`], two disjoint collections of outcomes keyed by
//! input: *located* and *failed*. The union of their keys is the
//! "already seen" set that keeps previously processed inputs out of future
//! batches.
//!
//! The store is plain data with no internal locking. It is loaded once
//! through a [`Persistence`] implementation, mutated by [`ResultStore::merge`]
//! after a dispatch run has fully drained, and saved back afterwards.
//! Running two writers against the same persisted state is not supported.

pub mod csv_store;
pub mod purge;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};

use usgeocoder_models::{Direction, GeocodeInput, GeocodeOutcome};

pub use csv_store::CsvPersistence;
pub use purge::PurgePlan;

/// Errors from loading, saving, or mutating the result store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error reading or writing a table.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// CSV error reading or writing a table.
    #[error("CSV error in {path}: {source}")]
    Csv {
        /// Path to the CSV file.
        path: String,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// A row parsed but does not describe a valid outcome.
    #[error("Corrupt row {row} in {path}: {message}")]
    Corrupt {
        /// Path to the table.
        path: String,
        /// 1-based data row number.
        row: u64,
        /// What is wrong with the row.
        message: String,
    },

    /// An outcome was merged into the wrong direction.
    #[error("Cannot merge {input} into the {direction} tables")]
    DirectionMismatch {
        /// The direction being merged into.
        direction: Direction,
        /// The offending input.
        input: GeocodeInput,
    },
}

/// Counts from a single [`ResultStore::merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Outcomes written to the located collection.
    pub located: usize,
    /// Outcomes written to the failed collection.
    pub failed: usize,
    /// Located outcomes that replaced a failed entry.
    pub promoted: usize,
    /// Failed outcomes dropped because the input is already located.
    pub ignored: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Tables {
    located: BTreeMap<GeocodeInput, GeocodeOutcome>,
    failed: BTreeMap<GeocodeInput, GeocodeOutcome>,
}

/// Located and failed outcomes for both directions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultStore {
    forward: Tables,
    reverse: Tables,
}

impl ResultStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    const fn tables(&self, direction: Direction) -> &Tables {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Reverse => &self.reverse,
        }
    }

    const fn tables_mut(&mut self, direction: Direction) -> &mut Tables {
        match direction {
            Direction::Forward => &mut self.forward,
            Direction::Reverse => &mut self.reverse,
        }
    }

    /// Every input with a located or failed entry in `direction`.
    #[must_use]
    pub fn already_seen(&self, direction: Direction) -> BTreeSet<GeocodeInput> {
        let tables = self.tables(direction);
        tables
            .located
            .keys()
            .chain(tables.failed.keys())
            .cloned()
            .collect()
    }

    /// Merges a batch of outcomes into the `direction` tables.
    ///
    /// A located outcome replaces any located entry for the same input and
    /// removes its failed entry. A failed outcome is recorded only when the
    /// input has no located entry; located inputs are never demoted.
    ///
    /// The batch is checked up front, so a mismatched outcome leaves the
    /// store untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DirectionMismatch`] if any outcome's input
    /// belongs to the other direction.
    pub fn merge(
        &mut self,
        direction: Direction,
        outcomes: impl IntoIterator<Item = GeocodeOutcome>,
    ) -> Result<MergeStats, StoreError> {
        let outcomes: Vec<GeocodeOutcome> = outcomes.into_iter().collect();

        if let Some(bad) = outcomes
            .iter()
            .find(|o| o.input().direction() != direction)
        {
            return Err(StoreError::DirectionMismatch {
                direction,
                input: bad.input().clone(),
            });
        }

        let tables = self.tables_mut(direction);
        let mut stats = MergeStats::default();

        for outcome in outcomes {
            let input = outcome.input().clone();
            if outcome.is_located() {
                if tables.failed.remove(&input).is_some() {
                    stats.promoted += 1;
                }
                tables.located.insert(input, outcome);
                stats.located += 1;
            } else if tables.located.contains_key(&input) {
                stats.ignored += 1;
            } else {
                tables.failed.insert(input, outcome);
                stats.failed += 1;
            }
        }

        Ok(stats)
    }

    /// Located outcomes for `direction`, ordered by input.
    pub fn located(&self, direction: Direction) -> impl Iterator<Item = &GeocodeOutcome> {
        self.tables(direction).located.values()
    }

    /// Failed outcomes for `direction`, ordered by input.
    pub fn failed(&self, direction: Direction) -> impl Iterator<Item = &GeocodeOutcome> {
        self.tables(direction).failed.values()
    }

    /// Number of located entries for `direction`.
    #[must_use]
    pub fn located_count(&self, direction: Direction) -> usize {
        self.tables(direction).located.len()
    }

    /// Number of failed entries for `direction`.
    #[must_use]
    pub fn failed_count(&self, direction: Direction) -> usize {
        self.tables(direction).failed.len()
    }

    /// The current authoritative outcome for `input`, if any.
    #[must_use]
    pub fn get(&self, input: &GeocodeInput) -> Option<&GeocodeOutcome> {
        let tables = self.tables(input.direction());
        tables
            .located
            .get(input)
            .or_else(|| tables.failed.get(input))
    }
}

/// Loads and saves whole [`ResultStore`] snapshots.
pub trait Persistence: Send + Sync {
    /// Reads the persisted snapshot, or an empty store if nothing has been
    /// persisted yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persisted state exists but cannot be read.
    fn load(&self) -> Result<ResultStore, StoreError>;

    /// Replaces the persisted snapshot with `store`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the snapshot cannot be written.
    fn save(&self, store: &ResultStore) -> Result<(), StoreError>;
}

/// In-process persistence that keeps the last saved snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    snapshot: Mutex<ResultStore>,
}

impl MemoryPersistence {
    /// Creates a persistence layer seeded with `store`.
    #[must_use]
    pub const fn with_store(store: ResultStore) -> Self {
        Self {
            snapshot: Mutex::new(store),
        }
    }

    /// A copy of the last saved snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ResultStore {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Persistence for MemoryPersistence {
    fn load(&self) -> Result<ResultStore, StoreError> {
        Ok(self.snapshot())
    }

    fn save(&self, store: &ResultStore) -> Result<(), StoreError> {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = store.clone();
        Ok(())
    }
}
