//! Two-phase removal of stored outcomes.
//!
//! [`ResultStore::purge_plan`] counts what would be removed, leaving the
//! store untouched, so a caller can show the count and ask before calling
//! [`ResultStore::apply_purge`]. Nothing inside the engine purges on its
//! own. Purging failed entries is how they become eligible for another
//! attempt.

use chrono::NaiveDate;
use usgeocoder_models::{Direction, GeocodeInput, GeocodeOutcome, PurgeScope};

use crate::ResultStore;

/// What a purge would remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgePlan {
    /// Direction whose tables are purged.
    pub direction: Direction,
    /// Which collections are purged.
    pub scope: PurgeScope,
    /// Entries dated on or before this day are removed.
    pub cutoff: NaiveDate,
    /// Located entries matching the plan.
    pub located: usize,
    /// Failed entries matching the plan.
    pub failed: usize,
}

impl PurgePlan {
    /// Total number of entries matching the plan.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.located + self.failed
    }

    /// Whether the plan would remove nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

fn count_due(
    table: &std::collections::BTreeMap<GeocodeInput, GeocodeOutcome>,
    cutoff: NaiveDate,
) -> usize {
    table.values().filter(|o| o.date() <= cutoff).count()
}

fn remove_due(
    table: &mut std::collections::BTreeMap<GeocodeInput, GeocodeOutcome>,
    cutoff: NaiveDate,
) -> usize {
    let before = table.len();
    table.retain(|_, o| o.date() > cutoff);
    before - table.len()
}

impl ResultStore {
    /// Counts the entries a purge of `scope` in `direction` would remove.
    #[must_use]
    pub fn purge_plan(
        &self,
        direction: Direction,
        scope: PurgeScope,
        cutoff: NaiveDate,
    ) -> PurgePlan {
        let tables = self.tables(direction);
        PurgePlan {
            direction,
            scope,
            cutoff,
            located: if scope.includes_located() {
                count_due(&tables.located, cutoff)
            } else {
                0
            },
            failed: if scope.includes_failed() {
                count_due(&tables.failed, cutoff)
            } else {
                0
            },
        }
    }

    /// Removes the entries described by `plan` and returns how many were
    /// removed.
    ///
    /// The filter is re-evaluated against the current contents, so the
    /// result can differ from [`PurgePlan::total`] if the store changed in
    /// between.
    pub fn apply_purge(&mut self, plan: &PurgePlan) -> usize {
        let tables = self.tables_mut(plan.direction);
        let mut removed = 0;
        if plan.scope.includes_located() {
            removed += remove_due(&mut tables.located, plan.cutoff);
        }
        if plan.scope.includes_failed() {
            removed += remove_due(&mut tables.failed, plan.cutoff);
        }
        log::info!(
            "Purged {removed} {} {} entries dated {} or earlier",
            plan.direction,
            plan.scope,
            plan.cutoff
        );
        removed
    }

    /// Plans and applies a purge in one step.
    pub fn purge(&mut self, direction: Direction, scope: PurgeScope, cutoff: NaiveDate) -> usize {
        let plan = self.purge_plan(direction, scope, cutoff);
        self.apply_purge(&plan)
    }
}
