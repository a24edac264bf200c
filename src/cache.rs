//! Running-experiments cache
//!
//! Allocation reads the list of running experiments on every request.
//! [`ExperimentCache`] serves that list from memory and refreshes it from
//! the store once the TTL has elapsed.
//!
//! Granularity is the whole list. A status change written directly to the
//! store becomes visible to allocation only after the TTL; changes made
//! through the orchestrator invalidate the cache immediately.
//!
//! Every invalidation bumps a generation counter. A reload that started
//! before an invalidation is returned to its caller but never stored, so a
//! list read just ahead of an admin commit cannot outlive it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::clock::Clock;
use crate::model::{Experiment, ExperimentId, ExperimentStatus};
use crate::store::ExperimentStore;
use crate::Result;

#[derive(Debug)]
struct Snapshot {
    experiments: Arc<Vec<Experiment>>,
    loaded_at: DateTime<Utc>,
}

/// TTL cache of running experiments, ordered by descending priority.
pub struct ExperimentCache {
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    generation: AtomicU64,
    snapshot: RwLock<Option<Snapshot>>,
}

impl std::fmt::Debug for ExperimentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentCache")
            .field("ttl", &self.ttl)
            .field("generation", &self.generation)
            .field("snapshot", &self.snapshot)
            .finish_non_exhaustive()
    }
}

impl ExperimentCache {
    /// Create an empty cache; the first read loads from the store.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            clock,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            generation: AtomicU64::new(0),
            snapshot: RwLock::new(None),
        }
    }

    /// Running experiments, refreshed from `store` if the snapshot is missing or expired.
    ///
    /// # Errors
    /// Propagates store failures during a refresh.
    pub fn running<S: ExperimentStore>(&self, store: &S) -> Result<Arc<Vec<Experiment>>> {
        self.running_with(|| store.list_experiments(ExperimentStatus::Running))
    }

    fn running_with<F>(&self, load: F) -> Result<Arc<Vec<Experiment>>>
    where
        F: FnOnce() -> Result<Vec<Experiment>>,
    {
        let now = self.clock.now();
        {
            let guard = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(snapshot) = guard.as_ref() {
                if now - snapshot.loaded_at < self.ttl {
                    return Ok(Arc::clone(&snapshot.experiments));
                }
            }
        }

        let generation = self.generation.load(Ordering::Acquire);
        let experiments = Arc::new(load()?);

        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::Acquire) != generation {
            tracing::debug!("discarded reload overtaken by invalidation");
            return Ok(experiments);
        }
        tracing::debug!(count = experiments.len(), "refreshed running experiments");
        *guard = Some(Snapshot {
            experiments: Arc::clone(&experiments),
            loaded_at: now,
        });
        Ok(experiments)
    }

    /// Find a running experiment by id in the current snapshot.
    ///
    /// # Errors
    /// Propagates store failures during a refresh.
    pub fn find<S: ExperimentStore>(
        &self,
        store: &S,
        experiment_id: ExperimentId,
    ) -> Result<Option<Experiment>> {
        Ok(self
            .running(store)?
            .iter()
            .find(|experiment| experiment.id == experiment_id)
            .cloned())
    }

    /// Drop the snapshot so the next read hits the store.
    pub fn invalidate(&self) {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::AcqRel);
        *guard = None;
    }
}
