//! Experiment orchestration
//!
//! [`ExperimentOrchestrator`] is the public face of the engine. It ties the
//! store, the running-experiments cache, allocation, conversion tracking,
//! significance and bandit reallocation together:
//!
//! - authoring: `create_experiment`, `create_bandit_experiment`,
//!   `create_multivariate_experiment`
//! - lifecycle: `start_experiment`, `pause_experiment`, `resume_experiment`,
//!   `stop_experiment`
//! - visitor paths: `get_user_variation`, `track_conversion`
//! - reporting: `get_experiment_results`
//! - bandits: `reallocate`, `reallocate_all`
//!
//! Administrative writes are serialized and run inside one store
//! transaction each; a failure leaves no partial state behind.
//!
//! # Example
//!
//! ```rust
//! use trueno_ab::model::{ExperimentConfig, Goal, VariationConfig};
//! use trueno_ab::orchestrator::ExperimentOrchestrator;
//! use trueno_ab::store::MemoryStore;
//! use trueno_ab::targeting::RequestContext;
//!
//! # fn main() -> trueno_ab::Result<()> {
//! let engine = ExperimentOrchestrator::builder(MemoryStore::new()).build()?;
//!
//! let id = engine.create_experiment(
//!     ExperimentConfig::builder("Quiz headline")
//!         .variation(VariationConfig::new("a", "Control").traffic_percentage(50.0))
//!         .variation(VariationConfig::new("b", "Bold").traffic_percentage(50.0))
//!         .goal(Goal::new("g1", "signup"))
//!         .build(),
//! )?;
//! engine.start_experiment(id)?;
//!
//! let variation = engine.get_user_variation(id, "alice", &RequestContext::default())?;
//! assert!(variation.is_some());
//! # Ok(())
//! # }
//! ```

mod results;
mod validation;

pub use results::{ExperimentResults, VariationResult};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::allocation::AllocationEngine;
use crate::bandit::{BanditReallocator, Reallocation};
use crate::cache::ExperimentCache;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::conversion::ConversionRecorder;
use crate::model::{
    Experiment, ExperimentConfig, ExperimentId, ExperimentStatus, ExperimentType, Variation,
    VariationId, VariationStats, VariationUpdate,
};
use crate::multivariate::multivariate_variations;
use crate::store::{in_transaction, ExperimentStore};
use crate::targeting::{RequestContext, TargetingEvaluator};
use crate::{Error, Result};

/// Side effect run when a winner is declared (e.g. publish the winning
/// changes to the live page).
///
/// Runs inside the stop transaction: an error rolls the stop back.
pub trait WinnerHook: Send + Sync {
    /// Apply `variation` as the winner of `experiment`.
    ///
    /// # Errors
    /// Any failure aborts the stop.
    fn apply_winner(&self, experiment: &Experiment, variation: &Variation) -> anyhow::Result<()>;
}

impl<F> WinnerHook for F
where
    F: Fn(&Experiment, &Variation) -> anyhow::Result<()> + Send + Sync,
{
    fn apply_winner(&self, experiment: &Experiment, variation: &Variation) -> anyhow::Result<()> {
        self(experiment, variation)
    }
}

/// Hook that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWinnerHook;

impl WinnerHook for NoopWinnerHook {
    fn apply_winner(&self, _experiment: &Experiment, _variation: &Variation) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The experimentation engine.
pub struct ExperimentOrchestrator<S> {
    store: S,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    cache: ExperimentCache,
    allocation: AllocationEngine,
    recorder: ConversionRecorder,
    reallocator: BanditReallocator,
    winner_hook: Arc<dyn WinnerHook>,
    admin: Mutex<()>,
}

impl<S> std::fmt::Debug for ExperimentOrchestrator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentOrchestrator")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("allocation", &self.allocation)
            .finish_non_exhaustive()
    }
}

/// Builder for `ExperimentOrchestrator`.
pub struct OrchestratorBuilder<S> {
    store: S,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    targeting: TargetingEvaluator,
    winner_hook: Arc<dyn WinnerHook>,
}

impl<S: ExperimentStore> OrchestratorBuilder<S> {
    /// Create a builder around `store` with default settings.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
            targeting: TargetingEvaluator::new(),
            winner_hook: Arc::new(NoopWinnerHook),
        }
    }

    /// Set engine tunables.
    #[must_use]
    pub const fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the time source.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the targeting evaluator (with its custom predicates).
    #[must_use]
    pub fn targeting(mut self, targeting: TargetingEvaluator) -> Self {
        self.targeting = targeting;
        self
    }

    /// Set the hook run when a winner is declared.
    #[must_use]
    pub fn winner_hook(mut self, hook: impl WinnerHook + 'static) -> Self {
        self.winner_hook = Arc::new(hook);
        self
    }

    /// Build the orchestrator
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the config is out of range
    pub fn build(self) -> Result<ExperimentOrchestrator<S>> {
        self.config.validate()?;
        Ok(ExperimentOrchestrator {
            cache: ExperimentCache::new(Arc::clone(&self.clock), self.config.cache_ttl()),
            allocation: AllocationEngine::new(self.targeting, Arc::clone(&self.clock)),
            recorder: ConversionRecorder::new(Arc::clone(&self.clock)),
            reallocator: BanditReallocator::new(self.config.default_epsilon),
            store: self.store,
            config: self.config,
            clock: self.clock,
            winner_hook: self.winner_hook,
            admin: Mutex::new(()),
        })
    }
}

impl<S: ExperimentStore> ExperimentOrchestrator<S> {
    /// Create a new orchestrator builder
    #[must_use]
    pub fn builder(store: S) -> OrchestratorBuilder<S> {
        OrchestratorBuilder::new(store)
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Engine tunables in effect.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drop the running-experiments snapshot.
    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
    }

    fn admin_lock(&self) -> MutexGuard<'_, ()> {
        self.admin.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate `config` and persist it as a draft experiment with its variations.
    ///
    /// # Errors
    /// `Validation` with nothing persisted, or a store failure (rolled back).
    pub fn create_experiment(&self, config: ExperimentConfig) -> Result<ExperimentId> {
        validation::validate_config(&config)?;
        let controls = validation::resolve_controls(&config.variations);
        let now = self.clock.now();

        let _guard = self.admin_lock();
        let id = in_transaction(&self.store, |store| {
            let experiment_id = store.insert_experiment(Experiment {
                id: 0,
                name: config.name.trim().to_string(),
                description: config.description.clone(),
                experiment_type: config.experiment_type,
                status: ExperimentStatus::Draft,
                traffic_allocation: config.traffic_allocation,
                targeting: config.targeting.clone(),
                goals: config.goals.clone(),
                priority: config.priority,
                epsilon: config.epsilon,
                created_at: now,
                started_at: None,
                ended_at: None,
            })?;
            for (variation, is_control) in config.variations.iter().zip(&controls) {
                store.insert_variation(Variation {
                    id: 0,
                    experiment_id,
                    key: variation.key.clone(),
                    name: variation.name.clone(),
                    changes: variation.changes.clone(),
                    traffic_percentage: variation.traffic_percentage,
                    is_control: *is_control,
                    is_winner: false,
                    stats: VariationStats::default(),
                })?;
            }
            Ok(experiment_id)
        })?;

        tracing::info!(
            experiment_id = id,
            name = %config.name,
            experiment_type = ?config.experiment_type,
            variations = config.variations.len(),
            "created experiment"
        );
        Ok(id)
    }

    /// Create a bandit experiment. Uses the configured default epsilon
    /// when `config` sets none.
    ///
    /// # Errors
    /// Same as [`create_experiment`](Self::create_experiment).
    pub fn create_bandit_experiment(&self, mut config: ExperimentConfig) -> Result<ExperimentId> {
        config.experiment_type = ExperimentType::Bandit;
        config.epsilon = Some(config.epsilon.unwrap_or(self.config.default_epsilon));
        self.create_experiment(config)
    }

    /// Create a multivariate experiment with one variation per combination
    /// of `elements`. Variations already present in `config` are replaced.
    ///
    /// # Errors
    /// `Validation` if the elements yield fewer than 2 combinations; otherwise
    /// same as [`create_experiment`](Self::create_experiment).
    pub fn create_multivariate_experiment(
        &self,
        mut config: ExperimentConfig,
        elements: &[Vec<serde_json::Value>],
    ) -> Result<ExperimentId> {
        config.experiment_type = ExperimentType::Multivariate;
        config.variations = multivariate_variations(elements);
        self.create_experiment(config)
    }

    /// `draft -> running`. Re-checks the definition and stamps `started_at`.
    ///
    /// # Errors
    /// `ExperimentNotFound`, `InvalidTransition`, or `Validation`.
    pub fn start_experiment(&self, id: ExperimentId) -> Result<()> {
        self.transition(id, ExperimentStatus::Draft, ExperimentStatus::Running)
    }

    /// `running -> paused`.
    ///
    /// # Errors
    /// `ExperimentNotFound` or `InvalidTransition`.
    pub fn pause_experiment(&self, id: ExperimentId) -> Result<()> {
        self.transition(id, ExperimentStatus::Running, ExperimentStatus::Paused)
    }

    /// `paused -> running`. Existing assignments are kept.
    ///
    /// # Errors
    /// `ExperimentNotFound` or `InvalidTransition`.
    pub fn resume_experiment(&self, id: ExperimentId) -> Result<()> {
        self.transition(id, ExperimentStatus::Paused, ExperimentStatus::Running)
    }

    fn transition(&self, id: ExperimentId, from: ExperimentStatus, to: ExperimentStatus) -> Result<()> {
        let _guard = self.admin_lock();
        in_transaction(&self.store, |store| {
            self.apply_transition(store, id, &[from], to).map(drop)
        })?;
        self.cache.invalidate();
        tracing::info!(experiment_id = id, %from, %to, "experiment status changed");
        Ok(())
    }

    fn apply_transition(
        &self,
        store: &S,
        id: ExperimentId,
        allowed_from: &[ExperimentStatus],
        to: ExperimentStatus,
    ) -> Result<Experiment> {
        let mut experiment = store
            .get_experiment(id)?
            .ok_or(Error::ExperimentNotFound(id))?;
        let from = experiment.status;
        if !allowed_from.contains(&from) || !from.can_transition_to(to) {
            return Err(Error::InvalidTransition { from, to });
        }

        let now = self.clock.now();
        if from == ExperimentStatus::Draft {
            validation::validate_for_start(&experiment, &store.list_variations(id)?)?;
        }
        if to == ExperimentStatus::Running && experiment.started_at.is_none() {
            experiment.started_at = Some(now);
        }
        if to == ExperimentStatus::Completed {
            experiment.ended_at = Some(now);
        }
        experiment.status = to;
        store.update_experiment(&experiment)?;
        Ok(experiment)
    }

    /// `running|paused -> completed`, optionally declaring a winner.
    ///
    /// The status change, the winner flag and the winner hook happen as one
    /// unit: if the winner does not belong to the experiment or the hook
    /// fails, the experiment keeps its previous status.
    ///
    /// # Errors
    /// `ExperimentNotFound`, `InvalidTransition`, `VariationNotFound`, or
    /// `WinnerHook`.
    pub fn stop_experiment(&self, id: ExperimentId, winner: Option<VariationId>) -> Result<()> {
        let _guard = self.admin_lock();
        in_transaction(&self.store, |store| {
            let experiment = self.apply_transition(
                store,
                id,
                &[ExperimentStatus::Running, ExperimentStatus::Paused],
                ExperimentStatus::Completed,
            )?;
            if let Some(winner_id) = winner {
                let variation = store
                    .get_variation(winner_id)?
                    .filter(|variation| variation.experiment_id == id)
                    .ok_or(Error::VariationNotFound(winner_id))?;
                store.update_variation(winner_id, VariationUpdate::winner(true))?;
                self.winner_hook
                    .apply_winner(&experiment, &variation)
                    .map_err(Error::WinnerHook)?;
            }
            Ok(())
        })?;
        self.cache.invalidate();
        tracing::info!(experiment_id = id, winner = ?winner, "experiment completed");
        Ok(())
    }

    /// Variation served to `user_id`, assigning one on the first eligible request.
    ///
    /// Returns `None` when the experiment is unknown or not running, or the
    /// visitor is excluded by targeting or traffic allocation.
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn get_user_variation(
        &self,
        experiment_id: ExperimentId,
        user_id: &str,
        context: &RequestContext,
    ) -> Result<Option<Variation>> {
        let experiment = match self.cache.find(&self.store, experiment_id)? {
            Some(experiment) => Some(experiment),
            None => self
                .store
                .get_experiment(experiment_id)?
                .filter(Experiment::is_running),
        };
        let Some(experiment) = experiment else {
            return Ok(None);
        };
        self.allocation
            .get_or_assign(&self.store, &experiment, user_id, context)
    }

    /// Attribute `event` for `user_id` across running experiments, highest
    /// priority first. Returns the number of newly recorded conversions.
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn track_conversion(
        &self,
        user_id: &str,
        event: &str,
        payload: &serde_json::Value,
    ) -> Result<usize> {
        let experiments = self.cache.running(&self.store)?;
        self.recorder
            .record_event(&self.store, &experiments, user_id, event, payload)
    }

    /// Aggregated results for one experiment.
    ///
    /// # Errors
    /// `ExperimentNotFound` or a store failure.
    pub fn get_experiment_results(&self, id: ExperimentId) -> Result<ExperimentResults> {
        let experiment = self
            .store
            .get_experiment(id)?
            .ok_or(Error::ExperimentNotFound(id))?;
        let variations = self.store.list_variations(id)?;
        Ok(results::build_results(
            &experiment,
            &variations,
            self.clock.now(),
        ))
    }

    /// Reweight one running bandit experiment. `None` for other experiment
    /// types and for bandits in any other status.
    ///
    /// # Errors
    /// `ExperimentNotFound` or a store failure (no weight changed).
    pub fn reallocate(&self, id: ExperimentId) -> Result<Option<Vec<Reallocation>>> {
        let _guard = self.admin_lock();
        let experiment = self
            .store
            .get_experiment(id)?
            .ok_or(Error::ExperimentNotFound(id))?;
        self.reallocator.reallocate(&self.store, &experiment)
    }

    /// Reweight every running bandit experiment. A failure on one
    /// experiment is logged and does not stop the others.
    ///
    /// Returns the number of experiments reweighted.
    ///
    /// # Errors
    /// A store failure while listing experiments.
    pub fn reallocate_all(&self) -> Result<usize> {
        let bandits: Vec<Experiment> = self
            .store
            .list_experiments(ExperimentStatus::Running)?
            .into_iter()
            .filter(|experiment| experiment.experiment_type == ExperimentType::Bandit)
            .collect();

        let mut reallocated = 0;
        for experiment in &bandits {
            let _guard = self.admin_lock();
            match self.reallocator.reallocate(&self.store, experiment) {
                Ok(Some(_)) => reallocated += 1,
                Ok(None) => {}
                Err(err) => tracing::warn!(
                    experiment_id = experiment.id,
                    error = %err,
                    "bandit reallocation failed"
                ),
            }
        }
        Ok(reallocated)
    }
}

#[cfg(feature = "tokio")]
impl<S: ExperimentStore + 'static> ExperimentOrchestrator<S> {
    /// Start the scheduled bandit reallocation at the configured interval.
    #[must_use]
    pub fn spawn_reallocation(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        crate::bandit::spawn_reallocation_task(Arc::clone(self), self.config.reallocation_interval())
    }
}
