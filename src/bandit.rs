//! Epsilon-greedy traffic reallocation for bandit experiments
//!
//! Each variation's reward is its conversion rate (percent). The new
//! weight blends a performance-proportional share with a uniform
//! exploration floor:
//!
//! ```text
//! share_i  = reward_i / Σ reward × 100        (100 / N when Σ reward = 0)
//! weight_i = (1 - ε) · share_i + ε · 100 / N
//! ```
//!
//! Weights are rounded to 2 decimals and written back to the variations.
//! Existing assignments are never touched, so visitors already bucketed
//! keep their variation; only new visitors see the new split.

use crate::model::{round2, Experiment, ExperimentType, VariationId, VariationUpdate};
use crate::store::{in_transaction, ExperimentStore};
use crate::Result;

/// New weight computed for one variation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reallocation {
    /// Variation reweighted
    pub variation_id: VariationId,
    /// Reward the weight was derived from (conversion rate, percent)
    pub reward: f64,
    /// New traffic percentage
    pub traffic_percentage: f64,
}

/// Epsilon-greedy weights (percent) for the given rewards.
///
/// # Example
///
/// ```rust
/// use trueno_ab::bandit::epsilon_greedy_weights;
///
/// let weights = epsilon_greedy_weights(&[80.0, 20.0], 0.1);
/// assert_eq!(weights, vec![77.0, 23.0]);
/// ```
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn epsilon_greedy_weights(rewards: &[f64], epsilon: f64) -> Vec<f64> {
    if rewards.is_empty() {
        return Vec::new();
    }
    let uniform = 100.0 / rewards.len() as f64;
    let total: f64 = rewards.iter().sum();
    if total <= 0.0 {
        return vec![round2(uniform); rewards.len()];
    }
    rewards
        .iter()
        .map(|reward| {
            let share = reward / total * 100.0;
            round2((1.0 - epsilon) * share + epsilon * uniform)
        })
        .collect()
}

/// Periodic reweighting of bandit experiments.
#[derive(Debug, Clone, Copy)]
pub struct BanditReallocator {
    default_epsilon: f64,
}

impl BanditReallocator {
    /// Create a reallocator using `default_epsilon` for experiments without their own.
    #[must_use]
    pub const fn new(default_epsilon: f64) -> Self {
        Self { default_epsilon }
    }

    /// Exploration rate used for `experiment`.
    #[must_use]
    pub fn epsilon_for(&self, experiment: &Experiment) -> f64 {
        experiment.epsilon.unwrap_or(self.default_epsilon)
    }

    /// Recompute and persist the weights of one experiment.
    ///
    /// Returns `None` for non-bandit experiments and for bandits that are not
    /// running; both are left untouched. All weight updates are written in
    /// one transaction.
    ///
    /// # Errors
    /// Propagates store failures; on failure no weight is changed.
    pub fn reallocate<S: ExperimentStore>(
        &self,
        store: &S,
        experiment: &Experiment,
    ) -> Result<Option<Vec<Reallocation>>> {
        if experiment.experiment_type != ExperimentType::Bandit || !experiment.is_running() {
            return Ok(None);
        }

        let variations = store.list_variations(experiment.id)?;
        let rewards: Vec<f64> = variations.iter().map(|v| v.stats.rate_percent()).collect();
        let weights = epsilon_greedy_weights(&rewards, self.epsilon_for(experiment));

        let reallocations: Vec<Reallocation> = variations
            .iter()
            .zip(rewards.iter().zip(weights))
            .map(|(variation, (&reward, traffic_percentage))| Reallocation {
                variation_id: variation.id,
                reward,
                traffic_percentage,
            })
            .collect();

        in_transaction(store, |store| {
            for reallocation in &reallocations {
                store.update_variation(
                    reallocation.variation_id,
                    VariationUpdate::traffic(reallocation.traffic_percentage),
                )?;
            }
            Ok(())
        })?;

        tracing::info!(
            experiment_id = experiment.id,
            weights = ?reallocations.iter().map(|r| r.traffic_percentage).collect::<Vec<_>>(),
            "reallocated bandit traffic"
        );
        Ok(Some(reallocations))
    }
}

#[cfg(feature = "tokio")]
mod schedule {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::task::JoinHandle;
    use tokio::time::MissedTickBehavior;

    use crate::orchestrator::ExperimentOrchestrator;
    use crate::store::ExperimentStore;

    /// Run `reallocate_all` every `period` until the returned handle is aborted.
    ///
    /// Store calls run on the blocking pool. Failures are logged and the
    /// schedule continues.
    pub fn spawn_reallocation_task<S>(
        orchestrator: Arc<ExperimentOrchestrator<S>>,
        period: Duration,
    ) -> JoinHandle<()>
    where
        S: ExperimentStore + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let orchestrator = Arc::clone(&orchestrator);
                match tokio::task::spawn_blocking(move || orchestrator.reallocate_all()).await {
                    Ok(Ok(count)) => tracing::debug!(count, "scheduled reallocation finished"),
                    Ok(Err(err)) => tracing::warn!(error = %err, "scheduled reallocation failed"),
                    Err(err) => tracing::warn!(error = %err, "scheduled reallocation panicked"),
                }
            }
        })
    }
}

#[cfg(feature = "tokio")]
pub use schedule::spawn_reallocation_task;
