//! Deterministic traffic allocation
//!
//! Every decision is a pure function of the visitor id and the current
//! configuration: the same `user_id` always lands in the same traffic
//! bucket and, under fixed weights, in the same variation. There is no
//! per-call randomness.
//!
//! Bucketing hashes the id with `FxHasher` and passes the result through
//! the murmur3 64-bit finalizer so the low digits used by `% 100` are
//! uniformly distributed.

use std::hash::Hasher;
use std::sync::Arc;

use rustc_hash::FxHasher;

use crate::clock::Clock;
use crate::model::{Assignment, Experiment, StatField, Variation};
use crate::store::{ExperimentStore, Upsert};
use crate::targeting::{RequestContext, TargetingEvaluator};
use crate::Result;

/// Stable 64-bit hash of a visitor id.
///
/// # Example
///
/// ```rust
/// use trueno_ab::allocation::bucket_hash;
///
/// assert_eq!(bucket_hash("alice"), bucket_hash("alice"));
/// assert_ne!(bucket_hash("alice"), bucket_hash("bob"));
/// ```
#[must_use]
pub fn bucket_hash(user_id: &str) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(user_id.as_bytes());
    fmix64(hasher.finish())
}

const fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

/// Whether `user_id` falls inside the first `allocation_pct` percent of traffic.
///
/// 100 or more always participates; 0 or less never does.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn is_in_traffic(allocation_pct: f64, user_id: &str) -> bool {
    if allocation_pct >= 100.0 {
        return true;
    }
    ((bucket_hash(user_id) % 100) as f64) < allocation_pct
}

/// Pick the variation for `user_id` by weighted hashing.
///
/// Variations are walked in ascending id order. When all weights are zero
/// the split is uniform; otherwise the hash, reduced modulo the weight
/// total (at 0.01 resolution), selects the first variation whose
/// cumulative weight exceeds it. Returns `None` only for an empty slice.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn select_variation<'a>(variations: &'a [Variation], user_id: &str) -> Option<&'a Variation> {
    let mut ordered: Vec<&Variation> = variations.iter().collect();
    ordered.sort_by_key(|variation| variation.id);

    let hash = bucket_hash(user_id);
    let total: f64 = ordered.iter().map(|v| v.traffic_percentage).sum();
    let total_units = (total * 100.0).round();

    if total_units < 1.0 {
        let index = (hash % ordered.len().max(1) as u64) as usize;
        return ordered.get(index).copied();
    }

    let bucket = (hash % total_units as u64) as f64 / 100.0;
    let mut cumulative = 0.0;
    for variation in ordered.iter().copied() {
        cumulative += variation.traffic_percentage;
        if bucket < cumulative {
            return Some(variation);
        }
    }
    ordered.last().copied()
}

/// Sticky variation assignment.
///
/// Owns the targeting evaluator and the clock used to timestamp new
/// assignments.
#[derive(Clone)]
pub struct AllocationEngine {
    targeting: TargetingEvaluator,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AllocationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationEngine")
            .field("targeting", &self.targeting)
            .finish_non_exhaustive()
    }
}

impl AllocationEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(targeting: TargetingEvaluator, clock: Arc<dyn Clock>) -> Self {
        Self { targeting, clock }
    }

    /// The targeting evaluator in use.
    #[must_use]
    pub const fn targeting(&self) -> &TargetingEvaluator {
        &self.targeting
    }

    /// Return the visitor's variation, assigning one on first eligible request.
    ///
    /// 1. An existing assignment is returned as is.
    /// 2. Failing targeting or traffic eligibility returns `None` and writes nothing.
    /// 3. Otherwise a variation is selected, the assignment is written with
    ///    insert-or-fetch, and the visitor counter is incremented by
    ///    whichever request actually created the row.
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn get_or_assign<S: ExperimentStore>(
        &self,
        store: &S,
        experiment: &Experiment,
        user_id: &str,
        context: &RequestContext,
    ) -> Result<Option<Variation>> {
        if let Some(existing) = store.get_assignment(experiment.id, user_id)? {
            return store.get_variation(existing.variation_id);
        }

        if !self.targeting.evaluate(&experiment.targeting, context) {
            tracing::trace!(experiment_id = experiment.id, user_id, "targeting excluded visitor");
            return Ok(None);
        }
        if !is_in_traffic(experiment.traffic_allocation, user_id) {
            tracing::trace!(experiment_id = experiment.id, user_id, "visitor outside traffic allocation");
            return Ok(None);
        }

        let variations = store.list_variations(experiment.id)?;
        let Some(selected) = select_variation(&variations, user_id) else {
            return Ok(None);
        };

        let upsert = store.get_or_create_assignment(experiment.id, user_id, || Assignment {
            experiment_id: experiment.id,
            user_id: user_id.to_string(),
            variation_id: selected.id,
            assigned_at: self.clock.now(),
        })?;

        match upsert {
            Upsert::Created(assignment) => {
                store.increment_stat(assignment.variation_id, StatField::Visitors)?;
                tracing::debug!(
                    experiment_id = experiment.id,
                    variation_id = assignment.variation_id,
                    user_id,
                    "assigned visitor"
                );
                Ok(Some(selected.clone()))
            }
            Upsert::Existing(assignment) => store.get_variation(assignment.variation_id),
        }
    }
}
