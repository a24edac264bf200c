//! Exactly-once goal conversion accounting
//!
//! A conversion is keyed by `(experiment, variation, user, goal)`. The
//! first write for a key inserts the row and bumps the variation's
//! conversion counter; every later attempt, including concurrent
//! duplicates, is a no-op.

use std::sync::Arc;

use crate::clock::Clock;
use crate::model::{Conversion, ConversionKey, Experiment, StatField};
use crate::store::ExperimentStore;
use crate::Result;

/// Records goal conversions idempotently.
#[derive(Clone)]
pub struct ConversionRecorder {
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ConversionRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionRecorder").finish_non_exhaustive()
    }
}

impl ConversionRecorder {
    /// Create a recorder timestamping conversions with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Record one conversion. Returns `true` if this call created it.
    ///
    /// A key whose variation does not belong to its experiment records
    /// nothing and returns `false`.
    ///
    /// `payload.value` (a number) becomes the conversion value, default 1;
    /// the whole payload is kept as metadata.
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn record<S: ExperimentStore>(
        &self,
        store: &S,
        key: ConversionKey,
        payload: &serde_json::Value,
    ) -> Result<bool> {
        if store.get_conversion(&key)?.is_some() {
            return Ok(false);
        }
        let owned = store
            .get_variation(key.variation_id)?
            .is_some_and(|variation| variation.experiment_id == key.experiment_id);
        if !owned {
            tracing::warn!(
                experiment_id = key.experiment_id,
                variation_id = key.variation_id,
                "conversion for a variation outside its experiment ignored"
            );
            return Ok(false);
        }

        let value = payload
            .get("value")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(1.0);
        let upsert = store.get_or_create_conversion(&key, || Conversion {
            key: key.clone(),
            value,
            metadata: payload.clone(),
            converted_at: self.clock.now(),
        })?;
        if !upsert.is_created() {
            return Ok(false);
        }

        store.increment_stat(key.variation_id, StatField::Conversions)?;
        tracing::debug!(
            experiment_id = key.experiment_id,
            variation_id = key.variation_id,
            goal_id = %key.goal_id,
            "recorded conversion"
        );
        Ok(true)
    }

    /// Attribute `event` for `user_id` across `experiments`.
    ///
    /// Experiments are visited in the given order (callers pass them by
    /// descending priority). Only experiments the visitor already has an
    /// assignment in are considered; each goal whose event name matches is
    /// recorded once. Returns the number of newly created conversions.
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn record_event<S: ExperimentStore>(
        &self,
        store: &S,
        experiments: &[Experiment],
        user_id: &str,
        event: &str,
        payload: &serde_json::Value,
    ) -> Result<usize> {
        let mut recorded = 0;
        for experiment in experiments {
            let mut goals = experiment.goals_for_event(event).peekable();
            if goals.peek().is_none() {
                continue;
            }
            let Some(assignment) = store.get_assignment(experiment.id, user_id)? else {
                continue;
            };
            for goal in goals {
                let key = ConversionKey {
                    experiment_id: experiment.id,
                    variation_id: assignment.variation_id,
                    user_id: user_id.to_string(),
                    goal_id: goal.id.clone(),
                };
                if self.record(store, key, payload)? {
                    recorded += 1;
                }
            }
        }
        Ok(recorded)
    }
}
