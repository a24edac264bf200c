//! Store contract for experiment persistence
//!
//! The engine keeps no durable state of its own. Everything lives behind
//! [`ExperimentStore`], whose implementations must provide:
//! - atomic insert-or-fetch for assignments and conversions (concurrent
//!   first writers converge on one row, losers observe the winner's row),
//! - atomic counter increments for variation statistics,
//! - `begin/commit/rollback` around experiment and variation writes.
//!
//! [`MemoryStore`] is the in-process reference implementation.
//!
//! # Example
//!
//! ```rust
//! use trueno_ab::store::{ExperimentStore, MemoryStore};
//! use trueno_ab::model::ExperimentStatus;
//!
//! # fn main() -> trueno_ab::Result<()> {
//! let store = MemoryStore::new();
//! assert!(store.list_experiments(ExperimentStatus::Running)?.is_empty());
//! # Ok(())
//! # }
//! ```

mod memory;

pub use memory::MemoryStore;

use crate::model::{
    Assignment, Conversion, ConversionKey, Experiment, ExperimentId, ExperimentStatus, StatField,
    Variation, VariationId, VariationUpdate,
};
use crate::Result;

/// Outcome of an insert-or-fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert<T> {
    /// This call wrote the row
    Created(T),
    /// A row already existed; nothing was written
    Existing(T),
}

impl<T> Upsert<T> {
    /// Whether this call wrote the row.
    #[must_use]
    pub const fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    /// The stored row, regardless of who wrote it.
    pub fn into_inner(self) -> T {
        match self {
            Self::Created(value) | Self::Existing(value) => value,
        }
    }
}

/// Persistence collaborator required by the engine.
///
/// Calls are synchronous from the engine's point of view; callers impose
/// request timeouts externally.
pub trait ExperimentStore: Send + Sync {
    /// Experiments in `status`, ordered by descending priority, then ascending id.
    fn list_experiments(&self, status: ExperimentStatus) -> Result<Vec<Experiment>>;

    /// Get an experiment by id.
    fn get_experiment(&self, id: ExperimentId) -> Result<Option<Experiment>>;

    /// Insert an experiment, returning its new id. The `id` field is ignored.
    fn insert_experiment(&self, experiment: Experiment) -> Result<ExperimentId>;

    /// Overwrite an existing experiment.
    ///
    /// # Errors
    /// `ExperimentNotFound` if no experiment has `experiment.id`.
    fn update_experiment(&self, experiment: &Experiment) -> Result<()>;

    /// Insert a variation, returning its new id. The `id` field is ignored.
    fn insert_variation(&self, variation: Variation) -> Result<VariationId>;

    /// Get a variation by id.
    fn get_variation(&self, id: VariationId) -> Result<Option<Variation>>;

    /// Variations of an experiment, ordered by ascending id.
    fn list_variations(&self, experiment_id: ExperimentId) -> Result<Vec<Variation>>;

    /// Apply a partial update to a variation.
    ///
    /// # Errors
    /// `VariationNotFound` if no variation has `id`.
    fn update_variation(&self, id: VariationId, update: VariationUpdate) -> Result<()>;

    /// Look up an existing assignment without creating one.
    fn get_assignment(&self, experiment_id: ExperimentId, user_id: &str)
        -> Result<Option<Assignment>>;

    /// Atomically fetch the assignment for `(experiment_id, user_id)`, or
    /// store the one built by `factory` if none exists.
    fn get_or_create_assignment<F>(
        &self,
        experiment_id: ExperimentId,
        user_id: &str,
        factory: F,
    ) -> Result<Upsert<Assignment>>
    where
        F: FnOnce() -> Assignment;

    /// Look up an existing conversion without creating one.
    fn get_conversion(&self, key: &ConversionKey) -> Result<Option<Conversion>>;

    /// Atomically fetch the conversion for `key`, or store the one built by
    /// `factory` if none exists.
    fn get_or_create_conversion<F>(&self, key: &ConversionKey, factory: F) -> Result<Upsert<Conversion>>
    where
        F: FnOnce() -> Conversion;

    /// Atomically increment one counter of a variation.
    ///
    /// # Errors
    /// `VariationNotFound` if no variation has `variation_id`.
    fn increment_stat(&self, variation_id: VariationId, field: StatField) -> Result<()>;

    /// Open a transaction covering experiment and variation writes.
    fn begin(&self) -> Result<()>;

    /// Make the open transaction's writes permanent.
    fn commit(&self) -> Result<()>;

    /// Undo every experiment and variation write since `begin`.
    fn rollback(&self) -> Result<()>;
}

/// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
///
/// The error from `f` is returned even if the rollback itself fails; the
/// rollback failure is logged.
///
/// # Errors
/// Whatever `begin`, `f` or `commit` return.
pub fn in_transaction<S, T, F>(store: &S, f: F) -> Result<T>
where
    S: ExperimentStore,
    F: FnOnce(&S) -> Result<T>,
{
    store.begin()?;
    match f(store) {
        Ok(value) => {
            store.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = store.rollback() {
                tracing::error!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_upsert_accessors() {
        let created = Upsert::Created(1);
        let existing = Upsert::Existing(2);

        assert!(created.is_created());
        assert!(!existing.is_created());
        assert_eq!(created.into_inner(), 1);
        assert_eq!(existing.into_inner(), 2);
    }

    #[test]
    fn test_in_transaction_commits_on_ok() {
        let store = MemoryStore::new();

        let value = in_transaction(&store, |_| Ok(42)).unwrap();

        assert_eq!(value, 42);
        // No transaction left open
        store.begin().unwrap();
        store.commit().unwrap();
    }

    #[test]
    fn test_in_transaction_rolls_back_on_err() {
        let store = MemoryStore::new();

        let result: Result<()> = in_transaction(&store, |_| Err(Error::Store("boom".into())));

        assert!(matches!(result, Err(Error::Store(_))));
        store.begin().unwrap();
        store.rollback().unwrap();
    }
}
