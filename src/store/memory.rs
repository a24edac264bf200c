//! In-memory experiment store implementation using `DashMap`.
//!
//! Data is lost on process restart. Suitable for tests, demos and
//! single-process deployments.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{ExperimentStore, Upsert};
use crate::model::{
    Assignment, Conversion, ConversionKey, Experiment, ExperimentId, ExperimentStatus, StatField,
    Variation, VariationId, VariationUpdate,
};
use crate::{Error, Result};

/// Inverse of one transactional write.
#[derive(Debug)]
enum Undo {
    RemoveExperiment(ExperimentId),
    RestoreExperiment(Box<Experiment>),
    RemoveVariation(VariationId),
    /// Only the admin-writable fields; counters keep moving under concurrent traffic.
    RestoreVariation {
        id: VariationId,
        traffic_percentage: f64,
        is_winner: bool,
    },
}

/// In-memory experiment store using lock-free concurrent hashmaps.
///
/// Insert-or-fetch uses the `DashMap` entry API, which holds the shard
/// lock for the key while the factory runs, so concurrent first writers
/// converge on a single row. Counter increments happen under the same
/// shard lock.
///
/// Transactions keep an undo journal of experiment and variation writes.
/// Only one transaction may be open at a time.
///
/// # Example
///
/// ```rust
/// use trueno_ab::store::{ExperimentStore, MemoryStore};
///
/// # fn main() -> trueno_ab::Result<()> {
/// let store = MemoryStore::new();
/// store.begin()?;
/// store.rollback()?;
/// assert!(store.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    experiments: DashMap<ExperimentId, Experiment>,
    variations: DashMap<VariationId, Variation>,
    assignments: DashMap<(ExperimentId, String), Assignment>,
    conversions: DashMap<ConversionKey, Conversion>,
    next_id: AtomicU64,
    journal: Mutex<Option<Vec<Undo>>>,
}

impl MemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            experiments: DashMap::new(),
            variations: DashMap::new(),
            assignments: DashMap::new(),
            conversions: DashMap::new(),
            next_id: AtomicU64::new(1),
            journal: Mutex::new(None),
        }
    }

    /// Check if the store holds no experiments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty() && self.variations.is_empty()
    }

    /// Number of experiments.
    #[must_use]
    pub fn experiment_count(&self) -> usize {
        self.experiments.len()
    }

    /// Number of variations across all experiments.
    #[must_use]
    pub fn variation_count(&self) -> usize {
        self.variations.len()
    }

    /// Number of assignments across all experiments.
    #[must_use]
    pub fn assignment_count(&self) -> usize {
        self.assignments.len()
    }

    /// Number of conversions across all experiments.
    #[must_use]
    pub fn conversion_count(&self) -> usize {
        self.conversions.len()
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn journal(&self) -> MutexGuard<'_, Option<Vec<Undo>>> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, undo: Undo) {
        if let Some(entries) = self.journal().as_mut() {
            entries.push(undo);
        }
    }

    fn apply_undo(&self, undo: Undo) {
        match undo {
            Undo::RemoveExperiment(id) => {
                self.experiments.remove(&id);
            }
            Undo::RestoreExperiment(experiment) => {
                self.experiments.insert(experiment.id, *experiment);
            }
            Undo::RemoveVariation(id) => {
                self.variations.remove(&id);
            }
            Undo::RestoreVariation {
                id,
                traffic_percentage,
                is_winner,
            } => {
                if let Some(mut variation) = self.variations.get_mut(&id) {
                    variation.traffic_percentage = traffic_percentage;
                    variation.is_winner = is_winner;
                }
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ExperimentStore for MemoryStore {
    fn list_experiments(&self, status: ExperimentStatus) -> Result<Vec<Experiment>> {
        let mut experiments: Vec<Experiment> = self
            .experiments
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.value().clone())
            .collect();
        experiments.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(experiments)
    }

    fn get_experiment(&self, id: ExperimentId) -> Result<Option<Experiment>> {
        Ok(self.experiments.get(&id).map(|entry| entry.value().clone()))
    }

    fn insert_experiment(&self, mut experiment: Experiment) -> Result<ExperimentId> {
        let id = self.allocate_id();
        experiment.id = id;
        self.experiments.insert(id, experiment);
        self.record(Undo::RemoveExperiment(id));
        Ok(id)
    }

    fn update_experiment(&self, experiment: &Experiment) -> Result<()> {
        let mut entry = self
            .experiments
            .get_mut(&experiment.id)
            .ok_or(Error::ExperimentNotFound(experiment.id))?;
        let previous = std::mem::replace(entry.value_mut(), experiment.clone());
        drop(entry);
        self.record(Undo::RestoreExperiment(Box::new(previous)));
        Ok(())
    }

    fn insert_variation(&self, mut variation: Variation) -> Result<VariationId> {
        if !self.experiments.contains_key(&variation.experiment_id) {
            return Err(Error::ExperimentNotFound(variation.experiment_id));
        }
        let id = self.allocate_id();
        variation.id = id;
        self.variations.insert(id, variation);
        self.record(Undo::RemoveVariation(id));
        Ok(id)
    }

    fn get_variation(&self, id: VariationId) -> Result<Option<Variation>> {
        Ok(self.variations.get(&id).map(|entry| entry.value().clone()))
    }

    fn list_variations(&self, experiment_id: ExperimentId) -> Result<Vec<Variation>> {
        let mut variations: Vec<Variation> = self
            .variations
            .iter()
            .filter(|entry| entry.experiment_id == experiment_id)
            .map(|entry| entry.value().clone())
            .collect();
        variations.sort_by_key(|variation| variation.id);
        Ok(variations)
    }

    fn update_variation(&self, id: VariationId, update: VariationUpdate) -> Result<()> {
        let mut entry = self
            .variations
            .get_mut(&id)
            .ok_or(Error::VariationNotFound(id))?;
        let undo = Undo::RestoreVariation {
            id,
            traffic_percentage: entry.traffic_percentage,
            is_winner: entry.is_winner,
        };
        update.apply_to(entry.value_mut());
        drop(entry);
        self.record(undo);
        Ok(())
    }

    fn get_assignment(
        &self,
        experiment_id: ExperimentId,
        user_id: &str,
    ) -> Result<Option<Assignment>> {
        Ok(self
            .assignments
            .get(&(experiment_id, user_id.to_string()))
            .map(|entry| entry.value().clone()))
    }

    fn get_or_create_assignment<F>(
        &self,
        experiment_id: ExperimentId,
        user_id: &str,
        factory: F,
    ) -> Result<Upsert<Assignment>>
    where
        F: FnOnce() -> Assignment,
    {
        match self.assignments.entry((experiment_id, user_id.to_string())) {
            Entry::Occupied(entry) => Ok(Upsert::Existing(entry.get().clone())),
            Entry::Vacant(entry) => {
                let assignment = factory();
                entry.insert(assignment.clone());
                Ok(Upsert::Created(assignment))
            }
        }
    }

    fn get_conversion(&self, key: &ConversionKey) -> Result<Option<Conversion>> {
        Ok(self.conversions.get(key).map(|entry| entry.value().clone()))
    }

    fn get_or_create_conversion<F>(&self, key: &ConversionKey, factory: F) -> Result<Upsert<Conversion>>
    where
        F: FnOnce() -> Conversion,
    {
        match self.conversions.entry(key.clone()) {
            Entry::Occupied(entry) => Ok(Upsert::Existing(entry.get().clone())),
            Entry::Vacant(entry) => {
                let conversion = factory();
                entry.insert(conversion.clone());
                Ok(Upsert::Created(conversion))
            }
        }
    }

    fn increment_stat(&self, variation_id: VariationId, field: StatField) -> Result<()> {
        let mut entry = self
            .variations
            .get_mut(&variation_id)
            .ok_or(Error::VariationNotFound(variation_id))?;
        match field {
            StatField::Visitors => entry.stats.visitors += 1,
            StatField::Conversions => entry.stats.conversions += 1,
        }
        Ok(())
    }

    fn begin(&self) -> Result<()> {
        let mut journal = self.journal();
        if journal.is_some() {
            return Err(Error::Store("transaction already open".to_string()));
        }
        *journal = Some(Vec::new());
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.journal()
            .take()
            .map(|_| ())
            .ok_or_else(|| Error::Store("no open transaction".to_string()))
    }

    fn rollback(&self) -> Result<()> {
        let entries = self
            .journal()
            .take()
            .ok_or_else(|| Error::Store("no open transaction".to_string()))?;
        for undo in entries.into_iter().rev() {
            self.apply_undo(undo);
        }
        Ok(())
    }
}
