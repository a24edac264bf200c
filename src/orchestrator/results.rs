//! Experiment results aggregation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    Experiment, ExperimentId, ExperimentStatus, ExperimentType, Variation, VariationId,
};
use crate::stats::{self, Significance, SignificanceResult};

/// Per-variation summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationResult {
    /// Variation id
    pub id: VariationId,
    /// Stable key
    pub key: String,
    /// Display name
    pub name: String,
    /// Baseline flag
    pub is_control: bool,
    /// Winner flag
    pub is_winner: bool,
    /// Current weight
    pub traffic_percentage: f64,
    /// Distinct visitors
    pub visitors: u64,
    /// Distinct conversions
    pub conversions: u64,
    /// Conversion rate in percent, 2 decimals
    pub conversion_rate: f64,
    /// Relative lift over the control, in percent
    pub improvement: Option<f64>,
    /// Test against the control (challengers only)
    pub significance: Option<SignificanceResult>,
}

/// Aggregated experiment results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResults {
    /// Experiment id
    pub experiment_id: ExperimentId,
    /// Experiment name
    pub name: String,
    /// Experiment type
    pub experiment_type: ExperimentType,
    /// Lifecycle status
    pub status: ExperimentStatus,
    /// Seconds from start to stop (or to now while active); 0 if never started
    pub duration_seconds: i64,
    /// Visitors across all variations
    pub total_visitors: u64,
    /// Variations in id order
    pub variations: Vec<VariationResult>,
    /// Control vs challenger
    pub significance: Significance,
}

impl ExperimentResults {
    /// Result row for a variation key.
    #[must_use]
    pub fn variation(&self, key: &str) -> Option<&VariationResult> {
        self.variations.iter().find(|v| v.key == key)
    }
}

pub(crate) fn build_results(
    experiment: &Experiment,
    variations: &[Variation],
    now: DateTime<Utc>,
) -> ExperimentResults {
    let control = stats::control_of(variations);

    let rows = variations
        .iter()
        .map(|variation| {
            let versus = control.filter(|c| c.id != variation.id);
            VariationResult {
                id: variation.id,
                key: variation.key.clone(),
                name: variation.name.clone(),
                is_control: variation.is_control,
                is_winner: variation.is_winner,
                traffic_percentage: variation.traffic_percentage,
                visitors: variation.stats.visitors,
                conversions: variation.stats.conversions,
                conversion_rate: variation.stats.rate_percent(),
                improvement: versus.and_then(|c| stats::improvement(c.stats, variation.stats)),
                significance: versus.map(|c| stats::two_proportion_test(c.stats, variation.stats)),
            }
        })
        .collect();

    let duration_seconds = experiment.started_at.map_or(0, |started| {
        (experiment.ended_at.unwrap_or(now) - started)
            .num_seconds()
            .max(0)
    });

    ExperimentResults {
        experiment_id: experiment.id,
        name: experiment.name.clone(),
        experiment_type: experiment.experiment_type,
        status: experiment.status,
        duration_seconds,
        total_visitors: variations.iter().map(|v| v.stats.visitors).sum(),
        variations: rows,
        significance: stats::experiment_significance(variations),
    }
}
