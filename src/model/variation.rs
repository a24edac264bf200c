//! Variation - one treatment arm of an experiment

use serde::{Deserialize, Serialize};

use super::{ExperimentId, VariationId};

/// Cached per-variation counters, maintained by atomic store increments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationStats {
    /// Distinct visitors assigned
    pub visitors: u64,
    /// Distinct (visitor, goal) conversions
    pub conversions: u64,
}

impl VariationStats {
    /// Create stats from raw counts.
    #[must_use]
    pub const fn new(visitors: u64, conversions: u64) -> Self {
        Self {
            visitors,
            conversions,
        }
    }

    /// Conversion rate as a fraction in [0, 1]; 0 when there are no visitors.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rate(&self) -> f64 {
        if self.visitors == 0 {
            0.0
        } else {
            self.conversions as f64 / self.visitors as f64
        }
    }

    /// Conversion rate in percent, rounded to 2 decimals.
    #[must_use]
    pub fn rate_percent(&self) -> f64 {
        round2(self.rate() * 100.0)
    }
}

/// Which counter to increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatField {
    /// `VariationStats::visitors`
    Visitors,
    /// `VariationStats::conversions`
    Conversions,
}

/// A persisted variation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variation {
    /// Store-assigned id (ignored on insert)
    pub id: VariationId,
    /// Owning experiment
    pub experiment_id: ExperimentId,
    /// Stable key
    pub key: String,
    /// Display name
    pub name: String,
    /// Opaque change payload
    pub changes: serde_json::Value,
    /// Weight in percent [0, 100]
    pub traffic_percentage: f64,
    /// Baseline for significance
    pub is_control: bool,
    /// Flagged when the experiment stops with this variation as winner
    pub is_winner: bool,
    /// Cached counters
    pub stats: VariationStats,
}

/// Partial update applied by `update_variation`. `None` fields are left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VariationUpdate {
    /// New weight
    pub traffic_percentage: Option<f64>,
    /// New winner flag
    pub is_winner: Option<bool>,
}

impl VariationUpdate {
    /// Update only the traffic weight.
    #[must_use]
    pub const fn traffic(percentage: f64) -> Self {
        Self {
            traffic_percentage: Some(percentage),
            is_winner: None,
        }
    }

    /// Update only the winner flag.
    #[must_use]
    pub const fn winner(is_winner: bool) -> Self {
        Self {
            traffic_percentage: None,
            is_winner: Some(is_winner),
        }
    }

    /// Apply to a variation in place.
    pub fn apply_to(&self, variation: &mut Variation) {
        if let Some(percentage) = self.traffic_percentage {
            variation.traffic_percentage = percentage;
        }
        if let Some(is_winner) = self.is_winner {
            variation.is_winner = is_winner;
        }
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
