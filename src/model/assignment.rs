//! Assignment and Conversion - the two write-once visitor records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ExperimentId, VariationId};

/// Sticky mapping of a visitor to a variation.
///
/// At most one per `(experiment_id, user_id)`; never mutated once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assignment {
    /// Experiment the visitor participates in
    pub experiment_id: ExperimentId,
    /// Visitor identity
    pub user_id: String,
    /// Assigned arm
    pub variation_id: VariationId,
    /// When the assignment was first written
    pub assigned_at: DateTime<Utc>,
}

/// Natural key of a conversion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversionKey {
    /// Experiment
    pub experiment_id: ExperimentId,
    /// Variation the visitor was assigned to
    pub variation_id: VariationId,
    /// Visitor identity
    pub user_id: String,
    /// Goal achieved
    pub goal_id: String,
}

/// A recorded goal achievement. At most one per [`ConversionKey`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversion {
    /// Natural key
    pub key: ConversionKey,
    /// Conversion value (defaults to 1)
    pub value: f64,
    /// Event payload
    pub metadata: serde_json::Value,
    /// When the conversion was recorded
    pub converted_at: DateTime<Utc>,
}
