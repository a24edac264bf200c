//! Experiment data model
//!
//! ## Schema Overview
//!
//! ```text
//! Experiment (1) ──< Variation (N)
//!      │                 │
//!      ├──< Assignment (N) keyed by (experiment_id, user_id)
//!      └──< Conversion (N) keyed by (experiment_id, variation_id, user_id, goal_id)
//! ```
//!
//! Assignments are write-once. Conversions exist at most once per key.
//!
//! ## Usage
//!
//! ```rust
//! use trueno_ab::model::{ExperimentConfig, Goal, VariationConfig};
//!
//! let config = ExperimentConfig::builder("Headline test")
//!     .variation(VariationConfig::new("a", "Control").traffic_percentage(50.0))
//!     .variation(VariationConfig::new("b", "Bold").traffic_percentage(50.0))
//!     .goal(Goal::new("signup", "signup"))
//!     .build();
//!
//! assert_eq!(config.variations.len(), 2);
//! ```

mod assignment;
mod experiment;
mod variation;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use assignment::{Assignment, Conversion, ConversionKey};
pub use experiment::{Experiment, ExperimentConfig, ExperimentConfigBuilder, VariationConfig};
pub use variation::{StatField, Variation, VariationStats, VariationUpdate};
pub(crate) use variation::round2;

/// Store-assigned experiment identity.
pub type ExperimentId = u64;

/// Store-assigned variation identity. Variations are walked in ascending id order.
pub type VariationId = u64;

/// Kind of experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentType {
    /// Classic A/B(/n) split with fixed weights
    #[default]
    Split,
    /// One variation per combination of element changes
    Multivariate,
    /// Weights adapted periodically by the epsilon-greedy reallocator
    Bandit,
}

/// Lifecycle status of an experiment.
///
/// ```text
/// draft ──> running <──> paused
///              │            │
///              └──> completed <┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Authored, not yet serving traffic
    #[default]
    Draft,
    /// Serving traffic and accepting conversions
    Running,
    /// Temporarily not serving traffic
    Paused,
    /// Terminal
    Completed,
}

impl ExperimentStatus {
    /// Get status name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }

    /// Whether the lifecycle state machine allows `self -> next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft | Self::Paused, Self::Running)
                | (Self::Running, Self::Paused)
                | (Self::Running | Self::Paused, Self::Completed)
        )
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named event that counts as success for an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    /// Goal id, unique within the experiment
    pub id: String,
    /// Event name matched by `track_conversion`
    pub event: String,
}

impl Goal {
    /// Create a goal from its id and triggering event name.
    ///
    /// # Arguments
    ///
    /// * `id` - Goal id, unique within the experiment
    /// * `event` - Event name passed to `track_conversion`
    #[must_use]
    pub fn new(id: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            event: event.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use ExperimentStatus::{Completed, Draft, Paused, Running};

        assert!(Draft.can_transition_to(Running));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Paused.can_transition_to(Completed));

        assert!(!Draft.can_transition_to(Paused));
        assert!(!Draft.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Running.can_transition_to(Running));
    }

    #[test]
    fn test_status_serde_names() {
        let json = serde_json::to_string(&ExperimentStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let ty: ExperimentType = serde_json::from_str("\"bandit\"").unwrap();
        assert_eq!(ty, ExperimentType::Bandit);
    }
}
