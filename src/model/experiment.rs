//! Experiment - root entity, and the authoring input that creates it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ExperimentId, ExperimentStatus, ExperimentType, Goal};
use crate::targeting::TargetingRule;

/// A persisted experiment.
///
/// Variations are owned by the experiment but stored separately; fetch
/// them with [`ExperimentStore::list_variations`](crate::store::ExperimentStore::list_variations).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Experiment {
    /// Store-assigned id (ignored on insert)
    pub id: ExperimentId,
    /// Human-readable name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Split, multivariate or bandit
    pub experiment_type: ExperimentType,
    /// Lifecycle status
    pub status: ExperimentStatus,
    /// Share of all visitors eligible at all, in percent [0, 100]
    pub traffic_allocation: f64,
    /// Conjunctive eligibility rules
    pub targeting: Vec<TargetingRule>,
    /// Goals counted as conversions
    pub goals: Vec<Goal>,
    /// Higher priority experiments are evaluated first
    pub priority: i32,
    /// Exploration rate for bandit experiments
    pub epsilon: Option<f64>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// First transition to running
    pub started_at: Option<DateTime<Utc>>,
    /// Transition to completed
    pub ended_at: Option<DateTime<Utc>>,
}

impl Experiment {
    /// Goals triggered by `event`.
    pub fn goals_for_event<'a>(&'a self, event: &'a str) -> impl Iterator<Item = &'a Goal> + 'a {
        self.goals.iter().filter(move |goal| goal.event == event)
    }

    /// Whether the experiment is currently serving traffic.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == ExperimentStatus::Running
    }
}

/// Authoring input for one variation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariationConfig {
    /// Stable key, e.g. `"control"` or `"combo_2"`
    pub key: String,
    /// Display name
    pub name: String,
    /// Opaque change payload applied by the rendering layer
    #[serde(default)]
    pub changes: serde_json::Value,
    /// Weight in percent; all zero means "split evenly"
    #[serde(default)]
    pub traffic_percentage: f64,
    /// Explicit control flag; when no variation sets it the first one is control
    #[serde(default)]
    pub is_control: Option<bool>,
}

impl VariationConfig {
    /// Create a variation with no changes and zero weight.
    ///
    /// # Arguments
    ///
    /// * `key` - Stable key, unique within the experiment
    /// * `name` - Display name
    ///
    /// # Returns
    ///
    /// A `VariationConfig` with the control flag unset; the chained setters
    /// fill in weight, changes and control.
    #[must_use]
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            changes: serde_json::Value::Null,
            traffic_percentage: 0.0,
            is_control: None,
        }
    }

    /// Set the traffic weight in percent.
    #[must_use]
    pub const fn traffic_percentage(mut self, percentage: f64) -> Self {
        self.traffic_percentage = percentage;
        self
    }

    /// Set the change payload.
    #[must_use]
    pub fn changes(mut self, changes: serde_json::Value) -> Self {
        self.changes = changes;
        self
    }

    /// Flag this variation as (not) the control.
    #[must_use]
    pub const fn control(mut self, is_control: bool) -> Self {
        self.is_control = Some(is_control);
        self
    }
}

fn default_traffic_allocation() -> f64 {
    100.0
}

/// Authoring input accepted by `create_experiment`.
///
/// Deserializable so an admin layer can pass its JSON payload straight
/// through; missing optional fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentConfig {
    /// Required, non-empty
    #[serde(default)]
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Defaults to `split`
    #[serde(default, rename = "type")]
    pub experiment_type: ExperimentType,
    /// Defaults to 100
    #[serde(default = "default_traffic_allocation")]
    pub traffic_allocation: f64,
    /// Eligibility rules
    #[serde(default)]
    pub targeting: Vec<TargetingRule>,
    /// At least two required
    #[serde(default)]
    pub variations: Vec<VariationConfig>,
    /// At least one required
    #[serde(default)]
    pub goals: Vec<Goal>,
    /// Evaluation priority
    #[serde(default)]
    pub priority: i32,
    /// Bandit exploration rate
    #[serde(default)]
    pub epsilon: Option<f64>,
}

impl ExperimentConfig {
    /// Create a builder with the required name.
    ///
    /// # Arguments
    ///
    /// * `name` - Experiment name (must not be blank)
    ///
    /// # Returns
    ///
    /// A builder for a split experiment with full traffic allocation,
    /// priority 0 and no variations, goals or targeting rules.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ExperimentConfigBuilder {
        ExperimentConfigBuilder::new(name)
    }

    /// Sum of the variation weights.
    #[must_use]
    pub fn total_traffic(&self) -> f64 {
        self.variations.iter().map(|v| v.traffic_percentage).sum()
    }
}

/// Builder for `ExperimentConfig`.
#[derive(Debug)]
pub struct ExperimentConfigBuilder {
    config: ExperimentConfig,
}

impl ExperimentConfigBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: ExperimentConfig {
                name: name.into(),
                description: String::new(),
                experiment_type: ExperimentType::Split,
                traffic_allocation: default_traffic_allocation(),
                targeting: Vec::new(),
                variations: Vec::new(),
                goals: Vec::new(),
                priority: 0,
                epsilon: None,
            },
        }
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.config.description = description.into();
        self
    }

    /// Set the experiment type.
    #[must_use]
    pub const fn experiment_type(mut self, experiment_type: ExperimentType) -> Self {
        self.config.experiment_type = experiment_type;
        self
    }

    /// Set the share of visitors that participate at all.
    #[must_use]
    pub const fn traffic_allocation(mut self, percentage: f64) -> Self {
        self.config.traffic_allocation = percentage;
        self
    }

    /// Add a targeting rule.
    #[must_use]
    pub fn rule(mut self, rule: TargetingRule) -> Self {
        self.config.targeting.push(rule);
        self
    }

    /// Add a variation.
    #[must_use]
    pub fn variation(mut self, variation: VariationConfig) -> Self {
        self.config.variations.push(variation);
        self
    }

    /// Add a goal.
    #[must_use]
    pub fn goal(mut self, goal: Goal) -> Self {
        self.config.goals.push(goal);
        self
    }

    /// Set the evaluation priority.
    #[must_use]
    pub const fn priority(mut self, priority: i32) -> Self {
        self.config.priority = priority;
        self
    }

    /// Set the bandit exploration rate.
    #[must_use]
    pub const fn epsilon(mut self, epsilon: f64) -> Self {
        self.config.epsilon = Some(epsilon);
        self
    }

    /// Build the `ExperimentConfig`.
    #[must_use]
    pub fn build(self) -> ExperimentConfig {
        self.config
    }
}
