//! Targeting rules
//!
//! A rule set is a conjunction: it matches only if every rule matches.
//! The empty set matches unconditionally.
//!
//! Rule values are either a single string or an array of strings; a rule
//! matches if any listed value matches the request context.
//!
//! | type        | context field | comparison                  |
//! |-------------|---------------|-----------------------------|
//! | `device`    | `device`      | case-insensitive equality   |
//! | `location`  | `location`    | case-insensitive equality   |
//! | `referrer`  | `referrer`    | case-insensitive substring  |
//! | `user_type` | `user_type`   | case-insensitive equality   |
//! | `custom`    | (any)         | named predicate via `key`   |
//!
//! Unrecognized rule types and `custom` rules naming an unregistered
//! predicate match. That permissive default is a product policy pending
//! review; see `DESIGN.md`.

use std::collections::HashMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Kind of targeting rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// Device class (`mobile`, `desktop`, `tablet`, ...)
    Device,
    /// Coarse location (country or region code)
    Location,
    /// Referring URL
    Referrer,
    /// Visitor classification (`guest`, `logged_in`, `returning`, ...)
    UserType,
    /// Caller-supplied named predicate
    Custom,
    /// Any type this engine does not know
    #[serde(other)]
    Unknown,
}

/// One eligibility predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetingRule {
    /// Rule kind
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    /// Predicate name for `custom` rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// String or array of strings
    #[serde(default)]
    pub value: serde_json::Value,
}

impl TargetingRule {
    /// Create a built-in rule.
    #[must_use]
    pub fn new(rule_type: RuleType, value: impl Into<serde_json::Value>) -> Self {
        Self {
            rule_type,
            key: None,
            value: value.into(),
        }
    }

    /// Create a `custom` rule evaluated by the predicate registered as `key`.
    #[must_use]
    pub fn custom(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            rule_type: RuleType::Custom,
            key: Some(key.into()),
            value: value.into(),
        }
    }
}

/// Request facts supplied by the host for targeting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Device class
    pub device: Option<String>,
    /// Coarse location
    pub location: Option<String>,
    /// Referring URL
    pub referrer: Option<String>,
    /// Visitor classification
    pub user_type: Option<String>,
    /// Free-form attributes for custom predicates
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl RequestContext {
    /// Set the device class.
    #[must_use]
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Set the coarse location.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the referring URL.
    #[must_use]
    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    /// Set the visitor classification.
    #[must_use]
    pub fn with_user_type(mut self, user_type: impl Into<String>) -> Self {
        self.user_type = Some(user_type.into());
        self
    }

    /// Add a free-form attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// Signature of a custom targeting predicate: `(rule value, context) -> matches`.
pub type CustomPredicate = dyn Fn(&serde_json::Value, &RequestContext) -> bool + Send + Sync;

/// Evaluates rule sets against a request context.
#[derive(Clone, Default)]
pub struct TargetingEvaluator {
    predicates: FxHashMap<String, Arc<CustomPredicate>>,
}

impl std::fmt::Debug for TargetingEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetingEvaluator")
            .field("predicates", &self.predicates.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TargetingEvaluator {
    /// Create an evaluator with no custom predicates.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the predicate used by `custom` rules with this `key`.
    pub fn register<F>(&mut self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&serde_json::Value, &RequestContext) -> bool + Send + Sync + 'static,
    {
        self.predicates.insert(name.into(), Arc::new(predicate));
    }

    /// Whether every rule matches `context`.
    #[must_use]
    pub fn evaluate(&self, rules: &[TargetingRule], context: &RequestContext) -> bool {
        rules.iter().all(|rule| self.evaluate_rule(rule, context))
    }

    fn evaluate_rule(&self, rule: &TargetingRule, context: &RequestContext) -> bool {
        match rule.rule_type {
            RuleType::Device => equals_any(context.device.as_deref(), &rule.value),
            RuleType::Location => equals_any(context.location.as_deref(), &rule.value),
            RuleType::UserType => equals_any(context.user_type.as_deref(), &rule.value),
            RuleType::Referrer => contains_any(context.referrer.as_deref(), &rule.value),
            RuleType::Custom => {
                let predicate = rule.key.as_deref().and_then(|key| self.predicates.get(key));
                if let Some(predicate) = predicate {
                    predicate(&rule.value, context)
                } else {
                    tracing::debug!(key = ?rule.key, "no predicate registered, custom rule matches");
                    true
                }
            }
            RuleType::Unknown => {
                tracing::warn!("unrecognized targeting rule type, treating as match");
                true
            }
        }
    }
}

fn rule_values(value: &serde_json::Value) -> Vec<&str> {
    match value {
        serde_json::Value::String(s) => vec![s.as_str()],
        serde_json::Value::Array(items) => items.iter().filter_map(serde_json::Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn equals_any(actual: Option<&str>, expected: &serde_json::Value) -> bool {
    actual.is_some_and(|actual| {
        rule_values(expected)
            .into_iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(actual))
    })
}

fn contains_any(actual: Option<&str>, expected: &serde_json::Value) -> bool {
    actual.is_some_and(|actual| {
        let actual = actual.to_ascii_lowercase();
        rule_values(expected)
            .into_iter()
            .any(|needle| actual.contains(&needle.to_ascii_lowercase()))
    })
}
