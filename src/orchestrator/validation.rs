//! Experiment definition checks, run before anything is persisted

use std::collections::HashSet;

use crate::model::{Experiment, ExperimentConfig, Variation, VariationConfig};
use crate::{Error, Result};

/// Tolerance on the "weights total 100" rule, in hundredths of a percent.
const TRAFFIC_TOLERANCE_HUNDREDTHS: f64 = 1.0;

/// Weights must total 0 (split evenly) or 100 ± 0.01.
///
/// Compared in hundredths so that float noise on two-decimal weights
/// (`33.33 * 3 == 99.98999...`) does not push a total out of the band.
pub(crate) fn check_traffic_total(total: f64) -> Result<()> {
    let off_by = ((total * 100.0).round() - 10_000.0).abs();
    if total > 0.0 && off_by > TRAFFIC_TOLERANCE_HUNDREDTHS {
        return Err(Error::validation("Variation traffic must total 100%"));
    }
    Ok(())
}

fn is_percentage(value: f64) -> bool {
    value.is_finite() && (0.0..=100.0).contains(&value)
}

/// Resolved control flags: explicit flags win; with none set, the first
/// variation is control.
pub(crate) fn resolve_controls(variations: &[VariationConfig]) -> Vec<bool> {
    let any_explicit = variations.iter().any(|v| v.is_control == Some(true));
    variations
        .iter()
        .enumerate()
        .map(|(index, v)| {
            if any_explicit {
                v.is_control == Some(true)
            } else {
                index == 0
            }
        })
        .collect()
}

/// Full validation of an authoring config.
pub(crate) fn validate_config(config: &ExperimentConfig) -> Result<()> {
    if config.name.trim().is_empty() {
        return Err(Error::validation("Experiment name is required"));
    }
    if config.variations.len() < 2 {
        return Err(Error::validation("At least 2 variations are required"));
    }
    if config.goals.is_empty() {
        return Err(Error::validation("At least one goal is required"));
    }
    if config
        .variations
        .iter()
        .any(|v| !is_percentage(v.traffic_percentage))
    {
        return Err(Error::validation(
            "Variation traffic percentage must be between 0 and 100",
        ));
    }
    check_traffic_total(config.total_traffic())?;

    if !is_percentage(config.traffic_allocation) {
        return Err(Error::validation("Traffic allocation must be between 0 and 100"));
    }
    if let Some(epsilon) = config.epsilon {
        if !(0.0..=1.0).contains(&epsilon) {
            return Err(Error::validation("Epsilon must be between 0 and 1"));
        }
    }

    let mut keys = HashSet::new();
    for variation in &config.variations {
        if variation.key.trim().is_empty() {
            return Err(Error::validation("Variation key is required"));
        }
        if !keys.insert(variation.key.as_str()) {
            return Err(Error::validation(format!(
                "Duplicate variation key: {}",
                variation.key
            )));
        }
    }

    let mut goal_ids = HashSet::new();
    for goal in &config.goals {
        if goal.id.trim().is_empty() || goal.event.trim().is_empty() {
            return Err(Error::validation("Goal id and event are required"));
        }
        if !goal_ids.insert(goal.id.as_str()) {
            return Err(Error::validation(format!("Duplicate goal id: {}", goal.id)));
        }
    }

    let controls = resolve_controls(&config.variations)
        .into_iter()
        .filter(|is_control| *is_control)
        .count();
    if controls != 1 {
        return Err(Error::validation("Exactly one control variation is required"));
    }
    Ok(())
}

/// Invariants re-checked on `draft -> running`.
pub(crate) fn validate_for_start(experiment: &Experiment, variations: &[Variation]) -> Result<()> {
    if variations.len() < 2 {
        return Err(Error::validation("At least 2 variations are required"));
    }
    if experiment.goals.is_empty() {
        return Err(Error::validation("At least one goal is required"));
    }
    check_traffic_total(variations.iter().map(|v| v.traffic_percentage).sum())
}
