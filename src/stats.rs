//! Two-proportion significance testing
//!
//! Compares the conversion rate of a challenger against the control:
//!
//! ```text
//! p̂  = (c1 + c2) / (n1 + n2)
//! se = sqrt(p̂ (1 - p̂) (1/n1 + 1/n2))
//! z  = (p2 - p1) / se
//! p  = 2 (1 - Φ(|z|))
//! ```
//!
//! Degenerate inputs (no visitors on either side, or `se == 0`) yield a
//! well-formed non-significant result instead of NaN or a panic.
//!
//! References:
//! - Abramowitz & Stegun (1964), formula 26.2.17 for Φ

use serde::{Deserialize, Serialize};

use crate::model::{Variation, VariationStats};

/// Fixed two-tailed significance level.
pub const SIGNIFICANCE_THRESHOLD: f64 = 0.05;

/// Outcome of one two-proportion z-test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignificanceResult {
    /// Standardized difference (challenger minus control)
    pub z_score: f64,
    /// Two-tailed p-value
    pub p_value: f64,
    /// `(1 - p) * 100`
    pub confidence_level: f64,
    /// `p_value < 0.05`
    pub significant: bool,
}

impl SignificanceResult {
    /// Result reported for zero-sample or zero-variance input.
    #[must_use]
    pub const fn not_significant() -> Self {
        Self {
            z_score: 0.0,
            p_value: 1.0,
            confidence_level: 0.0,
            significant: false,
        }
    }
}

/// Significance of an experiment as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Significance {
    /// No unique control variation, or no challenger to compare
    Undecided,
    /// Control vs challenger test result
    Computed(SignificanceResult),
}

impl Significance {
    /// Whether a computed result crossed the threshold. `Undecided` is not significant.
    #[must_use]
    pub const fn is_significant(&self) -> bool {
        match self {
            Self::Undecided => false,
            Self::Computed(result) => result.significant,
        }
    }
}

/// Standard normal CDF.
///
/// Abramowitz-Stegun 26.2.17, absolute error below 7.5e-8.
#[must_use]
pub fn normal_cdf(x: f64) -> f64 {
    if x < 0.0 {
        return 1.0 - normal_cdf(-x);
    }
    let t = 1.0 / (1.0 + 0.231_641_9 * x);
    let density = 0.398_942_280_401_432_7 * (-0.5 * x * x).exp();
    let poly = t
        * (0.319_381_530
            + t * (-0.356_563_782 + t * (1.781_477_937 + t * (-1.821_255_978 + t * 1.330_274_429))));
    1.0 - density * poly
}

/// Two-proportion z-test of `challenger` against `control`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn two_proportion_test(control: VariationStats, challenger: VariationStats) -> SignificanceResult {
    if control.visitors == 0 || challenger.visitors == 0 {
        return SignificanceResult::not_significant();
    }

    let n1 = control.visitors as f64;
    let n2 = challenger.visitors as f64;
    let p1 = control.rate();
    let p2 = challenger.rate();
    let pooled = (control.conversions + challenger.conversions) as f64 / (n1 + n2);
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
    if se == 0.0 || !se.is_finite() {
        return SignificanceResult::not_significant();
    }

    let z_score = (p2 - p1) / se;
    let p_value = (2.0 * (1.0 - normal_cdf(z_score.abs()))).clamp(0.0, 1.0);
    SignificanceResult {
        z_score,
        p_value,
        confidence_level: (1.0 - p_value) * 100.0,
        significant: p_value < SIGNIFICANCE_THRESHOLD,
    }
}

/// The unique control variation, if exactly one is flagged.
#[must_use]
pub fn control_of(variations: &[Variation]) -> Option<&Variation> {
    let mut controls = variations.iter().filter(|v| v.is_control);
    match (controls.next(), controls.next()) {
        (Some(control), None) => Some(control),
        _ => None,
    }
}

/// Experiment-level significance: the control against the last challenger
/// in id order.
#[must_use]
pub fn experiment_significance(variations: &[Variation]) -> Significance {
    let Some(control) = control_of(variations) else {
        return Significance::Undecided;
    };
    let challenger = variations
        .iter()
        .filter(|v| !v.is_control)
        .max_by_key(|v| v.id);
    challenger.map_or(Significance::Undecided, |challenger| {
        Significance::Computed(two_proportion_test(control.stats, challenger.stats))
    })
}

/// Relative lift of the challenger's conversion rate over the control's, in percent.
///
/// `None` when the control rate is zero.
#[must_use]
pub fn improvement(control: VariationStats, challenger: VariationStats) -> Option<f64> {
    let base = control.rate();
    if base == 0.0 {
        return None;
    }
    Some((challenger.rate() - base) / base * 100.0)
}
