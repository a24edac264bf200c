//! Multivariate variation generation
//!
//! Each page element offers alternative change payloads; a multivariate
//! experiment gets one variation per combination (the cartesian product),
//! with traffic split evenly. The first combination is the control.

use crate::model::VariationConfig;

/// Cartesian product of per-element alternatives, first element varying slowest.
///
/// Empty input, or any element with no alternatives, yields no combinations.
///
/// ```rust
/// use serde_json::json;
/// use trueno_ab::multivariate::combinations;
///
/// let combos = combinations(&[
///     vec![json!("red"), json!("blue")],
///     vec![json!("short"), json!("long"), json!("none")],
/// ]);
/// assert_eq!(combos.len(), 6);
/// assert_eq!(combos[1], vec![json!("red"), json!("long")]);
/// ```
#[must_use]
pub fn combinations(elements: &[Vec<serde_json::Value>]) -> Vec<Vec<serde_json::Value>> {
    if elements.is_empty() || elements.iter().any(Vec::is_empty) {
        return Vec::new();
    }
    elements.iter().fold(vec![Vec::new()], |acc, options| {
        acc.iter()
            .flat_map(|prefix| {
                options.iter().map(move |option| {
                    let mut combo = prefix.clone();
                    combo.push(option.clone());
                    combo
                })
            })
            .collect()
    })
}

/// One variation per combination: keys `combo_<i>`, names `Combination <i+1>`,
/// equal weights, first is control.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn multivariate_variations(elements: &[Vec<serde_json::Value>]) -> Vec<VariationConfig> {
    let combos = combinations(elements);
    let weight = if combos.is_empty() {
        0.0
    } else {
        100.0 / combos.len() as f64
    };
    combos
        .into_iter()
        .enumerate()
        .map(|(index, combo)| {
            VariationConfig::new(format!("combo_{index}"), format!("Combination {}", index + 1))
                .changes(serde_json::Value::Array(combo))
                .traffic_percentage(weight)
                .control(index == 0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_elements() {
        assert!(combinations(&[]).is_empty());
        assert!(combinations(&[vec![json!(1)], vec![]]).is_empty());
    }

    #[test]
    fn test_single_element() {
        let combos = combinations(&[vec![json!("a"), json!("b")]]);
        assert_eq!(combos, vec![vec![json!("a")], vec![json!("b")]]);
    }

    #[test]
    fn test_variations_split_evenly() {
        let variations = multivariate_variations(&[
            vec![json!({"headline": "A"}), json!({"headline": "B"})],
            vec![json!({"cta": "Go"}), json!({"cta": "Start"}), json!({"cta": "Try"})],
        ]);

        assert_eq!(variations.len(), 6);
        assert_eq!(variations[0].key, "combo_0");
        assert_eq!(variations[5].name, "Combination 6");
        assert_eq!(variations[0].is_control, Some(true));
        assert!(variations[1..].iter().all(|v| v.is_control == Some(false)));

        let total: f64 = variations.iter().map(|v| v.traffic_percentage).sum();
        assert!((total - 100.0).abs() <= 0.01);
    }
}
