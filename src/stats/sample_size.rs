//! Sample-size planning for two-proportion tests

use serde::{Deserialize, Serialize};

use super::distribution::normal_quantile;
use crate::{Error, Result};

/// Inputs to [`calculate_required_sample_size`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleSizeParams {
    /// Control conversion rate, in (0, 1).
    pub baseline_rate: f64,
    /// Absolute lift to detect, e.g. 0.05 for 10% -> 15%.
    pub minimum_detectable_effect: f64,
    /// Two-sided significance level.
    pub alpha: f64,
    /// Probability of detecting the effect if it exists.
    pub power: f64,
}

impl Default for SampleSizeParams {
    fn default() -> Self {
        Self {
            baseline_rate: 0.1,
            minimum_detectable_effect: 0.05,
            alpha: 0.05,
            power: 0.8,
        }
    }
}

fn open_unit(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("{name} must be in (0, 1), got {value}")))
    }
}

/// Per-arm sample size for a two-sided two-proportion z-test.
///
/// ```text
///       (z₁₋α/₂ · √(2·p̄·q̄) + z₁₋β · √(p₁q₁ + p₂q₂))²
/// n  =  ─────────────────────────────────────────────
///                        (p₂ − p₁)²
/// ```
///
/// where `p₂ = p₁ + mde` and `p̄ = (p₁ + p₂) / 2`.
///
/// # Errors
///
/// Returns `InvalidInput` if any rate or probability is outside (0, 1),
/// the effect is not positive, or `baseline + effect` exceeds 1.
///
/// # Example
///
/// ```rust
/// use trueno_ab::stats::{calculate_required_sample_size, SampleSizeParams};
///
/// let n = calculate_required_sample_size(&SampleSizeParams {
///     baseline_rate: 0.1,
///     minimum_detectable_effect: 0.05,
///     alpha: 0.05,
///     power: 0.8,
/// })?;
/// assert!((600..800).contains(&n));
/// # Ok::<(), trueno_ab::Error>(())
/// ```
pub fn calculate_required_sample_size(params: &SampleSizeParams) -> Result<u64> {
    open_unit("baseline_rate", params.baseline_rate)?;
    open_unit("alpha", params.alpha)?;
    open_unit("power", params.power)?;

    let effect = params.minimum_detectable_effect;
    if !(effect.is_finite() && effect > 0.0) {
        return Err(Error::InvalidInput(format!(
            "minimum_detectable_effect must be positive, got {effect}"
        )));
    }

    let p1 = params.baseline_rate;
    let p2 = p1 + effect;
    if p2 >= 1.0 {
        return Err(Error::InvalidInput(format!(
            "baseline_rate + minimum_detectable_effect must stay below 1, got {p2}"
        )));
    }

    let z_alpha = normal_quantile(1.0 - params.alpha / 2.0);
    let z_beta = normal_quantile(params.power);
    let p_bar = (p1 + p2) / 2.0;

    let numerator = z_alpha * (2.0 * p_bar * (1.0 - p_bar)).sqrt()
        + z_beta * (p1 * (1.0 - p1) + p2 * (1.0 - p2)).sqrt();
    let n = (numerator * numerator) / (effect * effect);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let per_arm = n.ceil() as u64;
    Ok(per_arm.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_textbook_magnitude() {
        // 10% -> 15%, alpha 0.05, power 0.8: ≈ 686 per arm
        let n = calculate_required_sample_size(&SampleSizeParams::default()).unwrap();
        assert!((680..=690).contains(&n), "got {n}");
    }

    #[test]
    fn test_smaller_effect_needs_more_samples() {
        let big = calculate_required_sample_size(&SampleSizeParams::default()).unwrap();
        let small = calculate_required_sample_size(&SampleSizeParams {
            minimum_detectable_effect: 0.01,
            ..SampleSizeParams::default()
        })
        .unwrap();
        assert!(small > big * 10);
    }

    #[test]
    fn test_higher_power_needs_more_samples() {
        let base = calculate_required_sample_size(&SampleSizeParams::default()).unwrap();
        let strict = calculate_required_sample_size(&SampleSizeParams {
            power: 0.95,
            ..SampleSizeParams::default()
        })
        .unwrap();
        assert!(strict > base);
    }

    #[test]
    fn test_rejects_invalid_params() {
        let bad = [
            SampleSizeParams { baseline_rate: 0.0, ..SampleSizeParams::default() },
            SampleSizeParams { alpha: 1.0, ..SampleSizeParams::default() },
            SampleSizeParams { power: -0.2, ..SampleSizeParams::default() },
            SampleSizeParams { minimum_detectable_effect: 0.0, ..SampleSizeParams::default() },
            SampleSizeParams { baseline_rate: 0.97, ..SampleSizeParams::default() },
        ];
        for params in bad {
            assert!(matches!(
                calculate_required_sample_size(&params),
                Err(Error::InvalidInput(_))
            ));
        }
    }
}
