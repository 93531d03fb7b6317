//! Effect kernels (spec §4.2).
//!
//! Each kernel is a pure function of `(base_value, parent_value,
//! parent_prior_mean)`; non-finite inputs pass `base_value` straight
//! through, and a non-finite result falls back to `base_value` too — the
//! same defensive-clamp idiom the teacher's `safety_executor::clamp_to_bounds`
//! uses for guardrail violations, generalized to per-sample numeric guards.

use crate::model::Effect;

fn clamp_multiplier(m: f64, min: f64, max: f64) -> f64 {
    m.clamp(min, max)
}

fn guard(base_value: f64, parent_value: f64, parent_prior_mean: f64) -> Option<f64> {
    if !base_value.is_finite() || !parent_value.is_finite() || !parent_prior_mean.is_finite() {
        Some(base_value)
    } else {
        None
    }
}

/// Apply one edge's effect to a single child base-sample.
pub fn apply_effect(
    base_value: f64,
    effect: &Effect,
    parent_value: f64,
    parent_prior_mean: f64,
    min_clamp: f64,
    max_clamp: f64,
) -> f64 {
    if let Some(passthrough) = guard(base_value, parent_value, parent_prior_mean) {
        return passthrough;
    }

    let result = match *effect {
        Effect::Linear {
            coefficient,
            intercept,
            saturation,
        } => linear(
            base_value,
            coefficient,
            intercept,
            saturation,
            parent_value,
            parent_prior_mean,
            min_clamp,
            max_clamp,
        ),
        Effect::Multiplicative { factor, baseline } => {
            multiplicative(base_value, factor, baseline, parent_value, min_clamp, max_clamp)
        }
        Effect::Threshold {
            cutoff,
            below,
            above,
            smoothness,
        } => threshold(
            base_value, cutoff, below, above, smoothness, parent_value, min_clamp, max_clamp,
        ),
        Effect::Logistic {
            coefficient,
            threshold,
        } => logistic(base_value, coefficient, threshold, parent_value),
    };

    if result.is_finite() {
        result
    } else {
        base_value
    }
}

#[allow(clippy::too_many_arguments)]
fn linear(
    base_value: f64,
    coefficient: f64,
    intercept: f64,
    saturation: Option<f64>,
    parent_value: f64,
    parent_prior_mean: f64,
    min_clamp: f64,
    max_clamp: f64,
) -> f64 {
    let base_with_intercept = base_value + intercept;

    if parent_prior_mean.abs() < 0.001 {
        return base_with_intercept + coefficient * parent_value * 0.01;
    }

    let mut deviation = (parent_value - parent_prior_mean) / parent_prior_mean;
    if let Some(saturation) = saturation {
        if saturation > 0.0 {
            deviation = saturation * (deviation / saturation).tanh();
        }
    }

    let multiplier = clamp_multiplier(1.0 + coefficient * deviation, min_clamp, max_clamp);
    base_with_intercept * multiplier
}

fn multiplicative(
    base_value: f64,
    factor: f64,
    baseline: f64,
    parent_value: f64,
    min_clamp: f64,
    max_clamp: f64,
) -> f64 {
    if parent_value <= 0.0 || baseline <= 0.0 {
        return base_value;
    }
    let doublings = (parent_value / baseline).log2();
    let multiplier = clamp_multiplier(factor.powf(doublings), min_clamp, max_clamp);
    base_value * multiplier
}

#[allow(clippy::too_many_arguments)]
fn threshold(
    base_value: f64,
    cutoff: f64,
    below: f64,
    above: f64,
    smoothness: f64,
    parent_value: f64,
    min_clamp: f64,
    max_clamp: f64,
) -> f64 {
    let w = 1.0 / (1.0 + (-smoothness * (parent_value - cutoff)).exp());
    let eff_coef = below * (1.0 - w) + above * w;
    let deviation = (parent_value - cutoff) / cutoff.abs().max(1.0);
    let multiplier = clamp_multiplier(1.0 + eff_coef * deviation, min_clamp, max_clamp);
    base_value * multiplier
}

fn logistic(base_value: f64, coefficient: f64, threshold: f64, parent_value: f64) -> f64 {
    let p_clamped = base_value.clamp(0.001, 0.999);
    let logit = (p_clamped / (1.0 - p_clamped)).ln();
    let new_logit = (logit + coefficient * (parent_value - threshold)).clamp(-10.0, 10.0);
    1.0 / (1.0 + (-new_logit).exp())
}
