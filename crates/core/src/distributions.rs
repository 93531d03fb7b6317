//! Distribution sampling, summary statistics, and KDE (spec §4.1).
//!
//! Sampling routines follow the teacher's `probe.rs` convention of taking
//! an `&mut impl Rng` rather than owning a generator, and the
//! bounded-iteration idiom `strategies/tpe.rs` uses for its Gaussian
//! mixture evaluation reappears here as the KDE evaluator. Gamma/Poisson
//! sampling and the percentile-on-sorted-slice routine are grounded on
//! the reference spreadsheet what-if engine's Monte Carlo module.

use crate::model::Distribution;
use rand::Rng;
use rand_distr::{Distribution as RandDistribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// Smallest standard deviation the engine will treat as non-degenerate;
/// anything smaller is floored here so KDE bandwidth and percentile math
/// never divide by (near) zero.
const MIN_STD_DEV: f64 = 1e-6;

/// Draw `n` independent samples from `dist`.
pub fn sample(dist: &Distribution, n: usize, rng: &mut impl Rng) -> Vec<f64> {
    (0..n).map(|_| sample_one(dist, rng)).collect()
}

fn sample_one(dist: &Distribution, rng: &mut impl Rng) -> f64 {
    match *dist {
        Distribution::Binary { p } => {
            let p = p.clamp(0.0, 1.0);
            if rng.random::<f64>() < p {
                1.0
            } else {
                0.0
            }
        }
        Distribution::Categorical { ref probs } => sample_categorical(probs, rng),
        Distribution::Normal { mean, std_dev } => {
            mean + std_dev.max(MIN_STD_DEV) * standard_normal(rng)
        }
        Distribution::Lognormal { mean, std_dev } => {
            (mean + std_dev.max(MIN_STD_DEV) * standard_normal(rng)).exp()
        }
        Distribution::Beta { alpha, beta } => sample_beta(alpha.max(1e-3), beta.max(1e-3), rng),
        Distribution::Gamma { shape, rate } => sample_gamma(shape.max(1e-3), rate.max(1e-6), rng),
        Distribution::Bounded { min, max, mode } => sample_bounded(min, max, mode, rng),
        Distribution::Count { lambda } => sample_poisson(lambda.max(0.0), rng),
        Distribution::Rate { alpha, beta } => sample_beta(alpha.max(1e-3), beta.max(1e-3), rng),
    }
}

fn standard_normal(rng: &mut impl Rng) -> f64 {
    StandardNormal.sample(rng)
}

fn sample_categorical(probs: &[f64], rng: &mut impl Rng) -> f64 {
    if probs.is_empty() {
        return 0.0;
    }
    let total: f64 = probs.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let draw = rng.random::<f64>() * total;
    let mut cumulative = 0.0;
    for (k, p) in probs.iter().enumerate() {
        cumulative += p;
        if draw < cumulative {
            return k as f64;
        }
    }
    (probs.len() - 1) as f64
}

/// Marsaglia-Tsang for shape >= 1; for shape < 1 boost via Gamma(shape+1)
/// scaled by U^(1/shape), the standard reparameterization.
fn sample_gamma(shape: f64, rate: f64, rng: &mut impl Rng) -> f64 {
    if shape < 1.0 {
        let boosted = sample_gamma(shape + 1.0, 1.0, rng);
        let u: f64 = rng.random::<f64>().max(1e-12);
        return boosted * u.powf(1.0 / shape) / rate;
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();

    for _ in 0..64 {
        let mut x;
        let mut v;
        loop {
            x = standard_normal(rng);
            v = 1.0 + c * x;
            if v > 0.0 {
                break;
            }
        }
        v = v * v * v;
        let u: f64 = rng.random();
        if u < 1.0 - 0.0331 * x * x * x * x {
            return d * v / rate;
        }
        if u.ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
            return d * v / rate;
        }
    }
    tracing::warn!(shape, rate, "gamma rejection sampler exhausted its iteration budget; falling back to the analytic mean");
    shape / rate
}

/// Beta via the ratio of two Gammas, which is exact and avoids the
/// rejection loops some Johnk-style samplers need near alpha/beta < 1.
fn sample_beta(alpha: f64, beta: f64, rng: &mut impl Rng) -> f64 {
    let x = sample_gamma(alpha, 1.0, rng);
    let y = sample_gamma(beta, 1.0, rng);
    if x + y <= 0.0 {
        0.5
    } else {
        x / (x + y)
    }
}

/// PERT distribution reparameterized as a scaled Beta with shape
/// parameters derived from min/max/mode (lambda = 4, the standard PERT
/// shape constant).
fn sample_bounded(min: f64, max: f64, mode: f64, rng: &mut impl Rng) -> f64 {
    if max <= min {
        return min;
    }
    let mode = mode.clamp(min, max);
    let range = max - min;
    let lambda = 4.0;
    let alpha = 1.0 + lambda * (mode - min) / range;
    let beta = 1.0 + lambda * (max - mode) / range;
    min + sample_beta(alpha, beta, rng) * range
}

/// Direct enumeration (Knuth's algorithm) for lambda < 30; normal
/// approximation with continuity correction above that, where the direct
/// product-of-uniforms loop would underflow too often to stay accurate.
fn sample_poisson(lambda: f64, rng: &mut impl Rng) -> f64 {
    if lambda <= 0.0 {
        return 0.0;
    }
    if lambda < 30.0 {
        let l = (-lambda).exp();
        let mut k = 0.0;
        let mut p = 1.0;
        loop {
            k += 1.0;
            p *= rng.random::<f64>();
            if p <= l {
                break;
            }
        }
        k - 1.0
    } else {
        let draw = lambda + lambda.sqrt() * standard_normal(rng);
        draw.round().max(0.0)
    }
}

/// Analytic mean, used as the circuit-breaker prior-weight reversion
/// target and as the KDE fallback when a node has zero usable samples.
pub fn mean(dist: &Distribution) -> f64 {
    match *dist {
        Distribution::Binary { p } => p.clamp(0.0, 1.0),
        Distribution::Categorical { ref probs } => {
            let total: f64 = probs.iter().sum();
            if total <= 0.0 {
                0.0
            } else {
                probs.iter().enumerate().map(|(k, p)| k as f64 * p).sum::<f64>() / total
            }
        }
        Distribution::Normal { mean, .. } => mean,
        Distribution::Lognormal { mean, std_dev } => (mean + std_dev * std_dev / 2.0).exp(),
        Distribution::Beta { alpha, beta } => alpha / (alpha + beta),
        Distribution::Gamma { shape, rate } => shape / rate,
        Distribution::Bounded { min, max, mode } => (min + 4.0 * mode + max) / 6.0,
        Distribution::Count { lambda } => lambda,
        Distribution::Rate { alpha, beta } => alpha / (alpha + beta),
    }
}

/// Analytic standard deviation, floored at [`MIN_STD_DEV`].
pub fn stddev(dist: &Distribution) -> f64 {
    let raw = match *dist {
        Distribution::Binary { p } => {
            let p = p.clamp(0.0, 1.0);
            (p * (1.0 - p)).sqrt()
        }
        Distribution::Categorical { ref probs } => {
            let total: f64 = probs.iter().sum();
            if total <= 0.0 {
                0.0
            } else {
                let m = mean(dist);
                let var = probs
                    .iter()
                    .enumerate()
                    .map(|(k, p)| p * (k as f64 - m).powi(2))
                    .sum::<f64>()
                    / total;
                var.sqrt()
            }
        }
        Distribution::Normal { std_dev, .. } => std_dev,
        Distribution::Lognormal { mean: m, std_dev } => {
            let var = (std_dev * std_dev).exp_m1() * (2.0 * m + std_dev * std_dev).exp();
            var.max(0.0).sqrt()
        }
        Distribution::Beta { alpha, beta } => {
            let sum = alpha + beta;
            ((alpha * beta) / (sum * sum * (sum + 1.0))).sqrt()
        }
        Distribution::Gamma { shape, rate } => shape.sqrt() / rate,
        Distribution::Bounded { min, max, .. } => (max - min) / 6.0,
        Distribution::Count { lambda } => lambda.sqrt(),
        Distribution::Rate { alpha, beta } => {
            let sum = alpha + beta;
            ((alpha * beta) / (sum * sum * (sum + 1.0))).sqrt()
        }
    };
    raw.max(MIN_STD_DEV)
}

/// KDE-smoothed distribution summary returned from a propagation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionSummary {
    pub mean: f64,
    pub std_dev: f64,
    pub p05: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    /// `(x, density)` pairs, `kde_point_count + 1` points wide.
    pub kde: Vec<(f64, f64)>,
}

/// Build a [`DistributionSummary`] from raw samples per spec §4.1:
/// discard non-finite samples, compute mean/stddev (floored at the
/// documented minima), derive a Silverman bandwidth, evaluate a Gaussian
/// KDE across `[min - 2*sigma, max + 2*sigma]`, and read percentiles off
/// the sorted sample slice.
pub fn samples_to_kde(samples: &[f64], num_points: usize) -> DistributionSummary {
    let mut sorted: Vec<f64> = samples.iter().copied().filter(|x| x.is_finite()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    if sorted.is_empty() {
        return DistributionSummary {
            mean: 0.0,
            std_dev: 1.0,
            p05: 0.0,
            p25: 0.0,
            p50: 0.0,
            p75: 0.0,
            p95: 0.0,
            kde: vec![(0.0, 1.0)],
        };
    }

    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt().max(1.0);

    let q1 = percentile(&sorted, 0.25);
    let q3 = percentile(&sorted, 0.75);
    let iqr = (q3 - q1).max(0.0);

    let spread = if iqr > 0.0 {
        std_dev.min(iqr / 1.34)
    } else {
        std_dev
    };
    let bandwidth = (0.9 * spread * n.powf(-1.0 / 5.0)).max(0.01);

    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    let lo = min - 2.0 * std_dev;
    let hi = max + 2.0 * std_dev;
    let span = (hi - lo).max(1e-9);

    let kde = (0..=num_points)
        .map(|i| {
            let x = lo + span * (i as f64) / (num_points as f64);
            let density = gaussian_kde_at(&sorted, x, bandwidth);
            (x, density)
        })
        .collect();

    DistributionSummary {
        mean,
        std_dev,
        p05: percentile(&sorted, 0.05),
        p25: q1,
        p50: percentile(&sorted, 0.5),
        p75: q3,
        p95: percentile(&sorted, 0.95),
        kde,
    }
}

fn gaussian_kde_at(sorted: &[f64], x: f64, bandwidth: f64) -> f64 {
    let n = sorted.len() as f64;
    let norm = 1.0 / (bandwidth * (2.0 * std::f64::consts::PI).sqrt());
    let sum: f64 = sorted
        .iter()
        .map(|&xi| {
            let z = (x - xi) / bandwidth;
            (-0.5 * z * z).exp()
        })
        .sum();
    norm * sum / n
}

/// Index `floor(n * p)` into a pre-sorted slice, clamped to the last
/// valid index.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    let idx = ((n as f64) * p).floor() as usize;
    sorted[idx.min(n - 1)]
}
