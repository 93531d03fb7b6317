//! Sensitivity analysis: perturb each exogenous node and measure the
//! effect on every downstream node, then classify and locate bottlenecks
//! (spec §4.4, report shape spec §6.3).
//!
//! The perturb-and-compare structure mirrors the teacher's
//! `strategies/multi_start_nm.rs`, which restarts the same evaluation
//! from several starting points and compares outcomes; here the
//! "restarts" are fixed multipliers applied to one exogenous node at a
//! time rather than different initial guesses.

use crate::config::EngineConfig;
use crate::model::Model;
use crate::propagate::{propagate, Interventions};
use crate::rng::{child_seed, rng_for};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Multipliers applied to each exogenous node's baseline mean in turn;
/// the first two are "decrease", the last two "increase" (spec §4.4 step 3).
pub const PERTURBATION_MULTIPLIERS: [f64; 4] = [0.5, 0.75, 1.25, 1.5];

const STRONG_THRESHOLD_PCT: f64 = 5.0;
const WEAK_THRESHOLD_PCT: f64 = 1.0;
const ASYMMETRY_RATIO: f64 = 2.0;
const BOTTLENECK_TERMINAL_PCT: f64 = 10.0;
const BOTTLENECK_SUSPECT_PCT: f64 = 5.0;
const SUMMARY_LIST_CAP: usize = 10;

/// One downstream node's response to a single perturbed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownstreamImpact {
    pub node_id: String,
    pub node_label: String,
    pub baseline: f64,
    pub intervened: f64,
    pub absolute_change: f64,
    pub pct_change: f64,
    pub units: Option<String>,
}

/// All downstream impacts from intervening on one exogenous node at one multiplier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiplierRun {
    pub multiplier: f64,
    pub impacts: Vec<DownstreamImpact>,
}

/// Every perturbation run for a single exogenous node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExogenousResult {
    pub node_id: String,
    pub multipliers: Vec<MultiplierRun>,
}

/// A classified (source, target) pair surfaced in the report's summary lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectSummaryEntry {
    pub source_id: String,
    pub target_id: String,
    pub avg_increase_pct: f64,
    pub avg_decrease_pct: f64,
    pub overall_pct: f64,
}

/// A terminal node whose response to a 50% increase on `source_id` is too
/// small to explain as direct propagation (spec §4.4 step 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BottleneckWarning {
    pub source_id: String,
    pub terminal_id: String,
    pub terminal_pct_change: f64,
    pub suspected_bottleneck: Option<String>,
    pub suspected_bottleneck_pct_change: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivitySummary {
    pub strong_effects: Vec<EffectSummaryEntry>,
    pub weak_effects: Vec<EffectSummaryEntry>,
    pub asymmetric_effects: Vec<EffectSummaryEntry>,
    pub bottlenecks: Vec<BottleneckWarning>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityReport {
    pub model_title: String,
    /// ISO-8601, stamped by the caller (core stays pure — see `analyze_at`).
    pub timestamp: String,
    pub sample_count: usize,
    pub results: Vec<ExogenousResult>,
    pub summary: SensitivitySummary,
}

/// Node ids reachable from `start` by forward edge traversal (BFS over
/// `model.out_edges`), excluding `start` itself.
fn reachable_from(model: &Model, start: &str) -> Vec<String> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    visited.insert(start.to_string());
    queue.push_back(start.to_string());
    let mut reachable = Vec::new();

    while let Some(id) = queue.pop_front() {
        for edge in model.out_edges(&id) {
            if visited.insert(edge.target.clone()) {
                reachable.push(edge.target.clone());
                queue.push_back(edge.target.clone());
            }
        }
    }

    reachable
}

fn node_label(model: &Model, id: &str) -> String {
    model.node(id).map(|n| n.label.clone()).unwrap_or_default()
}

fn node_units(model: &Model, id: &str) -> Option<String> {
    model.node(id).and_then(|n| n.units.clone())
}

fn pct_change(baseline: f64, intervened: f64) -> f64 {
    if baseline == 0.0 {
        0.0
    } else {
        ((intervened - baseline) / baseline.abs()) * 100.0
    }
}

/// Run the full sensitivity procedure of spec §4.4: a baseline
/// propagation, four perturbed propagations per exogenous node, and the
/// strong/weak/asymmetric/bottleneck classification over the results.
/// `timestamp` is supplied by the caller (ISO-8601) since the core has no
/// wall-clock access of its own.
#[tracing::instrument(skip(model, config, timestamp), fields(nodes = model.nodes.len()))]
pub fn analyze(
    model: &Model,
    config: &EngineConfig,
    rng_seed: u64,
    timestamp: impl Into<String>,
) -> Result<SensitivityReport, crate::error::ScmError> {
    tracing::info!(model = %model.title, "running sensitivity analysis");
    let mut baseline_rng = rng_for(rng_seed);
    let baseline_result = propagate(model, config, &Interventions::new(), &mut baseline_rng)?;
    let baseline_means: HashMap<String, f64> = baseline_result
        .summaries
        .iter()
        .map(|(id, s)| (id.clone(), s.mean))
        .collect();

    let exogenous_ids: Vec<String> = model
        .nodes
        .iter()
        .filter(|n| n.kind.is_exogenous())
        .map(|n| n.id.clone())
        .collect();

    let mut results = Vec::with_capacity(exogenous_ids.len());
    // (source, target) -> per-multiplier |pct change|, indexed like PERTURBATION_MULTIPLIERS.
    let mut pair_pct: HashMap<(String, String), Vec<f64>> = HashMap::new();
    let mut bottlenecks = Vec::new();

    for (exo_index, exo_id) in exogenous_ids.iter().enumerate() {
        let exo_node = model.node(exo_id).expect("exogenous id came from model.nodes");
        let baseline_exo_mean = crate::distributions::mean(&exo_node.distribution);
        let downstream = reachable_from(model, exo_id);

        let mut multipliers = Vec::with_capacity(PERTURBATION_MULTIPLIERS.len());
        let mut last_multiplier_impacts: Vec<DownstreamImpact> = Vec::new();

        for (mult_index, &multiplier) in PERTURBATION_MULTIPLIERS.iter().enumerate() {
            let seed = child_seed(rng_seed, (exo_index * PERTURBATION_MULTIPLIERS.len() + mult_index) as u64);
            let mut rng = rng_for(seed);
            let mut interventions = Interventions::new();
            interventions.insert(exo_id.clone(), baseline_exo_mean * multiplier);
            let perturbed = propagate(model, config, &interventions, &mut rng)?;

            let impacts: Vec<DownstreamImpact> = downstream
                .iter()
                .map(|node_id| {
                    let baseline = *baseline_means.get(node_id).unwrap_or(&0.0);
                    let intervened = perturbed.summary(node_id).map(|s| s.mean).unwrap_or(0.0);
                    let absolute_change = intervened - baseline;
                    let pct = pct_change(baseline, intervened);

                    pair_pct
                        .entry((exo_id.clone(), node_id.clone()))
                        .or_insert_with(|| vec![0.0; PERTURBATION_MULTIPLIERS.len()])[mult_index] = pct.abs();

                    DownstreamImpact {
                        node_id: node_id.clone(),
                        node_label: node_label(model, node_id),
                        baseline,
                        intervened,
                        absolute_change,
                        pct_change: pct,
                        units: node_units(model, node_id),
                    }
                })
                .collect();

            if (multiplier - 1.5).abs() < 1e-9 {
                last_multiplier_impacts = impacts.clone();
            }

            multipliers.push(MultiplierRun { multiplier, impacts });
        }

        // Bottleneck detection runs only against the m=1.5 perturbation.
        let terminal_impacts: Vec<&DownstreamImpact> = last_multiplier_impacts
            .iter()
            .filter(|i| model.is_terminal(&i.node_id))
            .collect();
        let non_terminal_impacts: Vec<&DownstreamImpact> = last_multiplier_impacts
            .iter()
            .filter(|i| !model.is_terminal(&i.node_id))
            .collect();

        for terminal in &terminal_impacts {
            if terminal.pct_change.abs() < BOTTLENECK_TERMINAL_PCT {
                let smallest = non_terminal_impacts
                    .iter()
                    .min_by(|a, b| a.pct_change.abs().partial_cmp(&b.pct_change.abs()).unwrap());
                let (suspected, suspected_pct) = match smallest {
                    Some(s) if s.pct_change.abs() < BOTTLENECK_SUSPECT_PCT => {
                        (Some(s.node_id.clone()), Some(s.pct_change))
                    }
                    _ => (None, None),
                };
                bottlenecks.push(BottleneckWarning {
                    source_id: exo_id.clone(),
                    terminal_id: terminal.node_id.clone(),
                    terminal_pct_change: terminal.pct_change,
                    suspected_bottleneck: suspected,
                    suspected_bottleneck_pct_change: suspected_pct,
                });
            }
        }

        results.push(ExogenousResult {
            node_id: exo_id.clone(),
            multipliers,
        });
    }

    let mut strong_effects = Vec::new();
    let mut weak_effects = Vec::new();
    let mut asymmetric_effects = Vec::new();

    for ((source_id, target_id), pcts) in pair_pct {
        // Index 0,1 are the "decrease" multipliers (0.5, 0.75); 2,3 are "increase" (1.25, 1.5).
        let avg_decrease_pct = (pcts[0] + pcts[1]) / 2.0;
        let avg_increase_pct = (pcts[2] + pcts[3]) / 2.0;
        let overall_pct = (avg_increase_pct + avg_decrease_pct) / 2.0;

        let entry = EffectSummaryEntry {
            source_id: source_id.clone(),
            target_id: target_id.clone(),
            avg_increase_pct,
            avg_decrease_pct,
            overall_pct,
        };

        if overall_pct > STRONG_THRESHOLD_PCT {
            strong_effects.push(entry.clone());
        } else if overall_pct < WEAK_THRESHOLD_PCT {
            weak_effects.push(entry.clone());
        }

        if avg_increase_pct > 0.0 && avg_decrease_pct > 0.0 {
            let (larger, smaller) = if avg_increase_pct >= avg_decrease_pct {
                (avg_increase_pct, avg_decrease_pct)
            } else {
                (avg_decrease_pct, avg_increase_pct)
            };
            if larger / smaller > ASYMMETRY_RATIO {
                asymmetric_effects.push(entry);
            }
        }
    }

    strong_effects.sort_by(|a, b| b.overall_pct.partial_cmp(&a.overall_pct).unwrap());
    weak_effects.sort_by(|a, b| a.overall_pct.partial_cmp(&b.overall_pct).unwrap());
    asymmetric_effects.sort_by(|a, b| b.overall_pct.partial_cmp(&a.overall_pct).unwrap());
    strong_effects.truncate(SUMMARY_LIST_CAP);
    weak_effects.truncate(SUMMARY_LIST_CAP);
    asymmetric_effects.truncate(SUMMARY_LIST_CAP);

    Ok(SensitivityReport {
        model_title: model.title.clone(),
        timestamp: timestamp.into(),
        sample_count: config.effective_sample_count(),
        results,
        summary: SensitivitySummary {
            strong_effects,
            weak_effects,
            asymmetric_effects,
            bottlenecks,
        },
    })
}
