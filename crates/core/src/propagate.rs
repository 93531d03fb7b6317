//! Topological propagation through the causal graph (spec §4.3, §5).
//!
//! Kahn's algorithm orders nodes so every parent is fully sampled before
//! a child reads it; the teacher's `machine.rs` state-stepping loop is
//! the structural ancestor of the per-node sample loop below, with the
//! optimizer's "propose, evaluate, accept" steps replaced by "sample,
//! combine parent effects, clamp".

use crate::config::EngineConfig;
use crate::distributions::{mean as dist_mean, sample, samples_to_kde, DistributionSummary};
use crate::effects::apply_effect;
use crate::error::ScmError;
use crate::model::{Model, Node, NodeKind};
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};

/// An override fixing a node's distribution to a constant value for
/// every sample in the run (spec §5.2: "intervene" / do-operator).
pub type Interventions = HashMap<String, f64>;

/// Per-node raw sample vectors plus their KDE-smoothed summaries.
#[derive(Debug, Clone)]
pub struct PropagationResult {
    pub order: Vec<String>,
    pub samples: HashMap<String, Vec<f64>>,
    pub summaries: HashMap<String, DistributionSummary>,
}

impl PropagationResult {
    pub fn summary(&self, node_id: &str) -> Option<&DistributionSummary> {
        self.summaries.get(node_id)
    }
}

/// Topologically sort `model`'s nodes via Kahn's algorithm. A cycle, or
/// an edge naming a node absent from `model.nodes`, is the only failure
/// mode surfaced as an error (spec §7: structural faults only).
pub fn topological_order(model: &Model) -> Result<Vec<String>, ScmError> {
    let index = model.node_index();
    for edge in &model.edges {
        if !index.contains_key(edge.source.as_str()) {
            return Err(ScmError::UnknownEdgeEndpoint {
                source: edge.source.clone(),
                target: edge.target.clone(),
                node: edge.source.clone(),
            });
        }
        if !index.contains_key(edge.target.as_str()) {
            return Err(ScmError::UnknownEdgeEndpoint {
                source: edge.source.clone(),
                target: edge.target.clone(),
                node: edge.target.clone(),
            });
        }
    }

    let mut seen = HashSet::new();
    for node in &model.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(ScmError::DuplicateNodeId { id: node.id.clone() });
        }
    }

    let mut in_degree: HashMap<&str, usize> = model.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    for edge in &model.edges {
        *in_degree.get_mut(edge.target.as_str()).unwrap() += 1;
    }

    let mut queue: VecDeque<&str> = model
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree[id] == 0)
        .collect();

    let mut order = Vec::with_capacity(model.nodes.len());
    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        for edge in model.out_edges(id) {
            let degree = in_degree.get_mut(edge.target.as_str()).unwrap();
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(edge.target.as_str());
            }
        }
    }

    if order.len() != model.nodes.len() {
        let visited: HashSet<&str> = order.iter().map(|s| s.as_str()).collect();
        let unvisited = model
            .nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| !visited.contains(id))
            .map(|s| s.to_string())
            .collect();
        return Err(ScmError::CycleDetected { unvisited });
    }

    Ok(order)
}

/// Run the full Monte Carlo propagation: sample every exogenous node,
/// then walk the topological order combining parent effects into each
/// endogenous node's base samples, applying circuit breakers last.
#[tracing::instrument(skip(model, config, interventions, rng), fields(nodes = model.nodes.len(), edges = model.edges.len()))]
pub fn propagate(
    model: &Model,
    config: &EngineConfig,
    interventions: &Interventions,
    rng: &mut impl Rng,
) -> Result<PropagationResult, ScmError> {
    config.validate()?;
    let order = topological_order(model)?;
    let n = config.effective_sample_count();
    let index = model.node_index();

    for target in interventions.keys() {
        if !index.contains_key(target.as_str()) {
            tracing::warn!(node = %target, "intervention targets a node absent from the model; ignoring");
        }
    }

    let mut samples: HashMap<String, Vec<f64>> = HashMap::with_capacity(order.len());
    let mut prior_means: HashMap<String, f64> = HashMap::with_capacity(order.len());

    for id in &order {
        let node = index[id.as_str()];
        prior_means.insert(id.clone(), dist_mean(&node.distribution));

        if let Some(&fixed) = interventions.get(id.as_str()) {
            // Authoritative override: no circuit breakers, no variance clamping (spec §3.4).
            samples.insert(id.clone(), vec![fixed; n]);
            continue;
        }

        let node_samples = if node.kind.is_exogenous() || model.sorted_in_edges(id).is_empty() {
            sample(&node.distribution, n, rng)
        } else {
            combine_parent_effects(model, node, &samples, &prior_means, config, rng)
        };

        let breakered = apply_circuit_breakers(node, node_samples, &prior_means[id], config);
        samples.insert(id.clone(), breakered);
    }

    let summaries = order
        .iter()
        .map(|id| (id.clone(), samples_to_kde(&samples[id], config.kde_point_count)))
        .collect();

    Ok(PropagationResult {
        order,
        samples,
        summaries,
    })
}

fn combine_parent_effects(
    model: &Model,
    node: &Node,
    samples: &HashMap<String, Vec<f64>>,
    prior_means: &HashMap<String, f64>,
    config: &EngineConfig,
    rng: &mut impl Rng,
) -> Vec<f64> {
    let n = config.effective_sample_count();
    let mut base = sample(&node.distribution, n, rng);
    let in_edges = model.sorted_in_edges(&node.id);

    for edge in in_edges {
        let parent_samples = match samples.get(edge.source.as_str()) {
            Some(s) => s,
            None => continue,
        };
        let parent_prior_mean = prior_means.get(edge.source.as_str()).copied().unwrap_or(0.0);

        for i in 0..n {
            base[i] = apply_effect(
                base[i],
                &edge.effect,
                parent_samples[i],
                parent_prior_mean,
                config.global_min_clamp,
                config.global_max_clamp,
            );
        }
    }

    base
}

/// Apply a node's min/max clamp and prior-weight mean reversion, in that
/// order (spec §4.3: clamp first, then blend toward the prior so
/// reversion operates on an already-sane value).
fn apply_circuit_breakers(
    node: &Node,
    mut values: Vec<f64>,
    prior_mean: &f64,
    config: &EngineConfig,
) -> Vec<f64> {
    let breakers = node.circuit_breakers.clone().unwrap_or_default();
    let min = breakers.min;
    let max = breakers.max;
    let prior_weight = breakers.prior_weight.unwrap_or(config.default_prior_weight);
    let max_std_dev_ratio = breakers.max_std_dev_ratio.unwrap_or(config.default_max_std_dev_ratio);

    let mut clamped = 0usize;
    let mut repaired_nan = 0usize;

    for v in values.iter_mut() {
        if !v.is_finite() {
            *v = *prior_mean;
            repaired_nan += 1;
        }
        if let Some(min) = min {
            if *v < min {
                clamped += 1;
            }
            *v = v.max(min);
        }
        if let Some(max) = max {
            if *v > max {
                clamped += 1;
            }
            *v = v.min(max);
        }
        if prior_weight > 0.0 {
            *v = *v * (1.0 - prior_weight) + prior_mean * prior_weight;
        }
    }

    if repaired_nan > 0 || clamped > 0 {
        tracing::debug!(node = %node.id, repaired_nan, clamped, "circuit breakers touched samples");
    }

    clamp_variance(&node.id, &mut values, max_std_dev_ratio);
    values
}

/// Compress the whole vector toward its empirical mean when its spread
/// exceeds `|mean| * max_std_dev_ratio` (spec §4.3 step 4): a uniform
/// shrink by `cap / s`, not a per-sample hard clamp.
fn clamp_variance(node_id: &str, values: &mut [f64], max_std_dev_ratio: f64) {
    if values.is_empty() || max_std_dev_ratio <= 0.0 {
        return;
    }
    let n = values.len() as f64;
    let m = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / n;
    let s = variance.sqrt();
    let cap = m.abs() * max_std_dev_ratio;
    if s > cap && cap > 0.0 {
        let factor = cap / s;
        tracing::debug!(node = %node_id, stddev = s, cap, factor, "compressing variance");
        for v in values.iter_mut() {
            *v = m + (*v - m) * factor;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CircuitBreakers, Distribution, Edge, Effect, Zone};
    use crate::rng::rng_for;

    fn node(id: &str, kind: NodeKind, dist: Distribution) -> Node {
        Node {
            id: id.to_string(),
            label: String::new(),
            description: String::new(),
            kind,
            zone: String::new(),
            shape: String::new(),
            units: None,
            distribution: dist,
            circuit_breakers: None,
        }
    }

    fn linear_edge(source: &str, target: &str, coefficient: f64) -> Edge {
        Edge {
            source: source.to_string(),
            target: target.to_string(),
            relationship: String::new(),
            style: String::new(),
            weight: 0.0,
            effect: Effect::Linear {
                coefficient,
                intercept: 0.0,
                saturation: None,
            },
            label: None,
        }
    }

    #[test]
    fn two_node_chain_propagates_forward() {
        let model = Model {
            title: String::new(),
            description: String::new(),
            nodes: vec![
                node(
                    "a",
                    NodeKind::Exogenous,
                    Distribution::Normal {
                        mean: 10.0,
                        std_dev: 1.0,
                    },
                ),
                node(
                    "b",
                    NodeKind::Endogenous,
                    Distribution::Normal {
                        mean: 5.0,
                        std_dev: 0.01,
                    },
                ),
            ],
            edges: vec![linear_edge("a", "b", 0.5)],
            zones: vec![],
            key_insights: vec![],
        };
        let config = EngineConfig {
            rng_seed: Some(1),
            ..EngineConfig::default()
        };
        let mut rng = rng_for(1);
        let result = propagate(&model, &config, &Interventions::new(), &mut rng).unwrap();
        assert_eq!(result.order, vec!["a", "b"]);
        let b_mean = result.summary("b").unwrap().mean;
        assert!((b_mean - 5.0).abs() < 2.0, "got {b_mean}");
    }

    #[test]
    fn cycle_is_rejected_as_structural_error() {
        let model = Model {
            title: String::new(),
            description: String::new(),
            nodes: vec![
                node("a", NodeKind::Endogenous, Distribution::Normal { mean: 0.0, std_dev: 1.0 }),
                node("b", NodeKind::Endogenous, Distribution::Normal { mean: 0.0, std_dev: 1.0 }),
            ],
            edges: vec![linear_edge("a", "b", 0.1), linear_edge("b", "a", 0.1)],
            zones: vec![],
            key_insights: vec![],
        };
        let err = topological_order(&model).unwrap_err();
        assert!(matches!(err, ScmError::CycleDetected { .. }));
    }

    #[test]
    fn unknown_edge_endpoint_is_rejected() {
        let model = Model {
            title: String::new(),
            description: String::new(),
            nodes: vec![node("a", NodeKind::Exogenous, Distribution::Normal { mean: 0.0, std_dev: 1.0 })],
            edges: vec![linear_edge("a", "ghost", 0.1)],
            zones: vec![],
            key_insights: vec![],
        };
        let err = topological_order(&model).unwrap_err();
        assert!(matches!(err, ScmError::UnknownEdgeEndpoint { .. }));
    }

    #[test]
    fn intervention_fixes_node_to_constant() {
        let model = Model {
            title: String::new(),
            description: String::new(),
            nodes: vec![
                node("a", NodeKind::Exogenous, Distribution::Normal { mean: 10.0, std_dev: 3.0 }),
                node("b", NodeKind::Endogenous, Distribution::Normal { mean: 5.0, std_dev: 0.01 }),
            ],
            edges: vec![linear_edge("a", "b", 1.0)],
            zones: vec![],
            key_insights: vec![],
        };
        let config = EngineConfig::default();
        let mut rng = rng_for(2);
        let mut interventions = Interventions::new();
        interventions.insert("a".to_string(), 42.0);
        let result = propagate(&model, &config, &interventions, &mut rng).unwrap();
        let a_samples = &result.samples["a"];
        assert!(a_samples.iter().all(|&x| x == 42.0));
    }

    #[test]
    fn intervening_downstream_does_not_affect_upstream() {
        let model = Model {
            title: String::new(),
            description: String::new(),
            nodes: vec![
                node("a", NodeKind::Exogenous, Distribution::Normal { mean: 10.0, std_dev: 1.0 }),
                node("b", NodeKind::Endogenous, Distribution::Normal { mean: 5.0, std_dev: 1.0 }),
            ],
            edges: vec![linear_edge("a", "b", 1.0)],
            zones: vec![],
            key_insights: vec![],
        };
        let config = EngineConfig { rng_seed: Some(9), ..EngineConfig::default() };
        let mut baseline_rng = rng_for(9);
        let baseline = propagate(&model, &config, &Interventions::new(), &mut baseline_rng).unwrap();

        let mut intervened_rng = rng_for(9);
        let mut interventions = Interventions::new();
        interventions.insert("b".to_string(), 1000.0);
        let intervened = propagate(&model, &config, &interventions, &mut intervened_rng).unwrap();

        assert_eq!(baseline.samples["a"], intervened.samples["a"]);
    }

    #[test]
    fn circuit_breaker_min_max_is_respected() {
        let mut breakers_node = node(
            "a",
            NodeKind::Exogenous,
            Distribution::Normal { mean: 0.0, std_dev: 100.0 },
        );
        breakers_node.circuit_breakers = Some(CircuitBreakers {
            min: Some(-1.0),
            max: Some(1.0),
            prior_weight: None,
            max_std_dev_ratio: Some(100.0),
        });
        let model = Model {
            title: String::new(),
            description: String::new(),
            nodes: vec![breakers_node],
            edges: vec![],
            zones: vec![],
            key_insights: vec![],
        };
        let config = EngineConfig::default();
        let mut rng = rng_for(4);
        let result = propagate(&model, &config, &Interventions::new(), &mut rng).unwrap();
        assert!(result.samples["a"].iter().all(|&x| (-1.0..=1.0).contains(&x)));
    }

    #[test]
    fn zones_are_preserved_but_unused_by_propagation() {
        let model = Model {
            title: String::new(),
            description: String::new(),
            nodes: vec![node("a", NodeKind::Exogenous, Distribution::Normal { mean: 0.0, std_dev: 1.0 })],
            edges: vec![],
            zones: vec![Zone { id: "z1".into(), label: "Zone One".into() }],
            key_insights: vec![],
        };
        let config = EngineConfig::default();
        let mut rng = rng_for(6);
        let result = propagate(&model, &config, &Interventions::new(), &mut rng).unwrap();
        assert_eq!(result.order, vec!["a"]);
    }
}
