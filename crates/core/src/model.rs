//! The frozen input model: nodes, edges, distributions, effects.
//!
//! Tagged unions over inheritance (spec §9): `Distribution` and `Effect`
//! are closed `enum`s discriminated by a `type` field, mirroring the
//! `#[serde(tag = "type", rename_all = "camelCase")]` convention used for
//! the analogous `Distribution` enum in the reference spreadsheet
//! what-if engine this pack was retrieved alongside.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Exogenous,
    Endogenous,
    Terminal,
    Mediator,
    Moderator,
}

impl NodeKind {
    /// Only `Exogenous` has distinct engine behavior; every other variant
    /// is treated as endogenous (spec §3.1).
    pub fn is_exogenous(self) -> bool {
        matches!(self, NodeKind::Exogenous)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakers {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub prior_weight: Option<f64>,
    pub max_std_dev_ratio: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub shape: String,
    pub units: Option<String>,
    pub distribution: Distribution,
    #[serde(default, rename = "circuitBreakers")]
    pub circuit_breakers: Option<CircuitBreakers>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub relationship: String,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub weight: f64,
    pub effect: Effect,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub zones: Vec<Zone>,
    #[serde(default, rename = "keyInsights")]
    pub key_insights: Vec<String>,
}

impl Model {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges with `target == id`, sorted by ascending source id (spec §9:
    /// "a principled order... by edge source id" resolves the otherwise
    /// implementation-defined multi-parent iteration order).
    pub fn sorted_in_edges(&self, id: &str) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = self.edges.iter().filter(|e| e.target == id).collect();
        edges.sort_by(|a, b| a.source.cmp(&b.source));
        edges
    }

    pub fn out_edges(&self, id: &str) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.source == id)
    }

    pub fn is_terminal(&self, id: &str) -> bool {
        self.out_edges(id).next().is_none()
    }

    pub fn node_index(&self) -> HashMap<&str, &Node> {
        self.nodes.iter().map(|n| (n.id.as_str(), n)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Distribution {
    Binary {
        p: f64,
    },
    Categorical {
        #[serde(default)]
        probs: CategoricalProbs,
    },
    Normal {
        mean: f64,
        #[serde(rename = "stdDev")]
        std_dev: f64,
    },
    Lognormal {
        mean: f64,
        #[serde(rename = "stdDev")]
        std_dev: f64,
    },
    Beta {
        alpha: f64,
        beta: f64,
    },
    Gamma {
        shape: f64,
        rate: f64,
    },
    Bounded {
        min: f64,
        max: f64,
        mode: f64,
    },
    Count {
        lambda: f64,
    },
    Rate {
        alpha: f64,
        beta: f64,
    },
}

/// `probs[k]` must sum to 1; serializes/deserializes as a plain JSON array.
pub type CategoricalProbs = Vec<f64>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Effect {
    Linear {
        #[serde(default = "default_linear_coefficient")]
        coefficient: f64,
        #[serde(default)]
        intercept: f64,
        saturation: Option<f64>,
    },
    Multiplicative {
        #[serde(default = "default_multiplicative_factor")]
        factor: f64,
        #[serde(default = "default_multiplicative_baseline")]
        baseline: f64,
    },
    Threshold {
        cutoff: f64,
        below: f64,
        above: f64,
        #[serde(default = "default_threshold_smoothness")]
        smoothness: f64,
    },
    Logistic {
        coefficient: f64,
        threshold: f64,
    },
}

fn default_linear_coefficient() -> f64 {
    0.3
}
fn default_multiplicative_factor() -> f64 {
    1.5
}
fn default_multiplicative_baseline() -> f64 {
    1.0
}
fn default_threshold_smoothness() -> f64 {
    2.0
}
