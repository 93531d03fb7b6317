//! Structural error taxonomy.
//!
//! Per spec, only structural faults (bad graph shape, unknown tags) abort a
//! call. Parametric and numeric faults are recovered locally inside
//! `distributions`/`effects`/`propagate` and never surface here.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScmError {
    #[error("edge {source} -> {target} references unknown node {node}")]
    UnknownEdgeEndpoint {
        source: String,
        target: String,
        node: String,
    },

    #[error("cycle detected: node(s) {unvisited:?} were never reached by the topological sort")]
    CycleDetected { unvisited: Vec<String> },

    #[error("duplicate node id: {id}")]
    DuplicateNodeId { id: String },

    #[error("invalid configuration: {reason}")]
    ConfigError { reason: String },
}
