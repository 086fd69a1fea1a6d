//! Outcome of an execution, one entry per graph node.

use std::path::PathBuf;

use serde::Serialize;

use super::state::NodeState;
use super::types::FailureReason;
use crate::package_id::PackageId;

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
  pub reference: String,
  pub package_id: Option<PackageId>,
  pub state: NodeState,
  pub history: Vec<NodeState>,
  pub cache_hit: bool,
  /// Published artifact directory.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub path: Option<PathBuf>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub failure: Option<FailureReason>,
  /// Tool output, kept only for failed nodes.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub output: Option<String>,
  pub duration_ms: u64,
}

impl NodeReport {
  pub fn name(&self) -> &str {
    self.reference.split('/').next().unwrap_or(&self.reference)
  }

  pub fn is_failed(&self) -> bool {
    self.state == NodeState::Failed
  }
}

/// Nodes are listed in graph discovery order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
  pub nodes: Vec<NodeReport>,
}

impl ExecutionReport {
  pub fn is_success(&self) -> bool {
    self.nodes.iter().all(|n| n.state == NodeState::Cached)
  }

  pub fn node(&self, name: &str) -> Option<&NodeReport> {
    self.nodes.iter().find(|n| n.name() == name)
  }

  pub fn failed(&self) -> impl Iterator<Item = &NodeReport> {
    self.nodes.iter().filter(|n| n.is_failed())
  }

  /// Nodes whose own build failed, as opposed to inheriting a failure.
  pub fn root_causes(&self) -> impl Iterator<Item = &NodeReport> {
    self
      .failed()
      .filter(|n| !n.failure.as_ref().is_some_and(FailureReason::is_upstream))
  }

  pub fn built(&self) -> impl Iterator<Item = &NodeReport> {
    self.nodes.iter().filter(|n| n.state == NodeState::Cached && !n.cache_hit)
  }

  pub fn cache_hits(&self) -> impl Iterator<Item = &NodeReport> {
    self.nodes.iter().filter(|n| n.cache_hit)
  }
}
