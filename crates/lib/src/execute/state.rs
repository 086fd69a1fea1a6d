//! Per-node build state machine.
//!
//! ```text
//! Pending -> Resolving -> SourceFetching -> Building -> Packaging -> Cached
//!                 \-> Cached (hit)
//! any non-terminal state -> Failed
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
  Pending,
  Resolving,
  SourceFetching,
  Building,
  Packaging,
  Cached,
  Failed,
}

impl NodeState {
  pub fn is_terminal(self) -> bool {
    matches!(self, NodeState::Cached | NodeState::Failed)
  }

  pub fn can_transition_to(self, next: NodeState) -> bool {
    use NodeState::*;
    match (self, next) {
      (Cached | Failed, _) => false,
      (_, Failed) => true,
      (Pending, Resolving) => true,
      (Resolving, SourceFetching | Cached) => true,
      (SourceFetching, Building) => true,
      (Building, Packaging) => true,
      (Packaging, Cached) => true,
      _ => false,
    }
  }
}

impl fmt::Display for NodeState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      NodeState::Pending => "pending",
      NodeState::Resolving => "resolving",
      NodeState::SourceFetching => "source-fetching",
      NodeState::Building => "building",
      NodeState::Packaging => "packaging",
      NodeState::Cached => "cached",
      NodeState::Failed => "failed",
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal state transition {from} -> {to}")]
pub struct InvalidTransition {
  pub from: NodeState,
  pub to: NodeState,
}

/// Current state plus every state the node passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTracker {
  state: NodeState,
  history: Vec<NodeState>,
}

impl Default for NodeTracker {
  fn default() -> Self {
    Self::new()
  }
}

impl NodeTracker {
  pub fn new() -> Self {
    Self {
      state: NodeState::Pending,
      history: vec![NodeState::Pending],
    }
  }

  pub fn state(&self) -> NodeState {
    self.state
  }

  pub fn history(&self) -> &[NodeState] {
    &self.history
  }

  pub fn advance(&mut self, next: NodeState) -> Result<(), InvalidTransition> {
    if !self.state.can_transition_to(next) {
      return Err(InvalidTransition {
        from: self.state,
        to: next,
      });
    }
    self.state = next;
    self.history.push(next);
    Ok(())
  }

  /// Move to `Failed` unless already terminal.
  pub fn fail(&mut self) {
    if !self.state.is_terminal() {
      self.state = NodeState::Failed;
      self.history.push(NodeState::Failed);
    }
  }

  pub fn into_history(self) -> Vec<NodeState> {
    self.history
  }
}
