//! The dependency graph.
//!
//! One node per package name, edges from dependency to dependent (the same
//! direction builds flow). Construction lives in [`build_graph`]; the graph
//! itself is immutable afterwards.

mod cycle;
mod resolve;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef, Reversed};
use serde::Serialize;
use thiserror::Error;

use crate::configure::{ConfigureError, Configuration, Resolution};
use crate::package_id::PackageId;
use crate::recipe::{Recipe, parse_reference};
use crate::util::hash::HashError;
use crate::version::{Version, VersionRange};

pub use resolve::build_graph;

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("no recipe for '{name}' (required by {required_by})")]
  RecipeNotFound { name: String, required_by: String },

  #[error("no version of '{name}' matches {range} (required by {required_by})")]
  NoMatchingVersion {
    name: String,
    range: String,
    required_by: String,
  },

  #[error(
    "version conflict for '{name}': {first} requires {name}/{first_range} but {second} requires {name}/{second_range}"
  )]
  VersionConflict {
    name: String,
    first: String,
    first_range: String,
    second: String,
    second_range: String,
  },

  #[error("dependency cycle: {}", cycle.join(" -> "))]
  DependencyCycle { cycle: Vec<String> },

  #[error("version resolution did not converge after {iterations} iterations")]
  ResolutionDidNotConverge { iterations: usize },

  #[error("invalid root request '{request}': {reason}")]
  InvalidRequest { request: String, reason: String },

  #[error("failed to compute package id: {0}")]
  Hash(#[from] HashError),
}

/// A requested root package, `name` or `name/range`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootRequest {
  pub name: String,
  pub range: VersionRange,
}

impl RootRequest {
  pub fn parse(input: &str) -> Result<Self, GraphError> {
    let (name, range) = parse_reference(input).map_err(|reason| GraphError::InvalidRequest {
      request: input.to_string(),
      reason,
    })?;
    Ok(Self { name, range })
  }
}

impl fmt::Display for RootRequest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.name, self.range)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
  Requires,
  BuildRequires,
}

/// The configuration outcome of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeConfig {
  Valid { resolution: Resolution, package_id: PackageId },
  /// The recipe rejected the configuration. The node stays in the graph so
  /// the executor can report it; its requirements were not expanded.
  Invalid(ConfigureError),
}

#[derive(Debug, Clone)]
pub struct DepNode {
  pub recipe: Arc<Recipe>,
  pub is_root: bool,
  pub config: NodeConfig,
}

impl DepNode {
  pub fn reference(&self) -> String {
    self.recipe.reference()
  }

  pub fn name(&self) -> &str {
    &self.recipe.name
  }

  pub fn version(&self) -> &Version {
    &self.recipe.version
  }

  pub fn package_id(&self) -> Option<&PackageId> {
    match &self.config {
      NodeConfig::Valid { package_id, .. } => Some(package_id),
      NodeConfig::Invalid(_) => None,
    }
  }

  pub fn configuration(&self) -> Option<&Configuration> {
    match &self.config {
      NodeConfig::Valid { resolution, .. } => Some(&resolution.configuration),
      NodeConfig::Invalid(_) => None,
    }
  }

  pub fn invalid_reason(&self) -> Option<&ConfigureError> {
    match &self.config {
      NodeConfig::Valid { .. } => None,
      NodeConfig::Invalid(e) => Some(e),
    }
  }
}

/// A canonical, comparable view of a resolved graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphSnapshot {
  pub nodes: Vec<SnapshotNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotNode {
  pub reference: String,
  pub package_id: Option<PackageId>,
  pub configuration: Option<Configuration>,
  pub invalid: Option<String>,
  pub dependencies: Vec<(String, EdgeKind)>,
}

/// A resolved dependency DAG.
#[derive(Debug, Clone)]
pub struct DepGraph {
  graph: DiGraph<DepNode, EdgeKind>,
  by_name: BTreeMap<String, NodeIndex>,
  roots: Vec<NodeIndex>,
}

impl DepGraph {
  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }

  pub fn node(&self, idx: NodeIndex) -> &DepNode {
    &self.graph[idx]
  }

  pub fn find(&self, name: &str) -> Option<NodeIndex> {
    self.by_name.get(name).copied()
  }

  /// All node indices in insertion (discovery) order.
  pub fn indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
    self.graph.node_indices()
  }

  pub fn roots(&self) -> &[NodeIndex] {
    &self.roots
  }

  /// Direct dependencies of a node, with the edge kind.
  pub fn dependencies(&self, idx: NodeIndex) -> Vec<(NodeIndex, EdgeKind)> {
    let mut deps: Vec<(NodeIndex, EdgeKind)> = self
      .graph
      .edges_directed(idx, Direction::Incoming)
      .map(|edge| (edge.source(), *edge.weight()))
      .collect();
    deps.sort_by_key(|(dep, _)| *dep);
    deps
  }

  /// Nodes that directly depend on `idx`.
  pub fn dependents(&self, idx: NodeIndex) -> Vec<NodeIndex> {
    let mut dependents: Vec<NodeIndex> = self.graph.neighbors_directed(idx, Direction::Outgoing).collect();
    dependents.sort();
    dependents.dedup();
    dependents
  }

  /// `idx` plus everything it transitively depends on.
  pub fn closure(&self, idx: NodeIndex) -> BTreeSet<NodeIndex> {
    let reversed = Reversed(&self.graph);
    let mut dfs = Dfs::new(reversed, idx);
    let mut seen = BTreeSet::new();
    while let Some(node) = dfs.next(reversed) {
      seen.insert(node);
    }
    seen
  }

  /// Nodes ordered so every dependency precedes its dependents.
  pub fn topological_order(&self) -> Result<Vec<NodeIndex>, GraphError> {
    toposort(&self.graph, None).map_err(|cycle| GraphError::DependencyCycle {
      cycle: vec![self.graph[cycle.node_id()].reference()],
    })
  }

  pub fn snapshot(&self) -> GraphSnapshot {
    let nodes = self
      .by_name
      .values()
      .map(|&idx| {
        let node = &self.graph[idx];
        SnapshotNode {
          reference: node.reference(),
          package_id: node.package_id().cloned(),
          configuration: node.configuration().cloned(),
          invalid: node.invalid_reason().map(ToString::to_string),
          dependencies: self
            .dependencies(idx)
            .into_iter()
            .map(|(dep, kind)| (self.graph[dep].reference(), kind))
            .collect(),
        }
      })
      .collect();
    GraphSnapshot { nodes }
  }
}
