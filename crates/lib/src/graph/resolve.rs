//! Graph construction with version ranges.
//!
//! Resolution is a fixpoint: expand the graph from the roots using the
//! currently pinned versions, collect every range constraint per package,
//! pin each package to the highest version satisfying all of its constraints,
//! and repeat until the pins stop changing. Pins only ever come from the
//! constraints of the latest expansion, so a version dropped by a requirer
//! also drops its requirements.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use petgraph::graph::DiGraph;
use tracing::{debug, info, warn};

use super::cycle::find_cycle;
use super::{DepGraph, DepNode, EdgeKind, GraphError, NodeConfig, RootRequest};
use crate::configure::{ConfigureError, Resolution, resolve_configuration};
use crate::package_id::compute_package_id;
use crate::profile::Profile;
use crate::recipe::{Recipe, RecipeIndex};
use crate::version::{Version, VersionRange};

const MAX_ITERATIONS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirer {
  Root,
  Node(String),
}

impl fmt::Display for Requirer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Requirer::Root => f.write_str("root request"),
      Requirer::Node(reference) => f.write_str(reference),
    }
  }
}

#[derive(Debug, Clone)]
struct Constraint {
  requirer: Requirer,
  range: VersionRange,
}

struct Expanded {
  recipe: Arc<Recipe>,
  is_root: bool,
  resolution: Result<Resolution, ConfigureError>,
  deps: Vec<(String, EdgeKind)>,
}

#[derive(Default)]
struct Expansion {
  order: Vec<String>,
  nodes: BTreeMap<String, Expanded>,
  constraints: BTreeMap<String, Vec<Constraint>>,
}

/// Resolve `roots` against `index` into a dependency graph.
///
/// Graph-level failures (missing recipes, unsatisfiable or conflicting ranges,
/// cycles) are errors. A node whose configuration the recipe rejects is kept
/// and marked invalid.
pub fn build_graph(index: &RecipeIndex, roots: &[RootRequest], profile: &Profile) -> Result<DepGraph, GraphError> {
  let mut pins: BTreeMap<String, Version> = BTreeMap::new();

  for iteration in 1..=MAX_ITERATIONS {
    let expansion = expand(index, roots, profile, &pins)?;
    let next = select_versions(index, &expansion)?;
    if next == pins {
      debug!(iterations = iteration, nodes = expansion.nodes.len(), "version resolution converged");
      return assemble(expansion);
    }
    pins = next;
  }

  Err(GraphError::ResolutionDidNotConverge {
    iterations: MAX_ITERATIONS,
  })
}

fn no_match(name: &str, constraint: &Constraint) -> GraphError {
  GraphError::NoMatchingVersion {
    name: name.to_string(),
    range: constraint.range.to_string(),
    required_by: constraint.requirer.to_string(),
  }
}

fn expand(
  index: &RecipeIndex,
  roots: &[RootRequest],
  profile: &Profile,
  pins: &BTreeMap<String, Version>,
) -> Result<Expansion, GraphError> {
  let root_names: BTreeSet<&str> = roots.iter().map(|r| r.name.as_str()).collect();
  let mut expansion = Expansion::default();
  let mut discovered: BTreeSet<String> = BTreeSet::new();
  let mut queue: VecDeque<String> = VecDeque::new();

  for root in roots {
    expansion.constraints.entry(root.name.clone()).or_default().push(Constraint {
      requirer: Requirer::Root,
      range: root.range.clone(),
    });
    if discovered.insert(root.name.clone()) {
      queue.push_back(root.name.clone());
    }
  }

  while let Some(name) = queue.pop_front() {
    let constraints = &expansion.constraints[&name];
    if !index.contains_package(&name) {
      return Err(GraphError::RecipeNotFound {
        name,
        required_by: constraints[0].requirer.to_string(),
      });
    }

    let version = match pins.get(&name) {
      Some(pinned) => pinned.clone(),
      None => {
        let first = &constraints[0];
        first
          .range
          .best_match(index.versions(&name))
          .cloned()
          .ok_or_else(|| no_match(&name, first))?
      }
    };
    let recipe = index.get(&name, &version).ok_or_else(|| GraphError::RecipeNotFound {
      name: format!("{name}/{version}"),
      required_by: constraints[0].requirer.to_string(),
    })?;

    let is_root = root_names.contains(name.as_str());
    let resolution = resolve_configuration(&recipe, profile, is_root);
    let mut deps: Vec<(String, EdgeKind)> = Vec::new();

    match &resolution {
      Ok(resolution) => {
        let requirer = Requirer::Node(recipe.reference());
        let all = recipe
          .requires
          .iter()
          .map(|r| (r, EdgeKind::Requires))
          .chain(recipe.build_requires.iter().map(|r| (r, EdgeKind::BuildRequires)));
        for (requirement, kind) in all {
          if let Some(when) = &requirement.when {
            if !resolution.configuration.satisfies(when) {
              continue;
            }
          }
          if deps.iter().any(|(dep, _)| *dep == requirement.name) {
            continue;
          }
          expansion
            .constraints
            .entry(requirement.name.clone())
            .or_default()
            .push(Constraint {
              requirer: requirer.clone(),
              range: requirement.range.clone(),
            });
          deps.push((requirement.name.clone(), kind));
          if discovered.insert(requirement.name.clone()) {
            queue.push_back(requirement.name.clone());
          }
        }
      }
      Err(e) => {
        warn!(node = %recipe.reference(), error = %e, "invalid configuration; requirements not expanded");
      }
    }

    expansion.order.push(name.clone());
    expansion.nodes.insert(
      name,
      Expanded {
        recipe,
        is_root,
        resolution,
        deps,
      },
    );
  }

  Ok(expansion)
}

/// Pick the highest version satisfying every constraint, per package.
fn select_versions(index: &RecipeIndex, expansion: &Expansion) -> Result<BTreeMap<String, Version>, GraphError> {
  let mut pins = BTreeMap::new();

  for (name, constraints) in &expansion.constraints {
    let best = index
      .versions(name)
      .filter(|v| constraints.iter().all(|c| c.range.contains(v)))
      .max();
    if let Some(best) = best {
      pins.insert(name.clone(), best.clone());
      continue;
    }

    for constraint in constraints {
      if constraint.range.best_match(index.versions(name)).is_none() {
        return Err(no_match(name, constraint));
      }
    }

    // Every range is satisfiable alone; report the first pair that is not
    // satisfiable together.
    for (i, first) in constraints.iter().enumerate() {
      for second in &constraints[i + 1..] {
        let joint = index
          .versions(name)
          .any(|v| first.range.contains(v) && second.range.contains(v));
        if !joint {
          return Err(conflict(name, first, second));
        }
      }
    }

    let (first, second) = (&constraints[0], &constraints[constraints.len() - 1]);
    return Err(conflict(name, first, second));
  }

  Ok(pins)
}

fn conflict(name: &str, first: &Constraint, second: &Constraint) -> GraphError {
  GraphError::VersionConflict {
    name: name.to_string(),
    first: first.requirer.to_string(),
    first_range: first.range.to_string(),
    second: second.requirer.to_string(),
    second_range: second.range.to_string(),
  }
}

fn assemble(expansion: Expansion) -> Result<DepGraph, GraphError> {
  let adjacency: BTreeMap<String, Vec<String>> = expansion
    .nodes
    .iter()
    .map(|(name, node)| (name.clone(), node.deps.iter().map(|(dep, _)| dep.clone()).collect()))
    .collect();
  if let Some(cycle) = find_cycle(&adjacency) {
    let cycle = cycle
      .iter()
      .map(|name| expansion.nodes[name].recipe.reference())
      .collect();
    return Err(GraphError::DependencyCycle { cycle });
  }

  let mut nodes = expansion.nodes;
  let mut graph = DiGraph::new();
  let mut by_name = BTreeMap::new();
  let mut roots = Vec::new();
  let mut edges = Vec::new();

  // Dependencies' versions are final here, so package IDs can be computed.
  let versions: BTreeMap<String, Version> = nodes
    .iter()
    .map(|(name, node)| (name.clone(), node.recipe.version.clone()))
    .collect();

  for name in &expansion.order {
    let Some(node) = nodes.remove(name) else {
      continue;
    };

    let config = match node.resolution {
      Ok(resolution) => {
        let requires: Vec<(String, Version)> = node
          .deps
          .iter()
          .filter(|(_, kind)| *kind == EdgeKind::Requires)
          .map(|(dep, _)| (dep.clone(), versions[dep].clone()))
          .collect();
        let package_id = compute_package_id(&node.recipe, &resolution.configuration, &requires)?;
        NodeConfig::Valid { resolution, package_id }
      }
      Err(e) => NodeConfig::Invalid(e),
    };

    for (dep, kind) in &node.deps {
      edges.push((dep.clone(), name.clone(), *kind));
    }

    let is_root = node.is_root;
    let idx = graph.add_node(DepNode {
      recipe: node.recipe,
      is_root,
      config,
    });
    by_name.insert(name.clone(), idx);
    if is_root {
      roots.push(idx);
    }
  }

  for (dependency, dependent, kind) in edges {
    graph.add_edge(by_name[&dependency], by_name[&dependent], kind);
  }

  info!(nodes = graph.node_count(), edges = graph.edge_count(), "dependency graph resolved");
  Ok(DepGraph { graph, by_name, roots })
}
