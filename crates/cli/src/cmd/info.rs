//! Resolve packages and print the dependency graph without building anything.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use kiln_lib::cache::{ArtifactCache, CacheConfig};
use kiln_lib::graph::SnapshotNode;
use kiln_lib::package_id::PackageId;
use kiln_lib::platform::paths;
use kiln_lib::store_lock::{LockMode, StoreLock};

use super::common::{ResolveArgs, resolve_graph};
use crate::output::{Mark, OutputFormat, emit_json, symbols};

#[derive(Serialize)]
struct InfoNode {
  #[serde(flatten)]
  node: SnapshotNode,
  cached: bool,
}

pub fn cmd_info(references: &[String], args: &ResolveArgs, output: OutputFormat) -> Result<()> {
  let graph = resolve_graph(references, args)?;

  let _lock = StoreLock::acquire(LockMode::Shared, "info").context("Failed to acquire store lock")?;
  let cache = ArtifactCache::open(paths::store_dir(), CacheConfig::default()).context("Failed to open artifact store")?;
  let cached: BTreeSet<PackageId> = cache.entries().into_iter().map(|e| e.package_id).collect();

  let nodes: Vec<InfoNode> = graph
    .snapshot()
    .nodes
    .into_iter()
    .map(|node| InfoNode {
      cached: node.package_id.as_ref().is_some_and(|id| cached.contains(id)),
      node,
    })
    .collect();

  if output.is_json() {
    return emit_json(&nodes);
  }

  for InfoNode { node, cached } in &nodes {
    println!("{}", node.reference.if_supports_color(Stream::Stdout, |s| s.bold()));
    match (&node.package_id, &node.invalid) {
      (Some(id), _) => {
        let status = if *cached { "cached" } else { "missing" };
        println!("  package id: {id} ({status})");
      }
      (None, Some(reason)) => println!(
        "  {} {}",
        Mark::Warn.painted(Stream::Stdout),
        reason.if_supports_color(Stream::Stdout, |s| s.yellow())
      ),
      (None, None) => {}
    }
    if let Some(configuration) = &node.configuration {
      for (key, value) in &configuration.settings {
        println!("  {key}={value}");
      }
      for (key, value) in &configuration.options {
        println!("  {}:{key}={value}", node.reference.split('/').next().unwrap_or_default());
      }
    }
    for (dependency, kind) in &node.dependencies {
      println!("  {} {dependency} ({kind:?})", symbols::ARROW);
    }
    println!();
  }
  Ok(())
}
