//! Implementation of `kiln install` and `kiln build`.
//!
//! Both resolve the requested packages into a dependency graph and execute
//! it against the artifact store. `build` additionally forces the requested
//! packages to be rebuilt even when a cached artifact exists.

use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use tracing::warn;

use kiln_lib::cache::{ArtifactCache, CacheConfig};
use kiln_lib::execute::{Cancellation, ExecutionReport, NodeState, Toolchain, execute_graph};
use kiln_lib::platform::paths;
use kiln_lib::store_lock::{LockMode, StoreLock};

use super::common::{BuildArgs, resolve_graph};
use crate::output::{Mark, OutputFormat, emit_json, field, headline, human_elapsed, package_line, problem, short_id};

pub fn cmd_install(references: &[String], args: &BuildArgs, rebuild_roots: bool, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let command = if rebuild_roots { "build" } else { "install" };

  let graph = resolve_graph(references, &args.resolve)?;
  let mut config = args.execute_config();
  if rebuild_roots {
    config.rebuild = graph
      .roots()
      .iter()
      .map(|&idx| graph.node(idx).name().to_string())
      .collect();
  }

  let _lock = StoreLock::acquire(LockMode::Exclusive, command).context("Failed to acquire store lock")?;
  let cache = ArtifactCache::open(paths::store_dir(), CacheConfig::default()).context("Failed to open artifact store")?;
  let toolchain = Toolchain::system();
  let cancel = Cancellation::new();

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt
    .block_on(async {
      let on_interrupt = cancel.clone();
      tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          warn!("interrupted, cancelling outstanding builds");
          on_interrupt.cancel_all();
        }
      });
      execute_graph(&graph, &cache, &toolchain, &config, &cancel).await
    })
    .context("Execution failed")?;

  if output.is_json() {
    emit_json(&report)?;
  } else {
    print_report(&report, start.elapsed());
  }

  if !report.is_success() {
    bail!("{} of {} packages failed", report.failed().count(), report.nodes.len());
  }
  Ok(())
}

fn print_report(report: &ExecutionReport, elapsed: Duration) {
  println!();
  for node in &report.nodes {
    let id = node.package_id.as_ref().map(|id| short_id(id.as_str())).unwrap_or("-");
    match (&node.state, &node.failure) {
      (NodeState::Cached, _) if node.cache_hit => package_line(Mark::Reused, &node.reference, format!("{id}, cached")),
      (NodeState::Cached, _) => package_line(
        Mark::Done,
        &node.reference,
        format!("{id}, built in {}", human_elapsed(Duration::from_millis(node.duration_ms))),
      ),
      (_, Some(failure)) => package_line(Mark::Failed, &node.reference, failure),
      (_, None) => package_line(Mark::Failed, &node.reference, "unknown failure"),
    }
  }

  for node in report.root_causes() {
    if let Some(log) = node.output.as_deref().filter(|l| !l.trim().is_empty()) {
      eprintln!();
      problem(&format!("Output of {}:", node.reference));
      for line in log.lines() {
        eprintln!("    {line}");
      }
    }
  }

  println!();
  if report.is_success() {
    headline(Mark::Done, "All packages available");
  } else {
    headline(Mark::Failed, &format!("{} package(s) failed", report.failed().count()));
  }
  field("Built", report.built().count());
  field("Cached", report.cache_hits().count());
  field("Failed", report.failed().count());
  field("Duration", human_elapsed(elapsed));
}
