//! Build execution for a resolved dependency graph.
//!
//! Nodes are scheduled from a ready queue: a node starts as soon as all of its
//! dependencies are cached, bounded by a semaphore of `parallelism` permits.
//! Each node walks the [`NodeState`] machine, fetching and building inside a
//! private scratch directory that the [`ArtifactCache`] publishes on success.
//!
//! A failed node fails all of its transitive dependents with
//! [`FailureReason::UpstreamFailed`] without running them.
//!
//! A node pins its own package ID before it looks the artifact up or builds
//! it. The pin is handed back to the scheduler and held until every node that
//! can read the artifact has finished, so a bounded cache never evicts a
//! dependency between its publication and its dependents' builds.

pub mod build_system;
pub mod cancel;
pub mod context;
pub mod extract;
pub mod fetch;
pub mod package;
pub mod report;
pub mod source;
pub mod state;
pub mod tool;
pub mod types;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use petgraph::graph::NodeIndex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::{ArtifactCache, CacheFetch, GetOrBuildError, PinGuard};
use crate::configure::Configuration;
use crate::graph::DepGraph;
use crate::package_id::PackageId;
use crate::platform::paths::downloads_dir;
use crate::recipe::Recipe;

pub use cancel::{Cancellation, NodeCancel};
pub use context::BuildContext;
pub use fetch::{Downloader, FetchError, HttpDownloader};
pub use package::ArtifactInfo;
pub use report::{ExecutionReport, NodeReport};
pub use state::{InvalidTransition, NodeState, NodeTracker};
pub use tool::{CommandSpec, ProcessRunner, ToolOutput, ToolRunner};
pub use types::{ExecuteConfig, ExecuteError, FailureReason, Step, StepTimeouts};

/// The external seams of a build: how sources are downloaded and how native
/// tools are run.
#[derive(Clone)]
pub struct Toolchain {
  pub downloader: Arc<dyn Downloader>,
  pub runner: Arc<dyn ToolRunner>,
}

impl Toolchain {
  /// HTTP downloads cached under the user cache directory, real processes.
  pub fn system() -> Self {
    Self {
      downloader: Arc::new(HttpDownloader::new(Some(downloads_dir()))),
      runner: Arc::new(ProcessRunner),
    }
  }
}

impl std::fmt::Debug for Toolchain {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Toolchain").finish_non_exhaustive()
  }
}

/// Everything a node task needs, owned so the task can be spawned.
struct NodeJob {
  reference: String,
  recipe: Arc<Recipe>,
  configuration: Configuration,
  package_id: PackageId,
  /// Published artifacts of every transitive dependency.
  deps: BTreeMap<String, PathBuf>,
  /// Direct dependencies, recorded in the package info file.
  direct_deps: BTreeMap<String, PackageId>,
  force: bool,
  cancel: NodeCancel,
}

#[derive(Clone)]
struct Shared {
  cache: ArtifactCache,
  toolchain: Toolchain,
  config: Arc<ExecuteConfig>,
  semaphore: Arc<Semaphore>,
}

struct NodeOutcome {
  tracker: NodeTracker,
  result: Result<CacheFetch, FailureReason>,
  log: String,
  duration: Duration,
  pin: Option<PinGuard>,
}

/// Pins on published artifacts, each released once no unfinished node can
/// still read it.
struct ArtifactHolds {
  /// Transitive dependencies of each node, excluding the node itself.
  upstream: HashMap<NodeIndex, Vec<NodeIndex>>,
  /// Unfinished nodes that read each node's artifact.
  readers: HashMap<NodeIndex, usize>,
  pins: HashMap<NodeIndex, PinGuard>,
}

impl ArtifactHolds {
  fn new(graph: &DepGraph) -> Self {
    let upstream: HashMap<NodeIndex, Vec<NodeIndex>> = graph
      .indices()
      .map(|idx| (idx, graph.closure(idx).into_iter().filter(|&d| d != idx).collect()))
      .collect();
    let mut readers: HashMap<NodeIndex, usize> = HashMap::new();
    for deps in upstream.values() {
      for &dep in deps {
        *readers.entry(dep).or_default() += 1;
      }
    }
    Self {
      upstream,
      readers,
      pins: HashMap::new(),
    }
  }

  fn hold(&mut self, idx: NodeIndex, pin: PinGuard) {
    if self.readers.get(&idx).copied().unwrap_or(0) > 0 {
      self.pins.insert(idx, pin);
    }
  }

  /// `idx` reached a terminal state and no longer reads its dependencies.
  fn finished(&mut self, idx: NodeIndex) {
    for dep in self.upstream.get(&idx).into_iter().flatten() {
      if let Some(count) = self.readers.get_mut(dep) {
        *count = count.saturating_sub(1);
        if *count == 0 {
          self.pins.remove(dep);
        }
      }
    }
  }
}

/// Build every node of `graph`, reusing cached artifacts.
///
/// Node failures are reported in the returned [`ExecutionReport`]; only
/// graph-level problems (a cycle) or a lost task abort with an error.
pub async fn execute_graph(
  graph: &DepGraph,
  cache: &ArtifactCache,
  toolchain: &Toolchain,
  config: &ExecuteConfig,
  cancel: &Cancellation,
) -> Result<ExecutionReport, ExecuteError> {
  let order = graph.topological_order()?;
  info!(
    nodes = graph.len(),
    parallelism = config.parallelism,
    "starting graph execution"
  );

  let shared = Shared {
    cache: cache.clone(),
    toolchain: toolchain.clone(),
    config: Arc::new(config.clone()),
    semaphore: Arc::new(Semaphore::new(config.parallelism.max(1))),
  };

  let mut owners: HashMap<NodeIndex, Vec<String>> = HashMap::new();
  for &root in graph.roots() {
    for idx in graph.closure(root) {
      owners.entry(idx).or_default().push(graph.node(root).name().to_string());
    }
  }
  let cancel_for = |idx: NodeIndex| cancel.for_owners(owners.get(&idx).into_iter().flatten().map(String::as_str));

  let mut waiting: HashMap<NodeIndex, usize> = order
    .iter()
    .map(|&idx| (idx, graph.dependencies(idx).len()))
    .collect();
  let mut ready: VecDeque<NodeIndex> = order.iter().copied().filter(|idx| waiting[idx] == 0).collect();
  let mut reports: HashMap<NodeIndex, NodeReport> = HashMap::new();
  let mut holds = ArtifactHolds::new(graph);
  let mut published: HashMap<NodeIndex, PathBuf> = HashMap::new();
  let mut join_set: JoinSet<(NodeIndex, NodeOutcome)> = JoinSet::new();

  loop {
    while let Some(idx) = ready.pop_front() {
      let node = graph.node(idx);
      let reference = node.reference();
      let node_cancel = cancel_for(idx);

      let (configuration, package_id) = match (node.configuration(), node.package_id(), node.invalid_reason()) {
        (Some(configuration), Some(package_id), _) => (configuration.clone(), package_id.clone()),
        (_, _, reason) => {
          let mut tracker = NodeTracker::new();
          let _ = tracker.advance(NodeState::Resolving);
          tracker.fail();
          let failure = FailureReason::InvalidConfiguration {
            reason: reason.map(ToString::to_string).unwrap_or_default(),
          };
          error!(node = %reference, reason = %failure, "invalid configuration");
          reports.insert(idx, failed_report(&reference, None, tracker, failure));
          holds.finished(idx);
          fail_dependents(graph, idx, &mut reports, &mut holds, &cancel_for);
          continue;
        }
      };

      if node_cancel.is_cancelled() {
        let mut tracker = NodeTracker::new();
        tracker.fail();
        reports.insert(
          idx,
          failed_report(&reference, Some(package_id), tracker, FailureReason::Cancelled),
        );
        holds.finished(idx);
        fail_dependents(graph, idx, &mut reports, &mut holds, &cancel_for);
        continue;
      }

      let closure: Vec<NodeIndex> = graph.closure(idx).into_iter().filter(|&d| d != idx).collect();
      let job = NodeJob {
        reference: reference.clone(),
        recipe: Arc::clone(&node.recipe),
        configuration,
        package_id,
        deps: closure
          .iter()
          .filter_map(|d| published.get(d).map(|p| (graph.node(*d).name().to_string(), p.clone())))
          .collect(),
        direct_deps: graph
          .dependencies(idx)
          .into_iter()
          .filter_map(|(d, _)| {
            let dep = graph.node(d);
            dep.package_id().map(|id| (dep.name().to_string(), id.clone()))
          })
          .collect(),
        force: config.rebuild.contains(node.name()),
        cancel: node_cancel,
      };

      debug!(node = %reference, "scheduling node");
      let shared = shared.clone();
      join_set.spawn(async move {
        let outcome = match AssertUnwindSafe(run_node(&job, &shared)).catch_unwind().await {
          Ok(outcome) => outcome,
          Err(_) => {
            let mut tracker = NodeTracker::new();
            tracker.fail();
            NodeOutcome {
              tracker,
              result: Err(FailureReason::Internal {
                message: "build task panicked".to_string(),
              }),
              log: String::new(),
              duration: Duration::ZERO,
              pin: None,
            }
          }
        };
        (idx, outcome)
      });
    }

    let Some(joined) = join_set.join_next().await else {
      break;
    };
    let (idx, outcome) = joined.map_err(|e| ExecuteError::Task(e.to_string()))?;
    let reference = graph.node(idx).reference();
    let package_id = graph.node(idx).package_id().cloned();
    let duration_ms = outcome.duration.as_millis() as u64;

    match outcome.result {
      Ok(fetch) => {
        if fetch.built {
          info!(node = %reference, duration_ms, "built");
        } else {
          info!(node = %reference, "cache hit");
        }
        reports.insert(
          idx,
          NodeReport {
            reference,
            package_id,
            state: outcome.tracker.state(),
            history: outcome.tracker.into_history(),
            cache_hit: !fetch.built,
            path: Some(fetch.path.clone()),
            failure: None,
            output: None,
            duration_ms,
          },
        );
        published.insert(idx, fetch.path);
        if let Some(pin) = outcome.pin {
          holds.hold(idx, pin);
        }
        holds.finished(idx);

        for dependent in graph.dependents(idx) {
          if reports.contains_key(&dependent) {
            continue;
          }
          if let Some(count) = waiting.get_mut(&dependent) {
            *count = count.saturating_sub(1);
            if *count == 0 {
              ready.push_back(dependent);
            }
          }
        }
      }
      Err(failure) => {
        error!(node = %reference, reason = %failure, "node failed");
        let mut report = failed_report(&reference, package_id, outcome.tracker, failure);
        report.output = Some(outcome.log);
        report.duration_ms = duration_ms;
        reports.insert(idx, report);
        holds.finished(idx);
        fail_dependents(graph, idx, &mut reports, &mut holds, &cancel_for);
      }
    }
  }

  let nodes: Vec<NodeReport> = graph
    .indices()
    .map(|idx| {
      reports.remove(&idx).unwrap_or_else(|| {
        // Unreachable for a DAG; reported rather than dropped.
        let mut tracker = NodeTracker::new();
        tracker.fail();
        failed_report(
          &graph.node(idx).reference(),
          graph.node(idx).package_id().cloned(),
          tracker,
          FailureReason::Internal {
            message: "node was never scheduled".to_string(),
          },
        )
      })
    })
    .collect();
  let report = ExecutionReport { nodes };

  info!(
    built = report.built().count(),
    cached = report.cache_hits().count(),
    failed = report.failed().count(),
    "graph execution complete"
  );
  Ok(report)
}

fn failed_report(
  reference: &str,
  package_id: Option<PackageId>,
  tracker: NodeTracker,
  failure: FailureReason,
) -> NodeReport {
  NodeReport {
    reference: reference.to_string(),
    package_id,
    state: tracker.state(),
    history: tracker.into_history(),
    cache_hit: false,
    path: None,
    failure: Some(failure),
    output: None,
    duration_ms: 0,
  }
}

/// Fail every transitive dependent of `failed` that has not finished yet.
///
/// Dependents whose owning roots are all cancelled report `Cancelled`, the
/// rest `UpstreamFailed` naming the node that actually failed.
fn fail_dependents(
  graph: &DepGraph,
  failed: NodeIndex,
  reports: &mut HashMap<NodeIndex, NodeReport>,
  holds: &mut ArtifactHolds,
  cancel_for: &impl Fn(NodeIndex) -> NodeCancel,
) {
  let cause = graph.node(failed).reference();
  let mut queue: VecDeque<NodeIndex> = graph.dependents(failed).into();

  while let Some(idx) = queue.pop_front() {
    if reports.contains_key(&idx) {
      continue;
    }
    let node = graph.node(idx);
    let failure = if cancel_for(idx).is_cancelled() {
      FailureReason::Cancelled
    } else {
      FailureReason::UpstreamFailed {
        dependency: cause.clone(),
      }
    };
    warn!(node = %node.reference(), dependency = %cause, "skipping node after upstream failure");

    let mut tracker = NodeTracker::new();
    tracker.fail();
    reports.insert(idx, failed_report(&node.reference(), node.package_id().cloned(), tracker, failure));
    holds.finished(idx);
    queue.extend(graph.dependents(idx));
  }
}

async fn run_node(job: &NodeJob, shared: &Shared) -> NodeOutcome {
  let started = Instant::now();
  let mut tracker = NodeTracker::new();
  let mut log = String::new();
  let pin = shared.cache.pin([job.package_id.clone()]);

  let result = drive_node(job, shared, &mut tracker, &mut log).await;
  if result.is_err() {
    tracker.fail();
  }

  NodeOutcome {
    pin: result.is_ok().then_some(pin),
    tracker,
    result,
    log,
    duration: started.elapsed(),
  }
}

async fn drive_node(
  job: &NodeJob,
  shared: &Shared,
  tracker: &mut NodeTracker,
  log: &mut String,
) -> Result<CacheFetch, FailureReason> {
  let _permit = tokio::select! {
    biased;
    _ = job.cancel.cancelled() => return Err(FailureReason::Cancelled),
    permit = Arc::clone(&shared.semaphore).acquire_owned() => permit.map_err(|e| FailureReason::Internal {
      message: e.to_string(),
    })?,
  };
  if job.cancel.is_cancelled() {
    return Err(FailureReason::Cancelled);
  }

  advance(tracker, NodeState::Resolving)?;
  debug!(node = %job.reference, package_id = %job.package_id, "resolving");

  let fetch = {
    let tracker = &mut *tracker;
    let log = &mut *log;
    let build = shared.cache.get_or_build(
      &job.package_id,
      &job.reference,
      job.force,
      move |scratch| async move { build_node(job, shared, scratch, tracker, log).await },
    );
    tokio::select! {
      _ = job.cancel.cancelled() => return Err(FailureReason::Cancelled),
      result = build => result.map_err(|e| match e {
        GetOrBuildError::Build(reason) => reason,
        GetOrBuildError::Cache(e) => FailureReason::Cache { message: e.to_string() },
      })?,
    }
  };

  advance(tracker, NodeState::Cached)?;
  Ok(fetch)
}

/// Source, build and package steps inside `scratch`. Returns the directory to publish.
async fn build_node(
  job: &NodeJob,
  shared: &Shared,
  scratch: PathBuf,
  tracker: &mut NodeTracker,
  log: &mut String,
) -> Result<PathBuf, FailureReason> {
  let recipe = &job.recipe;
  let runner = &*shared.toolchain.runner;
  let timeouts = shared.config.timeouts;

  let ctx = BuildContext {
    name: recipe.name.clone(),
    version: recipe.version.to_string(),
    configuration: job.configuration.clone(),
    source_dir: scratch.join("source"),
    build_dir: scratch.join("build"),
    package_dir: scratch.join("package"),
    jobs: shared.config.jobs,
    deps: job.deps.clone(),
    variables: recipe.variables.clone(),
  };
  let package_info = package::published_info(&recipe.package_info, &job.configuration);
  package::check_component_requires(&package_info, &ctx.deps)?;

  let downloads = scratch.join("downloads");
  let logs = scratch.join("logs");
  for dir in [&ctx.source_dir, &ctx.build_dir, &ctx.package_dir, &downloads, &logs] {
    tokio::fs::create_dir_all(dir)
      .await
      .map_err(|e| FailureReason::io(dir.display(), e))?;
  }

  advance(tracker, NodeState::SourceFetching)?;
  info!(node = %job.reference, "fetching sources");
  let downloader = &*shared.toolchain.downloader;
  with_timeout(
    Step::Source,
    timeouts.source,
    source::prepare_source(recipe, &ctx, &downloads, downloader, runner, &shared.config, log),
  )
  .await?;

  advance(tracker, NodeState::Building)?;
  info!(node = %job.reference, build_system = recipe.build_system.name(), "building");
  with_timeout(
    Step::Build,
    timeouts.build,
    recipe.build_system.invoke(Step::Build, &ctx, runner, log),
  )
  .await?;

  advance(tracker, NodeState::Packaging)?;
  info!(node = %job.reference, "packaging");
  with_timeout(Step::Package, timeouts.package, async {
    recipe.build_system.invoke(Step::Package, &ctx, runner, log).await?;
    package::apply_package_rules(&recipe.package, &ctx)?;
    ArtifactInfo {
      reference: job.reference.clone(),
      package_id: job.package_id.clone(),
      configuration: job.configuration.clone(),
      package_info,
      dependencies: job.direct_deps.clone(),
    }
    .write(&ctx.package_dir)
  })
  .await?;

  if let Err(e) = tokio::fs::write(logs.join("build.log"), log.as_bytes()).await {
    debug!(error = %e, "failed to write build log");
  }
  Ok(ctx.package_dir)
}

fn advance(tracker: &mut NodeTracker, next: NodeState) -> Result<(), FailureReason> {
  tracker.advance(next).map_err(|e| FailureReason::Internal { message: e.to_string() })
}

/// Run a step under its time limit. Dropping the step future on expiry kills
/// any tool it spawned.
async fn with_timeout<T>(
  step: Step,
  limit: Option<Duration>,
  fut: impl Future<Output = Result<T, FailureReason>>,
) -> Result<T, FailureReason> {
  match limit {
    Some(limit) => tokio::time::timeout(limit, fut)
      .await
      .map_err(|_| FailureReason::Timeout { step })?,
    None => fut.await,
  }
}
