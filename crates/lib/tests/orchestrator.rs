//! End-to-end execution of resolved graphs against fake tools.
//!
//! Recipes are written to a temporary recipe root, resolved with the real
//! graph builder and executed into a temporary artifact store. Downloads and
//! native tools are replaced by in-process fakes that record what they were
//! asked to do.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use kiln_lib::cache::{ArtifactCache, CacheConfig};
use kiln_lib::execute::{
  ArtifactInfo, Cancellation, CommandSpec, Downloader, ExecuteConfig, ExecutionReport, FailureReason, FetchError,
  NodeState, Step, StepTimeouts, ToolOutput, ToolRunner, Toolchain, execute_graph,
};
use kiln_lib::graph::{DepGraph, RootRequest, build_graph};
use kiln_lib::profile::Profile;
use kiln_lib::recipe::{PropertyValue, RecipeIndex};

const SHA: &str = "9b1f6a3c52e4d7f80a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f6071";

/// Runs nothing; scripts containing `fail` exit with status 2. A script of
/// the form `... against <path>` records `<path>` if it does not exist.
#[derive(Default)]
struct FakeRunner {
  scripts: Mutex<Vec<String>>,
  missing_inputs: Mutex<Vec<String>>,
  active: AtomicUsize,
  peak: AtomicUsize,
  delay: Duration,
}

impl FakeRunner {
  fn with_delay(delay: Duration) -> Self {
    Self {
      delay,
      ..Self::default()
    }
  }

  fn scripts(&self) -> Vec<String> {
    self.scripts.lock().unwrap().clone()
  }

  fn ran(&self, needle: &str) -> bool {
    self.scripts().iter().any(|s| s.contains(needle))
  }

  fn missing_inputs(&self) -> Vec<String> {
    self.missing_inputs.lock().unwrap().clone()
  }
}

#[async_trait]
impl ToolRunner for FakeRunner {
  async fn run(&self, command: &CommandSpec) -> io::Result<ToolOutput> {
    let script = command.args.last().cloned().unwrap_or_default();
    self.scripts.lock().unwrap().push(script.clone());
    if let Some((_, input)) = script.split_once(" against ")
      && !Path::new(input).exists()
    {
      self.missing_inputs.lock().unwrap().push(input.to_string());
    }

    let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(running, Ordering::SeqCst);
    tokio::time::sleep(self.delay).await;
    self.active.fetch_sub(1, Ordering::SeqCst);

    if script.contains("fail") {
      return Ok(ToolOutput {
        code: Some(2),
        stdout: "compiling\n".to_string(),
        stderr: "error: boom\n".to_string(),
      });
    }
    Ok(ToolOutput {
      code: Some(0),
      stdout: String::new(),
      stderr: String::new(),
    })
  }
}

/// Serves a single header file after `failures` bad transfers.
struct FlakyDownloader {
  failures: usize,
  attempts: AtomicUsize,
}

impl FlakyDownloader {
  fn new(failures: usize) -> Self {
    Self {
      failures,
      attempts: AtomicUsize::new(0),
    }
  }
}

#[async_trait]
impl Downloader for FlakyDownloader {
  async fn download(&self, url: &str, sha256: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
    let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
    if attempt < self.failures {
      return Err(FetchError::ChecksumMismatch {
        url: url.to_string(),
        expected: sha256.to_string(),
        actual: "0".repeat(64),
      });
    }
    std::fs::create_dir_all(dest_dir).unwrap();
    let path = dest_dir.join("lib.h");
    std::fs::write(&path, "#define LIB 1\n").unwrap();
    Ok(path)
  }
}

struct Fixture {
  temp: TempDir,
  cache: ArtifactCache,
}

impl Fixture {
  fn new() -> Self {
    Self::with_cache(CacheConfig::default())
  }

  fn with_cache(limits: CacheConfig) -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("recipes")).unwrap();
    let cache = ArtifactCache::open(temp.path().join("store"), limits).unwrap();
    Self { temp, cache }
  }

  fn recipe(&self, name: &str, body: &str) {
    let dir = self.temp.path().join("recipes").join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("recipe.toml"), format!("name = \"{name}\"\nversion = \"1.0\"\n{body}")).unwrap();
  }

  /// A recipe whose build step is the single shell line `script`.
  fn simple(&self, name: &str, requires: &[&str], script: &str) {
    let requires: Vec<String> = requires.iter().map(|r| format!("\"{r}/1.0\"")).collect();
    self.recipe(
      name,
      &format!("requires = [{}]\n\n[steps]\nbuild = [\"{script}\"]\n", requires.join(", ")),
    );
  }

  fn graph(&self, roots: &[&str], profile: &Profile) -> DepGraph {
    let index = RecipeIndex::load_roots(&[self.temp.path().join("recipes")]).unwrap();
    let roots: Vec<RootRequest> = roots.iter().map(|r| RootRequest::parse(r).unwrap()).collect();
    build_graph(&index, &roots, profile).unwrap()
  }

  async fn run(&self, roots: &[&str], toolchain: &Toolchain, config: &ExecuteConfig) -> ExecutionReport {
    let graph = self.graph(roots, &Profile::default());
    execute_graph(&graph, &self.cache, toolchain, config, &Cancellation::new())
      .await
      .unwrap()
  }
}

fn toolchain(runner: &Arc<FakeRunner>) -> Toolchain {
  Toolchain {
    downloader: Arc::new(FlakyDownloader::new(0)),
    runner: runner.clone(),
  }
}

fn config() -> ExecuteConfig {
  ExecuteConfig {
    parallelism: 4,
    jobs: 2,
    fetch_backoff: Duration::from_millis(1),
    ..ExecuteConfig::default()
  }
}

#[tokio::test]
async fn builds_dependencies_before_dependents() {
  let fixture = Fixture::new();
  fixture.simple("zlib", &[], "build zlib");
  fixture.simple("libpng", &["zlib"], "build libpng against $${dep:zlib}");
  let runner = Arc::new(FakeRunner::default());

  let report = fixture.run(&["libpng"], &toolchain(&runner), &config()).await;

  assert!(report.is_success());
  let zlib = report.node("zlib").unwrap();
  let zlib_path = zlib.path.clone().unwrap();
  let scripts = runner.scripts();
  assert_eq!(scripts[0], "build zlib");
  assert_eq!(scripts[1], format!("build libpng against {}", zlib_path.display()));

  let libpng = report.node("libpng").unwrap();
  assert_eq!(
    libpng.history,
    vec![
      NodeState::Pending,
      NodeState::Resolving,
      NodeState::SourceFetching,
      NodeState::Building,
      NodeState::Packaging,
      NodeState::Cached,
    ]
  );

  let info = ArtifactInfo::read(libpng.path.as_ref().unwrap()).unwrap();
  assert_eq!(info.reference, "libpng/1.0");
  assert_eq!(info.dependencies.get("zlib"), zlib.package_id.as_ref());
}

#[tokio::test]
async fn failed_dependency_skips_dependents_without_running_them() {
  let fixture = Fixture::new();
  fixture.simple("base", &[], "fail base");
  fixture.simple("mid", &["base"], "build mid");
  fixture.simple("app", &["mid"], "build app");
  fixture.simple("other", &[], "build other");
  let runner = Arc::new(FakeRunner::default());

  let report = fixture.run(&["app", "other"], &toolchain(&runner), &config()).await;

  assert!(!report.is_success());
  let base = report.node("base").unwrap();
  assert!(matches!(
    base.failure,
    Some(FailureReason::BuildToolFailure { step: Step::Build, code: Some(2), .. })
  ));
  assert!(base.output.as_deref().unwrap().contains("error: boom"));

  for name in ["mid", "app"] {
    let node = report.node(name).unwrap();
    assert_eq!(node.state, NodeState::Failed);
    assert_eq!(
      node.failure,
      Some(FailureReason::UpstreamFailed {
        dependency: "base/1.0".to_string()
      })
    );
  }
  assert!(!runner.ran("build mid"));
  assert!(!runner.ran("build app"));

  assert_eq!(report.node("other").unwrap().state, NodeState::Cached);
  let causes: Vec<&str> = report.root_causes().map(|n| n.name()).collect();
  assert_eq!(causes, vec!["base"]);
}

#[tokio::test]
async fn invalid_configuration_fails_node_and_dependents() {
  let fixture = Fixture::new();
  fixture.recipe(
    "legacy",
    "[steps]\nbuild = [\"build legacy\"]\n\n[[validate]]\nmessage = \"legacy cannot be built\"\n",
  );
  fixture.simple("app", &["legacy"], "build app");
  let runner = Arc::new(FakeRunner::default());

  let report = fixture.run(&["app"], &toolchain(&runner), &config()).await;

  let legacy = report.node("legacy").unwrap();
  assert!(matches!(
    &legacy.failure,
    Some(FailureReason::InvalidConfiguration { reason }) if reason.contains("legacy cannot be built")
  ));
  assert_eq!(legacy.history, vec![NodeState::Pending, NodeState::Resolving, NodeState::Failed]);
  assert!(matches!(
    report.node("app").unwrap().failure,
    Some(FailureReason::UpstreamFailed { .. })
  ));
  assert!(runner.scripts().is_empty());
}

#[tokio::test]
async fn parallelism_bounds_concurrent_builds() {
  let fixture = Fixture::new();
  let names = ["p1", "p2", "p3", "p4", "p5"];
  for name in names {
    fixture.simple(name, &[], &format!("build {name}"));
  }
  let runner = Arc::new(FakeRunner::with_delay(Duration::from_millis(100)));
  let config = ExecuteConfig {
    parallelism: 2,
    ..config()
  };

  let report = fixture.run(&names, &toolchain(&runner), &config).await;

  assert!(report.is_success());
  assert_eq!(runner.scripts().len(), 5);
  assert_eq!(runner.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn bounded_cache_keeps_dependencies_until_dependents_are_built() {
  for roots in [["app", "other"], ["other", "app"]] {
    let fixture = Fixture::with_cache(CacheConfig {
      max_entries: Some(1),
      max_bytes: None,
    });
    fixture.simple("base", &[], "build base");
    fixture.simple("app", &["base"], "build app against $${dep:base}");
    fixture.simple("other", &[], "build other");
    let runner = Arc::new(FakeRunner::default());
    let config = ExecuteConfig {
      parallelism: 1,
      ..config()
    };

    let report = fixture.run(&roots, &toolchain(&runner), &config).await;

    assert!(report.is_success(), "{roots:?}");
    assert!(runner.ran("build app against"));
    assert_eq!(runner.missing_inputs(), Vec::<String>::new(), "{roots:?}");
  }
}

#[tokio::test]
async fn build_step_timeout_fails_the_node() {
  let fixture = Fixture::new();
  fixture.simple("slow", &[], "build slow");
  let runner = Arc::new(FakeRunner::with_delay(Duration::from_secs(5)));
  let config = ExecuteConfig {
    timeouts: StepTimeouts {
      build: Some(Duration::from_millis(50)),
      ..StepTimeouts::default()
    },
    ..config()
  };

  let report = fixture.run(&["slow"], &toolchain(&runner), &config).await;

  let slow = report.node("slow").unwrap();
  assert_eq!(slow.failure, Some(FailureReason::Timeout { step: Step::Build }));
  assert!(fixture.cache.entries().is_empty());
}

#[tokio::test]
async fn second_run_is_served_from_the_cache() {
  let fixture = Fixture::new();
  fixture.simple("zlib", &[], "build zlib");
  fixture.simple("app", &["zlib"], "build app");
  let runner = Arc::new(FakeRunner::default());
  let toolchain = toolchain(&runner);

  let first = fixture.run(&["app"], &toolchain, &config()).await;
  assert_eq!(first.built().count(), 2);

  let second = fixture.run(&["app"], &toolchain, &config()).await;
  assert!(second.is_success());
  assert_eq!(second.cache_hits().count(), 2);
  assert_eq!(runner.scripts().len(), 2);
  assert_eq!(
    first.node("app").unwrap().path,
    second.node("app").unwrap().path
  );
}

#[tokio::test]
async fn rebuild_forces_only_the_named_packages() {
  let fixture = Fixture::new();
  fixture.simple("zlib", &[], "build zlib");
  fixture.simple("app", &["zlib"], "build app");
  let runner = Arc::new(FakeRunner::default());
  let toolchain = toolchain(&runner);
  fixture.run(&["app"], &toolchain, &config()).await;

  let config = ExecuteConfig {
    rebuild: ["app".to_string()].into(),
    ..config()
  };
  let report = fixture.run(&["app"], &toolchain, &config).await;

  assert!(report.node("zlib").unwrap().cache_hit);
  assert!(!report.node("app").unwrap().cache_hit);
  assert_eq!(runner.scripts(), vec!["build zlib", "build app", "build app"]);
}

#[tokio::test]
async fn checksum_mismatch_is_retried_before_giving_up() {
  let fixture = Fixture::new();
  fixture.recipe(
    "lib",
    &format!(
      "[steps]\nbuild = [\"build lib\"]\n\n[sources.\"1.0\"]\nurl = \"https://mirror.invalid/lib.h\"\nsha256 = \"{SHA}\"\n"
    ),
  );
  let runner = Arc::new(FakeRunner::default());

  let flaky = Arc::new(FlakyDownloader::new(2));
  let toolchain = Toolchain {
    downloader: flaky.clone(),
    runner: runner.clone(),
  };
  let report = fixture.run(&["lib"], &toolchain, &config()).await;
  assert!(report.is_success());
  assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);

  let broken = Arc::new(FlakyDownloader::new(usize::MAX));
  let toolchain = Toolchain {
    downloader: broken.clone(),
    runner: runner.clone(),
  };
  let config = ExecuteConfig {
    fetch_retries: 2,
    rebuild: ["lib".to_string()].into(),
    ..config()
  };
  let report = fixture.run(&["lib"], &toolchain, &config).await;
  let lib = report.node("lib").unwrap();
  assert!(matches!(lib.failure, Some(FailureReason::ChecksumMismatch { .. })));
  assert_eq!(broken.attempts.load(Ordering::SeqCst), 3);
  assert_eq!(runner.scripts().len(), 1);
}

#[tokio::test]
async fn cancelling_one_root_keeps_shared_dependencies_building() {
  let fixture = Fixture::new();
  fixture.simple("base", &[], "build base");
  fixture.simple("app", &["base"], "build app");
  fixture.simple("tool", &["base"], "build tool");
  let runner = Arc::new(FakeRunner::default());

  let graph = fixture.graph(&["app", "tool"], &Profile::default());
  let cancel = Cancellation::new();
  cancel.cancel_root("app");
  let report = execute_graph(&graph, &fixture.cache, &toolchain(&runner), &config(), &cancel)
    .await
    .unwrap();

  assert_eq!(report.node("base").unwrap().state, NodeState::Cached);
  assert_eq!(report.node("tool").unwrap().state, NodeState::Cached);
  assert_eq!(report.node("app").unwrap().failure, Some(FailureReason::Cancelled));
  assert!(!runner.ran("build app"));
}

#[tokio::test]
async fn cancel_all_stops_running_builds() {
  let fixture = Fixture::new();
  fixture.simple("base", &[], "build base");
  fixture.simple("app", &["base"], "build app");
  let runner = Arc::new(FakeRunner::with_delay(Duration::from_secs(30)));

  let graph = fixture.graph(&["app"], &Profile::default());
  let cancel = Cancellation::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(50)).await;
    trigger.cancel_all();
  });

  let report = tokio::time::timeout(
    Duration::from_secs(5),
    execute_graph(&graph, &fixture.cache, &toolchain(&runner), &config(), &cancel),
  )
  .await
  .expect("cancellation should stop the build")
  .unwrap();

  for name in ["base", "app"] {
    assert_eq!(report.node(name).unwrap().failure, Some(FailureReason::Cancelled));
  }
  assert!(fixture.cache.entries().is_empty());
}

#[tokio::test]
async fn profile_options_reach_the_build_and_the_package_id() {
  let fixture = Fixture::new();
  fixture.recipe(
    "zstd",
    "[options.shared]\nvalues = [true, false]\ndefault = false\n\n[steps]\nbuild = [\"build shared=$${option:shared}\"]\n",
  );
  let runner = Arc::new(FakeRunner::default());

  let mut profile = Profile::default();
  profile.apply_option_overrides(&["zstd:shared=True"]).unwrap();
  let shared = fixture.graph(&["zstd"], &profile);
  let static_ = fixture.graph(&["zstd"], &Profile::default());

  let id = |graph: &DepGraph| graph.node(graph.find("zstd").unwrap()).package_id().cloned().unwrap();
  assert_ne!(id(&shared), id(&static_));

  execute_graph(&shared, &fixture.cache, &toolchain(&runner), &config(), &Cancellation::new())
    .await
    .unwrap();
  assert_eq!(runner.scripts(), vec!["build shared=True"]);
}

#[tokio::test]
async fn components_are_published_and_checked_against_dependencies() {
  let fixture = Fixture::new();
  fixture.recipe(
    "zlib",
    "[steps]\nbuild = [\"build zlib\"]\n\n[package_info.properties]\ncmake_file_name = \"ZLIB\"\n\n\
     [package_info.components.zlib]\nlibs = [\"z\"]\n",
  );
  fixture.recipe(
    "minizip",
    "requires = [\"zlib/1.0\"]\n\n[steps]\nbuild = [\"build minizip\"]\n\n\
     [package_info.components.minizip]\nlibs = [\"minizip\"]\nrequires = [\"zlib::zlib\"]\n",
  );
  fixture.recipe(
    "app",
    "requires = [\"zlib/1.0\"]\n\n[steps]\nbuild = [\"build app\"]\n\n\
     [package_info.components.core]\nrequires = [\"zlib::minizip\"]\n",
  );
  let runner = Arc::new(FakeRunner::default());

  let report = fixture.run(&["minizip", "app"], &toolchain(&runner), &config()).await;

  let zlib = ArtifactInfo::read(report.node("zlib").unwrap().path.as_ref().unwrap()).unwrap();
  assert_eq!(
    zlib.package_info.properties["cmake_file_name"],
    PropertyValue::Text("ZLIB".into())
  );
  let minizip = ArtifactInfo::read(report.node("minizip").unwrap().path.as_ref().unwrap()).unwrap();
  assert_eq!(minizip.package_info.components["minizip"].requires, vec!["zlib::zlib"]);

  let app = report.node("app").unwrap();
  assert!(matches!(
    &app.failure,
    Some(FailureReason::InvalidPackageInfo { reason }) if reason.contains("'zlib' has no component 'minizip'")
  ));
  assert!(!runner.ran("build app"));
}
