//! Configuration, failure reasons and errors for graph execution.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::GraphError;
use crate::placeholder::PlaceholderError;

/// The three timed phases of a node build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
  Source,
  Build,
  Package,
}

impl fmt::Display for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Step::Source => "source",
      Step::Build => "build",
      Step::Package => "package",
    })
  }
}

/// Independent limits per step. `None` means no limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepTimeouts {
  pub source: Option<Duration>,
  pub build: Option<Duration>,
  pub package: Option<Duration>,
}

impl StepTimeouts {
  pub fn for_step(&self, step: Step) -> Option<Duration> {
    match step {
      Step::Source => self.source,
      Step::Build => self.build,
      Step::Package => self.package,
    }
  }
}

/// Configuration for graph execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of nodes building at once.
  pub parallelism: usize,

  /// Value of `$${jobs}` and the parallelism passed to build tools.
  pub jobs: usize,

  pub timeouts: StepTimeouts,

  /// Retries after the first failed download attempt.
  pub fetch_retries: usize,

  /// Delay before the first retry; doubles on each further attempt.
  pub fetch_backoff: Duration,

  /// Package names rebuilt even when a cached artifact exists.
  pub rebuild: BTreeSet<String>,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      jobs: num_cpus(),
      timeouts: StepTimeouts::default(),
      fetch_retries: 3,
      fetch_backoff: Duration::from_millis(500),
      rebuild: BTreeSet::new(),
    }
  }
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// Why a node ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
  #[error("invalid configuration: {reason}")]
  InvalidConfiguration { reason: String },

  #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
  ChecksumMismatch {
    url: String,
    expected: String,
    actual: String,
  },

  #[error("download of {url} failed: {message}")]
  NetworkError { url: String, message: String },

  #[error("{tool} failed during {step} (exit code {}){}", .code.map_or("none".to_string(), |c| c.to_string()), tail_suffix(.stderr_tail))]
  BuildToolFailure {
    tool: String,
    step: Step,
    code: Option<i32>,
    stderr_tail: String,
  },

  #[error("{step} step timed out")]
  Timeout { step: Step },

  #[error("dependency {dependency} failed")]
  UpstreamFailed { dependency: String },

  #[error("cancelled")]
  Cancelled,

  #[error("i/o error: {message}")]
  Io { message: String },

  #[error("artifact cache error: {message}")]
  Cache { message: String },

  #[error("placeholder error: {message}")]
  Placeholder { message: String },

  #[error("invalid package info: {reason}")]
  InvalidPackageInfo { reason: String },

  #[error("internal error: {message}")]
  Internal { message: String },
}

fn tail_suffix(tail: &str) -> String {
  if tail.is_empty() {
    String::new()
  } else {
    format!(":\n{tail}")
  }
}

impl From<PlaceholderError> for FailureReason {
  fn from(err: PlaceholderError) -> Self {
    FailureReason::Placeholder {
      message: err.to_string(),
    }
  }
}

impl FailureReason {
  pub fn io(context: impl fmt::Display, err: impl fmt::Display) -> Self {
    FailureReason::Io {
      message: format!("{context}: {err}"),
    }
  }

  /// Failures caused by another node rather than this one.
  pub fn is_upstream(&self) -> bool {
    matches!(self, FailureReason::UpstreamFailed { .. })
  }
}

/// Errors that abort the whole execution (as opposed to failing a node).
#[derive(Debug, Error)]
pub enum ExecuteError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("build task failed: {0}")]
  Task(String),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tool_failure_message_includes_stderr_tail() {
    let reason = FailureReason::BuildToolFailure {
      tool: "cmake".into(),
      step: Step::Build,
      code: Some(2),
      stderr_tail: "error: zlib.h not found".into(),
    };
    assert_eq!(
      reason.to_string(),
      "cmake failed during build (exit code 2):\nerror: zlib.h not found"
    );
  }

  #[test]
  fn failure_reason_serializes_with_kind_tag() {
    let json = serde_json::to_value(FailureReason::Timeout { step: Step::Source }).unwrap();
    assert_eq!(json["kind"], "timeout");
    assert_eq!(json["step"], "source");
  }

  #[test]
  fn default_config_is_parallel() {
    let config = ExecuteConfig::default();
    assert!(config.parallelism >= 1);
    assert!(config.jobs >= 1);
    assert_eq!(config.timeouts.for_step(Step::Build), None);
  }
}
