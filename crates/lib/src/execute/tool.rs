//! Native build tool invocation.
//!
//! Build systems describe what to run as [`CommandSpec`]s; a [`ToolRunner`]
//! runs them. The default [`ProcessRunner`] spawns real processes; tests
//! substitute a recording fake.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

/// Lines of stderr kept in a failure reason. The full output stays in the report.
const STDERR_TAIL_LINES: usize = 20;

/// A fully substituted command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
  pub program: String,
  pub args: Vec<String>,
  pub cwd: PathBuf,
  pub env: BTreeMap<String, String>,
}

impl CommandSpec {
  pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      cwd: cwd.into(),
      env: BTreeMap::new(),
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
    self.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
    self
  }

  /// Run `script` through the platform shell.
  pub fn shell(script: &str, cwd: impl Into<PathBuf>) -> Self {
    let (shell, flags) = platform_shell();
    Self::new(shell, cwd).args(flags.iter().copied()).arg(script)
  }

  /// The tool name used in failure reports (`cmake`, `make`, ...).
  pub fn tool_name(&self) -> String {
    Path::new(&self.program)
      .file_stem()
      .map(|s| s.to_string_lossy().to_string())
      .unwrap_or_else(|| self.program.clone())
  }
}

impl fmt::Display for CommandSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.program)?;
    for arg in &self.args {
      if arg.contains(' ') {
        write!(f, " \"{arg}\"")?;
      } else {
        write!(f, " {arg}")?;
      }
    }
    Ok(())
  }
}

/// Use `/bin/sh` rather than `$SHELL`, which may source user profiles.
fn platform_shell() -> (&'static str, &'static [&'static str]) {
  #[cfg(unix)]
  {
    ("/bin/sh", &["-c"])
  }

  #[cfg(windows)]
  {
    ("cmd.exe", &["/C"])
  }
}

/// Exit status and captured output of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
  pub code: Option<i32>,
  pub stdout: String,
  pub stderr: String,
}

impl ToolOutput {
  pub fn success(&self) -> bool {
    self.code == Some(0)
  }

  pub fn stderr_tail(&self) -> String {
    let lines: Vec<&str> = self.stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
  }
}

#[async_trait]
pub trait ToolRunner: Send + Sync {
  /// Run the command to completion. A non-zero exit is reported through
  /// [`ToolOutput::code`], not as an error.
  async fn run(&self, spec: &CommandSpec) -> io::Result<ToolOutput>;
}

/// Runs commands as child processes.
///
/// Children inherit the environment (compilers and build tools come from
/// `PATH`) with `spec.env` layered on top, and are killed if the future is
/// dropped, which is how step timeouts and cancellation stop them.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

#[async_trait]
impl ToolRunner for ProcessRunner {
  async fn run(&self, spec: &CommandSpec) -> io::Result<ToolOutput> {
    info!(cmd = %spec, cwd = ?spec.cwd, "running build tool");

    let mut command = Command::new(&spec.program);
    command
      .args(&spec.args)
      .current_dir(&spec.cwd)
      // 1980-01-01, the ZIP epoch, for reproducible archive timestamps
      .env("SOURCE_DATE_EPOCH", "315532800")
      .envs(&spec.env)
      .stdin(Stdio::null())
      .kill_on_drop(true);

    let output = command.output().await?;
    let result = ToolOutput {
      code: output.status.code(),
      stdout: String::from_utf8_lossy(&output.stdout).to_string(),
      stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };

    if !result.success() {
      debug!(code = ?result.code, stderr = %result.stderr, "build tool failed");
    }
    Ok(result)
  }
}
