//! Native build system drivers.
//!
//! Every [`BuildSystemKind`] answers the same two questions: which commands
//! run during the build step, and which during the package step. Commands are
//! rendered from the [`BuildContext`] and run through a [`ToolRunner`].

use std::fmt::Write as _;

use tracing::info;

use super::context::BuildContext;
use super::tool::{CommandSpec, ToolRunner};
use super::types::{FailureReason, Step};
use crate::placeholder::PlaceholderError;
use crate::recipe::{BuildSystemKind, OptionValue};

impl BuildSystemKind {
  /// The commands run for `step`, fully substituted.
  ///
  /// The source step belongs to the executor, so no build system contributes
  /// commands to it.
  pub fn commands(&self, step: Step, ctx: &BuildContext) -> Result<Vec<CommandSpec>, PlaceholderError> {
    let source = ctx.source_dir.to_string_lossy().to_string();
    let build = ctx.build_dir.to_string_lossy().to_string();
    let package = ctx.package_dir.to_string_lossy().to_string();
    let build_type = ctx
      .configuration
      .settings
      .get("build_type")
      .cloned()
      .unwrap_or_else(|| "Release".to_string());
    let jobs = ctx.jobs.to_string();
    let vars = ctx.resolved_variables()?;
    let env = ctx.env();

    let commands = match (self, step) {
      (_, Step::Source) => Vec::new(),

      (BuildSystemKind::CMake, Step::Build) => {
        let mut configure = CommandSpec::new("cmake", &ctx.build_dir).args([
          "-S".to_string(),
          source,
          "-B".to_string(),
          build.clone(),
          format!("-DCMAKE_BUILD_TYPE={build_type}"),
          format!("-DCMAKE_INSTALL_PREFIX={package}"),
        ]);
        if let Some(shared) = bool_option(ctx, "shared") {
          configure = configure.arg(format!("-DBUILD_SHARED_LIBS={}", on_off(shared)));
        }
        if let Some(fpic) = bool_option(ctx, "fPIC") {
          configure = configure.arg(format!("-DCMAKE_POSITION_INDEPENDENT_CODE={}", on_off(fpic)));
        }
        configure = configure.args(vars.iter().map(|(k, v)| format!("-D{k}={v}")));

        let compile = CommandSpec::new("cmake", &ctx.build_dir).args([
          "--build".to_string(),
          build,
          "--config".to_string(),
          build_type,
          "--parallel".to_string(),
          jobs,
        ]);
        vec![configure, compile]
      }
      (BuildSystemKind::CMake, Step::Package) => vec![CommandSpec::new("cmake", &ctx.build_dir).args([
        "--install".to_string(),
        build,
        "--config".to_string(),
        build_type,
      ])],

      (BuildSystemKind::Meson, Step::Build) => {
        let mut setup = CommandSpec::new("meson", &ctx.build_dir).args([
          "setup".to_string(),
          build.clone(),
          source,
          format!("--prefix={package}"),
          format!("--buildtype={}", meson_buildtype(&build_type)),
        ]);
        if let Some(shared) = bool_option(ctx, "shared") {
          let library = if shared { "shared" } else { "static" };
          setup = setup.arg(format!("-Ddefault_library={library}"));
        }
        setup = setup.args(vars.iter().map(|(k, v)| format!("-D{k}={v}")));

        let compile =
          CommandSpec::new("meson", &ctx.build_dir).args(["compile", "-C", build.as_str(), "-j", jobs.as_str()]);
        vec![setup, compile]
      }
      (BuildSystemKind::Meson, Step::Package) => {
        vec![CommandSpec::new("meson", &ctx.build_dir).args(["install", "-C", build.as_str()])]
      }

      (BuildSystemKind::Autotools, Step::Build) => {
        let configure_script = ctx.source_dir.join("configure").to_string_lossy().to_string();
        let mut configure = CommandSpec::new(configure_script, &ctx.build_dir).arg(format!("--prefix={package}"));
        if let Some(shared) = bool_option(ctx, "shared") {
          configure = if shared {
            configure.args(["--enable-shared", "--disable-static"])
          } else {
            configure.args(["--disable-shared", "--enable-static"])
          };
        }
        configure = configure.args(vars.iter().map(|(k, v)| format!("{k}={v}")));
        let make = CommandSpec::new("make", &ctx.build_dir).args(["-j", jobs.as_str()]);
        vec![configure, make]
      }
      (BuildSystemKind::Autotools, Step::Package) => {
        vec![CommandSpec::new("make", &ctx.build_dir).arg("install")]
      }

      // Plain makefiles build in-tree.
      (BuildSystemKind::Make, Step::Build) => vec![
        CommandSpec::new("make", &ctx.source_dir)
          .args(["-j", jobs.as_str()])
          .args(vars.iter().map(|(k, v)| format!("{k}={v}"))),
      ],
      (BuildSystemKind::Make, Step::Package) => vec![
        CommandSpec::new("make", &ctx.source_dir)
          .arg("install")
          .arg(format!("PREFIX={package}"))
          .args(vars.iter().map(|(k, v)| format!("{k}={v}"))),
      ],

      (BuildSystemKind::MsBuild, Step::Build) => {
        let platform = ctx
          .configuration
          .settings
          .get("arch")
          .map(|arch| msbuild_platform(arch))
          .unwrap_or("x64");
        vec![
          CommandSpec::new("msbuild", &ctx.source_dir)
            .args([
              format!("-p:Configuration={build_type}"),
              format!("-p:Platform={platform}"),
              format!("-p:OutDir={}/", build),
              format!("-m:{jobs}"),
            ])
            .args(vars.iter().map(|(k, v)| format!("-p:{k}={v}"))),
        ]
      }
      // MSBuild has no install target; packaging is done by copy rules.
      (BuildSystemKind::MsBuild, Step::Package) => Vec::new(),

      (BuildSystemKind::Custom(steps), step) => {
        let scripts = if step == Step::Build { &steps.build } else { &steps.package };
        let mut commands = Vec::with_capacity(scripts.len());
        for script in scripts {
          commands.push(CommandSpec::shell(&ctx.substitute(script)?, &ctx.build_dir).envs(&vars));
        }
        commands
      }
    };

    Ok(commands.into_iter().map(|c| c.envs(&env)).collect())
  }

  /// Run the commands for `step`, appending their output to `log`.
  ///
  /// Stops at the first command that cannot be started or exits non-zero.
  pub async fn invoke(
    &self,
    step: Step,
    ctx: &BuildContext,
    runner: &dyn ToolRunner,
    log: &mut String,
  ) -> Result<(), FailureReason> {
    for command in self.commands(step, ctx)? {
      info!(package = %ctx.name, step = %step, cmd = %command, "invoking build tool");
      let _ = writeln!(log, "$ {command}");

      let output = match runner.run(&command).await {
        Ok(output) => output,
        Err(e) => {
          let _ = writeln!(log, "{e}");
          return Err(FailureReason::BuildToolFailure {
            tool: command.tool_name(),
            step,
            code: None,
            stderr_tail: e.to_string(),
          });
        }
      };

      log.push_str(&output.stdout);
      log.push_str(&output.stderr);
      if !output.success() {
        return Err(FailureReason::BuildToolFailure {
          tool: command.tool_name(),
          step,
          code: output.code,
          stderr_tail: output.stderr_tail(),
        });
      }
    }
    Ok(())
  }
}

fn bool_option(ctx: &BuildContext, name: &str) -> Option<bool> {
  match ctx.configuration.options.get(name) {
    Some(OptionValue::Bool(b)) => Some(*b),
    _ => None,
  }
}

fn on_off(value: bool) -> &'static str {
  if value { "ON" } else { "OFF" }
}

fn meson_buildtype(build_type: &str) -> &'static str {
  match build_type {
    "Debug" => "debug",
    "RelWithDebInfo" => "debugoptimized",
    "MinSizeRel" => "minsize",
    _ => "release",
  }
}

fn msbuild_platform(arch: &str) -> &'static str {
  match arch {
    "x86" => "Win32",
    "armv8" => "ARM64",
    "armv7" | "armv7hf" => "ARM",
    _ => "x64",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::execute::context::tests::context;
  use crate::execute::tool::ToolOutput;
  use crate::recipe::CustomSteps;
  use async_trait::async_trait;
  use std::io;
  use std::sync::Mutex;

  struct Recording {
    calls: Mutex<Vec<CommandSpec>>,
    fail_on: Option<&'static str>,
  }

  impl Recording {
    fn new(fail_on: Option<&'static str>) -> Self {
      Self {
        calls: Mutex::new(Vec::new()),
        fail_on,
      }
    }
  }

  #[async_trait]
  impl ToolRunner for Recording {
    async fn run(&self, spec: &CommandSpec) -> io::Result<ToolOutput> {
      self.calls.lock().unwrap().push(spec.clone());
      let failed = self.fail_on.is_some_and(|arg| spec.args.iter().any(|a| a == arg));
      Ok(ToolOutput {
        code: Some(if failed { 2 } else { 0 }),
        stdout: "ok\n".into(),
        stderr: if failed { "undefined reference to `inflate'\n".into() } else { String::new() },
      })
    }
  }

  #[test]
  fn cmake_configure_reflects_configuration() {
    let ctx = context();
    let commands = BuildSystemKind::CMake.commands(Step::Build, &ctx).unwrap();
    assert_eq!(commands.len(), 2);
    let configure = &commands[0];
    assert!(configure.args.contains(&"-DCMAKE_BUILD_TYPE=Release".to_string()));
    assert!(configure.args.contains(&"-DCMAKE_INSTALL_PREFIX=/scratch/package".to_string()));
    assert!(configure.args.contains(&"-DBUILD_SHARED_LIBS=ON".to_string()));
    assert!(configure.args.contains(&"-DZLIB_ROOT=/store/pkg/aaaa".to_string()));
    assert!(configure.env.contains_key("CMAKE_PREFIX_PATH"));
    assert_eq!(commands[1].args[..2], ["--build".to_string(), "/scratch/build".to_string()]);
  }

  #[test]
  fn source_step_has_no_commands() {
    let ctx = context();
    assert!(BuildSystemKind::Meson.commands(Step::Source, &ctx).unwrap().is_empty());
  }

  #[test]
  fn meson_maps_build_type_and_library_kind() {
    let ctx = context();
    let setup = &BuildSystemKind::Meson.commands(Step::Build, &ctx).unwrap()[0];
    assert!(setup.args.contains(&"--buildtype=release".to_string()));
    assert!(setup.args.contains(&"-Ddefault_library=shared".to_string()));
  }

  #[test]
  fn custom_steps_are_substituted_shell_commands() {
    let ctx = context();
    let kind = BuildSystemKind::Custom(CustomSteps {
      build: vec!["make -j$${jobs} PREFIX=$${package}".into()],
      package: vec![],
    });
    let commands = kind.commands(Step::Build, &ctx).unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].args.last().unwrap(), "make -j8 PREFIX=/scratch/package");
    assert_eq!(commands[0].env["ZLIB_ROOT"], "/store/pkg/aaaa");
  }

  #[test]
  fn unresolved_placeholder_is_an_error() {
    let ctx = context();
    let kind = BuildSystemKind::Custom(CustomSteps {
      build: vec!["echo $${option:with_zstd}".into()],
      package: vec![],
    });
    assert!(kind.commands(Step::Build, &ctx).is_err());
  }

  #[tokio::test]
  async fn invoke_runs_commands_in_order_and_logs_output() {
    let ctx = context();
    let runner = Recording::new(None);
    let mut log = String::new();
    BuildSystemKind::Autotools
      .invoke(Step::Build, &ctx, &runner, &mut log)
      .await
      .unwrap();

    let calls = runner.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].program.ends_with("configure"));
    assert_eq!(calls[1].program, "make");
    assert!(log.contains("$ make -j 8"));
  }

  #[tokio::test]
  async fn non_zero_exit_stops_the_step() {
    let ctx = context();
    let runner = Recording::new(Some("--build"));
    let mut log = String::new();
    let err = BuildSystemKind::CMake
      .invoke(Step::Build, &ctx, &runner, &mut log)
      .await
      .unwrap_err();

    assert_eq!(
      err,
      FailureReason::BuildToolFailure {
        tool: "cmake".into(),
        step: Step::Build,
        code: Some(2),
        stderr_tail: "undefined reference to `inflate'".into(),
      }
    );
    assert!(log.contains("undefined reference"));
  }
}
