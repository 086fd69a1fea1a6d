mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{BuildArgs, GcArgs, ResolveArgs};
use output::OutputFormat;

/// kiln - recipe-driven package builds
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build the requested packages and their dependencies, reusing cached artifacts
  Install {
    /// Package references (`name` or `name/range`)
    #[arg(required = true)]
    references: Vec<String>,

    #[command(flatten)]
    args: BuildArgs,
  },

  /// Like install, but always rebuild the requested packages
  Build {
    /// Package references (`name` or `name/range`)
    #[arg(required = true)]
    references: Vec<String>,

    #[command(flatten)]
    args: BuildArgs,
  },

  /// Validate a recipe and copy it into the local recipe store
  Export {
    /// Recipe file or directory containing one
    path: PathBuf,
  },

  /// Show the resolved dependency graph without building
  Info {
    /// Package references (`name` or `name/range`)
    #[arg(required = true)]
    references: Vec<String>,

    #[command(flatten)]
    args: ResolveArgs,
  },

  /// Remove stale scratch space and evict artifacts beyond the given limits
  Gc {
    #[command(flatten)]
    args: GcArgs,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  let filter = std::env::var("KILN_LOG")
    .ok()
    .and_then(|spec| EnvFilter::try_new(spec).ok())
    .or_else(|| EnvFilter::try_from_default_env().ok())
    .unwrap_or_else(|| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .with_target(false)
    .init();

  match cli.command {
    Commands::Install { references, args } => cmd::cmd_install(&references, &args, false, cli.output),
    Commands::Build { references, args } => cmd::cmd_install(&references, &args, true, cli.output),
    Commands::Export { path } => cmd::cmd_export(&path, cli.output),
    Commands::Info { references, args } => cmd::cmd_info(&references, &args, cli.output),
    Commands::Gc { args } => cmd::cmd_gc(&args, cli.output),
  }
}
