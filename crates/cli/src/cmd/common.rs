//! Arguments and setup shared by several commands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use kiln_lib::execute::{ExecuteConfig, StepTimeouts};
use kiln_lib::graph::{DepGraph, RootRequest, build_graph};
use kiln_lib::platform::paths;
use kiln_lib::profile::Profile;
use kiln_lib::recipe::RecipeIndex;

/// How packages are configured and where recipes come from.
#[derive(Debug, Clone, Args)]
pub struct ResolveArgs {
  /// Profile file or name under the profiles directory (default: detected host profile)
  #[arg(long)]
  pub profile: Option<String>,

  /// Option override, `[pkg:]option=value` (repeatable)
  #[arg(short = 'o', long = "option", value_name = "OPTION=VALUE")]
  pub options: Vec<String>,

  /// Setting override, `setting=value` (repeatable)
  #[arg(short = 's', long = "setting", value_name = "SETTING=VALUE")]
  pub settings: Vec<String>,

  /// Additional recipe root searched before the recipe store (repeatable)
  #[arg(long = "recipes", value_name = "DIR")]
  pub recipes: Vec<PathBuf>,
}

/// Resolution arguments plus executor tuning.
#[derive(Debug, Clone, Args)]
pub struct BuildArgs {
  #[command(flatten)]
  pub resolve: ResolveArgs,

  /// Parallelism passed to build tools
  #[arg(short = 'j', long)]
  pub jobs: Option<usize>,

  /// Maximum number of packages building at once
  #[arg(long)]
  pub parallel: Option<usize>,

  /// Time limit for fetching and preparing sources (e.g. `10m`)
  #[arg(long)]
  pub source_timeout: Option<humantime::Duration>,

  /// Time limit for the build step
  #[arg(long)]
  pub build_timeout: Option<humantime::Duration>,

  /// Time limit for the package step
  #[arg(long)]
  pub package_timeout: Option<humantime::Duration>,

  /// Download retries per mirror after the first failed attempt
  #[arg(long)]
  pub retries: Option<usize>,
}

impl BuildArgs {
  pub fn execute_config(&self) -> ExecuteConfig {
    let mut config = ExecuteConfig::default();
    if let Some(jobs) = self.jobs {
      config.jobs = jobs.max(1);
    }
    if let Some(parallel) = self.parallel {
      config.parallelism = parallel.max(1);
    }
    if let Some(retries) = self.retries {
      config.fetch_retries = retries;
    }
    config.timeouts = StepTimeouts {
      source: self.source_timeout.map(Into::into),
      build: self.build_timeout.map(Into::into),
      package: self.package_timeout.map(Into::into),
    };
    config
  }
}

#[derive(Debug, Clone, Args)]
pub struct GcArgs {
  /// Keep at most this many artifacts
  #[arg(long)]
  pub max_entries: Option<usize>,

  /// Keep at most this much artifact data (e.g. `500M`, `20G`)
  #[arg(long, value_parser = parse_size)]
  pub max_size: Option<u64>,

  /// Show what would be removed without deleting anything
  #[arg(long)]
  pub dry_run: bool,
}

/// Parse a byte count with an optional `K`, `M`, `G` or `T` suffix (powers of 1024).
pub fn parse_size(input: &str) -> Result<u64, String> {
  let trimmed = input.trim();
  let upper = trimmed.to_ascii_uppercase();
  let digits = upper.trim_end_matches('B');
  let (number, shift) = match digits.chars().last() {
    Some('K') => (&digits[..digits.len() - 1], 10),
    Some('M') => (&digits[..digits.len() - 1], 20),
    Some('G') => (&digits[..digits.len() - 1], 30),
    Some('T') => (&digits[..digits.len() - 1], 40),
    _ => (digits, 0),
  };
  let value: u64 = number
    .trim()
    .parse()
    .map_err(|_| format!("invalid size '{trimmed}'"))?;
  value
    .checked_mul(1u64 << shift)
    .ok_or_else(|| format!("size '{trimmed}' is too large"))
}

/// The selected profile with command-line overrides applied.
pub fn load_profile(args: &ResolveArgs) -> Result<Profile> {
  let mut profile = match &args.profile {
    Some(name) => Profile::find(name).with_context(|| format!("Failed to load profile '{name}'"))?,
    None => Profile::detect(),
  };
  profile
    .apply_setting_overrides(&args.settings)
    .context("Invalid setting override")?;
  profile
    .apply_option_overrides(&args.options)
    .context("Invalid option override")?;
  Ok(profile)
}

/// Recipes from `--recipes` roots, then the recipe store.
pub fn load_recipes(args: &ResolveArgs) -> Result<RecipeIndex> {
  let mut roots = args.recipes.clone();
  roots.push(paths::recipes_dir());
  RecipeIndex::load_roots(&roots).context("Failed to load recipes")
}

pub fn resolve_graph(references: &[String], args: &ResolveArgs) -> Result<DepGraph> {
  let profile = load_profile(args)?;
  let index = load_recipes(args)?;
  let roots = references
    .iter()
    .map(|r| RootRequest::parse(r))
    .collect::<Result<Vec<_>, _>>()
    .context("Invalid package reference")?;
  build_graph(&index, &roots, &profile).context("Dependency resolution failed")
}
