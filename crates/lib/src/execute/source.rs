//! The source step: fetch, extract, export sources and patch.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::context::BuildContext;
use super::extract::extract_archive;
use super::fetch::{Downloader, fetch_source};
use super::tool::{CommandSpec, ToolRunner};
use super::types::{ExecuteConfig, FailureReason, Step};
use crate::recipe::{PatchSpec, Recipe};

/// Populate `ctx.source_dir`.
///
/// `downloads` receives the fetched archive and is not part of the package.
pub async fn prepare_source(
  recipe: &Recipe,
  ctx: &BuildContext,
  downloads: &Path,
  downloader: &dyn Downloader,
  runner: &dyn ToolRunner,
  config: &ExecuteConfig,
  log: &mut String,
) -> Result<(), FailureReason> {
  if let Some(source) = &recipe.source {
    let archive = fetch_source(downloader, source, downloads, config.fetch_retries, config.fetch_backoff).await?;
    let _ = writeln!(log, "fetched {}", archive.display());

    let (archive_path, dest, strip_root) = (archive.clone(), ctx.source_dir.clone(), source.strip_root);
    tokio::task::spawn_blocking(move || extract_archive(&archive_path, &dest, strip_root))
      .await
      .map_err(|e| FailureReason::Internal { message: e.to_string() })?
      .map_err(|e| FailureReason::io("extracting sources", e))?;
    info!(package = %recipe.reference(), archive = ?archive, "sources extracted");
  }

  if !recipe.exports_sources.is_empty() {
    export_sources(
      recipe.recipe_dir.clone(),
      recipe.exports_sources.clone(),
      ctx.source_dir.clone(),
    )
    .await?;
  }

  for patch in &recipe.patches {
    apply_patch(recipe, patch, ctx, runner, log).await?;
  }
  Ok(())
}

/// Copy files shipped next to the recipe into the source tree, off the async
/// runtime.
async fn export_sources(recipe_dir: PathBuf, patterns: Vec<String>, source_dir: PathBuf) -> Result<(), FailureReason> {
  tokio::task::spawn_blocking(move || copy_exports_sources(&recipe_dir, &patterns, &source_dir))
    .await
    .map_err(|e| FailureReason::Internal { message: e.to_string() })?
}

fn copy_exports_sources(recipe_dir: &Path, patterns: &[String], source_dir: &Path) -> Result<(), FailureReason> {
  for pattern in patterns {
    let full = format!("{}/{}", glob::Pattern::escape(&recipe_dir.to_string_lossy()), pattern);
    let matches = glob::glob(&full).map_err(|e| FailureReason::Internal {
      message: format!("invalid exports_sources pattern '{pattern}': {e}"),
    })?;
    for path in matches.flatten() {
      let relative = path.strip_prefix(recipe_dir).unwrap_or(&path);
      let target = source_dir.join(relative);
      if path.is_dir() {
        crate::util::fs::copy_dir_all(&path, &target).map_err(|e| FailureReason::io(target.display(), e))?;
        continue;
      }
      if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| FailureReason::io(parent.display(), e))?;
      }
      std::fs::copy(&path, &target).map_err(|e| FailureReason::io(target.display(), e))?;
      debug!(file = ?relative, "exported source");
    }
  }
  Ok(())
}

async fn apply_patch(
  recipe: &Recipe,
  patch: &PatchSpec,
  ctx: &BuildContext,
  runner: &dyn ToolRunner,
  log: &mut String,
) -> Result<(), FailureReason> {
  let patch_file = recipe.recipe_dir.join(&patch.patch_file);
  let cwd = match &patch.base_path {
    Some(base) => ctx.source_dir.join(base),
    None => ctx.source_dir.clone(),
  };
  if let Some(description) = &patch.patch_description {
    info!(package = %recipe.reference(), patch = %patch.patch_file, "{description}");
  }

  let command = CommandSpec::new("patch", cwd).args([
    "-p1".to_string(),
    "-i".to_string(),
    patch_file.to_string_lossy().to_string(),
  ]);
  let _ = writeln!(log, "$ {command}");
  let output = runner.run(&command).await.map_err(|e| FailureReason::BuildToolFailure {
    tool: "patch".to_string(),
    step: Step::Source,
    code: None,
    stderr_tail: e.to_string(),
  })?;
  log.push_str(&output.stdout);
  log.push_str(&output.stderr);

  if !output.success() {
    return Err(FailureReason::BuildToolFailure {
      tool: "patch".to_string(),
      step: Step::Source,
      code: output.code,
      stderr_tail: output.stderr_tail(),
    });
  }
  Ok(())
}
