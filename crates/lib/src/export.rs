//! Export a recipe into the local recipe store.
//!
//! The recipe file is validated first, then copied with its data file, its
//! `patches/` directory and any exported sources into `<recipes>/<name>/`.
//! A previous export of the same package is replaced as a whole.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::consts::RECIPE_DATA_FILE;
use crate::recipe::{RecipeError, find_recipe_file, load_recipe_file};
use crate::util::fs::{copy_dir_all, remove_path};
use crate::version::Version;

const PATCHES_DIR: &str = "patches";

#[derive(Debug, Error)]
pub enum ExportError {
  #[error(transparent)]
  Recipe(#[from] RecipeError),

  #[error("{0} declares no versions")]
  NoVersions(PathBuf),

  #[error("recipe file {0} declares more than one package")]
  MultiplePackages(PathBuf),

  #[error("failed to export to {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
  pub name: String,
  pub versions: Vec<Version>,
  /// SHA-256 of the recipe file and its data file.
  pub revision: String,
  pub path: PathBuf,
}

/// Validate the recipe at `path` and copy it below `recipes_dir`.
pub fn export_recipe(path: &Path, recipes_dir: &Path) -> Result<ExportResult, ExportError> {
  let file = find_recipe_file(path)?;
  let recipes = load_recipe_file(&file)?;
  let first = recipes.first().ok_or_else(|| ExportError::NoVersions(file.clone()))?;
  if recipes.iter().any(|r| r.name != first.name) {
    return Err(ExportError::MultiplePackages(file));
  }

  let name = first.name.clone();
  let revision = first.revision.clone();
  let source_dir = first.recipe_dir.clone();
  let mut versions: Vec<Version> = recipes.iter().map(|r| r.version.clone()).collect();
  versions.sort();

  let io_err = |path: &Path| {
    let path = path.to_path_buf();
    move |source: std::io::Error| ExportError::Io { path, source }
  };

  fs::create_dir_all(recipes_dir).map_err(io_err(recipes_dir))?;
  let staging = tempfile::Builder::new()
    .prefix(&format!(".{name}-"))
    .tempdir_in(recipes_dir)
    .map_err(io_err(recipes_dir))?;

  let file_name = file.file_name().unwrap_or_default();
  fs::copy(&file, staging.path().join(file_name)).map_err(io_err(&file))?;

  let data = source_dir.join(RECIPE_DATA_FILE);
  if data.is_file() {
    fs::copy(&data, staging.path().join(RECIPE_DATA_FILE)).map_err(io_err(&data))?;
  }

  let patches = source_dir.join(PATCHES_DIR);
  if patches.is_dir() {
    copy_dir_all(&patches, &staging.path().join(PATCHES_DIR)).map_err(io_err(&patches))?;
  }

  for recipe in &recipes {
    for pattern in &recipe.exports_sources {
      copy_exported(&source_dir, pattern, staging.path())?;
    }
  }

  let dest = recipes_dir.join(&name);
  remove_path(&dest).map_err(io_err(&dest))?;
  let staged = staging.keep();
  fs::rename(&staged, &dest).map_err(io_err(&dest))?;

  info!(name = %name, versions = versions.len(), revision = %revision, "exported recipe");
  Ok(ExportResult {
    name,
    versions,
    revision,
    path: dest,
  })
}

fn copy_exported(source_dir: &Path, pattern: &str, dest: &Path) -> Result<(), ExportError> {
  let full = format!("{}/{}", glob::Pattern::escape(&source_dir.to_string_lossy()), pattern);
  let Ok(matches) = glob::glob(&full) else {
    // Patterns were validated at load time.
    return Ok(());
  };
  for path in matches.flatten() {
    let relative = path.strip_prefix(source_dir).unwrap_or(&path);
    let target = dest.join(relative);
    let result = if path.is_dir() {
      copy_dir_all(&path, &target)
    } else {
      target
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|_| fs::copy(&path, &target).map(|_| ()))
    };
    result.map_err(|source| ExportError::Io { path: target, source })?;
  }
  Ok(())
}
