use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::load::{find_recipe_file, load_recipe_file};
use super::types::Recipe;
use super::RecipeError;
use crate::consts::RECIPE_FILE_NAMES;
use crate::version::Version;

/// Every known recipe, by name and version.
///
/// Recipe roots are searched in order; the first root providing a given
/// `name/version` wins and later duplicates are shadowed.
#[derive(Debug, Clone, Default)]
pub struct RecipeIndex {
  recipes: BTreeMap<String, BTreeMap<Version, Arc<Recipe>>>,
}

impl RecipeIndex {
  pub fn new() -> Self {
    Self::default()
  }

  /// Load every recipe found below the given roots.
  ///
  /// A root may itself be a recipe directory or a tree of them. Missing roots
  /// are skipped with a warning.
  pub fn load_roots(roots: &[PathBuf]) -> Result<Self, RecipeError> {
    let mut index = Self::new();
    for root in roots {
      if !root.exists() {
        warn!(root = %root.display(), "recipe root does not exist");
        continue;
      }
      for file in discover(root) {
        for recipe in load_recipe_file(&file)? {
          index.insert(recipe);
        }
      }
    }
    debug!(packages = index.recipes.len(), "recipe index loaded");
    Ok(index)
  }

  /// Load a single recipe file or directory.
  pub fn load_path(path: &Path) -> Result<Self, RecipeError> {
    let mut index = Self::new();
    for recipe in load_recipe_file(&find_recipe_file(path)?)? {
      index.insert(recipe);
    }
    Ok(index)
  }

  /// Add a recipe unless the same `name/version` is already known.
  pub fn insert(&mut self, recipe: Recipe) -> bool {
    let versions = self.recipes.entry(recipe.name.clone()).or_default();
    if let Some(existing) = versions.get(&recipe.version) {
      debug!(
        reference = %recipe.reference(),
        kept = %existing.recipe_dir.display(),
        shadowed = %recipe.recipe_dir.display(),
        "recipe shadowed"
      );
      return false;
    }
    versions.insert(recipe.version.clone(), Arc::new(recipe));
    true
  }

  pub fn versions(&self, name: &str) -> impl Iterator<Item = &Version> {
    self.recipes.get(name).into_iter().flat_map(|v| v.keys())
  }

  pub fn get(&self, name: &str, version: &Version) -> Option<Arc<Recipe>> {
    self.recipes.get(name)?.get(version).cloned()
  }

  pub fn contains_package(&self, name: &str) -> bool {
    self.recipes.contains_key(name)
  }

  pub fn packages(&self) -> impl Iterator<Item = &str> {
    self.recipes.keys().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.recipes.values().map(BTreeMap::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.recipes.is_empty()
  }
}

/// Recipe files below `root`. A directory holding a recipe is not descended
/// into further, and `recipe.lua` wins over `recipe.toml` in the same directory.
fn discover(root: &Path) -> Vec<PathBuf> {
  if root.is_file() {
    return vec![root.to_path_buf()];
  }

  let mut files = Vec::new();
  let mut walker = WalkDir::new(root).follow_links(true).sort_by_file_name().into_iter();
  while let Some(entry) = walker.next() {
    let entry = match entry {
      Ok(entry) => entry,
      Err(e) => {
        warn!(error = %e, "skipping unreadable entry");
        continue;
      }
    };
    if !entry.file_type().is_dir() {
      continue;
    }
    let found = RECIPE_FILE_NAMES
      .iter()
      .map(|name| entry.path().join(name))
      .find(|candidate| candidate.is_file());
    if let Some(file) = found {
      files.push(file);
      walker.skip_current_dir();
    }
  }
  files
}
