//! Recipes: declarative descriptions of how to build one package.
//!
//! A recipe declares the settings axes it depends on, its options with their
//! domains and defaults, its requirements, the rules that prune or adjust the
//! configuration, and how to fetch, build and package the sources.

mod index;
mod load;
mod types;
mod validate;

use std::path::PathBuf;

use thiserror::Error;

pub use index::RecipeIndex;
pub use load::{find_recipe_file, load_recipe_file, parse_reference};
pub use types::*;
pub use validate::validate_recipe;

#[derive(Debug, Error)]
pub enum RecipeError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to evaluate {path}: {message}")]
  Lua { path: PathBuf, message: String },

  #[error("failed to parse {path}: {message}")]
  Parse { path: PathBuf, message: String },

  #[error("unsupported recipe file {0} (expected recipe.lua or recipe.toml)")]
  UnsupportedFile(PathBuf),

  #[error("invalid recipe {recipe}: {reason}")]
  Invalid { recipe: String, reason: String },

  #[error("no recipe found at {0}")]
  NotFound(PathBuf),
}
