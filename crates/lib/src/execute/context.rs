//! What a build step sees: folders, configuration and dependency locations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::configure::Configuration;
use crate::placeholder::{self, Meta, PlaceholderError, Resolver};
use crate::recipe::Folder;

/// Inputs of one node's build steps.
#[derive(Debug, Clone)]
pub struct BuildContext {
  pub name: String,
  pub version: String,
  pub configuration: Configuration,
  pub source_dir: PathBuf,
  pub build_dir: PathBuf,
  pub package_dir: PathBuf,
  pub jobs: usize,
  /// Published artifact directory of every transitive dependency, by name.
  pub deps: BTreeMap<String, PathBuf>,
  /// Recipe variables, substituted before use.
  pub variables: BTreeMap<String, String>,
}

impl BuildContext {
  pub fn folder(&self, folder: Folder) -> &Path {
    match folder {
      Folder::Source => &self.source_dir,
      Folder::Build => &self.build_dir,
      Folder::Package => &self.package_dir,
    }
  }

  /// Substitute placeholders in a recipe string.
  pub fn substitute(&self, input: &str) -> Result<String, PlaceholderError> {
    placeholder::substitute(input, self)
  }

  /// Recipe variables with placeholders substituted, in name order.
  pub fn resolved_variables(&self) -> Result<BTreeMap<String, String>, PlaceholderError> {
    self
      .variables
      .iter()
      .map(|(k, v)| Ok((k.clone(), self.substitute(v)?)))
      .collect()
  }

  /// Environment exposing dependency prefixes to native build tools.
  pub fn env(&self) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    if self.deps.is_empty() {
      return env;
    }

    let prefixes: Vec<&PathBuf> = self.deps.values().collect();
    if let Ok(joined) = std::env::join_paths(&prefixes) {
      env.insert("CMAKE_PREFIX_PATH".to_string(), joined.to_string_lossy().to_string());
    }
    let pkg_config: Vec<PathBuf> = prefixes.iter().map(|p| p.join("lib").join("pkgconfig")).collect();
    if let Ok(joined) = std::env::join_paths(&pkg_config) {
      env.insert("PKG_CONFIG_PATH".to_string(), joined.to_string_lossy().to_string());
    }
    env
  }
}

impl Resolver for BuildContext {
  fn resolve_folder(&self, folder: Folder) -> Result<String, PlaceholderError> {
    Ok(self.folder(folder).to_string_lossy().to_string())
  }

  fn resolve_meta(&self, meta: Meta) -> Result<String, PlaceholderError> {
    Ok(match meta {
      Meta::Name => self.name.clone(),
      Meta::Version => self.version.clone(),
      Meta::Jobs => self.jobs.to_string(),
    })
  }

  fn resolve_option(&self, name: &str) -> Result<String, PlaceholderError> {
    self
      .configuration
      .options
      .get(name)
      .map(ToString::to_string)
      .ok_or_else(|| PlaceholderError::UnresolvedOption(name.to_string()))
  }

  fn resolve_setting(&self, name: &str) -> Result<String, PlaceholderError> {
    self
      .configuration
      .settings
      .get(name)
      .cloned()
      .ok_or_else(|| PlaceholderError::UnresolvedSetting(name.to_string()))
  }

  fn resolve_dep(&self, name: &str) -> Result<String, PlaceholderError> {
    self
      .deps
      .get(name)
      .map(|p| p.to_string_lossy().to_string())
      .ok_or_else(|| PlaceholderError::UnresolvedDependency(name.to_string()))
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::recipe::OptionValue;

  pub(crate) fn context() -> BuildContext {
    let mut configuration = Configuration::default();
    configuration.settings.insert("build_type".into(), "Release".into());
    configuration.options.insert("shared".into(), OptionValue::Bool(true));

    let mut deps = BTreeMap::new();
    deps.insert("zlib".to_string(), PathBuf::from("/store/pkg/aaaa"));

    let mut variables = BTreeMap::new();
    variables.insert("ZLIB_ROOT".to_string(), "$${dep:zlib}".to_string());

    BuildContext {
      name: "libpng".into(),
      version: "1.6.43".into(),
      configuration,
      source_dir: PathBuf::from("/scratch/source"),
      build_dir: PathBuf::from("/scratch/build"),
      package_dir: PathBuf::from("/scratch/package"),
      jobs: 8,
      deps,
      variables,
    }
  }

  #[test]
  fn substitutes_every_placeholder_kind() {
    let ctx = context();
    let out = ctx
      .substitute("$${name}-$${version} -j$${jobs} $${build} $${option:shared} $${setting:build_type} $${dep:zlib}")
      .unwrap();
    assert_eq!(
      out,
      "libpng-1.6.43 -j8 /scratch/build True Release /store/pkg/aaaa"
    );
  }

  #[test]
  fn unknown_references_fail() {
    let ctx = context();
    assert_eq!(
      ctx.substitute("$${option:fPIC}"),
      Err(PlaceholderError::UnresolvedOption("fPIC".into()))
    );
    assert_eq!(
      ctx.substitute("$${dep:openssl}"),
      Err(PlaceholderError::UnresolvedDependency("openssl".into()))
    );
  }

  #[test]
  fn variables_are_substituted() {
    let vars = context().resolved_variables().unwrap();
    assert_eq!(vars["ZLIB_ROOT"], "/store/pkg/aaaa");
  }

  #[cfg(unix)]
  #[test]
  fn env_exposes_dependency_prefixes() {
    let env = context().env();
    assert_eq!(env["CMAKE_PREFIX_PATH"], "/store/pkg/aaaa");
    assert_eq!(env["PKG_CONFIG_PATH"], "/store/pkg/aaaa/lib/pkgconfig");
  }
}
