//! Package IDs: the cache key of a (recipe, configuration) pair.
//!
//! The ID is the truncated SHA-256 of the canonical JSON form of
//! [`PackageIdInput`]: the recipe reference, the reduced settings and options,
//! and the direct requirements. Every map is a `BTreeMap`, so the serialized
//! form, and therefore the ID, is identical across runs and platforms.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::configure::Configuration;
use crate::consts::PACKAGE_ID_LEN;
use crate::recipe::{Recipe, RequiresMode};
use crate::util::hash::{HashError, Hashable};
use crate::version::Version;

/// Settings dropped by a header-only reduction.
const HEADER_ONLY_DROPPED: &[&str] = &["arch", "build_type", "compiler"];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
  /// Wrap an existing ID string, e.g. read back from the cache index.
  pub fn from_hex(hex: impl Into<String>) -> Option<Self> {
    let hex = hex.into();
    let valid = hex.len() == PACKAGE_ID_LEN && hex.chars().all(|c| c.is_ascii_hexdigit());
    valid.then(|| Self(hex.to_ascii_lowercase()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for PackageId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<PackageId> for String {
  fn from(value: PackageId) -> Self {
    value.0
  }
}

/// The exact value hashed into a package ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageIdInput {
  pub recipe: String,
  pub settings: BTreeMap<String, String>,
  pub options: BTreeMap<String, String>,
  pub requires: Vec<String>,
}

impl Hashable for PackageIdInput {}

fn drops(dropped: &str, key: &str) -> bool {
  key == dropped || key.strip_prefix(dropped).is_some_and(|rest| rest.starts_with('.'))
}

fn major_segment(value: &str) -> String {
  match Version::parse(value).ok().and_then(|v| v.major()) {
    Some(major) => major.to_string(),
    None => value.to_string(),
  }
}

/// Apply the recipe's reductions to a configuration.
///
/// `requires` are the resolved direct (non-build) requirements.
pub fn package_id_input(recipe: &Recipe, configuration: &Configuration, requires: &[(String, Version)]) -> PackageIdInput {
  let rules = &recipe.package_id;

  let settings = configuration
    .settings
    .iter()
    .filter(|(key, _)| !(rules.header_only && HEADER_ONLY_DROPPED.iter().any(|d| drops(d, key))))
    .filter(|(key, _)| !rules.drop_settings.iter().any(|d| drops(d, key)))
    .map(|(key, value)| {
      let value = if rules.major_only.contains(key) {
        major_segment(value)
      } else {
        value.clone()
      };
      (key.clone(), value)
    })
    .collect();

  let options = configuration
    .options
    .iter()
    .filter(|(key, _)| !rules.drop_options.contains(key))
    .map(|(key, value)| (key.clone(), value.to_string()))
    .collect();

  let mode = if rules.header_only {
    RequiresMode::Ignore
  } else {
    rules.requires
  };
  let mut requires: Vec<String> = match mode {
    RequiresMode::Ignore => Vec::new(),
    RequiresMode::Full => requires.iter().map(|(name, version)| format!("{name}/{version}")).collect(),
    RequiresMode::Major => requires
      .iter()
      .map(|(name, version)| match version.major() {
        Some(major) => format!("{name}/{major}.Y.Z"),
        None => format!("{name}/{version}"),
      })
      .collect(),
  };
  requires.sort();
  requires.dedup();

  PackageIdInput {
    recipe: recipe.reference(),
    settings,
    options,
    requires,
  }
}

/// Compute the package ID of `recipe` built with `configuration`.
pub fn compute_package_id(
  recipe: &Recipe,
  configuration: &Configuration,
  requires: &[(String, Version)],
) -> Result<PackageId, HashError> {
  let hash = package_id_input(recipe, configuration, requires).compute_hash()?;
  Ok(PackageId(hash.0))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::recipe::{
    BuildSystemKind, OptionValue, PackageIdRules, PackageInfo, PackageRules, RecipeMetadata,
  };
  use crate::settings::SettingAxis;

  fn recipe(name: &str, version: &str, package_id: PackageIdRules) -> Recipe {
    Recipe {
      name: name.to_string(),
      version: Version::parse(version).unwrap(),
      metadata: RecipeMetadata::default(),
      settings: SettingAxis::ALL.to_vec(),
      options: BTreeMap::new(),
      requires: Vec::new(),
      build_requires: Vec::new(),
      rules: Vec::new(),
      validate: Vec::new(),
      min_cppstd: None,
      min_compiler_versions: BTreeMap::new(),
      package_id,
      build_system: BuildSystemKind::CMake,
      variables: BTreeMap::new(),
      exports_sources: Vec::new(),
      source: None,
      patches: Vec::new(),
      package: PackageRules::default(),
      package_info: PackageInfo::default(),
      recipe_dir: std::env::temp_dir(),
      revision: String::new(),
    }
  }

  fn config(settings: &[(&str, &str)], options: &[(&str, OptionValue)]) -> Configuration {
    Configuration {
      settings: settings.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
      options: options.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
    }
  }

  fn gcc(version: &str, build_type: &str) -> Configuration {
    config(
      &[
        ("os", "Linux"),
        ("arch", "x86_64"),
        ("build_type", build_type),
        ("compiler", "gcc"),
        ("compiler.version", version),
      ],
      &[("shared", OptionValue::Bool(false))],
    )
  }

  fn id(recipe: &Recipe, configuration: &Configuration) -> PackageId {
    compute_package_id(recipe, configuration, &[]).unwrap()
  }

  #[test]
  fn id_is_forty_lowercase_hex() {
    let pid = id(&recipe("zlib", "1.3.1", PackageIdRules::default()), &gcc("13", "Release"));
    assert_eq!(pid.as_str().len(), PACKAGE_ID_LEN);
    assert!(pid.as_str().chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
  }

  #[test]
  fn id_is_deterministic() {
    let r = recipe("zlib", "1.3.1", PackageIdRules::default());
    assert_eq!(id(&r, &gcc("13", "Release")), id(&r, &gcc("13", "Release")));
    assert_ne!(id(&r, &gcc("13", "Release")), id(&r, &gcc("13", "Debug")));
  }

  #[test]
  fn header_only_ignores_compiler_and_build_type() {
    let r = recipe(
      "nlohmann_json",
      "3.11.3",
      PackageIdRules {
        header_only: true,
        ..Default::default()
      },
    );
    assert_eq!(id(&r, &gcc("11", "Debug")), id(&r, &gcc("13", "Release")));

    let input = package_id_input(&r, &gcc("13", "Release"), &[]);
    assert_eq!(input.settings.keys().collect::<Vec<_>>(), vec!["os"]);
  }

  #[test]
  fn drop_compiler_keeps_build_type() {
    let r = recipe(
      "cjson",
      "1.7.17",
      PackageIdRules {
        drop_settings: vec!["compiler".to_string()],
        ..Default::default()
      },
    );
    assert_eq!(id(&r, &gcc("11", "Release")), id(&r, &gcc("13", "Release")));
    assert_ne!(id(&r, &gcc("13", "Debug")), id(&r, &gcc("13", "Release")));
  }

  #[test]
  fn major_only_merges_minor_compiler_versions() {
    let r = recipe(
      "fmt",
      "10.2.1",
      PackageIdRules {
        major_only: vec!["compiler.version".to_string()],
        ..Default::default()
      },
    );
    assert_eq!(id(&r, &gcc("13.1", "Release")), id(&r, &gcc("13.2", "Release")));
    assert_ne!(id(&r, &gcc("12.3", "Release")), id(&r, &gcc("13.2", "Release")));
  }

  #[test]
  fn dropped_options_do_not_matter() {
    let r = recipe(
      "spdlog",
      "1.13.0",
      PackageIdRules {
        drop_options: vec!["shared".to_string()],
        ..Default::default()
      },
    );
    let mut shared = gcc("13", "Release");
    shared.options.insert("shared".to_string(), OptionValue::Bool(true));
    assert_eq!(id(&r, &shared), id(&r, &gcc("13", "Release")));
  }

  #[test]
  fn distinct_recipes_never_collide() {
    let header_only = PackageIdRules {
      header_only: true,
      ..Default::default()
    };
    let configuration = gcc("13", "Release");
    assert_ne!(
      id(&recipe("libfoo", "1.0", header_only.clone()), &configuration),
      id(&recipe("libbar", "1.0", header_only.clone()), &configuration)
    );
    assert_ne!(
      id(&recipe("libfoo", "1.0", header_only.clone()), &configuration),
      id(&recipe("libfoo", "1.1", header_only), &configuration)
    );
  }

  #[test]
  fn requires_modes() {
    let zlib_131 = vec![("zlib".to_string(), Version::parse("1.3.1").unwrap())];
    let zlib_130 = vec![("zlib".to_string(), Version::parse("1.3").unwrap())];
    let configuration = gcc("13", "Release");

    let full = recipe("libpng", "1.6.43", PackageIdRules::default());
    assert_ne!(
      compute_package_id(&full, &configuration, &zlib_131).unwrap(),
      compute_package_id(&full, &configuration, &zlib_130).unwrap()
    );

    let major = recipe(
      "libpng",
      "1.6.43",
      PackageIdRules {
        requires: RequiresMode::Major,
        ..Default::default()
      },
    );
    assert_eq!(
      compute_package_id(&major, &configuration, &zlib_131).unwrap(),
      compute_package_id(&major, &configuration, &zlib_130).unwrap()
    );
    assert_eq!(
      package_id_input(&major, &configuration, &zlib_131).requires,
      vec!["zlib/1.Y.Z"]
    );
  }

  #[test]
  fn from_hex_validates_length() {
    assert!(PackageId::from_hex("abc").is_none());
    let pid = id(&recipe("zlib", "1.3.1", PackageIdRules::default()), &gcc("13", "Release"));
    assert_eq!(PackageId::from_hex(pid.as_str()), Some(pid));
  }
}
