//! Recipe file loading.
//!
//! A recipe file is either `recipe.lua` (a chunk returning a table) or
//! `recipe.toml`. Both deserialize into the same [`RecipeFile`] shape; an
//! optional `conandata.yml` next to it contributes `sources` and `patches`
//! keyed by version. One file expands to one [`Recipe`] per version.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use mlua::{Lua, LuaSerdeExt, Value};
use serde::Deserialize;
use tracing::debug;

use super::types::{
  BuildSystemKind, Condition, CustomSteps, OptionSpec, PackageIdRules, PackageInfo, PackageRules, PatchSpec, Recipe,
  RecipeMetadata, Requirement, Rule, Source, ValidateRule,
};
use super::validate::validate_recipe;
use super::RecipeError;
use crate::consts::{RECIPE_DATA_FILE, RECIPE_FILE_NAMES};
use crate::settings::SettingAxis;
use crate::util::hash::hash_bytes;
use crate::version::{Version, VersionRange};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum BuildSystemName {
  Cmake,
  Meson,
  Autotools,
  Make,
  Msbuild,
  #[default]
  Custom,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConditionalRequirement {
  #[serde(rename = "ref")]
  reference: String,
  when: Condition,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRequirement {
  Reference(String),
  Conditional(ConditionalRequirement),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UrlList {
  One(String),
  Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceSpec {
  url: UrlList,
  sha256: String,
  #[serde(default)]
  strip_root: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecipeData {
  #[serde(default)]
  sources: BTreeMap<String, SourceSpec>,
  #[serde(default)]
  patches: BTreeMap<String, Vec<PatchSpec>>,
}

/// The on-disk shape shared by Lua and TOML recipes.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecipeFile {
  name: String,
  #[serde(default)]
  version: Option<String>,
  #[serde(default)]
  versions: Vec<String>,
  #[serde(default)]
  description: Option<String>,
  #[serde(default)]
  license: Option<String>,
  #[serde(default)]
  homepage: Option<String>,
  #[serde(default)]
  url: Option<String>,
  #[serde(default)]
  topics: Vec<String>,
  #[serde(default)]
  settings: Vec<SettingAxis>,
  #[serde(default)]
  options: BTreeMap<String, OptionSpec>,
  #[serde(default)]
  requires: Vec<RawRequirement>,
  #[serde(default)]
  build_requires: Vec<RawRequirement>,
  #[serde(default)]
  rules: Vec<Rule>,
  #[serde(default)]
  validate: Vec<ValidateRule>,
  #[serde(default)]
  min_cppstd: Option<String>,
  #[serde(default)]
  min_compiler_versions: BTreeMap<String, String>,
  #[serde(default)]
  package_id: PackageIdRules,
  #[serde(default)]
  build_system: BuildSystemName,
  #[serde(default)]
  variables: BTreeMap<String, String>,
  #[serde(default)]
  steps: Option<CustomSteps>,
  #[serde(default)]
  exports_sources: Vec<String>,
  #[serde(default)]
  sources: BTreeMap<String, SourceSpec>,
  #[serde(default)]
  patches: BTreeMap<String, Vec<PatchSpec>>,
  #[serde(default)]
  package: PackageRules,
  #[serde(default)]
  package_info: PackageInfo,
}

/// Find the recipe file inside a directory, or accept a path to the file itself.
pub fn find_recipe_file(path: &Path) -> Result<std::path::PathBuf, RecipeError> {
  if path.is_file() {
    return Ok(path.to_path_buf());
  }
  RECIPE_FILE_NAMES
    .iter()
    .map(|name| path.join(name))
    .find(|candidate| candidate.is_file())
    .ok_or_else(|| RecipeError::NotFound(path.to_path_buf()))
}

/// Load, expand and validate every version declared by a recipe file.
pub fn load_recipe_file(path: &Path) -> Result<Vec<Recipe>, RecipeError> {
  let path = dunce::canonicalize(path).map_err(|source| RecipeError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let recipe_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();

  let content = fs::read_to_string(&path).map_err(|source| RecipeError::Read {
    path: path.clone(),
    source,
  })?;

  let file = match path.extension().and_then(|e| e.to_str()) {
    Some("lua") => eval_lua(&path, &content)?,
    Some("toml") => toml::from_str::<RecipeFile>(&content).map_err(|e| RecipeError::Parse {
      path: path.clone(),
      message: e.to_string(),
    })?,
    _ => return Err(RecipeError::UnsupportedFile(path)),
  };

  let data_path = recipe_dir.join(RECIPE_DATA_FILE);
  let mut revision_input = content.into_bytes();
  let data = if data_path.is_file() {
    let data_content = fs::read_to_string(&data_path).map_err(|source| RecipeError::Read {
      path: data_path.clone(),
      source,
    })?;
    revision_input.extend_from_slice(data_content.as_bytes());
    serde_yaml::from_str::<RecipeData>(&data_content).map_err(|e| RecipeError::Parse {
      path: data_path.clone(),
      message: e.to_string(),
    })?
  } else {
    RecipeData::default()
  };

  let revision = hash_bytes(&revision_input).0;
  let recipes = expand(file, data, &recipe_dir, &revision)?;
  for recipe in &recipes {
    validate_recipe(recipe)?;
  }

  debug!(path = %path.display(), versions = recipes.len(), "loaded recipe");
  Ok(recipes)
}

fn eval_lua(path: &Path, content: &str) -> Result<RecipeFile, RecipeError> {
  let lua = Lua::new();
  let lua_err = |e: mlua::Error| RecipeError::Lua {
    path: path.to_path_buf(),
    message: e.to_string(),
  };

  let value = lua
    .load(content)
    .set_name(format!("@{}", path.display()))
    .eval::<Value>()
    .map_err(lua_err)?;

  if !value.is_table() {
    return Err(RecipeError::Lua {
      path: path.to_path_buf(),
      message: format!("recipe must return a table, got {}", value.type_name()),
    });
  }

  lua.from_value::<RecipeFile>(value).map_err(lua_err)
}

fn invalid(recipe: &str, reason: impl Into<String>) -> RecipeError {
  RecipeError::Invalid {
    recipe: recipe.to_string(),
    reason: reason.into(),
  }
}

/// Split `name/range` into its parts.
pub fn parse_reference(reference: &str) -> Result<(String, VersionRange), String> {
  let (name, range) = match reference.split_once('/') {
    Some((name, range)) => (name, range),
    None => (reference, "*"),
  };
  let name = name.trim();
  if name.is_empty() {
    return Err(format!("missing package name in '{reference}'"));
  }
  let range = VersionRange::parse(range).map_err(|e| e.to_string())?;
  Ok((name.to_string(), range))
}

fn convert_requirements(recipe: &str, raw: Vec<RawRequirement>) -> Result<Vec<Requirement>, RecipeError> {
  raw
    .into_iter()
    .map(|req| {
      let (reference, when) = match req {
        RawRequirement::Reference(reference) => (reference, None),
        RawRequirement::Conditional(c) => (c.reference, Some(c.when)),
      };
      let (name, range) = parse_reference(&reference).map_err(|reason| invalid(recipe, reason))?;
      Ok(Requirement { name, range, when })
    })
    .collect()
}

fn expand(
  file: RecipeFile,
  mut data: RecipeData,
  recipe_dir: &Path,
  revision: &str,
) -> Result<Vec<Recipe>, RecipeError> {
  let name = file.name.clone();

  for (version, source) in file.sources {
    if data.sources.insert(version.clone(), source).is_some() {
      return Err(invalid(
        &name,
        format!("sources for {version} defined in both the recipe and {RECIPE_DATA_FILE}"),
      ));
    }
  }
  for (version, patches) in file.patches {
    if data.patches.insert(version.clone(), patches).is_some() {
      return Err(invalid(
        &name,
        format!("patches for {version} defined in both the recipe and {RECIPE_DATA_FILE}"),
      ));
    }
  }

  let mut versions: Vec<String> = file.version.into_iter().chain(file.versions).collect();
  let explicit = !versions.is_empty();
  if !explicit {
    versions = data.sources.keys().cloned().collect();
  }
  if versions.is_empty() {
    return Err(invalid(&name, "no version declared (set `version`, `versions` or `sources`)"));
  }

  for version in data.sources.keys().chain(data.patches.keys()) {
    if !versions.contains(version) {
      return Err(invalid(&name, format!("sources or patches given for undeclared version {version}")));
    }
  }

  let build_system = match (file.build_system, file.steps) {
    (BuildSystemName::Custom, steps) => BuildSystemKind::Custom(steps.unwrap_or_default()),
    (_, Some(_)) => {
      return Err(invalid(&name, "`steps` is only allowed with build_system = \"custom\""));
    }
    (BuildSystemName::Cmake, None) => BuildSystemKind::CMake,
    (BuildSystemName::Meson, None) => BuildSystemKind::Meson,
    (BuildSystemName::Autotools, None) => BuildSystemKind::Autotools,
    (BuildSystemName::Make, None) => BuildSystemKind::Make,
    (BuildSystemName::Msbuild, None) => BuildSystemKind::MsBuild,
  };

  let requires = convert_requirements(&name, file.requires)?;
  let build_requires = convert_requirements(&name, file.build_requires)?;

  let mut min_compiler_versions = BTreeMap::new();
  for (compiler, version) in file.min_compiler_versions {
    let version = Version::parse(&version).map_err(|e| invalid(&name, e.to_string()))?;
    min_compiler_versions.insert(compiler, version);
  }

  let metadata = RecipeMetadata {
    description: file.description,
    license: file.license,
    homepage: file.homepage,
    url: file.url,
    topics: file.topics,
  };

  let mut recipes = Vec::with_capacity(versions.len());
  let mut seen = Vec::new();
  for raw_version in versions {
    let version = Version::parse(&raw_version).map_err(|e| invalid(&name, e.to_string()))?;
    if seen.contains(&version) {
      return Err(invalid(&name, format!("version {raw_version} declared twice")));
    }
    seen.push(version.clone());

    let source = data.sources.remove(&raw_version).map(|spec| Source {
      urls: match spec.url {
        UrlList::One(url) => vec![url],
        UrlList::Many(urls) => urls,
      },
      sha256: spec.sha256.to_ascii_lowercase(),
      strip_root: spec.strip_root.unwrap_or(true),
    });

    recipes.push(Recipe {
      name: name.clone(),
      version,
      metadata: metadata.clone(),
      settings: file.settings.clone(),
      options: file.options.clone(),
      requires: requires.clone(),
      build_requires: build_requires.clone(),
      rules: file.rules.clone(),
      validate: file.validate.clone(),
      min_cppstd: file.min_cppstd.clone(),
      min_compiler_versions: min_compiler_versions.clone(),
      package_id: file.package_id.clone(),
      build_system: build_system.clone(),
      variables: file.variables.clone(),
      exports_sources: file.exports_sources.clone(),
      source,
      patches: data.patches.remove(&raw_version).unwrap_or_default(),
      package: file.package.clone(),
      package_info: file.package_info.clone(),
      recipe_dir: recipe_dir.to_path_buf(),
      revision: revision.to_string(),
    });
  }

  Ok(recipes)
}
