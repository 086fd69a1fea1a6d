use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::settings::SettingAxis;
use crate::version::{Version, VersionRange};

/// A single option value. Recipes use booleans, integers and short strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
  Bool(bool),
  Int(i64),
  Text(String),
}

impl OptionValue {
  /// Whether a user-supplied string denotes this value (`true`/`True` for booleans).
  pub fn matches_str(&self, input: &str) -> bool {
    match self {
      OptionValue::Bool(b) => input.eq_ignore_ascii_case(if *b { "true" } else { "false" }),
      OptionValue::Int(n) => input.trim().parse::<i64>() == Ok(*n),
      OptionValue::Text(t) => t == input,
    }
  }
}

impl fmt::Display for OptionValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OptionValue::Bool(true) => f.write_str("True"),
      OptionValue::Bool(false) => f.write_str("False"),
      OptionValue::Int(n) => write!(f, "{n}"),
      OptionValue::Text(t) => f.write_str(t),
    }
  }
}

/// An option's closed domain and its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptionSpec {
  pub values: Vec<OptionValue>,
  pub default: OptionValue,
}

impl OptionSpec {
  pub fn allows(&self, value: &OptionValue) -> bool {
    self.values.contains(value)
  }

  /// Interpret a user-supplied string against the domain.
  pub fn coerce(&self, input: &str) -> Option<OptionValue> {
    self.values.iter().find(|v| v.matches_str(input)).cloned()
  }
}

/// Expected value(s) for one key of a [`Condition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
  One(OptionValue),
  AnyOf(Vec<OptionValue>),
}

impl ConditionValue {
  pub fn matches_str(&self, input: &str) -> bool {
    match self {
      ConditionValue::One(v) => v.matches_str(input),
      ConditionValue::AnyOf(vs) => vs.iter().any(|v| v.matches_str(input)),
    }
  }

  pub fn values(&self) -> &[OptionValue] {
    match self {
      ConditionValue::One(v) => std::slice::from_ref(v),
      ConditionValue::AnyOf(vs) => vs,
    }
  }
}

/// A conjunction over settings and options, e.g. `{ os = "Windows", shared = true }`.
///
/// Keys naming a setting (`os`, `compiler.version`, ...) are matched against
/// settings, every other key against options. An empty condition always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Condition(pub BTreeMap<String, ConditionValue>);

impl Condition {
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &ConditionValue)> {
    self.0.iter()
  }

  /// Whether every configuration satisfying `self` also satisfies `other`.
  ///
  /// Conservative: each key of `other` must appear in `self` restricted to a
  /// subset of `other`'s values.
  pub fn implies(&self, other: &Condition) -> bool {
    other.iter().all(|(key, allowed)| {
      self
        .0
        .get(key)
        .is_some_and(|mine| mine.values().iter().all(|v| allowed.values().contains(v)))
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Requirement {
  pub name: String,
  pub range: VersionRange,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub when: Option<Condition>,
}

impl fmt::Display for Requirement {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.name, self.range)
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStage {
  ConfigOptions,
  #[default]
  Configure,
}

/// A `config_options`/`configure` rule: when the condition holds, apply the actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
  #[serde(default)]
  pub stage: RuleStage,
  #[serde(default)]
  pub when: Condition,
  #[serde(default)]
  pub remove_options: Vec<String>,
  #[serde(default)]
  pub remove_settings: Vec<String>,
  #[serde(default)]
  pub set_options: BTreeMap<String, OptionValue>,
}

/// A `validate()` constraint: when the condition holds, the configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidateRule {
  #[serde(default)]
  pub when: Condition,
  pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiresMode {
  #[default]
  Full,
  Major,
  Ignore,
}

/// How a recipe reduces its configuration before hashing it into a package ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageIdRules {
  #[serde(default)]
  pub header_only: bool,
  #[serde(default)]
  pub drop_settings: Vec<String>,
  #[serde(default)]
  pub drop_options: Vec<String>,
  #[serde(default)]
  pub major_only: Vec<String>,
  #[serde(default)]
  pub requires: RequiresMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomSteps {
  #[serde(default)]
  pub build: Vec<String>,
  #[serde(default)]
  pub package: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum BuildSystemKind {
  #[serde(rename = "cmake")]
  CMake,
  #[serde(rename = "meson")]
  Meson,
  #[serde(rename = "autotools")]
  Autotools,
  #[serde(rename = "make")]
  Make,
  #[serde(rename = "msbuild")]
  MsBuild,
  #[serde(rename = "custom")]
  Custom(CustomSteps),
}

impl BuildSystemKind {
  pub fn name(&self) -> &'static str {
    match self {
      BuildSystemKind::CMake => "cmake",
      BuildSystemKind::Meson => "meson",
      BuildSystemKind::Autotools => "autotools",
      BuildSystemKind::Make => "make",
      BuildSystemKind::MsBuild => "msbuild",
      BuildSystemKind::Custom(_) => "custom",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
  pub urls: Vec<String>,
  pub sha256: String,
  pub strip_root: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchSpec {
  pub patch_file: String,
  #[serde(default)]
  pub patch_description: Option<String>,
  #[serde(default)]
  pub patch_type: Option<String>,
  #[serde(default)]
  pub patch_source: Option<String>,
  #[serde(default)]
  pub base_path: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Folder {
  #[default]
  Source,
  Build,
  Package,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopyRule {
  pub pattern: String,
  #[serde(default)]
  pub src: Folder,
  #[serde(default)]
  pub dst: String,
  #[serde(default = "default_true")]
  pub keep_path: bool,
}

fn default_true() -> bool {
  true
}

/// File operations run after the package step: glob copies, then removals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageRules {
  #[serde(default)]
  pub copy: Vec<CopyRule>,
  #[serde(default)]
  pub remove: Vec<String>,
}

/// A generator property such as `cmake_file_name`, `cmake_target_aliases` or
/// `pkg_config_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
  Flag(bool),
  Text(String),
  List(Vec<String>),
}

/// One library of a package that ships several (`ssl` and `crypto` of openssl).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentInfo {
  #[serde(default)]
  pub libs: Vec<String>,
  #[serde(default)]
  pub system_libs: Vec<String>,
  #[serde(default)]
  pub defines: Vec<String>,
  /// `name` for a sibling component, `pkg::name` for a component of a direct
  /// requirement. `pkg::pkg` names the whole requirement.
  #[serde(default)]
  pub requires: Vec<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub properties: BTreeMap<String, PropertyValue>,
  /// Packaged only in configurations matching this condition.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub when: Option<Condition>,
}

/// An entry of [`ComponentInfo::requires`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentRef<'a> {
  Local(&'a str),
  External { package: &'a str, component: &'a str },
}

impl<'a> ComponentRef<'a> {
  pub fn parse(raw: &'a str) -> Self {
    match raw.split_once("::") {
      Some((package, component)) => ComponentRef::External { package, component },
      None => ComponentRef::Local(raw),
    }
  }
}

/// What consumers need to link against the package.
///
/// A package either lists its `libs` directly or splits them into
/// `components`; the directories apply to both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageInfo {
  #[serde(default)]
  pub libs: Vec<String>,
  #[serde(default)]
  pub system_libs: Vec<String>,
  #[serde(default)]
  pub defines: Vec<String>,
  #[serde(default = "default_include_dirs")]
  pub include_dirs: Vec<String>,
  #[serde(default = "default_lib_dirs")]
  pub lib_dirs: Vec<String>,
  #[serde(default = "default_bin_dirs")]
  pub bin_dirs: Vec<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub components: BTreeMap<String, ComponentInfo>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub properties: BTreeMap<String, PropertyValue>,
}

fn default_include_dirs() -> Vec<String> {
  vec!["include".to_string()]
}

fn default_lib_dirs() -> Vec<String> {
  vec!["lib".to_string()]
}

fn default_bin_dirs() -> Vec<String> {
  vec!["bin".to_string()]
}

impl Default for PackageInfo {
  fn default() -> Self {
    Self {
      libs: Vec::new(),
      system_libs: Vec::new(),
      defines: Vec::new(),
      include_dirs: default_include_dirs(),
      lib_dirs: default_lib_dirs(),
      bin_dirs: default_bin_dirs(),
      components: BTreeMap::new(),
      properties: BTreeMap::new(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecipeMetadata {
  pub description: Option<String>,
  pub license: Option<String>,
  pub homepage: Option<String>,
  pub url: Option<String>,
  pub topics: Vec<String>,
}

/// One version of a package recipe. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recipe {
  pub name: String,
  pub version: Version,
  pub metadata: RecipeMetadata,
  pub settings: Vec<SettingAxis>,
  pub options: BTreeMap<String, OptionSpec>,
  pub requires: Vec<Requirement>,
  pub build_requires: Vec<Requirement>,
  pub rules: Vec<Rule>,
  pub validate: Vec<ValidateRule>,
  pub min_cppstd: Option<String>,
  pub min_compiler_versions: BTreeMap<String, Version>,
  pub package_id: PackageIdRules,
  pub build_system: BuildSystemKind,
  pub variables: BTreeMap<String, String>,
  pub exports_sources: Vec<String>,
  pub source: Option<Source>,
  pub patches: Vec<PatchSpec>,
  pub package: PackageRules,
  pub package_info: PackageInfo,
  pub recipe_dir: PathBuf,
  pub revision: String,
}

impl Recipe {
  /// `name/version`
  pub fn reference(&self) -> String {
    format!("{}/{}", self.name, self.version)
  }

  pub fn declares_axis(&self, axis: SettingAxis) -> bool {
    self.settings.contains(&axis)
  }

  /// Whether the setting key is covered by a declared axis.
  pub fn declares_setting(&self, key: &str) -> bool {
    SettingAxis::of_key(key).is_some_and(|axis| self.declares_axis(axis))
  }
}
