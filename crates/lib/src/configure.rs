//! Effective configuration of one package.
//!
//! [`resolve_configuration`] turns what the user asked for (a [`Profile`])
//! into the concrete, immutable [`Configuration`] a recipe is built with,
//! plus a [`ConfigDiff`] recording what the recipe's rules changed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::profile::Profile;
use crate::recipe::{Condition, OptionValue, Recipe, RuleStage};
use crate::settings::{SETTING_KEYS, cppstd_rank, is_known_setting};
use crate::version::Version;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ConfigureError {
  #[error("{package}: option '{option}' is not declared by the recipe")]
  UnknownOption { package: String, option: String },

  #[error("{package}: invalid value '{value}' for option '{option}' (allowed: {})", allowed.join(", "))]
  InvalidOptionValue {
    package: String,
    option: String,
    value: String,
    allowed: Vec<String>,
  },

  #[error("{package}: setting '{setting}' is required but was not provided")]
  MissingSetting { package: String, setting: String },

  #[error("{package}: invalid configuration: {reason}")]
  InvalidConfiguration { package: String, reason: String },
}

/// Concrete settings and options for one package. Never mutated once resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Configuration {
  pub settings: BTreeMap<String, String>,
  pub options: BTreeMap<String, OptionValue>,
}

impl Configuration {
  /// Whether every key of `condition` is present with one of the listed values.
  /// A condition over a missing key does not hold.
  pub fn satisfies(&self, condition: &Condition) -> bool {
    condition.iter().all(|(key, expected)| match self.value_of(key) {
      Some(actual) => expected.matches_str(&actual),
      None => false,
    })
  }

  /// The value of a setting or option, rendered as text.
  pub fn value_of(&self, key: &str) -> Option<String> {
    if is_known_setting(key) {
      self.settings.get(key).cloned()
    } else {
      self.options.get(key).map(ToString::to_string)
    }
  }
}

/// What the recipe's rules removed or set, in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDiff {
  pub removed_settings: Vec<String>,
  pub removed_options: Vec<String>,
  pub set_options: BTreeMap<String, OptionValue>,
}

impl ConfigDiff {
  pub fn is_empty(&self) -> bool {
    self.removed_settings.is_empty() && self.removed_options.is_empty() && self.set_options.is_empty()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
  pub configuration: Configuration,
  pub diff: ConfigDiff,
}

/// Resolve the effective configuration of `recipe`.
///
/// `is_root` selects whether unscoped option requests (`shared=True`) apply.
pub fn resolve_configuration(recipe: &Recipe, profile: &Profile, is_root: bool) -> Result<Resolution, ConfigureError> {
  let package = recipe.reference();

  // Settings the recipe does not declare never enter the configuration.
  let mut settings = BTreeMap::new();
  for key in SETTING_KEYS {
    if !recipe.declares_setting(key) {
      continue;
    }
    match profile.settings.get(*key) {
      Some(value) => {
        settings.insert(key.to_string(), value.clone());
      }
      None if !key.contains('.') => {
        return Err(ConfigureError::MissingSetting {
          package,
          setting: key.to_string(),
        });
      }
      None => {}
    }
  }

  for option in profile.explicit_options_for(&recipe.name, is_root) {
    if !recipe.options.contains_key(option) {
      return Err(ConfigureError::UnknownOption {
        package,
        option: option.to_string(),
      });
    }
  }

  let mut options = BTreeMap::new();
  for (name, spec) in &recipe.options {
    let value = match profile.option_for(&recipe.name, is_root, name) {
      Some(requested) => spec
        .coerce(&requested.value)
        .ok_or_else(|| ConfigureError::InvalidOptionValue {
          package: package.clone(),
          option: name.clone(),
          value: requested.value.clone(),
          allowed: spec.values.iter().map(ToString::to_string).collect(),
        })?,
      None => spec.default.clone(),
    };
    options.insert(name.clone(), value);
  }

  let mut configuration = Configuration { settings, options };
  let mut diff = ConfigDiff::default();

  for stage in [RuleStage::ConfigOptions, RuleStage::Configure] {
    for rule in recipe.rules.iter().filter(|r| r.stage == stage) {
      if !configuration.satisfies(&rule.when) {
        continue;
      }
      for option in &rule.remove_options {
        if configuration.options.remove(option).is_some() {
          diff.removed_options.push(option.clone());
        }
      }
      for setting in &rule.remove_settings {
        let prefix = format!("{setting}.");
        let before = configuration.settings.len();
        configuration
          .settings
          .retain(|key, _| key != setting && !key.starts_with(&prefix));
        if configuration.settings.len() != before {
          diff.removed_settings.push(setting.clone());
        }
      }
      for (option, value) in &rule.set_options {
        if let Some(slot) = configuration.options.get_mut(option) {
          *slot = value.clone();
          diff.set_options.insert(option.clone(), value.clone());
        }
      }
    }
  }

  for (name, value) in &configuration.options {
    let spec = &recipe.options[name];
    if !spec.allows(value) {
      return Err(ConfigureError::InvalidOptionValue {
        package,
        option: name.clone(),
        value: value.to_string(),
        allowed: spec.values.iter().map(ToString::to_string).collect(),
      });
    }
  }

  check_constraints(recipe, &configuration).map_err(|reason| ConfigureError::InvalidConfiguration {
    package: package.clone(),
    reason,
  })?;

  if !diff.is_empty() {
    debug!(
      package = %package,
      removed_options = ?diff.removed_options,
      removed_settings = ?diff.removed_settings,
      "configuration adjusted by recipe rules"
    );
  }

  Ok(Resolution { configuration, diff })
}

fn check_constraints(recipe: &Recipe, configuration: &Configuration) -> Result<(), String> {
  if let Some(rule) = recipe.validate.iter().find(|r| configuration.satisfies(&r.when)) {
    return Err(rule.message.clone());
  }

  let compiler = configuration.settings.get("compiler");

  if let (Some(required), Some(_)) = (&recipe.min_cppstd, compiler) {
    match configuration.settings.get("compiler.cppstd") {
      Some(actual) => {
        let actual_rank = cppstd_rank(actual).ok_or_else(|| format!("unrecognized compiler.cppstd '{actual}'"))?;
        let required_rank = cppstd_rank(required).unwrap_or(0);
        if actual_rank < required_rank {
          return Err(format!("requires at least C++{required}, got compiler.cppstd={actual}"));
        }
      }
      None => warn!(
        package = %recipe.reference(),
        min_cppstd = %required,
        "compiler.cppstd not set; assuming the compiler default satisfies the minimum"
      ),
    }
  }

  if let Some(compiler) = compiler
    && let Some(minimum) = recipe.min_compiler_versions.get(compiler)
    && let Some(actual) = configuration.settings.get("compiler.version")
  {
    let actual = Version::parse(actual).map_err(|e| e.to_string())?;
    if &actual < minimum {
      return Err(format!("requires {compiler} >= {minimum}, got {actual}"));
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::settings::SettingAxis;
  use crate::recipe::{
    BuildSystemKind, ConditionValue, OptionSpec, PackageIdRules, PackageInfo, PackageRules, RecipeMetadata, Rule,
    ValidateRule,
  };

  fn bool_option(default: bool) -> OptionSpec {
    OptionSpec {
      values: vec![OptionValue::Bool(true), OptionValue::Bool(false)],
      default: OptionValue::Bool(default),
    }
  }

  fn when(pairs: &[(&str, OptionValue)]) -> Condition {
    Condition(
      pairs
        .iter()
        .map(|(k, v)| (k.to_string(), ConditionValue::One(v.clone())))
        .collect(),
    )
  }

  fn remove_option(stage: RuleStage, condition: Condition, option: &str) -> Rule {
    Rule {
      stage,
      when: condition,
      remove_options: vec![option.to_string()],
      remove_settings: Vec::new(),
      set_options: BTreeMap::new(),
    }
  }

  /// A library shaped like most recipes: shared/fPIC, fPIC dropped on
  /// Windows and for shared builds.
  fn library() -> Recipe {
    let mut options = BTreeMap::new();
    options.insert("shared".to_string(), bool_option(false));
    options.insert("fPIC".to_string(), bool_option(true));
    Recipe {
      name: "libfoo".to_string(),
      version: Version::parse("2.5").unwrap(),
      metadata: RecipeMetadata::default(),
      settings: SettingAxis::ALL.to_vec(),
      options,
      requires: Vec::new(),
      build_requires: Vec::new(),
      rules: vec![
        remove_option(
          RuleStage::ConfigOptions,
          when(&[("os", OptionValue::Text("Windows".into()))]),
          "fPIC",
        ),
        remove_option(RuleStage::Configure, when(&[("shared", OptionValue::Bool(true))]), "fPIC"),
      ],
      validate: Vec::new(),
      min_cppstd: None,
      min_compiler_versions: BTreeMap::new(),
      package_id: PackageIdRules::default(),
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

  fn profile(settings: &[&str], options: &[&str]) -> Profile {
    let mut profile = Profile::default();
    profile
      .apply_setting_overrides(&["os=Linux", "arch=x86_64", "build_type=Release", "compiler=gcc", "compiler.version=13"])
      .unwrap();
    profile.apply_setting_overrides(settings).unwrap();
    profile.apply_option_overrides(options).unwrap();
    profile
  }

  #[test]
  fn windows_removes_fpic() {
    let requested = profile(&["os=Windows", "compiler=msvc", "compiler.version=193"], &["fPIC=True"]);
    let resolution = resolve_configuration(&library(), &requested, true).unwrap();
    assert!(!resolution.configuration.options.contains_key("fPIC"));
    assert_eq!(resolution.diff.removed_options, vec!["fPIC"]);
  }

  #[test]
  fn shared_removes_fpic() {
    let resolution = resolve_configuration(&library(), &profile(&[], &["shared=True"]), true).unwrap();
    assert_eq!(resolution.configuration.options["shared"], OptionValue::Bool(true));
    assert!(!resolution.configuration.options.contains_key("fPIC"));
  }

  #[test]
  fn defaults_fill_unrequested_options() {
    let resolution = resolve_configuration(&library(), &profile(&[], &[]), true).unwrap();
    assert_eq!(resolution.configuration.options["shared"], OptionValue::Bool(false));
    assert_eq!(resolution.configuration.options["fPIC"], OptionValue::Bool(true));
    assert!(resolution.diff.is_empty());
  }

  #[test]
  fn undeclared_axes_are_removed() {
    let mut recipe = library();
    recipe.settings = vec![SettingAxis::Os, SettingAxis::Arch];
    let resolution = resolve_configuration(&recipe, &profile(&[], &[]), true).unwrap();
    let keys: Vec<&str> = resolution.configuration.settings.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["arch", "os"]);
  }

  #[test]
  fn unknown_explicit_option_is_an_error() {
    let err = resolve_configuration(&library(), &profile(&[], &["libfoo:with_zstd=True"]), false).unwrap_err();
    assert!(matches!(err, ConfigureError::UnknownOption { .. }));
  }

  #[test]
  fn wildcard_option_skips_packages_without_it() {
    let resolution = resolve_configuration(&library(), &profile(&[], &["*:with_zstd=True"]), false).unwrap();
    assert!(!resolution.configuration.options.contains_key("with_zstd"));
  }

  #[test]
  fn root_scope_does_not_reach_dependencies() {
    let resolution = resolve_configuration(&library(), &profile(&[], &["shared=True"]), false).unwrap();
    assert_eq!(resolution.configuration.options["shared"], OptionValue::Bool(false));
  }

  #[test]
  fn value_outside_domain_is_rejected() {
    let err = resolve_configuration(&library(), &profile(&[], &["shared=maybe"]), true).unwrap_err();
    assert!(matches!(err, ConfigureError::InvalidOptionValue { .. }));
  }

  #[test]
  fn min_cppstd_is_enforced() {
    let mut recipe = library();
    recipe.min_cppstd = Some("17".to_string());

    let err = resolve_configuration(&recipe, &profile(&["compiler.cppstd=14"], &[]), true).unwrap_err();
    assert!(matches!(err, ConfigureError::InvalidConfiguration { .. }));

    resolve_configuration(&recipe, &profile(&["compiler.cppstd=gnu17"], &[]), true).unwrap();
    resolve_configuration(&recipe, &profile(&[], &[]), true).unwrap();
  }

  #[test]
  fn min_compiler_version_is_enforced() {
    let mut recipe = library();
    recipe
      .min_compiler_versions
      .insert("gcc".to_string(), Version::parse("11").unwrap());

    let err = resolve_configuration(&recipe, &profile(&["compiler.version=9"], &[]), true).unwrap_err();
    assert!(matches!(err, ConfigureError::InvalidConfiguration { .. }));

    resolve_configuration(&recipe, &profile(&["compiler=clang", "compiler.version=9"], &[]), true).unwrap();
  }

  #[test]
  fn validate_rule_rejects_configuration() {
    let mut recipe = library();
    recipe.validate.push(ValidateRule {
      when: when(&[("os", OptionValue::Text("Macos".into())), ("shared", OptionValue::Bool(true))]),
      message: "shared builds are not supported on macOS".to_string(),
    });

    let err = resolve_configuration(&recipe, &profile(&["os=Macos"], &["shared=True"]), true).unwrap_err();
    assert_eq!(
      err,
      ConfigureError::InvalidConfiguration {
        package: "libfoo/2.5".to_string(),
        reason: "shared builds are not supported on macOS".to_string(),
      }
    );
    resolve_configuration(&recipe, &profile(&["os=Macos"], &[]), true).unwrap();
  }

  #[test]
  fn removing_compiler_drops_sub_settings() {
    let mut recipe = library();
    recipe.rules.push(Rule {
      stage: RuleStage::Configure,
      when: Condition::default(),
      remove_options: Vec::new(),
      remove_settings: vec!["compiler".to_string()],
      set_options: BTreeMap::new(),
    });
    let resolution = resolve_configuration(&recipe, &profile(&[], &[]), true).unwrap();
    assert!(resolution.configuration.settings.keys().all(|k| !k.starts_with("compiler")));
    assert_eq!(resolution.diff.removed_settings, vec!["compiler"]);
  }

  #[test]
  fn missing_top_level_setting_is_reported() {
    let mut profile = Profile::default();
    profile.apply_setting_overrides(&["os=Linux"]).unwrap();
    let mut recipe = library();
    recipe.settings = vec![SettingAxis::Os, SettingAxis::BuildType];
    let err = resolve_configuration(&recipe, &profile, true).unwrap_err();
    assert!(matches!(err, ConfigureError::MissingSetting { ref setting, .. } if setting == "build_type"));
  }
}
