//! Static checks on a loaded recipe.
//!
//! Everything that can be checked without a configuration is checked here, so
//! that a typo in a rule surfaces at load time instead of silently never
//! matching during resolution.

use std::collections::BTreeMap;

use super::types::{BuildSystemKind, ComponentInfo, ComponentRef, Condition, Recipe};
use super::RecipeError;
use crate::settings::{SettingAxis, cppstd_rank, is_known_setting, validate_setting};

fn valid_name(name: &str) -> bool {
  !name.is_empty()
    && name.len() <= 101
    && name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
    && name
      .chars()
      .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.' | '+'))
}

fn valid_option_name(name: &str) -> bool {
  !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn validate_recipe(recipe: &Recipe) -> Result<(), RecipeError> {
  let fail = |reason: String| {
    Err(RecipeError::Invalid {
      recipe: recipe.reference(),
      reason,
    })
  };

  if !valid_name(&recipe.name) {
    return fail(format!(
      "invalid package name '{}' (lowercase letters, digits, '_', '-', '.', '+')",
      recipe.name
    ));
  }

  for (name, spec) in &recipe.options {
    if !valid_option_name(name) {
      return fail(format!("invalid option name '{name}'"));
    }
    if is_known_setting(name) {
      return fail(format!("option '{name}' shadows a setting"));
    }
    if spec.values.is_empty() {
      return fail(format!("option '{name}' has no allowed values"));
    }
    if !spec.allows(&spec.default) {
      return fail(format!("default '{}' of option '{name}' is not an allowed value", spec.default));
    }
  }

  for requirement in recipe.requires.iter().chain(&recipe.build_requires) {
    if !valid_name(&requirement.name) {
      return fail(format!("invalid requirement name '{}'", requirement.name));
    }
    if requirement.name == recipe.name {
      return fail(format!("'{}' requires itself", recipe.name));
    }
    if let Some(when) = &requirement.when {
      if let Err(reason) = check_condition(recipe, when) {
        return fail(format!("requirement {requirement}: {reason}"));
      }
    }
  }

  for rule in &recipe.rules {
    if let Err(reason) = check_condition(recipe, &rule.when) {
      return fail(format!("rule: {reason}"));
    }
    for option in rule.remove_options.iter().chain(rule.set_options.keys()) {
      if !recipe.options.contains_key(option) {
        return fail(format!("rule names undeclared option '{option}'"));
      }
    }
    for (option, value) in &rule.set_options {
      if !recipe.options[option].allows(value) {
        return fail(format!("rule sets option '{option}' to disallowed value '{value}'"));
      }
    }
    for setting in &rule.remove_settings {
      if !recipe.declares_setting(setting) {
        return fail(format!("rule removes undeclared setting '{setting}'"));
      }
    }
  }

  for rule in &recipe.validate {
    if let Err(reason) = check_condition(recipe, &rule.when) {
      return fail(format!("validate rule '{}': {reason}", rule.message));
    }
  }

  let ids = &recipe.package_id;
  for setting in ids.drop_settings.iter().chain(&ids.major_only) {
    if !is_known_setting(setting) {
      return fail(format!("package_id names unknown setting '{setting}'"));
    }
  }
  for option in &ids.drop_options {
    if !recipe.options.contains_key(option) {
      return fail(format!("package_id drops undeclared option '{option}'"));
    }
  }

  if let Some(cppstd) = &recipe.min_cppstd {
    if cppstd_rank(cppstd).is_none() {
      return fail(format!("invalid min_cppstd '{cppstd}'"));
    }
    if !recipe.declares_axis(SettingAxis::Compiler) {
      return fail("min_cppstd requires the 'compiler' setting".to_string());
    }
  }
  for compiler in recipe.min_compiler_versions.keys() {
    if let Err(e) = validate_setting("compiler", compiler) {
      return fail(format!("min_compiler_versions: {e}"));
    }
  }
  if !recipe.min_compiler_versions.is_empty() && !recipe.declares_axis(SettingAxis::Compiler) {
    return fail("min_compiler_versions requires the 'compiler' setting".to_string());
  }

  if let BuildSystemKind::Custom(steps) = &recipe.build_system {
    if steps.build.iter().chain(&steps.package).any(|s| s.trim().is_empty()) {
      return fail("custom build steps must not be empty".to_string());
    }
  }

  if let Some(source) = &recipe.source {
    if source.urls.is_empty() {
      return fail("source has no url".to_string());
    }
    if source.sha256.len() != 64 || !source.sha256.chars().all(|c| c.is_ascii_hexdigit()) {
      return fail(format!("source sha256 '{}' is not a sha256 hex digest", source.sha256));
    }
  }

  for rule in &recipe.package.copy {
    if rule.pattern.trim().is_empty() {
      return fail("package copy rule has an empty pattern".to_string());
    }
    if let Err(e) = glob::Pattern::new(&rule.pattern) {
      return fail(format!("invalid copy pattern '{}': {e}", rule.pattern));
    }
    if rule.dst.split(['/', '\\']).any(|part| part == "..") {
      return fail(format!("copy destination '{}' escapes the package folder", rule.dst));
    }
  }
  for pattern in &recipe.package.remove {
    if pattern.split(['/', '\\']).any(|part| part == "..") {
      return fail(format!("remove pattern '{pattern}' escapes the package folder"));
    }
  }

  for patch in &recipe.patches {
    if !recipe.recipe_dir.join(&patch.patch_file).is_file() {
      return fail(format!("patch file '{}' does not exist", patch.patch_file));
    }
  }

  if let Err(reason) = check_components(recipe) {
    return fail(reason);
  }

  Ok(())
}

/// Component names, conditions and the requirements between components.
///
/// A `pkg::name` requirement can only be checked for `pkg` here; whether the
/// dependency has a component `name` is known once it has been packaged.
fn check_components(recipe: &Recipe) -> Result<(), String> {
  let info = &recipe.package_info;
  for key in info.properties.keys().chain(info.components.values().flat_map(|c| c.properties.keys())) {
    if key.trim().is_empty() {
      return Err("package_info has an empty property name".to_string());
    }
  }
  if info.components.is_empty() {
    return Ok(());
  }
  if !info.libs.is_empty() {
    return Err("package_info sets both 'libs' and 'components'; list the libraries per component".to_string());
  }

  for (name, component) in &info.components {
    if !valid_option_name(name) {
      return Err(format!("invalid component name '{name}'"));
    }
    if let Some(when) = &component.when {
      check_condition(recipe, when).map_err(|reason| format!("component '{name}': {reason}"))?;
    }

    for raw in &component.requires {
      match ComponentRef::parse(raw) {
        ComponentRef::Local(other) if other == name => {
          return Err(format!("component '{name}' requires itself"));
        }
        ComponentRef::Local(other) => {
          let Some(target) = info.components.get(other) else {
            return Err(format!("component '{name}' requires unknown component '{other}'"));
          };
          if let Some(needed) = &target.when {
            let present = component.when.clone().unwrap_or_default();
            if !present.implies(needed) {
              return Err(format!(
                "component '{name}' requires '{other}', which is not packaged in every configuration that packages '{name}'"
              ));
            }
          }
        }
        ComponentRef::External { package, component } => {
          if package.is_empty() || component.is_empty() {
            return Err(format!("component '{name}' has a malformed requirement '{raw}'"));
          }
          if !recipe.requires.iter().any(|r| r.name == package) {
            return Err(format!("component '{name}' requires '{raw}', but '{package}' is not a requirement"));
          }
        }
      }
    }
  }

  if let Some(cycle) = component_cycle(&info.components) {
    return Err(format!("components require each other in a cycle: {}", cycle.join(", ")));
  }
  Ok(())
}

/// Components left over after repeatedly removing those whose sibling
/// requirements are all removed already; non-empty means a cycle.
fn component_cycle(components: &BTreeMap<String, ComponentInfo>) -> Option<Vec<String>> {
  let mut pending: BTreeMap<&str, Vec<&str>> = components
    .iter()
    .map(|(name, component)| {
      let siblings = component
        .requires
        .iter()
        .filter_map(|raw| match ComponentRef::parse(raw) {
          ComponentRef::Local(other) => Some(other),
          ComponentRef::External { .. } => None,
        })
        .collect();
      (name.as_str(), siblings)
    })
    .collect();

  loop {
    let resolved: Vec<&str> = pending
      .iter()
      .filter(|(_, siblings)| siblings.iter().all(|s| !pending.contains_key(s)))
      .map(|(name, _)| *name)
      .collect();
    if resolved.is_empty() {
      break;
    }
    for name in resolved {
      pending.remove(name);
    }
  }

  (!pending.is_empty()).then(|| pending.into_keys().map(str::to_string).collect())
}

/// A condition may only name declared settings or declared options, and only
/// with values those accept.
fn check_condition(recipe: &Recipe, condition: &Condition) -> Result<(), String> {
  for (key, expected) in condition.iter() {
    if is_known_setting(key) {
      if !recipe.declares_setting(key) {
        return Err(format!("condition on undeclared setting '{key}'"));
      }
      for value in expected.values() {
        validate_setting(key, &value.to_string()).map_err(|e| e.to_string())?;
      }
    } else if let Some(spec) = recipe.options.get(key) {
      if let Some(bad) = expected.values().iter().find(|v| !spec.allows(v)) {
        return Err(format!("option '{key}' never takes value '{bad}'"));
      }
    } else {
      return Err(format!("condition on unknown key '{key}'"));
    }
  }
  Ok(())
}
