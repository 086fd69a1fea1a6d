//! Profiles: the settings and options a user asks for.
//!
//! ```toml
//! [settings]
//! os = "Linux"
//! build_type = "Debug"
//! "compiler.version" = "13"
//!
//! [options]
//! shared = true          # root packages only
//! "zlib:shared" = false  # one package
//! "*:fPIC" = true        # every package declaring fPIC
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::platform::Platform;
use crate::platform::paths::profiles_dir;
use crate::settings::{SettingError, validate_setting};

#[derive(Debug, Error)]
pub enum ProfileError {
  #[error("failed to read profile {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse profile {path}: {message}")]
  Parse { path: PathBuf, message: String },

  #[error("profile '{0}' not found")]
  NotFound(String),

  #[error(transparent)]
  Setting(#[from] SettingError),

  #[error("invalid override '{0}' (expected key=value)")]
  InvalidOverride(String),
}

/// Which packages an option request applies to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptionScope {
  /// `opt=value`: the requested root packages.
  Root,
  /// `pkg:opt=value`
  Package(String),
  /// `*:opt=value`: every package that declares the option.
  All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionRequest {
  pub scope: OptionScope,
  pub name: String,
  pub value: String,
}

impl OptionRequest {
  /// Parse `[scope:]name=value`.
  pub fn parse(input: &str) -> Result<Self, ProfileError> {
    let (key, value) = split_assignment(input)?;
    Ok(Self::from_key(key, value))
  }

  fn from_key(key: &str, value: &str) -> Self {
    let (scope, name) = match key.split_once(':') {
      Some(("*", name)) => (OptionScope::All, name),
      Some((package, name)) => (OptionScope::Package(package.to_string()), name),
      None => (OptionScope::Root, key),
    };
    Self {
      scope,
      name: name.to_string(),
      value: value.to_string(),
    }
  }
}

/// An option value chosen for one package, and whether an unknown option name
/// is an error (explicit requests) or ignored (wildcards).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedValue {
  pub value: String,
  pub strict: bool,
}

fn split_assignment(input: &str) -> Result<(&str, &str), ProfileError> {
  match input.split_once('=') {
    Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value.trim())),
    _ => Err(ProfileError::InvalidOverride(input.to_string())),
  }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileFile {
  #[serde(default)]
  settings: BTreeMap<String, String>,
  #[serde(default)]
  options: BTreeMap<String, toml::Value>,
}

/// Requested settings plus scoped option requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
  pub settings: BTreeMap<String, String>,
  pub options: Vec<OptionRequest>,
}

impl Profile {
  /// Profile for the host: os, arch, default compiler, `Release`.
  pub fn detect() -> Self {
    let settings = Platform::current().map(|p| p.default_settings()).unwrap_or_default();
    Self {
      settings,
      options: Vec::new(),
    }
  }

  /// Parse a profile file and merge it over the host defaults.
  pub fn load(path: &Path) -> Result<Self, ProfileError> {
    let content = fs::read_to_string(path).map_err(|source| ProfileError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let file: ProfileFile = toml::from_str(&content).map_err(|e| ProfileError::Parse {
      path: path.to_path_buf(),
      message: e.to_string(),
    })?;

    let mut profile = Self::detect();
    for (key, value) in file.settings {
      profile.set_setting(&key, &value)?;
    }
    for (key, value) in file.options {
      let value = match value {
        toml::Value::String(s) => s,
        toml::Value::Boolean(b) => b.to_string(),
        toml::Value::Integer(n) => n.to_string(),
        other => {
          return Err(ProfileError::Parse {
            path: path.to_path_buf(),
            message: format!("option '{key}' must be a string, boolean or integer, got {}", other.type_str()),
          });
        }
      };
      profile.options.push(OptionRequest::from_key(&key, &value));
    }

    debug!(path = %path.display(), "loaded profile");
    Ok(profile)
  }

  /// Resolve a `--profile` argument: an existing path, or a name under the
  /// profiles directory (with or without `.toml`).
  pub fn find(name_or_path: &str) -> Result<Self, ProfileError> {
    let direct = PathBuf::from(name_or_path);
    if direct.is_file() {
      return Self::load(&direct);
    }
    let dir = profiles_dir();
    for candidate in [dir.join(name_or_path), dir.join(format!("{name_or_path}.toml"))] {
      if candidate.is_file() {
        return Self::load(&candidate);
      }
    }
    Err(ProfileError::NotFound(name_or_path.to_string()))
  }

  /// Set one setting after checking it against the schema. Changing
  /// `compiler` clears sub-settings that belonged to the previous compiler.
  pub fn set_setting(&mut self, key: &str, value: &str) -> Result<(), ProfileError> {
    validate_setting(key, value)?;
    if key == "compiler" && self.settings.get("compiler").is_some_and(|old| old != value) {
      self.settings.retain(|k, _| !k.starts_with("compiler."));
    }
    self.settings.insert(key.to_string(), value.to_string());
    Ok(())
  }

  /// Apply `-s key=value` style overrides.
  pub fn apply_setting_overrides<S: AsRef<str>>(&mut self, overrides: &[S]) -> Result<(), ProfileError> {
    for raw in overrides {
      let (key, value) = split_assignment(raw.as_ref())?;
      self.set_setting(key, value)?;
    }
    Ok(())
  }

  /// Apply `-o [scope:]key=value` style overrides. Later requests win.
  pub fn apply_option_overrides<S: AsRef<str>>(&mut self, overrides: &[S]) -> Result<(), ProfileError> {
    for raw in overrides {
      self.options.push(OptionRequest::parse(raw.as_ref())?);
    }
    Ok(())
  }

  /// The requested value of option `option` for `package`, if any.
  ///
  /// A package-scoped request beats a root request, which beats a wildcard;
  /// within one scope the last request wins.
  pub fn option_for(&self, package: &str, is_root: bool, option: &str) -> Option<ScopedValue> {
    let mut best: Option<(u8, &OptionRequest)> = None;
    for request in self.options.iter().filter(|r| r.name == option) {
      let rank = match &request.scope {
        OptionScope::Package(name) if name == package => 3,
        OptionScope::Root if is_root => 2,
        OptionScope::All => 1,
        _ => continue,
      };
      if best.is_none_or(|(best_rank, _)| rank >= best_rank) {
        best = Some((rank, request));
      }
    }
    best.map(|(rank, request)| ScopedValue {
      value: request.value.clone(),
      strict: rank > 1,
    })
  }

  /// Explicit option names requested for `package` (package scope, or root
  /// scope for roots). Used to reject options the recipe does not declare.
  pub fn explicit_options_for(&self, package: &str, is_root: bool) -> Vec<&str> {
    let mut names: Vec<&str> = self
      .options
      .iter()
      .filter(|r| match &r.scope {
        OptionScope::Package(name) => name == package,
        OptionScope::Root => is_root,
        OptionScope::All => false,
      })
      .map(|r| r.name.as_str())
      .collect();
    names.sort_unstable();
    names.dedup();
    names
  }
}
