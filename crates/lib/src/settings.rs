//! The settings schema: which axes exist and which values they accept.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level settings axes a recipe can declare.
///
/// Declaring `compiler` also pulls in its sub-settings (`compiler.version`,
/// `compiler.cppstd`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingAxis {
  Os,
  Arch,
  Compiler,
  BuildType,
}

impl SettingAxis {
  pub const ALL: [SettingAxis; 4] = [Self::Os, Self::Arch, Self::Compiler, Self::BuildType];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Os => "os",
      Self::Arch => "arch",
      Self::Compiler => "compiler",
      Self::BuildType => "build_type",
    }
  }

  /// The axis a setting key belongs to (`compiler.version` -> `Compiler`).
  pub fn of_key(key: &str) -> Option<SettingAxis> {
    let head = key.split('.').next().unwrap_or(key);
    let axis = Self::ALL.into_iter().find(|axis| axis.as_str() == head)?;
    is_known_setting(key).then_some(axis)
  }
}

impl fmt::Display for SettingAxis {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Every setting key kiln understands.
pub const SETTING_KEYS: &[&str] = &[
  "os",
  "arch",
  "build_type",
  "compiler",
  "compiler.version",
  "compiler.cppstd",
  "compiler.libcxx",
  "compiler.runtime",
];

const OS_VALUES: &[&str] = &["Windows", "Linux", "Macos", "FreeBSD", "Android", "iOS", "Emscripten"];
const ARCH_VALUES: &[&str] = &["x86", "x86_64", "armv7", "armv7hf", "armv8", "ppc64le", "s390x", "wasm"];
const BUILD_TYPE_VALUES: &[&str] = &["Debug", "Release", "RelWithDebInfo", "MinSizeRel"];
const COMPILER_VALUES: &[&str] = &["gcc", "clang", "apple-clang", "msvc", "intel-cc"];
const CPPSTD_VALUES: &[&str] = &[
  "98", "gnu98", "11", "gnu11", "14", "gnu14", "17", "gnu17", "20", "gnu20", "23", "gnu23",
];
const LIBCXX_VALUES: &[&str] = &["libstdc++", "libstdc++11", "libc++", "c++_shared", "c++_static"];
const RUNTIME_VALUES: &[&str] = &["static", "dynamic"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingError {
  #[error("unknown setting '{0}'")]
  Unknown(String),

  #[error("invalid value '{value}' for setting '{key}' (allowed: {})", allowed.join(", "))]
  InvalidValue {
    key: String,
    value: String,
    allowed: Vec<String>,
  },
}

pub fn is_known_setting(key: &str) -> bool {
  SETTING_KEYS.contains(&key)
}

/// Allowed values for `key`, or `None` when the setting is free-form.
pub fn allowed_values(key: &str) -> Option<&'static [&'static str]> {
  match key {
    "os" => Some(OS_VALUES),
    "arch" => Some(ARCH_VALUES),
    "build_type" => Some(BUILD_TYPE_VALUES),
    "compiler" => Some(COMPILER_VALUES),
    "compiler.cppstd" => Some(CPPSTD_VALUES),
    "compiler.libcxx" => Some(LIBCXX_VALUES),
    "compiler.runtime" => Some(RUNTIME_VALUES),
    _ => None,
  }
}

pub fn validate_setting(key: &str, value: &str) -> Result<(), SettingError> {
  if !is_known_setting(key) {
    return Err(SettingError::Unknown(key.to_string()));
  }
  match allowed_values(key) {
    Some(allowed) if !allowed.contains(&value) => Err(SettingError::InvalidValue {
      key: key.to_string(),
      value: value.to_string(),
      allowed: allowed.iter().map(|s| s.to_string()).collect(),
    }),
    _ if value.trim().is_empty() => Err(SettingError::InvalidValue {
      key: key.to_string(),
      value: value.to_string(),
      allowed: Vec::new(),
    }),
    _ => Ok(()),
  }
}

/// Orderable rank of a C++ standard (`gnu17` ranks like `17`, `98` before `11`).
pub fn cppstd_rank(value: &str) -> Option<u32> {
  let digits = value.strip_prefix("gnu").unwrap_or(value);
  let year: u32 = digits.parse().ok()?;
  match year {
    98 => Some(1998),
    0..=97 => Some(2000 + year),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn axis_of_sub_setting() {
    assert_eq!(SettingAxis::of_key("compiler.cppstd"), Some(SettingAxis::Compiler));
    assert_eq!(SettingAxis::of_key("build_type"), Some(SettingAxis::BuildType));
    assert_eq!(SettingAxis::of_key("compiler.frobs"), None);
    assert_eq!(SettingAxis::of_key("shared"), None);
  }

  #[test]
  fn rejects_typos_in_enumerated_settings() {
    assert!(validate_setting("os", "Windows").is_ok());
    assert!(matches!(
      validate_setting("os", "Windwos"),
      Err(SettingError::InvalidValue { .. })
    ));
    assert!(matches!(validate_setting("color", "red"), Err(SettingError::Unknown(_))));
  }

  #[test]
  fn free_form_settings_accept_any_non_empty_value() {
    assert!(validate_setting("compiler.version", "13.2").is_ok());
    assert!(validate_setting("compiler.version", " ").is_err());
  }

  #[test]
  fn cppstd_ordering() {
    assert!(cppstd_rank("98") < cppstd_rank("11"));
    assert!(cppstd_rank("gnu14") < cppstd_rank("17"));
    assert_eq!(cppstd_rank("gnu20"), cppstd_rank("20"));
    assert_eq!(cppstd_rank("c++17"), None);
  }
}
