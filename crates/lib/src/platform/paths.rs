//! Filesystem layout.
//!
//! Every location can be redirected through an environment variable so tests
//! and CI runs stay isolated from the user's real store.

use std::path::PathBuf;

use crate::consts::APP_NAME;

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var("USERPROFILE").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

/// Returns the directory for configuration files (profiles)
#[cfg(windows)]
pub fn config_dir() -> PathBuf {
  std::env::var("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join("AppData").join("Roaming"))
    .join(APP_NAME)
}

/// Returns the directory for configuration files (profiles)
#[cfg(not(windows))]
pub fn config_dir() -> PathBuf {
  let config_home = std::env::var("XDG_CONFIG_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".config"));
  config_home.join(APP_NAME)
}

/// Returns the directory for data files (exported recipes, default store).
/// `KILN_ROOT` overrides it.
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  if let Ok(root) = std::env::var("KILN_ROOT") {
    return PathBuf::from(root);
  }
  std::env::var("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join("AppData").join("Local"))
    .join(APP_NAME)
}

/// Returns the directory for data files (exported recipes, default store).
/// `KILN_ROOT` overrides it.
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  if let Ok(root) = std::env::var("KILN_ROOT") {
    return PathBuf::from(root);
  }
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the directory for cache files (downloaded sources)
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  data_dir().join("Cache")
}

/// Returns the directory for cache files (downloaded sources)
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  let cache_home = std::env::var("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Root of the artifact store. `KILN_STORE` overrides the default.
pub fn store_dir() -> PathBuf {
  if let Ok(path) = std::env::var("KILN_STORE") {
    return PathBuf::from(path);
  }
  data_dir().join("store")
}

/// Directory holding exported recipes. `KILN_RECIPES` overrides the default.
pub fn recipes_dir() -> PathBuf {
  if let Ok(path) = std::env::var("KILN_RECIPES") {
    return PathBuf::from(path);
  }
  data_dir().join("recipes")
}

/// Directory searched for named profiles.
pub fn profiles_dir() -> PathBuf {
  config_dir().join("profiles")
}

/// Directory holding verified source downloads, keyed by checksum.
pub fn downloads_dir() -> PathBuf {
  cache_dir().join("downloads")
}
