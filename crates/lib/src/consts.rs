//! Constants shared across the crate.

/// Application name, used for directory layout and lock messages.
pub const APP_NAME: &str = "kiln";

/// Length of a package ID (hex characters of a truncated SHA-256).
pub const PACKAGE_ID_LEN: usize = 40;

/// Marker file written into every published artifact.
pub const ARTIFACT_MARKER: &str = ".kiln-complete";

/// Package metadata file written into every artifact by the packaging step.
pub const PACKAGE_INFO_FILE: &str = "kiln-package.json";

/// Supported recipe file names, in lookup order.
pub const RECIPE_FILE_NAMES: &[&str] = &["recipe.lua", "recipe.toml"];

/// Optional per-recipe data file with sources and patches keyed by version.
pub const RECIPE_DATA_FILE: &str = "conandata.yml";
