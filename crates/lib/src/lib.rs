//! kiln-lib: recipe-driven package builds
//!
//! The pipeline runs in four stages:
//! - `recipe`: load and validate recipes into an index
//! - `configure`: resolve each package's settings and options from a profile
//! - `graph`: expand requirements into a dependency graph keyed by `PackageId`
//! - `execute`: build the graph in dependency order, publishing artifacts to the `cache`

pub mod cache;
pub mod configure;
pub mod consts;
pub mod execute;
pub mod export;
pub mod graph;
pub mod package_id;
pub mod placeholder;
pub mod platform;
pub mod profile;
pub mod recipe;
pub mod settings;
pub mod store_lock;
pub mod util;
pub mod version;
