//! Post-package file rules and the package info file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::context::BuildContext;
use super::types::FailureReason;
use crate::configure::Configuration;
use crate::consts::PACKAGE_INFO_FILE;
use crate::package_id::PackageId;
use crate::recipe::{ComponentRef, PackageInfo, PackageRules};
use crate::util::fs::{remove_path, write_json_atomic};

/// Contents of `kiln-package.json` in every published artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
  pub reference: String,
  pub package_id: PackageId,
  #[serde(flatten)]
  pub configuration: Configuration,
  pub package_info: PackageInfo,
  /// Dependency name to package ID.
  pub dependencies: BTreeMap<String, PackageId>,
}

impl ArtifactInfo {
  pub fn read(artifact_dir: &Path) -> Option<Self> {
    let content = fs::read_to_string(artifact_dir.join(PACKAGE_INFO_FILE)).ok()?;
    serde_json::from_str(&content).ok()
  }

  pub fn write(&self, package_dir: &Path) -> Result<(), FailureReason> {
    let path = package_dir.join(PACKAGE_INFO_FILE);
    write_json_atomic(&path, self).map_err(|e| FailureReason::io(path.display(), e))
  }
}

/// The package info as published for `configuration`: components whose
/// condition does not hold are left out, the rest lose their condition.
pub fn published_info(info: &PackageInfo, configuration: &Configuration) -> PackageInfo {
  let mut info = info.clone();
  info
    .components
    .retain(|_, component| component.when.as_ref().is_none_or(|when| configuration.satisfies(when)));
  for component in info.components.values_mut() {
    component.when = None;
  }
  info
}

/// Check `pkg::name` component requirements against the package info of the
/// dependencies' published artifacts. `pkg::pkg` always names the whole
/// dependency.
pub fn check_component_requires(info: &PackageInfo, deps: &BTreeMap<String, PathBuf>) -> Result<(), FailureReason> {
  for (name, component) in &info.components {
    for raw in &component.requires {
      let ComponentRef::External { package, component } = ComponentRef::parse(raw) else {
        continue;
      };
      let invalid = |why: String| FailureReason::InvalidPackageInfo {
        reason: format!("component '{name}' requires '{raw}', but {why}"),
      };
      let Some(artifact) = deps.get(package) else {
        return Err(invalid(format!("'{package}' is not a dependency in this configuration")));
      };
      if component == package {
        continue;
      }
      let Some(dep) = ArtifactInfo::read(artifact) else {
        return Err(invalid(format!("the package info of '{package}' is unreadable")));
      };
      if !dep.package_info.components.contains_key(component) {
        return Err(invalid(format!("'{package}' has no component '{component}'")));
      }
    }
  }
  Ok(())
}

/// Apply copy rules, then removals, to the package directory.
pub fn apply_package_rules(rules: &PackageRules, ctx: &BuildContext) -> Result<(), FailureReason> {
  for rule in &rules.copy {
    let src_root = ctx.folder(rule.src);
    let dst_root = ctx.package_dir.join(&rule.dst);
    let copied = for_each_match(src_root, &rule.pattern, |path, relative| {
      if !path.is_file() {
        return Ok(());
      }
      let target = if rule.keep_path {
        dst_root.join(relative)
      } else {
        match path.file_name() {
          Some(name) => dst_root.join(name),
          None => return Ok(()),
        }
      };
      if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| FailureReason::io(parent.display(), e))?;
      }
      fs::copy(path, &target).map_err(|e| FailureReason::io(target.display(), e))?;
      Ok(())
    })?;
    debug!(pattern = %rule.pattern, copied, "applied copy rule");
  }

  for pattern in &rules.remove {
    let removed = for_each_match(&ctx.package_dir, pattern, |path, _| {
      remove_path(path).map_err(|e| FailureReason::io(path.display(), e))
    })?;
    debug!(pattern = %pattern, removed, "applied remove rule");
  }
  Ok(())
}

/// Run `f` for every path under `root` matching `pattern`. A pattern without
/// a directory part also matches at any depth (`*.pdb` finds `bin/foo.pdb`).
fn for_each_match(
  root: &Path,
  pattern: &str,
  mut f: impl FnMut(&Path, &Path) -> Result<(), FailureReason>,
) -> Result<usize, FailureReason> {
  let invalid = |message: String| FailureReason::Internal {
    message: format!("invalid package pattern '{pattern}': {message}"),
  };

  let escaped_root = glob::Pattern::escape(&root.to_string_lossy());
  let mut patterns = vec![format!("{escaped_root}/{pattern}")];
  if !pattern.contains('/') {
    patterns.push(format!("{escaped_root}/**/{pattern}"));
  }

  let mut seen = std::collections::BTreeSet::new();
  for full in patterns {
    for entry in glob::glob(&full).map_err(|e| invalid(e.to_string()))? {
      let path = entry.map_err(|e| invalid(e.to_string()))?;
      seen.insert(path);
    }
  }

  // Parents sort before children, so removing `share` first makes its
  // matched children disappear; skip those.
  let mut count = 0;
  for path in &seen {
    if path.symlink_metadata().is_err() {
      continue;
    }
    let relative = path.strip_prefix(root).unwrap_or(path);
    f(path, relative)?;
    count += 1;
  }
  Ok(count)
}
