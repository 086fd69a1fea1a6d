//! Manual garbage collection of the artifact store.
//!
//! Three sweeps:
//! - leftovers in `tmp/` from interrupted builds and displaced artifacts
//! - directories in `pkg/` without a valid completion marker
//! - least recently used artifacts beyond the requested limits
//!
//! Callers should hold the exclusive store lock so no other process is
//! building into the same store.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::marker::{MarkerCheck, check_artifact};
use super::{ArtifactCache, CacheConfig, CacheError, PKG_DIR};
use crate::consts::PACKAGE_ID_LEN;
use crate::package_id::PackageId;
use crate::util::fs::remove_path;
use crate::util::hash::dir_size;

#[derive(Debug, Clone, Copy, Default)]
pub struct GcOptions {
  pub max_entries: Option<usize>,
  pub max_bytes: Option<u64>,
  pub dry_run: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct GcStats {
  pub artifacts_scanned: usize,
  pub artifacts_evicted: usize,
  pub incomplete_removed: usize,
  pub scratch_removed: usize,
  pub bytes_freed: u64,
}

impl GcStats {
  pub fn total_removed(&self) -> usize {
    self.artifacts_evicted + self.incomplete_removed + self.scratch_removed
  }
}

#[derive(Debug, Serialize)]
pub struct GcResult {
  pub stats: GcStats,
  pub evicted: Vec<PackageId>,
  pub removed_paths: Vec<PathBuf>,
}

impl ArtifactCache {
  pub fn collect_garbage(&self, options: GcOptions) -> Result<GcResult, CacheError> {
    let mut stats = GcStats::default();
    let mut removed_paths = Vec::new();

    self.sweep_scratch(options.dry_run, &mut stats, &mut removed_paths)?;
    self.sweep_incomplete(options.dry_run, &mut stats, &mut removed_paths)?;

    let limits = CacheConfig {
      max_entries: options.max_entries,
      max_bytes: options.max_bytes,
    };
    let sizes: HashMap<PackageId, u64> = self.entries().into_iter().map(|e| (e.package_id, e.size)).collect();
    let evicted = if options.dry_run {
      self.plan_eviction(limits)
    } else {
      self.enforce_limits(limits)?
    };
    stats.bytes_freed += evicted.iter().filter_map(|id| sizes.get(id)).sum::<u64>();
    stats.artifacts_evicted = evicted.len();
    removed_paths.extend(evicted.iter().map(|id| self.artifact_path(id)));

    info!(
      evicted = stats.artifacts_evicted,
      incomplete = stats.incomplete_removed,
      scratch = stats.scratch_removed,
      bytes_freed = stats.bytes_freed,
      dry_run = options.dry_run,
      "garbage collection complete"
    );

    Ok(GcResult {
      stats,
      evicted,
      removed_paths,
    })
  }

  fn sweep_scratch(&self, dry_run: bool, stats: &mut GcStats, removed: &mut Vec<PathBuf>) -> Result<(), CacheError> {
    let tmp = self.tmp_dir();
    let active: HashSet<String> = self.lock().flights.keys().map(|id| id.to_string()).collect();

    for entry in fs::read_dir(&tmp).map_err(|e| CacheError::io(&tmp, e))?.flatten() {
      let path = entry.path();
      let name = entry.file_name().to_string_lossy().to_string();
      // Scratch directories are named `<id>-<random>`, displaced ones `<id>.old-<ts>`.
      let owner = name.get(..PACKAGE_ID_LEN).unwrap_or_default();
      if active.contains(owner) {
        debug!(path = ?path, "skipping scratch directory of a running build");
        continue;
      }

      stats.bytes_freed += dir_size(&path);
      stats.scratch_removed += 1;
      if !dry_run && let Err(e) = remove_path(&path) {
        warn!(path = ?path, error = %e, "failed to remove scratch directory");
        continue;
      }
      removed.push(path);
    }
    Ok(())
  }

  fn sweep_incomplete(&self, dry_run: bool, stats: &mut GcStats, removed: &mut Vec<PathBuf>) -> Result<(), CacheError> {
    let pkg = self.inner.root.join(PKG_DIR);
    let indexed: HashSet<PackageId> = self.entries().into_iter().map(|e| e.package_id).collect();

    for entry in fs::read_dir(&pkg).map_err(|e| CacheError::io(&pkg, e))?.flatten() {
      let path = entry.path();
      stats.artifacts_scanned += 1;
      let id = path.file_name().and_then(|n| n.to_str()).and_then(PackageId::from_hex);

      let valid = match &id {
        Some(id) if indexed.contains(id) => continue,
        Some(id) => matches!(check_artifact(&path, id), MarkerCheck::Valid(_)),
        None => false,
      };

      if valid {
        // Complete but unknown to the index: adopt it.
        if let Some(id) = id
          && !dry_run
        {
          self.get(&id)?;
        }
        continue;
      }

      stats.bytes_freed += dir_size(&path);
      stats.incomplete_removed += 1;
      if !dry_run {
        remove_path(&path).map_err(|e| CacheError::io(&path, e))?;
      }
      removed.push(path);
    }
    Ok(())
  }

  fn plan_eviction(&self, limits: CacheConfig) -> Vec<PackageId> {
    let state = self.lock();
    let mut count = state.index.len();
    let mut bytes = state.index.total_bytes();
    let mut planned = Vec::new();
    for id in state.index.eviction_order(&state.pins) {
      let over = limits.max_entries.is_some_and(|max| count > max) || limits.max_bytes.is_some_and(|max| bytes > max);
      if !over {
        break;
      }
      if let Some(entry) = state.index.get(&id) {
        count -= 1;
        bytes = bytes.saturating_sub(entry.size);
      }
      planned.push(id);
    }
    planned
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn id(c: char) -> PackageId {
    PackageId::from_hex(c.to_string().repeat(40)).unwrap()
  }

  fn publish(cache: &ArtifactCache, id: &PackageId) {
    let scratch = cache.scratch_dir(id).unwrap();
    let package = scratch.path().join("package");
    fs::create_dir_all(&package).unwrap();
    fs::write(package.join("libfoo.a"), vec![0u8; 64]).unwrap();
    cache.put(id, &package, None).unwrap();
  }

  #[test]
  fn removes_leftover_scratch_and_incomplete_artifacts() {
    let temp = TempDir::new().unwrap();
    let cache = ArtifactCache::open(temp.path(), CacheConfig::default()).unwrap();
    publish(&cache, &id('a'));

    let leftover = cache.scratch_dir(&id('b')).unwrap().keep();
    let incomplete = cache.artifact_path(&id('c'));
    fs::create_dir_all(&incomplete).unwrap();
    fs::write(incomplete.join("half.o"), "x").unwrap();

    let result = cache.collect_garbage(GcOptions::default()).unwrap();
    assert_eq!(result.stats.scratch_removed, 1);
    assert_eq!(result.stats.incomplete_removed, 1);
    assert!(!leftover.exists());
    assert!(!incomplete.exists());
    assert!(cache.artifact_path(&id('a')).exists());
  }

  #[test]
  fn evicts_to_requested_limits() {
    let temp = TempDir::new().unwrap();
    let cache = ArtifactCache::open(temp.path(), CacheConfig::default()).unwrap();
    for c in ['a', 'b', 'c'] {
      publish(&cache, &id(c));
    }

    let result = cache
      .collect_garbage(GcOptions {
        max_entries: Some(1),
        ..Default::default()
      })
      .unwrap();
    assert_eq!(result.evicted, vec![id('a'), id('b')]);
    assert!(result.stats.bytes_freed > 0);
    assert_eq!(cache.entries().len(), 1);
  }

  #[test]
  fn dry_run_changes_nothing() {
    let temp = TempDir::new().unwrap();
    let cache = ArtifactCache::open(temp.path(), CacheConfig::default()).unwrap();
    publish(&cache, &id('a'));
    publish(&cache, &id('b'));

    let result = cache
      .collect_garbage(GcOptions {
        max_entries: Some(0),
        dry_run: true,
        ..Default::default()
      })
      .unwrap();
    assert_eq!(result.evicted.len(), 2);
    assert_eq!(cache.entries().len(), 2);
    assert!(cache.artifact_path(&id('a')).exists());
  }
}
