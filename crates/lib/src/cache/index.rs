//! The persisted cache index: one entry per published artifact.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::CacheError;
use super::marker::{MarkerCheck, check_artifact};
use crate::consts::ARTIFACT_MARKER;
use crate::package_id::PackageId;
use crate::util::fs::write_json_atomic;
use crate::util::hash::dir_size;

const INDEX_VERSION: u32 = 1;

pub(crate) fn now_millis() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
  pub package_id: PackageId,
  /// `name/version` of the recipe that produced the artifact, when known.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reference: Option<String>,
  pub size: u64,
  pub created_millis: u64,
  pub last_access_millis: u64,
  /// Tie-breaker for accesses within the same millisecond.
  pub seq: u64,
}

impl IndexEntry {
  fn recency(&self) -> (u64, u64) {
    (self.last_access_millis, self.seq)
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheIndex {
  pub version: u32,
  next_seq: u64,
  entries: BTreeMap<PackageId, IndexEntry>,
}

impl CacheIndex {
  pub fn empty() -> Self {
    CacheIndex {
      version: INDEX_VERSION,
      ..Default::default()
    }
  }

  /// Read `index.json`. `Ok(None)` when the file does not exist.
  pub fn load(path: &Path) -> Result<Option<Self>, CacheError> {
    if !path.exists() {
      return Ok(None);
    }
    let content = fs::read_to_string(path).map_err(|e| CacheError::io(path, e))?;
    let index: CacheIndex = serde_json::from_str(&content).map_err(|e| CacheError::Index {
      path: path.to_path_buf(),
      message: e.to_string(),
    })?;
    if index.version != INDEX_VERSION {
      return Err(CacheError::Index {
        path: path.to_path_buf(),
        message: format!("unsupported index version {}", index.version),
      });
    }
    Ok(Some(index))
  }

  pub fn save(&self, path: &Path) -> Result<(), CacheError> {
    write_json_atomic(path, self).map_err(|e| CacheError::io(path, e))
  }

  /// Rebuild the index from the completed artifacts under `pkg_dir`.
  ///
  /// Directories without a valid marker are left out (and later replaced on
  /// the next build of that ID). Access times start at the marker's mtime.
  pub fn rebuild(pkg_dir: &Path) -> Result<Self, CacheError> {
    let mut index = CacheIndex::empty();
    if !pkg_dir.exists() {
      return Ok(index);
    }

    let mut found: Vec<(u64, IndexEntry)> = Vec::new();
    for entry in fs::read_dir(pkg_dir).map_err(|e| CacheError::io(pkg_dir, e))?.flatten() {
      let path = entry.path();
      let Some(id) = path.file_name().and_then(|n| n.to_str()).and_then(PackageId::from_hex) else {
        continue;
      };
      match check_artifact(&path, &id) {
        MarkerCheck::Valid(_) => {}
        MarkerCheck::Missing => continue,
        MarkerCheck::Invalid(reason) => {
          warn!(path = ?path, %reason, "skipping invalid artifact while rebuilding index");
          continue;
        }
      }
      let touched = fs::metadata(path.join(ARTIFACT_MARKER))
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
      found.push((
        touched,
        IndexEntry {
          package_id: id,
          reference: None,
          size: dir_size(&path),
          created_millis: touched,
          last_access_millis: touched,
          seq: 0,
        },
      ));
    }

    found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.package_id.cmp(&b.1.package_id)));
    for (_, mut entry) in found {
      entry.seq = index.bump_seq();
      index.entries.insert(entry.package_id.clone(), entry);
    }
    debug!(entries = index.entries.len(), "rebuilt cache index");
    Ok(index)
  }

  fn bump_seq(&mut self) -> u64 {
    self.next_seq += 1;
    self.next_seq
  }

  pub fn get(&self, id: &PackageId) -> Option<&IndexEntry> {
    self.entries.get(id)
  }

  pub fn contains(&self, id: &PackageId) -> bool {
    self.entries.contains_key(id)
  }

  pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
    self.entries.values()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn total_bytes(&self) -> u64 {
    self.entries.values().map(|e| e.size).sum()
  }

  /// Record an access. Returns `false` if the ID is not indexed.
  pub fn touch(&mut self, id: &PackageId, now: u64) -> bool {
    let seq = self.bump_seq();
    match self.entries.get_mut(id) {
      Some(entry) => {
        entry.last_access_millis = now;
        entry.seq = seq;
        true
      }
      None => false,
    }
  }

  pub fn insert(&mut self, id: PackageId, reference: Option<String>, size: u64, now: u64) {
    let seq = self.bump_seq();
    let created = self.entries.get(&id).map_or(now, |e| e.created_millis);
    self.entries.insert(
      id.clone(),
      IndexEntry {
        package_id: id,
        reference,
        size,
        created_millis: created,
        last_access_millis: now,
        seq,
      },
    );
  }

  pub fn remove(&mut self, id: &PackageId) -> Option<IndexEntry> {
    self.entries.remove(id)
  }

  /// Unpinned entries, least recently used first.
  pub fn eviction_order(&self, pins: &HashMap<PackageId, usize>) -> Vec<PackageId> {
    let mut candidates: Vec<&IndexEntry> = self
      .entries
      .values()
      .filter(|e| pins.get(&e.package_id).copied().unwrap_or(0) == 0)
      .collect();
    candidates.sort_by_key(|e| e.recency());
    candidates.into_iter().map(|e| e.package_id.clone()).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::marker::write_marker;
  use tempfile::TempDir;

  fn id(c: char) -> PackageId {
    PackageId::from_hex(c.to_string().repeat(40)).unwrap()
  }

  #[test]
  fn eviction_order_is_lru_and_skips_pins() {
    let mut index = CacheIndex::empty();
    index.insert(id('a'), None, 10, 100);
    index.insert(id('b'), None, 10, 100);
    index.insert(id('c'), None, 10, 50);
    index.touch(&id('a'), 200);

    let mut pins = HashMap::new();
    assert_eq!(index.eviction_order(&pins), vec![id('c'), id('b'), id('a')]);

    pins.insert(id('c'), 1);
    assert_eq!(index.eviction_order(&pins), vec![id('b'), id('a')]);
  }

  #[test]
  fn same_millisecond_uses_sequence() {
    let mut index = CacheIndex::empty();
    index.insert(id('b'), None, 1, 100);
    index.insert(id('a'), None, 1, 100);
    assert_eq!(index.eviction_order(&HashMap::new()), vec![id('b'), id('a')]);
  }

  #[test]
  fn save_and_load() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("index.json");
    let mut index = CacheIndex::empty();
    index.insert(id('a'), Some("zlib/1.3.1".into()), 42, 7);
    index.save(&path).unwrap();

    let loaded = CacheIndex::load(&path).unwrap().unwrap();
    assert_eq!(loaded.get(&id('a')).unwrap().reference.as_deref(), Some("zlib/1.3.1"));
    assert_eq!(loaded.total_bytes(), 42);
    assert!(CacheIndex::load(&temp.path().join("missing.json")).unwrap().is_none());
  }

  #[test]
  fn rebuild_keeps_only_complete_artifacts() {
    let temp = TempDir::new().unwrap();
    let complete = temp.path().join(id('a').as_str());
    fs::create_dir_all(&complete).unwrap();
    fs::write(complete.join("LICENSE"), "x").unwrap();
    write_marker(&complete, &id('a')).unwrap();

    let partial = temp.path().join(id('b').as_str());
    fs::create_dir_all(&partial).unwrap();
    fs::write(partial.join("LICENSE"), "x").unwrap();

    fs::create_dir_all(temp.path().join("not-an-id")).unwrap();

    let index = CacheIndex::rebuild(temp.path()).unwrap();
    assert_eq!(index.len(), 1);
    assert!(index.contains(&id('a')));
    assert!(index.get(&id('a')).unwrap().size > 0);
  }
}
