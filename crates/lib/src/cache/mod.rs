//! Content-addressed artifact cache.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/pkg/<package_id>/   published artifacts (immutable, marker inside)
//! <root>/tmp/                scratch space and displaced entries
//! <root>/index.json          size and access bookkeeping
//! ```
//!
//! Every read, write and eviction of the index goes through one mutex.
//! Builds of the same package ID are serialized by a per-ID async lock
//! ([`ArtifactCache::get_or_build`]), so concurrent requests build once and
//! the rest read the published result.

mod gc;
mod index;
mod marker;

use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::package_id::PackageId;
use crate::util::fs::{copy_dir_all, remove_path};
use crate::util::hash::{DirHashError, dir_size};

pub use gc::{GcOptions, GcResult, GcStats};
pub use index::{CacheIndex, IndexEntry};
pub use marker::{ArtifactMarker, MarkerCheck, check_artifact, read_marker};

use index::now_millis;

const PKG_DIR: &str = "pkg";
const TMP_DIR: &str = "tmp";
const INDEX_FILE: &str = "index.json";

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("cache i/o error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to hash artifact: {0}")]
  Hash(#[from] DirHashError),

  #[error("invalid cache index {path}: {message}")]
  Index { path: PathBuf, message: String },

  #[error("artifact {0} is in use by a running build")]
  Pinned(PackageId),

  #[error("cache task failed: {0}")]
  Task(String),
}

impl CacheError {
  pub(crate) fn io(path: &Path, source: io::Error) -> Self {
    CacheError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

/// Error from [`ArtifactCache::get_or_build`]: either the caller's build or
/// the cache itself failed.
#[derive(Debug, Error)]
pub enum GetOrBuildError<E> {
  #[error(transparent)]
  Build(E),

  #[error(transparent)]
  Cache(CacheError),
}

/// Size bounds. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheConfig {
  pub max_entries: Option<usize>,
  pub max_bytes: Option<u64>,
}

/// Outcome of [`ArtifactCache::get_or_build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFetch {
  pub path: PathBuf,
  /// `true` if this call ran the build, `false` on a cache hit.
  pub built: bool,
}

struct Flight {
  lock: Arc<tokio::sync::Mutex<()>>,
  members: usize,
}

struct State {
  index: CacheIndex,
  pins: HashMap<PackageId, usize>,
  flights: HashMap<PackageId, Flight>,
}

struct Inner {
  root: PathBuf,
  config: CacheConfig,
  state: Mutex<State>,
}

/// Handle to an artifact cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ArtifactCache {
  inner: Arc<Inner>,
}

impl std::fmt::Debug for ArtifactCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ArtifactCache")
      .field("root", &self.inner.root)
      .field("config", &self.inner.config)
      .finish()
  }
}

impl ArtifactCache {
  /// Open (or create) the cache rooted at `root`.
  ///
  /// A missing or unreadable `index.json` is rebuilt from the completed
  /// artifacts on disk.
  pub fn open(root: impl Into<PathBuf>, config: CacheConfig) -> Result<Self, CacheError> {
    let root = root.into();
    for dir in [root.join(PKG_DIR), root.join(TMP_DIR)] {
      fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
    }

    let index_path = root.join(INDEX_FILE);
    let index = match CacheIndex::load(&index_path) {
      Ok(Some(index)) => index,
      Ok(None) => {
        let index = CacheIndex::rebuild(&root.join(PKG_DIR))?;
        index.save(&index_path)?;
        index
      }
      Err(e) => {
        warn!(error = %e, "cache index unreadable, rebuilding");
        let index = CacheIndex::rebuild(&root.join(PKG_DIR))?;
        index.save(&index_path)?;
        index
      }
    };

    debug!(root = ?root, entries = index.len(), "opened artifact cache");
    Ok(ArtifactCache {
      inner: Arc::new(Inner {
        root,
        config,
        state: Mutex::new(State {
          index,
          pins: HashMap::new(),
          flights: HashMap::new(),
        }),
      }),
    })
  }

  pub fn root(&self) -> &Path {
    &self.inner.root
  }

  pub fn config(&self) -> CacheConfig {
    self.inner.config
  }

  /// Where the artifact for `id` lives once published.
  pub fn artifact_path(&self, id: &PackageId) -> PathBuf {
    self.inner.root.join(PKG_DIR).join(id.as_str())
  }

  fn tmp_dir(&self) -> PathBuf {
    self.inner.root.join(TMP_DIR)
  }

  fn index_path(&self) -> PathBuf {
    self.inner.root.join(INDEX_FILE)
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// A fresh private directory under `<root>/tmp`, removed on drop.
  pub fn scratch_dir(&self, id: &PackageId) -> Result<tempfile::TempDir, CacheError> {
    let tmp = self.tmp_dir();
    tempfile::Builder::new()
      .prefix(&format!("{id}-"))
      .tempdir_in(&tmp)
      .map_err(|e| CacheError::io(&tmp, e))
  }

  /// Look up a published artifact.
  ///
  /// The artifact's content is checked against its completion marker; an
  /// incomplete or modified directory is removed and reported as a miss.
  pub fn get(&self, id: &PackageId) -> Result<Option<PathBuf>, CacheError> {
    let path = self.artifact_path(id);
    if !path.is_dir() {
      let mut state = self.lock();
      if state.index.remove(id).is_some() {
        debug!(id = %id, "dropping index entry without artifact");
        state.index.save(&self.index_path())?;
      }
      return Ok(None);
    }

    match check_artifact(&path, id) {
      MarkerCheck::Valid(_) => {
        let mut state = self.lock();
        if !state.index.touch(id, now_millis()) {
          // Published by another process since the index was loaded.
          state.index.insert(id.clone(), None, dir_size(&path), now_millis());
        }
        state.index.save(&self.index_path())?;
        Ok(Some(path))
      }
      MarkerCheck::Missing | MarkerCheck::Invalid(_) => {
        info!(id = %id, "discarding incomplete artifact");
        let aside = {
          let mut state = self.lock();
          state.index.remove(id);
          state.index.save(&self.index_path())?;
          self.move_aside(&path, id)?
        };
        remove_path(&aside).map_err(|e| CacheError::io(&aside, e))?;
        Ok(None)
      }
    }
  }

  /// Publish `staged` as the artifact for `id`.
  ///
  /// The completion marker is written into the staged directory, which is
  /// then renamed into place. An existing entry is moved aside first and
  /// removed afterwards, so readers never observe a half-written artifact.
  pub fn put(&self, id: &PackageId, staged: &Path, reference: Option<&str>) -> Result<PathBuf, CacheError> {
    // Renames are only atomic within one filesystem.
    let mut _scratch = None;
    let staged = if staged.starts_with(self.tmp_dir()) {
      staged.to_path_buf()
    } else {
      let scratch = self.scratch_dir(id)?;
      let content = scratch.path().join("content");
      copy_dir_all(staged, &content).map_err(|e| CacheError::io(staged, e))?;
      _scratch = Some(scratch);
      content
    };

    marker::write_marker(&staged, id)?;
    let size = dir_size(&staged);
    let dest = self.artifact_path(id);

    let (displaced, evicted) = {
      let mut state = self.lock();
      let displaced = if dest.exists() {
        Some(self.move_aside(&dest, id)?)
      } else {
        None
      };

      if let Err(e) = fs::rename(&staged, &dest) {
        if let Some(aside) = &displaced {
          let _ = fs::rename(aside, &dest);
        }
        return Err(CacheError::io(&dest, e));
      }

      state
        .index
        .insert(id.clone(), reference.map(str::to_string), size, now_millis());
      let limits = self.inner.config;
      let evicted = self.evict_over_limits(&mut state, limits, Some(id))?;
      state.index.save(&self.index_path())?;
      (displaced, evicted)
    };

    for path in displaced.iter().chain(evicted.iter().map(|(_, path)| path)) {
      if let Err(e) = remove_path(path) {
        warn!(path = ?path, error = %e, "failed to remove displaced artifact");
      }
    }

    info!(id = %id, size, "published artifact");
    Ok(dest)
  }

  /// Return the artifact for `id`, running `build` only if it is missing.
  ///
  /// `build` receives a fresh scratch directory and returns the directory to
  /// publish (usually a subdirectory of the scratch directory). Concurrent
  /// calls for the same ID run `build` at most once between them; the others
  /// wait and then read the published artifact. If the building caller is
  /// cancelled its lock is released and the next waiter builds.
  ///
  /// With `force`, an existing artifact is ignored and replaced.
  pub async fn get_or_build<F, Fut, E>(
    &self,
    id: &PackageId,
    reference: &str,
    force: bool,
    build: F,
  ) -> Result<CacheFetch, GetOrBuildError<E>>
  where
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = Result<PathBuf, E>>,
  {
    let ticket = self.flight_ticket(id);
    let _guard = Arc::clone(&ticket.lock).lock_owned().await;

    if !force {
      let cache = self.clone();
      let lookup_id = id.clone();
      let hit = tokio::task::spawn_blocking(move || cache.get(&lookup_id))
        .await
        .map_err(|e| GetOrBuildError::Cache(CacheError::Task(e.to_string())))?
        .map_err(GetOrBuildError::Cache)?;
      if let Some(path) = hit {
        debug!(id = %id, "cache hit");
        return Ok(CacheFetch { path, built: false });
      }
    }

    let scratch = self.scratch_dir(id).map_err(GetOrBuildError::Cache)?;
    let staged = build(scratch.path().to_path_buf()).await.map_err(GetOrBuildError::Build)?;

    let cache = self.clone();
    let put_id = id.clone();
    let reference = reference.to_string();
    let path = tokio::task::spawn_blocking(move || cache.put(&put_id, &staged, Some(&reference)))
      .await
      .map_err(|e| GetOrBuildError::Cache(CacheError::Task(e.to_string())))?
      .map_err(GetOrBuildError::Cache)?;

    drop(scratch);
    Ok(CacheFetch { path, built: true })
  }

  fn flight_ticket(&self, id: &PackageId) -> FlightTicket {
    let mut state = self.lock();
    let flight = state.flights.entry(id.clone()).or_insert_with(|| Flight {
      lock: Arc::default(),
      members: 0,
    });
    flight.members += 1;
    FlightTicket {
      cache: self.clone(),
      id: id.clone(),
      lock: Arc::clone(&flight.lock),
    }
  }

  /// Protect artifacts from eviction until the guard is dropped.
  pub fn pin(&self, ids: impl IntoIterator<Item = PackageId>) -> PinGuard {
    let ids: Vec<PackageId> = ids.into_iter().collect();
    let mut state = self.lock();
    for id in &ids {
      *state.pins.entry(id.clone()).or_insert(0) += 1;
    }
    PinGuard {
      cache: self.clone(),
      ids,
    }
  }

  pub fn is_pinned(&self, id: &PackageId) -> bool {
    self.lock().pins.get(id).copied().unwrap_or(0) > 0
  }

  /// Remove one artifact. Returns `false` if it was not cached.
  pub fn evict(&self, id: &PackageId) -> Result<bool, CacheError> {
    let aside = {
      let mut state = self.lock();
      if state.pins.get(id).copied().unwrap_or(0) > 0 {
        return Err(CacheError::Pinned(id.clone()));
      }
      let indexed = state.index.remove(id).is_some();
      let path = self.artifact_path(id);
      let aside = if path.exists() {
        Some(self.move_aside(&path, id)?)
      } else {
        None
      };
      if !indexed && aside.is_none() {
        return Ok(false);
      }
      state.index.save(&self.index_path())?;
      aside
    };
    if let Some(aside) = aside {
      remove_path(&aside).map_err(|e| CacheError::io(&aside, e))?;
    }
    info!(id = %id, "evicted artifact");
    Ok(true)
  }

  /// Evict least recently used, unpinned artifacts until `limits` hold.
  pub fn enforce_limits(&self, limits: CacheConfig) -> Result<Vec<PackageId>, CacheError> {
    let evicted = {
      let mut state = self.lock();
      let evicted = self.evict_over_limits(&mut state, limits, None)?;
      if !evicted.is_empty() {
        state.index.save(&self.index_path())?;
      }
      evicted
    };
    for (_, path) in &evicted {
      remove_path(path).map_err(|e| CacheError::io(path, e))?;
    }
    Ok(evicted.into_iter().map(|(id, _)| id).collect())
  }

  /// Snapshot of the index, least recently used first.
  pub fn entries(&self) -> Vec<IndexEntry> {
    let state = self.lock();
    let mut entries: Vec<IndexEntry> = state.index.entries().cloned().collect();
    entries.sort_by_key(|e| (e.last_access_millis, e.seq));
    entries
  }

  /// Drop entries from the index and move their directories aside. Runs
  /// under the state lock; returns the aside paths for deletion after it
  /// is released.
  fn evict_over_limits(
    &self,
    state: &mut State,
    limits: CacheConfig,
    keep: Option<&PackageId>,
  ) -> Result<Vec<(PackageId, PathBuf)>, CacheError> {
    let mut evicted = Vec::new();
    let mut count = state.index.len();
    let mut bytes = state.index.total_bytes();
    let over = |count: usize, bytes: u64| {
      limits.max_entries.is_some_and(|max| count > max) || limits.max_bytes.is_some_and(|max| bytes > max)
    };
    if !over(count, bytes) {
      return Ok(evicted);
    }

    for id in state.index.eviction_order(&state.pins) {
      if !over(count, bytes) {
        break;
      }
      if keep == Some(&id) {
        continue;
      }
      let Some(entry) = state.index.remove(&id) else {
        continue;
      };
      count -= 1;
      bytes = bytes.saturating_sub(entry.size);
      let path = self.artifact_path(&id);
      if path.exists() {
        let aside = self.move_aside(&path, &id)?;
        evicted.push((id.clone(), aside));
      }
      debug!(id = %id, size = entry.size, "evicting least recently used artifact");
    }

    if over(count, bytes) {
      warn!(count, bytes, "cache still over its limits; remaining artifacts are pinned");
    }
    Ok(evicted)
  }

  fn move_aside(&self, path: &Path, id: &PackageId) -> Result<PathBuf, CacheError> {
    let aside = self.tmp_dir().join(format!("{id}.old-{}", now_millis()));
    let aside = unique_path(aside);
    fs::rename(path, &aside).map_err(|e| CacheError::io(path, e))?;
    Ok(aside)
  }
}

fn unique_path(base: PathBuf) -> PathBuf {
  if !base.exists() {
    return base;
  }
  let mut n = 1;
  loop {
    let candidate = base.with_extension(n.to_string());
    if !candidate.exists() {
      return candidate;
    }
    n += 1;
  }
}

/// Membership in a per-ID build queue. Removes the queue once the last
/// member leaves, including when the owning future is dropped.
struct FlightTicket {
  cache: ArtifactCache,
  id: PackageId,
  lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for FlightTicket {
  fn drop(&mut self) {
    let mut state = self.cache.lock();
    if let Some(flight) = state.flights.get_mut(&self.id) {
      flight.members -= 1;
      if flight.members == 0 {
        state.flights.remove(&self.id);
      }
    }
  }
}

/// Keeps artifacts out of eviction while a dependent builds.
pub struct PinGuard {
  cache: ArtifactCache,
  ids: Vec<PackageId>,
}

impl Drop for PinGuard {
  fn drop(&mut self) {
    let mut state = self.cache.lock();
    for id in &self.ids {
      if let Some(count) = state.pins.get_mut(id) {
        *count -= 1;
        if *count == 0 {
          state.pins.remove(id);
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use tempfile::TempDir;

  fn id(c: char) -> PackageId {
    PackageId::from_hex(c.to_string().repeat(40)).unwrap()
  }

  fn stage(cache: &ArtifactCache, id: &PackageId, content: &str) -> tempfile::TempDir {
    let scratch = cache.scratch_dir(id).unwrap();
    fs::create_dir_all(scratch.path().join("package/lib")).unwrap();
    fs::write(scratch.path().join("package/lib/libz.a"), content).unwrap();
    scratch
  }

  #[test]
  fn put_then_get() {
    let temp = TempDir::new().unwrap();
    let cache = ArtifactCache::open(temp.path(), CacheConfig::default()).unwrap();
    assert_eq!(cache.get(&id('a')).unwrap(), None);

    let scratch = stage(&cache, &id('a'), "v1");
    let path = cache.put(&id('a'), &scratch.path().join("package"), Some("zlib/1.3.1")).unwrap();
    assert_eq!(path, cache.artifact_path(&id('a')));
    assert_eq!(cache.get(&id('a')).unwrap(), Some(path.clone()));
    assert_eq!(fs::read_to_string(path.join("lib/libz.a")).unwrap(), "v1");
  }

  #[test]
  fn put_replaces_existing_entry() {
    let temp = TempDir::new().unwrap();
    let cache = ArtifactCache::open(temp.path(), CacheConfig::default()).unwrap();

    let first = stage(&cache, &id('a'), "v1");
    cache.put(&id('a'), &first.path().join("package"), None).unwrap();
    let second = stage(&cache, &id('a'), "v2");
    let path = cache.put(&id('a'), &second.path().join("package"), None).unwrap();

    assert_eq!(fs::read_to_string(path.join("lib/libz.a")).unwrap(), "v2");
    assert_eq!(cache.entries().len(), 1);
  }

  #[test]
  fn put_copies_directories_outside_the_store() {
    let temp = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    fs::write(outside.path().join("zlib.h"), "header").unwrap();

    let cache = ArtifactCache::open(temp.path().join("store"), CacheConfig::default()).unwrap();
    let path = cache.put(&id('a'), outside.path(), None).unwrap();
    assert!(path.join("zlib.h").exists());
    assert!(outside.path().join("zlib.h").exists());
  }

  #[test]
  fn corrupted_artifact_is_a_miss() {
    let temp = TempDir::new().unwrap();
    let cache = ArtifactCache::open(temp.path(), CacheConfig::default()).unwrap();
    let scratch = stage(&cache, &id('a'), "v1");
    let path = cache.put(&id('a'), &scratch.path().join("package"), None).unwrap();

    fs::write(path.join("lib/libz.a"), "truncated").unwrap();
    assert_eq!(cache.get(&id('a')).unwrap(), None);
    assert!(!path.exists());
    assert!(cache.entries().is_empty());
  }

  #[test]
  fn index_is_rebuilt_when_missing() {
    let temp = TempDir::new().unwrap();
    {
      let cache = ArtifactCache::open(temp.path(), CacheConfig::default()).unwrap();
      let scratch = stage(&cache, &id('a'), "v1");
      cache.put(&id('a'), &scratch.path().join("package"), None).unwrap();
    }
    fs::remove_file(temp.path().join(INDEX_FILE)).unwrap();

    let cache = ArtifactCache::open(temp.path(), CacheConfig::default()).unwrap();
    assert_eq!(cache.entries().len(), 1);
    assert!(cache.get(&id('a')).unwrap().is_some());
  }

  #[test]
  fn lru_eviction_skips_pinned_entries() {
    let temp = TempDir::new().unwrap();
    let cache = ArtifactCache::open(
      temp.path(),
      CacheConfig {
        max_entries: Some(2),
        max_bytes: None,
      },
    )
    .unwrap();

    for c in ['a', 'b'] {
      let scratch = stage(&cache, &id(c), "x");
      cache.put(&id(c), &scratch.path().join("package"), None).unwrap();
    }
    // `a` is the least recently used but pinned; `b` goes instead.
    let _pin = cache.pin([id('a')]);
    let scratch = stage(&cache, &id('c'), "x");
    cache.put(&id('c'), &scratch.path().join("package"), None).unwrap();

    let ids: Vec<PackageId> = cache.entries().into_iter().map(|e| e.package_id).collect();
    assert!(ids.contains(&id('a')));
    assert!(!ids.contains(&id('b')));
    assert!(ids.contains(&id('c')));
    assert!(!cache.artifact_path(&id('b')).exists());
  }

  #[test]
  fn evicting_a_pinned_artifact_is_refused() {
    let temp = TempDir::new().unwrap();
    let cache = ArtifactCache::open(temp.path(), CacheConfig::default()).unwrap();
    let scratch = stage(&cache, &id('a'), "x");
    cache.put(&id('a'), &scratch.path().join("package"), None).unwrap();

    let pin = cache.pin([id('a')]);
    assert!(matches!(cache.evict(&id('a')), Err(CacheError::Pinned(_))));
    drop(pin);
    assert!(!cache.is_pinned(&id('a')));
    assert!(cache.evict(&id('a')).unwrap());
    assert!(!cache.evict(&id('a')).unwrap());
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_get_or_build_builds_once() {
    let temp = TempDir::new().unwrap();
    let cache = ArtifactCache::open(temp.path(), CacheConfig::default()).unwrap();
    let builds = Arc::new(AtomicUsize::new(0));

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
      let cache = cache.clone();
      let builds = Arc::clone(&builds);
      tasks.spawn(async move {
        cache
          .get_or_build(&id('a'), "zlib/1.3.1", false, |scratch| async move {
            builds.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let package = scratch.join("package");
            fs::create_dir_all(&package).map_err(|e| e.to_string())?;
            fs::write(package.join("libz.a"), "built").map_err(|e| e.to_string())?;
            Ok::<_, String>(package)
          })
          .await
          .unwrap()
      });
    }

    let mut built = 0;
    while let Some(fetch) = tasks.join_next().await {
      let fetch = fetch.unwrap();
      assert_eq!(fs::read_to_string(fetch.path.join("libz.a")).unwrap(), "built");
      if fetch.built {
        built += 1;
      }
    }
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(built, 1);
    assert!(cache.lock().flights.is_empty());
  }

  #[tokio::test]
  async fn cancelled_leader_lets_the_next_caller_build() {
    let temp = TempDir::new().unwrap();
    let cache = ArtifactCache::open(temp.path(), CacheConfig::default()).unwrap();

    let leader = {
      let cache = cache.clone();
      tokio::spawn(async move {
        cache
          .get_or_build(&id('a'), "zlib/1.3.1", false, |_scratch| async move {
            std::future::pending::<Result<PathBuf, String>>().await
          })
          .await
      })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    leader.abort();
    let _ = leader.await;

    let fetch = cache
      .get_or_build(&id('a'), "zlib/1.3.1", false, |scratch| async move {
        let package = scratch.join("package");
        fs::create_dir_all(&package).map_err(|e| e.to_string())?;
        Ok::<_, String>(package)
      })
      .await
      .unwrap();
    assert!(fetch.built);
  }

  #[tokio::test]
  async fn failed_build_publishes_nothing() {
    let temp = TempDir::new().unwrap();
    let cache = ArtifactCache::open(temp.path(), CacheConfig::default()).unwrap();

    let result = cache
      .get_or_build(&id('a'), "zlib/1.3.1", false, |scratch| async move {
        fs::write(scratch.join("partial.o"), "x").map_err(|e| e.to_string())?;
        Err::<PathBuf, _>("compiler exploded".to_string())
      })
      .await;

    assert!(matches!(result, Err(GetOrBuildError::Build(_))));
    assert!(!cache.artifact_path(&id('a')).exists());
    assert_eq!(fs::read_dir(temp.path().join(TMP_DIR)).unwrap().count(), 0);
  }
}
