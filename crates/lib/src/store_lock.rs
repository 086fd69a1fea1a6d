//! Cross-process exclusion on the artifact store.
//!
//! The in-process cache already serializes builds of one package ID; this
//! lock keeps two `kiln` processes from publishing into or garbage-collecting
//! the same store at once. Readers (`info`) take it shared, writers
//! (`install`, `build`, `gc`) exclusive.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::platform::paths::store_dir;

const LOCK_FILENAME: &str = ".lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

/// Written into the lock file by the exclusive holder.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub store: PathBuf,
}

#[derive(Debug, Error)]
pub enum StoreLockError {
  #[error(
    "store is locked by {}\nIf no kiln process is running, remove the lock file:\n  {lock_path}",
    describe_holder(.holder.as_ref())
  )]
  Busy {
    holder: Option<LockMetadata>,
    lock_path: PathBuf,
  },

  #[error("failed to create store directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

/// Held for the lifetime of the value; the OS releases the lock on drop.
#[derive(Debug)]
pub struct StoreLock {
  file: File,
  lock_path: PathBuf,
  mode: LockMode,
}

impl StoreLock {
  /// Lock the default store (`KILN_STORE` or the data directory).
  pub fn acquire(mode: LockMode, command: &str) -> Result<Self, StoreLockError> {
    Self::acquire_at(&store_dir(), mode, command)
  }

  /// Lock the store rooted at `store`, failing immediately on contention.
  pub fn acquire_at(store: &Path, mode: LockMode, command: &str) -> Result<Self, StoreLockError> {
    std::fs::create_dir_all(store).map_err(|source| StoreLockError::CreateDir {
      path: store.to_path_buf(),
      source,
    })?;
    let lock_path = store.join(LOCK_FILENAME);

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(StoreLockError::OpenFile)?;

    if let Err(err) = try_lock(&file, mode) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(StoreLockError::Busy {
          holder: current_holder(&lock_path),
          lock_path,
        });
      }
      return Err(StoreLockError::LockFailed(err));
    }

    if mode == LockMode::Exclusive {
      write_metadata(&file, command, store)?;
    }

    debug!(lock = %lock_path.display(), ?mode, command, "store lock acquired");
    Ok(StoreLock { file, lock_path, mode })
  }

  /// Read the metadata through the held handle (a second handle would be
  /// refused on Windows while the lock is held).
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  pub fn mode(&self) -> LockMode {
    self.mode
  }
}

fn write_metadata(mut file: &File, command: &str, store: &Path) -> Result<(), StoreLockError> {
  let metadata = LockMetadata {
    version: 1,
    pid: std::process::id(),
    started_at_unix: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs(),
    command: command.to_string(),
    store: store.to_path_buf(),
  };
  let bytes = serde_json::to_vec_pretty(&metadata).map_err(|e| StoreLockError::WriteMetadata(e.into()))?;

  file.set_len(0).map_err(StoreLockError::WriteMetadata)?;
  file.seek(SeekFrom::Start(0)).map_err(StoreLockError::WriteMetadata)?;
  file.write_all(&bytes).map_err(StoreLockError::WriteMetadata)?;
  file.flush().map_err(StoreLockError::WriteMetadata)
}

/// Metadata left by the current holder, if it can be read.
fn current_holder(lock_path: &Path) -> Option<LockMetadata> {
  let contents = std::fs::read_to_string(lock_path).ok()?;
  serde_json::from_str(&contents).ok()
}

fn describe_holder(holder: Option<&LockMetadata>) -> String {
  match holder {
    Some(h) => format!(
      "'{}' (PID {}, started at unix time {})",
      h.command, h.pid, h.started_at_unix
    ),
    None => "another kiln process".to_string(),
  }
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let flags = match mode {
    LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
    LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
  };

  // SAFETY: OVERLAPPED is plain data and valid when zeroed; the handle is
  // owned by `file` and open for the duration of the call.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
