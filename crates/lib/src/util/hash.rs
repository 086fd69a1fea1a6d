//! SHA-256 helpers.
//!
//! Package IDs hash a canonical JSON document ([`Hashable`]); artifact
//! markers hash a directory tree ([`hash_directory`]); recipe revisions and
//! download verification hash raw bytes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;

use crate::consts::PACKAGE_ID_LEN;

pub type HashError = serde_json::Error;

/// Truncated hex digest of a serialized value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

/// Values identified by the digest of their JSON form.
///
/// Only ordered collections (`BTreeMap`, `Vec`) may appear in implementors;
/// a `HashMap` would make the digest depend on iteration order.
pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ObjectHash, HashError> {
    let json = serde_json::to_vec(self)?;
    let mut digest = hash_bytes(&json).0;
    digest.truncate(PACKAGE_ID_LEN);
    Ok(ObjectHash(digest))
  }
}

/// Full 64-digit hex SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Error)]
pub enum DirHashError {
  #[error("failed to walk {root}: {source}")]
  Walk {
    root: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Digest of a directory tree.
///
/// Covers relative paths, file contents and symlink targets, visited in
/// sorted order with `/` separators so the digest is the same on every
/// platform. Timestamps and permissions are ignored. Entries whose file name
/// is in `exclude` are skipped together with their contents.
pub fn hash_directory(root: &Path, exclude: &[&str]) -> Result<ContentHash, DirHashError> {
  let mut tree = Sha256::new();
  let walker = WalkDir::new(root)
    .min_depth(1)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| e.file_name().to_str().is_none_or(|name| !exclude.contains(&name)));

  for entry in walker {
    let entry = entry.map_err(|source| DirHashError::Walk {
      root: root.to_path_buf(),
      source,
    })?;
    let path = entry.path();
    let relative = path.strip_prefix(root).unwrap_or(path).to_string_lossy().replace('\\', "/");

    let file_type = entry.file_type();
    let line = if file_type.is_symlink() {
      let target = fs::read_link(path).map_err(|source| DirHashError::Read {
        path: path.to_path_buf(),
        source,
      })?;
      format!("L {relative} {}", hash_bytes(target.to_string_lossy().as_bytes()))
    } else if file_type.is_dir() {
      format!("D {relative}")
    } else if file_type.is_file() {
      format!("F {relative} {}", hash_file(path)?)
    } else {
      continue;
    };
    tree.update(line.as_bytes());
    tree.update(b"\n");
  }

  Ok(ContentHash(hex::encode(tree.finalize())))
}

/// Digest of one file, streamed.
pub fn hash_file(path: &Path) -> Result<ContentHash, DirHashError> {
  let read_err = |source| DirHashError::Read {
    path: path.to_path_buf(),
    source,
  };
  let mut file = fs::File::open(path).map_err(read_err)?;
  let mut hasher = Sha256::new();
  io::copy(&mut file, &mut hasher).map_err(read_err)?;
  Ok(ContentHash(hex::encode(hasher.finalize())))
}

pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(hex::encode(Sha256::digest(data)))
}

/// Total size in bytes of the regular files below `path`. Unreadable entries count as zero.
pub fn dir_size(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .flatten()
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}
