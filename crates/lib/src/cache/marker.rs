//! Completion marker for published artifacts.
//!
//! The marker is the last file written into a staged artifact. It carries
//! the content hash of everything else in the directory, so a partially
//! copied or tampered artifact is detected on lookup and rebuilt.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::CacheError;
use crate::consts::ARTIFACT_MARKER;
use crate::package_id::PackageId;
use crate::util::hash::hash_directory;

/// Entries excluded when hashing artifact contents.
const HASH_EXCLUSIONS: &[&str] = &[ARTIFACT_MARKER];

const MARKER_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMarker {
  pub version: u32,
  pub package_id: PackageId,
  /// Full 64-character SHA-256 of the artifact contents.
  pub output_hash: String,
}

/// Result of checking an artifact directory against its marker.
#[derive(Debug)]
pub enum MarkerCheck {
  Valid(ArtifactMarker),
  Missing,
  Invalid(String),
}

/// Hash `dir` and write the marker into it.
pub fn write_marker(dir: &Path, package_id: &PackageId) -> Result<ArtifactMarker, CacheError> {
  let output_hash = hash_directory(dir, HASH_EXCLUSIONS)?;
  let marker = ArtifactMarker {
    version: MARKER_VERSION,
    package_id: package_id.clone(),
    output_hash: output_hash.0,
  };

  let path = dir.join(ARTIFACT_MARKER);
  let content = serde_json::to_string(&marker).map_err(|e| CacheError::io(&path, std::io::Error::other(e)))?;
  fs::write(&path, format!("{content}\n")).map_err(|e| CacheError::io(&path, e))?;
  Ok(marker)
}

pub fn read_marker(dir: &Path) -> Result<Option<ArtifactMarker>, String> {
  let path = dir.join(ARTIFACT_MARKER);
  if !path.exists() {
    return Ok(None);
  }
  let content = fs::read_to_string(&path).map_err(|e| e.to_string())?;
  serde_json::from_str(&content).map(Some).map_err(|e| e.to_string())
}

/// Verify that `dir` is a complete artifact for `package_id`.
pub fn check_artifact(dir: &Path, package_id: &PackageId) -> MarkerCheck {
  let marker = match read_marker(dir) {
    Ok(Some(marker)) => marker,
    Ok(None) => {
      debug!(path = ?dir, "artifact has no completion marker");
      return MarkerCheck::Missing;
    }
    Err(e) => return MarkerCheck::Invalid(format!("unreadable marker: {e}")),
  };

  if &marker.package_id != package_id {
    return MarkerCheck::Invalid(format!("marker belongs to {}", marker.package_id));
  }

  match hash_directory(dir, HASH_EXCLUSIONS) {
    Ok(actual) if actual.0 == marker.output_hash => MarkerCheck::Valid(marker),
    Ok(actual) => {
      warn!(
        path = ?dir,
        expected = %marker.output_hash,
        actual = %actual.0,
        "artifact contents changed since publish"
      );
      MarkerCheck::Invalid("content hash mismatch".to_string())
    }
    Err(e) => MarkerCheck::Invalid(e.to_string()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn id() -> PackageId {
    PackageId::from_hex("0123456789abcdef0123456789abcdef01234567").unwrap()
  }

  #[test]
  fn freshly_marked_artifact_is_valid() {
    let temp = TempDir::new().unwrap();
    fs::create_dir(temp.path().join("lib")).unwrap();
    fs::write(temp.path().join("lib/libz.a"), "archive").unwrap();

    let written = write_marker(temp.path(), &id()).unwrap();
    match check_artifact(temp.path(), &id()) {
      MarkerCheck::Valid(marker) => assert_eq!(marker, written),
      other => panic!("expected valid artifact, got {other:?}"),
    }
  }

  #[test]
  fn missing_marker_is_incomplete() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("LICENSE"), "zlib").unwrap();
    assert!(matches!(check_artifact(temp.path(), &id()), MarkerCheck::Missing));
  }

  #[test]
  fn modified_content_invalidates() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("zlib.h"), "header").unwrap();
    write_marker(temp.path(), &id()).unwrap();

    fs::write(temp.path().join("zlib.h"), "tampered").unwrap();
    assert!(matches!(check_artifact(temp.path(), &id()), MarkerCheck::Invalid(_)));
  }

  #[test]
  fn marker_for_another_id_is_rejected() {
    let temp = TempDir::new().unwrap();
    write_marker(temp.path(), &id()).unwrap();
    let other = PackageId::from_hex("ffffffffffffffffffffffffffffffffffffffff").unwrap();
    assert!(matches!(check_artifact(temp.path(), &other), MarkerCheck::Invalid(_)));
  }
}
