//! Small filesystem helpers shared by the cache, executor and exporter.

use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;

/// Copy a directory recursively. Symlinks are copied as the files they point to.
pub fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
  fs::create_dir_all(dst)?;
  for entry in fs::read_dir(src)? {
    let entry = entry?;
    let ty = entry.file_type()?;
    let dst_path = dst.join(entry.file_name());
    if ty.is_dir() {
      copy_dir_all(&entry.path(), &dst_path)?;
    } else {
      fs::copy(entry.path(), dst_path)?;
    }
  }
  Ok(())
}

/// Remove a path (file, directory, or symlink). Missing paths are not an error.
pub fn remove_path(path: &Path) -> io::Result<()> {
  let Ok(meta) = path.symlink_metadata() else {
    return Ok(());
  };
  if meta.is_dir() {
    fs::remove_dir_all(path)
  } else {
    fs::remove_file(path)
  }
}

/// Serialize `value` as pretty JSON and write it atomically (temp file, then rename).
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
  let content = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
  let temp_path = path.with_extension("json.tmp");
  fs::write(&temp_path, content)?;
  fs::rename(&temp_path, path)
}
