//! Source archive extraction.
//!
//! Supports `.tar.gz`/`.tgz`, `.tar.xz`/`.txz`, `.tar.zst`, `.tar` and `.zip`.
//! Other archive suffixes (`.tar.bz2`, `.7z`, `.rar`, ...) are rejected rather
//! than copied. Anything else is treated as a single source file and copied
//! as-is.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;

#[derive(Debug, Error)]
pub enum ExtractError {
  #[error("i/o error extracting {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid archive {path}: {message}")]
  Archive { path: PathBuf, message: String },

  #[error("cannot strip root of {path}: expected a single top-level directory, found {found}")]
  StripRoot { path: PathBuf, found: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
  TarGz,
  TarXz,
  TarZst,
  Tar,
  Zip,
  /// A recognizable archive suffix with no decoder.
  Unsupported,
  Plain,
}

const UNSUPPORTED_SUFFIXES: &[&str] = &[".tar.bz2", ".tbz2", ".tbz", ".tar.lz", ".tar.lzma", ".7z", ".rar"];

pub fn detect_format(path: &Path) -> ArchiveFormat {
  let name = path.to_string_lossy().to_lowercase();
  if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
    ArchiveFormat::TarGz
  } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
    ArchiveFormat::TarXz
  } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
    ArchiveFormat::TarZst
  } else if UNSUPPORTED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
    ArchiveFormat::Unsupported
  } else if name.ends_with(".tar") {
    ArchiveFormat::Tar
  } else if name.ends_with(".zip") {
    ArchiveFormat::Zip
  } else {
    ArchiveFormat::Plain
  }
}

/// Extract `archive` into `dest`.
///
/// With `strip_root`, the archive must contain exactly one top-level
/// directory, whose contents land directly in `dest`.
pub fn extract_archive(archive: &Path, dest: &Path, strip_root: bool) -> Result<(), ExtractError> {
  let io_err = |path: &Path| {
    let path = path.to_path_buf();
    move |source: io::Error| ExtractError::Io { path, source }
  };
  let format = detect_format(archive);
  if format == ArchiveFormat::Unsupported {
    return Err(ExtractError::Archive {
      path: archive.to_path_buf(),
      message: "unsupported archive format".to_string(),
    });
  }
  fs::create_dir_all(dest).map_err(io_err(dest))?;

  if format == ArchiveFormat::Plain {
    let name = archive.file_name().ok_or_else(|| ExtractError::Archive {
      path: archive.to_path_buf(),
      message: "no file name".to_string(),
    })?;
    fs::copy(archive, dest.join(name)).map_err(io_err(archive))?;
    return Ok(());
  }

  // Unpack next to the destination so the final moves are renames.
  let staging = tempfile::Builder::new()
    .prefix(".extract-")
    .tempdir_in(dest)
    .map_err(io_err(dest))?;

  match format {
    ArchiveFormat::TarGz => {
      let file = File::open(archive).map_err(io_err(archive))?;
      extract_tar(flate2::read::GzDecoder::new(BufReader::new(file)), archive, staging.path())?;
    }
    ArchiveFormat::TarXz => {
      let file = File::open(archive).map_err(io_err(archive))?;
      extract_tar(xz2::read::XzDecoder::new(BufReader::new(file)), archive, staging.path())?;
    }
    ArchiveFormat::TarZst => {
      let file = File::open(archive).map_err(io_err(archive))?;
      let decoder = zstd::Decoder::new(file).map_err(|e| ExtractError::Archive {
        path: archive.to_path_buf(),
        message: e.to_string(),
      })?;
      extract_tar(decoder, archive, staging.path())?;
    }
    ArchiveFormat::Tar => {
      let file = File::open(archive).map_err(io_err(archive))?;
      extract_tar(BufReader::new(file), archive, staging.path())?;
    }
    ArchiveFormat::Zip => extract_zip(archive, staging.path())?,
    ArchiveFormat::Unsupported | ArchiveFormat::Plain => {}
  }

  let mut root = staging.path().to_path_buf();
  if strip_root {
    let entries: Vec<_> = fs::read_dir(staging.path())
      .map_err(io_err(staging.path()))?
      .filter_map(|e| e.ok())
      .collect();
    match entries.as_slice() {
      [single] if single.path().is_dir() => root = single.path(),
      _ => {
        return Err(ExtractError::StripRoot {
          path: archive.to_path_buf(),
          found: entries.len(),
        });
      }
    }
  }

  for entry in fs::read_dir(&root).map_err(io_err(&root))?.flatten() {
    let target = dest.join(entry.file_name());
    fs::rename(entry.path(), &target).map_err(io_err(&target))?;
  }

  debug!(archive = ?archive, dest = ?dest, strip_root, "extracted source archive");
  Ok(())
}

fn extract_tar<R: Read>(reader: R, archive_path: &Path, dest: &Path) -> Result<(), ExtractError> {
  let invalid = |e: io::Error| ExtractError::Archive {
    path: archive_path.to_path_buf(),
    message: e.to_string(),
  };

  let mut archive = tar::Archive::new(reader);
  for entry in archive.entries().map_err(invalid)? {
    let mut entry = entry.map_err(invalid)?;
    // unpack_in refuses entries that would escape `dest`.
    if !entry.unpack_in(dest).map_err(invalid)? {
      let path = entry.path().map(|p| p.display().to_string()).unwrap_or_default();
      return Err(ExtractError::Archive {
        path: archive_path.to_path_buf(),
        message: format!("entry escapes the destination: {path}"),
      });
    }
  }
  Ok(())
}

fn extract_zip(archive_path: &Path, dest: &Path) -> Result<(), ExtractError> {
  let invalid = |message: String| ExtractError::Archive {
    path: archive_path.to_path_buf(),
    message,
  };
  let io_err = |path: &Path, source| ExtractError::Io {
    path: path.to_path_buf(),
    source,
  };

  let file = File::open(archive_path).map_err(|e| io_err(archive_path, e))?;
  let mut archive = ZipArchive::new(file).map_err(|e| invalid(e.to_string()))?;

  for i in 0..archive.len() {
    let mut file = archive.by_index(i).map_err(|e| invalid(e.to_string()))?;
    let Some(relative) = file.enclosed_name() else {
      return Err(invalid(format!("entry escapes the destination: {}", file.name())));
    };
    let path = dest.join(relative);

    if file.is_dir() {
      fs::create_dir_all(&path).map_err(|e| io_err(&path, e))?;
      continue;
    }
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let mut out = File::create(&path).map_err(|e| io_err(&path, e))?;
    io::copy(&mut file, &mut out).map_err(|e| io_err(&path, e))?;

    #[cfg(unix)]
    if let Some(mode) = file.unix_mode() {
      use std::os::unix::fs::PermissionsExt;
      fs::set_permissions(&path, fs::Permissions::from_mode(mode)).map_err(|e| io_err(&path, e))?;
    }
  }
  Ok(())
}
