//! Source downloads with SHA-256 verification and retry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, info, warn};

use super::types::FailureReason;
use crate::recipe::Source;

/// Upper bound for a single retry delay.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
  ChecksumMismatch {
    url: String,
    expected: String,
    actual: String,
  },

  #[error("download of {url} failed: {message}")]
  Network { url: String, message: String },

  #[error("i/o error while fetching {url}: {message}")]
  Io { url: String, message: String },
}

impl FetchError {
  /// Transient failures worth another attempt. A checksum mismatch can be a
  /// truncated transfer, so it is retried too.
  pub fn is_retryable(&self) -> bool {
    matches!(self, FetchError::ChecksumMismatch { .. } | FetchError::Network { .. })
  }
}

impl From<FetchError> for FailureReason {
  fn from(err: FetchError) -> Self {
    match err {
      FetchError::ChecksumMismatch { url, expected, actual } => FailureReason::ChecksumMismatch { url, expected, actual },
      FetchError::Network { url, message } => FailureReason::NetworkError { url, message },
      FetchError::Io { url, message } => FailureReason::Io {
        message: format!("{url}: {message}"),
      },
    }
  }
}

#[async_trait]
pub trait Downloader: Send + Sync {
  /// Download `url` into `dest_dir` and verify it against `sha256`.
  /// Returns the path of the downloaded file.
  async fn download(&self, url: &str, sha256: &str, dest_dir: &Path) -> Result<PathBuf, FetchError>;
}

/// Downloads over HTTP(S), and copies `file://` URLs and plain paths.
///
/// With a cache directory, verified downloads are kept under
/// `<cache>/<sha256>/<filename>` and reused by later builds.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
  client: reqwest::Client,
  cache_dir: Option<PathBuf>,
}

impl Default for HttpDownloader {
  fn default() -> Self {
    Self::new(None)
  }
}

impl HttpDownloader {
  pub fn new(cache_dir: Option<PathBuf>) -> Self {
    Self {
      client: reqwest::Client::new(),
      cache_dir,
    }
  }

  async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
    if let Some(path) = local_path(url) {
      return fs::read(&path).await.map_err(|e| FetchError::Network {
        url: url.to_string(),
        message: e.to_string(),
      });
    }

    let network = |message: String| FetchError::Network {
      url: url.to_string(),
      message,
    };
    let response = self.client.get(url).send().await.map_err(|e| network(e.to_string()))?;
    if !response.status().is_success() {
      return Err(network(format!("HTTP {}", response.status())));
    }
    let bytes = response.bytes().await.map_err(|e| network(e.to_string()))?;
    Ok(bytes.to_vec())
  }
}

#[async_trait]
impl Downloader for HttpDownloader {
  async fn download(&self, url: &str, sha256: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
    let io_err = |e: std::io::Error| FetchError::Io {
      url: url.to_string(),
      message: e.to_string(),
    };
    let expected = sha256.to_ascii_lowercase();
    let filename = url_to_filename(url);
    let dest = dest_dir.join(&filename);
    fs::create_dir_all(dest_dir).await.map_err(io_err)?;

    let cached = self.cache_dir.as_ref().map(|dir| dir.join(&expected).join(&filename));
    if let Some(cached) = &cached
      && cached.exists()
    {
      if let Ok(bytes) = fs::read(cached).await
        && sha256_hex(&bytes) == expected
      {
        debug!(path = ?cached, "using cached download");
        fs::copy(cached, &dest).await.map_err(io_err)?;
        return Ok(dest);
      }
      debug!(path = ?cached, "cached download is corrupt, fetching again");
    }

    info!(url = %url, "fetching source");
    let bytes = self.fetch_bytes(url).await?;
    let actual = sha256_hex(&bytes);
    if actual != expected {
      return Err(FetchError::ChecksumMismatch {
        url: url.to_string(),
        expected,
        actual,
      });
    }

    let mut file = fs::File::create(&dest).await.map_err(io_err)?;
    file.write_all(&bytes).await.map_err(io_err)?;
    file.flush().await.map_err(io_err)?;

    if let Some(cached) = &cached
      && let Some(parent) = cached.parent()
    {
      // Failing to populate the download cache only costs a later re-download.
      if let Err(e) = fs::create_dir_all(parent).await {
        warn!(path = ?parent, error = %e, "failed to create download cache");
      } else if let Err(e) = fs::copy(&dest, cached).await {
        warn!(path = ?cached, error = %e, "failed to cache download");
      }
    }

    info!(path = ?dest, size = bytes.len(), "download complete");
    Ok(dest)
  }
}

/// Fetch a recipe's source archive into `dest_dir`.
///
/// Mirrors are tried in order. Each mirror gets `1 + retries` attempts with
/// exponential backoff starting at `backoff`; only transient failures are
/// retried. The error of the last mirror is returned when all fail.
pub async fn fetch_source(
  downloader: &dyn Downloader,
  source: &Source,
  dest_dir: &Path,
  retries: usize,
  backoff: Duration,
) -> Result<PathBuf, FetchError> {
  let mut last_error = None;
  let sha256 = source.sha256.as_str();

  for url in &source.urls {
    let url = url.as_str();
    // Delays are backoff, 2*backoff, 4*backoff, ...
    let factor = (backoff.as_millis() as u64 / 2).max(1);
    let strategy = ExponentialBackoff::from_millis(2)
      .factor(factor)
      .max_delay(MAX_BACKOFF)
      .take(retries);

    let result = RetryIf::spawn(
      strategy,
      move || async move {
        let attempt = downloader.download(url, sha256, dest_dir).await;
        if let Err(e) = &attempt {
          warn!(url = %url, error = %e, "download attempt failed");
        }
        attempt
      },
      |e: &FetchError| e.is_retryable(),
    )
    .await;

    match result {
      Ok(path) => return Ok(path),
      Err(e) => last_error = Some(e),
    }
  }

  Err(last_error.unwrap_or_else(|| FetchError::Network {
    url: String::new(),
    message: "no source urls".to_string(),
  }))
}

/// A local filesystem path for `file://` URLs and URLs without a scheme.
fn local_path(url: &str) -> Option<PathBuf> {
  if let Some(path) = url.strip_prefix("file://") {
    return Some(PathBuf::from(path));
  }
  if url.contains("://") {
    None
  } else {
    Some(PathBuf::from(url))
  }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  hex::encode(hasher.finalize())
}

/// The last path component of a URL, sanitized. Falls back to a hash of the URL.
fn url_to_filename(url: &str) -> String {
  if let Some(filename) = url.rsplit(['/', '\\']).next() {
    let filename = filename.split('?').next().unwrap_or(filename);
    let sanitized: String = filename
      .chars()
      .map(|c| {
        if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
          c
        } else {
          '_'
        }
      })
      .collect();

    if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
      return sanitized;
    }
  }

  format!("download_{}", &sha256_hex(url.as_bytes())[..16])
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use tempfile::TempDir;

  #[test]
  fn url_to_filename_strips_query() {
    assert_eq!(
      url_to_filename("https://zlib.net/zlib-1.3.1.tar.gz?mirror=1"),
      "zlib-1.3.1.tar.gz"
    );
  }

  #[test]
  fn url_to_filename_fallback_for_empty() {
    assert!(url_to_filename("https://example.com/").starts_with("download_"));
  }

  #[test]
  fn local_paths_are_recognized() {
    assert_eq!(local_path("file:///tmp/a.tgz"), Some(PathBuf::from("/tmp/a.tgz")));
    assert_eq!(local_path("/tmp/a.tgz"), Some(PathBuf::from("/tmp/a.tgz")));
    assert_eq!(local_path("https://example.com/a.tgz"), None);
  }

  #[tokio::test]
  async fn downloads_local_file_and_verifies_checksum() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("src.tar.gz");
    std::fs::write(&archive, b"archive bytes").unwrap();
    let sha = sha256_hex(b"archive bytes");

    let downloader = HttpDownloader::default();
    let dest = temp.path().join("out");
    let path = downloader
      .download(&format!("file://{}", archive.display()), &sha, &dest)
      .await
      .unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"archive bytes");

    let err = downloader
      .download(archive.to_str().unwrap(), &"0".repeat(64), &dest)
      .await
      .unwrap_err();
    assert!(matches!(err, FetchError::ChecksumMismatch { .. }));
  }

  #[tokio::test]
  async fn verified_downloads_are_cached_by_checksum() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("src.tar.gz");
    std::fs::write(&archive, b"payload").unwrap();
    let sha = sha256_hex(b"payload");
    let cache = temp.path().join("downloads");

    let downloader = HttpDownloader::new(Some(cache.clone()));
    let url = archive.to_str().unwrap().to_string();
    downloader.download(&url, &sha, &temp.path().join("a")).await.unwrap();
    assert!(cache.join(&sha).join("src.tar.gz").exists());

    // The original is gone; the cache still serves it.
    std::fs::remove_file(&archive).unwrap();
    let path = downloader.download(&url, &sha, &temp.path().join("b")).await.unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"payload");
  }

  /// Fails the first `failures` attempts, then succeeds.
  struct Flaky {
    failures: usize,
    attempts: AtomicUsize,
    urls: Mutex<Vec<String>>,
    error: FetchError,
  }

  #[async_trait]
  impl Downloader for Flaky {
    async fn download(&self, url: &str, _sha256: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
      self.urls.lock().unwrap().push(url.to_string());
      let n = self.attempts.fetch_add(1, Ordering::SeqCst);
      if n < self.failures {
        Err(self.error.clone())
      } else {
        Ok(dest_dir.join("ok"))
      }
    }
  }

  fn source(urls: &[&str]) -> Source {
    Source {
      urls: urls.iter().map(|u| u.to_string()).collect(),
      sha256: "a".repeat(64),
      strip_root: true,
    }
  }

  fn mismatch() -> FetchError {
    FetchError::ChecksumMismatch {
      url: "u".into(),
      expected: "a".into(),
      actual: "b".into(),
    }
  }

  #[tokio::test]
  async fn transient_failures_are_retried() {
    let flaky = Flaky {
      failures: 2,
      attempts: AtomicUsize::new(0),
      urls: Mutex::new(Vec::new()),
      error: mismatch(),
    };
    let dir = TempDir::new().unwrap();
    let result = fetch_source(&flaky, &source(&["a"]), dir.path(), 3, Duration::from_millis(1)).await;
    assert!(result.is_ok());
    assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn retries_are_bounded_then_next_mirror_is_tried() {
    let flaky = Flaky {
      failures: usize::MAX,
      attempts: AtomicUsize::new(0),
      urls: Mutex::new(Vec::new()),
      error: mismatch(),
    };
    let dir = TempDir::new().unwrap();
    let err = fetch_source(&flaky, &source(&["a", "b"]), dir.path(), 1, Duration::from_millis(1))
      .await
      .unwrap_err();
    assert_eq!(err, mismatch());
    assert_eq!(*flaky.urls.lock().unwrap(), vec!["a", "a", "b", "b"]);
  }

  #[tokio::test]
  async fn io_errors_are_not_retried() {
    let flaky = Flaky {
      failures: usize::MAX,
      attempts: AtomicUsize::new(0),
      urls: Mutex::new(Vec::new()),
      error: FetchError::Io {
        url: "a".into(),
        message: "disk full".into(),
      },
    };
    let dir = TempDir::new().unwrap();
    let result = fetch_source(&flaky, &source(&["a"]), dir.path(), 5, Duration::from_millis(1)).await;
    assert!(result.is_err());
    assert_eq!(flaky.attempts.load(Ordering::SeqCst), 1);
  }
}
