//! Per-root cancellation.
//!
//! Every root request gets its own token. A node is cancelled only once all
//! roots that transitively depend on it are cancelled, so a dependency shared
//! with a still-active request keeps building.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

/// Cancellation tokens keyed by root package name.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
  /// Parent of every root token, so `cancel_all` also covers roots seen later.
  all: CancellationToken,
  tokens: Arc<Mutex<BTreeMap<String, CancellationToken>>>,
}

impl Cancellation {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, BTreeMap<String, CancellationToken>> {
    self.tokens.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// The token of `root`, created on first use.
  pub fn token(&self, root: &str) -> CancellationToken {
    self
      .lock()
      .entry(root.to_string())
      .or_insert_with(|| self.all.child_token())
      .clone()
  }

  pub fn cancel_root(&self, root: &str) {
    self.token(root).cancel();
  }

  pub fn cancel_all(&self) {
    self.all.cancel();
  }

  /// The combined view for a node owned by `roots`.
  pub fn for_owners<'a>(&self, roots: impl IntoIterator<Item = &'a str>) -> NodeCancel {
    NodeCancel {
      tokens: roots.into_iter().map(|r| self.token(r)).collect(),
    }
  }
}

/// Cancelled when every owning root is cancelled.
#[derive(Debug, Clone)]
pub struct NodeCancel {
  tokens: Vec<CancellationToken>,
}

impl NodeCancel {
  pub fn is_cancelled(&self) -> bool {
    !self.tokens.is_empty() && self.tokens.iter().all(|t| t.is_cancelled())
  }

  /// Resolves once every owner is cancelled. Never resolves without owners.
  pub async fn cancelled(&self) {
    if self.tokens.is_empty() {
      std::future::pending::<()>().await;
    }
    futures::future::join_all(self.tokens.iter().map(|t| t.cancelled())).await;
  }
}
