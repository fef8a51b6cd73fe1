//! Cache store lifecycle: install-time precaching and activation cleanup.

use color_eyre::{eyre::eyre, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use std::sync::Arc;
use tracing::info;
use url::Url;

use crate::cache::{CacheStorage, RequestIdentity, ResponseSnapshot};

/// Owns creation and deletion of cache stores.
///
/// A version bump (a new store name) is the only invalidation mechanism:
/// `install` populates the new store, `activate` purges every other one.
pub struct LifecycleManager<S: CacheStorage> {
  storage: Arc<S>,
  store_name: String,
}

impl<S: CacheStorage> LifecycleManager<S> {
  pub fn new(storage: Arc<S>, store_name: String) -> Self {
    Self {
      storage,
      store_name,
    }
  }

  /// Fetch every manifest URL and store the results as one atomic batch.
  ///
  /// Fetches run sequentially and the first failure (network error or
  /// non-success status) aborts the whole install with nothing written,
  /// so a store is never left half-precached but marked ready. Running
  /// install again for an already-installed version is a no-op apart from
  /// refreshing the precached bodies.
  pub async fn install<F, Fut>(&self, manifest: &[Url], fetcher: F) -> Result<usize>
  where
    F: Fn(Url) -> Fut,
    Fut: Future<Output = Result<ResponseSnapshot>>,
  {
    let entries: Vec<(RequestIdentity, ResponseSnapshot)> = stream::iter(manifest.iter().cloned())
      .then(|url| {
        let fetch = fetcher(url.clone());
        async move {
          let snapshot = fetch
            .await
            .map_err(|e| eyre!("Precache fetch for {} failed: {}", url, e))?;
          if !snapshot.ok() {
            return Err(eyre!(
              "Precache fetch for {} returned status {}",
              url,
              snapshot.status
            ));
          }
          Ok((RequestIdentity::get(&url), snapshot))
        }
      })
      .try_collect()
      .await?;

    self.storage.precache(&self.store_name, &entries)?;
    info!(
      "installed {} with {} precached entries",
      self.store_name,
      entries.len()
    );

    Ok(entries.len())
  }

  /// Delete every store other than the current version.
  ///
  /// Refuses to run while the current version has no committed precache
  /// batch, so a failed install never gets promoted. Returns the names of
  /// the purged stores.
  pub fn activate(&self) -> Result<Vec<String>> {
    if !self.storage.store_is_complete(&self.store_name)? {
      return Err(eyre!(
        "Cache store {} is not installed; run install first",
        self.store_name
      ));
    }

    let mut purged = Vec::new();
    for name in self.storage.store_names()? {
      if name != self.store_name {
        self.storage.delete_store(&name)?;
        info!("purged stale cache store {}", name);
        purged.push(name);
      }
    }

    Ok(purged)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, ResponseKind};
  use std::sync::atomic::{AtomicU32, Ordering};

  fn url(path: &str) -> Url {
    Url::parse(&format!("http://origin.test{}", path)).unwrap()
  }

  fn manifest() -> Vec<Url> {
    vec![url("/"), url("/static/js/bundle.js"), url("/static/css/main.css")]
  }

  fn snapshot_for(url: &Url, status: u16) -> ResponseSnapshot {
    ResponseSnapshot {
      status,
      kind: ResponseKind::Basic,
      redirected: false,
      headers: Vec::new(),
      body: url.path().as_bytes().to_vec(),
    }
  }

  fn manager(storage: &Arc<MemoryStorage>, name: &str) -> LifecycleManager<MemoryStorage> {
    LifecycleManager::new(Arc::clone(storage), name.to_string())
  }

  #[tokio::test]
  async fn test_install_precaches_manifest() {
    let storage = Arc::new(MemoryStorage::new());
    let lifecycle = manager(&storage, "shell-v1");

    let count = lifecycle
      .install(&manifest(), |url| async move { Ok(snapshot_for(&url, 200)) })
      .await
      .unwrap();

    assert_eq!(count, 3);
    assert!(storage.store_is_complete("shell-v1").unwrap());
    let hit = storage
      .get("shell-v1", &RequestIdentity::get(&url("/static/css/main.css")))
      .unwrap()
      .unwrap();
    assert_eq!(hit.body, b"/static/css/main.css");
  }

  #[tokio::test]
  async fn test_install_twice_yields_same_entries() {
    let storage = Arc::new(MemoryStorage::new());
    let lifecycle = manager(&storage, "shell-v1");

    for _ in 0..2 {
      lifecycle
        .install(&manifest(), |url| async move { Ok(snapshot_for(&url, 200)) })
        .await
        .unwrap();
    }

    assert_eq!(storage.entry_count("shell-v1").unwrap(), 3);
  }

  #[tokio::test]
  async fn test_install_fails_fast_on_bad_status() {
    let storage = Arc::new(MemoryStorage::new());
    let lifecycle = manager(&storage, "shell-v1");

    let fetches = AtomicU32::new(0);
    let result = lifecycle
      .install(&manifest(), |url| {
        fetches.fetch_add(1, Ordering::SeqCst);
        let status = if url.path() == "/static/js/bundle.js" {
          404
        } else {
          200
        };
        async move { Ok(snapshot_for(&url, status)) }
      })
      .await;

    assert!(result.is_err());
    // The css entry after the failing one is never fetched
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    // Nothing was written and the version is not installable
    assert_eq!(storage.entry_count("shell-v1").unwrap(), 0);
    assert!(!storage.store_is_complete("shell-v1").unwrap());
    assert!(lifecycle.activate().is_err());
  }

  #[tokio::test]
  async fn test_install_aborts_on_network_error() {
    let storage = Arc::new(MemoryStorage::new());
    let lifecycle = manager(&storage, "shell-v1");

    let result = lifecycle
      .install(&manifest(), |url| {
        let out = if url.path() == "/" {
          Err(eyre!("connection refused"))
        } else {
          Ok(snapshot_for(&url, 200))
        };
        async move { out }
      })
      .await;

    assert!(result.is_err());
    assert!(storage.store_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_activate_purges_stale_stores() {
    let storage = Arc::new(MemoryStorage::new());
    manager(&storage, "shell-v1")
      .install(&manifest(), |url| async move { Ok(snapshot_for(&url, 200)) })
      .await
      .unwrap();

    let v2 = manager(&storage, "shell-v2");
    v2.install(&manifest(), |url| async move { Ok(snapshot_for(&url, 200)) })
      .await
      .unwrap();
    let purged = v2.activate().unwrap();

    assert_eq!(purged, vec!["shell-v1".to_string()]);
    assert_eq!(storage.store_names().unwrap(), vec!["shell-v2".to_string()]);
    // Entries written under the old version are gone with it
    assert!(storage
      .get("shell-v1", &RequestIdentity::get(&url("/")))
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_activate_is_idempotent() {
    let storage = Arc::new(MemoryStorage::new());
    let lifecycle = manager(&storage, "shell-v1");
    lifecycle
      .install(&manifest(), |url| async move { Ok(snapshot_for(&url, 200)) })
      .await
      .unwrap();

    assert!(lifecycle.activate().unwrap().is_empty());
    assert!(lifecycle.activate().unwrap().is_empty());
    assert_eq!(storage.store_names().unwrap(), vec!["shell-v1".to_string()]);
  }
}
