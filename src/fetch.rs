//! Cache-first fetch interception.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{CacheStorage, FetchRequest, RequestIdentity, ResponseSnapshot};

/// Intercepts requests on behalf of the page and answers them cache-first.
///
/// The interceptor is bound to a single cache store (the current version)
/// and never creates or deletes stores. Network access is injected as a
/// fetcher closure so the policy is testable without a server.
pub struct FetchInterceptor<S: CacheStorage> {
  storage: Arc<S>,
  store_name: String,
  /// Identity of the offline fallback document
  fallback: RequestIdentity,
}

impl<S: CacheStorage> FetchInterceptor<S> {
  pub fn new(storage: Arc<S>, store_name: String, fallback: RequestIdentity) -> Self {
    Self {
      storage,
      store_name,
      fallback,
    }
  }

  /// Answer one intercepted request.
  ///
  /// 1. Cache lookup by request identity; a hit is returned as-is, with no
  ///    network round-trip and no staleness check.
  /// 2. On a miss the fetcher runs. Plain 200 same-origin responses are
  ///    copied into the cache; the write is fire-and-forget and its
  ///    failure never fails the fetch. Everything else is returned
  ///    uncached.
  /// 3. If the network itself fails, document navigations fall back to the
  ///    cached offline page; all other requests propagate the error.
  pub async fn handle<F, Fut>(&self, request: &FetchRequest, fetcher: F) -> Result<ResponseSnapshot>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ResponseSnapshot>>,
  {
    let identity = request.identity();

    if let Some(hit) = self.storage.get(&self.store_name, &identity)? {
      return Ok(hit);
    }

    match fetcher().await {
      Ok(response) => {
        if response.is_cacheable() {
          if let Err(e) = self.storage.put(&self.store_name, &identity, &response) {
            debug!("cache write for {} failed: {}", identity.url(), e);
          }
        }
        Ok(response)
      }
      Err(err) => {
        if request.is_navigation() {
          if let Some(fallback) = self.storage.get(&self.store_name, &self.fallback)? {
            debug!("serving offline fallback for {}", identity.url());
            return Ok(fallback);
          }
        }
        Err(err)
      }
    }
  }
}

impl<S: CacheStorage> Clone for FetchInterceptor<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      store_name: self.store_name.clone(),
      fallback: self.fallback.clone(),
    }
  }
}
