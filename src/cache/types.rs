//! Core value types for the offline cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// How an intercepted request will be used by the page.
///
/// Document requests are top-level navigations and are the only kind that
/// falls back to the offline page when both cache and network miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level document navigation
  Document,
  /// Any subresource (script, stylesheet, image, API call, ...)
  Resource,
}

/// Normalized identity of a request: uppercased method plus the URL with
/// its fragment stripped. Two requests with the same identity share one
/// cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
  method: String,
  url: String,
}

impl RequestIdentity {
  pub fn new(method: &str, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.to_uppercase(),
      url: url.to_string(),
    }
  }

  /// Identity of a plain GET for the given URL.
  pub fn get(url: &Url) -> Self {
    Self::new("GET", url)
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// Stable fixed-length key for storage lookups.
  pub fn entry_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// An intercepted request as delivered by the host environment.
#[derive(Debug, Clone)]
pub struct FetchRequest {
  pub method: String,
  pub url: Url,
  pub mode: RequestMode,
}

impl FetchRequest {
  pub fn get(url: Url, mode: RequestMode) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      mode,
    }
  }

  pub fn identity(&self) -> RequestIdentity {
    RequestIdentity::new(&self.method, &self.url)
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Document
  }
}

/// Classification of a network response relative to the configured origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
  /// Same-origin response with readable headers and body
  Basic,
  /// Cross-origin response obtained with CORS
  Cors,
  /// Cross-origin response with no readable body
  Opaque,
}

impl std::fmt::Display for ResponseKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ResponseKind::Basic => write!(f, "basic"),
      ResponseKind::Cors => write!(f, "cors"),
      ResponseKind::Opaque => write!(f, "opaque"),
    }
  }
}

/// Immutable snapshot of a network response: status, headers and the full
/// body captured once. Cloning yields an independent copy, so the copy
/// returned to the caller and the copy persisted into the cache never share
/// a buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
  pub status: u16,
  pub kind: ResponseKind,
  pub redirected: bool,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl ResponseSnapshot {
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only plain 200 same-origin responses that were not redirected are
  /// ever written to the cache.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && self.kind == ResponseKind::Basic && !self.redirected
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// One unit of offline-captured data awaiting delivery to the origin
/// server. Created by the page while offline, deleted only after the whole
/// queue has been delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSyncRecord {
  pub id: i64,
  pub payload: serde_json::Value,
  pub queued_at: DateTime<Utc>,
}

/// Summary of one cache store, for operational inspection.
#[derive(Debug, Clone)]
pub struct StoreInfo {
  pub name: String,
  pub complete: bool,
  pub entries: usize,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_identity_strips_fragment() {
    let a = RequestIdentity::get(&url("http://origin.test/page#section"));
    let b = RequestIdentity::get(&url("http://origin.test/page"));
    assert_eq!(a, b);
    assert_eq!(a.entry_key(), b.entry_key());
  }

  #[test]
  fn test_identity_uppercases_method() {
    let a = RequestIdentity::new("get", &url("http://origin.test/"));
    assert_eq!(a.method(), "GET");
  }

  #[test]
  fn test_identity_keeps_query() {
    let a = RequestIdentity::get(&url("http://origin.test/page?tab=1"));
    let b = RequestIdentity::get(&url("http://origin.test/page?tab=2"));
    assert_ne!(a.entry_key(), b.entry_key());
  }

  #[test]
  fn test_cacheable_requires_plain_200_basic() {
    let mut snapshot = ResponseSnapshot {
      status: 200,
      kind: ResponseKind::Basic,
      redirected: false,
      headers: Vec::new(),
      body: b"ok".to_vec(),
    };
    assert!(snapshot.is_cacheable());

    snapshot.status = 404;
    assert!(!snapshot.is_cacheable());

    snapshot.status = 200;
    snapshot.kind = ResponseKind::Cors;
    assert!(!snapshot.is_cacheable());

    snapshot.kind = ResponseKind::Opaque;
    assert!(!snapshot.is_cacheable());

    snapshot.kind = ResponseKind::Basic;
    snapshot.redirected = true;
    assert!(!snapshot.is_cacheable());
  }

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let snapshot = ResponseSnapshot {
      status: 200,
      kind: ResponseKind::Basic,
      redirected: false,
      headers: vec![("Content-Type".to_string(), "text/html".to_string())],
      body: Vec::new(),
    };
    assert_eq!(snapshot.header("content-type"), Some("text/html"));
    assert_eq!(snapshot.header("x-missing"), None);
  }
}
