//! HTTP client for the origin server.

use color_eyre::{eyre::eyre, Result};
use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::cache::{PendingSyncRecord, ResponseKind, ResponseSnapshot};
use crate::config::Config;

/// Client for the origin server the worker fronts.
///
/// Responses come back as [`ResponseSnapshot`] values: status, headers and
/// the whole body captured once, classified relative to the configured
/// origin so the fetch path can tell basic responses from cross-origin
/// ones.
#[derive(Clone)]
pub struct OriginClient {
  client: reqwest::Client,
  origin: Url,
  sync_url: Url,
}

impl OriginClient {
  pub fn new(config: &Config) -> Result<Self> {
    let origin = Url::parse(&config.origin.url)
      .map_err(|e| eyre!("Invalid origin URL {}: {}", config.origin.url, e))?;
    let sync_url = origin
      .join(&config.sync.endpoint)
      .map_err(|e| eyre!("Invalid sync endpoint {}: {}", config.sync.endpoint, e))?;

    Ok(Self {
      client: reqwest::Client::new(),
      origin,
      sync_url,
    })
  }

  /// Resolve a path or absolute URL against the origin.
  pub fn resolve(&self, target: &str) -> Result<Url> {
    self
      .origin
      .join(target)
      .map_err(|e| eyre!("Invalid request target {}: {}", target, e))
  }

  /// GET a URL and capture the full response as an immutable snapshot.
  pub async fn get(&self, url: &Url) -> Result<ResponseSnapshot> {
    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;

    let mut requested = url.clone();
    requested.set_fragment(None);
    let redirected = *response.url() != requested;
    let kind = if response.url().origin() == self.origin.origin() {
      ResponseKind::Basic
    } else {
      ResponseKind::Cors
    };

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body from {}: {}", url, e))?
      .to_vec();

    Ok(ResponseSnapshot {
      status,
      kind,
      redirected,
      headers,
      body,
    })
  }

  /// POST one pending record to the sync endpoint. Any non-success status
  /// counts as a failed delivery.
  pub async fn deliver(&self, record: &PendingSyncRecord) -> Result<()> {
    let body =
      serde_json::to_vec(record).map_err(|e| eyre!("Failed to serialize record: {}", e))?;

    let response = self
      .client
      .post(self.sync_url.clone())
      .header(CONTENT_TYPE, "application/json")
      .body(body)
      .send()
      .await
      .map_err(|e| eyre!("Sync request for record {} failed: {}", record.id, e))?;

    if !response.status().is_success() {
      return Err(eyre!(
        "Sync endpoint returned status {} for record {}",
        response.status(),
        record.id
      ));
    }

    Ok(())
  }
}
