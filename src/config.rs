use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub origin: OriginConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub notifications: NotificationsConfig,
  /// Override for the database and log location (defaults to the platform
  /// data directory)
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OriginConfig {
  /// Base URL of the origin server the worker fronts
  pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Cache store name prefix; combined with `version` into the store name
  #[serde(default = "default_name_prefix")]
  pub name_prefix: String,
  /// Version tag. Bumping it is the only cache invalidation mechanism:
  /// activate purges every store not named `{name_prefix}-{version}`.
  #[serde(default = "default_version")]
  pub version: String,
  /// Paths fetched and stored as one batch at install time
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  /// Document served for failed navigations
  #[serde(default = "default_offline_fallback")]
  pub offline_fallback: String,
}

impl CacheConfig {
  /// Name of the current-version cache store.
  pub fn store_name(&self) -> String {
    format!("{}-{}", self.name_prefix, self.version)
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name_prefix: default_name_prefix(),
      version: default_version(),
      precache: default_precache(),
      offline_fallback: default_offline_fallback(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Only sync signals carrying this tag trigger a drain
  #[serde(default = "default_sync_tag")]
  pub tag: String,
  /// Path on the origin server that accepts pending records
  #[serde(default = "default_sync_endpoint")]
  pub endpoint: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: default_sync_tag(),
      endpoint: default_sync_endpoint(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
  #[serde(default = "default_notification_title")]
  pub title: String,
  /// Shown when a push message carries no text
  #[serde(default = "default_notification_body")]
  pub default_body: String,
  #[serde(default = "default_icon")]
  pub icon: String,
  #[serde(default = "default_badge")]
  pub badge: String,
  #[serde(default = "default_vibration")]
  pub vibration: Vec<u32>,
  /// Opened by the "explore" notification action
  #[serde(default = "default_dashboard_url")]
  pub dashboard_url: String,
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    Self {
      title: default_notification_title(),
      default_body: default_notification_body(),
      icon: default_icon(),
      badge: default_badge(),
      vibration: default_vibration(),
      dashboard_url: default_dashboard_url(),
    }
  }
}

fn default_name_prefix() -> String {
  "app-shell".to_string()
}

fn default_version() -> String {
  "v1".to_string()
}

fn default_precache() -> Vec<String> {
  vec![
    "/".to_string(),
    "/static/js/bundle.js".to_string(),
    "/static/css/main.css".to_string(),
    "/manifest.json".to_string(),
    "/favicon.ico".to_string(),
    "/logo192.png".to_string(),
    "/offline.html".to_string(),
  ]
}

fn default_offline_fallback() -> String {
  "/offline.html".to_string()
}

fn default_sync_tag() -> String {
  "sync-pending-data".to_string()
}

fn default_sync_endpoint() -> String {
  "/api/sync".to_string()
}

fn default_notification_title() -> String {
  "Offcache".to_string()
}

fn default_notification_body() -> String {
  "New activity is waiting for you".to_string()
}

fn default_icon() -> String {
  "/logo192.png".to_string()
}

fn default_badge() -> String {
  "/favicon.ico".to_string()
}

fn default_vibration() -> Vec<u32> {
  vec![200, 100, 200]
}

fn default_dashboard_url() -> String {
  "/dashboard".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offcache/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Directory holding the database and log files.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offcache"))
  }
}
