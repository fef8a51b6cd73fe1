use crate::cache::{FetchRequest, ResponseSnapshot};
use crate::notify::NotificationPayload;

/// Host-delivered worker events.
#[derive(Debug)]
pub enum WorkerEvent {
  /// Precache the app shell for the current version
  Install,
  /// Promote the current version, purging every other store
  Activate,
  /// An intercepted navigation or resource request
  Fetch(FetchRequest),
  /// Connectivity-restored signal
  Sync { tag: String },
  /// Incoming push message
  Push { text: Option<String> },
  /// User interaction with a displayed notification
  NotificationClick { action: Option<String> },
}

/// What handling one event produced.
#[derive(Debug)]
pub enum EventOutcome {
  Installed { precached: usize },
  Activated { purged: Vec<String> },
  Response(ResponseSnapshot),
  SyncIgnored { tag: String },
  SyncCleared { delivered: usize },
  NotificationShown(NotificationPayload),
  Navigation { url: Option<String> },
}

impl std::fmt::Display for EventOutcome {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      EventOutcome::Installed { precached } => {
        write!(f, "installed: {} entries precached", precached)
      }
      EventOutcome::Activated { purged } => {
        if purged.is_empty() {
          write!(f, "activated: no stale stores")
        } else {
          write!(f, "activated: purged {}", purged.join(", "))
        }
      }
      EventOutcome::Response(snapshot) => {
        write!(
          f,
          "{} {} {} ({} bytes)",
          snapshot.status,
          snapshot.kind,
          snapshot.header("content-type").unwrap_or("unknown"),
          snapshot.body.len()
        )
      }
      EventOutcome::SyncIgnored { tag } => write!(f, "sync: ignored signal tagged {}", tag),
      EventOutcome::SyncCleared { delivered } => {
        write!(f, "sync: delivered {} records", delivered)
      }
      EventOutcome::NotificationShown(payload) => {
        write!(f, "notification: {}: {}", payload.title, payload.body)
      }
      EventOutcome::Navigation { url: Some(url) } => write!(f, "navigate: {}", url),
      EventOutcome::Navigation { url: None } => write!(f, "notification dismissed"),
    }
  }
}
