//! Event dispatch: wires storage, the origin client and the handlers.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use url::Url;

use crate::cache::{CacheStorage, RequestIdentity, SyncQueueStorage};
use crate::config::Config;
use crate::event::{EventOutcome, WorkerEvent};
use crate::fetch::FetchInterceptor;
use crate::lifecycle::LifecycleManager;
use crate::net::OriginClient;
use crate::notify::NotificationHandler;
use crate::sync::{SyncAgent, SyncOutcome};

/// One worker process: the four handlers bound to shared storage and the
/// origin client.
///
/// The host may terminate the process between events and respawn it with
/// no retained memory, so everything durable lives in storage. The CLI
/// builds a fresh worker per event; an embedding host can instead feed
/// [`Worker::run`] through a channel.
pub struct Worker<S: CacheStorage + SyncQueueStorage> {
  config: Config,
  origin: OriginClient,
  lifecycle: LifecycleManager<S>,
  fetch: FetchInterceptor<S>,
  sync: SyncAgent<S>,
  notify: NotificationHandler,
}

impl<S: CacheStorage + SyncQueueStorage> Worker<S> {
  pub fn new(config: Config, storage: Arc<S>) -> Result<Self> {
    let origin = OriginClient::new(&config)?;
    let store_name = config.cache.store_name();
    let fallback = RequestIdentity::get(&origin.resolve(&config.cache.offline_fallback)?);

    Ok(Self {
      lifecycle: LifecycleManager::new(Arc::clone(&storage), store_name.clone()),
      fetch: FetchInterceptor::new(Arc::clone(&storage), store_name, fallback),
      sync: SyncAgent::new(storage, config.sync.tag.clone()),
      notify: NotificationHandler::new(config.notifications.clone()),
      origin,
      config,
    })
  }

  /// Resolve a fetch target against the configured origin.
  pub fn resolve(&self, target: &str) -> Result<Url> {
    self.origin.resolve(target)
  }

  /// Dispatch one event to its handler.
  pub async fn handle_event(&mut self, event: WorkerEvent) -> Result<EventOutcome> {
    match event {
      WorkerEvent::Install => {
        let manifest: Vec<Url> = self
          .config
          .cache
          .precache
          .iter()
          .map(|path| self.origin.resolve(path))
          .collect::<Result<_>>()?;

        let origin = self.origin.clone();
        let precached = self
          .lifecycle
          .install(&manifest, move |url| {
            let origin = origin.clone();
            async move { origin.get(&url).await }
          })
          .await?;

        Ok(EventOutcome::Installed { precached })
      }

      WorkerEvent::Activate => Ok(EventOutcome::Activated {
        purged: self.lifecycle.activate()?,
      }),

      WorkerEvent::Fetch(request) => {
        let origin = self.origin.clone();
        let url = request.url.clone();
        let response = self
          .fetch
          .handle(&request, move || async move { origin.get(&url).await })
          .await?;

        Ok(EventOutcome::Response(response))
      }

      WorkerEvent::Sync { tag } => {
        let origin = self.origin.clone();
        let outcome = self
          .sync
          .handle_signal(&tag, move |record| {
            let origin = origin.clone();
            async move { origin.deliver(&record).await }
          })
          .await?;
        debug!("sync agent finished in state {:?}", self.sync.state());

        Ok(match outcome {
          SyncOutcome::Ignored { tag } => EventOutcome::SyncIgnored { tag },
          SyncOutcome::Cleared { delivered } => EventOutcome::SyncCleared { delivered },
        })
      }

      WorkerEvent::Push { text } => {
        let payload = self.notify.build_payload(text.as_deref());
        info!("displaying notification: {}", payload.body);
        Ok(EventOutcome::NotificationShown(payload))
      }

      WorkerEvent::NotificationClick { action } => Ok(EventOutcome::Navigation {
        url: self.notify.handle_click(action.as_deref()),
      }),
    }
  }

  /// Drive the worker from an in-process event channel.
  ///
  /// Handler failures are logged and the loop keeps serving; the host
  /// re-delivers failed work through its own retry policy.
  pub async fn run(&mut self, mut events: mpsc::UnboundedReceiver<WorkerEvent>) -> Result<()> {
    while let Some(event) = events.recv().await {
      match self.handle_event(event).await {
        Ok(outcome) => info!("{}", outcome),
        Err(e) => error!("event failed: {}", e),
      }
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;

  fn worker() -> Worker<MemoryStorage> {
    let config: Config =
      serde_yaml::from_str("origin:\n  url: http://origin.test\n").unwrap();
    Worker::new(config, Arc::new(MemoryStorage::new())).unwrap()
  }

  #[tokio::test]
  async fn test_push_event_builds_notification() {
    let mut worker = worker();
    let outcome = worker
      .handle_event(WorkerEvent::Push {
        text: Some("hello".to_string()),
      })
      .await
      .unwrap();

    match outcome {
      EventOutcome::NotificationShown(payload) => assert_eq!(payload.body, "hello"),
      other => panic!("unexpected outcome: {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_click_event_routes_navigation() {
    let mut worker = worker();
    let outcome = worker
      .handle_event(WorkerEvent::NotificationClick {
        action: Some("explore".to_string()),
      })
      .await
      .unwrap();

    match outcome {
      EventOutcome::Navigation { url } => assert_eq!(url.as_deref(), Some("/dashboard")),
      other => panic!("unexpected outcome: {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_activate_without_install_fails() {
    let mut worker = worker();
    assert!(worker.handle_event(WorkerEvent::Activate).await.is_err());
  }

  #[tokio::test]
  async fn test_sync_with_foreign_tag_is_ignored() {
    let mut worker = worker();
    let outcome = worker
      .handle_event(WorkerEvent::Sync {
        tag: "unrelated".to_string(),
      })
      .await
      .unwrap();

    match outcome {
      EventOutcome::SyncIgnored { tag } => assert_eq!(tag, "unrelated"),
      other => panic!("unexpected outcome: {:?}", other),
    }
  }
}
