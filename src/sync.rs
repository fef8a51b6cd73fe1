//! Background sync: draining the pending offline-data queue.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::cache::{PendingSyncRecord, SyncQueueStorage};

/// Drain progress for one sync signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
  /// No signal handled yet
  Idle,
  /// A matching signal arrived
  Triggered,
  /// Records are being transmitted
  Draining,
  /// Every record was delivered and the queue purged
  Cleared,
  /// A transmission failed; the queue is untouched
  Failed,
}

/// Result of handling a sync signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
  /// The signal carried a tag this agent does not own
  Ignored { tag: String },
  /// The whole queue was delivered and cleared
  Cleared { delivered: usize },
}

/// Delivers offline-captured records to the origin server when the host
/// signals that connectivity is back.
///
/// Records are sent strictly one at a time in queue order, so the server
/// receives offline actions in the order the user performed them. The
/// queue is purged only after every record has been accepted; any failure
/// aborts the drain with zero deletions, and the host's own retry policy
/// for the sync signal re-runs the whole drain later.
pub struct SyncAgent<S: SyncQueueStorage> {
  queue: Arc<S>,
  tag: String,
  state: SyncState,
}

impl<S: SyncQueueStorage> SyncAgent<S> {
  pub fn new(queue: Arc<S>, tag: String) -> Self {
    Self {
      queue,
      tag,
      state: SyncState::Idle,
    }
  }

  pub fn state(&self) -> SyncState {
    self.state
  }

  /// Handle one host-delivered sync signal.
  ///
  /// Signals tagged for other work are ignored without touching the
  /// queue. The sender closure transmits a single record and resolves
  /// once the server has accepted it.
  pub async fn handle_signal<F, Fut>(&mut self, tag: &str, sender: F) -> Result<SyncOutcome>
  where
    F: Fn(PendingSyncRecord) -> Fut,
    Fut: Future<Output = Result<()>>,
  {
    if tag != self.tag {
      debug!("ignoring sync signal tagged {}", tag);
      return Ok(SyncOutcome::Ignored {
        tag: tag.to_string(),
      });
    }

    self.state = SyncState::Triggered;
    let records = self.queue.pending()?;
    let total = records.len();

    self.state = SyncState::Draining;
    for (sent, record) in records.into_iter().enumerate() {
      let id = record.id;
      if let Err(e) = sender(record).await {
        self.state = SyncState::Failed;
        error!(
          "sync drain aborted at record {} ({}/{} delivered), queue kept: {}",
          id, sent, total, e
        );
        return Err(eyre!("Sync delivery failed for record {}: {}", id, e));
      }
    }

    self.queue.clear()?;
    self.state = SyncState::Cleared;
    info!("sync queue drained, {} records delivered", total);

    Ok(SyncOutcome::Cleared { delivered: total })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Mutex;

  fn queue_with(n: i64) -> Arc<MemoryStorage> {
    let storage = Arc::new(MemoryStorage::new());
    for seq in 1..=n {
      storage.enqueue(&serde_json::json!({ "seq": seq })).unwrap();
    }
    storage
  }

  fn agent(queue: &Arc<MemoryStorage>) -> SyncAgent<MemoryStorage> {
    SyncAgent::new(Arc::clone(queue), "sync-pending-data".to_string())
  }

  #[tokio::test]
  async fn test_foreign_tag_is_ignored() {
    let queue = queue_with(2);
    let mut agent = agent(&queue);

    let sends = AtomicU32::new(0);
    let outcome = agent
      .handle_signal("some-other-work", |_record| {
        sends.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
      })
      .await
      .unwrap();

    assert_eq!(
      outcome,
      SyncOutcome::Ignored {
        tag: "some-other-work".to_string()
      }
    );
    assert_eq!(agent.state(), SyncState::Idle);
    assert_eq!(sends.load(Ordering::SeqCst), 0);
    assert_eq!(queue.pending().unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_drain_delivers_in_order_and_clears() {
    let queue = queue_with(3);
    let mut agent = agent(&queue);

    let delivered = Mutex::new(Vec::new());
    let outcome = agent
      .handle_signal("sync-pending-data", |record| {
        delivered
          .lock()
          .unwrap()
          .push(record.payload["seq"].as_i64().unwrap());
        async { Ok(()) }
      })
      .await
      .unwrap();

    assert_eq!(outcome, SyncOutcome::Cleared { delivered: 3 });
    assert_eq!(agent.state(), SyncState::Cleared);
    assert_eq!(*delivered.lock().unwrap(), vec![1, 2, 3]);
    assert!(queue.pending().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_failure_aborts_without_deleting() {
    let queue = queue_with(4);
    let mut agent = agent(&queue);

    let sends = AtomicU32::new(0);
    let result = agent
      .handle_signal("sync-pending-data", |record| {
        sends.fetch_add(1, Ordering::SeqCst);
        let out = if record.payload["seq"] == 3 {
          Err(eyre!("server unreachable"))
        } else {
          Ok(())
        };
        async move { out }
      })
      .await;

    assert!(result.is_err());
    assert_eq!(agent.state(), SyncState::Failed);
    // Records 1 and 2 were sent, 3 failed, 4 was never attempted
    assert_eq!(sends.load(Ordering::SeqCst), 3);
    // Nothing was purged, so a retry resends the whole queue
    assert_eq!(queue.pending().unwrap().len(), 4);
  }

  #[tokio::test]
  async fn test_retry_after_failure_resends_everything() {
    let queue = queue_with(2);
    let mut agent = agent(&queue);

    let attempt = AtomicU32::new(0);
    let result = agent
      .handle_signal("sync-pending-data", |_record| {
        attempt.fetch_add(1, Ordering::SeqCst);
        async { Err(eyre!("still offline")) }
      })
      .await;
    assert!(result.is_err());
    assert_eq!(attempt.load(Ordering::SeqCst), 1);

    let sends = Mutex::new(Vec::new());
    let outcome = agent
      .handle_signal("sync-pending-data", |record| {
        sends
          .lock()
          .unwrap()
          .push(record.payload["seq"].as_i64().unwrap());
        async { Ok(()) }
      })
      .await
      .unwrap();

    assert_eq!(outcome, SyncOutcome::Cleared { delivered: 2 });
    assert_eq!(*sends.lock().unwrap(), vec![1, 2]);
    assert!(queue.pending().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_empty_queue_clears_trivially() {
    let queue = Arc::new(MemoryStorage::new());
    let mut agent = agent(&queue);

    let outcome = agent
      .handle_signal("sync-pending-data", |_record| async { Ok(()) })
      .await
      .unwrap();

    assert_eq!(outcome, SyncOutcome::Cleared { delivered: 0 });
    assert_eq!(agent.state(), SyncState::Cleared);
  }
}
