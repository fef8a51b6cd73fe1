//! Push message display and notification interaction routing.

use serde::Serialize;

use crate::config::NotificationsConfig;

/// Action id for opening the dashboard.
pub const ACTION_EXPLORE: &str = "explore";
/// Action id for dismissing the notification.
pub const ACTION_CLOSE: &str = "close";

/// A button rendered on the notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

/// Everything the host needs to display one notification. Built from a
/// push message, never persisted; it lives for a single display cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibration: Vec<u32>,
  pub actions: Vec<NotificationAction>,
}

/// Builds notification payloads from push messages and routes user
/// interactions to at most one navigation.
pub struct NotificationHandler {
  config: NotificationsConfig,
}

impl NotificationHandler {
  pub fn new(config: NotificationsConfig) -> Self {
    Self { config }
  }

  /// Construct the payload for a push message, falling back to the
  /// configured default body when the message carries no text.
  pub fn build_payload(&self, text: Option<&str>) -> NotificationPayload {
    NotificationPayload {
      title: self.config.title.clone(),
      body: text
        .map(str::to_string)
        .unwrap_or_else(|| self.config.default_body.clone()),
      icon: self.config.icon.clone(),
      badge: self.config.badge.clone(),
      vibration: self.config.vibration.clone(),
      actions: vec![
        NotificationAction {
          action: ACTION_EXPLORE.to_string(),
          title: "Explore".to_string(),
        },
        NotificationAction {
          action: ACTION_CLOSE.to_string(),
          title: "Close".to_string(),
        },
      ],
    }
  }

  /// Route a notification interaction to its navigation target.
  ///
  /// "explore" opens the dashboard, "close" only dismisses, and a click
  /// on the notification body (no action id, or one we never registered)
  /// opens the root. Never more than one navigation per interaction.
  pub fn handle_click(&self, action: Option<&str>) -> Option<String> {
    match action {
      Some(ACTION_CLOSE) => None,
      Some(ACTION_EXPLORE) => Some(self.config.dashboard_url.clone()),
      _ => Some("/".to_string()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn handler() -> NotificationHandler {
    NotificationHandler::new(NotificationsConfig::default())
  }

  #[test]
  fn test_push_text_becomes_body() {
    let payload = handler().build_payload(Some("You earned 50 points!"));
    assert_eq!(payload.body, "You earned 50 points!");
  }

  #[test]
  fn test_missing_text_uses_default_body() {
    let handler = handler();
    let payload = handler.build_payload(None);
    assert_eq!(payload.body, "New activity is waiting for you");
  }

  #[test]
  fn test_payload_always_offers_both_actions() {
    let payload = handler().build_payload(None);
    let ids: Vec<&str> = payload.actions.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(ids, vec![ACTION_EXPLORE, ACTION_CLOSE]);
  }

  #[test]
  fn test_explore_opens_dashboard() {
    assert_eq!(
      handler().handle_click(Some(ACTION_EXPLORE)),
      Some("/dashboard".to_string())
    );
  }

  #[test]
  fn test_close_dismisses_without_navigation() {
    assert_eq!(handler().handle_click(Some(ACTION_CLOSE)), None);
  }

  #[test]
  fn test_body_click_and_unknown_action_open_root() {
    let handler = handler();
    assert_eq!(handler.handle_click(None), Some("/".to_string()));
    assert_eq!(handler.handle_click(Some("archive")), Some("/".to_string()));
  }
}
