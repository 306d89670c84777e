//! Change-notification broadcast.
//!
//! Tool handlers that mutate backend state publish a notification here so
//! that independent views (the calendar grid, the task list) can refresh
//! themselves. The broadcast is fire-and-forget: at most one notification
//! per mutation, no acknowledgment, and publishing with zero subscribers
//! is not an error.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Which kind of backend data changed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Calendar,
    Task,
}

/// A single fire-and-forget change event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChangeNotification {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Process-wide publish point for [`ChangeNotification`]s.
#[derive(Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<ChangeNotification>,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Best-effort broadcast. A send error only means nobody is listening.
    pub fn publish(&self, notification: ChangeNotification) {
        let _ = self.tx.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.tx.subscribe()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let notifier = ChangeNotifier::default();
        let mut rx = notifier.subscribe();

        notifier.publish(ChangeNotification {
            kind: ChangeKind::Calendar,
            id: Some("ev1".to_string()),
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, ChangeKind::Calendar);
        assert_eq!(received.id.as_deref(), Some("ev1"));
    }

    #[test]
    fn test_publish_without_subscribers_is_a_no_op() {
        let notifier = ChangeNotifier::default();
        notifier.publish(ChangeNotification {
            kind: ChangeKind::Task,
            id: None,
        });
    }

    #[test]
    fn test_notification_wire_shape() {
        let with_id = ChangeNotification {
            kind: ChangeKind::Calendar,
            id: Some("ev1".to_string()),
        };
        assert_eq!(
            serde_json::to_string(&with_id).unwrap(),
            r#"{"type":"calendar","id":"ev1"}"#
        );

        let without_id = ChangeNotification {
            kind: ChangeKind::Task,
            id: None,
        };
        assert_eq!(
            serde_json::to_string(&without_id).unwrap(),
            r#"{"type":"task"}"#
        );
    }
}
