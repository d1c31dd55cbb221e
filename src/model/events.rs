use crate::model::{generate_id, Id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "New version")]
    NewVersion,
    #[serde(rename = "First notification")]
    FirstNotification,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            EventKind::NewVersion => write!(f, "New version"),
            EventKind::FirstNotification => write!(f, "First notification"),
        }
    }
}

/// Fired when a dataset (or a view affected by a release) changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Id,
    pub dataset_uri: String,
    /// Version chain subscribers register against
    pub first_version_uri: String,
    pub kind: EventKind,
    #[serde(default)]
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(dataset_uri: &str, first_version_uri: &str, kind: EventKind) -> Self {
        Self {
            id: generate_id(),
            dataset_uri: dataset_uri.to_string(),
            first_version_uri: first_version_uri.to_string(),
            kind,
            processed: false,
            created_at: Utc::now(),
        }
    }
}

/// A remote party interested in one of our version chains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionToThis {
    pub id: Id,
    pub first_version_uri: String,
    pub callback_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_server_uri: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionToThis {
    pub fn new(first_version_uri: &str, callback_url: &str, remote_server_uri: Option<&str>) -> Self {
        Self {
            id: generate_id(),
            first_version_uri: first_version_uri.to_string(),
            callback_url: callback_url.to_string(),
            remote_server_uri: remote_server_uri.map(str::to_string),
            created_at: Utc::now(),
        }
    }
}

/// Our own subscription to a chain owned elsewhere
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionToOther {
    pub id: Id,
    pub first_version_uri: String,
    pub remote_server_uri: String,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionToOther {
    pub fn new(first_version_uri: &str, remote_server_uri: &str) -> Self {
        Self {
            id: generate_id(),
            first_version_uri: first_version_uri.to_string(),
            remote_server_uri: remote_server_uri.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// One outbound message per (event, subscription)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Id,
    pub event_id: Id,
    pub subscription_id: Id,
    pub callback_url: String,
    pub dataset_uri: String,
    pub first_version_uri: String,
    pub kind: EventKind,
    #[serde(default)]
    pub sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(event: &Event, subscription: &SubscriptionToThis) -> Self {
        Self {
            id: generate_id(),
            event_id: event.id.clone(),
            subscription_id: subscription.id.clone(),
            callback_url: subscription.callback_url.clone(),
            dataset_uri: event.dataset_uri.clone(),
            first_version_uri: event.first_version_uri.clone(),
            kind: event.kind,
            sent: false,
            sent_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn mark_sent(&mut self) {
        self.sent = true;
        self.sent_at = Some(Utc::now());
    }
}

/// Body POSTed to a subscriber's callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub first_version_uri: String,
    pub dataset_uri: String,
    /// Where the subscriber downloads the released dataset
    pub fetch_url: String,
    pub event: EventKind,
    pub timestamp: DateTime<Utc>,
    pub notifier_uri: String,
}

/// An inbound notification waiting to be imported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationReceived {
    pub id: Id,
    pub payload: NotificationPayload,
    #[serde(default)]
    pub processed: bool,
    pub received_at: DateTime<Utc>,
}

impl NotificationReceived {
    pub fn new(payload: NotificationPayload) -> Self {
        Self {
            id: generate_id(),
            payload,
            processed: false,
            received_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(EventKind::NewVersion).unwrap(),
            json!("New version")
        );
        let kind: EventKind = serde_json::from_value(json!("First notification")).unwrap();
        assert_eq!(kind, EventKind::FirstNotification);
        assert_eq!(kind.to_string(), "First notification");
    }

    #[test]
    fn test_notification_copies_event_and_subscription() {
        let event = Event::new("http://a/ks/DataSet/2", "http://a/ks/DataSet/1", EventKind::NewVersion);
        let subscription = SubscriptionToThis::new("http://a/ks/DataSet/1", "http://b/notifications", None);
        let mut notification = Notification::new(&event, &subscription);
        assert_eq!(notification.callback_url, "http://b/notifications");
        assert_eq!(notification.dataset_uri, event.dataset_uri);
        assert!(!notification.sent);
        notification.mark_sent();
        assert!(notification.sent && notification.sent_at.is_some());
    }
}
