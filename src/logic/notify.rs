use chrono::Utc;
use reqwest::Url;

use crate::error::{EngineError, EngineResult};
use crate::logic::dataset_io::{apply_view, find_imported, import_serial, ImportOutcome};
use crate::logic::identity::{resolve, Resolution};
use crate::logic::release::release;
use crate::logic::EngineContext;
use crate::model::{
    DataSet, Event, EventKind, Id, Link, Notification, NotificationPayload, NotificationReceived, SerialFormat,
    SerialNode, SubscriptionToOther, SubscriptionToThis,
};

/// Newest released dataset of a chain
fn latest_release(ctx: &EngineContext, first_version_uri: &str) -> EngineResult<Option<DataSet>> {
    Ok(ctx
        .draft
        .list_version_chain(first_version_uri)?
        .into_iter()
        .filter(|d| d.released)
        .max_by(|a, b| a.version.cmp(&b.version)))
}

/// Register a remote server's interest in a version chain owned here.
///
/// When the chain already has a release the subscriber is told about it
/// right away through a "First notification".
pub fn accept_subscription(
    ctx: &EngineContext,
    first_version_uri: &str,
    callback_url: &str,
    remote_server_uri: Option<&str>,
) -> EngineResult<SubscriptionToThis> {
    let first = ctx
        .draft
        .get_dataset_by_uri(first_version_uri)?
        .ok_or_else(|| EngineError::NotFound(format!("DataSet {}", first_version_uri)))?;
    if !ctx.server.owns(&first.owner_uri) {
        return Err(EngineError::Structure(format!(
            "{} is owned by {}; subscribe there",
            first_version_uri, first.owner_uri
        )));
    }
    Url::parse(callback_url)
        .map_err(|e| EngineError::Format(format!("Invalid callback URL {}: {}", callback_url, e)))?;
    if ctx
        .draft
        .list_subscriptions_to_this(&first.first_version_uri)?
        .iter()
        .any(|s| s.callback_url == callback_url)
    {
        return Err(EngineError::AlreadyExists(format!(
            "Subscription of {} to {}",
            callback_url, first.first_version_uri
        )));
    }

    let subscription = SubscriptionToThis::new(&first.first_version_uri, callback_url, remote_server_uri);
    ctx.draft.save_subscription_to_this(subscription.clone())?;
    log::info!("{} subscribed to {}", callback_url, first.first_version_uri);

    if let Some(released) = latest_release(ctx, &first.first_version_uri)? {
        let mut event = Event::new(&released.uri, &released.first_version_uri, EventKind::FirstNotification);
        event.processed = true;
        ctx.draft.save_event(event.clone())?;
        ctx.draft
            .save_notification(Notification::new(&event, &subscription))?;
    }
    Ok(subscription)
}

pub fn cancel_subscription(ctx: &EngineContext, first_version_uri: &str, callback_url: &str) -> EngineResult<bool> {
    let mut removed = false;
    for subscription in ctx.draft.list_subscriptions_to_this(first_version_uri)? {
        if subscription.callback_url == callback_url {
            removed |= ctx.draft.delete_subscription_to_this(&subscription.id)?;
        }
    }
    if removed {
        log::info!("{} unsubscribed from {}", callback_url, first_version_uri);
    }
    Ok(removed)
}

/// Turn unprocessed events into one notification per subscriber.
/// Returns the number of notifications created.
pub fn process_events(ctx: &EngineContext) -> EngineResult<usize> {
    let mut created = 0;
    for mut event in ctx.draft.list_unprocessed_events()? {
        // a view keeps its URI across changes, so each change is announced
        let repeatable = ctx
            .draft
            .get_dataset_by_uri(&event.dataset_uri)?
            .is_some_and(|d| d.is_view());
        for subscription in ctx.draft.list_subscriptions_to_this(&event.first_version_uri)? {
            if !repeatable && ctx.draft.has_notification(&subscription.id, &event.dataset_uri)? {
                log::debug!("{} already notified about {}", subscription.callback_url, event.dataset_uri);
                continue;
            }
            ctx.draft
                .save_notification(Notification::new(&event, &subscription))?;
            created += 1;
        }
        event.processed = true;
        ctx.draft.save_event(event)?;
    }
    Ok(created)
}

/// Where subscribers fetch a dataset from this server
pub fn fetch_url(ctx: &EngineContext, dataset_uri: &str) -> String {
    let endpoint = ctx.server.server.endpoint("datasets/by-uri");
    match Url::parse_with_params(&endpoint, &[("uri", dataset_uri), ("format", "json")]) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{}?uri={}&format=json", endpoint, dataset_uri),
    }
}

pub fn payload_for(ctx: &EngineContext, notification: &Notification) -> NotificationPayload {
    NotificationPayload {
        first_version_uri: notification.first_version_uri.clone(),
        dataset_uri: notification.dataset_uri.clone(),
        fetch_url: fetch_url(ctx, &notification.dataset_uri),
        event: notification.kind,
        timestamp: Utc::now(),
        notifier_uri: ctx.server.uri().to_string(),
    }
}

/// Notifications still to deliver, with what to POST for each
pub fn pending_deliveries(ctx: &EngineContext) -> EngineResult<Vec<(Notification, NotificationPayload)>> {
    Ok(ctx
        .draft
        .list_unsent_notifications()?
        .into_iter()
        .map(|n| {
            let payload = payload_for(ctx, &n);
            (n, payload)
        })
        .collect())
}

pub fn mark_sent(ctx: &EngineContext, notification_id: &Id) -> EngineResult<()> {
    let notification = ctx
        .draft
        .list_notifications()?
        .into_iter()
        .find(|n| &n.id == notification_id);
    match notification {
        Some(mut notification) => {
            notification.mark_sent();
            ctx.draft.save_notification(notification)
        }
        None => Err(EngineError::NotFound(format!("Notification {}", notification_id))),
    }
}

/// Store a notification from a server we subscribed to
pub fn receive_notification(ctx: &EngineContext, payload: NotificationPayload) -> EngineResult<NotificationReceived> {
    Url::parse(&payload.fetch_url)
        .map_err(|e| EngineError::Format(format!("Invalid fetch URL {}: {}", payload.fetch_url, e)))?;
    let received = NotificationReceived::new(payload);
    ctx.draft.save_received(received.clone())?;
    log::info!(
        "Notification from {} about {}",
        received.payload.notifier_uri,
        received.payload.dataset_uri
    );
    Ok(received)
}

/// Import the dataset a received notification announces and release it
/// here. A dataset imported earlier is released without re-importing;
/// views are refreshed and published instead, since they have no release.
pub fn apply_received(ctx: &EngineContext, received: &NotificationReceived, dataset_text: &str) -> EngineResult<DataSet> {
    let serial = SerialNode::parse(dataset_text, SerialFormat::Json)?;
    let dataset = if serial.attr_text("filter").is_some() {
        apply_view(ctx, &serial)?
    } else {
        let dataset = match import_serial(ctx, &serial) {
            Ok(ImportOutcome { dataset, .. }) => dataset,
            Err(EngineError::AlreadyExists(_)) => find_imported(ctx, &received.payload.dataset_uri)?
                .ok_or_else(|| EngineError::NotFound(format!("DataSet {}", received.payload.dataset_uri)))?,
            Err(e) => return Err(e),
        };
        release(ctx, &dataset.id)?.dataset
    };
    mark_received_processed(ctx, received)?;
    Ok(dataset)
}

pub fn mark_received_processed(ctx: &EngineContext, received: &NotificationReceived) -> EngineResult<()> {
    let mut processed = received.clone();
    processed.processed = true;
    ctx.draft.save_received(processed)
}

/// URL and body of a subscription request to a remote server
pub fn subscription_request(
    ctx: &EngineContext,
    first_version_uri: &str,
    remote_server_uri: &str,
) -> (String, serde_json::Value) {
    let url = format!("{}/subscriptions", remote_server_uri.trim_end_matches('/'));
    let body = serde_json::json!({
        "first_version_uri": first_version_uri,
        "callback_url": ctx.server.server.endpoint("notifications"),
        "remote_server_uri": ctx.server.uri(),
    });
    (url, body)
}

pub fn record_subscription_to_other(
    ctx: &EngineContext,
    first_version_uri: &str,
    remote_server_uri: &str,
) -> EngineResult<SubscriptionToOther> {
    let existing = ctx
        .draft
        .list_subscriptions_to_other()?
        .into_iter()
        .find(|s| s.first_version_uri == first_version_uri && s.remote_server_uri == remote_server_uri);
    if let Some(existing) = existing {
        return Ok(existing);
    }
    let subscription = SubscriptionToOther::new(first_version_uri, remote_server_uri);
    ctx.draft.save_subscription_to_other(subscription.clone())?;
    Ok(subscription)
}

/// Link holders of dangling references whose targets have since arrived
/// in the draft store. Returns the number repaired.
pub fn repair_dangling_references(ctx: &EngineContext) -> EngineResult<usize> {
    let mut repaired = 0;
    for mut dangling in ctx.draft.list_unresolved_dangling()? {
        let Resolution::Local(target) = resolve(ctx, ctx.draft, &dangling.target_uri)? else {
            continue;
        };
        let Some(mut holder) = ctx.draft.get_record(&dangling.holder_id)? else {
            log::warn!("Holder {} of dangling reference {} is gone", dangling.holder_id, dangling.target_uri);
            dangling.resolved = true;
            ctx.draft.save_dangling(dangling)?;
            continue;
        };
        if dangling.is_many {
            holder.push_link(&dangling.attribute, &target.id);
        } else {
            holder
                .links
                .insert(dangling.attribute.clone(), Link::One(Some(target.id.clone())));
        }
        holder.touch();
        ctx.draft.save_record(holder)?;
        dangling.resolved = true;
        ctx.draft.save_dangling(dangling)?;
        repaired += 1;
    }
    if repaired > 0 {
        log::info!("Repaired {} dangling references", repaired);
    }
    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DanglingReference, Record, ServerContext, TypeRegistry, VersionNumber};
    use crate::store::{DanglingStore, DataSetStore, EventStore, MemoryStore, RecordStore};

    fn chain(ctx: &EngineContext, released: bool) -> DataSet {
        let mut dataset = DataSet::new("http://ks.example.org/ks/DataSetStructure/s", ctx.server.uri(), VersionNumber::new(0, 1, 0));
        dataset.uri = format!("http://ks.example.org/ks/DataSet/{}", dataset.id);
        dataset.first_version_uri = dataset.uri.clone();
        dataset.released = released;
        ctx.draft.save_dataset(dataset.clone()).unwrap();
        dataset
    }

    #[test]
    fn test_subscription_to_released_chain_is_notified_immediately() {
        let registry = TypeRegistry::new();
        let server = ServerContext::new("http://ks.example.org", "Example", "geo");
        let (draft, materialized) = (MemoryStore::new("draft"), MemoryStore::new("materialized"));
        let ctx = EngineContext::new(&registry, &server, &draft, &materialized);
        let dataset = chain(&ctx, true);

        accept_subscription(&ctx, &dataset.uri, "http://other.org/notifications", Some("http://other.org")).unwrap();
        let duplicate = accept_subscription(&ctx, &dataset.uri, "http://other.org/notifications", None);
        assert!(matches!(duplicate, Err(EngineError::AlreadyExists(_))));

        let pending = pending_deliveries(&ctx).unwrap();
        assert_eq!(pending.len(), 1);
        let (notification, payload) = &pending[0];
        assert_eq!(notification.kind, EventKind::FirstNotification);
        assert_eq!(payload.notifier_uri, "http://ks.example.org");
        assert!(payload.fetch_url.starts_with("http://ks.example.org/datasets/by-uri?uri="));

        // the first-notification event is already processed, so no duplicate
        draft.save_event(Event::new(&dataset.uri, &dataset.uri, EventKind::NewVersion)).unwrap();
        assert_eq!(process_events(&ctx).unwrap(), 0);

        mark_sent(&ctx, &notification.id).unwrap();
        assert!(pending_deliveries(&ctx).unwrap().is_empty());
    }

    #[test]
    fn test_process_events_fans_out_to_subscribers() {
        let registry = TypeRegistry::new();
        let server = ServerContext::new("http://ks.example.org", "Example", "geo");
        let (draft, materialized) = (MemoryStore::new("draft"), MemoryStore::new("materialized"));
        let ctx = EngineContext::new(&registry, &server, &draft, &materialized);
        let dataset = chain(&ctx, false);
        accept_subscription(&ctx, &dataset.uri, "http://a.org/notifications", None).unwrap();
        accept_subscription(&ctx, &dataset.uri, "http://b.org/notifications", None).unwrap();
        assert!(pending_deliveries(&ctx).unwrap().is_empty());

        draft.save_event(Event::new(&dataset.uri, &dataset.uri, EventKind::NewVersion)).unwrap();
        assert_eq!(process_events(&ctx).unwrap(), 2);
        assert_eq!(process_events(&ctx).unwrap(), 0, "events are processed once");
        assert!(cancel_subscription(&ctx, &dataset.uri, "http://a.org/notifications").unwrap());
    }

    #[test]
    fn test_repair_links_arrived_target() {
        let registry = TypeRegistry::new();
        let server = ServerContext::new("http://ks.example.org", "Example", "geo");
        let (draft, materialized) = (MemoryStore::new("draft"), MemoryStore::new("materialized"));
        let ctx = EngineContext::new(&registry, &server, &draft, &materialized);

        let italy = Record::new("State");
        draft.save_record(italy.clone()).unwrap();
        draft
            .save_dangling(DanglingReference::new(
                "http://other.org/lic/License/1",
                "License",
                &italy.id,
                "State",
                "license",
                false,
            ))
            .unwrap();
        assert_eq!(repair_dangling_references(&ctx).unwrap(), 0);

        let mut license = Record::new("License");
        license.uri = "http://ks.example.org/lic/License/9".to_string();
        license.imported_from_uri = Some("http://other.org/lic/License/1".to_string());
        draft.save_record(license.clone()).unwrap();
        assert_eq!(repair_dangling_references(&ctx).unwrap(), 1);
        let italy = draft.get_record(&italy.id).unwrap().unwrap();
        assert_eq!(italy.link_one("license"), Some(&license.id));
        assert!(draft.list_unresolved_dangling().unwrap().is_empty());
    }
}
