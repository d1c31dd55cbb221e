mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use knowledge_server::seed::{continents_structure, licenses_structure, load_seed_data};
use knowledge_server::store::{DanglingStore, DataSetStore, NotificationStore, RecordStore, SubscriptionStore};
use knowledge_server::{EngineError, Record, SerialFormat, Sweep, VersionRequest};

use common::{engine, flaky_engine, state_named, Engine, LoopbackTransport};

const OWNER: &str = "http://owner.example.org";
const REPLICA: &str = "http://replica.example.org";

fn federation() -> (Arc<LoopbackTransport>, Engine, Engine) {
    let transport = Arc::new(LoopbackTransport::default());
    let owner = engine(OWNER, transport.clone());
    let replica = engine(REPLICA, transport.clone());
    for structure in [continents_structure(), licenses_structure()] {
        replica.register_structure(structure).unwrap();
    }
    (transport, owner, replica)
}

#[tokio::test]
async fn test_subscriber_follows_released_versions() {
    let (_transport, owner, replica) = federation();
    let seeded = load_seed_data(&*owner).unwrap();
    let v1 = seeded.continents;

    let subscription = replica.subscribe_to_remote(&v1.uri, OWNER).await.unwrap();
    assert_eq!(subscription.first_version_uri, v1.uri);
    assert_eq!(replica.draft().list_subscriptions_to_other().unwrap().len(), 1);

    // the chain was already released: the subscriber hears about it at once
    let subscribers = owner.draft().list_subscriptions_to_this(&v1.uri).unwrap();
    assert_eq!(subscribers.len(), 1);
    assert_eq!(subscribers[0].callback_url, format!("{}/notifications", REPLICA));
    assert_eq!(owner.draft().list_unsent_notifications().unwrap().len(), 1);

    let sent = owner.run_sweep(Sweep::SendNotifications).await.unwrap();
    assert_eq!((sent.attempted, sent.succeeded), (1, 1));
    assert!(owner.draft().list_unsent_notifications().unwrap().is_empty());

    let applied = replica.run_sweep(Sweep::ProcessReceived).await.unwrap();
    assert_eq!((applied.attempted, applied.succeeded), (1, 1));
    assert!(replica.materialized().get_dataset_by_uri(&v1.uri).unwrap().is_some());
    assert_eq!(replica.materialized().list_records("State").unwrap().len(), 3);
    assert_eq!(replica.draft().list_unresolved_dangling().unwrap().len(), 3);

    // older events are not announced twice
    let created = owner.run_sweep(Sweep::ProcessEvents).await.unwrap();
    assert_eq!(created.attempted, 0);

    let v2 = owner.new_version(&v1.id, &VersionRequest::default()).unwrap();
    owner.release(&v2.id).unwrap();
    let reports = owner.run_all_sweeps().await;
    let by_sweep = |sweep: Sweep| reports.iter().find(|(s, _)| *s == sweep).unwrap().1;
    assert_eq!(by_sweep(Sweep::ProcessEvents).succeeded, 1);
    assert_eq!(by_sweep(Sweep::SendNotifications).succeeded, 1);

    let applied = replica.run_sweep(Sweep::ProcessReceived).await.unwrap();
    assert_eq!(applied.succeeded, 1);
    assert!(replica.materialized().get_dataset_by_uri(&v1.uri).unwrap().is_none());
    assert!(replica.materialized().get_dataset_by_uri(&v2.uri).unwrap().is_some());
    assert_eq!(replica.materialized().list_records("State").unwrap().len(), 3);

    let chain = replica.draft().list_version_chain(&v1.uri).unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain.iter().filter(|d| d.released).count(), 1);
    assert!(chain.iter().all(|d| d.owner_uri == OWNER));
}

#[tokio::test]
async fn test_every_subscriber_is_notified_once() {
    let transport = Arc::new(LoopbackTransport::default());
    let owner = engine(OWNER, transport.clone());
    let seeded = load_seed_data(&*owner).unwrap();
    let first = seeded.continents.uri.clone();

    // nobody listens at these callbacks; deliveries stay pending
    let callbacks = ["http://a.example.org/notifications", "http://b.example.org/notifications"];
    for callback in callbacks {
        owner.accept_subscription(&first, callback, None).unwrap();
    }
    assert!(matches!(
        owner.accept_subscription(&first, callbacks[0], None),
        Err(EngineError::AlreadyExists(_))
    ));

    let v2 = owner
        .new_version(&seeded.continents.id, &VersionRequest::default())
        .unwrap();
    owner.release(&v2.id).unwrap();

    let created = owner.run_sweep(Sweep::ProcessEvents).await.unwrap();
    assert_eq!(created.succeeded, 2);
    let again = owner.run_sweep(Sweep::ProcessEvents).await.unwrap();
    assert_eq!(again.succeeded, 0);

    let notifications = owner.draft().list_notifications().unwrap();
    for callback in callbacks {
        let uris: Vec<_> = notifications
            .iter()
            .filter(|n| n.callback_url == callback)
            .map(|n| n.dataset_uri.clone())
            .collect();
        assert_eq!(uris.len(), 2, "first notification plus the new version");
        assert!(uris.contains(&first));
        assert!(uris.contains(&v2.uri));
    }

    let report = owner.run_sweep(Sweep::SendNotifications).await.unwrap();
    assert_eq!((report.attempted, report.failed), (4, 4));
    assert_eq!(owner.draft().list_unsent_notifications().unwrap().len(), 4);
    assert_eq!(transport.calls.read().len(), 4);

    assert!(owner.cancel_subscription(&first, callbacks[1]).unwrap());
    assert!(!owner.cancel_subscription(&first, callbacks[1]).unwrap());
    assert_eq!(owner.draft().list_subscriptions_to_this(&first).unwrap().len(), 1);
}

#[tokio::test]
async fn test_subscriptions_are_refused_for_foreign_chains() {
    let (_transport, owner, replica) = federation();
    let seeded = load_seed_data(&*owner).unwrap();

    // unknown chain on the remote side
    let missing = format!("{}/ks/DataSet/missing", OWNER);
    assert!(matches!(
        replica.subscribe_to_remote(&missing, OWNER).await,
        Err(EngineError::Transport(_))
    ));
    assert!(replica.draft().list_subscriptions_to_other().unwrap().is_empty());

    // the replica does not own the chain, so it cannot take subscribers for it
    replica.subscribe_to_remote(&seeded.continents.uri, OWNER).await.unwrap();
    owner.run_sweep(Sweep::SendNotifications).await.unwrap();
    replica.run_sweep(Sweep::ProcessReceived).await.unwrap();
    assert!(matches!(
        replica.accept_subscription(&seeded.continents.uri, "http://c.example.org/notifications", None),
        Err(EngineError::Structure(_))
    ));
}

#[tokio::test]
async fn test_repair_links_records_that_arrive_later() {
    let (_transport, owner, replica) = federation();
    let seeded = load_seed_data(&*owner).unwrap();

    replica.subscribe_to_remote(&seeded.continents.uri, OWNER).await.unwrap();
    owner.run_sweep(Sweep::SendNotifications).await.unwrap();
    replica.run_sweep(Sweep::ProcessReceived).await.unwrap();
    assert_eq!(replica.draft().list_unresolved_dangling().unwrap().len(), 3);

    // the license the states point at, imported afterwards
    let license = &seeded.licenses[0];
    let text = owner
        .export_dataset(&license.uri, SerialFormat::Json)
        .unwrap();
    replica
        .import_dataset(&text, SerialFormat::Json)
        .unwrap();

    let repaired = replica.run_sweep(Sweep::RepairDangling).await.unwrap();
    assert_eq!(repaired.succeeded, 3);
    assert!(replica.draft().list_unresolved_dangling().unwrap().is_empty());

    let licensed = replica
        .draft()
        .list_records("State")
        .unwrap()
        .into_iter()
        .filter(|s| s.link_one("license").is_some())
        .count();
    assert_eq!(licensed, 3);
}

fn population(records: &[Record], name: &str) -> Option<i64> {
    records
        .iter()
        .find(|r| r.field_str("name") == Some(name))
        .and_then(|r| r.field("population"))
        .and_then(|p| p.as_i64())
}

#[tokio::test]
async fn test_view_subscriber_receives_every_change() {
    let (_transport, owner, replica) = federation();
    let seeded = load_seed_data(&*owner).unwrap();
    let view = seeded.large_states.clone();

    replica.subscribe_to_remote(&view.uri, OWNER).await.unwrap();
    assert!(
        owner.draft().list_unsent_notifications().unwrap().is_empty(),
        "a view has no release to announce yet"
    );

    // Italy grows: the large-states view changes with the release
    let v2 = owner.new_version(&seeded.continents.id, &VersionRequest::default()).unwrap();
    let italy = state_named(&owner, v2.root.as_ref().unwrap(), "Italy");
    owner.save_record(italy.with_field("population", 61_000_000)).unwrap();
    owner.release(&v2.id).unwrap();
    owner.run_all_sweeps().await;

    let applied = replica.run_sweep(Sweep::ProcessReceived).await.unwrap();
    assert_eq!((applied.attempted, applied.succeeded, applied.failed), (1, 1, 0));
    assert!(replica.draft().list_unprocessed_received().unwrap().is_empty());
    let local_view = replica.draft().get_dataset_by_uri(&view.uri).unwrap().unwrap();
    assert!(local_view.is_view());
    assert!(!local_view.released);

    let published = replica.materialized().list_records("State").unwrap();
    assert_eq!(published.len(), 2, "Italy and France pass the filter, Spain does not");
    assert_eq!(population(&published, "Italy"), Some(61_000_000));

    // a second change to the same view is announced and applied too
    let v3 = owner.new_version(&v2.id, &VersionRequest::default()).unwrap();
    let france = state_named(&owner, v3.root.as_ref().unwrap(), "France");
    owner.save_record(france.with_field("population", 70_000_000)).unwrap();
    owner.release(&v3.id).unwrap();
    owner.run_all_sweeps().await;

    let applied = replica.run_sweep(Sweep::ProcessReceived).await.unwrap();
    assert_eq!((applied.succeeded, applied.failed), (1, 0));
    let again = replica.run_sweep(Sweep::ProcessReceived).await.unwrap();
    assert_eq!(again.attempted, 0);

    let published = replica.materialized().list_records("State").unwrap();
    assert_eq!(published.len(), 2, "members of the previous view are replaced");
    assert_eq!(population(&published, "France"), Some(70_000_000));
    let text = replica.export_dataset(&view.uri, SerialFormat::Json).unwrap();
    assert!(text.contains("France"));
}

#[tokio::test]
async fn test_failing_sweep_does_not_stop_the_others() {
    let owner = flaky_engine(OWNER);
    let seeded = load_seed_data(&*owner).unwrap();
    owner
        .accept_subscription(&seeded.continents.uri, "http://a.example.org/notifications", None)
        .unwrap();
    owner.draft().events_down.store(true, Ordering::SeqCst);

    let reports = owner.run_all_sweeps().await;
    assert_eq!(reports.len(), Sweep::ALL.len());
    let by_sweep = |sweep: Sweep| reports.iter().find(|(s, _)| *s == sweep).unwrap().1;
    assert_eq!(by_sweep(Sweep::ProcessEvents).failed, 1);
    let sent = by_sweep(Sweep::SendNotifications);
    assert_eq!((sent.attempted, sent.failed), (1, 1), "the first notification is still attempted");
    assert_eq!(by_sweep(Sweep::RepairDangling).failed, 0);

    owner.draft().events_down.store(false, Ordering::SeqCst);
    let recovered = owner.run_sweep(Sweep::ProcessEvents).await.unwrap();
    assert_eq!(recovered.failed, 0);
}
