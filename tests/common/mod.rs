#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request};
use axum::Router;
use knowledge_server::api::routes::create_router;
use knowledge_server::seed::default_registry;
use knowledge_server::store::{
    DanglingStore, DataSetStore, EventStore, NotificationStore, RecordStore, ServerStore, Store, StructureStore,
    SubscriptionStore, Transactional,
};
use knowledge_server::{
    DanglingReference, DataSet, DataSetStructure, EngineError, EngineResult, Event, Id, KnowledgeEngine,
    KnowledgeServer, MemoryStore, Notification, NotificationReceived, Record, RecordFilter, ServerContext,
    SubscriptionToOther, SubscriptionToThis, Transport,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

pub type Engine = Arc<KnowledgeEngine<MemoryStore>>;

/// Routes outbound calls to in-process routers keyed by server URI
#[derive(Default)]
pub struct LoopbackTransport {
    peers: RwLock<HashMap<String, Router>>,
    pub calls: RwLock<Vec<String>>,
}

impl LoopbackTransport {
    pub fn attach(&self, engine: &Engine) {
        let router = create_router().with_state(engine.clone());
        self.peers.write().insert(engine.server().uri().to_string(), router);
    }

    pub fn detach(&self, uri: &str) {
        self.peers.write().remove(uri);
    }

    fn route(&self, url: &str) -> EngineResult<(Router, String)> {
        let peers = self.peers.read();
        for (base, router) in peers.iter() {
            if let Some(path) = url.strip_prefix(base.as_str()) {
                return Ok((router.clone(), path.to_string()));
            }
        }
        Err(EngineError::Transport(format!("{} is unreachable", url)))
    }

    async fn send(&self, method: Method, url: &str, body: Body) -> EngineResult<String> {
        self.calls.write().push(format!("{} {}", method, url));
        let (router, path) = self.route(url)?;
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(body)
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        let response = router
            .oneshot(request)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(EngineError::Transport(format!("{} returned {}", url, status)));
        }
        Ok(String::from_utf8_lossy(&bytes).to_string())
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> EngineResult<serde_json::Value> {
        let text = self.send(Method::POST, url, Body::from(body.to_string())).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn get_text(&self, url: &str) -> EngineResult<String> {
        self.send(Method::GET, url, Body::empty()).await
    }
}

pub fn engine(uri: &str, transport: Arc<LoopbackTransport>) -> Engine {
    let engine = Arc::new(KnowledgeEngine::new(
        default_registry(),
        ServerContext::new(uri, uri, "ks"),
        MemoryStore::new("draft"),
        MemoryStore::new("materialized"),
        transport.clone(),
    ));
    transport.attach(&engine);
    engine
}

/// The state called `name` under a continent root in the draft store
pub fn state_named<S: Store>(engine: &KnowledgeEngine<S>, root_id: &Id, name: &str) -> Record {
    let root = engine.draft().get_record(root_id).unwrap().unwrap();
    root.link_many("states")
        .iter()
        .map(|id| engine.draft().get_record(id).unwrap().unwrap())
        .find(|state| state.field_str("name") == Some(name))
        .unwrap()
}

pub fn offline_engine(uri: &str) -> Engine {
    let transport = Arc::new(LoopbackTransport::default());
    let engine = engine(uri, transport.clone());
    transport.detach(uri);
    engine
}

/// A memory store whose event table can be taken offline
pub struct FlakyStore {
    inner: MemoryStore,
    pub events_down: AtomicBool,
}

impl FlakyStore {
    pub fn new(name: &str) -> Self {
        Self {
            inner: MemoryStore::new(name),
            events_down: AtomicBool::new(false),
        }
    }

    fn events(&self) -> EngineResult<()> {
        if self.events_down.load(Ordering::SeqCst) {
            return Err(EngineError::Storage("event table is offline".to_string()));
        }
        Ok(())
    }
}

impl RecordStore for FlakyStore {
    fn get_record(&self, id: &Id) -> EngineResult<Option<Record>> {
        self.inner.get_record(id)
    }
    fn get_record_by_uri(&self, uri: &str) -> EngineResult<Option<Record>> {
        self.inner.get_record_by_uri(uri)
    }
    fn get_record_imported_from(&self, uri: &str) -> EngineResult<Option<Record>> {
        self.inner.get_record_imported_from(uri)
    }
    fn list_successors(&self, uri: &str) -> EngineResult<Vec<Record>> {
        self.inner.list_successors(uri)
    }
    fn list_records(&self, type_name: &str) -> EngineResult<Vec<Record>> {
        self.inner.list_records(type_name)
    }
    fn filter_records(&self, filter: &RecordFilter) -> EngineResult<Vec<Record>> {
        self.inner.filter_records(filter)
    }
    fn list_referrers(&self, id: &Id) -> EngineResult<Vec<Record>> {
        self.inner.list_referrers(id)
    }
    fn save_record(&self, record: Record) -> EngineResult<()> {
        self.inner.save_record(record)
    }
    fn delete_record(&self, id: &Id) -> EngineResult<bool> {
        self.inner.delete_record(id)
    }
}

impl StructureStore for FlakyStore {
    fn get_structure(&self, id: &Id) -> EngineResult<Option<DataSetStructure>> {
        self.inner.get_structure(id)
    }
    fn get_structure_by_uri(&self, uri: &str) -> EngineResult<Option<DataSetStructure>> {
        self.inner.get_structure_by_uri(uri)
    }
    fn get_structure_by_name(&self, name: &str) -> EngineResult<Option<DataSetStructure>> {
        self.inner.get_structure_by_name(name)
    }
    fn list_structures(&self) -> EngineResult<Vec<DataSetStructure>> {
        self.inner.list_structures()
    }
    fn save_structure(&self, structure: DataSetStructure) -> EngineResult<()> {
        self.inner.save_structure(structure)
    }
}

impl DataSetStore for FlakyStore {
    fn get_dataset(&self, id: &Id) -> EngineResult<Option<DataSet>> {
        self.inner.get_dataset(id)
    }
    fn get_dataset_by_uri(&self, uri: &str) -> EngineResult<Option<DataSet>> {
        self.inner.get_dataset_by_uri(uri)
    }
    fn list_datasets(&self) -> EngineResult<Vec<DataSet>> {
        self.inner.list_datasets()
    }
    fn list_datasets_for_structure(&self, structure_uri: &str) -> EngineResult<Vec<DataSet>> {
        self.inner.list_datasets_for_structure(structure_uri)
    }
    fn list_version_chain(&self, first_version_uri: &str) -> EngineResult<Vec<DataSet>> {
        self.inner.list_version_chain(first_version_uri)
    }
    fn save_dataset(&self, dataset: DataSet) -> EngineResult<()> {
        self.inner.save_dataset(dataset)
    }
    fn delete_dataset(&self, id: &Id) -> EngineResult<bool> {
        self.inner.delete_dataset(id)
    }
}

impl ServerStore for FlakyStore {
    fn get_server_by_uri(&self, uri: &str) -> EngineResult<Option<KnowledgeServer>> {
        self.inner.get_server_by_uri(uri)
    }
    fn list_servers(&self) -> EngineResult<Vec<KnowledgeServer>> {
        self.inner.list_servers()
    }
    fn save_server(&self, server: KnowledgeServer) -> EngineResult<()> {
        self.inner.save_server(server)
    }
}

impl EventStore for FlakyStore {
    fn save_event(&self, event: Event) -> EngineResult<()> {
        self.events()?;
        self.inner.save_event(event)
    }
    fn list_events(&self) -> EngineResult<Vec<Event>> {
        self.events()?;
        self.inner.list_events()
    }
    fn list_unprocessed_events(&self) -> EngineResult<Vec<Event>> {
        self.events()?;
        self.inner.list_unprocessed_events()
    }
}

impl SubscriptionStore for FlakyStore {
    fn list_subscriptions_to_this(&self, first_version_uri: &str) -> EngineResult<Vec<SubscriptionToThis>> {
        self.inner.list_subscriptions_to_this(first_version_uri)
    }
    fn save_subscription_to_this(&self, subscription: SubscriptionToThis) -> EngineResult<()> {
        self.inner.save_subscription_to_this(subscription)
    }
    fn delete_subscription_to_this(&self, id: &Id) -> EngineResult<bool> {
        self.inner.delete_subscription_to_this(id)
    }
    fn list_subscriptions_to_other(&self) -> EngineResult<Vec<SubscriptionToOther>> {
        self.inner.list_subscriptions_to_other()
    }
    fn save_subscription_to_other(&self, subscription: SubscriptionToOther) -> EngineResult<()> {
        self.inner.save_subscription_to_other(subscription)
    }
}

impl NotificationStore for FlakyStore {
    fn save_notification(&self, notification: Notification) -> EngineResult<()> {
        self.inner.save_notification(notification)
    }
    fn list_notifications(&self) -> EngineResult<Vec<Notification>> {
        self.inner.list_notifications()
    }
    fn list_unsent_notifications(&self) -> EngineResult<Vec<Notification>> {
        self.inner.list_unsent_notifications()
    }
    fn has_notification(&self, subscription_id: &Id, dataset_uri: &str) -> EngineResult<bool> {
        self.inner.has_notification(subscription_id, dataset_uri)
    }
    fn save_received(&self, received: NotificationReceived) -> EngineResult<()> {
        self.inner.save_received(received)
    }
    fn list_unprocessed_received(&self) -> EngineResult<Vec<NotificationReceived>> {
        self.inner.list_unprocessed_received()
    }
}

impl DanglingStore for FlakyStore {
    fn save_dangling(&self, dangling: DanglingReference) -> EngineResult<()> {
        self.inner.save_dangling(dangling)
    }
    fn list_unresolved_dangling(&self) -> EngineResult<Vec<DanglingReference>> {
        self.inner.list_unresolved_dangling()
    }
}

impl Transactional for FlakyStore {
    fn begin(&self) -> EngineResult<()> {
        self.inner.begin()
    }
    fn commit(&self) -> EngineResult<()> {
        self.inner.commit()
    }
    fn rollback(&self) -> EngineResult<()> {
        self.inner.rollback()
    }
}

impl Store for FlakyStore {}

/// An engine on [`FlakyStore`]s, detached from every peer
pub fn flaky_engine(uri: &str) -> Arc<KnowledgeEngine<FlakyStore>> {
    Arc::new(KnowledgeEngine::new(
        default_registry(),
        ServerContext::new(uri, uri, "ks"),
        FlakyStore::new("draft"),
        FlakyStore::new("materialized"),
        Arc::new(LoopbackTransport::default()),
    ))
}
