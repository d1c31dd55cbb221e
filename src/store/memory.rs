use crate::error::{EngineError, EngineResult};
use crate::model::{
    DanglingReference, DataSet, DataSetStructure, Event, Id, KnowledgeServer, Notification,
    NotificationReceived, Record, RecordFilter, SubscriptionToOther, SubscriptionToThis,
};
use crate::store::snapshot::{read_snapshot, write_snapshot};
use crate::store::traits::*;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
    records: BTreeMap<Id, Record>,
    structures: BTreeMap<Id, DataSetStructure>,
    datasets: BTreeMap<Id, DataSet>,
    servers: BTreeMap<Id, KnowledgeServer>,
    events: BTreeMap<Id, Event>,
    subscriptions_to_this: BTreeMap<Id, SubscriptionToThis>,
    subscriptions_to_other: BTreeMap<Id, SubscriptionToOther>,
    notifications: BTreeMap<Id, Notification>,
    received: BTreeMap<Id, NotificationReceived>,
    dangling: BTreeMap<Id, DanglingReference>,
}

/// In-process store backing both the draft and the materialized repository.
///
/// Transactions are savepoints: `begin` pushes a copy of every table,
/// `rollback` restores it, `commit` drops it.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    tables: RwLock<Tables>,
    savepoints: Mutex<Vec<Tables>>,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tables: RwLock::new(Tables::default()),
            savepoints: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open a store from a snapshot file, or empty when there is none
    pub fn open(name: &str, path: &Path) -> EngineResult<Self> {
        let store = Self::new(name);
        if let Some(tables) = read_snapshot::<Tables>(path)? {
            log::info!(
                "Loaded {} store snapshot: {} records, {} datasets",
                name,
                tables.records.len(),
                tables.datasets.len()
            );
            *store.tables.write() = tables;
        }
        Ok(store)
    }

    pub fn save_snapshot(&self, path: &Path) -> EngineResult<()> {
        if !self.savepoints.lock().is_empty() {
            return Err(EngineError::Storage(format!(
                "Cannot snapshot {} store inside a transaction",
                self.name
            )));
        }
        let tables = self.tables.read().clone();
        write_snapshot(path, &tables)
    }

    pub fn record_count(&self) -> usize {
        self.tables.read().records.len()
    }
}

fn sorted_records(mut records: Vec<Record>) -> Vec<Record> {
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    records
}

impl RecordStore for MemoryStore {
    fn get_record(&self, id: &Id) -> EngineResult<Option<Record>> {
        Ok(self.tables.read().records.get(id).cloned())
    }

    fn get_record_by_uri(&self, uri: &str) -> EngineResult<Option<Record>> {
        if uri.is_empty() {
            return Ok(None);
        }
        Ok(self
            .tables
            .read()
            .records
            .values()
            .find(|r| r.uri == uri)
            .cloned())
    }

    fn get_record_imported_from(&self, uri: &str) -> EngineResult<Option<Record>> {
        Ok(self
            .tables
            .read()
            .records
            .values()
            .find(|r| r.imported_from_uri.as_deref() == Some(uri))
            .cloned())
    }

    fn list_successors(&self, uri: &str) -> EngineResult<Vec<Record>> {
        let tables = self.tables.read();
        Ok(sorted_records(
            tables
                .records
                .values()
                .filter(|r| r.previous_version_uri.as_deref() == Some(uri))
                .cloned()
                .collect(),
        ))
    }

    fn list_records(&self, type_name: &str) -> EngineResult<Vec<Record>> {
        let tables = self.tables.read();
        Ok(sorted_records(
            tables
                .records
                .values()
                .filter(|r| r.type_name == type_name)
                .cloned()
                .collect(),
        ))
    }

    fn filter_records(&self, filter: &RecordFilter) -> EngineResult<Vec<Record>> {
        let tables = self.tables.read();
        Ok(sorted_records(
            tables
                .records
                .values()
                .filter(|r| {
                    filter
                        .types
                        .as_ref()
                        .map_or(true, |types| types.contains(&r.type_name))
                })
                .cloned()
                .collect(),
        ))
    }

    fn list_referrers(&self, id: &Id) -> EngineResult<Vec<Record>> {
        let tables = self.tables.read();
        Ok(sorted_records(
            tables
                .records
                .values()
                .filter(|r| r.links.values().any(|link| link.points_to(id)))
                .cloned()
                .collect(),
        ))
    }

    fn save_record(&self, record: Record) -> EngineResult<()> {
        self.tables.write().records.insert(record.id.clone(), record);
        Ok(())
    }

    fn delete_record(&self, id: &Id) -> EngineResult<bool> {
        Ok(self.tables.write().records.remove(id).is_some())
    }
}

impl StructureStore for MemoryStore {
    fn get_structure(&self, id: &Id) -> EngineResult<Option<DataSetStructure>> {
        Ok(self.tables.read().structures.get(id).cloned())
    }

    fn get_structure_by_uri(&self, uri: &str) -> EngineResult<Option<DataSetStructure>> {
        Ok(self
            .tables
            .read()
            .structures
            .values()
            .find(|s| !uri.is_empty() && s.uri == uri)
            .cloned())
    }

    fn get_structure_by_name(&self, name: &str) -> EngineResult<Option<DataSetStructure>> {
        Ok(self
            .tables
            .read()
            .structures
            .values()
            .find(|s| s.name == name)
            .cloned())
    }

    fn list_structures(&self) -> EngineResult<Vec<DataSetStructure>> {
        let mut structures: Vec<DataSetStructure> =
            self.tables.read().structures.values().cloned().collect();
        structures.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(structures)
    }

    fn save_structure(&self, structure: DataSetStructure) -> EngineResult<()> {
        self.tables
            .write()
            .structures
            .insert(structure.id.clone(), structure);
        Ok(())
    }
}

impl DataSetStore for MemoryStore {
    fn get_dataset(&self, id: &Id) -> EngineResult<Option<DataSet>> {
        Ok(self.tables.read().datasets.get(id).cloned())
    }

    fn get_dataset_by_uri(&self, uri: &str) -> EngineResult<Option<DataSet>> {
        Ok(self
            .tables
            .read()
            .datasets
            .values()
            .find(|d| !uri.is_empty() && d.uri == uri)
            .cloned())
    }

    fn list_datasets(&self) -> EngineResult<Vec<DataSet>> {
        let mut datasets: Vec<DataSet> = self.tables.read().datasets.values().cloned().collect();
        datasets.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(datasets)
    }

    fn list_datasets_for_structure(&self, structure_uri: &str) -> EngineResult<Vec<DataSet>> {
        Ok(self
            .list_datasets()?
            .into_iter()
            .filter(|d| d.structure_uri == structure_uri)
            .collect())
    }

    fn list_version_chain(&self, first_version_uri: &str) -> EngineResult<Vec<DataSet>> {
        let mut chain: Vec<DataSet> = self
            .tables
            .read()
            .datasets
            .values()
            .filter(|d| d.first_version_uri == first_version_uri)
            .cloned()
            .collect();
        chain.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(chain)
    }

    fn save_dataset(&self, dataset: DataSet) -> EngineResult<()> {
        self.tables
            .write()
            .datasets
            .insert(dataset.id.clone(), dataset);
        Ok(())
    }

    fn delete_dataset(&self, id: &Id) -> EngineResult<bool> {
        Ok(self.tables.write().datasets.remove(id).is_some())
    }
}

impl ServerStore for MemoryStore {
    fn get_server_by_uri(&self, uri: &str) -> EngineResult<Option<KnowledgeServer>> {
        let uri = uri.trim_end_matches('/');
        Ok(self
            .tables
            .read()
            .servers
            .values()
            .find(|s| s.uri == uri)
            .cloned())
    }

    fn list_servers(&self) -> EngineResult<Vec<KnowledgeServer>> {
        Ok(self.tables.read().servers.values().cloned().collect())
    }

    fn save_server(&self, server: KnowledgeServer) -> EngineResult<()> {
        self.tables.write().servers.insert(server.id.clone(), server);
        Ok(())
    }
}

impl EventStore for MemoryStore {
    fn save_event(&self, event: Event) -> EngineResult<()> {
        self.tables.write().events.insert(event.id.clone(), event);
        Ok(())
    }

    fn list_events(&self) -> EngineResult<Vec<Event>> {
        let mut events: Vec<Event> = self.tables.read().events.values().cloned().collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(events)
    }

    fn list_unprocessed_events(&self) -> EngineResult<Vec<Event>> {
        Ok(self
            .list_events()?
            .into_iter()
            .filter(|e| !e.processed)
            .collect())
    }
}

impl SubscriptionStore for MemoryStore {
    fn list_subscriptions_to_this(&self, first_version_uri: &str) -> EngineResult<Vec<SubscriptionToThis>> {
        Ok(self
            .tables
            .read()
            .subscriptions_to_this
            .values()
            .filter(|s| s.first_version_uri == first_version_uri)
            .cloned()
            .collect())
    }

    fn save_subscription_to_this(&self, subscription: SubscriptionToThis) -> EngineResult<()> {
        self.tables
            .write()
            .subscriptions_to_this
            .insert(subscription.id.clone(), subscription);
        Ok(())
    }

    fn delete_subscription_to_this(&self, id: &Id) -> EngineResult<bool> {
        Ok(self.tables.write().subscriptions_to_this.remove(id).is_some())
    }

    fn list_subscriptions_to_other(&self) -> EngineResult<Vec<SubscriptionToOther>> {
        Ok(self
            .tables
            .read()
            .subscriptions_to_other
            .values()
            .cloned()
            .collect())
    }

    fn save_subscription_to_other(&self, subscription: SubscriptionToOther) -> EngineResult<()> {
        self.tables
            .write()
            .subscriptions_to_other
            .insert(subscription.id.clone(), subscription);
        Ok(())
    }
}

impl NotificationStore for MemoryStore {
    fn save_notification(&self, notification: Notification) -> EngineResult<()> {
        self.tables
            .write()
            .notifications
            .insert(notification.id.clone(), notification);
        Ok(())
    }

    fn list_notifications(&self) -> EngineResult<Vec<Notification>> {
        let mut notifications: Vec<Notification> =
            self.tables.read().notifications.values().cloned().collect();
        notifications.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(notifications)
    }

    fn list_unsent_notifications(&self) -> EngineResult<Vec<Notification>> {
        Ok(self
            .list_notifications()?
            .into_iter()
            .filter(|n| !n.sent)
            .collect())
    }

    fn has_notification(&self, subscription_id: &Id, dataset_uri: &str) -> EngineResult<bool> {
        Ok(self
            .tables
            .read()
            .notifications
            .values()
            .any(|n| &n.subscription_id == subscription_id && n.dataset_uri == dataset_uri))
    }

    fn save_received(&self, received: NotificationReceived) -> EngineResult<()> {
        self.tables
            .write()
            .received
            .insert(received.id.clone(), received);
        Ok(())
    }

    fn list_unprocessed_received(&self) -> EngineResult<Vec<NotificationReceived>> {
        let mut received: Vec<NotificationReceived> = self
            .tables
            .read()
            .received
            .values()
            .filter(|r| !r.processed)
            .cloned()
            .collect();
        received.sort_by(|a, b| a.received_at.cmp(&b.received_at));
        Ok(received)
    }
}

impl DanglingStore for MemoryStore {
    fn save_dangling(&self, dangling: DanglingReference) -> EngineResult<()> {
        self.tables
            .write()
            .dangling
            .insert(dangling.id.clone(), dangling);
        Ok(())
    }

    fn list_unresolved_dangling(&self) -> EngineResult<Vec<DanglingReference>> {
        Ok(self
            .tables
            .read()
            .dangling
            .values()
            .filter(|d| !d.resolved)
            .cloned()
            .collect())
    }
}

impl Transactional for MemoryStore {
    fn begin(&self) -> EngineResult<()> {
        let copy = self.tables.read().clone();
        self.savepoints.lock().push(copy);
        Ok(())
    }

    fn commit(&self) -> EngineResult<()> {
        self.savepoints
            .lock()
            .pop()
            .map(|_| ())
            .ok_or_else(|| EngineError::Storage(format!("commit without begin on {} store", self.name)))
    }

    fn rollback(&self) -> EngineResult<()> {
        let saved = self.savepoints.lock().pop().ok_or_else(|| {
            EngineError::Storage(format!("rollback without begin on {} store", self.name))
        })?;
        *self.tables.write() = saved;
        Ok(())
    }
}

impl Store for MemoryStore {}
