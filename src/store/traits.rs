use crate::error::EngineResult;
use crate::model::{
    DanglingReference, DataSet, DataSetStructure, Event, Id, KnowledgeServer, Notification,
    NotificationReceived, Record, RecordFilter, SubscriptionToOther, SubscriptionToThis,
};

/// Generic record persistence; the engine never knows concrete record types
pub trait RecordStore: Send + Sync {
    fn get_record(&self, id: &Id) -> EngineResult<Option<Record>>;
    fn get_record_by_uri(&self, uri: &str) -> EngineResult<Option<Record>>;
    /// Record re-imported from `uri` (provenance lookup)
    fn get_record_imported_from(&self, uri: &str) -> EngineResult<Option<Record>>;
    /// Records whose `previous_version_uri` is `uri`
    fn list_successors(&self, uri: &str) -> EngineResult<Vec<Record>>;
    fn list_records(&self, type_name: &str) -> EngineResult<Vec<Record>>;
    /// Candidate records for a filter; only the type restriction is applied here
    fn filter_records(&self, filter: &RecordFilter) -> EngineResult<Vec<Record>>;
    /// Records holding a link to `id`
    fn list_referrers(&self, id: &Id) -> EngineResult<Vec<Record>>;
    fn save_record(&self, record: Record) -> EngineResult<()>;
    fn delete_record(&self, id: &Id) -> EngineResult<bool>;
}

pub trait StructureStore: Send + Sync {
    fn get_structure(&self, id: &Id) -> EngineResult<Option<DataSetStructure>>;
    fn get_structure_by_uri(&self, uri: &str) -> EngineResult<Option<DataSetStructure>>;
    fn get_structure_by_name(&self, name: &str) -> EngineResult<Option<DataSetStructure>>;
    fn list_structures(&self) -> EngineResult<Vec<DataSetStructure>>;
    fn save_structure(&self, structure: DataSetStructure) -> EngineResult<()>;
}

pub trait DataSetStore: Send + Sync {
    fn get_dataset(&self, id: &Id) -> EngineResult<Option<DataSet>>;
    fn get_dataset_by_uri(&self, uri: &str) -> EngineResult<Option<DataSet>>;
    fn list_datasets(&self) -> EngineResult<Vec<DataSet>>;
    fn list_datasets_for_structure(&self, structure_uri: &str) -> EngineResult<Vec<DataSet>>;
    /// Every dataset sharing `first_version_uri`, oldest version first
    fn list_version_chain(&self, first_version_uri: &str) -> EngineResult<Vec<DataSet>>;
    fn save_dataset(&self, dataset: DataSet) -> EngineResult<()>;
    fn delete_dataset(&self, id: &Id) -> EngineResult<bool>;
}

pub trait ServerStore: Send + Sync {
    fn get_server_by_uri(&self, uri: &str) -> EngineResult<Option<KnowledgeServer>>;
    fn list_servers(&self) -> EngineResult<Vec<KnowledgeServer>>;
    fn save_server(&self, server: KnowledgeServer) -> EngineResult<()>;
}

pub trait EventStore: Send + Sync {
    fn save_event(&self, event: Event) -> EngineResult<()>;
    fn list_events(&self) -> EngineResult<Vec<Event>>;
    fn list_unprocessed_events(&self) -> EngineResult<Vec<Event>>;
}

pub trait SubscriptionStore: Send + Sync {
    fn list_subscriptions_to_this(&self, first_version_uri: &str) -> EngineResult<Vec<SubscriptionToThis>>;
    fn save_subscription_to_this(&self, subscription: SubscriptionToThis) -> EngineResult<()>;
    fn delete_subscription_to_this(&self, id: &Id) -> EngineResult<bool>;
    fn list_subscriptions_to_other(&self) -> EngineResult<Vec<SubscriptionToOther>>;
    fn save_subscription_to_other(&self, subscription: SubscriptionToOther) -> EngineResult<()>;
}

pub trait NotificationStore: Send + Sync {
    fn save_notification(&self, notification: Notification) -> EngineResult<()>;
    fn list_notifications(&self) -> EngineResult<Vec<Notification>>;
    fn list_unsent_notifications(&self) -> EngineResult<Vec<Notification>>;
    /// Has this subscription already been told about this dataset?
    fn has_notification(&self, subscription_id: &Id, dataset_uri: &str) -> EngineResult<bool>;
    fn save_received(&self, received: NotificationReceived) -> EngineResult<()>;
    fn list_unprocessed_received(&self) -> EngineResult<Vec<NotificationReceived>>;
}

pub trait DanglingStore: Send + Sync {
    fn save_dangling(&self, dangling: DanglingReference) -> EngineResult<()>;
    fn list_unresolved_dangling(&self) -> EngineResult<Vec<DanglingReference>>;
}

/// All-or-nothing scopes. Scopes nest; a rollback restores the state at the
/// matching `begin`.
pub trait Transactional: Send + Sync {
    fn begin(&self) -> EngineResult<()>;
    fn commit(&self) -> EngineResult<()>;
    fn rollback(&self) -> EngineResult<()>;
}

pub trait Store:
    RecordStore
    + StructureStore
    + DataSetStore
    + ServerStore
    + EventStore
    + SubscriptionStore
    + NotificationStore
    + DanglingStore
    + Transactional
    + Send
    + Sync
{
}
