use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::logic::{self, notify, EngineContext};
use crate::model::{
    DataSet, DataSetStructure, Id, NotificationPayload, NotificationReceived, Record, RecordFilter, SerialFormat, SerialNode,
    ServerContext, SubscriptionToOther, SubscriptionToThis, TypeRegistry, VersionRequest,
};
use crate::store::{MemoryStore, Store};
use crate::transport::{is_success, Transport};

/// The periodic jobs; each one is safe to re-run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    /// Events -> notifications for every subscriber
    ProcessEvents,
    /// POST unsent notifications
    SendNotifications,
    /// Fetch, import and release datasets announced to us
    ProcessReceived,
    RepairDangling,
}

impl Sweep {
    pub const ALL: [Sweep; 4] = [
        Sweep::ProcessEvents,
        Sweep::SendNotifications,
        Sweep::ProcessReceived,
        Sweep::RepairDangling,
    ];
}

impl fmt::Display for Sweep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Sweep::ProcessEvents => "process-events",
            Sweep::SendNotifications => "send-notifications",
            Sweep::ProcessReceived => "process-received",
            Sweep::RepairDangling => "repair-dangling",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// One knowledge server: type registry, identity, the draft and
/// materialized stores and the outbound transport.
///
/// Mutations run one at a time under the write lock; reads share the
/// read lock so a release in progress is never half visible. The lock is
/// never held across network I/O.
pub struct KnowledgeEngine<S: Store> {
    registry: TypeRegistry,
    server: ServerContext,
    draft: S,
    materialized: S,
    transport: Arc<dyn Transport>,
    lock: RwLock<()>,
}

impl<S: Store> KnowledgeEngine<S> {
    pub fn new(
        registry: TypeRegistry,
        server: ServerContext,
        draft: S,
        materialized: S,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            registry,
            server,
            draft,
            materialized,
            transport,
            lock: RwLock::new(()),
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn server(&self) -> &ServerContext {
        &self.server
    }

    pub fn draft(&self) -> &S {
        &self.draft
    }

    pub fn materialized(&self) -> &S {
        &self.materialized
    }

    fn context(&self) -> EngineContext<'_> {
        EngineContext::new(&self.registry, &self.server, &self.draft, &self.materialized)
    }

    pub fn read<T>(&self, f: impl FnOnce(&EngineContext) -> EngineResult<T>) -> EngineResult<T> {
        let _guard = self.lock.read();
        f(&self.context())
    }

    pub fn write<T>(&self, f: impl FnOnce(&EngineContext) -> EngineResult<T>) -> EngineResult<T> {
        let _guard = self.lock.write();
        f(&self.context())
    }

    // ---- records, structures and datasets ----

    /// Save a draft record, minting its URI on first save
    pub fn save_record(&self, record: Record) -> EngineResult<Record> {
        self.write(|ctx| logic::identity::persist(ctx, ctx.draft, record))
    }

    pub fn register_structure(&self, structure: DataSetStructure) -> EngineResult<DataSetStructure> {
        self.write(|ctx| logic::register_structure(ctx, structure))
    }

    pub fn export_structure(&self, uri_or_name: &str, format: SerialFormat) -> EngineResult<String> {
        self.structure_serial(uri_or_name)?.render(format)
    }

    pub fn structure_serial(&self, uri_or_name: &str) -> EngineResult<SerialNode> {
        self.read(|ctx| Ok(logic::export_structure(&logic::find_structure(ctx, uri_or_name)?)))
    }

    pub fn create_dataset(&self, structure: &str, spec: logic::NewDataSet) -> EngineResult<DataSet> {
        self.write(|ctx| logic::create_dataset(ctx, structure, spec))
    }

    /// A dataset of one record and its references, with no registered structure
    pub fn create_record_dataset(&self, spec: logic::NewDataSet) -> EngineResult<DataSet> {
        self.write(|ctx| logic::create_record_dataset(ctx, spec))
    }

    pub fn create_view(&self, structure: &str, filter: RecordFilter, description: Option<String>) -> EngineResult<DataSet> {
        self.write(|ctx| logic::create_view(ctx, structure, filter, description))
    }

    pub fn new_version(&self, dataset_id: &Id, request: &VersionRequest) -> EngineResult<DataSet> {
        self.write(|ctx| logic::new_version(ctx, dataset_id, request))
    }

    pub fn release(&self, dataset_id: &Id) -> EngineResult<logic::ReleaseOutcome> {
        self.write(|ctx| logic::release(ctx, dataset_id))
    }

    pub fn delete_dataset(&self, dataset_id: &Id) -> EngineResult<usize> {
        self.write(|ctx| logic::delete_dataset(ctx, dataset_id))
    }

    pub fn version_info(&self, uri: &str) -> EngineResult<logic::VersionInfo> {
        self.read(|ctx| logic::version_info(ctx, uri))
    }

    pub fn export_dataset(&self, uri: &str, format: SerialFormat) -> EngineResult<String> {
        self.read(|ctx| logic::export_dataset_text(ctx, uri, format))
    }

    pub fn dataset_serial(&self, uri: &str) -> EngineResult<SerialNode> {
        self.read(|ctx| logic::export_dataset(ctx, uri))
    }

    /// Takes the write lock: the shallow structure may be created on first use
    pub fn record_serial(&self, uri: &str) -> EngineResult<SerialNode> {
        self.write(|ctx| logic::export_record(ctx, uri))
    }

    pub fn import_dataset(&self, text: &str, format: SerialFormat) -> EngineResult<logic::ImportOutcome> {
        self.write(|ctx| logic::import_dataset(ctx, text, format))
    }

    pub fn datasets_of_structure(&self, structure: &str) -> EngineResult<Vec<DataSet>> {
        self.read(|ctx| logic::dataset_io::datasets_of_structure(ctx, structure))
    }

    // ---- subscriptions ----

    pub fn accept_subscription(
        &self,
        first_version_uri: &str,
        callback_url: &str,
        remote_server_uri: Option<&str>,
    ) -> EngineResult<SubscriptionToThis> {
        self.write(|ctx| notify::accept_subscription(ctx, first_version_uri, callback_url, remote_server_uri))
    }

    pub fn cancel_subscription(&self, first_version_uri: &str, callback_url: &str) -> EngineResult<bool> {
        self.write(|ctx| notify::cancel_subscription(ctx, first_version_uri, callback_url))
    }

    pub fn receive_notification(&self, payload: NotificationPayload) -> EngineResult<NotificationReceived> {
        self.write(|ctx| notify::receive_notification(ctx, payload))
    }

    /// Ask a remote server to notify us about a version chain it owns
    pub async fn subscribe_to_remote(
        &self,
        first_version_uri: &str,
        remote_server_uri: &str,
    ) -> EngineResult<SubscriptionToOther> {
        let (url, body) = self.read(|ctx| Ok(notify::subscription_request(ctx, first_version_uri, remote_server_uri)))?;
        let response = self.transport.post_json(&url, &body).await?;
        if !is_success(&response) {
            return Err(EngineError::Transport(format!("{} refused the subscription: {}", url, response)));
        }
        log::info!("Subscribed to {} at {}", first_version_uri, remote_server_uri);
        self.write(|ctx| notify::record_subscription_to_other(ctx, first_version_uri, remote_server_uri))
    }

    // ---- sweeps ----

    pub async fn run_sweep(&self, sweep: Sweep) -> EngineResult<SweepReport> {
        match sweep {
            Sweep::ProcessEvents => {
                let created = self.write(notify::process_events)?;
                Ok(SweepReport {
                    attempted: created,
                    succeeded: created,
                    failed: 0,
                })
            }
            Sweep::SendNotifications => self.send_notifications().await,
            Sweep::ProcessReceived => self.process_received_notifications().await,
            Sweep::RepairDangling => {
                let repaired = self.write(notify::repair_dangling_references)?;
                Ok(SweepReport {
                    attempted: repaired,
                    succeeded: repaired,
                    failed: 0,
                })
            }
        }
    }

    /// Every sweep once, in dependency order. A sweep that fails is
    /// reported as one failed attempt and the rest still run.
    pub async fn run_all_sweeps(&self) -> Vec<(Sweep, SweepReport)> {
        let mut reports = Vec::with_capacity(Sweep::ALL.len());
        for sweep in Sweep::ALL {
            let report = match self.run_sweep(sweep).await {
                Ok(report) => report,
                Err(e) => {
                    log::error!("Sweep {} failed: {}", sweep, e);
                    SweepReport {
                        attempted: 1,
                        succeeded: 0,
                        failed: 1,
                    }
                }
            };
            reports.push((sweep, report));
        }
        reports
    }

    /// POST every unsent notification; only an explicit success marks it sent
    pub async fn send_notifications(&self) -> EngineResult<SweepReport> {
        let pending = self.read(notify::pending_deliveries)?;
        let mut report = SweepReport::default();
        for (notification, payload) in pending {
            report.attempted += 1;
            let body = serde_json::to_value(&payload)?;
            match self.transport.post_json(&notification.callback_url, &body).await {
                Ok(response) if is_success(&response) => {
                    self.write(|ctx| notify::mark_sent(ctx, &notification.id))?;
                    report.succeeded += 1;
                }
                Ok(response) => {
                    log::warn!("{} did not accept notification {}: {}", notification.callback_url, notification.id, response);
                    report.failed += 1;
                }
                Err(e) => {
                    log::warn!("Sending notification {} to {} failed: {}", notification.id, notification.callback_url, e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Fetch and apply datasets announced by servers we subscribed to
    pub async fn process_received_notifications(&self) -> EngineResult<SweepReport> {
        let pending = self.read(|ctx| ctx.draft.list_unprocessed_received())?;
        let mut report = SweepReport::default();
        for received in pending {
            report.attempted += 1;
            let text = match self.transport.get_text(&received.payload.fetch_url).await {
                Ok(text) => text,
                Err(e) => {
                    log::warn!("Fetching {} failed: {}", received.payload.fetch_url, e);
                    report.failed += 1;
                    continue;
                }
            };
            match self.write(|ctx| notify::apply_received(ctx, &received, &text)) {
                Ok(dataset) => {
                    log::info!("Applied {} from {}", dataset.uri, received.payload.notifier_uri);
                    report.succeeded += 1;
                }
                Err(e) => {
                    log::warn!("Applying {} failed: {}", received.payload.dataset_uri, e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

impl KnowledgeEngine<MemoryStore> {
    /// Open both stores from snapshots, starting empty when a file is missing
    pub fn open(
        registry: TypeRegistry,
        server: ServerContext,
        draft_path: &Path,
        materialized_path: &Path,
        transport: Arc<dyn Transport>,
    ) -> EngineResult<Self> {
        Ok(Self::new(
            registry,
            server,
            MemoryStore::open("draft", draft_path)?,
            MemoryStore::open("materialized", materialized_path)?,
            transport,
        ))
    }

    pub fn save_snapshots(&self, draft_path: &Path, materialized_path: &Path) -> EngineResult<()> {
        let _guard = self.lock.read();
        self.draft.save_snapshot(draft_path)?;
        self.materialized.save_snapshot(materialized_path)?;
        log::debug!("Saved snapshots to {} and {}", draft_path.display(), materialized_path.display());
        Ok(())
    }
}
