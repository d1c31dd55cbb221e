pub mod cascade;
pub mod catalog;
pub mod changes;
pub mod collect;
pub mod context;
pub mod dataset_io;
pub mod deserialize;
pub mod identity;
pub mod materialize;
pub mod notify;
pub mod record_filter;
pub mod release;
pub mod serialize;
pub mod versioning;
pub mod walker;

pub use cascade::{delete_cascade, plan_cascade};
pub use catalog::{export_structure, find_structure, register_structure, shallow_structure, structure_from_serial};
pub use changes::{ChangeSet, TypeDelta};
pub use collect::{collect_by_type, view_instances, RecordsByType};
pub use context::{atomically, EngineContext};
pub use dataset_io::{apply_view, export_dataset, export_dataset_text, export_record, import_dataset, ImportOutcome};
pub use deserialize::Deserializer;
pub use identity::{generate_uri, parse_uri, resolve, ParsedUri, Resolution};
pub use materialize::Materializer;
pub use record_filter::{FieldPath, FilterExpr, RecordFilterEvaluator};
pub use release::{
    create_dataset, create_record_dataset, create_view, delete_dataset, new_version, release, version_info, NewDataSet,
    ReleaseOutcome, VersionEntry, VersionInfo,
};
pub use serialize::Serializer;
pub use versioning::VersionCopier;
pub use walker::WalkMode;
