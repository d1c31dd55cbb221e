use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{EngineError, EngineResult};
use crate::logic::cascade::delete_cascade;
use crate::logic::catalog::{find_structure, shallow_structure, structure_of};
use crate::logic::changes::{affected_views, compute_changes, ChangeSet};
use crate::logic::collect::{collect_by_type, merge_collected, RecordsByType};
use crate::logic::identity::system_uri;
use crate::logic::materialize::Materializer;
use crate::logic::serialize::Serializer;
use crate::logic::versioning::VersionCopier;
use crate::logic::walker::load;
use crate::logic::{atomically, EngineContext};
use crate::model::{
    generate_id, DataSet, DataSetStructure, Event, EventKind, Id, RecordFilter, SerialFormat, VersionNumber, VersionRequest,
    VersionState,
};

/// Version given to a new chain when none is requested
pub const INITIAL_VERSION: VersionNumber = VersionNumber {
    major: 0,
    minor: 1,
    patch: 0,
};

/// What a new dataset is made of
#[derive(Debug, Clone, Default)]
pub struct NewDataSet {
    pub root: Id,
    pub version: Option<VersionNumber>,
    pub description: Option<String>,
    pub version_description: Option<String>,
    pub licenses: Vec<String>,
}

/// Start a version chain rooted at an existing draft record
pub fn create_dataset(ctx: &EngineContext, structure: &str, spec: NewDataSet) -> EngineResult<DataSet> {
    let structure = find_structure(ctx, structure)?;
    create_dataset_of(ctx, &structure, spec)
}

/// Start a version chain for a lone record, using the shallow structure
/// of its type
pub fn create_record_dataset(ctx: &EngineContext, spec: NewDataSet) -> EngineResult<DataSet> {
    let root = load(ctx.draft, &spec.root)?;
    let structure = shallow_structure(ctx, &root.type_name)?;
    create_dataset_of(ctx, &structure, spec)
}

fn create_dataset_of(ctx: &EngineContext, structure: &DataSetStructure, spec: NewDataSet) -> EngineResult<DataSet> {
    if structure.is_view {
        return Err(EngineError::Structure(format!(
            "{} is a view; views are created with a filter",
            structure.name
        )));
    }
    let root = load(ctx.draft, &spec.root)?;
    if root.type_name != structure.root_type() {
        return Err(EngineError::TypeMismatch {
            expected: structure.root_type().to_string(),
            found: root.type_name,
        });
    }

    let mut dataset = DataSet::new(&structure.uri, ctx.server.uri(), spec.version.unwrap_or(INITIAL_VERSION));
    dataset.uri = system_uri(ctx.server, "DataSet", &dataset.id);
    dataset.first_version_uri = dataset.uri.clone();
    dataset.root = Some(root.id);
    dataset.description = spec.description;
    dataset.version_description = spec.version_description;
    dataset.licenses = spec.licenses;
    ctx.draft.save_dataset(dataset.clone())?;
    log::info!("Created dataset {} ({}) of {}", dataset.uri, dataset.version, structure.name);
    Ok(dataset)
}

/// Create a view dataset: a filtered selection with no graph of its own
pub fn create_view(
    ctx: &EngineContext,
    structure: &str,
    filter: RecordFilter,
    description: Option<String>,
) -> EngineResult<DataSet> {
    let structure = find_structure(ctx, structure)?;
    if !structure.is_view {
        return Err(EngineError::Structure(format!("{} is not a view structure", structure.name)));
    }
    let mut view = DataSet::new(&structure.uri, ctx.server.uri(), INITIAL_VERSION);
    view.uri = system_uri(ctx.server, "DataSet", &view.id);
    view.first_version_uri = view.uri.clone();
    view.filter = Some(filter);
    view.description = description;
    ctx.draft.save_dataset(view.clone())?;
    log::info!("Created view {} of {}", view.uri, structure.name);
    Ok(view)
}

fn get_dataset(ctx: &EngineContext, id: &Id) -> EngineResult<DataSet> {
    ctx.draft
        .get_dataset(id)?
        .ok_or_else(|| EngineError::NotFound(format!("DataSet {}", id)))
}

/// A dataset by URI, in the draft store first
pub fn dataset_by_uri(ctx: &EngineContext, uri: &str) -> EngineResult<DataSet> {
    if let Some(dataset) = ctx.draft.get_dataset_by_uri(uri)? {
        return Ok(dataset);
    }
    ctx.materialized
        .get_dataset_by_uri(uri)?
        .ok_or_else(|| EngineError::NotFound(format!("DataSet {}", uri)))
}

/// Copy a dataset's graph into a new working version of its chain
pub fn new_version(ctx: &EngineContext, dataset_id: &Id, request: &VersionRequest) -> EngineResult<DataSet> {
    atomically(&[ctx.draft], || {
        let source = get_dataset(ctx, dataset_id)?;
        if source.is_view() {
            return Err(EngineError::Structure(format!("{} is a view and has no versions", source.uri)));
        }
        if !ctx.server.owns(&source.owner_uri) {
            return Err(EngineError::Structure(format!(
                "{} is owned by {}; only the owner creates versions",
                source.uri, source.owner_uri
            )));
        }

        let chain = ctx.draft.list_version_chain(&source.first_version_uri)?;
        let current = chain.iter().map(|d| d.version).max().unwrap_or(source.version);
        let requested = current
            .apply(request)
            .ok_or(EngineError::VersionNotIncreasing {
                requested: current,
                current,
            })?;
        if requested <= current {
            return Err(EngineError::VersionNotIncreasing { requested, current });
        }

        let structure = structure_of(ctx, &source)?;
        let root_id = source
            .root
            .as_ref()
            .ok_or_else(|| EngineError::Structure(format!("{} has no root", source.uri)))?;
        let root = load(ctx.draft, root_id)?;
        let new_root = VersionCopier::new(ctx, ctx.draft, &structure).copy_root(&root)?;

        let mut dataset = DataSet::new(&source.structure_uri, &source.owner_uri, requested);
        dataset.uri = system_uri(ctx.server, "DataSet", &dataset.id);
        dataset.first_version_uri = source.first_version_uri.clone();
        dataset.root = Some(new_root.id);
        dataset.description = source.description.clone();
        dataset.licenses = source.licenses.clone();
        ctx.draft.save_dataset(dataset.clone())?;
        log::info!("New version {} of {} ({})", requested, source.first_version_uri, dataset.uri);
        Ok(dataset)
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseOutcome {
    pub dataset: DataSet,
    /// False when the dataset was already published
    pub materialized: bool,
    /// Previously released versions that are no longer released
    pub demoted: Vec<String>,
    pub changes: ChangeSet,
    pub events: Vec<Event>,
}

/// Release a dataset and publish its graph.
///
/// Everything happens in one transaction over both stores: on error the
/// release flags, the materialized copy and the removal of the previous
/// release are all rolled back.
pub fn release(ctx: &EngineContext, dataset_id: &Id) -> EngineResult<ReleaseOutcome> {
    atomically(&[ctx.draft, ctx.materialized], || release_in_transaction(ctx, dataset_id))
}

fn release_in_transaction(ctx: &EngineContext, dataset_id: &Id) -> EngineResult<ReleaseOutcome> {
    let mut dataset = get_dataset(ctx, dataset_id)?;
    if dataset.is_view() {
        return Err(EngineError::Structure(format!("{} is a view and cannot be released", dataset.uri)));
    }
    let structure = structure_of(ctx, &dataset)?;
    let chain = ctx.draft.list_version_chain(&dataset.first_version_uri)?;

    let mut demoted = Vec::new();
    if !structure.multiple_releases {
        for mut other in chain.iter().filter(|d| d.released && d.id != dataset.id).cloned() {
            other.released = false;
            demoted.push(other.uri.clone());
            ctx.draft.save_dataset(other)?;
        }
    }
    dataset.released = true;
    dataset.version_released_date = Some(Utc::now());
    ctx.draft.save_dataset(dataset.clone())?;

    if ctx.materialized.get_dataset_by_uri(&dataset.uri)?.is_some() {
        log::info!("{} is already materialized", dataset.uri);
        return Ok(ReleaseOutcome {
            dataset,
            materialized: false,
            demoted,
            changes: ChangeSet::default(),
            events: Vec::new(),
        });
    }

    let mut previous = Vec::new();
    for other in chain.iter().filter(|d| d.id != dataset.id) {
        if let Some(published) = ctx.materialized.get_dataset_by_uri(&other.uri)? {
            previous.push(published);
        }
    }

    let root_id = dataset
        .root
        .as_ref()
        .ok_or_else(|| EngineError::Structure(format!("{} has no root", dataset.uri)))?;
    let root = load(ctx.draft, root_id)?;
    let published_root = Materializer::new(ctx, &structure).materialize_root(&root)?;

    let mut published = dataset.clone();
    published.id = generate_id();
    published.root = Some(published_root.id.clone());
    if !structure.multiple_releases {
        published.first_version_uri = published.uri.clone();
    }
    ctx.materialized.save_dataset(published)?;

    let current = collect_by_type(ctx.materialized, &structure, &published_root)?;
    let mut before = RecordsByType::new();
    if !structure.multiple_releases {
        for old in &previous {
            if let Some(old_root) = old.root.as_ref() {
                let old_root = load(ctx.materialized, old_root)?;
                merge_collected(&mut before, collect_by_type(ctx.materialized, &structure, &old_root)?);
            }
        }
    }
    let changes = compute_changes(ctx, &current, &before, structure.multiple_releases || previous.is_empty());

    let owned = ctx.server.owns(&dataset.owner_uri);
    let views = if owned { affected_views(ctx, &changes)? } else { Vec::new() };

    if !structure.multiple_releases {
        for old in previous {
            if let Some(old_root) = old.root.as_ref() {
                let old_root = load(ctx.materialized, old_root)?;
                delete_cascade(ctx, ctx.materialized, &structure, &old_root)?;
            }
            ctx.materialized.delete_dataset(&old.id)?;
            log::info!("Removed previous release {} from the materialized store", old.uri);
        }
    }

    let mut events = Vec::new();
    if owned {
        events.push(Event::new(&dataset.uri, &dataset.first_version_uri, EventKind::NewVersion));
        for view in views {
            events.push(Event::new(&view.uri, &view.first_version_uri, EventKind::NewVersion));
        }
        for event in &events {
            ctx.draft.save_event(event.clone())?;
        }
    }
    log::info!(
        "Released {} version {} ({} events)",
        dataset.uri,
        dataset.version,
        events.len()
    );
    Ok(ReleaseOutcome {
        dataset,
        materialized: true,
        demoted,
        changes,
        events,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionEntry {
    pub uri: String,
    pub version: VersionNumber,
    pub state: VersionState,
    pub released: bool,
    pub version_released_date: Option<DateTime<Utc>>,
    pub materialized: bool,
    /// SHA-256 of the serialized graph
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub first_version_uri: String,
    pub versions: Vec<VersionEntry>,
}

/// The version chain a dataset belongs to, oldest first
pub fn version_info(ctx: &EngineContext, uri: &str) -> EngineResult<VersionInfo> {
    let dataset = dataset_by_uri(ctx, uri)?;
    let first_version_uri = dataset.first_version_uri.clone();
    let mut chain = ctx.draft.list_version_chain(&first_version_uri)?;
    if chain.is_empty() {
        chain.push(dataset);
    }

    let mut versions = Vec::with_capacity(chain.len());
    for member in &chain {
        versions.push(VersionEntry {
            uri: member.uri.clone(),
            version: member.version,
            state: member.state_in(&chain),
            released: member.released,
            version_released_date: member.version_released_date,
            materialized: ctx.materialized.get_dataset_by_uri(&member.uri)?.is_some(),
            checksum: checksum(ctx, member)?,
        });
    }
    Ok(VersionInfo {
        first_version_uri,
        versions,
    })
}

fn checksum(ctx: &EngineContext, dataset: &DataSet) -> EngineResult<Option<String>> {
    let Some(root_id) = dataset.root.as_ref() else {
        return Ok(None);
    };
    let Some(root) = ctx.draft.get_record(root_id)? else {
        return Ok(None);
    };
    let structure = structure_of(ctx, dataset)?;
    let text = Serializer::new(ctx, ctx.draft, &structure)
        .serialize_root(&root)?
        .render(SerialFormat::Json)?;
    Ok(Some(hex::encode(Sha256::digest(text.as_bytes()))))
}

/// Delete a working dataset and its draft graph
pub fn delete_dataset(ctx: &EngineContext, dataset_id: &Id) -> EngineResult<usize> {
    atomically(&[ctx.draft], || {
        let dataset = get_dataset(ctx, dataset_id)?;
        if dataset.released {
            return Err(EngineError::Structure(format!("{} is released and cannot be deleted", dataset.uri)));
        }
        if dataset.is_first_version() && ctx.draft.list_version_chain(&dataset.uri)?.len() > 1 {
            return Err(EngineError::Structure(format!(
                "{} is the first version of a chain with later versions",
                dataset.uri
            )));
        }
        let mut removed = 0;
        if let Some(root_id) = dataset.root.as_ref() {
            if let Some(root) = ctx.draft.get_record(root_id)? {
                let structure = structure_of(ctx, &dataset)?;
                removed = delete_cascade(ctx, ctx.draft, &structure, &root)?;
            }
        }
        ctx.draft.delete_dataset(&dataset.id)?;
        log::info!("Deleted dataset {} ({} records)", dataset.uri, removed);
        Ok(removed)
    })
}
