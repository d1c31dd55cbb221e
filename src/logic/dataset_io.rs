use std::collections::HashSet;

use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::logic::catalog::{
    export_structure, find_structure, register_structure, shallow_structure, structure_from_serial, structure_of,
};
use crate::logic::collect::view_instances;
use crate::logic::deserialize::Deserializer;
use crate::logic::identity::{is_local, parse_uri};
use crate::logic::materialize::Materializer;
use crate::logic::release::dataset_by_uri;
use crate::logic::serialize::Serializer;
use crate::logic::walker::load;
use crate::logic::{atomically, EngineContext};
use crate::model::{
    generate_id, DanglingReference, DataSet, DataSetStructure, KnowledgeServer, Record, RecordFilter, SerialFormat,
    SerialNode, VersionNumber, IMPORTED_FROM_ATTRIBUTE, URI_ATTRIBUTE,
};
use crate::store::Store;

pub const DATASET_TAG: &str = "DataSet";
pub const STRUCTURE_TAG: &str = "DataSetStructure";
pub const OWNER_TAG: &str = "owner";
pub const FIRST_VERSION_TAG: &str = "first_version";
pub const INSTANCE_TAG: &str = "ActualInstance";
pub const INSTANCES_TAG: &str = "ActualInstances";

/// The store holding the graph to publish: the materialized copy once
/// released, the working copy before that
fn graph_source<'a>(ctx: &EngineContext<'a>, dataset: &DataSet) -> EngineResult<(&'a dyn Store, Option<DataSet>)> {
    match ctx.materialized.get_dataset_by_uri(&dataset.uri)? {
        Some(published) => Ok((ctx.materialized, Some(published))),
        None => Ok((ctx.draft, None)),
    }
}

fn server_name(ctx: &EngineContext, uri: &str) -> EngineResult<Option<String>> {
    if ctx.server.owns(uri) {
        return Ok(Some(ctx.server.server.name.clone()));
    }
    Ok(ctx.draft.get_server_by_uri(uri)?.map(|s| s.name))
}

/// A dataset with its metadata and graph, in wire form
pub fn export_dataset(ctx: &EngineContext, uri: &str) -> EngineResult<SerialNode> {
    let dataset = dataset_by_uri(ctx, uri)?;
    let structure = structure_of(ctx, &dataset)?;

    let mut serial = SerialNode::record(DATASET_TAG)
        .attr(URI_ATTRIBUTE, dataset.uri.as_str())
        .attr("version", dataset.version.to_string())
        .attr("released", dataset.released);
    if let Some(imported) = &dataset.imported_from_uri {
        serial.set_attr(IMPORTED_FROM_ATTRIBUTE, imported.as_str());
    }
    if let Some(description) = &dataset.description {
        serial.set_attr("description", description.as_str());
    }
    if let Some(version_description) = &dataset.version_description {
        serial.set_attr("version_description", version_description.as_str());
    }
    if let Some(date) = &dataset.version_released_date {
        serial.set_attr("version_released_date", date.to_rfc3339());
    }
    if !dataset.licenses.is_empty() {
        serial.set_attr("licenses", dataset.licenses.join(" "));
    }
    if let Some(filter) = &dataset.filter {
        serial.set_attr("filter", serde_json::to_string(filter)?);
    }

    serial.push(export_structure(&structure));
    let mut owner = SerialNode::record(OWNER_TAG).attr(URI_ATTRIBUTE, dataset.owner_uri.as_str());
    if let Some(name) = server_name(ctx, &dataset.owner_uri)? {
        owner.set_attr("name", name);
    }
    serial.push(owner);

    if dataset.is_view() {
        let instances = view_instances(ctx.materialized, &dataset)?;
        let mut serializer = Serializer::new(ctx, ctx.materialized, &structure);
        let mut items = Vec::with_capacity(instances.len());
        for record in &instances {
            items.push(serializer.serialize_root(record)?);
        }
        serial.push(SerialNode::collection(INSTANCES_TAG, items));
        return Ok(serial);
    }

    serial.push(SerialNode::record(FIRST_VERSION_TAG).attr(URI_ATTRIBUTE, dataset.first_version_uri.as_str()));
    let (store, published) = graph_source(ctx, &dataset)?;
    let root_id = published
        .and_then(|p| p.root)
        .or_else(|| dataset.root.clone())
        .ok_or_else(|| EngineError::Structure(format!("{} has no root", dataset.uri)))?;
    let root = load(store, &root_id)?;
    let instance = Serializer::new(ctx, store, &structure).serialize_root(&root)?;
    serial.push(SerialNode::collection(INSTANCE_TAG, vec![instance]));
    Ok(serial)
}

pub fn export_dataset_text(ctx: &EngineContext, uri: &str, format: SerialFormat) -> EngineResult<String> {
    export_dataset(ctx, uri)?.render(format)
}

/// A single record, published copy first, following the shallow structure
/// of its type: scalars in full and every reference as a stub
pub fn export_record(ctx: &EngineContext, uri: &str) -> EngineResult<SerialNode> {
    let (store, record) = match ctx.materialized.get_record_by_uri(uri)? {
        Some(record) => (ctx.materialized, record),
        None => match ctx.draft.get_record_by_uri(uri)? {
            Some(record) => (ctx.draft, record),
            None => return Err(EngineError::NotFound(format!("Record {}", uri))),
        },
    };
    let structure = shallow_structure(ctx, &record.type_name)?;
    Serializer::new(ctx, store, &structure).serialize_root(&record)
}

/// Every dataset (views included) built from a structure
pub fn datasets_of_structure(ctx: &EngineContext, structure: &str) -> EngineResult<Vec<DataSet>> {
    let structure = find_structure(ctx, structure)?;
    let mut datasets = ctx.draft.list_datasets_for_structure(&structure.uri)?;
    datasets.sort_by(|a, b| {
        a.first_version_uri
            .cmp(&b.first_version_uri)
            .then(a.version.cmp(&b.version))
    });
    Ok(datasets)
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub dataset: DataSet,
    /// External references left unresolved, kept for later repair
    pub dangling: usize,
}

/// Import a dataset exported by this or another server into the draft store
pub fn import_dataset(ctx: &EngineContext, text: &str, format: SerialFormat) -> EngineResult<ImportOutcome> {
    let serial = SerialNode::parse(text, format)?;
    import_serial(ctx, &serial)
}

pub fn import_serial(ctx: &EngineContext, serial: &SerialNode) -> EngineResult<ImportOutcome> {
    if serial.tag() != DATASET_TAG {
        return Err(EngineError::Format(format!("Expected <{}>, found <{}>", DATASET_TAG, serial.tag())));
    }
    let uri = serial
        .uri()
        .ok_or_else(|| EngineError::Format("DataSet without URI".to_string()))?;
    if find_imported(ctx, &uri)?.is_some() {
        return Err(EngineError::AlreadyExists(format!("DataSet {}", uri)));
    }

    let structure_ref = serial
        .child(STRUCTURE_TAG)
        .ok_or_else(|| EngineError::Format("DataSet without structure".to_string()))?;

    let owner_uri = match serial.child(OWNER_TAG).and_then(|o| o.uri()) {
        Some(owner) => owner,
        None => parse_uri(&uri)?.base,
    };
    let version: VersionNumber = match serial.attr_text("version") {
        Some(text) => text.parse().map_err(EngineError::Format)?,
        None => VersionNumber::default(),
    };
    let filter: Option<RecordFilter> = match serial.attr_text("filter") {
        Some(json) => Some(serde_json::from_str(&json)?),
        None => None,
    };

    atomically(&[ctx.draft], || {
        let structure = import_structure(ctx, structure_ref)?;
        if !ctx.server.owns(&owner_uri) && ctx.draft.get_server_by_uri(&owner_uri)?.is_none() {
            let name = serial
                .child(OWNER_TAG)
                .and_then(|o| o.attr_text("name"))
                .unwrap_or_else(|| owner_uri.clone());
            ctx.draft.save_server(KnowledgeServer::new(&owner_uri, &name))?;
            log::info!("Registered knowledge server {}", owner_uri);
        }

        let mut deserializer = Deserializer::new(ctx, ctx.draft, &structure).for_dataset(&uri);
        let mut dataset = DataSet::new(&structure.uri, &owner_uri, version);
        dataset.id = generate_id();
        dataset.uri = uri.clone();
        if !is_local(ctx.server, &uri) {
            dataset.imported_from_uri = Some(uri.clone());
        }
        dataset.description = serial.attr_text("description");
        dataset.version_description = serial.attr_text("version_description");
        dataset.licenses = serial
            .attr_text("licenses")
            .map(|l| l.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        match filter {
            Some(filter) => {
                let instances = serial
                    .child(INSTANCES_TAG)
                    .ok_or_else(|| EngineError::Format("View without ActualInstances".to_string()))?;
                for item in instances.items() {
                    deserializer.deserialize_root(item)?;
                }
                dataset.filter = Some(filter);
                dataset.first_version_uri = uri.clone();
            }
            None => {
                let instance = serial
                    .child(INSTANCE_TAG)
                    .and_then(|c| c.items().first())
                    .ok_or_else(|| EngineError::Format("DataSet without ActualInstance".to_string()))?;
                dataset.root = Some(deserializer.deserialize_root(instance)?);
                dataset.first_version_uri = serial
                    .child(FIRST_VERSION_TAG)
                    .and_then(|f| f.uri())
                    .unwrap_or_else(|| uri.clone());
            }
        }

        let dangling = deserializer.take_dangling();
        record_dangling(ctx, &dangling)?;
        ctx.draft.save_dataset(dataset.clone())?;
        log::info!(
            "Imported dataset {} version {} ({} dangling references)",
            dataset.uri,
            dataset.version,
            dangling.len()
        );
        Ok(ImportOutcome {
            dataset,
            dangling: dangling.len(),
        })
    })
}

/// The local structure a received dataset is built from.
///
/// Looked up by URI, then by name. A structure unknown here is rebuilt
/// from the definition embedded in the document: shallow ones through
/// [`shallow_structure`], others by registering the definition.
fn import_structure(ctx: &EngineContext, structure_ref: &SerialNode) -> EngineResult<DataSetStructure> {
    let name = structure_ref.attr_text("name").unwrap_or_default();
    let keys = structure_ref.uri().into_iter().chain(std::iter::once(name.clone()));
    for key in keys {
        match find_structure(ctx, &key) {
            Ok(structure) => return Ok(structure),
            Err(EngineError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        }
    }

    let root_type = structure_ref.child("root").and_then(|root| root.attr_text("type"));
    match root_type {
        Some(root_type) if structure_ref.flag("isShallow") => shallow_structure(ctx, &root_type),
        Some(_) => {
            let definition = structure_from_serial(structure_ref)?;
            log::info!("Registering structure {} received with a dataset", definition.name);
            register_structure(ctx, definition)
        }
        None => Err(EngineError::NotFound(format!("Structure {}", name))),
    }
}

/// Save unresolved references, skipping ones already on record
fn record_dangling(ctx: &EngineContext, dangling: &[DanglingReference]) -> EngineResult<()> {
    let known = ctx.draft.list_unresolved_dangling()?;
    for reference in dangling {
        let recorded = known.iter().any(|k| {
            k.holder_id == reference.holder_id
                && k.attribute == reference.attribute
                && k.target_uri == reference.target_uri
        });
        if !recorded {
            ctx.draft.save_dangling(reference.clone())?;
        }
    }
    Ok(())
}

/// Apply a view announced by its owner.
///
/// The selected records are imported into the draft store and published
/// in the materialized store; earlier members no longer selected and not
/// linked from any published record are removed.
pub fn apply_view(ctx: &EngineContext, serial: &SerialNode) -> EngineResult<DataSet> {
    let uri = serial
        .uri()
        .ok_or_else(|| EngineError::Format("DataSet without URI".to_string()))?;
    let view = match find_imported(ctx, &uri)? {
        Some(existing) => existing,
        None => import_serial(ctx, serial)?.dataset,
    };
    if !view.is_view() {
        return Err(EngineError::Structure(format!("{} is not a view", view.uri)));
    }
    let structure = structure_of(ctx, &view)?;
    let instances = serial
        .child(INSTANCES_TAG)
        .ok_or_else(|| EngineError::Format("View without ActualInstances".to_string()))?;

    atomically(&[ctx.draft, ctx.materialized], || {
        let mut deserializer = Deserializer::new(ctx, ctx.draft, &structure).for_dataset(&view.uri);
        let mut roots = Vec::with_capacity(instances.items().len());
        for item in instances.items() {
            roots.push(deserializer.deserialize_root(item)?);
        }
        record_dangling(ctx, &deserializer.take_dangling())?;

        let mut view = view.clone();
        if let Some(json) = serial.attr_text("filter") {
            view.filter = Some(serde_json::from_str(&json)?);
        }
        if let Some(description) = serial.attr_text("description") {
            view.description = Some(description);
        }
        ctx.draft.save_dataset(view.clone())?;

        let before: Vec<Record> = view_instances(ctx.materialized, &view)?;
        let mut published = HashSet::with_capacity(roots.len());
        for id in &roots {
            let record = load(ctx.draft, id)?;
            published.insert(Materializer::new(ctx, &structure).materialize_root(&record)?.uri);
        }
        for stale in before.into_iter().filter(|r| !published.contains(&r.uri)) {
            if ctx.materialized.list_referrers(&stale.id)?.is_empty() {
                ctx.materialized.delete_record(&stale.id)?;
            }
        }
        log::info!("Applied view {} ({} records)", view.uri, published.len());
        Ok(view)
    })
}

/// A dataset already present under `uri`, or imported from it
pub fn find_imported(ctx: &EngineContext, uri: &str) -> EngineResult<Option<DataSet>> {
    if let Some(dataset) = ctx.draft.get_dataset_by_uri(uri)? {
        return Ok(Some(dataset));
    }
    Ok(ctx
        .draft
        .list_datasets()?
        .into_iter()
        .find(|d| d.imported_from_uri.as_deref() == Some(uri)))
}
