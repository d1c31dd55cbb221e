use std::collections::{BTreeMap, HashSet};

use crate::error::{EngineError, EngineResult};
use crate::logic::walker::{check_type, structure_node, NodeChildren, WalkMode};
use crate::logic::EngineContext;
use crate::model::{DataSetStructure, Id, NodeId, Record};
use crate::store::Store;

/// Owned records reachable from `root`, children before parents
pub fn plan_cascade(store: &dyn Store, structure: &DataSetStructure, root: &Record) -> EngineResult<Vec<Record>> {
    let mut visited = HashSet::new();
    let mut doomed = Vec::new();
    collect_owned(store, structure, root, structure.root, &mut visited, &mut doomed)?;
    Ok(doomed)
}

fn collect_owned(
    store: &dyn Store,
    structure: &DataSetStructure,
    record: &Record,
    node_id: NodeId,
    visited: &mut HashSet<Id>,
    doomed: &mut Vec<Record>,
) -> EngineResult<()> {
    let node = structure_node(structure, node_id, WalkMode::DeleteCascade)?;
    check_type(record, node)?;
    if node.is_external_reference || !visited.insert(record.id.clone()) {
        return Ok(());
    }
    let children = NodeChildren::of(structure, node_id);
    for (child_id, child) in children.owned() {
        let targets = record
            .links
            .get(&child.attribute)
            .map(|link| link.targets())
            .unwrap_or_default();
        for target_id in targets {
            if let Some(target) = store.get_record(&target_id)? {
                collect_owned(store, structure, &target, *child_id, visited, doomed)?;
            }
        }
    }
    doomed.push(record.clone());
    Ok(())
}

/// Follow the `previous_version_uri` chain forward from `record` until a
/// live record in `store` is found. Successors are looked up in both stores.
pub fn find_successor(
    ctx: &EngineContext,
    store: &dyn Store,
    record: &Record,
    doomed: &HashSet<Id>,
) -> EngineResult<Option<Id>> {
    let mut uri = record.uri.clone();
    let mut seen = HashSet::new();
    while seen.insert(uri.clone()) {
        let mut candidates: Vec<String> = Vec::new();
        for candidate in ctx
            .draft
            .list_successors(&uri)?
            .into_iter()
            .chain(ctx.materialized.list_successors(&uri)?)
        {
            if !candidates.contains(&candidate.uri) {
                candidates.push(candidate.uri);
            }
        }
        match candidates.len() {
            0 => return Ok(None),
            1 => {}
            _ => {
                return Err(EngineError::AmbiguousSuccessor {
                    uri,
                    candidates,
                })
            }
        }
        let successor_uri = candidates.remove(0);
        if let Some(successor) = store.get_record_by_uri(&successor_uri)? {
            if !doomed.contains(&successor.id) {
                return Ok(Some(successor.id));
            }
        }
        uri = successor_uri;
    }
    Ok(None)
}

/// Delete the owned graph under `root` from `store`.
///
/// Records outside the graph that still point at a doomed record are moved
/// to its successor, or have the link cleared when there is none. Every
/// successor is resolved before anything is deleted, so an ambiguous
/// successor leaves the store untouched.
pub fn delete_cascade(
    ctx: &EngineContext,
    store: &dyn Store,
    structure: &DataSetStructure,
    root: &Record,
) -> EngineResult<usize> {
    let doomed = plan_cascade(store, structure, root)?;
    let doomed_ids: HashSet<Id> = doomed.iter().map(|r| r.id.clone()).collect();

    // referrer -> [(doomed, successor)]
    let mut retargets: BTreeMap<Id, Vec<(Id, Option<Id>)>> = BTreeMap::new();
    for record in &doomed {
        let referrers: Vec<Record> = store
            .list_referrers(&record.id)?
            .into_iter()
            .filter(|r| !doomed_ids.contains(&r.id))
            .collect();
        if referrers.is_empty() {
            continue;
        }
        let successor = find_successor(ctx, store, record, &doomed_ids)?;
        match &successor {
            Some(id) => log::debug!("Moving {} referrers of {} to {}", referrers.len(), record.uri, id),
            None => log::warn!("{} has {} referrers and no successor, clearing links", record.uri, referrers.len()),
        }
        for referrer in referrers {
            retargets
                .entry(referrer.id)
                .or_default()
                .push((record.id.clone(), successor.clone()));
        }
    }

    for (referrer_id, moves) in retargets {
        let Some(mut referrer) = store.get_record(&referrer_id)? else {
            continue;
        };
        for link in referrer.links.values_mut() {
            for (from, to) in &moves {
                link.retarget(from, to.as_ref());
            }
        }
        referrer.touch();
        store.save_record(referrer)?;
    }

    for record in &doomed {
        store.delete_record(&record.id)?;
    }
    log::info!("{}: removed {} records under {}", WalkMode::DeleteCascade, doomed.len(), root.uri);
    Ok(doomed.len())
}
