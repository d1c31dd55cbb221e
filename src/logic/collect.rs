use std::collections::{BTreeMap, HashSet};

use crate::error::EngineResult;
use crate::logic::record_filter::RecordFilterEvaluator;
use crate::logic::walker::{check_type, structure_node, NodeChildren, WalkMode};
use crate::model::{DataSet, DataSetStructure, Id, NodeId, Record};
use crate::store::Store;

/// Owned records of a graph grouped by type name
pub type RecordsByType = BTreeMap<String, Vec<Record>>;

pub fn collect_by_type(store: &dyn Store, structure: &DataSetStructure, root: &Record) -> EngineResult<RecordsByType> {
    let mut visited = HashSet::new();
    let mut collected = RecordsByType::new();
    collect(store, structure, root, structure.root, &mut visited, &mut collected)?;
    Ok(collected)
}

fn collect(
    store: &dyn Store,
    structure: &DataSetStructure,
    record: &Record,
    node_id: NodeId,
    visited: &mut HashSet<Id>,
    collected: &mut RecordsByType,
) -> EngineResult<()> {
    let node = structure_node(structure, node_id, WalkMode::CollectByType)?;
    check_type(record, node)?;
    if node.is_external_reference || !visited.insert(record.id.clone()) {
        return Ok(());
    }
    collected
        .entry(record.type_name.clone())
        .or_default()
        .push(record.clone());

    for (child_id, child) in NodeChildren::of(structure, node_id).owned() {
        let targets = record
            .links
            .get(&child.attribute)
            .map(|link| link.targets())
            .unwrap_or_default();
        for target_id in targets {
            if let Some(target) = store.get_record(&target_id)? {
                collect(store, structure, &target, *child_id, visited, collected)?;
            }
        }
    }
    Ok(())
}

/// Add the records of `other` that `into` does not hold yet
pub fn merge_collected(into: &mut RecordsByType, other: RecordsByType) {
    for (type_name, records) in other {
        let bucket = into.entry(type_name).or_default();
        for record in records {
            if !bucket.iter().any(|r| r.id == record.id) {
                bucket.push(record);
            }
        }
    }
}

/// Root instances a view currently selects in `store`
pub fn view_instances(store: &dyn Store, view: &DataSet) -> EngineResult<Vec<Record>> {
    let Some(filter) = &view.filter else {
        return Ok(Vec::new());
    };
    let candidates = store.filter_records(filter)?;
    Ok(RecordFilterEvaluator::filter_records(candidates, filter))
}
