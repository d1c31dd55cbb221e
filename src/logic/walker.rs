use std::fmt;

use crate::error::{EngineError, EngineResult};
use crate::logic::identity::persist;
use crate::logic::EngineContext;
use crate::model::{DataSetStructure, Id, Link, NodeId, Record, StructureNode};
use crate::store::Store;

/// What a structure-driven traversal is doing; used in logs and errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkMode {
    Serialize,
    Deserialize,
    CopyNewVersion,
    CopyMaterialize,
    DeleteCascade,
    CollectByType,
}

impl fmt::Display for WalkMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            WalkMode::Serialize => "serialize",
            WalkMode::Deserialize => "deserialize",
            WalkMode::CopyNewVersion => "copy-new-version",
            WalkMode::CopyMaterialize => "copy-materialize",
            WalkMode::DeleteCascade => "delete-cascade",
            WalkMode::CollectByType => "collect-by-type",
        };
        f.write_str(name)
    }
}

/// Children of one structure node grouped by how walkers treat them
pub struct NodeChildren<'s> {
    pub to_one: Vec<(NodeId, &'s StructureNode)>,
    pub to_many: Vec<(NodeId, &'s StructureNode)>,
    pub external: Vec<(NodeId, &'s StructureNode)>,
}

impl<'s> NodeChildren<'s> {
    pub fn of(structure: &'s DataSetStructure, node_id: NodeId) -> Self {
        let mut children = NodeChildren {
            to_one: Vec::new(),
            to_many: Vec::new(),
            external: Vec::new(),
        };
        for (id, node) in structure.children(node_id) {
            if node.is_external_reference {
                children.external.push((id, node));
            } else if node.is_many {
                children.to_many.push((id, node));
            } else {
                children.to_one.push((id, node));
            }
        }
        children
    }

    /// Owned children, to-one first
    pub fn owned(&self) -> impl Iterator<Item = &(NodeId, &'s StructureNode)> {
        self.to_one.iter().chain(self.to_many.iter())
    }

    pub fn covers(&self, attribute: &str) -> bool {
        self.to_one
            .iter()
            .chain(self.to_many.iter())
            .chain(self.external.iter())
            .any(|(_, n)| n.attribute == attribute)
    }
}

/// Key of the visited set: the URI, or a pending key before one is assigned
pub fn visit_key(record: &Record) -> String {
    if record.uri.is_empty() {
        format!("pending:{}", record.id)
    } else {
        record.uri.clone()
    }
}

pub fn structure_node<'s>(
    structure: &'s DataSetStructure,
    node_id: NodeId,
    mode: WalkMode,
) -> EngineResult<&'s StructureNode> {
    structure.node(node_id).ok_or_else(|| {
        EngineError::Structure(format!(
            "{}: structure {} has no node {}",
            mode, structure.name, node_id
        ))
    })
}

pub fn check_type(record: &Record, node: &StructureNode) -> EngineResult<()> {
    if record.type_name != node.type_name {
        return Err(EngineError::TypeMismatch {
            expected: node.type_name.clone(),
            found: record.type_name.clone(),
        });
    }
    Ok(())
}

pub fn load(store: &dyn Store, id: &Id) -> EngineResult<Record> {
    store
        .get_record(id)?
        .ok_or_else(|| EngineError::NotFound(format!("Record {}", id)))
}

/// Inverse (parent) link of a to-many reference, from the type registry
pub fn inverse_of(ctx: &EngineContext, type_name: &str, attribute: &str) -> Option<String> {
    ctx.registry
        .reference(type_name, attribute)
        .and_then(|r| r.inverse.clone())
}

/// Point `child`'s parent link at `parent` when it does not already
pub fn set_parent_link(store: &dyn Store, child_id: &Id, inverse: &str, parent_id: &Id) -> EngineResult<()> {
    let Some(mut child) = store.get_record(child_id)? else {
        log::debug!("Parent link {} of {} skipped: record not saved yet", inverse, child_id);
        return Ok(());
    };
    if child.link_one(inverse) == Some(parent_id) {
        return Ok(());
    }
    child
        .links
        .insert(inverse.to_string(), Link::One(Some(parent_id.clone())));
    child.touch();
    store.save_record(child)
}

/// Save in two steps when the record links to itself: first with the
/// self-links nulled, then patched to point at the saved record.
pub fn save_two_phase(ctx: &EngineContext, store: &dyn Store, record: Record) -> EngineResult<Record> {
    let self_links = record.self_links();
    if self_links.is_empty() {
        return persist(ctx, store, record);
    }

    let mut first = record;
    for name in &self_links {
        first.links.insert(name.clone(), Link::One(None));
    }
    let mut saved = persist(ctx, store, first)?;
    for name in self_links {
        saved.links.insert(name, Link::One(Some(saved.id.clone())));
    }
    store.save_record(saved.clone())?;
    Ok(saved)
}
