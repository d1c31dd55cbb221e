use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::logic::identity::{resolve, Resolution};
use crate::logic::walker::{check_type, load, structure_node, visit_key, NodeChildren, WalkMode};
use crate::logic::EngineContext;
use crate::model::{generate_id, DataSetStructure, Id, Link, NodeId, Record};

/// Copies a draft graph into the materialized store, keeping every URI.
///
/// Primary keys are local to each store: a record already materialized
/// under the same URI is overwritten in place, others get a new key.
pub struct Materializer<'a> {
    ctx: &'a EngineContext<'a>,
    structure: &'a DataSetStructure,
    processed: HashMap<String, Id>,
    /// draft primary key -> materialized primary key
    copied: HashMap<Id, Id>,
    uncovered: Vec<(Id, String)>,
}

impl<'a> Materializer<'a> {
    pub fn new(ctx: &'a EngineContext<'a>, structure: &'a DataSetStructure) -> Self {
        Self {
            ctx,
            structure,
            processed: HashMap::new(),
            copied: HashMap::new(),
            uncovered: Vec::new(),
        }
    }

    /// Materialize the graph rooted at the draft record `root`; returns the materialized root
    pub fn materialize_root(mut self, root: &Record) -> EngineResult<Record> {
        let root_id = self.copy(root, self.structure.root)?;
        self.remap_uncovered()?;
        log::info!("Materialized {} records under {}", self.copied.len(), root.uri);
        load(self.ctx.materialized, &root_id)
    }

    fn copy(&mut self, source: &Record, node_id: NodeId) -> EngineResult<Id> {
        let structure = self.structure;
        let node = structure_node(structure, node_id, WalkMode::CopyMaterialize)?;
        check_type(source, node)?;
        if source.uri.is_empty() {
            return Err(EngineError::Unresolved(format!(
                "{} {} has no URI and cannot be materialized",
                source.type_name, source.id
            )));
        }

        let key = visit_key(source);
        if let Some(id) = self.processed.get(&key) {
            return Ok(id.clone());
        }

        let materialized = self.ctx.materialized;
        let mut copy = source.clone();
        copy.id = match materialized.get_record_by_uri(&source.uri)? {
            Some(existing) => existing.id,
            None => generate_id(),
        };
        self.processed.insert(key, copy.id.clone());
        self.copied.insert(source.id.clone(), copy.id.clone());

        let children = NodeChildren::of(structure, node_id);
        for name in copy.links.keys() {
            if !children.covers(name) {
                self.uncovered.push((copy.id.clone(), name.clone()));
            }
        }

        for (_, child) in &children.external {
            let link = match source.links.get(&child.attribute) {
                Some(Link::One(Some(target))) => Link::One(Some(self.resolve_external(source, &child.attribute, target)?)),
                Some(Link::Many(targets)) => {
                    let mut resolved = Vec::with_capacity(targets.len());
                    for target in targets {
                        resolved.push(self.resolve_external(source, &child.attribute, target)?);
                    }
                    Link::Many(resolved)
                }
                _ => continue,
            };
            copy.links.insert(child.attribute.clone(), link);
        }

        for (child_id, child) in &children.to_one {
            let Some(target_id) = source.link_one(&child.attribute).cloned() else {
                continue;
            };
            let new_target = if target_id == source.id {
                Some(copy.id.clone())
            } else {
                match self.ctx.draft.get_record(&target_id)? {
                    Some(target) => Some(self.copy(&target, *child_id)?),
                    None => None,
                }
            };
            copy.links.insert(child.attribute.clone(), Link::One(new_target));
        }
        for (_, child) in &children.to_many {
            copy.links.insert(child.attribute.clone(), Link::Many(Vec::new()));
        }

        // Materialization never mints URIs, so the two-phase save is plain
        // here: self-links already carry the materialized key.
        copy.touch();
        materialized.save_record(copy.clone())?;

        for (child_id, child) in &children.to_many {
            for target_id in source.link_many(&child.attribute) {
                let Some(target) = self.ctx.draft.get_record(target_id)? else {
                    log::warn!("{}.{} points at missing record {}", source.uri, child.attribute, target_id);
                    continue;
                };
                let new_id = self.copy(&target, *child_id)?;
                copy.push_link(&child.attribute, &new_id);
            }
        }
        if !children.to_many.is_empty() {
            materialized.save_record(copy.clone())?;
        }
        Ok(copy.id)
    }

    /// An external target must already be published under the same URI
    /// (or be an import of it)
    fn resolve_external(&self, holder: &Record, attribute: &str, target: &Id) -> EngineResult<Id> {
        let target = load(self.ctx.draft, target)?;
        match resolve(self.ctx, self.ctx.materialized, &target.uri)? {
            Resolution::Local(found) => Ok(found.id),
            _ => Err(EngineError::DanglingReference {
                uri: target.uri,
                holder: format!("{}.{}", holder.uri, attribute),
            }),
        }
    }

    /// Links outside the structure are remapped by URI; targets that are not
    /// materialized are dropped.
    fn remap_uncovered(&mut self) -> EngineResult<()> {
        let materialized = self.ctx.materialized;
        for (id, attribute) in std::mem::take(&mut self.uncovered) {
            let mut record = load(materialized, &id)?;
            let Some(link) = record.links.get_mut(&attribute) else {
                continue;
            };
            for target in link.targets() {
                let mapped = match self.copied.get(&target) {
                    Some(mapped) => Some(mapped.clone()),
                    None => match self.ctx.draft.get_record(&target)? {
                        Some(draft_target) => materialized
                            .get_record_by_uri(&draft_target.uri)?
                            .map(|r| r.id),
                        None => None,
                    },
                };
                if mapped.is_none() {
                    log::debug!("Dropping {}.{} -> {}: not materialized", record.uri, attribute, target);
                }
                link.retarget(&target, mapped.as_ref());
            }
            materialized.save_record(record)?;
        }
        Ok(())
    }
}
