use std::collections::HashMap;

use crate::error::EngineResult;
use crate::logic::walker::{
    check_type, inverse_of, load, save_two_phase, set_parent_link, structure_node, visit_key, NodeChildren, WalkMode,
};
use crate::logic::EngineContext;
use crate::model::{generate_id, DataSetStructure, Id, Link, NodeId, Record};
use crate::store::Store;

/// Copies an owned record graph into a new version inside the same store.
///
/// Copies get fresh identities and point back at their source through
/// `previous_version_uri`. External references keep pointing at the
/// original records.
pub struct VersionCopier<'a> {
    ctx: &'a EngineContext<'a>,
    store: &'a dyn Store,
    structure: &'a DataSetStructure,
    processed: HashMap<String, Id>,
    /// source primary key -> copy primary key
    copied: HashMap<Id, Id>,
    /// links outside the structure, remapped once the whole graph is copied
    uncovered: Vec<(Id, String)>,
}

impl<'a> VersionCopier<'a> {
    pub fn new(ctx: &'a EngineContext<'a>, store: &'a dyn Store, structure: &'a DataSetStructure) -> Self {
        Self {
            ctx,
            store,
            structure,
            processed: HashMap::new(),
            copied: HashMap::new(),
            uncovered: Vec::new(),
        }
    }

    /// Copy the graph rooted at `root` and return the new root
    pub fn copy_root(mut self, root: &Record) -> EngineResult<Record> {
        let root_id = self.copy(root, self.structure.root, None)?;
        self.remap_uncovered()?;
        log::debug!("{}: {} records copied from {}", WalkMode::CopyNewVersion, self.copied.len(), root.uri);
        load(self.store, &root_id)
    }

    fn copy(&mut self, source: &Record, node_id: NodeId, parent: Option<(&Id, &str)>) -> EngineResult<Id> {
        let structure = self.structure;
        let node = structure_node(structure, node_id, WalkMode::CopyNewVersion)?;
        check_type(source, node)?;

        let key = visit_key(source);
        if let Some(id) = self.processed.get(&key).cloned() {
            if let Some((parent_id, inverse)) = parent {
                set_parent_link(self.store, &id, inverse, parent_id)?;
            }
            return Ok(id);
        }

        let mut copy = source.clone();
        copy.id = generate_id();
        copy.uri = String::new();
        copy.imported_from_uri = None;
        copy.previous_version_uri = (!source.uri.is_empty()).then(|| source.uri.clone());
        self.processed.insert(key, copy.id.clone());
        self.copied.insert(source.id.clone(), copy.id.clone());

        let children = NodeChildren::of(structure, node_id);
        for (name, link) in copy.links.iter_mut() {
            if !children.covers(name) {
                self.uncovered.push((copy.id.clone(), name.clone()));
            }
            if let Link::Many(targets) = link {
                if children.to_many.iter().any(|(_, c)| &c.attribute == name) {
                    targets.clear();
                }
            }
        }
        if let Some((parent_id, inverse)) = parent {
            copy.links
                .insert(inverse.to_string(), Link::One(Some(parent_id.clone())));
        }

        for (child_id, child) in &children.to_one {
            let Some(target_id) = source.link_one(&child.attribute).cloned() else {
                continue;
            };
            let new_target = if target_id == source.id {
                Some(copy.id.clone())
            } else {
                match self.store.get_record(&target_id)? {
                    Some(target) => Some(self.copy(&target, *child_id, None)?),
                    None => {
                        log::warn!("{}.{} points at missing record {}", source.uri, child.attribute, target_id);
                        None
                    }
                }
            };
            copy.links.insert(child.attribute.clone(), Link::One(new_target));
        }
        let mut copy = save_two_phase(self.ctx, self.store, copy)?;

        for (child_id, child) in &children.to_many {
            let inverse = inverse_of(self.ctx, &source.type_name, &child.attribute);
            for target_id in source.link_many(&child.attribute) {
                let Some(target) = self.store.get_record(target_id)? else {
                    log::warn!("{}.{} points at missing record {}", source.uri, child.attribute, target_id);
                    continue;
                };
                let parent = inverse.as_deref().map(|inv| (&copy.id, inv));
                let new_id = self.copy(&target, *child_id, parent)?;
                copy.push_link(&child.attribute, &new_id);
            }
        }
        if !children.to_many.is_empty() {
            self.store.save_record(copy.clone())?;
        }
        Ok(copy.id)
    }

    /// Links the structure does not describe follow the copy when their
    /// target was copied too, and keep pointing at the original otherwise.
    fn remap_uncovered(&mut self) -> EngineResult<()> {
        for (id, attribute) in std::mem::take(&mut self.uncovered) {
            let mut record = load(self.store, &id)?;
            let Some(link) = record.links.get_mut(&attribute) else {
                continue;
            };
            let mut changed = false;
            for target in link.targets() {
                if let Some(new_target) = self.copied.get(&target) {
                    link.retarget(&target, Some(new_target));
                    changed = true;
                }
            }
            if changed {
                self.store.save_record(record)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::identity::persist;
    use crate::model::{DataType, ServerContext, TypeDef, TypeRegistry};
    use crate::store::{MemoryStore, RecordStore};

    fn registry() -> TypeRegistry {
        TypeRegistry::new()
            .with(
                TypeDef::new("Continent")
                    .field("name", DataType::String)
                    .collection("sub_continents", "SubContinent", Some("continent"))
                    .collection("states", "State", Some("continent")),
            )
            .with(
                TypeDef::new("SubContinent")
                    .field("name", DataType::String)
                    .reference("continent", "Continent"),
            )
            .with(
                TypeDef::new("State")
                    .field("name", DataType::String)
                    .reference("continent", "Continent")
                    .reference("sub_continent", "SubContinent")
                    .reference("license", "License"),
            )
            .with(TypeDef::new("License").field("name", DataType::String))
    }

    fn structure() -> DataSetStructure {
        let mut s = DataSetStructure::new("Continents", "geo");
        let root = s.add_root("Continent");
        s.add_child(root, "SubContinent", "sub_continents", true, false);
        let states = s.add_child(root, "State", "states", true, false);
        s.add_child(states, "License", "license", false, true);
        s
    }

    #[test]
    fn test_copy_new_version() {
        let registry = registry();
        let server = ServerContext::new("http://ks.example.org", "Example", "geo");
        let (draft, materialized) = (MemoryStore::new("draft"), MemoryStore::new("materialized"));
        let ctx = EngineContext::new(&registry, &server, &draft, &materialized);
        let structure = structure();

        let license = persist(&ctx, &draft, Record::new("License").with_field("name", "CC-BY")).unwrap();
        let south = persist(&ctx, &draft, Record::new("SubContinent").with_field("name", "South Europe")).unwrap();
        let italy = persist(
            &ctx,
            &draft,
            Record::new("State")
                .with_field("name", "Italy")
                .with_link("sub_continent", &south.id)
                .with_link("license", &license.id),
        )
        .unwrap();
        let europe = persist(
            &ctx,
            &draft,
            Record::new("Continent")
                .with_field("name", "Europe")
                .with_links("sub_continents", vec![south.id.clone()])
                .with_links("states", vec![italy.id.clone()]),
        )
        .unwrap();

        let copy = VersionCopier::new(&ctx, &draft, &structure)
            .copy_root(&europe)
            .unwrap();
        assert_ne!(copy.id, europe.id);
        assert_ne!(copy.uri, europe.uri);
        assert_eq!(copy.previous_version_uri.as_deref(), Some(europe.uri.as_str()));
        assert_eq!(draft.record_count(), 7, "three copies next to four originals");

        let italy2 = draft.get_record(&copy.link_many("states")[0]).unwrap().unwrap();
        let south2 = draft.get_record(&copy.link_many("sub_continents")[0]).unwrap().unwrap();
        assert_eq!(italy2.previous_version_uri.as_deref(), Some(italy.uri.as_str()));
        assert_eq!(italy2.link_one("continent"), Some(&copy.id));
        assert_eq!(italy2.link_one("sub_continent"), Some(&south2.id), "follows the copied sub continent");
        assert_eq!(italy2.link_one("license"), Some(&license.id), "external reference is not cloned");

        // the source graph is untouched
        let italy1 = draft.get_record(&italy.id).unwrap().unwrap();
        assert_eq!(italy1.link_one("sub_continent"), Some(&south.id));
    }

    #[test]
    fn test_self_loop_copied_once() {
        let registry = TypeRegistry::new().with(
            TypeDef::new("Person")
                .field("name", DataType::String)
                .reference("best_friend", "Person"),
        );
        let server = ServerContext::new("http://ks.example.org", "Example", "social");
        let (draft, materialized) = (MemoryStore::new("draft"), MemoryStore::new("materialized"));
        let ctx = EngineContext::new(&registry, &server, &draft, &materialized);

        let mut s = DataSetStructure::new("People", "social");
        let root = s.add_root("Person");
        let friend = s.add_child(root, "Person", "best_friend", false, false);
        s.attach(friend, friend);

        let mut narcissus = Record::new("Person").with_field("name", "Narcissus");
        let own = narcissus.id.clone();
        narcissus = narcissus.with_link("best_friend", &own);
        let narcissus = persist(&ctx, &draft, narcissus).unwrap();

        let copy = VersionCopier::new(&ctx, &draft, &s).copy_root(&narcissus).unwrap();
        assert_eq!(draft.record_count(), 2);
        assert_eq!(copy.link_one("best_friend"), Some(&copy.id));
    }
}
