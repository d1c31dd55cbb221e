use std::collections::HashSet;

use crate::error::EngineResult;
use crate::logic::walker::{check_type, structure_node, NodeChildren, WalkMode};
use crate::logic::EngineContext;
use crate::model::{
    DataSetStructure, NodeId, Record, SerialNode, EXTERNAL_MARKER, IMPORTED_FROM_ATTRIBUTE,
    PK_ATTRIBUTE, PREVIOUS_VERSION_ATTRIBUTE, REFERENCE_MARKER, URI_ATTRIBUTE,
};
use crate::store::Store;

/// Turns record graphs into [`SerialNode`] trees following a structure.
///
/// One serializer per document: records already exported are emitted as
/// in-file references the second time they are reached.
pub struct Serializer<'a> {
    ctx: &'a EngineContext<'a>,
    store: &'a dyn Store,
    structure: &'a DataSetStructure,
    exported: HashSet<String>,
}

impl<'a> Serializer<'a> {
    pub fn new(ctx: &'a EngineContext<'a>, store: &'a dyn Store, structure: &'a DataSetStructure) -> Self {
        Self {
            ctx,
            store,
            structure,
            exported: HashSet::new(),
        }
    }

    /// Serialize a record at the structure root; the tag is its type name
    pub fn serialize_root(&mut self, record: &Record) -> EngineResult<SerialNode> {
        let root = self.structure.root;
        self.serialize(record, root, &record.type_name.clone())
    }

    pub fn serialize(&mut self, record: &Record, node_id: NodeId, tag: &str) -> EngineResult<SerialNode> {
        let node = structure_node(self.structure, node_id, WalkMode::Serialize)?;
        check_type(record, node)?;

        if node.is_external_reference {
            return Ok(self.stub(record, tag));
        }
        if !record.uri.is_empty() && self.exported.contains(&record.uri) {
            log::debug!("{} already exported, emitting in-file reference", record.uri);
            let mut reference = SerialNode::record(tag)
                .attr(REFERENCE_MARKER, true)
                .attr(URI_ATTRIBUTE, record.uri.as_str());
            self.add_display(&mut reference, record);
            return Ok(reference);
        }
        self.exported.insert(record.uri.clone());

        let mut serial = SerialNode::record(tag).attr(URI_ATTRIBUTE, record.uri.as_str());
        if let Some(imported) = &record.imported_from_uri {
            serial.set_attr(IMPORTED_FROM_ATTRIBUTE, imported.as_str());
        }
        if let Some(previous) = &record.previous_version_uri {
            serial.set_attr(PREVIOUS_VERSION_ATTRIBUTE, previous.as_str());
        }
        for field in self.ctx.registry.scalar_fields(record) {
            if let Some(value) = record.fields.get(&field).filter(|v| !v.is_null()) {
                serial.set_attr(&field, value.clone());
            }
        }

        let children = NodeChildren::of(self.structure, node_id);
        for (child_id, child) in children.to_one.iter().chain(children.external.iter().filter(|(_, c)| !c.is_many)) {
            let Some(target_id) = record.link_one(&child.attribute) else {
                continue;
            };
            match self.store.get_record(target_id)? {
                Some(target) => serial.push(self.serialize(&target, *child_id, &child.attribute)?),
                None => log::warn!(
                    "{}.{} points at missing record {}",
                    record.uri,
                    child.attribute,
                    target_id
                ),
            }
        }
        for (child_id, child) in children.to_many.iter().chain(children.external.iter().filter(|(_, c)| c.is_many)) {
            let mut items = Vec::new();
            for target_id in record.link_many(&child.attribute) {
                match self.store.get_record(target_id)? {
                    Some(target) => items.push(self.serialize(&target, *child_id, &child.type_name)?),
                    None => log::warn!(
                        "{}.{} points at missing record {}",
                        record.uri,
                        child.attribute,
                        target_id
                    ),
                }
            }
            serial.push(SerialNode::collection(&child.attribute, items));
        }
        Ok(serial)
    }

    /// Identity, display field and primary key of a record owned elsewhere
    fn stub(&self, record: &Record, tag: &str) -> SerialNode {
        let mut stub = SerialNode::record(tag)
            .attr(EXTERNAL_MARKER, true)
            .attr(URI_ATTRIBUTE, record.uri.as_str());
        self.add_display(&mut stub, record);
        stub.set_attr(PK_ATTRIBUTE, record.id.as_str());
        stub
    }

    fn add_display(&self, serial: &mut SerialNode, record: &Record) {
        if let Some(display) = self.ctx.registry.display_value(record) {
            serial.set_attr(self.ctx.registry.display_field(&record.type_name), display);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::identity::persist;
    use crate::model::{DataType, ServerContext, TypeDef, TypeRegistry};
    use crate::store::MemoryStore;

    fn registry() -> TypeRegistry {
        TypeRegistry::new()
            .with(
                TypeDef::new("Person")
                    .field("name", DataType::String)
                    .field("age", DataType::Integer)
                    .reference("best_friend", "Person")
                    .collection("friends", "Person", None)
                    .reference("license", "License"),
            )
            .with(TypeDef::new("License").field("name", DataType::String))
    }

    #[test]
    fn test_self_loop_serializes_once() {
        let registry = registry();
        let server = ServerContext::new("http://ks.example.org", "Example", "social");
        let (draft, materialized) = (MemoryStore::new("draft"), MemoryStore::new("materialized"));
        let ctx = EngineContext::new(&registry, &server, &draft, &materialized);

        let mut structure = DataSetStructure::new("People", "social");
        let root = structure.add_root("Person");
        let friend = structure.add_child(root, "Person", "best_friend", false, false);
        structure.attach(friend, friend);

        let mut narcissus = Record::new("Person").with_field("name", "Narcissus");
        let own = narcissus.id.clone();
        narcissus = narcissus.with_link("best_friend", &own);
        let narcissus = persist(&ctx, &draft, narcissus).unwrap();

        let serial = Serializer::new(&ctx, &draft, &structure)
            .serialize_root(&narcissus)
            .unwrap();
        let inner = serial.child("best_friend").unwrap();
        assert!(inner.flag(REFERENCE_MARKER));
        assert!(inner.child("best_friend").is_none(), "reference has no content");
        assert_eq!(inner.attr_text("name").as_deref(), Some("Narcissus"));
    }

    #[test]
    fn test_external_reference_is_a_stub() {
        let registry = registry();
        let server = ServerContext::new("http://ks.example.org", "Example", "social");
        let (draft, materialized) = (MemoryStore::new("draft"), MemoryStore::new("materialized"));
        let ctx = EngineContext::new(&registry, &server, &draft, &materialized);

        let mut structure = DataSetStructure::new("People", "social");
        let root = structure.add_root("Person");
        structure.add_child(root, "License", "license", false, true);

        let license = persist(&ctx, &draft, Record::new("License").with_field("name", "CC-BY")).unwrap();
        let person = persist(
            &ctx,
            &draft,
            Record::new("Person")
                .with_field("name", "Ada")
                .with_field("age", 36)
                .with_link("license", &license.id),
        )
        .unwrap();

        let serial = Serializer::new(&ctx, &draft, &structure)
            .serialize_root(&person)
            .unwrap();
        assert_eq!(serial.tag(), "Person");
        assert_eq!(serial.attribute("age"), Some(&serde_json::json!(36)));
        let stub = serial.child("license").unwrap();
        assert!(stub.flag(EXTERNAL_MARKER));
        assert_eq!(stub.uri(), Some(license.uri.clone()));
        assert_eq!(stub.attr_text(PK_ATTRIBUTE), Some(license.id.clone()));
        assert_eq!(stub.attr_text("name").as_deref(), Some("CC-BY"));
    }

    #[test]
    fn test_type_mismatch_at_root() {
        let registry = registry();
        let server = ServerContext::new("http://ks.example.org", "Example", "social");
        let (draft, materialized) = (MemoryStore::new("draft"), MemoryStore::new("materialized"));
        let ctx = EngineContext::new(&registry, &server, &draft, &materialized);
        let mut structure = DataSetStructure::new("People", "social");
        structure.add_root("Person");
        let license = persist(&ctx, &draft, Record::new("License")).unwrap();
        assert!(Serializer::new(&ctx, &draft, &structure)
            .serialize_root(&license)
            .is_err());
    }
}
