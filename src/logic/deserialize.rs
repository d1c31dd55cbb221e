use std::collections::{HashMap, HashSet};

use crate::error::{EngineError, EngineResult};
use crate::logic::identity::{is_local, persist, resolve, Resolution};
use crate::logic::walker::{inverse_of, save_two_phase, set_parent_link, structure_node, NodeChildren, WalkMode};
use crate::logic::EngineContext;
use crate::model::{
    DanglingReference, DataSetStructure, Id, Link, NodeId, Record, SerialNode, StructureNode,
    EXTERNAL_MARKER, IMPORTED_FROM_ATTRIBUTE, PK_ATTRIBUTE, PREVIOUS_VERSION_ATTRIBUTE,
    REFERENCE_MARKER, URI_ATTRIBUTE,
};
use crate::store::Store;

const RESERVED_ATTRIBUTES: [&str; 6] = [
    URI_ATTRIBUTE,
    IMPORTED_FROM_ATTRIBUTE,
    PREVIOUS_VERSION_ATTRIBUTE,
    REFERENCE_MARKER,
    EXTERNAL_MARKER,
    PK_ATTRIBUTE,
];

enum Linked {
    Record(Id),
    /// External reference nobody here knows yet
    Dangling(String),
}

/// Rebuilds records from a [`SerialNode`] tree following a structure.
///
/// Existing records (matched by URI or provenance) are updated in place and
/// collections only grow, so importing the same document twice is a no-op.
pub struct Deserializer<'a> {
    ctx: &'a EngineContext<'a>,
    store: &'a dyn Store,
    structure: &'a DataSetStructure,
    dataset_uri: Option<String>,
    processed: HashMap<String, Id>,
    placeholders: HashSet<String>,
    dangling: Vec<DanglingReference>,
}

impl<'a> Deserializer<'a> {
    pub fn new(ctx: &'a EngineContext<'a>, store: &'a dyn Store, structure: &'a DataSetStructure) -> Self {
        Self {
            ctx,
            store,
            structure,
            dataset_uri: None,
            processed: HashMap::new(),
            placeholders: HashSet::new(),
            dangling: Vec::new(),
        }
    }

    /// Tag dangling references with the dataset being imported
    pub fn for_dataset(mut self, dataset_uri: &str) -> Self {
        self.dataset_uri = Some(dataset_uri.to_string());
        self
    }

    /// Unresolved external references found so far
    pub fn take_dangling(&mut self) -> Vec<DanglingReference> {
        std::mem::take(&mut self.dangling)
    }

    pub fn deserialize_root(&mut self, serial: &SerialNode) -> EngineResult<Id> {
        let root = self.structure.root;
        match self.deserialize(serial, root, true, None)? {
            Linked::Record(id) => Ok(id),
            Linked::Dangling(uri) => Err(EngineError::Unresolved(uri)),
        }
    }

    fn deserialize(
        &mut self,
        serial: &SerialNode,
        node_id: NodeId,
        tagged_by_type: bool,
        parent: Option<(&Id, &str)>,
    ) -> EngineResult<Linked> {
        let structure = self.structure;
        let node = structure_node(structure, node_id, WalkMode::Deserialize)?;
        if !serial.is_record() {
            return Err(EngineError::Format(format!(
                "<{}> should describe a {} record",
                serial.tag(),
                node.type_name
            )));
        }
        if tagged_by_type && serial.tag() != node.type_name {
            return Err(EngineError::TypeMismatch {
                expected: node.type_name.clone(),
                found: serial.tag().to_string(),
            });
        }

        let uri = serial.uri().unwrap_or_default();
        let is_reference =
            node.is_external_reference || serial.flag(REFERENCE_MARKER) || serial.flag(EXTERNAL_MARKER);
        if is_reference {
            let linked = self.link_reference(serial, node, &uri)?;
            if let (Linked::Record(id), Some((parent_id, inverse))) = (&linked, parent) {
                set_parent_link(self.store, id, inverse, parent_id)?;
            }
            return Ok(linked);
        }

        if !uri.is_empty() && !self.placeholders.contains(&uri) {
            if let Some(id) = self.processed.get(&uri).cloned() {
                if let Some((parent_id, inverse)) = parent {
                    set_parent_link(self.store, &id, inverse, parent_id)?;
                }
                return Ok(Linked::Record(id));
            }
        }
        self.placeholders.remove(&uri);

        let existing = if uri.is_empty() {
            None
        } else {
            match resolve(self.ctx, self.store, &uri)? {
                Resolution::Local(record) => Some(record),
                _ => None,
            }
        };
        let mut record = existing.unwrap_or_else(|| Record::new(node.type_name.as_str()));
        if record.type_name != node.type_name {
            return Err(EngineError::TypeMismatch {
                expected: node.type_name.clone(),
                found: record.type_name.clone(),
            });
        }
        if record.uri.is_empty() && !uri.is_empty() {
            record.uri = uri.clone();
            if !is_local(self.ctx.server, &uri) {
                record.imported_from_uri = Some(uri.clone());
            }
        }
        if let Some(previous) = serial.attr_text(PREVIOUS_VERSION_ATTRIBUTE) {
            record.previous_version_uri = Some(previous);
        }
        for (name, value) in serial.attributes() {
            if RESERVED_ATTRIBUTES.contains(&name.as_str()) {
                continue;
            }
            match self.ctx.registry.coerce(&record.type_name, name, value) {
                Some(coerced) => {
                    record.fields.insert(name.clone(), coerced);
                }
                None => log::debug!("Ignoring undeclared field {}.{}", record.type_name, name),
            }
        }
        if let Some((parent_id, inverse)) = parent {
            record
                .links
                .insert(inverse.to_string(), Link::One(Some(parent_id.clone())));
        }
        self.processed.insert(
            if uri.is_empty() { format!("pending:{}", record.id) } else { uri.clone() },
            record.id.clone(),
        );

        // Single-valued links must exist before the first save
        let children = NodeChildren::of(structure, node_id);
        let mut unresolved: Vec<(String, &StructureNode)> = Vec::new();
        for (child_id, child) in children.to_one.iter().chain(children.external.iter().filter(|(_, c)| !c.is_many)) {
            match serial.child(&child.attribute) {
                Some(child_serial) => match self.deserialize(child_serial, *child_id, false, None)? {
                    Linked::Record(id) => {
                        record.links.insert(child.attribute.clone(), Link::One(Some(id)));
                    }
                    Linked::Dangling(target) => {
                        record.links.insert(child.attribute.clone(), Link::One(None));
                        unresolved.push((target, child));
                    }
                },
                None => {
                    record.links.insert(child.attribute.clone(), Link::One(None));
                }
            }
        }
        let mut record = save_two_phase(self.ctx, self.store, record)?;
        for (target, child) in unresolved {
            self.note_dangling(&target, child, &record, false);
        }

        for (child_id, child) in children.to_many.iter().chain(children.external.iter().filter(|(_, c)| c.is_many)) {
            let Some(collection) = serial.child(&child.attribute) else {
                continue;
            };
            let inverse = inverse_of(self.ctx, &record.type_name, &child.attribute);
            record
                .links
                .entry(child.attribute.clone())
                .or_insert_with(|| Link::Many(Vec::new()));
            for item in collection.items() {
                let parent = inverse.as_deref().map(|inv| (&record.id, inv));
                match self.deserialize(item, *child_id, true, parent)? {
                    Linked::Record(id) => {
                        record.push_link(&child.attribute, &id);
                    }
                    Linked::Dangling(target) => self.note_dangling(&target, child, &record, true),
                }
            }
        }
        record.touch();
        self.store.save_record(record.clone())?;
        Ok(Linked::Record(record.id))
    }

    /// A reference element: link an existing record, create a placeholder
    /// for an in-file reference not seen yet, or give up on an external one.
    fn link_reference(&mut self, serial: &SerialNode, node: &StructureNode, uri: &str) -> EngineResult<Linked> {
        if uri.is_empty() {
            return Err(EngineError::Format(format!("<{}> reference without URI", serial.tag())));
        }
        if let Some(id) = self.processed.get(uri) {
            return Ok(Linked::Record(id.clone()));
        }
        if let Resolution::Local(record) = resolve(self.ctx, self.store, uri)? {
            return Ok(Linked::Record(record.id));
        }
        if node.is_external_reference || serial.flag(EXTERNAL_MARKER) {
            log::warn!("Dangling reference to {} ({})", uri, node.type_name);
            return Ok(Linked::Dangling(uri.to_string()));
        }

        // Referenced before its full description in this document
        let mut placeholder = Record::new(node.type_name.as_str());
        placeholder.uri = uri.to_string();
        if !is_local(self.ctx.server, uri) {
            placeholder.imported_from_uri = Some(uri.to_string());
        }
        let display = self.ctx.registry.display_field(&node.type_name);
        if let Some(value) = serial.attribute(display) {
            if let Some(coerced) = self.ctx.registry.coerce(&node.type_name, display, value) {
                placeholder.fields.insert(display.to_string(), coerced);
            }
        }
        let placeholder = persist(self.ctx, self.store, placeholder)?;
        self.processed.insert(uri.to_string(), placeholder.id.clone());
        self.placeholders.insert(uri.to_string());
        Ok(Linked::Record(placeholder.id))
    }

    fn note_dangling(&mut self, target: &str, child: &StructureNode, holder: &Record, is_many: bool) {
        self.dangling.push(
            DanglingReference::new(
                target,
                &child.type_name,
                &holder.id,
                &holder.type_name,
                &child.attribute,
                is_many,
            )
            .in_dataset(self.dataset_uri.as_deref()),
        );
    }
}
