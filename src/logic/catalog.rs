use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::logic::identity::system_uri;
use crate::logic::EngineContext;
use crate::model::{
    DataSet, DataSetStructure, NodeId, SerialNode, StructureNode, REFERENCE_MARKER, URI_ATTRIBUTE,
};

/// The non-shallow, non-view structure that owns `type_name`, if any
pub fn owning_structure(ctx: &EngineContext, type_name: &str) -> EngineResult<Option<DataSetStructure>> {
    Ok(ctx
        .draft
        .list_structures()?
        .into_iter()
        .find(|s| s.owns_types() && s.owned_types().iter().any(|t| t == type_name)))
}

/// Namespace embedded in URIs of `type_name` records
pub fn namespace_for(ctx: &EngineContext, type_name: &str) -> String {
    match owning_structure(ctx, type_name) {
        Ok(Some(structure)) => structure.namespace,
        Ok(None) => {
            log::warn!(
                "No structure owns type {}, using default namespace {}",
                type_name,
                ctx.server.default_namespace
            );
            ctx.server.default_namespace.clone()
        }
        Err(e) => {
            log::warn!("Structure lookup for {} failed: {}", type_name, e);
            ctx.server.default_namespace.clone()
        }
    }
}

/// Find a structure by URI, falling back to its name
pub fn find_structure(ctx: &EngineContext, uri_or_name: &str) -> EngineResult<DataSetStructure> {
    if let Some(structure) = ctx.draft.get_structure_by_uri(uri_or_name)? {
        return Ok(structure);
    }
    ctx.draft
        .get_structure_by_name(uri_or_name)?
        .ok_or_else(|| EngineError::NotFound(format!("Structure {}", uri_or_name)))
}

pub fn structure_of(ctx: &EngineContext, dataset: &DataSet) -> EngineResult<DataSetStructure> {
    ctx.draft
        .get_structure_by_uri(&dataset.structure_uri)?
        .ok_or_else(|| EngineError::NotFound(format!("Structure {}", dataset.structure_uri)))
}

fn validate_shape(ctx: &EngineContext, structure: &DataSetStructure) -> EngineResult<()> {
    if structure.root_node().is_none() {
        return Err(EngineError::Structure(format!("{} has no root node", structure.name)));
    }
    for (id, node) in structure.nodes.iter().enumerate() {
        for child_id in &node.children {
            let child = structure.node(*child_id).ok_or_else(|| {
                EngineError::Structure(format!("{}: node {} has unknown child {}", structure.name, id, child_id))
            })?;
            if child.attribute.is_empty() {
                return Err(EngineError::Structure(format!(
                    "{}: child of {} without attribute",
                    structure.name, node.type_name
                )));
            }
            let Some(parent_type) = ctx.registry.get(&node.type_name) else {
                continue;
            };
            let reference = parent_type.get_reference(&child.attribute).ok_or_else(|| {
                EngineError::Structure(format!("{} has no reference {}", node.type_name, child.attribute))
            })?;
            if reference.target != child.type_name {
                return Err(EngineError::TypeMismatch {
                    expected: reference.target.clone(),
                    found: child.type_name.clone(),
                });
            }
            if reference.many != child.is_many {
                return Err(EngineError::Structure(format!(
                    "{}.{}: plurality does not match the type registry",
                    node.type_name, child.attribute
                )));
            }
        }
    }
    Ok(())
}

/// Validate and save a structure. A type may be owned by at most one
/// non-shallow, non-view structure; re-registering a name replaces it.
pub fn register_structure(ctx: &EngineContext, mut structure: DataSetStructure) -> EngineResult<DataSetStructure> {
    validate_shape(ctx, &structure)?;

    if structure.owns_types() {
        let owned = structure.owned_types();
        for other in ctx.draft.list_structures()? {
            if other.name == structure.name || !other.owns_types() {
                continue;
            }
            if let Some(clash) = other.owned_types().into_iter().find(|t| owned.contains(t)) {
                return Err(EngineError::Structure(format!(
                    "Type {} is already owned by structure {}",
                    clash, other.name
                )));
            }
        }
    }

    if let Some(existing) = ctx.draft.get_structure_by_name(&structure.name)? {
        structure.id = existing.id;
        structure.uri = existing.uri;
    }
    if structure.uri.is_empty() {
        structure.uri = system_uri(ctx.server, "DataSetStructure", &structure.id);
    }
    ctx.draft.save_structure(structure.clone())?;
    log::info!("Registered structure {} ({})", structure.name, structure.uri);
    Ok(structure)
}

/// One-level structure listing every reference of the type as an external
/// reference; built once per type.
pub fn shallow_structure(ctx: &EngineContext, type_name: &str) -> EngineResult<DataSetStructure> {
    let name = DataSetStructure::shallow_name(type_name);
    if let Some(existing) = ctx.draft.get_structure_by_name(&name)? {
        return Ok(existing);
    }

    let mut structure = DataSetStructure::new(&name, &namespace_for(ctx, type_name));
    structure.is_shallow = true;
    let root = structure.add_root(type_name);
    if let Some(type_def) = ctx.registry.get(type_name) {
        for reference in &type_def.references {
            structure.add_child(root, &reference.target, &reference.name, reference.many, true);
        }
    }
    structure.uri = system_uri(ctx.server, "DataSetStructure", &structure.id);
    ctx.draft.save_structure(structure.clone())?;
    log::debug!("Created shallow structure {}", name);
    Ok(structure)
}

/// Render a structure definition; shared or cyclic nodes appear once in full
/// and as in-file references afterwards.
pub fn export_structure(structure: &DataSetStructure) -> SerialNode {
    fn node_to_serial(
        structure: &DataSetStructure,
        id: NodeId,
        tag: &str,
        emitted: &mut Vec<NodeId>,
    ) -> SerialNode {
        let Some(node) = structure.node(id) else {
            return SerialNode::record(tag);
        };
        if emitted.contains(&id) {
            return SerialNode::record(tag)
                .attr(REFERENCE_MARKER, true)
                .attr("node", id as u64)
                .attr("type", node.type_name.as_str());
        }
        emitted.push(id);
        let mut serial = SerialNode::record(tag)
            .attr("node", id as u64)
            .attr("type", node.type_name.as_str())
            .attr("attribute", node.attribute.as_str())
            .attr("isExternalReference", node.is_external_reference)
            .attr("isMany", node.is_many);
        let children = node
            .children
            .iter()
            .map(|c| node_to_serial(structure, *c, "StructureNode", emitted))
            .collect();
        serial.push(SerialNode::collection("children", children));
        serial
    }

    let mut emitted = Vec::new();
    let mut serial = SerialNode::record("DataSetStructure")
        .attr(URI_ATTRIBUTE, structure.uri.as_str())
        .attr("name", structure.name.as_str())
        .attr("namespace", structure.namespace.as_str())
        .attr("isShallow", structure.is_shallow)
        .attr("isView", structure.is_view)
        .attr("multipleReleases", structure.multiple_releases);
    if let Some(description) = &structure.description {
        serial.set_attr("description", description.as_str());
    }
    serial.push(node_to_serial(structure, structure.root, "root", &mut emitted));
    serial
}

/// Inverse of [`export_structure`]
pub fn structure_from_serial(serial: &SerialNode) -> EngineResult<DataSetStructure> {
    fn read_node(
        serial: &SerialNode,
        structure: &mut DataSetStructure,
        mapping: &mut HashMap<String, NodeId>,
    ) -> EngineResult<NodeId> {
        let key = serial
            .attr_text("node")
            .ok_or_else(|| EngineError::Format("Structure node without index".to_string()))?;
        if serial.flag(REFERENCE_MARKER) {
            return mapping
                .get(&key)
                .copied()
                .ok_or_else(|| EngineError::Format(format!("Reference to unknown node {}", key)));
        }
        structure.nodes.push(StructureNode {
            type_name: serial
                .attr_text("type")
                .ok_or_else(|| EngineError::Format("Structure node without type".to_string()))?,
            attribute: serial.attr_text("attribute").unwrap_or_default(),
            is_external_reference: serial.flag("isExternalReference"),
            is_many: serial.flag("isMany"),
            children: Vec::new(),
        });
        let id = structure.nodes.len() - 1;
        mapping.insert(key, id);
        if let Some(children) = serial.child("children") {
            for child in children.items() {
                let child_id = read_node(child, structure, mapping)?;
                structure.attach(id, child_id);
            }
        }
        Ok(id)
    }

    let name = serial
        .attr_text("name")
        .ok_or_else(|| EngineError::Format("Structure without name".to_string()))?;
    let namespace = serial.attr_text("namespace").unwrap_or_default();
    let mut structure = DataSetStructure::new(&name, &namespace);
    structure.uri = serial.uri().unwrap_or_default();
    structure.description = serial.attr_text("description");
    structure.is_shallow = serial.flag("isShallow");
    structure.is_view = serial.flag("isView");
    structure.multiple_releases = serial.flag("multipleReleases");

    let root = serial
        .child("root")
        .ok_or_else(|| EngineError::Format(format!("Structure {} has no root", name)))?;
    let mut mapping = HashMap::new();
    let root_id = read_node(root, &mut structure, &mut mapping)?;
    structure.root = root_id;
    Ok(structure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataType, ServerContext, TypeDef, TypeRegistry};
    use crate::store::MemoryStore;

    fn registry() -> TypeRegistry {
        TypeRegistry::new()
            .with(
                TypeDef::new("Continent")
                    .field("name", DataType::String)
                    .collection("states", "State", Some("continent")),
            )
            .with(
                TypeDef::new("State")
                    .field("name", DataType::String)
                    .reference("continent", "Continent")
                    .reference("license", "License"),
            )
            .with(TypeDef::new("License").field("name", DataType::String))
    }

    fn continents() -> DataSetStructure {
        let mut s = DataSetStructure::new("Continents", "geo");
        let root = s.add_root("Continent");
        let states = s.add_child(root, "State", "states", true, false);
        s.add_child(states, "License", "license", false, true);
        s
    }

    #[test]
    fn test_register_assigns_uri_and_namespace_lookup() {
        let registry = registry();
        let server = ServerContext::new("http://ks.example.org", "Example", "default");
        let (draft, materialized) = (MemoryStore::new("draft"), MemoryStore::new("materialized"));
        let ctx = EngineContext::new(&registry, &server, &draft, &materialized);

        let saved = register_structure(&ctx, continents()).unwrap();
        assert!(saved.uri.starts_with("http://ks.example.org/ks/DataSetStructure/"));
        assert_eq!(namespace_for(&ctx, "State"), "geo");
        assert_eq!(namespace_for(&ctx, "License"), "default", "external leaves are not owned");

        // re-registering keeps identity
        let again = register_structure(&ctx, continents().describe("v2")).unwrap();
        assert_eq!(again.uri, saved.uri);
    }

    #[test]
    fn test_partition_constraint() {
        let registry = registry();
        let server = ServerContext::new("http://ks.example.org", "Example", "default");
        let (draft, materialized) = (MemoryStore::new("draft"), MemoryStore::new("materialized"));
        let ctx = EngineContext::new(&registry, &server, &draft, &materialized);
        register_structure(&ctx, continents()).unwrap();

        let mut states = DataSetStructure::new("States", "geo");
        states.add_root("State");
        let err = register_structure(&ctx, states.clone()).unwrap_err();
        assert!(err.to_string().contains("already owned"));

        // a view may contain the same type
        assert!(register_structure(&ctx, states.view()).is_ok());
    }

    #[test]
    fn test_attribute_validation() {
        let registry = registry();
        let server = ServerContext::new("http://ks.example.org", "Example", "default");
        let (draft, materialized) = (MemoryStore::new("draft"), MemoryStore::new("materialized"));
        let ctx = EngineContext::new(&registry, &server, &draft, &materialized);

        let mut wrong = DataSetStructure::new("Wrong", "geo");
        let root = wrong.add_root("Continent");
        wrong.add_child(root, "License", "states", true, false);
        assert!(matches!(
            register_structure(&ctx, wrong),
            Err(EngineError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_shallow_structure_is_memoized() {
        let registry = registry();
        let server = ServerContext::new("http://ks.example.org", "Example", "default");
        let (draft, materialized) = (MemoryStore::new("draft"), MemoryStore::new("materialized"));
        let ctx = EngineContext::new(&registry, &server, &draft, &materialized);

        let first = shallow_structure(&ctx, "State").unwrap();
        let second = shallow_structure(&ctx, "State").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.name, "__shallow_State");
        let children = first.children(first.root);
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|(_, n)| n.is_external_reference));
    }

    #[test]
    fn test_export_structure_round_trip_with_cycle() {
        let mut people = DataSetStructure::new("People", "social");
        let root = people.add_root("Person");
        let friend = people.add_child(root, "Person", "friend", false, false);
        people.attach(friend, friend);

        let serial = export_structure(&people);
        let xml = serial.to_xml().unwrap();
        let parsed = structure_from_serial(&SerialNode::from_xml(&xml).unwrap()).unwrap();
        assert_eq!(parsed.name, "People");
        assert_eq!(parsed.nodes.len(), 2);
        let friend = parsed.children(parsed.root)[0].0;
        assert_eq!(parsed.node(friend).unwrap().children, vec![friend]);
    }
}
