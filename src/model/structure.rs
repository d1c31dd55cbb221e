use crate::model::{generate_id, Id};
use serde::{Deserialize, Serialize};

/// Index of a node inside its structure's arena
pub type NodeId = usize;

/// Prefix of auto-generated one-level structures
pub const SHALLOW_PREFIX: &str = "__shallow_";

/// One node of a traversal tree.
///
/// Children are arena indices, so a node may (transitively) list itself as a
/// child; walkers terminate through their visited sets, not through the shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureNode {
    pub type_name: String,
    /// Attribute on the parent record; empty only at the root
    #[serde(default)]
    pub attribute: String,
    #[serde(default)]
    pub is_external_reference: bool,
    #[serde(default)]
    pub is_many: bool,
    #[serde(default)]
    pub children: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSetStructure {
    pub id: Id,
    #[serde(default)]
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Namespace embedded in the URIs of records this structure owns
    pub namespace: String,
    #[serde(default)]
    pub is_shallow: bool,
    #[serde(default)]
    pub is_view: bool,
    #[serde(default)]
    pub multiple_releases: bool,
    pub root: NodeId,
    pub nodes: Vec<StructureNode>,
}

impl DataSetStructure {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            id: generate_id(),
            uri: String::new(),
            name: name.to_string(),
            description: None,
            namespace: namespace.to_string(),
            is_shallow: false,
            is_view: false,
            multiple_releases: false,
            root: 0,
            nodes: Vec::new(),
        }
    }

    pub fn view(mut self) -> Self {
        self.is_view = true;
        self
    }

    pub fn multiple_releases(mut self) -> Self {
        self.multiple_releases = true;
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn add_root(&mut self, type_name: &str) -> NodeId {
        self.nodes.push(StructureNode {
            type_name: type_name.to_string(),
            attribute: String::new(),
            is_external_reference: false,
            is_many: false,
            children: Vec::new(),
        });
        self.root = self.nodes.len() - 1;
        self.root
    }

    /// Add a new node under `parent` and return its id
    pub fn add_child(
        &mut self,
        parent: NodeId,
        type_name: &str,
        attribute: &str,
        is_many: bool,
        is_external_reference: bool,
    ) -> NodeId {
        self.nodes.push(StructureNode {
            type_name: type_name.to_string(),
            attribute: attribute.to_string(),
            is_external_reference,
            is_many,
            children: Vec::new(),
        });
        let id = self.nodes.len() - 1;
        self.attach(parent, id);
        id
    }

    /// Re-use an existing node as a child of `parent` (this is how cycles are expressed)
    pub fn attach(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.nodes.get_mut(parent) {
            if !node.children.contains(&child) {
                node.children.push(child);
            }
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&StructureNode> {
        self.nodes.get(id)
    }

    pub fn root_node(&self) -> Option<&StructureNode> {
        self.nodes.get(self.root)
    }

    pub fn root_type(&self) -> &str {
        self.root_node().map(|n| n.type_name.as_str()).unwrap_or("")
    }

    pub fn children(&self, id: NodeId) -> Vec<(NodeId, &StructureNode)> {
        self.nodes
            .get(id)
            .map(|node| {
                node.children
                    .iter()
                    .filter_map(|c| self.nodes.get(*c).map(|n| (*c, n)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True if any node, owned or external, has this type
    pub fn contains_type(&self, type_name: &str) -> bool {
        self.nodes.iter().any(|n| n.type_name == type_name)
    }

    /// Types reachable through owned (non external-reference) nodes
    pub fn owned_types(&self) -> Vec<String> {
        let mut types: Vec<String> = Vec::new();
        for node in &self.nodes {
            if !node.is_external_reference && !types.contains(&node.type_name) {
                types.push(node.type_name.clone());
            }
        }
        types
    }

    /// Shallow and view structures are not part of the type partition
    pub fn owns_types(&self) -> bool {
        !self.is_shallow && !self.is_view
    }

    pub fn shallow_name(type_name: &str) -> String {
        format!("{}{}", SHALLOW_PREFIX, type_name)
    }
}
