use crate::model::{coerce_scalar, DataType, Record};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Display field used when a type does not declare one
pub const DEFAULT_DISPLAY_FIELD: &str = "name";

/// Runtime description of one record type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    /// Name of the type (e.g., "Continent", "License")
    pub name: String,

    /// Field whose value identifies the record inside its URI; primary key when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_field: Option<String>,

    /// Field shown next to the URI in reference stubs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_field: Option<String>,

    /// Scalar fields
    #[serde(default)]
    pub fields: Vec<FieldDef>,

    /// Reference fields (to-one or to-many)
    #[serde(default)]
    pub references: Vec<ReferenceDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(default)]
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDef {
    pub name: String,
    /// Type name of the referenced records
    pub target: String,
    #[serde(default)]
    pub many: bool,
    /// To-one link on the target pointing back at the holder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,
}

impl TypeDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            id_field: None,
            display_field: None,
            fields: Vec::new(),
            references: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str, data_type: DataType) -> Self {
        self.fields.push(FieldDef {
            name: name.to_string(),
            data_type,
        });
        self
    }

    pub fn reference(mut self, name: &str, target: &str) -> Self {
        self.references.push(ReferenceDef {
            name: name.to_string(),
            target: target.to_string(),
            many: false,
            inverse: None,
        });
        self
    }

    pub fn collection(mut self, name: &str, target: &str, inverse: Option<&str>) -> Self {
        self.references.push(ReferenceDef {
            name: name.to_string(),
            target: target.to_string(),
            many: true,
            inverse: inverse.map(str::to_string),
        });
        self
    }

    pub fn display(mut self, field: &str) -> Self {
        self.display_field = Some(field.to_string());
        self
    }

    pub fn identified_by(mut self, field: &str) -> Self {
        self.id_field = Some(field.to_string());
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn get_reference(&self, name: &str) -> Option<&ReferenceDef> {
        self.references.iter().find(|r| r.name == name)
    }

    pub fn display_field(&self) -> &str {
        self.display_field.as_deref().unwrap_or(DEFAULT_DISPLAY_FIELD)
    }
}

/// The set of record types this server knows how to walk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeRegistry {
    #[serde(default)]
    types: BTreeMap<String, TypeDef>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let types: Vec<TypeDef> = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for type_def in types {
            registry.register(type_def);
        }
        Ok(registry)
    }

    pub fn register(&mut self, type_def: TypeDef) {
        self.types.insert(type_def.name.clone(), type_def);
    }

    pub fn with(mut self, type_def: TypeDef) -> Self {
        self.register(type_def);
        self
    }

    pub fn get(&self, type_name: &str) -> Option<&TypeDef> {
        self.types.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.values()
    }

    pub fn reference(&self, type_name: &str, attribute: &str) -> Option<&ReferenceDef> {
        self.get(type_name).and_then(|t| t.get_reference(attribute))
    }

    pub fn display_field(&self, type_name: &str) -> &str {
        self.get(type_name)
            .map(|t| t.display_field())
            .unwrap_or(DEFAULT_DISPLAY_FIELD)
    }

    pub fn display_value(&self, record: &Record) -> Option<serde_json::Value> {
        record
            .fields
            .get(self.display_field(&record.type_name))
            .cloned()
    }

    /// Scalar field names to serialize, in declaration order.
    /// Unregistered types fall back to whatever the record carries.
    pub fn scalar_fields(&self, record: &Record) -> Vec<String> {
        match self.get(&record.type_name) {
            Some(type_def) => type_def.fields.iter().map(|f| f.name.clone()).collect(),
            None => record.fields.keys().cloned().collect(),
        }
    }

    /// Coerce an incoming value into the field's declared type; `None` for undeclared fields
    pub fn coerce(
        &self,
        type_name: &str,
        field: &str,
        value: &serde_json::Value,
    ) -> Option<serde_json::Value> {
        match self.get(type_name) {
            Some(type_def) => type_def
                .get_field(field)
                .map(|f| coerce_scalar(f.data_type, value)),
            None => Some(value.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> TypeRegistry {
        TypeRegistry::new()
            .with(
                TypeDef::new("Continent")
                    .field("name", DataType::String)
                    .field("population", DataType::Integer)
                    .collection("states", "State", Some("continent")),
            )
            .with(
                TypeDef::new("State")
                    .field("name", DataType::String)
                    .field("code", DataType::String)
                    .display("code")
                    .reference("continent", "Continent"),
            )
    }

    #[test]
    fn test_display_field_defaults_to_name() {
        let registry = registry();
        assert_eq!(registry.display_field("Continent"), "name");
        assert_eq!(registry.display_field("State"), "code");
        assert_eq!(registry.display_field("Unknown"), "name");
    }

    #[test]
    fn test_coerce_only_declared_fields() {
        let registry = registry();
        assert_eq!(
            registry.coerce("Continent", "population", &json!("12")),
            Some(json!(12))
        );
        assert_eq!(registry.coerce("Continent", "nickname", &json!("x")), None);
        // unknown types keep values as they are
        assert_eq!(registry.coerce("Planet", "mass", &json!("5")), Some(json!("5")));
    }

    #[test]
    fn test_registry_from_json() {
        let json = r#"[
            {"name": "License", "fields": [{"name": "name"}, {"name": "free", "data_type": "Boolean"}]}
        ]"#;
        let registry = TypeRegistry::from_json(json).unwrap();
        let license = registry.get("License").unwrap();
        assert_eq!(license.fields[0].data_type, DataType::String);
        assert_eq!(license.fields[1].data_type, DataType::Boolean);
    }

    #[test]
    fn test_reference_lookup() {
        let registry = registry();
        let states = registry.reference("Continent", "states").unwrap();
        assert!(states.many);
        assert_eq!(states.inverse.as_deref(), Some("continent"));
        assert!(registry.reference("State", "states").is_none());
    }
}
