use crate::model::{generate_id, Id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An external reference that could not be resolved while importing a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DanglingReference {
    pub id: Id,
    pub target_uri: String,
    pub target_type: String,
    /// Record holding the unresolved link
    pub holder_id: Id,
    pub holder_type: String,
    pub attribute: String,
    #[serde(default)]
    pub is_many: bool,
    /// Dataset whose graph contains the holder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_uri: Option<String>,
    #[serde(default)]
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

impl DanglingReference {
    pub fn new(target_uri: &str, target_type: &str, holder_id: &Id, holder_type: &str, attribute: &str, is_many: bool) -> Self {
        Self {
            id: generate_id(),
            target_uri: target_uri.to_string(),
            target_type: target_type.to_string(),
            holder_id: holder_id.clone(),
            holder_type: holder_type.to_string(),
            attribute: attribute.to_string(),
            is_many,
            dataset_uri: None,
            resolved: false,
            created_at: Utc::now(),
        }
    }

    pub fn in_dataset(mut self, dataset_uri: Option<&str>) -> Self {
        self.dataset_uri = dataset_uri.map(str::to_string);
        self
    }
}
