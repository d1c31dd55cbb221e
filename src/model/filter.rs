use crate::logic::FilterExpr;
use serde::{Deserialize, Serialize};

/// Selection of records by type and scalar conditions (used by views)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RecordFilter {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,

    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<FilterExpr>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub fn of_type(type_name: &str) -> Self {
        Self {
            types: Some(vec![type_name.to_string()]),
            ..Default::default()
        }
    }

    pub fn matching(mut self, expr: FilterExpr) -> Self {
        self.where_clause = Some(expr);
        self
    }
}
