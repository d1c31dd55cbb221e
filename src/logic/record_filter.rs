use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::error::{EngineError, EngineResult};
use crate::model::{Record, RecordFilter};

/// Filter expression over a record's scalar fields, deserializable from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterExpr {
    /// Logical AND - all conditions must be true
    All { all: Vec<FilterExpr> },
    /// Logical OR - any condition must be true
    Any { any: Vec<FilterExpr> },
    /// Logical NOT - condition must be false
    Not { not: Box<FilterExpr> },
    Eq { eq: (FieldPath, Value) },
    Ne { ne: (FieldPath, Value) },
    Gt { gt: (FieldPath, Value) },
    Gte { gte: (FieldPath, Value) },
    Lt { lt: (FieldPath, Value) },
    Lte { lte: (FieldPath, Value) },
    In { r#in: (FieldPath, Vec<Value>) },
    NotIn { not_in: (FieldPath, Vec<Value>) },
    /// Substring match on string fields
    Contains { contains: (FieldPath, String) },
    Exists { exists: FieldPath },
    NotExists { not_exists: FieldPath },
}

/// `$.field` path into a record; `$.__uri`, `$.__id` and `$.__type` address identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(pub String);

impl FieldPath {
    pub fn new(path: &str) -> Self {
        Self(path.to_string())
    }

    pub fn extract(&self, record: &Record) -> EngineResult<Option<Value>> {
        let path = &self.0;

        match path.as_str() {
            "$.__id" => return Ok(Some(Value::String(record.id.clone()))),
            "$.__uri" => return Ok(Some(Value::String(record.uri.clone()))),
            "$.__type" => return Ok(Some(Value::String(record.type_name.clone()))),
            _ => {}
        }

        match path.strip_prefix("$.") {
            Some(field) => Ok(record.fields.get(field).filter(|v| !v.is_null()).cloned()),
            None => Err(EngineError::Structure(format!("Invalid field path: {}", path))),
        }
    }
}

pub struct RecordFilterEvaluator;

impl RecordFilterEvaluator {
    /// Does the record pass the type restriction and the where clause?
    pub fn matches(record: &Record, filter: &RecordFilter) -> EngineResult<bool> {
        if let Some(types) = &filter.types {
            if !types.contains(&record.type_name) {
                return Ok(false);
            }
        }
        match &filter.where_clause {
            Some(expr) => Self::evaluate(record, expr),
            None => Ok(true),
        }
    }

    /// Apply a filter, dropping records the expression cannot be evaluated on
    pub fn filter_records(records: Vec<Record>, filter: &RecordFilter) -> Vec<Record> {
        let mut selected: Vec<Record> = records
            .into_iter()
            .filter(|record| match Self::matches(record, filter) {
                Ok(matched) => matched,
                Err(e) => {
                    log::debug!("Filter not applicable to {}: {}", record.uri, e);
                    false
                }
            })
            .collect();

        if let Some(sort) = &filter.sort {
            selected.sort_by(|a, b| {
                let left = a.fields.get(sort).unwrap_or(&Value::Null);
                let right = b.fields.get(sort).unwrap_or(&Value::Null);
                Self::order(left, right).unwrap_or(Ordering::Equal)
            });
        }
        if let Some(limit) = filter.limit {
            selected.truncate(limit);
        }
        selected
    }

    pub fn evaluate(record: &Record, expr: &FilterExpr) -> EngineResult<bool> {
        match expr {
            FilterExpr::All { all } => {
                for e in all {
                    if !Self::evaluate(record, e)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            FilterExpr::Any { any } => {
                for e in any {
                    if Self::evaluate(record, e)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            FilterExpr::Not { not } => Ok(!Self::evaluate(record, not)?),
            FilterExpr::Eq { eq: (path, value) } => {
                let extracted = path.extract(record)?;
                Ok(extracted
                    .as_ref()
                    .map_or(false, |v| Self::order(v, value) == Some(Ordering::Equal)))
            }
            FilterExpr::Ne { ne: (path, value) } => {
                let extracted = path.extract(record)?;
                Ok(extracted
                    .as_ref()
                    .map_or(true, |v| Self::order(v, value) != Some(Ordering::Equal)))
            }
            FilterExpr::Gt { gt: (path, value) } => {
                Self::compare(path.extract(record)?.as_ref(), value, |o| o == Ordering::Greater)
            }
            FilterExpr::Gte { gte: (path, value) } => {
                Self::compare(path.extract(record)?.as_ref(), value, |o| o != Ordering::Less)
            }
            FilterExpr::Lt { lt: (path, value) } => {
                Self::compare(path.extract(record)?.as_ref(), value, |o| o == Ordering::Less)
            }
            FilterExpr::Lte { lte: (path, value) } => {
                Self::compare(path.extract(record)?.as_ref(), value, |o| o != Ordering::Greater)
            }
            FilterExpr::In { r#in: (path, values) } => match path.extract(record)? {
                Some(v) => Ok(values
                    .iter()
                    .any(|candidate| Self::order(&v, candidate) == Some(Ordering::Equal))),
                None => Ok(false),
            },
            FilterExpr::NotIn { not_in: (path, values) } => match path.extract(record)? {
                Some(v) => Ok(!values
                    .iter()
                    .any(|candidate| Self::order(&v, candidate) == Some(Ordering::Equal))),
                // A missing field is not in the list
                None => Ok(true),
            },
            FilterExpr::Contains {
                contains: (path, substring),
            } => match path.extract(record)? {
                Some(Value::String(s)) => Ok(s.contains(substring.as_str())),
                _ => Ok(false),
            },
            FilterExpr::Exists { exists } => Ok(exists.extract(record)?.is_some()),
            FilterExpr::NotExists { not_exists } => Ok(not_exists.extract(record)?.is_none()),
        }
    }

    fn compare<F>(left: Option<&Value>, right: &Value, accept: F) -> EngineResult<bool>
    where
        F: Fn(Ordering) -> bool,
    {
        Ok(left
            .and_then(|l| Self::order(l, right))
            .map_or(false, accept))
    }

    /// Numbers compare numerically even when one side arrived as text
    fn order(left: &Value, right: &Value) -> Option<Ordering> {
        let as_number = |v: &Value| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
            return l.partial_cmp(&r);
        }
        match (left, right) {
            (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
            (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
            (Value::Bool(l), Value::String(r)) => Some(l.to_string().cmp(&r.to_lowercase())),
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            _ => None,
        }
    }
}
