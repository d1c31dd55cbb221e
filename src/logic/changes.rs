use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::EngineResult;
use crate::logic::collect::{view_instances, RecordsByType};
use crate::logic::EngineContext;
use crate::model::{DataSet, Record};

/// Instances of one type that appeared, disappeared or changed between releases
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TypeDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl TypeDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn uris(&self) -> impl Iterator<Item = &String> {
        self.added.iter().chain(&self.removed).chain(&self.changed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeSet {
    pub by_type: BTreeMap<String, TypeDelta>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.by_type.values().all(TypeDelta::is_empty)
    }

    /// Every URI touched, whatever the type
    pub fn uris(&self) -> HashSet<String> {
        self.by_type.values().flat_map(|d| d.uris().cloned()).collect()
    }

    pub fn changed_types(&self) -> Vec<&str> {
        self.by_type
            .iter()
            .filter(|(_, delta)| !delta.is_empty())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Digest of the scalar attributes that get serialized
fn content_digest(ctx: &EngineContext, record: &Record) -> String {
    let mut hasher = Sha256::new();
    for field in ctx.registry.scalar_fields(record) {
        if let Some(value) = record.fields.get(&field).filter(|v| !v.is_null()) {
            hasher.update(field.as_bytes());
            hasher.update(b"=");
            hasher.update(value.to_string().as_bytes());
            hasher.update(b";");
        }
    }
    hex::encode(hasher.finalize())
}

/// Compare the graph just released with the one it replaces.
///
/// A current record matches the previous one it names in
/// `previous_version_uri`, or the one with the same URI. With
/// `all_added` (multiple releases, first release) every current instance
/// counts as added.
pub fn compute_changes(
    ctx: &EngineContext,
    current: &RecordsByType,
    previous: &RecordsByType,
    all_added: bool,
) -> ChangeSet {
    let mut changes = ChangeSet::default();
    for (type_name, records) in current {
        let delta = changes.by_type.entry(type_name.clone()).or_default();
        if all_added {
            delta.added.extend(records.iter().map(|r| r.uri.clone()));
            continue;
        }
        let before: HashMap<&str, &Record> = previous
            .get(type_name)
            .map(|records| records.iter().map(|r| (r.uri.as_str(), r)).collect())
            .unwrap_or_default();
        let mut matched: HashSet<&str> = HashSet::new();
        for record in records {
            let predecessor = record
                .previous_version_uri
                .as_deref()
                .and_then(|uri| before.get(uri))
                .or_else(|| before.get(record.uri.as_str()));
            match predecessor {
                Some(old) => {
                    matched.insert(old.uri.as_str());
                    if content_digest(ctx, old) != content_digest(ctx, record) {
                        delta.changed.push(record.uri.clone());
                    }
                }
                None => delta.added.push(record.uri.clone()),
            }
        }
        for uri in before.keys() {
            if !matched.contains(uri) {
                delta.removed.push(uri.to_string());
            }
        }
    }
    if !all_added {
        for (type_name, records) in previous {
            if current.contains_key(type_name) {
                continue;
            }
            let delta = changes.by_type.entry(type_name.clone()).or_default();
            delta.removed.extend(records.iter().map(|r| r.uri.clone()));
        }
    }
    changes
}

/// View datasets whose current selection (in the materialized store)
/// includes an instance touched by `changes`
pub fn affected_views(ctx: &EngineContext, changes: &ChangeSet) -> EngineResult<Vec<DataSet>> {
    let touched = changes.uris();
    if touched.is_empty() {
        return Ok(Vec::new());
    }
    let changed_types = changes.changed_types();
    let mut affected: Vec<DataSet> = Vec::new();
    for structure in ctx.draft.list_structures()? {
        if !structure.is_view || !changed_types.iter().any(|t| structure.contains_type(t)) {
            continue;
        }
        for view in ctx.draft.list_datasets_for_structure(&structure.uri)? {
            if affected.iter().any(|d| d.id == view.id) {
                continue;
            }
            let selected = view_instances(ctx.materialized, &view)?;
            if selected.iter().any(|r| touched.contains(&r.uri)) {
                log::info!("View {} is affected by the release", view.uri);
                affected.push(view);
            }
        }
    }
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataType, ServerContext, TypeDef, TypeRegistry};
    use crate::store::MemoryStore;

    fn state(uri: &str, previous: Option<&str>, population: i64) -> Record {
        let mut record = Record::new("State")
            .with_field("name", "Italy")
            .with_field("population", population);
        record.uri = uri.to_string();
        record.previous_version_uri = previous.map(str::to_string);
        record
    }

    #[test]
    fn test_added_removed_changed() {
        let registry = TypeRegistry::new().with(
            TypeDef::new("State")
                .field("name", DataType::String)
                .field("population", DataType::Integer),
        );
        let server = ServerContext::new("http://ks.example.org", "Example", "geo");
        let (draft, materialized) = (MemoryStore::new("draft"), MemoryStore::new("materialized"));
        let ctx = EngineContext::new(&registry, &server, &draft, &materialized);

        let previous = RecordsByType::from([(
            "State".to_string(),
            vec![state("s/1", None, 59), state("s/2", None, 10), state("s/3", None, 5)],
        )]);
        let current = RecordsByType::from([(
            "State".to_string(),
            vec![state("s/1b", Some("s/1"), 60), state("s/2b", Some("s/2"), 10), state("s/4", None, 1)],
        )]);

        let changes = compute_changes(&ctx, &current, &previous, false);
        let delta = &changes.by_type["State"];
        assert_eq!(delta.changed, vec!["s/1b"]);
        assert_eq!(delta.added, vec!["s/4"]);
        assert_eq!(delta.removed, vec!["s/3"]);
        assert_eq!(changes.uris().len(), 3);
    }

    #[test]
    fn test_all_added() {
        let registry = TypeRegistry::new();
        let server = ServerContext::new("http://ks.example.org", "Example", "geo");
        let (draft, materialized) = (MemoryStore::new("draft"), MemoryStore::new("materialized"));
        let ctx = EngineContext::new(&registry, &server, &draft, &materialized);
        let current = RecordsByType::from([("State".to_string(), vec![state("s/1", None, 1)])]);
        let changes = compute_changes(&ctx, &current, &current, true);
        assert_eq!(changes.by_type["State"].added, vec!["s/1"]);
        assert!(changes.by_type["State"].removed.is_empty());
    }
}
