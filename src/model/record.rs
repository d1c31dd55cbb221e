use crate::model::{generate_id, Id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default timestamp for records imported without audit data
fn default_timestamp() -> DateTime<Utc> {
    DateTime::from_timestamp(0, 0).unwrap_or_else(Utc::now)
}

/// A domain entity of any registered type.
///
/// The engine never knows the concrete type: scalar values live in `fields`,
/// references to other records (by primary key in the same store) in `links`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Id,
    #[serde(rename = "type")]
    pub type_name: String,
    /// Empty until the first save assigns one
    #[serde(default)]
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_from_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version_uri: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub links: BTreeMap<String, Link>,

    #[serde(default = "default_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_timestamp")]
    pub updated_at: DateTime<Utc>,
}

/// A reference field value: either a single (optional) target or an ordered collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Link {
    One(Option<Id>),
    Many(Vec<Id>),
}

impl Link {
    pub fn targets(&self) -> Vec<Id> {
        match self {
            Link::One(Some(id)) => vec![id.clone()],
            Link::One(None) => Vec::new(),
            Link::Many(ids) => ids.clone(),
        }
    }

    pub fn points_to(&self, id: &Id) -> bool {
        match self {
            Link::One(target) => target.as_ref() == Some(id),
            Link::Many(ids) => ids.contains(id),
        }
    }

    /// Replace every occurrence of `from`; `None` removes it
    pub fn retarget(&mut self, from: &Id, to: Option<&Id>) {
        match self {
            Link::One(target) => {
                if target.as_ref() == Some(from) {
                    *target = to.cloned();
                }
            }
            Link::Many(ids) => {
                let mut replaced = Vec::with_capacity(ids.len());
                for id in ids.drain(..) {
                    if &id == from {
                        if let Some(to) = to {
                            if !replaced.contains(to) {
                                replaced.push(to.clone());
                            }
                        }
                    } else {
                        replaced.push(id);
                    }
                }
                *ids = replaced;
            }
        }
    }
}

impl Record {
    pub fn new(type_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            type_name: type_name.into(),
            uri: String::new(),
            imported_from_uri: None,
            previous_version_uri: None,
            fields: BTreeMap::new(),
            links: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn with_link(mut self, name: &str, target: &Id) -> Self {
        self.links
            .insert(name.to_string(), Link::One(Some(target.clone())));
        self
    }

    pub fn with_links(mut self, name: &str, targets: Vec<Id>) -> Self {
        self.links.insert(name.to_string(), Link::Many(targets));
        self
    }

    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }

    pub fn link_one(&self, name: &str) -> Option<&Id> {
        match self.links.get(name) {
            Some(Link::One(target)) => target.as_ref(),
            _ => None,
        }
    }

    pub fn link_many(&self, name: &str) -> &[Id] {
        match self.links.get(name) {
            Some(Link::Many(ids)) => ids,
            _ => &[],
        }
    }

    /// Append to a collection link unless the target is already present
    pub fn push_link(&mut self, name: &str, target: &Id) -> bool {
        let link = self
            .links
            .entry(name.to_string())
            .or_insert_with(|| Link::Many(Vec::new()));
        match link {
            Link::Many(ids) => {
                if ids.contains(target) {
                    false
                } else {
                    ids.push(target.clone());
                    true
                }
            }
            Link::One(_) => {
                *link = Link::Many(vec![target.clone()]);
                true
            }
        }
    }

    /// Single-valued links that point back at this very record
    pub fn self_links(&self) -> Vec<String> {
        self.links
            .iter()
            .filter_map(|(name, link)| match link {
                Link::One(Some(target)) if target == &self.id => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every record this one points at, with the attribute holding the link
    pub fn outbound(&self) -> Vec<(String, Id)> {
        self.links
            .iter()
            .flat_map(|(name, link)| {
                link.targets()
                    .into_iter()
                    .map(move |target| (name.clone(), target))
            })
            .collect()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_json_shapes() {
        let one: Link = serde_json::from_str(r#""abc""#).unwrap();
        assert_eq!(one, Link::One(Some("abc".to_string())));

        let none: Link = serde_json::from_str("null").unwrap();
        assert_eq!(none, Link::One(None));

        let many: Link = serde_json::from_str(r#"["a", "b"]"#).unwrap();
        assert_eq!(many, Link::Many(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_retarget_collection_keeps_order_and_dedupes() {
        let mut link = Link::Many(vec!["a".into(), "old".into(), "b".into(), "new".into()]);
        link.retarget(&"old".to_string(), Some(&"new".to_string()));
        assert_eq!(link, Link::Many(vec!["a".into(), "new".into(), "b".into()]));

        link.retarget(&"b".to_string(), None);
        assert_eq!(link, Link::Many(vec!["a".into(), "new".into()]));
    }

    #[test]
    fn test_push_link_is_idempotent() {
        let mut record = Record::new("Continent");
        assert!(record.push_link("states", &"s1".to_string()));
        assert!(!record.push_link("states", &"s1".to_string()));
        assert_eq!(record.link_many("states").len(), 1);
    }

    #[test]
    fn test_self_links() {
        let mut record = Record::new("Person");
        let own = record.id.clone();
        record = record.with_link("mentor", &own).with_link("friend", &"other".to_string());
        assert_eq!(record.self_links(), vec!["mentor".to_string()]);
    }
}
