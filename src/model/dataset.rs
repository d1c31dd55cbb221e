use crate::model::{generate_id, Id, RecordFilter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Semantic version triple, ordered lexicographically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionNumber {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl VersionNumber {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Next patch level; `None` once the patch number is exhausted
    pub fn bump_patch(&self) -> Option<Self> {
        self.patch
            .checked_add(1)
            .map(|patch| Self::new(self.major, self.minor, patch))
    }

    /// Resolve a partial request against the current version.
    ///
    /// Nothing requested bumps the patch level. Otherwise given components win,
    /// components before the most significant given one are kept and the ones
    /// after it reset to zero unless given too.
    pub fn apply(&self, request: &VersionRequest) -> Option<Self> {
        match (request.major, request.minor, request.patch) {
            (None, None, None) => self.bump_patch(),
            (Some(major), minor, patch) => Some(Self::new(major, minor.unwrap_or(0), patch.unwrap_or(0))),
            (None, Some(minor), patch) => Some(Self::new(self.major, minor, patch.unwrap_or(0))),
            (None, None, Some(patch)) => Some(Self::new(self.major, self.minor, patch)),
        }
    }
}

impl Default for VersionNumber {
    fn default() -> Self {
        Self::new(0, 1, 0)
    }
}

impl Ord for VersionNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for VersionNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::str::FromStr for VersionNumber {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().trim_start_matches('v').split('.').collect();
        if parts.len() != 3 {
            return Err(format!("Invalid version number: {}", s));
        }
        let parse = |p: &str| {
            p.parse::<u32>()
                .map_err(|_| format!("Invalid version number: {}", s))
        };
        Ok(Self::new(parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
    }
}

/// Explicit components for a new version; all `None` bumps the patch level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRequest {
    #[serde(default)]
    pub major: Option<u32>,
    #[serde(default)]
    pub minor: Option<u32>,
    #[serde(default)]
    pub patch: Option<u32>,
}

impl VersionRequest {
    pub fn exact(version: VersionNumber) -> Self {
        Self {
            major: Some(version.major),
            minor: Some(version.minor),
            patch: Some(version.patch),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionState {
    Working,
    Released,
    Obsolete,
}

/// A versioned, rooted instance of a structure (or a filtered view)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
    pub id: Id,
    #[serde(default)]
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_from_uri: Option<String>,
    pub structure_uri: String,
    /// Root record (primary key in the store holding this dataset); `None` for views
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<Id>,
    /// Selection of root instances for views
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<RecordFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: VersionNumber,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_description: Option<String>,
    #[serde(default)]
    pub released: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_released_date: Option<DateTime<Utc>>,
    /// URI of the first dataset of the chain; the first one points to itself
    #[serde(default)]
    pub first_version_uri: String,
    pub owner_uri: String,
    #[serde(default)]
    pub licenses: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl DataSet {
    pub fn new(structure_uri: &str, owner_uri: &str, version: VersionNumber) -> Self {
        Self {
            id: generate_id(),
            uri: String::new(),
            imported_from_uri: None,
            structure_uri: structure_uri.to_string(),
            root: None,
            filter: None,
            description: None,
            version,
            version_description: None,
            released: false,
            version_released_date: None,
            first_version_uri: String::new(),
            owner_uri: owner_uri.to_string(),
            licenses: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn is_first_version(&self) -> bool {
        !self.uri.is_empty() && self.uri == self.first_version_uri
    }

    pub fn is_view(&self) -> bool {
        self.filter.is_some()
    }

    /// State inside its chain; `chain` holds every dataset sharing `first_version_uri`
    pub fn state_in(&self, chain: &[DataSet]) -> VersionState {
        if self.released {
            return VersionState::Released;
        }
        let newest_release = chain.iter().filter(|d| d.released).map(|d| d.version).max();
        match newest_release {
            Some(released) if self.version < released => VersionState::Obsolete,
            _ => {
                let newest = chain.iter().map(|d| d.version).max();
                if newest.map_or(true, |n| self.version >= n) {
                    VersionState::Working
                } else {
                    VersionState::Obsolete
                }
            }
        }
    }
}
