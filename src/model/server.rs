use crate::model::{generate_id, Id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A member of the federation. Its URI is also the base URL of its HTTP surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeServer {
    pub id: Id,
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default)]
    pub this_server: bool,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeServer {
    pub fn new(uri: &str, name: &str) -> Self {
        Self {
            id: generate_id(),
            uri: uri.trim_end_matches('/').to_string(),
            name: name.to_string(),
            organization: None,
            this_server: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_organization(mut self, organization: &str) -> Self {
        self.organization = Some(organization.to_string());
        self
    }

    /// Build a URL below this server's root
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.uri, path.trim_start_matches('/'))
    }
}

/// Who this process is; threaded through every operation that mints URIs
/// or decides ownership.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerContext {
    pub server: KnowledgeServer,
    /// Namespace for types no structure owns
    pub default_namespace: String,
}

impl ServerContext {
    pub fn new(uri: &str, name: &str, default_namespace: &str) -> Self {
        let mut server = KnowledgeServer::new(uri, name);
        server.this_server = true;
        Self {
            server,
            default_namespace: default_namespace.to_string(),
        }
    }

    pub fn uri(&self) -> &str {
        &self.server.uri
    }

    pub fn owns(&self, owner_uri: &str) -> bool {
        self.server.uri == owner_uri.trim_end_matches('/')
    }
}
