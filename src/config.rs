use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::model::{ServerContext, TypeRegistry};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub knowledge_server: KnowledgeServerConfig,
    pub sweeps: SweepConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Identity of this member of the federation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeServerConfig {
    /// Public base URL; minted URIs start with it
    pub uri: String,
    pub name: String,
    pub organization: Option<String>,
    /// Namespace for types no structure owns
    pub default_namespace: String,
    /// JSON type registry; the built-in geography registry when unset
    pub registry_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub http_timeout_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for gzip snapshots of both stores; in-memory only when unset
    pub snapshot_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

impl Default for KnowledgeServerConfig {
    fn default() -> Self {
        Self {
            uri: "http://127.0.0.1:3001".to_string(),
            name: "Local knowledge server".to_string(),
            organization: None,
            default_namespace: "ks".to_string(),
            registry_file: None,
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60,
            http_timeout_seconds: 10,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and config file
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        // Add default configuration
        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        // Add config file if it exists
        config = config.add_source(config::File::with_name("config").required(false));

        // Environment variables with prefix "KS_", e.g. KS_KNOWLEDGE_SERVER__URI
        config = config.add_source(
            config::Environment::with_prefix("KS")
                .separator("__")
                .prefix_separator("_"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    /// Get the server bind address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn server_context(&self) -> ServerContext {
        let mut context = ServerContext::new(
            &self.knowledge_server.uri,
            &self.knowledge_server.name,
            &self.knowledge_server.default_namespace,
        );
        context.server.organization = self.knowledge_server.organization.clone();
        context
    }

    pub fn type_registry(&self) -> anyhow::Result<TypeRegistry> {
        match &self.knowledge_server.registry_file {
            Some(path) => {
                let json = std::fs::read_to_string(path)?;
                Ok(TypeRegistry::from_json(&json)?)
            }
            None => Ok(crate::seed::default_registry()),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweeps.interval_seconds.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.sweeps.http_timeout_seconds.max(1))
    }

    /// Snapshot files of the draft and materialized stores
    pub fn snapshot_paths(&self) -> Option<(PathBuf, PathBuf)> {
        self.storage.snapshot_dir.as_ref().map(|dir| {
            let dir = PathBuf::from(dir);
            (dir.join("draft.json.gz"), dir.join("materialized.json.gz"))
        })
    }
}
