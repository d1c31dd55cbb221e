use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

/// Outbound HTTP used by the sweeps and by remote subscriptions
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a JSON body and return the response body
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> EngineResult<serde_json::Value>;
    /// GET a text document
    async fn get_text(&self, url: &str) -> EngineResult<String>;
}

/// Peers acknowledge with `{"status": "success"}`; anything else is retried later
pub fn is_success(response: &serde_json::Value) -> bool {
    response.get("status").and_then(|s| s.as_str()) == Some("success")
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> EngineResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> EngineResult<serde_json::Value> {
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Transport(format!("POST {} returned {}", url, status)));
        }
        Ok(response.json().await?)
    }

    async fn get_text(&self, url: &str) -> EngineResult<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Transport(format!("GET {} returned {}", url, status)));
        }
        Ok(response.text().await?)
    }
}
