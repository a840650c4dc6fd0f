//! HTTP client for the environment's schema registry.

use crate::Result;
use serde::Deserialize;
use serde_json::json;

/// Handle to a running schema registry
#[derive(Debug, Clone)]
pub struct SchemaRegistryClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CompatibilityConfig {
    #[serde(rename = "compatibilityLevel")]
    compatibility_level: String,
}

#[derive(Debug, Deserialize)]
struct Registered {
    id: u32,
}

impl SchemaRegistryClient {
    /// Client for the registry at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Registry URL
    pub fn url(&self) -> &str {
        &self.base_url
    }

    /// Global compatibility level
    pub async fn compatibility_level(&self) -> Result<String> {
        let config: CompatibilityConfig = self
            .http
            .get(format!("{}/config", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(config.compatibility_level)
    }

    /// Registered subjects
    pub async fn subjects(&self) -> Result<Vec<String>> {
        Ok(self
            .http
            .get(format!("{}/subjects", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    /// Register a schema under a subject, returning its id
    pub async fn register(&self, subject: &str, schema: &str) -> Result<u32> {
        let registered: Registered = self
            .http
            .post(format!("{}/subjects/{}/versions", self.base_url, subject))
            .json(&json!({ "schema": schema }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(registered.id)
    }

    /// Versions registered under a subject
    pub async fn versions(&self, subject: &str) -> Result<Vec<u32>> {
        Ok(self
            .http
            .get(format!("{}/subjects/{}/versions", self.base_url, subject))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}
