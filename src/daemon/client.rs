//! HTTP client for the Ollama inference daemon.

use crate::config::DaemonConfig;
use crate::error::RelayError;
use crate::protocol::{GenerationReply, GenerationRequest};
use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Placeholder returned when the daemon's reply has no `response` field.
pub const EMPTY_REPLY: &str = "No response from AI";

/// Client for one daemon, shared by every request.
///
/// The underlying `reqwest::Client` pools connections, but each request still
/// owns its own response and body.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    config: DaemonConfig,
    client: Client,
}

impl DaemonClient {
    /// Create a new daemon client.
    ///
    /// Connect and per-read timeouts come from the config. No overall timeout
    /// is set on the client so that streams may run until the daemon says done.
    pub fn new(config: DaemonConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.timeout())
            .read_timeout(config.timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { config, client })
    }

    /// The daemon base URL.
    pub fn base_url(&self) -> &str {
        &self.config.url
    }

    /// The model every generation request asks for.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.url.trim_end_matches('/'), path)
    }

    fn generation_request(&self, prompt: &str, stream: bool) -> GenerationRequest {
        GenerationRequest {
            model: self.config.model.clone(),
            prompt: prompt.to_string(),
            stream,
        }
    }

    /// Single round trip: send the prompt and return the whole reply.
    pub async fn generate(&self, prompt: &str) -> Result<String, RelayError> {
        let url = self.endpoint("/api/generate");
        let request = self.generation_request(prompt, false);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(self.config.timeout())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            debug!("Daemon returned {} for {}", status, url);
            return Err(RelayError::Upstream(status.as_u16()));
        }

        let reply: GenerationReply = response.json().await?;
        Ok(reply.response.unwrap_or_else(|| EMPTY_REPLY.to_string()))
    }

    /// Open a streaming generation. On success the caller owns the response
    /// and consumes its body; dropping it closes the daemon connection.
    pub async fn generate_stream(&self, prompt: &str) -> Result<Response, RelayError> {
        let url = self.endpoint("/api/generate");
        let request = self.generation_request(prompt, true);

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            debug!("Daemon returned {} for {}", status, url);
            return Err(RelayError::Upstream(status.as_u16()));
        }
        Ok(response)
    }

    /// Check if the daemon is available/reachable.
    pub async fn health_check(&self) -> Result<()> {
        self.list_models().await.map(|_| ())
    }

    /// List the models installed in the daemon.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self.endpoint("/api/tags");
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .context("Failed to connect to Ollama - is it running?")?;

        if !response.status().is_success() {
            return Err(anyhow!("Ollama health check failed: {}", response.status()));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .context("Failed to parse Ollama model list")?;
        Ok(tags.models)
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

/// One entry of the daemon's model list.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
}
