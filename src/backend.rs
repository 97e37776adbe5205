//! HTTP client for the composer backend
//!
//! Implements both [`StateStore`] and [`CompletionClient`] against the
//! backend's REST routes. Every request carries the bearer token. Nothing
//! is retried.

use crate::capability::{Chatcmpl, CompletionCall, CompletionClient, CompletionError};
use crate::config::{ComposerConfig, ConfigError};
use crate::pipeline::model::{ComponentId, PipelineId, PipelineSnapshot};
use crate::store::{ChatTurn, StateSave, StateStore, StoreError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Backend connection settings
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub access_token: String,
    pub timeout: Option<Duration>,
}

impl BackendConfig {
    /// Resolve settings from configuration, reading the token from the environment
    pub fn from_config(config: &ComposerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: config.backend.base_url.clone(),
            access_token: config.get_access_token()?,
            timeout: config.request_timeout(),
        })
    }
}

/// Backend transport failures
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<BackendError> for StoreError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::Http { status, body } => StoreError::Http { status, body },
            BackendError::InvalidResponse(msg) => StoreError::InvalidResponse(msg),
            BackendError::Network(msg) | BackendError::ClientBuild(msg) => {
                StoreError::Network(msg)
            }
        }
    }
}

impl From<BackendError> for CompletionError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::Http { status, body } => CompletionError::Http { status, body },
            BackendError::InvalidResponse(msg) => CompletionError::InvalidResponse(msg),
            BackendError::Network(msg) | BackendError::ClientBuild(msg) => {
                CompletionError::Network(msg)
            }
        }
    }
}

/// reqwest-backed composer backend client
#[derive(Debug, Clone)]
pub struct ComposerBackend {
    config: BackendConfig,
    client: Client,
}

impl ComposerBackend {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| BackendError::ClientBuild(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Check that the backend is reachable and accepts the token
    pub async fn ping(&self) -> Result<(), BackendError> {
        let request = self.client.get(self.url("ping"));
        self.send(request).await.map(|_| ())
    }

    async fn send(&self, request: RequestBuilder) -> Result<String, BackendError> {
        let response = request
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| {
                let error_msg = format!(
                    "HTTP request failed: {} (is_connect: {}, is_timeout: {})",
                    e,
                    e.is_connect(),
                    e.is_timeout()
                );
                warn!("Backend network error: {}", error_msg);
                BackendError::Network(error_msg)
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        if !status.is_success() {
            error!(status = status.as_u16(), "Backend returned an error status");
            return Err(BackendError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, BackendError> {
        let body = self.send(request).await?;
        serde_json::from_str(&body).map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }
}

/// Completions come back wrapped as `{"response": {...}}`
fn unwrap_completion(value: Value) -> Result<Chatcmpl, BackendError> {
    let completion = match value {
        Value::Object(mut map) if map.contains_key("response") => {
            map.remove("response").unwrap_or(Value::Null)
        }
        other => other,
    };
    serde_json::from_value(completion).map_err(|e| BackendError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl StateStore for ComposerBackend {
    async fn fetch_pipeline(
        &self,
        pipeline_id: PipelineId,
    ) -> Result<PipelineSnapshot, StoreError> {
        debug!(pipeline_id, "Fetching pipeline");
        let request = self
            .client
            .get(self.url(&format!("conductor/chat/get-pipeline/{pipeline_id}")));
        Ok(self.send_json(request).await?)
    }

    async fn save_states(
        &self,
        component_id: ComponentId,
        save: &StateSave,
    ) -> Result<(), StoreError> {
        debug!(component_id, "Saving component state");
        let request = self
            .client
            .post(self.url(&format!("conductor/chat/save-states/{component_id}")))
            .json(save);
        self.send(request).await?;
        Ok(())
    }

    async fn save_chat(&self, pipeline_id: PipelineId, turn: &ChatTurn) -> Result<(), StoreError> {
        debug!(pipeline_id, "Saving chat turn");
        let request = self
            .client
            .post(self.url(&format!("conductor/chat/save-chat/{pipeline_id}")))
            .json(turn);
        self.send(request).await?;
        Ok(())
    }
}

#[async_trait]
impl CompletionClient for ComposerBackend {
    async fn complete(
        &self,
        component_id: ComponentId,
        call: CompletionCall,
        body: Value,
    ) -> Result<Chatcmpl, CompletionError> {
        let request = self
            .client
            .post(self.url(&format!(
                "conductor/chat/oai/{}/{component_id}",
                call.path()
            )))
            .json(&body);
        let value: Value = self.send_json(request).await?;
        Ok(unwrap_completion(value)?)
    }
}
