//! State store abstraction
//!
//! The store owns pipeline definitions, pipeline/component state and the
//! chat history. The engine only ever talks to it through [`StateStore`], so
//! tests can swap in [`crate::testing::MockStateStore`].

use crate::pipeline::model::{ComponentId, Mapping, PipelineId, PipelineSnapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body persisted after every successful component execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSave {
    pub state: Mapping,
    pub pstate: Mapping,
}

/// One chat turn appended to the conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub user_message: String,
    pub api_message: String,
}

/// Persistence backend for pipelines, component state and chat history
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch the pipeline definition together with its current state
    async fn fetch_pipeline(&self, pipeline_id: PipelineId)
        -> Result<PipelineSnapshot, StoreError>;

    /// Persist one component's state and the pipeline state it left behind
    async fn save_states(
        &self,
        component_id: ComponentId,
        save: &StateSave,
    ) -> Result<(), StoreError>;

    /// Append a turn to the pipeline's chat history
    async fn save_chat(&self, pipeline_id: PipelineId, turn: &ChatTurn) -> Result<(), StoreError>;
}

/// Store failures. Never retried.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl StoreError {
    /// The remote error body when this failure came from an HTTP response
    pub fn structured_body(&self) -> Option<String> {
        match self {
            StoreError::Http { body, .. } => Some(structured_error_body(body)),
            _ => None,
        }
    }
}

/// Prefer the `detail` field of a JSON error body, else the raw text
pub fn structured_error_body(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("detail")
                .and_then(|d| d.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}
