//! Mock implementations for testing
//!
//! Provides mock StateStore and CompletionClient implementations so the
//! engine can be exercised without a running backend.

use crate::capability::models::{Chatcmpl, Choice, FinishReason, Message, Role, Usage};
use crate::capability::{CompletionCall, CompletionClient, CompletionError};
use crate::pipeline::model::{ComponentId, PipelineId, PipelineSnapshot};
use crate::store::{ChatTurn, StateSave, StateStore, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type RecordedCall = (ComponentId, CompletionCall, Value);

/// Mock state store for testing
#[derive(Debug, Default)]
pub struct MockStateStore {
    pub pipelines: HashMap<PipelineId, PipelineSnapshot>,
    pub saved_states: Arc<Mutex<Vec<(ComponentId, StateSave)>>>,
    pub saved_chats: Arc<Mutex<Vec<(PipelineId, ChatTurn)>>>,
    pub fetch_failure: Option<StoreError>,
    pub save_states_failures: HashMap<ComponentId, StoreError>,
    pub save_chat_failure: Option<StoreError>,
}

impl MockStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pipeline(mut self, pipeline_id: PipelineId, snapshot: PipelineSnapshot) -> Self {
        self.pipelines.insert(pipeline_id, snapshot);
        self
    }

    pub fn with_fetch_failure(mut self, error: StoreError) -> Self {
        self.fetch_failure = Some(error);
        self
    }

    pub fn with_save_states_failure(mut self, component_id: ComponentId, error: StoreError) -> Self {
        self.save_states_failures.insert(component_id, error);
        self
    }

    pub fn with_save_chat_failure(mut self, error: StoreError) -> Self {
        self.save_chat_failure = Some(error);
        self
    }

    pub async fn saved_states(&self) -> Vec<(ComponentId, StateSave)> {
        self.saved_states.lock().await.clone()
    }

    pub async fn saved_chats(&self) -> Vec<(PipelineId, ChatTurn)> {
        self.saved_chats.lock().await.clone()
    }
}

#[async_trait]
impl StateStore for MockStateStore {
    async fn fetch_pipeline(
        &self,
        pipeline_id: PipelineId,
    ) -> Result<PipelineSnapshot, StoreError> {
        if let Some(error) = &self.fetch_failure {
            return Err(error.clone());
        }

        self.pipelines
            .get(&pipeline_id)
            .cloned()
            .ok_or_else(|| StoreError::Http {
                status: 404,
                body: r#"{"detail": "Pipeline not found"}"#.to_string(),
            })
    }

    async fn save_states(
        &self,
        component_id: ComponentId,
        save: &StateSave,
    ) -> Result<(), StoreError> {
        if let Some(error) = self.save_states_failures.get(&component_id) {
            return Err(error.clone());
        }

        self.saved_states
            .lock()
            .await
            .push((component_id, save.clone()));
        Ok(())
    }

    async fn save_chat(&self, pipeline_id: PipelineId, turn: &ChatTurn) -> Result<(), StoreError> {
        if let Some(error) = &self.save_chat_failure {
            return Err(error.clone());
        }

        self.saved_chats
            .lock()
            .await
            .push((pipeline_id, turn.clone()));
        Ok(())
    }
}

/// Build a single-choice assistant completion with the given text
pub fn completion(content: impl Into<String>) -> Chatcmpl {
    Chatcmpl {
        id: "chatcmpl-mock".to_string(),
        choices: vec![Choice {
            finish_reason: Some(FinishReason::Stop),
            index: 0,
            message: Message {
                role: Role::Assistant,
                content: Some(content.into()),
                name: None,
                function_call: None,
            },
        }],
        created: 0,
        model: "mock-model".to_string(),
        object: "chat.completion".to_string(),
        usage: Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        },
    }
}

/// Mock completion client for testing
///
/// Hands out its responses in order, cycling when it runs out, and records
/// every call it receives.
#[derive(Debug)]
pub struct MockCompletionClient {
    pub responses: Vec<Chatcmpl>,
    pub current_response: Arc<Mutex<usize>>,
    pub calls: Arc<Mutex<Vec<RecordedCall>>>,
    pub failure: Option<CompletionError>,
}

impl MockCompletionClient {
    pub fn new(responses: Vec<Chatcmpl>) -> Self {
        Self {
            responses,
            current_response: Arc::new(Mutex::new(0)),
            calls: Arc::new(Mutex::new(Vec::new())),
            failure: None,
        }
    }

    pub fn single_response(content: impl Into<String>) -> Self {
        Self::new(vec![completion(content)])
    }

    pub fn with_failure(error: CompletionError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new(vec![])
        }
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn complete(
        &self,
        component_id: ComponentId,
        call: CompletionCall,
        body: Value,
    ) -> Result<Chatcmpl, CompletionError> {
        self.calls.lock().await.push((component_id, call, body));

        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        let mut current = self.current_response.lock().await;
        let response_idx = *current % self.responses.len().max(1);
        *current += 1;

        Ok(self
            .responses
            .get(response_idx)
            .cloned()
            .unwrap_or_else(|| completion("Mock response")))
    }
}
