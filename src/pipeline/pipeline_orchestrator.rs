//! Pipeline orchestrator
//!
//! Drives one chat turn: fetch the pipeline, fold the data payload through
//! every component in store order, render any failure into the outgoing
//! message and save the turn to the chat history.

use crate::capability::CompletionClient;
use crate::config::ComposerConfig;
use crate::error::{render_failure, ErrorKind, PipelineError, PipelineResult};
use crate::pipeline::component_runner::ComponentRunner;
use crate::pipeline::model::{api_message, Component, Mapping, PipelineId};
use crate::pipeline::sandbox;
use crate::store::{ChatTurn, StateStore};
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Result of one chat turn as saved to the history
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Correlates the turn's log lines
    pub turn_id: Uuid,
    /// The message saved as the reply
    pub api_message: String,
    /// Failure class when the pipeline did not complete
    pub failure: Option<ErrorKind>,
}

impl TurnOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Runs chat turns through pipelines
pub struct PipelineOrchestrator {
    store: Arc<dyn StateStore>,
    runner: ComponentRunner,
    no_message_placeholder: String,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<dyn StateStore>,
        runner: ComponentRunner,
        no_message_placeholder: impl Into<String>,
    ) -> Self {
        Self {
            store,
            runner,
            no_message_placeholder: no_message_placeholder.into(),
        }
    }

    /// Wire an orchestrator from configuration
    pub fn from_config(
        config: &ComposerConfig,
        store: Arc<dyn StateStore>,
        completions: Arc<dyn CompletionClient>,
    ) -> Self {
        let engine = sandbox::build_engine(&config.engine);
        let runner = ComponentRunner::new(engine, Arc::clone(&store), completions);
        Self::new(store, runner, config.chat.no_message_placeholder.clone())
    }

    pub fn runner(&self) -> &ComponentRunner {
        &self.runner
    }

    /// Run one chat turn and save it to the pipeline's history
    ///
    /// Failures inside the chain become the saved reply and the turn still
    /// succeeds. Only a failed pipeline fetch or a failed history save is
    /// returned as an error.
    pub async fn chat_send(
        &self,
        pipeline_id: PipelineId,
        user_message: &str,
    ) -> PipelineResult<TurnOutcome> {
        let turn_id = Uuid::new_v4();
        let span = crate::turn_span!(turn_id = %turn_id, pipeline_id = pipeline_id);

        self.chat_send_inner(turn_id, pipeline_id, user_message)
            .instrument(span)
            .await
    }

    async fn chat_send_inner(
        &self,
        turn_id: Uuid,
        pipeline_id: PipelineId,
        user_message: &str,
    ) -> PipelineResult<TurnOutcome> {
        info!("Starting chat turn");

        let snapshot = self
            .store
            .fetch_pipeline(pipeline_id)
            .await
            .map_err(|source| {
                error!(error = %source, "Failed to fetch pipeline");
                PipelineError::RemoteFetch {
                    pipeline_id,
                    source,
                }
            })?;

        debug!(
            components = snapshot.components.len(),
            "Fetched pipeline definition"
        );

        let mut components = snapshot.components;
        let (reply, failure) = match self
            .run(pipeline_id, snapshot.pstate, &mut components, user_message)
            .await
        {
            Ok(data) => (
                api_message(&data).unwrap_or_else(|| self.no_message_placeholder.clone()),
                None,
            ),
            Err(e) => {
                warn!(kind = %e.kind(), error = %e, "Pipeline failed");
                (render_failure(&e), Some(e.kind()))
            }
        };

        let turn = ChatTurn {
            user_message: user_message.to_string(),
            api_message: reply,
        };
        self.store
            .save_chat(pipeline_id, &turn)
            .await
            .map_err(|source| {
                error!(error = %source, "Failed to save chat turn");
                PipelineError::RemoteSave {
                    target: format!("chat history of pipeline {pipeline_id}"),
                    source,
                }
            })?;

        info!(success = failure.is_none(), "Chat turn saved");
        Ok(TurnOutcome {
            turn_id,
            api_message: turn.api_message,
            failure,
        })
    }

    /// Fold the data payload through `components` in order
    ///
    /// Each component sees the pipeline state left by the one before it and
    /// the data it returned; the first component starts from an empty map.
    /// Every component runs; the chain stops only on failure.
    pub async fn run(
        &self,
        pipeline_id: PipelineId,
        mut pstate: Mapping,
        components: &mut [Component],
        user_message: &str,
    ) -> PipelineResult<Mapping> {
        let mut data = Mapping::new();

        for component in components.iter_mut() {
            let outcome = self
                .runner
                .run_component(pipeline_id, component, &pstate, user_message, data)
                .await?;
            pstate = outcome.pstate;
            data = outcome.data;
        }

        Ok(data)
    }
}
