//! Composer pipeline engine
//!
//! Threads a chat turn through an ordered chain of user-authored components.
//! Each component is a fragment of Rhai code with a private state; all
//! components of a pipeline share a pipeline-wide state (`pstate`).
//!
//! # Overview
//!
//! - [`pipeline::PipelineOrchestrator`] fetches a pipeline, runs its
//!   components in order and saves the turn to the chat history
//! - [`pipeline::ComponentRunner`] compiles and executes one component in an
//!   allow-listed namespace, validates what it produced and persists it
//! - [`capability`] is the `oai` module component code uses to request chat
//!   completions, attributed to the component that is running
//! - [`backend::ComposerBackend`] talks to the composer backend over HTTP
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use composer_engine::backend::{BackendConfig, ComposerBackend};
//! use composer_engine::config::ComposerConfig;
//! use composer_engine::pipeline::PipelineOrchestrator;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ComposerConfig::from_env()?;
//! let backend = Arc::new(ComposerBackend::new(BackendConfig::from_config(&config)?)?);
//! let orchestrator = PipelineOrchestrator::from_config(&config, backend.clone(), backend);
//!
//! let outcome = orchestrator.chat_send(42, "Hello!").await?;
//! println!("{}", outcome.api_message);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod capability;
pub mod config;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod store;
pub mod testing;

pub use backend::{BackendConfig, BackendError, ComposerBackend};
pub use config::{ComposerConfig, ConfigError};
pub use error::{render_failure, ContractViolation, ErrorKind, PipelineError, PipelineResult};
pub use pipeline::{
    Component, ComponentRunner, Mapping, PipelineOrchestrator, PipelineSnapshot, TurnOutcome,
};
pub use store::{ChatTurn, StateSave, StateStore, StoreError};
