//! Pipeline execution engine
//!
//! A pipeline is an ordered chain of components. The
//! [`PipelineOrchestrator`] runs a chat turn through the chain; the
//! [`ComponentRunner`] executes one component at a time on a script engine
//! built by [`sandbox::build_engine`].

pub mod component_runner;
pub mod model;
pub mod pipeline_orchestrator;
pub mod sandbox;

pub use component_runner::ComponentRunner;
pub use model::{
    api_message, Component, ComponentId, ComponentOutcome, Mapping, PipelineId, PipelineSnapshot,
    API_MESSAGE_KEY,
};
pub use pipeline_orchestrator::{PipelineOrchestrator, TurnOutcome};
