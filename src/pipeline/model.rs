//! Shared data model for pipeline execution
//!
//! Components, pipeline state and the data payload are all plain JSON
//! mappings at the boundary; the runner converts them into script values on
//! entry and back on commit.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON object. Used for pipeline state, component state and data payloads.
pub type Mapping = Map<String, Value>;

/// Backend identifier of a pipeline
pub type PipelineId = i64;

/// Backend identifier of a component instance
pub type ComponentId = i64;

/// Key in the final data payload holding the user-visible reply
pub const API_MESSAGE_KEY: &str = "api_message";

/// One stage of a pipeline: user-authored code plus its private state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: ComponentId,
    pub name: String,
    /// Rhai source defining `fn <function_name>(message, data)`
    pub code: String,
    pub function_name: String,
    #[serde(default)]
    pub state: Mapping,
}

impl Component {
    /// Synthetic source name attached to compiled code for diagnostics
    pub fn source_name(&self, pipeline_id: PipelineId) -> String {
        format!("pipeline {pipeline_id} component {}", self.id)
    }
}

/// Pipeline definition and current pipeline state as served by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    #[serde(alias = "state", default)]
    pub pstate: Mapping,
    /// Execution order is the order the store returns
    #[serde(default)]
    pub components: Vec<Component>,
}

/// What a single component execution hands back to the chain
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentOutcome {
    /// Return value of the entrypoint, fed to the next component
    pub data: Mapping,
    /// Pipeline state after this component, fed to the next component
    pub pstate: Mapping,
}

/// Extract the user-visible reply from a final data payload
pub fn api_message(data: &Mapping) -> Option<String> {
    match data.get(API_MESSAGE_KEY)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
