//! Capability module exposed to component code
//!
//! Component code reaches the network only through the static `oai` module
//! registered here. It offers exactly three calls:
//!
//! ```text
//! oai::chatcmpl(request)                     // explicit request object
//! oai::chatcmpl_with_messages(messages)      // component defaults
//! oai::chatcmpl_function(function, messages) // model fills function arguments
//! ```
//!
//! Each call is attributed to the component whose execution is in progress.
//! That identity travels as a [`ComponentBinding`] in the tag of the script
//! call made by the component runner; there is no process-wide "current
//! component". A call made with no binding fails with
//! [`CapabilityError::NoBoundComponent`].

pub mod client;
pub mod models;

pub use client::{CompletionCall, CompletionClient, CompletionError};
pub use models::{
    Chatcmpl, ChatcmplRequest, Choice, FinishReason, Function, FunctionCall, FunctionCallRequest,
    Message, Parameter, Parameters, Role, Stop, Usage,
};

use crate::pipeline::model::{Component, ComponentId, PipelineId};
use crate::pipeline::sandbox;
use rhai::{Dynamic, Engine, EvalAltResult, Module, NativeCallContext, Position, INT};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Name under which the capability module is visible to component code
pub const MODULE_NAME: &str = "oai";

/// Identity of the component currently executing, plus what it needs to
/// reach the completion backend
#[derive(Clone)]
pub struct ComponentBinding {
    pub pipeline_id: PipelineId,
    pub component_id: ComponentId,
    pub component_name: String,
    client: Arc<dyn CompletionClient>,
    runtime: Handle,
}

impl fmt::Debug for ComponentBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentBinding")
            .field("pipeline_id", &self.pipeline_id)
            .field("component_id", &self.component_id)
            .field("component_name", &self.component_name)
            .finish_non_exhaustive()
    }
}

impl ComponentBinding {
    pub fn new(
        pipeline_id: PipelineId,
        component: &Component,
        client: Arc<dyn CompletionClient>,
        runtime: Handle,
    ) -> Self {
        Self {
            pipeline_id,
            component_id: component.id,
            component_name: component.name.clone(),
            client,
            runtime,
        }
    }

    /// Forward a shaped request, blocking the current thread until it completes
    ///
    /// Must be called off the async worker threads; the component runner
    /// executes component code on the blocking pool.
    fn request(&self, call: CompletionCall, body: Value) -> Result<Chatcmpl, CapabilityError> {
        let _span = crate::capability_span!(
            component_id = self.component_id,
            call = %call
        )
        .entered();
        debug!("Forwarding completion request");

        self.runtime
            .block_on(self.client.complete(self.component_id, call, body))
            .map_err(|e| {
                warn!(error = %e, "Completion request failed");
                CapabilityError::Completion(e)
            })
    }
}

/// Capability call failures
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("No component is bound to this execution; `oai` calls are only available while a component runs")]
    NoBoundComponent,

    #[error("Invalid {call} request: {message}")]
    InvalidRequest {
        call: CompletionCall,
        message: String,
    },

    #[error("Completion request failed: {0}")]
    Completion(#[from] CompletionError),
}

/// Resolve the bound component from a script call tag
pub fn bound_component(tag: Option<&Dynamic>) -> Result<ComponentBinding, CapabilityError> {
    tag.and_then(|tag| tag.clone().try_cast::<ComponentBinding>())
        .ok_or(CapabilityError::NoBoundComponent)
}

/// `oai::chatcmpl(request)`
pub fn chatcmpl(binding: &ComponentBinding, request: Value) -> Result<Chatcmpl, CapabilityError> {
    let call = CompletionCall::Request;
    let request: ChatcmplRequest = decode(call, request)?;
    request
        .validate()
        .map_err(|message| CapabilityError::InvalidRequest { call, message })?;

    binding.request(call, request.to_body())
}

/// `oai::chatcmpl_with_messages(messages)`
pub fn chatcmpl_with_messages(
    binding: &ComponentBinding,
    messages: Value,
) -> Result<Chatcmpl, CapabilityError> {
    let call = CompletionCall::WithMessages;
    let messages: Vec<Message> = decode(call, messages)?;

    binding.request(call, models::prune_nulls(json!({ "messages": messages })))
}

/// `oai::chatcmpl_function(function, messages)`
pub fn chatcmpl_function(
    binding: &ComponentBinding,
    function: Value,
    messages: Value,
) -> Result<Chatcmpl, CapabilityError> {
    let call = CompletionCall::Function;
    let function: Function = decode(call, function)?;
    let messages: Vec<Message> = decode(call, messages)?;

    binding.request(
        call,
        models::prune_nulls(json!({ "function": function, "messages": messages })),
    )
}

fn decode<T: serde::de::DeserializeOwned>(
    call: CompletionCall,
    value: Value,
) -> Result<T, CapabilityError> {
    serde_json::from_value(value).map_err(|e| CapabilityError::InvalidRequest {
        call,
        message: e.to_string(),
    })
}

/// Register the `oai` module on an engine
pub fn register(engine: &mut Engine) {
    let mut module = Module::new();

    module.set_native_fn(
        "chatcmpl",
        |ctx: NativeCallContext, request: Dynamic| -> Result<Dynamic, Box<EvalAltResult>> {
            let binding = bound_component(ctx.tag()).map_err(|e| raise(e, ctx.call_position()))?;
            let request = script_json(&request, ctx.call_position())?;
            let completion = chatcmpl(&binding, request).map_err(|e| raise(e, ctx.call_position()))?;
            sandbox::to_script_value(&completion)
        },
    );

    module.set_native_fn(
        "chatcmpl_with_messages",
        |ctx: NativeCallContext, messages: Dynamic| -> Result<Dynamic, Box<EvalAltResult>> {
            let binding = bound_component(ctx.tag()).map_err(|e| raise(e, ctx.call_position()))?;
            let messages = script_json(&messages, ctx.call_position())?;
            let completion = chatcmpl_with_messages(&binding, messages)
                .map_err(|e| raise(e, ctx.call_position()))?;
            sandbox::to_script_value(&completion)
        },
    );

    module.set_native_fn(
        "chatcmpl_function",
        |ctx: NativeCallContext,
         function: Dynamic,
         messages: Dynamic|
         -> Result<Dynamic, Box<EvalAltResult>> {
            let binding = bound_component(ctx.tag()).map_err(|e| raise(e, ctx.call_position()))?;
            let function = script_json(&function, ctx.call_position())?;
            let messages = script_json(&messages, ctx.call_position())?;
            let completion = chatcmpl_function(&binding, function, messages)
                .map_err(|e| raise(e, ctx.call_position()))?;
            sandbox::to_script_value(&completion)
        },
    );

    engine.register_static_module(MODULE_NAME, module.into());
}

fn script_json(value: &Dynamic, position: Position) -> Result<Value, Box<EvalAltResult>> {
    sandbox::from_script_value(value).map_err(|e| {
        EvalAltResult::ErrorRuntime(
            Dynamic::from(format!("Argument cannot be converted to JSON: {e}")),
            position,
        )
        .into()
    })
}

/// Turn a capability failure into a script error
///
/// HTTP failures are thrown as an object map so component code can inspect
/// them in a `catch` block; everything else is thrown as a message.
fn raise(error: CapabilityError, position: Position) -> Box<EvalAltResult> {
    let value = match &error {
        CapabilityError::Completion(CompletionError::Http { status, body }) => {
            let mut map = rhai::Map::new();
            map.insert("kind".into(), Dynamic::from("http".to_string()));
            map.insert("status".into(), Dynamic::from(*status as INT));
            map.insert("body".into(), Dynamic::from(body.clone()));
            map.insert("message".into(), Dynamic::from(error.to_string()));
            Dynamic::from_map(map)
        }
        _ => Dynamic::from(error.to_string()),
    };
    EvalAltResult::ErrorRuntime(value, position).into()
}

/// Find an uncaught HTTP failure raised by [`raise`] inside a script error
pub fn http_body_from_script_error(error: &EvalAltResult) -> Option<String> {
    match error {
        EvalAltResult::ErrorRuntime(value, _) => {
            let map = value.clone().try_cast::<rhai::Map>()?;
            let kind = map.get("kind")?.clone().into_string().ok()?;
            if kind != "http" {
                return None;
            }
            let body = map.get("body")?.clone().into_string().ok()?;
            Some(crate::store::structured_error_body(&body))
        }
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => http_body_from_script_error(inner),
        EvalAltResult::ErrorInModule(_, inner, _) => http_body_from_script_error(inner),
        _ => None,
    }
}
