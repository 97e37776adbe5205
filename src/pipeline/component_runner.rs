//! Component runner
//!
//! Runs one component of a pipeline:
//!
//! 1. Bind the component's identity to the call (capability tag)
//! 2. Compile its source under a synthetic name
//! 3. Build a namespace from copies of `pstate` and the component state
//! 4. Execute top-level code, then call `fn <function_name>(message, data)`
//! 5. Validate that `state`, `pstate` and the return value are maps
//! 6. Commit the component state and persist it with the new `pstate`
//!
//! The identity binding lives only inside the script call, so it is gone
//! on every exit path.

use crate::capability::{ComponentBinding, CompletionClient};
use crate::error::{ContractViolation, PipelineError, PipelineResult};
use crate::pipeline::model::{Component, ComponentOutcome, Mapping, PipelineId};
use crate::pipeline::sandbox::{self, Namespace, PSTATE_KEY, STATE_KEY};
use crate::store::{StateSave, StateStore};
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Scope, AST};
use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, info};

/// Executes components against a shared engine
#[derive(Clone)]
pub struct ComponentRunner {
    engine: Arc<Engine>,
    store: Arc<dyn StateStore>,
    completions: Arc<dyn CompletionClient>,
}

/// Everything a finished execution produced, before persistence
struct Execution {
    state: Mapping,
    outcome: ComponentOutcome,
}

impl ComponentRunner {
    pub fn new(
        engine: Engine,
        store: Arc<dyn StateStore>,
        completions: Arc<dyn CompletionClient>,
    ) -> Self {
        Self {
            engine: Arc::new(engine),
            store,
            completions,
        }
    }

    /// The engine component code runs on
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run one component and persist what it left behind
    ///
    /// `pstate` is only read; the pipeline state produced by the component is
    /// returned in the outcome. `component.state` is replaced once the
    /// execution has passed validation. Nothing is persisted for a component
    /// that breaks its contract.
    pub async fn run_component(
        &self,
        pipeline_id: PipelineId,
        component: &mut Component,
        pstate: &Mapping,
        user_message: &str,
        data: Mapping,
    ) -> PipelineResult<ComponentOutcome> {
        let span = crate::component_span!(
            pipeline_id = pipeline_id,
            component_id = component.id,
            component = %component.name
        );

        let execution = {
            let engine = Arc::clone(&self.engine);
            let binding = ComponentBinding::new(
                pipeline_id,
                component,
                Arc::clone(&self.completions),
                Handle::current(),
            );
            let snapshot = component.clone();
            let pstate = pstate.clone();
            let user_message = user_message.to_string();
            let task_span = span.clone();

            tokio::task::spawn_blocking(move || {
                let _entered = task_span.enter();
                execute(&engine, binding, &snapshot, &pstate, user_message, data)
            })
            .await
            .map_err(|e| {
                error!(parent: &span, error = %e, "Component execution task failed");
                PipelineError::internal(format!(
                    "execution of component '{}' did not complete: {e}",
                    component.name
                ))
            })??
        };

        let Execution { state, outcome } = execution;
        component.state = state;

        let save = StateSave {
            state: component.state.clone(),
            pstate: outcome.pstate.clone(),
        };
        self.store
            .save_states(component.id, &save)
            .await
            .map_err(|source| {
                error!(parent: &span, error = %source, "Failed to persist component state");
                PipelineError::RemoteSave {
                    target: format!("state of component '{}'", component.name),
                    source,
                }
            })?;

        info!(parent: &span, "Component completed");
        Ok(outcome)
    }
}

/// Compile, execute and validate one component on the current thread
///
/// Blocks on capability calls, so it must not run on an async worker.
fn execute(
    engine: &Engine,
    binding: ComponentBinding,
    component: &Component,
    pstate: &Mapping,
    user_message: String,
    data: Mapping,
) -> PipelineResult<Execution> {
    let ast = compile(engine, binding.pipeline_id, component)?;

    let runtime_error = |source: Box<EvalAltResult>| PipelineError::ComponentRuntime {
        component: component.name.clone(),
        source,
    };

    let contract = |violation| PipelineError::contract(component.name.clone(), violation);

    let mut namespace = Namespace::new(pstate, &component.state).map_err(contract)?;
    let data = sandbox::slot_value("data", &data).map_err(contract)?;

    let mut scope = Scope::new();
    let options = CallFnOptions::new()
        .eval_ast(true)
        .rewind_scope(true)
        .bind_this_ptr(namespace.this_mut())
        .with_tag(binding);

    debug!(function = %component.function_name, "Calling component entrypoint");
    let returned: Dynamic = engine
        .call_fn_with_options(
            options,
            &mut scope,
            &ast,
            &component.function_name,
            (user_message, data),
        )
        .map_err(runtime_error)?;

    let (new_pstate, new_state) = namespace.into_parts();

    let state =
        into_mapping(new_state, STATE_KEY, ContractViolation::StateNotMap).map_err(contract)?;
    let pstate =
        into_mapping(new_pstate, PSTATE_KEY, ContractViolation::PstateNotMap).map_err(contract)?;
    let data = into_mapping(Some(returned), "return value", ContractViolation::ReturnNotMap)
        .map_err(contract)?;

    Ok(Execution {
        state,
        outcome: ComponentOutcome { data, pstate },
    })
}

fn compile(engine: &Engine, pipeline_id: PipelineId, component: &Component) -> PipelineResult<AST> {
    let mut ast = engine
        .compile(&component.code)
        .map_err(|source| PipelineError::ComponentCompile {
            component: component.name.clone(),
            source,
        })?;
    ast.set_source(component.source_name(pipeline_id));

    let has_entrypoint = ast
        .iter_functions()
        .any(|f| f.name == component.function_name && f.params.len() == 2);
    if !has_entrypoint {
        return Err(PipelineError::MissingEntrypoint {
            component: component.name.clone(),
            function_name: component.function_name.clone(),
        });
    }
    Ok(ast)
}

fn into_mapping(
    value: Option<Dynamic>,
    slot: &'static str,
    not_map: ContractViolation,
) -> Result<Mapping, ContractViolation> {
    let value = value.filter(Dynamic::is_map).ok_or(not_map.clone())?;
    match sandbox::from_script_value(&value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(not_map),
        Err(e) => Err(ContractViolation::NotSerializable {
            slot,
            reason: e.to_string(),
        }),
    }
}
