//! Script engine construction and value conversion
//!
//! Component code runs on a Rhai engine that can only see what is injected
//! into it: the `oai` capability module and the namespace bound as `this`.
//! Imports resolve to nothing and `eval` is disabled.

use crate::capability;
use crate::config::EngineSection;
use crate::error::ContractViolation;
use crate::pipeline::model::Mapping;
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Dynamic, Engine, EvalAltResult};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

/// Namespace key holding the pipeline-wide state
pub const PSTATE_KEY: &str = "pstate";
/// Namespace key holding the component's private state
pub const STATE_KEY: &str = "state";

/// Build the engine component code runs on
pub fn build_engine(limits: &EngineSection) -> Engine {
    let mut engine = Engine::new();

    engine
        .set_module_resolver(DummyModuleResolver::new())
        .set_max_operations(limits.max_operations)
        .set_max_call_levels(limits.max_call_levels)
        .set_max_expr_depths(limits.max_expr_depth, limits.max_function_expr_depth)
        .set_max_string_size(limits.max_string_size)
        .set_max_array_size(limits.max_array_size)
        .set_max_map_size(limits.max_map_size)
        .disable_symbol("eval");

    engine.on_print(|text| info!(target: "component", "{text}"));
    engine.on_debug(|text, source, position| {
        debug!(
            target: "component",
            source = source.unwrap_or("<unknown>"),
            position = %position,
            "{text}"
        )
    });

    capability::register(&mut engine);
    engine
}

/// Convert any serializable value into a script value
pub fn to_script_value<T: Serialize>(value: &T) -> Result<Dynamic, Box<EvalAltResult>> {
    rhai::serde::to_dynamic(value)
}

/// Convert a script value into JSON
pub fn from_script_value(value: &Dynamic) -> Result<Value, Box<EvalAltResult>> {
    rhai::serde::from_dynamic(value)
}

/// Convert a stored map into a script value for `slot`
///
/// Script integers are `i64`. An unsigned integer above that range would
/// come back as a float, so it is rejected instead of converted.
pub fn slot_value(slot: &'static str, value: &Mapping) -> Result<Dynamic, ContractViolation> {
    if let Some(path) = value
        .iter()
        .find_map(|(key, item)| wide_integer_path(item, key.clone()))
    {
        return Err(ContractViolation::IntegerOutOfRange { slot, path });
    }
    to_script_value(value).map_err(|e| ContractViolation::NotSerializable {
        slot,
        reason: e.to_string(),
    })
}

fn wide_integer_path(value: &Value, path: String) -> Option<String> {
    match value {
        Value::Number(n) if n.as_i64().is_none() && n.as_u64().is_some() => Some(path),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, item)| wide_integer_path(item, format!("{path}[{i}]"))),
        Value::Object(map) => map
            .iter()
            .find_map(|(key, item)| wide_integer_path(item, format!("{path}.{key}"))),
        _ => None,
    }
}

/// The allow-listed bindings a component executes against
///
/// Built from copies of the caller's state, so nothing the script does is
/// visible outside until the runner commits it.
#[derive(Debug)]
pub struct Namespace {
    this: Dynamic,
}

impl Namespace {
    pub fn new(pstate: &Mapping, state: &Mapping) -> Result<Self, ContractViolation> {
        let mut map = rhai::Map::new();
        map.insert(PSTATE_KEY.into(), slot_value(PSTATE_KEY, pstate)?);
        map.insert(STATE_KEY.into(), slot_value(STATE_KEY, state)?);
        Ok(Self {
            this: Dynamic::from_map(map),
        })
    }

    /// Value bound as `this` for the entrypoint call
    pub fn this_mut(&mut self) -> &mut Dynamic {
        &mut self.this
    }

    /// Split into `(pstate, state)` as the script left them
    ///
    /// A slot is `None` when the script removed it or replaced the namespace
    /// itself with something that is not a map.
    pub fn into_parts(self) -> (Option<Dynamic>, Option<Dynamic>) {
        match self.this.try_cast::<rhai::Map>() {
            Some(mut map) => (map.remove(PSTATE_KEY), map.remove(STATE_KEY)),
            None => (None, None),
        }
    }
}
