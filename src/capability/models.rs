//! Chat-completion request and response models
//!
//! These are the shapes component code builds and receives through the
//! `oai` module. Requests are validated here before anything leaves the
//! process; responses are parsed leniently so backend additions don't break
//! components.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Message roles in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

/// Function call emitted by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// JSON-encoded arguments, exactly as the model produced them
    pub arguments: String,
    pub name: String,
}

impl FunctionCall {
    /// Decode the arguments the model filled in
    pub fn parsed_arguments(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.arguments)
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

/// How the model may call the supplied functions
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "FunctionCallRepr")]
pub enum FunctionCallRequest {
    #[default]
    None,
    Auto,
    Named(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FunctionCallRepr {
    Mode(String),
    Object {
        #[serde(default)]
        auto: bool,
        #[serde(default)]
        name: Option<String>,
    },
}

impl TryFrom<FunctionCallRepr> for FunctionCallRequest {
    type Error = String;

    fn try_from(repr: FunctionCallRepr) -> Result<Self, Self::Error> {
        match repr {
            FunctionCallRepr::Mode(mode) => match mode.as_str() {
                "none" => Ok(Self::None),
                "auto" => Ok(Self::Auto),
                other => Err(format!(
                    "function_call must be \"none\", \"auto\" or {{name}}, got \"{other}\""
                )),
            },
            FunctionCallRepr::Object {
                name: Some(name), ..
            } => Ok(Self::Named(name)),
            FunctionCallRepr::Object { auto: true, .. } => Ok(Self::Auto),
            FunctionCallRepr::Object { .. } => Ok(Self::None),
        }
    }
}

impl Serialize for FunctionCallRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::None => serializer.serialize_str("none"),
            Self::Auto => serializer.serialize_str("auto"),
            Self::Named(name) => json!({ "name": name }).serialize(serializer),
        }
    }
}

/// One function parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    #[serde(default, skip_serializing)]
    pub required: bool,
}

/// Function parameters, serialized as a JSON-schema object
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Parameters(pub BTreeMap<String, Parameter>);

impl Parameters {
    pub fn to_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .0
            .iter()
            .map(|(name, param)| {
                (
                    name.clone(),
                    serde_json::to_value(param).unwrap_or(Value::Null),
                )
            })
            .collect();
        let required: Vec<&String> = self
            .0
            .iter()
            .filter(|(_, param)| param.required)
            .map(|(name, _)| name)
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

impl Serialize for Parameters {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_schema().serialize(serializer)
    }
}

/// A function the model can be asked to call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub description: String,
    pub name: String,
    pub parameters: Parameters,
}

/// Stop sequence(s)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stop {
    One(String),
    Many(Vec<String>),
}

/// Full chat completion request built by component code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatcmplRequest {
    pub deployment_id: String,
    pub messages: Vec<Message>,
    pub model: String,
    #[serde(default)]
    pub frequency_penalty: f64,
    #[serde(default)]
    pub function_call: FunctionCallRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<Function>>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_n")]
    pub n: u32,
    #[serde(default)]
    pub presence_penalty: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Stop>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_n() -> u32 {
    1
}

fn default_temperature() -> f64 {
    1.0
}

fn default_top_p() -> f64 {
    1.0
}

impl ChatcmplRequest {
    /// Check value ranges the backend would otherwise reject
    pub fn validate(&self) -> Result<(), String> {
        if !(-2.0..=2.0).contains(&self.frequency_penalty) {
            return Err(format!(
                "frequency_penalty must be between -2.0 and 2.0, got {}",
                self.frequency_penalty
            ));
        }
        if !(-2.0..=2.0).contains(&self.presence_penalty) {
            return Err(format!(
                "presence_penalty must be between -2.0 and 2.0, got {}",
                self.presence_penalty
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                self.temperature
            ));
        }
        if self.max_tokens == 0 {
            return Err("max_tokens must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Request body as sent to the backend
    ///
    /// `function_call` only makes sense alongside `functions`, so it is
    /// dropped when no functions are given.
    pub fn to_body(&self) -> Value {
        let mut body = serde_json::to_value(self).unwrap_or(Value::Null);
        if self.functions.is_none() {
            if let Some(object) = body.as_object_mut() {
                object.remove("function_call");
            }
        }
        prune_nulls(body)
    }
}

/// Remove null members from every object, recursively
pub fn prune_nulls(value: Value) -> Value {
    match value {
        Value::Object(object) => Value::Object(
            object
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, prune_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(prune_nulls).collect()),
        other => other,
    }
}

/// Reason why completion finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    FunctionCall,
    ContentFilter,
    #[serde(other)]
    Other,
}

/// One completion choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
    #[serde(default)]
    pub index: u32,
    pub message: Message,
}

/// Token usage statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub completion_tokens: u32,
    pub prompt_tokens: u32,
    pub total_tokens: u32,
}

/// Parsed chat completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chatcmpl {
    #[serde(default)]
    pub id: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub created: i64,
    pub model: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub usage: Usage,
}

impl Chatcmpl {
    /// Text of the first choice, if any
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
    }

    /// Function call of the first choice, if any
    pub fn function_call(&self) -> Option<&FunctionCall> {
        self.choices
            .first()
            .and_then(|choice| choice.message.function_call.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_request() -> ChatcmplRequest {
        serde_json::from_value(json!({
            "deployment_id": "gpt-35",
            "model": "gpt-3.5-turbo",
            "messages": [{"role": "user", "content": "Hi"}]
        }))
        .unwrap()
    }

    #[test]
    fn test_request_defaults() {
        let request = minimal_request();

        assert_eq!(request.max_tokens, 2048);
        assert_eq!(request.n, 1);
        assert_eq!(request.temperature, 1.0);
        assert_eq!(request.top_p, 1.0);
        assert_eq!(request.function_call, FunctionCallRequest::None);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_body_drops_unused_fields() {
        let body = minimal_request().to_body();
        let object = body.as_object().unwrap();

        assert!(!object.contains_key("functions"));
        assert!(!object.contains_key("function_call"));
        assert!(!object.contains_key("stop"));
        assert!(!object.contains_key("user"));
        assert_eq!(body["messages"][0], json!({"role": "user", "content": "Hi"}));
    }

    #[test]
    fn test_body_keeps_function_call_with_functions() {
        let request: ChatcmplRequest = serde_json::from_value(json!({
            "deployment_id": "gpt-35",
            "model": "gpt-3.5-turbo",
            "messages": [{"role": "user", "content": "Weather in Oslo?"}],
            "function_call": {"name": "get_weather"},
            "functions": [{
                "name": "get_weather",
                "description": "Look up the weather",
                "parameters": {
                    "city": {"type": "string", "description": "City name", "required": true},
                    "unit": {"type": "string", "description": "Unit", "enum": ["c", "f"]}
                }
            }],
            "stop": "\n"
        }))
        .unwrap();

        let body = request.to_body();
        assert_eq!(body["function_call"], json!({"name": "get_weather"}));
        assert_eq!(body["stop"], json!("\n"));
        assert_eq!(
            body["functions"][0]["parameters"],
            json!({
                "type": "object",
                "properties": {
                    "city": {"type": "string", "description": "City name"},
                    "unit": {"type": "string", "description": "Unit", "enum": ["c", "f"]}
                },
                "required": ["city"]
            })
        );
    }

    #[test]
    fn test_function_call_request_forms() {
        let parse = |v: Value| serde_json::from_value::<FunctionCallRequest>(v);

        assert_eq!(parse(json!("auto")).unwrap(), FunctionCallRequest::Auto);
        assert_eq!(parse(json!("none")).unwrap(), FunctionCallRequest::None);
        assert_eq!(
            parse(json!({"auto": true})).unwrap(),
            FunctionCallRequest::Auto
        );
        assert_eq!(
            parse(json!({"name": "lookup"})).unwrap(),
            FunctionCallRequest::Named("lookup".to_string())
        );
        assert!(parse(json!("sometimes")).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let mut request = minimal_request();
        request.temperature = 2.5;
        assert!(request.validate().unwrap_err().contains("temperature"));

        let mut request = minimal_request();
        request.frequency_penalty = -3.0;
        assert!(request.validate().unwrap_err().contains("frequency_penalty"));

        let mut request = minimal_request();
        request.presence_penalty = 2.1;
        assert!(request.validate().unwrap_err().contains("presence_penalty"));

        let mut request = minimal_request();
        request.max_tokens = 0;
        assert!(request.validate().unwrap_err().contains("max_tokens"));
    }

    #[test]
    fn test_integer_numbers_accepted_for_floats() {
        let request: ChatcmplRequest = serde_json::from_value(json!({
            "deployment_id": "d",
            "model": "m",
            "messages": [],
            "temperature": 0
        }))
        .unwrap();

        assert_eq!(request.temperature, 0.0);
    }

    #[test]
    fn test_prune_nulls_is_recursive() {
        let pruned = prune_nulls(json!({
            "a": null,
            "b": {"c": null, "d": 1},
            "e": [{"f": null, "g": 2}, null]
        }));

        assert_eq!(pruned, json!({"b": {"d": 1}, "e": [{"g": 2}, null]}));
    }

    #[test]
    fn test_chatcmpl_parsing_is_lenient() {
        let completion: Chatcmpl = serde_json::from_value(json!({
            "model": "gpt-4",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "function_call": {"name": "lookup", "arguments": "{\"q\": \"rust\"}"}
                },
                "finish_reason": "function_call"
            }]
        }))
        .unwrap();

        assert_eq!(completion.content(), None);
        assert_eq!(completion.usage, Usage::default());
        assert_eq!(
            completion.choices[0].finish_reason,
            Some(FinishReason::FunctionCall)
        );
        let call = completion.function_call().unwrap();
        assert_eq!(call.name, "lookup");
        assert_eq!(call.parsed_arguments().unwrap(), json!({"q": "rust"}));
    }

    #[test]
    fn test_unknown_finish_reason() {
        let reason: FinishReason = serde_json::from_value(json!("tool_calls")).unwrap();
        assert_eq!(reason, FinishReason::Other);
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::Function).unwrap(), "\"function\"");
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
    }
}
