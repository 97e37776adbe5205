//! Error types for pipeline execution
//!
//! Every failure that can happen while a turn runs is a [`PipelineError`].
//! The orchestrator catches them once and turns them into the outgoing chat
//! message with [`render_failure`].

use crate::capability;
use crate::pipeline::model::PipelineId;
use crate::store::StoreError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use thiserror::Error;

/// Maximum length of a rendered failure trace
const MAX_RENDERED_LEN: usize = 4000;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\w*(?:password|passwd|secret|token)|\w*api[_-]?key|access[_-]?key)\s*[=:]\s*\S+")
        .expect("secret pattern is valid")
});

static BEARER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(bearer)\s+\S+").expect("bearer pattern is valid"));

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

/// Main error type for pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to fetch pipeline {pipeline_id}: {source}")]
    RemoteFetch {
        pipeline_id: PipelineId,
        #[source]
        source: StoreError,
    },

    #[error("Failed to save {target}: {source}")]
    RemoteSave {
        target: String,
        #[source]
        source: StoreError,
    },

    #[error("Component '{component}' failed to compile: {source}")]
    ComponentCompile {
        component: String,
        #[source]
        source: rhai::ParseError,
    },

    #[error("Component '{component}' does not define `fn {function_name}(message, data)`")]
    MissingEntrypoint {
        component: String,
        function_name: String,
    },

    #[error("Component '{component}' raised an error: {source}")]
    ComponentRuntime {
        component: String,
        #[source]
        source: Box<rhai::EvalAltResult>,
    },

    #[error("Component '{component}' {violation}")]
    InvalidComponentContract {
        component: String,
        violation: ContractViolation,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Ways a component can break its contract with the runner
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("did not set a map for state")]
    StateNotMap,
    #[error("did not set a map for pstate")]
    PstateNotMap,
    #[error("did not return a map")]
    ReturnNotMap,
    #[error("received an integer in {slot} at '{path}' that is outside the script integer range")]
    IntegerOutOfRange { slot: &'static str, path: String },
    #[error("left a value in {slot} that cannot be stored as JSON: {reason}")]
    NotSerializable { slot: &'static str, reason: String },
}

/// Failure classes, named the way they appear in rendered messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RemoteFetch,
    RemoteSave,
    ComponentCompile,
    MissingEntrypoint,
    ComponentRuntime,
    InvalidComponentContract,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::RemoteFetch => "RemoteFetchError",
            ErrorKind::RemoteSave => "RemoteSaveError",
            ErrorKind::ComponentCompile => "ComponentCompileError",
            ErrorKind::MissingEntrypoint => "MissingEntrypoint",
            ErrorKind::ComponentRuntime => "ComponentRuntimeError",
            ErrorKind::InvalidComponentContract => "InvalidComponentContract",
            ErrorKind::Internal => "InternalError",
        };
        f.write_str(name)
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::RemoteFetch { .. } => ErrorKind::RemoteFetch,
            PipelineError::RemoteSave { .. } => ErrorKind::RemoteSave,
            PipelineError::ComponentCompile { .. } => ErrorKind::ComponentCompile,
            PipelineError::MissingEntrypoint { .. } => ErrorKind::MissingEntrypoint,
            PipelineError::ComponentRuntime { .. } => ErrorKind::ComponentRuntime,
            PipelineError::InvalidComponentContract { .. } => ErrorKind::InvalidComponentContract,
            PipelineError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Structured remote error body, when the failure came from an HTTP response
    ///
    /// Covers store calls and completion calls made by component code that
    /// were not caught by the component.
    pub fn http_error_body(&self) -> Option<String> {
        match self {
            PipelineError::RemoteFetch { source, .. } | PipelineError::RemoteSave { source, .. } => {
                source.structured_body()
            }
            PipelineError::ComponentRuntime { source, .. } => {
                capability::http_body_from_script_error(source)
            }
            _ => None,
        }
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create contract violation error
    pub fn contract<S: Into<String>>(component: S, violation: ContractViolation) -> Self {
        Self::InvalidComponentContract {
            component: component.into(),
            violation,
        }
    }
}

/// Render a failure as the turn's outgoing chat message
///
/// HTTP failures yield the remote error body verbatim. Everything else is
/// rendered as a trace: the error kind and message followed by its causes.
pub fn render_failure(error: &PipelineError) -> String {
    if let Some(body) = error.http_error_body() {
        return body;
    }
    sanitize_error_message(&render_trace(error))
}

fn render_trace(error: &PipelineError) -> String {
    let mut rendered = format!("{}: {}", error.kind(), error);
    let mut previous = error.to_string();
    let mut causes = Vec::new();
    let mut cause = std::error::Error::source(error);

    while let Some(current) = cause {
        let text = current.to_string();
        if !previous.contains(&text) {
            causes.push(text.clone());
        }
        previous = text;
        cause = current.source();
    }

    if !causes.is_empty() {
        rendered.push_str("\n\nCaused by:");
        for (index, text) in causes.iter().enumerate() {
            rendered.push_str(&format!("\n    {index}: {text}"));
        }
    }
    rendered
}

/// Redact credentials and sensitive paths, and cap the length
fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let sanitized = BEARER_PATTERN.replace_all(&sanitized, "${1} ***");
    let mut sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .to_string();

    if sanitized.len() > MAX_RENDERED_LEN {
        let truncate_suffix = "...[truncated]";
        let max_content_len = MAX_RENDERED_LEN - truncate_suffix.len();
        let cut = sanitized
            .char_indices()
            .map(|(index, _)| index)
            .take_while(|index| *index <= max_content_len)
            .last()
            .unwrap_or(0);
        sanitized.truncate(cut);
        sanitized.push_str(truncate_suffix);
    }

    sanitized
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
