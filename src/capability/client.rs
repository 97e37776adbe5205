//! Chat-completion client abstraction
//!
//! Completions are not computed here. The backend owns model selection,
//! credentials and usage accounting; this trait only forwards a shaped
//! request on behalf of one component.

use crate::capability::models::Chatcmpl;
use crate::pipeline::model::ComponentId;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// The three request shapes a component may issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionCall {
    /// Explicit, fully specified request
    Request,
    /// Message list completed with the component's default settings
    WithMessages,
    /// Ask the model to fill in a function's arguments
    Function,
}

impl CompletionCall {
    /// Route segment on the backend
    pub fn path(&self) -> &'static str {
        match self {
            CompletionCall::Request => "chatcmpl",
            CompletionCall::WithMessages => "chatcmpl_with_messages",
            CompletionCall::Function => "chatcmpl_function",
        }
    }
}

impl std::fmt::Display for CompletionCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

/// Completion client trait for dependency injection and testing
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Forward a completion request attributed to `component_id`
    async fn complete(
        &self,
        component_id: ComponentId,
        call: CompletionCall,
        body: Value,
    ) -> Result<Chatcmpl, CompletionError>;
}

/// Completion transport failures
#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_paths() {
        assert_eq!(CompletionCall::Request.path(), "chatcmpl");
        assert_eq!(
            CompletionCall::WithMessages.path(),
            "chatcmpl_with_messages"
        );
        assert_eq!(CompletionCall::Function.path(), "chatcmpl_function");
        assert_eq!(CompletionCall::Function.to_string(), "chatcmpl_function");
    }

    #[test]
    fn test_completion_error_display() {
        let error = CompletionError::Http {
            status: 429,
            body: "slow down".to_string(),
        };
        assert_eq!(error.to_string(), "HTTP 429: slow down");
    }
}
