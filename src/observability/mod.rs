//! Observability for the pipeline engine
//!
//! Structured logging with span macros for turns, component runs and
//! capability calls.

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};

// Span macros for structured logging
pub use logging::{capability_span, component_span, turn_span};
