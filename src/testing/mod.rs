//! Testing utilities and mock implementations
//!
//! Mock collaborators for exercising the pipeline engine without a running
//! composer backend.

pub mod mocks;

pub use mocks::*;
