//! Chatstream SDK
//!
//! Shared library providing the error taxonomy and the turn types exchanged
//! between the conversation engine and its callers.

/// Error types and handling
pub mod errors;

/// Turn input/output types
pub mod types;

// Re-export commonly used types
pub use errors::{ChatErrorExt, EngineError, ErrorKind, Result};
pub use types::{TurnConfigInput, TurnInput, TurnOutput};
