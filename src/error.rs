//! Engine-wide error type.
//!
//! One enum, one `Result` alias — the same shape the rest of this codebase's
//! ancestry uses for its `DbError`/`Result` pair, scoped down to the four
//! failure modes the core actually has.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The allocator has no free blocks and nothing evictable to make room.
    #[error("KV cache capacity exhausted: {0}")]
    CapacityExhausted(String),

    /// A construction-time parameter failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// `update_progress` (or similar) referenced a request id no lane knows about.
    #[error("unknown request: {0}")]
    UnknownRequest(String),

    /// The attention backend's forward pass failed.
    #[error("attention backend failure: {0}")]
    BackendFailure(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
