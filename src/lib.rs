//! Paged KV-cache allocator, SRPT fairness scheduler, and prefix-dedup
//! batch engine for transformer inference serving.
//!
//! Four layers, each usable on its own:
//! - [`kv`]: fixed-size block arena with LRU eviction.
//! - [`prefix_cache`]: content-addressed dedup of prompt prefixes.
//! - [`scheduler`] / [`orchestrator`]: SRPT-within-lane, weighted-fair
//!   across lanes request admission.
//! - [`engine`]: composes the three into a single-tick batch engine, and
//!   [`shared`] wraps that engine for multi-caller access.

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod kv;
pub mod orchestrator;
pub mod prefix_cache;
pub mod scheduler;
pub mod shared;

pub use config::EngineConfig;
pub use engine::{BatchEngine, EngineStats, TickOutcome};
pub use error::{EngineError, Result};
pub use shared::SharedEngine;
