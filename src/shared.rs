//! A cloneable, lock-guarded handle onto a [`BatchEngine`].
//!
//! The engine's own methods take `&mut self` because its internals (the
//! allocator's free list, the scheduler's heaps) are plain, non-atomic
//! structures — simplest to reason about as single-owner state. Multiple
//! callers (an HTTP handler per connection, a background tick loop) still
//! need to share one engine, so this wraps it in a single coarse-grained
//! `parking_lot::Mutex`, the same locking grain the buffer pool in this
//! codebase's ancestry uses rather than per-field fine-grained locks.
//!
//! Deliberately not a process-global singleton: callers construct and hold
//! their own `SharedEngine`, so tests can run several independent engines
//! in one process.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::AttentionBackend;
use crate::config::EngineConfig;
use crate::engine::{BatchEngine, EngineStats, TickOutcome};
use crate::error::Result;

#[derive(Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<BatchEngine>>,
}

impl SharedEngine {
    pub fn new(config: EngineConfig, backend: Box<dyn AttentionBackend>) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(BatchEngine::new(config, backend)?)),
        })
    }

    pub fn register_lane(&self, lane: impl Into<String>, weight: f64) {
        self.inner.lock().register_lane(lane, weight);
    }

    pub fn submit_request(
        &self,
        lane: impl Into<String>,
        id: impl Into<String>,
        tokens: Vec<u32>,
    ) -> Result<()> {
        self.inner.lock().submit_request(lane, id, tokens)
    }

    /// Advance one tick. The lock is held for the whole call, including
    /// the backend's `forward` call — matches the single-core cooperative
    /// semantics this engine targets, where only one tick ever runs at a
    /// time anyway.
    pub async fn run_once(&self) -> Result<Option<TickOutcome>> {
        let mut guard = self.inner.lock();
        guard.run_once().await
    }

    pub fn retire(&self, request_id: &str) {
        self.inner.lock().retire(request_id);
    }

    pub fn stats(&self) -> EngineStats {
        self.inner.lock().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EchoBackend;

    #[tokio::test]
    async fn shared_handle_clones_share_state() {
        let engine = SharedEngine::new(EngineConfig::default(), Box::new(EchoBackend)).unwrap();
        engine.register_lane("default", 1.0);
        let handle = engine.clone();
        handle.submit_request("default", "A", vec![1, 2, 3]).unwrap();
        assert_eq!(engine.stats().orchestrator.submitted, 1);
    }
}
