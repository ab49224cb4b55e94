//! Thin lifecycle wrapper around [`crate::scheduler::Scheduler`].
//!
//! The scheduler only knows about tokens and lanes; the orchestrator adds
//! the bookkeeping a caller actually wants — a logical arrival clock, a
//! load factor for backpressure decisions, and a heartbeat log line, the
//! same division of labor as the teacher's resource manager keeping
//! `CpuScheduler` dumb and a higher-level manager deciding when to sound
//! alarms.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::scheduler::{ScheduledRequest, Scheduler};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorStats {
    pub submitted: u64,
    pub completed: u64,
    pub pending: usize,
    pub load_factor: f64,
}

pub struct Orchestrator {
    scheduler: Scheduler,
    default_lane_weight: f64,
    capacity_hint: usize,
    clock: u64,
    submitted: u64,
    completed: u64,
}

impl Orchestrator {
    pub fn new(default_lane_weight: f64, capacity_hint: usize) -> Self {
        Self {
            scheduler: Scheduler::new(),
            default_lane_weight,
            capacity_hint: capacity_hint.max(1),
            clock: 0,
            submitted: 0,
            completed: 0,
        }
    }

    pub fn register_lane(&mut self, lane: impl Into<String>, weight: f64) {
        self.scheduler.register_lane(lane, weight);
    }

    /// Admit a new request, stamping it with the orchestrator's logical
    /// arrival clock so SRPT tie-breaks stay FIFO within equal remaining
    /// token counts.
    pub fn submit(&mut self, lane: impl Into<String>, id: impl Into<String>, total_tokens: u64) {
        self.clock += 1;
        self.scheduler.add_request(
            lane,
            id,
            total_tokens,
            self.clock,
            self.default_lane_weight,
        );
        self.submitted += 1;
    }

    pub fn next_request(&mut self) -> Option<ScheduledRequest> {
        self.scheduler.next_request()
    }

    pub fn complete(&mut self, request_id: &str, tokens: u64) -> Result<bool> {
        let finished = self.scheduler.update_progress(request_id, tokens)?;
        if finished {
            self.completed += 1;
        }
        Ok(finished)
    }

    /// Pop the next eligible request and serve it to completion in one
    /// shot, charging its entire remaining token count at once. A lower-
    /// level building block than [`BatchEngine::run_once`][engine], which
    /// drains a request by chunking its actual token content; `tick` has
    /// no token content to chunk, only counts, so it always finishes the
    /// request it pops. Returns `None` when nothing is pending.
    ///
    /// [engine]: crate::engine::BatchEngine::run_once
    pub fn tick(&mut self) -> Result<Option<(String, bool)>> {
        let Some(request) = self.scheduler.next_request() else {
            return Ok(None);
        };
        let remaining = request.remaining_tokens();
        let finished = self.complete(&request.id, remaining)?;
        Ok(Some((request.id, finished)))
    }

    /// Fraction of `capacity_hint` currently occupied by pending requests,
    /// used upstream to decide whether to keep admitting new work.
    pub fn load_factor(&self) -> f64 {
        self.scheduler.pending() as f64 / self.capacity_hint as f64
    }

    /// Emit a structured log line summarizing orchestrator health; meant to
    /// be called on a fixed interval by whatever drives the tick loop.
    pub fn heartbeat(&self) {
        info!(
            submitted = self.submitted,
            completed = self.completed,
            pending = self.scheduler.pending(),
            load_factor = self.load_factor(),
            "orchestrator heartbeat"
        );
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            submitted: self.submitted,
            completed: self.completed,
            pending: self.scheduler.pending(),
            load_factor: self.load_factor(),
        }
    }

    pub fn snapshot(&self) -> Vec<ScheduledRequest> {
        self.scheduler.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_factor_reflects_pending_requests() {
        let mut o = Orchestrator::new(1.0, 4);
        o.register_lane("default", 1.0);
        assert_eq!(o.load_factor(), 0.0);
        o.submit("default", "A", 10);
        o.submit("default", "B", 10);
        assert_eq!(o.load_factor(), 0.5);
    }

    #[test]
    fn completion_is_tracked() {
        let mut o = Orchestrator::new(1.0, 4);
        o.register_lane("default", 1.0);
        o.submit("default", "A", 5);
        let req = o.next_request().unwrap();
        assert!(o.complete(&req.id, 5).unwrap());
        assert_eq!(o.stats().completed, 1);
    }

    #[test]
    fn tick_serves_a_request_end_to_end() {
        let mut o = Orchestrator::new(1.0, 4);
        o.register_lane("default", 1.0);
        o.submit("default", "A", 5);
        let (id, finished) = o.tick().unwrap().unwrap();
        assert_eq!(id, "A");
        assert!(finished);
        assert!(o.tick().unwrap().is_none());
    }

    #[test]
    fn arrival_clock_breaks_srpt_ties_fifo() {
        let mut o = Orchestrator::new(1.0, 4);
        o.register_lane("default", 1.0);
        o.submit("default", "first", 10);
        o.submit("default", "second", 10);
        assert_eq!(o.next_request().unwrap().id, "first");
    }
}
