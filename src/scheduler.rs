//! SRPT-within-lane, weighted-fair-across-lanes request scheduler.
//!
//! Requests are grouped into fairness lanes (think tenants or priority
//! classes). Within a lane, the next request chosen is the one with the
//! fewest remaining tokens, ties broken by arrival order — shortest
//! remaining processing time. Across lanes, the lane chosen is the one with
//! the lowest `demand = served_tokens / weight`, so a lane that has done
//! proportionally less work (relative to its weight) goes next. This is the
//! same shape as the teacher's weighted-fair-queuing CPU scheduler, just
//! keyed on tokens instead of core time.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};

/// A single request under scheduling, tracked by total and processed token
/// counts rather than a fixed "priority" — its remaining work shrinks as it
/// is served, which is what makes SRPT meaningful here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledRequest {
    pub id: String,
    pub lane: String,
    pub arrival_time: u64,
    pub total_tokens: u64,
    pub processed_tokens: u64,
}

impl ScheduledRequest {
    pub fn remaining_tokens(&self) -> u64 {
        self.total_tokens.saturating_sub(self.processed_tokens)
    }

    fn mark_progress(&mut self, tokens: u64) {
        self.processed_tokens = (self.processed_tokens + tokens).min(self.total_tokens);
    }

    fn is_finished(&self) -> bool {
        self.remaining_tokens() == 0
    }

    fn heap_key(&self) -> Reverse<(u64, u64, String)> {
        Reverse((self.remaining_tokens(), self.arrival_time, self.id.clone()))
    }
}

struct FairnessLane {
    weight: f64,
    served_tokens: u64,
    heap: BinaryHeap<Reverse<(u64, u64, String)>>,
    requests: HashMap<String, ScheduledRequest>,
}

impl FairnessLane {
    fn new(weight: f64) -> Self {
        Self {
            weight,
            served_tokens: 0,
            heap: BinaryHeap::new(),
            requests: HashMap::new(),
        }
    }

    /// Demand is served tokens scaled by the inverse of weight: a lane with
    /// double the weight needs to be served twice as much before its demand
    /// catches up to a unit-weight lane's.
    fn demand(&self) -> f64 {
        self.served_tokens as f64 / self.weight
    }

    fn has_pending(&self) -> bool {
        !self.heap.is_empty()
    }

    /// Arrival time of whichever request SRPT order would pop next, used to
    /// break demand ties across lanes. `None` for an empty lane.
    fn arrival_head_time(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse((_, arrival, _))| *arrival)
    }

    fn push(&mut self, request: ScheduledRequest) {
        self.heap.push(request.heap_key());
        self.requests.insert(request.id.clone(), request);
    }

    fn pop(&mut self) -> Option<String> {
        let Reverse((_, _, id)) = self.heap.pop()?;
        Some(id)
    }
}

pub struct Scheduler {
    lanes: HashMap<String, FairnessLane>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            lanes: HashMap::new(),
        }
    }

    pub fn register_lane(&mut self, lane: impl Into<String>, weight: f64) {
        self.lanes
            .entry(lane.into())
            .or_insert_with(|| FairnessLane::new(weight));
    }

    /// Register `lane` implicitly with `default_weight` if it hasn't been
    /// seen before, then enqueue the request.
    pub fn add_request(
        &mut self,
        lane: impl Into<String>,
        id: impl Into<String>,
        total_tokens: u64,
        arrival_time: u64,
        default_weight: f64,
    ) {
        let lane = lane.into();
        let entry = self
            .lanes
            .entry(lane.clone())
            .or_insert_with(|| FairnessLane::new(default_weight));
        entry.push(ScheduledRequest {
            id: id.into(),
            lane,
            arrival_time,
            total_tokens,
            processed_tokens: 0,
        });
    }

    /// Pick the eligible lane with the lowest demand and pop its next
    /// request by SRPT order, crediting the lane's served-tokens counter
    /// with the popped request's remaining tokens at pop time. Ties on
    /// demand are broken by the earliest arrival time at the lane's head,
    /// remaining ties by lane name ascending.
    pub fn next_request(&mut self) -> Option<ScheduledRequest> {
        let lane_id = self
            .lanes
            .iter()
            .filter(|(_, lane)| lane.has_pending())
            .min_by(|(name_a, a), (name_b, b)| {
                let key_a = (a.demand(), a.arrival_head_time().unwrap_or(u64::MAX), name_a.as_str());
                let key_b = (b.demand(), b.arrival_head_time().unwrap_or(u64::MAX), name_b.as_str());
                key_a.partial_cmp(&key_b).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(id, _)| id.clone())?;

        let lane = self.lanes.get_mut(&lane_id)?;
        let id = lane.pop()?;
        let request = lane.requests.get(&id).cloned()?;
        lane.served_tokens += request.remaining_tokens();
        debug!(lane = %lane_id, request = %id, remaining = request.remaining_tokens(), "request dispatched");
        Some(request)
    }

    /// Record that `tokens` were processed for `request_id`, found by
    /// scanning every lane's request map (a dispatched request is no longer
    /// tracked by which lane popped it), and either retiring the request or
    /// pushing it back onto the heap with its shrunk remaining count.
    /// Returns whether the request is now finished.
    pub fn update_progress(&mut self, request_id: &str, tokens: u64) -> Result<bool> {
        let lane_id = self
            .lanes
            .iter()
            .find(|(_, lane)| lane.requests.contains_key(request_id))
            .map(|(id, _)| id.clone())
            .ok_or_else(|| EngineError::UnknownRequest(request_id.to_string()))?;

        let lane = self
            .lanes
            .get_mut(&lane_id)
            .expect("lane_id was just found in self.lanes");

        let mut request = lane
            .requests
            .remove(request_id)
            .expect("request_id was just found in lane.requests");
        request.mark_progress(tokens);

        if request.is_finished() {
            debug!(lane = %lane_id, request = %request_id, "request finished");
            Ok(true)
        } else {
            lane.push(request);
            Ok(false)
        }
    }

    pub fn pending(&self) -> usize {
        self.lanes.values().map(|l| l.heap.len()).sum()
    }

    pub fn snapshot(&self) -> Vec<ScheduledRequest> {
        let mut all: Vec<_> = self
            .lanes
            .values()
            .flat_map(|lane| lane.requests.values().cloned())
            .collect();
        all.sort_by(|a, b| a.arrival_time.cmp(&b.arrival_time).then(a.id.cmp(&b.id)));
        all
    }
}
