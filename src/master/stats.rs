//! Bounded history of cluster usage samples

use crate::master::mapping::FilePlan;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSample {
    /// Epoch ms
    pub t: i64,
    /// Σ chunk size
    pub logical: u64,
    /// Σ chunk size × alive replicas
    pub physical: u64,
}

impl UsageSample {
    pub fn compute(t: i64, plans: &[FilePlan], alive: &HashSet<String>) -> Self {
        let mut logical = 0u64;
        let mut physical = 0u64;
        for chunk in plans.iter().flat_map(|p| p.chunks.iter()) {
            let alive_replicas = chunk.workers.iter().filter(|w| alive.contains(*w)).count() as u64;
            logical = logical.saturating_add(chunk.size);
            physical = physical.saturating_add(chunk.size.saturating_mul(alive_replicas));
        }
        Self {
            t,
            logical,
            physical,
        }
    }
}

/// Ring buffer; the oldest sample is evicted first
pub struct ClusterStatsBuffer {
    samples: VecDeque<UsageSample>,
    capacity: usize,
}

impl ClusterStatsBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    pub fn add_sample(&mut self, sample: UsageSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Samples no older than `window_ms` before `now_ms`
    pub fn recent(&self, window_ms: u64, now_ms: i64) -> Vec<UsageSample> {
        let cutoff = now_ms.saturating_sub(window_ms as i64);
        self.samples.iter().filter(|s| s.t >= cutoff).copied().collect()
    }

    pub fn all(&self) -> Vec<UsageSample> {
        self.samples.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<UsageSample> {
        self.samples.back().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
