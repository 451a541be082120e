//! Worker registry
//!
//! Tracks every worker that ever heartbeated: address, capacity and liveness.
//! Liveness is only ever changed by two events: a heartbeat (→ alive) and an
//! explicit [`WorkerRegistry::sweep_expired`] (alive → dead). Readers such as
//! the planner see the status the last sweep decided, never a recomputation,
//! so placement and liveness cannot disagree mid-operation.

use crate::common::{timestamp_now_millis, Error, Result, WorkerStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Heartbeat payload as sent by workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub id: String,
    pub host: String,
    pub free_bytes: u64,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Heartbeat {
    pub fn new(id: impl Into<String>, host: impl Into<String>, free_bytes: u64) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            free_bytes,
            total_bytes: free_bytes,
            metadata: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRecord {
    pub id: String,
    pub host: String,
    pub free_bytes: u64,
    pub total_bytes: u64,
    /// Wall-clock time of the last heartbeat (epoch ms), for display
    pub last_heartbeat: i64,
    pub status: WorkerStatus,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Monotonic time of the last heartbeat; the only input to liveness
    #[serde(skip)]
    pub last_seen: Instant,
    /// Revival wipes still in flight; the worker takes no new replicas meanwhile
    #[serde(skip)]
    pub pending_wipes: u32,
}

impl WorkerRecord {
    pub fn is_alive(&self) -> bool {
        self.status.is_alive()
    }

    /// Alive and not waiting on a wipe
    pub fn is_placeable(&self) -> bool {
        self.is_alive() && self.pending_wipes == 0
    }
}

/// Result of applying one heartbeat
#[derive(Debug, Clone)]
pub struct HeartbeatOutcome {
    pub record: WorkerRecord,
    /// The worker was flagged dead before this heartbeat
    pub revived: bool,
    /// First heartbeat ever seen from this id
    pub is_new: bool,
}

pub struct WorkerRegistry {
    workers: HashMap<String, WorkerRecord>,
    heartbeat_window: Duration,
}

impl WorkerRegistry {
    pub fn new(heartbeat_window: Duration) -> Self {
        Self {
            workers: HashMap::new(),
            heartbeat_window,
        }
    }

    pub fn heartbeat_window(&self) -> Duration {
        self.heartbeat_window
    }

    /// Insert or refresh a worker; it is alive from this point on.
    pub fn upsert_heartbeat(&mut self, hb: Heartbeat, now: Instant) -> Result<HeartbeatOutcome> {
        if hb.id.trim().is_empty() {
            return Err(Error::Validation("heartbeat without worker id".into()));
        }
        if hb.host.trim().is_empty() {
            return Err(Error::Validation(format!(
                "heartbeat from {} without host",
                hb.id
            )));
        }

        let previous = self.workers.get(&hb.id).map(|w| (w.status, w.pending_wipes));
        let record = WorkerRecord {
            id: hb.id.clone(),
            host: hb.host,
            free_bytes: hb.free_bytes,
            total_bytes: hb.total_bytes.max(hb.free_bytes),
            last_heartbeat: timestamp_now_millis(),
            status: WorkerStatus::Alive,
            metadata: hb.metadata,
            last_seen: now,
            pending_wipes: previous.map(|(_, n)| n).unwrap_or(0),
        };
        self.workers.insert(hb.id, record.clone());

        tracing::debug!(worker = %record.id, free_bytes = record.free_bytes, "heartbeat upsert");

        Ok(HeartbeatOutcome {
            record,
            revived: previous.map(|(status, _)| status) == Some(WorkerStatus::Dead),
            is_new: previous.is_none(),
        })
    }

    /// Flag every alive worker whose last heartbeat is older than the window.
    ///
    /// Edge-triggered: returns only the ids that transitioned in this call,
    /// so an already-dead worker is never reported twice.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<String> {
        let window = self.heartbeat_window;
        let mut newly_dead: Vec<String> = self
            .workers
            .values_mut()
            .filter(|w| w.is_alive() && now.saturating_duration_since(w.last_seen) > window)
            .map(|w| {
                w.status = WorkerStatus::Dead;
                w.id.clone()
            })
            .collect();
        newly_dead.sort();

        for id in &newly_dead {
            tracing::warn!(worker = %id, window_ms = window.as_millis() as u64, "worker declared dead");
        }
        newly_dead
    }

    /// Workers currently flagged alive, ordered by id
    pub fn get_alive(&self) -> Vec<WorkerRecord> {
        let mut alive: Vec<WorkerRecord> = self
            .workers
            .values()
            .filter(|w| w.is_alive())
            .cloned()
            .collect();
        alive.sort_by(|a, b| a.id.cmp(&b.id));
        alive
    }

    /// Alive workers that may receive new replicas, ordered by id
    pub fn get_placeable(&self) -> Vec<WorkerRecord> {
        let mut placeable: Vec<WorkerRecord> = self
            .workers
            .values()
            .filter(|w| w.is_placeable())
            .cloned()
            .collect();
        placeable.sort_by(|a, b| a.id.cmp(&b.id));
        placeable
    }

    /// Keep `id` out of placement and repair until [`Self::finish_wipe`].
    pub fn begin_wipe(&mut self, id: &str) -> bool {
        match self.workers.get_mut(id) {
            Some(w) => {
                w.pending_wipes += 1;
                true
            }
            None => false,
        }
    }

    pub fn finish_wipe(&mut self, id: &str) {
        if let Some(w) = self.workers.get_mut(id) {
            w.pending_wipes = w.pending_wipes.saturating_sub(1);
        }
    }

    pub fn get(&self, id: &str) -> Option<&WorkerRecord> {
        self.workers.get(id)
    }

    pub fn is_alive(&self, id: &str) -> bool {
        self.workers.get(id).is_some_and(|w| w.is_alive())
    }

    /// All workers regardless of liveness, ordered by id
    pub fn get_all(&self) -> Vec<WorkerRecord> {
        let mut all: Vec<WorkerRecord> = self.workers.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Forget a worker entirely. Its id stays on any chunk that lists it.
    pub fn remove(&mut self, id: &str) -> Option<WorkerRecord> {
        let removed = self.workers.remove(id);
        if removed.is_some() {
            tracing::info!(worker = %id, "worker removed from registry");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn alive_count(&self) -> usize {
        self.workers.values().filter(|w| w.is_alive()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(45);

    #[test]
    fn test_upsert_inserts_and_refreshes() {
        let mut registry = WorkerRegistry::new(WINDOW);
        let t0 = Instant::now();

        let out = registry
            .upsert_heartbeat(Heartbeat::new("w1", "10.0.0.1:8000", 100), t0)
            .unwrap();
        assert!(out.is_new);
        assert!(!out.revived);
        assert_eq!(out.record.status, WorkerStatus::Alive);

        let out = registry
            .upsert_heartbeat(
                Heartbeat::new("w1", "10.0.0.1:8000", 40),
                t0 + Duration::from_secs(5),
            )
            .unwrap();
        assert!(!out.is_new);
        assert_eq!(registry.get("w1").unwrap().free_bytes, 40);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_upsert_rejects_missing_id() {
        let mut registry = WorkerRegistry::new(WINDOW);
        let result = registry.upsert_heartbeat(Heartbeat::new("", "h", 1), Instant::now());
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sweep_is_edge_triggered() {
        let mut registry = WorkerRegistry::new(WINDOW);
        let t0 = Instant::now();
        registry
            .upsert_heartbeat(Heartbeat::new("w1", "h1", 10), t0)
            .unwrap();
        registry
            .upsert_heartbeat(Heartbeat::new("w2", "h2", 10), t0 + Duration::from_secs(30))
            .unwrap();

        // exactly at the window boundary nobody is dead yet
        assert!(registry.sweep_expired(t0 + WINDOW).is_empty());

        let later = t0 + Duration::from_secs(46);
        assert_eq!(registry.sweep_expired(later), vec!["w1".to_string()]);
        assert!(registry.sweep_expired(later).is_empty());
        assert!(registry
            .sweep_expired(later + Duration::from_secs(1))
            .is_empty());

        assert_eq!(registry.get("w1").unwrap().status, WorkerStatus::Dead);
        assert!(registry.is_alive("w2"));
    }

    #[test]
    fn test_get_alive_does_not_recompute_staleness() {
        let mut registry = WorkerRegistry::new(WINDOW);
        let t0 = Instant::now();
        registry
            .upsert_heartbeat(Heartbeat::new("w1", "h1", 10), t0)
            .unwrap();

        // no sweep ran yet, so the worker stays alive however old its heartbeat is
        assert_eq!(registry.get_alive().len(), 1);

        registry.sweep_expired(t0 + Duration::from_secs(3600));
        assert!(registry.get_alive().is_empty());
        assert_eq!(registry.get_all().len(), 1);
    }

    #[test]
    fn test_revival() {
        let mut registry = WorkerRegistry::new(WINDOW);
        let t0 = Instant::now();
        registry
            .upsert_heartbeat(Heartbeat::new("w1", "h1", 10), t0)
            .unwrap();
        let t1 = t0 + Duration::from_secs(60);
        assert_eq!(registry.sweep_expired(t1), vec!["w1".to_string()]);

        let out = registry
            .upsert_heartbeat(Heartbeat::new("w1", "h1", 10), t1)
            .unwrap();
        assert!(out.revived);
        assert!(registry.is_alive("w1"));

        // after revival the worker can die again and is reported again
        assert_eq!(
            registry.sweep_expired(t1 + Duration::from_secs(50)),
            vec!["w1".to_string()]
        );
    }

    #[test]
    fn test_alive_count() {
        let mut registry = WorkerRegistry::new(WINDOW);
        let t0 = Instant::now();
        registry
            .upsert_heartbeat(Heartbeat::new("w1", "h1", 10), t0)
            .unwrap();
        registry
            .upsert_heartbeat(Heartbeat::new("w2", "h2", 10), t0 + Duration::from_secs(40))
            .unwrap();
        assert_eq!(registry.alive_count(), 2);

        registry.sweep_expired(t0 + Duration::from_secs(50));
        assert_eq!(registry.alive_count(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove() {
        let mut registry = WorkerRegistry::new(WINDOW);
        let t0 = Instant::now();
        registry
            .upsert_heartbeat(Heartbeat::new("w1", "h1", 10), t0)
            .unwrap();

        assert_eq!(registry.remove("w1").map(|w| w.id), Some("w1".to_string()));
        assert!(registry.remove("w1").is_none());
        assert!(registry.get("w1").is_none());
        // a removed worker is not reported by a later sweep
        assert!(registry.sweep_expired(t0 + Duration::from_secs(60)).is_empty());

        let out = registry
            .upsert_heartbeat(Heartbeat::new("w1", "h1", 10), t0 + Duration::from_secs(61))
            .unwrap();
        assert!(out.is_new);
        assert!(!out.revived);
    }

    #[test]
    fn test_wiping_worker_is_not_placeable() {
        let mut registry = WorkerRegistry::new(WINDOW);
        let t0 = Instant::now();
        for id in ["w1", "w2"] {
            registry
                .upsert_heartbeat(Heartbeat::new(id, id, 10), t0)
                .unwrap();
        }

        assert!(registry.begin_wipe("w1"));
        assert!(!registry.begin_wipe("ghost"));
        // heartbeats while the wipe runs keep it pending
        registry
            .upsert_heartbeat(Heartbeat::new("w1", "w1", 10), t0 + Duration::from_secs(5))
            .unwrap();
        assert!(registry.is_alive("w1"));
        let placeable: Vec<String> = registry.get_placeable().into_iter().map(|w| w.id).collect();
        assert_eq!(placeable, vec!["w2"]);

        registry.finish_wipe("w1");
        assert_eq!(registry.get_placeable().len(), 2);
        registry.finish_wipe("w1");
        assert_eq!(registry.get("w1").map(|w| w.pending_wipes), Some(0));
    }

    #[test]
    fn test_heartbeat_payload_parsing() {
        let hb: Heartbeat = serde_json::from_str(
            r#"{"id":"w9","host":"w9:8000","freeBytes":2048,"totalBytes":4096,"metadata":{"zone":"a"}}"#,
        )
        .unwrap();
        assert_eq!(hb.free_bytes, 2048);
        assert_eq!(hb.total_bytes, 4096);
        assert_eq!(hb.metadata["zone"], "a");
    }
}
