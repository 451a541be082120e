//! File → chunk → replica mapping
//!
//! Pure keyed storage of [`FilePlan`]s with no time or network dependency.
//! Planner, repair and the delete workflow only talk to the [`MappingStore`]
//! trait, so the in-memory backend can be swapped for a durable one.
//!
//! A completed delete leaves a `deleted` tombstone so later lookups answer
//! 410 instead of 404. Registering the name again replaces the tombstone.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub id: String,
    pub size: u64,
    pub index: usize,
    /// Replica holders in failover order; readers try the first entry first
    pub workers: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    #[default]
    Active,
    Deleting,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePlan {
    pub filename: String,
    pub size: u64,
    pub chunk_size: u64,
    pub chunks: Vec<ChunkPlan>,
    /// Epoch ms
    pub created_at: i64,
    #[serde(default)]
    pub status: FileStatus,
}

impl FilePlan {
    pub fn chunk(&self, chunk_id: &str) -> Option<&ChunkPlan> {
        self.chunks.iter().find(|c| c.id == chunk_id)
    }

    /// Replication factor as observed on the first chunk
    pub fn replication_factor(&self) -> usize {
        self.chunks.first().map(|c| c.workers.len()).unwrap_or(0)
    }
}

/// Storage interface for file plans.
///
/// Every method is atomic with respect to the others. Callers must not hold
/// any other lock that a store method could wait on, except the registry,
/// which is always acquired first.
pub trait MappingStore: Send + Sync {
    /// Upsert by filename; re-registering a name replaces the prior plan
    fn save(&self, plan: FilePlan) -> Result<()>;

    fn get(&self, filename: &str) -> Result<Option<FilePlan>>;

    /// All plans ordered by filename
    fn list(&self) -> Result<Vec<FilePlan>>;

    fn remove(&self, filename: &str) -> Result<Option<FilePlan>>;

    /// Turn a `deleting` plan into a tombstone. Returns false when the plan
    /// is gone or was replaced meanwhile.
    fn mark_deleted(&self, filename: &str) -> Result<bool>;

    /// Scrub `worker_id` out of every chunk of every plan; returns how many
    /// replica entries were removed. Idempotent.
    fn remove_worker_from_all_chunks(&self, worker_id: &str) -> Result<usize>;

    /// Append replica holders to one chunk, skipping ids already present.
    /// Returns the ids actually appended. Fails with `Gone` on a tombstone.
    fn append_replicas(
        &self,
        filename: &str,
        chunk_id: &str,
        worker_ids: &[String],
    ) -> Result<Vec<String>>;

    /// Move an active plan to `deleting` and return it.
    /// Fails with `Conflict` when already deleting and `Gone` when deleted.
    fn mark_deleting(&self, filename: &str) -> Result<FilePlan>;

    fn set_status(&self, filename: &str, status: FileStatus) -> Result<()>;
}

/// In-memory mapping store (default)
#[derive(Default)]
pub struct MemMappingStore {
    files: RwLock<HashMap<String, FilePlan>>,
}

impl MemMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, FilePlan>>> {
        self.files
            .read()
            .map_err(|_| Error::Internal("mapping store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, FilePlan>>> {
        self.files
            .write()
            .map_err(|_| Error::Internal("mapping store lock poisoned".into()))
    }
}

impl MappingStore for MemMappingStore {
    fn save(&self, plan: FilePlan) -> Result<()> {
        self.write()?.insert(plan.filename.clone(), plan);
        Ok(())
    }

    fn get(&self, filename: &str) -> Result<Option<FilePlan>> {
        Ok(self.read()?.get(filename).cloned())
    }

    fn list(&self) -> Result<Vec<FilePlan>> {
        let mut plans: Vec<FilePlan> = self.read()?.values().cloned().collect();
        plans.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(plans)
    }

    fn remove(&self, filename: &str) -> Result<Option<FilePlan>> {
        Ok(self.write()?.remove(filename))
    }

    fn mark_deleted(&self, filename: &str) -> Result<bool> {
        let mut files = self.write()?;
        match files.get_mut(filename) {
            Some(plan) if plan.status == FileStatus::Deleting => {
                plan.status = FileStatus::Deleted;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn remove_worker_from_all_chunks(&self, worker_id: &str) -> Result<usize> {
        let mut files = self.write()?;
        let mut removed = 0;
        for chunk in files.values_mut().flat_map(|p| p.chunks.iter_mut()) {
            let before = chunk.workers.len();
            chunk.workers.retain(|w| w != worker_id);
            removed += before - chunk.workers.len();
        }
        Ok(removed)
    }

    fn append_replicas(
        &self,
        filename: &str,
        chunk_id: &str,
        worker_ids: &[String],
    ) -> Result<Vec<String>> {
        let mut files = self.write()?;
        let plan = files
            .get_mut(filename)
            .ok_or_else(|| Error::NotFound(format!("file {}", filename)))?;
        if plan.status == FileStatus::Deleted {
            return Err(Error::Gone(format!("{} was deleted", filename)));
        }
        let chunk = plan
            .chunks
            .iter_mut()
            .find(|c| c.id == chunk_id)
            .ok_or_else(|| Error::NotFound(format!("chunk {} of {}", chunk_id, filename)))?;

        let mut appended = Vec::new();
        for id in worker_ids {
            if !chunk.workers.contains(id) {
                chunk.workers.push(id.clone());
                appended.push(id.clone());
            }
        }
        Ok(appended)
    }

    fn mark_deleting(&self, filename: &str) -> Result<FilePlan> {
        let mut files = self.write()?;
        let plan = files
            .get_mut(filename)
            .ok_or_else(|| Error::NotFound(format!("file {}", filename)))?;
        match plan.status {
            FileStatus::Active => {
                plan.status = FileStatus::Deleting;
                Ok(plan.clone())
            }
            FileStatus::Deleting => Err(Error::Conflict(format!(
                "{} is already being deleted",
                filename
            ))),
            FileStatus::Deleted => Err(Error::Gone(format!("{} was deleted", filename))),
        }
    }

    fn set_status(&self, filename: &str, status: FileStatus) -> Result<()> {
        let mut files = self.write()?;
        let plan = files
            .get_mut(filename)
            .ok_or_else(|| Error::NotFound(format!("file {}", filename)))?;
        plan.status = status;
        Ok(())
    }
}
