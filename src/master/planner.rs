//! Chunk placement planning
//!
//! Splits a file into fixed-size chunks and assigns each chunk `R` distinct
//! workers. Placement is space-aware (most free space first) with a rotating
//! start position so that successive chunks and files do not always put the
//! same worker first.

use crate::common::{timestamp_now_millis, Error, MasterConfig, Result};
use crate::master::mapping::{ChunkPlan, FilePlan, FileStatus, MappingStore};
use crate::master::registry::WorkerRecord;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

/// Upper bound on chunks in one plan (64 TiB at the default maximum chunk size)
pub const MAX_PLAN_CHUNKS: u64 = 1 << 20;

/// Per-plan view of a worker's free space. Deductions made while planning
/// one file never touch the live registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub worker_id: String,
    pub free_bytes: u64,
}

impl From<&WorkerRecord> for LedgerEntry {
    fn from(w: &WorkerRecord) -> Self {
        Self {
            worker_id: w.id.clone(),
            free_bytes: w.free_bytes,
        }
    }
}

pub struct ChunkPlanner {
    min_chunk_bytes: u64,
    max_chunk_bytes: u64,
    max_chunks_per_file: u64,
    /// Shared by every plan; advanced once per chunk placement
    cursor: AtomicUsize,
}

impl ChunkPlanner {
    pub fn new(config: &MasterConfig) -> Self {
        Self::with_bounds(
            config.min_chunk_bytes,
            config.max_chunk_bytes,
            config.max_chunks_per_file,
        )
    }

    pub fn with_bounds(min_chunk_bytes: u64, max_chunk_bytes: u64, max_chunks_per_file: u64) -> Self {
        Self {
            min_chunk_bytes,
            max_chunk_bytes,
            max_chunks_per_file: max_chunks_per_file.max(1),
            cursor: AtomicUsize::new(0),
        }
    }

    /// About two chunks per alive worker, bounded to
    /// `[min_chunk_bytes, max_chunk_bytes]`.
    pub fn decide_chunk_size(&self, file_size: u64, alive_workers: usize) -> u64 {
        let desired_chunks = (alive_workers as u64)
            .saturating_mul(2)
            .clamp(1, self.max_chunks_per_file);
        (file_size / desired_chunks).clamp(self.min_chunk_bytes, self.max_chunk_bytes)
    }

    /// Pick up to `replicas` distinct workers able to hold `chunk_size` bytes,
    /// deducting the chunk from each chosen ledger entry.
    ///
    /// Returns fewer than `replicas` ids when capacity runs out; the caller
    /// treats that as a failure.
    pub fn choose_workers_for_chunk(
        &self,
        chunk_size: u64,
        ledger: &mut [LedgerEntry],
        replicas: usize,
    ) -> Vec<String> {
        let mut candidates: Vec<usize> = (0..ledger.len())
            .filter(|&i| ledger[i].free_bytes >= chunk_size)
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        candidates.sort_by(|&a, &b| {
            ledger[b]
                .free_bytes
                .cmp(&ledger[a].free_bytes)
                .then_with(|| ledger[a].worker_id.cmp(&ledger[b].worker_id))
        });

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();

        let mut chosen: Vec<String> = Vec::with_capacity(replicas);
        for step in 0..candidates.len() {
            if chosen.len() >= replicas {
                break;
            }
            let entry = &mut ledger[candidates[(start + step) % candidates.len()]];
            if !chosen.contains(&entry.worker_id) {
                entry.free_bytes = entry.free_bytes.saturating_sub(chunk_size);
                chosen.push(entry.worker_id.clone());
            }
        }
        chosen
    }

    /// Build a complete plan against one snapshot of alive workers.
    pub fn build_plan(
        &self,
        filename: &str,
        size: u64,
        replicas: usize,
        alive: &[WorkerRecord],
    ) -> Result<FilePlan> {
        if filename.trim().is_empty() {
            return Err(Error::Validation("filename is required".into()));
        }
        if size == 0 {
            return Err(Error::Validation("size must be a positive number".into()));
        }
        if replicas == 0 {
            return Err(Error::Validation("replication factor must be positive".into()));
        }
        if alive.is_empty() {
            return Err(Error::NoAliveWorkers);
        }
        if alive.len() < replicas {
            return Err(Error::InsufficientWorkers {
                needed: replicas,
                available: alive.len(),
            });
        }

        // every replica of every chunk has to fit somewhere
        let needed = size as u128 * replicas as u128;
        let available: u128 = alive.iter().map(|w| w.free_bytes as u128).sum();
        if needed > available {
            tracing::warn!(filename, size, replicas, "file does not fit in free space");
            return Err(Error::InsufficientCapacity { needed, available });
        }

        let chunk_size = self.decide_chunk_size(size, alive.len());
        let num_chunks = size.div_ceil(chunk_size);
        if num_chunks > MAX_PLAN_CHUNKS {
            return Err(Error::Validation(format!(
                "file needs {} chunks, limit is {}",
                num_chunks, MAX_PLAN_CHUNKS
            )));
        }
        let mut ledger: Vec<LedgerEntry> = alive.iter().map(LedgerEntry::from).collect();

        let mut chunks = Vec::new();
        for index in 0..num_chunks {
            let this_size = if index == num_chunks - 1 {
                size - index * chunk_size
            } else {
                chunk_size
            };

            let workers = self.choose_workers_for_chunk(this_size, &mut ledger, replicas);
            if workers.len() < replicas {
                tracing::warn!(
                    filename,
                    chunk = index,
                    needed = replicas,
                    available = workers.len(),
                    "not enough capacity to place chunk"
                );
                return Err(Error::InsufficientWorkers {
                    needed: replicas,
                    available: workers.len(),
                });
            }

            chunks.push(ChunkPlan {
                id: chunk_id(filename, index),
                size: this_size,
                index: index as usize,
                workers,
            });
        }

        Ok(FilePlan {
            filename: filename.to_string(),
            size,
            chunk_size,
            chunks,
            created_at: timestamp_now_millis(),
            status: FileStatus::Active,
        })
    }

    /// Plan a file and persist it. The plan becomes visible only once every
    /// chunk has been placed.
    pub fn plan_file(
        &self,
        alive: &[WorkerRecord],
        mapping: &dyn MappingStore,
        filename: &str,
        size: u64,
        replicas: usize,
    ) -> Result<FilePlan> {
        let plan = self.build_plan(filename, size, replicas, alive)?;
        mapping.save(plan.clone())?;
        tracing::info!(
            filename,
            size,
            chunk_size = plan.chunk_size,
            chunks = plan.chunks.len(),
            "planned file"
        );
        Ok(plan)
    }
}

/// Unique across re-uploads of the same filename
fn chunk_id(filename: &str, index: u64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_part{}_{}", filename, index, &suffix[..8])
}
