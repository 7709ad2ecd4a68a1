//! Persistent work list of states that outgrew the interactive time budget.
//!
//! Items move `pending -> solving -> solved | failed`. Claiming is a conditional transition on a
//! single item, so two workers never hold the same state. Items stuck in `solving` past the
//! staleness window are assumed abandoned and go back to `pending`.

use crate::cache::SolutionCache;
use crate::solver::SolveOutcome;
use crate::store::{MemoryStore, Store, StoreResult};
use crate::{Bits, StateKey};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Solving,
    Solved,
    Failed,
}

impl QueueStatus {
    pub fn is_active(self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Solving)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub shape: String,
    pub bits: Bits,
    pub pieces: u32,
    pub status: QueueStatus,
    /// Unix milliseconds.
    pub created_at: u64,
    pub claimed_at: Option<u64>,
    pub error: Option<String>,
}

impl QueueItem {
    fn new(key: &StateKey, now: u64) -> Self {
        Self {
            id: key.to_string(),
            shape: key.shape.clone(),
            bits: key.bits,
            pieces: key.pieces(),
            status: QueueStatus::Pending,
            created_at: now,
            claimed_at: None,
            error: None,
        }
    }

    pub fn key(&self) -> StateKey {
        StateKey::new(self.shape.clone(), self.bits)
    }

    fn is_stale(&self, now: u64, stale_after: Duration) -> bool {
        self.status == QueueStatus::Solving
            && self
                .claimed_at
                .map_or(true, |at| now.saturating_sub(at) > stale_after.as_millis() as u64)
    }
}

/// Item counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub solving: usize,
    pub solved: usize,
    pub failed: usize,
    pub total: usize,
}

/// How a worker's attempt on an item ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Finished(SolveOutcome),
    /// The solve itself broke; the message is kept on the item for inspection.
    Fault(String),
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Clone)]
pub struct SolveQueue {
    store: Arc<dyn Store<QueueItem>>,
    stale_after: Duration,
}

impl SolveQueue {
    pub fn new(store: Arc<dyn Store<QueueItem>>, stale_after: Duration) -> Self {
        Self { store, stale_after }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), DEFAULT_STALE_AFTER)
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Adds a state as pending. An item already pending or solving is returned unchanged; a
    /// finished one is replaced by a fresh pending item.
    pub fn enqueue(&self, shape_id: &str, bits: Bits) -> StoreResult<QueueItem> {
        self.enqueue_at(shape_id, bits, now_millis())
    }

    pub fn enqueue_at(&self, shape_id: &str, bits: Bits, now: u64) -> StoreResult<QueueItem> {
        let key = StateKey::new(shape_id, bits);
        let fresh = QueueItem::new(&key, now);
        let stored = self.store.update(&key, &mut |existing| match existing {
            Some(item) if item.status.is_active() => None,
            _ => Some(fresh.clone()),
        })?;
        let item = stored.unwrap_or(fresh);
        debug!("Enqueued {} ({:?})", item.id, item.status);
        Ok(item)
    }

    pub fn get(&self, shape_id: &str, bits: Bits) -> StoreResult<Option<QueueItem>> {
        self.store.get(&StateKey::new(shape_id, bits))
    }

    /// Claims the pending item with the fewest pieces, oldest first on ties.
    pub fn claim_next(&self) -> StoreResult<Option<QueueItem>> {
        self.claim_next_at(now_millis())
    }

    pub fn claim_next_at(&self, now: u64) -> StoreResult<Option<QueueItem>> {
        self.reset_stale_at(now)?;

        let mut pending: Vec<QueueItem> = self
            .store
            .values()?
            .into_iter()
            .filter(|item| item.status == QueueStatus::Pending)
            .collect();
        pending.sort_by(|a, b| {
            (a.pieces, a.created_at, &a.shape, a.bits)
                .cmp(&(b.pieces, b.created_at, &b.shape, b.bits))
        });

        for candidate in pending {
            let mut won = false;
            let stored = self.store.update(&candidate.key(), &mut |current| match current {
                Some(item) if item.status == QueueStatus::Pending => {
                    won = true;
                    Some(QueueItem {
                        status: QueueStatus::Solving,
                        claimed_at: Some(now),
                        ..item.clone()
                    })
                }
                _ => None,
            })?;
            if won {
                if let Some(item) = stored {
                    info!("Claimed {} ({} pieces)", item.id, item.pieces);
                    return Ok(Some(item));
                }
            }
            debug!("Lost claim race for {}", candidate.id);
        }
        Ok(None)
    }

    /// Records the result of a claimed item and writes it through to `cache`.
    ///
    /// A timed-out attempt releases the item back to pending. A fault marks it failed and drops
    /// the state's queued marker from `cache`. If the cache write fails the item
    /// stays claimed, and staleness recovery hands it out again later.
    pub fn complete(
        &self,
        item: &QueueItem,
        completion: Completion,
        cache: &SolutionCache,
    ) -> StoreResult<Option<QueueItem>> {
        let (status, error) = match completion {
            Completion::Finished(SolveOutcome::Solved(path)) => {
                cache.put_solution(&item.shape, item.bits, &path)?;
                (QueueStatus::Solved, None)
            }
            Completion::Finished(SolveOutcome::NoSolution) => {
                cache.put_no_solution(&item.shape, item.bits)?;
                (QueueStatus::Solved, None)
            }
            Completion::Finished(SolveOutcome::TimedOut) => {
                warn!("Solve of {} timed out, releasing", item.id);
                (QueueStatus::Pending, None)
            }
            Completion::Fault(message) => {
                error!("Solve of {} failed: {}", item.id, message);
                // No result is coming, so hints must not keep reporting it as in progress
                if let Err(e) = cache.clear_queued(&item.shape, item.bits) {
                    warn!("Could not clear queued marker for {}: {}", item.id, e);
                }
                (QueueStatus::Failed, Some(message))
            }
        };

        let stored = self.store.update(&item.key(), &mut |current| match current {
            Some(current) if current.status == QueueStatus::Solving => Some(QueueItem {
                status,
                claimed_at: if status == QueueStatus::Pending {
                    None
                } else {
                    current.claimed_at
                },
                error: error.clone(),
                ..current.clone()
            }),
            _ => None,
        })?;
        debug!("Completed {} as {:?}", item.id, status);
        Ok(stored)
    }

    /// Hands a claimed item back to `pending`, e.g. when its worker shuts down mid-solve.
    pub fn release(&self, item: &QueueItem) -> StoreResult<bool> {
        let mut released = false;
        self.store.update(&item.key(), &mut |current| match current {
            Some(current) if current.status == QueueStatus::Solving => {
                released = true;
                Some(QueueItem {
                    status: QueueStatus::Pending,
                    claimed_at: None,
                    ..current.clone()
                })
            }
            _ => None,
        })?;
        if released {
            info!("Released {} back to pending", item.id);
        }
        Ok(released)
    }

    /// Returns `solving` items older than the staleness window to `pending`.
    pub fn reset_stale(&self) -> StoreResult<usize> {
        self.reset_stale_at(now_millis())
    }

    pub fn reset_stale_at(&self, now: u64) -> StoreResult<usize> {
        let stale_after = self.stale_after;
        let count = self.release_where(|item| item.is_stale(now, stale_after))?;
        if count > 0 {
            warn!("Reset {} stale item(s) to pending", count);
        }
        Ok(count)
    }

    /// Returns every `solving` item to `pending`, regardless of age.
    pub fn reset_stuck(&self) -> StoreResult<usize> {
        self.release_where(|item| item.status == QueueStatus::Solving)
    }

    fn release_where(&self, predicate: impl Fn(&QueueItem) -> bool) -> StoreResult<usize> {
        let mut count = 0;
        for candidate in self.store.values()?.into_iter().filter(|i| predicate(i)) {
            self.store.update(&candidate.key(), &mut |current| match current {
                Some(item) if predicate(item) => {
                    count += 1;
                    Some(QueueItem {
                        status: QueueStatus::Pending,
                        claimed_at: None,
                        ..item.clone()
                    })
                }
                _ => None,
            })?;
        }
        Ok(count)
    }

    pub fn stats(&self) -> StoreResult<QueueStats> {
        let mut stats = QueueStats::default();
        for item in self.store.values()? {
            match item.status {
                QueueStatus::Pending => stats.pending += 1,
                QueueStatus::Solving => stats.solving += 1,
                QueueStatus::Solved => stats.solved += 1,
                QueueStatus::Failed => stats.failed += 1,
            }
            stats.total += 1;
        }
        Ok(stats)
    }

    /// Removes solved and failed items. An item re-enqueued meanwhile is kept.
    pub fn cleanup(&self) -> StoreResult<usize> {
        let mut removed = 0;
        for item in self.store.values()? {
            if item.status.is_terminal()
                && self
                    .store
                    .remove_if(&item.key(), &mut |current| current.status.is_terminal())?
            {
                removed += 1;
            }
        }
        info!("Removed {} finished item(s) from the queue", removed);
        Ok(removed)
    }
}
