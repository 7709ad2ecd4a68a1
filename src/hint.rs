//! Hint orchestration: cache lookup, a bounded synchronous solve, and escalation to the
//! background queue when the budget runs out.

use crate::cache::{CacheEntry, SolutionCache};
use crate::moves::{Move, MoveCells, SolverData};
use crate::queue::SolveQueue;
use crate::shapes::{Shape, ShapeRegistry};
use crate::solver::{self, SolveOutcome};
use crate::{codec, Bits, Cell, PegError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// What the player should be told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hint {
    NextMove(MoveCells),
    /// Only one piece is left.
    AlreadySolved,
    NoSolution,
    SolvingInBackground,
    /// The synchronous budget ran out and the queue could not take the state.
    TimedOut,
}

/// Caller-facing form of a hint, tagged by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HintResponse {
    NextMove { from: Cell, over: Cell, to: Cell },
    AlreadySolved,
    NoSolution,
    SolvingInBackground,
    TimedOut,
    Error { message: String },
}

impl From<Result<Hint>> for HintResponse {
    fn from(result: Result<Hint>) -> Self {
        match result {
            Ok(Hint::NextMove(cells)) => HintResponse::NextMove {
                from: cells.from,
                over: cells.over,
                to: cells.to,
            },
            Ok(Hint::AlreadySolved) => HintResponse::AlreadySolved,
            Ok(Hint::NoSolution) => HintResponse::NoSolution,
            Ok(Hint::SolvingInBackground) => HintResponse::SolvingInBackground,
            Ok(Hint::TimedOut) => HintResponse::TimedOut,
            Err(e) => HintResponse::Error {
                message: e.to_string(),
            },
        }
    }
}

pub struct HintService {
    registry: Arc<ShapeRegistry>,
    cache: SolutionCache,
    queue: SolveQueue,
    time_limit: Duration,
    wake: Arc<Notify>,
}

impl HintService {
    pub fn new(
        registry: Arc<ShapeRegistry>,
        cache: SolutionCache,
        queue: SolveQueue,
        time_limit: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            queue,
            time_limit,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Signal raised whenever a state is handed to the queue.
    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    pub fn registry(&self) -> &ShapeRegistry {
        &self.registry
    }

    /// Hint for a presence grid. `shape_id` defaults to the registry's default shape.
    pub fn hint(&self, grid: &[Vec<bool>], shape_id: Option<&str>) -> Result<Hint> {
        let shape = self.registry.resolve(shape_id)?;
        self.hint_bits(shape, codec::encode(shape, grid))
    }

    /// Hint for a list of occupied cells.
    pub fn hint_cells(&self, cells: &[Cell], shape_id: Option<&str>) -> Result<Hint> {
        let shape = self.registry.resolve(shape_id)?;
        self.hint_bits(shape, codec::encode_cells(shape, cells)?)
    }

    /// Blocks for at most the configured time limit plus storage round trips.
    pub fn hint_bits(&self, shape: &Shape, bits: Bits) -> Result<Hint> {
        let data = shape.solver_data();
        if !data.is_valid_state(bits) {
            return Err(PegError::InvalidState {
                shape: shape.id().to_string(),
                bits,
            });
        }
        if bits.count_ones() == 1 {
            return Ok(Hint::AlreadySolved);
        }

        match self.cache.get(shape.id(), bits) {
            Ok(Some(CacheEntry::Solved(path))) => {
                debug!("Cache hit for {}:{}", shape.id(), bits);
                return Ok(first_move(data, &path));
            }
            Ok(Some(CacheEntry::NoSolution)) => return Ok(Hint::NoSolution),
            Ok(Some(CacheEntry::Queued)) => return Ok(Hint::SolvingInBackground),
            Ok(None) => {}
            Err(e) => warn!("Solution cache unavailable, solving uncached: {}", e),
        }

        match solver::solve(shape, bits, Some(self.time_limit))? {
            SolveOutcome::Solved(path) => {
                if let Err(e) = self.cache.put_solution(shape.id(), bits, &path) {
                    warn!("Could not cache solution for {}:{}: {}", shape.id(), bits, e);
                }
                Ok(first_move(data, &path))
            }
            SolveOutcome::NoSolution => {
                if let Err(e) = self.cache.put_no_solution(shape.id(), bits) {
                    warn!("Could not cache verdict for {}:{}: {}", shape.id(), bits, e);
                }
                Ok(Hint::NoSolution)
            }
            SolveOutcome::TimedOut => Ok(self.escalate(shape, bits)),
        }
    }

    fn escalate(&self, shape: &Shape, bits: Bits) -> Hint {
        // Queue first: a queued marker without a queue item would never clear
        match self.queue.enqueue(shape.id(), bits) {
            Ok(item) => {
                info!("Queued {} for background solving ({} pieces)", item.id, item.pieces);
                if let Err(e) = self.cache.put_queued(shape.id(), bits) {
                    warn!("Could not mark {}:{} as queued: {}", shape.id(), bits, e);
                }
                self.wake.notify_one();
                Hint::SolvingInBackground
            }
            Err(e) => {
                warn!("Solve queue unavailable for {}:{}: {}", shape.id(), bits, e);
                Hint::TimedOut
            }
        }
    }
}

fn first_move(data: &SolverData, path: &[Move]) -> Hint {
    path.first()
        .and_then(|mv| data.describe(mv))
        .map_or(Hint::AlreadySolved, Hint::NextMove)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levels;
    use crate::queue::QueueStatus;
    use crate::store::tests::DownStore;

    fn registry() -> Arc<ShapeRegistry> {
        let mut registry = ShapeRegistry::builtin().unwrap();
        registry.register(Shape::from_fn("line", "Line", 1, 3, (0, 1), |_, _| true).unwrap());
        registry.register(Shape::from_fn("pair", "Pair", 1, 2, (0, 0), |_, _| true).unwrap());
        Arc::new(registry)
    }

    fn service(time_limit: Duration) -> (HintService, SolutionCache, SolveQueue) {
        let cache = SolutionCache::in_memory();
        let queue = SolveQueue::in_memory();
        let service = HintService::new(registry(), cache.clone(), queue.clone(), time_limit);
        (service, cache, queue)
    }

    #[test]
    fn test_solves_and_writes_through() {
        let (service, cache, queue) = service(Duration::from_secs(5));
        let hint = service.hint_cells(&[(0, 0), (0, 1)], Some("line")).unwrap();
        assert_eq!(
            hint,
            Hint::NextMove(MoveCells {
                from: (0, 0),
                over: (0, 1),
                to: (0, 2)
            })
        );
        assert_eq!(
            cache.get("line", 0b011).unwrap(),
            Some(CacheEntry::Solved(vec![Move::new(0, 1, 2)]))
        );
        assert_eq!(cache.get("line", 0b100).unwrap(), Some(CacheEntry::Solved(vec![])));
        assert_eq!(queue.stats().unwrap().total, 0);
    }

    #[test]
    fn test_answers_from_cache() {
        let (service, cache, _) = service(Duration::from_secs(5));
        // Seeded entry, no search involved
        cache.put_solution("line", 0b110, &[Move::new(2, 1, 0)]).unwrap();
        let hint = service.hint_cells(&[(0, 1), (0, 2)], Some("line")).unwrap();
        assert_eq!(
            hint,
            Hint::NextMove(MoveCells {
                from: (0, 2),
                over: (0, 1),
                to: (0, 0)
            })
        );
    }

    #[test]
    fn test_no_solution_is_cached() {
        let (service, cache, _) = service(Duration::from_secs(5));
        assert_eq!(service.hint_cells(&[(0, 0), (0, 1)], Some("pair")).unwrap(), Hint::NoSolution);
        assert_eq!(cache.get("pair", 0b11).unwrap(), Some(CacheEntry::NoSolution));
        assert_eq!(service.hint_cells(&[(0, 0), (0, 1)], Some("pair")).unwrap(), Hint::NoSolution);
    }

    #[test]
    fn test_single_piece_skips_cache_and_queue() {
        let (service, cache, queue) = service(Duration::ZERO);
        let hint = service.hint_cells(&[(4, 4)], None).unwrap();
        assert_eq!(hint, Hint::AlreadySolved);
        assert_eq!(queue.stats().unwrap().total, 0);
        let shape = service.registry().get("wiegleb").unwrap();
        let bits = codec::encode_cells(shape, &[(4, 4)]).unwrap();
        assert_eq!(cache.get("wiegleb", bits).unwrap(), None);
    }

    #[tokio::test]
    async fn test_timeout_escalates_to_queue() {
        let (service, cache, queue) = service(Duration::ZERO);
        let wake = service.wake_handle();
        let hint = service.hint_cells(levels::LEVELS[6].pieces, None).unwrap();
        assert_eq!(hint, Hint::SolvingInBackground);

        let shape = service.registry().get("wiegleb").unwrap();
        let bits = codec::encode_cells(shape, levels::LEVELS[6].pieces).unwrap();
        assert_eq!(cache.get("wiegleb", bits).unwrap(), Some(CacheEntry::Queued));
        let item = queue.get("wiegleb", bits).unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);

        tokio::time::timeout(Duration::from_secs(1), wake.notified())
            .await
            .expect("worker should have been woken");

        // Answered from the queued marker without another enqueue
        let again = service.hint_cells(levels::LEVELS[6].pieces, None).unwrap();
        assert_eq!(again, Hint::SolvingInBackground);
        assert_eq!(queue.stats().unwrap().total, 1);
    }

    #[test]
    fn test_degrades_without_cache() {
        let cache = SolutionCache::new(Arc::new(DownStore));
        let service = HintService::new(
            registry(),
            cache,
            SolveQueue::in_memory(),
            Duration::from_secs(5),
        );
        let hint = service.hint_cells(&[(0, 0), (0, 1)], Some("line")).unwrap();
        assert!(matches!(hint, Hint::NextMove(_)));
    }

    #[test]
    fn test_degrades_without_queue() {
        let cache = SolutionCache::in_memory();
        let queue = SolveQueue::new(Arc::new(DownStore), Duration::from_secs(60));
        let service = HintService::new(registry(), cache.clone(), queue, Duration::ZERO);
        let hint = service.hint_cells(levels::LEVELS[6].pieces, None).unwrap();
        assert_eq!(hint, Hint::TimedOut);

        let shape = service.registry().get("wiegleb").unwrap();
        let bits = codec::encode_cells(shape, levels::LEVELS[6].pieces).unwrap();
        assert_eq!(cache.get("wiegleb", bits).unwrap(), None, "no orphaned queued marker");
    }

    #[test]
    fn test_rejects_bad_input() {
        let (service, _, _) = service(Duration::from_secs(5));
        assert!(matches!(
            service.hint_cells(&[(4, 4)], Some("hexagon")),
            Err(PegError::UnknownShape(_))
        ));
        assert!(matches!(
            service.hint(&vec![vec![false; 9]; 9], None),
            Err(PegError::InvalidState { bits: 0, .. })
        ));
    }

    #[test]
    fn test_response_serialization() {
        let response = HintResponse::from(Ok(Hint::NextMove(MoveCells {
            from: (4, 2),
            over: (4, 3),
            to: (4, 4),
        })));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "next_move");
        assert_eq!(json["from"], serde_json::json!([4, 2]));
        assert_eq!(json["to"], serde_json::json!([4, 4]));

        let error = HintResponse::from(Err(PegError::UnknownShape("hexagon".to_string())));
        assert_eq!(serde_json::to_value(&error).unwrap()["status"], "error");
        assert_eq!(
            serde_json::to_value(HintResponse::SolvingInBackground).unwrap(),
            serde_json::json!({"status": "solving_in_background"})
        );
    }
}
