//! Background solving.
//!
//! A [`Worker`] is a pull-based consumer of the solve queue: it claims an item, searches it
//! without a time limit and records the result. The same claim primitive backs the async loop
//! used in-process and the one-shot commands driven from the CLI, so any number of workers can
//! share a queue.

use crate::cache::SolutionCache;
use crate::queue::{Completion, QueueItem, SolveQueue};
use crate::shapes::ShapeRegistry;
use crate::solver::Solver;
use crate::Result;
use rayon::prelude::*;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

pub struct Worker {
    registry: Arc<ShapeRegistry>,
    cache: SolutionCache,
    queue: SolveQueue,
    time_limit: Option<Duration>,
}

impl Worker {
    pub fn new(registry: Arc<ShapeRegistry>, cache: SolutionCache, queue: SolveQueue) -> Self {
        Self {
            registry,
            cache,
            queue,
            time_limit: None,
        }
    }

    /// Caps each solve. Timed-out items go back to pending.
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    /// Claims one item and solves it. Returns `None` when nothing is pending.
    pub fn solve_one(&self) -> Result<Option<QueueItem>> {
        let Some(item) = self.queue.claim_next()? else {
            return Ok(None);
        };
        let completion = self.solve_item(&item);
        let done = self.queue.complete(&item, completion, &self.cache)?;
        Ok(Some(done.unwrap_or(item)))
    }

    /// Runs the search for a claimed item. Errors and panics become a fault on the item.
    fn solve_item(&self, item: &QueueItem) -> Completion {
        let shape = match self.registry.get(&item.shape) {
            Ok(shape) => shape,
            Err(e) => return Completion::Fault(e.to_string()),
        };
        info!("Solving {} ({} pieces)", item.id, item.pieces);
        let mut solver = Solver::new(shape, self.time_limit);
        let result = panic::catch_unwind(AssertUnwindSafe(|| solver.solve(item.bits)));
        match result {
            Ok(Ok(outcome)) => {
                let stats = solver.stats();
                info!(
                    "Finished {} in {:?} after {} nodes",
                    item.id, stats.elapsed, stats.nodes
                );
                Completion::Finished(outcome)
            }
            Ok(Err(e)) => Completion::Fault(e.to_string()),
            Err(payload) => {
                Completion::Fault(format!("solver panicked: {}", panic_message(&*payload)))
            }
        }
    }

    /// Drains the queue with `workers` threads and returns the items processed.
    pub fn solve_all(&self, workers: usize) -> Result<Vec<QueueItem>> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("solver-{}", i))
            .build()?;

        let (tx, rx) = crossbeam::channel::unbounded();
        pool.install(|| {
            (0..workers)
                .into_par_iter()
                .try_for_each_with(tx, |tx, _| -> Result<()> {
                    while let Some(item) = self.solve_one()? {
                        let _ = tx.send(item);
                    }
                    Ok(())
                })
        })?;

        let done: Vec<QueueItem> = rx.try_iter().collect();
        info!("Processed {} item(s) with {} worker(s)", done.len(), workers);
        Ok(done)
    }

    /// Solves queued items until `shutdown` resolves, sleeping between polls unless `wake` fires.
    ///
    /// An item being solved when shutdown arrives is released back to pending; the detached
    /// search thread keeps running until the process exits.
    pub async fn run(
        self: Arc<Self>,
        wake: Arc<Notify>,
        poll: Duration,
        shutdown: impl Future<Output = ()>,
    ) {
        tokio::pin!(shutdown);
        info!("Worker started, polling every {:?}", poll);

        loop {
            let claimed = match self.queue.claim_next() {
                Ok(claimed) => claimed,
                Err(e) => {
                    warn!("Queue unavailable: {}", e);
                    None
                }
            };

            if let Some(item) = claimed {
                let worker = Arc::clone(&self);
                let claimed_item = item.clone();
                let task = tokio::task::spawn_blocking(move || {
                    let completion = worker.solve_item(&claimed_item);
                    worker.queue.complete(&claimed_item, completion, &worker.cache)
                });

                tokio::select! {
                    _ = &mut shutdown => {
                        if let Err(e) = self.queue.release(&item) {
                            warn!("Could not release {}: {}", item.id, e);
                        }
                        break;
                    }
                    joined = task => match joined {
                        Ok(Ok(_)) => debug!("Completed {}", item.id),
                        Ok(Err(e)) => warn!("Could not record result for {}: {}", item.id, e),
                        Err(e) => error!("Solve task for {} aborted: {}", item.id, e),
                    }
                }
                continue;
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = wake.notified() => debug!("Worker woken"),
                _ = tokio::time::sleep(poll) => {}
            }
        }

        info!("Worker stopped");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
