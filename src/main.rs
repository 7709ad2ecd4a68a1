//! Worker-control and maintenance commands for the peg solitaire hint engine.
//!
//! This program:
//! 1. Runs the background solver loop against the shared queue (`worker`)
//! 2. Claims and solves queued states on demand (`solve-one`, `solve-all`)
//! 3. Reports and maintains the queue (`stats`, `cleanup`, `reset-stuck`)
//! 4. Pre-populates the cache with the classic levels (`prepopulate`)
//! 5. Answers a single hint from the command line (`hint`)

use peg_hint::cache::{CacheEntry, SolutionCache};
use peg_hint::config::Config;
use peg_hint::hint::{HintResponse, HintService};
use peg_hint::queue::{QueueItem, SolveQueue};
use peg_hint::store::{JsonFileStore, Store};
use peg_hint::worker::Worker;
use peg_hint::{benchmark, levels, shapes, Cell, PegError, Result};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

const USAGE: &str = "usage: peg-hint <command>

commands:
  worker                 run the background solver until Ctrl-C
  solve-one              claim and solve one queued state
  solve-all              solve every queued state with PEG_WORKERS threads
  stats                  show queue counts by status
  cleanup                remove solved and failed queue items
  reset-stuck            return every solving item to pending
  prepopulate [secs]     solve and cache the classic levels (default 300s each)
  hint <shape> <r,c;..>  print the hint for a board
  benchmark [count]      time the solver on random boards

every command except benchmark needs PEG_CACHE_PATH and PEG_QUEUE_PATH";

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_thread_names(true)
        .init();

    let args: Vec<String> = env::args().collect();
    if let Err(e) = run(&config, &args).await {
        error!("{}", e);
        std::process::exit(1);
    }
    // Detached solves from an interrupted worker must not hold the process open
    std::process::exit(0);
}

async fn run(config: &Config, args: &[String]) -> Result<()> {
    let registry = shapes::builtin();

    match args.get(1).map(|s| s.as_str()) {
        Some("worker") => {
            let (cache, queue) = open_stores(config)?;
            // Hints from other processes are picked up by polling
            let wake = Arc::new(Notify::new());
            let worker = Arc::new(Worker::new(registry, cache, queue));
            worker
                .run(wake, config.worker_poll, async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Could not listen for Ctrl-C: {}", e);
                    }
                })
                .await;
        }
        Some("solve-one") => {
            let (cache, queue) = open_stores(config)?;
            match Worker::new(registry, cache, queue).solve_one()? {
                Some(item) => print_item(&item),
                None => println!("No items in queue."),
            }
        }
        Some("solve-all") => {
            let (cache, queue) = open_stores(config)?;
            let workers = config.workers;
            let done = tokio::task::spawn_blocking(move || {
                Worker::new(registry, cache, queue).solve_all(workers)
            })
            .await
            .map_err(|e| PegError::Config(format!("solve-all task failed: {}", e)))??;
            for item in &done {
                print_item(item);
            }
            println!("\nProcessed {} item(s).", done.len());
        }
        Some("stats") => {
            let queue = open_queue(config)?;
            let stats = queue.stats()?;
            println!("Solver Queue Statistics");
            println!("{}", "-".repeat(30));
            println!("  {:>10}: {}", "pending", stats.pending);
            println!("  {:>10}: {}", "solving", stats.solving);
            println!("  {:>10}: {}", "solved", stats.solved);
            println!("  {:>10}: {}", "failed", stats.failed);
            println!("  {:>10}: {}", "total", stats.total);
        }
        Some("cleanup") => {
            let queue = open_queue(config)?;
            println!("Removed {} solved/failed item(s) from queue.", queue.cleanup()?);
        }
        Some("reset-stuck") => {
            let queue = open_queue(config)?;
            println!("Reset {} solving item(s) to pending.", queue.reset_stuck()?);
        }
        Some("prepopulate") => {
            let secs = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(300);
            let cache = open_cache(config)?;
            let shape = registry.get(shapes::DEFAULT_SHAPE)?;
            let reports = levels::prepopulate(
                shape,
                &cache,
                &levels::LEVELS,
                Some(Duration::from_secs(secs)),
            )?;
            for report in reports {
                println!(
                    "Level {}: {} ({} states cached, {:?})",
                    report.level, report.outcome, report.cached_states, report.elapsed
                );
            }
        }
        Some("hint") => {
            let shape_id = args.get(2).map(String::as_str);
            let cells = parse_cells(args.get(3).map(String::as_str).unwrap_or(""))?;
            let (cache, queue) = open_stores(config)?;
            let service = HintService::new(registry, cache, queue, config.hint_time_limit);
            let response = HintResponse::from(service.hint_cells(&cells, shape_id));
            let json = serde_json::to_string_pretty(&response)
                .map_err(|e| PegError::Config(e.to_string()))?;
            println!("{}", json);
        }
        Some("benchmark") => {
            let count = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(100);
            info!("Running benchmark with {} boards...", count);
            let results =
                benchmark::run_benchmark(&registry, count, config.hint_time_limit, 0x5eed)?;
            results.print_results();
        }
        _ => println!("{}", USAGE),
    }
    Ok(())
}

fn open_stores(config: &Config) -> Result<(SolutionCache, SolveQueue)> {
    Ok((open_cache(config)?, open_queue(config)?))
}

fn open_queue(config: &Config) -> Result<SolveQueue> {
    let store: Arc<dyn Store<QueueItem>> =
        Arc::new(JsonFileStore::open(config.require_queue_path()?)?);
    Ok(SolveQueue::new(store, config.stale_after))
}

fn open_cache(config: &Config) -> Result<SolutionCache> {
    let store: Arc<dyn Store<CacheEntry>> =
        Arc::new(JsonFileStore::open(config.require_cache_path()?)?);
    Ok(SolutionCache::new(store))
}

/// Parses `"r,c;r,c;..."` into cells.
fn parse_cells(raw: &str) -> Result<Vec<Cell>> {
    raw.split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (r, c) = part
                .split_once(',')
                .ok_or_else(|| PegError::Config(format!("Bad cell {:?}, expected r,c", part)))?;
            let parse = |v: &str| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| PegError::Config(format!("Bad cell {:?}, expected r,c", part)))
            };
            Ok((parse(r)?, parse(c)?))
        })
        .collect()
}

fn print_item(item: &QueueItem) {
    println!(
        "{} ({} pieces): {:?}{}",
        item.id,
        item.pieces,
        item.status,
        item.error
            .as_deref()
            .map(|e| format!(" - {}", e))
            .unwrap_or_default()
    );
}
