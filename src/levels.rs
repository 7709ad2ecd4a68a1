//! The classic starting layouts on the Wiegleb board.

use crate::cache::{CacheEntry, SolutionCache};
use crate::shapes::Shape;
use crate::solver::{self, SolveOutcome};
use crate::{codec, Cell, Result};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct Level {
    pub number: u8,
    pub name: &'static str,
    pub pieces: &'static [Cell],
}

pub const LEVELS: [Level; 7] = [
    Level {
        number: 1,
        name: "Cross",
        pieces: &[
            (4, 2), (4, 3), (4, 4), (4, 5), (4, 6),
            (2, 4), (3, 4), (5, 4), (6, 4),
        ],
    },
    Level {
        number: 2,
        name: "Small triangle",
        pieces: &[
            (2, 4),
            (3, 3), (3, 4), (3, 5),
            (4, 2), (4, 3), (4, 4), (4, 5), (4, 6),
            (5, 1), (5, 2), (5, 3), (5, 4), (5, 5), (5, 6), (5, 7),
        ],
    },
    Level {
        number: 3,
        name: "Arrow",
        pieces: &[
            (1, 4),
            (2, 3), (2, 4), (2, 5),
            (3, 2), (3, 3), (3, 4), (3, 5), (3, 6),
            (4, 4),
            (5, 4),
            (6, 3), (6, 4), (6, 5),
            (7, 3), (7, 4), (7, 5),
        ],
    },
    Level {
        number: 4,
        name: "Diamond",
        pieces: &[
            (1, 4),
            (2, 3), (2, 4), (2, 5),
            (3, 2), (3, 3), (3, 4), (3, 5), (3, 6),
            (4, 1), (4, 2), (4, 3), (4, 5), (4, 6), (4, 7),
            (5, 2), (5, 3), (5, 4), (5, 5), (5, 6),
            (6, 3), (6, 4), (6, 5),
            (7, 4),
        ],
    },
    Level {
        number: 5,
        name: "Big triangle",
        pieces: &[
            (1, 4),
            (2, 3), (2, 4), (2, 5),
            (3, 2), (3, 3), (3, 4), (3, 5), (3, 6),
            (4, 1), (4, 2), (4, 3), (4, 4), (4, 5), (4, 6), (4, 7),
            (5, 0), (5, 1), (5, 2), (5, 3), (5, 4), (5, 5), (5, 6), (5, 7), (5, 8),
        ],
    },
    Level {
        number: 6,
        name: "Small square",
        pieces: &[
            (1, 3), (1, 4), (1, 5),
            (2, 3), (2, 4), (2, 5),
            (3, 1), (3, 2), (3, 3), (3, 4), (3, 5), (3, 6), (3, 7),
            (4, 1), (4, 2), (4, 3), (4, 5), (4, 6), (4, 7),
            (5, 1), (5, 2), (5, 3), (5, 4), (5, 5), (5, 6), (5, 7),
            (6, 3), (6, 4), (6, 5),
            (7, 3), (7, 4), (7, 5),
        ],
    },
    Level {
        number: 7,
        name: "Full board",
        pieces: &[
            (0, 3), (0, 4), (0, 5),
            (1, 3), (1, 4), (1, 5),
            (2, 3), (2, 4), (2, 5),
            (3, 0), (3, 1), (3, 2), (3, 3), (3, 4), (3, 5), (3, 6), (3, 7), (3, 8),
            (4, 0), (4, 1), (4, 2), (4, 3), (4, 5), (4, 6), (4, 7), (4, 8),
            (5, 0), (5, 1), (5, 2), (5, 3), (5, 4), (5, 5), (5, 6), (5, 7), (5, 8),
            (6, 3), (6, 4), (6, 5),
            (7, 3), (7, 4), (7, 5),
            (8, 3), (8, 4), (8, 5),
        ],
    },
];

/// Per-level result of [`prepopulate`].
#[derive(Debug, Clone)]
pub struct PrepopulateReport {
    pub level: u8,
    pub outcome: &'static str,
    pub cached_states: usize,
    pub elapsed: Duration,
}

/// Solves each level on `shape` and writes the solution paths through `cache`. Levels already
/// cached are skipped.
pub fn prepopulate(
    shape: &Shape,
    cache: &SolutionCache,
    levels: &[Level],
    time_limit: Option<Duration>,
) -> Result<Vec<PrepopulateReport>> {
    let mut reports = Vec::with_capacity(levels.len());
    for level in levels {
        let bits = codec::encode_cells(shape, level.pieces)?;
        info!("Level {} - {} ({} pieces)", level.number, level.name, level.pieces.len());

        if let Some(entry) = cache.get(shape.id(), bits)? {
            info!("Level {} already cached ({})", level.number, entry_kind(&entry));
            reports.push(PrepopulateReport {
                level: level.number,
                outcome: "cached",
                cached_states: 0,
                elapsed: Duration::ZERO,
            });
            continue;
        }

        let start = Instant::now();
        let outcome = solver::solve(shape, bits, time_limit)?;
        let elapsed = start.elapsed();
        let (label, cached_states) = match outcome {
            SolveOutcome::Solved(path) => {
                let written = cache.put_solution(shape.id(), bits, &path)?;
                info!("Level {} solved in {:?}, cached {} states", level.number, elapsed, written);
                ("solved", written)
            }
            SolveOutcome::NoSolution => {
                cache.put_no_solution(shape.id(), bits)?;
                warn!("Level {} has no solution", level.number);
                ("no_solution", 1)
            }
            SolveOutcome::TimedOut => {
                warn!("Level {} not solved within {:?}", level.number, time_limit);
                ("timed_out", 0)
            }
        };
        reports.push(PrepopulateReport {
            level: level.number,
            outcome: label,
            cached_states,
            elapsed,
        });
    }
    Ok(reports)
}

fn entry_kind(entry: &CacheEntry) -> &'static str {
    match entry {
        CacheEntry::Solved(_) => "solved",
        CacheEntry::NoSolution => "no solution",
        CacheEntry::Queued => "queued",
    }
}
