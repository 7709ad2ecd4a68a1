use crate::shapes::ShapeRegistry;
use crate::solver::{SolveOutcome, Solver};
use crate::{Bits, PegError, Result};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Results from a benchmark run
#[derive(Debug)]
pub struct BenchmarkResults {
    pub total_duration: Duration,
    pub average_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub total_boards: usize,
    pub solved_boards: usize,
    pub unsolvable_boards: usize,
    pub timed_out_boards: usize,
    pub total_nodes: u64,
    /// Boards per shape id
    pub shape_counts: BTreeMap<String, usize>,
}

impl BenchmarkResults {
    /// Share of boards that finished (solved or proven unsolvable) as a percentage
    pub fn completion_rate(&self) -> f64 {
        ((self.solved_boards + self.unsolvable_boards) as f64 / self.total_boards as f64) * 100.0
    }

    /// Share of finished boards that were solvable, as a percentage
    pub fn solvable_rate(&self) -> f64 {
        let finished = self.solved_boards + self.unsolvable_boards;
        if finished == 0 {
            return 0.0;
        }
        (self.solved_boards as f64 / finished as f64) * 100.0
    }

    /// Pretty prints the benchmark results
    pub fn print_results(&self) {
        println!("\n=== Benchmark Results ===");
        println!("Total Duration: {:?}", self.total_duration);
        println!("Average Duration: {:?}", self.average_duration);
        println!("Min Duration: {:?}", self.min_duration);
        println!("Max Duration: {:?}", self.max_duration);
        println!("Total Boards: {}", self.total_boards);
        println!("Finished: {} ({:.1}%)",
            self.solved_boards + self.unsolvable_boards,
            self.completion_rate()
        );
        println!("Solvable: {} ({:.1}% of finished)", self.solved_boards, self.solvable_rate());
        println!("Unsolvable: {}", self.unsolvable_boards);
        println!("Timed Out: {}", self.timed_out_boards);
        println!("Nodes Expanded: {}", self.total_nodes);

        println!("\nShape Distribution:");
        for (shape, count) in &self.shape_counts {
            println!("  {}: {} ({:.1}%)",
                shape,
                count,
                (*count as f64 / self.total_boards as f64) * 100.0
            );
        }
    }
}

/// Plays random jumps from the full board (center empty) until at most `target` pieces remain
/// or no jump is left.
pub fn random_state(
    registry: &ShapeRegistry,
    shape_id: &str,
    target: u32,
    rng: &mut SmallRng,
) -> Result<Bits> {
    let shape = registry.get(shape_id)?;
    let data = shape.solver_data();
    let center = data.bit_of(shape.center()).ok_or_else(|| PegError::InvalidCell {
        shape: shape_id.to_string(),
        row: shape.center().0,
        col: shape.center().1,
    })?;

    let mut state = data.full_mask() & !(1 << center);
    while state.count_ones() > target {
        let legal: Vec<_> = data.legal_moves(state).collect();
        match legal.choose(rng) {
            Some(mv) => state = mv.apply(state),
            None => break,
        }
    }
    Ok(state)
}

/// Solves `board_count` random mid-game boards across the registry's shapes
pub fn run_benchmark(
    registry: &ShapeRegistry,
    board_count: usize,
    time_limit: Duration,
    seed: u64,
) -> Result<BenchmarkResults> {
    if board_count == 0 {
        return Err(PegError::Config("Board count must be greater than 0".to_string()));
    }

    let shape_ids: Vec<&str> = registry.ids().collect();
    let mut rng = SmallRng::seed_from_u64(seed);

    info!("Starting benchmark with {} boards...", board_count);
    let start = Instant::now();
    let mut min_duration = Duration::MAX;
    let mut max_duration = Duration::ZERO;
    let mut solve_duration = Duration::ZERO;
    let mut solved_boards = 0;
    let mut unsolvable_boards = 0;
    let mut timed_out_boards = 0;
    let mut total_nodes = 0;
    let mut shape_counts = BTreeMap::new();

    for i in 0..board_count {
        let Some(&shape_id) = shape_ids.choose(&mut rng) else {
            return Err(PegError::Config("Registry has no shapes".to_string()));
        };
        let target = rng.gen_range(6..=16);
        let bits = random_state(registry, shape_id, target, &mut rng)?;
        *shape_counts.entry(shape_id.to_string()).or_insert(0) += 1;

        debug!(
            "Solving board {}/{} ({}, {} pieces)",
            i + 1,
            board_count,
            shape_id,
            bits.count_ones()
        );
        let shape = registry.get(shape_id)?;
        let mut solver = Solver::new(shape, Some(time_limit));
        match solver.solve(bits)? {
            SolveOutcome::Solved(_) => solved_boards += 1,
            SolveOutcome::NoSolution => unsolvable_boards += 1,
            SolveOutcome::TimedOut => timed_out_boards += 1,
        }

        let stats = solver.stats();
        total_nodes += stats.nodes;
        min_duration = min_duration.min(stats.elapsed);
        max_duration = max_duration.max(stats.elapsed);
        solve_duration += stats.elapsed;
    }

    Ok(BenchmarkResults {
        total_duration: start.elapsed(),
        average_duration: solve_duration / board_count as u32,
        min_duration,
        max_duration,
        total_boards: board_count,
        solved_boards,
        unsolvable_boards,
        timed_out_boards,
        total_nodes,
        shape_counts,
    })
}
