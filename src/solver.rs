use crate::moves::{Move, SolverData};
use crate::shapes::Shape;
use crate::{Bits, PegError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Dead states recorded per search before the table stops growing.
pub const MAX_DEAD_STATES: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveOutcome {
    /// Moves from the initial state to a single remaining piece.
    Solved(Vec<Move>),
    /// Exhaustive search found no way down to one piece.
    NoSolution,
    /// The time budget ran out first.
    TimedOut,
}

/// Counters from the most recent search.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolveStats {
    pub nodes: u64,
    pub dead_states: usize,
    pub elapsed: Duration,
}

struct Frame {
    state: Bits,
    // Index of the next move-table entry to try
    next: usize,
}

/// Depth-first backtracking search over one shape's bitmask states.
pub struct Solver<'a> {
    shape: &'a Shape,
    data: &'a SolverData,
    time_limit: Option<Duration>,
    stats: SolveStats,
}

impl<'a> Solver<'a> {
    /// A solver bounded by `time_limit`, or unbounded when `None`.
    pub fn new(shape: &'a Shape, time_limit: Option<Duration>) -> Self {
        Self {
            shape,
            data: shape.solver_data(),
            time_limit,
            stats: SolveStats::default(),
        }
    }

    pub fn stats(&self) -> SolveStats {
        self.stats
    }

    /// Searches for a sequence of jumps leaving exactly one piece.
    ///
    /// Moves are tried in table order and the first solution found is returned, so identical
    /// inputs always yield identical paths. A state with no pieces, or with pieces outside the
    /// shape, is rejected before searching.
    pub fn solve(&mut self, start: Bits) -> Result<SolveOutcome> {
        if !self.data.is_valid_state(start) {
            return Err(PegError::InvalidState {
                shape: self.shape.id().to_string(),
                bits: start,
            });
        }

        self.stats = SolveStats::default();
        if start.count_ones() == 1 {
            return Ok(SolveOutcome::Solved(Vec::new()));
        }

        let started = Instant::now();
        let deadline = self.time_limit.map(|limit| started + limit);
        debug!(
            "Solving {} state {:#x} ({} pieces, limit {:?})",
            self.shape.id(),
            start,
            start.count_ones(),
            self.time_limit
        );

        let outcome = self.search(start, deadline);
        self.stats.elapsed = started.elapsed();
        debug!(
            "Search on {} finished: {} after {} nodes, {} dead states, {:?}",
            self.shape.id(),
            match &outcome {
                SolveOutcome::Solved(_) => "solved",
                SolveOutcome::NoSolution => "no solution",
                SolveOutcome::TimedOut => "timed out",
            },
            self.stats.nodes,
            self.stats.dead_states,
            self.stats.elapsed
        );
        Ok(outcome)
    }

    fn search(&mut self, start: Bits, deadline: Option<Instant>) -> SolveOutcome {
        let data = self.data;
        let moves = data.moves();
        // States with no continuation down to one piece, scoped to this call
        let mut dead: HashSet<Bits> = HashSet::new();
        // Invariant: path.len() == stack.len() - 1
        let mut path: Vec<Move> = Vec::with_capacity(data.cell_count());
        let mut stack = Vec::with_capacity(data.cell_count());
        stack.push(Frame { state: start, next: 0 });
        self.stats.nodes = 1;

        while let Some(frame) = stack.last_mut() {
            let found = moves[frame.next..]
                .iter()
                .position(|mv| mv.is_legal(frame.state));

            let Some(offset) = found else {
                let exhausted = frame.state;
                stack.pop();
                path.pop();
                if dead.len() < MAX_DEAD_STATES {
                    dead.insert(exhausted);
                }
                continue;
            };

            let index = frame.next + offset;
            frame.next = index + 1;
            let mv = moves[index];
            let child = mv.apply(frame.state);

            if child.count_ones() == 1 {
                path.push(mv);
                self.stats.dead_states = dead.len();
                return SolveOutcome::Solved(path);
            }
            if dead.contains(&child) {
                continue;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                trace!("Deadline hit at depth {}", path.len());
                self.stats.dead_states = dead.len();
                return SolveOutcome::TimedOut;
            }

            path.push(mv);
            stack.push(Frame {
                state: child,
                next: 0,
            });
            self.stats.nodes += 1;
        }

        self.stats.dead_states = dead.len();
        SolveOutcome::NoSolution
    }
}

/// One-shot search with a fresh [`Solver`].
pub fn solve(shape: &Shape, start: Bits, time_limit: Option<Duration>) -> Result<SolveOutcome> {
    Solver::new(shape, time_limit).solve(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::random_state;
    use crate::{codec, levels, shapes};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn line(len: usize) -> Shape {
        Shape::from_fn("line", "Line", 1, len, (0, 0), |_, _| true).unwrap()
    }

    fn assert_valid_path(data: &SolverData, start: Bits, path: &[Move]) {
        let mut state = start;
        for mv in path {
            assert_eq!(mv.mask & !data.full_mask(), 0, "move {:?} leaves the board", mv);
            assert!(mv.is_legal(state), "illegal move {:?} on {:#x}", mv, state);
            let next = mv.apply(state);
            assert_eq!(next.count_ones(), state.count_ones() - 1);
            state = next;
        }
        assert_eq!(state.count_ones(), 1);
    }

    #[test]
    fn test_three_cell_line() {
        let shape = line(3);
        let outcome = solve(&shape, 0b011, None).unwrap();
        let expected = Move::new(0, 1, 2);
        assert_eq!(outcome, SolveOutcome::Solved(vec![expected]));
        assert_eq!(expected.mask, 0b111);
        assert_eq!(0b011 ^ expected.mask, 0b100);
    }

    #[test]
    fn test_two_cells_no_solution() {
        let shape = line(2);
        let outcome = solve(&shape, 0b11, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(outcome, SolveOutcome::NoSolution);
    }

    #[test]
    fn test_single_piece_is_trivially_solved() {
        let registry = shapes::builtin();
        let shape = registry.get("wiegleb").unwrap();
        for bit in 0..45 {
            let mut solver = Solver::new(shape, Some(Duration::ZERO));
            assert_eq!(solver.solve(1 << bit).unwrap(), SolveOutcome::Solved(vec![]));
            assert_eq!(solver.stats().nodes, 0, "no search for a single piece");
        }
    }

    #[test]
    fn test_invalid_states_rejected() {
        let shape = line(3);
        assert!(matches!(solve(&shape, 0, None), Err(PegError::InvalidState { bits: 0, .. })));
        assert!(matches!(
            solve(&shape, 0b1001, None),
            Err(PegError::InvalidState { bits: 0b1001, .. })
        ));
    }

    #[test]
    fn test_levels_solve_with_valid_paths() {
        let registry = shapes::builtin();
        let shape = registry.get("wiegleb").unwrap();
        for level in levels::LEVELS.iter().take(2) {
            let bits = codec::encode_cells(shape, level.pieces).unwrap();
            match solve(shape, bits, Some(Duration::from_secs(10))).unwrap() {
                SolveOutcome::Solved(path) => {
                    assert_eq!(path.len(), level.pieces.len() - 1, "{}", level.name);
                    assert_valid_path(shape.solver_data(), bits, &path);
                }
                other => panic!("{} should be solvable, got {:?}", level.name, other),
            }
        }
    }

    #[test]
    fn test_random_boards_solve_with_valid_paths() {
        let registry = shapes::builtin();
        let mut rng = SmallRng::seed_from_u64(11);
        for id in shapes::SHAPE_ORDER {
            let shape = registry.get(id).unwrap();
            for _ in 0..4 {
                let bits = random_state(&registry, id, 9, &mut rng).unwrap();
                match solve(shape, bits, Some(Duration::from_secs(10))).unwrap() {
                    SolveOutcome::Solved(path) => {
                        assert_eq!(path.len() as u32, bits.count_ones() - 1);
                        assert_valid_path(shape.solver_data(), bits, &path);
                    }
                    SolveOutcome::NoSolution => {}
                    SolveOutcome::TimedOut => panic!("{} board {:#x} timed out", id, bits),
                }
            }
        }
    }

    #[test]
    fn test_deterministic_paths() {
        let registry = shapes::builtin();
        let shape = registry.get("wiegleb").unwrap();
        let bits = codec::encode_cells(shape, levels::LEVELS[1].pieces).unwrap();
        let first = solve(shape, bits, None).unwrap();
        let second = solve(shape, bits, None).unwrap();
        assert_eq!(first, second);
        assert!(matches!(first, SolveOutcome::Solved(_)));
    }

    #[test]
    fn test_zero_budget_times_out() {
        let registry = shapes::builtin();
        let shape = registry.get("wiegleb").unwrap();
        let bits = codec::encode_cells(shape, levels::LEVELS[6].pieces).unwrap();
        let outcome = solve(shape, bits, Some(Duration::ZERO)).unwrap();
        assert_eq!(outcome, SolveOutcome::TimedOut);
    }

    #[test]
    fn test_isolated_pieces_have_no_solution() {
        let registry = shapes::builtin();
        let shape = registry.get("english").unwrap();
        let bits = codec::encode_cells(shape, &[(0, 2), (6, 4)]).unwrap();
        assert_eq!(solve(shape, bits, None).unwrap(), SolveOutcome::NoSolution);
    }

    #[test]
    fn test_dead_states_are_pruned() {
        let registry = shapes::builtin();
        let shape = registry.get("english").unwrap();
        // Every jump out of a plus sign strands four pieces
        let bits = codec::encode_cells(shape, &[(2, 3), (3, 2), (3, 3), (3, 4), (4, 3)]).unwrap();
        let mut solver = Solver::new(shape, None);
        assert_eq!(solver.solve(bits).unwrap(), SolveOutcome::NoSolution);
        assert_eq!(solver.stats().dead_states, 5);
        assert_eq!(solver.stats().nodes, 5);
    }
}
