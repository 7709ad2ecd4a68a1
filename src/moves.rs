//! Move tables.
//!
//! A move is a jump from one cell over an orthogonal neighbour into the empty cell beyond it.
//! Each move carries the XOR mask of its three bits, so applying it and undoing it are the same
//! operation.

use crate::shapes::Shape;
use crate::{Bits, Cell};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Jump directions as `(row, col)` steps, in table order: up, down, left, right.
pub const DIRECTIONS: [(isize, isize); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

/// A jump expressed in bit positions of a shape's bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    pub from: u8,
    pub over: u8,
    pub to: u8,
    pub mask: Bits,
}

impl Move {
    pub fn new(from: u8, over: u8, to: u8) -> Self {
        Self {
            from,
            over,
            to,
            mask: (1 << from) | (1 << over) | (1 << to),
        }
    }

    /// From and over occupied, to empty.
    #[inline]
    pub fn is_legal(&self, state: Bits) -> bool {
        let required = (1 << self.from) | (1 << self.over);
        state & required == required && state & (1 << self.to) == 0
    }

    /// Applies (or, on the resulting state, undoes) the move.
    #[inline]
    pub fn apply(&self, state: Bits) -> Bits {
        state ^ self.mask
    }
}

/// A move translated back to grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveCells {
    pub from: Cell,
    pub over: Cell,
    pub to: Cell,
}

/// Per-shape bit index and move table.
#[derive(Debug, Clone)]
pub struct SolverData {
    cells: Vec<Cell>,
    index: HashMap<Cell, u8>,
    full_mask: Bits,
    moves: Vec<Move>,
}

impl SolverData {
    /// Derives the table from the shape's cells. Pure, so repeated builds are identical.
    pub fn build(shape: &Shape) -> Self {
        let cells = shape.cells().to_vec();
        let index: HashMap<Cell, u8> = cells
            .iter()
            .enumerate()
            .map(|(bit, &cell)| (cell, bit as u8))
            .collect();

        let full_mask = match cells.len() {
            64 => Bits::MAX,
            n => (1 << n) - 1,
        };

        let step = |(r, c): Cell, (dr, dc): (isize, isize), n: isize| -> Option<Cell> {
            let row = r.checked_add_signed(dr * n)?;
            let col = c.checked_add_signed(dc * n)?;
            Some((row, col))
        };

        let mut moves = Vec::new();
        for (from, &cell) in cells.iter().enumerate() {
            for dir in DIRECTIONS {
                let over = step(cell, dir, 1).and_then(|c| index.get(&c));
                let to = step(cell, dir, 2).and_then(|c| index.get(&c));
                if let (Some(&over), Some(&to)) = (over, to) {
                    moves.push(Move::new(from as u8, over, to));
                }
            }
        }

        Self {
            cells,
            index,
            full_mask,
            moves,
        }
    }

    pub fn full_mask(&self) -> Bits {
        self.full_mask
    }

    /// Every move of the shape, in search order.
    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn bit_of(&self, cell: Cell) -> Option<u8> {
        self.index.get(&cell).copied()
    }

    pub fn cell_of(&self, bit: u8) -> Option<Cell> {
        self.cells.get(bit as usize).copied()
    }

    /// Cells in bit order.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// At least one piece and nothing outside the shape.
    pub fn is_valid_state(&self, state: Bits) -> bool {
        state != 0 && state & !self.full_mask == 0
    }

    /// Moves applicable to `state`, in table order.
    pub fn legal_moves(&self, state: Bits) -> impl Iterator<Item = &Move> + '_ {
        self.moves.iter().filter(move |m| m.is_legal(state))
    }

    pub fn describe(&self, mv: &Move) -> Option<MoveCells> {
        Some(MoveCells {
            from: self.cell_of(mv.from)?,
            over: self.cell_of(mv.over)?,
            to: self.cell_of(mv.to)?,
        })
    }

    /// Finds the table move jumping from `from` to `to`.
    pub fn find_move(&self, from: Cell, to: Cell) -> Option<Move> {
        let from = self.bit_of(from)?;
        let to = self.bit_of(to)?;
        self.moves
            .iter()
            .find(|m| m.from == from && m.to == to)
            .copied()
    }

    /// States visited by `path` starting at `start`, including both ends.
    pub fn path_states(&self, start: Bits, path: &[Move]) -> Vec<Bits> {
        let mut states = Vec::with_capacity(path.len() + 1);
        states.push(start);
        let mut state = start;
        for mv in path {
            state = mv.apply(state);
            states.push(state);
        }
        states
    }
}
