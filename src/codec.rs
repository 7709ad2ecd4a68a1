use crate::shapes::Shape;
use crate::{Bits, Cell, PegError, Result};

/// Encodes a presence grid. Cells outside the shape are ignored, as are rows and columns the
/// grid does not cover.
pub fn encode(shape: &Shape, grid: &[Vec<bool>]) -> Bits {
    shape
        .solver_data()
        .cells()
        .iter()
        .enumerate()
        .filter(|&(_, &(r, c))| grid.get(r).and_then(|row| row.get(c)).copied().unwrap_or(false))
        .fold(0, |bits, (bit, _)| bits | (1 << bit))
}

/// Encodes a list of occupied cells, rejecting any that are not part of the shape.
pub fn encode_cells(shape: &Shape, cells: &[Cell]) -> Result<Bits> {
    let data = shape.solver_data();
    cells.iter().try_fold(0, |bits, &(row, col)| {
        data.bit_of((row, col))
            .map(|bit| bits | (1 << bit))
            .ok_or_else(|| PegError::InvalidCell {
                shape: shape.id().to_string(),
                row,
                col,
            })
    })
}

/// Decodes to a `rows x cols` presence grid.
pub fn decode(shape: &Shape, bits: Bits) -> Vec<Vec<bool>> {
    let mut grid = vec![vec![false; shape.cols()]; shape.rows()];
    for (r, c) in decode_cells(shape, bits) {
        grid[r][c] = true;
    }
    grid
}

/// Occupied cells in bit order. Bits beyond the shape's cells are dropped.
pub fn decode_cells(shape: &Shape, bits: Bits) -> Vec<Cell> {
    shape
        .solver_data()
        .cells()
        .iter()
        .enumerate()
        .filter(|&(bit, _)| bits & (1 << bit) != 0)
        .map(|(_, &cell)| cell)
        .collect()
}
