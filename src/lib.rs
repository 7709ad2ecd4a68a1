use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod benchmark;
pub mod cache;
pub mod codec;
pub mod config;
pub mod hint;
pub mod levels;
pub mod moves;
pub mod queue;
pub mod shapes;
pub mod solver;
pub mod store;
pub mod worker;

pub use store::StoreError;

/// Bitmask board: bit `i` is set when the `i`-th valid cell of the shape holds a piece.
pub type Bits = u64;

/// A `(row, col)` cell coordinate on a shape's grid.
pub type Cell = (usize, usize);

#[derive(Debug, Error)]
pub enum PegError {
    #[error("Unknown board shape: {0}")]
    UnknownShape(String),
    #[error("Invalid board state {bits:#x} for shape {shape}")]
    InvalidState { shape: String, bits: Bits },
    #[error("Cell ({row}, {col}) is not part of shape {shape}")]
    InvalidCell {
        shape: String,
        row: usize,
        col: usize,
    },
    #[error("Shape {shape} has {cells} cells, at most 64 fit a bitmask")]
    ShapeTooLarge { shape: String, cells: usize },
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Identifies one board position across the whole system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey {
    pub shape: String,
    pub bits: Bits,
}

impl StateKey {
    pub fn new(shape: impl Into<String>, bits: Bits) -> Self {
        Self {
            shape: shape.into(),
            bits,
        }
    }

    pub fn pieces(&self) -> u32 {
        self.bits.count_ones()
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.shape, self.bits)
    }
}

pub type Result<T> = std::result::Result<T, PegError>;
