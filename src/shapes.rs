//! Board geometries.
//!
//! A [`Shape`] is the set of playable cells of a board variant. Shapes are registered once in a
//! [`ShapeRegistry`] and are read-only afterwards. Each shape lazily builds its [`SolverData`]
//! on first use and keeps it for the lifetime of the shape.

use crate::moves::SolverData;
use crate::{Cell, PegError, Result};
use once_cell::sync::{Lazy, OnceCell};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

pub const DEFAULT_SHAPE: &str = "wiegleb";

/// Display order of the built-in shapes.
pub const SHAPE_ORDER: [&str; 5] = ["wiegleb", "english", "european", "asymmetrical", "diamond"];

#[derive(Debug)]
pub struct Shape {
    id: String,
    name: String,
    rows: usize,
    cols: usize,
    center: Cell,
    // Row-major, deduplicated
    cells: Vec<Cell>,
    solver_data: OnceCell<SolverData>,
}

impl Shape {
    /// Builds a shape from a cell predicate evaluated over the `rows x cols` grid.
    pub fn from_fn(
        id: &str,
        name: &str,
        rows: usize,
        cols: usize,
        center: Cell,
        is_valid: impl Fn(usize, usize) -> bool,
    ) -> Result<Self> {
        let cells = (0..rows)
            .flat_map(|r| (0..cols).map(move |c| (r, c)))
            .filter(|&(r, c)| is_valid(r, c))
            .collect();
        Self::from_cells(id, name, rows, cols, center, cells)
    }

    /// Builds a shape from an explicit cell list.
    pub fn from_cells(
        id: &str,
        name: &str,
        rows: usize,
        cols: usize,
        center: Cell,
        mut cells: Vec<Cell>,
    ) -> Result<Self> {
        cells.sort_unstable();
        cells.dedup();

        if let Some(&(row, col)) = cells.iter().find(|&&(r, c)| r >= rows || c >= cols) {
            return Err(PegError::InvalidCell {
                shape: id.to_string(),
                row,
                col,
            });
        }
        if cells.len() > 64 {
            return Err(PegError::ShapeTooLarge {
                shape: id.to_string(),
                cells: cells.len(),
            });
        }

        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            rows,
            cols,
            center,
            cells,
            solver_data: OnceCell::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn center(&self) -> Cell {
        self.center
    }

    /// Valid cells in bit order.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn contains(&self, cell: Cell) -> bool {
        self.cells.binary_search(&cell).is_ok()
    }

    /// Move table and bit index for this shape, built on first access.
    ///
    /// Concurrent first callers block on a single build, so every caller observes the same
    /// table.
    pub fn solver_data(&self) -> &SolverData {
        self.solver_data.get_or_init(|| {
            let data = SolverData::build(self);
            debug!(
                "Built solver data for {}: {} cells, {} moves",
                self.id,
                self.cells.len(),
                data.moves().len()
            );
            data
        })
    }
}

fn english_valid(r: usize, c: usize) -> bool {
    if r > 6 || c > 6 {
        return false;
    }
    let corner_row = r < 2 || r > 4;
    let corner_col = c < 2 || c > 4;
    !(corner_row && corner_col)
}

fn european_valid(r: usize, c: usize) -> bool {
    english_valid(r, c) || matches!((r, c), (1, 1) | (1, 5) | (5, 1) | (5, 5))
}

fn wiegleb_valid(r: usize, c: usize) -> bool {
    if r > 8 || c > 8 {
        return false;
    }
    let corner_row = r < 3 || r > 5;
    let corner_col = c < 3 || c > 5;
    !(corner_row && corner_col)
}

// Top arm three deep, bottom arm two deep; left arm two wide, right arm three wide.
fn asymmetrical_valid(r: usize, c: usize) -> bool {
    if r > 7 || c > 7 {
        return false;
    }
    (3..=5).contains(&r) || (2..=4).contains(&c)
}

fn diamond_valid(r: usize, c: usize) -> bool {
    if r > 8 || c > 8 {
        return false;
    }
    r.abs_diff(4) + c.abs_diff(4) <= 4
}

/// Lookup table of shapes by id.
#[derive(Debug)]
pub struct ShapeRegistry {
    shapes: HashMap<String, Shape>,
    order: Vec<String>,
    default_id: String,
}

impl ShapeRegistry {
    pub fn new(default_id: &str) -> Self {
        Self {
            shapes: HashMap::new(),
            order: Vec::new(),
            default_id: default_id.to_string(),
        }
    }

    /// The five classic boards, defaulting to Wiegleb.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new(DEFAULT_SHAPE);
        registry.register(Shape::from_fn("wiegleb", "Wiegleb", 9, 9, (4, 4), wiegleb_valid)?);
        registry.register(Shape::from_fn("english", "English", 7, 7, (3, 3), english_valid)?);
        registry.register(Shape::from_fn("european", "European", 7, 7, (2, 3), european_valid)?);
        registry.register(Shape::from_fn(
            "asymmetrical",
            "Asymmetrical",
            8,
            8,
            (4, 3),
            asymmetrical_valid,
        )?);
        registry.register(Shape::from_fn("diamond", "Diamond", 9, 9, (4, 4), diamond_valid)?);
        Ok(registry)
    }

    /// Adds or replaces a shape. Only possible before the registry is shared.
    pub fn register(&mut self, shape: Shape) {
        if !self.shapes.contains_key(shape.id()) {
            self.order.push(shape.id().to_string());
        }
        self.shapes.insert(shape.id().to_string(), shape);
    }

    pub fn get(&self, id: &str) -> Result<&Shape> {
        self.shapes
            .get(id)
            .ok_or_else(|| PegError::UnknownShape(id.to_string()))
    }

    /// Looks up `id`, falling back to the default shape when the caller gave none.
    pub fn resolve(&self, id: Option<&str>) -> Result<&Shape> {
        self.get(id.unwrap_or(&self.default_id))
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    /// Shape ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

static BUILTIN: Lazy<Arc<ShapeRegistry>> = Lazy::new(|| {
    let registry = ShapeRegistry::builtin().unwrap_or_else(|e| {
        error!("Built-in shapes failed to load, registry is empty: {}", e);
        ShapeRegistry::new(DEFAULT_SHAPE)
    });
    Arc::new(registry)
});

/// Process-wide registry of the built-in shapes.
pub fn builtin() -> Arc<ShapeRegistry> {
    Arc::clone(&BUILTIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_cell_counts() {
        let registry = ShapeRegistry::builtin().unwrap();
        let expected = [
            ("wiegleb", 45),
            ("english", 33),
            ("european", 37),
            ("asymmetrical", 39),
            ("diamond", 41),
        ];
        for (id, count) in expected {
            assert_eq!(registry.get(id).unwrap().cells().len(), count, "{}", id);
        }
        assert_eq!(registry.ids().collect::<Vec<_>>(), SHAPE_ORDER.to_vec());
    }

    #[test]
    fn test_centers_are_valid_cells() {
        let registry = builtin();
        for id in registry.ids() {
            let shape = registry.get(id).unwrap();
            assert!(shape.contains(shape.center()), "{} center", id);
        }
    }

    #[test]
    fn test_unknown_shape() {
        let registry = builtin();
        match registry.get("hexagon") {
            Err(PegError::UnknownShape(id)) => assert_eq!(id, "hexagon"),
            other => panic!("Unexpected result: {:?}", other.map(|s| s.id().to_string())),
        }
    }

    #[test]
    fn test_resolve_default() {
        let registry = builtin();
        assert_eq!(registry.resolve(None).unwrap().id(), DEFAULT_SHAPE);
        assert_eq!(registry.resolve(Some("english")).unwrap().id(), "english");
    }

    #[test]
    fn test_cells_sorted_row_major() {
        let shape =
            Shape::from_cells("line", "Line", 1, 3, (0, 1), vec![(0, 2), (0, 0), (0, 1), (0, 0)])
                .unwrap();
        assert_eq!(shape.cells(), &[(0, 0), (0, 1), (0, 2)]);
    }

    #[test]
    fn test_rejects_out_of_grid_cell() {
        let result = Shape::from_cells("bad", "Bad", 2, 2, (0, 0), vec![(0, 0), (2, 0)]);
        assert!(matches!(result, Err(PegError::InvalidCell { row: 2, col: 0, .. })));
    }

    #[test]
    fn test_rejects_oversized_shape() {
        let result = Shape::from_fn("big", "Big", 9, 9, (4, 4), |_, _| true);
        assert!(matches!(result, Err(PegError::ShapeTooLarge { cells: 81, .. })));
    }

    #[test]
    fn test_solver_data_is_memoized() {
        let registry = builtin();
        let shape = registry.get("english").unwrap();
        let first = shape.solver_data() as *const SolverData;
        let second = shape.solver_data() as *const SolverData;
        assert_eq!(first, second);
    }
}
