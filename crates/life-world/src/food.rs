//! Random food drops.

use crate::grid::GridMap;
use crate::render::RenderQueue;
use life_core::{CellState, Position};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Grid area that yields one extra drop attempt per unit of probability
pub const FOOD_AREA_DIVISOR: f64 = 50_000.0;

/// Number of drop attempts per tick; never zero
pub fn candidate_count(cols: i32, rows: i32, prob: f64) -> usize {
    let area = cols.max(0) as f64 * rows.max(0) as f64;
    ((area * prob / FOOD_AREA_DIVISOR).floor() as usize).max(1)
}

/// Attempt food drops on random cells. Occupied picks are skipped, not retried.
/// Returns the number of cells turned into food.
pub fn generate_food(
    grid: &mut GridMap,
    render: &mut RenderQueue,
    rng: &mut ChaCha8Rng,
    prob: f64,
) -> usize {
    if prob <= 0.0 || grid.is_empty() {
        return 0;
    }
    let mut placed = 0;
    for _ in 0..candidate_count(grid.cols, grid.rows, prob) {
        if rng.gen::<f64>() > prob {
            continue;
        }
        let col = rng.gen_range(0..grid.cols);
        let row = rng.gen_range(0..grid.rows);
        let is_empty = grid
            .cell_at(col, row)
            .map_or(false, |cell| cell.state == CellState::Empty);
        if is_empty && grid.set_cell(col, row, CellState::Food, None).is_ok() {
            render.add_to_render(Position::new(col, row));
            placed += 1;
        }
    }
    placed
}
