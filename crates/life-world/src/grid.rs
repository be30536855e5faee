//! Bounded 2D grid of cells.

use life_core::{CellState, Error, OrganismId, Position, Result};
use serde::{Deserialize, Serialize};

/// A single addressable grid cell. Cells never move; only state and owner change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub col: i32,
    pub row: i32,
    pub state: CellState,
    pub owner: Option<OrganismId>,
}

impl Cell {
    fn empty(col: i32, row: i32) -> Self {
        Self {
            col,
            row,
            state: CellState::Empty,
            owner: None,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.col, self.row)
    }
}

/// Wall coordinate as stored in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WallCoord {
    pub c: i32,
    pub r: i32,
}

/// Portable form of the grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSnapshot {
    pub cols: i32,
    pub rows: i32,
    pub cell_size: u32,
    pub cells: Vec<CellState>,
    pub walls: Vec<WallCoord>,
}

impl GridSnapshot {
    /// Check the snapshot's shape without touching any grid
    pub fn validate(&self) -> Result<()> {
        if self.cols <= 0 || self.rows <= 0 {
            return Err(Error::Validation(format!(
                "grid dimensions must be positive, got {}x{}",
                self.cols, self.rows
            )));
        }
        let expected = self.cols as usize * self.rows as usize;
        if self.cells.len() != expected {
            return Err(Error::Validation(format!(
                "grid has {} cells, expected {}",
                self.cells.len(),
                expected
            )));
        }
        if let Some(wall) = self
            .walls
            .iter()
            .find(|w| w.c < 0 || w.r < 0 || w.c >= self.cols || w.r >= self.rows)
        {
            return Err(Error::OutOfRange {
                col: wall.c,
                row: wall.r,
                cols: self.cols,
                rows: self.rows,
            });
        }
        Ok(())
    }
}

/// Dense, non-wrapping grid. `cells[row * cols + col]` is the cell at `(col, row)`.
#[derive(Debug, Clone)]
pub struct GridMap {
    pub cols: i32,
    pub rows: i32,
    pub cell_size: u32,
    cells: Vec<Cell>,
    walls: Vec<Position>,
}

impl GridMap {
    pub fn new(cols: i32, rows: i32, cell_size: u32) -> Self {
        Self {
            cols,
            rows,
            cell_size,
            cells: Self::allocate(cols, rows),
            walls: Vec::new(),
        }
    }

    fn allocate(cols: i32, rows: i32) -> Vec<Cell> {
        let cols = cols.max(0);
        let rows = rows.max(0);
        let mut cells = Vec::with_capacity(cols as usize * rows as usize);
        for row in 0..rows {
            for col in 0..cols {
                cells.push(Cell::empty(col, row));
            }
        }
        cells
    }

    pub fn is_valid_loc(&self, col: i32, row: i32) -> bool {
        col >= 0 && row >= 0 && col < self.cols && row < self.rows
    }

    fn index_of(&self, col: i32, row: i32) -> Result<usize> {
        if !self.is_valid_loc(col, row) {
            return Err(Error::OutOfRange {
                col,
                row,
                cols: self.cols,
                rows: self.rows,
            });
        }
        Ok((row * self.cols + col) as usize)
    }

    pub fn cell_at(&self, col: i32, row: i32) -> Result<&Cell> {
        let index = self.index_of(col, row)?;
        Ok(&self.cells[index])
    }

    pub fn cell_at_mut(&mut self, col: i32, row: i32) -> Result<&mut Cell> {
        let index = self.index_of(col, row)?;
        Ok(&mut self.cells[index])
    }

    /// Change a cell's state and owner. Walls are remembered for `clear_walls`.
    pub fn set_cell(
        &mut self,
        col: i32,
        row: i32,
        state: CellState,
        owner: Option<OrganismId>,
    ) -> Result<()> {
        let cell = self.cell_at_mut(col, row)?;
        cell.state = state;
        cell.owner = owner;
        let pos = Position::new(col, row);
        // Overwritten walls stay listed until `clear_walls`, so check the list
        if state == CellState::Wall && !self.walls.contains(&pos) {
            self.walls.push(pos);
        }
        Ok(())
    }

    pub fn center(&self) -> Position {
        Position::new(self.cols / 2, self.rows / 2)
    }

    /// Reset every cell to `state`, optionally leaving walls in place
    pub fn fill_grid(&mut self, state: CellState, preserve_walls: bool) {
        for cell in &mut self.cells {
            if preserve_walls && cell.state == CellState::Wall {
                continue;
            }
            cell.state = state;
            cell.owner = None;
        }
        if !preserve_walls {
            self.walls.clear();
        }
        if state == CellState::Wall {
            self.walls = self.cells.iter().map(Cell::position).collect();
        }
    }

    /// Turn every recorded wall that is still a wall back into empty space.
    /// Returns the cleared positions.
    pub fn clear_walls(&mut self) -> Vec<Position> {
        let walls = std::mem::take(&mut self.walls);
        let mut cleared = Vec::new();
        for pos in walls {
            if let Ok(cell) = self.cell_at_mut(pos.col, pos.row) {
                if cell.state == CellState::Wall {
                    cell.state = CellState::Empty;
                    cell.owner = None;
                    cleared.push(pos);
                }
            }
        }
        cleared
    }

    /// Reallocate the grid. All cell state is discarded.
    pub fn resize(&mut self, cols: i32, rows: i32, cell_size: u32) {
        self.cols = cols;
        self.rows = rows;
        self.cell_size = cell_size;
        self.cells = Self::allocate(cols, rows);
        self.walls.clear();
    }

    /// Positions currently in the wall state
    pub fn wall_positions(&self) -> Vec<Position> {
        self.cells
            .iter()
            .filter(|cell| cell.state == CellState::Wall)
            .map(Cell::position)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cell> + '_ {
        self.cells.iter()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn count_state(&self, state: CellState) -> usize {
        self.cells.iter().filter(|cell| cell.state == state).count()
    }

    pub fn serialize(&self) -> GridSnapshot {
        GridSnapshot {
            cols: self.cols,
            rows: self.rows,
            cell_size: self.cell_size,
            cells: self.cells.iter().map(|cell| cell.state).collect(),
            walls: self
                .wall_positions()
                .into_iter()
                .map(|pos| WallCoord {
                    c: pos.col,
                    r: pos.row,
                })
                .collect(),
        }
    }

    /// Replace the grid with a snapshot. The snapshot is validated first, so a
    /// rejected snapshot leaves the grid untouched.
    pub fn load_raw(&mut self, data: &GridSnapshot) -> Result<()> {
        data.validate()?;
        self.resize(data.cols, data.rows, data.cell_size);
        for (cell, state) in self.cells.iter_mut().zip(&data.cells) {
            cell.state = *state;
        }
        self.walls = data
            .walls
            .iter()
            .map(|wall| Position::new(wall.c, wall.r))
            .collect();
        Ok(())
    }
}
