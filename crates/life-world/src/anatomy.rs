//! Organism body templates.

use life_core::{CellState, Position};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One body cell, positioned relative to the organism's anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnatomyCell {
    pub state: CellState,
    pub loc_col: i32,
    pub loc_row: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anatomy {
    pub cells: Vec<AnatomyCell>,
}

impl Anatomy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cell, replacing whatever occupied the same offset
    pub fn add_default_cell(&mut self, state: CellState, loc_col: i32, loc_row: i32) {
        self.remove_cell(loc_col, loc_row);
        self.cells.push(AnatomyCell {
            state,
            loc_col,
            loc_row,
        });
    }

    pub fn remove_cell(&mut self, loc_col: i32, loc_row: i32) -> bool {
        let before = self.cells.len();
        self.cells
            .retain(|cell| !(cell.loc_col == loc_col && cell.loc_row == loc_row));
        self.cells.len() != before
    }

    pub fn cell_at(&self, loc_col: i32, loc_row: i32) -> Option<&AnatomyCell> {
        self.cells
            .iter()
            .find(|cell| cell.loc_col == loc_col && cell.loc_row == loc_row)
    }

    pub fn has_cell_at(&self, loc_col: i32, loc_row: i32) -> bool {
        self.cell_at(loc_col, loc_row).is_some()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn has_state(&self, state: CellState) -> bool {
        self.cells.iter().any(|cell| cell.state == state)
    }

    /// Number of body cells per state
    pub fn state_counts(&self) -> BTreeMap<CellState, usize> {
        let mut counts = BTreeMap::new();
        for cell in &self.cells {
            *counts.entry(cell.state).or_insert(0) += 1;
        }
        counts
    }

    /// Largest distance of any body cell from the anchor along either axis
    pub fn extent(&self) -> i32 {
        self.cells
            .iter()
            .map(|cell| cell.loc_col.abs().max(cell.loc_row.abs()))
            .max()
            .unwrap_or(0)
    }

    /// Absolute grid positions of the body when anchored at `anchor`
    pub fn placed_at(&self, anchor: Position) -> impl Iterator<Item = (Position, CellState)> + '_ {
        self.cells
            .iter()
            .map(move |cell| (anchor.add(cell.loc_col, cell.loc_row), cell.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn starter() -> Anatomy {
        let mut anatomy = Anatomy::new();
        anatomy.add_default_cell(CellState::Mouth, 0, 0);
        anatomy.add_default_cell(CellState::Producer, 1, 1);
        anatomy.add_default_cell(CellState::Producer, -1, -1);
        anatomy
    }

    #[test]
    fn test_add_replaces_same_offset() {
        let mut anatomy = starter();
        anatomy.add_default_cell(CellState::Eye, 1, 1);
        assert_eq!(anatomy.len(), 3);
        assert_eq!(anatomy.cell_at(1, 1).unwrap().state, CellState::Eye);
    }

    #[test]
    fn test_state_counts_and_extent() {
        let anatomy = starter();
        let counts = anatomy.state_counts();
        assert_eq!(counts.get(&CellState::Producer), Some(&2));
        assert_eq!(counts.get(&CellState::Mouth), Some(&1));
        assert_eq!(anatomy.extent(), 1);
    }

    #[test]
    fn test_placed_at() {
        let anatomy = starter();
        let placed: Vec<_> = anatomy.placed_at(Position::new(10, 10)).collect();
        assert!(placed.contains(&(Position::new(9, 9), CellState::Producer)));
        assert!(placed.contains(&(Position::new(10, 10), CellState::Mouth)));
    }

    #[test]
    fn test_remove_cell() {
        let mut anatomy = starter();
        assert!(anatomy.remove_cell(0, 0));
        assert!(!anatomy.remove_cell(0, 0));
        assert!(!anatomy.has_state(CellState::Mouth));
    }
}
