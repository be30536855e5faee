//! Hand-off of changed cells to an external renderer.
//!
//! The world is the only producer and the renderer drains between ticks, so a
//! plain owned set is enough.

use life_core::Position;
use std::collections::HashSet;

/// What the renderer has to redraw since the last drain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderBatch {
    /// Nothing changed
    Idle,
    /// The whole grid must be redrawn (resize, reset, load)
    Full,
    /// Only these cells changed
    Cells(Vec<Position>),
}

#[derive(Debug, Default)]
pub struct RenderQueue {
    dirty: HashSet<Position>,
    full_redraw: bool,
}

impl RenderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_to_render(&mut self, pos: Position) {
        if !self.full_redraw {
            self.dirty.insert(pos);
        }
    }

    /// Request a full redraw; pending per-cell changes are subsumed by it
    pub fn render_full_grid(&mut self) {
        self.full_redraw = true;
        self.dirty.clear();
    }

    pub fn pending(&self) -> usize {
        self.dirty.len()
    }

    pub fn needs_full_redraw(&self) -> bool {
        self.full_redraw
    }

    pub fn drain(&mut self) -> RenderBatch {
        if std::mem::take(&mut self.full_redraw) {
            self.dirty.clear();
            return RenderBatch::Full;
        }
        if self.dirty.is_empty() {
            return RenderBatch::Idle;
        }
        RenderBatch::Cells(self.dirty.drain().collect())
    }
}
