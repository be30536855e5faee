//! Reaction to world events.
//!
//! The world only reports extinction; what happens next is decided here from
//! the `auto_pause` / `auto_reset` policy in `WorldConfig`. Pausing wins when
//! both are set.

use crate::organism::Organism;
use crate::simulation::{World, WorldEvent};
use life_core::Result;
use tracing::info;

/// What the controller did in response to the drained events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    None,
    Pause,
    Reset,
}

#[derive(Debug, Default)]
pub struct EnvironmentController {
    paused: bool,
}

impl EnvironmentController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Drain the world's events and apply the extinction policy.
    /// Several extinctions in one drain trigger a single action.
    pub fn handle_events<O: Organism>(&mut self, world: &mut World<O>) -> Result<ControlAction> {
        let events = world.drain_events();
        let Some(WorldEvent::Extinction { tick }) = events.last().cloned() else {
            return Ok(ControlAction::None);
        };

        if world.config().auto_pause {
            self.paused = true;
            info!(tick, "Population extinct, pausing");
            return Ok(ControlAction::Pause);
        }
        if world.config().auto_reset {
            world.auto_reset()?;
            info!(tick, reset_count = world.reset_count(), "Population extinct, resetting");
            return Ok(ControlAction::Reset);
        }
        info!(tick, "Population extinct");
        Ok(ControlAction::None)
    }
}
