//! World simulation engine.
//!
//! This crate implements the 2D grid world where multicellular organisms live,
//! feed, reproduce and die, together with the bookkeeping that keeps the
//! population aggregates, the spatial index and the lineage record consistent,
//! and the snapshot format that makes a world durable.

pub mod grid;
pub mod spatial;
pub mod anatomy;
pub mod organism;
pub mod registry;
pub mod lineage;
pub mod render;
pub mod food;
pub mod simulation;
pub mod serializer;
pub mod controller;

pub use grid::{Cell, GridMap, GridSnapshot};
pub use spatial::{BucketKey, SpatialIndex};
pub use anatomy::{Anatomy, AnatomyCell};
pub use organism::{BasicOrganism, Birth, Organism, TickContext};
pub use registry::{OrganismRegistry, RemovalOutcome};
pub use lineage::{FossilRecord, FossilSnapshot, Species, WorldStats};
pub use render::{RenderBatch, RenderQueue};
pub use simulation::{ClockState, Confirmation, World, WorldEvent};
pub use serializer::{LoadOptions, OrganismRecord, WorldSnapshot};
pub use controller::{ControlAction, EnvironmentController};
