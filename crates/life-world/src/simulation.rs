//! The world and its tick loop.

use crate::food;
use crate::grid::GridMap;
use crate::lineage::{FossilRecord, WorldStats};
use crate::organism::{BasicOrganism, Birth, Organism, TickContext};
use crate::registry::OrganismRegistry;
use crate::render::{RenderBatch, RenderQueue};
use life_core::{
    CellState, Error, Hyperparams, OrganismId, Position, Result, WorldConfig,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;
use tracing::{debug, info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Running,
    /// Only observable while `reset` is replacing the world state
    ResetPending,
}

/// Answer to "the current environment will be lost, proceed?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    NotRequired,
    Granted,
    Denied,
}

/// Notifications for whoever controls the world
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldEvent {
    /// The last organism was removed from a non-empty population
    Extinction { tick: u64 },
}

pub struct World<O = BasicOrganism> {
    pub(crate) grid: GridMap,
    pub(crate) registry: OrganismRegistry<O>,
    pub(crate) fossil: FossilRecord,
    pub(crate) render: RenderQueue,
    pub(crate) params: Hyperparams,
    pub(crate) config: WorldConfig,
    rng: ChaCha8Rng,
    pub(crate) pending_births: Vec<Birth<O>>,
    pub(crate) events: VecDeque<WorldEvent>,
    state: ClockState,
    pub(crate) total_ticks: u64,
    pub(crate) reset_count: u64,
}

impl<O: Organism> World<O> {
    pub fn new(config: WorldConfig, params: Hyperparams) -> Result<Self> {
        if config.cols <= 0 || config.rows <= 0 {
            return Err(Error::Validation(format!(
                "grid dimensions must be positive, got {}x{}",
                config.cols, config.rows
            )));
        }
        params.validate()?;

        let grid = GridMap::new(config.cols, config.rows, config.cell_size);
        let registry = OrganismRegistry::new(config.bucket_size)?;
        let rng = ChaCha8Rng::seed_from_u64(config.seed);

        Ok(Self {
            grid,
            registry,
            fossil: FossilRecord::new(),
            render: RenderQueue::new(),
            params,
            config,
            rng,
            pending_births: Vec::new(),
            events: VecDeque::new(),
            state: ClockState::Running,
            total_ticks: 0,
            reset_count: 0,
        })
    }

    pub fn grid(&self) -> &GridMap {
        &self.grid
    }

    pub fn registry(&self) -> &OrganismRegistry<O> {
        &self.registry
    }

    pub fn fossil(&self) -> &FossilRecord {
        &self.fossil
    }

    pub fn params(&self) -> &Hyperparams {
        &self.params
    }

    pub fn set_params(&mut self, params: Hyperparams) -> Result<()> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    pub fn reset_count(&self) -> u64 {
        self.reset_count
    }

    pub fn population(&self) -> usize {
        self.registry.len()
    }

    pub fn total_mutability(&self) -> f64 {
        self.registry.total_mutability()
    }

    pub fn largest_cell_count(&self) -> usize {
        self.registry.largest_cell_count()
    }

    pub fn average_mutability(&self) -> f64 {
        self.registry.average_mutability(&self.params)
    }

    pub fn can_add_organism(&self) -> bool {
        self.registry.can_add(self.params.max_organisms)
    }

    pub fn nearby_organisms(&self, col: i32, row: i32) -> Vec<&O> {
        self.registry.nearby(col, row)
    }

    pub fn stats(&self) -> WorldStats {
        WorldStats {
            tick: self.total_ticks,
            population: self.registry.len(),
            average_mutability: self.average_mutability(),
            largest_cell_count: self.registry.largest_cell_count(),
        }
    }

    /// Advance every organism once, then run the world-level processes
    pub fn tick(&mut self) -> Result<()> {
        let mut dead = Vec::new();
        {
            let World {
                grid,
                registry,
                render,
                rng,
                params,
                pending_births,
                total_ticks,
                ..
            } = self;
            let mut ctx = TickContext::new(grid, render, rng, &*params, *total_ticks, pending_births);

            // Back to front; removal is deferred until the pass is over
            for i in (0..registry.len()).rev() {
                let Some(organism) = registry.get_at_mut(i) else {
                    continue;
                };
                if !organism.is_living() || !organism.update(&mut ctx) {
                    dead.push(i);
                }
            }
        }

        self.remove_organisms(&dead)?;
        self.apply_births()?;
        self.registry.reindex_moved();

        if self.params.food_drop_prob > 0.0 {
            let placed = food::generate_food(
                &mut self.grid,
                &mut self.render,
                &mut self.rng,
                self.params.food_drop_prob,
            );
            trace!(placed, "Food dropped");
        }

        self.total_ticks += 1;
        let rate = self.config.data_update_rate;
        if rate > 0 && self.total_ticks % rate == 0 {
            let stats = self.stats();
            self.fossil.update_data(stats);
            debug!(
                tick = stats.tick,
                population = stats.population,
                average_mutability = stats.average_mutability,
                "Lineage data updated"
            );
        }
        Ok(())
    }

    /// Evict organisms by index and settle the lineage bookkeeping.
    /// Emptying a non-empty population queues an extinction event.
    pub fn remove_organisms(&mut self, indices: &[usize]) -> Result<usize> {
        let outcome = self.registry.remove_batch(indices)?;
        for organism in &outcome.removed {
            self.release_cells(organism);
            if let Some(species) = organism.species() {
                self.fossil.record_death(species, self.total_ticks);
            }
        }
        if outcome.extinct {
            info!(tick = self.total_ticks, "Population extinct");
            self.events.push_back(WorldEvent::Extinction {
                tick: self.total_ticks,
            });
        }
        Ok(outcome.removed.len())
    }

    /// Empty the cells a removed organism still owns, e.g. one whose living
    /// flag was lowered from outside without dying on the grid
    fn release_cells(&mut self, organism: &O) {
        let id = organism.id();
        for (pos, _) in organism.footprint() {
            let owned = self
                .grid
                .cell_at(pos.col, pos.row)
                .map_or(false, |cell| cell.owner == Some(id));
            if owned && self.grid.set_cell(pos.col, pos.row, CellState::Empty, None).is_ok() {
                self.render.add_to_render(pos);
            }
        }
    }

    fn footprint_is_free(&self, organism: &O) -> bool {
        organism.footprint().iter().all(|(pos, _)| {
            self.grid
                .cell_at(pos.col, pos.row)
                .map_or(false, |cell| cell.state.is_free())
        })
    }

    fn apply_births(&mut self) -> Result<()> {
        let births = std::mem::take(&mut self.pending_births);
        for birth in births {
            if !self.can_add_organism() {
                trace!("Birth dropped: population cap reached");
                continue;
            }
            // Staged births may overlap each other or cells changed later in the tick
            if !self.footprint_is_free(&birth.organism) {
                trace!("Birth dropped: footprint occupied");
                continue;
            }
            let mut organism = birth.organism;
            match organism.species() {
                Some(species) if !birth.new_species => self.fossil.record_birth(species),
                _ => {
                    let species =
                        self.fossil
                            .add_species(&organism, birth.parent_species, self.total_ticks);
                    organism.set_species(species);
                }
            }
            self.add_organism(organism)?;
        }
        Ok(())
    }

    /// Stamp the organism onto the grid and register it
    pub fn add_organism(&mut self, organism: O) -> Result<()> {
        let id = organism.id();
        let footprint = organism.footprint();
        self.registry.add(organism, self.params.max_organisms)?;
        self.stamp_footprint(id, &footprint);
        Ok(())
    }

    pub(crate) fn stamp_footprint(&mut self, id: OrganismId, footprint: &[(Position, CellState)]) {
        for (pos, state) in footprint {
            if self.grid.set_cell(pos.col, pos.row, *state, Some(id)).is_ok() {
                self.render.add_to_render(*pos);
            }
        }
    }

    /// Plant the starting organism at the grid centre as a new root species
    pub fn origin_of_life(&mut self) -> Result<OrganismId> {
        if !self.can_add_organism() {
            return Err(Error::ResourceExhausted(
                "no room for origin of life".to_string(),
            ));
        }
        self.plant_origin()
    }

    /// Reseeding ignores `max_organisms`, so a reset never ends half done
    fn plant_origin(&mut self) -> Result<OrganismId> {
        let center = self.grid.center();
        let mut organism = O::origin(center);
        let species = self.fossil.add_species(&organism, None, self.total_ticks);
        organism.set_species(species);
        let id = organism.id();
        let footprint = organism.footprint();
        self.registry.insert(organism)?;
        self.stamp_footprint(id, &footprint);
        info!(organism_id = %id, col = center.col, row = center.row, "Origin of life");
        Ok(id)
    }

    /// Replace the world with an empty one. A denied confirmation changes nothing.
    pub fn reset(&mut self, confirmation: Confirmation, reset_life: bool) -> Result<()> {
        if confirmation == Confirmation::Denied {
            info!("Reset refused");
            return Err(Error::Refused(
                "the current environment would be lost".to_string(),
            ));
        }
        self.state = ClockState::ResetPending;

        self.registry.clear();
        self.pending_births.clear();
        self.events.clear();
        self.grid
            .fill_grid(CellState::Empty, !self.config.clear_walls_on_reset);
        self.render.render_full_grid();
        self.total_ticks = 0;
        self.fossil.clear_record();

        let result = if reset_life {
            self.plant_origin().map(|_| ())
        } else {
            Ok(())
        };
        self.state = ClockState::Running;
        info!(reset_count = self.reset_count, reset_life, "World reset");
        result
    }

    /// Reset triggered by extinction; counted in `reset_count`
    pub fn auto_reset(&mut self) -> Result<()> {
        self.reset_count += 1;
        self.reset(Confirmation::NotRequired, true)
    }

    /// Reallocate the grid and start over on it
    pub fn resize_grid(
        &mut self,
        cols: i32,
        rows: i32,
        cell_size: u32,
        reset_life: bool,
    ) -> Result<()> {
        if cols <= 0 || rows <= 0 {
            return Err(Error::Validation(format!(
                "grid dimensions must be positive, got {}x{}",
                cols, rows
            )));
        }
        self.grid.resize(cols, rows, cell_size);
        self.config.cols = cols;
        self.config.rows = rows;
        self.config.cell_size = cell_size;
        info!(cols, rows, cell_size, "Grid resized");
        self.reset(Confirmation::NotRequired, reset_life)
    }

    /// Editor entry point for painting cells
    pub fn change_cell(
        &mut self,
        col: i32,
        row: i32,
        state: CellState,
        owner: Option<OrganismId>,
    ) -> Result<()> {
        self.grid.set_cell(col, row, state, owner)?;
        self.render.add_to_render(Position::new(col, row));
        Ok(())
    }

    pub fn clear_walls(&mut self) {
        for pos in self.grid.clear_walls() {
            self.render.add_to_render(pos);
        }
    }

    /// Remove every organism whose living flag is down
    pub fn clear_dead_organisms(&mut self) -> Result<usize> {
        let dead = self.registry.dead_indices();
        self.remove_organisms(&dead)
    }

    /// Cells changed since the last call; always idle when headless
    pub fn drain_render(&mut self) -> RenderBatch {
        let batch = self.render.drain();
        if self.config.headless {
            return RenderBatch::Idle;
        }
        batch
    }

    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        self.events.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anatomy::Anatomy;

    fn config() -> WorldConfig {
        WorldConfig {
            cols: 60,
            rows: 40,
            seed: 42,
            headless: false,
            ..Default::default()
        }
    }

    fn quiet_params() -> Hyperparams {
        Hyperparams {
            food_prod_prob: 0.0,
            ..Default::default()
        }
    }

    fn world() -> World {
        World::new(config(), quiet_params()).unwrap()
    }

    fn single_cell(col: i32, row: i32) -> BasicOrganism {
        let mut anatomy = Anatomy::new();
        anatomy.add_default_cell(CellState::Mouth, 0, 0);
        BasicOrganism::new(Position::new(col, row), anatomy)
    }

    /// Every owned cell points at a registered organism
    fn assert_owners_registered(world: &World) {
        for cell in world.grid().iter() {
            if let Some(owner) = cell.owner {
                assert!(world.registry().get(owner).is_some(), "stale owner at ({}, {})", cell.col, cell.row);
            }
        }
    }

    #[test]
    fn test_world_creation_validates() {
        let bad = WorldConfig {
            cols: 0,
            ..config()
        };
        assert!(World::<BasicOrganism>::new(bad, Hyperparams::default()).is_err());

        let bad_bucket = WorldConfig {
            bucket_size: 0,
            ..config()
        };
        assert!(World::<BasicOrganism>::new(bad_bucket, Hyperparams::default()).is_err());
    }

    #[test]
    fn test_origin_of_life() {
        let mut world = world();
        let id = world.origin_of_life().unwrap();

        assert_eq!(world.population(), 1);
        assert_eq!(world.fossil().extant_count(), 1);
        let owned = world.grid().iter().filter(|c| c.owner == Some(id)).count();
        assert_eq!(owned, 3);
        assert_eq!(world.grid().cell_at(30, 20).unwrap().state, CellState::Mouth);
        assert!(world.registry().get(id).unwrap().species.is_some());
    }

    #[test]
    fn test_tick_counts_and_data_updates() {
        let mut world = World::<BasicOrganism>::new(
            WorldConfig {
                data_update_rate: 5,
                ..config()
            },
            quiet_params(),
        )
        .unwrap();
        world.origin_of_life().unwrap();
        for _ in 0..10 {
            world.tick().unwrap();
        }
        assert_eq!(world.total_ticks(), 10);
        let ticks: Vec<_> = world.fossil().history().iter().map(|p| p.tick).collect();
        assert_eq!(ticks, vec![5, 10]);
    }

    #[test]
    fn test_dead_organisms_removed_with_single_extinction_event() {
        let mut world = world();
        world.add_organism(single_cell(5, 5)).unwrap();
        world.add_organism(single_cell(50, 30)).unwrap();
        world.registry.get_at_mut(0).unwrap().living = false;

        world.tick().unwrap();
        assert_eq!(world.population(), 1);
        assert!(world.drain_events().is_empty());

        world.registry.get_at_mut(0).unwrap().living = false;
        world.tick().unwrap();
        assert_eq!(world.population(), 0);
        assert_eq!(world.total_mutability(), 0.0);
        assert_eq!(world.drain_events(), vec![WorldEvent::Extinction { tick: 1 }]);
        // Removed without dying on the grid; their cells are released
        assert_eq!(world.grid().count_state(CellState::Mouth), 0);
        assert_owners_registered(&world);

        world.tick().unwrap();
        assert!(world.drain_events().is_empty());
    }

    #[test]
    fn test_no_food_without_probability() {
        let mut world = world();
        for _ in 0..50 {
            world.tick().unwrap();
        }
        assert_eq!(world.grid().count_state(CellState::Food), 0);
    }

    #[test]
    fn test_food_drop_single_attempt_on_exact_area() {
        let mut world = World::<BasicOrganism>::new(
            WorldConfig {
                cols: 250,
                rows: 200,
                ..config()
            },
            Hyperparams {
                food_drop_prob: 1.0,
                ..quiet_params()
            },
        )
        .unwrap();
        world.tick().unwrap();
        assert_eq!(world.grid().count_state(CellState::Food), 1);
    }

    #[test]
    fn test_reset_denied_changes_nothing() {
        let mut world = world();
        world.origin_of_life().unwrap();
        world.tick().unwrap();
        world.change_cell(0, 0, CellState::Wall, None).unwrap();

        let result = world.reset(Confirmation::Denied, true);
        assert!(matches!(result, Err(Error::Refused(_))));
        assert_eq!(world.population(), 1);
        assert_eq!(world.total_ticks(), 1);
        assert_eq!(world.state(), ClockState::Running);
        assert_eq!(world.grid().cell_at(0, 0).unwrap().state, CellState::Wall);
    }

    #[test]
    fn test_reset_clears_and_reseeds() {
        let mut world = world();
        world.add_organism(single_cell(3, 3)).unwrap();
        world.change_cell(0, 0, CellState::Wall, None).unwrap();
        world.change_cell(1, 0, CellState::Food, None).unwrap();
        world.tick().unwrap();

        world.reset(Confirmation::Granted, true).unwrap();
        assert_eq!(world.state(), ClockState::Running);
        assert_eq!(world.total_ticks(), 0);
        assert_eq!(world.population(), 1);
        assert_eq!(world.fossil().extant_count(), 1);
        assert_eq!(world.grid().cell_at(0, 0).unwrap().state, CellState::Wall);
        assert_eq!(world.grid().cell_at(1, 0).unwrap().state, CellState::Empty);
        assert_eq!(world.drain_render(), RenderBatch::Full);
        assert_owners_registered(&world);

        world.reset(Confirmation::NotRequired, false).unwrap();
        assert_eq!(world.population(), 0);
        assert_eq!(world.total_mutability(), 0.0);
        assert_eq!(world.fossil().extant_count(), 0);
    }

    #[test]
    fn test_reset_can_clear_walls() {
        let mut world = World::<BasicOrganism>::new(
            WorldConfig {
                clear_walls_on_reset: true,
                ..config()
            },
            quiet_params(),
        )
        .unwrap();
        world.change_cell(4, 4, CellState::Wall, None).unwrap();
        world.reset(Confirmation::Granted, false).unwrap();
        assert_eq!(world.grid().cell_at(4, 4).unwrap().state, CellState::Empty);
    }

    #[test]
    fn test_auto_reset_counts() {
        let mut world = world();
        world.auto_reset().unwrap();
        world.auto_reset().unwrap();
        assert_eq!(world.reset_count(), 2);
        assert_eq!(world.population(), 1);
    }

    #[test]
    fn test_reset_drops_pending_events() {
        let mut world = world();
        world.add_organism(single_cell(5, 5)).unwrap();
        world.registry.get_at_mut(0).unwrap().living = false;
        world.tick().unwrap();

        world.reset(Confirmation::Granted, true).unwrap();
        assert!(world.drain_events().is_empty());
    }

    #[test]
    fn test_reset_reseeds_at_zero_capacity() {
        let mut world = World::<BasicOrganism>::new(
            config(),
            Hyperparams {
                max_organisms: 0,
                ..quiet_params()
            },
        )
        .unwrap();
        assert!(matches!(
            world.origin_of_life(),
            Err(Error::ResourceExhausted(_))
        ));

        world.reset(Confirmation::Granted, true).unwrap();
        assert_eq!(world.state(), ClockState::Running);
        assert_eq!(world.population(), 1);
        assert_eq!(world.fossil().extant_count(), 1);
        assert_owners_registered(&world);

        world.auto_reset().unwrap();
        assert_eq!(world.reset_count(), 1);
        assert_eq!(world.population(), 1);
    }

    #[test]
    fn test_births_respect_capacity() {
        let mut world = World::<BasicOrganism>::new(
            config(),
            Hyperparams {
                max_organisms: 1,
                ..quiet_params()
            },
        )
        .unwrap();
        world.origin_of_life().unwrap();
        world.registry.get_at_mut(0).unwrap().food_collected = 3;

        world.tick().unwrap();
        assert_eq!(world.population(), 1);
        assert!(matches!(
            world.origin_of_life(),
            Err(Error::ResourceExhausted(_))
        ));
    }

    #[test]
    fn test_births_are_registered() {
        let mut world = World::<BasicOrganism>::new(
            config(),
            Hyperparams {
                use_global_mutability: true,
                global_mutability: 0.0,
                ..quiet_params()
            },
        )
        .unwrap();
        world.origin_of_life().unwrap();
        world.registry.get_at_mut(0).unwrap().food_collected = 3;

        world.tick().unwrap();
        assert_eq!(world.population(), 2);
        // Unmutated offspring joins the parent species
        assert_eq!(world.fossil().extant_count(), 1);
        let species = world.registry().get_at(0).unwrap().species.unwrap();
        assert_eq!(world.fossil().species(species).unwrap().population, 2);
        world.registry().check_invariants().unwrap();
        assert_owners_registered(&world);
    }

    #[test]
    fn test_headless_render_is_discarded() {
        let mut world = World::<BasicOrganism>::new(
            WorldConfig {
                headless: true,
                ..config()
            },
            quiet_params(),
        )
        .unwrap();
        world.change_cell(2, 2, CellState::Food, None).unwrap();
        assert_eq!(world.drain_render(), RenderBatch::Idle);

        let mut drawn = super::tests::world();
        drawn.change_cell(2, 2, CellState::Food, None).unwrap();
        assert_eq!(drawn.drain_render(), RenderBatch::Cells(vec![Position::new(2, 2)]));
    }

    #[test]
    fn test_resize_grid_restarts() {
        let mut world = world();
        world.origin_of_life().unwrap();
        world.resize_grid(30, 30, 4, true).unwrap();
        assert_eq!((world.grid().cols, world.grid().rows), (30, 30));
        assert_eq!(world.population(), 1);
        assert_eq!(world.grid().cell_at(15, 15).unwrap().state, CellState::Mouth);
        assert!(world.resize_grid(0, 30, 4, true).is_err());
    }

    #[test]
    fn test_long_run_keeps_invariants() {
        let mut world = World::<BasicOrganism>::new(
            config(),
            Hyperparams {
                food_drop_prob: 0.5,
                lifespan_multiplier: 20,
                ..Default::default()
            },
        )
        .unwrap();
        world.origin_of_life().unwrap();
        for _ in 0..300 {
            world.tick().unwrap();
            world.registry().check_invariants().unwrap();
            let events = world.drain_events();
            if events.iter().any(|e| matches!(e, WorldEvent::Extinction { .. })) {
                world.auto_reset().unwrap();
            }
        }
        assert_owners_registered(&world);
        for organism in world.registry().iter() {
            let near = world.nearby_organisms(organism.position.col, organism.position.row);
            assert!(near.iter().any(|o| o.id == organism.id));
        }
    }
}
