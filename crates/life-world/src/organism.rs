//! Organism contract and the reference organism.
//!
//! The world never looks inside an organism: it only needs an anchor, a
//! mutability value, a living flag, an anatomy to stamp on the grid, and an
//! `update` that reports whether the organism survived the tick.

use crate::anatomy::Anatomy;
use crate::grid::GridMap;
use crate::render::RenderQueue;
use life_core::{
    CellState, Direction, Hyperparams, OrganismId, Position, Result, SpeciesId,
};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Offspring produced during a tick, applied by the world after the update pass
#[derive(Debug)]
pub struct Birth<O> {
    pub organism: O,
    pub parent_species: Option<SpeciesId>,
    /// The child's anatomy differs from the parent's
    pub new_species: bool,
}

/// What an organism may touch while it updates
pub struct TickContext<'a, O> {
    pub grid: &'a mut GridMap,
    pub render: &'a mut RenderQueue,
    pub rng: &'a mut ChaCha8Rng,
    pub params: &'a Hyperparams,
    pub tick: u64,
    births: &'a mut Vec<Birth<O>>,
}

impl<'a, O> TickContext<'a, O> {
    pub fn new(
        grid: &'a mut GridMap,
        render: &'a mut RenderQueue,
        rng: &'a mut ChaCha8Rng,
        params: &'a Hyperparams,
        tick: u64,
        births: &'a mut Vec<Birth<O>>,
    ) -> Self {
        Self {
            grid,
            render,
            rng,
            params,
            tick,
            births,
        }
    }

    /// Change a cell and queue it for rendering
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

    /// State at `(col, row)`, or `None` off the grid
    pub fn state_at(&self, col: i32, row: i32) -> Option<CellState> {
        self.grid.cell_at(col, row).ok().map(|cell| cell.state)
    }

    pub fn stage_birth(&mut self, birth: Birth<O>) {
        self.births.push(birth);
    }

    pub fn staged_births(&self) -> usize {
        self.births.len()
    }
}

pub trait Organism: Sized {
    fn id(&self) -> OrganismId;

    /// Anchor coordinate
    fn position(&self) -> Position;

    /// Must stay constant while the organism is registered
    fn mutability(&self) -> f64;

    fn is_living(&self) -> bool;

    fn anatomy(&self) -> &Anatomy;

    fn species(&self) -> Option<SpeciesId>;

    fn set_species(&mut self, species: SpeciesId);

    /// Absolute cells the organism occupies
    fn footprint(&self) -> Vec<(Position, CellState)> {
        self.anatomy().placed_at(self.position()).collect()
    }

    /// Advance one tick. Returns false if the organism died.
    fn update(&mut self, ctx: &mut TickContext<'_, Self>) -> bool;

    /// The fixed starting organism planted by origin of life
    fn origin(center: Position) -> Self;

    /// Organism-defined part of its snapshot record
    fn to_payload(&self) -> Result<serde_json::Value>;

    fn from_record(anchor: Position, payload: &serde_json::Value) -> Result<Self>;
}

const DEFAULT_MUTABILITY: f64 = 5.0;

#[derive(Serialize, Deserialize)]
struct Payload {
    anatomy: Anatomy,
    mutability: f64,
    lifetime: u64,
    food_collected: u32,
    living: bool,
}

/// A sessile organism: producers drop food next to it, mouths eat adjacent
/// food, and once it has eaten as many food cells as it has body cells it
/// tries to place a (possibly mutated) copy of itself nearby.
#[derive(Debug, Clone)]
pub struct BasicOrganism {
    pub id: OrganismId,
    pub position: Position,
    pub anatomy: Anatomy,
    pub mutability: f64,
    pub lifetime: u64,
    pub food_collected: u32,
    pub living: bool,
    pub species: Option<SpeciesId>,
}

impl BasicOrganism {
    pub fn new(position: Position, anatomy: Anatomy) -> Self {
        Self {
            id: OrganismId::new(),
            position,
            anatomy,
            mutability: DEFAULT_MUTABILITY,
            lifetime: 0,
            food_collected: 0,
            living: true,
            species: None,
        }
    }

    pub fn with_mutability(mut self, mutability: f64) -> Self {
        self.mutability = mutability;
        self
    }

    pub fn lifespan(&self, params: &Hyperparams) -> u64 {
        params.lifespan_multiplier * self.anatomy.len() as u64
    }

    pub fn food_needed(&self) -> u32 {
        self.anatomy.len() as u32
    }

    fn effective_mutability(&self, params: &Hyperparams) -> f64 {
        if params.use_global_mutability {
            params.global_mutability
        } else {
            self.mutability
        }
    }

    /// Turn the organism's own cells into food
    pub fn die(&mut self, ctx: &mut TickContext<'_, Self>) {
        for (pos, _) in self.footprint() {
            let owned = ctx
                .grid
                .cell_at(pos.col, pos.row)
                .map_or(false, |cell| cell.owner == Some(self.id));
            if owned {
                // In bounds, checked above
                let _ = ctx.change_cell(pos.col, pos.row, CellState::Food, None);
            }
        }
        self.living = false;
    }

    fn produce(&self, ctx: &mut TickContext<'_, Self>, at: Position) {
        if ctx.rng.gen::<f64>() > ctx.params.food_prod_prob {
            return;
        }
        let Some(direction) = Direction::all().choose(ctx.rng).copied() else {
            return;
        };
        let (dc, dr) = direction.to_delta();
        let target = at.add(dc, dr);
        if ctx.state_at(target.col, target.row) == Some(CellState::Empty) {
            let _ = ctx.change_cell(target.col, target.row, CellState::Food, None);
        }
    }

    fn eat(&mut self, ctx: &mut TickContext<'_, Self>, at: Position) {
        for direction in Direction::all() {
            let (dc, dr) = direction.to_delta();
            let target = at.add(dc, dr);
            if ctx.state_at(target.col, target.row) == Some(CellState::Food) {
                let _ = ctx.change_cell(target.col, target.row, CellState::Empty, None);
                self.food_collected += 1;
            }
        }
    }

    fn reproduce(&mut self, ctx: &mut TickContext<'_, Self>) {
        let mut child_anatomy = self.anatomy.clone();
        let chance = self.effective_mutability(ctx.params);
        let mutated = ctx.rng.gen::<f64>() * 100.0 <= chance
            && mutate_anatomy(&mut child_anatomy, ctx.rng, ctx.params);

        let drift = if ctx.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        let child_mutability = (self.mutability + drift).max(1.0);

        self.food_collected = self.food_collected.saturating_sub(self.food_needed());

        let Some(direction) = Direction::all().choose(ctx.rng).copied() else {
            return;
        };
        let distance = self.anatomy.extent() + child_anatomy.extent() + 2;
        let (dc, dr) = direction.to_delta();
        let child_pos = self.position.add(dc * distance, dr * distance);

        let fits = child_anatomy
            .placed_at(child_pos)
            .all(|(pos, _)| ctx.state_at(pos.col, pos.row).map_or(false, |s| s.is_free()));
        if !fits {
            return;
        }

        let mut child = BasicOrganism::new(child_pos, child_anatomy).with_mutability(child_mutability);
        if !mutated {
            child.species = self.species;
        }
        ctx.stage_birth(Birth {
            organism: child,
            parent_species: self.species,
            new_species: mutated,
        });
    }
}

/// Apply one weighted random mutation. Returns false when nothing changed.
fn mutate_anatomy(anatomy: &mut Anatomy, rng: &mut ChaCha8Rng, params: &Hyperparams) -> bool {
    let total = params.add_prob + params.change_prob + params.remove_prob;
    if total <= 0.0 || anatomy.is_empty() {
        return false;
    }
    let roll = rng.gen::<f64>() * total;
    let index = rng.gen_range(0..anatomy.len());
    let picked = anatomy.cells[index];
    let Some(new_state) = CellState::BODY_PARTS.choose(rng).copied() else {
        return false;
    };

    if roll < params.add_prob {
        let Some(direction) = Direction::all().choose(rng).copied() else {
            return false;
        };
        let (dc, dr) = direction.to_delta();
        let (col, row) = (picked.loc_col + dc, picked.loc_row + dr);
        if anatomy.has_cell_at(col, row) {
            return false;
        }
        anatomy.add_default_cell(new_state, col, row);
        true
    } else if roll < params.add_prob + params.change_prob {
        if picked.state == new_state {
            return false;
        }
        anatomy.add_default_cell(new_state, picked.loc_col, picked.loc_row);
        true
    } else {
        anatomy.len() > 1 && anatomy.remove_cell(picked.loc_col, picked.loc_row)
    }
}

impl Organism for BasicOrganism {
    fn id(&self) -> OrganismId {
        self.id
    }

    fn position(&self) -> Position {
        self.position
    }

    fn mutability(&self) -> f64 {
        self.mutability
    }

    fn is_living(&self) -> bool {
        self.living
    }

    fn anatomy(&self) -> &Anatomy {
        &self.anatomy
    }

    fn species(&self) -> Option<SpeciesId> {
        self.species
    }

    fn set_species(&mut self, species: SpeciesId) {
        self.species = Some(species);
    }

    fn update(&mut self, ctx: &mut TickContext<'_, Self>) -> bool {
        self.lifetime += 1;
        if self.lifetime > self.lifespan(ctx.params) {
            self.die(ctx);
            return false;
        }

        if self.food_collected >= self.food_needed() {
            self.reproduce(ctx);
        }

        for (pos, state) in self.footprint() {
            match state {
                CellState::Producer => self.produce(ctx, pos),
                CellState::Mouth => self.eat(ctx, pos),
                _ => {}
            }
        }
        true
    }

    fn origin(center: Position) -> Self {
        let mut anatomy = Anatomy::new();
        anatomy.add_default_cell(CellState::Mouth, 0, 0);
        anatomy.add_default_cell(CellState::Producer, 1, 1);
        anatomy.add_default_cell(CellState::Producer, -1, -1);
        BasicOrganism::new(center, anatomy)
    }

    fn to_payload(&self) -> Result<serde_json::Value> {
        let payload = Payload {
            anatomy: self.anatomy.clone(),
            mutability: self.mutability,
            lifetime: self.lifetime,
            food_collected: self.food_collected,
            living: self.living,
        };
        Ok(serde_json::to_value(payload)?)
    }

    fn from_record(anchor: Position, payload: &serde_json::Value) -> Result<Self> {
        let payload: Payload = serde_json::from_value(payload.clone())?;
        Ok(Self {
            id: OrganismId::new(),
            position: anchor,
            anatomy: payload.anatomy,
            mutability: payload.mutability,
            lifetime: payload.lifetime,
            food_collected: payload.food_collected,
            living: payload.living,
            species: None,
        })
    }
}
