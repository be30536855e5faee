//! Species lineage record.
//!
//! Species are owned here and referenced by `SpeciesId` everywhere else. The
//! world only calls the lifecycle hooks; it never reads the statistics back.

use crate::anatomy::Anatomy;
use crate::organism::Organism;
use life_core::{CellState, SpeciesId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

const DEFAULT_RECORD_SIZE_LIMIT: usize = 500;
/// Extinct species with fewer total members than this are not archived
const DEFAULT_MIN_DISCARD: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Species {
    pub id: SpeciesId,
    pub name: String,
    pub parent: Option<SpeciesId>,
    /// Template body; not part of the stats record and back-filled on restore
    #[serde(skip)]
    pub anatomy: Option<Anatomy>,
    pub population: u64,
    pub cumulative_pop: u64,
    pub start_tick: u64,
    pub end_tick: Option<u64>,
    #[serde(default)]
    pub cell_counts: BTreeMap<CellState, usize>,
}

impl Species {
    pub fn new(
        id: SpeciesId,
        name: String,
        anatomy: Option<Anatomy>,
        parent: Option<SpeciesId>,
        start_tick: u64,
    ) -> Self {
        let mut species = Self {
            id,
            name,
            parent,
            anatomy,
            population: 1,
            cumulative_pop: 1,
            start_tick,
            end_tick: None,
            cell_counts: BTreeMap::new(),
        };
        species.calc_anatomy_details();
        species
    }

    /// Refresh the per-state cell counts from the template
    pub fn calc_anatomy_details(&mut self) {
        if let Some(anatomy) = &self.anatomy {
            self.cell_counts = anatomy.state_counts();
        }
    }
}

/// Population figures handed over on each data update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldStats {
    pub tick: u64,
    pub population: usize,
    pub average_mutability: f64,
    pub largest_cell_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub tick: u64,
    pub population: usize,
    pub species_count: usize,
    pub average_mutability: f64,
    pub largest_cell_count: usize,
}

/// Portable form of the record. `species` maps name to stats for extant species.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FossilSnapshot {
    pub species: BTreeMap<String, Species>,
    #[serde(default)]
    pub next_id: u64,
    #[serde(default)]
    pub num_extinct: usize,
    #[serde(default)]
    pub history: Vec<DataPoint>,
}

#[derive(Debug)]
pub struct FossilRecord {
    extant: BTreeMap<SpeciesId, Species>,
    extinct: Vec<Species>,
    /// Extinct species known only by count: too small to archive, or restored
    unarchived_extinct: usize,
    next_id: u64,
    history: Vec<DataPoint>,
    record_size_limit: usize,
    min_discard: u64,
}

impl Default for FossilRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl FossilRecord {
    pub fn new() -> Self {
        Self {
            extant: BTreeMap::new(),
            extinct: Vec::new(),
            unarchived_extinct: 0,
            next_id: 0,
            history: Vec::new(),
            record_size_limit: DEFAULT_RECORD_SIZE_LIMIT,
            min_discard: DEFAULT_MIN_DISCARD,
        }
    }

    pub fn with_record_size_limit(mut self, limit: usize) -> Self {
        self.record_size_limit = limit.max(1);
        self
    }

    /// Reserve a fresh species id
    pub fn allocate_id(&mut self) -> SpeciesId {
        let id = SpeciesId(self.next_id);
        self.next_id += 1;
        id
    }

    fn generate_name() -> String {
        let mut name = Uuid::new_v4().simple().to_string();
        name.truncate(8);
        name
    }

    /// Start a new species from `organism`'s anatomy
    pub fn add_species<O: Organism>(
        &mut self,
        organism: &O,
        parent: Option<SpeciesId>,
        tick: u64,
    ) -> SpeciesId {
        let id = self.allocate_id();
        let species = Species::new(
            id,
            Self::generate_name(),
            Some(organism.anatomy().clone()),
            parent,
            tick,
        );
        debug!(species = %id, name = %species.name, parent = ?parent, "New species");
        self.extant.insert(id, species);
        id
    }

    /// Register a fully built species, e.g. one reconstructed on restore
    pub fn add_species_obj(&mut self, species: Species) {
        self.next_id = self.next_id.max(species.id.0 + 1);
        self.extant.insert(species.id, species);
    }

    pub fn record_birth(&mut self, id: SpeciesId) {
        if let Some(species) = self.extant.get_mut(&id) {
            species.population += 1;
            species.cumulative_pop += 1;
        }
    }

    /// Returns true if this death made the species extinct
    pub fn record_death(&mut self, id: SpeciesId, tick: u64) -> bool {
        let Some(species) = self.extant.get_mut(&id) else {
            return false;
        };
        species.population = species.population.saturating_sub(1);
        if species.population > 0 {
            return false;
        }
        if let Some(mut species) = self.extant.remove(&id) {
            species.end_tick = Some(tick);
            debug!(species = %id, cumulative_pop = species.cumulative_pop, "Species extinct");
            if species.cumulative_pop >= self.min_discard {
                self.extinct.push(species);
            } else {
                self.unarchived_extinct += 1;
            }
        }
        true
    }

    pub fn species(&self, id: SpeciesId) -> Option<&Species> {
        self.extant.get(&id)
    }

    pub fn species_by_name(&self, name: &str) -> Option<&Species> {
        self.extant.values().find(|species| species.name == name)
    }

    pub fn extant_count(&self) -> usize {
        self.extant.len()
    }

    pub fn extinct_count(&self) -> usize {
        self.unarchived_extinct + self.extinct.len()
    }

    /// Archived extinct species (those that reached the discard threshold)
    pub fn archived_extinct(&self) -> &[Species] {
        &self.extinct
    }

    pub fn history(&self) -> &[DataPoint] {
        &self.history
    }

    /// Periodic snapshot of population statistics
    pub fn update_data(&mut self, stats: WorldStats) {
        self.history.push(DataPoint {
            tick: stats.tick,
            population: stats.population,
            species_count: self.extant.len(),
            average_mutability: stats.average_mutability,
            largest_cell_count: stats.largest_cell_count,
        });
        if self.history.len() > self.record_size_limit {
            let excess = self.history.len() - self.record_size_limit;
            self.history.drain(..excess);
        }
    }

    pub fn serialize(&self) -> FossilSnapshot {
        FossilSnapshot {
            species: self
                .extant
                .values()
                .map(|species| {
                    let mut species = species.clone();
                    species.anatomy = None;
                    (species.name.clone(), species)
                })
                .collect(),
            next_id: self.next_id,
            num_extinct: self.extinct_count(),
            history: self.history.clone(),
        }
    }

    /// Load the bookkeeping that is not carried by the species table.
    /// Species themselves are registered with `add_species_obj`.
    pub fn load_raw(&mut self, data: &FossilSnapshot) {
        self.next_id = self.next_id.max(data.next_id);
        self.unarchived_extinct = data.num_extinct;
        self.history = data.history.clone();
        info!(
            species = self.extant.len(),
            extinct = data.num_extinct,
            data_points = self.history.len(),
            "Lineage record loaded"
        );
    }

    /// Count species that went extinct without ever reaching the archive
    pub(crate) fn note_unarchived_extinct(&mut self, count: usize) {
        self.unarchived_extinct += count;
    }

    pub fn clear_record(&mut self) {
        self.extant.clear();
        self.extinct.clear();
        self.unarchived_extinct = 0;
        self.next_id = 0;
        self.history.clear();
    }
}
