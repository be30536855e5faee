//! Snapshot save and restore.
//!
//! A snapshot holds the grid, every live organism, the lineage record, the
//! scalar world fields and the hyperparameters in force when it was taken.
//! Restore checks the whole snapshot before it touches the world.

use crate::grid::GridSnapshot;
use crate::lineage::{FossilSnapshot, Species};
use crate::organism::Organism;
use crate::simulation::World;
use life_core::{Error, Hyperparams, Position, Result, SpeciesId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, info, instrument, warn};

pub const SNAPSHOT_VERSION: u32 = 1;

/// One organism as stored in a snapshot. Everything the world does not need
/// to place and link the organism lives in the opaque `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganismRecord {
    pub col: i32,
    pub row: i32,
    #[serde(default)]
    pub species_name: String,
    #[serde(default)]
    pub species_id: Option<SpeciesId>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub version: u32,
    /// RFC 3339
    pub saved_at: String,
    pub grid: GridSnapshot,
    pub organisms: Vec<OrganismRecord>,
    pub fossil_record: FossilSnapshot,
    pub total_ticks: u64,
    #[serde(default)]
    pub reset_count: u64,
    #[serde(default)]
    pub largest_cell_count: usize,
    pub data_update_rate: u64,
    pub controls: Hyperparams,
}

impl WorldSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    fn contains(&self, col: i32, row: i32) -> bool {
        col >= 0 && row >= 0 && col < self.grid.cols && row < self.grid.rows
    }

    /// Structural checks that do not need the organism type
    pub fn validate(&self) -> Result<()> {
        if self.version > SNAPSHOT_VERSION {
            return Err(Error::Validation(format!(
                "snapshot version {} is newer than supported version {}",
                self.version, SNAPSHOT_VERSION
            )));
        }
        self.grid.validate()?;

        for (i, record) in self.organisms.iter().enumerate() {
            if !self.contains(record.col, record.row) {
                return Err(Error::Validation(format!(
                    "organism record {} anchored at ({}, {}) outside the {}x{} grid",
                    i, record.col, record.row, self.grid.cols, self.grid.rows
                )));
            }
        }

        let mut ids = HashSet::new();
        for (name, species) in &self.fossil_record.species {
            if *name != species.name {
                return Err(Error::Validation(format!(
                    "species table key {:?} does not match species name {:?}",
                    name, species.name
                )));
            }
            if !ids.insert(species.id) {
                return Err(Error::Validation(format!(
                    "species id {} appears twice in the species table",
                    species.id
                )));
            }
        }
        Ok(())
    }
}

/// Restore behaviour switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Replace the running hyperparameters with the snapshot's
    pub override_controls: bool,
}

/// Species table rebuilt during restore, keyed by id
struct SpeciesTable {
    by_id: BTreeMap<SpeciesId, Species>,
    next_id: u64,
}

impl SpeciesTable {
    fn from_snapshot(data: &FossilSnapshot) -> Self {
        let by_id: BTreeMap<SpeciesId, Species> = data
            .species
            .values()
            .map(|species| {
                let mut species = species.clone();
                species.anatomy = None;
                species.population = 0;
                (species.id, species)
            })
            .collect();
        let next_id = by_id
            .keys()
            .map(|id| id.0 + 1)
            .max()
            .unwrap_or(0)
            .max(data.next_id);
        Self { by_id, next_id }
    }

    /// Id first, then name, then a placeholder built from the organism
    fn resolve<O: Organism>(&mut self, record: &OrganismRecord, organism: &O, tick: u64) -> SpeciesId {
        if let Some(id) = record.species_id.filter(|id| self.by_id.contains_key(id)) {
            return id;
        }
        if let Some(species) = self
            .by_id
            .values()
            .find(|species| !record.species_name.is_empty() && species.name == record.species_name)
        {
            return species.id;
        }

        let id = SpeciesId(self.next_id);
        self.next_id += 1;
        let name = if record.species_name.is_empty() {
            format!("restored-{}", id.0)
        } else {
            record.species_name.clone()
        };
        warn!(
            species = %id,
            name = %name,
            col = record.col,
            row = record.row,
            "Organism species missing from lineage record; synthesized a placeholder"
        );
        let mut species = Species::new(id, name, Some(organism.anatomy().clone()), None, tick);
        species.population = 0;
        self.by_id.insert(id, species);
        id
    }

    /// Count a member and give the species a template if it has none
    fn link<O: Organism>(&mut self, id: SpeciesId, organism: &O) {
        if let Some(species) = self.by_id.get_mut(&id) {
            species.population += 1;
            if species.anatomy.is_none() {
                species.anatomy = Some(organism.anatomy().clone());
                species.calc_anatomy_details();
            }
        }
    }
}

impl<O: Organism> World<O> {
    /// Capture the world. Dead organisms are purged first so a snapshot
    /// never holds one.
    #[instrument(skip(self), fields(tick = self.total_ticks))]
    pub fn serialize(&mut self) -> Result<WorldSnapshot> {
        let purged = self.clear_dead_organisms()?;
        if purged > 0 {
            debug!(purged, "Purged dead organisms before snapshot");
        }

        let organisms = self
            .registry
            .iter()
            .map(|organism| {
                let anchor = organism.position();
                let species_id = organism.species();
                let species_name = species_id
                    .and_then(|id| self.fossil.species(id))
                    .map(|species| species.name.clone())
                    .unwrap_or_default();
                Ok(OrganismRecord {
                    col: anchor.col,
                    row: anchor.row,
                    species_name,
                    species_id,
                    payload: organism.to_payload()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let snapshot = WorldSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: chrono::Utc::now().to_rfc3339(),
            grid: self.grid.serialize(),
            organisms,
            fossil_record: self.fossil.serialize(),
            total_ticks: self.total_ticks,
            reset_count: self.reset_count,
            largest_cell_count: self.registry.largest_cell_count(),
            data_update_rate: self.config.data_update_rate,
            controls: self.params.clone(),
        };
        info!(
            organisms = snapshot.organisms.len(),
            species = snapshot.fossil_record.species.len(),
            "World serialized"
        );
        Ok(snapshot)
    }

    /// Replace the world with `snapshot`. Any validation failure leaves the
    /// world exactly as it was.
    #[instrument(skip(self, snapshot), fields(organisms = snapshot.organisms.len()))]
    pub fn load_raw(&mut self, snapshot: &WorldSnapshot, options: LoadOptions) -> Result<()> {
        snapshot.validate()?;
        if options.override_controls {
            snapshot.controls.validate()?;
        }
        let decoded = snapshot
            .organisms
            .iter()
            .enumerate()
            .map(|(i, record)| {
                O::from_record(Position::new(record.col, record.row), &record.payload)
                    .map(|organism| (organism, record))
                    .map_err(|e| Error::Validation(format!("organism record {}: {}", i, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut ids = HashSet::with_capacity(decoded.len());
        if let Some((organism, record)) = decoded.iter().find(|(organism, _)| !ids.insert(organism.id())) {
            return Err(Error::Validation(format!(
                "organism {} at ({}, {}) appears twice",
                organism.id(),
                record.col,
                record.row
            )));
        }

        let mut table = SpeciesTable::from_snapshot(&snapshot.fossil_record);
        let mut organisms = Vec::with_capacity(decoded.len());
        for (mut organism, record) in decoded {
            let id = table.resolve(record, &organism, snapshot.total_ticks);
            table.link(id, &organism);
            organism.set_species(id);
            organisms.push(organism);
        }

        // Ids are unique and the snapshot is validated; nothing below fails
        self.registry.clear();
        self.pending_births.clear();
        self.events.clear();
        self.fossil.clear_record();
        self.grid.load_raw(&snapshot.grid)?;
        self.config.cols = snapshot.grid.cols;
        self.config.rows = snapshot.grid.rows;
        self.config.cell_size = snapshot.grid.cell_size;

        for organism in organisms {
            let id = organism.id();
            let footprint = organism.footprint();
            self.registry.insert(organism)?;
            // Owners are not stored; claim cells that still show the body part
            for (pos, state) in footprint {
                if let Ok(cell) = self.grid.cell_at_mut(pos.col, pos.row) {
                    if cell.state == state {
                        cell.owner = Some(id);
                    }
                }
            }
        }

        let mut dropped = 0;
        for species in table.by_id.into_values() {
            if species.population > 0 {
                self.fossil.add_species_obj(species);
            } else {
                dropped += 1;
            }
        }
        self.fossil.load_raw(&snapshot.fossil_record);
        if dropped > 0 {
            self.fossil.note_unarchived_extinct(dropped);
            debug!(dropped, "Species without living members counted as extinct");
        }

        self.registry.recompute_aggregates();
        self.registry
            .note_largest_cell_count(snapshot.largest_cell_count);
        self.total_ticks = snapshot.total_ticks;
        self.reset_count = snapshot.reset_count;
        self.config.data_update_rate = snapshot.data_update_rate;
        if options.override_controls {
            self.params = snapshot.controls.clone();
        }
        self.render.render_full_grid();

        info!(
            organisms = self.registry.len(),
            species = self.fossil.extant_count(),
            total_ticks = self.total_ticks,
            override_controls = options.override_controls,
            "World loaded"
        );
        Ok(())
    }
}
