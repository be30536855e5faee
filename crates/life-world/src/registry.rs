//! Live organism collection and its derived aggregates.
//!
//! All writes to the population, the mutability total and the spatial index go
//! through `add`/`insert` and `remove_batch`, so the three stay consistent.

use crate::organism::Organism;
use crate::spatial::SpatialIndex;
use life_core::{Error, Hyperparams, OrganismId, Position, Result};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Slack allowed for floating-point drift in the mutability total
const MUTABILITY_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy)]
struct Slot {
    index: usize,
    /// Anchor the organism was indexed under
    anchor: Position,
}

/// Organisms evicted by one `remove_batch` call
#[derive(Debug)]
pub struct RemovalOutcome<O> {
    pub removed: Vec<O>,
    /// The batch emptied a previously non-empty population
    pub extinct: bool,
}

impl<O> RemovalOutcome<O> {
    fn nothing() -> Self {
        Self {
            removed: Vec::new(),
            extinct: false,
        }
    }
}

pub struct OrganismRegistry<O> {
    organisms: Vec<O>,
    slots: HashMap<OrganismId, Slot>,
    index: SpatialIndex,
    total_mutability: f64,
    largest_cell_count: usize,
}

impl<O: Organism> OrganismRegistry<O> {
    pub fn new(bucket_size: i32) -> Result<Self> {
        Ok(Self {
            organisms: Vec::new(),
            slots: HashMap::new(),
            index: SpatialIndex::new(bucket_size)?,
            total_mutability: 0.0,
            largest_cell_count: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.organisms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.organisms.is_empty()
    }

    /// True while below the cap; a negative cap means uncapped
    pub fn can_add(&self, max_organisms: i64) -> bool {
        max_organisms < 0 || (self.organisms.len() as i64) < max_organisms
    }

    /// Register an organism. Callers check `can_add` first; adding past the
    /// cap is a contract violation and is rejected.
    pub fn add(&mut self, organism: O, max_organisms: i64) -> Result<()> {
        if !self.can_add(max_organisms) {
            return Err(Error::ResourceExhausted(format!(
                "population cap {} reached",
                max_organisms
            )));
        }
        self.insert(organism)
    }

    /// Register without the capacity gate. Restore uses this to reproduce a
    /// saved population exactly.
    pub(crate) fn insert(&mut self, organism: O) -> Result<()> {
        let id = organism.id();
        if self.slots.contains_key(&id) {
            return Err(Error::AlreadyExists(format!("organism {}", id)));
        }
        let anchor = organism.position();
        self.index.insert(id, anchor);
        self.total_mutability += organism.mutability();
        self.largest_cell_count = self.largest_cell_count.max(organism.anatomy().len());
        self.slots.insert(
            id,
            Slot {
                index: self.organisms.len(),
                anchor,
            },
        );
        self.organisms.push(organism);
        trace!(organism_id = %id, col = anchor.col, row = anchor.row, "Organism registered");
        Ok(())
    }

    /// Evict the organisms at `indices` in one pass.
    ///
    /// Indices are validated up front, so an out-of-range index leaves the
    /// registry untouched. Duplicates are ignored. Removal runs from the
    /// highest index down with `swap_remove`, which only ever moves an element
    /// that is not scheduled for removal.
    pub fn remove_batch(&mut self, indices: &[usize]) -> Result<RemovalOutcome<O>> {
        if indices.is_empty() {
            return Ok(RemovalOutcome::nothing());
        }
        let start_pop = self.organisms.len();
        if let Some(&bad) = indices.iter().find(|&&i| i >= start_pop) {
            return Err(Error::InvalidState(format!(
                "removal index {} out of range for population {}",
                bad, start_pop
            )));
        }

        let mut sorted = indices.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        sorted.dedup();

        let mut removed = Vec::with_capacity(sorted.len());
        for i in sorted {
            let organism = self.organisms.swap_remove(i);
            let id = organism.id();
            if let Some(slot) = self.slots.remove(&id) {
                self.index.remove(id, slot.anchor);
            }
            if let Some(moved) = self.organisms.get(i) {
                if let Some(slot) = self.slots.get_mut(&moved.id()) {
                    slot.index = i;
                }
            }
            self.total_mutability -= organism.mutability();
            removed.push(organism);
        }

        debug_assert!(
            self.total_mutability > -MUTABILITY_EPSILON,
            "mutability total went negative ({}); an organism was removed twice or changed mutability while registered",
            self.total_mutability
        );
        if self.total_mutability < 0.0 || self.organisms.is_empty() {
            self.total_mutability = 0.0;
        }

        let extinct = start_pop > 0 && self.organisms.is_empty();
        debug!(
            removed = removed.len(),
            remaining = self.organisms.len(),
            extinct,
            "Removed organism batch"
        );
        Ok(RemovalOutcome { removed, extinct })
    }

    /// Remove a single organism by identity
    pub fn remove(&mut self, id: OrganismId) -> Result<Option<O>> {
        let Some(index) = self.index_of(id) else {
            return Ok(None);
        };
        let outcome = self.remove_batch(&[index])?;
        Ok(outcome.removed.into_iter().next())
    }

    /// Positions of organisms whose living flag is down
    pub fn dead_indices(&self) -> Vec<usize> {
        self.organisms
            .iter()
            .enumerate()
            .filter(|(_, org)| !org.is_living())
            .map(|(i, _)| i)
            .collect()
    }

    /// Move organisms whose anchor changed since they were indexed.
    /// Returns how many were re-indexed.
    pub fn reindex_moved(&mut self) -> usize {
        let mut moved = 0;
        for organism in &self.organisms {
            let id = organism.id();
            let current = organism.position();
            if let Some(slot) = self.slots.get_mut(&id) {
                if slot.anchor != current {
                    self.index.remove(id, slot.anchor);
                    self.index.insert(id, current);
                    slot.anchor = current;
                    moved += 1;
                }
            }
        }
        moved
    }

    pub fn average_mutability(&self, params: &Hyperparams) -> f64 {
        if self.organisms.is_empty() {
            return 0.0;
        }
        if params.use_global_mutability {
            return params.global_mutability;
        }
        self.total_mutability / self.organisms.len() as f64
    }

    pub fn index_of(&self, id: OrganismId) -> Option<usize> {
        self.slots.get(&id).map(|slot| slot.index)
    }

    pub fn get(&self, id: OrganismId) -> Option<&O> {
        self.index_of(id).and_then(|i| self.organisms.get(i))
    }

    pub fn get_at(&self, index: usize) -> Option<&O> {
        self.organisms.get(index)
    }

    pub fn get_at_mut(&mut self, index: usize) -> Option<&mut O> {
        self.organisms.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &O> + '_ {
        self.organisms.iter()
    }

    /// Organisms registered around the bucket containing `(col, row)`
    pub fn nearby(&self, col: i32, row: i32) -> Vec<&O> {
        self.index
            .query_neighborhood(col, row)
            .into_iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    pub fn spatial(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn total_mutability(&self) -> f64 {
        self.total_mutability
    }

    pub fn largest_cell_count(&self) -> usize {
        self.largest_cell_count
    }

    /// Raise the largest-footprint high-water mark, e.g. from a snapshot
    pub fn note_largest_cell_count(&mut self, count: usize) {
        self.largest_cell_count = self.largest_cell_count.max(count);
    }

    /// Drop every organism. The largest-footprint high-water mark survives.
    pub fn clear(&mut self) -> Vec<O> {
        self.slots.clear();
        self.index.clear();
        self.total_mutability = 0.0;
        std::mem::take(&mut self.organisms)
    }

    /// Recompute the cached aggregates from the collection
    pub fn recompute_aggregates(&mut self) {
        let total: f64 = self.organisms.iter().map(Organism::mutability).sum();
        self.total_mutability = total.max(0.0);
        let largest = self
            .organisms
            .iter()
            .map(|org| org.anatomy().len())
            .max()
            .unwrap_or(0);
        self.largest_cell_count = self.largest_cell_count.max(largest);
    }

    /// Verify the registry invariants, reporting the first violation
    pub fn check_invariants(&self) -> Result<()> {
        let expected: f64 = self.organisms.iter().map(Organism::mutability).sum();
        if (self.total_mutability - expected.max(0.0)).abs() > MUTABILITY_EPSILON {
            return Err(Error::InvalidState(format!(
                "mutability total {} does not match population sum {}",
                self.total_mutability, expected
            )));
        }
        if self.slots.len() != self.organisms.len() {
            return Err(Error::InvalidState(
                "duplicate or missing organism slots".to_string(),
            ));
        }
        for (i, organism) in self.organisms.iter().enumerate() {
            let id = organism.id();
            let slot = self.slots.get(&id).ok_or_else(|| {
                Error::InvalidState(format!("organism {} has no slot", id))
            })?;
            if slot.index != i {
                return Err(Error::InvalidState(format!(
                    "organism {} recorded at {} but stored at {}",
                    id, slot.index, i
                )));
            }
            let center = self.index.key_for(slot.anchor.col, slot.anchor.row);
            let expected: std::collections::HashSet<_> = center.neighborhood().collect();
            if self.index.buckets_containing(id) != expected {
                return Err(Error::InvalidState(format!(
                    "organism {} indexed outside the neighbourhood of {}",
                    id, slot.anchor
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anatomy::Anatomy;
    use crate::organism::BasicOrganism;
    use crate::spatial::BucketKey;
    use life_core::CellState;
    use proptest::prelude::*;

    fn organism(col: i32, row: i32, mutability: f64) -> BasicOrganism {
        let mut anatomy = Anatomy::new();
        anatomy.add_default_cell(CellState::Mouth, 0, 0);
        BasicOrganism::new(Position::new(col, row), anatomy).with_mutability(mutability)
    }

    fn registry() -> OrganismRegistry<BasicOrganism> {
        OrganismRegistry::new(20).unwrap()
    }

    #[test]
    fn test_add_updates_aggregates() {
        let mut reg = registry();
        reg.add(organism(5, 5, 3.0), -1).unwrap();
        let mut big = BasicOrganism::origin(Position::new(30, 30));
        big.mutability = 2.0;
        reg.add(big, -1).unwrap();

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.total_mutability(), 5.0);
        assert_eq!(reg.largest_cell_count(), 3);
        reg.check_invariants().unwrap();
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let mut reg = registry();
        let org = organism(1, 1, 1.0);
        let copy = org.clone();
        reg.add(org, -1).unwrap();
        assert!(matches!(reg.add(copy, -1), Err(Error::AlreadyExists(_))));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.total_mutability(), 1.0);
    }

    #[test]
    fn test_capacity_gate() {
        let mut reg = registry();
        for i in 0..3 {
            assert!(reg.can_add(3));
            reg.add(organism(i, 0, 1.0), 3).unwrap();
        }
        assert!(!reg.can_add(3));
        assert!(matches!(
            reg.add(organism(9, 9, 1.0), 3),
            Err(Error::ResourceExhausted(_))
        ));
        assert_eq!(reg.len(), 3);

        assert!(!reg.can_add(0));
        assert!(reg.can_add(-1));
        for i in 0..50 {
            reg.add(organism(i, 1, 1.0), -1).unwrap();
        }
        assert!(reg.can_add(-1));
    }

    #[test]
    fn test_remove_batch_descending_and_deduped() {
        let mut reg = registry();
        let ids: Vec<_> = (0..5)
            .map(|i| {
                let org = organism(i * 10, 0, i as f64);
                let id = org.id;
                reg.add(org, -1).unwrap();
                id
            })
            .collect();

        let outcome = reg.remove_batch(&[1, 3, 1]).unwrap();
        assert_eq!(outcome.removed.len(), 2);
        assert!(!outcome.extinct);
        assert_eq!(reg.len(), 3);
        assert!(reg.get(ids[1]).is_none());
        assert!(reg.get(ids[3]).is_none());
        for id in [ids[0], ids[2], ids[4]] {
            assert!(reg.get(id).is_some());
        }
        assert_eq!(reg.total_mutability(), 0.0 + 2.0 + 4.0);
        reg.check_invariants().unwrap();
    }

    #[test]
    fn test_remove_batch_out_of_range_is_atomic() {
        let mut reg = registry();
        reg.add(organism(0, 0, 2.0), -1).unwrap();
        reg.add(organism(1, 0, 2.0), -1).unwrap();

        assert!(reg.remove_batch(&[0, 7]).is_err());
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.total_mutability(), 4.0);
        reg.check_invariants().unwrap();
    }

    #[test]
    fn test_empty_batch_changes_nothing() {
        let mut reg = registry();
        reg.add(organism(3, 3, 2.5), -1).unwrap();
        let buckets = reg.spatial().bucket_count();

        let outcome = reg.remove_batch(&[]).unwrap();
        assert!(outcome.removed.is_empty());
        assert!(!outcome.extinct);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.total_mutability(), 2.5);
        assert_eq!(reg.spatial().bucket_count(), buckets);
    }

    #[test]
    fn test_extinction_flag() {
        let mut reg = registry();
        reg.add(organism(0, 0, 1.0), -1).unwrap();
        reg.add(organism(50, 50, 1.0), -1).unwrap();

        assert!(!reg.remove_batch(&[0]).unwrap().extinct);
        assert!(reg.remove_batch(&[0]).unwrap().extinct);
        assert!(!reg.remove_batch(&[]).unwrap().extinct);
        assert_eq!(reg.spatial().bucket_count(), 0);
    }

    #[test]
    fn test_average_mutability_modes() {
        let mut reg = registry();
        let mut params = Hyperparams::default();
        assert_eq!(reg.average_mutability(&params), 0.0);

        reg.add(organism(0, 0, 2.0), -1).unwrap();
        reg.add(organism(1, 1, 4.0), -1).unwrap();
        assert_eq!(reg.average_mutability(&params), 3.0);

        params.use_global_mutability = true;
        params.global_mutability = 11.0;
        assert_eq!(reg.average_mutability(&params), 11.0);

        reg.clear();
        assert_eq!(reg.average_mutability(&params), 0.0);
    }

    #[test]
    fn test_reindex_moved_organism() {
        let mut reg = registry();
        let org = organism(25, 25, 1.0);
        let id = org.id;
        reg.add(org, -1).unwrap();
        assert!(reg.nearby(25, 25).iter().any(|o| o.id == id));

        reg.get_at_mut(0).unwrap().position = Position::new(5, 5);
        assert_eq!(reg.reindex_moved(), 1);

        assert!(reg.nearby(5, 5).iter().any(|o| o.id == id));
        assert!(reg.spatial().contains(BucketKey::new(0, 0), id));
        assert!(!reg.spatial().contains(BucketKey::new(2, 2), id));
        reg.check_invariants().unwrap();

        reg.remove(id).unwrap();
        assert!(reg.spatial().buckets_containing(id).is_empty());
    }

    #[test]
    fn test_removal_clears_index_after_unsynced_move() {
        let mut reg = registry();
        let org = organism(25, 25, 1.0);
        let id = org.id;
        reg.add(org, -1).unwrap();

        // Moved without a reindex; removal still clears the indexed buckets
        reg.get_at_mut(0).unwrap().position = Position::new(100, 100);
        reg.remove_batch(&[0]).unwrap();
        assert!(reg.spatial().buckets_containing(id).is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add { col: i32, row: i32, mutability: f64 },
        Remove(Vec<usize>),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..200i32, 0..200i32, 0.0..20.0f64)
                .prop_map(|(col, row, mutability)| Op::Add { col, row, mutability }),
            prop::collection::vec(0..64usize, 0..6).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn prop_aggregates_and_index_stay_consistent(ops in prop::collection::vec(op_strategy(), 1..60)) {
            let mut reg = registry();
            for op in ops {
                match op {
                    Op::Add { col, row, mutability } => {
                        reg.add(organism(col, row, mutability), -1).unwrap();
                    }
                    Op::Remove(raw) => {
                        if reg.is_empty() {
                            continue;
                        }
                        let indices: Vec<usize> = raw.into_iter().map(|i| i % reg.len()).collect();
                        let ids: Vec<_> = indices.iter().map(|&i| reg.get_at(i).unwrap().id).collect();
                        reg.remove_batch(&indices).unwrap();
                        for id in ids {
                            prop_assert!(reg.get(id).is_none());
                            prop_assert!(reg.spatial().buckets_containing(id).is_empty());
                        }
                    }
                }
                let sum: f64 = reg.iter().map(|o| o.mutability).sum();
                prop_assert!((reg.total_mutability() - sum.max(0.0)).abs() < 1e-6);
                prop_assert!(reg.check_invariants().is_ok());
                for org in reg.iter() {
                    prop_assert!(reg.nearby(org.position.col, org.position.row).iter().any(|o| o.id == org.id));
                }
            }
        }
    }
}
