//! Uniform bucket hash over organism anchors.
//!
//! Every organism is registered in the 3x3 block of buckets around the bucket
//! containing its anchor, so a single-bucket query already sees organisms whose
//! anchors sit just across a bucket boundary.

use life_core::{Error, OrganismId, Position, Result};
use std::collections::{HashMap, HashSet};

/// Bucket address, `(floor(col / size), floor(row / size))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub bx: i32,
    pub by: i32,
}

impl BucketKey {
    pub fn new(bx: i32, by: i32) -> Self {
        Self { bx, by }
    }

    /// This bucket and its eight neighbours
    pub fn neighborhood(&self) -> impl Iterator<Item = BucketKey> {
        let center = *self;
        (-1..=1).flat_map(move |dy| {
            (-1..=1).map(move |dx| BucketKey::new(center.bx + dx, center.by + dy))
        })
    }
}

#[derive(Debug, Clone)]
pub struct SpatialIndex {
    bucket_size: i32,
    buckets: HashMap<BucketKey, HashSet<OrganismId>>,
}

impl SpatialIndex {
    pub fn new(bucket_size: i32) -> Result<Self> {
        if bucket_size <= 0 {
            return Err(Error::Validation(format!(
                "bucket size must be positive, got {}",
                bucket_size
            )));
        }
        Ok(Self {
            bucket_size,
            buckets: HashMap::new(),
        })
    }

    pub fn bucket_size(&self) -> i32 {
        self.bucket_size
    }

    pub fn key_for(&self, col: i32, row: i32) -> BucketKey {
        BucketKey::new(
            col.div_euclid(self.bucket_size),
            row.div_euclid(self.bucket_size),
        )
    }

    pub fn insert(&mut self, id: OrganismId, anchor: Position) {
        let center = self.key_for(anchor.col, anchor.row);
        for key in center.neighborhood() {
            self.buckets.entry(key).or_default().insert(id);
        }
    }

    /// Remove `id` from the neighbourhood of `anchor`. Missing entries are ignored.
    pub fn remove(&mut self, id: OrganismId, anchor: Position) {
        let center = self.key_for(anchor.col, anchor.row);
        for key in center.neighborhood() {
            if let Some(bucket) = self.buckets.get_mut(&key) {
                bucket.remove(&id);
                if bucket.is_empty() {
                    self.buckets.remove(&key);
                }
            }
        }
    }

    /// Organisms registered in the single bucket containing `(col, row)`
    pub fn query(&self, col: i32, row: i32) -> Vec<OrganismId> {
        self.buckets
            .get(&self.key_for(col, row))
            .map(|bucket| bucket.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Union of the 3x3 bucket neighbourhood around `(col, row)`
    pub fn query_neighborhood(&self, col: i32, row: i32) -> HashSet<OrganismId> {
        self.key_for(col, row)
            .neighborhood()
            .filter_map(|key| self.buckets.get(&key))
            .flat_map(|bucket| bucket.iter().copied())
            .collect()
    }

    pub fn contains(&self, key: BucketKey, id: OrganismId) -> bool {
        self.buckets
            .get(&key)
            .map_or(false, |bucket| bucket.contains(&id))
    }

    /// Every bucket that currently references `id`
    pub fn buckets_containing(&self, id: OrganismId) -> HashSet<BucketKey> {
        self.buckets
            .iter()
            .filter(|(_, bucket)| bucket.contains(&id))
            .map(|(key, _)| *key)
            .collect()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}
