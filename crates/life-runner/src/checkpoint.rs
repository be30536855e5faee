//! Periodic world checkpoints on disk.

use life_core::{Error, Result};
use life_world::{Organism, World, WorldSnapshot};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

const CHECKPOINT_VERSION: u32 = 1;
const PREFIX: &str = "checkpoint_";
const SUFFIX: &str = ".json";

#[derive(Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    /// Unix time in milliseconds; also the file name key
    pub timestamp: i64,
    pub tick: u64,
    pub snapshot: WorldSnapshot,
}

pub struct CheckpointManager {
    checkpoint_dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
        }
    }

    /// Snapshot the world into a new checkpoint file
    pub async fn create_checkpoint<O: Organism>(&self, world: &mut World<O>) -> Result<PathBuf> {
        fs::create_dir_all(&self.checkpoint_dir)
            .await
            .map_err(Error::Io)?;

        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            timestamp: chrono::Utc::now().timestamp_millis(),
            tick: world.total_ticks(),
            snapshot: world.serialize()?,
        };
        let bytes = serde_json::to_vec(&checkpoint)?;

        let path = self
            .checkpoint_dir
            .join(format!("{}{}{}", PREFIX, checkpoint.timestamp, SUFFIX));
        fs::write(&path, &bytes).await.map_err(Error::Io)?;

        info!(path = ?path, tick = checkpoint.tick, bytes = bytes.len(), "Checkpoint created");
        Ok(path)
    }

    /// Load the newest checkpoint, or `NotFound` when there is none
    pub async fn restore_latest(&self) -> Result<Checkpoint> {
        let Some((path, _)) = self.list_checkpoints().await?.into_iter().next() else {
            warn!(dir = ?self.checkpoint_dir, "No checkpoints found");
            return Err(Error::NotFound("No checkpoint files found".to_string()));
        };

        let bytes = fs::read(&path).await.map_err(Error::Io)?;
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes).map_err(|e| {
            Error::Serialization(format!("Failed to deserialize checkpoint {:?}: {}", path, e))
        })?;
        if checkpoint.version > CHECKPOINT_VERSION {
            return Err(Error::Validation(format!(
                "checkpoint version {} is newer than supported version {}",
                checkpoint.version, CHECKPOINT_VERSION
            )));
        }

        info!(path = ?path, tick = checkpoint.tick, "Restored checkpoint");
        Ok(checkpoint)
    }

    /// Delete all but the newest `keep_count` checkpoints.
    /// Returns how many files were removed.
    pub async fn cleanup_old_checkpoints(&self, keep_count: usize) -> Result<usize> {
        let checkpoints = self.list_checkpoints().await?;
        let mut removed = 0;
        for (path, _) in checkpoints.iter().skip(keep_count) {
            if let Err(e) = fs::remove_file(path).await {
                warn!("Failed to remove old checkpoint {:?}: {}", path, e);
            } else {
                info!("Removed old checkpoint: {:?}", path);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Checkpoint files, newest first
    async fn list_checkpoints(&self) -> Result<Vec<(PathBuf, i64)>> {
        if !self.checkpoint_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.checkpoint_dir)
            .await
            .map_err(Error::Io)?;
        let mut checkpoints = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(Error::Io)? {
            let path = entry.path();
            if let Some(timestamp) = checkpoint_timestamp(&path) {
                checkpoints.push((path, timestamp));
            }
        }

        checkpoints.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(checkpoints)
    }
}

fn checkpoint_timestamp(path: &Path) -> Option<i64> {
    path.file_name()?
        .to_str()?
        .strip_prefix(PREFIX)?
        .strip_suffix(SUFFIX)?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use life_core::{Hyperparams, WorldConfig};
    use life_world::{BasicOrganism, LoadOptions};

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("life-runner-{}", uuid::Uuid::new_v4()))
    }

    fn world() -> World<BasicOrganism> {
        let mut world: World<BasicOrganism> = World::new(
            WorldConfig {
                cols: 40,
                rows: 30,
                ..Default::default()
            },
            Hyperparams::default(),
        )
        .unwrap();
        world.origin_of_life().unwrap();
        world
    }

    #[test]
    fn test_checkpoint_file_names() {
        assert_eq!(checkpoint_timestamp(Path::new("/x/checkpoint_1700.json")), Some(1700));
        assert_eq!(checkpoint_timestamp(Path::new("checkpoint_abc.json")), None);
        assert_eq!(checkpoint_timestamp(Path::new("checkpoint_12.bin")), None);
        assert_eq!(checkpoint_timestamp(Path::new("snapshot_12.json")), None);
    }

    #[tokio::test]
    async fn test_restore_latest_without_checkpoints() {
        let manager = CheckpointManager::new(temp_dir());
        assert!(matches!(manager.restore_latest().await, Err(Error::NotFound(_))));
        assert_eq!(manager.cleanup_old_checkpoints(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_checkpoint_round_trip_and_cleanup() {
        let dir = temp_dir();
        let manager = CheckpointManager::new(&dir);
        let mut world = world();

        manager.create_checkpoint(&mut world).await.unwrap();
        for _ in 0..5 {
            world.tick().unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        manager.create_checkpoint(&mut world).await.unwrap();

        let checkpoint = manager.restore_latest().await.unwrap();
        assert_eq!(checkpoint.tick, 5);

        let mut restored = World::<BasicOrganism>::new(WorldConfig::default(), Hyperparams::default()).unwrap();
        restored
            .load_raw(&checkpoint.snapshot, LoadOptions::default())
            .unwrap();
        assert_eq!(restored.total_ticks(), 5);
        assert_eq!(restored.population(), world.population());

        assert_eq!(manager.cleanup_old_checkpoints(1).await.unwrap(), 1);
        assert_eq!(manager.list_checkpoints().await.unwrap().len(), 1);
        assert_eq!(manager.restore_latest().await.unwrap().tick, 5);

        fs::remove_dir_all(&dir).await.ok();
    }
}
