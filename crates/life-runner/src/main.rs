//! Headless runner for the cellular life world.

mod checkpoint;
mod telemetry;

use anyhow::{Context, Result};
use checkpoint::CheckpointManager;
use clap::Parser;
use life_core::{Error, Hyperparams, RunnerConfig, WorldConfig};
use life_world::{ControlAction, EnvironmentController, LoadOptions, World, WorldSnapshot};
use std::path::PathBuf;
use tokio::signal;
use tracing::{debug, error, info};

#[derive(Debug, Parser)]
#[command(name = "life-runner", about = "Run a cellular life world without a display")]
struct Args {
    /// Number of ticks to run
    #[arg(long, default_value_t = 10_000)]
    ticks: u64,

    /// Grid columns
    #[arg(long, default_value_t = 200)]
    cols: i32,

    /// Grid rows
    #[arg(long, default_value_t = 120)]
    rows: i32,

    #[arg(long, default_value_t = 5)]
    cell_size: u32,

    /// Random seed
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Snapshot to start from instead of a fresh world
    #[arg(long)]
    load: Option<PathBuf>,

    /// Use the hyperparameters stored in the loaded snapshot
    #[arg(long)]
    override_controls: bool,

    /// Hyperparameters as JSON
    #[arg(long)]
    controls: Option<PathBuf>,

    /// Write a snapshot here when the run ends
    #[arg(long)]
    save: Option<PathBuf>,

    #[arg(long, default_value = "./data/checkpoints")]
    checkpoint_dir: String,

    /// Ticks between checkpoints (0 disables them)
    #[arg(long, default_value_t = 0)]
    checkpoint_every: u64,

    #[arg(long, default_value_t = 5)]
    keep_checkpoints: usize,

    /// Start from the newest checkpoint when no snapshot is given
    #[arg(long)]
    resume: bool,

    /// Ticks between population log lines
    #[arg(long, default_value_t = 1000)]
    log_every: u64,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn world_config(&self) -> WorldConfig {
        WorldConfig {
            cols: self.cols,
            rows: self.rows,
            cell_size: self.cell_size,
            seed: self.seed,
            headless: true,
            ..Default::default()
        }
    }

    fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            num_ticks: self.ticks,
            checkpoint_dir: self.checkpoint_dir.clone(),
            checkpoint_every: self.checkpoint_every,
            keep_checkpoints: self.keep_checkpoints,
            log_every: self.log_every,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init_telemetry(args.log_json)?;

    info!("Starting life runner");

    let params = match &args.controls {
        Some(path) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read controls: {:?}", path))?;
            Hyperparams::load_json(&json).context("invalid controls")?
        }
        None => Hyperparams::default(),
    };
    let runner = args.runner_config();
    let checkpoints = CheckpointManager::new(runner.checkpoint_dir.clone());

    let mut world: World = World::new(args.world_config(), params)?;
    let options = LoadOptions {
        override_controls: args.override_controls,
    };
    if let Some(path) = &args.load {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read snapshot: {:?}", path))?;
        let snapshot = WorldSnapshot::from_json(&json)?;
        world
            .load_raw(&snapshot, options)
            .with_context(|| format!("failed to load snapshot: {:?}", path))?;
    } else if args.resume {
        match checkpoints.restore_latest().await {
            Ok(checkpoint) => world.load_raw(&checkpoint.snapshot, options)?,
            Err(Error::NotFound(_)) => {
                info!("Nothing to resume, starting a fresh world");
                world.origin_of_life()?;
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        world.origin_of_life()?;
    }

    info!(
        cols = world.grid().cols,
        rows = world.grid().rows,
        population = world.population(),
        ticks = runner.num_ticks,
        "World ready"
    );

    let mut controller = EnvironmentController::new();
    let result = tokio::select! {
        result = run(&mut world, &mut controller, &checkpoints, &runner) => result,
        _ = shutdown_signal() => {
            info!("Stopping before the last tick");
            Ok(())
        }
    };
    if let Err(e) = &result {
        error!("Run failed: {:#}", e);
    }

    if let Some(path) = &args.save {
        let snapshot = world.serialize()?;
        tokio::fs::write(path, snapshot.to_json_pretty()?)
            .await
            .with_context(|| format!("failed to write snapshot: {:?}", path))?;
        info!(path = ?path, organisms = snapshot.organisms.len(), "Snapshot saved");
    }

    info!(
        total_ticks = world.total_ticks(),
        population = world.population(),
        resets = world.reset_count(),
        "Shutting down life runner"
    );
    result
}

async fn run(
    world: &mut World,
    controller: &mut EnvironmentController,
    checkpoints: &CheckpointManager,
    config: &RunnerConfig,
) -> Result<()> {
    for step in 1..=config.num_ticks {
        world.tick()?;
        // Headless: nothing consumes the batch
        world.drain_render();

        if controller.handle_events(world)? == ControlAction::Pause {
            info!(step, "Run paused by extinction");
            break;
        }

        if config.log_every > 0 && step % config.log_every == 0 {
            info!(
                step,
                tick = world.total_ticks(),
                population = world.population(),
                species = world.fossil().extant_count(),
                extinct_species = world.fossil().extinct_count(),
                average_mutability = world.average_mutability(),
                largest_cell_count = world.largest_cell_count(),
                resets = world.reset_count(),
                "Progress"
            );
        }

        if config.checkpoint_every > 0 && step % config.checkpoint_every == 0 {
            match checkpoints.create_checkpoint(world).await {
                Ok(path) => debug!(path = ?path, "Checkpoint written"),
                Err(e) => error!("Failed to create checkpoint: {}", e),
            }
            if let Err(e) = checkpoints
                .cleanup_old_checkpoints(config.keep_checkpoints)
                .await
            {
                error!("Failed to clean up checkpoints: {}", e);
            }
        }

        // Let the shutdown signal through between ticks
        tokio::task::yield_now().await;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
