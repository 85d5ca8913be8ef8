//! Lodestone server entry point.
//!
//! Loads the config, opens the configured dimension over its region
//! directory, streams the chunks around the world origin for a fixed number
//! of ticks, then saves and closes.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use lodestone_config::{CliArgs, Config, ConfigError, default_config_dir};
use lodestone_voxel::{BlockTable, ChunkPos, SharedChunk};
use lodestone_world::{
    ChunkLoader, ChunkProvider, Dimension, DimensionError, EntityIdAllocator, GeneratorError,
    GeneratorRegistry, LoaderConfig, LoaderListener, ProviderConfig, ProviderError,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// 20 ticks per second.
const TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound on waiting for in-flight loads before the final save.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Dimension(#[from] DimensionError),
}

/// What a run did, for the shutdown log line.
#[derive(Debug, Default)]
struct RunSummary {
    ticks: u32,
    resident: usize,
    saved: usize,
    queue_full_ticks: u32,
}

/// Persists and evicts chunks the loader lets go of. With a single loader
/// nothing else can still be using them.
struct Evictor {
    provider: Arc<ChunkProvider>,
}

impl LoaderListener for Evictor {
    fn on_chunk_loaded(&self, pos: ChunkPos, _chunk: &SharedChunk) {
        debug!(x = pos.x, z = pos.z, "chunk resident");
    }

    fn on_chunk_unloaded(&self, pos: ChunkPos, _chunk: Option<&SharedChunk>) {
        if let Err(err) = self.provider.save_chunk(pos) {
            warn!(x = pos.x, z = pos.z, error = %err, "failed to save chunk on unload");
            return;
        }
        self.provider.unload(pos);
    }
}

fn provider_config(config: &Config) -> ProviderConfig {
    ProviderConfig {
        region_dir: Some(config.region_dir()),
        queue_capacity: config.provider.queue_capacity,
        worker_threads: config.provider.worker_threads,
    }
}

fn loader_config(config: &Config) -> LoaderConfig {
    LoaderConfig {
        view_distance: config.loader.view_distance,
        chunks_per_tick: config.loader.chunks_per_tick,
    }
}

fn run(config: &Config, ticks: u32, tick_interval: Duration) -> Result<RunSummary, ServerError> {
    config.validate()?;
    let generators = GeneratorRegistry::with_defaults();
    let generator = generators.get(&config.world.generator)?;

    let provider = Arc::new(ChunkProvider::new(provider_config(config))?.with_generator(generator));
    info!(
        dimension = %config.world.dimension,
        region_dir = %config.region_dir().display(),
        generator = %config.world.generator,
        workers = provider.worker_count(),
        "opening dimension"
    );

    let dimension = Dimension::new(
        config.world.dimension.clone(),
        Arc::clone(&provider),
        Arc::new(BlockTable::with_defaults()),
        Arc::new(EntityIdAllocator::new()),
    );
    let mut loader = ChunkLoader::new(
        Arc::clone(&provider),
        ChunkPos::ORIGIN,
        loader_config(config),
        Arc::new(Evictor {
            provider: Arc::clone(&provider),
        }),
    );

    let mut summary = RunSummary::default();
    for tick in 0..ticks {
        let started = Instant::now();
        match loader.tick() {
            Ok(result) => debug!(
                tick,
                dispatched = result.dispatched,
                unloaded = result.unloaded,
                pending = result.pending_loads,
                "loader tick"
            ),
            Err(ProviderError::QueueFull { capacity }) => {
                summary.queue_full_ticks += 1;
                warn!(tick, capacity, "chunk queue full, retrying next tick");
            }
            Err(err) => return Err(err.into()),
        }
        dimension.tick();
        summary.ticks += 1;

        if let Some(rest) = tick_interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    let deadline = Instant::now() + SETTLE_TIMEOUT;
    while loader.dispatched_count() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    summary.resident = loader.resident_count();
    summary.saved = dimension.save()?;
    dimension.close()?;

    let stats = provider.stats();
    info!(
        ticks = summary.ticks,
        resident = summary.resident,
        saved = summary.saved,
        generated = stats.generated,
        read = stats.read_from_storage,
        "dimension closed"
    );
    Ok(summary)
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config_dir = args
        .config
        .clone()
        .or_else(default_config_dir)
        .unwrap_or_else(|| PathBuf::from(".lodestone"));

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config
        .debug
        .log_dir
        .clone()
        .unwrap_or_else(|| config_dir.join("logs"));
    lodestone_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    match run(&config, args.ticks, TICK_INTERVAL) {
        Ok(summary) => {
            if summary.queue_full_ticks > 0 {
                warn!(ticks = summary.queue_full_ticks, "chunk queue was full during the run");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "server failed");
            ExitCode::FAILURE
        }
    }
}
