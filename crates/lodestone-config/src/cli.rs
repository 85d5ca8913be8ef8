//! Command-line arguments for the Lodestone server.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "lodestone", about = "Lodestone voxel world server")]
pub struct CliArgs {
    /// World data directory.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Generator used for chunks with no stored data.
    #[arg(long)]
    pub generator: Option<String>,

    /// Dimension name.
    #[arg(long)]
    pub dimension: Option<String>,

    /// View distance in chunks.
    #[arg(long)]
    pub view_distance: Option<u32>,

    /// Chunk loads and unloads per tick.
    #[arg(long)]
    pub chunks_per_tick: Option<usize>,

    /// Chunk resolver threads (0 = auto).
    #[arg(long)]
    pub workers: Option<usize>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Number of world ticks to run before saving and exiting.
    #[arg(long, default_value_t = 100)]
    pub ticks: u32,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref dir) = args.data_dir {
            self.world.data_dir = dir.clone();
        }
        if let Some(ref generator) = args.generator {
            self.world.generator = generator.clone();
        }
        if let Some(ref dimension) = args.dimension {
            self.world.dimension = dimension.clone();
        }
        if let Some(distance) = args.view_distance {
            self.loader.view_distance = distance;
        }
        if let Some(per_tick) = args.chunks_per_tick {
            self.loader.chunks_per_tick = per_tick;
        }
        if let Some(workers) = args.workers {
            self.provider.worker_threads = workers;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            generator: Some("Void".to_string()),
            view_distance: Some(4),
            workers: Some(2),
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.world.generator, "Void");
        assert_eq!(config.loader.view_distance, 4);
        assert_eq!(config.provider.worker_threads, 2);
        // Non-overridden fields retain defaults
        assert_eq!(config.world.dimension, "overworld");
        assert_eq!(config.loader.chunks_per_tick, 16);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_parse_flags() {
        let args = CliArgs::parse_from([
            "lodestone",
            "--data-dir",
            "/srv/world",
            "--chunks-per-tick",
            "32",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.data_dir, Some(PathBuf::from("/srv/world")));
        assert_eq!(args.chunks_per_tick, Some(32));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(args.ticks, 100);
    }
}
