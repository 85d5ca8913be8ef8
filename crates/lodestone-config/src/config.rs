//! Configuration sections with defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name of the persisted config inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.ron";

/// Largest accepted `loader.view_distance`.
pub const MAX_VIEW_DISTANCE: u32 = 64;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub world: WorldConfig,
    /// Chunk provider sizing.
    pub provider: ProviderSettings,
    /// Per-observer chunk streaming.
    pub loader: LoaderSettings,
    pub debug: DebugConfig,
}

/// Where the world lives and how missing chunks are produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldConfig {
    /// Root data directory. Region files go to `<data_dir>/<dimension>/region`.
    pub data_dir: PathBuf,
    /// Name of a registered generator, e.g. "Flat".
    pub generator: String,
    /// Dimension name, also its directory name under `data_dir`.
    pub dimension: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderSettings {
    /// Bound of the chunk request queue. Requests beyond it are rejected.
    pub queue_capacity: usize,
    /// Resolver threads. 0 picks one fewer than the CPU count, at least 1.
    pub worker_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoaderSettings {
    /// Radius of the loaded disc around each observer, in chunks.
    pub view_distance: u32,
    /// Loads dispatched (and unloads performed) per tick.
    pub chunks_per_tick: usize,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log filter (e.g. "debug", "info,lodestone_world=trace"). RUST_LOG wins.
    pub log_level: String,
    /// Directory for the JSON log file in debug builds. Defaults to
    /// `<config dir>/logs`.
    pub log_dir: Option<PathBuf>,
}

// --- Default implementations ---

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("worlds/world"),
            generator: "Flat".to_string(),
            dimension: "overworld".to_string(),
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            worker_threads: 0,
        }
    }
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            view_distance: 8,
            chunks_per_tick: 16,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

/// Platform config directory for Lodestone, if the platform has one.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("lodestone"))
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            let config = Self::read(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(|source| ConfigError::WriteError {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(|source| ConfigError::WriteError {
            path: config_path.clone(),
            source,
        })
    }

    /// Re-reads `config.ron`. Returns `Some(new_config)` if it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = Self::read(&config_dir.join(CONFIG_FILE_NAME))?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Rejects values that parse but cannot drive a provider or loader.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "provider.queue_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.loader.view_distance > MAX_VIEW_DISTANCE {
            return Err(ConfigError::InvalidValue {
                field: "loader.view_distance",
                reason: format!("must be at most {MAX_VIEW_DISTANCE}"),
            });
        }
        if self.loader.chunks_per_tick == 0 {
            return Err(ConfigError::InvalidValue {
                field: "loader.chunks_per_tick",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.world.generator.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "world.generator",
                reason: "must name a registered generator".to_string(),
            });
        }
        Ok(())
    }

    /// Region directory of the configured dimension.
    pub fn region_dir(&self) -> PathBuf {
        self.world.data_dir.join(&self.world.dimension).join("region")
    }

    fn read(config_path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(config_path).map_err(|source| ConfigError::ReadError {
                path: config_path.to_path_buf(),
                source,
            })?;
        ron::from_str(&contents).map_err(ConfigError::ParseError)
    }
}
