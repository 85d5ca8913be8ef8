//! Configuration for the Lodestone world engine.
//!
//! Settings persist to disk as `config.ron` and can be overridden from the
//! command line. Unknown and missing fields are tolerated so config files
//! survive upgrades in both directions.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    CONFIG_FILE_NAME, Config, DebugConfig, LoaderSettings, MAX_VIEW_DISTANCE, ProviderSettings,
    WorldConfig, default_config_dir,
};
pub use error::ConfigError;
