//! Config loader: assembles the layered sources into an [`AtelierConfig`].

use super::{merge, sources, AtelierConfig};
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    ///
    /// Precedence (lowest to highest): defaults, global file, workspace
    /// `config/config.toml`, workspace `config/{ATELIER_ENV}.toml`, environment.
    pub fn load(workspace_root: &Path) -> Result<AtelierConfig, config::ConfigError> {
        let builder = merge::builder_with_defaults()?;
        let builder = sources::global_file::add_to_builder(builder)?;
        let builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        let config = builder.add_source(Self::environment()).build()?;
        let loaded: AtelierConfig = config.try_deserialize()?;
        debug!(
            workspace_root = %workspace_root.display(),
            providers = loaded.providers.len(),
            "Loaded configuration"
        );
        Ok(loaded)
    }

    /// Load a single file on top of the defaults, then the environment.
    pub fn load_from_file(path: &Path) -> Result<AtelierConfig, config::ConfigError> {
        let config = merge::builder_with_defaults()?
            .add_source(File::from(path.to_path_buf()).required(true))
            .add_source(Self::environment())
            .build()?;
        config.try_deserialize()
    }

    /// Path of the global config file, if a home or XDG directory is known.
    pub fn xdg_config_path() -> Option<PathBuf> {
        sources::global_file::global_config_path()
    }

    /// Built-in defaults only.
    pub fn default_config() -> AtelierConfig {
        AtelierConfig::default()
    }

    fn environment() -> Environment {
        Environment::with_prefix("ATELIER")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }
}
