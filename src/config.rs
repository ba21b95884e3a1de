use serde::{Deserialize, Serialize};

use crate::logic::path_resolver::TraversalOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

/// Representations the deployment declares support for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerModes {
    pub classic: bool,
    pub graph: bool,
}

impl ServerModes {
    pub fn is_dual(&self) -> bool {
        self.classic && self.graph
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub modes: ServerModes,
    pub allow_circular: bool,
    pub max_path_steps: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerModes {
    fn default() -> Self {
        Self {
            classic: true,
            graph: true,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            modes: ServerModes::default(),
            allow_circular: true,
            max_path_steps: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn traversal(&self) -> TraversalOptions {
        TraversalOptions {
            allow_circular: self.allow_circular,
            max_steps: self.max_path_steps,
        }
    }

    pub fn with_modes(mut self, classic: bool, graph: bool) -> Self {
        self.modes = ServerModes { classic, graph };
        self
    }
}

impl AppConfig {
    /// Load configuration from environment variables and config file
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        // Add default configuration
        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        // Add config file if it exists
        config = config.add_source(config::File::with_name("config").required(false));

        // Add environment variables with prefix "VGE_", e.g. VGE_ENGINE__MAX_PATH_STEPS=50
        config = config.add_source(
            config::Environment::with_prefix("VGE")
                .separator("__")
                .prefix_separator("_")
                .try_parsing(true),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.logging
            .level
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_declare_both_modes() {
        let config = AppConfig::default();
        assert!(config.engine.modes.is_dual());
        assert_eq!(config.engine.traversal(), TraversalOptions::bounded(1000));
        assert_eq!(config.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn test_unknown_log_level_falls_back_to_info() {
        let mut config = AppConfig::default();
        config.logging.level = "chatty".to_string();
        assert_eq!(config.log_level(), log::LevelFilter::Info);
        config.logging.level = "debug".to_string();
        assert_eq!(config.log_level(), log::LevelFilter::Debug);
    }
}
