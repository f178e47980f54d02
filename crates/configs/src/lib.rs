//! # binder-configs
//!
//! Layered settings for the binder tools and the tracing setup that goes
//! with them. Sources, later ones winning:
//!
//! 1. built-in defaults
//! 2. `config/binders.{toml,yaml,json}` when present
//! 3. environment variables such as `BINDERS__ENGINE__STRUCTURED_DOCS=true`,
//!    after a `.env` file (if any) has been loaded into the environment

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

pub const ENV_PREFIX: &str = "BINDERS";
pub const CONFIG_FILE: &str = "config/binders";
/// Overrides the configured level with a full filter directive.
pub const LOG_FILTER_VAR: &str = "BINDERS_LOG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerCheckMode {
    #[default]
    Warn,
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineSettings {
    pub structured_docs: bool,
    pub marker_check: MarkerCheckMode,
    pub bump_content_version: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub engine: EngineSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Loads `.env`, then every layer against the real environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        Self::layered(CONFIG_FILE, environment())
    }

    /// All layers with an explicit file stem and environment source.
    pub fn layered(file: &str, env: Environment) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .set_default("engine.structured_docs", false)?
            .set_default("engine.marker_check", "warn")?
            .set_default("engine.bump_content_version", true)?
            .set_default("log.level", "info")?
            .set_default("log.json", false)?
            .add_source(File::with_name(file).required(false))
            .add_source(env)
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.log.level_filter().map(|_| ())
    }
}

/// `BINDERS__SECTION__KEY` variables.
pub fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

impl LogSettings {
    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        self.level.parse::<LevelFilter>().map_err(|_| ConfigError::Invalid {
            key: "log.level",
            reason: format!("'{}' is not one of off, error, warn, info, debug, trace", self.level),
        })
    }
}

/// Installs the global subscriber. `BINDERS_LOG` takes precedence over
/// `log.level`. Logs go to stderr so tool output on stdout stays clean.
pub fn init_tracing(log: &LogSettings) -> Result<(), ConfigError> {
    let filter = EnvFilter::builder()
        .with_default_directive(log.level_filter()?.into())
        .with_env_var(LOG_FILTER_VAR)
        .from_env_lossy();

    let installed = if log.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init()
    };
    installed.map_err(|err| ConfigError::Tracing(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn env_of(vars: &[(&str, &str)]) -> Environment {
        let vars: config::Map<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        environment().source(Some(vars))
    }

    #[test]
    fn defaults_apply_without_any_source() {
        let settings = Settings::layered("does/not/exist", env_of(&[])).unwrap();
        assert_eq!(
            settings,
            Settings {
                engine: EngineSettings {
                    structured_docs: false,
                    marker_check: MarkerCheckMode::Warn,
                    bump_content_version: true,
                },
                log: LogSettings {
                    level: "info".into(),
                    json: false,
                },
            }
        );
    }

    #[test]
    fn environment_overrides_defaults() {
        let settings = Settings::layered(
            "does/not/exist",
            env_of(&[
                ("BINDERS__ENGINE__STRUCTURED_DOCS", "true"),
                ("BINDERS__ENGINE__MARKER_CHECK", "off"),
                ("BINDERS__LOG__JSON", "true"),
            ]),
        )
        .unwrap();
        assert!(settings.engine.structured_docs);
        assert_eq!(settings.engine.marker_check, MarkerCheckMode::Off);
        assert!(settings.log.json);
    }

    #[rstest]
    #[case("loud")]
    #[case("verbose")]
    fn unknown_levels_are_rejected(#[case] level: &str) {
        let result = Settings::layered("does/not/exist", env_of(&[("BINDERS__LOG__LEVEL", level)]));
        assert!(matches!(result, Err(ConfigError::Invalid { key: "log.level", .. })));
    }

    #[test]
    fn unknown_marker_modes_fail_to_load() {
        let result = Settings::layered("does/not/exist", env_of(&[("BINDERS__ENGINE__MARKER_CHECK", "loud")]));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
