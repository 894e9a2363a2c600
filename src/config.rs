//! Layered settings
//!
//! Sources, lowest priority first:
//! 1. built-in defaults ([`Settings::default`])
//! 2. `config.toml` in the user config directory (`~/.config/meteo/` on Linux)
//! 3. `config.toml` in the working directory
//! 4. `METEO_*` environment variables, e.g. `METEO_CITY=rome`, `METEO_HOURS=12`
//!
//! Command-line flags are applied on top by [`crate::cli`].

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use config::{Config, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::geocode::OPEN_METEO_GEOCODING_URL;
use crate::data::weather::OPEN_METEO_FORECAST_URL;
use crate::retry::{BackoffPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS};

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "METEO";

/// File name looked up in the user config directory and the working directory
pub const CONFIG_FILE: &str = "config.toml";

const DEFAULT_CONFIG: &str = r#"# meteo configuration file
# Any value can be overridden with an environment variable, e.g.:
#   export METEO_CITY=rome
#   export METEO_HOURS=12

city = "belgrade"
hours = 6
emoji = true
color = "auto"            # auto | dark | light | none
verbose = false
forecast_mode = "hourly"  # current | hourly | both
timezone = "local"        # local | utc | IANA name, e.g. "Europe/Belgrade"

cache_ttl_secs = 600
both_timeout_secs = 10
retry_attempts = 3
retry_base_delay_ms = 1000
port = 8080
"#;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid setting {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Dark theme when the terminal supports colour, otherwise none
    #[default]
    Auto,
    Dark,
    Light,
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ForecastMode {
    Current,
    #[default]
    Hourly,
    Both,
}

/// Zone hourly timestamps are shown in: `local`, `utc` or an IANA name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeZoneMode {
    #[default]
    Local,
    Utc,
    Named(Tz),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown time zone '{0}' (expected local, utc or an IANA name such as Europe/Belgrade)")]
pub struct UnknownTimeZone(pub String);

impl FromStr for TimeZoneMode {
    type Err = UnknownTimeZone;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("local") {
            return Ok(TimeZoneMode::Local);
        }
        if raw.eq_ignore_ascii_case("utc") {
            return Ok(TimeZoneMode::Utc);
        }
        raw.parse::<Tz>()
            .map(TimeZoneMode::Named)
            .map_err(|_| UnknownTimeZone(raw.to_string()))
    }
}

impl TryFrom<String> for TimeZoneMode {
    type Error = UnknownTimeZone;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<TimeZoneMode> for String {
    fn from(zone: TimeZoneMode) -> Self {
        zone.to_string()
    }
}

impl fmt::Display for TimeZoneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeZoneMode::Local => f.write_str("local"),
            TimeZoneMode::Utc => f.write_str("utc"),
            TimeZoneMode::Named(tz) => f.write_str(tz.name()),
        }
    }
}

/// Every configurable value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub city: String,
    /// Hourly rows to show; 0 shows the whole day
    pub hours: usize,
    pub emoji: bool,
    pub color: ColorMode,
    pub verbose: bool,
    /// Mode used when no subcommand is given
    pub forecast_mode: ForecastMode,
    pub timezone: TimeZoneMode,
    pub cache_ttl_secs: u64,
    pub both_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub port: u16,
    pub forecast_url: String,
    pub geocoding_url: String,
    /// Overrides the per-user cache directory
    pub cache_dir: Option<PathBuf>,
    /// Overrides `<cache_dir>/logs`
    pub log_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            city: "belgrade".to_string(),
            hours: 6,
            emoji: true,
            color: ColorMode::Auto,
            verbose: false,
            forecast_mode: ForecastMode::Hourly,
            timezone: TimeZoneMode::Local,
            cache_ttl_secs: 600,
            both_timeout_secs: 10,
            retry_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_BASE_DELAY_MS,
            port: 8080,
            forecast_url: OPEN_METEO_FORECAST_URL.to_string(),
            geocoding_url: OPEN_METEO_GEOCODING_URL.to_string(),
            cache_dir: None,
            log_path: None,
        }
    }
}

impl Settings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn both_timeout(&self) -> Duration {
        Duration::from_secs(self.both_timeout_secs)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    /// Resolved cache directory: the override, else the per-user cache dir
    pub fn resolved_cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir.clone().or_else(crate::cache::default_cache_dir)
    }

    /// Resolved log directory: the override, else `<cache_dir>/logs`
    pub fn resolved_log_dir(&self) -> Option<PathBuf> {
        self.log_path
            .clone()
            .or_else(|| self.resolved_cache_dir().map(|dir| dir.join("logs")))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.city.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "city",
                message: "must not be empty".to_string(),
            });
        }
        if self.cache_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "cache_ttl_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.both_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "both_timeout_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry_attempts",
                message: "at least one attempt is required".to_string(),
            });
        }
        Ok(())
    }
}

/// Per-user config directory for this application
pub fn default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "meteo").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Loads [`Settings`] from files and the environment
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    user_file: Option<PathBuf>,
    local_file: PathBuf,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            user_file: default_config_dir().map(|dir| dir.join(CONFIG_FILE)),
            local_file: PathBuf::from(CONFIG_FILE),
            env_prefix: ENV_PREFIX.to_string(),
        }
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses explicit file locations instead of the per-user and working directories
    pub fn with_files(mut self, user_file: Option<PathBuf>, local_file: PathBuf) -> Self {
        self.user_file = user_file;
        self.local_file = local_file;
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn user_file(&self) -> Option<&Path> {
        self.user_file.as_deref()
    }

    /// Builds the layered configuration and validates it
    pub fn load(&self) -> Result<Settings, ConfigError> {
        let mut builder = Config::builder();
        if let Some(user_file) = &self.user_file {
            builder = builder.add_source(File::from(user_file.as_path()).format(FileFormat::Toml).required(false));
        }
        builder = builder
            .add_source(File::from(self.local_file.as_path()).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .prefix_separator("_")
                    .ignore_empty(true)
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Writes a commented default config to the user config directory if none exists.
    ///
    /// # Returns
    /// * `Ok(Some(path))` - a new file was written
    /// * `Ok(None)` - a file already exists, or there is no user config directory
    pub fn ensure_default_file(&self) -> Result<Option<PathBuf>, ConfigError> {
        let Some(path) = &self.user_file else {
            return Ok(None);
        };
        if path.exists() {
            return Ok(None);
        }
        let io_err = |source| ConfigError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, DEFAULT_CONFIG).map_err(io_err)?;
        Ok(Some(path.clone()))
    }
}
