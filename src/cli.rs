//! Command-line interface parsing for meteo
//!
//! Subcommands pick what to show (`current`, `hourly`, `both`) or start the
//! HTTP API (`serve`). Global flags override the loaded [`Settings`]; with no
//! subcommand the configured `forecast_mode` decides.

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::config::{ColorMode, ForecastMode, Settings, TimeZoneMode};

/// Error types for CLI argument handling
#[derive(Debug, Error)]
pub enum CliError {
    /// `--city` was given but is blank
    #[error("City name must not be empty")]
    EmptyCity,

    /// `--timeout` of zero would give up before any fetch could start
    #[error("Timeout must be at least one second")]
    ZeroTimeout,
}

/// meteo - command-line weather client powered by Open-Meteo
#[derive(Parser, Debug)]
#[command(name = "meteo")]
#[command(about = "Command-line weather client powered by Open-Meteo")]
#[command(long_about = "Retrieves and caches current and hourly forecasts using the \
Open-Meteo public API.\n\nExamples:\n  meteo current --city belgrade\n  \
meteo hourly --city belgrade --hours 6\n  meteo serve --port 8080")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// City name
    #[arg(short, long, global = true)]
    pub city: Option<String>,

    /// Number of hourly rows to display (0 = whole day)
    #[arg(long, global = true)]
    pub hours: Option<usize>,

    /// Colour theme
    #[arg(long, global = true, value_enum)]
    pub color: Option<ColorMode>,

    /// Show emoji next to weather conditions
    #[arg(long, global = true, value_name = "BOOL")]
    pub emoji: Option<bool>,

    /// Time zone for hourly timestamps: local, utc or an IANA name
    #[arg(long, global = true, value_name = "ZONE")]
    pub timezone: Option<TimeZoneMode>,

    /// Verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Display current weather for a city
    Current,
    /// Display the hourly forecast for a city
    Hourly,
    /// Display both current and hourly forecasts, fetched concurrently
    Both {
        /// Seconds to wait for both fetches before showing what arrived
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },
    /// Start a local HTTP API serving cached weather as JSON
    Serve {
        /// Port number to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
}

/// What the binary should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Current,
    Hourly,
    Both,
    Serve,
}

impl From<ForecastMode> for RunMode {
    fn from(mode: ForecastMode) -> Self {
        match mode {
            ForecastMode::Current => RunMode::Current,
            ForecastMode::Hourly => RunMode::Hourly,
            ForecastMode::Both => RunMode::Both,
        }
    }
}

/// Settings with command-line overrides applied, plus the chosen mode
#[derive(Debug, Clone)]
pub struct Invocation {
    pub mode: RunMode,
    pub settings: Settings,
}

impl Invocation {
    /// Applies `cli` on top of `settings`.
    ///
    /// # Returns
    /// * `Ok(Invocation)` with flags taking priority over file and environment values
    /// * `Err(CliError)` if a flag value is unusable
    pub fn from_cli(cli: &Cli, mut settings: Settings) -> Result<Self, CliError> {
        if let Some(city) = &cli.city {
            if city.trim().is_empty() {
                return Err(CliError::EmptyCity);
            }
            settings.city = city.trim().to_string();
        }
        if let Some(hours) = cli.hours {
            settings.hours = hours;
        }
        if let Some(color) = cli.color {
            settings.color = color;
        }
        if let Some(emoji) = cli.emoji {
            settings.emoji = emoji;
        }
        if let Some(timezone) = cli.timezone {
            settings.timezone = timezone;
        }
        if cli.verbose {
            settings.verbose = true;
        }

        let mode = match &cli.command {
            None => RunMode::from(settings.forecast_mode),
            Some(Command::Current) => RunMode::Current,
            Some(Command::Hourly) => RunMode::Hourly,
            Some(Command::Both { timeout }) => {
                match timeout {
                    Some(0) => return Err(CliError::ZeroTimeout),
                    Some(secs) => settings.both_timeout_secs = *secs,
                    None => {}
                }
                RunMode::Both
            }
            Some(Command::Serve { port }) => {
                if let Some(port) = port {
                    settings.port = *port;
                }
                RunMode::Serve
            }
        };

        Ok(Self { mode, settings })
    }
}
