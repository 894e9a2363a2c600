//! meteo - current and hourly weather from Open-Meteo in the terminal
//!
//! Forecasts are cached on disk for the configured TTL and kept warm in the
//! background. `meteo serve` exposes the same data over HTTP.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use meteo::app::WeatherApp;
use meteo::cli::{Cli, Invocation, RunMode};
use meteo::config::{ConfigLoader, Settings};
use meteo::data::ResourceKind;
use meteo::log::{init_file_logging, Logger, TracingLogger};
use meteo::render::{render_current, render_hourly, render_unavailable, Theme};
use meteo::server;

/// Runs the selected mode to completion
async fn run(mode: RunMode, settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let logger: Arc<dyn Logger> = Arc::new(TracingLogger::new());
    let app = Arc::new(WeatherApp::from_settings(&settings, Arc::clone(&logger)));
    let theme = Theme::new(settings.color, settings.emoji);
    let city = settings.city.as_str();

    match mode {
        RunMode::Current => {
            let weather = app.current(city).await?;
            println!("\n{}", render_current(&weather, city, &theme));
        }
        RunMode::Hourly => {
            let forecast = app.hourly(city).await?;
            let table = render_hourly(
                &forecast,
                city,
                settings.hours,
                settings.timezone,
                &theme,
                logger.as_ref(),
            );
            println!("\n{}", table);
        }
        RunMode::Both => {
            let both = app.both(city, settings.both_timeout()).await?;
            let place = both.coordinates.name.as_str();
            match &both.current {
                Some(weather) => println!("\n{}", render_current(weather, place, &theme)),
                None => println!("\n{}", render_unavailable(ResourceKind::Current, &theme)),
            }
            match &both.hourly {
                Some(forecast) => println!(
                    "\n{}",
                    render_hourly(
                        forecast,
                        place,
                        settings.hours,
                        settings.timezone,
                        &theme,
                        logger.as_ref()
                    )
                ),
                None => println!("\n{}", render_unavailable(ResourceKind::Hourly, &theme)),
            }
        }
        RunMode::Serve => {
            println!("Serving weather API on http://localhost:{}", settings.port);
            println!("  /api/v1/current?city={}", city);
            println!("  /api/v1/hourly?city={}&hours={}", city, settings.hours);
            server::serve(Arc::clone(&app), settings.port, Arc::clone(&logger)).await?;
        }
    }

    app.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loader = ConfigLoader::new();
    match loader.ensure_default_file() {
        Ok(Some(path)) => eprintln!("Created default config at {}", path.display()),
        Ok(None) => {}
        Err(e) => eprintln!("Warning: {}", e),
    }

    let invocation = match loader
        .load()
        .map_err(|e| e.to_string())
        .and_then(|settings| Invocation::from_cli(&cli, settings).map_err(|e| e.to_string()))
    {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = invocation.settings.resolved_log_dir().and_then(|log_dir| {
        init_file_logging(&log_dir, invocation.settings.verbose)
            .map_err(|e| eprintln!("Warning: file logging disabled: {}", e))
            .ok()
    });

    match run(invocation.mode, invocation.settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
