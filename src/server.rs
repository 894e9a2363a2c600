//! HTTP API exposing cached weather as JSON
//!
//! Routes:
//! - `GET /api/v1/current?city=<name>`
//! - `GET /api/v1/hourly?city=<name>&hours=<n>` (`hours` defaults to 6, 0 or less = all)
//!
//! Cached payloads are returned unchanged apart from truncating the hourly
//! series. Every request is logged with its status and duration. On Ctrl+C or
//! SIGTERM the server drains, then all background refresh tasks are stopped.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;

use crate::app::WeatherApp;
use crate::data::{CurrentWeather, HourlyForecast, WeatherError};
use crate::log::Logger;
use crate::{log_error, log_info};

/// Hourly rows returned when the request does not say
pub const DEFAULT_API_HOURS: usize = 6;

#[derive(Clone)]
struct ServerState {
    app: Arc<WeatherApp>,
    logger: Arc<dyn Logger>,
}

#[derive(Debug, Deserialize)]
struct ForecastQuery {
    city: Option<String>,
    hours: Option<String>,
}

impl ForecastQuery {
    fn city(&self) -> Result<&str, ApiError> {
        self.city
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(ApiError::MissingCity)
    }

    /// Zero or negative means every hour; unparseable values fall back to
    /// the default, like a missing one
    fn hours(&self) -> usize {
        match self.hours.as_deref().map(|h| h.trim().parse::<i64>()) {
            Some(Ok(n)) if n <= 0 => 0,
            Some(Ok(n)) => usize::try_from(n).unwrap_or(usize::MAX),
            Some(Err(_)) | None => DEFAULT_API_HOURS,
        }
    }
}

/// Errors turned into HTTP responses
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing 'city' parameter")]
    MissingCity,

    #[error(transparent)]
    Weather(#[from] WeatherError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingCity => StatusCode::BAD_REQUEST,
            ApiError::Weather(WeatherError::CityNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Weather(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

/// Builds the API router around a shared [`WeatherApp`]
pub fn router(app: Arc<WeatherApp>, logger: Arc<dyn Logger>) -> Router {
    let state = ServerState { app, logger };
    Router::new()
        .route("/api/v1/current", get(current_handler))
        .route("/api/v1/hourly", get(hourly_handler))
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

async fn current_handler(
    State(state): State<ServerState>,
    Query(query): Query<ForecastQuery>,
) -> Result<Json<CurrentWeather>, ApiError> {
    let city = query.city()?;
    let weather = state.app.current(city).await?;
    Ok(Json(weather))
}

async fn hourly_handler(
    State(state): State<ServerState>,
    Query(query): Query<ForecastQuery>,
) -> Result<Json<HourlyForecast>, ApiError> {
    let city = query.city()?;
    let forecast = state.app.hourly(city).await?;
    Ok(Json(forecast.truncated(query.hours())))
}

async fn log_requests(State(state): State<ServerState>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    log_info!(
        state.logger,
        "HTTP request method={} path={} status={} duration_ms={}",
        method,
        path,
        response.status().as_u16(),
        start.elapsed().as_millis()
    );
    response
}

/// Binds `0.0.0.0:<port>` and serves until Ctrl+C or SIGTERM
pub async fn serve(app: Arc<WeatherApp>, port: u16, logger: Arc<dyn Logger>) -> io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    let signal_logger = Arc::clone(&logger);
    run(listener, app, logger, shutdown_signal(signal_logger)).await
}

/// Serves on `listener` until `shutdown` resolves, then stops background refresh
pub async fn run<F>(
    listener: TcpListener,
    app: Arc<WeatherApp>,
    logger: Arc<dyn Logger>,
    shutdown: F,
) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let address = listener.local_addr()?;
    log_info!(logger, "Starting HTTP server address={}", address);

    let result = axum::serve(listener, router(Arc::clone(&app), Arc::clone(&logger)))
        .with_graceful_shutdown(shutdown)
        .await;

    app.shutdown();
    match &result {
        Ok(()) => log_info!(logger, "Server stopped gracefully"),
        Err(e) => log_error!(logger, "Server stopped with error: {}", e),
    }
    result
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM
async fn shutdown_signal(logger: Arc<dyn Logger>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log_error!(logger, "Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log_error!(logger, "Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    log_info!(logger, "Shutdown signal received, shutting down server");
}
