//! Open-Meteo forecast API client
//!
//! Fetches current conditions and the one-day hourly series for a pair of
//! coordinates. Every request goes through [`retry_with_backoff`]; a response
//! is only a success when the transport succeeds *and* the status is 200.
//! Decoding happens after the retry loop, so malformed bodies are never retried.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::{CurrentWeather, HourlyForecast};
use crate::log::Logger;
use crate::retry::{retry_with_backoff, BackoffPolicy, RetryError, Retryable};
use crate::{log_error, log_info};

/// Base URL for the Open-Meteo forecast API
pub const OPEN_METEO_FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Variables requested for both the current reading and the hourly series
const FIELDS: &str =
    "temperature_2m,relative_humidity_2m,windspeed_10m,winddirection_10m,weathercode,surface_pressure";

const REQUEST_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = concat!("meteo/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur when talking to the Open-Meteo APIs
#[derive(Debug, Error)]
pub enum WeatherError {
    /// Transport-level failure (connect, timeout, reset)
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider answered with something other than 200 OK
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// The response body did not match the expected shape
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Every attempt failed; holds the final attempt's error
    #[error("all retries failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<WeatherError>,
    },

    /// The geocoder returned no match for the place name
    #[error("no coordinates found for '{0}'")]
    CityNotFound(String),
}

impl Retryable for WeatherError {
    fn is_retryable(&self) -> bool {
        match self {
            WeatherError::Request(_) => true,
            // Anything but 200 counts as a failed attempt
            WeatherError::Status(_) => true,
            _ => false,
        }
    }
}

impl From<RetryError<WeatherError>> for WeatherError {
    fn from(err: RetryError<WeatherError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, last } => WeatherError::RetriesExhausted {
                attempts,
                source: Box::new(last),
            },
            RetryError::Aborted { error, .. } => error,
        }
    }
}

/// Builds the shared HTTP client with a request timeout and user agent
pub(crate) fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// GETs `url` with `query`, retrying transient failures, and decodes the JSON body.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    query: &[(&str, String)],
    policy: &BackoffPolicy,
    logger: &dyn Logger,
) -> Result<T, WeatherError> {
    let body = retry_with_backoff(policy, logger, url, || async move {
        let response = client.get(url).query(query).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(WeatherError::Status(status.as_u16()));
        }
        Ok(response.text().await?)
    })
    .await?;

    serde_json::from_str(&body).map_err(|e| {
        log_error!(logger, "JSON decode failed for {}: {}", url, e);
        WeatherError::Decode(e)
    })
}

/// Client for fetching forecasts from the Open-Meteo API
#[derive(Clone)]
pub struct WeatherClient {
    client: Client,
    base_url: String,
    policy: BackoffPolicy,
    logger: Arc<dyn Logger>,
}

impl WeatherClient {
    /// Create a new WeatherClient against the public Open-Meteo endpoint
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            client: http_client(),
            base_url: OPEN_METEO_FORECAST_URL.to_string(),
            policy: BackoffPolicy::default(),
            logger,
        }
    }

    /// Point the client at a different forecast endpoint (full URL, not just host)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Replace the retry policy used for every request
    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fetch current conditions for the given coordinates
    ///
    /// # Returns
    /// * `Ok(CurrentWeather)` - the decoded reading
    /// * `Err(WeatherError)` - transport/status failure after retries, or a decode failure
    pub async fn fetch_current(&self, lat: f64, lon: f64) -> Result<CurrentWeather, WeatherError> {
        log_info!(self.logger, "Requesting current weather lat={:.4} lon={:.4}", lat, lon);

        let query = [
            ("latitude", format!("{:.4}", lat)),
            ("longitude", format!("{:.4}", lon)),
            ("current", FIELDS.to_string()),
        ];
        let weather: CurrentWeather =
            get_json(&self.client, &self.base_url, &query, &self.policy, self.logger.as_ref())
                .await?;

        log_info!(
            self.logger,
            "Weather data retrieved temperature={} wind={} pressure={} humidity={}",
            weather.current.temperature,
            weather.current.wind_speed,
            weather.current.pressure,
            weather.current.humidity
        );
        Ok(weather)
    }

    /// Fetch the one-day hourly forecast for the given coordinates
    pub async fn fetch_hourly(&self, lat: f64, lon: f64) -> Result<HourlyForecast, WeatherError> {
        log_info!(self.logger, "Requesting hourly forecast lat={:.4} lon={:.4}", lat, lon);

        let query = [
            ("latitude", format!("{:.4}", lat)),
            ("longitude", format!("{:.4}", lon)),
            ("hourly", FIELDS.to_string()),
            ("forecast_days", "1".to_string()),
        ];
        let forecast: HourlyForecast =
            get_json(&self.client, &self.base_url, &query, &self.policy, self.logger.as_ref())
                .await?;

        log_info!(self.logger, "Hourly data retrieved records={}", forecast.len());
        Ok(forecast)
    }
}
