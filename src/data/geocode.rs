//! Place name → coordinates resolution via the Open-Meteo geocoding API.
//!
//! Lookups are kept in a small JSON table (`geocode_cache.json`) next to the
//! forecast cache. Coordinates don't go stale, so entries never expire. A
//! missing or unreadable table just means every city is looked up again.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;

use super::weather::{get_json, http_client, WeatherError};
use super::Coordinates;
use crate::log::Logger;
use crate::retry::BackoffPolicy;
use crate::{log_debug, log_info, log_warn};

/// Base URL for the Open-Meteo geocoding API
pub const OPEN_METEO_GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";

/// File name of the lookup table inside the cache directory
pub const GEOCODE_CACHE_FILE: &str = "geocode_cache.json";

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    name: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    country: String,
}

/// Resolves city names to [`Coordinates`], remembering every answer
pub struct Geocoder {
    client: Client,
    base_url: String,
    policy: BackoffPolicy,
    cache_path: Option<PathBuf>,
    known: Mutex<HashMap<String, Coordinates>>,
    logger: Arc<dyn Logger>,
}

impl Geocoder {
    /// Creates a geocoder whose lookup table lives at `cache_path`.
    ///
    /// Pass `None` to keep lookups in memory only.
    pub fn new(cache_path: Option<PathBuf>, logger: Arc<dyn Logger>) -> Self {
        let known = cache_path
            .as_ref()
            .and_then(|p| fs::read_to_string(p).ok())
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        Self {
            client: http_client(),
            base_url: OPEN_METEO_GEOCODING_URL.to_string(),
            policy: BackoffPolicy::default(),
            cache_path,
            known: Mutex::new(known),
            logger,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns coordinates for `city`, asking the API only on the first lookup.
    ///
    /// # Returns
    /// * `Ok(Coordinates)` - from the lookup table or the first API result
    /// * `Err(WeatherError::CityNotFound)` - the API knows no such place
    /// * `Err(WeatherError)` - the request failed after retries
    pub async fn resolve(&self, city: &str) -> Result<Coordinates, WeatherError> {
        let key = city.trim().to_lowercase();

        let cached = self.known.lock().get(&key).cloned();
        if let Some(coords) = cached {
            log_debug!(
                self.logger,
                "Geocoding cache hit city={} lat={} lon={}",
                key,
                coords.latitude,
                coords.longitude
            );
            return Ok(coords);
        }

        log_info!(self.logger, "Calling geocoding API city={}", key);
        let query = [("name", key.clone()), ("count", "1".to_string())];
        let response: GeocodeResponse = get_json(
            &self.client,
            &self.base_url,
            &query,
            &self.policy,
            self.logger.as_ref(),
        )
        .await?;

        let Some(first) = response.results.into_iter().next() else {
            log_warn!(self.logger, "No geocoding results found city={}", key);
            return Err(WeatherError::CityNotFound(city.trim().to_string()));
        };

        let coords = Coordinates {
            name: first.name,
            latitude: first.latitude,
            longitude: first.longitude,
            country: first.country,
        };
        log_info!(
            self.logger,
            "Geocoding success city={} lat={} lon={}",
            coords.name,
            coords.latitude,
            coords.longitude
        );

        let mut known = self.known.lock();
        known.insert(key, coords.clone());
        self.save(&known);
        Ok(coords)
    }

    fn save(&self, known: &HashMap<String, Coordinates>) {
        let Some(path) = &self.cache_path else {
            return;
        };
        let result = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| {
                let json = serde_json::to_string_pretty(known)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                fs::write(path, json)
            });
        if let Err(e) = result {
            log_warn!(self.logger, "Failed to save geocoding cache {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::NoOpLogger;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn geocoder(server: &MockServer, path: Option<PathBuf>) -> Geocoder {
        Geocoder::new(path, Arc::new(NoOpLogger))
            .with_base_url(format!("{}/v1/search", server.uri()))
            .with_policy(BackoffPolicy::new(2, Duration::from_millis(1)))
    }

    async fn mount_belgrade(server: &MockServer, times: u64) {
        Mock::given(method("GET"))
            .and(query_param("name", "belgrade"))
            .and(query_param("count", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"name": "Belgrade", "latitude": 44.80401, "longitude": 20.46513, "country": "Serbia"}
                ]
            })))
            .expect(times)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_resolve_returns_first_result() {
        let server = MockServer::start().await;
        mount_belgrade(&server, 1).await;

        let coords = geocoder(&server, None).resolve("Belgrade").await.unwrap();

        assert_eq!(coords.name, "Belgrade");
        assert_eq!(coords.country, "Serbia");
        assert!((coords.latitude - 44.80401).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_second_lookup_is_served_from_table() {
        let server = MockServer::start().await;
        mount_belgrade(&server, 1).await;
        let geo = geocoder(&server, None);

        geo.resolve("belgrade").await.unwrap();
        let again = geo.resolve(" BELGRADE ").await.unwrap();

        assert_eq!(again.name, "Belgrade");
    }

    #[tokio::test]
    async fn test_lookup_table_survives_restart() {
        let server = MockServer::start().await;
        mount_belgrade(&server, 1).await;
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("nested").join(GEOCODE_CACHE_FILE);

        geocoder(&server, Some(path.clone())).resolve("belgrade").await.unwrap();
        assert!(path.exists(), "lookup table should be written");

        let reloaded = geocoder(&server, Some(path));
        let coords = reloaded.resolve("belgrade").await.unwrap();
        assert_eq!(coords.country, "Serbia");
    }

    #[tokio::test]
    async fn test_unknown_city_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "generationtime_ms": 0.5
            })))
            .mount(&server)
            .await;

        let err = geocoder(&server, None).resolve("atlantis").await.unwrap_err();

        assert!(matches!(err, WeatherError::CityNotFound(ref c) if c == "atlantis"));
    }

    #[tokio::test]
    async fn test_corrupt_table_is_treated_as_empty() {
        let server = MockServer::start().await;
        mount_belgrade(&server, 1).await;
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join(GEOCODE_CACHE_FILE);
        fs::write(&path, "not json at all").unwrap();

        let coords = geocoder(&server, Some(path)).resolve("belgrade").await.unwrap();

        assert_eq!(coords.name, "Belgrade");
    }
}
