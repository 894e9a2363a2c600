//! Application service shared by the CLI modes and the HTTP server
//!
//! Owns the forecast cache, its refresh registry, the geocoder and the
//! forecast client. Each lookup follows the same path: serve a fresh cache
//! entry if there is one, otherwise resolve the city, fetch, store, and keep
//! the key warm in the background.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{WeatherCache, CACHE_FILE};
use crate::config::Settings;
use crate::data::geocode::GEOCODE_CACHE_FILE;
use crate::data::{
    cache_key, Coordinates, CurrentWeather, Geocoder, HourlyForecast, Payload, ResourceKind,
    WeatherClient, WeatherError,
};
use crate::dual::{fetch_both, DualFetchError, FetchSpec};
use crate::log::Logger;
use crate::refresh::{fetch_fn, FetchFn, RefreshRegistry};
use crate::{log_debug, log_warn};

/// Result of the `both` mode: either half may be missing
#[derive(Debug)]
pub struct BothForecast {
    pub coordinates: Coordinates,
    pub current: Option<CurrentWeather>,
    pub hourly: Option<HourlyForecast>,
    pub errors: Vec<DualFetchError>,
}

pub struct WeatherApp {
    cache: Arc<WeatherCache>,
    refresher: RefreshRegistry<Payload>,
    geocoder: Geocoder,
    weather: WeatherClient,
    logger: Arc<dyn Logger>,
}

impl WeatherApp {
    pub fn new(
        cache: Arc<WeatherCache>,
        geocoder: Geocoder,
        weather: WeatherClient,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let refresher = RefreshRegistry::new(Arc::clone(&cache), Arc::clone(&logger));
        Self {
            cache,
            refresher,
            geocoder,
            weather,
            logger,
        }
    }

    /// Builds the cache and clients described by `settings`.
    ///
    /// Without a usable cache directory both the forecast cache and the
    /// geocoding table stay in memory.
    pub fn from_settings(settings: &Settings, logger: Arc<dyn Logger>) -> Self {
        let policy = settings.backoff_policy();
        let cache_dir = settings.resolved_cache_dir();

        let cache = match &cache_dir {
            Some(dir) => WeatherCache::open(dir.join(CACHE_FILE), settings.cache_ttl(), Arc::clone(&logger)),
            None => {
                log_warn!(logger, "No cache directory available, caching in memory only");
                WeatherCache::in_memory(settings.cache_ttl(), Arc::clone(&logger))
            }
        };
        let geocoder = Geocoder::new(
            cache_dir.map(|dir| dir.join(GEOCODE_CACHE_FILE)),
            Arc::clone(&logger),
        )
        .with_base_url(settings.geocoding_url.clone())
        .with_policy(policy);
        let weather = WeatherClient::new(Arc::clone(&logger))
            .with_base_url(settings.forecast_url.clone())
            .with_policy(policy);

        Self::new(Arc::new(cache), geocoder, weather, logger)
    }

    pub fn cache(&self) -> &Arc<WeatherCache> {
        &self.cache
    }

    pub fn refresher(&self) -> &RefreshRegistry<Payload> {
        &self.refresher
    }

    /// Current conditions for `city`, from cache or freshly fetched
    pub async fn current(&self, city: &str) -> Result<CurrentWeather, WeatherError> {
        let key = cache_key(city, ResourceKind::Current);
        if let Some(weather) = self.cache.get(&key).and_then(Payload::into_current) {
            return Ok(weather);
        }

        let coords = self.geocoder.resolve(city).await?;
        let weather = self.weather.fetch_current(coords.latitude, coords.longitude).await?;
        self.cache.set(&key, Payload::from(weather.clone()));
        self.refresher.start(&key, self.current_fetch(&coords));
        Ok(weather)
    }

    /// The one-day hourly series for `city`, from cache or freshly fetched
    pub async fn hourly(&self, city: &str) -> Result<HourlyForecast, WeatherError> {
        let key = cache_key(city, ResourceKind::Hourly);
        if let Some(forecast) = self.cache.get(&key).and_then(Payload::into_hourly) {
            return Ok(forecast);
        }

        let coords = self.geocoder.resolve(city).await?;
        let forecast = self.weather.fetch_hourly(coords.latitude, coords.longitude).await?;
        self.cache.set(&key, Payload::from(forecast.clone()));
        self.refresher.start(&key, self.hourly_fetch(&coords));
        Ok(forecast)
    }

    /// Both resources at once, waiting at most `timeout` for whatever is not cached.
    ///
    /// Only a geocoding failure fails the whole call; fetch failures leave the
    /// corresponding half empty and are listed in `errors`.
    pub async fn both(&self, city: &str, timeout: Duration) -> Result<BothForecast, WeatherError> {
        let coords = self.geocoder.resolve(city).await?;

        let result = fetch_both(
            &self.cache,
            &self.refresher,
            FetchSpec::new(cache_key(city, ResourceKind::Current), self.current_fetch(&coords)),
            FetchSpec::new(cache_key(city, ResourceKind::Hourly), self.hourly_fetch(&coords)),
            timeout,
            &self.logger,
        )
        .await;

        for error in &result.errors {
            log_debug!(self.logger, "Both mode is missing key={}: {}", error.key(), error);
        }

        Ok(BothForecast {
            coordinates: coords,
            current: result.first.and_then(Payload::into_current),
            hourly: result.second.and_then(Payload::into_hourly),
            errors: result.errors,
        })
    }

    /// Stops every background refresh task
    pub fn shutdown(&self) {
        self.refresher.shutdown();
    }

    fn current_fetch(&self, coords: &Coordinates) -> FetchFn<Payload> {
        let client = self.weather.clone();
        let (lat, lon) = (coords.latitude, coords.longitude);
        fetch_fn(move || {
            let client = client.clone();
            async move { client.fetch_current(lat, lon).await.map(Payload::from) }
        })
    }

    fn hourly_fetch(&self, coords: &Coordinates) -> FetchFn<Payload> {
        let client = self.weather.clone();
        let (lat, lon) = (coords.latitude, coords.longitude);
        fetch_fn(move || {
            let client = client.clone();
            async move { client.fetch_hourly(lat, lon).await.map(Payload::from) }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures;
    use crate::log::NoOpLogger;
    use crate::retry::BackoffPolicy;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TTL: Duration = Duration::from_secs(600);

    async fn mock_geocoding(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{"name": "Belgrade", "latitude": 44.8, "longitude": 20.46, "country": "Serbia"}]
            })))
            .mount(server)
            .await;
    }

    fn app_for(server: &MockServer) -> WeatherApp {
        let logger: Arc<dyn Logger> = Arc::new(NoOpLogger);
        let policy = BackoffPolicy::new(1, Duration::from_millis(1));
        let cache = Arc::new(WeatherCache::in_memory(TTL, Arc::clone(&logger)));
        let geocoder = Geocoder::new(None, Arc::clone(&logger))
            .with_base_url(format!("{}/v1/search", server.uri()))
            .with_policy(policy);
        let weather = WeatherClient::new(Arc::clone(&logger))
            .with_base_url(format!("{}/v1/forecast", server.uri()))
            .with_policy(policy);
        WeatherApp::new(cache, geocoder, weather, logger)
    }

    #[tokio::test]
    async fn test_cache_hit_makes_no_requests() {
        let server = MockServer::start().await;
        let app = app_for(&server);
        app.cache()
            .set("belgrade_current", Payload::from(fixtures::current()));

        let weather = app.current("Belgrade").await.unwrap();

        assert_eq!(weather, fixtures::current());
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_miss_fetches_stores_and_starts_refresh() {
        let server = MockServer::start().await;
        mock_geocoding(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("forecast_days", "1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::to_value(fixtures::hourly(24)).unwrap()),
            )
            .expect(1)
            .mount(&server)
            .await;
        let app = app_for(&server);

        let forecast = app.hourly("belgrade").await.unwrap();
        let again = app.hourly("belgrade").await.unwrap();

        assert_eq!(forecast.len(), 24);
        assert_eq!(again, forecast);
        assert!(app.refresher().is_running("belgrade_hourly"));
        app.shutdown();
        assert!(app.refresher().active_keys().is_empty());
    }

    #[tokio::test]
    async fn test_both_reports_the_failed_half() {
        let server = MockServer::start().await;
        mock_geocoding(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("forecast_days", "1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::to_value(fixtures::current()).unwrap()),
            )
            .mount(&server)
            .await;
        let app = app_for(&server);

        let both = app.both("belgrade", Duration::from_secs(5)).await.unwrap();

        assert_eq!(both.coordinates.name, "Belgrade");
        assert!(both.current.is_some());
        assert!(both.hourly.is_none());
        assert_eq!(both.errors.len(), 1);
        assert_eq!(both.errors[0].key(), "belgrade_hourly");
    }

    #[tokio::test]
    async fn test_unknown_city_fails_the_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        let app = app_for(&server);

        let err = app.current("atlantis").await.unwrap_err();

        assert!(matches!(err, WeatherError::CityNotFound(_)));
    }
}
