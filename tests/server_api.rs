//! End-to-end tests of the HTTP API against mocked Open-Meteo endpoints

use std::sync::Arc;
use std::time::Duration;

use meteo::app::WeatherApp;
use meteo::cache::WeatherCache;
use meteo::data::{Geocoder, WeatherClient};
use meteo::log::{Logger, MemoryLogger};
use meteo::retry::BackoffPolicy;
use meteo::server;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    base: String,
    logger: MemoryLogger,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl Harness {
    async fn start(upstream: &MockServer) -> Self {
        let memory = MemoryLogger::new();
        let logger: Arc<dyn Logger> = Arc::new(memory.clone());
        let policy = BackoffPolicy::new(2, Duration::from_millis(1));

        let cache = Arc::new(WeatherCache::in_memory(Duration::from_secs(600), Arc::clone(&logger)));
        let geocoder = Geocoder::new(None, Arc::clone(&logger))
            .with_base_url(format!("{}/v1/search", upstream.uri()))
            .with_policy(policy);
        let weather = WeatherClient::new(Arc::clone(&logger))
            .with_base_url(format!("{}/v1/forecast", upstream.uri()))
            .with_policy(policy);
        let app = Arc::new(WeatherApp::new(cache, geocoder, weather, Arc::clone(&logger)));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let base = format!("http://{}", listener.local_addr().expect("local addr"));
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server::run(listener, app, logger, async move {
            let _ = stopped.await;
        }));

        Self {
            base,
            logger: memory,
            stop: Some(stop),
            task,
        }
    }

    async fn get(&self, path_and_query: &str) -> reqwest::Response {
        reqwest::get(format!("{}{}", self.base, path_and_query))
            .await
            .expect("request should reach the server")
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task
            .await
            .expect("server task panicked")
            .expect("server should stop cleanly");
    }
}

async fn mock_belgrade(upstream: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .and(query_param("name", "belgrade"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [{"name": "Belgrade", "latitude": 44.8, "longitude": 20.46, "country": "Serbia"}]
        })))
        .mount(upstream)
        .await;
}

fn hourly_body(hours: usize) -> serde_json::Value {
    let times: Vec<String> = (0..hours).map(|h| format!("2024-07-15T{:02}:00", h)).collect();
    serde_json::json!({
        "latitude": 44.8,
        "longitude": 20.46,
        "hourly": {
            "time": times,
            "temperature_2m": vec![20.0; hours],
            "relative_humidity_2m": vec![60.0; hours],
            "windspeed_10m": vec![10.0; hours],
            "winddirection_10m": vec![90.0; hours],
            "surface_pressure": vec![1010.0; hours],
            "weathercode": vec![1; hours]
        }
    })
}

#[tokio::test]
async fn test_current_is_fetched_once_then_served_from_cache() {
    let upstream = MockServer::start().await;
    mock_belgrade(&upstream).await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "latitude": 44.8,
            "longitude": 20.46,
            "current": {
                "time": "2024-07-15T14:00",
                "temperature_2m": 22.5,
                "relative_humidity_2m": 65,
                "windspeed_10m": 12.5,
                "winddirection_10m": 270,
                "surface_pressure": 1012.3,
                "weathercode": 2
            }
        })))
        .expect(1)
        .mount(&upstream)
        .await;
    let harness = Harness::start(&upstream).await;

    let first = harness.get("/api/v1/current?city=belgrade").await;
    assert_eq!(first.status(), 200);
    let first: serde_json::Value = first.json().await.unwrap();
    assert_eq!(first["current"]["temperature_2m"], 22.5);

    let second: serde_json::Value = harness
        .get("/api/v1/current?city=Belgrade")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(second, first, "cached payload is returned unchanged");

    assert!(harness.logger.contains("HTTP request method=GET path=/api/v1/current status=200"));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_hourly_is_truncated_to_requested_hours() {
    let upstream = MockServer::start().await;
    mock_belgrade(&upstream).await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .and(query_param("forecast_days", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hourly_body(24)))
        .mount(&upstream)
        .await;
    let harness = Harness::start(&upstream).await;

    let default: serde_json::Value = harness
        .get("/api/v1/hourly?city=belgrade")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(default["hourly"]["time"].as_array().unwrap().len(), 6);

    let three: serde_json::Value = harness
        .get("/api/v1/hourly?city=belgrade&hours=3")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(three["hourly"]["weathercode"].as_array().unwrap().len(), 3);

    let all: serde_json::Value = harness
        .get("/api/v1/hourly?city=belgrade&hours=0")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(all["hourly"]["time"].as_array().unwrap().len(), 24);

    let negative: serde_json::Value = harness
        .get("/api/v1/hourly?city=belgrade&hours=-3")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(negative["hourly"]["time"].as_array().unwrap().len(), 24);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_missing_city_is_bad_request() {
    let upstream = MockServer::start().await;
    let harness = Harness::start(&upstream).await;

    let response = harness.get("/api/v1/current").await;

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Missing 'city' parameter");
    harness.shutdown().await;
}

#[tokio::test]
async fn test_unknown_city_is_not_found() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&upstream)
        .await;
    let harness = Harness::start(&upstream).await;

    let response = harness.get("/api/v1/hourly?city=atlantis").await;

    assert_eq!(response.status(), 404);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_upstream_failure_is_bad_gateway() {
    let upstream = MockServer::start().await;
    mock_belgrade(&upstream).await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&upstream)
        .await;
    let harness = Harness::start(&upstream).await;

    let response = harness.get("/api/v1/current?city=belgrade").await;

    assert_eq!(response.status(), 502);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("all retries failed"));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_background_refresh() {
    let upstream = MockServer::start().await;
    mock_belgrade(&upstream).await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hourly_body(2)))
        .mount(&upstream)
        .await;
    let harness = Harness::start(&upstream).await;
    harness.get("/api/v1/hourly?city=belgrade").await;
    let logger = harness.logger.clone();

    harness.shutdown().await;

    assert!(logger.contains("Background refresh started key=belgrade_hourly"));
    assert!(logger.contains("Background refresh shut down tasks=1"));
    assert!(logger.contains("Server stopped gracefully"));
}
