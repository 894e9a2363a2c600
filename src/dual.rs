//! Concurrent fetch of two independent resources under one deadline
//!
//! Used by the `both` mode: the current reading and the hourly series are
//! looked up in the cache, any misses are fetched in parallel, and the caller
//! gets whatever arrived before the deadline. A side that fails or times out is
//! reported in [`DualFetchResult::errors`] and never takes the other side down.
//!
//! Fetch tasks that lose the race keep running; if they finish later their
//! result still lands in the cache.

use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::cache::TtlCache;
use crate::log::Logger;
use crate::refresh::{FetchFn, RefreshRegistry};
use crate::{log_debug, log_error, log_info, log_warn};

/// Why one side of a dual fetch came back empty
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DualFetchError {
    #[error("fetch for {key} failed: {message}")]
    Failed { key: String, message: String },

    #[error("fetch for {key} timed out")]
    TimedOut { key: String },
}

impl DualFetchError {
    pub fn key(&self) -> &str {
        match self {
            DualFetchError::Failed { key, .. } | DualFetchError::TimedOut { key } => key,
        }
    }
}

/// One side of a dual fetch: the cache key and how to fill it
pub struct FetchSpec<V> {
    pub key: String,
    pub fetch: FetchFn<V>,
}

impl<V> FetchSpec<V> {
    pub fn new(key: impl Into<String>, fetch: FetchFn<V>) -> Self {
        Self {
            key: key.into(),
            fetch,
        }
    }
}

/// Outcome of [`fetch_both`]: either side may be missing
#[derive(Debug)]
pub struct DualFetchResult<V> {
    pub first: Option<V>,
    pub second: Option<V>,
    pub errors: Vec<DualFetchError>,
}

impl<V> DualFetchResult<V> {
    pub fn is_complete(&self) -> bool {
        self.first.is_some() && self.second.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    First,
    Second,
}

type Outcome<V> = (Side, Result<V, String>);

/// Fetches both resources, serving cache hits directly and running misses concurrently.
///
/// Returns as soon as both sides are resolved or `timeout` elapses, whichever
/// comes first. Afterwards a background refresher is registered for both keys
/// regardless of the outcome.
///
/// # Arguments
/// * `cache` - Cache consulted first and filled by successful fetches
/// * `refresher` - Registry the two keys are handed to afterwards
/// * `first`, `second` - Key and fetch function for each side
/// * `timeout` - Upper bound on how long to wait for the fetches
/// * `logger` - Receives per-side failures and the timeout
pub async fn fetch_both<V>(
    cache: &Arc<TtlCache<V>>,
    refresher: &RefreshRegistry<V>,
    first: FetchSpec<V>,
    second: FetchSpec<V>,
    timeout: Duration,
    logger: &Arc<dyn Logger>,
) -> DualFetchResult<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let mut result = DualFetchResult {
        first: cache.get(&first.key),
        second: cache.get(&second.key),
        errors: Vec::new(),
    };

    let (tx, mut rx) = mpsc::channel::<Outcome<V>>(2);
    let mut pending = Vec::with_capacity(2);

    for (side, job, cached) in [
        (Side::First, &first, result.first.is_some()),
        (Side::Second, &second, result.second.is_some()),
    ] {
        if cached {
            log_debug!(logger, "Using cached data key={}", job.key);
            continue;
        }
        log_info!(logger, "Fetching fresh data key={}", job.key);
        pending.push(side);
        spawn_fetch(side, job, Arc::clone(cache), tx.clone(), Arc::clone(logger));
    }
    drop(tx);

    let deadline = Instant::now() + timeout;
    while !pending.is_empty() {
        tokio::select! {
            outcome = rx.recv() => {
                let Some((side, outcome)) = outcome else {
                    // every sender is gone, so the remaining tasks died without reporting
                    break;
                };
                pending.retain(|s| *s != side);
                let key = key_for(side, &first, &second);
                match outcome {
                    Ok(value) => match side {
                        Side::First => result.first = Some(value),
                        Side::Second => result.second = Some(value),
                    },
                    Err(message) => {
                        log_error!(logger, "Fetch failed key={} error={}", key, message);
                        result.errors.push(DualFetchError::Failed { key: key.to_string(), message });
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                log_warn!(logger, "Timeout waiting for data after {:?}", timeout);
                for side in pending.drain(..) {
                    let key = key_for(side, &first, &second).to_string();
                    result.errors.push(DualFetchError::TimedOut { key });
                }
            }
        }
    }

    for side in pending {
        let key = key_for(side, &first, &second).to_string();
        result.errors.push(DualFetchError::Failed {
            key,
            message: "fetch task ended without a result".to_string(),
        });
    }

    refresher.start(&first.key, Arc::clone(&first.fetch));
    refresher.start(&second.key, Arc::clone(&second.fetch));

    result
}

fn key_for<'a, V>(side: Side, first: &'a FetchSpec<V>, second: &'a FetchSpec<V>) -> &'a str {
    match side {
        Side::First => &first.key,
        Side::Second => &second.key,
    }
}

fn spawn_fetch<V>(
    side: Side,
    job: &FetchSpec<V>,
    cache: Arc<TtlCache<V>>,
    tx: mpsc::Sender<Outcome<V>>,
    logger: Arc<dyn Logger>,
) where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let fetch = Arc::clone(&job.fetch);
    let key = job.key.clone();
    let task_key = key.clone();
    let handle = tokio::spawn(async move {
        match fetch().await {
            Ok(value) => {
                cache.set(&task_key, value.clone());
                Ok(value)
            }
            Err(e) => Err(e.to_string()),
        }
    });

    // Reports on behalf of the fetch task so a panic is seen as a failure
    // rather than silence until the deadline.
    tokio::spawn(async move {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(format!("fetch task failed: {}", e)),
        };
        if tx.send((side, outcome)).await.is_err() {
            log_debug!(logger, "Late result for key={} stored after caller stopped waiting", key);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogLevel, MemoryLogger, NoOpLogger};
    use crate::refresh::{fetch_fn, FetchError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::sleep;

    const TTL: Duration = Duration::from_secs(600);

    struct Fixture {
        cache: Arc<TtlCache<String>>,
        refresher: RefreshRegistry<String>,
        logger: Arc<dyn Logger>,
    }

    fn fixture(logger: Arc<dyn Logger>) -> Fixture {
        let cache = Arc::new(TtlCache::in_memory(TTL, Arc::new(NoOpLogger)));
        let refresher = RefreshRegistry::new(Arc::clone(&cache), Arc::new(NoOpLogger));
        Fixture {
            cache,
            refresher,
            logger,
        }
    }

    fn delayed(value: &'static str, delay: Duration) -> FetchFn<String> {
        fetch_fn(move || async move {
            sleep(delay).await;
            Ok::<_, FetchError>(value.to_string())
        })
    }

    fn failing(message: &'static str) -> FetchFn<String> {
        fetch_fn(move || async move { Err::<String, _>(message) })
    }

    fn never() -> FetchFn<String> {
        fetch_fn(|| std::future::pending::<Result<String, FetchError>>())
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_run_concurrently() {
        let f = fixture(Arc::new(NoOpLogger));
        let started = Instant::now();

        let result = fetch_both(
            &f.cache,
            &f.refresher,
            FetchSpec::new("rome_current", delayed("now", Duration::from_millis(50))),
            FetchSpec::new("rome_hourly", delayed("series", Duration::from_millis(200))),
            Duration::from_millis(1000),
            &f.logger,
        )
        .await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(250), "waited {:?}, not max(50, 200)", elapsed);
        assert_eq!(result.first.as_deref(), Some("now"));
        assert_eq!(result.second.as_deref(), Some("series"));
        assert!(result.errors.is_empty());
        assert!(result.is_complete());
        assert_eq!(f.cache.get("rome_current").as_deref(), Some("now"));
        assert_eq!(f.cache.get("rome_hourly").as_deref(), Some("series"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_side_failing_keeps_the_other() {
        let logger = MemoryLogger::new();
        let f = fixture(Arc::new(logger.clone()));

        let result = fetch_both(
            &f.cache,
            &f.refresher,
            FetchSpec::new("rome_current", delayed("now", Duration::from_millis(10))),
            FetchSpec::new("rome_hourly", failing("upstream 500")),
            Duration::from_secs(1),
            &f.logger,
        )
        .await;

        assert_eq!(result.first.as_deref(), Some("now"));
        assert!(result.second.is_none());
        assert_eq!(
            result.errors,
            vec![DualFetchError::Failed {
                key: "rome_hourly".to_string(),
                message: "upstream 500".to_string(),
            }]
        );
        assert_eq!(logger.messages_at(LogLevel::Error).len(), 1);
        assert!(f.cache.get("rome_hourly").is_none());
    }

    fn panicking() -> FetchFn<String> {
        fetch_fn(|| async {
            if true {
                panic!("decoder blew up");
            }
            Ok::<String, FetchError>(String::new())
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_fetch_is_reported_as_failed() {
        let f = fixture(Arc::new(NoOpLogger));
        let started = Instant::now();

        let result = fetch_both(
            &f.cache,
            &f.refresher,
            FetchSpec::new("rome_current", panicking()),
            FetchSpec::new("rome_hourly", delayed("series", Duration::from_millis(200))),
            Duration::from_secs(5),
            &f.logger,
        )
        .await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(result.first.is_none());
        assert_eq!(result.second.as_deref(), Some("series"));
        assert_eq!(result.errors.len(), 1);
        match &result.errors[0] {
            DualFetchError::Failed { key, message } => {
                assert_eq!(key, "rome_current");
                assert!(message.contains("panicked"), "unexpected message {message}");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_partial_result_promptly() {
        let logger = MemoryLogger::new();
        let f = fixture(Arc::new(logger.clone()));
        let started = Instant::now();

        let result = fetch_both(
            &f.cache,
            &f.refresher,
            FetchSpec::new("rome_current", delayed("now", Duration::ZERO)),
            FetchSpec::new("rome_hourly", never()),
            Duration::from_millis(100),
            &f.logger,
        )
        .await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(150));
        assert_eq!(result.first.as_deref(), Some("now"));
        assert!(result.second.is_none());
        assert_eq!(
            result.errors,
            vec![DualFetchError::TimedOut {
                key: "rome_hourly".to_string()
            }]
        );
        assert!(logger.contains("Timeout waiting for data"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_fetch() {
        let f = fixture(Arc::new(NoOpLogger));
        f.cache.set("rome_current", "cached".to_string());
        let calls = Arc::new(AtomicU32::new(0));
        let counted = {
            let calls = Arc::clone(&calls);
            fetch_fn(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, FetchError>("fresh".to_string()) }
            })
        };

        let result = fetch_both(
            &f.cache,
            &f.refresher,
            FetchSpec::new("rome_current", counted),
            FetchSpec::new("rome_hourly", delayed("series", Duration::from_millis(5))),
            Duration::from_secs(1),
            &f.logger,
        )
        .await;

        assert_eq!(result.first.as_deref(), Some("cached"));
        assert_eq!(result.second.as_deref(), Some("series"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_result_is_still_cached() {
        let f = fixture(Arc::new(NoOpLogger));

        let result = fetch_both(
            &f.cache,
            &f.refresher,
            FetchSpec::new("rome_current", delayed("now", Duration::ZERO)),
            FetchSpec::new("rome_hourly", delayed("series", Duration::from_millis(300))),
            Duration::from_millis(100),
            &f.logger,
        )
        .await;
        assert!(result.second.is_none());

        sleep(Duration::from_millis(300)).await;
        assert_eq!(f.cache.get("rome_hourly").as_deref(), Some("series"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_registered_for_both_keys_even_on_failure() {
        let f = fixture(Arc::new(NoOpLogger));

        fetch_both(
            &f.cache,
            &f.refresher,
            FetchSpec::new("rome_current", failing("boom")),
            FetchSpec::new("rome_hourly", never()),
            Duration::from_millis(50),
            &f.logger,
        )
        .await;

        assert_eq!(
            f.refresher.active_keys(),
            vec!["rome_current".to_string(), "rome_hourly".to_string()]
        );
    }
}
