//! Background cache refresh
//!
//! Keeps cache keys warm by re-running their fetch function every TTL and
//! republishing the result. Each key gets at most one task: starting a refresh
//! for a key that is already being refreshed returns the existing handle.
//! Tasks run until their handle is cancelled, the registry is shut down, or
//! the registry is dropped.
//!
//! A failed fetch is logged and the loop carries on. The stale entry is left
//! alone and will expire on its next read.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;

use crate::cache::TtlCache;
use crate::log::Logger;
use crate::{log_debug, log_info, log_warn};

/// Error type produced by fetch functions
pub type FetchError = Box<dyn std::error::Error + Send + Sync>;

/// A repeatable, shareable fetch for one cache key
pub type FetchFn<V> = Arc<dyn Fn() -> BoxFuture<'static, Result<V, FetchError>> + Send + Sync>;

/// Wraps an async closure as a [`FetchFn`].
///
/// # Example
/// ```ignore
/// let client = weather.clone();
/// let fetch = fetch_fn(move || {
///     let client = client.clone();
///     async move { client.fetch_current(44.8, 20.46).await.map(Payload::from) }
/// });
/// ```
pub fn fetch_fn<V, E, F, Fut>(f: F) -> FetchFn<V>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    E: Into<FetchError>,
{
    Arc::new(move || f().map(|result| result.map_err(Into::into)).boxed())
}

/// Handle to one key's refresh task
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    key: String,
    token: CancellationToken,
}

impl RefreshHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stops the task after its current sleep or fetch
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Registry of per-key refresh tasks for one cache
pub struct RefreshRegistry<V> {
    cache: Arc<TtlCache<V>>,
    interval: Duration,
    tasks: Mutex<HashMap<String, RefreshHandle>>,
    root: CancellationToken,
    logger: Arc<dyn Logger>,
}

impl<V> RefreshRegistry<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Creates a registry whose tasks wake once per cache TTL
    pub fn new(cache: Arc<TtlCache<V>>, logger: Arc<dyn Logger>) -> Self {
        let interval = cache.ttl();
        Self {
            cache,
            interval,
            tasks: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
            logger,
        }
    }

    pub fn cache(&self) -> &Arc<TtlCache<V>> {
        &self.cache
    }

    /// Starts refreshing `key` with `fetch` unless a task for it is already running.
    ///
    /// Never blocks: the loop runs on its own tokio task. Must be called from
    /// within a tokio runtime.
    ///
    /// # Returns
    /// The handle of the task refreshing `key` (new or existing)
    pub fn start(&self, key: &str, fetch: FetchFn<V>) -> RefreshHandle {
        let mut tasks = self.tasks.lock();
        if let Some(existing) = tasks.get(key) {
            if !existing.is_cancelled() {
                log_debug!(self.logger, "Background refresh already running key={}", key);
                return existing.clone();
            }
        }

        let handle = RefreshHandle {
            key: key.to_string(),
            token: self.root.child_token(),
        };
        tasks.insert(key.to_string(), handle.clone());
        drop(tasks);

        let cache = Arc::clone(&self.cache);
        let logger = Arc::clone(&self.logger);
        let interval = self.interval;
        let token = handle.token.clone();
        let key = key.to_string();

        log_info!(logger, "Background refresh started key={} every={:?}", key, interval);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let result = tokio::select! {
                    _ = token.cancelled() => break,
                    result = fetch() => result,
                };

                match result {
                    Ok(value) => {
                        cache.set(&key, value);
                        log_info!(logger, "Cache refreshed in background key={}", key);
                    }
                    Err(e) => {
                        log_warn!(logger, "Background refresh failed key={} error={}", key, e);
                    }
                }
            }
            log_debug!(logger, "Background refresh stopped key={}", key);
        });

        handle
    }

    /// Whether a live task is refreshing `key`
    pub fn is_running(&self, key: &str) -> bool {
        self.tasks
            .lock()
            .get(key)
            .is_some_and(|handle| !handle.is_cancelled())
    }

    /// Keys with a live refresh task, sorted
    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .tasks
            .lock()
            .values()
            .filter(|handle| !handle.is_cancelled())
            .map(|handle| handle.key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Cancels every task started by this registry
    pub fn shutdown(&self) {
        self.root.cancel();
        let stopped = self.tasks.lock().drain().count();
        log_info!(self.logger, "Background refresh shut down tasks={}", stopped);
    }
}

impl<V> Drop for RefreshRegistry<V> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
