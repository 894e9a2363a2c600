//! Forecast cache
//!
//! A thread-safe TTL cache persisted as a single JSON snapshot in the per-user
//! cache directory (`~/.cache/meteo/` on Linux). Values are opaque to the
//! cache; the binary stores the [`Payload`](crate::data::Payload) union so both
//! the current reading and the hourly series share one table.

mod clock;
mod manager;

use std::path::PathBuf;

use directories::ProjectDirs;

pub use clock::{Clock, ManualClock, SystemClock};
pub use manager::{CacheEntry, CacheError, TtlCache, SNAPSHOT_VERSION};

/// The cache the CLI and the HTTP server share
pub type WeatherCache = TtlCache<crate::data::Payload>;

/// File name of the forecast snapshot inside the cache directory
pub const CACHE_FILE: &str = "weather_cache.json";

/// XDG-compliant per-user cache directory for this application
///
/// Returns `None` if no home directory can be determined.
pub fn default_cache_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "meteo").map(|dirs| dirs.cache_dir().to_path_buf())
}
