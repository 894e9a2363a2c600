//! Logging collaborator passed explicitly into each component.
//!
//! The cache, the refresh registry, the backoff requester and the API clients
//! all take an `Arc<dyn Logger>` instead of reaching for a process-wide logger,
//! so tests can swap in a [`MemoryLogger`] and assert on what was emitted.
//!
//! - `Logger`: the interface components log through
//! - `TracingLogger`: production adapter that forwards to `tracing`
//! - `NoOpLogger`: discards everything
//! - `MemoryLogger`: records events in memory for assertions
//!
//! The binary installs a `tracing` subscriber with [`init_file_logging`] that
//! writes only to daily-rotating log files, keeping terminal output free for tables.

mod file;
mod memory;
mod noop;
mod tracing_adapter;
mod r#trait;

pub use file::{
    file_appender, init_file_logging, LogInitError, LoggingGuard, LOG_FILE_PREFIX, MAX_LOG_FILES,
};
pub use memory::MemoryLogger;
pub use noop::NoOpLogger;
pub use r#trait::{LogLevel, Logger};
pub use tracing_adapter::TracingLogger;
