//! meteo - command-line weather client for Open-Meteo
//!
//! The library holds everything the binary runs so integration tests can drive
//! it directly: the TTL cache and its background refresher, the concurrent
//! dual fetch, the retrying API clients, configuration, rendering and the
//! HTTP server.

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod dual;
pub mod log;
pub mod refresh;
pub mod render;
pub mod retry;
pub mod server;
