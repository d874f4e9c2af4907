//! hls-accel library crate.
//!
//! A caching HLS proxy: playlists are rewritten so that segments and keys are
//! requested through the proxy, while an external download engine fills a
//! per-task cache in the background.

pub mod api;
pub mod cache;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod task;
pub mod utils;

pub use error::{Error, Result};
