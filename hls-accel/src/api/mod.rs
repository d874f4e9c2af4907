//! HTTP surface: the player-facing proxy routes and the admin API.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
