//! Route modules.

pub mod health;
pub mod logging;
pub mod proxy;
pub mod tasks;

use axum::Router;

use crate::api::server::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/proxy", proxy::router())
        .nest("/api/tasks", tasks::router())
        .nest("/api/logging", logging::router())
        .nest("/api/health", health::router())
        .with_state(state)
}
