// Routes module - Centralizes all route definitions

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::app::AppState;
use crate::handlers::{ping, vms};

/// Build the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ping", get(ping::ping))
        .route("/vms", get(vms::list_vms).post(vms::create_vm))
        .route("/vms/{id}", get(vms::get_vm))
        .route("/vms/{id}/memory", get(vms::vm_memory))
        .layer(cors)
        .with_state(state)
}
