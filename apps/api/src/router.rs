use std::sync::Arc;

use axum::{routing::get, Router};

use appointment_cell::router::appointment_routes;
use billing_cell::router::bill_routes;
use inventory_cell::router::inventory_routes;
use payment_cell::router::payment_routes;
use shared_config::AppConfig;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "Arogya API is running!" }))
        .nest("/appointments", appointment_routes(state.clone()))
        .nest("/payments", payment_routes(state.clone()))
        .nest("/bills", bill_routes(state.clone()))
        .nest("/inventory", inventory_routes(state))
}
