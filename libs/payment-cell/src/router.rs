// libs/payment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn payment_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/booking/order", post(handlers::create_booking_order))
        .route("/bill/order", post(handlers::create_bill_order))
        .route("/confirm", post(handlers::confirm_payment))
        .route("/", get(handlers::get_my_payments))
        .route("/session/{session_id}", get(handlers::get_payment_by_session))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // The webhook authenticates by signature, not bearer token.
    Router::new()
        .route("/webhook", post(handlers::provider_webhook))
        .merge(protected_routes)
        .with_state(state)
}
