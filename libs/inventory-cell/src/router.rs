// libs/inventory-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn inventory_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/my-hospital", get(handlers::get_my_hospital_inventory))
        .route("/", post(handlers::add_inventory_item))
        .route("/low-stock", get(handlers::get_low_stock_items))
        .route("/{item_id}", patch(handlers::update_inventory_item))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}
