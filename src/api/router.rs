//! Router setup

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::api::handlers;
use crate::api::state::AppState;

/// Build the log's route table
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/add", post(handlers::add_entry))
        .route("/checkpoint", get(handlers::get_checkpoint))
        .route("/tile/*path", get(handlers::get_tile))
        .route("/seq/*path", get(handlers::get_entry_bundle))
        .with_state(state)
}
