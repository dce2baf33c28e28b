/*
 * Responsibility
 * - URL layout of the guard
 * - /auth accepts GET and POST so either proxy convention works
 */
use axum::{Router, routing::get};

use crate::api::handlers::{auth::authorize, health::health};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth", get(authorize).post(authorize))
        .route("/health", get(health))
}
