//! `/auth`: forward-auth decision for the calling proxy.
//!
//! `200 OK` lets the request through, `403 Forbidden` means the identity is known but not allowed,
//! and the configured rejection status (401 by default) means no identity could be established.
//! Exactly one log record is written per request; the token itself is never logged.

use std::time::Instant;

use axum::{
    extract::State,
    http::{HeaderMap, header},
};
use tracing::info;

use crate::error::AppError;
use crate::services::auth::{Decision, decide};
use crate::state::AppState;

pub async fn authorize(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<&'static str, AppError> {
    let started = Instant::now();

    // A header that is not visible ASCII is treated like a missing one.
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let decision = decide(state.verifier.as_ref(), &state.authorizer, authorization).await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    match decision {
        Decision::Allowed { subject } => {
            info!(elapsed_ms, status = 200, sub = %subject, "Authorized");
            Ok("OK")
        }
        Decision::Denied { subject } => {
            let err = AppError::Forbidden;
            info!(elapsed_ms, status = err.status().as_u16(), sub = %subject, "Forbidden");
            Err(err)
        }
        Decision::Rejected(reason) => {
            let err = state.rejection;
            info!(elapsed_ms, status = err.status().as_u16(), error = %reason, "{}", err);
            Err(err)
        }
    }
}
