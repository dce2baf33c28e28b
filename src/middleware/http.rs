//! HTTP-level middleware (cross-cutting concerns).
//!
//! Responsibility:
//! - Request-Id generation + propagation (X-Request-Id), so proxy logs and guard logs correlate
//! - Request tracing (TraceLayer)
//! - Body size limit (the guard never reads a body)
//! - Per-request deadline; a request that misses it gets the rejection status, never a 408,
//!   because the proxy only understands 200/401/403

use std::time::Duration;

use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::http::{StatusCode, header::HeaderName};
use axum::response::{IntoResponse, Response};
use tower::timeout::{TimeoutLayer, error::Elapsed};
use tower::{BoxError, ServiceBuilder};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::AppError;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Deadline and failure response for the guard's HTTP stack.
#[derive(Debug, Clone, Copy)]
pub struct HttpPolicy {
    pub request_timeout: Duration,
    pub rejection: AppError,
}

impl Default for HttpPolicy {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            rejection: AppError::Unauthorized,
        }
    }
}

fn middleware_failure(policy: HttpPolicy, err: BoxError) -> Response {
    if err.is::<Elapsed>() {
        // The handler never finished, so this is the request's only decision record.
        let status = policy.rejection.status().as_u16();
        info!(
            status,
            timeout_ms = policy.request_timeout.as_millis() as u64,
            error = "request deadline exceeded",
            "{}",
            policy.rejection
        );
        return policy.rejection.into_response();
    }

    error!(error = %err, "unhandled middleware error");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

/// Wraps `router` with the guard's HTTP layers.
pub fn apply(router: Router, policy: HttpPolicy) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    router.layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(move |err: BoxError| async move {
                middleware_failure(policy, err)
            }))
            .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
            .layer(PropagateRequestIdLayer::new(request_id))
            .layer(TraceLayer::new_for_http())
            .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
            .layer(TimeoutLayer::new(policy.request_timeout)),
    )
}
