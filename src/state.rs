/*
 * Responsibility
 * - Shared context attached to the Router (AppState)
 * - Read-only after startup; Clone is cheap (Arc inside)
 */
use std::sync::Arc;
use std::time::Duration;

use crate::error::AppError;
use crate::middleware::http::{DEFAULT_REQUEST_TIMEOUT, HttpPolicy};
use crate::services::auth::{SubjectAuthorizer, TokenVerifier};

#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<dyn TokenVerifier>,
    pub authorizer: Arc<SubjectAuthorizer>,
    pub rejection: AppError,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        authorizer: Arc<SubjectAuthorizer>,
        rejection: AppError,
    ) -> Self {
        Self {
            verifier,
            authorizer,
            rejection,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn http_policy(&self) -> HttpPolicy {
        HttpPolicy {
            request_timeout: self.request_timeout,
            rejection: self.rejection,
        }
    }
}
