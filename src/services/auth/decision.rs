//! Per-request orchestration: header → verifier → authorizer → `Decision`.
//!
//! The HTTP layer only maps a `Decision` to a status code; nothing here knows about axum.

use std::fmt;

use crate::services::auth::authorizer::SubjectAuthorizer;
use crate::services::auth::token_verifier::{TokenVerifier, VerifyError};

#[derive(Debug)]
pub enum RejectReason {
    MissingOrMalformedHeader,
    Verification(VerifyError),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MissingOrMalformedHeader => write!(f, "invalid Authorization header"),
            RejectReason::Verification(err) => write!(f, "{}", err),
        }
    }
}

#[derive(Debug)]
pub enum Decision {
    /// Verified identity that satisfies the policy.
    Allowed { subject: String },
    /// Verified identity that fails the policy.
    Denied { subject: String },
    /// No identity could be established.
    Rejected(RejectReason),
}

/// Extracts the token from `Authorization: Bearer <token>`.
pub fn bearer_token(authorization: Option<&str>) -> Option<&str> {
    let token = authorization?.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

pub async fn decide(
    verifier: &dyn TokenVerifier,
    authorizer: &SubjectAuthorizer,
    authorization: Option<&str>,
) -> Decision {
    let Some(token) = bearer_token(authorization) else {
        return Decision::Rejected(RejectReason::MissingOrMalformedHeader);
    };

    let claims = match verifier.verify(token).await {
        Ok(claims) => claims,
        Err(err) => return Decision::Rejected(RejectReason::Verification(err)),
    };

    if authorizer.authorize(&claims.subject) {
        Decision::Allowed {
            subject: claims.subject,
        }
    } else {
        Decision::Denied {
            subject: claims.subject,
        }
    }
}
