use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::warn;

/// OAuth 2.0 error response per RFC 6749 Section 5.2.
#[derive(Debug, Serialize)]
pub struct OidcErrorBody {
    pub error: &'static str,
    pub error_description: String,
}

/// OIDC provider error type.
///
/// The grant-rejection variants (`CodeReplay`, `Expired`, `PkceMismatch`,
/// `UnknownCode`, `GrantRedirectMismatch`) all collapse into the same
/// `invalid_grant` response body so callers cannot probe session state; the
/// precise variant is logged before the response is built.
#[derive(Debug)]
pub enum OidcError {
    /// Malformed or missing request parameters.
    InvalidRequest(String),
    /// Sign-up with an email that already has an account.
    DuplicateEmail(String),
    /// Wrong email/password pair, or a disabled account.
    InvalidCredentials,
    /// `client_id` at the authorization endpoint is not registered.
    UnknownClient(String),
    /// Redirect URI is not an exact match for a registered one.
    RedirectUriMismatch,
    /// Session state-machine transition out of order.
    InvalidState(String),
    /// Authorization code presented a second time.
    CodeReplay,
    /// Session, code or token past its TTL.
    Expired,
    /// Authorization code that maps to no live session.
    UnknownCode,
    /// PKCE verifier does not hash to the stored challenge.
    PkceMismatch,
    /// `redirect_uri` at the token endpoint differs from the one the
    /// session was started with. Unlike the authorization-endpoint
    /// mismatch, this is a grant rejection per RFC 6749 §5.2.
    GrantRedirectMismatch,
    /// Client authentication at the token endpoint failed.
    InvalidClient(String),
    /// Token signature does not validate against any published key.
    InvalidSignature(String),
    /// Unsupported `grant_type`.
    UnsupportedGrantType(String),
    /// Unsupported `response_type`.
    UnsupportedResponseType(String),
    /// Missing or invalid Bearer token.
    Unauthorized(String),
    /// Internal server error.
    Internal(String),
}

impl OidcError {
    fn error_code(&self) -> &'static str {
        match self {
            OidcError::InvalidRequest(_) => "invalid_request",
            OidcError::DuplicateEmail(_) => "duplicate_email",
            OidcError::InvalidCredentials => "invalid_credentials",
            OidcError::UnknownClient(_) => "invalid_request",
            OidcError::RedirectUriMismatch => "invalid_request",
            OidcError::InvalidState(_) => "invalid_request",
            OidcError::CodeReplay
            | OidcError::Expired
            | OidcError::UnknownCode
            | OidcError::PkceMismatch
            | OidcError::GrantRedirectMismatch => "invalid_grant",
            OidcError::InvalidClient(_) => "invalid_client",
            OidcError::InvalidSignature(_) => "invalid_token",
            OidcError::UnsupportedGrantType(_) => "unsupported_grant_type",
            OidcError::UnsupportedResponseType(_) => "unsupported_response_type",
            OidcError::Unauthorized(_) => "unauthorized",
            OidcError::Internal(_) => "server_error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            OidcError::DuplicateEmail(_) => StatusCode::CONFLICT,
            OidcError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            OidcError::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            OidcError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            OidcError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            OidcError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Description sent over the wire. Grant rejections share one opaque
    /// message; RFC 6749 requires replayed and expired codes to be
    /// indistinguishable to the caller.
    fn public_description(&self) -> String {
        match self {
            OidcError::CodeReplay
            | OidcError::Expired
            | OidcError::UnknownCode
            | OidcError::PkceMismatch
            | OidcError::GrantRedirectMismatch => {
                "the provided grant is invalid, expired or already used".into()
            }
            OidcError::InvalidCredentials => "invalid email or password".into(),
            OidcError::DuplicateEmail(_) => "an account with this email already exists".into(),
            OidcError::UnknownClient(_) => "unknown client".into(),
            OidcError::RedirectUriMismatch => {
                "redirect_uri is not registered for this client".into()
            }
            OidcError::InvalidState(s)
            | OidcError::InvalidRequest(s)
            | OidcError::InvalidClient(s)
            | OidcError::InvalidSignature(s)
            | OidcError::UnsupportedGrantType(s)
            | OidcError::UnsupportedResponseType(s)
            | OidcError::Unauthorized(s)
            | OidcError::Internal(s) => s.clone(),
        }
    }
}

impl IntoResponse for OidcError {
    fn into_response(self) -> Response {
        // Audit trail: the internal variant stays distinguishable in logs
        // even where the wire response is deliberately opaque.
        match &self {
            OidcError::CodeReplay => warn!(reason = "code_replay", "Rejecting grant"),
            OidcError::Expired => warn!(reason = "expired", "Rejecting grant"),
            OidcError::UnknownCode => warn!(reason = "unknown_code", "Rejecting grant"),
            OidcError::PkceMismatch => warn!(reason = "pkce_mismatch", "Rejecting grant"),
            OidcError::GrantRedirectMismatch => {
                warn!(reason = "redirect_uri_mismatch", "Rejecting grant")
            }
            _ => {}
        }
        let body = OidcErrorBody {
            error: self.error_code(),
            error_description: self.public_description(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

impl std::fmt::Display for OidcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.public_description())
    }
}

impl std::error::Error for OidcError {}
