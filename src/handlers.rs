use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect};
use axum::Form;
use axum::Json;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::OidcError;
use crate::grant::CodeExchange;
use crate::session::{PkceChallenge, PkceMethod};
use crate::state::ProviderState;

/// RFC 6749 §5.1 required headers for token responses.
type TokenResponseHeaders = [(header::HeaderName, &'static str); 2];
const TOKEN_HEADERS: TokenResponseHeaders = [
    (header::CACHE_CONTROL, "no-store"),
    (header::PRAGMA, "no-cache"),
];

/// Authorization request parameters (query string).
#[derive(Debug, Deserialize)]
pub(crate) struct AuthorizeRequest {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    /// Space-separated scope list.
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// GET /authorize
///
/// Starts an authorization session and sends the browser to the login page.
/// Client and redirect URI validation failures come back as 400 JSON; an
/// unvalidated redirect URI is never redirected to.
pub(crate) async fn authorize_handler(
    State(state): State<Arc<ProviderState>>,
    Query(req): Query<AuthorizeRequest>,
) -> Result<impl IntoResponse, OidcError> {
    if req.response_type != "code" {
        return Err(OidcError::UnsupportedResponseType(format!(
            "response_type '{}' is not supported",
            req.response_type
        )));
    }

    let pkce = match (req.code_challenge, req.code_challenge_method) {
        (Some(challenge), method) => Some(PkceChallenge {
            challenge,
            // RFC 7636 defaults the method to "plain" when absent.
            method: method
                .as_deref()
                .map(PkceMethod::parse)
                .transpose()?
                .unwrap_or(PkceMethod::Plain),
        }),
        (None, Some(_)) => {
            return Err(OidcError::InvalidRequest(
                "code_challenge_method given without code_challenge".into(),
            ))
        }
        (None, None) => None,
    };

    let scopes = req
        .scope
        .as_deref()
        .unwrap_or_default()
        .split_whitespace()
        .map(String::from)
        .collect();

    let session_id = state.sessions.start(
        &req.client_id,
        &req.redirect_uri,
        scopes,
        req.state,
        req.nonce,
        pkce,
    )?;

    let location = format!(
        "{}?{}",
        state.config.login_page,
        form_urlencoded::Serializer::new(String::new())
            .append_pair("session_id", &session_id)
            .finish()
    );
    debug!(%session_id, client_id = %req.client_id, "Redirecting to login page");
    Ok(Redirect::to(&location))
}

/// Login form posted by the external login UI.
#[derive(Debug, Deserialize)]
pub(crate) struct LoginRequest {
    pub session_id: String,
    pub email: String,
    pub password: String,
}

/// POST /login
///
/// The login-collaborator contract: authenticate the session with these
/// credentials and continue the flow, redirecting back to the relying party
/// with the freshly issued code.
pub(crate) async fn login_handler(
    State(state): State<Arc<ProviderState>>,
    Form(req): Form<LoginRequest>,
) -> Result<impl IntoResponse, OidcError> {
    let user = state
        .users
        .verify_password(&req.email, &req.password)
        .await?;

    state.sessions.authenticate(&req.session_id, &user.sub)?;
    let code = state.sessions.issue_code(&req.session_id)?;

    let session = state
        .sessions
        .get(&req.session_id)
        .ok_or_else(|| OidcError::Internal("session vanished after code issuance".into()))?;

    let mut query = form_urlencoded::Serializer::new(String::new());
    query.append_pair("code", &code);
    if let Some(rp_state) = &session.state {
        query.append_pair("state", rp_state);
    }
    let location = format!("{}?{}", session.redirect_uri, query.finish());
    debug!(session_id = %req.session_id, "Login succeeded, redirecting to relying party");
    Ok(Redirect::to(&location))
}

/// Token request parameters (form-urlencoded).
#[derive(Debug, Deserialize)]
pub(crate) struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
}

/// POST /oauth/token
pub(crate) async fn token_handler(
    State(state): State<Arc<ProviderState>>,
    headers: HeaderMap,
    Form(req): Form<TokenRequest>,
) -> Result<impl IntoResponse, OidcError> {
    let (client_id, client_secret) = client_credentials(&headers, &req)?;

    let token_set = match req.grant_type.as_str() {
        "authorization_code" => {
            let code = req
                .code
                .as_deref()
                .ok_or_else(|| OidcError::InvalidRequest("missing 'code' parameter".into()))?;
            let redirect_uri = req.redirect_uri.as_deref().ok_or_else(|| {
                OidcError::InvalidRequest("missing 'redirect_uri' parameter".into())
            })?;
            state
                .exchanger
                .exchange_code(CodeExchange {
                    code,
                    client_id: &client_id,
                    client_secret: &client_secret,
                    redirect_uri,
                    pkce_verifier: req.code_verifier.as_deref(),
                })
                .await?
        }
        "refresh_token" => {
            let refresh_token = req.refresh_token.as_deref().ok_or_else(|| {
                OidcError::InvalidRequest("missing 'refresh_token' parameter".into())
            })?;
            state
                .exchanger
                .exchange_refresh_token(refresh_token, &client_id, &client_secret)
                .await?
        }
        other => {
            return Err(OidcError::UnsupportedGrantType(format!(
                "grant_type '{other}' is not supported"
            )))
        }
    };

    // RFC 6749 §5.1: token responses MUST include Cache-Control: no-store.
    Ok((TOKEN_HEADERS, Json(token_set)))
}

/// Client authentication: HTTP Basic (`client_secret_basic`) takes
/// precedence, body parameters (`client_secret_post`) are the fallback.
fn client_credentials(
    headers: &HeaderMap,
    req: &TokenRequest,
) -> Result<(String, String), OidcError> {
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(encoded) = value.strip_prefix("Basic ") {
            let decoded = STANDARD
                .decode(encoded)
                .map_err(|_| OidcError::InvalidClient("malformed Basic credentials".into()))?;
            let decoded = String::from_utf8(decoded)
                .map_err(|_| OidcError::InvalidClient("malformed Basic credentials".into()))?;
            let (id, secret) = decoded
                .split_once(':')
                .ok_or_else(|| OidcError::InvalidClient("malformed Basic credentials".into()))?;
            return Ok((id.to_string(), secret.to_string()));
        }
    }

    let client_id = req
        .client_id
        .clone()
        .ok_or_else(|| OidcError::InvalidRequest("missing 'client_id' parameter".into()))?;
    let client_secret = req
        .client_secret
        .clone()
        .ok_or_else(|| OidcError::InvalidRequest("missing 'client_secret' parameter".into()))?;
    Ok((client_id, client_secret))
}

/// OpenID Connect discovery document.
#[derive(Serialize)]
pub(crate) struct DiscoveryDocument {
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
    jwks_uri: String,
    userinfo_endpoint: String,
    grant_types_supported: Vec<&'static str>,
    response_types_supported: Vec<&'static str>,
    subject_types_supported: Vec<&'static str>,
    id_token_signing_alg_values_supported: Vec<&'static str>,
    code_challenge_methods_supported: Vec<&'static str>,
    scopes_supported: Vec<&'static str>,
    token_endpoint_auth_methods_supported: Vec<&'static str>,
}

/// GET /.well-known/openid-configuration
pub(crate) async fn discovery_handler(
    State(state): State<Arc<ProviderState>>,
) -> Json<DiscoveryDocument> {
    let base = format!("{}{}", state.config.issuer, state.config.base_path);
    Json(DiscoveryDocument {
        issuer: state.config.issuer.clone(),
        authorization_endpoint: format!("{base}/authorize"),
        token_endpoint: format!("{base}/oauth/token"),
        jwks_uri: format!("{base}/.well-known/jwks.json"),
        userinfo_endpoint: format!("{base}/userinfo"),
        grant_types_supported: vec!["authorization_code", "refresh_token"],
        response_types_supported: vec!["code"],
        subject_types_supported: vec!["public"],
        id_token_signing_alg_values_supported: vec!["RS256"],
        code_challenge_methods_supported: vec!["S256", "plain"],
        scopes_supported: vec!["openid", "profile", "email"],
        token_endpoint_auth_methods_supported: vec!["client_secret_basic", "client_secret_post"],
    })
}

/// GET /.well-known/jwks.json
pub(crate) async fn jwks_handler(State(state): State<Arc<ProviderState>>) -> impl IntoResponse {
    Json(state.keys.jwks())
}

/// Userinfo response.
#[derive(Serialize)]
pub(crate) struct UserinfoResponse {
    sub: String,
    email: String,
    name: String,
    #[serde(flatten)]
    extra: std::collections::HashMap<String, serde_json::Value>,
}

/// GET /userinfo
pub(crate) async fn userinfo_handler(
    State(state): State<Arc<ProviderState>>,
    headers: HeaderMap,
) -> Result<Json<UserinfoResponse>, OidcError> {
    let token = extract_bearer_token(&headers)?;

    let claims = state
        .tokens
        .verify(token)
        .map_err(|e| OidcError::Unauthorized(format!("invalid token: {e}")))?;

    let sub = claims
        .get("sub")
        .and_then(|v| v.as_str())
        .ok_or_else(|| OidcError::Unauthorized("token missing 'sub' claim".into()))?;

    let user = state.users.find_by_sub(sub).await.ok_or_else(|| {
        warn!(%sub, "Userinfo request for unknown subject");
        OidcError::Unauthorized("user not found".into())
    })?;

    Ok(Json(UserinfoResponse {
        sub: user.sub,
        email: user.email,
        name: user.name,
        extra: user.extra_claims,
    }))
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, OidcError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| OidcError::Unauthorized("missing Authorization header".into()))?;

    auth.strip_prefix("Bearer ")
        .ok_or_else(|| OidcError::Unauthorized("expected Bearer token".into()))
}
