use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use dashmap::DashMap;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::client::ClientRegistry;
use crate::error::OidcError;
use crate::session::{PkceChallenge, PkceMethod, SessionEngine};
use crate::store::UserStoreErased;
use crate::token::{unix_now, TokenService};

/// Tokens minted by a successful exchange.
#[derive(Debug, Serialize)]
pub struct TokenSet {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub scope: String,
}

/// Parameters of an authorization-code exchange.
pub struct CodeExchange<'a> {
    pub code: &'a str,
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub redirect_uri: &'a str,
    pub pkce_verifier: Option<&'a str>,
}

/// A stored refresh grant, bound to the user/client/scopes it was minted for.
struct RefreshGrant {
    sub: String,
    client_id: String,
    scopes: Vec<String>,
    expires_at: u64,
}

/// Validates grants and mints token sets.
///
/// Validation of the request runs against a session snapshot; only once the
/// request is known-good is the code consumed, so a mismatching client never
/// burns a code, while replay safety rests on the engine's atomic `consume`.
pub(crate) struct GrantExchanger {
    sessions: Arc<SessionEngine>,
    clients: Arc<ClientRegistry>,
    users: Arc<dyn UserStoreErased>,
    tokens: Arc<TokenService>,
    refresh_grants: DashMap<String, RefreshGrant>,
    refresh_ttl_secs: u64,
}

impl GrantExchanger {
    pub fn new(
        sessions: Arc<SessionEngine>,
        clients: Arc<ClientRegistry>,
        users: Arc<dyn UserStoreErased>,
        tokens: Arc<TokenService>,
        refresh_ttl_secs: u64,
    ) -> Self {
        Self {
            sessions,
            clients,
            users,
            tokens,
            refresh_grants: DashMap::new(),
            refresh_ttl_secs,
        }
    }

    /// Exchange a single-use authorization code for tokens.
    pub async fn exchange_code(&self, req: CodeExchange<'_>) -> Result<TokenSet, OidcError> {
        if !self.clients.validate(req.client_id, req.client_secret).await {
            warn!(client_id = %req.client_id, "Invalid client credentials at token endpoint");
            return Err(OidcError::InvalidClient("invalid client credentials".into()));
        }

        let snapshot = self.sessions.session_for_code(req.code)?;
        if snapshot.client_id != req.client_id {
            // A code issued to one client is worthless to another.
            warn!(client_id = %req.client_id, "Code presented by a different client");
            return Err(OidcError::UnknownCode);
        }
        if snapshot.redirect_uri != req.redirect_uri {
            return Err(OidcError::GrantRedirectMismatch);
        }
        if let Some(pkce) = &snapshot.pkce {
            let verifier = req.pkce_verifier.ok_or(OidcError::PkceMismatch)?;
            if !pkce_matches(pkce, verifier) {
                return Err(OidcError::PkceMismatch);
            }
        }

        // Request is valid; now take the single-use transition.
        let session = self.sessions.consume(req.code)?;
        let sub = session
            .user_id
            .ok_or_else(|| OidcError::Internal("consumed session has no user".into()))?;
        let user = self
            .users
            .find_by_sub(&sub)
            .await
            .ok_or_else(|| OidcError::Internal(format!("no user for subject {sub}")))?;

        let id_token = self
            .tokens
            .issue_id_token(&user, &session.client_id, session.nonce.as_deref())?;
        let access_token =
            self.tokens
                .issue_access_token(&sub, &session.client_id, &session.scopes)?;
        let refresh_token = self.store_refresh_grant(&sub, &session.client_id, session.scopes.clone())?;

        debug!(client_id = %session.client_id, %sub, "Exchanged authorization code");
        Ok(TokenSet {
            access_token,
            token_type: "Bearer",
            expires_in: self.tokens.token_ttl_secs(),
            refresh_token,
            id_token: Some(id_token),
            scope: session.scopes.join(" "),
        })
    }

    /// Exchange a refresh token for a fresh token set.
    ///
    /// Refresh tokens are single-use: the presented token is removed
    /// atomically and a replacement is issued with the new set.
    pub async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenSet, OidcError> {
        if !self.clients.validate(client_id, client_secret).await {
            warn!(%client_id, "Invalid client credentials at token endpoint");
            return Err(OidcError::InvalidClient("invalid client credentials".into()));
        }

        // DashMap::remove is the single winner point for concurrent refreshes.
        let (_, grant) = self
            .refresh_grants
            .remove(refresh_token)
            .ok_or(OidcError::UnknownCode)?;

        if grant.client_id != client_id {
            warn!(%client_id, "Refresh token presented by a different client");
            return Err(OidcError::UnknownCode);
        }
        if unix_now()? >= grant.expires_at {
            return Err(OidcError::Expired);
        }

        let user = self
            .users
            .find_by_sub(&grant.sub)
            .await
            .ok_or(OidcError::UnknownCode)?;

        let id_token = self.tokens.issue_id_token(&user, client_id, None)?;
        let access_token = self
            .tokens
            .issue_access_token(&grant.sub, client_id, &grant.scopes)?;
        let new_refresh = self.store_refresh_grant(&grant.sub, client_id, grant.scopes.clone())?;

        debug!(%client_id, sub = %grant.sub, "Rotated refresh token");
        Ok(TokenSet {
            access_token,
            token_type: "Bearer",
            expires_in: self.tokens.token_ttl_secs(),
            refresh_token: new_refresh,
            id_token: Some(id_token),
            scope: grant.scopes.join(" "),
        })
    }

    fn store_refresh_grant(
        &self,
        sub: &str,
        client_id: &str,
        scopes: Vec<String>,
    ) -> Result<String, OidcError> {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);
        self.refresh_grants.insert(
            token.clone(),
            RefreshGrant {
                sub: sub.to_string(),
                client_id: client_id.to_string(),
                scopes,
                expires_at: unix_now()? + self.refresh_ttl_secs,
            },
        );
        Ok(token)
    }
}

/// Check a PKCE verifier against the stored challenge.
fn pkce_matches(challenge: &PkceChallenge, verifier: &str) -> bool {
    match challenge.method {
        PkceMethod::S256 => {
            let digest = Sha256::digest(verifier.as_bytes());
            URL_SAFE_NO_PAD.encode(digest) == challenge.challenge
        }
        PkceMethod::Plain => verifier == challenge.challenge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s256_verifier_matches_its_challenge() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        // Challenge from RFC 7636 appendix B for the verifier above.
        let challenge = PkceChallenge {
            challenge: "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".into(),
            method: PkceMethod::S256,
        };
        assert!(pkce_matches(&challenge, verifier));
        assert!(!pkce_matches(&challenge, "some-other-verifier"));
    }

    #[test]
    fn plain_method_compares_directly() {
        let challenge = PkceChallenge {
            challenge: "plain-value".into(),
            method: PkceMethod::Plain,
        };
        assert!(pkce_matches(&challenge, "plain-value"));
        assert!(!pkce_matches(&challenge, "other"));
    }
}
