use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use dashmap::DashMap;
use rand::RngCore;
use tracing::debug;

use crate::client::ClientRegistry;
use crate::error::OidcError;
use crate::token::unix_now;

/// PKCE code-challenge method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkceMethod {
    S256,
    Plain,
}

impl PkceMethod {
    pub fn parse(value: &str) -> Result<Self, OidcError> {
        match value {
            "S256" => Ok(PkceMethod::S256),
            "plain" => Ok(PkceMethod::Plain),
            other => Err(OidcError::InvalidRequest(format!(
                "unsupported code_challenge_method '{other}'"
            ))),
        }
    }
}

/// PKCE challenge recorded at `start` and checked at code exchange.
#[derive(Clone, Debug)]
pub struct PkceChallenge {
    pub challenge: String,
    pub method: PkceMethod,
}

/// Lifecycle of an authorization session.
///
/// `Consumed` is terminal; expiry is enforced lazily by timestamp at every
/// access, so a session never transitions "into" an expired status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Initiated,
    Authenticated,
    CodeIssued,
    Consumed,
}

/// An in-flight authorization request.
#[derive(Clone, Debug)]
pub struct AuthSession {
    pub id: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Opaque value echoed back to the relying party.
    pub state: Option<String>,
    /// Nonce to embed in the ID token, if the relying party sent one.
    pub nonce: Option<String>,
    pub pkce: Option<PkceChallenge>,
    /// Set when the user signs in; `None` while `Initiated`.
    pub user_id: Option<String>,
    pub status: SessionStatus,
    code: Option<String>,
    expires_at: u64,
}

impl AuthSession {
    fn expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Tracks authorization sessions through
/// `Initiated -> Authenticated -> CodeIssued -> Consumed`.
///
/// `consume` is the only concurrency-sensitive path: the check-and-transition
/// runs under the DashMap shard write lock, so of N concurrent exchanges of
/// the same code exactly one succeeds. Independent sessions never contend.
pub struct SessionEngine {
    sessions: DashMap<String, AuthSession>,
    /// Index: authorization code -> session id.
    codes: DashMap<String, String>,
    clients: Arc<ClientRegistry>,
    ttl_secs: u64,
}

impl SessionEngine {
    pub(crate) fn new(clients: Arc<ClientRegistry>, ttl_secs: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            codes: DashMap::new(),
            clients,
            ttl_secs,
        }
    }

    /// Start a session for a relying party's authorization request.
    ///
    /// The redirect URI must exactly match one registered for the client;
    /// nothing is ever redirected to an unvalidated URI.
    pub fn start(
        &self,
        client_id: &str,
        redirect_uri: &str,
        scopes: Vec<String>,
        state: Option<String>,
        nonce: Option<String>,
        pkce: Option<PkceChallenge>,
    ) -> Result<String, OidcError> {
        let client = self
            .clients
            .lookup(client_id)
            .ok_or_else(|| OidcError::UnknownClient(client_id.to_string()))?;
        if !client.redirect_uri_allowed(redirect_uri) {
            return Err(OidcError::RedirectUriMismatch);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let session = AuthSession {
            id: id.clone(),
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            scopes,
            state,
            nonce,
            pkce,
            user_id: None,
            status: SessionStatus::Initiated,
            code: None,
            expires_at: unix_now()? + self.ttl_secs,
        };
        debug!(session_id = %id, %client_id, "Started authorization session");
        self.sessions.insert(id.clone(), session);
        Ok(id)
    }

    /// Bind an authenticated user to the session.
    pub fn authenticate(&self, session_id: &str, user_id: &str) -> Result<(), OidcError> {
        let now = unix_now()?;
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| OidcError::InvalidState("unknown session".into()))?;
        if session.expired(now) {
            return Err(OidcError::Expired);
        }
        if session.status != SessionStatus::Initiated {
            return Err(OidcError::InvalidState(format!(
                "cannot authenticate a session in state {:?}",
                session.status
            )));
        }
        session.user_id = Some(user_id.to_string());
        session.status = SessionStatus::Authenticated;
        Ok(())
    }

    /// Issue the single-use authorization code for an authenticated session.
    pub fn issue_code(&self, session_id: &str) -> Result<String, OidcError> {
        let now = unix_now()?;
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| OidcError::InvalidState("unknown session".into()))?;
        if session.expired(now) {
            return Err(OidcError::Expired);
        }
        if session.status != SessionStatus::Authenticated {
            return Err(OidcError::InvalidState(format!(
                "cannot issue a code for a session in state {:?}",
                session.status
            )));
        }

        let code = random_code();
        session.code = Some(code.clone());
        session.status = SessionStatus::CodeIssued;
        let session_id = session.id.clone();
        drop(session);

        self.codes.insert(code.clone(), session_id);
        Ok(code)
    }

    /// Snapshot of the session a code belongs to, without consuming it.
    ///
    /// The grant exchanger validates redirect URI and PKCE against this
    /// snapshot first so a mismatching request does not burn the code.
    pub fn session_for_code(&self, code: &str) -> Result<AuthSession, OidcError> {
        let session_id = self
            .codes
            .get(code)
            .map(|id| id.clone())
            .ok_or(OidcError::UnknownCode)?;
        self.sessions
            .get(&session_id)
            .map(|s| s.clone())
            .ok_or(OidcError::UnknownCode)
    }

    /// Atomically consume an authorization code.
    ///
    /// Exactly one of any number of concurrent calls with the same code
    /// succeeds; the rest fail `CodeReplay`. The status check and the
    /// transition to `Consumed` happen under the shard write lock.
    pub fn consume(&self, code: &str) -> Result<AuthSession, OidcError> {
        let now = unix_now()?;
        let session_id = self
            .codes
            .get(code)
            .map(|id| id.clone())
            .ok_or(OidcError::UnknownCode)?;
        let mut session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(OidcError::UnknownCode)?;

        if session.expired(now) {
            return Err(OidcError::Expired);
        }
        match session.status {
            SessionStatus::CodeIssued => {
                session.status = SessionStatus::Consumed;
                debug!(session_id = %session.id, "Consumed authorization code");
                Ok(session.clone())
            }
            SessionStatus::Consumed => Err(OidcError::CodeReplay),
            other => Err(OidcError::InvalidState(format!(
                "code presented for a session in state {other:?}"
            ))),
        }
    }

    /// Snapshot of a session by id, for transports that need redirect data.
    pub fn get(&self, session_id: &str) -> Option<AuthSession> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// Reclaim expired sessions and their codes. Expiry is otherwise lazy;
    /// calling this periodically is optional.
    pub fn purge_expired(&self) -> Result<usize, OidcError> {
        let now = unix_now()?;
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.expired(now));
        self.codes
            .retain(|_, session_id| self.sessions.contains_key(session_id));
        Ok(before - self.sessions.len())
    }
}

fn random_code() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
