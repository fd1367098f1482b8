//! Embedded OIDC identity provider.
//!
//! Implements the authorization-code flow with PKCE, RS256 JWT issuance with
//! key rotation, and JWKS publication, without an external identity provider.
//! Build a [`Provider`], mount its [`axum::Router`], and point a login UI at
//! `POST /login`.
//!
//! # Example
//!
//! ```ignore
//! use embedded_oidc::{ClientMetadata, InMemoryUserStore, OidcProvider};
//!
//! let provider = OidcProvider::new()
//!     .issuer("http://localhost:3000")
//!     .with_user_store(InMemoryUserStore::new())
//!     .build();
//!
//! // One-time setup: a demo user and a relying party.
//! provider
//!     .create_user("user@demo.com", "password1234", "Demo User")
//!     .await?;
//! let client = provider
//!     .register_client(ClientMetadata {
//!         name: "My External App".into(),
//!         redirect_uris: vec!["http://localhost:4000/callback".into()],
//!         grant_types: vec!["authorization_code".into(), "refresh_token".into()],
//!         token_endpoint_auth_method: "client_secret_basic".into(),
//!         client_uri: Some("http://localhost:4000".into()),
//!     })
//!     .await?;
//! println!("client_id={} client_secret={}", client.client_id, client.client_secret);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, provider.router()).await?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod grant;
pub mod keys;
pub mod session;
pub mod store;
pub mod token;

mod handlers;
mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::grant::GrantExchanger;
use crate::store::UserStoreErased;

pub use client::{Client, ClientMetadata, ClientRegistry, RegisteredClient};
pub use config::ProviderConfig;
pub use error::OidcError;
pub use keys::{JwksDocument, KeyRing};
pub use session::{AuthSession, PkceChallenge, PkceMethod, SessionEngine, SessionStatus};
pub use store::{InMemoryUserStore, OidcUser, UserStore};
pub use token::TokenService;

/// Builder for the embedded OIDC provider.
///
/// Defaults: issuer `http://localhost:3000`, login page `/login`, code TTL
/// 600 s, token TTL 3600 s.
pub struct OidcProvider {
    config: ProviderConfig,
    user_store: Option<Arc<dyn UserStoreErased>>,
    client_registry: Option<ClientRegistry>,
}

impl OidcProvider {
    /// Create a new provider builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: ProviderConfig::default(),
            user_store: None,
            client_registry: None,
        }
    }

    /// Set the issuer (`iss` claim and discovery base URL).
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.config.issuer = issuer.into();
        self
    }

    /// Set the base path for all provider endpoints.
    pub fn base_path(mut self, path: impl Into<String>) -> Self {
        self.config.base_path = path.into();
        self
    }

    /// Set the path `/authorize` redirects unauthenticated browsers to.
    pub fn login_page(mut self, path: impl Into<String>) -> Self {
        self.config.login_page = path.into();
        self
    }

    /// Set the authorization session / code time-to-live in seconds.
    pub fn code_ttl(mut self, secs: u64) -> Self {
        self.config.code_ttl_secs = secs;
        self
    }

    /// Set the access/ID token time-to-live in seconds.
    pub fn token_ttl(mut self, secs: u64) -> Self {
        self.config.token_ttl_secs = secs;
        self
    }

    /// Set the refresh token time-to-live in seconds.
    pub fn refresh_ttl(mut self, secs: u64) -> Self {
        self.config.refresh_ttl_secs = secs;
        self
    }

    /// Set the user store (required).
    pub fn with_user_store(mut self, store: impl UserStore) -> Self {
        self.user_store = Some(Arc::new(store));
        self
    }

    /// Set a pre-populated client registry.
    pub fn with_client_registry(mut self, registry: ClientRegistry) -> Self {
        self.client_registry = Some(registry);
        self
    }

    /// Generate the signing key and assemble the provider.
    ///
    /// # Panics
    ///
    /// Panics if no user store was configured.
    pub fn build(self) -> Provider {
        let users = self
            .user_store
            .expect("OidcProvider: user store is required - call .with_user_store()");
        let clients = Arc::new(self.client_registry.unwrap_or_default());
        let keys = Arc::new(KeyRing::new(&self.config.kid_prefix));
        let tokens = Arc::new(TokenService::new(keys.clone(), self.config.clone()));
        let sessions = Arc::new(SessionEngine::new(
            clients.clone(),
            self.config.code_ttl_secs,
        ));
        let exchanger = GrantExchanger::new(
            sessions.clone(),
            clients.clone(),
            users.clone(),
            tokens.clone(),
            self.config.refresh_ttl_secs,
        );

        Provider {
            state: Arc::new(state::ProviderState {
                keys,
                tokens,
                users,
                clients,
                sessions,
                exchanger,
                config: self.config,
            }),
        }
    }
}

impl Default for OidcProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// A running provider: route source plus the operational surface
/// (user creation, client registration, key rotation).
#[derive(Clone)]
pub struct Provider {
    state: Arc<state::ProviderState>,
}

impl Provider {
    /// Build the provider's Axum router.
    pub fn router(&self) -> Router {
        let router = Router::new()
            .route("/authorize", get(handlers::authorize_handler))
            .route("/login", post(handlers::login_handler))
            .route("/oauth/token", post(handlers::token_handler))
            .route(
                "/.well-known/openid-configuration",
                get(handlers::discovery_handler),
            )
            .route("/.well-known/jwks.json", get(handlers::jwks_handler))
            .route("/userinfo", get(handlers::userinfo_handler))
            .with_state(self.state.clone());

        if self.state.config.base_path.is_empty() {
            router
        } else {
            Router::new().nest(&self.state.config.base_path, router)
        }
    }

    /// Create a user in the configured store.
    pub async fn create_user(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<OidcUser, OidcError> {
        self.state.users.create_user(email, password, name).await
    }

    /// Replace a user's password. Returns `false` for unknown emails.
    pub async fn set_password(&self, email: &str, new_password: &str) -> bool {
        self.state.users.set_password(email, new_password).await
    }

    /// Soft-disable an account; the user row is never hard-deleted.
    pub async fn disable_user(&self, email: &str) -> bool {
        self.state.users.disable_user(email).await
    }

    /// Register an OAuth client; the returned secret is shown exactly once.
    pub async fn register_client(
        &self,
        metadata: ClientMetadata,
    ) -> Result<RegisteredClient, OidcError> {
        self.state.clients.register(metadata).await
    }

    /// Rotate a client's secret, returning the new plaintext once.
    pub async fn rotate_client_secret(&self, client_id: &str) -> Result<String, OidcError> {
        self.state.clients.rotate_secret(client_id).await
    }

    /// Rotate the signing key. The previous key stays published for
    /// verification until [`KeyRing::drop_retired`] ends the grace period.
    pub fn rotate_keys(&self) {
        self.state.keys.rotate()
    }

    /// The key ring, for JWKS inspection and grace-period control.
    pub fn keys(&self) -> &KeyRing {
        &self.state.keys
    }

    /// The session engine, for transports driving the flow directly.
    pub fn sessions(&self) -> &SessionEngine {
        &self.state.sessions
    }

    /// The token service, for out-of-band verification.
    pub fn token_service(&self) -> &TokenService {
        &self.state.tokens
    }
}

pub mod prelude {
    //! Re-exports of the most commonly used provider types.
    pub use crate::{
        ClientMetadata, ClientRegistry, InMemoryUserStore, OidcProvider, OidcUser, Provider,
        UserStore,
    };
}
