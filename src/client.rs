use argon2::password_hash::rand_core::OsRng as HashOsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use dashmap::DashMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::OidcError;

/// Metadata supplied when registering an OAuth 2.0 client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientMetadata {
    /// Human-readable client name.
    pub name: String,
    /// Allowed redirect URIs. Matching is exact; no prefix or
    /// trailing-slash normalization, to rule out open-redirect abuse.
    pub redirect_uris: Vec<String>,
    /// Allowed grant types (e.g. `authorization_code`, `refresh_token`).
    pub grant_types: Vec<String>,
    /// Token-endpoint auth method (`client_secret_basic` or
    /// `client_secret_post`).
    pub token_endpoint_auth_method: String,
    /// Optional homepage of the client.
    pub client_uri: Option<String>,
}

/// A registered client as returned by lookups.
///
/// Carries the secret only as a verifiable argon2 hash, never in plaintext.
#[derive(Clone, Debug)]
pub struct Client {
    pub client_id: String,
    pub metadata: ClientMetadata,
    secret_hash: String,
}

impl Client {
    /// The argon2 hash of the client secret.
    pub fn secret_hash(&self) -> &str {
        &self.secret_hash
    }

    /// Exact-match check of a redirect URI against the registered set.
    pub fn redirect_uri_allowed(&self, uri: &str) -> bool {
        self.metadata.redirect_uris.iter().any(|r| r == uri)
    }
}

/// Credentials handed out exactly once at registration time.
#[derive(Debug, Serialize)]
pub struct RegisteredClient {
    pub client_id: String,
    pub client_secret: String,
}

/// Registry of OAuth 2.0 clients.
///
/// Registrations are immutable after creation, except for secret rotation.
pub struct ClientRegistry {
    clients: DashMap<String, Client>,
}

impl ClientRegistry {
    /// Create an empty client registry.
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    /// Register a client, generating its id and secret.
    ///
    /// The plaintext secret is returned here and never again; only its
    /// argon2 hash is stored.
    pub async fn register(&self, metadata: ClientMetadata) -> Result<RegisteredClient, OidcError> {
        if metadata.redirect_uris.is_empty() {
            return Err(OidcError::InvalidRequest(
                "client registration requires at least one redirect_uri".into(),
            ));
        }
        let client_id = uuid::Uuid::new_v4().simple().to_string();
        let client_secret = random_secret();

        let secret = client_secret.clone();
        let secret_hash = tokio::task::spawn_blocking(move || hash_secret(&secret))
            .await
            .map_err(|e| OidcError::Internal(format!("hashing task failed: {e}")))?;

        self.clients.insert(
            client_id.clone(),
            Client {
                client_id: client_id.clone(),
                metadata,
                secret_hash,
            },
        );
        tracing::debug!(%client_id, "Registered OAuth client");

        Ok(RegisteredClient {
            client_id,
            client_secret,
        })
    }

    /// Look up a client registration.
    pub fn lookup(&self, client_id: &str) -> Option<Client> {
        self.clients.get(client_id).map(|c| c.clone())
    }

    /// Validate client credentials.
    ///
    /// Returns `true` if the client exists and the secret matches.
    /// Uses `spawn_blocking` to avoid blocking the async runtime during
    /// argon2 verification.
    pub(crate) async fn validate(&self, client_id: &str, client_secret: &str) -> bool {
        let Some(hash_str) = self.clients.get(client_id).map(|c| c.secret_hash.clone()) else {
            return false;
        };
        let secret = client_secret.to_string();
        tokio::task::spawn_blocking(move || {
            let parsed = match PasswordHash::new(&hash_str) {
                Ok(h) => h,
                Err(_) => return false,
            };
            Argon2::default()
                .verify_password(secret.as_bytes(), &parsed)
                .is_ok()
        })
        .await
        .unwrap_or(false)
    }

    /// Replace a client's secret, returning the new plaintext once.
    pub async fn rotate_secret(&self, client_id: &str) -> Result<String, OidcError> {
        if !self.clients.contains_key(client_id) {
            return Err(OidcError::UnknownClient(client_id.to_string()));
        }
        let client_secret = random_secret();
        let secret = client_secret.clone();
        let secret_hash = tokio::task::spawn_blocking(move || hash_secret(&secret))
            .await
            .map_err(|e| OidcError::Internal(format!("hashing task failed: {e}")))?;

        match self.clients.get_mut(client_id) {
            Some(mut client) => {
                client.secret_hash = secret_hash;
                Ok(client_secret)
            }
            None => Err(OidcError::UnknownClient(client_id.to_string())),
        }
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_secret(secret: &str) -> String {
    let salt = SaltString::generate(&mut HashOsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .expect("failed to hash client secret")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_metadata() -> ClientMetadata {
        ClientMetadata {
            name: "My External App".into(),
            redirect_uris: vec!["http://localhost:4000/callback".into()],
            grant_types: vec!["authorization_code".into(), "refresh_token".into()],
            token_endpoint_auth_method: "client_secret_basic".into(),
            client_uri: Some("http://localhost:4000".into()),
        }
    }

    #[tokio::test]
    async fn register_lookup_round_trip() {
        let registry = ClientRegistry::new();
        let registered = registry.register(demo_metadata()).await.unwrap();

        let client = registry.lookup(&registered.client_id).unwrap();
        assert_eq!(client.metadata.name, "My External App");
        assert_eq!(
            client.metadata.redirect_uris,
            vec!["http://localhost:4000/callback"]
        );
        assert_eq!(
            client.metadata.token_endpoint_auth_method,
            "client_secret_basic"
        );

        // The lookup exposes a verifiable hash, not the secret itself.
        assert_ne!(client.secret_hash(), registered.client_secret);
        let parsed = PasswordHash::new(client.secret_hash()).unwrap();
        assert!(Argon2::default()
            .verify_password(registered.client_secret.as_bytes(), &parsed)
            .is_ok());
    }

    #[tokio::test]
    async fn validate_rejects_wrong_secret() {
        let registry = ClientRegistry::new();
        let registered = registry.register(demo_metadata()).await.unwrap();

        assert!(
            registry
                .validate(&registered.client_id, &registered.client_secret)
                .await
        );
        assert!(!registry.validate(&registered.client_id, "wrong").await);
        assert!(!registry.validate("no-such-client", "whatever").await);
    }

    #[tokio::test]
    async fn secret_rotation_invalidates_old_secret() {
        let registry = ClientRegistry::new();
        let registered = registry.register(demo_metadata()).await.unwrap();

        let new_secret = registry.rotate_secret(&registered.client_id).await.unwrap();
        assert_ne!(new_secret, registered.client_secret);
        assert!(
            !registry
                .validate(&registered.client_id, &registered.client_secret)
                .await
        );
        assert!(registry.validate(&registered.client_id, &new_secret).await);
    }

    #[tokio::test]
    async fn registration_requires_redirect_uri() {
        let registry = ClientRegistry::new();
        let mut metadata = demo_metadata();
        metadata.redirect_uris.clear();
        let err = registry.register(metadata).await.unwrap_err();
        assert!(matches!(err, OidcError::InvalidRequest(_)));
    }
}
