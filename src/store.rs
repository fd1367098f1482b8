use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::OidcError;

/// An OIDC user profile.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OidcUser {
    /// Unique subject identifier.
    pub sub: String,
    /// Email address (unique per store).
    pub email: String,
    /// Display name.
    pub name: String,
    /// Additional claims to include in the ID token.
    pub extra_claims: HashMap<String, serde_json::Value>,
}

impl Default for OidcUser {
    fn default() -> Self {
        Self {
            sub: String::new(),
            email: String::new(),
            name: String::new(),
            extra_claims: HashMap::new(),
        }
    }
}

/// Pluggable user store for the OIDC provider.
///
/// Implement this trait to back the provider with your own storage
/// (SQLx, Redis, LDAP, etc.).
pub trait UserStore: Send + Sync + 'static {
    /// Create a user. Fails with `DuplicateEmail` if the email is taken.
    fn create_user(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> impl Future<Output = Result<OidcUser, OidcError>> + Send;
    /// Find a user by email.
    fn find_by_email(&self, email: &str) -> impl Future<Output = Option<OidcUser>> + Send;
    /// Verify a user's password, returning the profile on success.
    /// Disabled accounts fail like a wrong password.
    fn verify_password(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<OidcUser, OidcError>> + Send;
    /// Find a user by subject identifier (used by the userinfo endpoint).
    fn find_by_sub(&self, sub: &str) -> impl Future<Output = Option<OidcUser>> + Send;
    /// Replace a user's password. Returns `false` for unknown emails.
    fn set_password(
        &self,
        email: &str,
        new_password: &str,
    ) -> impl Future<Output = bool> + Send;
    /// Soft-disable an account. The row stays; sign-in stops working.
    fn disable_user(&self, email: &str) -> impl Future<Output = bool> + Send;
}

/// Object-safe wrapper for `UserStore`.
pub(crate) trait UserStoreErased: Send + Sync {
    fn create_user<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<OidcUser, OidcError>> + Send + 'a>>;
    fn find_by_email<'a>(
        &'a self,
        email: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<OidcUser>> + Send + 'a>>;
    fn verify_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<OidcUser, OidcError>> + Send + 'a>>;
    fn find_by_sub<'a>(
        &'a self,
        sub: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<OidcUser>> + Send + 'a>>;
    fn set_password<'a>(
        &'a self,
        email: &'a str,
        new_password: &'a str,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
    fn disable_user<'a>(
        &'a self,
        email: &'a str,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

impl<T: UserStore> UserStoreErased for T {
    fn create_user<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<OidcUser, OidcError>> + Send + 'a>> {
        Box::pin(UserStore::create_user(self, email, password, name))
    }

    fn find_by_email<'a>(
        &'a self,
        email: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<OidcUser>> + Send + 'a>> {
        Box::pin(UserStore::find_by_email(self, email))
    }

    fn verify_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<OidcUser, OidcError>> + Send + 'a>> {
        Box::pin(UserStore::verify_password(self, email, password))
    }

    fn find_by_sub<'a>(
        &'a self,
        sub: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<OidcUser>> + Send + 'a>> {
        Box::pin(UserStore::find_by_sub(self, sub))
    }

    fn set_password<'a>(
        &'a self,
        email: &'a str,
        new_password: &'a str,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(UserStore::set_password(self, email, new_password))
    }

    fn disable_user<'a>(
        &'a self,
        email: &'a str,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(UserStore::disable_user(self, email))
    }
}

struct UserRecord {
    user: OidcUser,
    password_hash: String,
    disabled: bool,
}

/// In-memory user store for development and testing.
///
/// Passwords are hashed with argon2.
pub struct InMemoryUserStore {
    /// Map: email -> record
    users: Arc<DashMap<String, UserRecord>>,
    /// Index: sub -> email (for find_by_sub)
    sub_index: Arc<DashMap<String, String>>,
}

impl InMemoryUserStore {
    /// Create a new empty in-memory user store.
    pub fn new() -> Self {
        Self {
            users: Arc::new(DashMap::new()),
            sub_index: Arc::new(DashMap::new()),
        }
    }

    /// Add a user with a plaintext password (hashed with argon2).
    ///
    /// Builder-style convenience for tests and setup code; use
    /// [`UserStore::create_user`] at runtime.
    pub fn add_user(self, email: impl Into<String>, password: &str, user: OidcUser) -> Self {
        let email = email.into();
        let password_hash = hash_password(password);
        self.sub_index.insert(user.sub.clone(), email.clone());
        self.users.insert(
            email,
            UserRecord {
                user,
                password_hash,
                disabled: false,
            },
        );
        self
    }
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_password(password: &str) -> String {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .expect("failed to hash password")
        .to_string()
}

impl UserStore for InMemoryUserStore {
    fn create_user(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> impl Future<Output = Result<OidcUser, OidcError>> + Send {
        let users = self.users.clone();
        let sub_index = self.sub_index.clone();
        let email = email.to_string();
        let password = password.to_string();
        let name = name.to_string();
        async move {
            if password.is_empty() {
                return Err(OidcError::InvalidRequest("password must not be empty".into()));
            }
            // Hash before taking the entry; argon2 must not run under the
            // shard lock or on the async runtime.
            let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
                .await
                .map_err(|e| OidcError::Internal(format!("hashing task failed: {e}")))?;

            match users.entry(email.clone()) {
                Entry::Occupied(_) => Err(OidcError::DuplicateEmail(email)),
                Entry::Vacant(entry) => {
                    let user = OidcUser {
                        sub: uuid::Uuid::new_v4().to_string(),
                        email: email.clone(),
                        name,
                        extra_claims: HashMap::new(),
                    };
                    sub_index.insert(user.sub.clone(), email);
                    entry.insert(UserRecord {
                        user: user.clone(),
                        password_hash,
                        disabled: false,
                    });
                    Ok(user)
                }
            }
        }
    }

    fn find_by_email(&self, email: &str) -> impl Future<Output = Option<OidcUser>> + Send {
        let result = self
            .users
            .get(email)
            .filter(|entry| !entry.disabled)
            .map(|entry| entry.user.clone());
        async move { result }
    }

    fn verify_password(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<OidcUser, OidcError>> + Send {
        let entry = self
            .users
            .get(email)
            .map(|e| (e.user.clone(), e.password_hash.clone(), e.disabled));
        let password = password.to_string();
        async move {
            let Some((user, hash_str, disabled)) = entry else {
                return Err(OidcError::InvalidCredentials);
            };
            // Run argon2 verification in a blocking task to avoid blocking
            // the async runtime.
            let valid = tokio::task::spawn_blocking(move || {
                let parsed = match PasswordHash::new(&hash_str) {
                    Ok(h) => h,
                    Err(_) => return false,
                };
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .await
            .unwrap_or(false);

            if valid && !disabled {
                Ok(user)
            } else {
                Err(OidcError::InvalidCredentials)
            }
        }
    }

    fn find_by_sub(&self, sub: &str) -> impl Future<Output = Option<OidcUser>> + Send {
        let result = self.sub_index.get(sub).and_then(|email_ref| {
            self.users
                .get(email_ref.value())
                .filter(|entry| !entry.disabled)
                .map(|entry| entry.user.clone())
        });
        async move { result }
    }

    fn set_password(
        &self,
        email: &str,
        new_password: &str,
    ) -> impl Future<Output = bool> + Send {
        let users = self.users.clone();
        let email = email.to_string();
        let new_password = new_password.to_string();
        async move {
            if !users.contains_key(&email) {
                return false;
            }
            let hash = tokio::task::spawn_blocking(move || hash_password(&new_password)).await;
            let Ok(hash) = hash else { return false };
            match users.get_mut(&email) {
                Some(mut record) => {
                    record.password_hash = hash;
                    true
                }
                None => false,
            }
        }
    }

    fn disable_user(&self, email: &str) -> impl Future<Output = bool> + Send {
        let result = match self.users.get_mut(email) {
            Some(mut record) => {
                record.disabled = true;
                true
            }
            None => false,
        };
        async move { result }
    }
}

#[cfg(test)]
mod tests {
    // `UserStoreErased` is blanket-implemented for every `UserStore`, so a
    // glob import would make these method calls ambiguous; import only the
    // public trait.
    use super::{InMemoryUserStore, OidcError, UserStore};

    #[tokio::test]
    async fn create_verify_round_trip() {
        let store = InMemoryUserStore::new();
        let user = store
            .create_user("user@demo.com", "password1234", "Demo User")
            .await
            .unwrap();
        assert!(!user.sub.is_empty());

        let verified = store
            .verify_password("user@demo.com", "password1234")
            .await
            .unwrap();
        assert_eq!(verified.sub, user.sub);
        assert_eq!(verified.email, "user@demo.com");
    }

    #[tokio::test]
    async fn duplicate_email_rejected() {
        let store = InMemoryUserStore::new();
        store
            .create_user("user@demo.com", "password1234", "Demo User")
            .await
            .unwrap();
        let err = store
            .create_user("user@demo.com", "other-password", "Other")
            .await
            .unwrap_err();
        assert!(matches!(err, OidcError::DuplicateEmail(_)));
    }

    #[tokio::test]
    async fn wrong_password_rejected() {
        let store = InMemoryUserStore::new();
        store
            .create_user("user@demo.com", "password1234", "Demo User")
            .await
            .unwrap();
        let err = store
            .verify_password("user@demo.com", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, OidcError::InvalidCredentials));
    }

    #[tokio::test]
    async fn disabled_user_cannot_sign_in() {
        let store = InMemoryUserStore::new();
        let user = store
            .create_user("user@demo.com", "password1234", "Demo User")
            .await
            .unwrap();
        assert!(store.disable_user("user@demo.com").await);

        let err = store
            .verify_password("user@demo.com", "password1234")
            .await
            .unwrap_err();
        assert!(matches!(err, OidcError::InvalidCredentials));
        assert!(store.find_by_sub(&user.sub).await.is_none());
    }

    #[tokio::test]
    async fn password_change_takes_effect() {
        let store = InMemoryUserStore::new();
        store
            .create_user("user@demo.com", "password1234", "Demo User")
            .await
            .unwrap();
        assert!(store.set_password("user@demo.com", "new-password").await);

        assert!(store
            .verify_password("user@demo.com", "password1234")
            .await
            .is_err());
        assert!(store
            .verify_password("user@demo.com", "new-password")
            .await
            .is_ok());
    }
}
