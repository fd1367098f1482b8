use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, decode_header, encode, Algorithm, Header, Validation};
use serde_json::json;

use crate::config::ProviderConfig;
use crate::error::OidcError;
use crate::keys::KeyRing;
use crate::store::OidcUser;

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> Result<u64, OidcError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| OidcError::Internal(format!("system clock error: {e}")))
}

/// Service for signing and verifying JWTs.
///
/// Signing always uses the key ring's single active key; verification
/// accepts any currently-published key, so tokens stay valid across a
/// rotation until the old key is dropped.
pub struct TokenService {
    keys: Arc<KeyRing>,
    config: ProviderConfig,
}

impl TokenService {
    pub(crate) fn new(keys: Arc<KeyRing>, config: ProviderConfig) -> Self {
        Self { keys, config }
    }

    /// Issue an ID token for `user`, bound to `client_id` as audience.
    pub fn issue_id_token(
        &self,
        user: &OidcUser,
        client_id: &str,
        nonce: Option<&str>,
    ) -> Result<String, OidcError> {
        let now = unix_now()?;
        let exp = now + self.config.token_ttl_secs;

        let mut claims = json!({
            "sub": user.sub,
            "iss": self.config.issuer,
            "aud": client_id,
            "iat": now,
            "exp": exp,
            "email": user.email,
            "name": user.name,
        });

        if let Some(nonce) = nonce {
            claims["nonce"] = serde_json::Value::String(nonce.to_string());
        }

        // Merge extra claims, skipping reserved standard claims to prevent forgery.
        const RESERVED: &[&str] = &["sub", "iss", "aud", "iat", "exp", "email", "name", "nonce"];
        if let serde_json::Value::Object(map) = &mut claims {
            for (k, v) in &user.extra_claims {
                if RESERVED.contains(&k.as_str()) {
                    tracing::warn!(claim = %k, "Ignoring reserved claim in extra_claims");
                } else {
                    map.insert(k.clone(), v.clone());
                }
            }
        }

        self.sign(&claims)
    }

    /// Issue an access token for `sub`, bound to `client_id` as audience.
    pub fn issue_access_token(
        &self,
        sub: &str,
        client_id: &str,
        scopes: &[String],
    ) -> Result<String, OidcError> {
        let now = unix_now()?;
        let exp = now + self.config.token_ttl_secs;

        let claims = json!({
            "sub": sub,
            "iss": self.config.issuer,
            "aud": client_id,
            "iat": now,
            "exp": exp,
            "scope": scopes.join(" "),
        });

        self.sign(&claims)
    }

    fn sign(&self, claims: &serde_json::Value) -> Result<String, OidcError> {
        let (kid, encoding_key) = self.keys.signing_key();
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid);

        encode(&header, claims, &encoding_key)
            .map_err(|e| OidcError::Internal(format!("failed to sign JWT: {e}")))
    }

    /// Verify a token against the published key set and return its claims.
    ///
    /// The audience varies per client, so only signature, expiry and issuer
    /// are checked here.
    pub fn verify(&self, token: &str) -> Result<serde_json::Value, OidcError> {
        let header = decode_header(token)
            .map_err(|e| OidcError::InvalidSignature(format!("failed to decode header: {e}")))?;

        if header.alg != Algorithm::RS256 {
            return Err(OidcError::InvalidSignature(format!(
                "disallowed JWT algorithm: {:?}",
                header.alg
            )));
        }

        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| OidcError::InvalidSignature("JWT header missing 'kid'".into()))?;
        let decoding_key = self
            .keys
            .decoding_key(kid)
            .ok_or_else(|| OidcError::InvalidSignature(format!("unknown signing key: {kid}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.validate_aud = false;
        validation.validate_exp = true;

        let token_data =
            decode::<serde_json::Value>(token, &decoding_key, &validation).map_err(|e| {
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => OidcError::Expired,
                    _ => OidcError::InvalidSignature(format!("token validation failed: {e}")),
                }
            })?;

        Ok(token_data.claims)
    }

    pub fn token_ttl_secs(&self) -> u64 {
        self.config.token_ttl_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        let keys = Arc::new(KeyRing::new("test-key"));
        TokenService::new(keys, ProviderConfig::default())
    }

    fn demo_user() -> OidcUser {
        OidcUser {
            sub: "user-1".into(),
            email: "user@demo.com".into(),
            name: "Demo User".into(),
            ..Default::default()
        }
    }

    #[test]
    fn sign_then_verify() {
        let service = service();
        let token = service
            .issue_id_token(&demo_user(), "client-1", Some("nonce-abc"))
            .unwrap();

        let claims = service.verify(&token).unwrap();
        assert_eq!(claims["sub"], "user-1");
        assert_eq!(claims["aud"], "client-1");
        assert_eq!(claims["nonce"], "nonce-abc");
        assert!(claims["exp"].as_u64().unwrap() > claims["iat"].as_u64().unwrap());
    }

    #[test]
    fn tampered_token_fails_verification() {
        let service = service();
        let token = service
            .issue_access_token("user-1", "client-1", &["openid".into()])
            .unwrap();

        // Flip a character in the payload segment.
        let mut parts: Vec<String> = token.split('.').map(String::from).collect();
        let mut payload: Vec<u8> = parts[1].clone().into_bytes();
        payload[0] = if payload[0] == b'A' { b'B' } else { b'A' };
        parts[1] = String::from_utf8(payload).unwrap();
        let tampered = parts.join(".");

        assert!(matches!(
            service.verify(&tampered),
            Err(OidcError::InvalidSignature(_))
        ));
    }

    #[test]
    fn expired_token_reports_expired() {
        let service = service();
        let now = unix_now().unwrap();
        // exp a full hour in the past, well beyond any validation leeway.
        let claims = json!({
            "sub": "user-1",
            "iss": service.config.issuer,
            "aud": "client-1",
            "iat": now - 7200,
            "exp": now - 3600,
        });
        let token = service.sign(&claims).unwrap();

        assert!(matches!(service.verify(&token), Err(OidcError::Expired)));
    }

    #[test]
    fn token_survives_key_rotation() {
        let keys = Arc::new(KeyRing::new("test-key"));
        let service = TokenService::new(keys.clone(), ProviderConfig::default());
        let token = service
            .issue_access_token("user-1", "client-1", &[])
            .unwrap();

        keys.rotate();
        // Old key still published: token verifies through the grace period.
        assert!(service.verify(&token).is_ok());

        keys.drop_retired();
        assert!(matches!(
            service.verify(&token),
            Err(OidcError::InvalidSignature(_))
        ));
    }
}
