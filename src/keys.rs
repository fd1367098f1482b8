use std::sync::RwLock;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rand::rngs::OsRng;
use rsa::pkcs8::EncodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Serialize;

/// A single RSA signing key with its JWKS components.
struct SigningKey {
    kid: String,
    encoding_key: EncodingKey,
    /// Base64url-encoded RSA modulus (for JWKS).
    n: String,
    /// Base64url-encoded RSA public exponent (for JWKS).
    e: String,
}

impl SigningKey {
    /// Generate a new RSA-2048 key.
    fn generate(kid: String) -> Self {
        let private_key =
            RsaPrivateKey::new(&mut OsRng, 2048).expect("failed to generate RSA-2048 key");
        let public_key = RsaPublicKey::from(&private_key);

        // Export private key as PKCS8 PEM for jsonwebtoken EncodingKey.
        let pkcs8_pem = private_key
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .expect("failed to export RSA key as PKCS8 PEM");
        let encoding_key = EncodingKey::from_rsa_pem(pkcs8_pem.as_bytes())
            .expect("failed to create EncodingKey from RSA PEM");

        let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());

        Self {
            kid,
            encoding_key,
            n,
            e,
        }
    }

    fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_rsa_components(&self.n, &self.e)
            .expect("failed to create DecodingKey from RSA components")
    }
}

struct RingInner {
    active: SigningKey,
    /// Rotated-out keys kept valid for verification during the grace period.
    retired: Vec<SigningKey>,
    next_kid: u64,
}

/// Set of RSA keys for JWT signing and JWKS publication.
///
/// Exactly one key is active for signing; rotated keys remain published so
/// tokens signed before a rotation keep verifying until they are dropped.
pub struct KeyRing {
    inner: RwLock<RingInner>,
    kid_prefix: String,
}

impl KeyRing {
    /// Create a ring with a freshly generated active key.
    pub fn new(kid_prefix: &str) -> Self {
        let active = SigningKey::generate(format!("{kid_prefix}-1"));
        Self {
            inner: RwLock::new(RingInner {
                active,
                retired: Vec::new(),
                next_kid: 2,
            }),
            kid_prefix: kid_prefix.to_string(),
        }
    }

    /// Retire the active key and generate a new one.
    ///
    /// The retired key stays in the published set for verification.
    pub fn rotate(&self) {
        let mut inner = self.inner.write().expect("key ring lock poisoned");
        let kid = format!("{}-{}", self.kid_prefix, inner.next_kid);
        inner.next_kid += 1;
        let new_active = SigningKey::generate(kid);
        let old = std::mem::replace(&mut inner.active, new_active);
        tracing::info!(retired = %old.kid, active = %inner.active.kid, "Rotated signing key");
        inner.retired.push(old);
    }

    /// Drop all retired keys, ending their verification grace period.
    pub fn drop_retired(&self) {
        let mut inner = self.inner.write().expect("key ring lock poisoned");
        inner.retired.clear();
    }

    /// Returns the active key's id and encoding key for signing.
    pub(crate) fn signing_key(&self) -> (String, EncodingKey) {
        let inner = self.inner.read().expect("key ring lock poisoned");
        (inner.active.kid.clone(), inner.active.encoding_key.clone())
    }

    /// Returns the decoding key for `kid` if it is currently published.
    pub(crate) fn decoding_key(&self, kid: &str) -> Option<DecodingKey> {
        let inner = self.inner.read().expect("key ring lock poisoned");
        if inner.active.kid == kid {
            return Some(inner.active.decoding_key());
        }
        inner
            .retired
            .iter()
            .find(|k| k.kid == kid)
            .map(|k| k.decoding_key())
    }

    /// Returns the JWKS document covering all published keys.
    pub fn jwks(&self) -> JwksDocument {
        let inner = self.inner.read().expect("key ring lock poisoned");
        let keys = std::iter::once(&inner.active)
            .chain(inner.retired.iter())
            .map(|k| JwkEntry {
                kty: "RSA",
                alg: "RS256",
                r#use: "sig",
                kid: k.kid.clone(),
                n: k.n.clone(),
                e: k.e.clone(),
            })
            .collect();
        JwksDocument { keys }
    }
}

/// JWKS response body.
#[derive(Serialize)]
pub struct JwksDocument {
    pub keys: Vec<JwkEntry>,
}

/// A single JWK entry in a JWKS response.
#[derive(Serialize)]
pub struct JwkEntry {
    pub kty: &'static str,
    pub alg: &'static str,
    #[serde(rename = "use")]
    pub r#use: &'static str,
    pub kid: String,
    pub n: String,
    pub e: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_keeps_old_key_published() {
        let ring = KeyRing::new("test-key");
        let (old_kid, _) = ring.signing_key();
        ring.rotate();
        let (new_kid, _) = ring.signing_key();

        assert_ne!(old_kid, new_kid);
        assert!(ring.decoding_key(&old_kid).is_some());
        assert!(ring.decoding_key(&new_kid).is_some());

        let jwks = ring.jwks();
        assert_eq!(jwks.keys.len(), 2);

        ring.drop_retired();
        assert!(ring.decoding_key(&old_kid).is_none());
        assert_eq!(ring.jwks().keys.len(), 1);
    }
}
