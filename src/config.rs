/// Configuration for the embedded OIDC provider.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    /// JWT issuer claim (`iss`) and base URL used in the discovery document.
    pub issuer: String,
    /// Base path for all provider endpoints (e.g. `""` for root, `"/auth"`
    /// for `/auth/oauth/token`).
    pub base_path: String,
    /// Path the `/authorize` endpoint redirects unauthenticated browsers to.
    /// The login UI lives outside this crate; it posts back to `/login`.
    pub login_page: String,
    /// Time-to-live for authorization sessions and codes, in seconds.
    pub code_ttl_secs: u64,
    /// Time-to-live for access and ID tokens, in seconds.
    pub token_ttl_secs: u64,
    /// Time-to-live for refresh tokens, in seconds.
    pub refresh_ttl_secs: u64,
    /// Prefix for generated key IDs (`kid`); rotation appends a counter.
    pub kid_prefix: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:3000".into(),
            base_path: String::new(),
            login_page: "/login".into(),
            code_ttl_secs: 600,
            token_ttl_secs: 3600,
            refresh_ttl_secs: 14 * 24 * 3600,
            kid_prefix: "oidc-key".into(),
        }
    }
}
