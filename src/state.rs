use std::sync::Arc;

use crate::client::ClientRegistry;
use crate::config::ProviderConfig;
use crate::grant::GrantExchanger;
use crate::keys::KeyRing;
use crate::session::SessionEngine;
use crate::store::UserStoreErased;
use crate::token::TokenService;

/// Internal shared state for provider handlers.
pub(crate) struct ProviderState {
    pub keys: Arc<KeyRing>,
    pub tokens: Arc<TokenService>,
    pub users: Arc<dyn UserStoreErased>,
    pub clients: Arc<ClientRegistry>,
    pub sessions: Arc<SessionEngine>,
    pub exchanger: GrantExchanger,
    pub config: ProviderConfig,
}
