//! Shared server state

use std::sync::Arc;

use llm_mux_config::Config;
use llm_mux_core::{AuthManager, AuthStore, ExecutorSet, Gateway, OAuthService, Registry};

/// Everything the handlers need, cheap to clone per request
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub auth_manager: AuthManager,
    pub oauth: OAuthService,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire up the routing plane from a parsed config.
    pub fn from_config(config: Config) -> llm_mux_core::Result<Self> {
        let store = Arc::new(AuthStore::open(config.resolved_auth_dir())?);
        let executors = Arc::new(ExecutorSet::defaults(&config));
        let auth_manager = AuthManager::new(store, executors.clone());
        let registry = Arc::new(Registry::new());
        let gateway = Arc::new(Gateway::new(
            registry,
            auth_manager.clone(),
            executors,
        ));
        let oauth = OAuthService::new(auth_manager.clone());
        oauth.spawn_gc();

        Ok(Self {
            gateway,
            auth_manager,
            oauth,
            config: Arc::new(config),
        })
    }
}
