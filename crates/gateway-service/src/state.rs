//! Process-wide service registry (spec.md §9's design note: "lift the
//! shared runtime state ... into a process-wide service registry
//! constructed at startup and passed by reference" to break the
//! handlers↔token-manager circular import the Python source has).

use std::path::PathBuf;
use std::sync::Arc;

use gateway_core::config::GatewayConfig;
use gateway_core::TokenManager;
use gateway_responses::ResponseCache;

/// Shared across every axum handler via [`axum::extract::State`].
#[derive(Clone)]
pub struct ServerState {
    pub token_manager: Arc<TokenManager>,
    pub response_cache: Arc<ResponseCache>,
    /// Path to the `.env`-style config file, re-read fresh on every
    /// passthrough request (spec.md §4.6's "environment reload
    /// discipline") and at startup for everything else.
    pub config_path: PathBuf,
    pub config: GatewayConfig,
    /// Plain client used only for the Responses passthrough relay (C8);
    /// every other upstream call goes through `token_manager`'s dual-path
    /// transport.
    pub passthrough_client: reqwest::Client,
}

impl ServerState {
    /// Re-read the config file, per spec.md §4.6. Cheap: a few KB text file.
    pub async fn reload_config(&self) -> Result<GatewayConfig, gateway_core::GatewayError> {
        GatewayConfig::reload(&self.config_path).await
    }
}
