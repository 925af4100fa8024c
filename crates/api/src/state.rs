use std::sync::Arc;

use vstage_pipeline::orchestrator::Orchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Drives generation requests against the configured ComfyUI instance.
    pub orchestrator: Arc<Orchestrator>,
}
