//! `AppState` construction, extracted from `main.rs` so the `serve` command
//! and tests can boot the runtime without an HTTP listener.

use std::sync::Arc;

use anyhow::Context;

use sa_domain::config::Config;
use sa_providers::{ModelGateway, OpenAiCompatGateway};
use sa_sessions::SessionRegistry;

use crate::runtime::cancel::CancelMap;
use crate::runtime::session_lock::SessionLockMap;
use crate::state::AppState;

/// Validate config and wire every subsystem into a fully-built
/// [`AppState`]. Shared by `serve` and (in tests) by direct construction.
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    config.validate().context("config validation failed")?;

    let model_gateway: Arc<dyn ModelGateway> = Arc::new(
        OpenAiCompatGateway::from_config(&config.llm).context("initializing LLM gateway")?,
    );
    tracing::info!(base_url = %config.llm.base_url, model = %config.llm.model, "model gateway ready");

    let driver_binary = config.sandbox.resolve_driver_binary();
    if !driver_binary.is_file() {
        tracing::warn!(
            path = %driver_binary.display(),
            "driver binary not found at startup; sandbox sessions will fail to initialize until it is"
        );
    }
    let sessions = Arc::new(SessionRegistry::new(
        driver_binary,
        &config.sandbox,
        &config.sessions,
    ));
    tracing::info!("session registry ready");

    let session_locks = Arc::new(SessionLockMap::new());
    let cancel_map = Arc::new(CancelMap::new());

    Ok(AppState {
        config,
        model_gateway,
        sessions,
        session_locks,
        cancel_map,
    })
}

/// Spawn the background sweep task (§4.C): evicts idle users on a fixed
/// interval. Call this **after** [`build_app_state`] when running the HTTP
/// server; CLI one-shot commands skip it.
pub fn spawn_background_tasks(state: &AppState) {
    let sessions = state.sessions.clone();
    let interval_secs = state.config.sessions.sweep_interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            sessions.sweep_idle().await;
        }
    });
    tracing::info!(interval_secs, "idle-session sweep task spawned");
}
