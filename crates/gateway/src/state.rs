use std::sync::Arc;

use sa_domain::config::Config;
use sa_providers::ModelGateway;
use sa_sessions::SessionRegistry;

use crate::runtime::cancel::CancelMap;
use crate::runtime::session_lock::SessionLockMap;

/// Shared application state passed to every HTTP handler (§4, §6): the
/// resolved configuration, the model gateway collaborator, the process-wide
/// Session Registry, and the per-user concurrency/cancellation primitives
/// that keep one agent loop in flight per user at a time.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub model_gateway: Arc<dyn ModelGateway>,
    pub sessions: Arc<SessionRegistry>,
    pub session_locks: Arc<SessionLockMap>,
    pub cancel_map: Arc<CancelMap>,
}
