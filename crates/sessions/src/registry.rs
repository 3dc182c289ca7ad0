//! The Session Registry (§4.C): a process-wide `user_id → (Controller?,
//! Messages)` map with idle-TTL eviction, both lazy (on access) and via a
//! background sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sa_domain::config::{SandboxConfig, SessionsConfig};
use sa_domain::error::{Error, Result};
use sa_domain::message::Message;
use sa_sandbox::{sweep_all, LocalFilesystem, LocalProcessHost, ProcessHost, ProcessSpec, SandboxController};
use tokio::sync::Mutex as AsyncMutex;

struct Entry {
    messages: Vec<Message>,
    controller: Option<Arc<SandboxController>>,
    last_touch: DateTime<Utc>,
    /// Serializes `init_sandbox` per user so a user never races against
    /// its own reinitialization (§5).
    init_lock: Arc<AsyncMutex<()>>,
}

impl Entry {
    fn fresh() -> Self {
        Self {
            messages: Vec::new(),
            controller: None,
            last_touch: Utc::now(),
            init_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    fn touch(&mut self) {
        self.last_touch = Utc::now();
    }

    #[cfg(test)]
    fn backdate(&mut self, age: Duration) {
        self.last_touch = Utc::now() - chrono::Duration::from_std(age).expect("age fits in chrono::Duration");
    }

    fn is_idle(&self, now: DateTime<Utc>, idle_ttl: Duration) -> bool {
        now.signed_duration_since(self.last_touch)
            .to_std()
            .map(|d| d >= idle_ttl)
            .unwrap_or(false)
    }
}

/// Process-wide session table (§4.C). One instance is shared (via `Arc`)
/// across the whole server.
pub struct SessionRegistry {
    entries: parking_lot::Mutex<HashMap<String, Entry>>,
    host: Arc<dyn ProcessHost>,
    fs: Arc<LocalFilesystem>,
    sandbox_base_dir: std::path::PathBuf,
    overall_deadline: Duration,
    idle_deadline: Duration,
    cpu: f64,
    memory_mb: u64,
    max_users: usize,
}

impl SessionRegistry {
    pub fn new(
        driver_binary: impl Into<std::path::PathBuf>,
        sandbox: &SandboxConfig,
        sessions: &SessionsConfig,
    ) -> Self {
        Self {
            entries: parking_lot::Mutex::new(HashMap::new()),
            host: Arc::new(LocalProcessHost::new(driver_binary)),
            fs: Arc::new(LocalFilesystem),
            sandbox_base_dir: sandbox
                .base_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            overall_deadline: Duration::from_secs(sandbox.overall_deadline_secs),
            idle_deadline: Duration::from_secs(sandbox.idle_deadline_secs),
            cpu: sandbox.cpu,
            memory_mb: sandbox.memory_mb,
            max_users: sessions.capacity,
        }
    }

    #[cfg(test)]
    fn for_tests(driver_binary: impl Into<std::path::PathBuf>, sandbox_base_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            entries: parking_lot::Mutex::new(HashMap::new()),
            host: Arc::new(LocalProcessHost::new(driver_binary)),
            fs: Arc::new(LocalFilesystem),
            sandbox_base_dir: sandbox_base_dir.into(),
            overall_deadline: Duration::from_secs(7200),
            idle_deadline: Duration::from_secs(30 * 60),
            cpu: 4.0,
            memory_mb: 4096,
            max_users: 1000,
        }
    }

    #[cfg(test)]
    fn for_tests_with_host(host: Arc<dyn ProcessHost>, sandbox_base_dir: impl Into<std::path::PathBuf>, idle_deadline: Duration) -> Self {
        Self {
            entries: parking_lot::Mutex::new(HashMap::new()),
            host,
            fs: Arc::new(LocalFilesystem),
            sandbox_base_dir: sandbox_base_dir.into(),
            overall_deadline: Duration::from_secs(7200),
            idle_deadline,
            cpu: 4.0,
            memory_mb: 4096,
            max_users: 1000,
        }
    }

    /// Test-only seam: push a user's last-touch timestamp back so idle-TTL
    /// logic can be exercised without a real sleep.
    #[cfg(test)]
    fn backdate(&self, user_id: &str, age: Duration) {
        let mut guard = self.entries.lock();
        if let Some(entry) = guard.get_mut(user_id) {
            entry.backdate(age);
        }
    }

    /// `messages(user_id)` (§4.C): returns the ordered list, creating an
    /// empty one on demand.
    pub fn messages(&self, user_id: &str) -> Vec<Message> {
        self.lazy_expire(user_id);
        let mut guard = self.entries.lock();
        let entry = guard.entry(user_id.to_string()).or_insert_with(Entry::fresh);
        entry.touch();
        entry.messages.clone()
    }

    pub fn append_message(&self, user_id: &str, message: Message) {
        let mut guard = self.entries.lock();
        let entry = guard.entry(user_id.to_string()).or_insert_with(Entry::fresh);
        entry.messages.push(message);
        entry.touch();
    }

    /// Agent Loop step 1 (§4.D): if Messages is empty or does not begin
    /// with `system`, prepend the canonical system prompt. Idempotent
    /// (P5) — a Messages list that already begins with `system` is left
    /// untouched.
    pub fn ensure_system_prompt(&self, user_id: &str, prompt: &str) {
        let mut guard = self.entries.lock();
        let entry = guard.entry(user_id.to_string()).or_insert_with(Entry::fresh);
        let starts_with_system = entry
            .messages
            .first()
            .map(|m| m.role == sa_domain::message::Role::System)
            .unwrap_or(false);
        if !starts_with_system {
            entry.messages.insert(0, Message::system(prompt));
        }
        entry.touch();
    }

    /// `clear_messages(user_id)` (§4.C): truncates the list; does not
    /// touch the Controller.
    pub fn clear_messages(&self, user_id: &str) {
        let mut guard = self.entries.lock();
        let entry = guard.entry(user_id.to_string()).or_insert_with(Entry::fresh);
        entry.messages.clear();
        entry.touch();
    }

    /// `sandbox(user_id)` (§4.C): returns the Controller, constructing
    /// lazily. The async construction happens outside the registry's
    /// mutex; only the `Option<Arc<_>>` slot is guarded.
    pub async fn sandbox(&self, user_id: &str) -> Result<Arc<SandboxController>> {
        if let Some(ctrl) = self.existing_controller(user_id) {
            return Ok(ctrl);
        }
        let ctrl = Arc::new(self.build_controller(None).await?);
        let mut guard = self.entries.lock();
        let entry = guard.entry(user_id.to_string()).or_insert_with(Entry::fresh);
        entry.controller = Some(ctrl.clone());
        entry.touch();
        Ok(ctrl)
    }

    fn existing_controller(&self, user_id: &str) -> Option<Arc<SandboxController>> {
        let mut guard = self.entries.lock();
        let entry = guard.entry(user_id.to_string()).or_insert_with(Entry::fresh);
        entry.touch();
        entry.controller.clone()
    }

    async fn build_controller(&self, existing_remote_id: Option<&str>) -> Result<SandboxController> {
        let io_dir = self.sandbox_base_dir.join(uuid::Uuid::new_v4().to_string());
        let spec = ProcessSpec {
            app_name: sa_sandbox::APP_NAME.to_string(),
            io_dir,
            overall_deadline: self.overall_deadline,
            idle_deadline: self.idle_deadline,
            cpu: self.cpu,
            memory_mb: self.memory_mb,
            init_script: None,
        };
        SandboxController::attach_or_create(self.host.clone(), self.fs.clone(), existing_remote_id, spec)
            .await
            .map_err(|e| Error::Other(e.to_string()))
    }

    /// `reset_sandbox(user_id)` (§4.C): terminates and removes that
    /// user's Controller. Does not touch Messages.
    pub async fn reset_sandbox(&self, user_id: &str) {
        let prior = {
            let mut guard = self.entries.lock();
            let entry = guard.entry(user_id.to_string()).or_insert_with(Entry::fresh);
            entry.touch();
            entry.controller.take()
        };
        if let Some(ctrl) = prior {
            ctrl.terminate().await;
        }
    }

    /// `init_sandbox(user_id)` (§4.C): terminates the current Controller
    /// (if any) and builds a fresh one, serialized per user.
    pub async fn init_sandbox(&self, user_id: &str) -> Result<()> {
        let lock = {
            let mut guard = self.entries.lock();
            let entry = guard.entry(user_id.to_string()).or_insert_with(Entry::fresh);
            entry.touch();
            entry.init_lock.clone()
        };
        let _permit = lock.lock().await;

        self.reset_sandbox(user_id).await;
        let ctrl = Arc::new(self.build_controller(None).await?);

        let mut guard = self.entries.lock();
        let entry = guard.entry(user_id.to_string()).or_insert_with(Entry::fresh);
        entry.controller = Some(ctrl);
        Ok(())
    }

    /// `session_start(user_id)` (§4.C): clears messages, fires
    /// `init_sandbox`, and sweeps all processes under this app name (so
    /// orphans from prior server incarnations get cleaned up too).
    pub async fn session_start(&self, user_id: &str) -> Result<()> {
        self.clear_messages(user_id);
        sweep_all(self.host.as_ref()).await;
        self.init_sandbox(user_id).await
    }

    fn lazy_expire(&self, user_id: &str) {
        let now = Utc::now();
        let idle_deadline = self.idle_deadline;
        let expired = {
            let guard = self.entries.lock();
            guard
                .get(user_id)
                .map(|e| e.is_idle(now, idle_deadline))
                .unwrap_or(false)
        };
        if expired {
            // Eviction of a single stale entry piggybacks on the next
            // `sweep_idle` pass; here we only drop its Controller handle
            // so a dead process isn't handed back to a caller. The
            // background sweep (below) performs the real termination.
            let mut guard = self.entries.lock();
            if let Some(entry) = guard.get_mut(user_id) {
                if entry.is_idle(now, idle_deadline) {
                    entry.controller = None;
                }
            }
        }
    }

    /// `sweep_idle()` (§4.C): evicts entries whose last-touch exceeds the
    /// idle TTL, terminating their Controllers, and enforces the
    /// capacity cap by evicting the oldest entries first.
    pub async fn sweep_idle(&self) {
        let now = Utc::now();
        let idle_deadline = self.idle_deadline;
        let mut to_terminate = Vec::new();

        {
            let mut guard = self.entries.lock();
            let idle_ids: Vec<String> = guard
                .iter()
                .filter(|(_, e)| e.is_idle(now, idle_deadline))
                .map(|(id, _)| id.clone())
                .collect();
            for id in idle_ids {
                if let Some(entry) = guard.remove(&id) {
                    if let Some(ctrl) = entry.controller {
                        to_terminate.push(ctrl);
                    }
                }
            }

            if guard.len() > self.max_users {
                let mut by_age: Vec<(String, DateTime<Utc>)> =
                    guard.iter().map(|(id, e)| (id.clone(), e.last_touch)).collect();
                by_age.sort_by_key(|(_, t)| *t);
                let overflow = guard.len() - self.max_users;
                for (id, _) in by_age.into_iter().take(overflow) {
                    if let Some(entry) = guard.remove(&id) {
                        if let Some(ctrl) = entry.controller {
                            to_terminate.push(ctrl);
                        }
                    }
                }
            }
        }

        for ctrl in to_terminate {
            ctrl.terminate().await;
        }
    }

    pub fn user_count(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records `terminate` calls so eviction tests can assert the
    /// Controller's process was actually torn down, without spawning a
    /// real subprocess.
    struct RecordingProcessHost {
        terminate_calls: AtomicUsize,
    }

    impl RecordingProcessHost {
        fn new() -> Self {
            Self {
                terminate_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl ProcessHost for RecordingProcessHost {
        async fn create(&self, spec: &sa_sandbox::ProcessSpec) -> sa_sandbox::Result<sa_sandbox::ProcessHandle> {
            Ok(sa_sandbox::ProcessHandle {
                remote_id: uuid::Uuid::new_v4().to_string(),
                io_dir: spec.io_dir.clone(),
            })
        }

        async fn reattach(&self, _remote_id: &str) -> sa_sandbox::Result<Option<sa_sandbox::ProcessHandle>> {
            Ok(None)
        }

        async fn terminate(&self, _remote_id: &str) {
            self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        }

        async fn list_live(&self, _app_name: &str) -> Vec<String> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn messages_default_to_empty_and_append_in_order() {
        let registry = SessionRegistry::for_tests("/bin/true", std::env::temp_dir());
        assert!(registry.messages("u1").is_empty());
        registry.append_message("u1", Message::user("hi"));
        registry.append_message("u1", Message::assistant("hello", vec![]));
        let msgs = registry.messages("u1");
        assert_eq!(msgs.len(), 2);
    }

    #[tokio::test]
    async fn clear_messages_does_not_touch_controller_slot() {
        let registry = SessionRegistry::for_tests("/bin/true", std::env::temp_dir());
        registry.append_message("u1", Message::user("hi"));
        registry.clear_messages("u1");
        assert!(registry.messages("u1").is_empty());
    }

    #[tokio::test]
    async fn ensure_system_prompt_is_idempotent() {
        let registry = SessionRegistry::for_tests("/bin/true", std::env::temp_dir());
        registry.ensure_system_prompt("u1", "be helpful");
        registry.append_message("u1", Message::user("hi"));
        registry.ensure_system_prompt("u1", "be helpful");

        let msgs = registry.messages("u1");
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, sa_domain::message::Role::System);
        assert_eq!(msgs[0].content.extract_all_text(), "be helpful");
    }

    #[tokio::test]
    async fn sweep_idle_spares_a_fresh_entry() {
        let registry = SessionRegistry::for_tests("/bin/true", std::env::temp_dir());
        registry.append_message("fresh", Message::user("hi"));
        registry.sweep_idle().await;
        assert_eq!(registry.user_count(), 1);
    }

    #[tokio::test]
    async fn sweep_idle_evicts_and_terminates_entries_past_ttl() {
        let host = Arc::new(RecordingProcessHost::new());
        let registry =
            SessionRegistry::for_tests_with_host(host.clone(), std::env::temp_dir(), Duration::from_millis(10));

        registry.append_message("stale", Message::user("hi"));
        registry.sandbox("stale").await.unwrap();
        registry.backdate("stale", Duration::from_millis(50));

        registry.sweep_idle().await;

        assert_eq!(registry.user_count(), 0);
        assert_eq!(host.terminate_calls.load(Ordering::SeqCst), 1);
    }
}
