//! The Sandbox Controller (§4.B): a client-side handle to a remote
//! process, submitting snippets and waiting for results via retrying file
//! I/O, with the lifecycle rules of §5.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Result, SandboxError};
use crate::filesystem::SandboxFilesystem;
use crate::host::{ProcessHost, ProcessSpec};
use crate::protocol::{response_file_name, ExecRequestLine, ExecResponse};

pub const APP_NAME: &str = "python-sandbox";

/// Process state as seen by the Controller (§4.B state machine):
/// `absent → starting → ready → (executing ↔ ready)* → stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Executing,
    Stopped,
}

pub struct SandboxController {
    host: Arc<dyn ProcessHost>,
    fs: Arc<dyn SandboxFilesystem>,
    remote_id: String,
    io_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    overall_deadline: Duration,
    idle_deadline: Duration,
    max_runtime: Duration,
    poll_interval: Duration,
    state: parking_lot::Mutex<ProcessState>,
    last_submit_at: parking_lot::Mutex<Instant>,
}

impl SandboxController {
    /// Construction (§4.B): attempt to reattach to `existing_remote_id`
    /// first; only start a fresh process if that fails.
    pub async fn attach_or_create(
        host: Arc<dyn ProcessHost>,
        fs: Arc<dyn SandboxFilesystem>,
        existing_remote_id: Option<&str>,
        spec: ProcessSpec,
    ) -> Result<Self> {
        if let Some(id) = existing_remote_id {
            if let Some(handle) = host.reattach(id).await? {
                tracing::info!(remote_id = %id, "sandbox reattached");
                return Ok(Self::new(host, fs, handle.remote_id, handle.io_dir, &spec));
            }
        }

        let handle = host.create(&spec).await?;
        let ctrl = Self::new(host, fs, handle.remote_id.clone(), handle.io_dir.clone(), &spec);

        if let Some(script) = &spec.init_script {
            ctrl.submit(script).await?;
        }
        Ok(ctrl)
    }

    fn new(
        host: Arc<dyn ProcessHost>,
        fs: Arc<dyn SandboxFilesystem>,
        remote_id: String,
        io_dir: PathBuf,
        spec: &ProcessSpec,
    ) -> Self {
        Self {
            host,
            fs,
            remote_id,
            io_dir,
            created_at: Utc::now(),
            overall_deadline: spec.overall_deadline,
            idle_deadline: spec.idle_deadline,
            max_runtime: Duration::from_secs(300),
            poll_interval: Duration::from_millis(100),
            state: parking_lot::Mutex::new(ProcessState::Ready),
            last_submit_at: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Test-only constructor with tight `max_runtime`/`poll_interval` so
    /// retry-exhaustion tests don't have to wait out the real 300s budget.
    #[cfg(test)]
    fn new_for_test(
        host: Arc<dyn ProcessHost>,
        fs: Arc<dyn SandboxFilesystem>,
        remote_id: String,
        io_dir: PathBuf,
        spec: &ProcessSpec,
        max_runtime: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            host,
            fs,
            remote_id,
            io_dir,
            created_at: Utc::now(),
            overall_deadline: spec.overall_deadline,
            idle_deadline: spec.idle_deadline,
            max_runtime,
            poll_interval,
            state: parking_lot::Mutex::new(ProcessState::Ready),
            last_submit_at: parking_lot::Mutex::new(Instant::now()),
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    /// True once either deadline has elapsed without an intervening
    /// `submit` (§5). Checked passively by the Session Registry, not
    /// enforced by the Controller itself (the real enforcement is the
    /// process host tearing the process down).
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        if age.to_std().map(|d| d >= self.overall_deadline).unwrap_or(false) {
            return true;
        }
        let idle = self.last_submit_at.lock().elapsed();
        idle >= self.idle_deadline
    }

    /// `submit(code) → result` (§4.B).
    pub async fn submit(&self, code: &str) -> Result<ExecResponse> {
        if self.state() == ProcessState::Stopped {
            return Err(SandboxError::ExecutionUnavailable(self.remote_id.clone()));
        }
        let was_stopped = self.state() == ProcessState::Stopped;
        *self.state.lock() = ProcessState::Executing;
        let result = self.submit_inner(code).await;
        *self.last_submit_at.lock() = Instant::now();
        *self.state.lock() = if was_stopped {
            ProcessState::Stopped
        } else {
            ProcessState::Ready
        };
        result
    }

    async fn submit_inner(&self, code: &str) -> Result<ExecResponse> {
        let command_id = Uuid::new_v4().simple().to_string();
        let line = serde_json::to_string(&ExecRequestLine {
            command_id: command_id.clone(),
            code: code.to_string(),
        })?;
        let line = format!("{line}\n");

        self.append_with_retry(&line).await?;
        self.read_response_with_retry(&command_id).await
    }

    /// Append retries up to 3 times on a transient filesystem error (§4.B).
    async fn append_with_retry(&self, line: &str) -> Result<()> {
        const MAX_APPEND_ATTEMPTS: u32 = 3;
        let path = self.io_dir.join(crate::protocol::request_file_name());
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fs.append_line(&path, line).await {
                Ok(()) => return Ok(()),
                Err(SandboxError::TransientFs(_)) if attempt < MAX_APPEND_ATTEMPTS => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read retries up to `MAX_RUNTIME / poll_interval` attempts, treating
    /// a missing file the same as a transient error (§4.B). On exhaustion,
    /// surfaces `ExecutionTimeout` (§7).
    async fn read_response_with_retry(&self, command_id: &str) -> Result<ExecResponse> {
        let max_attempts = (self.max_runtime.as_millis() / self.poll_interval.as_millis()) as u32;
        let path = self.io_dir.join(response_file_name(command_id));
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fs.read_file(&path).await {
                Ok(Some(bytes)) => return Ok(serde_json::from_slice(&bytes)?),
                Ok(None) | Err(SandboxError::TransientFs(_)) => {
                    if attempt >= max_attempts {
                        return Err(SandboxError::ExecutionTimeout(self.max_runtime));
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `terminate()` (§4.B): idempotent, errors swallowed.
    pub async fn terminate(&self) {
        *self.state.lock() = ProcessState::Stopped;
        self.host.terminate(&self.remote_id).await;
    }
}

/// Sweep (§4.B): enumerate all live processes under `APP_NAME` and
/// terminate each. Used on fresh session starts (`session_start`, §4.C).
pub async fn sweep_all(host: &dyn ProcessHost) {
    for id in host.list_live(APP_NAME).await {
        host.terminate(&id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::tests_support::FakeProcessHost;
    use crate::testing::FlakyFilesystem;

    fn spec(io_dir: PathBuf) -> ProcessSpec {
        ProcessSpec {
            app_name: APP_NAME.to_string(),
            io_dir,
            overall_deadline: Duration::from_secs(7200),
            idle_deadline: Duration::from_secs(1800),
            cpu: 4.0,
            memory_mb: 4096,
            init_script: None,
        }
    }

    #[tokio::test]
    async fn submit_succeeds_after_k_transient_read_failures() {
        let dir = tempfile::tempdir().unwrap();
        let host: Arc<dyn ProcessHost> = Arc::new(FakeProcessHost::new());
        let fs = Arc::new(FlakyFilesystem::new(2));
        let ctrl = SandboxController::attach_or_create(host, fs.clone(), None, spec(dir.path().to_path_buf()))
            .await
            .unwrap();

        // Pre-seed the eventual response so the flaky fs can "find" it
        // once its failure budget is spent.
        fs.seed_next_response(ExecResponse {
            stdout: "42\n".into(),
            ..Default::default()
        });

        let resp = ctrl.submit("print(42)").await.unwrap();
        assert_eq!(resp.stdout, "42\n");
        assert_eq!(fs.read_attempts(), 3); // k=2 failures + 1 success
    }

    #[tokio::test]
    async fn submit_raises_after_max_read_attempts_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let host: Arc<dyn ProcessHost> = Arc::new(FakeProcessHost::new());
        let fs = Arc::new(FlakyFilesystem::always_failing_reads());
        let test_spec = spec(dir.path().to_path_buf());
        let handle = host.create(&test_spec).await.unwrap();
        let poll_interval = Duration::from_millis(5);
        let max_runtime = poll_interval * 5;
        let ctrl = SandboxController::new_for_test(
            host,
            fs.clone(),
            handle.remote_id,
            handle.io_dir,
            &test_spec,
            max_runtime,
            poll_interval,
        );

        let err = ctrl.submit("print(1)").await.unwrap_err();
        assert!(matches!(err, SandboxError::ExecutionTimeout(_)));

        let max_attempts = (max_runtime.as_millis() / poll_interval.as_millis()) as u32;
        assert_eq!(fs.read_attempts(), max_attempts);

        // A process that merely failed to produce a response (as opposed
        // to one that was explicitly stopped) returns to Ready.
        assert_eq!(ctrl.state(), ProcessState::Ready);
    }

    #[tokio::test]
    async fn submit_raises_after_max_append_attempts_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let host: Arc<dyn ProcessHost> = Arc::new(FakeProcessHost::new());
        let fs = Arc::new(FlakyFilesystem::always_failing_appends());
        let ctrl = SandboxController::attach_or_create(host, fs.clone(), None, spec(dir.path().to_path_buf()))
            .await
            .unwrap();

        let err = ctrl.submit("print(1)").await.unwrap_err();
        assert!(matches!(err, SandboxError::TransientFs(_)));
        assert_eq!(fs.append_attempts(), 3);
        assert_eq!(ctrl.state(), ProcessState::Ready);
    }

    #[tokio::test]
    async fn submit_against_stopped_process_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let host: Arc<dyn ProcessHost> = Arc::new(FakeProcessHost::new());
        let fs = Arc::new(FlakyFilesystem::new(0));
        let ctrl = SandboxController::attach_or_create(host, fs, None, spec(dir.path().to_path_buf()))
            .await
            .unwrap();
        ctrl.terminate().await;
        let err = ctrl.submit("1+1").await.unwrap_err();
        assert!(matches!(err, SandboxError::ExecutionUnavailable(_)));
    }
}
