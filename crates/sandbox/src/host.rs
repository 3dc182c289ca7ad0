//! The opaque "process host" collaborator (§1, §4.B): timed,
//! resource-limited processes sharing a filesystem namespace with the
//! Controller. Modeled as a trait so a local/dev implementation (real OS
//! subprocesses, a local temp directory standing in for the remote shared
//! filesystem) can stand in for a real remote sandboxing product, and so
//! an in-memory fake can back Controller unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};

use crate::error::{Result, SandboxError};

/// Resource/lifetime budget for one sandbox process (§4.B).
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub app_name: String,
    pub io_dir: PathBuf,
    pub overall_deadline: Duration,
    pub idle_deadline: Duration,
    pub cpu: f64,
    pub memory_mb: u64,
    /// Optional snippet run synchronously before construction returns.
    pub init_script: Option<String>,
}

/// A live handle to a process, as seen by the Controller.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub remote_id: String,
    pub io_dir: PathBuf,
}

#[async_trait]
pub trait ProcessHost: Send + Sync {
    /// Start a new process under `spec.app_name`.
    async fn create(&self, spec: &ProcessSpec) -> Result<ProcessHandle>;

    /// Look up a process by id and confirm it is still alive. `Ok(None)`
    /// means "no such process" or "it's dead" — both treated as absent.
    async fn reattach(&self, remote_id: &str) -> Result<Option<ProcessHandle>>;

    /// Stop a process. Idempotent; never errors on an already-stopped id.
    async fn terminate(&self, remote_id: &str);

    /// All live process ids registered under `app_name` (used by Sweep).
    async fn list_live(&self, app_name: &str) -> Vec<String>;
}

/// Real subprocess-backed implementation. Each sandbox process is a child
/// of this server running the Driver binary, with `io_dir` standing in for
/// the remote shared filesystem namespace.
pub struct LocalProcessHost {
    driver_binary: PathBuf,
    processes: Arc<parking_lot::RwLock<HashMap<String, Entry>>>,
}

struct Entry {
    app_name: String,
    child: Child,
    io_dir: PathBuf,
}

impl LocalProcessHost {
    pub fn new(driver_binary: impl Into<PathBuf>) -> Self {
        Self {
            driver_binary: driver_binary.into(),
            processes: Arc::new(parking_lot::RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl ProcessHost for LocalProcessHost {
    async fn create(&self, spec: &ProcessSpec) -> Result<ProcessHandle> {
        tokio::fs::create_dir_all(&spec.io_dir).await?;
        let request_path = spec.io_dir.join(crate::protocol::request_file_name());
        // The request file is created up front so readers never race its
        // existence (§3 lifecycle rule).
        if tokio::fs::metadata(&request_path).await.is_err() {
            tokio::fs::write(&request_path, b"").await?;
        }

        let remote_id = uuid::Uuid::new_v4().to_string();
        let mut cmd = Command::new(&self.driver_binary);
        cmd.env(crate::protocol::IO_DATA_DIR_VAR, &spec.io_dir)
            .env(
                crate::protocol::STDIN_FILE_VAR,
                spec.io_dir.join(crate::protocol::request_file_name()),
            )
            .kill_on_drop(true);
        if let Some(script) = &spec.init_script {
            cmd.env("SA_INIT_SCRIPT", script);
        }

        let child = cmd
            .spawn()
            .map_err(|e| SandboxError::Construction(format!("spawning driver: {e}")))?;

        self.processes.write().insert(
            remote_id.clone(),
            Entry {
                app_name: spec.app_name.clone(),
                child,
                io_dir: spec.io_dir.clone(),
            },
        );

        tracing::info!(remote_id = %remote_id, io_dir = %spec.io_dir.display(), "sandbox process created");
        Ok(ProcessHandle {
            remote_id,
            io_dir: spec.io_dir.clone(),
        })
    }

    async fn reattach(&self, remote_id: &str) -> Result<Option<ProcessHandle>> {
        let mut guard = self.processes.write();
        let Some(entry) = guard.get_mut(remote_id) else {
            return Ok(None);
        };
        match entry.child.try_wait() {
            Ok(None) => Ok(Some(ProcessHandle {
                remote_id: remote_id.to_string(),
                io_dir: entry.io_dir.clone(),
            })),
            Ok(Some(_)) | Err(_) => {
                guard.remove(remote_id);
                Ok(None)
            }
        }
    }

    async fn terminate(&self, remote_id: &str) {
        let mut guard = self.processes.write();
        if let Some(mut entry) = guard.remove(remote_id) {
            let _ = entry.child.start_kill();
            tracing::info!(remote_id = %remote_id, "sandbox process terminated");
        }
    }

    async fn list_live(&self, app_name: &str) -> Vec<String> {
        let mut guard = self.processes.write();
        let mut dead = Vec::new();
        let mut live = Vec::new();
        for (id, entry) in guard.iter_mut() {
            if entry.app_name != app_name {
                continue;
            }
            match entry.child.try_wait() {
                Ok(None) => live.push(id.clone()),
                _ => dead.push(id.clone()),
            }
        }
        for id in dead {
            guard.remove(&id);
        }
        live
    }
}

/// Test doubles, exported only under `cfg(test)` for use by sibling
/// modules (e.g. the Controller's retry-discipline tests).
#[cfg(test)]
pub mod tests_support {
    use super::*;

    /// A `ProcessHost` with no real subprocess: `create` just hands back a
    /// fresh id over the caller-supplied `io_dir`, so tests can drive a
    /// `SandboxController` against a fake filesystem without spawning
    /// anything.
    pub struct FakeProcessHost {
        live: parking_lot::RwLock<HashMap<String, String>>,
    }

    impl FakeProcessHost {
        pub fn new() -> Self {
            Self {
                live: parking_lot::RwLock::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl ProcessHost for FakeProcessHost {
        async fn create(&self, spec: &ProcessSpec) -> Result<ProcessHandle> {
            let remote_id = uuid::Uuid::new_v4().to_string();
            self.live.write().insert(remote_id.clone(), spec.app_name.clone());
            Ok(ProcessHandle {
                remote_id,
                io_dir: spec.io_dir.clone(),
            })
        }

        async fn reattach(&self, remote_id: &str) -> Result<Option<ProcessHandle>> {
            let guard = self.live.read();
            Ok(guard.get(remote_id).map(|_| ProcessHandle {
                remote_id: remote_id.to_string(),
                io_dir: PathBuf::new(),
            }))
        }

        async fn terminate(&self, remote_id: &str) {
            self.live.write().remove(remote_id);
        }

        async fn list_live(&self, app_name: &str) -> Vec<String> {
            self.live
                .read()
                .iter()
                .filter(|(_, a)| a.as_str() == app_name)
                .map(|(id, _)| id.clone())
                .collect()
        }
    }
}
