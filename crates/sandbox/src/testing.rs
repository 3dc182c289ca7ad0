//! Test doubles shared across unit tests in this crate.

#![cfg(test)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::SandboxError;
use crate::filesystem::SandboxFilesystem;
use crate::protocol::ExecResponse;

/// A `SandboxFilesystem` that fails the first `k` reads with a transient
/// error, then serves a seeded response on every read after. Pass `None`
/// for `k` to fail every read unconditionally, for exercising exhaustion
/// of the Controller's read retry budget (P8). Appends always succeed
/// unless `always_fail_append` is set, for exercising exhaustion of the
/// append retry budget instead.
pub struct FlakyFilesystem {
    failures_remaining: Option<AtomicU32>,
    always_fail: bool,
    always_fail_append: bool,
    read_attempts: AtomicU32,
    append_attempts: AtomicU32,
    seeded: parking_lot::Mutex<Option<Vec<u8>>>,
}

impl FlakyFilesystem {
    pub fn new(k: u32) -> Self {
        Self {
            failures_remaining: Some(AtomicU32::new(k)),
            always_fail: false,
            always_fail_append: false,
            read_attempts: AtomicU32::new(0),
            append_attempts: AtomicU32::new(0),
            seeded: parking_lot::Mutex::new(None),
        }
    }

    /// Every read fails with a transient error, forever — drives the
    /// Controller's read retry loop to exhaustion (P8).
    pub fn always_failing_reads() -> Self {
        Self {
            failures_remaining: None,
            always_fail: true,
            always_fail_append: false,
            read_attempts: AtomicU32::new(0),
            append_attempts: AtomicU32::new(0),
            seeded: parking_lot::Mutex::new(None),
        }
    }

    /// Every append fails with a transient error, forever — drives the
    /// Controller's append retry loop to exhaustion (P8).
    pub fn always_failing_appends() -> Self {
        Self {
            failures_remaining: Some(AtomicU32::new(0)),
            always_fail: false,
            always_fail_append: true,
            read_attempts: AtomicU32::new(0),
            append_attempts: AtomicU32::new(0),
            seeded: parking_lot::Mutex::new(None),
        }
    }

    pub fn seed_next_response(&self, resp: ExecResponse) {
        *self.seeded.lock() = Some(serde_json::to_vec(&resp).expect("serializable"));
    }

    pub fn read_attempts(&self) -> u32 {
        self.read_attempts.load(Ordering::SeqCst)
    }

    pub fn append_attempts(&self) -> u32 {
        self.append_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxFilesystem for FlakyFilesystem {
    async fn append_line(&self, _path: &Path, _line: &str) -> Result<(), SandboxError> {
        self.append_attempts.fetch_add(1, Ordering::SeqCst);
        if self.always_fail_append {
            return Err(SandboxError::TransientFs("flaky append".into()));
        }
        Ok(())
    }

    async fn read_file(&self, _path: &Path) -> Result<Option<Vec<u8>>, SandboxError> {
        self.read_attempts.fetch_add(1, Ordering::SeqCst);
        if self.always_fail {
            return Err(SandboxError::TransientFs("flaky read".into()));
        }
        let remaining = self
            .failures_remaining
            .as_ref()
            .map(|r| r.load(Ordering::SeqCst))
            .unwrap_or(0);
        if remaining > 0 {
            self.failures_remaining
                .as_ref()
                .unwrap()
                .fetch_sub(1, Ordering::SeqCst);
            return Err(SandboxError::TransientFs("flaky read".into()));
        }
        Ok(self.seeded.lock().clone())
    }
}
