//! Abstraction over the process host's shared filesystem namespace (§4.B),
//! narrow enough to cover exactly what the Controller needs: an atomic
//! append and a read-or-missing. Kept separate from `ProcessHost` so the
//! retry discipline can be unit-tested against an injectable fake without
//! spawning real processes.

use crate::error::SandboxError;
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait SandboxFilesystem: Send + Sync {
    /// Append one line (already including its trailing `\n`) to `path`.
    async fn append_line(&self, path: &Path, line: &str) -> Result<(), SandboxError>;

    /// Read `path` in full. `Ok(None)` means "not found yet" — a retryable
    /// miss, not an error (§4.B).
    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, SandboxError>;
}

/// The concrete implementation backing the local/dev process host: a real
/// append and a real read against the local filesystem.
pub struct LocalFilesystem;

#[async_trait]
impl SandboxFilesystem for LocalFilesystem {
    async fn append_line(&self, path: &Path, line: &str) -> Result<(), SandboxError> {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, SandboxError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
