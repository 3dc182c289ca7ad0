//! "tail -f" over the request file (§4.A): reads whatever has been
//! appended since the last poll, splits it into complete lines, and holds
//! back any trailing partial line for the next poll.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncSeekExt};

pub struct Tail {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
}

impl Tail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            partial: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns newly-completed lines, or an empty vec at EOF.
    pub async fn poll_lines(&mut self) -> std::io::Result<Vec<String>> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(std::io::SeekFrom::Start(self.offset)).await?;
        let mut chunk = Vec::new();
        file.read_to_end(&mut chunk).await?;
        if chunk.is_empty() {
            return Ok(Vec::new());
        }
        self.offset += chunk.len() as u64;
        self.partial.extend_from_slice(&chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.partial.drain(..=pos).collect();
            let line_bytes = &line_bytes[..line_bytes.len() - 1];
            if let Ok(s) = std::str::from_utf8(line_bytes) {
                let trimmed = s.trim();
                if !trimmed.is_empty() {
                    lines.push(trimmed.to_string());
                }
            }
        }
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn poll_returns_only_complete_lines_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stdin.txt");
        tokio::fs::write(&path, b"").await.unwrap();
        let mut tail = Tail::new(&path);

        assert!(tail.poll_lines().await.unwrap().is_empty());

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap();
        file.write_all(b"{\"command_id\":\"a\",\"code\":\"1\"}\n{\"command_id\":\"b\",\"cod")
            .await
            .unwrap();
        file.flush().await.unwrap();

        let lines = tail.poll_lines().await.unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\"a\""));

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap();
        file.write_all(b"e\":\"2\"}\n").await.unwrap();
        file.flush().await.unwrap();

        let lines = tail.poll_lines().await.unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\"b\""));
    }
}
