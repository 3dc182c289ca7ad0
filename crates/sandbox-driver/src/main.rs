//! The Sandbox Driver (§4.A): runs inside the sandbox process, tails the
//! request file, dispatches each snippet to the embedded interpreter, and
//! writes one response file per command id. Single-threaded and
//! cooperative — it never needs to interrupt a running snippet.

mod interpreter;
mod tail;

use std::path::PathBuf;
use std::time::Duration;

use interpreter::Interpreter;
use sa_sandbox::protocol::{DEFAULT_IO_DATA_DIR, IO_DATA_DIR_VAR, STDIN_FILE_VAR};
use tail::Tail;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let io_dir: PathBuf = std::env::var(IO_DATA_DIR_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_IO_DATA_DIR));
    let request_path: PathBuf = std::env::var(STDIN_FILE_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| io_dir.join(sa_sandbox::protocol::request_file_name()));

    tokio::fs::create_dir_all(&io_dir).await?;
    if tokio::fs::metadata(&request_path).await.is_err() {
        tokio::fs::write(&request_path, b"").await?;
    }

    tracing::info!(
        io_dir = %io_dir.display(),
        request_path = %request_path.display(),
        "sandbox driver starting"
    );

    let mut interpreter = Interpreter::spawn()?;
    if let Some(script) = std::env::var("SA_INIT_SCRIPT").ok().filter(|s| !s.is_empty()) {
        tracing::info!("running init script");
        let _ = interpreter.eval(&script).await;
    }

    let mut tail = Tail::new(&request_path);
    loop {
        if let Some(status) = interpreter.exited() {
            tracing::error!(?status, "embedded interpreter exited; driver stopping");
            anyhow::bail!("embedded interpreter exited with {status:?}");
        }

        let lines = tail.poll_lines().await?;
        if lines.is_empty() {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }
        for line in lines {
            handle_line(&io_dir, &mut interpreter, &line).await?;
        }
    }
}

async fn handle_line(io_dir: &PathBuf, interpreter: &mut Interpreter, line: &str) -> anyhow::Result<()> {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            println!(
                "{}",
                serde_json::json!({"error": "malformed request line", "detail": e.to_string()})
            );
            return Ok(());
        }
    };

    let command_id = value.get("command_id").and_then(|v| v.as_str());
    let code = value.get("code").and_then(|v| v.as_str());
    let (command_id, code) = match (command_id, code) {
        (Some(id), Some(code)) => (id, code),
        _ => {
            println!(
                "{}",
                serde_json::json!({"error": "request line missing command_id or code", "line": line})
            );
            return Ok(());
        }
    };

    tracing::debug!(command_id, snippet_len = code.len(), "executing snippet");

    let response = interpreter.eval(code).await?;
    let response_path = io_dir.join(sa_sandbox::protocol::response_file_name(command_id));
    let body = serde_json::to_vec(&response)?;
    tokio::fs::write(&response_path, &body).await?;

    tracing::trace!(command_id, path = %response_path.display(), "wrote response file");
    Ok(())
}
