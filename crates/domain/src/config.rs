//! Top-level typed configuration (§2.A of the design): loaded from a TOML
//! file with environment-variable overrides for secrets. Invalid
//! configuration is a startup-time error, never a panic mid-request.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load from a TOML file, then apply environment-variable overrides.
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            crate::error::Error::Config(format!(
                "reading config file {}: {e}",
                path.display()
            ))
        })?;
        let mut cfg: Config = toml::from_str(&text)
            .map_err(|e| crate::error::Error::Config(format!("parsing config: {e}")))?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Environment-variable overrides (§2.A): `SA_HOST`, `SA_PORT`,
    /// `SESSION_SECRET`, `SA_LLM_BASE_URL`, `SA_LLM_API_KEY`, `SA_LOG`,
    /// `SA_SANDBOX_BASE_DIR`. Exposed publicly so callers that parse a
    /// config file themselves (e.g. the CLI's `config validate`/`show`,
    /// which must not bail out on an invalid file) can still apply the
    /// same overrides `load` does.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SA_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("SA_PORT") {
            if let Ok(p) = v.parse() {
                self.server.port = p;
            }
        }
        if let Ok(v) = std::env::var("SESSION_SECRET") {
            self.server.session_secret = v;
        }
        if let Ok(v) = std::env::var("SA_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("SA_LLM_API_KEY") {
            self.llm.auth.key = Some(v);
        }
        if let Ok(v) = std::env::var("SA_LOG") {
            self.log.filter = v;
        }
        if let Ok(v) = std::env::var("SA_SANDBOX_BASE_DIR") {
            self.sandbox.base_dir = Some(v.into());
        }
    }

    /// Startup-time validation. Never panics; returns a readable error.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.server.session_secret.trim().is_empty() {
            return Err(crate::error::Error::Config(
                "server.session_secret must not be empty (set SESSION_SECRET)".into(),
            ));
        }
        if self.llm.base_url.trim().is_empty() {
            return Err(crate::error::Error::Config(
                "llm.base_url must not be empty".into(),
            ));
        }
        if self.sessions.capacity == 0 {
            return Err(crate::error::Error::Config(
                "sessions.capacity must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// A redacted copy suitable for printing (`sa-gateway config show`).
    pub fn redacted(&self) -> Config {
        let mut c = self.clone();
        if !c.server.session_secret.is_empty() {
            c.server.session_secret = "***".into();
        }
        if c.llm.auth.key.is_some() {
            c.llm.auth.key = Some("***".into());
        }
        c
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Secret key used to sign the `user_id` session cookie.
    #[serde(default)]
    pub session_secret: String,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            session_secret: String::new(),
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

fn d_port() -> u16 {
    8080
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model gateway (§6)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Non-streaming chat-completions endpoint, e.g.
    /// `https://api.openai.com/v1`.
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "d_model")]
    pub model: String,
    /// Low-effort reasoning hint sent with every turn call (§4.D).
    #[serde(default = "d_reasoning_effort")]
    pub reasoning_effort: String,
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            model: d_model(),
            reasoning_effort: d_reasoning_effort(),
            timeout_ms: d_timeout_ms(),
            auth: AuthConfig::default(),
        }
    }
}

fn d_model() -> String {
    "gpt-4o-mini".into()
}
fn d_reasoning_effort() -> String {
    "low".into()
}
fn d_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Header name, e.g. `"Authorization"`.
    #[serde(default)]
    pub header: Option<String>,
    /// Header value prefix, e.g. `"Bearer "`.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key (config-only setups; prefer `env`).
    #[serde(default)]
    pub key: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sandbox (§4.A/§4.B)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "d_overall_deadline_secs")]
    pub overall_deadline_secs: u64,
    #[serde(default = "d_idle_deadline_secs")]
    pub idle_deadline_secs: u64,
    #[serde(default = "d_max_runtime_secs")]
    pub max_runtime_secs: u64,
    #[serde(default = "d_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "d_cpu")]
    pub cpu: f64,
    #[serde(default = "d_memory_mb")]
    pub memory_mb: u64,
    /// Base directory standing in for the process host's shared
    /// filesystem namespace (local/dev process-host implementation only).
    #[serde(default)]
    pub base_dir: Option<std::path::PathBuf>,
    /// Path to the Driver binary (`sa-sandbox-driver`) the process host
    /// spawns. Defaults to a binary named `sa-sandbox-driver` next to the
    /// running `serialagent` executable.
    #[serde(default)]
    pub driver_binary: Option<std::path::PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            overall_deadline_secs: d_overall_deadline_secs(),
            idle_deadline_secs: d_idle_deadline_secs(),
            max_runtime_secs: d_max_runtime_secs(),
            poll_interval_ms: d_poll_interval_ms(),
            cpu: d_cpu(),
            memory_mb: d_memory_mb(),
            base_dir: None,
            driver_binary: None,
        }
    }
}

impl SandboxConfig {
    /// Resolve the Driver binary path: the configured path if set, else
    /// `SA_DRIVER_BINARY`, else a `sa-sandbox-driver` sibling of the
    /// current executable.
    pub fn resolve_driver_binary(&self) -> std::path::PathBuf {
        if let Some(p) = &self.driver_binary {
            return p.clone();
        }
        if let Ok(v) = std::env::var("SA_DRIVER_BINARY") {
            return v.into();
        }
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.join("sa-sandbox-driver")))
            .unwrap_or_else(|| std::path::PathBuf::from("sa-sandbox-driver"))
    }
}

fn d_overall_deadline_secs() -> u64 {
    7200
}
fn d_idle_deadline_secs() -> u64 {
    1800
}
fn d_max_runtime_secs() -> u64 {
    300
}
fn d_poll_interval_ms() -> u64 {
    100
}
fn d_cpu() -> f64 {
    4.0
}
fn d_memory_mb() -> u64 {
    4096
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session registry (§4.C)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "d_capacity")]
    pub capacity: usize,
    #[serde(default = "d_idle_ttl_minutes")]
    pub idle_ttl_minutes: i64,
    #[serde(default = "d_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            capacity: d_capacity(),
            idle_ttl_minutes: d_idle_ttl_minutes(),
            sweep_interval_secs: d_sweep_interval_secs(),
        }
    }
}

fn d_capacity() -> usize {
    1000
}
fn d_idle_ttl_minutes() -> i64 {
    30
}
fn d_sweep_interval_secs() -> u64 {
    60
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Logging
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing-subscriber` `EnvFilter` directive string.
    #[serde(default = "d_log_filter")]
    pub filter: String,
    /// Emit JSON-structured logs instead of human-readable ones.
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: d_log_filter(),
            json: false,
        }
    }
}

fn d_log_filter() -> String {
    "info,sa_gateway=debug".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = Config::default();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.sandbox.idle_deadline_secs, 1800);
        assert_eq!(cfg.sessions.idle_ttl_minutes, 30);
    }

    #[test]
    fn validate_rejects_empty_session_secret() {
        let mut cfg = Config::default();
        cfg.llm.base_url = "https://example.invalid".into();
        assert!(cfg.validate().is_err());
        cfg.server.session_secret = "s3cr3t".into();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn redacted_hides_secrets() {
        let mut cfg = Config::default();
        cfg.server.session_secret = "s3cr3t".into();
        cfg.llm.auth.key = Some("sk-abc".into());
        let r = cfg.redacted();
        assert_eq!(r.server.session_secret, "***");
        assert_eq!(r.llm.auth.key.as_deref(), Some("***"));
    }
}
