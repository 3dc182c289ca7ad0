pub mod config;
pub mod doctor;

use clap::{Parser, Subcommand};

/// serialagent — an agent loop coupled to a per-user code sandbox.
#[derive(Debug, Parser)]
#[command(name = "serialagent", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Run diagnostic checks against the current configuration.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (secrets redacted) as TOML.
    Show,
}

/// Load the configuration from the path named by `SA_CONFIG` (default
/// `config.toml`), applying environment overrides. Parsing-only: does
/// **not** validate, so `config validate`/`doctor` can report problems
/// instead of failing to even load.
pub fn load_config() -> anyhow::Result<(sa_domain::config::Config, String)> {
    let config_path = std::env::var("SA_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let mut config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        sa_domain::config::Config::default()
    };
    config.apply_env_overrides();

    Ok((config, config_path))
}
