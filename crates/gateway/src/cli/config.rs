use sa_domain::config::Config;

/// Validate the config, printing the result. Returns whether it's valid.
pub fn validate(config: &Config, config_path: &str) -> bool {
    match config.validate() {
        Ok(()) => {
            println!("Config OK ({config_path})");
            true
        }
        Err(e) => {
            println!("{e}");
            println!("\nconfig invalid: {config_path}");
            false
        }
    }
}

/// Dump the resolved config (secrets redacted, defaults filled in) as TOML.
pub fn show(config: &Config) {
    match toml::to_string_pretty(&config.redacted()) {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("failed to serialize config: {e}");
            std::process::exit(1);
        }
    }
}
