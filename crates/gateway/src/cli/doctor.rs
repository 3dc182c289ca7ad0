use sa_domain::config::Config;

/// Run all diagnostic checks and print a summary.
///
/// Returns `Ok(true)` when every check passes, `Ok(false)` when at least
/// one check failed.
pub async fn run(config: &Config, config_path: &str) -> anyhow::Result<bool> {
    println!("serialagent doctor");
    println!("==================\n");

    let mut all_passed = true;

    check_config_file(config_path);
    check_config_validation(config, &mut all_passed);
    check_llm_base_url(config, &mut all_passed);
    check_driver_binary(config, &mut all_passed);
    check_sandbox_base_dir(config, &mut all_passed);

    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    Ok(all_passed)
}

// ── Individual checks ─────────────────────────────────────────────────

fn check_config_file(config_path: &str) {
    let exists = std::path::Path::new(config_path).exists();
    print_check(
        "Config file exists",
        exists,
        if exists {
            config_path.to_owned()
        } else {
            format!("{config_path} not found (using defaults)")
        },
    );
    // A missing config file is not a failure: defaults plus environment
    // overrides may be sufficient to run.
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    match config.validate() {
        Ok(()) => print_check("Config validation", true, "no issues".into()),
        Err(e) => {
            print_check("Config validation", false, e.to_string());
            *all_passed = false;
        }
    }
}

fn check_llm_base_url(config: &Config, all_passed: &mut bool) {
    let ok = !config.llm.base_url.trim().is_empty();
    print_check(
        "LLM base URL configured",
        ok,
        if ok {
            config.llm.base_url.clone()
        } else {
            "not set (SA_LLM_BASE_URL / llm.base_url)".into()
        },
    );
    if !ok {
        *all_passed = false;
    }
}

fn check_driver_binary(config: &Config, all_passed: &mut bool) {
    let path = config.sandbox.resolve_driver_binary();
    let exists = path.is_file();
    print_check(
        "Driver binary present",
        exists,
        if exists {
            path.display().to_string()
        } else {
            format!("{} not found", path.display())
        },
    );
    if !exists {
        *all_passed = false;
    }
}

fn check_sandbox_base_dir(config: &Config, all_passed: &mut bool) {
    let Some(path) = &config.sandbox.base_dir else {
        // No override configured: the process host falls back to a
        // per-session temp directory, which is always writable.
        print_check(
            "Sandbox base directory",
            true,
            "using default temp dir".into(),
        );
        return;
    };

    let exists = path.exists();
    let writable = if exists {
        let probe = path.join(".serialagent_doctor_probe");
        let w = std::fs::write(&probe, b"probe").is_ok();
        let _ = std::fs::remove_file(&probe);
        w
    } else {
        false
    };

    let ok = exists && writable;
    let detail = match (exists, writable) {
        (true, true) => format!("{} (writable)", path.display()),
        (true, false) => format!("{} (not writable)", path.display()),
        _ => format!("{} (does not exist)", path.display()),
    };

    print_check("Sandbox base directory", ok, detail);
    if !ok {
        *all_passed = false;
    }
}

// ── Formatting helper ─────────────────────────────────────────────────

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}
