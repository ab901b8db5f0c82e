use ss_domain::config::{Config, ConfigSeverity};

/// Validate the config, printing every issue. Returns false when any issue
/// is an error.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    for issue in &issues {
        println!("{issue}");
    }

    let errors = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    println!(
        "\n{errors} error(s), {} warning(s) in {config_path}",
        issues.len() - errors
    );

    errors == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML.
/// A plaintext completion key is masked.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let mut config = config.clone();
    if config.completion.auth.key.is_some() {
        config.completion.auth.key = Some("********".into());
    }
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
