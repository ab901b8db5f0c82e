use ss_domain::config::{Config, ConfigSeverity};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
}

#[test]
fn default_config_validates_cleanly() {
    let issues = Config::default().validate();
    assert!(
        issues.iter().all(|i| i.severity != ConfigSeverity::Error),
        "unexpected errors: {issues:?}"
    );
}

#[test]
fn retention_and_rate_limit_defaults() {
    let config = Config::default();
    assert_eq!(config.retention.soft_quota, 500);
    assert_eq!(config.retention.keep_last, 10_000);
    assert_eq!(config.retention.batch_ops, 450);
    assert_eq!(config.rate_limit.api.max_requests, 100);
    assert_eq!(config.rate_limit.api.window_secs, 900);
    assert_eq!(config.rate_limit.messages.max_requests, 20);
    assert_eq!(config.rate_limit.messages.window_secs, 60);
    assert_eq!(config.rate_limit.sweep_interval_secs, 1_800);
}

#[test]
fn partial_toml_keeps_other_defaults() {
    let toml_str = r#"
[completion]
endpoint = "https://flowise.example.com/api/v1/prediction/abc"
max_retries = 3

[retention]
keep_last = 2000
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.completion.max_retries, 3);
    assert_eq!(config.completion.timeout_ms, 30_000);
    assert_eq!(config.retention.keep_last, 2_000);
    assert_eq!(config.retention.soft_quota, 500);
    assert_eq!(config.store.existence_retries, 3);
}

#[test]
fn oversized_archive_batches_are_rejected() {
    let toml_str = r#"
[store]
max_batch_ops = 400

[retention]
batch_ops = 450
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error && i.field == "retention.batch_ops"));
}

#[test]
fn empty_endpoint_is_an_error() {
    let mut config = Config::default();
    config.completion.endpoint = "  ".into();
    let issues = config.validate();
    assert!(issues.iter().any(|i| i.field == "completion.endpoint"));
}

#[test]
fn cors_wildcard_is_only_a_warning() {
    let toml_str = r#"
[server.cors]
allowed_origins = ["*"]
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    let cors = issues
        .iter()
        .find(|i| i.field == "server.cors.allowed_origins")
        .unwrap();
    assert_eq!(cors.severity, ConfigSeverity::Warning);
}
