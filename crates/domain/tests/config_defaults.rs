use std::io::Write;

use bl_domain::config::{Config, ConfigSeverity};

#[test]
fn default_session_timings() {
    let config = Config::default();
    assert_eq!(config.sessions.default_timeout_secs, 30);
    assert_eq!(config.sessions.expiration_secs, 600);
    assert_eq!(config.sessions.grace_period_ms, 2_000);
    assert!(config.sessions.skip_responder);
}

#[test]
fn default_config_is_valid() {
    assert!(Config::default().validate().is_empty());
}

#[test]
fn explicit_sections_parse() {
    let toml_str = r#"
[sessions]
default_timeout_secs = 15
skip_responder = false

[dispatch]
blocking_workers = 2
bot_id = 123456
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.sessions.default_timeout_secs, 15);
    assert_eq!(config.sessions.expiration_secs, 600);
    assert!(!config.sessions.skip_responder);
    assert_eq!(config.dispatch.blocking_workers, 2);
    assert_eq!(config.dispatch.bot_id, Some(123456));
}

#[test]
fn zero_workers_is_an_error() {
    let mut config = Config::default();
    config.dispatch.blocking_workers = 0;
    let issues = config.validate();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, ConfigSeverity::Error);
    assert_eq!(issues[0].field, "dispatch.blocking_workers");
}

#[test]
fn short_expiration_warns() {
    let mut config = Config::default();
    config.sessions.expiration_secs = 10;
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Warning && i.field == "sessions.expiration_secs"));
}

#[test]
fn load_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.sessions.default_timeout_secs, 30);
}

#[test]
fn load_reads_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[sessions]\ngrace_period_ms = 500").unwrap();
    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.sessions.grace_period_ms, 500);
}

#[test]
fn load_rejects_malformed_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[sessions\nbroken").unwrap();
    let err = Config::load(file.path()).unwrap_err();
    assert!(err.to_string().starts_with("config: parsing"));
}
