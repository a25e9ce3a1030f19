//! Configuration tests

use crate::util::config::{EngineConfig, ScriptingConfig};
use crate::util::logger::LogLevel;

#[test]
fn test_defaults() {
    let config = EngineConfig::default();
    assert!(!config.scripting.fail_on_script_error);
    assert_eq!(config.scripting.max_call_depth, 200);
    assert_eq!(config.logging.level, LogLevel::Info);
    assert_eq!(config.session.players, 2);
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let config = EngineConfig::from_toml(
        r#"
        [scripting]
        fail_on_script_error = true

        [logging]
        level = "debug"
        "#,
    )
    .unwrap();
    assert!(config.scripting.fail_on_script_error);
    assert_eq!(
        config.scripting.max_instructions_per_resume,
        ScriptingConfig::default().max_instructions_per_resume
    );
    assert_eq!(config.logging.level, LogLevel::Debug);
}

#[test]
fn test_invalid_toml_is_parse_error() {
    let err = EngineConfig::from_toml("[scripting\n").unwrap_err();
    assert!(err.to_string().starts_with("Config parse error"));
}

#[test]
fn test_toml_round_trip() {
    let mut config = EngineConfig::default();
    config.session.seed = 99;
    let text = config.to_toml().unwrap();
    let back = EngineConfig::from_toml(&text).unwrap();
    assert_eq!(back.session.seed, 99);
}
