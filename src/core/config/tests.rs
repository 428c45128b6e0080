use super::data::{mask_secret, path_display, Config, DEFAULT_BACKEND_URL};
use super::io::ConfigError;
use crate::core::providers::hosted::DEFAULT_OPENAI_MODEL;
use std::collections::HashMap;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_load_nonexistent_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nonexistent_config.toml");

    let config = Config::load_from_path(&config_path).expect("Failed to load config");

    assert_eq!(config, Config::default());
    assert_eq!(config.backend_url(), DEFAULT_BACKEND_URL);
}

#[test]
fn test_config_persistence_lifecycle() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config
        .set_value("backend-url", "http://rag.internal:9000")
        .expect("set backend");
    config
        .set_value("openai-api-key", "sk-test")
        .expect("set key");
    config.save_to_path(&config_path).expect("save");

    let loaded = Config::load_from_path(&config_path).expect("load");
    assert_eq!(loaded.backend_url(), "http://rag.internal:9000");
    assert_eq!(
        loaded.providers.openai.api_key.as_deref(),
        Some("sk-test")
    );

    let mut loaded = loaded;
    loaded.set_value("backend-url", "").expect("unset");
    loaded.save_to_path(&config_path).expect("save again");
    let reloaded = Config::load_from_path(&config_path).expect("reload");
    assert_eq!(reloaded.backend_url, None);
    assert_eq!(reloaded.backend_url(), DEFAULT_BACKEND_URL);
}

#[test]
fn parse_error_names_the_path() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, "backend_url = [unterminated").expect("write");

    let err = Config::load_from_path(&config_path).expect_err("invalid toml");
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().starts_with("Failed to parse config at "));
}

#[test]
fn nested_tables_deserialize() {
    let config: Config = toml::from_str(
        r#"
default_provider = "gemini"
default_agent = "flutter"

[providers.gemini]
api_key = "g-key"
model = "gemini-1.5-pro"

[storage]
url = "https://example.supabase.co"
api_key = "anon"
"#,
    )
    .expect("parse");

    let gemini = config.gemini_settings().expect("gemini configured");
    assert_eq!(gemini.api_key, "g-key");
    assert_eq!(gemini.model, "gemini-1.5-pro");
    assert!(config.openai_settings().is_none());
    assert_eq!(config.default_agent(), "flutter");
    assert_eq!(
        config.storage_endpoint(),
        Some(("https://example.supabase.co".into(), "anon".into()))
    );
}

#[test]
fn env_overrides_win_over_file_values() {
    let mut config = Config {
        backend_url: Some("http://from-file".into()),
        ..Default::default()
    };
    let env: HashMap<&str, &str> = HashMap::from([
        ("ASKDOCS_BACKEND_URL", "http://from-env"),
        ("OPENAI_API_KEY", "sk-env"),
        ("ASKDOCS_OWNER_ID", "  "),
    ]);

    config.apply_env_overrides(|name| env.get(name).map(|value| value.to_string()));

    assert_eq!(config.backend_url(), "http://from-env");
    let openai = config.openai_settings().expect("openai configured");
    assert_eq!(openai.api_key, "sk-env");
    assert_eq!(openai.model, DEFAULT_OPENAI_MODEL);
    assert_eq!(config.owner_id(), "local");
}

#[test]
fn unknown_key_is_rejected() {
    let mut config = Config::default();
    let err = config.set_value("theme", "dark").expect_err("unknown");
    assert!(matches!(err, ConfigError::UnknownKey(key) if key == "theme"));
}

#[test]
fn blank_api_key_does_not_configure_provider() {
    let mut config = Config::default();
    config.providers.openai.api_key = Some("   ".into());
    assert!(config.openai_settings().is_none());
}

#[test]
fn secrets_are_masked() {
    assert_eq!(mask_secret("sk-1234567"), "sk-1****");
    assert_eq!(mask_secret("abc"), "****");
}

#[test]
#[cfg(unix)]
fn path_display_uses_tilde_under_home() {
    let Some(home) = std::env::var_os("HOME") else {
        return;
    };
    let path = PathBuf::from(home).join(".config").join("askdocs");
    assert_eq!(path_display(&path), "~/.config/askdocs");
}
