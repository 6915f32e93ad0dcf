use piazza_slack::config::AppConfig;
use piazza_slack::error::ConfigError;
use serial_test::serial;

const VARS: [&str; 6] =
    ["BIND_ADDR", "DATABASE_URL", "BRIDGE_DATA_DIR", "FORUM_BASE_URL", "CHAT_API_BASE_URL", "TRIGGER_TOKEN"];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn defaults_apply_when_unset() {
    clear_env();
    let cfg = AppConfig::from_env().unwrap();
    assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.forum_base_url, "https://piazza.com");
    assert_eq!(cfg.chat_api_base_url, "https://slack.com/api");
    assert!(cfg.database_url.is_none());
    assert!(cfg.data_dir.is_none());
    assert!(cfg.trigger_token.is_none());
}

#[test]
#[serial]
fn blank_values_count_as_unset() {
    clear_env();
    std::env::set_var("TRIGGER_TOKEN", "  ");
    std::env::set_var("BRIDGE_DATA_DIR", "");
    let cfg = AppConfig::from_env().unwrap();
    assert!(cfg.trigger_token.is_none());
    assert!(cfg.data_dir.is_none());
    clear_env();
}

#[test]
#[serial]
fn overrides_and_validation() {
    clear_env();
    let tmp = tempfile::tempdir().unwrap();
    std::env::set_var("BRIDGE_DATA_DIR", tmp.path().to_str().unwrap());
    std::env::set_var("FORUM_BASE_URL", "http://127.0.0.1:9000");
    std::env::set_var("TRIGGER_TOKEN", "s3cret");
    let cfg = AppConfig::from_env().unwrap();
    assert_eq!(cfg.data_dir.as_deref(), tmp.path().to_str());
    assert_eq!(cfg.forum_base_url, "http://127.0.0.1:9000");
    assert_eq!(cfg.trigger_token.as_deref(), Some("s3cret"));

    std::env::set_var("BIND_ADDR", "8080");
    assert!(matches!(AppConfig::from_env(), Err(ConfigError::InvalidVar { var: "BIND_ADDR", .. })));
    clear_env();
}
