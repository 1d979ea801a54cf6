use statwatch::cli::Cli;
use statwatch::config::Config;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", contents).unwrap();
    file
}

#[test]
fn test_load_full_valid_config() {
    let file = write_config(
        r#"
        [core]
        log_level = "debug"
        [dispatch]
        webhook_url = "https://chat.example.com/hook"
        api_endpoint = "https://api.example.com/ingest"
        api_key = "secret"
        enable_webhook = false
        interval_seconds = 60
        [sources]
        root = "/tmp/fakeroot"
        [location]
        fused = false
        gpsd_addr = "10.0.0.2:2947"
        network_url = "http://geo.example.com/locate"
        passive_path = "/run/statwatch/fix.json"
        accurate_fix_meters = 25.0
        [control]
        listen_addr = "127.0.0.1:8088"
        [prefs]
        path = "/var/lib/statwatch/prefs.json"
    "#,
    );

    let cli = Cli {
        config: Some(file.path().to_path_buf()),
        ..Default::default()
    };
    let config = Config::load(&cli).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert_eq!(
        config.dispatch.webhook_url.as_deref(),
        Some("https://chat.example.com/hook")
    );
    assert_eq!(config.dispatch.api_key(), Some("secret"));
    assert!(!config.dispatch.enable_webhook);
    assert!(config.dispatch.enable_api); // not in the file, so the default
    assert_eq!(config.dispatch.interval_seconds, 60);
    assert_eq!(config.sources.root, PathBuf::from("/tmp/fakeroot"));
    assert!(config.location.enabled);
    assert!(!config.location.fused);
    assert_eq!(config.location.gpsd_addr.as_deref(), Some("10.0.0.2:2947"));
    assert_eq!(
        config.location.passive_path,
        Some(PathBuf::from("/run/statwatch/fix.json"))
    );
    assert_eq!(config.location.accurate_fix_meters, 25.0);
    assert_eq!(
        config.control.listen_addr,
        Some("127.0.0.1:8088".parse::<SocketAddr>().unwrap())
    );
    assert_eq!(
        config.prefs.path,
        PathBuf::from("/var/lib/statwatch/prefs.json")
    );
}

#[test]
fn test_cli_overrides_file() {
    let file = write_config(
        r#"
        [dispatch]
        interval_seconds = 60
        [sources]
        root = "/from/file"
    "#,
    );

    let cli = Cli {
        config: Some(file.path().to_path_buf()),
        interval: Some(5),
        root: Some(PathBuf::from("/from/cli")),
        ..Default::default()
    };
    let config = Config::load(&cli).unwrap();

    assert_eq!(config.dispatch.interval_seconds, 5);
    assert_eq!(config.sources.root, PathBuf::from("/from/cli"));
}

#[test]
fn test_environment_overrides_file() {
    let file = write_config(
        r#"
        [http]
        timeout_seconds = 10
    "#,
    );
    std::env::set_var("STATWATCH_HTTP__TIMEOUT_SECONDS", "3");

    let cli = Cli {
        config: Some(file.path().to_path_buf()),
        ..Default::default()
    };
    let config = Config::load(&cli);
    std::env::remove_var("STATWATCH_HTTP__TIMEOUT_SECONDS");

    assert_eq!(config.unwrap().http.timeout_seconds, 3);
}

#[test]
fn test_missing_explicit_config_file_fails() {
    let cli = Cli {
        config: Some(PathBuf::from("/nonexistent/statwatch.toml")),
        ..Default::default()
    };
    let err = Config::load(&cli).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
}

#[test]
fn test_zero_interval_is_rejected() {
    let cli = Cli {
        interval: Some(0),
        ..Default::default()
    };
    assert!(Config::load(&cli).is_err());
}
