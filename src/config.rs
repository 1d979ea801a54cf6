//! Configuration management for StatWatch
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses the `figment`
//! crate to load configuration from a `statwatch.toml` file and merge it
//! with environment variables and command-line overrides.
//!
//! It also defines [`DispatchConfig`], the part of the configuration that can
//! be amended at runtime by a [`ConfigEvent`] without restarting the scheduler.

use crate::cli::Cli;
use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default configuration file, read when present.
pub const DEFAULT_CONFIG_FILE: &str = "statwatch.toml";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub core: CoreConfig,
    /// Seed values for the dispatch configuration.
    pub dispatch: DispatchConfig,
    pub http: HttpConfig,
    pub sources: SourcesConfig,
    pub location: LocationConfig,
    pub control: ControlConfig,
    pub prefs: PrefsConfig,
}

/// General application settings.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CoreConfig {
    /// The logging level, used when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Outbound HTTP settings.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    /// Upper bound on a single request, so a hung sink cannot stall the worker.
    pub timeout_seconds: u64,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_seconds: 10 }
    }
}

/// Where OS telemetry is read from.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SourcesConfig {
    /// Filesystem root that `proc/` and `sys/` are resolved against.
    pub root: PathBuf,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
        }
    }
}

/// Location acquisition settings.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LocationConfig {
    pub enabled: bool,
    /// Try the fused provider before the individual ones.
    pub fused: bool,
    /// Address of the gpsd daemon.
    pub gpsd_addr: Option<String>,
    /// HTTP geolocation endpoint returning `{lat, lon, accuracy}`.
    pub network_url: Option<String>,
    /// JSON fix file maintained by another process.
    pub passive_path: Option<PathBuf>,
    /// Accuracy (meters) the fused provider waits for before its first fix.
    pub accurate_fix_meters: f32,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fused: true,
            gpsd_addr: Some("127.0.0.1:2947".to_string()),
            network_url: None,
            passive_path: None,
            accurate_fix_meters: 50.0,
        }
    }
}

/// Local control server.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct ControlConfig {
    /// Address to listen on; the server is disabled when unset.
    pub listen_addr: Option<SocketAddr>,
}

/// Persisted settings store.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PrefsConfig {
    pub path: PathBuf,
}

impl Default for PrefsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("statwatch-prefs.json"),
        }
    }
}

/// Sink targets and scheduling flags.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    pub webhook_url: Option<String>,
    pub api_endpoint: Option<String>,
    pub api_key: Option<String>,
    pub enable_webhook: bool,
    pub enable_api: bool,
    pub enable_periodic: bool,
    /// Seconds between periodic ticks.
    pub interval_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            api_endpoint: None,
            api_key: None,
            enable_webhook: true,
            enable_api: true,
            enable_periodic: true,
            interval_seconds: 30,
        }
    }
}

impl DispatchConfig {
    /// Overwrites the fields present in `event`; absent fields persist.
    pub fn apply(&mut self, event: &ConfigEvent) {
        if let Some(webhook) = &event.webhook {
            self.webhook_url = Some(webhook.clone());
        }
        if let Some(api) = &event.api {
            self.api_endpoint = Some(api.clone());
        }
        if let Some(key) = &event.api_key {
            self.api_key = Some(key.clone());
        }
        if let Some(enabled) = event.enable_webhook {
            self.enable_webhook = enabled;
        }
        if let Some(enabled) = event.enable_api {
            self.enable_api = enabled;
        }
        if let Some(enabled) = event.enable_periodic {
            self.enable_periodic = enabled;
        }
    }

    /// The webhook URL, when the chat sink is enabled and configured.
    pub fn webhook_target(&self) -> Option<&str> {
        non_empty(&self.webhook_url).filter(|_| self.enable_webhook)
    }

    /// The API endpoint, when the API sink is enabled and configured.
    pub fn api_target(&self) -> Option<&str> {
        non_empty(&self.api_endpoint).filter(|_| self.enable_api)
    }

    /// The bearer token, when non-empty.
    pub fn api_key(&self) -> Option<&str> {
        non_empty(&self.api_key)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// An inbound start/configure command. Only present fields take effect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_webhook: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_api: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_periodic: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_immediate: Option<bool>,
}

impl ConfigEvent {
    pub fn wants_immediate(&self) -> bool {
        self.trigger_immediate.unwrap_or(false)
    }
}

impl Config {
    /// Loads the configuration by layering defaults, the TOML file,
    /// `STATWATCH_` environment variables and command-line overrides.
    ///
    /// An explicitly named config file must exist; the default one is optional.
    pub fn load(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found at specified path: {}", path.display());
                }
                path.clone()
            }
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(file))
            // e.g. STATWATCH_DISPATCH__INTERVAL_SECONDS=60
            .merge(Env::prefixed("STATWATCH_").split("__"))
            .merge(cli)
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the scheduler cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.interval_seconds == 0 {
            bail!("dispatch.interval_seconds must be positive");
        }
        if self.http.timeout_seconds == 0 {
            bail!("http.timeout_seconds must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_overwrites_only_present_fields() {
        let mut config = DispatchConfig {
            webhook_url: Some("https://chat/hook".to_string()),
            api_endpoint: Some("https://api/ingest".to_string()),
            ..Default::default()
        };
        config.apply(&ConfigEvent {
            api: Some("https://api/v2".to_string()),
            enable_webhook: Some(false),
            ..Default::default()
        });

        assert_eq!(config.webhook_url.as_deref(), Some("https://chat/hook"));
        assert_eq!(config.api_endpoint.as_deref(), Some("https://api/v2"));
        assert!(!config.enable_webhook);
        assert!(config.enable_api);
        assert!(config.enable_periodic);
    }

    #[test]
    fn test_targets_require_flag_and_value() {
        let mut config = DispatchConfig {
            webhook_url: Some(String::new()),
            api_endpoint: Some("https://api".to_string()),
            api_key: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(config.webhook_target(), None);
        assert_eq!(config.api_target(), Some("https://api"));
        assert_eq!(config.api_key(), None);

        config.enable_api = false;
        assert_eq!(config.api_target(), None);
        assert_eq!(config.api_endpoint.as_deref(), Some("https://api"));
    }

    #[test]
    fn test_event_wire_names() {
        let event: ConfigEvent = serde_json::from_str(
            r#"{"webhook":"w","apiKey":"k","enableWebhook":false,"triggerImmediate":true}"#,
        )
        .unwrap();
        assert_eq!(event.webhook.as_deref(), Some("w"));
        assert_eq!(event.api_key.as_deref(), Some("k"));
        assert_eq!(event.enable_webhook, Some(false));
        assert!(event.wants_immediate());
        assert_eq!(event.api, None);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());
        config.dispatch.interval_seconds = 0;
        assert!(config.validate().is_err());
    }
}
