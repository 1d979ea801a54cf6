//! Persisted sink settings.
//!
//! Settings live in a [`KeyValueStore`] under fixed key names. [`FilePrefs`]
//! keeps them as a JSON object on disk, rewritten atomically on every save.

use crate::config::{ConfigEvent, DispatchConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

pub const KEY_WEBHOOK_URL: &str = "webhook_url";
pub const KEY_API_ENDPOINT: &str = "api_endpoint";
pub const KEY_API_KEY: &str = "api_key";
pub const KEY_ENABLE_WEBHOOK: &str = "enable_webhook";
pub const KEY_ENABLE_API: &str = "enable_api";
pub const KEY_ENABLE_PERIODIC: &str = "enable_periodic";

#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("failed to write settings to {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Bool(bool),
    Text(String),
}

/// String and boolean settings keyed by name.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<PrefValue>;

    /// True when nothing has ever been saved.
    fn is_empty(&self) -> bool;

    /// Writes every entry in one commit.
    fn set_all(&self, entries: Vec<(&str, PrefValue)>) -> Result<(), PrefsError>;

    fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            PrefValue::Text(value) => Some(value),
            PrefValue::Bool(_) => None,
        }
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            PrefValue::Bool(value) => Some(value),
            PrefValue::Text(_) => None,
        }
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), PrefsError> {
        self.set_all(vec![(key, PrefValue::Text(value.to_string()))])
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), PrefsError> {
        self.set_all(vec![(key, PrefValue::Bool(value))])
    }
}

/// A JSON file store. Unreadable or corrupt files load as empty.
#[derive(Debug)]
pub struct FilePrefs {
    path: PathBuf,
    values: Mutex<BTreeMap<String, PrefValue>>,
}

impl FilePrefs {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt settings file");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Settings file unreadable");
                BTreeMap::new()
            }
        };
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, PrefValue>) -> Result<(), PrefsError> {
        let raw = serde_json::to_string_pretty(values)?;
        let io_err = |source| PrefsError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp).map_err(io_err)?;
        file.write_all(raw.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        debug!(path = %self.path.display(), "Settings saved");
        Ok(())
    }
}

impl FilePrefs {
    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, PrefValue>> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for FilePrefs {
    fn get(&self, key: &str) -> Option<PrefValue> {
        self.lock().get(key).cloned()
    }

    fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn set_all(&self, entries: Vec<(&str, PrefValue)>) -> Result<(), PrefsError> {
        let mut values = self.lock();
        let mut updated = values.clone();
        for (key, value) in entries {
            updated.insert(key.to_string(), value);
        }
        self.persist(&updated)?;
        *values = updated;
        Ok(())
    }
}

/// The user-facing settings, with their defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedSettings {
    pub webhook_url: String,
    pub api_endpoint: String,
    pub api_key: String,
    pub enable_webhook: bool,
    pub enable_api: bool,
    pub enable_periodic: bool,
}

impl Default for SavedSettings {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            api_endpoint: String::new(),
            api_key: String::new(),
            enable_webhook: true,
            enable_api: true,
            enable_periodic: true,
        }
    }
}

impl SavedSettings {
    pub fn load(store: &dyn KeyValueStore) -> Self {
        let defaults = Self::default();
        Self {
            webhook_url: store.get_string(KEY_WEBHOOK_URL).unwrap_or(defaults.webhook_url),
            api_endpoint: store
                .get_string(KEY_API_ENDPOINT)
                .unwrap_or(defaults.api_endpoint),
            api_key: store.get_string(KEY_API_KEY).unwrap_or(defaults.api_key),
            enable_webhook: store
                .get_bool(KEY_ENABLE_WEBHOOK)
                .unwrap_or(defaults.enable_webhook),
            enable_api: store.get_bool(KEY_ENABLE_API).unwrap_or(defaults.enable_api),
            enable_periodic: store
                .get_bool(KEY_ENABLE_PERIODIC)
                .unwrap_or(defaults.enable_periodic),
        }
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<(), PrefsError> {
        store.set_all(vec![
            (KEY_WEBHOOK_URL, PrefValue::Text(self.webhook_url.clone())),
            (KEY_API_ENDPOINT, PrefValue::Text(self.api_endpoint.clone())),
            (KEY_API_KEY, PrefValue::Text(self.api_key.clone())),
            (KEY_ENABLE_WEBHOOK, PrefValue::Bool(self.enable_webhook)),
            (KEY_ENABLE_API, PrefValue::Bool(self.enable_api)),
            (KEY_ENABLE_PERIODIC, PrefValue::Bool(self.enable_periodic)),
        ])
    }

    /// Overwrites the fields present in `event`.
    pub fn update(&mut self, event: &ConfigEvent) {
        if let Some(webhook) = &event.webhook {
            self.webhook_url = webhook.clone();
        }
        if let Some(api) = &event.api {
            self.api_endpoint = api.clone();
        }
        if let Some(key) = &event.api_key {
            self.api_key = key.clone();
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

    /// A start event carrying every setting.
    pub fn to_event(&self, trigger_immediate: bool) -> ConfigEvent {
        ConfigEvent {
            webhook: Some(self.webhook_url.clone()),
            api: Some(self.api_endpoint.clone()),
            api_key: Some(self.api_key.clone()),
            enable_webhook: Some(self.enable_webhook),
            enable_api: Some(self.enable_api),
            enable_periodic: Some(self.enable_periodic),
            trigger_immediate: Some(trigger_immediate),
        }
    }

    /// The event a remote location request turns into: one immediate API
    /// post, no chat message, no periodic schedule.
    pub fn request_location_event(&self) -> ConfigEvent {
        ConfigEvent {
            enable_webhook: Some(false),
            enable_api: Some(true),
            enable_periodic: Some(false),
            ..self.to_event(true)
        }
    }

    /// Seeds `config` with these settings.
    pub fn apply_to(&self, config: &mut DispatchConfig) {
        config.apply(&self.to_event(false));
    }
}
