//! Persisted key/value settings
//!
//! The settings channel delivers one key at a time. Three boolean toggles
//! (`logaccelerometer`, `loggyroscope`, `logheartrate`) switch sensors on and
//! off; `apiurl` and `fupendpoint` (each `{"name": "..."}`) name the upload
//! endpoint the companion relays to. Unknown keys are kept verbatim.
//!
//! Settings start from defaults, are merged with the JSON file on load and
//! written back on save.

use std::fs;
use std::path::Path;

use log::{debug, warn};
use serde_json::{json, Map, Value};

use crate::errors::SettingsError;
use crate::sensors::SensorKind;

pub const API_URL_KEY: &str = "apiurl";
pub const UPLOAD_ENDPOINT_KEY: &str = "fupendpoint";

/// What an applied setting changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingChange {
    SensorToggle { kind: SensorKind, enabled: bool },
    /// `apiurl` or `fupendpoint` changed
    Endpoint,
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    values: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut values = Map::new();
        values.insert(API_URL_KEY.into(), json!({ "name": "" }));
        values.insert(UPLOAD_ENDPOINT_KEY.into(), json!({ "name": "" }));
        for kind in SensorKind::ALL {
            values.insert(kind.settings_key(), Value::Bool(false));
        }
        Self { values }
    }
}

fn toggle_kind(key: &str) -> Option<SensorKind> {
    SensorKind::ALL.into_iter().find(|k| k.settings_key() == key)
}

fn named(value: &Value) -> Option<&str> {
    value.get("name").and_then(Value::as_str)
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Validate and store one key; `None` when the value did not change
    pub fn apply(&mut self, key: &str, value: Value) -> Result<Option<SettingChange>, SettingsError> {
        let change = if let Some(kind) = toggle_kind(key) {
            let enabled = value.as_bool().ok_or_else(|| SettingsError::InvalidValue {
                key: key.to_string(),
                reason: "expected a boolean",
            })?;
            SettingChange::SensorToggle { kind, enabled }
        } else if key == API_URL_KEY || key == UPLOAD_ENDPOINT_KEY {
            if named(&value).is_none() {
                return Err(SettingsError::InvalidValue {
                    key: key.to_string(),
                    reason: "expected {\"name\": string}",
                });
            }
            SettingChange::Endpoint
        } else {
            SettingChange::Other(key.to_string())
        };

        if self.values.get(key) == Some(&value) {
            return Ok(None);
        }
        debug!("setting {} = {}", key, value);
        self.values.insert(key.to_string(), value);
        Ok(Some(change))
    }

    /// Whether the toggle for `kind` is on
    pub fn sensor_enabled(&self, kind: SensorKind) -> bool {
        self.values
            .get(&kind.settings_key())
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn enabled_sensors(&self) -> Vec<SensorKind> {
        SensorKind::ALL
            .into_iter()
            .filter(|k| self.sensor_enabled(*k))
            .collect()
    }

    /// `<apiurl>/<fupendpoint>`, or `None` while either part is empty
    pub fn upload_endpoint(&self) -> Option<String> {
        let base = self.values.get(API_URL_KEY).and_then(named)?.trim_end_matches('/');
        let path = self
            .values
            .get(UPLOAD_ENDPOINT_KEY)
            .and_then(named)?
            .trim_start_matches('/');
        if base.is_empty() || path.is_empty() {
            return None;
        }
        Some(format!("{}/{}", base, path))
    }

    /// Defaults merged with the file at `path`
    pub fn try_load(path: &Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path)?;
        let stored: Map<String, Value> = serde_json::from_str(&text)?;

        let mut settings = Self::default();
        for (key, value) in stored {
            if let Err(e) = settings.apply(&key, value) {
                warn!("Ignoring stored setting: {}", e);
            }
        }
        Ok(settings)
    }

    /// Like `try_load`, falling back to defaults on any failure
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Settings not loaded from {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let text = serde_json::to_string_pretty(&self.values)?;
        fs::write(path, text)?;
        Ok(())
    }
}
