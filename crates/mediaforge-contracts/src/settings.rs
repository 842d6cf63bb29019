use std::env;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{Map, Value};

use crate::request::ApiKey;

/// Settings key the credential is persisted under.
pub const API_KEY_SETTING: &str = "gemini_api_key";

/// Small JSON settings file holding the only persisted state: the API
/// credential. Unknown keys already in the file are preserved on write.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$MEDIAFORGE_HOME/settings.json`, falling back to
    /// `$HOME/.mediaforge/settings.json`.
    pub fn default_path() -> PathBuf {
        if let Some(home) = non_empty_env("MEDIAFORGE_HOME") {
            return PathBuf::from(home).join("settings.json");
        }
        let home = non_empty_env("HOME")
            .or_else(|| non_empty_env("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        home.join(".mediaforge").join("settings.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored credential; a missing or unreadable file yields `None`.
    pub fn load_api_key(&self) -> Option<ApiKey> {
        read_json_object(&self.path)?
            .get(API_KEY_SETTING)
            .and_then(Value::as_str)
            .and_then(ApiKey::new)
    }

    pub fn save_api_key(&self, key: &ApiKey) -> anyhow::Result<()> {
        let mut payload = read_existing_settings(&self.path)?;
        payload.insert(
            API_KEY_SETTING.to_string(),
            Value::String(key.expose().to_string()),
        );
        write_json_object(&self.path, &payload)
            .with_context(|| format!("failed writing {}", self.path.display()))
    }

    /// Removes the stored credential. Returns whether one was present.
    pub fn clear_api_key(&self) -> anyhow::Result<bool> {
        let Some(mut payload) = read_json_object(&self.path) else {
            return Ok(false);
        };
        if payload.remove(API_KEY_SETTING).is_none() {
            return Ok(false);
        }
        write_json_object(&self.path, &payload)
            .with_context(|| format!("failed writing {}", self.path.display()))?;
        Ok(true)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

/// Missing file is an empty object; unreadable or non-object content is an
/// error so unrelated settings are never clobbered.
fn read_existing_settings(path: &Path) -> anyhow::Result<Map<String, Value>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed reading {}", path.display()))
        }
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => Ok(map),
        _ => anyhow::bail!(
            "{} is not a JSON object; fix or remove it before saving a key",
            path.display()
        ),
    }
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}
