use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use url::Url;

const APP_JSON: &str = "app.json";
const BLOCKER_JSON: &str = "blocker.json";

const DEFAULT_API_BASE_URL: &str = "https://focusflow.replit.app";
const DEFAULT_BLOCKLIST_POLL_SECONDS: u64 = 8;
const DEFAULT_SESSION_POLL_SECONDS: u64 = 2;
const MIN_POLL_SECONDS: u64 = 1;
const MAX_POLL_SECONDS: u64 = 300;

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub schema: u8,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
    pub blocker: serde_json::Value,
}

/// Refresh cadences for the two poll loops. Session status is polled faster
/// than the blocklist because session expiry is the time-sensitive side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    pub blocklist_poll_seconds: u64,
    pub session_poll_seconds: u64,
    pub cross_tab_nudge: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            blocklist_poll_seconds: DEFAULT_BLOCKLIST_POLL_SECONDS,
            session_poll_seconds: DEFAULT_SESSION_POLL_SECONDS,
            cross_tab_nudge: true,
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "FocusFlow",
                "apiBaseUrl": DEFAULT_API_BASE_URL,
                "timezone": "UTC"
            }),
        ),
        (
            BLOCKER_JSON,
            serde_json::json!({
                "schema": 1,
                "blocklistPollSeconds": DEFAULT_BLOCKLIST_POLL_SECONDS,
                "sessionPollSeconds": DEFAULT_SESSION_POLL_SECONDS,
                "crossTabNudge": true
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_config(&config_dir.join(APP_JSON))?,
        blocker: read_config(&config_dir.join(BLOCKER_JSON))?,
    })
}

pub fn read_api_base_url(config_dir: &Path) -> Result<Url, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    let raw = app
        .get("apiBaseUrl")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_API_BASE_URL);
    Url::parse(raw)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid apiBaseUrl '{raw}': {error}")))
}

pub fn read_timezone(config_dir: &Path) -> Result<Option<String>, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    Ok(app
        .get("timezone")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned))
}

pub fn read_poll_config(config_dir: &Path) -> Result<PollConfig, InfraError> {
    let blocker = read_config(&config_dir.join(BLOCKER_JSON))?;
    let mut config = PollConfig::default();

    if let Some(value) = blocker
        .get("blocklistPollSeconds")
        .and_then(serde_json::Value::as_u64)
    {
        config.blocklist_poll_seconds = value.clamp(MIN_POLL_SECONDS, MAX_POLL_SECONDS);
    }
    if let Some(value) = blocker
        .get("sessionPollSeconds")
        .and_then(serde_json::Value::as_u64)
    {
        config.session_poll_seconds = value.clamp(MIN_POLL_SECONDS, MAX_POLL_SECONDS);
    }
    if let Some(value) = blocker
        .get("crossTabNudge")
        .and_then(serde_json::Value::as_bool)
    {
        config.cross_tab_nudge = value;
    }

    Ok(config)
}
