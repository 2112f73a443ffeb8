use std::{collections::HashMap, fmt, fs, path::Path};

use anyhow::Context;
use serde::Serialize;
use shared::domain::RelayTarget;

pub const SETTINGS_FILE: &str = "vidrelay.toml";
pub const DEFAULT_RELAY_CONFIG_TABLE: &str = "telegram_configs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    Disabled,
    /// Credentials come straight from settings.
    Static,
    /// Credentials are fetched from the backend's configuration table.
    Remote,
}

#[derive(Clone, Serialize)]
pub struct Settings {
    pub storage_url: String,
    pub storage_api_key: String,
    pub storage_bucket: String,
    pub relay_enabled: bool,
    pub relay_api_id: Option<String>,
    pub relay_api_hash: Option<String>,
    pub relay_server_url: Option<String>,
    pub relay_config_table: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_url: "http://127.0.0.1:54321".into(),
            storage_api_key: String::new(),
            storage_bucket: "videos".into(),
            relay_enabled: false,
            relay_api_id: None,
            relay_api_hash: None,
            relay_server_url: None,
            relay_config_table: DEFAULT_RELAY_CONFIG_TABLE.into(),
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("storage_url", &self.storage_url)
            .field("storage_api_key", &mask(&self.storage_api_key))
            .field("storage_bucket", &self.storage_bucket)
            .field("relay_enabled", &self.relay_enabled)
            .field("relay_api_id", &self.relay_api_id)
            .field(
                "relay_api_hash",
                &self.relay_api_hash.as_deref().map(mask),
            )
            .field("relay_server_url", &self.relay_server_url)
            .field("relay_config_table", &self.relay_config_table)
            .finish()
    }
}

impl Settings {
    pub fn relay_mode(&self) -> RelayMode {
        if !self.relay_enabled {
            RelayMode::Disabled
        } else if self.static_relay_target().is_some() {
            RelayMode::Static
        } else {
            RelayMode::Remote
        }
    }

    pub fn static_relay_target(&self) -> Option<RelayTarget> {
        Some(RelayTarget {
            api_id: self.relay_api_id.clone()?,
            api_hash: self.relay_api_hash.clone()?,
            server_url: self.relay_server_url.clone()?,
        })
    }

    /// Copy safe to print: secrets replaced by a short masked form.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.storage_api_key = mask(&copy.storage_api_key);
        copy.relay_api_hash = copy.relay_api_hash.as_deref().map(mask);
        copy
    }

    fn apply(&mut self, key: &str, value: String) {
        match key {
            "storage_url" => self.storage_url = value,
            "storage_api_key" => self.storage_api_key = value,
            "storage_bucket" => self.storage_bucket = value,
            "relay_enabled" => self.relay_enabled = parse_flag(&value),
            "relay_api_id" => self.relay_api_id = non_empty(value),
            "relay_api_hash" => self.relay_api_hash = non_empty(value),
            "relay_server_url" => self.relay_server_url = non_empty(value),
            "relay_config_table" => self.relay_config_table = value,
            _ => {}
        }
    }
}

/// Environment variables consulted for each setting, later names win.
const ENV_OVERRIDES: &[(&str, &[&str])] = &[
    ("storage_url", &["STORAGE_URL", "APP__STORAGE_URL"]),
    ("storage_api_key", &["STORAGE_API_KEY", "APP__STORAGE_API_KEY"]),
    ("storage_bucket", &["STORAGE_BUCKET", "APP__STORAGE_BUCKET"]),
    ("relay_enabled", &["RELAY_ENABLED", "APP__RELAY_ENABLED"]),
    ("relay_api_id", &["RELAY_API_ID", "APP__RELAY_API_ID"]),
    ("relay_api_hash", &["RELAY_API_HASH", "APP__RELAY_API_HASH"]),
    ("relay_server_url", &["RELAY_SERVER_URL", "APP__RELAY_SERVER_URL"]),
    ("relay_config_table", &["RELAY_CONFIG_TABLE", "APP__RELAY_CONFIG_TABLE"]),
];

pub fn load_settings(explicit_path: Option<&Path>) -> anyhow::Result<Settings> {
    load_settings_with(explicit_path, |name| std::env::var(name).ok())
}

/// Defaults, then the TOML file, then the environment. A missing default file
/// is fine; an explicitly requested file must exist and parse.
pub fn load_settings_with(
    explicit_path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match explicit_path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
            apply_file(&mut settings, &raw)
                .with_context(|| format!("failed to parse settings file '{}'", path.display()))?;
        }
        None => {
            if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
                if let Err(error) = apply_file(&mut settings, &raw) {
                    tracing::warn!(%error, file = SETTINGS_FILE, "ignoring unreadable settings file");
                }
            }
        }
    }

    for (key, names) in ENV_OVERRIDES {
        for name in *names {
            if let Some(value) = env(name) {
                settings.apply(key, value);
            }
        }
    }

    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: HashMap<String, toml::Value> = toml::from_str(raw)?;
    for (key, value) in file_cfg {
        let text = match value {
            toml::Value::String(s) => s,
            other => other.to_string(),
        };
        settings.apply(&key, text);
    }
    Ok(())
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}****")
}
