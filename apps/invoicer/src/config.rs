use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context};
use client_core::HttpRemoteConfig;
use url::Url;

pub const CONFIG_FILE: &str = "invoicer.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub service_url: String,
    pub api_key: String,
    pub session_path: Option<PathBuf>,
    pub completion_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_url: "http://127.0.0.1:54321".into(),
            api_key: String::new(),
            session_path: None,
            completion_delay_ms: 1200,
            request_timeout_secs: 15,
        }
    }
}

impl Settings {
    pub fn remote_config(&self) -> anyhow::Result<HttpRemoteConfig> {
        Ok(HttpRemoteConfig {
            service_url: parse_service_url(&self.service_url)?,
            api_key: self.api_key.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }

    pub fn completion_delay(&self) -> Duration {
        Duration::from_millis(self.completion_delay_ms)
    }

    /// Explicit path, otherwise `<config dir>/invoicer/session.json`.
    pub fn session_file(&self) -> Option<PathBuf> {
        self.session_path.clone().or_else(|| {
            dirs::config_dir().map(|dir| dir.join("invoicer").join("session.json"))
        })
    }
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new(CONFIG_FILE), |name| std::env::var(name).ok())
}

/// Defaults, then the flat `key = "value"` file, then the environment.
pub fn load_settings_from(
    config_file: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(config_file) {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("service_url") {
                settings.service_url = v.clone();
            }
            if let Some(v) = file_cfg.get("api_key") {
                settings.api_key = v.clone();
            }
            if let Some(v) = file_cfg.get("session_path") {
                settings.session_path = Some(PathBuf::from(v));
            }
        }
    }

    if let Some(v) = env("INVOICER_SERVICE_URL") {
        settings.service_url = v;
    }
    if let Some(v) = env("APP__SERVICE_URL") {
        settings.service_url = v;
    }

    if let Some(v) = env("INVOICER_API_KEY") {
        settings.api_key = v;
    }
    if let Some(v) = env("APP__API_KEY") {
        settings.api_key = v;
    }

    if let Some(v) = env("APP__SESSION_PATH") {
        settings.session_path = Some(PathBuf::from(v));
    }

    if let Some(v) = env("APP__COMPLETION_DELAY_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.completion_delay_ms = parsed;
        }
    }
    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_secs = parsed;
        }
    }

    settings
}

pub fn parse_service_url(raw: &str) -> anyhow::Result<Url> {
    let raw = raw.trim();
    let url = Url::parse(raw).with_context(|| format!("invalid service url '{raw}'"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("service url '{raw}' must use http or https");
    }
    Ok(url)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
