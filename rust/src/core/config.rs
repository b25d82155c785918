use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "convo_config.json";
const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:3000/api";
const DEFAULT_PAGE_SIZE: u32 = 50;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: Option<String>,
    // Static bearer token; issuing and refreshing it is the platform's job.
    pub api_token: Option<String>,
    pub page_size: Option<u32>,
    pub request_timeout_secs: Option<u64>,
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AppConfig {
    pub fn api_base_url(&self) -> String {
        env_non_empty("CONVO_API_BASE_URL")
            .or_else(|| {
                self.api_base_url
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
    }

    pub fn api_token(&self) -> Option<String> {
        env_non_empty("CONVO_API_TOKEN").or_else(|| self.api_token.clone())
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }
}

pub fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE);
    let Ok(bytes) = std::fs::read(&path) else {
        return AppConfig::default();
    };
    match serde_json::from_slice::<AppConfig>(&bytes) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(%e, path = %path.display(), "ignoring malformed config");
            AppConfig::default()
        }
    }
}

pub fn default_app_config_json() -> String {
    let config = AppConfig {
        api_base_url: Some(DEFAULT_API_BASE_URL.to_string()),
        api_token: None,
        page_size: Some(DEFAULT_PAGE_SIZE),
        request_timeout_secs: Some(DEFAULT_REQUEST_TIMEOUT_SECS),
    };
    serde_json::to_string_pretty(&config).unwrap_or_else(|_| "{}".to_string())
}
