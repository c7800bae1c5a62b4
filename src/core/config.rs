//! Client configuration: backend base URL and send defaults, persisted as
//! TOML under the platform config directory with an environment override.

use std::env;
use std::error::Error;
use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::utils::url::normalize_base_url;

pub const DEFAULT_BASE_URL: &str = "https://api.sidekik.app";
const BASE_URL_ENV: &str = "SIDEKIK_BASE_URL";

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Config {
    pub base_url: Option<String>,
    /// Attach the saved persona configuration to newly created conversations.
    pub use_configuration: Option<bool>,
    /// Default for the think-model toggle on sends.
    pub think_model: Option<bool>,
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("app", "sidekik", "sidekik")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn load() -> Result<Self, Box<dyn Error>> {
        let Some(path) = Self::config_path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path)
            .map_err(|err| format!("failed to read config at {}: {err}", path.display()))?;
        let config = toml::from_str(&contents)
            .map_err(|err| format!("failed to parse config at {}: {err}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), Box<dyn Error>> {
        let Some(path) = Self::config_path() else {
            return Err("no config directory available on this platform".into());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Resolve the backend base URL: explicit override, then the
    /// `SIDEKIK_BASE_URL` environment variable, then the config file, then
    /// the built-in default.
    pub fn resolve_base_url(&self, override_url: Option<&str>) -> String {
        let url = override_url
            .map(str::to_string)
            .or_else(|| env::var(BASE_URL_ENV).ok().filter(|v| !v.trim().is_empty()))
            .or_else(|| self.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        normalize_base_url(&url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test so the env-var mutations cannot race a parallel test run.
    #[test]
    fn base_url_resolution_prefers_override_then_env_then_file_then_default() {
        let config = Config {
            base_url: Some("https://file.example.com/".to_string()),
            ..Config::default()
        };

        env::remove_var(BASE_URL_ENV);
        assert_eq!(Config::default().resolve_base_url(None), DEFAULT_BASE_URL);

        // No override, no env: the config file wins, normalized.
        assert_eq!(config.resolve_base_url(None), "https://file.example.com");

        // The environment outranks the file.
        env::set_var(BASE_URL_ENV, "https://env.example.com");
        assert_eq!(config.resolve_base_url(None), "https://env.example.com");

        // An explicit override outranks both.
        assert_eq!(
            config.resolve_base_url(Some("https://flag.example.com/")),
            "https://flag.example.com"
        );
        env::remove_var(BASE_URL_ENV);
    }
}
