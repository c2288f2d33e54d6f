//! Application settings management

use crate::PathManager;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Environment variable consulted when no token is stored in settings.toml
pub const API_TOKEN_ENV: &str = "TUTORDESK_API_TOKEN";

/// Application settings stored in settings.toml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the console REST backend, e.g. "https://console.example.com/api/"
    pub api_base_url: String,
    /// Bearer token attached to every request
    pub api_token: Option<String>,
    /// Messages fetched per page (initial load and older pages)
    pub page_size: usize,
    /// Extra messages requested by the forward poll beyond the known count
    pub poll_margin: usize,
    /// Interval of the per-conversation message poll
    pub message_poll_ms: u64,
    /// Interval of the conversation list poll
    pub conversation_poll_ms: u64,
    /// Distance from the bottom edge that still counts as "live-following"
    pub bottom_threshold_px: f64,
    /// Distance from the top edge that triggers loading older messages
    pub top_threshold_px: f64,
    /// Frames over which scroll-to-bottom is re-applied after layout changes
    pub bottom_retry_frames: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api/".to_string(),
            api_token: None,
            page_size: 30,
            poll_margin: 10,
            message_poll_ms: 4_000,
            conversation_poll_ms: 15_000,
            bottom_threshold_px: 80.0,
            top_threshold_px: 120.0,
            bottom_retry_frames: 3,
        }
    }
}

impl Settings {
    /// Load settings from the settings file, or return defaults if not found
    pub fn load() -> Self {
        let Some(path) = PathManager::settings_path() else {
            return Self::default();
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };

        match toml::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Ignoring malformed {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save settings to the settings file
    pub fn save(&self) -> Result<(), String> {
        let path = PathManager::settings_path().ok_or("Could not determine settings path")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config dir: {}", e))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;
        fs::write(path, content).map_err(|e| format!("Failed to write settings: {}", e))?;
        Ok(())
    }

    /// Token from settings, falling back to the environment.
    pub fn resolved_api_token(&self) -> Option<String> {
        self.api_token
            .clone()
            .or_else(|| std::env::var(API_TOKEN_ENV).ok())
            .filter(|t| !t.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("nope.toml"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "page_size = 10\napi_base_url = \"https://x.test/\"\n").unwrap();

        let settings = Settings::load_from(&path);
        assert_eq!(settings.page_size, 10);
        assert_eq!(settings.api_base_url, "https://x.test/");
        assert_eq!(settings.poll_margin, Settings::default().poll_margin);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let settings = Settings {
            message_poll_ms: 1234,
            ..Settings::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path), settings);
    }
}
