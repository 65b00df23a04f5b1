/// User settings (synced storage) and engine tunables
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::SpaceColor;

/// Settings written by the options page, read-only for the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub default_space_name: String,
    pub auto_archive_enabled: bool,
    pub auto_archive_idle_minutes: u32,
    /// Temporary tabs are displayed most-recent-on-top when set.
    pub invert_tab_order: bool,
    pub color_overrides: HashMap<SpaceColor, String>,
    pub show_all_open_tabs_in_collapsed_folders: bool,
    pub debug_logging: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            default_space_name: "Home".to_string(),
            auto_archive_enabled: false,
            auto_archive_idle_minutes: 360,
            invert_tab_order: true,
            color_overrides: HashMap::new(),
            show_all_open_tabs_in_collapsed_folders: false,
            debug_logging: false,
        }
    }
}

impl Settings {
    /// Parse the synced storage area, tolerating missing or malformed keys.
    pub fn from_storage(value: Option<serde_json::Value>) -> Settings {
        match value {
            Some(value) if value.is_object() => serde_json::from_value(value).unwrap_or_else(|e| {
                log::warn!("Ignoring malformed settings: {}", e);
                Settings::default()
            }),
            _ => Settings::default(),
        }
    }

    pub fn log_level(&self) -> log::LevelFilter {
        if self.debug_logging {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        }
    }

    /// Raise or lower the global log level to match the debug flag.
    pub fn apply_log_level(&self) {
        log::set_max_level(self.log_level());
    }

    pub fn idle_threshold_ms(&self) -> f64 {
        f64::from(self.auto_archive_idle_minutes) * 60_000.0
    }
}

/// Timing and naming knobs for the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Safety-net lifetime of a self-sync mark if the echo never arrives.
    pub self_sync_ttl_ms: f64,
    /// Quiescence window before a host move event is acted on.
    pub move_debounce_ms: u32,
    pub retry_base_ms: u32,
    pub retry_max_ms: u32,
    pub retry_max_attempts: u32,
    /// Cross-context request/response timeout.
    pub message_timeout_ms: u32,
    pub container_folder_title: String,
    pub favorites_folder_title: String,
    /// Bookmark id under which the container folder lives ("Other bookmarks").
    pub container_parent_id: String,
    pub archive_cap: usize,
    pub alarm_name: String,
    pub alarm_period_minutes: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            self_sync_ttl_ms: 500.0,
            move_debounce_ms: 150,
            retry_base_ms: 100,
            retry_max_ms: 2_000,
            retry_max_attempts: 5,
            message_timeout_ms: 300,
            container_folder_title: "Spaces".to_string(),
            favorites_folder_title: "_Favorites".to_string(),
            container_parent_id: "2".to_string(),
            archive_cap: 100,
            alarm_name: "auto-archive".to_string(),
            alarm_period_minutes: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_when_storage_empty() {
        let settings = Settings::from_storage(None);
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.default_space_name, "Home");
        assert!(settings.invert_tab_order);
    }

    #[test]
    fn test_partial_settings_fill_defaults() {
        let settings = Settings::from_storage(Some(json!({
            "autoArchiveEnabled": true,
            "autoArchiveIdleMinutes": 30,
            "colorOverrides": {"blue": "#0000ff"}
        })));

        assert!(settings.auto_archive_enabled);
        assert_eq!(settings.idle_threshold_ms(), 1_800_000.0);
        assert_eq!(settings.color_overrides.get(&SpaceColor::Blue), Some(&"#0000ff".to_string()));
        assert_eq!(settings.default_space_name, "Home");
    }

    #[test]
    fn test_malformed_settings_fall_back() {
        let settings = Settings::from_storage(Some(json!({"autoArchiveIdleMinutes": "soon"})));
        assert_eq!(settings, Settings::default());

        let settings = Settings::from_storage(Some(json!([1, 2])));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_log_level() {
        let mut settings = Settings::default();
        assert_eq!(settings.log_level(), log::LevelFilter::Info);
        settings.debug_logging = true;
        assert_eq!(settings.log_level(), log::LevelFilter::Debug);
    }
}
