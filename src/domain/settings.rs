use crate::infrastructure::bluetooth::protocol::{GattProfile, DEFAULT_NOTIFY_INTERVAL_MS};
use crate::infrastructure::storage;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            console_logging_enabled: default_true(),
            file_logging_enabled: default_false(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "swimu_node".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_device_name")]
    pub device_name: String,

    #[serde(default)]
    pub log_settings: LogSettings,

    // GATT profile
    #[serde(default)]
    pub gatt: GattProfile,

    // Storage layout
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,
    #[serde(default = "default_listing_depth")]
    pub listing_depth: usize,

    // Timing
    #[serde(default = "default_pairing_timeout_secs")]
    pub pairing_timeout_secs: u64,
    #[serde(default = "default_notify_interval_ms")]
    pub notify_interval_ms: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Settings {
    /// Storage path of the pending-transfer manifest
    pub fn manifest_path(&self) -> String {
        storage::join(&self.data_dir, &self.manifest_file)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            log_settings: LogSettings::default(),
            gatt: GattProfile::default(),
            storage_root: default_storage_root(),
            data_dir: default_data_dir(),
            manifest_file: default_manifest_file(),
            listing_depth: default_listing_depth(),
            pairing_timeout_secs: default_pairing_timeout_secs(),
            notify_interval_ms: default_notify_interval_ms(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

fn default_device_name() -> String {
    "SwIMU".to_string()
}
fn default_storage_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("SwIMU").join("sd"))
        .unwrap_or_else(|| PathBuf::from("sd"))
}
fn default_data_dir() -> String {
    "accelDir".to_string()
}
fn default_manifest_file() -> String {
    "whiteList.txt".to_string()
}
fn default_listing_depth() -> usize {
    3
}
fn default_pairing_timeout_secs() -> u64 {
    30
}
fn default_notify_interval_ms() -> u64 {
    DEFAULT_NOTIFY_INTERVAL_MS
}
fn default_tick_interval_ms() -> u64 {
    10
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the per-user config directory, falling back to defaults
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load_from(settings_path))
    }

    /// Load from an explicit path, falling back to defaults when the file is
    /// missing or malformed
    pub fn load_from(settings_path: impl Into<PathBuf>) -> Self {
        let settings_path = settings_path.into();
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("SwIMU");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let service = SettingsService::load_from(dir.path().join("settings.json"));
        assert_eq!(service.get().device_name, "SwIMU");
        assert_eq!(service.get().manifest_path(), "accelDir/whiteList.txt");
        assert_eq!(service.get().gatt, GattProfile::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "data_dir": "runs", "notify_interval_ms": 5 }"#).unwrap();

        let service = SettingsService::load_from(&path);
        assert_eq!(service.get().data_dir, "runs");
        assert_eq!(service.get().notify_interval_ms, 5);
        assert_eq!(service.get().pairing_timeout_secs, 30);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut service = SettingsService::load_from(&path);
        service.get_mut().device_name = "SwIMU-2".to_string();
        service.save().unwrap();

        let reloaded = SettingsService::load_from(&path);
        assert_eq!(reloaded.get().device_name, "SwIMU-2");
    }
}
