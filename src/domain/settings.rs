use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
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
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
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
    "gatt_peripheral".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Where the object tree lives and how long the manager gets to answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeripheralSettings {
    #[serde(default = "default_root_path")]
    pub root_path: String,
    #[serde(default = "default_adapter_path")]
    pub adapter_path: String,
    #[serde(default = "default_registration_timeout_ms")]
    pub registration_timeout_ms: u64,
}

impl Default for PeripheralSettings {
    fn default() -> Self {
        Self {
            root_path: default_root_path(),
            adapter_path: default_adapter_path(),
            registration_timeout_ms: default_registration_timeout_ms(),
        }
    }
}

fn default_root_path() -> String {
    crate::domain::address::APPLICATION_PATH.to_string()
}
fn default_adapter_path() -> String {
    "/org/bluez/hci0".to_string()
}
fn default_registration_timeout_ms() -> u64 {
    // D-Bus default method call timeout
    25_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvertisementSettings {
    #[serde(default = "default_local_name")]
    pub local_name: String,
    #[serde(default)]
    pub appearance: Option<u16>,
    #[serde(default = "default_true")]
    pub discoverable: bool,
    #[serde(default = "default_true")]
    pub connectable: bool,
    #[serde(default = "default_false")]
    pub include_tx_power: bool,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u32,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u32,
    #[serde(default = "default_manufacturer_id")]
    pub manufacturer_id: u16,
    #[serde(default = "default_manufacturer_data")]
    pub manufacturer_data: Vec<u8>,
}

impl Default for AdvertisementSettings {
    fn default() -> Self {
        Self {
            local_name: default_local_name(),
            appearance: None,
            discoverable: default_true(),
            connectable: default_true(),
            include_tx_power: default_false(),
            min_interval_ms: default_min_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            manufacturer_id: default_manufacturer_id(),
            manufacturer_data: default_manufacturer_data(),
        }
    }
}

fn default_local_name() -> String {
    "BLE GATT Server Demo".to_string()
}
fn default_min_interval_ms() -> u32 {
    crate::domain::advertisement::DEFAULT_MIN_INTERVAL_MS
}
fn default_max_interval_ms() -> u32 {
    crate::domain::advertisement::DEFAULT_MAX_INTERVAL_MS
}
fn default_manufacturer_id() -> u16 {
    0x05F1
}
fn default_manufacturer_data() -> Vec<u8> {
    vec![0x01, 0x02, 0x03, 0x04]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    #[serde(default)]
    pub peripheral: PeripheralSettings,

    #[serde(default)]
    pub advertisement: AdvertisementSettings,

    // Demo Settings
    #[serde(default = "default_battery_interval_secs")]
    pub battery_update_interval_secs: u64,
    #[serde(default = "default_counter_interval_secs")]
    pub counter_update_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            peripheral: PeripheralSettings::default(),
            advertisement: AdvertisementSettings::default(),
            battery_update_interval_secs: default_battery_interval_secs(),
            counter_update_interval_secs: default_counter_interval_secs(),
        }
    }
}

fn default_battery_interval_secs() -> u64 {
    10
}
fn default_counter_interval_secs() -> u64 {
    5
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load_from(settings_path))
    }

    /// Load from an explicit path, falling back to defaults if it is missing or invalid
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
        path.push("GattPeripheral");
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
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
