//! BlueZ Protocol
//!
//! Well-known names, interfaces and error names used when talking to the
//! BlueZ daemon, plus the payload layouts of the demo characteristics.

use crate::domain::uuid::GattUuid;

/// Bus name of the Bluetooth daemon
pub const BLUEZ_SERVICE: &str = "org.bluez";

/// Default adapter object
pub const DEFAULT_ADAPTER_PATH: &str = "/org/bluez/hci0";

pub const ADAPTER_INTERFACE: &str = "org.bluez.Adapter1";
pub const GATT_MANAGER_INTERFACE: &str = "org.bluez.GattManager1";
pub const LE_ADVERTISING_MANAGER_INTERFACE: &str = "org.bluez.LEAdvertisingManager1";

/// Error names returned to remote callers
pub mod error_names {
    pub const FAILED: &str = "org.bluez.Error.Failed";
    pub const NOT_PERMITTED: &str = "org.bluez.Error.NotPermitted";
    pub const INVALID_OFFSET: &str = "org.bluez.Error.InvalidOffset";
    pub const ALREADY_EXISTS: &str = "org.bluez.Error.AlreadyExists";
    pub const DOES_NOT_EXIST: &str = "org.bluez.Error.DoesNotExist";
    pub const NOT_READY: &str = "org.bluez.Error.NotReady";
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
    pub const UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";
    pub const UNKNOWN_PROPERTY: &str = "org.freedesktop.DBus.Error.UnknownProperty";
}

/// Message BlueZ clients expect when a write is refused
pub const WRITE_FAILED_MESSAGE: &str = "Write operation failed";

/// Outbound calls towards the manager objects on the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerCall {
    RegisterApplication,
    UnregisterApplication,
    RegisterAdvertisement,
    UnregisterAdvertisement,
}

impl ManagerCall {
    pub fn interface(&self) -> &'static str {
        match self {
            Self::RegisterApplication | Self::UnregisterApplication => GATT_MANAGER_INTERFACE,
            Self::RegisterAdvertisement | Self::UnregisterAdvertisement => {
                LE_ADVERTISING_MANAGER_INTERFACE
            }
        }
    }

    pub fn member(&self) -> &'static str {
        match self {
            Self::RegisterApplication => "RegisterApplication",
            Self::UnregisterApplication => "UnregisterApplication",
            Self::RegisterAdvertisement => "RegisterAdvertisement",
            Self::UnregisterAdvertisement => "UnregisterAdvertisement",
        }
    }
}

impl std::fmt::Display for ManagerCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.interface(), self.member())
    }
}

/// Battery Service
pub const BATTERY_SERVICE_UUID: GattUuid = GattUuid::from_short(0x180F);

/// Battery Level, one byte percentage
pub const BATTERY_LEVEL_UUID: GattUuid = GattUuid::from_short(0x2A19);

/// Demo counter service
pub const COUNTER_SERVICE_UUID: &str = "12345678-1234-1234-1234-123456789abc";

/// Demo counter value, u32 little-endian
pub const COUNTER_CHAR_UUID: &str = "12345678-1234-1234-1234-123456789abd";

/// Encode the counter characteristic value
pub fn encode_counter(value: u32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

/// Decode a counter write from its first four bytes; shorter writes are refused
pub fn decode_counter(bytes: &[u8]) -> Option<u32> {
    let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(raw))
}

/// Next simulated battery level, cycling through 1..=100
pub fn next_battery_level(level: u8) -> u8 {
    level % 100 + 1
}
