//! Bluetooth UUIDs
//!
//! GATT attributes accept the short SIG-assigned forms (`180F`, `00002A19`)
//! as well as full 128-bit UUIDs. Everything is normalised to the lowercase
//! hyphenated 128-bit form before it goes on the wire.

use crate::domain::error::{GattError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Bluetooth Base UUID: 00000000-0000-1000-8000-00805F9B34FB
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GattUuid(Uuid);

impl GattUuid {
    /// Expand a 16- or 32-bit SIG alias onto the base UUID
    pub const fn from_short(short: u32) -> Self {
        Self(Uuid::from_u128(BASE_UUID | ((short as u128) << 96)))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Short alias if this UUID sits on the Bluetooth base
    pub fn short(&self) -> Option<u32> {
        let value = self.0.as_u128();
        if value & ((1u128 << 96) - 1) == BASE_UUID {
            Some((value >> 96) as u32)
        } else {
            None
        }
    }
}

impl FromStr for GattUuid {
    type Err = GattError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        match hex.len() {
            // from_str_radix alone would let a sign through
            4 | 8 if !hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
                Err(GattError::InvalidUuid(s.to_string()))
            }
            4 | 8 => u32::from_str_radix(hex, 16)
                .map(Self::from_short)
                .map_err(|_| GattError::InvalidUuid(s.to_string())),
            _ => Uuid::parse_str(hex)
                .map(Self)
                .map_err(|_| GattError::InvalidUuid(s.to_string())),
        }
    }
}

impl TryFrom<String> for GattUuid {
    type Error = GattError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl TryFrom<&str> for GattUuid {
    type Error = GattError;

    fn try_from(value: &str) -> Result<Self> {
        value.parse()
    }
}

impl From<GattUuid> for String {
    fn from(uuid: GattUuid) -> Self {
        uuid.to_string()
    }
}

impl From<Uuid> for GattUuid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for GattUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}
