//! LE Advertisement
//!
//! Broadcast payload handed to the advertising manager. It has no children;
//! export and unexport work like the application root. The manager may call
//! `Release` at any time, after which the advertisement stays down until the
//! caller exports and registers it again.

use crate::domain::address::{Address, AddressSpace, ADVERTISEMENT_PATH_PREFIX};
use crate::domain::error::{GattError, Result};
use crate::domain::models::{ExportedObject, Method, PropertyMap, PropertyValue, Reply};
use crate::domain::ports::Bus;
use crate::domain::uuid::GattUuid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub const LE_ADVERTISEMENT_INTERFACE: &str = "org.bluez.LEAdvertisement1";

/// Advertising interval defaults, in milliseconds
pub const DEFAULT_MIN_INTERVAL_MS: u32 = 100;
pub const DEFAULT_MAX_INTERVAL_MS: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvertisementType {
    #[default]
    Peripheral,
    Broadcast,
}

impl AdvertisementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Peripheral => "peripheral",
            Self::Broadcast => "broadcast",
        }
    }
}

pub struct Advertisement {
    address: Address,
    kind: AdvertisementType,
    local_name: Option<String>,
    service_uuids: Vec<GattUuid>,
    solicit_uuids: Vec<GattUuid>,
    manufacturer_data: BTreeMap<u16, Vec<u8>>,
    service_data: BTreeMap<GattUuid, Vec<u8>>,
    discoverable: bool,
    connectable: bool,
    include_tx_power: bool,
    appearance: Option<u16>,
    duration: Option<u16>,
    timeout: Option<u16>,
    min_interval_ms: u32,
    max_interval_ms: u32,
    bus: Option<Arc<dyn Bus>>,
    released: bool,
}

impl Advertisement {
    pub fn new(kind: AdvertisementType) -> Self {
        Self {
            address: AddressSpace::global().allocate(ADVERTISEMENT_PATH_PREFIX),
            kind,
            local_name: None,
            service_uuids: Vec::new(),
            solicit_uuids: Vec::new(),
            manufacturer_data: BTreeMap::new(),
            service_data: BTreeMap::new(),
            discoverable: true,
            connectable: true,
            include_tx_power: false,
            appearance: None,
            duration: None,
            timeout: None,
            min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
            max_interval_ms: DEFAULT_MAX_INTERVAL_MS,
            bus: None,
            released: false,
        }
    }

    pub fn set_local_name(&mut self, name: impl Into<String>) {
        self.local_name = Some(name.into());
    }

    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    pub fn set_service_uuids(&mut self, uuids: Vec<GattUuid>) {
        self.service_uuids = uuids;
    }

    pub fn add_service_uuid(&mut self, uuid: GattUuid) {
        if !self.service_uuids.contains(&uuid) {
            self.service_uuids.push(uuid);
        }
    }

    pub fn service_uuids(&self) -> &[GattUuid] {
        &self.service_uuids
    }

    pub fn set_solicit_uuids(&mut self, uuids: Vec<GattUuid>) {
        self.solicit_uuids = uuids;
    }

    /// Replace the payload for one company id
    pub fn set_manufacturer_data(&mut self, company_id: u16, data: Vec<u8>) {
        self.manufacturer_data.insert(company_id, data);
    }

    pub fn manufacturer_data(&self) -> &BTreeMap<u16, Vec<u8>> {
        &self.manufacturer_data
    }

    pub fn set_service_data(&mut self, uuid: GattUuid, data: Vec<u8>) {
        self.service_data.insert(uuid, data);
    }

    pub fn set_transport(&mut self, discoverable: bool, connectable: bool) {
        self.discoverable = discoverable;
        self.connectable = connectable;
    }

    pub fn is_connectable(&self) -> bool {
        self.connectable
    }

    pub fn set_include_tx_power(&mut self, include: bool) {
        self.include_tx_power = include;
    }

    pub fn set_appearance(&mut self, appearance: u16) {
        self.appearance = Some(appearance);
    }

    /// Seconds each advertising round lasts
    pub fn set_duration(&mut self, seconds: u16) {
        self.duration = Some(seconds);
    }

    /// Seconds until the advertisement is dropped by the manager
    pub fn set_timeout(&mut self, seconds: u16) {
        self.timeout = Some(seconds);
    }

    /// Swapped bounds are reordered
    pub fn set_interval(&mut self, min_ms: u32, max_ms: u32) {
        self.min_interval_ms = min_ms.min(max_ms);
        self.max_interval_ms = min_ms.max(max_ms);
    }

    pub fn interval(&self) -> (u32, u32) {
        (self.min_interval_ms, self.max_interval_ms)
    }

    pub fn is_exported(&self) -> bool {
        self.bus.is_some()
    }

    /// True once the manager has released this advertisement
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Effective advertising type; a non-connectable peripheral is advertised as broadcast
    pub fn kind(&self) -> AdvertisementType {
        if self.connectable {
            self.kind
        } else {
            AdvertisementType::Broadcast
        }
    }

    pub fn export(&mut self, bus: Arc<dyn Bus>) -> Result<()> {
        if self.is_exported() {
            return Err(GattError::AlreadyExported(self.address.clone()));
        }
        bus.register_object(&self.address, &[LE_ADVERTISEMENT_INTERFACE])?;
        self.bus = Some(bus);
        self.released = false;
        info!(
            "Advertisement exported at {} ({})",
            self.address,
            self.kind().as_str()
        );
        Ok(())
    }

    pub fn unexport(&mut self) {
        let Some(bus) = self.bus.take() else {
            return;
        };
        bus.unregister_object(&self.address);
        debug!("Advertisement unexported: {}", self.address);
    }

    /// Manager-initiated teardown; repeated calls are harmless
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        info!("Advertisement {} released by manager", self.address);
        self.unexport();
        self.released = true;
    }
}

impl ExportedObject for Advertisement {
    fn address(&self) -> &Address {
        &self.address
    }

    fn interface(&self) -> &'static str {
        LE_ADVERTISEMENT_INTERFACE
    }

    fn properties(&self) -> PropertyMap {
        let uuid_strings =
            |uuids: &[GattUuid]| uuids.iter().map(ToString::to_string).collect::<Vec<_>>();

        let mut props = PropertyMap::new();
        props.insert("Type".into(), PropertyValue::Str(self.kind().as_str().into()));
        if !self.service_uuids.is_empty() {
            props.insert(
                "ServiceUUIDs".into(),
                PropertyValue::Strings(uuid_strings(&self.service_uuids)),
            );
        }
        if !self.solicit_uuids.is_empty() {
            props.insert(
                "SolicitUUIDs".into(),
                PropertyValue::Strings(uuid_strings(&self.solicit_uuids)),
            );
        }
        if !self.manufacturer_data.is_empty() {
            props.insert(
                "ManufacturerData".into(),
                PropertyValue::BytesByU16(self.manufacturer_data.clone()),
            );
        }
        if !self.service_data.is_empty() {
            props.insert(
                "ServiceData".into(),
                PropertyValue::BytesByStr(
                    self.service_data
                        .iter()
                        .map(|(uuid, data)| (uuid.to_string(), data.clone()))
                        .collect(),
                ),
            );
        }
        if let Some(name) = &self.local_name {
            props.insert("LocalName".into(), PropertyValue::Str(name.clone()));
        }
        props.insert(
            "IncludeTxPower".into(),
            PropertyValue::Bool(self.include_tx_power),
        );
        props.insert("Discoverable".into(), PropertyValue::Bool(self.discoverable));
        if let Some(appearance) = self.appearance {
            props.insert("Appearance".into(), PropertyValue::U16(appearance));
        }
        if let Some(duration) = self.duration {
            props.insert("Duration".into(), PropertyValue::U16(duration));
        }
        if let Some(timeout) = self.timeout {
            props.insert("Timeout".into(), PropertyValue::U16(timeout));
        }
        props.insert("MinInterval".into(), PropertyValue::U32(self.min_interval_ms));
        props.insert("MaxInterval".into(), PropertyValue::U32(self.max_interval_ms));
        props
    }

    fn on_method_call(&mut self, _sender: &str, method: &Method) -> Result<Reply> {
        match method {
            Method::Release => {
                self.release();
                Ok(Reply::Empty)
            }
            other => Err(GattError::UnknownMethod {
                interface: LE_ADVERTISEMENT_INTERFACE.to_string(),
                method: other.member().to_string(),
            }),
        }
    }
}
