//! GATT Service
//!
//! Groups characteristics under one UUID. A service owns its characteristics
//! by value and exports them together with itself.

use crate::domain::address::{Address, AddressSpace, SERVICE_PATH_PREFIX};
use crate::domain::characteristic::{CapabilityFlag, Characteristic};
use crate::domain::error::{GattError, Result};
use crate::domain::models::{ExportedObject, Method, PropertyMap, PropertyValue, Reply};
use crate::domain::ports::Bus;
use crate::domain::uuid::GattUuid;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const GATT_SERVICE_INTERFACE: &str = "org.bluez.GattService1";

#[derive(Clone)]
pub struct Service {
    address: Address,
    uuid: GattUuid,
    primary: bool,
    characteristics: Vec<Characteristic>,
    bus: Option<Arc<dyn Bus>>,
}

impl Service {
    /// Service under the default application root
    pub fn new(uuid: GattUuid, primary: bool) -> Self {
        Self::at(AddressSpace::global().allocate(SERVICE_PATH_PREFIX), uuid, primary)
    }

    /// Service whose address is allocated from `prefix`
    pub fn with_prefix(uuid: GattUuid, primary: bool, prefix: &str) -> Result<Self> {
        Address::parse(&format!("{}0", prefix))?;
        Ok(Self::at(AddressSpace::global().allocate(prefix), uuid, primary))
    }

    fn at(address: Address, uuid: GattUuid, primary: bool) -> Self {
        Self {
            address,
            uuid,
            primary,
            characteristics: Vec::new(),
            bus: None,
        }
    }

    /// New characteristic addressed below this service (`{service}/char{n}`)
    ///
    /// It still has to be attached.
    pub fn new_characteristic(
        &self,
        uuid: GattUuid,
        flags: &[CapabilityFlag],
    ) -> Result<Characteristic> {
        Characteristic::with_prefix(uuid, flags, &self.address.child_prefix("char"))
    }

    pub fn uuid(&self) -> GattUuid {
        self.uuid
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn is_exported(&self) -> bool {
        self.bus.is_some()
    }

    pub fn characteristics(&self) -> &[Characteristic] {
        &self.characteristics
    }

    pub fn characteristic(&self, address: &Address) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.address() == address)
    }

    pub(crate) fn characteristic_at_mut(&mut self, index: usize) -> Option<&mut Characteristic> {
        self.characteristics.get_mut(index)
    }

    /// Give up the attach claims this service holds on its children
    pub(crate) fn release_children(&self) {
        let space = AddressSpace::global();
        for characteristic in &self.characteristics {
            space.release_from(characteristic.address(), &self.address);
        }
    }

    /// Characteristic addresses in attach order
    pub fn child_addresses(&self) -> Vec<Address> {
        self.characteristics
            .iter()
            .map(|c| c.address().clone())
            .collect()
    }

    /// Attach a characteristic, exporting it right away if this service is live
    ///
    /// Returns the index of the new child.
    pub fn attach(&mut self, mut characteristic: Characteristic) -> Result<usize> {
        let space = AddressSpace::global();
        space.claim(characteristic.address(), &self.address)?;

        if let Some(bus) = &self.bus {
            if let Err(e) = characteristic.export(bus.as_ref()) {
                space.release(characteristic.address());
                return Err(e);
            }
        }

        characteristic.set_service(self.address.clone());
        debug!(
            "Characteristic {} attached to service {}",
            characteristic.address(),
            self.address
        );
        self.characteristics.push(characteristic);
        Ok(self.characteristics.len() - 1)
    }

    /// Register this service and then every characteristic
    ///
    /// On failure everything registered so far is removed again.
    pub(crate) fn export(&mut self, bus: Arc<dyn Bus>) -> Result<()> {
        if self.is_exported() {
            return Err(GattError::AlreadyExported(self.address.clone()));
        }
        bus.register_object(&self.address, &[GATT_SERVICE_INTERFACE])?;

        for i in 0..self.characteristics.len() {
            if let Err(e) = self.characteristics[i].export(bus.as_ref()) {
                warn!(
                    "Exporting {} failed, rolling back service {}: {}",
                    self.characteristics[i].address(),
                    self.address,
                    e
                );
                for exported in self.characteristics[..i].iter_mut().rev() {
                    exported.unexport(bus.as_ref());
                }
                bus.unregister_object(&self.address);
                return Err(e);
            }
        }

        info!(
            "GATT service exported at {} ({}, {} characteristic(s))",
            self.address,
            self.uuid,
            self.characteristics.len()
        );
        self.bus = Some(bus);
        Ok(())
    }

    /// Children first, then the service itself
    pub(crate) fn unexport(&mut self) {
        let Some(bus) = self.bus.take() else {
            return;
        };
        for characteristic in self.characteristics.iter_mut().rev() {
            characteristic.unexport(bus.as_ref());
        }
        bus.unregister_object(&self.address);
        debug!("GATT service unexported: {}", self.address);
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("address", &self.address)
            .field("uuid", &self.uuid)
            .field("primary", &self.primary)
            .field("characteristics", &self.characteristics)
            .field("exported", &self.is_exported())
            .finish()
    }
}

impl ExportedObject for Service {
    fn address(&self) -> &Address {
        &self.address
    }

    fn interface(&self) -> &'static str {
        GATT_SERVICE_INTERFACE
    }

    fn properties(&self) -> PropertyMap {
        let mut props = PropertyMap::new();
        props.insert("UUID".into(), PropertyValue::Str(self.uuid.to_string()));
        props.insert("Primary".into(), PropertyValue::Bool(self.primary));
        props.insert(
            "Characteristics".into(),
            PropertyValue::Paths(self.child_addresses()),
        );
        props
    }

    fn on_method_call(&mut self, _sender: &str, method: &Method) -> Result<Reply> {
        // GattService1 has no methods
        Err(GattError::UnknownMethod {
            interface: GATT_SERVICE_INTERFACE.to_string(),
            method: method.member().to_string(),
        })
    }
}
