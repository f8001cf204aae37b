//! GATT Application
//!
//! Root of the exported object tree. The application owns every service
//! (and through them every characteristic) and keeps an address index so the
//! dispatch layer can resolve an inbound call to a typed borrow of the target.
//!
//! ```text
//!   /org/bluez/example                      ObjectManager + GattApplication1
//!   ├── /org/bluez/example/service0         GattService1
//!   │   ├── /org/bluez/example/characteristic0
//!   │   └── /org/bluez/example/characteristic1
//!   └── /org/bluez/example/service1
//!       └── /org/bluez/example/characteristic2
//! ```

use crate::domain::address::{Address, AddressSpace};
use crate::domain::characteristic::{Characteristic, GATT_CHARACTERISTIC_INTERFACE};
use crate::domain::error::{GattError, Result};
use crate::domain::models::{
    ExportedObject, InterfaceMap, ManagedObjects, Method, PropertyMap, Reply,
};
use crate::domain::ports::Bus;
use crate::domain::service::{Service, GATT_SERVICE_INTERFACE};
use crate::domain::uuid::GattUuid;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const OBJECT_MANAGER_INTERFACE: &str = "org.freedesktop.DBus.ObjectManager";
pub const GATT_APPLICATION_INTERFACE: &str = "org.bluez.GattApplication1";

const ROOT_INTERFACES: &[&str] = &[OBJECT_MANAGER_INTERFACE, GATT_APPLICATION_INTERFACE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Root,
    Service(usize),
    Characteristic(usize, usize),
}

pub struct Application {
    address: Address,
    services: Vec<Service>,
    index: HashMap<Address, Slot>,
    bus: Option<Arc<dyn Bus>>,
}

impl Application {
    /// Application rooted at the default path
    pub fn new() -> Self {
        Self::with_root(Address::application_root())
    }

    pub fn with_root(address: Address) -> Self {
        let mut index = HashMap::new();
        index.insert(address.clone(), Slot::Root);
        Self {
            address,
            services: Vec::new(),
            index,
            bus: None,
        }
    }

    pub fn is_exported(&self) -> bool {
        self.bus.is_some()
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn service(&self, address: &Address) -> Option<&Service> {
        match self.index.get(address)? {
            Slot::Service(i) => self.services.get(*i),
            _ => None,
        }
    }

    pub fn characteristic(&self, address: &Address) -> Option<&Characteristic> {
        match self.index.get(address)? {
            Slot::Characteristic(i, j) => self.services.get(*i)?.characteristics().get(*j),
            _ => None,
        }
    }

    pub fn characteristic_mut(&mut self, address: &Address) -> Option<&mut Characteristic> {
        match *self.index.get(address)? {
            Slot::Characteristic(i, j) => self.services.get_mut(i)?.characteristic_at_mut(j),
            _ => None,
        }
    }

    /// Service addresses in attach order, as returned by `GetServices`
    pub fn service_addresses(&self) -> Vec<Address> {
        self.services.iter().map(|s| s.address().clone()).collect()
    }

    /// New service addressed below this root (`{root}/service{n}`)
    ///
    /// It still has to be attached.
    pub fn new_service(&self, uuid: GattUuid, primary: bool) -> Result<Service> {
        Service::with_prefix(uuid, primary, &self.address.child_prefix("service"))
    }

    fn check_below_root(&self, address: &Address) -> Result<()> {
        if address.is_descendant_of(&self.address) {
            Ok(())
        } else {
            Err(GattError::OutsideRoot {
                address: address.clone(),
                root: self.address.clone(),
            })
        }
    }

    /// Attach a service together with the characteristics it already holds
    ///
    /// The service and all of its characteristics must live below the root.
    /// On failure the service is dropped and its children become free to
    /// attach elsewhere.
    pub fn attach_service(&mut self, mut service: Service) -> Result<Address> {
        let below_root = std::iter::once(service.address())
            .chain(service.characteristics().iter().map(|c| c.address()))
            .try_for_each(|address| self.check_below_root(address));
        if let Err(e) = below_root {
            service.release_children();
            return Err(e);
        }

        let space = AddressSpace::global();
        space.claim(service.address(), &self.address)?;

        if let Some(bus) = &self.bus {
            if let Err(e) = service.export(bus.clone()) {
                space.release(service.address());
                service.release_children();
                return Err(e);
            }
        }

        let i = self.services.len();
        let address = service.address().clone();
        self.index.insert(address.clone(), Slot::Service(i));
        for (j, characteristic) in service.characteristics().iter().enumerate() {
            self.index
                .insert(characteristic.address().clone(), Slot::Characteristic(i, j));
        }
        debug!("Service {} attached to application {}", address, self.address);
        self.services.push(service);
        Ok(address)
    }

    /// Attach a characteristic to a service that already belongs to this tree
    pub fn attach_characteristic(
        &mut self,
        service: &Address,
        characteristic: Characteristic,
    ) -> Result<Address> {
        let i = match self.index.get(service) {
            Some(Slot::Service(i)) => *i,
            _ => return Err(GattError::UnknownObject(service.clone())),
        };
        let address = characteristic.address().clone();
        self.check_below_root(&address)?;
        let j = self.services[i].attach(characteristic)?;
        self.index.insert(address.clone(), Slot::Characteristic(i, j));
        Ok(address)
    }

    /// Export the root, then every service and characteristic depth-first
    ///
    /// Either the whole tree becomes addressable or nothing does.
    pub fn export(&mut self, bus: Arc<dyn Bus>) -> Result<()> {
        if self.is_exported() {
            return Err(GattError::AlreadyExported(self.address.clone()));
        }
        bus.register_object(&self.address, ROOT_INTERFACES)?;

        for i in 0..self.services.len() {
            if let Err(e) = self.services[i].export(bus.clone()) {
                warn!("Application export failed, rolling back: {}", e);
                for exported in self.services[..i].iter_mut().rev() {
                    exported.unexport();
                }
                bus.unregister_object(&self.address);
                return Err(e);
            }
        }

        info!(
            "GATT application exported at {} with {} service(s)",
            self.address,
            self.services.len()
        );
        self.bus = Some(bus);
        Ok(())
    }

    /// Bottom-up teardown; no-op when not exported
    pub fn unexport(&mut self) {
        let Some(bus) = self.bus.take() else {
            return;
        };
        for service in self.services.iter_mut().rev() {
            service.unexport();
        }
        bus.unregister_object(&self.address);
        info!("GATT application unexported: {}", self.address);
    }

    /// Every descendant with its interface properties; the root is never included
    pub fn managed_objects(&self) -> ManagedObjects {
        let mut objects = ManagedObjects::new();
        for service in &self.services {
            let mut interfaces = InterfaceMap::new();
            interfaces.insert(GATT_SERVICE_INTERFACE.to_string(), service.properties());
            objects.insert(service.address().clone(), interfaces);

            for characteristic in service.characteristics() {
                let mut interfaces = InterfaceMap::new();
                interfaces.insert(
                    GATT_CHARACTERISTIC_INTERFACE.to_string(),
                    characteristic.properties(),
                );
                objects.insert(characteristic.address().clone(), interfaces);
            }
        }
        objects
    }

    /// Resolve an address to the object serving it
    pub fn object(&self, address: &Address) -> Option<&dyn ExportedObject> {
        match *self.index.get(address)? {
            Slot::Root => Some(self),
            Slot::Service(i) => Some(self.services.get(i)? as &dyn ExportedObject),
            Slot::Characteristic(i, j) => {
                Some(self.services.get(i)?.characteristics().get(j)? as &dyn ExportedObject)
            }
        }
    }

    pub fn object_mut(&mut self, address: &Address) -> Option<&mut dyn ExportedObject> {
        match *self.index.get(address)? {
            Slot::Root => Some(self),
            Slot::Service(i) => Some(self.services.get_mut(i)? as &mut dyn ExportedObject),
            Slot::Characteristic(i, j) => Some(
                self.services.get_mut(i)?.characteristic_at_mut(j)? as &mut dyn ExportedObject,
            ),
        }
    }
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportedObject for Application {
    fn address(&self) -> &Address {
        &self.address
    }

    fn interface(&self) -> &'static str {
        OBJECT_MANAGER_INTERFACE
    }

    fn extra_interfaces(&self) -> &'static [&'static str] {
        &[GATT_APPLICATION_INTERFACE]
    }

    fn properties(&self) -> PropertyMap {
        PropertyMap::new()
    }

    fn on_method_call(&mut self, _sender: &str, method: &Method) -> Result<Reply> {
        match method {
            Method::GetManagedObjects => Ok(Reply::ManagedObjects(self.managed_objects())),
            Method::GetServices => Ok(Reply::Paths(self.service_addresses())),
            other => Err(GattError::UnknownMethod {
                interface: OBJECT_MANAGER_INTERFACE.to_string(),
                method: other.member().to_string(),
            }),
        }
    }
}
