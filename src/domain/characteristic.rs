//! GATT Characteristic
//!
//! Leaf object of the tree. Holds the current value, the capability flags,
//! the set of subscribed peers and the user callbacks that back
//! `ReadValue`, `WriteValue` and `StartNotify` / `StopNotify`.
//!
//! A characteristic is notifying exactly while its subscriber set is
//! non-empty; the flag is derived from the set rather than stored.

use crate::domain::address::{Address, AddressSpace, CHARACTERISTIC_PATH_PREFIX};
use crate::domain::error::{GattError, Operation, Result};
use crate::domain::models::{AccessOptions, ExportedObject, Method, PropertyMap, PropertyValue, Reply};
use crate::domain::ports::{Bus, Notifier};
use crate::domain::uuid::GattUuid;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

pub const GATT_CHARACTERISTIC_INTERFACE: &str = "org.bluez.GattCharacteristic1";

/// Characteristic property flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CapabilityFlag {
    Read,
    Write,
    WriteWithoutResponse,
    SignedWrite,
    ReliableWrite,
    Notify,
    Indicate,
}

impl CapabilityFlag {
    /// Flag name as BlueZ expects it in the `Flags` property
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::WriteWithoutResponse => "write-without-response",
            Self::SignedWrite => "authenticated-signed-writes",
            Self::ReliableWrite => "reliable-write",
            Self::Notify => "notify",
            Self::Indicate => "indicate",
        }
    }

    fn allows(&self, operation: Operation) -> bool {
        match operation {
            Operation::Read => matches!(self, Self::Read),
            Operation::Write => matches!(
                self,
                Self::Write | Self::WriteWithoutResponse | Self::SignedWrite | Self::ReliableWrite
            ),
            Operation::Notify => matches!(self, Self::Notify | Self::Indicate),
        }
    }
}

/// Refreshes the value before a read; receives the peer identity
pub type ReadCallback = Arc<dyn Fn(&str) -> Vec<u8> + Send + Sync>;
/// Vetoes or accepts a write; receives the peer identity and the new value
pub type WriteCallback = Arc<dyn Fn(&str, &[u8]) -> bool + Send + Sync>;
/// Told when the first peer subscribes (`true`) and the last one leaves (`false`)
pub type SubscriptionCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// A single GATT characteristic
///
/// Cloning keeps the address. Only one copy of an address can ever be
/// attached to a service.
#[derive(Clone)]
pub struct Characteristic {
    address: Address,
    uuid: GattUuid,
    flags: BTreeSet<CapabilityFlag>,
    value: Vec<u8>,
    subscribers: BTreeSet<String>,
    service: Option<Address>,
    notifier: Option<Arc<dyn Notifier>>,
    read_callback: Option<ReadCallback>,
    write_callback: Option<WriteCallback>,
    subscription_callback: Option<SubscriptionCallback>,
}

impl Characteristic {
    /// Create a characteristic with an address from the global address space
    pub fn new(uuid: GattUuid, flags: &[CapabilityFlag]) -> Result<Self> {
        Self::with_prefix(uuid, flags, CHARACTERISTIC_PATH_PREFIX)
    }

    /// Create a characteristic whose address uses a custom path prefix
    pub fn with_prefix(uuid: GattUuid, flags: &[CapabilityFlag], prefix: &str) -> Result<Self> {
        if flags.is_empty() {
            return Err(GattError::NoCapabilities);
        }
        Address::parse(&format!("{}0", prefix))?;

        Ok(Self {
            address: AddressSpace::global().allocate(prefix),
            uuid,
            flags: flags.iter().copied().collect(),
            value: Vec::new(),
            subscribers: BTreeSet::new(),
            service: None,
            notifier: None,
            read_callback: None,
            write_callback: None,
            subscription_callback: None,
        })
    }

    pub fn set_read_callback(&mut self, callback: impl Fn(&str) -> Vec<u8> + Send + Sync + 'static) {
        self.read_callback = Some(Arc::new(callback));
    }

    pub fn set_write_callback(
        &mut self,
        callback: impl Fn(&str, &[u8]) -> bool + Send + Sync + 'static,
    ) {
        self.write_callback = Some(Arc::new(callback));
    }

    pub fn set_subscription_callback(
        &mut self,
        callback: impl Fn(&str, bool) + Send + Sync + 'static,
    ) {
        self.subscription_callback = Some(Arc::new(callback));
    }

    pub fn uuid(&self) -> GattUuid {
        self.uuid
    }

    pub fn flags(&self) -> impl Iterator<Item = CapabilityFlag> + '_ {
        self.flags.iter().copied()
    }

    pub fn has_flag(&self, flag: CapabilityFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn is_notifying(&self) -> bool {
        !self.subscribers.is_empty()
    }

    pub fn subscribers(&self) -> impl Iterator<Item = &str> + '_ {
        self.subscribers.iter().map(String::as_str)
    }

    pub fn is_exported(&self) -> bool {
        self.notifier.is_some()
    }

    /// Owning service, once attached
    pub fn service(&self) -> Option<&Address> {
        self.service.as_ref()
    }

    pub(crate) fn set_service(&mut self, service: Address) {
        self.service = Some(service);
    }

    /// Replace the stored value, signalling subscribers if notifying
    pub fn set_value(&mut self, value: Vec<u8>) {
        self.value = value;
        if self.is_notifying() {
            self.emit_changed("Value", PropertyValue::Bytes(self.value.clone()));
        }
    }

    fn check(&self, operation: Operation) -> Result<()> {
        if !self.flags.iter().any(|flag| flag.allows(operation)) {
            return Err(GattError::Capability {
                address: self.address.clone(),
                operation,
            });
        }
        if !self.is_exported() {
            return Err(GattError::NotExported(self.address.clone()));
        }
        Ok(())
    }

    /// Read on behalf of `peer`
    pub fn read(&mut self, peer: &str) -> Result<Vec<u8>> {
        self.read_at(peer, 0)
    }

    /// `ReadValue` with options: honours `device` and `offset`
    pub fn read_with(&mut self, sender: &str, options: &AccessOptions) -> Result<Vec<u8>> {
        self.read_at(options.peer(sender), options.offset as usize)
    }

    fn read_at(&mut self, peer: &str, offset: usize) -> Result<Vec<u8>> {
        self.check(Operation::Read)?;
        debug!("ReadValue on {} ({}) from {}", self.address, self.uuid, peer);

        if let Some(callback) = &self.read_callback {
            self.value = callback(peer);
        }

        if offset > self.value.len() {
            return Err(GattError::InvalidOffset {
                address: self.address.clone(),
                offset,
                length: self.value.len(),
            });
        }
        Ok(self.value[offset..].to_vec())
    }

    /// Write on behalf of `peer`
    pub fn write(&mut self, peer: &str, value: &[u8]) -> Result<()> {
        self.write_at(peer, value, 0)
    }

    /// `WriteValue` with options: honours `device` and `offset`
    pub fn write_with(&mut self, sender: &str, value: &[u8], options: &AccessOptions) -> Result<()> {
        self.write_at(options.peer(sender), value, options.offset as usize)
    }

    fn write_at(&mut self, peer: &str, value: &[u8], offset: usize) -> Result<()> {
        self.check(Operation::Write)?;
        debug!(
            "WriteValue on {} ({}) from {}: {:02X?}",
            self.address, self.uuid, peer, value
        );

        if offset > self.value.len() {
            return Err(GattError::InvalidOffset {
                address: self.address.clone(),
                offset,
                length: self.value.len(),
            });
        }

        // Keep the prefix up to offset; the written bytes become the new tail
        let mut new_value = self.value[..offset].to_vec();
        new_value.extend_from_slice(value);

        if let Some(callback) = &self.write_callback {
            if !callback(peer, &new_value) {
                warn!("Write to {} rejected by callback", self.address);
                return Err(GattError::WriteRejected(self.address.clone()));
            }
        }

        self.set_value(new_value);
        Ok(())
    }

    /// Subscribe `peer` to value notifications
    pub fn start_notify(&mut self, peer: &str) -> Result<()> {
        self.check(Operation::Notify)?;

        let was_notifying = self.is_notifying();
        if !self.subscribers.insert(peer.to_string()) {
            trace!("{} already subscribed to {}", peer, self.address);
            return Ok(());
        }
        info!("{} subscribed to {} ({})", peer, self.address, self.uuid);

        if !was_notifying {
            if let Some(callback) = &self.subscription_callback {
                callback(peer, true);
            }
        }
        Ok(())
    }

    /// Unsubscribe `peer`; unknown peers are ignored
    pub fn stop_notify(&mut self, peer: &str) -> Result<()> {
        self.check(Operation::Notify)?;

        if !self.subscribers.remove(peer) {
            trace!("{} was not subscribed to {}", peer, self.address);
            return Ok(());
        }
        info!("{} unsubscribed from {} ({})", peer, self.address, self.uuid);

        if !self.is_notifying() {
            if let Some(callback) = &self.subscription_callback {
                callback(peer, false);
            }
        }
        Ok(())
    }

    /// Broadcast `PropertiesChanged` for one property; no-op when not exported
    pub fn emit_changed(&self, property: &str, value: PropertyValue) {
        let Some(notifier) = &self.notifier else {
            return;
        };

        let mut changed = PropertyMap::new();
        changed.insert(property.to_string(), value);
        if let Err(e) = notifier.properties_changed(
            &self.address,
            GATT_CHARACTERISTIC_INTERFACE,
            changed,
            Vec::new(),
        ) {
            warn!("Failed to emit {} change on {}: {}", property, self.address, e);
        }
    }

    pub(crate) fn export(&mut self, bus: &dyn Bus) -> Result<()> {
        if self.is_exported() {
            return Err(GattError::AlreadyExported(self.address.clone()));
        }
        bus.register_object(&self.address, &[GATT_CHARACTERISTIC_INTERFACE])?;
        self.notifier = Some(bus.notifier());
        debug!("GATT characteristic exported at {} ({})", self.address, self.uuid);
        Ok(())
    }

    pub(crate) fn unexport(&mut self, bus: &dyn Bus) {
        if self.notifier.take().is_none() {
            return;
        }
        bus.unregister_object(&self.address);
        if !self.subscribers.is_empty() {
            debug!(
                "Dropping {} subscriber(s) of {}",
                self.subscribers.len(),
                self.address
            );
            self.subscribers.clear();
        }
        debug!("GATT characteristic unexported: {}", self.address);
    }
}

impl fmt::Debug for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Characteristic")
            .field("address", &self.address)
            .field("uuid", &self.uuid)
            .field("flags", &self.flags)
            .field("value", &self.value)
            .field("subscribers", &self.subscribers)
            .field("exported", &self.is_exported())
            .finish()
    }
}

impl ExportedObject for Characteristic {
    fn address(&self) -> &Address {
        &self.address
    }

    fn interface(&self) -> &'static str {
        GATT_CHARACTERISTIC_INTERFACE
    }

    fn properties(&self) -> PropertyMap {
        let mut props = PropertyMap::new();
        props.insert("UUID".into(), PropertyValue::Str(self.uuid.to_string()));
        if let Some(service) = &self.service {
            props.insert("Service".into(), PropertyValue::Path(service.clone()));
        }
        props.insert(
            "Flags".into(),
            PropertyValue::Strings(self.flags.iter().map(|f| f.as_str().to_string()).collect()),
        );
        props.insert("Notifying".into(), PropertyValue::Bool(self.is_notifying()));
        props.insert("Value".into(), PropertyValue::Bytes(self.value.clone()));
        props
    }

    fn on_method_call(&mut self, sender: &str, method: &Method) -> Result<Reply> {
        match method {
            Method::ReadValue { options } => self.read_with(sender, options).map(Reply::Bytes),
            Method::WriteValue { value, options } => {
                self.write_with(sender, value, options).map(|_| Reply::Empty)
            }
            Method::StartNotify => self.start_notify(sender).map(|_| Reply::Empty),
            Method::StopNotify => self.stop_notify(sender).map(|_| Reply::Empty),
            other => Err(GattError::UnknownMethod {
                interface: GATT_CHARACTERISTIC_INTERFACE.to_string(),
                method: other.member().to_string(),
            }),
        }
    }
}
