use crate::domain::address::Address;
use crate::domain::error::{GattError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Typed property payload
///
/// Each variant corresponds to one D-Bus signature, see [`PropertyValue::signature`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum PropertyValue {
    Bool(bool),
    U16(u16),
    U32(u32),
    Str(String),
    Strings(Vec<String>),
    Bytes(Vec<u8>),
    Path(Address),
    Paths(Vec<Address>),
    /// Company id -> data, as used by ManufacturerData
    BytesByU16(BTreeMap<u16, Vec<u8>>),
    /// UUID -> data, as used by ServiceData
    BytesByStr(BTreeMap<String, Vec<u8>>),
}

impl PropertyValue {
    /// D-Bus type signature of this value
    pub fn signature(&self) -> &'static str {
        match self {
            Self::Bool(_) => "b",
            Self::U16(_) => "q",
            Self::U32(_) => "u",
            Self::Str(_) => "s",
            Self::Strings(_) => "as",
            Self::Bytes(_) => "ay",
            Self::Path(_) => "o",
            Self::Paths(_) => "ao",
            Self::BytesByU16(_) => "a{qv}",
            Self::BytesByStr(_) => "a{sv}",
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Property name -> value for a single interface
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// Interface name -> properties for a single object
pub type InterfaceMap = BTreeMap<String, PropertyMap>;

/// Result of `GetManagedObjects`
pub type ManagedObjects = BTreeMap<Address, InterfaceMap>;

/// Options passed with `ReadValue` / `WriteValue`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessOptions {
    /// Remote device issuing the request
    #[serde(default)]
    pub device: Option<Address>,
    /// Byte offset into the value
    #[serde(default)]
    pub offset: u16,
    /// Negotiated ATT MTU
    #[serde(default)]
    pub mtu: Option<u16>,
}

impl AccessOptions {
    /// Options addressed from a particular remote device
    pub fn from_device(device: Address) -> Self {
        Self {
            device: Some(device),
            ..Default::default()
        }
    }

    pub fn at_offset(mut self, offset: u16) -> Self {
        self.offset = offset;
        self
    }

    /// Peer identity for callbacks: the device option, falling back to the bus sender
    pub fn peer<'a>(&'a self, sender: &'a str) -> &'a str {
        self.device.as_ref().map(Address::as_str).unwrap_or(sender)
    }
}

/// Decoded inbound method call
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    ReadValue { options: AccessOptions },
    WriteValue { value: Vec<u8>, options: AccessOptions },
    StartNotify,
    StopNotify,
    GetServices,
    GetManagedObjects,
    Release,
    GetProperty { interface: String, name: String },
    GetAllProperties { interface: String },
    /// Anything the binding layer could not map onto a known member
    Other(String),
}

impl Method {
    /// Wire member name
    pub fn member(&self) -> &str {
        match self {
            Self::ReadValue { .. } => "ReadValue",
            Self::WriteValue { .. } => "WriteValue",
            Self::StartNotify => "StartNotify",
            Self::StopNotify => "StopNotify",
            Self::GetServices => "GetServices",
            Self::GetManagedObjects => "GetManagedObjects",
            Self::Release => "Release",
            Self::GetProperty { .. } => "Get",
            Self::GetAllProperties { .. } => "GetAll",
            Self::Other(name) => name,
        }
    }
}

/// Reply payload for an inbound method call
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Empty,
    Bytes(Vec<u8>),
    Paths(Vec<Address>),
    ManagedObjects(ManagedObjects),
    Property(PropertyValue),
    Properties(PropertyMap),
}

/// Capability interface implemented by every exported object
///
/// The dispatch layer resolves an address to one of these and forwards the
/// call; property reads never mutate the object.
pub trait ExportedObject {
    fn address(&self) -> &Address;

    /// Primary interface name
    fn interface(&self) -> &'static str;

    /// Additional interfaces served at the same path
    fn extra_interfaces(&self) -> &'static [&'static str] {
        &[]
    }

    /// All readable properties of the primary interface
    fn properties(&self) -> PropertyMap;

    fn on_property_get(&self, name: &str) -> Result<PropertyValue> {
        self.properties()
            .remove(name)
            .ok_or_else(|| GattError::UnknownProperty {
                interface: self.interface().to_string(),
                property: name.to_string(),
            })
    }

    fn on_method_call(&mut self, sender: &str, method: &Method) -> Result<Reply>;
}

/// Which of the two registrations an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationTarget {
    Application,
    Advertisement,
}

impl std::fmt::Display for RegistrationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Application => write!(f, "application"),
            Self::Advertisement => write!(f, "advertisement"),
        }
    }
}

/// Events published by the peripheral to whoever drives it
#[derive(Debug, Clone, PartialEq)]
pub enum PeripheralEvent {
    Registered(RegistrationTarget),
    RegistrationFailed {
        target: RegistrationTarget,
        error: String,
    },
    Unregistered(RegistrationTarget),
    AdvertisementReleased,
}
