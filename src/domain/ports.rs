//! Port traits between the object tree and the RPC substrate.
//!
//! ```text
//!   Characteristic ──▶ Notifier ──▶ substrate (signals)
//!   Application    ──▶ Bus      ──▶ substrate (object registration)
//! ```
//!
//! The tree never talks to a transport directly. Tests and the demo binary
//! use [`LocalBus`](crate::infrastructure::bus::LocalBus).

use crate::domain::address::Address;
use crate::domain::models::PropertyMap;
use std::sync::Arc;
use thiserror::Error;

pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BusError {
    #[error("an object is already registered at {0}")]
    AddressInUse(Address),
    #[error("registration of {address} failed: {reason}")]
    RegistrationFailed { address: Address, reason: String },
    #[error("failed to emit signal from {address}: {reason}")]
    SignalFailed { address: Address, reason: String },
    #[error("bus disconnected")]
    Disconnected,
}

/// Outbound signal capability
pub trait Notifier: Send + Sync {
    /// Broadcast `PropertiesChanged(interface, changed, invalidated)` from `address`
    fn properties_changed(
        &self,
        address: &Address,
        interface: &str,
        changed: PropertyMap,
        invalidated: Vec<String>,
    ) -> Result<(), BusError>;
}

/// Object registration on the substrate
pub trait Bus: Send + Sync {
    /// Make `address` reachable with the given interfaces
    fn register_object(&self, address: &Address, interfaces: &[&'static str])
        -> Result<(), BusError>;

    /// Remove `address`; unknown addresses are ignored
    fn unregister_object(&self, address: &Address);

    /// Signal emitter bound to this bus
    fn notifier(&self) -> Arc<dyn Notifier>;
}
