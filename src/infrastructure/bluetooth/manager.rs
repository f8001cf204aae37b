//! Bluetooth Manager Port
//!
//! The external daemon that accepts our application and advertisement.
//! [`BluetoothManager`] is the seam; [`LoopbackManager`] is an in-process
//! implementation over [`LocalBus`] that validates registrations the way
//! BlueZ does (the object must be exported, and only registered once).

use crate::domain::address::Address;
use crate::domain::application::GATT_APPLICATION_INTERFACE;
use crate::domain::advertisement::LE_ADVERTISEMENT_INTERFACE;
use crate::domain::models::{PropertyMap, RegistrationTarget};
use crate::infrastructure::bluetooth::protocol::{
    error_names, ManagerCall, ADAPTER_INTERFACE, BLUEZ_SERVICE, DEFAULT_ADAPTER_PATH,
};
use crate::infrastructure::bus::LocalBus;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Options dictionary passed with a register call (`a{sv}`)
pub type RegistrationOptions = PropertyMap;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ManagerError {
    /// The manager answered with an error reply
    #[error("{name}: {message}")]
    Rejected { name: String, message: String },
    /// The call never got an answer
    #[error("transport error: {0}")]
    Transport(String),
}

impl ManagerError {
    pub fn rejected(name: &str, message: impl Into<String>) -> Self {
        Self::Rejected {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

/// Registration methods exposed by the manager on the adapter object
#[async_trait]
pub trait BluetoothManager: Send + Sync {
    /// Whether the daemon is running and owns its bus name
    async fn is_available(&self) -> bool;

    /// Set `Powered` on the adapter; already powered is fine
    async fn power_on_adapter(&self) -> Result<(), ManagerError>;

    async fn register_application(
        &self,
        application: &Address,
        options: &RegistrationOptions,
    ) -> Result<(), ManagerError>;

    async fn unregister_application(&self, application: &Address) -> Result<(), ManagerError>;

    async fn register_advertisement(
        &self,
        advertisement: &Address,
        options: &RegistrationOptions,
    ) -> Result<(), ManagerError>;

    async fn unregister_advertisement(&self, advertisement: &Address)
        -> Result<(), ManagerError>;
}

/// Register `address` as `target`
pub(crate) async fn register(
    manager: &dyn BluetoothManager,
    target: RegistrationTarget,
    address: &Address,
    options: &RegistrationOptions,
) -> Result<(), ManagerError> {
    match target {
        RegistrationTarget::Application => manager.register_application(address, options).await,
        RegistrationTarget::Advertisement => {
            manager.register_advertisement(address, options).await
        }
    }
}

/// Unregister `address` as `target`
pub(crate) async fn unregister(
    manager: &dyn BluetoothManager,
    target: RegistrationTarget,
    address: &Address,
) -> Result<(), ManagerError> {
    match target {
        RegistrationTarget::Application => manager.unregister_application(address).await,
        RegistrationTarget::Advertisement => manager.unregister_advertisement(address).await,
    }
}

struct LoopbackState {
    available: bool,
    powered: bool,
    registered: HashSet<(RegistrationTarget, Address)>,
    calls: Vec<(ManagerCall, Address)>,
}

impl Default for LoopbackState {
    fn default() -> Self {
        Self {
            available: true,
            powered: false,
            registered: HashSet::new(),
            calls: Vec::new(),
        }
    }
}

/// In-process manager backed by a [`LocalBus`]
pub struct LoopbackManager {
    bus: LocalBus,
    adapter: String,
    latency: Duration,
    state: Mutex<LoopbackState>,
}

impl LoopbackManager {
    pub fn new(bus: LocalBus) -> Self {
        Self {
            bus,
            adapter: DEFAULT_ADAPTER_PATH.to_string(),
            latency: Duration::ZERO,
            state: Mutex::new(LoopbackState::default()),
        }
    }

    pub fn with_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.adapter = adapter.into();
        self
    }

    /// Delay every reply, to simulate a slow daemon
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn into_arc(self) -> Arc<dyn BluetoothManager> {
        Arc::new(self)
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_registered(&self, target: RegistrationTarget, address: &Address) -> bool {
        self.lock().registered.contains(&(target, address.clone()))
    }

    /// Simulate the daemon going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    pub fn is_powered(&self) -> bool {
        self.lock().powered
    }

    /// Every register/unregister call received so far, in order
    pub fn calls(&self) -> Vec<(ManagerCall, Address)> {
        self.lock().calls.clone()
    }

    async fn handle_register(
        &self,
        call: ManagerCall,
        target: RegistrationTarget,
        address: &Address,
        interface: &str,
    ) -> Result<(), ManagerError> {
        self.lock().calls.push((call, address.clone()));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let exported = self
            .bus
            .interfaces(address)
            .is_some_and(|interfaces| interfaces.iter().any(|i| *i == interface));
        if !exported {
            return Err(ManagerError::rejected(
                error_names::FAILED,
                format!("No object received at {}", address),
            ));
        }

        let mut state = self.lock();
        if !state.registered.insert((target, address.clone())) {
            return Err(ManagerError::rejected(
                error_names::ALREADY_EXISTS,
                format!("{} already registered", address),
            ));
        }
        info!("{} {} on {}", call.member(), address, self.adapter);
        Ok(())
    }

    async fn handle_unregister(
        &self,
        call: ManagerCall,
        target: RegistrationTarget,
        address: &Address,
    ) -> Result<(), ManagerError> {
        self.lock().calls.push((call, address.clone()));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if !self.lock().registered.remove(&(target, address.clone())) {
            return Err(ManagerError::rejected(
                error_names::DOES_NOT_EXIST,
                format!("{} is not registered", address),
            ));
        }
        debug!("{} {} on {}", call.member(), address, self.adapter);
        Ok(())
    }
}

#[async_trait]
impl BluetoothManager for LoopbackManager {
    async fn is_available(&self) -> bool {
        let available = self.lock().available;
        if !available {
            warn!("{} is not on the bus", BLUEZ_SERVICE);
        }
        available
    }

    async fn power_on_adapter(&self) -> Result<(), ManagerError> {
        let mut state = self.lock();
        if !state.available {
            return Err(ManagerError::Transport(format!(
                "{} is not on the bus",
                BLUEZ_SERVICE
            )));
        }
        if !state.powered {
            state.powered = true;
            info!("{}.Powered = true on {}", ADAPTER_INTERFACE, self.adapter);
        }
        Ok(())
    }

    async fn register_application(
        &self,
        application: &Address,
        _options: &RegistrationOptions,
    ) -> Result<(), ManagerError> {
        self.handle_register(
            ManagerCall::RegisterApplication,
            RegistrationTarget::Application,
            application,
            GATT_APPLICATION_INTERFACE,
        )
        .await
    }

    async fn unregister_application(&self, application: &Address) -> Result<(), ManagerError> {
        self.handle_unregister(
            ManagerCall::UnregisterApplication,
            RegistrationTarget::Application,
            application,
        )
        .await
    }

    async fn register_advertisement(
        &self,
        advertisement: &Address,
        _options: &RegistrationOptions,
    ) -> Result<(), ManagerError> {
        self.handle_register(
            ManagerCall::RegisterAdvertisement,
            RegistrationTarget::Advertisement,
            advertisement,
            LE_ADVERTISEMENT_INTERFACE,
        )
        .await
    }

    async fn unregister_advertisement(
        &self,
        advertisement: &Address,
    ) -> Result<(), ManagerError> {
        self.handle_unregister(
            ManagerCall::UnregisterAdvertisement,
            RegistrationTarget::Advertisement,
            advertisement,
        )
        .await
    }
}
