//! Peripheral Service Module
//!
//! Main service that exports the object tree, registers it with the
//! Bluetooth manager and serves the manager's calls.

use crate::domain::address::Address;
use crate::domain::advertisement::Advertisement;
use crate::domain::application::Application;
use crate::domain::error::GattError;
use crate::domain::models::{ExportedObject, PeripheralEvent, RegistrationTarget, Reply};
use crate::domain::ports::Bus;
use crate::domain::settings::PeripheralSettings;
use crate::infrastructure::bluetooth::{
    dispatch::{MethodCall, MethodError, ObjectServer},
    manager::{BluetoothManager, RegistrationOptions},
    registration::{RegistrationController, RegistrationError, RegistrationState},
};
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Main peripheral service coordinating export, registration and dispatch
pub struct PeripheralService {
    server: ObjectServer,
    bus: Arc<dyn Bus>,
    manager: Arc<dyn BluetoothManager>,
    application_registration: RegistrationController,
    advertisement_registration: RegistrationController,
    pending: Vec<JoinHandle<()>>,
    timeout: Duration,
    event_sender: mpsc::UnboundedSender<PeripheralEvent>,
}

impl PeripheralService {
    /// Create a new peripheral service; nothing is exported yet
    pub fn new(
        application: Application,
        advertisement: Advertisement,
        bus: Arc<dyn Bus>,
        manager: Arc<dyn BluetoothManager>,
        settings: &PeripheralSettings,
        event_sender: mpsc::UnboundedSender<PeripheralEvent>,
    ) -> Self {
        let timeout = Duration::from_millis(settings.registration_timeout_ms);
        Self {
            server: ObjectServer::new(application, advertisement),
            bus,
            manager,
            application_registration: RegistrationController::new(
                RegistrationTarget::Application,
                timeout,
            ),
            advertisement_registration: RegistrationController::new(
                RegistrationTarget::Advertisement,
                timeout,
            ),
            pending: Vec::new(),
            timeout,
            event_sender,
        }
    }

    pub fn server(&self) -> &ObjectServer {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut ObjectServer {
        &mut self.server
    }

    pub fn registration_state(&self, target: RegistrationTarget) -> RegistrationState {
        self.controller(target).state()
    }

    fn controller(&self, target: RegistrationTarget) -> &RegistrationController {
        match target {
            RegistrationTarget::Application => &self.application_registration,
            RegistrationTarget::Advertisement => &self.advertisement_registration,
        }
    }

    fn address(&self, target: RegistrationTarget) -> Address {
        match target {
            RegistrationTarget::Application => self.server.application().address().clone(),
            RegistrationTarget::Advertisement => self.server.advertisement().address().clone(),
        }
    }

    /// Make sure the manager is reachable and the adapter is powered
    async fn preflight(&self) -> Result<()> {
        if !self.manager.is_available().await {
            bail!("Bluetooth manager is not available");
        }
        match tokio::time::timeout(self.timeout, self.manager.power_on_adapter()).await {
            Ok(result) => result.context("Failed to power on Bluetooth adapter")?,
            Err(_) => bail!("Powering on the Bluetooth adapter timed out"),
        }
        debug!("Bluetooth manager available, adapter powered");
        Ok(())
    }

    /// Check the manager, export the application and the advertisement, then
    /// register both
    ///
    /// Preflight and export failures are returned; registration outcomes
    /// arrive later as [`PeripheralEvent`]s.
    pub async fn start(&mut self) -> Result<()> {
        self.preflight().await?;

        self.server
            .application_mut()
            .export(self.bus.clone())
            .context("Failed to export GATT application")?;

        if let Err(e) = self.server.advertisement_mut().export(self.bus.clone()) {
            self.server.application_mut().unexport();
            return Err(e).context("Failed to export advertisement");
        }

        self.register(RegistrationTarget::Application)?;
        self.register(RegistrationTarget::Advertisement)?;
        info!("Peripheral started");
        Ok(())
    }

    /// Start (or retry) one registration
    pub fn register(&mut self, target: RegistrationTarget) -> Result<()> {
        let address = self.address(target);
        let sender = self.event_sender.clone();
        let handle = self
            .controller(target)
            .register_with(
                self.manager.clone(),
                address,
                RegistrationOptions::new(),
                move |outcome| {
                    let event = match outcome {
                        Ok(()) => PeripheralEvent::Registered(target),
                        Err(e) => PeripheralEvent::RegistrationFailed {
                            target,
                            error: e.to_string(),
                        },
                    };
                    let _ = sender.send(event);
                },
            )
            .with_context(|| format!("Failed to start {} registration", target))?;

        self.pending.retain(|handle| !handle.is_finished());
        self.pending.push(handle);
        Ok(())
    }

    /// Serve one inbound call from the manager or a remote device
    pub fn handle_call(&mut self, call: &MethodCall) -> Result<Reply, MethodError> {
        let was_released = self.server.advertisement().is_released();
        let reply = self.server.dispatch(call)?;

        if !was_released && self.server.advertisement().is_released() {
            self.advertisement_registration.mark_released();
            let _ = self.event_sender.send(PeripheralEvent::AdvertisementReleased);
        }
        Ok(reply)
    }

    /// Update a characteristic value, notifying subscribers
    pub fn set_value(&mut self, address: &Address, value: Vec<u8>) -> Result<(), GattError> {
        let characteristic = self
            .server
            .application_mut()
            .characteristic_mut(address)
            .ok_or_else(|| GattError::UnknownObject(address.clone()))?;
        characteristic.set_value(value);
        Ok(())
    }

    async fn unregister(&self, target: RegistrationTarget) {
        let address = self.address(target);
        let result = self
            .controller(target)
            .unregister_with(self.manager.as_ref(), &address)
            .await;

        match result {
            Ok(()) => {
                if self.controller(target).state() == RegistrationState::Unregistered {
                    let _ = self.event_sender.send(PeripheralEvent::Unregistered(target));
                }
            }
            Err(RegistrationError::InvalidState(state)) => {
                debug!("{} not registered ({:?}), skipping unregister", target, state);
            }
            Err(e) => {
                warn!("Unregister of {} failed: {}", target, e);
                let _ = self.event_sender.send(PeripheralEvent::Unregistered(target));
            }
        }
    }

    /// Unregister both objects, then take the tree off the bus
    pub async fn shutdown(&mut self) {
        info!("Shutting down peripheral");
        self.unregister(RegistrationTarget::Advertisement).await;
        self.unregister(RegistrationTarget::Application).await;

        // Let in-flight registrations settle so deferred unregisters run
        for handle in self.pending.drain(..) {
            if tokio::time::timeout(self.timeout, handle).await.is_err() {
                warn!("Registration task did not finish during shutdown");
            }
        }

        self.server.advertisement_mut().unexport();
        self.server.application_mut().unexport();
        info!("Peripheral stopped");
    }
}
