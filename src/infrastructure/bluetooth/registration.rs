//! Registration Controller
//!
//! Drives the two-phase handshake with the Bluetooth manager for one
//! exported object (the application or the advertisement).
//!
//! ```text
//!   Unregistered ──register──▶ Registering ──ok──▶ Registered
//!        ▲                        │                  │
//!        │                        └──err/timeout──▶ Failed
//!        └────────────unregister / release──────────┘
//! ```
//!
//! Register calls run on their own Tokio task so the dispatcher keeps
//! serving the manager's inbound calls (it will call `GetManagedObjects`
//! before it answers `RegisterApplication`).

use crate::domain::address::Address;
use crate::domain::models::RegistrationTarget;
use crate::infrastructure::bluetooth::manager::{
    self, BluetoothManager, ManagerError, RegistrationOptions,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default bound on a single manager call
pub const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    Failed,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    #[error("manager rejected the call: {name}: {message}")]
    Manager { name: String, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("no reply from manager within {0:?}")]
    Timeout(Duration),
    #[error("not allowed while {0:?}")]
    InvalidState(RegistrationState),
    #[error("released by the manager before the registration completed")]
    Released,
}

impl From<ManagerError> for RegistrationError {
    fn from(e: ManagerError) -> Self {
        match e {
            ManagerError::Rejected { name, message } => Self::Manager { name, message },
            ManagerError::Transport(reason) => Self::Transport(reason),
        }
    }
}

struct Shared {
    state: RegistrationState,
    // Unregister requested while the register call was still in flight
    pending_unregister: bool,
    // Manager released the object while the register call was in flight
    pending_release: bool,
}

pub struct RegistrationController {
    target: RegistrationTarget,
    timeout: Duration,
    shared: Arc<Mutex<Shared>>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

impl RegistrationController {
    pub fn new(target: RegistrationTarget, timeout: Duration) -> Self {
        Self {
            target,
            timeout,
            shared: Arc::new(Mutex::new(Shared {
                state: RegistrationState::Unregistered,
                pending_unregister: false,
                pending_release: false,
            })),
        }
    }

    pub fn target(&self) -> RegistrationTarget {
        self.target
    }

    pub fn state(&self) -> RegistrationState {
        lock(&self.shared).state
    }

    /// Start registering `address`; the outcome arrives through `on_outcome`
    ///
    /// Allowed from `Unregistered` and `Failed`. The callback runs exactly
    /// once, on the spawned task, after the state has settled. There is no
    /// automatic retry. Needs a running Tokio runtime.
    pub fn register_with<F>(
        &self,
        manager: Arc<dyn BluetoothManager>,
        address: Address,
        options: RegistrationOptions,
        on_outcome: F,
    ) -> Result<JoinHandle<()>, RegistrationError>
    where
        F: FnOnce(Result<(), RegistrationError>) + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RegistrationError::Transport(e.to_string()))?;

        {
            let mut shared = lock(&self.shared);
            match shared.state {
                RegistrationState::Unregistered | RegistrationState::Failed => {
                    shared.state = RegistrationState::Registering;
                    shared.pending_unregister = false;
                    shared.pending_release = false;
                }
                state => return Err(RegistrationError::InvalidState(state)),
            }
        }

        let target = self.target;
        let timeout = self.timeout;
        let shared = self.shared.clone();
        info!("Registering {} {}", target, address);

        let handle = runtime.spawn(async move {
            let result = match tokio::time::timeout(
                timeout,
                manager::register(manager.as_ref(), target, &address, &options),
            )
            .await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(RegistrationError::from(e)),
                Err(_) => Err(RegistrationError::Timeout(timeout)),
            };

            let (pending_unregister, released) = {
                let mut shared = lock(&shared);
                let released = std::mem::take(&mut shared.pending_release);
                shared.state = if released {
                    RegistrationState::Unregistered
                } else if result.is_ok() {
                    RegistrationState::Registered
                } else {
                    RegistrationState::Failed
                };
                (std::mem::take(&mut shared.pending_unregister), released)
            };

            // The object is already gone on our side; nothing to undo remotely
            if released {
                debug!("{} {} was released while registering", target, address);
                on_outcome(Err(RegistrationError::Released));
                return;
            }

            match &result {
                Ok(()) => info!("{} {} registered", target, address),
                Err(e) => error!("Failed to register {} {}: {}", target, address, e),
            }

            if pending_unregister && result.is_ok() {
                debug!("Completing deferred unregister of {} {}", target, address);
                match tokio::time::timeout(
                    timeout,
                    manager::unregister(manager.as_ref(), target, &address),
                )
                .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Deferred unregister of {} failed: {}", address, e),
                    Err(_) => warn!("Deferred unregister of {} timed out", address),
                }
                lock(&shared).state = RegistrationState::Unregistered;
            }

            on_outcome(result);
        });

        Ok(handle)
    }

    /// Unregister `address`
    ///
    /// From `Registered` the state returns to `Unregistered` whatever the
    /// manager answers; a manager error is still reported. While a register
    /// call is in flight the request is remembered and carried out once it
    /// resolves.
    pub async fn unregister_with(
        &self,
        manager: &dyn BluetoothManager,
        address: &Address,
    ) -> Result<(), RegistrationError> {
        {
            let mut shared = lock(&self.shared);
            match shared.state {
                RegistrationState::Registered => {
                    shared.state = RegistrationState::Unregistered;
                }
                RegistrationState::Registering => {
                    debug!("{} {} still registering, deferring unregister", self.target, address);
                    shared.pending_unregister = true;
                    return Ok(());
                }
                state => return Err(RegistrationError::InvalidState(state)),
            }
        }

        info!("Unregistering {} {}", self.target, address);
        match tokio::time::timeout(
            self.timeout,
            manager::unregister(manager, self.target, address),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("Unregister of {} {} failed: {}", self.target, address, e);
                Err(e.into())
            }
            Err(_) => {
                warn!("Unregister of {} {} timed out", self.target, address);
                Err(RegistrationError::Timeout(self.timeout))
            }
        }
    }

    /// The manager dropped the registration on its own (advertisement `Release`)
    ///
    /// While a register call is in flight the state stays `Registering`; the
    /// call settles on `Unregistered` once it resolves.
    pub fn mark_released(&self) {
        let mut shared = lock(&self.shared);
        if shared.state == RegistrationState::Registering {
            shared.pending_release = true;
        } else {
            shared.state = RegistrationState::Unregistered;
        }
        shared.pending_unregister = false;
    }
}
