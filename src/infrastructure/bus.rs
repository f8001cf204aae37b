//! In-process Bus
//!
//! [`LocalBus`] stands in for the system bus: it keeps a registry of
//! exported object paths and records every emitted `PropertiesChanged`
//! signal. It backs the demo binary and the tests, and can be told to fail
//! registration of particular addresses.

use crate::domain::address::Address;
use crate::domain::models::PropertyMap;
use crate::domain::ports::{Bus, BusError, Notifier};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Recorded `PropertiesChanged` emission
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub address: Address,
    pub interface: String,
    pub changed: PropertyMap,
    pub invalidated: Vec<String>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Address, Vec<&'static str>>,
    failing: HashSet<Address>,
    signals: Vec<Signal>,
    subscribers: Vec<mpsc::UnboundedSender<Signal>>,
    disconnected: bool,
}

/// Cloneable handle; all clones share one registry
#[derive(Clone, Default)]
pub struct LocalBus {
    state: Arc<Mutex<State>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_registered(&self, address: &Address) -> bool {
        self.lock().objects.contains_key(address)
    }

    /// Interfaces registered at `address`
    pub fn interfaces(&self, address: &Address) -> Option<Vec<&'static str>> {
        self.lock().objects.get(address).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// Make the next registrations of `address` fail
    pub fn fail_on(&self, address: &Address) {
        self.lock().failing.insert(address.clone());
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// Reject every further registration and signal
    pub fn disconnect(&self) {
        self.lock().disconnected = true;
    }

    /// Every signal emitted so far, oldest first
    pub fn signals(&self) -> Vec<Signal> {
        self.lock().signals.clone()
    }

    pub fn take_signals(&self) -> Vec<Signal> {
        std::mem::take(&mut self.lock().signals)
    }

    /// Live feed of signals emitted from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Signal> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }
}

impl Bus for LocalBus {
    fn register_object(
        &self,
        address: &Address,
        interfaces: &[&'static str],
    ) -> Result<(), BusError> {
        let mut state = self.lock();
        if state.disconnected {
            return Err(BusError::Disconnected);
        }
        if state.failing.contains(address) {
            return Err(BusError::RegistrationFailed {
                address: address.clone(),
                reason: "injected failure".to_string(),
            });
        }
        if state.objects.contains_key(address) {
            return Err(BusError::AddressInUse(address.clone()));
        }
        state.objects.insert(address.clone(), interfaces.to_vec());
        trace!("Registered {} ({:?})", address, interfaces);
        Ok(())
    }

    fn unregister_object(&self, address: &Address) {
        if self.lock().objects.remove(address).is_some() {
            trace!("Unregistered {}", address);
        }
    }

    fn notifier(&self) -> Arc<dyn Notifier> {
        Arc::new(self.clone())
    }
}

impl Notifier for LocalBus {
    fn properties_changed(
        &self,
        address: &Address,
        interface: &str,
        changed: PropertyMap,
        invalidated: Vec<String>,
    ) -> Result<(), BusError> {
        let mut state = self.lock();
        if state.disconnected {
            return Err(BusError::Disconnected);
        }

        let signal = Signal {
            address: address.clone(),
            interface: interface.to_string(),
            changed,
            invalidated,
        };
        debug!(
            "PropertiesChanged from {} on {}: {:?}",
            signal.address,
            signal.interface,
            signal.changed.keys().collect::<Vec<_>>()
        );
        state
            .subscribers
            .retain(|tx| tx.send(signal.clone()).is_ok());
        state.signals.push(signal);
        Ok(())
    }
}
