//! Object Addresses
//!
//! Every exported object is reachable under a D-Bus style object path.
//! Paths are handed out by the [`AddressSpace`] from per-prefix counters and
//! are never reused for the lifetime of the process.

use crate::domain::error::{GattError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, OnceLock};

/// Root path for the application object tree
pub const APPLICATION_PATH: &str = "/org/bluez/example";

/// Prefix for service paths (a counter is appended)
pub const SERVICE_PATH_PREFIX: &str = "/org/bluez/example/service";

/// Prefix for characteristic paths (a counter is appended)
pub const CHARACTERISTIC_PATH_PREFIX: &str = "/org/bluez/example/characteristic";

/// Prefix for advertisement paths (a counter is appended)
pub const ADVERTISEMENT_PATH_PREFIX: &str = "/org/bluez/example/advertisement";

/// Hierarchical object identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and validate an object path
    ///
    /// Rules follow the D-Bus object path grammar: a leading `/`, segments of
    /// `[A-Za-z0-9_]` separated by single slashes, and no trailing slash
    /// unless the path is the root itself.
    pub fn parse(path: &str) -> Result<Self> {
        if path == "/" {
            return Ok(Self(path.to_string()));
        }
        let Some(rest) = path.strip_prefix('/') else {
            return Err(GattError::InvalidAddress(path.to_string()));
        };
        let valid = rest.split('/').all(|segment| {
            !segment.is_empty()
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        });
        if !valid {
            return Err(GattError::InvalidAddress(path.to_string()));
        }
        Ok(Self(path.to_string()))
    }

    /// Default application root, `/org/bluez/example`
    pub fn application_root() -> Self {
        Self(APPLICATION_PATH.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix for children of this object; the allocator appends a counter
    ///
    /// `/a/b` with `service` gives `/a/b/service`.
    pub fn child_prefix(&self, kind: &str) -> String {
        if self.0 == "/" {
            format!("/{}", kind)
        } else {
            format!("{}/{}", self.0, kind)
        }
    }

    /// True if `self` lies strictly below `ancestor` in the path hierarchy
    pub fn is_descendant_of(&self, ancestor: &Address) -> bool {
        if ancestor.0 == "/" {
            return self.0 != "/";
        }
        self.0
            .strip_prefix(ancestor.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Address {
    type Error = GattError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

#[derive(Default)]
struct Inner {
    counters: HashMap<String, u64>,
    // child -> parent
    claims: HashMap<Address, Address>,
}

/// Allocator for unique object addresses
///
/// Counters are scoped per prefix and only ever grow. The space also records
/// which parent each object was attached to, so that two copies of the same
/// object identity can never end up in the tree twice.
#[derive(Default)]
pub struct AddressSpace {
    inner: Mutex<Inner>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide address space used by the object constructors
    pub fn global() -> &'static AddressSpace {
        static GLOBAL: OnceLock<AddressSpace> = OnceLock::new();
        GLOBAL.get_or_init(AddressSpace::new)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Nothing in here can be left half-updated by a panic
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate the next address for `prefix`
    ///
    /// `prefix` must itself form a valid path once a number is appended.
    pub fn allocate(&self, prefix: &str) -> Address {
        let mut inner = self.lock();
        let counter = inner.counters.entry(prefix.to_string()).or_insert(0);
        let address = Address(format!("{}{}", prefix, counter));
        *counter += 1;
        address
    }

    /// Record `child` as attached to `parent`
    pub fn claim(&self, child: &Address, parent: &Address) -> Result<()> {
        let mut inner = self.lock();
        if let Some(existing) = inner.claims.get(child) {
            return Err(GattError::AlreadyAttached {
                child: child.clone(),
                parent: existing.clone(),
            });
        }
        inner.claims.insert(child.clone(), parent.clone());
        Ok(())
    }

    /// Undo a claim made by a failed attach
    pub fn release(&self, child: &Address) {
        self.lock().claims.remove(child);
    }

    #[cfg(test)]
    pub(crate) fn parent_of(&self, child: &Address) -> Option<Address> {
        self.lock().claims.get(child).cloned()
    }

    /// Drop the claim on `child`, but only if `parent` holds it
    pub fn release_from(&self, child: &Address, parent: &Address) {
        let mut inner = self.lock();
        if inner.claims.get(child) == Some(parent) {
            inner.claims.remove(child);
        }
    }
}
