//! GATT Error Types
//!
//! Errors raised by the object tree. Remote callers see them through
//! [`MethodError`](crate::infrastructure::bluetooth::dispatch::MethodError),
//! which maps each variant onto a BlueZ / D-Bus error name.

use crate::domain::address::Address;
use crate::domain::ports::BusError;
use thiserror::Error;

/// Operation a capability check guards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Notify,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Notify => write!(f, "notify"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GattError {
    #[error("{operation} not permitted on {address}")]
    Capability {
        address: Address,
        operation: Operation,
    },
    #[error("object {0} is not exported")]
    NotExported(Address),
    #[error("object {child} is already attached to {parent}")]
    AlreadyAttached { child: Address, parent: Address },
    #[error("object {0} is already exported")]
    AlreadyExported(Address),
    #[error("write to {0} rejected")]
    WriteRejected(Address),
    #[error("offset {offset} out of range for {address} (length {length})")]
    InvalidOffset {
        address: Address,
        offset: usize,
        length: usize,
    },
    #[error("characteristic needs at least one capability flag")]
    NoCapabilities,
    #[error("invalid object address: {0}")]
    InvalidAddress(String),
    #[error("object {address} is not below the application root {root}")]
    OutsideRoot { address: Address, root: Address },
    #[error("invalid UUID: {0}")]
    InvalidUuid(String),
    #[error("no object at {0}")]
    UnknownObject(Address),
    #[error("object {address} does not implement {interface}")]
    UnknownInterface { address: Address, interface: String },
    #[error("unknown method {interface}.{method}")]
    UnknownMethod { interface: String, method: String },
    #[error("unknown property {interface}.{property}")]
    UnknownProperty { interface: String, property: String },
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
}

/// Crate-wide `Result` alias for object tree operations.
pub type Result<T> = std::result::Result<T, GattError>;
