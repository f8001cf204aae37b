//! Infrastructure Module
//!
//! Adapters around the domain tree: the in-process bus, the registration
//! plumbing towards the Bluetooth manager, and logging setup.

pub mod bluetooth;
pub mod bus;
pub mod logging;
