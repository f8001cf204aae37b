//! BLE GATT peripheral exposed as a tree of remotely addressable objects.
//!
//! Build [`Characteristic`](domain::Characteristic)s, attach them to
//! [`Service`](domain::Service)s, attach those to an
//! [`Application`](domain::Application), and hand the application plus an
//! [`Advertisement`](domain::Advertisement) to a
//! [`PeripheralService`](infrastructure::bluetooth::PeripheralService),
//! which exports them and registers both with the Bluetooth manager.

pub mod domain;
pub mod infrastructure;
