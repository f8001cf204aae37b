//! Domain Module
//!
//! The GATT object tree and the ports it talks through. Nothing in here
//! knows about a concrete transport.

pub mod address;
pub mod advertisement;
pub mod application;
pub mod characteristic;
pub mod error;
pub mod models;
pub mod ports;
pub mod service;
pub mod settings;
pub mod uuid;

pub use address::Address;
pub use advertisement::{Advertisement, AdvertisementType};
pub use application::Application;
pub use characteristic::{CapabilityFlag, Characteristic};
pub use error::{GattError, Result};
pub use service::Service;
pub use self::uuid::GattUuid;
