//! Bluetooth Module
//!
//! Connects the GATT object tree to the Bluetooth manager.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    PeripheralService                     │
//! │  (Main coordinator - public API for the application)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┬──────────────┐
//!         │             │              │              │
//!         ▼             ▼              ▼              ▼
//! ┌────────────┐ ┌──────────────┐ ┌──────────┐ ┌──────────┐
//! │  Dispatch  │ │ Registration │ │ Manager  │ │ Protocol │
//! │            │ │              │ │          │ │          │
//! │ - routing  │ │ - handshake  │ │ - port   │ │ - names  │
//! │ - errors   │ │   state      │ │ - loopback│ │ - UUIDs  │
//! └────────────┘ └──────────────┘ └──────────┘ └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - BlueZ names, error names and demo payload layouts
//! - [`manager`] - Manager port and the in-process loopback manager
//! - [`registration`] - Register/unregister state machine
//! - [`dispatch`] - Inbound call routing
//! - [`service`] - Main service coordinator

pub mod dispatch;
pub mod manager;
pub mod protocol;
pub mod registration;
pub mod service;

// Re-export main service for convenience
pub use service::PeripheralService;
