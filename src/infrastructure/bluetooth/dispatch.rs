//! Inbound Call Dispatch
//!
//! [`ObjectServer`] owns the object tree and the advertisement, resolves the
//! target of each decoded [`MethodCall`] and forwards it. Failures become
//! [`MethodError`]s carrying the error name a BlueZ client expects.

use crate::domain::address::Address;
use crate::domain::advertisement::Advertisement;
use crate::domain::application::Application;
use crate::domain::error::GattError;
use crate::domain::models::{ExportedObject, Method, Reply};
use crate::domain::ports::PROPERTIES_INTERFACE;
use crate::infrastructure::bluetooth::protocol::{error_names, WRITE_FAILED_MESSAGE};
use thiserror::Error;
use tracing::{trace, warn};

/// A decoded method call addressed to one exported object
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    /// Unique bus name of the caller
    pub sender: String,
    pub address: Address,
    pub interface: String,
    pub method: Method,
}

impl MethodCall {
    pub fn new(
        sender: impl Into<String>,
        address: Address,
        interface: impl Into<String>,
        method: Method,
    ) -> Self {
        Self {
            sender: sender.into(),
            address,
            interface: interface.into(),
            method,
        }
    }

    /// `org.freedesktop.DBus.Properties.Get`
    pub fn get_property(
        sender: impl Into<String>,
        address: Address,
        interface: &str,
        name: &str,
    ) -> Self {
        Self::new(
            sender,
            address,
            PROPERTIES_INTERFACE,
            Method::GetProperty {
                interface: interface.to_string(),
                name: name.to_string(),
            },
        )
    }

    /// `org.freedesktop.DBus.Properties.GetAll`
    pub fn get_all_properties(
        sender: impl Into<String>,
        address: Address,
        interface: &str,
    ) -> Self {
        Self::new(
            sender,
            address,
            PROPERTIES_INTERFACE,
            Method::GetAllProperties {
                interface: interface.to_string(),
            },
        )
    }
}

/// Error reply sent back to the caller
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{name}: {message}")]
pub struct MethodError {
    pub name: String,
    pub message: String,
}

impl MethodError {
    pub fn new(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

impl From<GattError> for MethodError {
    fn from(e: GattError) -> Self {
        let name = match &e {
            GattError::Capability { .. } => error_names::NOT_PERMITTED,
            GattError::InvalidOffset { .. } => error_names::INVALID_OFFSET,
            GattError::UnknownObject(_) => error_names::UNKNOWN_OBJECT,
            GattError::UnknownInterface { .. } => error_names::UNKNOWN_INTERFACE,
            GattError::UnknownMethod { .. } => error_names::UNKNOWN_METHOD,
            GattError::UnknownProperty { .. } => error_names::UNKNOWN_PROPERTY,
            GattError::WriteRejected(_) => {
                return Self::new(error_names::FAILED, WRITE_FAILED_MESSAGE)
            }
            _ => error_names::FAILED,
        };
        Self::new(name, e.to_string())
    }
}

fn serves(object: &dyn ExportedObject, interface: &str) -> bool {
    object.interface() == interface || object.extra_interfaces().iter().any(|i| *i == interface)
}

pub struct ObjectServer {
    application: Application,
    advertisement: Advertisement,
}

impl ObjectServer {
    pub fn new(application: Application, advertisement: Advertisement) -> Self {
        Self {
            application,
            advertisement,
        }
    }

    pub fn application(&self) -> &Application {
        &self.application
    }

    pub fn application_mut(&mut self) -> &mut Application {
        &mut self.application
    }

    pub fn advertisement(&self) -> &Advertisement {
        &self.advertisement
    }

    pub fn advertisement_mut(&mut self) -> &mut Advertisement {
        &mut self.advertisement
    }

    /// Exported object at `address`, if any
    fn resolve(&mut self, address: &Address) -> Result<&mut dyn ExportedObject, GattError> {
        if address == self.advertisement.address() {
            if self.advertisement.is_exported() {
                return Ok(&mut self.advertisement);
            }
        } else if self.application.is_exported() {
            if let Some(object) = self.application.object_mut(address) {
                return Ok(object);
            }
        }
        Err(GattError::UnknownObject(address.clone()))
    }

    /// Route one call to its target
    pub fn dispatch(&mut self, call: &MethodCall) -> Result<Reply, MethodError> {
        trace!(
            "{} -> {} {}.{}",
            call.sender,
            call.address,
            call.interface,
            call.method.member()
        );

        let result = self
            .resolve(&call.address)
            .and_then(|object| Self::invoke(object, call));

        result.map_err(|e| {
            warn!(
                "{}.{} on {} failed: {}",
                call.interface,
                call.method.member(),
                call.address,
                e
            );
            MethodError::from(e)
        })
    }

    fn invoke(object: &mut dyn ExportedObject, call: &MethodCall) -> Result<Reply, GattError> {
        if call.interface == PROPERTIES_INTERFACE {
            return match &call.method {
                Method::GetProperty { interface, name } if interface == object.interface() => {
                    object.on_property_get(name).map(Reply::Property)
                }
                Method::GetProperty { interface, name } if serves(&*object, interface) => {
                    Err(GattError::UnknownProperty {
                        interface: interface.clone(),
                        property: name.clone(),
                    })
                }
                Method::GetAllProperties { interface } if interface == object.interface() => {
                    Ok(Reply::Properties(object.properties()))
                }
                Method::GetAllProperties { interface } if serves(&*object, interface) => {
                    Ok(Reply::Properties(Default::default()))
                }
                Method::GetProperty { interface, .. }
                | Method::GetAllProperties { interface } => Err(GattError::UnknownInterface {
                    address: object.address().clone(),
                    interface: interface.clone(),
                }),
                other => Err(GattError::UnknownMethod {
                    interface: PROPERTIES_INTERFACE.to_string(),
                    method: other.member().to_string(),
                }),
            };
        }

        if !serves(&*object, &call.interface) {
            return Err(GattError::UnknownInterface {
                address: object.address().clone(),
                interface: call.interface.clone(),
            });
        }
        object.on_method_call(&call.sender, &call.method)
    }
}
