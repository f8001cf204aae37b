//! Object tree behaviour seen through inbound method calls.

use gatt_peripheral::domain::address::Address;
use gatt_peripheral::domain::characteristic::GATT_CHARACTERISTIC_INTERFACE;
use gatt_peripheral::domain::application::{GATT_APPLICATION_INTERFACE, OBJECT_MANAGER_INTERFACE};
use gatt_peripheral::domain::models::{
    AccessOptions, ExportedObject, Method, PropertyValue, Reply,
};
use gatt_peripheral::domain::ports::Bus;
use gatt_peripheral::domain::service::GATT_SERVICE_INTERFACE;
use gatt_peripheral::domain::{
    Advertisement, AdvertisementType, Application, CapabilityFlag, Characteristic, GattError,
    GattUuid, Service,
};
use gatt_peripheral::infrastructure::bluetooth::dispatch::{MethodCall, ObjectServer};
use gatt_peripheral::infrastructure::bluetooth::protocol::error_names;
use gatt_peripheral::infrastructure::bus::LocalBus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const PEER: &str = ":1.7";

struct Fixture {
    bus: LocalBus,
    server: ObjectServer,
    service: Address,
    level: Address,
}

/// Battery service 180F with Battery Level 2A19 (read + notify), exported
fn battery_fixture() -> Fixture {
    let bus = LocalBus::new();
    let mut service = Service::new(GattUuid::from_short(0x180F), true);
    let level = Characteristic::new(
        GattUuid::from_short(0x2A19),
        &[CapabilityFlag::Read, CapabilityFlag::Notify],
    )
    .unwrap();
    let level_addr = level.address().clone();
    service.attach(level).unwrap();

    let mut application = Application::new();
    let service_addr = application.attach_service(service).unwrap();
    application.export(Arc::new(bus.clone()) as Arc<dyn Bus>).unwrap();

    let mut advertisement = Advertisement::new(AdvertisementType::Peripheral);
    advertisement.export(Arc::new(bus.clone())).unwrap();

    Fixture {
        bus,
        server: ObjectServer::new(application, advertisement),
        service: service_addr,
        level: level_addr,
    }
}

fn call(address: &Address, interface: &str, method: Method) -> MethodCall {
    MethodCall::new(PEER, address.clone(), interface, method)
}

#[test]
fn battery_tree_has_one_service_and_one_characteristic() {
    let mut f = battery_fixture();
    let root = f.server.application().address().clone();

    let reply = f
        .server
        .dispatch(&call(&root, GATT_APPLICATION_INTERFACE, Method::GetServices))
        .unwrap();
    assert_eq!(reply, Reply::Paths(vec![f.service.clone()]));

    let reply = f
        .server
        .dispatch(&call(&root, OBJECT_MANAGER_INTERFACE, Method::GetManagedObjects))
        .unwrap();
    let Reply::ManagedObjects(objects) = reply else {
        panic!("unexpected reply {:?}", reply);
    };
    assert_eq!(objects.len(), 2);
    assert!(!objects.contains_key(&root));

    let service_props = &objects[&f.service][GATT_SERVICE_INTERFACE];
    assert_eq!(
        service_props["UUID"],
        PropertyValue::Str("0000180f-0000-1000-8000-00805f9b34fb".into())
    );
    assert_eq!(
        service_props["Characteristics"],
        PropertyValue::Paths(vec![f.level.clone()])
    );

    let char_props = &objects[&f.level][GATT_CHARACTERISTIC_INTERFACE];
    assert_eq!(
        char_props["UUID"],
        PropertyValue::Str("00002a19-0000-1000-8000-00805f9b34fb".into())
    );
    assert_eq!(char_props["Service"], PropertyValue::Path(f.service.clone()));
    assert_eq!(
        char_props["Flags"],
        PropertyValue::Strings(vec!["read".into(), "notify".into()])
    );
}

#[test]
fn only_values_set_while_subscribed_are_signalled() {
    let mut f = battery_fixture();
    let level = f.level.clone();

    f.server
        .application_mut()
        .characteristic_mut(&level)
        .unwrap()
        .set_value(vec![85]);

    f.server
        .dispatch(&call(&level, GATT_CHARACTERISTIC_INTERFACE, Method::StartNotify))
        .unwrap();
    f.server
        .application_mut()
        .characteristic_mut(&level)
        .unwrap()
        .set_value(vec![86]);

    f.server
        .dispatch(&call(&level, GATT_CHARACTERISTIC_INTERFACE, Method::StopNotify))
        .unwrap();
    f.server
        .application_mut()
        .characteristic_mut(&level)
        .unwrap()
        .set_value(vec![87]);

    let values: Vec<_> = f
        .bus
        .signals()
        .into_iter()
        .filter(|s| s.address == level)
        .filter_map(|s| s.changed.get("Value").cloned())
        .collect();
    assert_eq!(values, vec![PropertyValue::Bytes(vec![86])]);
}

#[test]
fn read_without_read_flag_is_not_permitted() {
    let bus = LocalBus::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut c = Characteristic::new(GattUuid::from_short(0x2A00), &[CapabilityFlag::Write])
        .unwrap();
    let counter = calls.clone();
    c.set_read_callback(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Vec::new()
    });
    let addr = c.address().clone();
    let mut service = Service::new(GattUuid::from_short(0x1800), true);
    service.attach(c).unwrap();
    let mut application = Application::new();
    application.attach_service(service).unwrap();
    application.export(Arc::new(bus.clone())).unwrap();
    let mut server = ObjectServer::new(application, Advertisement::new(AdvertisementType::Peripheral));

    let err = server
        .dispatch(&call(
            &addr,
            GATT_CHARACTERISTIC_INTERFACE,
            Method::ReadValue {
                options: AccessOptions::default(),
            },
        ))
        .unwrap_err();
    assert_eq!(err.name, error_names::NOT_PERMITTED);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn rejected_write_keeps_value_and_reports_failure() {
    let bus = LocalBus::new();
    let mut c = Characteristic::new(
        "12345678-1234-1234-1234-123456789abd".parse().unwrap(),
        &[CapabilityFlag::Read, CapabilityFlag::Write],
    )
    .unwrap();
    c.set_value(vec![1, 0, 0, 0]);
    c.set_write_callback(|_, value| value.len() >= 4);
    let addr = c.address().clone();
    let mut service = Service::new("12345678-1234-1234-1234-123456789abc".parse().unwrap(), true);
    service.attach(c).unwrap();
    let mut application = Application::new();
    application.attach_service(service).unwrap();
    application.export(Arc::new(bus.clone())).unwrap();
    let mut server = ObjectServer::new(application, Advertisement::new(AdvertisementType::Peripheral));

    let err = server
        .dispatch(&call(
            &addr,
            GATT_CHARACTERISTIC_INTERFACE,
            Method::WriteValue {
                value: vec![9],
                options: AccessOptions::default(),
            },
        ))
        .unwrap_err();
    assert_eq!(err.name, error_names::FAILED);
    assert_eq!(err.message, "Write operation failed");
    assert_eq!(
        server.application().characteristic(&addr).unwrap().value(),
        &[1, 0, 0, 0]
    );

    let reply = server
        .dispatch(&call(
            &addr,
            GATT_CHARACTERISTIC_INTERFACE,
            Method::ReadValue {
                options: AccessOptions::default(),
            },
        ))
        .unwrap();
    assert_eq!(reply, Reply::Bytes(vec![1, 0, 0, 0]));
}

#[test]
fn export_unexport_and_export_again() {
    let mut f = battery_fixture();
    let expected = f.bus.object_count();
    assert_eq!(expected, 4);

    f.server.application_mut().unexport();
    f.server.advertisement_mut().unexport();
    assert_eq!(f.bus.object_count(), 0);

    let err = f
        .server
        .dispatch(&call(&f.level, GATT_CHARACTERISTIC_INTERFACE, Method::StartNotify))
        .unwrap_err();
    assert_eq!(err.name, error_names::UNKNOWN_OBJECT);

    f.server
        .application_mut()
        .export(Arc::new(f.bus.clone()))
        .unwrap();
    f.server
        .advertisement_mut()
        .export(Arc::new(f.bus.clone()))
        .unwrap();
    assert_eq!(f.bus.object_count(), expected);
}

#[test]
fn characteristic_attaches_to_one_service_only() {
    let c = Characteristic::new(GattUuid::from_short(0x2A19), &[CapabilityFlag::Read]).unwrap();
    let copy = c.clone();
    let addr = c.address().clone();

    let mut first = Service::new(GattUuid::from_short(0x180F), true);
    let mut second = Service::new(GattUuid::from_short(0x180F), true);
    first.attach(c).unwrap();

    let err = second.attach(copy).unwrap_err();
    assert_eq!(
        err,
        GattError::AlreadyAttached {
            child: addr.clone(),
            parent: first.address().clone()
        }
    );
    assert_eq!(first.child_addresses(), vec![addr]);
    assert!(second.child_addresses().is_empty());
}

#[test]
fn properties_interface() {
    let mut f = battery_fixture();

    let reply = f
        .server
        .dispatch(&MethodCall::get_property(
            PEER,
            f.level.clone(),
            GATT_CHARACTERISTIC_INTERFACE,
            "Notifying",
        ))
        .unwrap();
    assert_eq!(reply, Reply::Property(PropertyValue::Bool(false)));

    let reply = f
        .server
        .dispatch(&MethodCall::get_all_properties(
            PEER,
            f.service.clone(),
            GATT_SERVICE_INTERFACE,
        ))
        .unwrap();
    let Reply::Properties(props) = reply else {
        panic!("unexpected reply {:?}", reply);
    };
    assert_eq!(props["Primary"], PropertyValue::Bool(true));

    let err = f
        .server
        .dispatch(&MethodCall::get_property(
            PEER,
            f.level.clone(),
            GATT_CHARACTERISTIC_INTERFACE,
            "Bogus",
        ))
        .unwrap_err();
    assert_eq!(err.name, error_names::UNKNOWN_PROPERTY);

    let err = f
        .server
        .dispatch(&MethodCall::get_all_properties(
            PEER,
            f.level.clone(),
            GATT_SERVICE_INTERFACE,
        ))
        .unwrap_err();
    assert_eq!(err.name, error_names::UNKNOWN_INTERFACE);
}

#[test]
fn unknown_targets_are_reported() {
    let mut f = battery_fixture();

    let nowhere = Address::parse("/org/bluez/example/nowhere").unwrap();
    let err = f
        .server
        .dispatch(&call(&nowhere, GATT_CHARACTERISTIC_INTERFACE, Method::StartNotify))
        .unwrap_err();
    assert_eq!(err.name, error_names::UNKNOWN_OBJECT);

    let err = f
        .server
        .dispatch(&call(&f.level, "org.example.Nope", Method::StartNotify))
        .unwrap_err();
    assert_eq!(err.name, error_names::UNKNOWN_INTERFACE);

    let err = f
        .server
        .dispatch(&call(
            &f.level,
            GATT_CHARACTERISTIC_INTERFACE,
            Method::Other("Confirm".into()),
        ))
        .unwrap_err();
    assert_eq!(err.name, error_names::UNKNOWN_METHOD);
}

#[test]
fn device_option_names_the_peer() {
    let mut f = battery_fixture();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    f.server
        .application_mut()
        .characteristic_mut(&f.level)
        .unwrap()
        .set_subscription_callback(move |peer, subscribing| {
            sink.lock().unwrap().push((peer.to_string(), subscribing));
        });
    f.server
        .application_mut()
        .characteristic_mut(&f.level)
        .unwrap()
        .set_read_callback(|_| vec![42]);

    let device = Address::parse("/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF").unwrap();
    let reply = f
        .server
        .dispatch(&call(
            &f.level,
            GATT_CHARACTERISTIC_INTERFACE,
            Method::ReadValue {
                options: AccessOptions::from_device(device),
            },
        ))
        .unwrap();
    assert_eq!(reply, Reply::Bytes(vec![42]));

    f.server
        .dispatch(&call(&f.level, GATT_CHARACTERISTIC_INTERFACE, Method::StartNotify))
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![(PEER.to_string(), true)]);
}
