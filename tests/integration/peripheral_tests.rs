//! End-to-end peripheral lifecycle against the loopback manager.

use gatt_peripheral::domain::address::Address;
use gatt_peripheral::domain::advertisement::LE_ADVERTISEMENT_INTERFACE;
use gatt_peripheral::domain::characteristic::GATT_CHARACTERISTIC_INTERFACE;
use gatt_peripheral::domain::models::{
    AccessOptions, ExportedObject, Method, PeripheralEvent, RegistrationTarget, Reply,
};
use gatt_peripheral::domain::settings::PeripheralSettings;
use gatt_peripheral::domain::{
    Advertisement, AdvertisementType, Application, CapabilityFlag, Characteristic, GattError,
    GattUuid, Service,
};
use gatt_peripheral::infrastructure::bluetooth::dispatch::MethodCall;
use gatt_peripheral::infrastructure::bluetooth::manager::LoopbackManager;
use gatt_peripheral::infrastructure::bluetooth::protocol::{self, ManagerCall};
use gatt_peripheral::infrastructure::bluetooth::registration::RegistrationState;
use gatt_peripheral::infrastructure::bluetooth::PeripheralService;
use gatt_peripheral::infrastructure::bus::LocalBus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const PEER: &str = ":1.42";

struct Harness {
    bus: LocalBus,
    manager: Arc<LoopbackManager>,
    peripheral: PeripheralService,
    events: mpsc::UnboundedReceiver<PeripheralEvent>,
    counter: Address,
}

fn harness(latency: Duration) -> Harness {
    let mut service = Service::new(GattUuid::from_short(0x1234), true);
    let mut counter = Characteristic::new(
        GattUuid::from_short(0x5678),
        &[
            CapabilityFlag::Read,
            CapabilityFlag::Write,
            CapabilityFlag::Notify,
        ],
    )
    .unwrap();
    counter.set_value(protocol::encode_counter(1));
    counter.set_write_callback(|_, bytes| protocol::decode_counter(bytes).is_some());
    let counter_addr = counter.address().clone();
    service.attach(counter).unwrap();
    let mut application = Application::new();
    application.attach_service(service).unwrap();

    let bus = LocalBus::new();
    let manager = Arc::new(LoopbackManager::new(bus.clone()).with_latency(latency));
    let (tx, events) = mpsc::unbounded_channel();
    let peripheral = PeripheralService::new(
        application,
        Advertisement::new(AdvertisementType::Peripheral),
        Arc::new(bus.clone()),
        manager.clone(),
        &PeripheralSettings::default(),
        tx,
    );
    Harness {
        bus,
        manager,
        peripheral,
        events,
        counter: counter_addr,
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<PeripheralEvent>) -> PeripheralEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn started() -> Harness {
    let mut h = harness(Duration::ZERO);
    h.peripheral.start().await.unwrap();
    let mut registered = vec![next_event(&mut h.events).await, next_event(&mut h.events).await];
    registered.sort_by_key(|e| format!("{:?}", e));
    assert_eq!(
        registered,
        vec![
            PeripheralEvent::Registered(RegistrationTarget::Advertisement),
            PeripheralEvent::Registered(RegistrationTarget::Application),
        ]
    );
    h
}

fn call(address: &Address, interface: &str, method: Method) -> MethodCall {
    MethodCall::new(PEER, address.clone(), interface, method)
}

#[tokio::test]
async fn start_registers_application_then_advertisement() {
    let h = started().await;
    let root = h.peripheral.server().application().address().clone();
    let advertisement = h.peripheral.server().advertisement().address().clone();

    assert!(h.manager.is_registered(RegistrationTarget::Application, &root));
    assert!(h
        .manager
        .is_registered(RegistrationTarget::Advertisement, &advertisement));
    let order: Vec<ManagerCall> = h.manager.calls().into_iter().map(|(c, _)| c).collect();
    assert_eq!(
        order,
        vec![
            ManagerCall::RegisterApplication,
            ManagerCall::RegisterAdvertisement
        ]
    );
    // root + service + characteristic + advertisement
    assert_eq!(h.bus.object_count(), 4);
    assert!(h.manager.is_powered());
}

#[tokio::test]
async fn central_writes_and_receives_notifications() {
    let mut h = started().await;
    let counter = h.counter.clone();
    let mut signals = h.bus.subscribe();

    h.peripheral
        .handle_call(&call(&counter, GATT_CHARACTERISTIC_INTERFACE, Method::StartNotify))
        .unwrap();
    h.peripheral
        .handle_call(&call(
            &counter,
            GATT_CHARACTERISTIC_INTERFACE,
            Method::WriteValue {
                value: protocol::encode_counter(1000),
                options: AccessOptions::default(),
            },
        ))
        .unwrap();

    let short = h.peripheral.handle_call(&call(
        &counter,
        GATT_CHARACTERISTIC_INTERFACE,
        Method::WriteValue {
            value: vec![0xFF],
            options: AccessOptions::default(),
        },
    ));
    let err = short.unwrap_err();
    assert_eq!(err.name, "org.bluez.Error.Failed");

    let reply = h
        .peripheral
        .handle_call(&call(
            &counter,
            GATT_CHARACTERISTIC_INTERFACE,
            Method::ReadValue {
                options: AccessOptions::default(),
            },
        ))
        .unwrap();
    assert_eq!(reply, Reply::Bytes(protocol::encode_counter(1000)));

    h.peripheral
        .set_value(&counter, protocol::encode_counter(1001))
        .unwrap();

    let mut values = Vec::new();
    while let Ok(signal) = signals.try_recv() {
        if signal.address == counter {
            values.push(signal.changed);
        }
    }
    assert_eq!(values.len(), 2);
}

#[tokio::test]
async fn release_from_manager_is_reported_once() {
    let mut h = started().await;
    let advertisement = h.peripheral.server().advertisement().address().clone();

    h.peripheral
        .handle_call(&call(&advertisement, LE_ADVERTISEMENT_INTERFACE, Method::Release))
        .unwrap();
    assert_eq!(
        next_event(&mut h.events).await,
        PeripheralEvent::AdvertisementReleased
    );
    assert_eq!(
        h.peripheral
            .registration_state(RegistrationTarget::Advertisement),
        RegistrationState::Unregistered
    );
    assert!(!h.bus.is_registered(&advertisement));

    // The object is gone, so a second release cannot reach it
    let again =
        h.peripheral
            .handle_call(&call(&advertisement, LE_ADVERTISEMENT_INTERFACE, Method::Release));
    assert!(again.is_err());
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn shutdown_takes_everything_off_the_bus() {
    let mut h = started().await;
    let root = h.peripheral.server().application().address().clone();

    h.peripheral.shutdown().await;

    assert_eq!(h.bus.object_count(), 0);
    assert!(!h.manager.is_registered(RegistrationTarget::Application, &root));
    let order: Vec<ManagerCall> = h.manager.calls().into_iter().map(|(c, _)| c).collect();
    assert_eq!(
        order[2..],
        [
            ManagerCall::UnregisterAdvertisement,
            ManagerCall::UnregisterApplication
        ]
    );
    assert!(!h.peripheral.server().application().is_exported());
}

#[tokio::test]
async fn shutdown_during_registration_unregisters_afterwards() {
    let mut h = harness(Duration::from_millis(50));
    let root = h.peripheral.server().application().address().clone();
    h.peripheral.start().await.unwrap();

    h.peripheral.shutdown().await;

    assert!(!h.manager.is_registered(RegistrationTarget::Application, &root));
    assert_eq!(
        h.peripheral.registration_state(RegistrationTarget::Application),
        RegistrationState::Unregistered
    );
    assert_eq!(h.bus.object_count(), 0);
}

#[tokio::test]
async fn set_value_on_unknown_address_is_rejected() {
    let mut h = started().await;
    let missing = Address::parse("/org/bluez/example/nowhere").unwrap();
    assert_eq!(
        h.peripheral.set_value(&missing, vec![1]),
        Err(GattError::UnknownObject(missing.clone()))
    );
}
