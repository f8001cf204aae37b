//! Registration handshake driven through the peripheral service.

use crate::mock_manager::MockManager;
use gatt_peripheral::domain::models::{ExportedObject, PeripheralEvent, RegistrationTarget};
use gatt_peripheral::domain::settings::PeripheralSettings;
use gatt_peripheral::domain::{
    Advertisement, AdvertisementType, Application, CapabilityFlag, Characteristic, GattUuid,
    Service,
};
use gatt_peripheral::infrastructure::bluetooth::manager::ManagerError;
use gatt_peripheral::infrastructure::bluetooth::protocol::ManagerCall;
use gatt_peripheral::infrastructure::bluetooth::registration::RegistrationState;
use gatt_peripheral::infrastructure::bluetooth::PeripheralService;
use gatt_peripheral::infrastructure::bus::LocalBus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn battery_application() -> Application {
    let mut service = Service::new(GattUuid::from_short(0x180F), true);
    service
        .attach(
            Characteristic::new(
                GattUuid::from_short(0x2A19),
                &[CapabilityFlag::Read, CapabilityFlag::Notify],
            )
            .unwrap(),
        )
        .unwrap();
    let mut application = Application::new();
    application.attach_service(service).unwrap();
    application
}

fn settings() -> PeripheralSettings {
    PeripheralSettings {
        registration_timeout_ms: 500,
        ..PeripheralSettings::default()
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<PeripheralEvent>) -> PeripheralEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn collect_events(
    rx: &mut mpsc::UnboundedReceiver<PeripheralEvent>,
    count: usize,
) -> Vec<PeripheralEvent> {
    let mut events = Vec::new();
    for _ in 0..count {
        events.push(next_event(rx).await);
    }
    events
}

#[tokio::test]
async fn application_transport_failure_leaves_export_intact() {
    let bus = LocalBus::new();
    let manager = Arc::new(MockManager::failing_application(ManagerError::Transport(
        "connection reset by peer".into(),
    )));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut peripheral = PeripheralService::new(
        battery_application(),
        Advertisement::new(AdvertisementType::Peripheral),
        Arc::new(bus.clone()),
        manager.clone(),
        &settings(),
        tx,
    );
    peripheral.start().await.unwrap();

    let events = collect_events(&mut rx, 2).await;
    let failures: Vec<_> = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                PeripheralEvent::RegistrationFailed {
                    target: RegistrationTarget::Application,
                    ..
                }
            )
        })
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(events.contains(&PeripheralEvent::Registered(RegistrationTarget::Advertisement)));

    // No second outcome for the failed registration
    assert!(
        tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .is_err()
    );

    assert_eq!(
        peripheral.registration_state(RegistrationTarget::Application),
        RegistrationState::Failed
    );
    let root = peripheral.server().application().address().clone();
    assert!(bus.is_registered(&root));
    assert_eq!(bus.object_count(), 4);
    assert_eq!(manager.count(ManagerCall::RegisterApplication), 1);
}

#[tokio::test]
async fn failed_registration_can_be_retried_by_caller() {
    let bus = LocalBus::new();
    let manager = Arc::new(MockManager::failing_advertisement(ManagerError::rejected(
        "org.bluez.Error.NotPermitted",
        "Maximum advertisements reached",
    )));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut peripheral = PeripheralService::new(
        battery_application(),
        Advertisement::new(AdvertisementType::Peripheral),
        Arc::new(bus.clone()),
        manager.clone(),
        &settings(),
        tx,
    );
    peripheral.start().await.unwrap();
    let events = collect_events(&mut rx, 2).await;
    assert!(events.iter().any(|e| matches!(
        e,
        PeripheralEvent::RegistrationFailed { target: RegistrationTarget::Advertisement, error }
            if error.contains("Maximum advertisements reached")
    )));

    peripheral
        .register(RegistrationTarget::Advertisement)
        .unwrap();
    let retry = next_event(&mut rx).await;
    assert!(matches!(
        retry,
        PeripheralEvent::RegistrationFailed {
            target: RegistrationTarget::Advertisement,
            ..
        }
    ));
    assert_eq!(manager.count(ManagerCall::RegisterAdvertisement), 2);
}

#[tokio::test]
async fn register_twice_while_registered_is_refused() {
    let bus = LocalBus::new();
    let manager = Arc::new(MockManager::accepting());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut peripheral = PeripheralService::new(
        battery_application(),
        Advertisement::new(AdvertisementType::Peripheral),
        Arc::new(bus.clone()),
        manager.clone(),
        &settings(),
        tx,
    );
    peripheral.start().await.unwrap();
    collect_events(&mut rx, 2).await;

    assert_eq!(
        peripheral.registration_state(RegistrationTarget::Application),
        RegistrationState::Registered
    );
    assert!(peripheral.register(RegistrationTarget::Application).is_err());
    assert_eq!(manager.count(ManagerCall::RegisterApplication), 1);
}

#[tokio::test]
async fn shutdown_unregisters_then_unexports() {
    let bus = LocalBus::new();
    let manager = Arc::new(MockManager::accepting());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut peripheral = PeripheralService::new(
        battery_application(),
        Advertisement::new(AdvertisementType::Peripheral),
        Arc::new(bus.clone()),
        manager.clone(),
        &settings(),
        tx,
    );
    peripheral.start().await.unwrap();
    collect_events(&mut rx, 2).await;

    peripheral.shutdown().await;
    assert_eq!(bus.object_count(), 0);

    let history = manager.history();
    assert_eq!(
        &history[history.len() - 2..],
        &[
            ManagerCall::UnregisterAdvertisement,
            ManagerCall::UnregisterApplication
        ]
    );
    let events = collect_events(&mut rx, 2).await;
    assert_eq!(
        events,
        vec![
            PeripheralEvent::Unregistered(RegistrationTarget::Advertisement),
            PeripheralEvent::Unregistered(RegistrationTarget::Application),
        ]
    );
}

#[tokio::test]
async fn unavailable_manager_aborts_start_before_export() {
    let bus = LocalBus::new();
    let manager = Arc::new(MockManager::unavailable());
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut peripheral = PeripheralService::new(
        battery_application(),
        Advertisement::new(AdvertisementType::Peripheral),
        Arc::new(bus.clone()),
        manager.clone(),
        &settings(),
        tx,
    );

    let err = peripheral.start().await.unwrap_err();
    assert!(err.to_string().contains("not available"));
    assert_eq!(bus.object_count(), 0);
    assert!(manager.history().is_empty());
    assert_eq!(
        peripheral.registration_state(RegistrationTarget::Application),
        RegistrationState::Unregistered
    );
}

#[tokio::test]
async fn adapter_power_failure_aborts_start() {
    let bus = LocalBus::new();
    let manager = Arc::new(MockManager::failing_power_on(ManagerError::rejected(
        "org.bluez.Error.Busy",
        "Operation already in progress",
    )));
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut peripheral = PeripheralService::new(
        battery_application(),
        Advertisement::new(AdvertisementType::Peripheral),
        Arc::new(bus.clone()),
        manager.clone(),
        &settings(),
        tx,
    );

    let err = peripheral.start().await.unwrap_err();
    assert!(format!("{:#}", err).contains("Operation already in progress"));
    assert_eq!(bus.object_count(), 0);
    assert!(manager.history().is_empty());
}
