//! Demo peripheral: a battery service and a counter service, served over the
//! in-process bus to a simulated central until Ctrl+C.

use anyhow::{Context, Result};
use gatt_peripheral::domain::address::Address;
use gatt_peripheral::domain::models::{AccessOptions, ExportedObject, Method, PeripheralEvent};
use gatt_peripheral::domain::settings::{AdvertisementSettings, Settings, SettingsService};
use gatt_peripheral::domain::{
    Advertisement, AdvertisementType, Application, CapabilityFlag, GattUuid,
};
use gatt_peripheral::infrastructure::bluetooth::dispatch::MethodCall;
use gatt_peripheral::infrastructure::bluetooth::manager::LoopbackManager;
use gatt_peripheral::infrastructure::bluetooth::protocol::{
    self, BATTERY_LEVEL_UUID, BATTERY_SERVICE_UUID, COUNTER_CHAR_UUID, COUNTER_SERVICE_UUID,
};
use gatt_peripheral::infrastructure::bluetooth::PeripheralService;
use gatt_peripheral::infrastructure::bus::LocalBus;
use gatt_peripheral::infrastructure::logging::init_logger;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const GATT_CHARACTERISTIC_INTERFACE: &str =
    gatt_peripheral::domain::characteristic::GATT_CHARACTERISTIC_INTERFACE;
const OBJECT_MANAGER_INTERFACE: &str =
    gatt_peripheral::domain::application::OBJECT_MANAGER_INTERFACE;

/// Addresses the demo loop needs after the tree has been handed over
struct DemoTree {
    application: Application,
    battery_level: Address,
    counter: Address,
}

fn build_application(
    settings: &Settings,
    battery: Arc<AtomicU8>,
    counter: Arc<AtomicU32>,
) -> Result<DemoTree> {
    let root = Address::parse(&settings.peripheral.root_path)
        .with_context(|| format!("Invalid root path {}", settings.peripheral.root_path))?;
    let mut application = Application::with_root(root);

    // Battery Service: Battery Level, read + notify
    let mut battery_service = application.new_service(BATTERY_SERVICE_UUID, true)?;
    let mut level = battery_service.new_characteristic(
        BATTERY_LEVEL_UUID,
        &[CapabilityFlag::Read, CapabilityFlag::Notify],
    )?;
    level.set_value(vec![battery.load(Ordering::SeqCst)]);
    {
        let battery = battery.clone();
        level.set_read_callback(move |peer| {
            let value = battery.load(Ordering::SeqCst);
            info!("Battery level requested by {}: {}%", peer, value);
            vec![value]
        });
    }
    level.set_subscription_callback(|peer, subscribing| {
        if subscribing {
            info!("{} subscribed to battery notifications", peer);
        } else {
            info!("{} unsubscribed from battery notifications", peer);
        }
    });
    let battery_level = level.address().clone();
    battery_service.attach(level)?;

    // Counter service: u32 little-endian, read + write + notify
    let mut counter_service = application.new_service(COUNTER_SERVICE_UUID.parse()?, true)?;
    let mut value = counter_service.new_characteristic(
        COUNTER_CHAR_UUID.parse::<GattUuid>()?,
        &[CapabilityFlag::Read, CapabilityFlag::Write, CapabilityFlag::Notify],
    )?;
    value.set_value(protocol::encode_counter(counter.load(Ordering::SeqCst)));
    {
        let counter = counter.clone();
        value.set_read_callback(move |peer| {
            let current = counter.load(Ordering::SeqCst);
            info!("Counter value requested by {}: {}", peer, current);
            protocol::encode_counter(current)
        });
    }
    value.set_write_callback(move |peer, bytes| match protocol::decode_counter(bytes) {
        Some(new_value) => {
            info!("Counter set to {} by {}", new_value, peer);
            counter.store(new_value, Ordering::SeqCst);
            true
        }
        None => {
            warn!("Rejecting {}-byte counter write from {}", bytes.len(), peer);
            false
        }
    });
    let counter_addr = value.address().clone();
    counter_service.attach(value)?;

    application.attach_service(battery_service)?;
    application.attach_service(counter_service)?;

    Ok(DemoTree {
        application,
        battery_level,
        counter: counter_addr,
    })
}

fn build_advertisement(settings: &AdvertisementSettings) -> Result<Advertisement> {
    let mut advertisement = Advertisement::new(AdvertisementType::Peripheral);
    advertisement.set_local_name(settings.local_name.clone());
    advertisement.set_service_uuids(vec![
        BATTERY_SERVICE_UUID,
        COUNTER_SERVICE_UUID.parse()?,
    ]);
    advertisement.set_transport(settings.discoverable, settings.connectable);
    advertisement.set_include_tx_power(settings.include_tx_power);
    advertisement.set_interval(settings.min_interval_ms, settings.max_interval_ms);
    advertisement.set_manufacturer_data(settings.manufacturer_id, settings.manufacturer_data.clone());
    if let Some(appearance) = settings.appearance {
        advertisement.set_appearance(appearance);
    }
    Ok(advertisement)
}

/// Plays the part of a remote central talking to us through the daemon
async fn simulated_central(
    calls: mpsc::UnboundedSender<MethodCall>,
    root: Address,
    battery_level: Address,
    counter: Address,
) {
    const SENDER: &str = ":1.42";
    let script = vec![
        MethodCall::new(SENDER, root, OBJECT_MANAGER_INTERFACE, Method::GetManagedObjects),
        MethodCall::new(
            SENDER,
            battery_level,
            GATT_CHARACTERISTIC_INTERFACE,
            Method::StartNotify,
        ),
        MethodCall::new(
            SENDER,
            counter.clone(),
            GATT_CHARACTERISTIC_INTERFACE,
            Method::StartNotify,
        ),
        MethodCall::new(
            SENDER,
            counter.clone(),
            GATT_CHARACTERISTIC_INTERFACE,
            Method::WriteValue {
                value: protocol::encode_counter(1000),
                options: AccessOptions::default(),
            },
        ),
        MethodCall::new(
            SENDER,
            counter.clone(),
            GATT_CHARACTERISTIC_INTERFACE,
            Method::WriteValue {
                value: vec![0xFF],
                options: AccessOptions::default(),
            },
        ),
    ];

    tokio::time::sleep(Duration::from_millis(500)).await;
    for call in script {
        if calls.send(call).is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let mut poll = tokio::time::interval(Duration::from_secs(3));
    loop {
        poll.tick().await;
        let read = MethodCall::new(
            SENDER,
            counter.clone(),
            GATT_CHARACTERISTIC_INTERFACE,
            Method::ReadValue {
                options: AccessOptions::default(),
            },
        );
        if calls.send(read).is_err() {
            return;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();
    let _log_guard = init_logger(&settings.log_settings)?;
    info!("Starting BLE GATT peripheral demo");
    debug!("Settings loaded from {}", settings_service.path().display());

    let battery = Arc::new(AtomicU8::new(85));
    let counter = Arc::new(AtomicU32::new(1));
    let tree = build_application(&settings, battery.clone(), counter.clone())?;
    let advertisement = build_advertisement(&settings.advertisement)?;
    let root = tree.application.address().clone();

    let bus = LocalBus::new();
    let mut signals = bus.subscribe();
    let manager = LoopbackManager::new(bus.clone())
        .with_adapter(settings.peripheral.adapter_path.clone())
        .into_arc();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut peripheral = PeripheralService::new(
        tree.application,
        advertisement,
        Arc::new(bus.clone()),
        manager,
        &settings.peripheral,
        event_tx,
    );
    peripheral.start().await?;

    let (call_tx, mut call_rx) = mpsc::unbounded_channel();
    tokio::spawn(simulated_central(
        call_tx,
        root,
        tree.battery_level.clone(),
        tree.counter.clone(),
    ));

    let mut battery_timer =
        tokio::time::interval(Duration::from_secs(settings.battery_update_interval_secs.max(1)));
    let mut counter_timer =
        tokio::time::interval(Duration::from_secs(settings.counter_update_interval_secs.max(1)));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!("Peripheral running, press Ctrl+C to stop");
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl+C received");
                break;
            }
            _ = battery_timer.tick() => {
                let level = protocol::next_battery_level(battery.load(Ordering::SeqCst));
                battery.store(level, Ordering::SeqCst);
                if let Err(e) = peripheral.set_value(&tree.battery_level, vec![level]) {
                    warn!("Battery update failed: {}", e);
                }
            }
            _ = counter_timer.tick() => {
                let value = counter.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
                if let Err(e) = peripheral.set_value(&tree.counter, protocol::encode_counter(value)) {
                    warn!("Counter update failed: {}", e);
                }
            }
            Some(event) = event_rx.recv() => match event {
                PeripheralEvent::Registered(target) => info!("{} registered", target),
                PeripheralEvent::RegistrationFailed { target, error } => {
                    warn!("{} registration failed: {}", target, error)
                }
                PeripheralEvent::Unregistered(target) => info!("{} unregistered", target),
                PeripheralEvent::AdvertisementReleased => info!("Advertisement released"),
            },
            Some(call) = call_rx.recv() => match peripheral.handle_call(&call) {
                Ok(reply) => debug!("{} replied: {:?}", call.method.member(), reply),
                Err(e) => warn!("{} failed: {}", call.method.member(), e),
            },
            Some(signal) = signals.recv() => {
                debug!("Notification from {}: {:?}", signal.address, signal.changed);
            }
        }
    }

    peripheral.shutdown().await;
    info!("Goodbye");
    Ok(())
}
