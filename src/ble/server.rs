//! GATT server: Automation IO, Environmental Sensing and Battery services.
//!
//! The SoftDevice answers reads from its own copy of each value, so every
//! change to the [`AttributeTable`] is mirrored here with the `*_set`
//! helpers. Writes and CCCD changes arrive as [`ServerEvent`]s and are
//! validated against the table before they take effect.
//!
//! Environmental Sensing is registered by hand through [`ServiceBuilder`]
//! because each value carries a Characteristic Presentation Format
//! descriptor next to its CCCD.

use defmt::{info, warn};
use envnode::attributes::{AttributeHandle, AttributeTable, Notifier, PeerId, PresentationFormat};
use envnode::config::NUM_OF_DIGITALS;
use envnode::error::{AttError, TransportError};
use envnode::hal::DigitalOutputs;
use nrf_softdevice::ble::gatt_server::builder::ServiceBuilder;
use nrf_softdevice::ble::gatt_server::characteristic::{Attribute, Metadata, Properties};
use nrf_softdevice::ble::gatt_server::{self, NotifyValueError, RegisterError, Service, SetValueError};
use nrf_softdevice::ble::{Connection, Uuid};
use nrf_softdevice::Softdevice;

#[nrf_softdevice::gatt_service(uuid = "1815")]
pub struct AutomationIoService {
    /// Digital output bitmask (2 bits per line, bit 0 of each pair = on).
    /// Fixed length: the stack answers other lengths with an ATT error.
    #[characteristic(uuid = "2a56", read, write)]
    pub digital: u8,

    /// Number of digitals.
    #[characteristic(uuid = "2909", read)]
    pub number_of_digitals: u8,
}

const ESS_UUID: u16 = 0x181A;
const TEMPERATURE_UUID: u16 = 0x2A6E;
const PRESSURE_UUID: u16 = 0x2A6D;
const HUMIDITY_UUID: u16 = 0x2A6F;

/// Value and CCCD handles of one environmental characteristic.
#[derive(Clone, Copy)]
struct EnvCharacteristic {
    value: u16,
    cccd: u16,
}

impl EnvCharacteristic {
    fn register(
        service: &mut ServiceBuilder<'_>,
        uuid: u16,
        handle: AttributeHandle,
    ) -> Result<Self, RegisterError> {
        let mut builder = service.add_characteristic(
            Uuid::new_16(uuid),
            Attribute::new([0u8; 2]),
            Metadata::new(Properties::new().read().notify()),
        )?;
        if let Some(format) = handle.presentation_format() {
            builder.add_descriptor(
                Uuid::new_16(PresentationFormat::UUID),
                Attribute::new(format.to_bytes()),
            )?;
        }
        let handles = builder.build();
        Ok(Self {
            value: handles.value_handle,
            cccd: handles.cccd_handle,
        })
    }

    fn set(&self, value: i16) -> Result<(), SetValueError> {
        // Same access the generated `*_set` helpers use.
        let sd = unsafe { Softdevice::steal() };
        gatt_server::set_value(sd, self.value, &value.to_le_bytes())
    }

    fn notify(&self, conn: &Connection, value: i16) -> Result<(), NotifyValueError> {
        gatt_server::notify_value(conn, self.value, &value.to_le_bytes())
    }
}

/// Environmental Sensing (0x181A): temperature °C × 100, pressure
/// kPa × 100, humidity %RH × 100, all `sint16` read/notify.
pub struct EnvironmentalSensingService {
    temperature: EnvCharacteristic,
    pressure: EnvCharacteristic,
    humidity: EnvCharacteristic,
}

pub enum EnvironmentalSensingServiceEvent {
    TemperatureCccdWrite { notifications: bool },
    PressureCccdWrite { notifications: bool },
    HumidityCccdWrite { notifications: bool },
}

impl EnvironmentalSensingService {
    pub fn new(sd: &mut Softdevice) -> Result<Self, RegisterError> {
        let mut service = ServiceBuilder::new(sd, Uuid::new_16(ESS_UUID))?;
        let temperature =
            EnvCharacteristic::register(&mut service, TEMPERATURE_UUID, AttributeHandle::Temperature)?;
        let pressure =
            EnvCharacteristic::register(&mut service, PRESSURE_UUID, AttributeHandle::Pressure)?;
        let humidity =
            EnvCharacteristic::register(&mut service, HUMIDITY_UUID, AttributeHandle::Humidity)?;
        let _ = service.build();

        Ok(Self {
            temperature,
            pressure,
            humidity,
        })
    }

    fn characteristic(&self, handle: AttributeHandle) -> Option<&EnvCharacteristic> {
        match handle {
            AttributeHandle::Temperature => Some(&self.temperature),
            AttributeHandle::Pressure => Some(&self.pressure),
            AttributeHandle::Humidity => Some(&self.humidity),
            _ => None,
        }
    }
}

impl Service for EnvironmentalSensingService {
    type Event = EnvironmentalSensingServiceEvent;

    fn on_write(&self, handle: u16, data: &[u8]) -> Option<Self::Event> {
        let notifications = data.first().map_or(false, |b| b & 0x01 != 0);
        if handle == self.temperature.cccd {
            Some(EnvironmentalSensingServiceEvent::TemperatureCccdWrite { notifications })
        } else if handle == self.pressure.cccd {
            Some(EnvironmentalSensingServiceEvent::PressureCccdWrite { notifications })
        } else if handle == self.humidity.cccd {
            Some(EnvironmentalSensingServiceEvent::HumidityCccdWrite { notifications })
        } else {
            None
        }
    }
}

#[nrf_softdevice::gatt_service(uuid = "180f")]
pub struct BatteryService {
    #[characteristic(uuid = "2a19", read, notify)]
    pub battery_level: u8,
}

#[nrf_softdevice::gatt_server]
pub struct Server {
    pub aios: AutomationIoService,
    pub ess: EnvironmentalSensingService,
    pub bas: BatteryService,
}

/// Register the services and load their initial values.
pub fn init(sd: &mut Softdevice, table: &AttributeTable) -> Result<Server, TransportError> {
    let server = Server::new(sd).map_err(|_| TransportError::Init)?;
    if let Err(e) = server.aios.number_of_digitals_set(&NUM_OF_DIGITALS) {
        warn!("Number of digitals not stored ({:?})", e);
    }
    sync_all(&server, table);
    info!("GATT server registered");
    Ok(server)
}

/// Mirror every cached value into the SoftDevice.
pub fn sync_all(server: &Server, table: &AttributeTable) {
    sync_digital(server, table);
    sync_battery(server, table);
    sync_environmental(server, table);
}

pub fn sync_digital(server: &Server, table: &AttributeTable) {
    if let Err(e) = server.aios.digital_set(&table.digital_output()) {
        warn!("Digital value not stored ({:?})", e);
    }
}

pub fn sync_battery(server: &Server, table: &AttributeTable) {
    if let Err(e) = server.bas.battery_level_set(&table.battery_level()) {
        warn!("Battery level not stored ({:?})", e);
    }
}

pub fn sync_environmental(server: &Server, table: &AttributeTable) {
    for handle in AttributeHandle::ENVIRONMENTAL {
        let (Some(value), Some(characteristic)) =
            (table.environmental(handle), server.ess.characteristic(handle))
        else {
            continue;
        };
        if let Err(e) = characteristic.set(value) {
            warn!("{} not stored ({:?})", handle.name(), e);
        }
    }
}

/// Apply one server event from `peer` to the table.
pub fn on_event<O: DigitalOutputs>(
    server: &Server,
    table: &mut AttributeTable,
    outputs: &mut O,
    peer: PeerId,
    event: ServerEvent,
) {
    match event {
        ServerEvent::Aios(AutomationIoServiceEvent::DigitalWrite(value)) => {
            if let Err(e) = table.write(AttributeHandle::DigitalOutput, 0, &[value], outputs) {
                warn!(
                    "Digital write from peer {} rejected (ATT {=u8:#x})",
                    peer,
                    AttError::from(e).code()
                );
                // The stack has already stored the written byte.
                sync_digital(server, table);
            }
        }
        ServerEvent::Ess(EnvironmentalSensingServiceEvent::TemperatureCccdWrite {
            notifications,
        }) => subscribe(table, AttributeHandle::Temperature, peer, notifications),
        ServerEvent::Ess(EnvironmentalSensingServiceEvent::PressureCccdWrite {
            notifications,
        }) => subscribe(table, AttributeHandle::Pressure, peer, notifications),
        ServerEvent::Ess(EnvironmentalSensingServiceEvent::HumidityCccdWrite {
            notifications,
        }) => subscribe(table, AttributeHandle::Humidity, peer, notifications),
        ServerEvent::Bas(BatteryServiceEvent::BatteryLevelCccdWrite { notifications }) => {
            subscribe(table, AttributeHandle::BatteryLevel, peer, notifications)
        }
    }
}

fn subscribe(table: &mut AttributeTable, handle: AttributeHandle, peer: PeerId, enabled: bool) {
    if let Err(e) = table.set_subscription(handle, peer, enabled) {
        warn!("{} subscription change refused ({:?})", handle.name(), e);
    }
}

fn le_i16(value: &[u8]) -> Result<i16, TransportError> {
    match value {
        [lo, hi] => Ok(i16::from_le_bytes([*lo, *hi])),
        _ => Err(TransportError::NotifyFailed),
    }
}

/// Sends notifications to live connections looked up by handle.
///
/// Without a server (GATT registration failed) every notification fails;
/// nobody can be subscribed then anyway.
pub struct GattNotifier<'a> {
    server: Option<&'a Server>,
}

impl<'a> GattNotifier<'a> {
    pub fn new(server: Option<&'a Server>) -> Self {
        Self { server }
    }
}

impl Notifier for GattNotifier<'_> {
    fn notify(
        &mut self,
        peer: PeerId,
        handle: AttributeHandle,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let server = self.server.ok_or(TransportError::NotifyFailed)?;
        let conn = Connection::from_handle(peer).ok_or(TransportError::NotifyFailed)?;
        let result = match handle {
            AttributeHandle::BatteryLevel => {
                let level = value.first().ok_or(TransportError::NotifyFailed)?;
                server.bas.battery_level_notify(&conn, level)
            }
            _ => {
                let characteristic = server
                    .ess
                    .characteristic(handle)
                    .ok_or(TransportError::NotifyFailed)?;
                characteristic.notify(&conn, le_i16(value)?)
            }
        };
        result.map_err(|_| TransportError::NotifyFailed)
    }
}
