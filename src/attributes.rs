//! GATT attribute access layer.
//!
//! Owns the cached characteristic values and the per-peer subscription
//! table, validates peer read/write requests, and translates digital
//! output writes into line changes through the hardware facade.
//!
//! Digital output layout (Automation IO "Digital" characteristic, two
//! bits per digital, low bit = state):
//! ```text
//! Bit 0 -> line 0
//! Bit 2 -> line 1
//! Bit 4 -> line 2
//! ```

use heapless::Vec;

use crate::config::{MAX_PEERS, NUM_OF_DIGITALS};
use crate::error::{Error, TransportError};
use crate::hal::DigitalOutputs;

/// Connection handle identifying a peer.
pub type PeerId = u16;

/// Largest attribute value width in bytes.
pub const MAX_VALUE_LEN: usize = 2;

/// Bytes returned by a read request.
pub type AttributeBytes = Vec<u8, MAX_VALUE_LEN>;

/// Written-byte bit mask -> physical line.
pub const DIGITAL_LINE_MAP: [(u8, u8); NUM_OF_DIGITALS as usize] =
    [(0x01, 0), (0x04, 1), (0x10, 2)];

/// Identity of one exposed value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttributeHandle {
    /// Automation IO digital output mask (read/write).
    DigitalOutput,
    /// Automation IO number of digitals (read-only constant).
    NumberOfDigitals,
    /// Battery level in percent (read/notify).
    BatteryLevel,
    /// Temperature, 0.01 °C (read/notify).
    Temperature,
    /// Pressure, 0.01 kPa (read/notify).
    Pressure,
    /// Relative humidity, 0.01 % (read/notify).
    Humidity,
}

impl AttributeHandle {
    /// Environmental Sensing characteristics, in notification order.
    pub const ENVIRONMENTAL: [AttributeHandle; 3] = [
        AttributeHandle::Temperature,
        AttributeHandle::Pressure,
        AttributeHandle::Humidity,
    ];

    /// Value width in bytes.
    pub const fn width(self) -> usize {
        match self {
            AttributeHandle::DigitalOutput
            | AttributeHandle::NumberOfDigitals
            | AttributeHandle::BatteryLevel => 1,
            AttributeHandle::Temperature | AttributeHandle::Pressure | AttributeHandle::Humidity => {
                2
            }
        }
    }

    /// Whether the characteristic carries a CCCD.
    pub const fn is_notifiable(self) -> bool {
        matches!(
            self,
            AttributeHandle::BatteryLevel
                | AttributeHandle::Temperature
                | AttributeHandle::Pressure
                | AttributeHandle::Humidity
        )
    }

    pub const fn name(self) -> &'static str {
        match self {
            AttributeHandle::DigitalOutput => "Digital",
            AttributeHandle::NumberOfDigitals => "Number of digitals",
            AttributeHandle::BatteryLevel => "Battery level",
            AttributeHandle::Temperature => "Temperature",
            AttributeHandle::Pressure => "Pressure",
            AttributeHandle::Humidity => "Humidity",
        }
    }

    /// Characteristic Presentation Format of the environmental values.
    pub const fn presentation_format(self) -> Option<PresentationFormat> {
        match self {
            // 0.01 °C
            AttributeHandle::Temperature => Some(PresentationFormat::outside_sint16(-2, 0x272F)),
            // 10 Pa (0.01 kPa)
            AttributeHandle::Pressure => Some(PresentationFormat::outside_sint16(1, 0x2724)),
            // 0.01 %
            AttributeHandle::Humidity => Some(PresentationFormat::outside_sint16(-2, 0x27AD)),
            _ => None,
        }
    }

    const fn subscription_bit(self) -> u8 {
        match self {
            AttributeHandle::DigitalOutput => 1 << 0,
            AttributeHandle::NumberOfDigitals => 1 << 1,
            AttributeHandle::BatteryLevel => 1 << 2,
            AttributeHandle::Temperature => 1 << 3,
            AttributeHandle::Pressure => 1 << 4,
            AttributeHandle::Humidity => 1 << 5,
        }
    }
}

/// Characteristic Presentation Format descriptor (0x2904) value.
///
/// Value = raw × 10^exponent in `unit`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PresentationFormat {
    pub format: u8,
    pub exponent: i8,
    pub unit: u16,
    pub name_space: u8,
    pub description: u16,
}

impl PresentationFormat {
    pub const UUID: u16 = 0x2904;
    pub const LEN: usize = 7;

    const FORMAT_SINT16: u8 = 0x0E;
    const NAMESPACE_BT_SIG: u8 = 0x01;
    const DESCRIPTION_OUTSIDE: u16 = 0x010C;

    const fn outside_sint16(exponent: i8, unit: u16) -> Self {
        Self {
            format: Self::FORMAT_SINT16,
            exponent,
            unit,
            name_space: Self::NAMESPACE_BT_SIG,
            description: Self::DESCRIPTION_OUTSIDE,
        }
    }

    /// Descriptor value as stored in the attribute table.
    pub const fn to_bytes(self) -> [u8; 7] {
        let unit = self.unit.to_le_bytes();
        let description = self.description.to_le_bytes();
        [
            self.format,
            self.exponent as u8,
            unit[0],
            unit[1],
            self.name_space,
            description[0],
            description[1],
        ]
    }
}

/// Push channel towards connected peers (implemented over the GATT server).
pub trait Notifier {
    fn notify(
        &mut self,
        peer: PeerId,
        handle: AttributeHandle,
        value: &[u8],
    ) -> Result<(), TransportError>;
}

#[derive(Clone, Copy, Debug)]
struct Subscription {
    peer: PeerId,
    mask: u8,
}

/// Cached characteristic values + subscription table.
pub struct AttributeTable {
    digital_output: u8,
    battery_level: u8,
    temperature: i16,
    pressure: i16,
    humidity: i16,
    subscriptions: Vec<Subscription, MAX_PEERS>,
}

impl Default for AttributeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeTable {
    pub const fn new() -> Self {
        Self {
            digital_output: 0,
            battery_level: 0,
            temperature: 0,
            pressure: 0,
            humidity: 0,
            subscriptions: Vec::new(),
        }
    }

    fn value_bytes(&self, handle: AttributeHandle) -> AttributeBytes {
        let mut out = AttributeBytes::new();
        // Capacity is MAX_VALUE_LEN and every value fits.
        let _ = match handle {
            AttributeHandle::DigitalOutput => out.extend_from_slice(&[self.digital_output]),
            AttributeHandle::NumberOfDigitals => out.extend_from_slice(&[NUM_OF_DIGITALS]),
            AttributeHandle::BatteryLevel => out.extend_from_slice(&[self.battery_level]),
            AttributeHandle::Temperature => out.extend_from_slice(&self.temperature.to_le_bytes()),
            AttributeHandle::Pressure => out.extend_from_slice(&self.pressure.to_le_bytes()),
            AttributeHandle::Humidity => out.extend_from_slice(&self.humidity.to_le_bytes()),
        };
        out
    }

    /// Serve a peer read request.
    ///
    /// Returns the little-endian value from `offset` on; an offset equal to
    /// the width yields an empty value, anything past it is rejected.
    pub fn read(&self, handle: AttributeHandle, offset: usize) -> Result<AttributeBytes, Error> {
        let full = self.value_bytes(handle);
        if offset > full.len() {
            return Err(Error::InvalidOffset);
        }
        let mut out = AttributeBytes::new();
        let _ = out.extend_from_slice(&full[offset..]);
        Ok(out)
    }

    /// Serve a peer write request.
    ///
    /// Every check runs before the first line is driven. A drive failure
    /// rejects the request but lines already switched stay switched.
    pub fn write<O: DigitalOutputs>(
        &mut self,
        handle: AttributeHandle,
        offset: usize,
        payload: &[u8],
        outputs: &mut O,
    ) -> Result<(), Error> {
        if handle != AttributeHandle::DigitalOutput {
            return Err(Error::WriteNotPermitted);
        }
        if offset != 0 {
            return Err(Error::InvalidOffset);
        }
        if payload.len() != handle.width() {
            return Err(Error::InvalidLength);
        }

        let state = payload[0];
        self.digital_output = state;

        for (mask, line) in DIGITAL_LINE_MAP {
            let on = state & mask != 0;
            if let Err(e) = outputs.set_line(line, on) {
                error!("Digital{} drive failed: {:?}", line, e);
                return Err(e.into());
            }
            info!("Digital{} is {}", line, if on { "On" } else { "Off" });
        }

        Ok(())
    }

    pub fn digital_output(&self) -> u8 {
        self.digital_output
    }

    pub fn battery_level(&self) -> u8 {
        self.battery_level
    }

    pub fn set_battery_level(&mut self, percentage: u8) {
        self.battery_level = percentage;
    }

    /// Cached environmental value (`None` for non-environmental handles).
    pub fn environmental(&self, handle: AttributeHandle) -> Option<i16> {
        match handle {
            AttributeHandle::Temperature => Some(self.temperature),
            AttributeHandle::Pressure => Some(self.pressure),
            AttributeHandle::Humidity => Some(self.humidity),
            _ => None,
        }
    }

    /// Replace a cached environmental value. Other handles are ignored.
    pub fn set_environmental(&mut self, handle: AttributeHandle, value: i16) {
        match handle {
            AttributeHandle::Temperature => self.temperature = value,
            AttributeHandle::Pressure => self.pressure = value,
            AttributeHandle::Humidity => self.humidity = value,
            _ => {}
        }
    }

    /// Peer wrote the CCCD of `handle`.
    pub fn set_subscription(
        &mut self,
        handle: AttributeHandle,
        peer: PeerId,
        enabled: bool,
    ) -> Result<(), Error> {
        if !handle.is_notifiable() {
            return Err(Error::WriteNotPermitted);
        }

        info!(
            "{} notifications {} (peer {})",
            handle.name(),
            if enabled { "enabled" } else { "disabled" },
            peer
        );

        let bit = handle.subscription_bit();
        if let Some(pos) = self.subscriptions.iter().position(|s| s.peer == peer) {
            let entry = &mut self.subscriptions[pos];
            if enabled {
                entry.mask |= bit;
            } else {
                entry.mask &= !bit;
            }
            if entry.mask == 0 {
                self.subscriptions.swap_remove(pos);
            }
            return Ok(());
        }

        if enabled && self.subscriptions.push(Subscription { peer, mask: bit }).is_err() {
            warn!("Subscription table full - ignoring peer {}", peer);
        }
        Ok(())
    }

    pub fn is_subscribed(&self, handle: AttributeHandle, peer: PeerId) -> bool {
        self.subscriptions
            .iter()
            .any(|s| s.peer == peer && s.mask & handle.subscription_bit() != 0)
    }

    /// Peers with notifications enabled for `handle`.
    pub fn subscribers(&self, handle: AttributeHandle) -> impl Iterator<Item = PeerId> + '_ {
        let bit = handle.subscription_bit();
        self.subscriptions
            .iter()
            .filter(move |s| s.mask & bit != 0)
            .map(|s| s.peer)
    }

    /// Forget every subscription held by a disconnected peer.
    pub fn drop_peer(&mut self, peer: PeerId) {
        self.subscriptions.retain(|s| s.peer != peer);
    }

    /// Push the cached value of `handle` to every subscribed peer.
    ///
    /// Returns the number of notifications queued. Failures are logged
    /// per peer and never abort the remaining peers.
    pub fn notify_subscribers<N: Notifier>(&self, handle: AttributeHandle, notifier: &mut N) -> usize {
        let value = self.value_bytes(handle);
        let mut sent = 0;
        for peer in self.subscribers(handle) {
            match notifier.notify(peer, handle, &value) {
                Ok(()) => sent += 1,
                Err(e) => warn!("{} notify to peer {} failed: {:?}", handle.name(), peer, e),
            }
        }
        sent
    }
}
