//! Battery management: SAADC voltage sense, charger status and fast charge.

use defmt::{error, info};
use embassy_futures::select::{select, Either};
use embassy_nrf::gpio::{Input, Output};
use embassy_nrf::saadc::Saadc;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Ticker};
use envnode::battery::curve::{read_divider, LipoGauge};
use envnode::battery::filter::BatteryMonitor;
use envnode::config::BATTERY_SAMPLING_INTERVAL_MS;
use envnode::error::{Error, HardwareError};
use envnode::hal::ChargerProbe;

use crate::ble::server::{self, GattNotifier, Server};
use crate::ble::SharedTable;

static CHARGER_SIGNAL: Signal<CriticalSectionRawMutex, bool> = Signal::new();

/// Charger presence changes, latest value wins.
pub fn charger_signal() -> &'static Signal<CriticalSectionRawMutex, bool> {
    &CHARGER_SIGNAL
}

/// Charger STAT output (active low while charging).
pub struct ChargerPin<'d> {
    stat: Input<'d>,
}

impl<'d> ChargerPin<'d> {
    pub fn new(stat: Input<'d>) -> Self {
        Self { stat }
    }

    /// Publish every presence change.
    pub async fn watch(&mut self) -> ! {
        loop {
            self.stat.wait_for_any_edge().await;
            CHARGER_SIGNAL.signal(self.is_charger_connected());
        }
    }
}

impl ChargerProbe for ChargerPin<'_> {
    fn is_charger_connected(&self) -> bool {
        self.stat.is_low()
    }
}

pub struct BatteryHw<'d> {
    saadc: Saadc<'d, 1>,
    _fast_charge: Output<'d>,
}

impl BatteryHw<'_> {
    async fn read_millivolt(&mut self) -> Result<u16, HardwareError> {
        let mut buf = [0i16; 1];
        self.saadc.sample(&mut buf).await;
        read_divider(buf[0])
    }
}

/// Bring up battery sensing.
///
/// Calibrates the ADC, enables fast charge and checks that the divider
/// reads a voltage. Failure leaves the other services unaffected.
pub async fn battery_service_start<'d>(
    mut saadc: Saadc<'d, 1>,
    mut fast_charge: Output<'d>,
) -> Result<BatteryHw<'d>, Error> {
    saadc.calibrate().await;

    // Active low: 100 mA instead of 50 mA.
    fast_charge.set_low();

    let mut hw = BatteryHw {
        saadc,
        _fast_charge: fast_charge,
    };
    let mv = match hw.read_millivolt().await {
        Ok(mv) => mv,
        Err(e) => {
            error!("Failed to initialize battery management (no voltage on divider)");
            return Err(Error::Hardware(e));
        }
    };

    info!(
        "Battery sampling every {} ms, first reading {} mV",
        BATTERY_SAMPLING_INTERVAL_MS, mv
    );
    Ok(hw)
}

/// Sample the battery and react to charger changes forever.
pub async fn battery_task(
    mut hw: BatteryHw<'static>,
    charging: bool,
    server: Option<&'static Server>,
    table: &'static SharedTable,
) -> ! {
    let mut monitor = BatteryMonitor::new(charging);
    let mut ticker = Ticker::every(Duration::from_millis(BATTERY_SAMPLING_INTERVAL_MS));

    loop {
        match select(ticker.next(), CHARGER_SIGNAL.wait()).await {
            Either::First(()) => {
                let mv = match hw.read_millivolt().await {
                    Ok(mv) => mv,
                    Err(e) => {
                        error!("Failed to read battery voltage ({:?})", e);
                        continue;
                    }
                };
                table.lock(|t| {
                    let mut t = t.borrow_mut();
                    monitor.on_sample(mv, &LipoGauge, &mut t, &mut GattNotifier::new(server));
                    if let Some(server) = server {
                        server::sync_battery(server, &t);
                    }
                });
            }
            Either::Second(connected) => monitor.on_charger_change(connected),
        }
    }
}
