//! envnode firmware entry point.
//!
//! Brings up the SoftDevice, the GATT server and the three services
//! (Automation IO, Environmental Sensing, Battery), then hands each
//! concern to its own Embassy task. A service that fails to start is
//! logged and skipped; the others keep running.

#![no_std]
#![no_main]

mod battery;
mod ble;
mod outputs;
mod sensor;

use core::cell::RefCell;
use core::mem;

use defmt::{error, info, unwrap};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_nrf::gpio::{Input, Level, Output, OutputDrive, Pull};
use embassy_nrf::interrupt::{self, InterruptExt, Priority};
use embassy_nrf::saadc::{self, ChannelConfig, Saadc};
use embassy_nrf::twim::{self, Twim};
use embassy_nrf::{bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::Mutex;
use envnode::attributes::AttributeTable;
use envnode::config;
use envnode::hal::ChargerProbe;
use envnode::sensor::sampling::{environmental_service_start, SamplingPipeline};
use nrf_softdevice::{raw, Softdevice};
use panic_probe as _;
use static_cell::StaticCell;

use crate::battery::{BatteryHw, ChargerPin};
use crate::ble::server::Server;
use crate::ble::SharedTable;
use crate::outputs::LedOutputs;
use crate::sensor::Bme280;

bind_interrupts!(struct Irqs {
    SPIM0_SPIS0_TWIM0_TWIS0_SPI0_TWI0 => twim::InterruptHandler<peripherals::TWISPI0>;
    SAADC => saadc::InterruptHandler;
});

type SensorBus = Twim<'static, peripherals::TWISPI0>;

static ATTRIBUTES: SharedTable = Mutex::new(RefCell::new(AttributeTable::new()));
static SERVER: StaticCell<Server> = StaticCell::new();

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::task]
async fn ble_task(sd: &'static Softdevice, server: &'static Server, outputs: LedOutputs<'static>) -> ! {
    let mut outputs = outputs;
    ble::peripheral::run(sd, server, &ATTRIBUTES, &mut outputs).await
}

#[embassy_executor::task]
async fn sampling_task(
    sensor: Bme280<SensorBus>,
    pipeline: SamplingPipeline,
    server: Option<&'static Server>,
) -> ! {
    sensor::sampling_task(sensor, pipeline, server, &ATTRIBUTES).await
}

#[embassy_executor::task]
async fn battery_task(hw: BatteryHw<'static>, charging: bool, server: Option<&'static Server>) -> ! {
    battery::battery_task(hw, charging, server, &ATTRIBUTES).await
}

#[embassy_executor::task]
async fn charger_task(charger: ChargerPin<'static>) -> ! {
    let mut charger = charger;
    charger.watch().await
}

fn softdevice_config() -> nrf_softdevice::Config {
    nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_XTAL as u8,
            rc_ctiv: 0,
            rc_temp_ctiv: 0,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_20_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: 64 }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 1,
            central_role_count: 0,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: config::DEVICE_NAME.as_ptr() as _,
            current_len: config::DEVICE_NAME.len() as u16,
            max_len: config::DEVICE_NAME.len() as u16,
            write_perm: unsafe { mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(
                raw::BLE_GATTS_VLOC_STACK as u8,
            ),
        }),
        ..Default::default()
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("envnode starting");

    // SoftDevice reserves priorities 0, 1 and 4.
    let mut nrf_config = embassy_nrf::config::Config::default();
    nrf_config.gpiote_interrupt_priority = Priority::P2;
    nrf_config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(nrf_config);
    interrupt::SPIM0_SPIS0_TWIM0_TWIS0_SPI0_TWI0.set_priority(Priority::P3);
    interrupt::SAADC.set_priority(Priority::P3);

    // Bluetooth + Automation IO
    let sd = Softdevice::enable(&softdevice_config());
    let server = ATTRIBUTES.lock(|t| ble::server::init(sd, &t.borrow()));
    let sd: &'static Softdevice = sd;
    unwrap!(spawner.spawn(softdevice_task(sd)));

    let server: Option<&'static Server> = match server {
        Ok(server) => {
            let server: &'static Server = SERVER.init(server);
            let outputs = LedOutputs::new([
                Output::new(p.P0_13, Level::High, OutputDrive::Standard),
                Output::new(p.P0_14, Level::High, OutputDrive::Standard),
                Output::new(p.P0_15, Level::High, OutputDrive::Standard),
            ]);
            unwrap!(spawner.spawn(ble_task(sd, server, outputs)));
            Some(server)
        }
        Err(e) => {
            // Sensing keeps running locally without a GATT server.
            error!("Bluetooth initialization failed ({:?})", e);
            None
        }
    };

    // Battery
    let charger = ChargerPin::new(Input::new(p.P0_17, Pull::Up));
    let charging = charger.is_charger_connected();
    info!("Charger {}", if charging { "connected" } else { "disconnected" });
    unwrap!(spawner.spawn(charger_task(charger)));

    let adc = Saadc::new(
        p.SAADC,
        Irqs,
        saadc::Config::default(),
        [ChannelConfig::single_ended(p.P0_04)],
    );
    let fast_charge = Output::new(p.P0_16, Level::High, OutputDrive::Standard);
    match battery::battery_service_start(adc, fast_charge).await {
        Ok(hw) => unwrap!(spawner.spawn(battery_task(hw, charging, server))),
        Err(e) => error!("Failed to start battery service ({:?})", e),
    }

    // Environmental sensing
    let bus = Twim::new(p.TWISPI0, Irqs, p.P0_26, p.P0_27, twim::Config::default());
    let bme = Bme280::new(bus, config::BME280_I2C_ADDR);
    match environmental_service_start(&bme) {
        Ok(pipeline) => unwrap!(spawner.spawn(sampling_task(bme, pipeline, server))),
        Err(e) => error!("Failed to start environmental service ({:?})", e),
    }
}
