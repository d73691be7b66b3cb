//! BME280 environmental sensor on TWIM and the sampling task.
//!
//! Bus transfers use the blocking `embedded_hal::i2c::I2c` API so a
//! burst read finishes before the cycle goes on to decode it.

use defmt::{error, info, warn};
use embassy_time::Timer;
use embedded_hal::i2c::I2c;
use envnode::error::HardwareError;
use envnode::hal::{Channel, EnvironmentSensor, FixedPointSample, RawBuffer};
use envnode::sensor::bme280::{self, Calibration, CALIB_00_LEN, CALIB_26_LEN, MEASUREMENT_LEN};
use envnode::sensor::sampling::SamplingPipeline;

use crate::ble::server::{self, GattNotifier, Server};
use crate::ble::SharedTable;

pub struct Bme280<I2C> {
    i2c: I2C,
    address: u8,
    ready: bool,
    calibration: Option<Calibration>,
}

impl<I2C: I2c> Bme280<I2C> {
    /// Probe and configure the sensor. A missing device leaves it not ready.
    pub fn new(i2c: I2C, address: u8) -> Self {
        let mut dev = Self {
            i2c,
            address,
            ready: false,
            calibration: None,
        };
        match dev.configure() {
            Ok(()) => {
                dev.ready = true;
                info!("BME280 ready at {=u8:#x}", address);
            }
            Err(e) => error!("BME280 not found at {=u8:#x} ({:?})", address, e),
        }
        dev
    }

    fn configure(&mut self) -> Result<(), HardwareError> {
        let mut id = [0u8; 1];
        self.read_regs(bme280::REG_CHIP_ID, &mut id)?;
        if id[0] != bme280::CHIP_ID {
            warn!("Unexpected chip id {=u8:#x}", id[0]);
            return Err(HardwareError::SensorRead);
        }

        // ctrl_hum only latches on the following ctrl_meas write.
        self.write_reg(bme280::REG_CTRL_HUM, bme280::CTRL_HUM_OSRS_1)?;
        self.write_reg(bme280::REG_CONFIG, bme280::CONFIG_STANDBY_1000MS)?;
        self.write_reg(bme280::REG_CTRL_MEAS, bme280::CTRL_MEAS_NORMAL)?;

        self.calibration = self.load_calibration().ok();
        Ok(())
    }

    fn load_calibration(&mut self) -> Result<Calibration, HardwareError> {
        let mut calib00 = [0u8; CALIB_00_LEN];
        let mut calib26 = [0u8; CALIB_26_LEN];
        self.read_regs(bme280::REG_CALIB_00, &mut calib00)
            .and_then(|()| self.read_regs(bme280::REG_CALIB_26, &mut calib26))
            .map_err(|_| HardwareError::Calibration)?;
        Ok(Calibration::parse(&calib00, &calib26))
    }

    fn read_regs(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), HardwareError> {
        let reg = [reg];
        self.i2c
            .write_read(self.address, &reg, buf)
            .map_err(|_| HardwareError::SensorRead)
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), HardwareError> {
        let frame = [reg, value];
        self.i2c
            .write(self.address, &frame)
            .map_err(|_| HardwareError::SensorRead)
    }
}

impl<I2C: I2c> EnvironmentSensor for Bme280<I2C> {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn read_burst(&mut self, buf: &mut RawBuffer) -> Result<(), HardwareError> {
        self.read_regs(bme280::REG_PRESS_MSB, &mut buf[..MEASUREMENT_LEN])
    }

    fn refresh_decoder(&mut self) -> Result<(), HardwareError> {
        if self.calibration.is_none() {
            self.calibration = Some(
                self.load_calibration()
                    .map_err(|_| HardwareError::Decoder)?,
            );
        }
        Ok(())
    }

    fn decode(&self, buf: &RawBuffer, channel: Channel) -> Result<FixedPointSample, HardwareError> {
        let cal = self.calibration.as_ref().ok_or(HardwareError::Decoder)?;
        bme280::decode(cal, buf, channel)
    }
}

/// Run the sampling pipeline forever.
pub async fn sampling_task<S: EnvironmentSensor>(
    mut sensor: S,
    mut pipeline: SamplingPipeline,
    server: Option<&'static Server>,
    table: &'static SharedTable,
) -> ! {
    let mut delay_ms = pipeline.interval_ms();
    loop {
        Timer::after_millis(delay_ms).await;

        // Bus traffic stays outside the critical section.
        let report = match pipeline.sample(&mut sensor) {
            Ok(record) => table.lock(|t| {
                let mut t = t.borrow_mut();
                let report = pipeline.publish(record, &mut t, &mut GattNotifier::new(server));
                if let Some(server) = server {
                    server::sync_environmental(server, &t);
                }
                report
            }),
            Err(report) => report,
        };

        delay_ms = report.next_in_ms;
    }
}
