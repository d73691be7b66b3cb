//! Digital output lines (board LEDs, active low).

use embassy_nrf::gpio::Output;
use envnode::config::NUM_OF_DIGITALS;
use envnode::error::HardwareError;
use envnode::hal::DigitalOutputs;

pub struct LedOutputs<'d> {
    lines: [Output<'d>; NUM_OF_DIGITALS as usize],
}

impl<'d> LedOutputs<'d> {
    pub fn new(lines: [Output<'d>; NUM_OF_DIGITALS as usize]) -> Self {
        Self { lines }
    }
}

impl DigitalOutputs for LedOutputs<'_> {
    fn set_line(&mut self, line: u8, on: bool) -> Result<(), HardwareError> {
        let pin = self
            .lines
            .get_mut(usize::from(line))
            .ok_or(HardwareError::OutputDrive)?;
        if on {
            pin.set_low();
        } else {
            pin.set_high();
        }
        Ok(())
    }
}
