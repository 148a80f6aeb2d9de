//! BH1750 ambient light sensor over I2C.

use std::cell::RefCell;
use std::rc::Rc;
use std::{thread, time::Duration};

use rppal::i2c::I2c;

use crate::sensors::{LightMeter, SensorFault};

/// One-time high-resolution mode: 1 lx resolution, powers down afterwards.
const ONE_TIME_HIGH_RES: u8 = 0x20;

/// Worst-case measurement time in high-resolution mode.
const MEASUREMENT_WAIT: Duration = Duration::from_millis(180);

/// Counts per lux at the default measurement time.
const COUNTS_PER_LUX: f64 = 1.2;

fn counts_to_lux(buf: [u8; 2]) -> f64 {
    f64::from(u16::from_be_bytes(buf)) / COUNTS_PER_LUX
}

pub struct Bh1750 {
    bus: Rc<RefCell<I2c>>,
    addr: u16,
}

impl Bh1750 {
    pub fn new(bus: Rc<RefCell<I2c>>, addr: u16) -> Self {
        tracing::info!(addr = format_args!("0x{addr:02x}"), "bh1750 initialised");
        Self { bus, addr }
    }

    fn measure(&self) -> rppal::i2c::Result<[u8; 2]> {
        let mut i2c = self.bus.borrow_mut();
        i2c.set_slave_address(self.addr)?;
        i2c.write(&[ONE_TIME_HIGH_RES])?;
        thread::sleep(MEASUREMENT_WAIT);
        let mut buf = [0u8; 2];
        i2c.read(&mut buf)?;
        Ok(buf)
    }
}

impl LightMeter for Bh1750 {
    fn read_lux(&mut self) -> Result<f64, SensorFault> {
        self.measure()
            .map(counts_to_lux)
            .map_err(|e| SensorFault::new(format!("bh1750: {e}")))
    }
}
