//! ADS1115 16-bit ADC over I2C, one [`AdcProbe`] per soil sensor.
//!
//! Single-ended reads at PGA ±4.096 V, 128 SPS, single-shot mode, converted
//! to volts for the calibration step.

use std::cell::RefCell;
use std::rc::Rc;
use std::{thread, time::Duration};

use rppal::i2c::I2c;

use crate::sensors::{SensorFault, SoilProbe};

// ── ADS1115 register addresses ──────────────────────────────────────────────

/// Conversion result register (read-only, 16-bit signed).
const REG_CONVERSION: u8 = 0x00;
/// Configuration register (read/write).
const REG_CONFIG: u8 = 0x01;

// ── Config register bit fields ──────────────────────────────────────────────
//
// Layout (MSB first):
//   [15]    OS       write 1 to start single-shot conversion
//   [14:12] MUX      input multiplexer (channel selection)
//   [11:9]  PGA      programmable gain amplifier
//   [8]     MODE     0 = continuous, 1 = single-shot
//   [7:5]   DR       data rate
//   [4:2]   COMP_*   comparator mode / polarity / latch
//   [1:0]   COMP_QUE 11 = comparator off

/// OS=1, PGA=001 (±4.096 V), MODE=1, DR=100 (128 SPS), COMP_QUE=11.
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

const MUX_SHIFT: u8 = 12;
/// AIN0..AIN3 against GND.
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

/// Highest single-ended input index.
pub const MAX_CHANNEL: u8 = 3;

/// Full-scale range for the PGA setting above.
const FULL_SCALE_VOLTS: f64 = 4.096;

/// ~7.8 ms per conversion at 128 SPS.
const CONVERSION_WAIT: Duration = Duration::from_millis(9);

/// Bit 15 of the config register reads back 1 once the conversion is done.
const OS_READY_BIT: u16 = 1 << 15;

fn config_for_channel(channel: u8) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[usize::from(channel)] << MUX_SHIFT)
}

/// Raw conversion result to volts.  Negative codes (bus noise on a
/// single-ended input) read as 0 V.
fn raw_to_volts(raw: i16) -> f64 {
    f64::from(raw.max(0)) * FULL_SCALE_VOLTS / 32768.0
}

// ── Driver ──────────────────────────────────────────────────────────────────

/// One ADS1115 input wired to a soil probe.  Probes on the same bus share the
/// `I2c` handle.
pub struct AdcProbe {
    bus: Rc<RefCell<I2c>>,
    addr: u16,
    channel: u8,
}

impl AdcProbe {
    pub fn new(bus: Rc<RefCell<I2c>>, addr: u16, channel: u8) -> anyhow::Result<Self> {
        anyhow::ensure!(
            channel <= MAX_CHANNEL,
            "ADS1115 channel {channel} out of range (0-{MAX_CHANNEL})"
        );
        tracing::info!(
            addr = format_args!("0x{addr:02x}"),
            channel,
            "ads1115 probe initialised"
        );
        Ok(Self { bus, addr, channel })
    }

    fn read_raw(&self) -> rppal::i2c::Result<i16> {
        let mut i2c = self.bus.borrow_mut();
        i2c.set_slave_address(self.addr)?;

        i2c.block_write(REG_CONFIG, &config_for_channel(self.channel).to_be_bytes())?;
        thread::sleep(CONVERSION_WAIT);

        for _ in 0..3 {
            let mut buf = [0u8; 2];
            i2c.block_read(REG_CONFIG, &mut buf)?;
            if u16::from_be_bytes(buf) & OS_READY_BIT != 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let mut buf = [0u8; 2];
        i2c.block_read(REG_CONVERSION, &mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }
}

impl SoilProbe for AdcProbe {
    fn read_voltage(&mut self) -> Result<f64, SensorFault> {
        self.read_raw()
            .map(raw_to_volts)
            .map_err(|e| SensorFault::new(format!("ads1115 ch{}: {e}", self.channel)))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
