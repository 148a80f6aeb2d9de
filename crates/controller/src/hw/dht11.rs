//! DHT11 humidity / temperature sensor, bit-banged on one GPIO line.
//!
//! ```text
//! host:   ▔▔╲____18ms____╱▔▔ release
//! sensor:                    ╲_80µs_╱▔80µs▔╲ then 40 bits:
//!                                           ╲_50µs_╱▔ 26µs = 0 / 70µs = 1 ▔╲
//! ```
//!
//! Frame: humidity int, humidity dec, temperature int, temperature dec,
//! checksum (low byte of the sum of the first four).  Timing is best-effort
//! from user space; a missed edge surfaces as a timeout or checksum fault and
//! the caller retries.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use rppal::gpio::{Gpio, IoPin, Level, Mode};

use crate::sensors::{AirSensor, SensorFault};

const START_LOW: Duration = Duration::from_millis(18);

/// High pulses longer than this are a 1 bit.
const ONE_THRESHOLD: Duration = Duration::from_micros(40);

/// Generous bound on any single phase of the handshake.
const EDGE_TIMEOUT: Duration = Duration::from_micros(200);

const FRAME_BITS: usize = 40;

/// Pack 40 high-pulse widths, MSB first, into the 5-byte frame.
fn frame_from_pulses(pulses: &[Duration; FRAME_BITS]) -> [u8; 5] {
    let mut frame = [0u8; 5];
    for (i, width) in pulses.iter().enumerate() {
        if *width > ONE_THRESHOLD {
            frame[i / 8] |= 0x80 >> (i % 8);
        }
    }
    frame
}

/// Checksum and decode.  Returns `(humidity %, temperature °C)`.
fn decode_frame(frame: [u8; 5]) -> Result<(f64, f64), SensorFault> {
    let sum = frame[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != frame[4] {
        return Err(SensorFault::new(format!(
            "dht11 checksum mismatch (computed {sum:#04x}, received {:#04x})",
            frame[4]
        )));
    }

    let humidity = f64::from(frame[0]) + f64::from(frame[1]) / 10.0;
    let magnitude = f64::from(frame[2]) + f64::from(frame[3] & 0x7f) / 10.0;
    let temperature = if frame[3] & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    };
    if humidity > 100.0 {
        return Err(SensorFault::new(format!("dht11 humidity {humidity} out of range")));
    }
    Ok((humidity, temperature))
}

pub struct Dht11 {
    pin: IoPin,
    gpio_pin: u8,
}

impl Dht11 {
    pub fn new(gpio: &Gpio, gpio_pin: u8) -> anyhow::Result<Self> {
        let pin = gpio
            .get(gpio_pin)
            .with_context(|| format!("failed to claim dht11 gpio {gpio_pin}"))?
            .into_io(Mode::Input);
        tracing::info!(gpio_pin, "dht11 initialised");
        Ok(Self { pin, gpio_pin })
    }

    /// Busy-wait until the line reads `level`; returns how long it took.
    fn wait_for(&self, level: Level, phase: &str) -> Result<Duration, SensorFault> {
        let start = Instant::now();
        while self.pin.read() != level {
            if start.elapsed() > EDGE_TIMEOUT {
                return Err(SensorFault::new(format!(
                    "dht11 gpio {}: timeout waiting for {phase}",
                    self.gpio_pin
                )));
            }
        }
        Ok(start.elapsed())
    }

    fn read_frame(&mut self) -> Result<[u8; 5], SensorFault> {
        self.pin.set_mode(Mode::Output);
        self.pin.set_low();
        thread::sleep(START_LOW);
        self.pin.set_high();
        self.pin.set_mode(Mode::Input);

        self.wait_for(Level::Low, "response low")?;
        self.wait_for(Level::High, "response high")?;
        self.wait_for(Level::Low, "first bit")?;

        let mut pulses = [Duration::ZERO; FRAME_BITS];
        for pulse in &mut pulses {
            self.wait_for(Level::High, "bit start")?;
            *pulse = self.wait_for(Level::Low, "bit end")?;
        }
        Ok(frame_from_pulses(&pulses))
    }
}

impl AirSensor for Dht11 {
    fn read_air(&mut self) -> Result<(f64, f64), SensorFault> {
        decode_frame(self.read_frame()?)
    }
}
