//! Pump control via a relay on one GPIO line.  The `hw` feature gates the
//! real rppal driver; without it a mock records state changes and logs them.

use std::time::Duration;

use tracing::info;

use crate::scheduler::Clock;

/// A single on/off actuator.
pub trait Pump {
    fn set(&mut self, on: bool);
}

/// Energize the pump, hold for `duration` on the clock, then switch it off.
/// Not cancellable: a started watering event always completes.
pub async fn water<C: Clock>(pump: &mut dyn Pump, clock: &C, duration: Duration) {
    pump.set(true);
    info!(seconds = duration.as_secs_f64(), "pump on");
    clock.sleep(duration).await;
    pump.set(false);
    info!("pump off");
}

// ---------------------------------------------------------------------------
// Relay pump (requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------

#[cfg(feature = "hw")]
pub(crate) use relay::RelayPump;

#[cfg(feature = "hw")]
mod relay {
    use anyhow::{Context, Result};
    use rppal::gpio::{Gpio, OutputPin};

    use super::Pump;

    pub(crate) struct RelayPump {
        pin: OutputPin,
        active_low: bool, // some relay boards switch on LOW
    }

    impl RelayPump {
        pub(crate) fn new(gpio_pin: u8, active_low: bool) -> Result<Self> {
            let pin = Gpio::new()
                .context("failed to open gpio")?
                .get(gpio_pin)
                .with_context(|| format!("failed to claim pump gpio {gpio_pin}"))?
                .into_output();

            let mut pump = Self { pin, active_low };
            // Fail-safe: ensure OFF at startup.
            pump.set(false);
            tracing::info!(gpio_pin, active_low, "relay pump initialised");
            Ok(pump)
        }
    }

    impl Pump for RelayPump {
        fn set(&mut self, on: bool) {
            // active-low: LOW = ON, HIGH = OFF
            if on != self.active_low {
                self.pin.set_high();
            } else {
                self.pin.set_low();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Mock relay (development, no hardware)
// ---------------------------------------------------------------------------

#[cfg(any(test, not(feature = "hw")))]
#[derive(Debug, Default)]
pub(crate) struct MockPump {
    pub(crate) on: bool,
    pub(crate) activations: u32,
}

#[cfg(any(test, not(feature = "hw")))]
impl Pump for MockPump {
    fn set(&mut self, on: bool) {
        if on && !self.on {
            self.activations += 1;
        }
        self.on = on;
        info!(
            activations = self.activations,
            "[mock-gpio] pump set {}",
            if on { "ON" } else { "OFF" }
        );
    }
}

// ===========================================================================
// Tests
// ===========================================================================
