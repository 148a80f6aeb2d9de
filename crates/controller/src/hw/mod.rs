//! Raspberry Pi drivers: ADS1115 soil ADC and BH1750 light meter on I2C bus
//! 1, DHT11 on a GPIO line.

mod ads1115;
mod bh1750;
mod dht11;

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, Result};
use rppal::gpio::Gpio;
use rppal::i2c::I2c;

use crate::config::Config;
use crate::sensors::{AirSensor, LightMeter, SoilChannel};

use ads1115::AdcProbe;
use bh1750::Bh1750;
use dht11::Dht11;

pub struct Devices {
    pub soil: Vec<SoilChannel>,
    pub light: Box<dyn LightMeter>,
    pub air: Box<dyn AirSensor>,
}

/// Open the buses and build every configured input.
pub fn open(cfg: &Config) -> Result<Devices> {
    let bus = Rc::new(RefCell::new(I2c::new().context("failed to open i2c bus")?));
    let gpio = Gpio::new().context("failed to open gpio")?;

    let soil = cfg
        .soil_sensors
        .iter()
        .map(|s| {
            let probe = AdcProbe::new(Rc::clone(&bus), cfg.hardware.adc_addr, s.adc_channel)?;
            Ok(SoilChannel::new(&s.name, Box::new(probe)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Devices {
        soil,
        light: Box::new(Bh1750::new(Rc::clone(&bus), cfg.hardware.light_addr)),
        air: Box::new(Dht11::new(&gpio, cfg.hardware.air_gpio_pin)?),
    })
}
