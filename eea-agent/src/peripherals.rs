//! Peripheral drivers backing the optional `eea_fn_*` guest imports.
//!
//! Concrete boards implement [`PeripheralDriver`] over their GPIO/ADC
//! stack; the default [`SimulatedPeripherals`] keeps pin state in memory
//! so workflows exercising peripherals run anywhere.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Result codes follow the underlying driver's convention: zero for
/// success, a non-zero driver code otherwise. `adc_read` returns the
/// sampled value or a driver code.
pub trait PeripheralDriver: Send + Sync {
    /// Configure a GPIO pin's direction.
    fn gpio_set_direction(&self, pin: u8, mode: u32) -> i32;
    /// Drive a GPIO pin's output level.
    fn gpio_set_level(&self, pin: u8, level: u32) -> i32;
    /// Configure an ADC channel.
    fn adc_configure(&self, channel: u8, attenuation: u32) -> i32;
    /// Sample an ADC channel.
    fn adc_read(&self, channel: u8) -> Result<i32, i32>;
}

/// In-memory peripheral simulation.
#[derive(Default)]
pub struct SimulatedPeripherals {
    gpio_levels: Mutex<HashMap<u8, u32>>,
    adc_channels: Mutex<HashMap<u8, u32>>,
}

impl SimulatedPeripherals {
    /// Last level driven on a pin, if any. For assertions in tests.
    pub fn gpio_level(&self, pin: u8) -> Option<u32> {
        self.gpio_levels.lock().get(&pin).copied()
    }
}

impl PeripheralDriver for SimulatedPeripherals {
    fn gpio_set_direction(&self, pin: u8, mode: u32) -> i32 {
        tracing::debug!(pin, mode, "gpio direction set");
        0
    }

    fn gpio_set_level(&self, pin: u8, level: u32) -> i32 {
        tracing::debug!(pin, level, "gpio level set");
        self.gpio_levels.lock().insert(pin, level);
        0
    }

    fn adc_configure(&self, channel: u8, attenuation: u32) -> i32 {
        tracing::debug!(channel, attenuation, "adc channel configured");
        self.adc_channels.lock().insert(channel, attenuation);
        0
    }

    fn adc_read(&self, channel: u8) -> Result<i32, i32> {
        if !self.adc_channels.lock().contains_key(&channel) {
            // unconfigured channel reads fail like a real driver
            return Err(-1);
        }
        Ok(2048)
    }
}
