//! Moving-average filter over raw ADC codes and the fixed-point conversion
//! from an averaged code to displayed temperature digits.

use crate::config::{MAX_WINDOW_SIZE, MIN_WINDOW_SIZE};
use crate::error::FilterError;
use serde::{Deserialize, Serialize};

/// Circular window of raw readings with a running sum.
///
/// `sum` always equals the sum of the valid entries: before warm-up finishes
/// that is `buffer[..cursor]`, afterwards the whole `buffer[..size]`.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    buffer: [u16; MAX_WINDOW_SIZE],
    cursor: usize,
    sum: u32,
    size: usize,
    warm: bool,
}

impl SampleWindow {
    pub fn new(size: u8) -> Result<Self, FilterError> {
        let mut window = Self {
            buffer: [0; MAX_WINDOW_SIZE],
            cursor: 0,
            sum: 0,
            size: MIN_WINDOW_SIZE,
            warm: false,
        };
        window.resize(size)?;
        Ok(window)
    }

    /// Store one reading. Returns the new average once the window has been
    /// filled, and on every sample after that.
    pub fn record_sample(&mut self, raw: u16) -> Option<u16> {
        if self.warm {
            self.sum -= u32::from(self.buffer[self.cursor]);
        }
        self.buffer[self.cursor] = raw;
        self.sum += u32::from(raw);

        self.cursor += 1;
        if self.cursor == self.size {
            self.cursor = 0;
            self.warm = true;
        }

        debug_assert!(self.sum == self.valid().iter().map(|&v| u32::from(v)).sum::<u32>());

        self.warm.then(|| self.average())
    }

    /// Truncating mean over the window size.
    pub fn average(&self) -> u16 {
        // sum <= 9 * u16::MAX, the quotient fits
        (self.sum / self.size as u32) as u16
    }

    /// Change the window size, dropping every stored sample.
    pub fn resize(&mut self, size: u8) -> Result<(), FilterError> {
        let new_size = usize::from(size);
        if !(MIN_WINDOW_SIZE..=MAX_WINDOW_SIZE).contains(&new_size) {
            return Err(FilterError::WindowSize(size));
        }

        self.buffer = [0; MAX_WINDOW_SIZE];
        self.cursor = 0;
        self.sum = 0;
        self.size = new_size;
        self.warm = false;
        Ok(())
    }

    pub fn is_warm(&self) -> bool {
        self.warm
    }

    pub fn size(&self) -> u8 {
        self.size as u8
    }

    pub fn sum(&self) -> u32 {
        self.sum
    }

    fn valid(&self) -> &[u16] {
        if self.warm {
            &self.buffer[..self.size]
        } else {
            &self.buffer[..self.cursor]
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn toggle(self) -> Self {
        match self {
            TemperatureUnit::Celsius => TemperatureUnit::Fahrenheit,
            TemperatureUnit::Fahrenheit => TemperatureUnit::Celsius,
        }
    }

    /// Convert tenths of a degree Celsius into this unit.
    pub fn convert(self, deci_c: i32) -> i32 {
        match self {
            TemperatureUnit::Celsius => deci_c,
            TemperatureUnit::Fahrenheit => deci_c * 9 / 5 + 320,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            TemperatureUnit::Celsius => 'C',
            TemperatureUnit::Fahrenheit => 'F',
        }
    }
}

// 12-bit converter against a 3.3 V reference; sensor reads 1.3605 V at 0 C
// and falls 11.77 mV per degree.
const ADC_FULL_SCALE: i32 = 4095;
const REFERENCE_TENTH_MV: i32 = 33_000;
const SENSOR_OFFSET_TENTH_MV: i32 = 13_605;
const SENSOR_SLOPE_HUNDREDTH_MV: i32 = 1_177;

/// Averaged ADC code to tenths of a degree Celsius. Codes past the
/// converter's full scale read as full scale.
pub fn adc_to_deci_celsius(code: u16) -> i32 {
    let code = i32::from(code).min(ADC_FULL_SCALE);
    let tenth_mv = code * REFERENCE_TENTH_MV / ADC_FULL_SCALE;
    (SENSOR_OFFSET_TENTH_MV - tenth_mv) * 100 / SENSOR_SLOPE_HUNDREDTH_MV
}

/// Tens, ones and tenths digits as ASCII, clamped to 00.0..=99.9.
pub fn temperature_digits(deci: i32) -> [u8; 3] {
    let value = deci.clamp(0, 999) as u32;
    [
        b'0' + (value / 100) as u8,
        b'0' + (value / 10 % 10) as u8,
        b'0' + (value % 10) as u8,
    ]
}
