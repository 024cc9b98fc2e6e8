use crate::bus::ByteSink;
use crate::protocol::{drive_id, LM92_ADDR, RTC_ADDR};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Bytes in one LM92 temperature read (MSB, LSB).
pub const LM92_READ_LEN: usize = 2;
/// Bytes in one RTC time read (seconds, minutes).
pub const RTC_READ_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThermostatMode {
    Heat,
    Cool,
    MatchAmbient,
    Off,
}

impl ThermostatMode {
    /// Unlocked key that selects each mode.
    pub fn from_key(key: u8) -> Option<Self> {
        match key {
            b'A' => Some(ThermostatMode::Heat),
            b'B' => Some(ThermostatMode::Cool),
            b'C' => Some(ThermostatMode::MatchAmbient),
            b'0' => Some(ThermostatMode::Off),
            _ => None,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(ThermostatMode::Heat),
            1 => Some(ThermostatMode::Cool),
            2 => Some(ThermostatMode::MatchAmbient),
            3 => Some(ThermostatMode::Off),
            _ => None,
        }
    }

    /// Index sent after the LCD mode-select opcode.
    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            ThermostatMode::Heat => "heat",
            ThermostatMode::Cool => "cool",
            ThermostatMode::MatchAmbient => "match",
            ThermostatMode::Off => "off",
        }
    }
}

/// What the plant is being driven to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Drive {
    #[default]
    Idle,
    Cooling,
    Heating,
}

impl Drive {
    pub fn id(self) -> u8 {
        match self {
            Drive::Idle => drive_id::IDLE,
            Drive::Cooling => drive_id::COOLING,
            Drive::Heating => drive_id::HEATING,
        }
    }

    pub fn from_id(id: u8) -> Self {
        match id {
            drive_id::COOLING => Drive::Cooling,
            drive_id::HEATING => Drive::Heating,
            _ => Drive::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElapsedTime {
    pub minutes: u8,
    pub seconds: u8,
}

fn from_bcd(b: u8) -> u8 {
    (b >> 4) * 10 + (b & 0x0F)
}

impl ElapsedTime {
    /// RTC registers are BCD; bit 7 of the seconds register is the oscillator flag.
    pub fn from_bcd(seconds: u8, minutes: u8) -> Self {
        Self {
            minutes: from_bcd(minutes & 0x7F),
            seconds: from_bcd(seconds & 0x7F),
        }
    }

    /// One minute digit (modulo 10), then two second digits.
    pub fn digits(&self) -> [u8; 3] {
        [
            b'0' + self.minutes % 10,
            b'0' + (self.seconds / 10) % 10,
            b'0' + self.seconds % 10,
        ]
    }
}

/// LM92 register to tenths of a degree Celsius.
///
/// The top 13 bits are a two's complement reading at 0.0625 C per LSB; the
/// low three bits are status flags.
pub fn lm92_to_deci_celsius(raw: u16) -> i32 {
    let sixteenths = i32::from((raw as i16) >> 3);
    sixteenths * 10 / 16
}

/// Completed sensor read, handed from the bus handler to the foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorReading {
    Time(ElapsedTime),
    /// Raw LM92 register value.
    Ambient(u16),
}

/// Receive side of sensor transfers. Bytes land by address and phase.
#[derive(Debug, Default)]
pub struct SensorLatch {
    rtc: [u8; RTC_READ_LEN],
    lm92: [u8; LM92_READ_LEN],
}

impl SensorLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble the reading for a finished read from `address`.
    pub fn reading(&self, address: u8) -> Option<SensorReading> {
        match address {
            RTC_ADDR => Some(SensorReading::Time(ElapsedTime::from_bcd(
                self.rtc[0],
                self.rtc[1],
            ))),
            LM92_ADDR => Some(SensorReading::Ambient(u16::from_be_bytes(self.lm92))),
            _ => None,
        }
    }
}

impl ByteSink for SensorLatch {
    fn rx_byte(&mut self, address: u8, phase: usize, byte: u8) {
        let slot = match address {
            RTC_ADDR => self.rtc.get_mut(phase),
            LM92_ADDR => self.lm92.get_mut(phase),
            _ => None,
        };
        if let Some(slot) = slot {
            *slot = byte;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThermostatStatus {
    pub mode: ThermostatMode,
    pub drive: Drive,
    pub plant_deci_c: Option<i32>,
    pub ambient_deci_c: Option<i32>,
    pub elapsed: ElapsedTime,
}

#[derive(Debug)]
pub struct Thermostat {
    mode: ThermostatMode,
    drive: Drive,
    plant_deci_c: Option<i32>,   // filtered ADC
    ambient_deci_c: Option<i32>, // LM92
    band_deci_c: i32,
    elapsed: ElapsedTime,
}

impl Thermostat {
    pub fn new(band_deci_c: i32) -> Self {
        Self {
            mode: ThermostatMode::Off,
            drive: Drive::Idle,
            plant_deci_c: None,
            ambient_deci_c: None,
            band_deci_c,
            elapsed: ElapsedTime::default(),
        }
    }

    pub fn mode(&self) -> ThermostatMode {
        self.mode
    }

    pub fn drive(&self) -> Drive {
        self.drive
    }

    /// Switch mode and return the drive to send. Always reported, even when
    /// unchanged, since the user just pressed a key.
    pub fn set_mode(&mut self, mode: ThermostatMode) -> Drive {
        self.mode = mode;
        self.elapsed = ElapsedTime::default();
        self.drive = self.decide();
        info!(mode = mode.name(), drive = ?self.drive, "thermostat mode");
        self.drive
    }

    pub fn update_plant(&mut self, deci_c: i32) -> Option<Drive> {
        self.plant_deci_c = Some(deci_c);
        self.redecide()
    }

    pub fn update_ambient(&mut self, deci_c: i32) -> Option<Drive> {
        self.ambient_deci_c = Some(deci_c);
        self.redecide()
    }

    pub fn update_elapsed(&mut self, elapsed: ElapsedTime) {
        self.elapsed = elapsed;
    }

    fn redecide(&mut self) -> Option<Drive> {
        let next = self.decide();
        if next == self.drive {
            return None;
        }
        debug!(from = ?self.drive, to = ?next, "drive change");
        self.drive = next;
        Some(next)
    }

    /// Pure drive decision for the current mode and readings.
    pub fn decide(&self) -> Drive {
        match self.mode {
            ThermostatMode::Heat => Drive::Heating,
            ThermostatMode::Cool => Drive::Cooling,
            ThermostatMode::Off => Drive::Idle,
            ThermostatMode::MatchAmbient => match (self.plant_deci_c, self.ambient_deci_c) {
                (Some(plant), Some(ambient)) if plant < ambient - self.band_deci_c => {
                    Drive::Heating
                }
                (Some(plant), Some(ambient)) if plant > ambient + self.band_deci_c => {
                    Drive::Cooling
                }
                _ => Drive::Idle,
            },
        }
    }

    pub fn get_status(&self) -> ThermostatStatus {
        ThermostatStatus {
            mode: self.mode,
            drive: self.drive,
            plant_deci_c: self.plant_deci_c,
            ambient_deci_c: self.ambient_deci_c,
            elapsed: self.elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AMBIENT_BAND_DECI_C;

    #[test]
    fn test_direct_modes() {
        let mut t = Thermostat::new(AMBIENT_BAND_DECI_C);
        assert_eq!(t.set_mode(ThermostatMode::Heat), Drive::Heating);
        assert_eq!(t.set_mode(ThermostatMode::Cool), Drive::Cooling);
        assert_eq!(t.set_mode(ThermostatMode::Off), Drive::Idle);
        // Readings do not move a fixed mode
        assert_eq!(t.update_plant(100), None);
    }

    #[test]
    fn test_match_ambient_band() {
        let mut t = Thermostat::new(AMBIENT_BAND_DECI_C);
        assert_eq!(t.set_mode(ThermostatMode::MatchAmbient), Drive::Idle);
        assert_eq!(t.update_ambient(220), None);
        assert_eq!(t.update_plant(200), Some(Drive::Heating));
        assert_eq!(t.update_plant(216), Some(Drive::Idle));
        assert_eq!(t.update_plant(225), None);
        assert_eq!(t.update_plant(226), Some(Drive::Cooling));
        assert_eq!(t.update_ambient(240), Some(Drive::Heating));
    }

    #[test]
    fn test_missing_reading_idles() {
        let mut t = Thermostat::new(AMBIENT_BAND_DECI_C);
        t.set_mode(ThermostatMode::MatchAmbient);
        assert_eq!(t.update_plant(0), None);
        assert_eq!(t.drive(), Drive::Idle);
    }

    #[test]
    fn test_elapsed_time_bcd() {
        let time = ElapsedTime::from_bcd(0x59, 0x12);
        assert_eq!(time, ElapsedTime { minutes: 12, seconds: 59 });
        assert_eq!(&time.digits(), b"259");
        assert_eq!(ElapsedTime::from_bcd(0x80 | 0x07, 0x00).seconds, 7);
    }

    #[test]
    fn test_lm92_conversion() {
        // 25.0 C = 400 sixteenths
        assert_eq!(lm92_to_deci_celsius(400 << 3), 250);
        // Status bits are ignored
        assert_eq!(lm92_to_deci_celsius((400 << 3) | 0x07), 250);
        // -10.0 C
        assert_eq!(lm92_to_deci_celsius(((-160_i16) << 3) as u16), -100);
    }

    #[test]
    fn test_sensor_latch() {
        let mut latch = SensorLatch::new();
        latch.rx_byte(RTC_ADDR, 0, 0x30);
        latch.rx_byte(RTC_ADDR, 1, 0x02);
        latch.rx_byte(LM92_ADDR, 0, 0x0C);
        latch.rx_byte(LM92_ADDR, 1, 0x80);
        latch.rx_byte(LM92_ADDR, 5, 0xFF);

        assert_eq!(
            latch.reading(RTC_ADDR),
            Some(SensorReading::Time(ElapsedTime { minutes: 2, seconds: 30 }))
        );
        assert_eq!(latch.reading(LM92_ADDR), Some(SensorReading::Ambient(0x0C80)));
        assert_eq!(latch.reading(0x0B), None);
    }

    #[test]
    fn test_mode_keys() {
        assert_eq!(ThermostatMode::from_key(b'C'), Some(ThermostatMode::MatchAmbient));
        assert_eq!(ThermostatMode::from_key(b'0'), Some(ThermostatMode::Off));
        assert_eq!(ThermostatMode::from_key(b'1'), None);
        for mode in [ThermostatMode::Heat, ThermostatMode::Off] {
            assert_eq!(ThermostatMode::from_index(mode.index()), Some(mode));
        }
    }
}
