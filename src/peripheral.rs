//! Peripheral node logic: the LCD command interpreter and the LED bar.
//!
//! Both are receive-only bus slaves. Every received byte is handed to
//! [`CommandSink::on_command_byte`] from the slave's receive interrupt.

use crate::bus::CommandSink;
use crate::filter::TemperatureUnit;
use crate::pattern::PatternMode;
use crate::protocol::{drive_id, opcode};
use crate::thermostat::ThermostatMode;
use arrayvec::ArrayString;
use core::fmt::Write;
use serde::Serialize;
use tracing::{debug, trace};

pub const LCD_COLUMNS: usize = 16;
/// Column of the "N=" window field on the bottom line.
const WINDOW_FIELD_COLUMN: usize = 13;

// Degree sign takes two bytes
pub type LcdLine = ArrayString<32>;

const WINDOW_PROMPT: &str = "set window size";
const PATTERN_PROMPT: &str = "set pattern";
const NO_PATTERN: &str = "none";

/// Heartbeat ticks spent at the fast blink rate after data arrives.
pub const ACTIVITY_FAST_TICKS: u8 = 10;
pub const SLOW_BLINK_MS: u64 = 1000;
pub const FAST_BLINK_MS: u64 = 200;

/// Peripheral heartbeat LED that blinks fast for a while after bus traffic.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityBlinker {
    active: bool,
    count: u8,
    led_on: bool,
}

impl ActivityBlinker {
    pub fn new() -> Self {
        Self {
            active: false,
            count: 0,
            led_on: true,
        }
    }

    pub fn trigger(&mut self) {
        self.active = true;
    }

    /// One heartbeat: toggle the LED and age the fast period.
    pub fn tick(&mut self) {
        self.led_on = !self.led_on;
        if self.active {
            self.count += 1;
            if self.count == ACTIVITY_FAST_TICKS {
                self.active = false;
                self.count = 0;
            }
        }
    }

    pub fn period_ms(&self) -> u64 {
        if self.active {
            FAST_BLINK_MS
        } else {
            SLOW_BLINK_MS
        }
    }

    pub fn is_led_on(&self) -> bool {
        self.led_on
    }
}

impl Default for ActivityBlinker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubMode {
    None,
    Pattern,
    Window,
}

/// What the next received byte means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Decode,
    /// One-shot: next byte configures the armed sub-mode.
    SubModeData,
    ModeSelect,
    /// Digits of the elapsed time still expected.
    TimeDigits(u8),
}

/// Two-line text model of the character LCD.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LcdScreen {
    pub top: LcdLine,
    pub bottom: LcdLine,
}

impl LcdScreen {
    pub fn clear(&mut self) {
        self.top.clear();
        self.bottom.clear();
    }
}

#[derive(Debug, Clone)]
pub struct LcdInterpreter {
    sub_mode: SubMode,
    pending: Pending,
    temp_digits: [u8; 3],
    temp_cursor: usize,
    temp_shown: bool,
    unit: TemperatureUnit,
    window: u8,
    pattern: Option<PatternMode>,
    mode: Option<ThermostatMode>,
    time_digits: [u8; 3],
    time_shown: bool,
    screen: LcdScreen,
    activity: ActivityBlinker,
}

impl LcdInterpreter {
    pub fn new() -> Self {
        Self {
            sub_mode: SubMode::None,
            pending: Pending::Decode,
            temp_digits: *b"000",
            temp_cursor: 0,
            temp_shown: false,
            unit: TemperatureUnit::Celsius,
            window: b'3',
            pattern: None,
            mode: None,
            time_digits: *b"000",
            time_shown: false,
            screen: LcdScreen::default(),
            activity: ActivityBlinker::new(),
        }
    }

    pub fn screen(&self) -> &LcdScreen {
        &self.screen
    }

    pub fn sub_mode(&self) -> SubMode {
        self.sub_mode
    }

    pub fn is_data_armed(&self) -> bool {
        self.pending == Pending::SubModeData
    }

    pub fn unit(&self) -> TemperatureUnit {
        self.unit
    }

    pub fn window(&self) -> u8 {
        self.window
    }

    pub fn pattern(&self) -> Option<PatternMode> {
        self.pattern
    }

    pub fn thermostat_mode(&self) -> Option<ThermostatMode> {
        self.mode
    }

    pub fn activity(&self) -> &ActivityBlinker {
        &self.activity
    }

    pub fn on_heartbeat(&mut self) {
        self.activity.tick();
    }

    fn decode(&mut self, byte: u8) {
        match byte {
            opcode::LOCK_CLEAR => {
                debug!("lcd cleared");
                self.sub_mode = SubMode::None;
                self.temp_cursor = 0;
                self.screen.clear();
            }
            opcode::WINDOW_SUB_MODE => {
                self.sub_mode = SubMode::Window;
                self.set_top(WINDOW_PROMPT);
            }
            opcode::PATTERN_SUB_MODE => {
                self.sub_mode = SubMode::Pattern;
                self.set_top(PATTERN_PROMPT);
            }
            opcode::UNIT_TOGGLE => {
                self.unit = self.unit.toggle();
                self.draw_bottom();
            }
            opcode::SUB_MODE_DATA => self.pending = Pending::SubModeData,
            opcode::MODE_SELECT => self.pending = Pending::ModeSelect,
            opcode::ELAPSED_TIME => self.pending = Pending::TimeDigits(0),
            digit => {
                self.temp_digits[self.temp_cursor] = digit;
                self.temp_cursor += 1;
                if self.temp_cursor == self.temp_digits.len() {
                    self.temp_cursor = 0;
                    self.temp_shown = true;
                    self.draw_bottom();
                }
            }
        }
    }

    fn apply_sub_mode_data(&mut self, byte: u8) {
        match self.sub_mode {
            SubMode::Pattern => match PatternMode::from_key(byte) {
                Some(mode) => {
                    self.pattern = Some(mode);
                    self.draw_pattern();
                }
                None => {
                    debug!(byte, "pattern id out of range, ignored");
                    self.draw_pattern();
                }
            },
            SubMode::Window => {
                if (b'1'..=b'9').contains(&byte) {
                    self.window = byte;
                    self.draw_bottom();
                } else {
                    debug!(byte, "window size out of range, ignored");
                }
                self.draw_pattern();
            }
            SubMode::None => debug!(byte, "sub-mode data with no sub-mode, ignored"),
        }
        self.sub_mode = SubMode::None;
    }

    fn set_top(&mut self, text: &str) {
        self.screen.top.clear();
        let _ = self.screen.top.try_push_str(text);
    }

    fn draw_pattern(&mut self) {
        let name = self.pattern.map(PatternMode::name).unwrap_or(NO_PATTERN);
        self.set_top(name);
    }

    fn draw_mode_line(&mut self) {
        let name = self.mode.map(ThermostatMode::name).unwrap_or_default();
        let line = &mut self.screen.top;
        line.clear();
        let _ = line.try_push_str(name);
        if self.time_shown {
            let [m, s1, s0] = self.time_digits;
            let _ = write!(
                line,
                "{:>width$}{}:{}{}",
                "",
                m as char,
                s1 as char,
                s0 as char,
                width = LCD_COLUMNS - 4 - name.len().min(LCD_COLUMNS - 4)
            );
        }
    }

    fn draw_bottom(&mut self) {
        let line = &mut self.screen.bottom;
        line.clear();
        if self.temp_shown {
            let [t, o, d] = self.temp_digits;
            let _ = write!(
                line,
                "T={}{}.{}\u{b0}{}",
                t as char,
                o as char,
                d as char,
                self.unit.symbol()
            );
        }
        // Pad in columns, not bytes
        let used = line.chars().count();
        for _ in used..WINDOW_FIELD_COLUMN {
            let _ = line.try_push(' ');
        }
        let _ = write!(line, "N={}", self.window as char);
    }
}

impl Default for LcdInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandSink for LcdInterpreter {
    fn on_command_byte(&mut self, byte: u8) {
        trace!(byte, pending = ?self.pending, "lcd byte");
        self.activity.trigger();

        match self.pending {
            Pending::Decode => self.decode(byte),
            Pending::SubModeData => {
                self.pending = Pending::Decode;
                self.apply_sub_mode_data(byte);
            }
            Pending::ModeSelect => {
                self.pending = Pending::Decode;
                match ThermostatMode::from_index(byte) {
                    Some(mode) => {
                        self.mode = Some(mode);
                        self.time_shown = false;
                        self.draw_mode_line();
                    }
                    None => debug!(byte, "mode index out of range, ignored"),
                }
            }
            Pending::TimeDigits(n) => {
                self.time_digits[usize::from(n)] = byte;
                if usize::from(n) + 1 == self.time_digits.len() {
                    self.pending = Pending::Decode;
                    self.time_shown = true;
                    self.draw_mode_line();
                } else {
                    self.pending = Pending::TimeDigits(n + 1);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BarBehavior {
    /// Show each received byte as is (lock-box).
    Raw,
    /// Received byte is a drive id animated on the heartbeat (thermostat).
    Drive,
}

const HEATING_START: u8 = 0x80;
const COOLING_START: u8 = 0x01;

#[derive(Debug, Clone, Serialize)]
pub struct LedBar {
    behavior: BarBehavior,
    received: u8,
    shown: u8,
    heating: u8,
    cooling: u8,
    activity: ActivityBlinker,
}

impl LedBar {
    pub fn new(behavior: BarBehavior) -> Self {
        Self {
            behavior,
            received: 0,
            shown: 0,
            heating: HEATING_START,
            cooling: COOLING_START,
            activity: ActivityBlinker::new(),
        }
    }

    /// Byte currently lit on the bar.
    pub fn shown(&self) -> u8 {
        self.shown
    }

    pub fn received(&self) -> u8 {
        self.received
    }

    pub fn activity(&self) -> &ActivityBlinker {
        &self.activity
    }

    pub fn on_heartbeat(&mut self) -> u8 {
        self.activity.tick();

        if self.behavior == BarBehavior::Drive {
            self.shown = match self.received {
                drive_id::HEATING => {
                    // fill right
                    self.heating = if self.heating == 0xFF {
                        HEATING_START
                    } else {
                        (self.heating >> 1) | 0x80
                    };
                    self.heating
                }
                drive_id::COOLING => {
                    // fill left
                    self.cooling = if self.cooling == 0xFF {
                        COOLING_START
                    } else {
                        (self.cooling << 1) | 0x01
                    };
                    self.cooling
                }
                _ => 0,
            };
        }

        self.shown
    }
}

impl CommandSink for LedBar {
    fn on_command_byte(&mut self, byte: u8) {
        self.received = byte;
        if self.behavior == BarBehavior::Raw {
            self.shown = byte;
        }
        self.activity.trigger();
    }
}
