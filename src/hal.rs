//! Interfaces to the thin I/O collaborators around the controller: keypad
//! scanning, the RGB status LED and the ADC trigger. Matrix scanning,
//! debouncing and PWM programming live behind these traits.

use serde::{Deserialize, Serialize};

/// Character layout of the 4x4 matrix keypad, row by row.
pub const KEYPAD_LAYOUT: [[u8; 4]; 4] = [*b"123A", *b"456B", *b"789C", *b"*0#D"];

/// Forces the lock back to `Locked` from any state.
pub const KEY_LOCK: u8 = b'D';

pub fn is_keypad_char(c: u8) -> bool {
    KEYPAD_LAYOUT.iter().any(|row| row.contains(&c))
}

/// Discrete states shown on the status LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusIndicator {
    Locked,
    MidEntry,
    Unlocked,
    WindowChange,
    PatternChange,
}

impl StatusIndicator {
    /// PWM duty (out of 255) for the red, green and blue channels.
    pub fn rgb(self) -> (u8, u8, u8) {
        match self {
            StatusIndicator::Locked => (255, 0, 0),
            StatusIndicator::MidEntry => (220, 120, 0),
            StatusIndicator::Unlocked => (29, 162, 196),
            StatusIndicator::WindowChange => (255, 153, 51),
            StatusIndicator::PatternChange => (196, 62, 29),
        }
    }
}

/// Foreground-side I/O of the controller node.
pub trait ControllerIo {
    /// One keypad scan; `None` when no key is down.
    fn scan_key(&mut self) -> Option<u8>;

    fn show_status(&mut self, indicator: StatusIndicator);

    /// Kick off one ADC conversion. The result arrives through
    /// [`crate::dispatcher::Controller::on_adc_complete`].
    fn start_adc_conversion(&mut self);
}
