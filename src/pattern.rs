//! LED bar animation modes.
//!
//! Every mode owns a byte register that survives switching to another mode
//! and back. Selecting the already active mode again restores its default.

use crate::config::DEFAULT_PATTERNS;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Byte sequence walked by the shuttle ("in and out") mode.
pub const SHUTTLE_TABLE: [u8; 6] = [0x18, 0x24, 0x42, 0x81, 0x42, 0x24];

const ROTATE_LEFT_LAST: u8 = 0x80;
const FILL_RIGHT_LAST: u8 = 0xFE;
const FILL_LEFT_LAST: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternMode {
    Static,
    Toggle,
    UpCounter,
    Shuttle,
    DownCounter,
    RotateLeft,
    FillRight,
    FillLeft,
}

impl PatternMode {
    pub const ALL: [PatternMode; 8] = [
        PatternMode::Static,
        PatternMode::Toggle,
        PatternMode::UpCounter,
        PatternMode::Shuttle,
        PatternMode::DownCounter,
        PatternMode::RotateLeft,
        PatternMode::FillRight,
        PatternMode::FillLeft,
    ];

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(usize::from(id)).copied()
    }

    /// Keypad characters '0'..='7'.
    pub fn from_key(key: u8) -> Option<Self> {
        key.checked_sub(b'0').and_then(Self::from_id)
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Name shown on the LCD.
    pub fn name(self) -> &'static str {
        match self {
            PatternMode::Static => "static",
            PatternMode::Toggle => "toggle",
            PatternMode::UpCounter => "up counter",
            PatternMode::Shuttle => "in and out",
            PatternMode::DownCounter => "down counter",
            PatternMode::RotateLeft => "rotate 1 left",
            PatternMode::FillRight => "rotate 7 right",
            PatternMode::FillLeft => "fill left",
        }
    }

    pub fn default_register(self) -> u8 {
        DEFAULT_PATTERNS[usize::from(self.id())]
    }
}

/// What a `select` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Activated,
    /// Same mode picked twice in a row, register back to default.
    Rearmed,
}

#[derive(Debug, Clone)]
pub struct PatternGenerator {
    active: Option<PatternMode>,
    registers: [u8; 8],
    shuttle_step: usize,
}

impl PatternGenerator {
    pub fn new() -> Self {
        Self {
            active: None,
            registers: DEFAULT_PATTERNS,
            shuttle_step: 0,
        }
    }

    pub fn active(&self) -> Option<PatternMode> {
        self.active
    }

    pub fn register(&self, mode: PatternMode) -> u8 {
        self.registers[usize::from(mode.id())]
    }

    pub fn shuttle_step(&self) -> usize {
        self.shuttle_step
    }

    pub fn select(&mut self, mode: PatternMode) -> Selection {
        if self.active == Some(mode) {
            self.registers[usize::from(mode.id())] = mode.default_register();
            if mode == PatternMode::Shuttle {
                self.shuttle_step = 0;
            }
            info!(mode = mode.name(), "pattern re-armed");
            Selection::Rearmed
        } else {
            self.active = Some(mode);
            info!(mode = mode.name(), "pattern selected");
            Selection::Activated
        }
    }

    /// Stop animating; registers keep their values.
    pub fn deactivate(&mut self) {
        self.active = None;
    }

    /// Advance the active mode one heartbeat and return the byte to show.
    pub fn tick(&mut self) -> Option<u8> {
        let mode = self.active?;
        let idx = usize::from(mode.id());
        let reg = self.registers[idx];

        let out = match mode {
            PatternMode::Static => reg,
            PatternMode::Toggle => reg ^ 0xFF,
            PatternMode::UpCounter => reg.wrapping_add(1),
            PatternMode::Shuttle => {
                let byte = SHUTTLE_TABLE[self.shuttle_step];
                self.shuttle_step = (self.shuttle_step + 1) % SHUTTLE_TABLE.len();
                byte
            }
            PatternMode::DownCounter => reg.wrapping_sub(1),
            PatternMode::RotateLeft => {
                if reg == ROTATE_LEFT_LAST {
                    mode.default_register()
                } else {
                    reg << 1
                }
            }
            PatternMode::FillRight => {
                if reg == FILL_RIGHT_LAST {
                    mode.default_register()
                } else {
                    (reg >> 1) | 0x80
                }
            }
            PatternMode::FillLeft => {
                if reg == FILL_LEFT_LAST {
                    mode.default_register()
                } else {
                    (reg << 1) | 0x01
                }
            }
        };

        self.registers[idx] = out;
        Some(out)
    }
}

impl Default for PatternGenerator {
    fn default() -> Self {
        Self::new()
    }
}
