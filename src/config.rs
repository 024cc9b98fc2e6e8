use crate::bus::RetryPolicy;
use crate::error::ConfigError;
use crate::hal::{is_keypad_char, KEY_LOCK};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

pub const PASSKEY_LEN: usize = 4;
pub const DEFAULT_PASSKEY: [u8; PASSKEY_LEN] = *b"1111";

// Sample window bounds (the buffer is sized for the largest window)
pub const MAX_WINDOW_SIZE: usize = 9;
pub const MIN_WINDOW_SIZE: usize = 1;
pub const DEFAULT_WINDOW_SIZE: u8 = 3;

/// Heartbeat ticks without a key press before a half-typed passkey is discarded.
pub const IDLE_TIMEOUT_TICKS: u8 = 5;

pub const HEARTBEAT_PERIOD_MS: u64 = 1000;
pub const SAMPLE_PERIOD_MS: u64 = 500;

/// Plant within +/- 0.5 C of ambient counts as matched.
pub const AMBIENT_BAND_DECI_C: i32 = 5;

/// Starting register for each pattern mode, restored when a mode is re-armed.
pub const DEFAULT_PATTERNS: [u8; 8] = [170, 170, 0, 24, 255, 1, 127, 1];

const_assert!(DEFAULT_WINDOW_SIZE as usize >= MIN_WINDOW_SIZE);
const_assert!(DEFAULT_WINDOW_SIZE as usize <= MAX_WINDOW_SIZE);
const_assert!(MAX_WINDOW_SIZE <= 9);
const_assert!(IDLE_TIMEOUT_TICKS > 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variant {
    LockBox,
    Thermostat,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerConfig {
    pub variant: Variant,
    pub passkey: [u8; PASSKEY_LEN],
    pub window_size: u8,
    pub idle_timeout_ticks: u8,
    pub retry_policy: RetryPolicy,
    pub ambient_band_deci_c: i32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            variant: Variant::LockBox,
            passkey: DEFAULT_PASSKEY,
            window_size: DEFAULT_WINDOW_SIZE,
            idle_timeout_ticks: IDLE_TIMEOUT_TICKS,
            retry_policy: RetryPolicy::Unbounded,
            ambient_band_deci_c: AMBIENT_BAND_DECI_C,
        }
    }
}

impl ControllerConfig {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            ..Self::default()
        }
    }

    pub fn with_passkey(mut self, passkey: &str) -> Result<Self, ConfigError> {
        let bytes: [u8; PASSKEY_LEN] = passkey
            .as_bytes()
            .try_into()
            .map_err(|_| ConfigError::Passkey)?;
        self.passkey = bytes;
        self.validate()?;
        Ok(self)
    }

    pub fn with_window_size(mut self, window_size: u8) -> Result<Self, ConfigError> {
        self.window_size = window_size;
        self.validate()?;
        Ok(self)
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_idle_timeout(mut self, ticks: u8) -> Result<Self, ConfigError> {
        self.idle_timeout_ticks = ticks;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // The lock key can never be part of an attempt, so it cannot be part of the passkey either
        if self
            .passkey
            .iter()
            .any(|&c| !is_keypad_char(c) || c == KEY_LOCK)
        {
            return Err(ConfigError::Passkey);
        }

        let window = usize::from(self.window_size);
        if !(MIN_WINDOW_SIZE..=MAX_WINDOW_SIZE).contains(&window) {
            return Err(ConfigError::WindowSize(self.window_size));
        }

        if self.idle_timeout_ticks == 0 {
            return Err(ConfigError::IdleTimeout);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(&config.passkey, b"1111");
        assert_eq!(config.window_size, 3);
        assert_eq!(config.retry_policy, RetryPolicy::Unbounded);
    }

    #[test]
    fn test_passkey_override() {
        let config = ControllerConfig::default().with_passkey("12A#").unwrap();
        assert_eq!(&config.passkey, b"12A#");

        assert_eq!(
            ControllerConfig::default().with_passkey("123").unwrap_err(),
            ConfigError::Passkey
        );
        assert_eq!(
            ControllerConfig::default().with_passkey("12D4").unwrap_err(),
            ConfigError::Passkey
        );
        assert_eq!(
            ControllerConfig::default().with_passkey("12x4").unwrap_err(),
            ConfigError::Passkey
        );
    }

    #[test]
    fn test_window_bounds() {
        assert!(ControllerConfig::default().with_window_size(9).is_ok());
        assert_eq!(
            ControllerConfig::default().with_window_size(0).unwrap_err(),
            ConfigError::WindowSize(0)
        );
        assert_eq!(
            ControllerConfig::default().with_window_size(10).unwrap_err(),
            ConfigError::WindowSize(10)
        );
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert_eq!(
            ControllerConfig::default().with_idle_timeout(0).unwrap_err(),
            ConfigError::IdleTimeout
        );
    }
}
