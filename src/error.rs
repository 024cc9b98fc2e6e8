use crate::bus::BusEvent;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    /// A transaction is in flight or the previous stop condition is still on the wire.
    #[error("bus busy: transaction in flight or stop condition pending")]
    Busy,
    #[error("invalid transaction byte count {0}")]
    InvalidByteCount(usize),
    #[error("peripheral 0x{address:02X} still not acknowledging after {attempts} attempts")]
    RetryLimitExceeded { address: u8, attempts: u16 },
    #[error("bus event {0:?} does not match any transaction in flight")]
    Unexpected(BusEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("window size {0} outside 1..=9")]
    WindowSize(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("passkey must be exactly 4 keypad characters, excluding the lock key")]
    Passkey,
    #[error("window size {0} outside 1..=9")]
    WindowSize(u8),
    #[error("idle timeout must be at least one heartbeat tick")]
    IdleTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("outgoing transfer queue full, dropped transfer for 0x{0:02X}")]
    OutboxFull(u8),
}

/// Failures of the host-side network simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SimError {
    #[error("network did not settle within {0} steps")]
    Livelock(usize),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
