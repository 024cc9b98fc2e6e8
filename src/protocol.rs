use crate::bus::{ByteSource, Direction, MAX_TRANSACTION_BYTES};
use crate::error::NodeError;
use heapless::{Deque, Vec};
use serde::{Deserialize, Serialize};
use tracing::trace;

// Fixed 7-bit peripheral addresses
pub const LED_BAR_ADDR: u8 = 0x0A;
pub const LCD_ADDR: u8 = 0x0B;
pub const LM92_ADDR: u8 = 0x48;
pub const RTC_ADDR: u8 = 0x68;

pub const OUTBOX_CAPACITY: usize = 16;

/// LCD opcodes. Anything else takes the literal decode path.
pub mod opcode {
    pub const WINDOW_SUB_MODE: u8 = b'A';
    pub const PATTERN_SUB_MODE: u8 = b'B';
    pub const UNIT_TOGGLE: u8 = b'C';
    pub const LOCK_CLEAR: u8 = b'D';
    pub const SUB_MODE_DATA: u8 = b'G';
    pub const MODE_SELECT: u8 = b'M';
    pub const ELAPSED_TIME: u8 = b'T';
}

/// LED bar drive ids in the thermostat variant.
pub mod drive_id {
    pub const IDLE: u8 = 0;
    pub const COOLING: u8 = 1;
    pub const HEATING: u8 = 2;
}

pub type Payload = Vec<u8, MAX_TRANSACTION_BYTES>;

/// One message for a display peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayCommand {
    /// Raw byte for the LED bar (pattern byte or drive id).
    Bar(u8),
    LockClear,
    WindowSubMode,
    PatternSubMode,
    UnitToggle,
    /// Arm byte followed by the configuration character.
    SubModeData(u8),
    /// Tens, ones, tenths as ASCII digits.
    Temperature([u8; 3]),
    /// Minutes, seconds tens, seconds ones as ASCII digits.
    ElapsedTime([u8; 3]),
    /// Thermostat mode index.
    ModeSelect(u8),
}

impl DisplayCommand {
    pub fn target(&self) -> u8 {
        match self {
            DisplayCommand::Bar(_) => LED_BAR_ADDR,
            _ => LCD_ADDR,
        }
    }

    pub fn encode(&self) -> Payload {
        match *self {
            DisplayCommand::Bar(b) => payload(&[b]),
            DisplayCommand::LockClear => payload(&[opcode::LOCK_CLEAR]),
            DisplayCommand::WindowSubMode => payload(&[opcode::WINDOW_SUB_MODE]),
            DisplayCommand::PatternSubMode => payload(&[opcode::PATTERN_SUB_MODE]),
            DisplayCommand::UnitToggle => payload(&[opcode::UNIT_TOGGLE]),
            DisplayCommand::SubModeData(c) => payload(&[opcode::SUB_MODE_DATA, c]),
            DisplayCommand::Temperature(digits) => payload(&digits),
            DisplayCommand::ElapsedTime([m, s1, s0]) => payload(&[opcode::ELAPSED_TIME, m, s1, s0]),
            DisplayCommand::ModeSelect(i) => payload(&[opcode::MODE_SELECT, i]),
        }
    }
}

// Longer input is truncated to MAX_TRANSACTION_BYTES
fn payload(bytes: &[u8]) -> Payload {
    let len = bytes.len().min(MAX_TRANSACTION_BYTES);
    Payload::from_slice(&bytes[..len]).unwrap_or_default()
}

/// One queued bus transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub address: u8,
    pub direction: Direction,
    /// Outgoing bytes; empty for reads.
    pub payload: Payload,
    pub count: usize,
}

impl Transfer {
    pub fn write(address: u8, bytes: &[u8]) -> Self {
        let payload = payload(bytes);
        Self {
            address,
            direction: Direction::Transmit,
            count: payload.len(),
            payload,
        }
    }

    pub fn read(address: u8, count: usize) -> Self {
        Self {
            address,
            direction: Direction::Receive,
            payload: Payload::new(),
            count,
        }
    }

    pub fn display(cmd: DisplayCommand) -> Self {
        let payload = cmd.encode();
        Self {
            address: cmd.target(),
            direction: Direction::Transmit,
            count: payload.len(),
            payload,
        }
    }

    fn is_bar_write(&self) -> bool {
        self.address == LED_BAR_ADDR && self.direction == Direction::Transmit
    }
}

/// Ordered queue of transfers plus the one currently on the wire.
///
/// The bus handler reads outgoing bytes from `current`, so queued transfers
/// can be replaced without disturbing a transfer in flight.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: Deque<Transfer, OUTBOX_CAPACITY>,
    current: Option<Transfer>,
}

impl Outbox {
    pub fn new() -> Self {
        Self {
            queue: Deque::new(),
            current: None,
        }
    }

    pub fn push(&mut self, transfer: Transfer) -> Result<(), NodeError> {
        // Only the newest bar byte matters; replace a queued one in place
        if transfer.is_bar_write() {
            if let Some(queued) = self.queue.iter_mut().find(|t| t.is_bar_write()) {
                trace!("coalescing queued bar byte");
                *queued = transfer;
                return Ok(());
            }
        }

        let address = transfer.address;
        self.queue
            .push_back(transfer)
            .map_err(|_| NodeError::OutboxFull(address))
    }

    pub fn push_display(&mut self, cmd: DisplayCommand) -> Result<(), NodeError> {
        self.push(Transfer::display(cmd))
    }

    /// Next transfer to start, without promoting it yet.
    pub fn peek(&self) -> Option<&Transfer> {
        self.queue.front()
    }

    /// Move the head of the queue on the wire.
    pub fn promote(&mut self) -> Option<&Transfer> {
        self.current = self.queue.pop_front();
        self.current.as_ref()
    }

    pub fn finish(&mut self) -> Option<Transfer> {
        self.current.take()
    }

    pub fn current(&self) -> Option<&Transfer> {
        self.current.as_ref()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.current.is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transfer> {
        self.queue.iter()
    }
}

impl ByteSource for Outbox {
    fn tx_byte(&mut self, address: u8, index: usize) -> u8 {
        match &self.current {
            Some(t) if t.address == address => t.payload.get(index).copied().unwrap_or(0),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_encoding() {
        assert_eq!(&DisplayCommand::Bar(0x81).encode()[..], &[0x81]);
        assert_eq!(&DisplayCommand::LockClear.encode()[..], b"D");
        assert_eq!(&DisplayCommand::WindowSubMode.encode()[..], b"A");
        assert_eq!(&DisplayCommand::PatternSubMode.encode()[..], b"B");
        assert_eq!(&DisplayCommand::UnitToggle.encode()[..], b"C");
        assert_eq!(&DisplayCommand::SubModeData(b'5').encode()[..], b"G5");
        assert_eq!(&DisplayCommand::Temperature(*b"231").encode()[..], b"231");
        assert_eq!(&DisplayCommand::ElapsedTime(*b"259").encode()[..], b"T259");
        assert_eq!(&DisplayCommand::ModeSelect(2).encode()[..], &[b'M', 2]);
    }

    #[test]
    fn test_targets() {
        assert_eq!(DisplayCommand::Bar(0).target(), LED_BAR_ADDR);
        assert_eq!(DisplayCommand::LockClear.target(), LCD_ADDR);
        assert_eq!(DisplayCommand::Temperature(*b"000").target(), LCD_ADDR);
    }

    #[test]
    fn test_outbox_order_and_bar_coalescing() {
        let mut outbox = Outbox::new();
        outbox.push_display(DisplayCommand::Bar(1)).unwrap();
        outbox.push_display(DisplayCommand::LockClear).unwrap();
        outbox.push_display(DisplayCommand::Bar(2)).unwrap();
        assert_eq!(outbox.len(), 2);

        let first = outbox.promote().cloned().unwrap();
        assert_eq!(&first.payload[..], &[2]);
        // A bar byte behind the one in flight is queued, not merged
        outbox.push_display(DisplayCommand::Bar(3)).unwrap();
        assert_eq!(outbox.tx_byte(LED_BAR_ADDR, 0), 2);
        assert!(outbox.finish().is_some());

        assert_eq!(outbox.promote().map(|t| t.address), Some(LCD_ADDR));
        outbox.finish();
        assert_eq!(outbox.promote().map(|t| t.payload[0]), Some(3));
    }

    #[test]
    fn test_outbox_full() {
        let mut outbox = Outbox::new();
        for _ in 0..OUTBOX_CAPACITY {
            outbox.push_display(DisplayCommand::UnitToggle).unwrap();
        }
        assert_eq!(
            outbox.push_display(DisplayCommand::UnitToggle),
            Err(NodeError::OutboxFull(LCD_ADDR))
        );
    }

    #[test]
    fn test_source_ignores_other_addresses() {
        let mut outbox = Outbox::new();
        outbox.push(Transfer::write(RTC_ADDR, &[0, 0, 0])).unwrap();
        outbox.promote();
        assert_eq!(outbox.tx_byte(LCD_ADDR, 0), 0);
        assert_eq!(outbox.current().map(|t| t.count), Some(3));
    }
}
