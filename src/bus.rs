//! Interrupt-driven two-wire bus transaction engine.
//!
//! The master side is split in two halves that never run concurrently:
//!
//! - [`BusEngine::begin_transaction`] is called from the foreground loop. It
//!   refuses (with `nb::Error::WouldBlock`) while a transaction is in flight
//!   or the previous stop condition is still on the wire.
//! - [`BusEngine::on_interrupt`] reacts to one [`BusEvent`] at a time, pulling
//!   outgoing bytes from a [`ByteSource`] and pushing incoming bytes into a
//!   [`ByteSink`].
//!
//! A NACK re-issues the start condition for the same address, direction and
//! byte count, replaying the transfer from its first byte. Bytes the peer
//! already accepted before the NACK are delivered again, so peers must
//! tolerate repeated bytes. By default the retry is unbounded; a
//! [`RetryPolicy::Capped`] policy aborts the transfer instead.
//!
//! The slave side ([`SlaveEndpoint`]) is receive-only: each received byte is
//! handed synchronously to a [`CommandSink`].

use crate::error::BusError;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Longest transfer any peripheral in this network takes (opcode + 3 data bytes).
pub const MAX_TRANSACTION_BYTES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Transmit,
    Receive,
}

/// Hardware events delivered to the bus interrupt handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// Transmit buffer empty, next byte (or stop) wanted.
    TxReady,
    /// One byte arrived.
    RxReady(u8),
    /// Addressed peripheral did not acknowledge.
    Nack,
    /// Stop condition has left the wire.
    StopSent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// Re-issue the start condition forever.
    #[default]
    Unbounded,
    /// Give up after this many retries of one transaction.
    Capped(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BusTransaction {
    pub address: u8,
    pub direction: Direction,
    pub byte_count: usize,
    /// Index of the next byte to stream.
    pub index: usize,
    /// NACK retries so far.
    pub attempts: u16,
}

impl BusTransaction {
    pub fn remaining(&self) -> usize {
        self.byte_count.saturating_sub(self.index)
    }
}

/// Result of handling one bus event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// A byte moved; the transaction continues.
    Streaming,
    /// NACK seen, start condition re-issued.
    Retrying { attempt: u16 },
    /// All bytes moved and the stop condition was requested.
    Completed(BusTransaction),
    /// The wire reported the stop condition.
    Stopped,
}

/// Register-level operations the engine needs from the bus peripheral.
pub trait BusHal {
    fn set_target(&mut self, address: u8);
    fn issue_start(&mut self, direction: Direction);
    fn write_byte(&mut self, byte: u8);
    fn issue_stop(&mut self);
    /// True until the previously requested stop condition has been sent.
    fn stop_pending(&self) -> bool;
}

/// Supplies outgoing bytes one at a time, selected by target address.
pub trait ByteSource {
    fn tx_byte(&mut self, address: u8, index: usize) -> u8;
}

/// Receives incoming bytes; `phase` is the byte's position in the transfer.
pub trait ByteSink {
    fn rx_byte(&mut self, address: u8, phase: usize, byte: u8);
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BusStats {
    pub started: u32,
    pub completed: u32,
    pub nacks: u32,
    pub retries: u32,
    pub aborted: u32,
    pub bytes_sent: u32,
    pub bytes_received: u32,
}

#[derive(Debug)]
pub struct BusEngine {
    in_flight: Option<BusTransaction>,
    policy: RetryPolicy,
    stats: BusStats,
}

impl BusEngine {
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::Unbounded)
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            in_flight: None,
            policy,
            stats: BusStats::default(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }

    pub fn in_flight(&self) -> Option<&BusTransaction> {
        self.in_flight.as_ref()
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Address a peripheral and issue the start condition.
    pub fn begin_transaction<H: BusHal>(
        &mut self,
        hal: &mut H,
        address: u8,
        direction: Direction,
        byte_count: usize,
    ) -> nb::Result<(), BusError> {
        if byte_count == 0 || byte_count > MAX_TRANSACTION_BYTES {
            return Err(nb::Error::Other(BusError::InvalidByteCount(byte_count)));
        }

        if self.in_flight.is_some() || hal.stop_pending() {
            return Err(nb::Error::WouldBlock);
        }

        self.in_flight = Some(BusTransaction {
            address,
            direction,
            byte_count,
            index: 0,
            attempts: 0,
        });
        self.stats.started = self.stats.started.wrapping_add(1);

        debug!(address, ?direction, byte_count, "bus transaction start");
        hal.set_target(address);
        hal.issue_start(direction);
        Ok(())
    }

    /// Interrupt handler body. Never blocks.
    pub fn on_interrupt<H, S, K>(
        &mut self,
        hal: &mut H,
        event: BusEvent,
        source: &mut S,
        sink: &mut K,
    ) -> Result<Progress, BusError>
    where
        H: BusHal,
        S: ByteSource,
        K: ByteSink,
    {
        if event == BusEvent::StopSent {
            trace!("stop condition sent");
            return Ok(Progress::Stopped);
        }

        let Some(mut tx) = self.in_flight else {
            return Err(BusError::Unexpected(event));
        };

        match (event, tx.direction) {
            (BusEvent::Nack, _) => {
                self.stats.nacks = self.stats.nacks.wrapping_add(1);
                tx.attempts = tx.attempts.saturating_add(1);

                if let RetryPolicy::Capped(max) = self.policy {
                    if tx.attempts > max {
                        self.in_flight = None;
                        self.stats.aborted = self.stats.aborted.wrapping_add(1);
                        hal.issue_stop();
                        warn!(address = tx.address, attempts = tx.attempts, "retry cap exceeded, transfer dropped");
                        return Err(BusError::RetryLimitExceeded {
                            address: tx.address,
                            attempts: tx.attempts,
                        });
                    }
                }

                // Replay from the first byte with the same address and count
                tx.index = 0;
                self.in_flight = Some(tx);
                self.stats.retries = self.stats.retries.wrapping_add(1);
                warn!(address = tx.address, attempt = tx.attempts, "NACK, re-issuing start");
                hal.issue_start(tx.direction);
                Ok(Progress::Retrying {
                    attempt: tx.attempts,
                })
            }
            (BusEvent::TxReady, Direction::Transmit) => {
                if tx.remaining() > 0 {
                    let byte = source.tx_byte(tx.address, tx.index);
                    hal.write_byte(byte);
                    tx.index += 1;
                    self.in_flight = Some(tx);
                    self.stats.bytes_sent = self.stats.bytes_sent.wrapping_add(1);
                    Ok(Progress::Streaming)
                } else {
                    hal.issue_stop();
                    Ok(self.complete(tx))
                }
            }
            (BusEvent::RxReady(byte), Direction::Receive) => {
                sink.rx_byte(tx.address, tx.index, byte);
                tx.index += 1;
                self.stats.bytes_received = self.stats.bytes_received.wrapping_add(1);

                if tx.remaining() == 0 {
                    hal.issue_stop();
                    Ok(self.complete(tx))
                } else {
                    self.in_flight = Some(tx);
                    Ok(Progress::Streaming)
                }
            }
            _ => Err(BusError::Unexpected(event)),
        }
    }

    fn complete(&mut self, tx: BusTransaction) -> Progress {
        self.in_flight = None;
        self.stats.completed = self.stats.completed.wrapping_add(1);
        debug!(address = tx.address, bytes = tx.byte_count, retries = tx.attempts, "bus transaction complete");
        Progress::Completed(tx)
    }
}

impl Default for BusEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer of bytes received by a slave peripheral.
pub trait CommandSink {
    fn on_command_byte(&mut self, byte: u8);
}

/// Receive-only slave side of the bus for a peripheral node.
#[derive(Debug)]
pub struct SlaveEndpoint<S> {
    address: u8,
    sink: S,
    received: u32,
}

impl<S: CommandSink> SlaveEndpoint<S> {
    pub fn new(address: u8, sink: S) -> Self {
        Self {
            address,
            sink,
            received: 0,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn received(&self) -> u32 {
        self.received
    }

    /// Returns true when the event carried a byte for the sink.
    pub fn on_interrupt(&mut self, event: BusEvent) -> bool {
        match event {
            BusEvent::RxReady(byte) => {
                self.received = self.received.wrapping_add(1);
                trace!(address = self.address, byte, "slave received");
                self.sink.on_command_byte(byte);
                true
            }
            _ => false,
        }
    }
}
