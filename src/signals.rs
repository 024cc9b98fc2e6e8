//! State shared between interrupt handlers and the foreground loop.
//!
//! Each field has exactly one writer. Handlers raise flags and post into
//! single-slot mailboxes; the foreground loop takes them. Flags are atomics
//! so a raise in handler context is never reordered past the foreground's
//! read of the data it guards.

use crate::error::BusError;
use crate::filter::SampleWindow;
use crate::thermostat::SensorReading;
use core::sync::atomic::{AtomicBool, Ordering};
use heapless::spsc::Queue;

#[derive(Debug, Default)]
pub struct Flag(AtomicBool);

impl Flag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clear the flag, returning whether it was raised.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Single-slot mailbox. A post into an occupied slot is refused and counted;
/// `replace` overwrites it instead.
pub struct Mailbox<T> {
    // Capacity N - 1, so one slot
    slot: Queue<T, 2>,
    overruns: u32,
}

impl<T> Mailbox<T> {
    pub const fn new() -> Self {
        Self {
            slot: Queue::new(),
            overruns: 0,
        }
    }

    pub fn post(&mut self, value: T) -> Result<(), T> {
        self.slot.enqueue(value).map_err(|value| {
            self.overruns = self.overruns.wrapping_add(1);
            value
        })
    }

    /// Post, evicting an unconsumed value. The eviction counts as an overrun.
    pub fn replace(&mut self, value: T) {
        if self.slot.dequeue().is_some() {
            self.overruns = self.overruns.wrapping_add(1);
        }
        // Slot is empty now
        let _ = self.slot.enqueue(value);
    }

    pub fn take(&mut self) -> Option<T> {
        self.slot.dequeue()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_empty()
    }

    pub fn overruns(&self) -> u32 {
        self.overruns
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> core::fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mailbox")
            .field("occupied", &!self.slot.is_empty())
            .field("overruns", &self.overruns)
            .finish()
    }
}

/// Field group written only from handler context.
#[derive(Debug)]
pub struct IrqShared {
    pub heartbeat: Flag,
    /// Sample timer fired; the foreground should start an ADC conversion.
    pub sample_tick: Flag,
    /// Filled by the ADC-complete handler.
    pub window: SampleWindow,
    /// Freshly emitted window average.
    pub average: Mailbox<u16>,
    /// Sensor read finished by the bus handler.
    pub reading: Mailbox<SensorReading>,
    pub bus_fault: Mailbox<BusError>,
}

impl IrqShared {
    pub fn new(window: SampleWindow) -> Self {
        Self {
            heartbeat: Flag::new(),
            sample_tick: Flag::new(),
            window,
            average: Mailbox::new(),
            reading: Mailbox::new(),
            bus_fault: Mailbox::new(),
        }
    }
}
