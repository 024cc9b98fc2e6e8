//! Host-side simulation of the whole network: an in-memory two-wire bus
//! with deterministic NACK injection, sensor models, and a [`Network`]
//! harness that plays the role of the interrupt controller.

use crate::bus::{BusEvent, BusHal, CommandSink, Direction, SlaveEndpoint};
use crate::config::{ControllerConfig, Variant};
use crate::dispatcher::{Controller, NodeStatus};
use crate::error::SimError;
use crate::hal::{ControllerIo, StatusIndicator};
use crate::peripheral::{BarBehavior, LcdInterpreter, LcdScreen, LedBar};
use crate::protocol::{LCD_ADDR, LED_BAR_ADDR, LM92_ADDR, RTC_ADDR};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Upper bound on poll/event rounds in one [`Network::settle`].
pub const MAX_SETTLE_STEPS: usize = 10_000;

const DEVICE_COUNT: usize = 4;

/// A bus slave as seen from the wire.
pub trait WireDevice {
    fn address(&self) -> u8;

    /// Addressed by a start condition.
    fn on_start(&mut self, _direction: Direction) {}

    fn on_write(&mut self, byte: u8);

    fn on_read(&mut self) -> u8;

    fn on_stop(&mut self) {}
}

impl<S: CommandSink> WireDevice for SlaveEndpoint<S> {
    fn address(&self) -> u8 {
        SlaveEndpoint::address(self)
    }

    fn on_write(&mut self, byte: u8) {
        self.on_interrupt(BusEvent::RxReady(byte));
    }

    // Receive-only; an idle bus reads high
    fn on_read(&mut self) -> u8 {
        0xFF
    }
}

fn to_bcd(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

fn from_bcd(b: u8) -> u8 {
    (b >> 4) * 10 + (b & 0x0F)
}

/// Real-time clock model: seconds and minutes registers behind a pointer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimRtc {
    seconds: u8,
    minutes: u8,
    pointer: u8,
    // Next written byte is the register pointer
    expect_pointer: bool,
    resets: u32,
}

impl SimRtc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick_second(&mut self) {
        self.seconds += 1;
        if self.seconds == 60 {
            self.seconds = 0;
            self.minutes = (self.minutes + 1) % 60;
        }
    }

    pub fn set_time(&mut self, minutes: u8, seconds: u8) {
        self.minutes = minutes % 60;
        self.seconds = seconds % 60;
    }

    pub fn time(&self) -> (u8, u8) {
        (self.minutes, self.seconds)
    }

    pub fn resets(&self) -> u32 {
        self.resets
    }
}

impl WireDevice for SimRtc {
    fn address(&self) -> u8 {
        RTC_ADDR
    }

    fn on_start(&mut self, direction: Direction) {
        self.expect_pointer = direction == Direction::Transmit;
    }

    fn on_write(&mut self, byte: u8) {
        if self.expect_pointer {
            self.pointer = byte;
            self.expect_pointer = false;
            return;
        }
        match self.pointer {
            0 => self.seconds = from_bcd(byte & 0x7F) % 60,
            1 => {
                self.minutes = from_bcd(byte) % 60;
                if self.seconds == 0 && self.minutes == 0 {
                    self.resets += 1;
                }
            }
            _ => {}
        }
        self.pointer = self.pointer.wrapping_add(1);
    }

    fn on_read(&mut self) -> u8 {
        let value = match self.pointer {
            0 => to_bcd(self.seconds),
            1 => to_bcd(self.minutes),
            _ => 0,
        };
        self.pointer = self.pointer.wrapping_add(1);
        value
    }
}

/// LM92 model returning a fixed temperature.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimLm92 {
    deci_c: i32,
    index: usize,
}

impl SimLm92 {
    pub fn new(deci_c: i32) -> Self {
        Self { deci_c, index: 0 }
    }

    pub fn set_deci_celsius(&mut self, deci_c: i32) {
        self.deci_c = deci_c;
    }

    /// Register value: 13-bit sixteenths of a degree, shifted past three flag bits.
    pub fn register(&self) -> u16 {
        let sixteenths = (self.deci_c * 16 / 10) as i16;
        (sixteenths << 3) as u16
    }
}

impl WireDevice for SimLm92 {
    fn address(&self) -> u8 {
        LM92_ADDR
    }

    fn on_start(&mut self, _direction: Direction) {
        self.index = 0;
    }

    // Pointer writes select the temperature register, the only one modelled
    fn on_write(&mut self, _byte: u8) {}

    fn on_read(&mut self) -> u8 {
        let [msb, lsb] = self.register().to_be_bytes();
        let byte = if self.index == 0 { msb } else { lsb };
        self.index += 1;
        byte
    }
}

/// Deterministic NACK injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NackInjectionConfig {
    pub enabled: bool,
    /// Chance per address phase or data byte.
    pub rate_percent: u8,
    /// Peripheral that never acknowledges.
    pub dead_address: Option<u8>,
}

impl Default for NackInjectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rate_percent: 0,
            dead_address: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DeviceStats {
    pub address: u8,
    pub starts: u32,
    pub bytes_written: u32,
    pub bytes_read: u32,
    pub nacks: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WireStats {
    pub starts: u32,
    pub stops: u32,
    pub nacks_injected: u32,
    pub devices: [DeviceStats; DEVICE_COUNT],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WirePhase {
    Idle,
    Address(Direction),
    Writing,
    Reading,
    Stopping,
}

/// In-memory bus with the four network peripherals attached.
pub struct SimWire {
    pub lcd: SlaveEndpoint<LcdInterpreter>,
    pub bar: SlaveEndpoint<LedBar>,
    pub rtc: SimRtc,
    pub lm92: SimLm92,

    target: u8,
    phase: WirePhase,
    pending_byte: Option<u8>,
    stop_pending: bool,

    config: NackInjectionConfig,
    forced_nacks: u32,
    stats: WireStats,

    // Same LCG as the rest of the simulation tooling
    rng_state: u64,
}

impl SimWire {
    pub fn new(bar: BarBehavior) -> Self {
        Self::new_with_config(bar, NackInjectionConfig::default())
    }

    pub fn new_with_config(bar: BarBehavior, config: NackInjectionConfig) -> Self {
        let mut stats = WireStats::default();
        for (slot, address) in stats
            .devices
            .iter_mut()
            .zip([LED_BAR_ADDR, LCD_ADDR, LM92_ADDR, RTC_ADDR])
        {
            slot.address = address;
        }

        Self {
            lcd: SlaveEndpoint::new(LCD_ADDR, LcdInterpreter::new()),
            bar: SlaveEndpoint::new(LED_BAR_ADDR, LedBar::new(bar)),
            rtc: SimRtc::new(),
            lm92: SimLm92::new(220),
            target: 0,
            phase: WirePhase::Idle,
            pending_byte: None,
            stop_pending: false,
            config,
            forced_nacks: 0,
            stats,
            rng_state: 0x1234_5678_9ABC_DEF0,
        }
    }

    /// NACK the next `count` address phases or data bytes.
    pub fn force_nacks(&mut self, count: u32) {
        self.forced_nacks = count;
    }

    pub fn set_dead_address(&mut self, address: Option<u8>) {
        self.config.dead_address = address;
    }

    pub fn get_config(&self) -> &NackInjectionConfig {
        &self.config
    }

    pub fn get_stats(&self) -> &WireStats {
        &self.stats
    }

    pub fn is_idle(&self) -> bool {
        self.phase == WirePhase::Idle && !self.stop_pending
    }

    fn device_index(address: u8) -> Option<usize> {
        match address {
            LED_BAR_ADDR => Some(0),
            LCD_ADDR => Some(1),
            LM92_ADDR => Some(2),
            RTC_ADDR => Some(3),
            _ => None,
        }
    }

    fn device_mut(&mut self, address: u8) -> Option<&mut dyn WireDevice> {
        match address {
            LED_BAR_ADDR => Some(&mut self.bar),
            LCD_ADDR => Some(&mut self.lcd),
            LM92_ADDR => Some(&mut self.lm92),
            RTC_ADDR => Some(&mut self.rtc),
            _ => None,
        }
    }

    fn device_stats(&mut self) -> Option<&mut DeviceStats> {
        match Self::device_index(self.target) {
            Some(i) => Some(&mut self.stats.devices[i]),
            None => None,
        }
    }

    fn next_random(&mut self) -> u64 {
        self.rng_state = self.rng_state.wrapping_mul(1664525).wrapping_add(1013904223);
        self.rng_state
    }

    fn should_nack(&mut self) -> bool {
        if self.forced_nacks > 0 {
            self.forced_nacks -= 1;
            return true;
        }
        if self.config.dead_address == Some(self.target) {
            return true;
        }
        if Self::device_index(self.target).is_none() {
            return true;
        }
        if self.config.enabled && self.config.rate_percent > 0 {
            let roll = (self.next_random() >> 33) % 100;
            return roll < u64::from(self.config.rate_percent);
        }
        false
    }

    fn nack(&mut self) -> BusEvent {
        self.stats.nacks_injected += 1;
        if let Some(d) = self.device_stats() {
            d.nacks += 1;
        }
        self.phase = WirePhase::Idle;
        self.pending_byte = None;
        trace!(address = self.target, "wire NACK");
        BusEvent::Nack
    }

    /// Advance the wire by one interrupt-worthy event, if any.
    pub fn step(&mut self) -> Option<BusEvent> {
        match self.phase {
            WirePhase::Idle => None,

            WirePhase::Address(direction) => {
                if self.should_nack() {
                    return Some(self.nack());
                }
                let target = self.target;
                if let Some(d) = self.device_stats() {
                    d.starts += 1;
                }
                let device = self.device_mut(target)?;
                device.on_start(direction);

                match direction {
                    Direction::Transmit => {
                        self.phase = WirePhase::Writing;
                        Some(BusEvent::TxReady)
                    }
                    Direction::Receive => {
                        self.phase = WirePhase::Reading;
                        self.read_one()
                    }
                }
            }

            WirePhase::Writing => {
                self.pending_byte?;
                if self.should_nack() {
                    return Some(self.nack());
                }
                let byte = self.pending_byte.take()?;
                let target = self.target;
                self.device_mut(target)?.on_write(byte);
                if let Some(d) = self.device_stats() {
                    d.bytes_written += 1;
                }
                Some(BusEvent::TxReady)
            }

            WirePhase::Reading => self.read_one(),

            WirePhase::Stopping => {
                let target = self.target;
                if let Some(device) = self.device_mut(target) {
                    device.on_stop();
                }
                self.phase = WirePhase::Idle;
                self.stop_pending = false;
                self.stats.stops += 1;
                Some(BusEvent::StopSent)
            }
        }
    }

    fn read_one(&mut self) -> Option<BusEvent> {
        let target = self.target;
        let byte = self.device_mut(target)?.on_read();
        if let Some(d) = self.device_stats() {
            d.bytes_read += 1;
        }
        Some(BusEvent::RxReady(byte))
    }
}

impl BusHal for SimWire {
    fn set_target(&mut self, address: u8) {
        self.target = address;
    }

    fn issue_start(&mut self, direction: Direction) {
        self.stats.starts += 1;
        self.pending_byte = None;
        self.phase = WirePhase::Address(direction);
    }

    fn write_byte(&mut self, byte: u8) {
        self.pending_byte = Some(byte);
    }

    fn issue_stop(&mut self) {
        self.phase = WirePhase::Stopping;
        self.stop_pending = true;
    }

    fn stop_pending(&self) -> bool {
        self.stop_pending
    }
}

/// Scripted keypad, recorded status LED and ADC request counter.
#[derive(Debug, Default)]
pub struct SimIo {
    pub keys: VecDeque<u8>,
    pub shown: Vec<StatusIndicator>,
    pub adc_requests: u32,
}

impl ControllerIo for SimIo {
    fn scan_key(&mut self) -> Option<u8> {
        self.keys.pop_front()
    }

    fn show_status(&mut self, indicator: StatusIndicator) {
        self.shown.push(indicator);
    }

    fn start_adc_conversion(&mut self) {
        self.adc_requests += 1;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkSnapshot {
    pub controller: NodeStatus,
    pub lcd: LcdScreen,
    pub bar: u8,
    pub rtc: SimRtc,
    pub wire: WireStats,
}

/// Controller, wire and peripherals wired together.
pub struct Network {
    pub controller: Controller,
    pub wire: SimWire,
    pub io: SimIo,
}

impl Network {
    pub fn new(config: ControllerConfig) -> Result<Self, SimError> {
        Self::new_with_injection(config, NackInjectionConfig::default())
    }

    pub fn new_with_injection(
        config: ControllerConfig,
        injection: NackInjectionConfig,
    ) -> Result<Self, SimError> {
        let bar = match config.variant {
            Variant::LockBox => BarBehavior::Raw,
            Variant::Thermostat => BarBehavior::Drive,
        };
        let mut network = Self {
            controller: Controller::new(config)?,
            wire: SimWire::new_with_config(bar, injection),
            io: SimIo::default(),
        };
        network.controller.start(&mut network.io);
        Ok(network)
    }

    pub fn lcd(&self) -> &LcdInterpreter {
        self.wire.lcd.sink()
    }

    pub fn bar(&self) -> &LedBar {
        self.wire.bar.sink()
    }

    pub fn press(&mut self, key: u8) -> Result<usize, SimError> {
        self.io.keys.push_back(key);
        self.settle()
    }

    pub fn press_all(&mut self, keys: &[u8]) -> Result<usize, SimError> {
        let mut steps = 0;
        for &key in keys {
            steps += self.press(key)?;
        }
        Ok(steps)
    }

    /// One second passes on every node.
    pub fn heartbeat(&mut self) -> Result<usize, SimError> {
        self.wire.rtc.tick_second();
        self.wire.lcd.sink_mut().on_heartbeat();
        self.wire.bar.sink_mut().on_heartbeat();
        self.controller.on_heartbeat_tick();
        self.settle()
    }

    /// Sample timer fires and the requested conversion returns `raw`.
    pub fn sample(&mut self, raw: u16) -> Result<usize, SimError> {
        let requested = self.io.adc_requests;
        self.controller.on_sample_tick();
        let mut steps = self.settle()?;
        for _ in requested..self.io.adc_requests {
            self.controller.on_adc_complete(raw);
        }
        steps += self.settle()?;
        Ok(steps)
    }

    /// Alternate foreground polls and wire events until nothing is left.
    pub fn settle(&mut self) -> Result<usize, SimError> {
        for step in 0..MAX_SETTLE_STEPS {
            self.controller.poll(&mut self.wire, &mut self.io)?;

            if let Some(event) = self.wire.step() {
                self.controller.on_bus_interrupt(&mut self.wire, event);
                continue;
            }

            if !self.controller.has_pending_output()
                && !self.controller.has_pending_signals()
                && self.io.keys.is_empty()
                && self.wire.is_idle()
            {
                trace!(steps = step, "network settled");
                return Ok(step);
            }
        }

        debug!("network did not settle");
        Err(SimError::Livelock(MAX_SETTLE_STEPS))
    }

    pub fn snapshot(&self) -> NetworkSnapshot {
        NetworkSnapshot {
            controller: self.controller.get_status(),
            lcd: self.lcd().screen().clone(),
            bar: self.bar().shown(),
            rtc: self.wire.rtc.clone(),
            wire: self.wire.get_stats().clone(),
        }
    }
}
