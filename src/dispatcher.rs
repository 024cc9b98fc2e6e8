//! Controller node: the foreground loop and its interrupt entry points.
//!
//! Handler entry points (`on_bus_interrupt`, `on_heartbeat_tick`,
//! `on_sample_tick`, `on_adc_complete`) only touch the bus engine, the
//! outbox/latch byte buffers and the [`IrqShared`] group. Everything else is
//! owned by [`Controller::poll`], which drains what the handlers left behind.

use crate::bus::{BusEngine, BusEvent, BusHal, BusStats, Direction, Progress};
use crate::config::{ControllerConfig, Variant};
use crate::error::{BusError, ConfigError, NodeError};
use crate::filter::{adc_to_deci_celsius, temperature_digits, SampleWindow, TemperatureUnit};
use crate::hal::{ControllerIo, StatusIndicator};
use crate::lock::{LockAccess, LockEvent, LockOutput, LockState, RelockCause};
use crate::pattern::{PatternGenerator, PatternMode};
use crate::protocol::{DisplayCommand, Outbox, Transfer, LM92_ADDR, RTC_ADDR};
use crate::signals::IrqShared;
use crate::thermostat::{
    lm92_to_deci_celsius, SensorLatch, SensorReading, Thermostat, ThermostatMode,
    ThermostatStatus, LM92_READ_LEN, RTC_READ_LEN,
};
use arrayvec::ArrayString;
use core::fmt::Write;
use serde::Serialize;
use tracing::{debug, info, warn};

/// RTC register pointer followed by zeroed seconds and minutes.
const RTC_RESET: [u8; 3] = [0x00, 0x00, 0x00];
const RTC_POINTER: [u8; 1] = [0x00];

/// Which setting the next unlocked key configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Armed {
    Pattern,
    Window,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ControllerStats {
    pub keys: u32,
    pub heartbeats: u32,
    pub averages: u32,
    pub unlocks: u32,
    pub rejected_attempts: u32,
    pub timeouts: u32,
    pub bus_faults: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub variant: Variant,
    pub running: bool,
    pub lock: LockState,
    pub indicator: StatusIndicator,
    pub armed: Option<Armed>,
    pub pattern: Option<PatternMode>,
    pub window_size: u8,
    pub unit: TemperatureUnit,
    pub temperature: Option<ArrayString<8>>,
    pub thermostat: Option<ThermostatStatus>,
    pub bus: BusStats,
    pub queued_transfers: usize,
    pub stats: ControllerStats,
    pub last_error: Option<ArrayString<96>>,
}

pub struct Controller {
    config: ControllerConfig,

    // Handler side
    irq: IrqShared,
    engine: BusEngine,
    outbox: Outbox,
    latch: SensorLatch,

    // Foreground side
    lock: LockAccess,
    patterns: PatternGenerator,
    thermostat: Thermostat,
    unit: TemperatureUnit,
    armed: Option<Armed>,
    indicator: StatusIndicator,
    temperature: Option<[u8; 3]>,
    running: bool,
    stats: ControllerStats,
    last_error: Option<NodeError>,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let window = SampleWindow::new(config.window_size)
            .map_err(|_| ConfigError::WindowSize(config.window_size))?;

        Ok(Self {
            irq: IrqShared::new(window),
            engine: BusEngine::with_policy(config.retry_policy),
            outbox: Outbox::new(),
            latch: SensorLatch::new(),
            lock: LockAccess::new(config.passkey, config.idle_timeout_ticks),
            patterns: PatternGenerator::new(),
            thermostat: Thermostat::new(config.ambient_band_deci_c),
            unit: TemperatureUnit::Celsius,
            armed: None,
            indicator: StatusIndicator::Locked,
            temperature: None,
            running: false,
            stats: ControllerStats::default(),
            last_error: None,
            config,
        })
    }

    pub fn start<I: ControllerIo>(&mut self, io: &mut I) {
        self.running = true;
        self.show(io, StatusIndicator::Locked);
        info!(variant = ?self.config.variant, window = self.config.window_size, "controller started");
    }

    // -- handler entry points --

    pub fn on_heartbeat_tick(&self) {
        self.irq.heartbeat.raise();
    }

    pub fn on_sample_tick(&self) {
        self.irq.sample_tick.raise();
    }

    /// ADC conversion finished.
    pub fn on_adc_complete(&mut self, raw: u16) {
        if let Some(average) = self.irq.window.record_sample(raw) {
            self.irq.average.replace(average);
        }
    }

    pub fn on_bus_interrupt<H: BusHal>(&mut self, hal: &mut H, event: BusEvent) {
        match self
            .engine
            .on_interrupt(hal, event, &mut self.outbox, &mut self.latch)
        {
            Ok(Progress::Completed(tx)) => {
                self.outbox.finish();
                if tx.direction == Direction::Receive {
                    if let Some(reading) = self.latch.reading(tx.address) {
                        let _ = self.irq.reading.post(reading);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                if matches!(e, BusError::RetryLimitExceeded { .. }) {
                    self.outbox.finish();
                }
                let _ = self.irq.bus_fault.post(e);
            }
        }
    }

    // -- foreground --

    /// One iteration of the foreground loop. Never blocks; a transfer that
    /// cannot start yet is retried on the next call.
    pub fn poll<H: BusHal, I: ControllerIo>(&mut self, bus: &mut H, io: &mut I) -> Result<(), NodeError> {
        if !self.running {
            return Ok(());
        }

        let result = self.poll_inner(bus, io);
        if let Err(e) = result {
            warn!(error = %e, "controller poll failed");
            self.last_error = Some(e);
        }
        result
    }

    fn poll_inner<H: BusHal, I: ControllerIo>(&mut self, bus: &mut H, io: &mut I) -> Result<(), NodeError> {
        if let Some(fault) = self.irq.bus_fault.take() {
            // Not fatal: the transfer is dropped and the loop carries on
            warn!(error = %fault, "bus fault");
            self.stats.bus_faults = self.stats.bus_faults.wrapping_add(1);
            self.last_error = Some(fault.into());
        }

        if let Some(reading) = self.irq.reading.take() {
            self.handle_reading(reading)?;
        }

        if let Some(key) = io.scan_key() {
            self.stats.keys = self.stats.keys.wrapping_add(1);
            self.handle_key(key, io)?;
        }

        if self.irq.heartbeat.take() {
            self.stats.heartbeats = self.stats.heartbeats.wrapping_add(1);
            self.handle_heartbeat(io)?;
        }

        if self.irq.sample_tick.take() {
            io.start_adc_conversion();
        }

        if let Some(average) = self.irq.average.take() {
            self.stats.averages = self.stats.averages.wrapping_add(1);
            self.handle_average(average)?;
        }

        self.pump(bus)
    }

    /// Start the next queued transfer if the bus is free.
    fn pump<H: BusHal>(&mut self, bus: &mut H) -> Result<(), NodeError> {
        if !self.engine.is_idle() {
            return Ok(());
        }

        // Promote before starting so the handler always finds its bytes
        if self.outbox.current().is_none() && self.outbox.promote().is_none() {
            return Ok(());
        }
        let Some(t) = self.outbox.current() else {
            return Ok(());
        };
        let (address, direction, count) = (t.address, t.direction, t.count);

        match self.engine.begin_transaction(bus, address, direction, count) {
            Ok(()) | Err(nb::Error::WouldBlock) => Ok(()),
            Err(nb::Error::Other(e)) => {
                self.outbox.finish();
                Err(e.into())
            }
        }
    }

    fn show<I: ControllerIo>(&mut self, io: &mut I, indicator: StatusIndicator) {
        self.indicator = indicator;
        io.show_status(indicator);
    }

    fn handle_key<I: ControllerIo>(&mut self, key: u8, io: &mut I) -> Result<(), NodeError> {
        match self.lock.handle(LockEvent::Key(key)) {
            LockOutput::Progress { entered } => {
                debug!(entered, "passkey entry");
                self.show(io, StatusIndicator::MidEntry);
            }
            LockOutput::Unlocked => {
                info!("unlocked");
                self.stats.unlocks = self.stats.unlocks.wrapping_add(1);
                self.show(io, StatusIndicator::Unlocked);
            }
            LockOutput::Rejected => {
                info!("wrong passkey");
                self.stats.rejected_attempts = self.stats.rejected_attempts.wrapping_add(1);
                self.show(io, StatusIndicator::Locked);
            }
            LockOutput::Relocked(cause) => self.relock(cause, io)?,
            LockOutput::Forward(key) => self.dispatch_command(key, io)?,
            LockOutput::Idle => {}
        }
        Ok(())
    }

    fn relock<I: ControllerIo>(&mut self, cause: RelockCause, io: &mut I) -> Result<(), NodeError> {
        info!(?cause, "locked");
        if cause == RelockCause::Timeout {
            self.stats.timeouts = self.stats.timeouts.wrapping_add(1);
        }

        self.armed = None;
        self.patterns.deactivate();
        if self.config.variant == Variant::LockBox {
            self.outbox.push_display(DisplayCommand::Bar(0))?;
        }
        self.outbox.push_display(DisplayCommand::LockClear)?;
        self.show(io, StatusIndicator::Locked);
        Ok(())
    }

    fn dispatch_command<I: ControllerIo>(&mut self, key: u8, io: &mut I) -> Result<(), NodeError> {
        if let Some(armed) = self.armed.take() {
            return self.apply_armed(armed, key, io);
        }

        match (self.config.variant, key) {
            (Variant::LockBox, b'A') | (Variant::Thermostat, b'*') => {
                self.arm(Armed::Window, io)
            }
            (Variant::LockBox, b'B') => self.arm(Armed::Pattern, io),
            (Variant::LockBox, b'C') | (Variant::Thermostat, b'#') => {
                self.unit = self.unit.toggle();
                info!(unit = ?self.unit, "temperature unit");
                self.outbox.push_display(DisplayCommand::UnitToggle)
            }
            (Variant::Thermostat, key) => match ThermostatMode::from_key(key) {
                Some(mode) => self.set_thermostat_mode(mode),
                None => {
                    debug!(key, "no command bound to key");
                    Ok(())
                }
            },
            (Variant::LockBox, key) => {
                debug!(key, "no command bound to key");
                Ok(())
            }
        }
    }

    fn arm<I: ControllerIo>(&mut self, armed: Armed, io: &mut I) -> Result<(), NodeError> {
        self.armed = Some(armed);
        match armed {
            Armed::Window => {
                self.show(io, StatusIndicator::WindowChange);
                self.outbox.push_display(DisplayCommand::WindowSubMode)
            }
            Armed::Pattern => {
                self.show(io, StatusIndicator::PatternChange);
                self.outbox.push_display(DisplayCommand::PatternSubMode)
            }
        }
    }

    /// The data byte always goes out so the LCD leaves its sub-mode too; it
    /// drops values it has no use for.
    fn apply_armed<I: ControllerIo>(&mut self, armed: Armed, key: u8, io: &mut I) -> Result<(), NodeError> {
        self.show(io, StatusIndicator::Unlocked);

        match armed {
            Armed::Pattern => match PatternMode::from_key(key) {
                Some(mode) => {
                    self.patterns.select(mode);
                }
                None => debug!(key, "pattern id out of range, ignored"),
            },
            Armed::Window => {
                let size = key.wrapping_sub(b'0');
                if self.irq.window.resize(size).is_ok() {
                    // Computed under the old window
                    if self.irq.average.take().is_some() {
                        debug!("stale average dropped");
                    }
                    info!(size, "window size");
                } else {
                    debug!(key, "window size out of range, ignored");
                }
            }
        }

        self.outbox.push_display(DisplayCommand::SubModeData(key))
    }

    fn set_thermostat_mode(&mut self, mode: ThermostatMode) -> Result<(), NodeError> {
        let drive = self.thermostat.set_mode(mode);
        self.outbox.push_display(DisplayCommand::ModeSelect(mode.index()))?;
        self.outbox.push_display(DisplayCommand::Bar(drive.id()))?;
        self.outbox.push(Transfer::write(RTC_ADDR, &RTC_RESET))
    }

    fn handle_heartbeat<I: ControllerIo>(&mut self, io: &mut I) -> Result<(), NodeError> {
        if let LockOutput::Relocked(cause) = self.lock.handle(LockEvent::Tick) {
            self.relock(cause, io)?;
        }

        match self.config.variant {
            Variant::LockBox => {
                if let Some(byte) = self.patterns.tick() {
                    self.outbox.push_display(DisplayCommand::Bar(byte))?;
                }
            }
            Variant::Thermostat => {
                // Pointer write then read, queued back to back
                self.outbox.push(Transfer::write(RTC_ADDR, &RTC_POINTER))?;
                self.outbox.push(Transfer::read(RTC_ADDR, RTC_READ_LEN))?;
                self.outbox.push(Transfer::read(LM92_ADDR, LM92_READ_LEN))?;
            }
        }
        Ok(())
    }

    fn handle_average(&mut self, average: u16) -> Result<(), NodeError> {
        let deci_c = adc_to_deci_celsius(average);
        let digits = temperature_digits(self.unit.convert(deci_c));
        debug!(average, deci_c, "temperature");
        self.temperature = Some(digits);
        self.outbox.push_display(DisplayCommand::Temperature(digits))?;

        if self.config.variant == Variant::Thermostat {
            if let Some(drive) = self.thermostat.update_plant(deci_c) {
                self.outbox.push_display(DisplayCommand::Bar(drive.id()))?;
            }
        }
        Ok(())
    }

    fn handle_reading(&mut self, reading: SensorReading) -> Result<(), NodeError> {
        match reading {
            SensorReading::Time(elapsed) => {
                self.thermostat.update_elapsed(elapsed);
                self.outbox.push_display(DisplayCommand::ElapsedTime(elapsed.digits()))
            }
            SensorReading::Ambient(raw) => {
                match self.thermostat.update_ambient(lm92_to_deci_celsius(raw)) {
                    Some(drive) => self.outbox.push_display(DisplayCommand::Bar(drive.id())),
                    None => Ok(()),
                }
            }
        }
    }

    // -- accessors --

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn lock_state(&self) -> LockState {
        self.lock.state()
    }

    pub fn indicator(&self) -> StatusIndicator {
        self.indicator
    }

    pub fn armed(&self) -> Option<Armed> {
        self.armed
    }

    pub fn patterns(&self) -> &PatternGenerator {
        &self.patterns
    }

    pub fn thermostat(&self) -> &Thermostat {
        &self.thermostat
    }

    pub fn unit(&self) -> TemperatureUnit {
        self.unit
    }

    pub fn window(&self) -> &SampleWindow {
        &self.irq.window
    }

    pub fn bus_stats(&self) -> &BusStats {
        self.engine.stats()
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    pub fn last_error(&self) -> Option<NodeError> {
        self.last_error
    }

    pub fn bus_idle(&self) -> bool {
        self.engine.is_idle()
    }

    /// Transfers queued or on the wire.
    pub fn has_pending_output(&self) -> bool {
        !self.outbox.is_empty() || !self.engine.is_idle()
    }

    /// Handler output the foreground has not consumed yet.
    pub fn has_pending_signals(&self) -> bool {
        self.irq.heartbeat.is_raised()
            || self.irq.sample_tick.is_raised()
            || !self.irq.average.is_empty()
            || !self.irq.reading.is_empty()
            || !self.irq.bus_fault.is_empty()
    }

    pub fn get_status(&self) -> NodeStatus {
        let temperature = self.temperature.map(|[t, o, d]| {
            let mut s = ArrayString::new();
            let _ = write!(s, "{}{}.{}{}", t as char, o as char, d as char, self.unit.symbol());
            s
        });
        let last_error = self.last_error.map(|e| {
            let mut s = ArrayString::new();
            let _ = write!(s, "{}", e);
            s
        });

        NodeStatus {
            variant: self.config.variant,
            running: self.running,
            lock: self.lock.state(),
            indicator: self.indicator,
            armed: self.armed,
            pattern: self.patterns.active(),
            window_size: self.irq.window.size(),
            unit: self.unit,
            temperature,
            thermostat: (self.config.variant == Variant::Thermostat)
                .then(|| self.thermostat.get_status()),
            bus: *self.engine.stats(),
            queued_transfers: self.outbox.len(),
            stats: self.stats,
            last_error,
        }
    }
}
