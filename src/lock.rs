//! Passkey lock as a pure transition function over key and tick events.

use crate::config::PASSKEY_LEN;
use crate::hal::KEY_LOCK;
use serde::{Deserialize, Serialize};

/// Attempt buffer contents whenever no entry is in progress.
pub const ATTEMPT_SENTINEL: [u8; PASSKEY_LEN] = *b"xxxx";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    Locked,
    /// `entered` is always in 1..PASSKEY_LEN.
    MidEntry { entered: u8 },
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockEvent {
    Key(u8),
    /// Dedicated lock key or an external force-lock.
    Reset,
    /// One heartbeat.
    Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelockCause {
    ResetKey,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutput {
    /// Character stored, attempt not complete.
    Progress { entered: u8 },
    Unlocked,
    /// Full attempt did not match.
    Rejected,
    Relocked(RelockCause),
    /// Unlocked: key belongs to the command dispatcher.
    Forward(u8),
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockAccess {
    passkey: [u8; PASSKEY_LEN],
    attempt: [u8; PASSKEY_LEN],
    state: LockState,
    idle_ticks: u8,
    timeout_ticks: u8,
}

impl LockAccess {
    pub fn new(passkey: [u8; PASSKEY_LEN], timeout_ticks: u8) -> Self {
        Self {
            passkey,
            attempt: ATTEMPT_SENTINEL,
            state: LockState::Locked,
            idle_ticks: 0,
            timeout_ticks,
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn attempt(&self) -> &[u8; PASSKEY_LEN] {
        &self.attempt
    }

    pub fn is_unlocked(&self) -> bool {
        self.state == LockState::Unlocked
    }

    fn relocked(mut self, cause: RelockCause) -> (Self, LockOutput) {
        self.state = LockState::Locked;
        self.attempt = ATTEMPT_SENTINEL;
        self.idle_ticks = 0;
        (self, LockOutput::Relocked(cause))
    }

    pub fn transition(mut self, event: LockEvent) -> (Self, LockOutput) {
        match (self.state, event) {
            (_, LockEvent::Reset) | (_, LockEvent::Key(KEY_LOCK)) => {
                self.relocked(RelockCause::ResetKey)
            }

            (LockState::Unlocked, LockEvent::Key(key)) => (self, LockOutput::Forward(key)),

            (LockState::Locked, LockEvent::Key(key)) => {
                self.attempt[0] = key;
                self.idle_ticks = 0;
                self.state = LockState::MidEntry { entered: 1 };
                (self, LockOutput::Progress { entered: 1 })
            }

            (LockState::MidEntry { entered }, LockEvent::Key(key)) => {
                self.attempt[usize::from(entered)] = key;
                self.idle_ticks = 0;
                let entered = entered + 1;

                if usize::from(entered) < PASSKEY_LEN {
                    self.state = LockState::MidEntry { entered };
                    return (self, LockOutput::Progress { entered });
                }

                let matched = self.attempt == self.passkey;
                self.attempt = ATTEMPT_SENTINEL;
                if matched {
                    self.state = LockState::Unlocked;
                    (self, LockOutput::Unlocked)
                } else {
                    self.state = LockState::Locked;
                    (self, LockOutput::Rejected)
                }
            }

            (LockState::MidEntry { .. }, LockEvent::Tick) => {
                self.idle_ticks = self.idle_ticks.saturating_add(1);
                if self.idle_ticks >= self.timeout_ticks {
                    self.relocked(RelockCause::Timeout)
                } else {
                    (self, LockOutput::Idle)
                }
            }

            (_, LockEvent::Tick) => (self, LockOutput::Idle),
        }
    }

    pub fn handle(&mut self, event: LockEvent) -> LockOutput {
        let (next, output) = self.transition(event);
        *self = next;
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_PASSKEY, IDLE_TIMEOUT_TICKS};

    fn lock() -> LockAccess {
        LockAccess::new(DEFAULT_PASSKEY, IDLE_TIMEOUT_TICKS)
    }

    fn type_keys(lock: &mut LockAccess, keys: &[u8]) -> LockOutput {
        let mut out = LockOutput::Idle;
        for &k in keys {
            out = lock.handle(LockEvent::Key(k));
        }
        out
    }

    #[test]
    fn test_correct_passkey_unlocks() {
        let mut lock = lock();
        assert_eq!(type_keys(&mut lock, b"111"), LockOutput::Progress { entered: 3 });
        assert_eq!(lock.state(), LockState::MidEntry { entered: 3 });
        assert_eq!(lock.handle(LockEvent::Key(b'1')), LockOutput::Unlocked);
        assert!(lock.is_unlocked());
        assert_eq!(lock.attempt(), &ATTEMPT_SENTINEL);
    }

    #[test]
    fn test_wrong_passkey_stays_locked() {
        let mut lock = lock();
        assert_eq!(type_keys(&mut lock, b"1211"), LockOutput::Rejected);
        assert_eq!(lock.state(), LockState::Locked);
        assert_eq!(lock.attempt(), b"xxxx");
    }

    #[test]
    fn test_unlocked_forwards_keys() {
        let mut lock = lock();
        type_keys(&mut lock, b"1111");
        assert_eq!(lock.handle(LockEvent::Key(b'B')), LockOutput::Forward(b'B'));
        assert_eq!(lock.handle(LockEvent::Tick), LockOutput::Idle);
        assert!(lock.is_unlocked());
    }

    #[test]
    fn test_lock_key_from_every_state() {
        let mut lock = lock();
        assert_eq!(
            lock.handle(LockEvent::Key(b'D')),
            LockOutput::Relocked(RelockCause::ResetKey)
        );

        type_keys(&mut lock, b"11");
        assert_eq!(
            lock.handle(LockEvent::Key(b'D')),
            LockOutput::Relocked(RelockCause::ResetKey)
        );
        assert_eq!(lock.attempt(), b"xxxx");

        type_keys(&mut lock, b"1111");
        assert_eq!(
            lock.handle(LockEvent::Reset),
            LockOutput::Relocked(RelockCause::ResetKey)
        );
        assert_eq!(lock.state(), LockState::Locked);
    }

    #[test]
    fn test_idle_timeout_only_mid_entry() {
        let mut lock = lock();
        for _ in 0..10 {
            assert_eq!(lock.handle(LockEvent::Tick), LockOutput::Idle);
        }

        type_keys(&mut lock, b"1");
        for _ in 0..IDLE_TIMEOUT_TICKS - 1 {
            assert_eq!(lock.handle(LockEvent::Tick), LockOutput::Idle);
        }
        assert_eq!(
            lock.handle(LockEvent::Tick),
            LockOutput::Relocked(RelockCause::Timeout)
        );
        assert_eq!(lock.state(), LockState::Locked);
    }

    #[test]
    fn test_key_press_restarts_idle_count() {
        let mut lock = lock();
        type_keys(&mut lock, b"1");
        for _ in 0..IDLE_TIMEOUT_TICKS - 1 {
            lock.handle(LockEvent::Tick);
        }
        lock.handle(LockEvent::Key(b'1'));
        for _ in 0..IDLE_TIMEOUT_TICKS - 1 {
            assert_eq!(lock.handle(LockEvent::Tick), LockOutput::Idle);
        }
        assert_eq!(type_keys(&mut lock, b"11"), LockOutput::Unlocked);
    }

    #[test]
    fn test_transition_is_pure() {
        let start = lock();
        let (next, out) = start.transition(LockEvent::Key(b'1'));
        assert_eq!(start.state(), LockState::Locked);
        assert_eq!(next.state(), LockState::MidEntry { entered: 1 });
        assert_eq!(out, LockOutput::Progress { entered: 1 });
    }
}
