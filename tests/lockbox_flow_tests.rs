use keynet::config::{ControllerConfig, IDLE_TIMEOUT_TICKS};
use keynet::dispatcher::Armed;
use keynet::error::{BusError, NodeError, SimError};
use keynet::filter::TemperatureUnit;
use keynet::hal::StatusIndicator;
use keynet::lock::LockState;
use keynet::pattern::PatternMode;
use keynet::peripheral::SubMode;
use keynet::protocol::LED_BAR_ADDR;
use keynet::sim::{Network, MAX_SETTLE_STEPS};
use keynet::RetryPolicy;

// 1241 is 30.6 C
const ROOM_CODE: u16 = 1241;

fn unlocked() -> Network {
    let mut net = Network::new(ControllerConfig::default()).unwrap();
    net.press_all(b"1111").unwrap();
    assert_eq!(net.controller.lock_state(), LockState::Unlocked);
    net
}

fn bar_after_heartbeats(net: &mut Network, beats: usize) -> Vec<u8> {
    (0..beats)
        .map(|_| {
            net.heartbeat().unwrap();
            net.bar().shown()
        })
        .collect()
}

#[test]
fn test_unlock_indicator_sequence() {
    let net = unlocked();
    assert_eq!(
        net.io.shown,
        vec![
            StatusIndicator::Locked,
            StatusIndicator::MidEntry,
            StatusIndicator::MidEntry,
            StatusIndicator::MidEntry,
            StatusIndicator::Unlocked,
        ]
    );
    assert_eq!(net.controller.stats().unlocks, 1);
}

#[test]
fn test_wrong_passkey_sends_nothing() {
    let mut net = Network::new(ControllerConfig::default()).unwrap();
    net.press_all(b"1234").unwrap();

    assert_eq!(net.controller.lock_state(), LockState::Locked);
    assert_eq!(net.controller.indicator(), StatusIndicator::Locked);
    assert_eq!(net.controller.stats().rejected_attempts, 1);
    assert_eq!(net.wire.get_stats().starts, 0);

    // A fresh attempt after the rejection still works
    net.press_all(b"1111").unwrap();
    assert_eq!(net.controller.lock_state(), LockState::Unlocked);
}

#[test]
fn test_custom_passkey() {
    let config = ControllerConfig::default().with_passkey("7A#*").unwrap();
    let mut net = Network::new(config).unwrap();
    net.press_all(b"1111").unwrap();
    assert_eq!(net.controller.lock_state(), LockState::Locked);
    net.press_all(b"7A#*").unwrap();
    assert_eq!(net.controller.lock_state(), LockState::Unlocked);
}

#[test]
fn test_pattern_select_and_animation() {
    let mut net = unlocked();

    net.press(b'B').unwrap();
    assert_eq!(net.controller.armed(), Some(Armed::Pattern));
    assert_eq!(net.controller.indicator(), StatusIndicator::PatternChange);
    assert_eq!(net.lcd().screen().top.as_str(), "set pattern");

    net.press(b'5').unwrap();
    assert_eq!(net.controller.armed(), None);
    assert_eq!(net.controller.indicator(), StatusIndicator::Unlocked);
    assert_eq!(net.controller.patterns().active(), Some(PatternMode::RotateLeft));
    assert_eq!(net.lcd().screen().top.as_str(), "rotate 1 left");

    assert_eq!(bar_after_heartbeats(&mut net, 3), vec![0x02, 0x04, 0x08]);
}

#[test]
fn test_every_pattern_first_bytes() {
    let expected: [(u8, [u8; 3]); 8] = [
        (b'0', [0xAA, 0xAA, 0xAA]),
        (b'1', [0x55, 0xAA, 0x55]),
        (b'2', [0x01, 0x02, 0x03]),
        (b'3', [0x18, 0x24, 0x42]),
        (b'4', [0xFE, 0xFD, 0xFC]),
        (b'5', [0x02, 0x04, 0x08]),
        (b'6', [0xBF, 0xDF, 0xEF]),
        (b'7', [0x03, 0x07, 0x0F]),
    ];

    for (key, bytes) in expected {
        let mut net = unlocked();
        net.press_all(&[b'B', key]).unwrap();
        assert_eq!(
            bar_after_heartbeats(&mut net, 3),
            bytes.to_vec(),
            "pattern {}",
            key as char
        );
    }
}

#[test]
fn test_reselecting_pattern_restarts_it() {
    let mut net = unlocked();
    net.press_all(b"B5").unwrap();
    assert_eq!(bar_after_heartbeats(&mut net, 3), vec![0x02, 0x04, 0x08]);

    net.press_all(b"B5").unwrap();
    assert_eq!(bar_after_heartbeats(&mut net, 2), vec![0x02, 0x04]);
}

#[test]
fn test_switching_patterns_keeps_progress() {
    let mut net = unlocked();
    net.press_all(b"B5").unwrap();
    bar_after_heartbeats(&mut net, 2);

    net.press_all(b"B2").unwrap();
    assert_eq!(bar_after_heartbeats(&mut net, 2), vec![0x01, 0x02]);

    // Rotate picks up where it stopped
    net.press_all(b"B5").unwrap();
    assert_eq!(bar_after_heartbeats(&mut net, 1), vec![0x08]);
}

#[test]
fn test_pattern_out_of_range_ignored() {
    let mut net = unlocked();
    net.press_all(b"B9").unwrap();

    assert_eq!(net.controller.patterns().active(), None);
    assert_eq!(net.controller.armed(), None);
    assert_eq!(net.controller.indicator(), StatusIndicator::Unlocked);
    assert_eq!(net.lcd().pattern(), None);
    assert_eq!(net.lcd().sub_mode(), SubMode::None);
    assert_eq!(net.lcd().screen().top.as_str(), "none");
    assert_eq!(bar_after_heartbeats(&mut net, 1), vec![0x00]);
}

#[test]
fn test_window_size_change() {
    let mut net = unlocked();
    net.press(b'A').unwrap();
    assert_eq!(net.controller.indicator(), StatusIndicator::WindowChange);
    assert_eq!(net.lcd().screen().top.as_str(), "set window size");

    net.press(b'5').unwrap();
    assert_eq!(net.controller.window().size(), 5);
    assert_eq!(net.lcd().window(), b'5');
    assert!(net.lcd().screen().bottom.ends_with("N=5"));
    assert_eq!(net.lcd().screen().top.as_str(), "none");

    // Five fresh samples before the next reading
    for _ in 0..4 {
        net.sample(ROOM_CODE).unwrap();
    }
    assert_eq!(net.controller.stats().averages, 0);
    net.sample(ROOM_CODE).unwrap();
    assert_eq!(net.controller.stats().averages, 1);
}

#[test]
fn test_window_zero_ignored() {
    let mut net = unlocked();
    net.press_all(b"A0").unwrap();
    assert_eq!(net.controller.window().size(), 3);
    assert_eq!(net.lcd().window(), b'3');
    assert_eq!(net.lcd().sub_mode(), SubMode::None);
}

#[test]
fn test_temperature_display_after_warm_up() {
    let mut net = Network::new(ControllerConfig::default()).unwrap();

    net.sample(ROOM_CODE).unwrap();
    net.sample(ROOM_CODE).unwrap();
    assert_eq!(net.lcd().screen().bottom.as_str(), "");

    net.sample(ROOM_CODE).unwrap();
    assert_eq!(net.lcd().screen().bottom.as_str(), "T=30.6\u{b0}C     N=3");
    assert_eq!(net.io.adc_requests, 3);
}

#[test]
fn test_out_of_scale_adc_codes_clamp() {
    let mut net = Network::new(ControllerConfig::default()).unwrap();
    for _ in 0..3 {
        net.sample(u16::MAX).unwrap();
    }
    // Full scale is well below zero, shown as the display floor
    assert_eq!(net.lcd().screen().bottom.as_str(), "T=00.0\u{b0}C     N=3");
    assert!(net.controller.last_error().is_none());
}

#[test]
fn test_unit_toggle() {
    let mut net = unlocked();
    for _ in 0..3 {
        net.sample(ROOM_CODE).unwrap();
    }

    net.press(b'C').unwrap();
    assert_eq!(net.controller.unit(), TemperatureUnit::Fahrenheit);
    assert_eq!(net.lcd().unit(), TemperatureUnit::Fahrenheit);
    assert_eq!(net.lcd().screen().bottom.as_str(), "T=30.6\u{b0}F     N=3");

    net.sample(ROOM_CODE).unwrap();
    assert_eq!(net.lcd().screen().bottom.as_str(), "T=87.0\u{b0}F     N=3");

    net.press(b'C').unwrap();
    net.sample(ROOM_CODE).unwrap();
    assert_eq!(net.lcd().screen().bottom.as_str(), "T=30.6\u{b0}C     N=3");
}

#[test]
fn test_idle_entry_times_out() {
    let mut net = Network::new(ControllerConfig::default()).unwrap();
    net.press_all(b"11").unwrap();

    for _ in 1..IDLE_TIMEOUT_TICKS {
        net.heartbeat().unwrap();
        assert!(matches!(
            net.controller.lock_state(),
            LockState::MidEntry { entered: 2 }
        ));
    }
    net.heartbeat().unwrap();
    assert_eq!(net.controller.lock_state(), LockState::Locked);
    assert_eq!(net.controller.stats().timeouts, 1);

    // Partial attempt is gone
    net.press_all(b"11").unwrap();
    assert!(matches!(
        net.controller.lock_state(),
        LockState::MidEntry { entered: 2 }
    ));
}

#[test]
fn test_key_press_restarts_idle_count() {
    let mut net = Network::new(ControllerConfig::default()).unwrap();
    net.press(b'1').unwrap();
    for _ in 1..IDLE_TIMEOUT_TICKS {
        net.heartbeat().unwrap();
    }
    net.press(b'1').unwrap();
    for _ in 1..IDLE_TIMEOUT_TICKS {
        net.heartbeat().unwrap();
    }
    assert!(matches!(
        net.controller.lock_state(),
        LockState::MidEntry { entered: 2 }
    ));
}

#[test]
fn test_unlocked_never_times_out() {
    let mut net = unlocked();
    for _ in 0..3 * IDLE_TIMEOUT_TICKS {
        net.heartbeat().unwrap();
    }
    assert_eq!(net.controller.lock_state(), LockState::Unlocked);
}

#[test]
fn test_lock_key_clears_everything() {
    let mut net = unlocked();
    net.press_all(b"B5").unwrap();
    bar_after_heartbeats(&mut net, 2);
    net.press(b'A').unwrap();
    assert_eq!(net.controller.armed(), Some(Armed::Window));

    net.press(b'D').unwrap();
    assert_eq!(net.controller.lock_state(), LockState::Locked);
    assert_eq!(net.controller.indicator(), StatusIndicator::Locked);
    assert_eq!(net.controller.armed(), None);
    assert_eq!(net.controller.patterns().active(), None);
    assert_eq!(net.bar().shown(), 0);
    assert_eq!(net.lcd().screen().top.as_str(), "");
    assert_eq!(net.lcd().screen().bottom.as_str(), "");

    assert_eq!(bar_after_heartbeats(&mut net, 2), vec![0, 0]);
}

#[test]
fn test_lock_key_during_entry() {
    let mut net = Network::new(ControllerConfig::default()).unwrap();
    net.press_all(b"11D").unwrap();
    assert_eq!(net.controller.lock_state(), LockState::Locked);
    net.press_all(b"1111").unwrap();
    assert_eq!(net.controller.lock_state(), LockState::Unlocked);
}

#[test]
fn test_nack_replay_delivers_bar_byte() {
    let mut net = unlocked();
    net.press_all(b"B0").unwrap();

    net.wire.force_nacks(2);
    net.heartbeat().unwrap();

    assert_eq!(net.bar().shown(), 0xAA);
    assert_eq!(net.controller.bus_stats().retries, 2);
    assert_eq!(net.wire.get_stats().nacks_injected, 2);
    assert!(net.controller.last_error().is_none());
}

#[test]
fn test_random_nacks_on_bar_still_animate() {
    let mut net = unlocked();
    net.press_all(b"B2").unwrap();

    for expected in 1..=20u8 {
        net.wire.force_nacks(u32::from(expected % 3));
        net.heartbeat().unwrap();
        assert_eq!(net.bar().shown(), expected);
    }
}

#[test]
fn test_retry_cap_drops_transfer_to_dead_bar() {
    let config = ControllerConfig::default().with_retry_policy(RetryPolicy::Capped(1));
    let mut net = Network::new(config).unwrap();
    net.wire.set_dead_address(Some(LED_BAR_ADDR));
    net.press_all(b"1111").unwrap();
    net.press_all(b"B1").unwrap();

    net.heartbeat().unwrap();
    assert_eq!(
        net.controller.last_error(),
        Some(NodeError::Bus(BusError::RetryLimitExceeded {
            address: LED_BAR_ADDR,
            attempts: 2,
        }))
    );
    assert_eq!(net.controller.stats().bus_faults, 1);
    assert_eq!(net.controller.bus_stats().aborted, 1);
    assert!(!net.controller.has_pending_output());

    // The LCD is unaffected
    net.press(b'A').unwrap();
    assert_eq!(net.lcd().screen().top.as_str(), "set window size");
}

#[test]
fn test_unbounded_retry_never_settles_on_dead_bar() {
    let mut net = unlocked();
    net.wire.set_dead_address(Some(LED_BAR_ADDR));
    net.press_all(b"B0").unwrap();

    assert_eq!(net.heartbeat(), Err(SimError::Livelock(MAX_SETTLE_STEPS)));
    assert!(!net.controller.bus_idle());
}

#[test]
fn test_snapshot_serializes() {
    let mut net = unlocked();
    net.press_all(b"B3").unwrap();
    net.heartbeat().unwrap();

    let json = serde_json::to_value(net.snapshot()).unwrap();
    assert_eq!(json["controller"]["lock"], "Unlocked");
    assert_eq!(json["controller"]["pattern"], "Shuttle");
    assert_eq!(json["bar"], 0x18);
    assert_eq!(json["lcd"]["top"], "in and out");
}
