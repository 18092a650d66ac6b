//! Reconnect-on-fail Monitor Tests

use std::time::{Duration, Instant};

use relaykv::network::{FailureMonitor, HealthVerdict, COOL_DOWN, FAILURE_THRESHOLD};

#[test]
fn test_quiet_intervals_are_healthy() {
    let mut monitor = FailureMonitor::new();
    let now = Instant::now();
    for _ in 0..50 {
        assert_eq!(monitor.observe(0, 0, now), HealthVerdict::Healthy);
    }
    assert_eq!(monitor.average(), 0.0);
}

#[test]
fn test_safety_buffer_damps_small_samples() {
    let mut monitor = FailureMonitor::new();
    let now = Instant::now();
    // 3 failures out of 3 is a ratio of 3 / 33, far from the threshold
    for _ in 0..100 {
        assert_eq!(monitor.observe(0, 3, now), HealthVerdict::Healthy);
    }
    assert!(monitor.average() < FAILURE_THRESHOLD);
}

#[test]
fn test_sustained_failures_trigger_recycles_then_cool_down() {
    let mut monitor = FailureMonitor::new();
    let now = Instant::now();

    // EMA of ~0.97: 0.097, 0.184, 0.263, then over 0.3
    for _ in 0..3 {
        assert_eq!(monitor.observe(0, 1000, now), HealthVerdict::Healthy);
    }
    assert_eq!(monitor.observe(0, 1000, now), HealthVerdict::Recycle);
    assert_eq!(monitor.observe(0, 1000, now), HealthVerdict::Recycle);
    assert_eq!(monitor.observe(0, 1000, now), HealthVerdict::CoolingDown);
    assert_eq!(monitor.observe(0, 1000, now + Duration::from_secs(60)), HealthVerdict::CoolingDown);

    let later = now + COOL_DOWN + Duration::from_secs(1);
    assert_eq!(monitor.observe(0, 1000, later), HealthVerdict::Recycle);
}

#[test]
fn test_reset_average_forgets_history() {
    let mut monitor = FailureMonitor::new();
    let now = Instant::now();
    for _ in 0..10 {
        monitor.observe(0, 1000, now);
    }
    assert!(monitor.average() > FAILURE_THRESHOLD);

    monitor.reset_average();
    assert_eq!(monitor.average(), 0.0);
    assert_eq!(monitor.observe(100, 0, now), HealthVerdict::Healthy);
}
