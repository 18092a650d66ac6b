//! Backoff Tests

use std::time::Duration;

use relaykv::network::{Backoff, MAX_JITTER};

#[test]
fn test_base_delay_doubles_up_to_the_cap() {
    let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000));
    let mut bases = Vec::new();
    for _ in 0..6 {
        bases.push(backoff.base_delay().as_millis());
        backoff.next_delay();
    }

    assert_eq!(bases, vec![100, 200, 400, 800, 1000, 1000]);
    assert_eq!(backoff.attempts(), 6);
}

#[test]
fn test_jitter_stays_in_range() {
    let mut backoff = Backoff::new(Duration::from_millis(200), Duration::from_secs(60));
    for _ in 0..20 {
        let base = backoff.base_delay();
        let delay = backoff.next_delay();
        assert!(delay >= base);
        assert!(delay <= base.mul_f64(1.0 + MAX_JITTER));
    }
}

#[test]
fn test_reset_starts_over() {
    let mut backoff = Backoff::new(Duration::from_millis(50), Duration::from_secs(1));
    backoff.next_delay();
    backoff.next_delay();
    backoff.reset();

    assert_eq!(backoff.attempts(), 0);
    assert_eq!(backoff.base_delay(), Duration::from_millis(50));
}

#[test]
fn test_many_attempts_do_not_overflow() {
    let mut backoff = Backoff::new(Duration::from_millis(200), Duration::from_secs(60));
    for _ in 0..100 {
        backoff.next_delay();
    }
    assert_eq!(backoff.base_delay(), Duration::from_secs(60));
}
