//! Readiness polling at the default one-second cadence.

use std::time::{Duration, Instant};

use harness::readiness::wait_ready;
use harness::test_support::ScriptedTransport;

/// Three refused polls, then a card: ready well before the 30s ceiling.
#[test]
fn card_after_three_failures_is_ready_within_four_seconds() {
    let transport = ScriptedTransport::new(3);
    let started = Instant::now();
    wait_ready(
        &transport,
        "http://127.0.0.1:9002",
        Duration::from_secs(30),
        Duration::from_secs(1),
    )
    .expect("ready");
    let elapsed = started.elapsed();
    assert_eq!(transport.polls(), 4);
    assert!(elapsed >= Duration::from_secs(3), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(4), "{elapsed:?}");
}
