//! `RedisConcurrencyGate` against a real Redis instance: concurrent sends
//! against the same root event id yield exactly one success and one
//! `AlreadyRunning`. Skips when `REDIS_URL` is unset.

use hsm_core::{ConcurrencyGate, CoreError};
use hsm_persistence::RedisConcurrencyGate;
use ulid::Ulid;

#[test]
fn second_acquire_fails_while_the_first_guard_is_held() {
    let Ok(url) = std::env::var("REDIS_URL") else {
        eprintln!("skip (no REDIS_URL)");
        return;
    };
    let gate = RedisConcurrencyGate::new(&url, 1).expect("redis client");
    let root = Ulid::new();

    let first = gate.acquire(root).expect("first acquire should succeed");
    let second = gate.acquire(root);
    assert!(
        matches!(second, Err(CoreError::AlreadyRunning(_))),
        "a second acquire against the same root event id must fail while the first guard is held"
    );

    drop(first);
    let third = gate.acquire(root);
    assert!(third.is_ok(), "once the first guard is released, the lock must be acquirable again");
}
