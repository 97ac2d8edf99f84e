//! Unit tests for schedule arithmetic and scheduler state.

use std::time::Duration;

use server_warden::models::schedule::{after, before, is_stale};
use server_warden::models::state::ServerState;

use super::support::at;

#[test]
fn missing_or_past_schedules_are_stale() {
    let now = at(2024, 1, 1, 12, 0, 0);

    assert!(is_stale(None, now));
    assert!(is_stale(Some(now), now));
    assert!(is_stale(Some(at(2024, 1, 1, 11, 0, 0)), now));
    assert!(!is_stale(Some(at(2024, 1, 1, 13, 0, 0)), now));
}

#[test]
fn after_and_before_shift_by_duration() {
    let base = at(2024, 1, 1, 12, 0, 0);

    assert_eq!(after(base, Duration::from_secs(90)), at(2024, 1, 1, 12, 1, 30));
    assert_eq!(before(base, Duration::from_secs(300)), at(2024, 1, 1, 11, 55, 0));
}

#[test]
fn out_of_range_shift_saturates_to_input() {
    let base = at(2024, 1, 1, 12, 0, 0);
    assert_eq!(after(base, Duration::MAX), base);
    assert_eq!(before(base, Duration::MAX), base);
}

#[test]
fn only_starting_and_stopping_are_transient() {
    assert!(ServerState::Starting.is_transient());
    assert!(ServerState::Stopping.is_transient());
    assert!(!ServerState::Running.is_transient());
    assert!(!ServerState::Stopped.is_transient());
}
