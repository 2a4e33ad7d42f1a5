//! Event selection policy
//!
//! Used only while a session has no target event: decides whether the event
//! announced in a present or following slot should become the target.

use crate::types::{EventRecord, Slot, Timestamp};
use chrono::TimeDelta;

/// Decide whether `record`, announced in `slot`, becomes the target.
///
/// * Present slot: selected if it is open-ended (undefined duration) or will
///   still be running `grace_seconds` from now. The margin lets a recording
///   started shortly before the wanted event skip the one about to end.
/// * Following slot: selected if its start time is defined and falls before
///   `now + grace_seconds`.
///
/// Both comparisons are strict.
pub fn select(slot: Slot, record: &EventRecord, now: Timestamp, grace_seconds: i64) -> bool {
    log::debug!(
        "search p/f:{} ev:{} start:{:?} dur:{}...",
        slot,
        record.event_id,
        record.start_time,
        record.duration_seconds
    );

    if slot == Slot::Present && record.has_undefined_duration() {
        return true;
    }

    let horizon = match TimeDelta::try_seconds(grace_seconds).and_then(|g| now.checked_add_signed(g)) {
        Some(horizon) => horizon,
        None => {
            log::warn!("Grace margin of {} s is out of range", grace_seconds);
            return false;
        }
    };

    let deadline = match slot {
        Slot::Present => record.end_time(),
        Slot::Following => record.start_time,
    };
    match (slot, deadline) {
        (Slot::Present, Some(end)) => end > horizon,
        (Slot::Following, Some(start)) => start < horizon,
        (_, None) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UNDEFINED_DURATION;
    use chrono::{Duration, TimeZone};

    const GRACE: i64 = 60;

    fn now() -> Timestamp {
        chrono::Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap()
    }

    fn record(start: Option<Timestamp>, duration_seconds: u32) -> EventRecord {
        EventRecord {
            event_id: 0x1000,
            start_time: start,
            duration_seconds,
            title: None,
            raw_descriptors: Vec::new(),
        }
    }

    #[test]
    fn test_open_ended_present_is_always_selected() {
        let r = record(None, UNDEFINED_DURATION);
        for offset in [-86_400i64, 0, 86_400] {
            let t = now() + Duration::seconds(offset);
            assert!(select(Slot::Present, &r, t, GRACE));
        }
    }

    #[test]
    fn test_present_end_boundary() {
        // start + duration == now + grace: not selected
        let start = now() - Duration::seconds(600);
        let on_boundary = record(Some(start), 600 + GRACE as u32);
        assert!(!select(Slot::Present, &on_boundary, now(), GRACE));

        // start + duration == now + grace + 1: selected
        let beyond = record(Some(start), 600 + GRACE as u32 + 1);
        assert!(select(Slot::Present, &beyond, now(), GRACE));

        // Seen from one second earlier, the boundary event qualifies
        let earlier = now() - Duration::seconds(1);
        assert!(select(Slot::Present, &on_boundary, earlier, GRACE));
    }

    #[test]
    fn test_present_with_undefined_start() {
        let r = record(None, 1800);
        assert!(!select(Slot::Present, &r, now(), GRACE));
    }

    #[test]
    fn test_following_imminent() {
        let soon = record(Some(now() + Duration::seconds(30)), 1800);
        assert!(select(Slot::Following, &soon, now(), GRACE));

        let later = record(Some(now() + Duration::seconds(GRACE)), 1800);
        assert!(!select(Slot::Following, &later, now(), GRACE));
    }

    #[test]
    fn test_following_delayed_is_never_selected() {
        let delayed = record(None, 1800);
        assert!(!select(Slot::Following, &delayed, now(), GRACE));
    }

    #[test]
    fn test_out_of_range_grace_selects_nothing_timed() {
        let soon = record(Some(now() + Duration::seconds(30)), 1800);
        assert!(!select(Slot::Following, &soon, now(), i64::MAX));
        assert!(!select(Slot::Present, &record(Some(now()), 1800), now(), i64::MAX));

        // Open-ended present events need no horizon
        let open = record(None, UNDEFINED_DURATION);
        assert!(select(Slot::Present, &open, now(), i64::MAX));
    }
}
