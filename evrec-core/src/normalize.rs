//! Section normalizer
//!
//! Turns a present/following section and its event list into the canonical
//! [`EventRecord`] the tracker works with.

use crate::types::{EventRecord, RawEvent, ScheduleSection};

/// Normalize the first event of a present/following section.
///
/// Returns `None` for a corrupt section number and for an empty event list
/// (e.g. a gap between programmes). The undefined start time (year 1900)
/// becomes `start_time = None`; the duration is passed through untouched so
/// the undefined sentinel survives.
pub fn normalize(section: &ScheduleSection, events: &[RawEvent]) -> Option<EventRecord> {
    if section.slot().is_none() {
        log::debug!(
            "Broken EIT: bad section number {} (svc:0x{:04x})",
            section.section_number,
            section.service_id
        );
        return None;
    }

    let event = events.first()?;

    let start_time = event.start.to_timestamp();
    if start_time.is_none() && !event.start.is_undefined() {
        log::debug!(
            "Event {} carries an invalid start time {:?}",
            event.event_id,
            event.start
        );
    }

    Some(EventRecord {
        event_id: event.event_id,
        start_time,
        duration_seconds: event.duration,
        title: event.title.clone().filter(|t| !t.is_empty()),
        raw_descriptors: event.descriptors.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BroadcastTime, UNDEFINED_DURATION};

    fn section(section_number: u8) -> ScheduleSection {
        ScheduleSection {
            is_present: section_number == 0,
            section_number,
            version: 3,
            service_id: 0x0400,
            transport_stream_id: 0x7FE0,
        }
    }

    fn raw(event_id: u16, start: BroadcastTime, duration: u32) -> RawEvent {
        RawEvent {
            event_id,
            start,
            duration,
            title: Some("News".to_string()),
            descriptors: Vec::new(),
        }
    }

    fn evening() -> BroadcastTime {
        BroadcastTime {
            year: 2024,
            month: 5,
            day: 1,
            hour: 19,
            minute: 0,
            second: 0,
        }
    }

    #[test]
    fn test_first_event_only() {
        let events = vec![raw(10, evening(), 1800), raw(11, evening(), 600)];
        let record = normalize(&section(0), &events).unwrap();
        assert_eq!(record.event_id, 10);
        assert_eq!(record.duration_seconds, 1800);
        assert_eq!(record.start_time, evening().to_timestamp());
        assert_eq!(record.title.as_deref(), Some("News"));
    }

    #[test]
    fn test_empty_event_list() {
        assert!(normalize(&section(1), &[]).is_none());
    }

    #[test]
    fn test_corrupt_section_number() {
        let events = vec![raw(10, evening(), 1800)];
        assert!(normalize(&section(2), &events).is_none());
    }

    #[test]
    fn test_sentinels_are_preserved() {
        let events = vec![raw(12, BroadcastTime::undefined(), UNDEFINED_DURATION)];
        let record = normalize(&section(1), &events).unwrap();
        assert_eq!(record.start_time, None);
        assert_eq!(record.duration_seconds, UNDEFINED_DURATION);
        assert!(record.has_undefined_duration());
        assert_eq!(record.end_time(), None);
        assert!(record.is_placeholder());
    }

    #[test]
    fn test_empty_title_is_dropped() {
        let mut ev = raw(10, evening(), 60);
        ev.title = Some(String::new());
        let record = normalize(&section(0), &[ev]).unwrap();
        assert_eq!(record.title, None);
    }
}
