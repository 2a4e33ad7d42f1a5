//! Core types for the event-tracking engine
//!
//! This module defines the records that flow into the tracker (already parsed
//! schedule sections and their event entries), the normalized records the
//! tracker reasons about, and the error types shared across the crate.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type used throughout the engine
pub type Timestamp = DateTime<Utc>;

/// Result type for session-level operations
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Duration value announced for an event whose end is not yet known.
///
/// This is the all-F BCD duration (`FF:FF:FF`) read as hours/minutes/seconds.
pub const UNDEFINED_DURATION: u32 = 165 * 3600 + 165 * 60 + 165;

/// Year carried by a start time whose value is undefined (all-F MJD).
pub const UNDEFINED_YEAR: u16 = 1900;

/// Section number of the "present" half of an EIT p/f table
pub const SECTION_PRESENT: u8 = 0;

/// Section number of the "following" half of an EIT p/f table
pub const SECTION_FOLLOWING: u8 = 1;

/// Which half of the present/following schedule a section describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Present,
    Following,
}

impl Slot {
    /// Map a section number to its slot, rejecting corrupt values
    pub fn from_section_number(section_number: u8) -> Option<Slot> {
        match section_number {
            SECTION_PRESENT => Some(Slot::Present),
            SECTION_FOLLOWING => Some(Slot::Following),
            _ => None,
        }
    }

    pub fn is_present(self) -> bool {
        self == Slot::Present
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Present => write!(f, "present"),
            Slot::Following => write!(f, "following"),
        }
    }
}

/// One half (present or following) of a service's announced schedule,
/// as delivered by the upstream table parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSection {
    /// Mirrors `section_number == 0`; informational only.
    #[serde(default)]
    pub is_present: bool,
    pub section_number: u8,
    pub version: u8,
    pub service_id: u16,
    pub transport_stream_id: u16,
}

impl ScheduleSection {
    /// Slot of this section, or `None` if the section number is corrupt
    pub fn slot(&self) -> Option<Slot> {
        Slot::from_section_number(self.section_number)
    }
}

/// Calendar start time as carried in a broadcast schedule entry (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl BroadcastTime {
    /// The start time announced for an event that is delayed indefinitely
    pub fn undefined() -> Self {
        Self {
            year: UNDEFINED_YEAR,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        }
    }

    pub fn is_undefined(&self) -> bool {
        self.year == UNDEFINED_YEAR
    }

    /// Decode the 40-bit on-wire start time: a 16-bit Modified Julian Date
    /// followed by hour, minute and second in BCD.
    ///
    /// An all-ones field is the undefined marker and maps to
    /// [`BroadcastTime::undefined`].
    pub fn from_mjd_bcd(raw: [u8; 5]) -> Self {
        if raw.iter().all(|&b| b == 0xFF) {
            return Self::undefined();
        }

        let mjd = u16::from_be_bytes([raw[0], raw[1]]) as i64;
        // MJD 0 is 1858-11-17
        let date = NaiveDate::from_ymd_opt(1858, 11, 17)
            .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(mjd)));

        match date {
            Some(date) => {
                use chrono::Datelike;
                Self {
                    year: date.year() as u16,
                    month: date.month() as u8,
                    day: date.day() as u8,
                    hour: bcd(raw[2]),
                    minute: bcd(raw[3]),
                    second: bcd(raw[4]),
                }
            }
            None => Self::undefined(),
        }
    }

    /// Convert to an absolute instant.
    ///
    /// Returns `None` for the undefined sentinel and for impossible dates;
    /// never falls back to the epoch.
    pub fn to_timestamp(&self) -> Option<Timestamp> {
        if self.is_undefined() {
            return None;
        }
        NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)
            .and_then(|d| d.and_hms_opt(self.hour as u32, self.minute as u32, self.second as u32))
            .map(|naive| naive.and_utc())
    }
}

/// Decode the 24-bit BCD duration field (hh:mm:ss) into seconds.
///
/// The all-F pattern decodes to [`UNDEFINED_DURATION`] by construction.
pub fn duration_from_bcd(raw: [u8; 3]) -> u32 {
    bcd(raw[0]) as u32 * 3600 + bcd(raw[1]) as u32 * 60 + bcd(raw[2]) as u32
}

fn bcd(b: u8) -> u8 {
    (b >> 4) * 10 + (b & 0x0F)
}

/// An event entry of a schedule section, as parsed upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub event_id: u16,
    pub start: BroadcastTime,
    /// Duration in seconds; [`UNDEFINED_DURATION`] when not yet known
    pub duration: u32,
    /// Event name from the short event descriptor, already decoded upstream
    #[serde(default)]
    pub title: Option<String>,
    /// The event's raw descriptor loop
    #[serde(default)]
    pub descriptors: Vec<u8>,
}

/// Canonical normalized event announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub event_id: u16,
    /// `None` when the start time is undefined (delayed event)
    pub start_time: Option<Timestamp>,
    /// Raw seconds; compare against [`UNDEFINED_DURATION`] before any arithmetic
    pub duration_seconds: u32,
    pub title: Option<String>,
    pub raw_descriptors: Vec<u8>,
}

impl EventRecord {
    pub fn has_undefined_duration(&self) -> bool {
        self.duration_seconds == UNDEFINED_DURATION
    }

    /// End of the event, if both start and duration are defined
    pub fn end_time(&self) -> Option<Timestamp> {
        if self.has_undefined_duration() {
            return None;
        }
        self.start_time
            .and_then(|start| {
                start.checked_add_signed(chrono::TimeDelta::seconds(i64::from(self.duration_seconds)))
            })
    }

    /// A following entry announcing nothing: no start and no duration
    pub fn is_placeholder(&self) -> bool {
        self.start_time.is_none() && self.has_undefined_duration()
    }
}

/// A (service, event) pair named by an event-group descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventRef {
    pub service_id: u16,
    pub event_id: u16,
}

/// Decoded event-group relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationRecord {
    /// This event was moved here from one of the listed events
    MovedFrom { candidates: Vec<EventRef> },
    /// This event continues as another event on the same transport
    RelayedToSameTransport { service_id: u16, event_id: u16 },
    /// This event continues as an event carried by another transport stream
    RelayedToOtherTransport {
        original_network_id: u16,
        transport_stream_id: u16,
        service_id: u16,
        event_id: u16,
    },
}

impl RelationRecord {
    /// Destination of a relay, with its transport if it is elsewhere
    pub fn relay_target(&self) -> Option<(EventRef, Option<u16>)> {
        match *self {
            RelationRecord::RelayedToSameTransport { service_id, event_id } => {
                Some((EventRef { service_id, event_id }, None))
            }
            RelationRecord::RelayedToOtherTransport {
                transport_stream_id,
                service_id,
                event_id,
                ..
            } => Some((EventRef { service_id, event_id }, Some(transport_stream_id))),
            RelationRecord::MovedFrom { .. } => None,
        }
    }
}

impl fmt::Display for RelationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationRecord::MovedFrom { candidates } => {
                write!(f, "moved-from [")?;
                for (i, c) in candidates.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}@0x{:04x}", c.event_id, c.service_id)?;
                }
                write!(f, "]")
            }
            RelationRecord::RelayedToSameTransport { service_id, event_id } => {
                write!(f, "relay to ev:{} (svc:0x{:04x})", event_id, service_id)
            }
            RelationRecord::RelayedToOtherTransport {
                transport_stream_id,
                service_id,
                event_id,
                ..
            } => write!(
                f,
                "relay to ev:{} (svc:0x{:04x}) ts:0x{:04x}",
                event_id, service_id, transport_stream_id
            ),
        }
    }
}

/// Errors produced while decoding an event-group descriptor
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Not an event group descriptor: tag 0x{0:02X}")]
    WrongTag(u8),

    #[error("Descriptor truncated: {0} bytes")]
    Truncated(usize),

    #[error("Descriptor length mismatch: declared {declared}, buffer {actual}, needed {needed}")]
    LengthMismatch {
        declared: usize,
        actual: usize,
        needed: usize,
    },

    #[error("Relay descriptor without a destination event")]
    MissingCandidate,

    #[error("Unsupported event group type: {0}")]
    UnsupportedGroup(u8),
}

/// Session-fatal errors
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Failed to find the channel for service 0x{service_id:04x} (ts:0x{transport_stream_id:04x})")]
    ChannelNotFound {
        service_id: u16,
        transport_stream_id: u16,
    },

    #[error("Target event never observed within {minutes} min, giving up")]
    SelectionTimeout { minutes: u64 },

    #[error("Capture error: {0}")]
    Upstream(String),

    #[error("Finished by unexpected end of stream")]
    UnexpectedEnd,

    #[error("Capture reconfiguration failed: {0}")]
    Reconfigure(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_year_has_no_timestamp() {
        let t = BroadcastTime::undefined();
        assert!(t.is_undefined());
        assert_eq!(t.to_timestamp(), None);
    }

    #[test]
    fn test_invalid_date_has_no_timestamp() {
        let t = BroadcastTime {
            year: 2024,
            month: 2,
            day: 30,
            hour: 0,
            minute: 0,
            second: 0,
        };
        assert_eq!(t.to_timestamp(), None);
    }

    #[test]
    fn test_mjd_bcd_decoding() {
        // 0xC079 = MJD 49273 = 1993-10-13, 12:45:00
        let t = BroadcastTime::from_mjd_bcd([0xC0, 0x79, 0x12, 0x45, 0x00]);
        assert_eq!((t.year, t.month, t.day), (1993, 10, 13));
        assert_eq!((t.hour, t.minute, t.second), (12, 45, 0));

        let undef = BroadcastTime::from_mjd_bcd([0xFF; 5]);
        assert!(undef.is_undefined());
    }

    #[test]
    fn test_bcd_duration() {
        assert_eq!(duration_from_bcd([0x01, 0x45, 0x30]), 3600 + 45 * 60 + 30);
        assert_eq!(duration_from_bcd([0xFF, 0xFF, 0xFF]), UNDEFINED_DURATION);
    }

    #[test]
    fn test_end_time_ignores_undefined_duration() {
        let record = EventRecord {
            event_id: 1,
            start_time: BroadcastTime {
                year: 2024,
                month: 5,
                day: 1,
                hour: 20,
                minute: 0,
                second: 0,
            }
            .to_timestamp(),
            duration_seconds: UNDEFINED_DURATION,
            title: None,
            raw_descriptors: Vec::new(),
        };
        assert_eq!(record.end_time(), None);
        assert!(!record.is_placeholder());
    }

    #[test]
    fn test_slot_from_section_number() {
        assert_eq!(Slot::from_section_number(0), Some(Slot::Present));
        assert_eq!(Slot::from_section_number(1), Some(Slot::Following));
        assert_eq!(Slot::from_section_number(2), None);
    }
}
