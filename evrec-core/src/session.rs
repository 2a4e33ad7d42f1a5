//! Tracking session state
//!
//! A [`TrackingSession`] is the single mutable record of a recording request.
//! Only the tracker mutates it. Invariants:
//!
//! - `recording` implies `locked`: the gate never opens before the target
//!   event has been confirmed in a present or following slot.
//! - `pending_relocation` is consumed only while `locked`, once the tracked
//!   event has left both slots.

use crate::types::{EventRef, RelationRecord, Slot, Timestamp};
use std::fmt;

/// What the tracker remembers about one present/following slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotEntry {
    pub version: u8,
    pub event_id: u16,
    pub title: Option<String>,
}

/// Mutable state of one recording request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingSession {
    pub target_event: Option<u16>,
    pub target_service: u16,
    pub target_transport: Option<u16>,
    pub present: Option<SlotEntry>,
    pub following: Option<SlotEntry>,
    pub locked: bool,
    pub recording: bool,
    pub event_start: Option<Timestamp>,
    pub pending_relocation: Option<RelationRecord>,
    pub watching_membership_only: bool,
    /// Set on the first gate opening, never cleared
    pub has_recorded: bool,
}

/// Conceptual tracking state, derived from the session fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    AwaitingSelection,
    WaitingPresent,
    Tracking,
    Recording,
    Paused,
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackingState::AwaitingSelection => "awaiting-selection",
            TrackingState::WaitingPresent => "waiting-present",
            TrackingState::Tracking => "tracking",
            TrackingState::Recording => "recording",
            TrackingState::Paused => "paused",
        };
        f.write_str(name)
    }
}

impl TrackingSession {
    /// Start a session for `service_id`. Without an explicit event id the
    /// session waits for the selection policy to pick one.
    pub fn new(service_id: u16, event_id: Option<u16>) -> Self {
        Self {
            target_event: event_id,
            target_service: service_id,
            target_transport: None,
            present: None,
            following: None,
            locked: false,
            recording: false,
            event_start: None,
            pending_relocation: None,
            watching_membership_only: false,
            has_recorded: false,
        }
    }

    pub fn state(&self) -> TrackingState {
        match (self.target_event, self.locked, self.recording) {
            (None, _, _) => TrackingState::AwaitingSelection,
            (Some(_), false, _) => TrackingState::WaitingPresent,
            (Some(_), true, true) => TrackingState::Recording,
            (Some(_), true, false) if self.has_recorded => TrackingState::Paused,
            (Some(_), true, false) => TrackingState::Tracking,
        }
    }

    pub fn slot(&self, slot: Slot) -> Option<&SlotEntry> {
        match slot {
            Slot::Present => self.present.as_ref(),
            Slot::Following => self.following.as_ref(),
        }
    }

    pub fn set_slot(&mut self, slot: Slot, entry: SlotEntry) {
        match slot {
            Slot::Present => self.present = Some(entry),
            Slot::Following => self.following = Some(entry),
        }
    }

    pub fn present_version(&self) -> Option<u8> {
        self.present.as_ref().map(|e| e.version)
    }

    pub fn following_version(&self) -> Option<u8> {
        self.following.as_ref().map(|e| e.version)
    }

    /// True if the present and following slots were last updated by
    /// different table versions, i.e. a turnover is half-way through
    pub fn versions_diverge(&self) -> bool {
        self.present_version() != self.following_version()
    }

    /// True if `slot` currently announces the target event
    pub fn slot_holds_target(&self, slot: Slot) -> bool {
        match (self.target_event, self.slot(slot)) {
            (Some(target), Some(entry)) => entry.event_id == target,
            _ => false,
        }
    }

    /// Title of the target event from whichever slot announces it
    pub fn target_title(&self) -> &str {
        let entry = if self.slot_holds_target(Slot::Present) {
            self.present.as_ref()
        } else {
            self.following.as_ref()
        };
        entry
            .and_then(|e| e.title.as_deref())
            .unwrap_or("???")
    }

    /// Point the session at a relay/move destination.
    ///
    /// Slots and the lock are reset; the new target is known, so the session
    /// resumes waiting for it to appear in the present slot.
    pub fn retarget(&mut self, destination: EventRef, transport: Option<u16>) {
        self.locked = false;
        self.present = None;
        self.following = None;
        self.target_event = Some(destination.event_id);
        self.target_service = destination.service_id;
        if transport.is_some() {
            self.target_transport = transport;
        }
        self.pending_relocation = None;
    }
}
