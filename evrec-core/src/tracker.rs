//! Event tracking state machine
//!
//! Consumes present/following sections and membership updates, and drives the
//! capture gate so that exactly the target event ends up in the recording,
//! across unplanned pauses, delays, relays and moves.
//!
//! ## Transition rules (sections of the tracked service)
//!
//! 1. Malformed sections (bad section number, no events) are ignored.
//! 2. Without a target, the selection policy may pick this event.
//! 3. The slot the section describes is overwritten.
//! 4. Target in the present slot: lock, open the gate, look for a relay.
//! 5. Target in the following slot: lock, open the gate only if its start is
//!    imminent, look for a relay.
//! 6. Otherwise, before the first lock: keep waiting.
//! 7. Present moved on while following has not caught up: pause.
//! 8. Following moved on while present still lags: wait for present.
//! 9. Target still in either slot: wait.
//! 10. Relay/move pending: relocate.
//! 11. Otherwise the event is over.
//!
//! Sections of other services are only inspected for "moved from" relations
//! naming the target event.

use crate::capture::{CaptureGate, CaptureTarget, ChannelResolver};
use crate::config::TrackerConfig;
use crate::descriptor::find_relation;
use crate::normalize::normalize;
use crate::selection::select;
use crate::session::{SlotEntry, TrackingSession};
use crate::types::{
    DecodeError, EventRecord, EventRef, RawEvent, RelationRecord, Result, ScheduleSection, Slot,
    Timestamp, TrackerError,
};
use chrono::TimeDelta;

/// Result of feeding one update to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Finished(FinishReason),
}

/// Why a session ended normally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The tracked event left both slots with nothing to relocate to
    EventEnded,
    /// The (temporary) service carrying the event was withdrawn
    ServiceWithdrawn,
    /// The configured recording length elapsed
    LengthElapsed,
    /// Shut down from outside
    Cancelled,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::EventEnded => write!(f, "event ended"),
            FinishReason::ServiceWithdrawn => write!(f, "service withdrawn"),
            FinishReason::LengthElapsed => write!(f, "recording length elapsed"),
            FinishReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The tracking state machine and its collaborators
pub struct Tracker<G, R> {
    config: TrackerConfig,
    session: TrackingSession,
    gate: G,
    resolver: R,
}

impl<G: CaptureGate, R: ChannelResolver> Tracker<G, R> {
    /// Create a tracker for `service_id`.
    ///
    /// With `event_id == None` the event on air (or about to start) is
    /// selected by the selection policy.
    pub fn new(
        config: TrackerConfig,
        service_id: u16,
        event_id: Option<u16>,
        gate: G,
        resolver: R,
    ) -> Self {
        Self {
            config,
            session: TrackingSession::new(service_id, event_id),
            gate,
            resolver,
        }
    }

    pub fn session(&self) -> &TrackingSession {
        &self.session
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn gate(&self) -> &G {
        &self.gate
    }

    pub fn gate_mut(&mut self) -> &mut G {
        &mut self.gate
    }

    /// Feed one present/following section
    ///
    /// # Arguments
    /// * `section` - Section header fields
    /// * `events` - Event entries of the section (only the first is used)
    /// * `now` - Current wall-clock time
    ///
    /// # Returns
    /// * `Ok(Step)` - Whether the session continues
    /// * `Err(TrackerError)` - A relocation could not be carried out
    pub fn on_section(
        &mut self,
        section: &ScheduleSection,
        events: &[RawEvent],
        now: Timestamp,
    ) -> Result<Step> {
        let (slot, record) = match (section.slot(), normalize(section, events)) {
            (Some(slot), Some(record)) => (slot, record),
            _ => return Ok(Step::Continue),
        };

        if section.service_id != self.session.target_service {
            if self.session.target_event.is_some() {
                return self.check_moved(section, slot, record, now);
            }
            return Ok(Step::Continue);
        }

        self.track(section, slot, record, now)
    }

    /// Feed the current program list of the transport (PAT)
    pub fn on_membership(&mut self, programs: &[u16]) -> Step {
        if !self.session.watching_membership_only {
            return Step::Continue;
        }
        if programs.contains(&self.session.target_service) {
            return Step::Continue;
        }
        self.set_gate(false);
        log::info!(
            "Finished recording due to the end of service 0x{:04x}.",
            self.session.target_service
        );
        Step::Finished(FinishReason::ServiceWithdrawn)
    }

    /// Close the gate ahead of a shutdown
    pub fn stop(&mut self) {
        self.set_gate(false);
    }

    fn track(
        &mut self,
        section: &ScheduleSection,
        slot: Slot,
        record: EventRecord,
        now: Timestamp,
    ) -> Result<Step> {
        log::debug!(
            "EIT. ID:{} sec:{} ver:{}",
            record.event_id,
            section.section_number,
            section.version
        );

        let was_selected = self.session.target_event.is_some();
        if !was_selected && select(slot, &record, now, self.config.grace_seconds) {
            self.session.target_event = Some(record.event_id);
            log::info!("selected event:{} ...", record.event_id);
        }

        if slot == Slot::Following && record.is_placeholder() {
            return Ok(Step::Continue);
        }

        // Upstream may re-deliver an unchanged section
        if was_selected {
            if let Some(entry) = self.session.slot(slot) {
                if entry.version == section.version && entry.event_id == record.event_id {
                    log::trace!("Same {} section v{} again, skipping", slot, section.version);
                    return Ok(Step::Continue);
                }
            }
        }

        self.session.set_slot(
            slot,
            SlotEntry {
                version: section.version,
                event_id: record.event_id,
                title: record.title.clone(),
            },
        );

        let target = match self.session.target_event {
            Some(target) => target,
            None => return Ok(Step::Continue),
        };

        if record.event_id == target {
            self.session.locked = true;
            if self.session.event_start.is_none() {
                self.session.event_start = record.start_time;
            }

            let open = match slot {
                Slot::Present => true,
                // A start time already in the past means an unplanned pause
                // is beginning, not that the event is about to start
                Slot::Following => self.start_is_imminent(now),
            };
            self.set_gate(open);
            self.session.target_transport = Some(section.transport_stream_id);
            self.check_relay(&record, section.transport_stream_id);
            return Ok(Step::Continue);
        }

        if self.session.recording && slot == Slot::Present && self.session.versions_diverge() {
            // Present switched first; wait for following to tell a pause
            // from the real end
            self.set_gate(false);
            return Ok(Step::Continue);
        }

        if !self.session.locked {
            return Ok(Step::Continue);
        }

        if slot == Slot::Following
            && self.session.versions_diverge()
            && !self.session.slot_holds_target(Slot::Present)
        {
            log::debug!("EIT/f updated ahead of EIT/p, waiting for EIT/p");
            return Ok(Step::Continue);
        }

        if self.session.slot_holds_target(Slot::Present)
            || self.session.slot_holds_target(Slot::Following)
        {
            return Ok(Step::Continue);
        }

        if self.session.pending_relocation.is_some() {
            return self.relocate_and_replay(section, slot, record, now);
        }

        self.set_gate(false);
        log::info!("Finished recording.");
        Ok(Step::Finished(FinishReason::EventEnded))
    }

    fn start_is_imminent(&self, now: Timestamp) -> bool {
        let limit = TimeDelta::try_seconds(self.config.start_tolerance_seconds)
            .and_then(|tolerance| now.checked_add_signed(tolerance));
        match (self.session.event_start, limit) {
            (Some(start), Some(limit)) => now <= start && start <= limit,
            _ => false,
        }
    }

    /// Look for a relay announced by the tracked event itself
    fn check_relay(&mut self, record: &EventRecord, current_transport: u16) {
        let relation = match find_relation(&record.raw_descriptors) {
            Some(Ok(relation)) => relation,
            Some(Err(e)) => {
                log_decode_error(record.event_id, &e);
                return;
            }
            None => return,
        };

        let pending = match relation {
            RelationRecord::RelayedToOtherTransport {
                transport_stream_id,
                service_id,
                event_id,
                ..
            } if transport_stream_id == 0 || transport_stream_id == current_transport => {
                RelationRecord::RelayedToSameTransport { service_id, event_id }
            }
            RelationRecord::MovedFrom { .. } => return,
            relay => relay,
        };

        if self.session.pending_relocation.as_ref() != Some(&pending) {
            log::info!("will be {}", pending);
        }
        self.session.pending_relocation = Some(pending);
    }

    /// Look for another service claiming the target event moved to it
    fn check_moved(
        &mut self,
        section: &ScheduleSection,
        slot: Slot,
        record: EventRecord,
        now: Timestamp,
    ) -> Result<Step> {
        let candidates = match find_relation(&record.raw_descriptors) {
            Some(Ok(RelationRecord::MovedFrom { candidates })) => candidates,
            Some(Ok(_)) | None => return Ok(Step::Continue),
            Some(Err(e)) => {
                log_decode_error(record.event_id, &e);
                return Ok(Step::Continue);
            }
        };

        let tracked = EventRef {
            service_id: self.session.target_service,
            event_id: match self.session.target_event {
                Some(id) => id,
                None => return Ok(Step::Continue),
            },
        };
        if !candidates.contains(&tracked) {
            return Ok(Step::Continue);
        }

        log::info!(
            "the event:{}[svc:0x{:04x}] moved to ev:{}[svc:0x{:04x}].",
            tracked.event_id,
            tracked.service_id,
            record.event_id,
            section.service_id
        );
        self.session.pending_relocation = Some(RelationRecord::RelayedToSameTransport {
            service_id: section.service_id,
            event_id: record.event_id,
        });

        if self.session.locked {
            // Consumed once the event leaves the tracked service's slots
            return Ok(Step::Continue);
        }
        self.relocate_and_replay(section, slot, record, now)
    }

    /// Relocate, then evaluate the triggering section against the new target
    /// if it belongs to the new service
    fn relocate_and_replay(
        &mut self,
        section: &ScheduleSection,
        slot: Slot,
        record: EventRecord,
        now: Timestamp,
    ) -> Result<Step> {
        self.relocate()?;
        if section.service_id == self.session.target_service {
            return self.track(section, slot, record, now);
        }
        Ok(Step::Continue)
    }

    fn relocate(&mut self) -> Result<()> {
        let relation = match self.session.pending_relocation.take() {
            Some(relation) => relation,
            None => return Ok(()),
        };
        let (destination, other_transport) = match relation.relay_target() {
            Some(target) => target,
            None => return Ok(()),
        };

        log::info!(
            "relaying to the next event {}[0x{:04x}] ts:{:?}.",
            destination.event_id,
            destination.service_id,
            other_transport
        );
        self.set_gate(false);
        self.session.retarget(destination, other_transport);

        let channel = match other_transport {
            Some(tsid) => Some(self.resolve_channel(destination.service_id, tsid)?),
            None => None,
        };

        self.gate.reconfigure(&CaptureTarget {
            service_id: destination.service_id,
            channel,
            transport_stream_id: other_transport,
        })
    }

    /// Find the channel carrying `service_id` on another transport.
    ///
    /// Relays may land on a temporary sub-service that the directory does
    /// not list; in that case the primary service of the group is looked up
    /// instead and the session starts watching the program list.
    fn resolve_channel(&mut self, service_id: u16, transport_stream_id: u16) -> Result<String> {
        if let Some(channel) = self.resolver.lookup(None, Some(service_id)) {
            return Ok(channel.name);
        }

        self.session.watching_membership_only = true;
        let primary = primary_service_id(service_id, transport_stream_id);
        log::warn!(
            "No channel for svc:0x{:04x}, trying primary svc:0x{:04x}",
            service_id,
            primary
        );

        self.resolver
            .lookup(None, Some(primary))
            .map(|channel| channel.name)
            .ok_or(TrackerError::ChannelNotFound {
                service_id,
                transport_stream_id,
            })
    }

    fn set_gate(&mut self, open: bool) {
        if self.session.recording == open {
            return;
        }
        if open {
            self.gate.open();
            self.session.recording = true;
            self.session.has_recorded = true;
            log::info!(
                "Start recording event:{} (title: {})...",
                self.session.target_event.unwrap_or_default(),
                self.session.target_title()
            );
        } else {
            self.gate.close();
            self.session.recording = false;
            log::info!("Paused recording...");
        }
    }
}

fn log_decode_error(event_id: u16, error: &DecodeError) {
    match error {
        DecodeError::UnsupportedGroup(_) => {
            log::debug!("ev:{} event group ignored: {}", event_id, error)
        }
        _ => log::warn!("broken EIT (ev:{}): {}", event_id, error),
    }
}

/// Primary service id of a temporary sub-service.
///
/// Terrestrial transports (`tsid & 0xF800 == 0x7800`) group services by 8,
/// satellite ones by 10.
pub fn primary_service_id(service_id: u16, transport_stream_id: u16) -> u16 {
    if transport_stream_id & 0xF800 == 0x7800 {
        service_id / 8 * 8
    } else {
        service_id / 10 * 10
    }
}
