//! Single-consumer event loop
//!
//! Upstream records, timer expiries and shutdown requests are all
//! [`TrackerEvent`]s handled one at a time by [`Runner::dispatch`]. Timers
//! are deadlines kept by the loop itself: [`Runner::run`] waits on the queue
//! only until the nearest deadline.
//!
//! Every way out of the loop (finish, error, cancellation) goes through the
//! same drain: close the gate, then flush and release the sink.

use crate::capture::{CaptureGate, ChannelResolver};
use crate::tracker::{FinishReason, Step, Tracker};
use crate::types::{RawEvent, Result, ScheduleSection, Timestamp, TrackerError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{Receiver, RecvTimeoutError};

/// A record delivered by the upstream table parser / capture source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpstreamEvent {
    /// A present/following section and its events
    Section {
        section: ScheduleSection,
        #[serde(default)]
        events: Vec<RawEvent>,
    },
    /// Program numbers currently listed in the PAT
    Membership { programs: Vec<u16> },
    /// Captured transport stream bytes
    Payload { data: Vec<u8> },
    /// The capture source failed
    Error { message: String },
    /// The capture source ran dry
    Ended,
}

/// Timers run by the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Target not observed in time
    Selection,
    /// Maximum recording length reached
    Length,
}

/// Everything the loop reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    Upstream(UpstreamEvent),
    Timeout(TimerKind),
    Shutdown,
}

/// Source of wall-clock time
pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

#[derive(Debug, Default)]
struct Timers {
    selection: Option<Timestamp>,
    length: Option<Timestamp>,
}

impl Timers {
    fn next_deadline(&self) -> Option<Timestamp> {
        match (self.selection, self.length) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Take the earliest timer that is due at `now`
    fn pop_due(&mut self, now: Timestamp) -> Option<TimerKind> {
        let deadline = self.next_deadline().filter(|d| *d <= now)?;
        if self.selection == Some(deadline) {
            self.selection = None;
            Some(TimerKind::Selection)
        } else {
            self.length = None;
            Some(TimerKind::Length)
        }
    }
}

/// Drives a [`Tracker`] from a queue of events
pub struct Runner<G, R, C> {
    tracker: Tracker<G, R>,
    clock: C,
    timers: Timers,
    length_armed: bool,
}

impl<G: CaptureGate, R: ChannelResolver, C: Clock> Runner<G, R, C> {
    /// Create a runner; the selection timer starts now if configured
    pub fn new(tracker: Tracker<G, R>, clock: C) -> Self {
        let mut timers = Timers::default();
        if let Some(wait) = tracker.config().selection_wait() {
            timers.selection = clock.now().checked_add_signed(wait);
        }
        Self {
            tracker,
            clock,
            timers,
            length_armed: false,
        }
    }

    pub fn tracker(&self) -> &Tracker<G, R> {
        &self.tracker
    }

    pub fn into_tracker(self) -> Tracker<G, R> {
        self.tracker
    }

    /// Handle one event.
    ///
    /// # Returns
    /// * `Ok(None)` - Keep going
    /// * `Ok(Some(reason))` - The session finished normally
    /// * `Err(TrackerError)` - The session failed
    pub fn dispatch(&mut self, event: TrackerEvent) -> Result<Option<FinishReason>> {
        let now = self.clock.now();
        let step = match event {
            TrackerEvent::Upstream(UpstreamEvent::Section { section, events }) => {
                self.tracker.on_section(&section, &events, now)?
            }
            TrackerEvent::Upstream(UpstreamEvent::Membership { programs }) => {
                self.tracker.on_membership(&programs)
            }
            TrackerEvent::Upstream(UpstreamEvent::Payload { data }) => {
                self.tracker.gate_mut().write(&data)?;
                Step::Continue
            }
            TrackerEvent::Upstream(UpstreamEvent::Error { message }) => {
                return Err(TrackerError::Upstream(message));
            }
            TrackerEvent::Upstream(UpstreamEvent::Ended) => {
                return Err(TrackerError::UnexpectedEnd);
            }
            TrackerEvent::Timeout(TimerKind::Selection) => {
                if self.tracker.session().locked {
                    return Ok(None);
                }
                let wait = self.tracker.config().selection_wait().unwrap_or_default();
                return Err(TrackerError::SelectionTimeout {
                    minutes: u64::try_from(wait.num_minutes()).unwrap_or_default(),
                });
            }
            TrackerEvent::Timeout(TimerKind::Length) => {
                self.tracker.stop();
                log::info!("Finished recording by timer.");
                Step::Finished(FinishReason::LengthElapsed)
            }
            TrackerEvent::Shutdown => {
                log::info!("Shutting down...");
                Step::Finished(FinishReason::Cancelled)
            }
        };

        self.update_timers(now);

        match step {
            Step::Continue => Ok(None),
            Step::Finished(reason) => Ok(Some(reason)),
        }
    }

    /// Fire the earliest due timer, if any
    pub fn fire_due_timer(&mut self) -> Result<Option<FinishReason>> {
        match self.timers.pop_due(self.clock.now()) {
            Some(kind) => self.dispatch(TrackerEvent::Timeout(kind)),
            None => Ok(None),
        }
    }

    /// Run until the session ends, then drain.
    ///
    /// A closed queue counts as an unexpected end of the upstream stream.
    pub fn run(mut self, rx: Receiver<TrackerEvent>) -> Result<(FinishReason, Tracker<G, R>)> {
        let result = self.run_loop(&rx);
        let drained = self.drain();
        match result {
            Ok(reason) => {
                drained?;
                Ok((reason, self.tracker))
            }
            Err(e) => {
                if let Err(drain_err) = drained {
                    log::warn!("Drain after failure also failed: {}", drain_err);
                }
                Err(e)
            }
        }
    }

    fn run_loop(&mut self, rx: &Receiver<TrackerEvent>) -> Result<FinishReason> {
        loop {
            if let Some(reason) = self.fire_due_timer()? {
                return Ok(reason);
            }

            let event = match self.timers.next_deadline() {
                Some(deadline) => {
                    let wait = (deadline - self.clock.now())
                        .to_std()
                        .unwrap_or(std::time::Duration::ZERO);
                    match rx.recv_timeout(wait) {
                        Ok(event) => event,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => {
                            TrackerEvent::Upstream(UpstreamEvent::Ended)
                        }
                    }
                }
                None => rx
                    .recv()
                    .unwrap_or(TrackerEvent::Upstream(UpstreamEvent::Ended)),
            };

            if let Some(reason) = self.dispatch(event)? {
                return Ok(reason);
            }
        }
    }

    fn update_timers(&mut self, now: Timestamp) {
        let session = self.tracker.session();
        if session.locked {
            self.timers.selection = None;
        }
        if !self.length_armed && session.has_recorded {
            self.length_armed = true;
            if let Some(length) = self.tracker.config().record_length() {
                log::debug!("Recording length limited to {} min", length.num_minutes());
                self.timers.length = now.checked_add_signed(length);
            }
        }
    }

    fn drain(&mut self) -> std::io::Result<()> {
        self.tracker.stop();
        self.tracker.gate_mut().drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{GateCommand, MemoryGate};
    use crate::config::TrackerConfig;
    use crate::directory::ChannelDirectory;
    use crate::types::{BroadcastTime, UNDEFINED_DURATION};
    use chrono::{Duration, TimeZone};
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::mpsc;

    #[derive(Clone)]
    struct ManualClock(Rc<Cell<Timestamp>>);

    impl ManualClock {
        fn new() -> Self {
            Self(Rc::new(Cell::new(
                Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap(),
            )))
        }

        fn advance(&self, seconds: i64) {
            self.0.set(self.0.get() + Duration::seconds(seconds));
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Timestamp {
            self.0.get()
        }
    }

    fn on_air(event_id: u16) -> TrackerEvent {
        TrackerEvent::Upstream(UpstreamEvent::Section {
            section: ScheduleSection {
                is_present: true,
                section_number: 0,
                version: 1,
                service_id: 0x0400,
                transport_stream_id: 0x7FE0,
            },
            events: vec![RawEvent {
                event_id,
                start: BroadcastTime::undefined(),
                duration: UNDEFINED_DURATION,
                title: None,
                descriptors: Vec::new(),
            }],
        })
    }

    fn runner(
        config: TrackerConfig,
        clock: ManualClock,
    ) -> Runner<MemoryGate, ChannelDirectory, ManualClock> {
        let tracker = Tracker::new(
            config,
            0x0400,
            Some(10),
            MemoryGate::new(),
            ChannelDirectory::default(),
        );
        Runner::new(tracker, clock)
    }

    #[test]
    fn test_selection_timeout() {
        let clock = ManualClock::new();
        let mut r = runner(TrackerConfig::new().with_selection_wait(5), clock.clone());

        clock.advance(4 * 60);
        assert!(r.fire_due_timer().unwrap().is_none());

        clock.advance(60);
        assert!(matches!(
            r.fire_due_timer(),
            Err(TrackerError::SelectionTimeout { minutes: 5 })
        ));
    }

    #[test]
    fn test_out_of_range_waits_do_not_arm_timers() {
        let clock = ManualClock::new();
        let config = TrackerConfig::new()
            .with_selection_wait(200_000_000_000)
            .with_record_length(u64::MAX);
        let mut r = runner(config, clock.clone());
        assert!(r.timers.next_deadline().is_none());

        r.dispatch(on_air(10)).unwrap();
        assert!(r.tracker().session().recording);
        assert!(r.timers.next_deadline().is_none());
    }

    #[test]
    fn test_zero_wait_uses_fallback() {
        let clock = ManualClock::new();
        let mut r = runner(TrackerConfig::new().with_selection_wait(0), clock.clone());

        clock.advance(29 * 60);
        assert!(r.fire_due_timer().unwrap().is_none());
        clock.advance(60);
        assert!(matches!(
            r.fire_due_timer(),
            Err(TrackerError::SelectionTimeout { minutes: 30 })
        ));
    }

    #[test]
    fn test_selection_timer_cancelled_once_locked() {
        let clock = ManualClock::new();
        let mut r = runner(TrackerConfig::new().with_selection_wait(5), clock.clone());
        assert!(r.dispatch(on_air(10)).unwrap().is_none());

        clock.advance(10 * 60);
        assert!(r.fire_due_timer().unwrap().is_none());
    }

    #[test]
    fn test_length_timer_armed_on_first_recording() {
        let clock = ManualClock::new();
        let mut r = runner(TrackerConfig::new().with_record_length(30), clock.clone());
        r.dispatch(on_air(10)).unwrap();

        clock.advance(29 * 60);
        assert!(r.fire_due_timer().unwrap().is_none());
        clock.advance(60);
        assert_eq!(
            r.fire_due_timer().unwrap(),
            Some(FinishReason::LengthElapsed)
        );
        assert!(!r.tracker().session().recording);
    }

    #[test]
    fn test_payload_written_only_while_recording() {
        let clock = ManualClock::new();
        let mut r = runner(TrackerConfig::new(), clock);
        let payload = |b: &[u8]| {
            TrackerEvent::Upstream(UpstreamEvent::Payload { data: b.to_vec() })
        };

        r.dispatch(payload(b"early")).unwrap();
        r.dispatch(on_air(10)).unwrap();
        r.dispatch(payload(b"programme")).unwrap();

        assert_eq!(r.tracker().gate().written, b"programme");
    }

    #[test]
    fn test_run_drains_on_unexpected_end() {
        let clock = ManualClock::new();
        let r = runner(TrackerConfig::new(), clock);
        let (tx, rx) = mpsc::channel();
        tx.send(on_air(10)).unwrap();
        drop(tx);

        let result = r.run(rx);
        assert!(matches!(result, Err(TrackerError::UnexpectedEnd)));
    }

    #[test]
    fn test_run_finishes_on_shutdown() {
        let clock = ManualClock::new();
        let r = runner(TrackerConfig::new(), clock);
        let (tx, rx) = mpsc::channel();
        tx.send(on_air(10)).unwrap();
        tx.send(TrackerEvent::Shutdown).unwrap();

        let (reason, tracker) = r.run(rx).unwrap();
        assert_eq!(reason, FinishReason::Cancelled);
        assert_eq!(
            tracker.gate().commands,
            vec![GateCommand::Open, GateCommand::Close, GateCommand::Drain]
        );
    }

    #[test]
    fn test_upstream_error_is_fatal() {
        let clock = ManualClock::new();
        let mut r = runner(TrackerConfig::new(), clock);
        let err = r
            .dispatch(TrackerEvent::Upstream(UpstreamEvent::Error {
                message: "frontend lost lock".to_string(),
            }))
            .unwrap_err();
        assert!(err.to_string().contains("frontend lost lock"));
    }

    #[test]
    fn test_feed_json_shape() {
        let line = r#"{"type":"membership","programs":[1024,1025]}"#;
        let event: UpstreamEvent = serde_json::from_str(line).unwrap();
        assert_eq!(
            event,
            UpstreamEvent::Membership {
                programs: vec![1024, 1025]
            }
        );
        let ended: UpstreamEvent = serde_json::from_str(r#"{"type":"ended"}"#).unwrap();
        assert_eq!(ended, UpstreamEvent::Ended);
    }
}
