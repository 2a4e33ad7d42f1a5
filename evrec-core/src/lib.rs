//! Broadcast Event Tracking Library
//!
//! Decides when to record a single broadcast event (a programme instance)
//! from a stream of already-parsed EIT present/following sections and PAT
//! program lists, following the event through delays, unplanned pauses,
//! relays and moves.
//!
//! # Architecture
//!
//! The pure parts are free functions:
//! - [`decode_relation`] decodes event group descriptors (relay/move)
//! - [`normalize`] turns a section into an [`EventRecord`]
//! - [`select`] picks the target when none was requested
//!
//! The stateful part is the [`Tracker`], which owns the [`TrackingSession`]
//! and drives two collaborators through traits:
//! - [`CaptureGate`]: the valve in front of the recording sink
//! - [`ChannelResolver`]: channel directory lookups on relocation
//!
//! [`Runner`] feeds a tracker from a single-consumer queue and runs the
//! selection and length timers.
//!
//! The library does NOT:
//! - Tune, demultiplex or parse PSI/SI tables
//! - Write recordings (the gate implementation does)
//! - Track more than one event at a time
//!
//! # Example Usage
//!
//! ```no_run
//! use evrec_core::{ChannelDirectory, MemoryGate, Runner, SystemClock, Tracker, TrackerConfig};
//! use std::sync::mpsc;
//!
//! let config = TrackerConfig::new().with_selection_wait(5);
//! let tracker = Tracker::new(
//!     config,
//!     0x0400,
//!     None,
//!     MemoryGate::new(),
//!     ChannelDirectory::default(),
//! );
//!
//! let (_tx, rx) = mpsc::channel();
//! // Feed TrackerEvents through `_tx` from the capture side...
//! match Runner::new(tracker, SystemClock).run(rx) {
//!     Ok((reason, _)) => println!("Finished: {}", reason),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

// Public modules
pub mod capture;
pub mod config;
pub mod descriptor;
pub mod directory;
pub mod normalize;
pub mod runner;
pub mod selection;
pub mod session;
pub mod tracker;
pub mod types;

// Re-export main types for convenience
pub use capture::{CaptureGate, CaptureTarget, Channel, ChannelResolver, GateCommand, MemoryGate};
pub use config::TrackerConfig;
pub use descriptor::{decode_relation, find_descriptor, find_relation};
pub use directory::{parse_service_id, ChannelDirectory};
pub use normalize::normalize;
pub use runner::{Clock, Runner, SystemClock, TimerKind, TrackerEvent, UpstreamEvent};
pub use selection::select;
pub use session::{SlotEntry, TrackingSession, TrackingState};
pub use tracker::{primary_service_id, FinishReason, Step, Tracker};
pub use types::{
    duration_from_bcd, BroadcastTime, DecodeError, EventRecord, EventRef, RawEvent,
    RelationRecord, Result, ScheduleSection, Slot, Timestamp, TrackerError, UNDEFINED_DURATION,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
