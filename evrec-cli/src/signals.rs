//! OS signal handling
//!
//! SIGINT (Ctrl-C) and, on Unix, SIGTERM and SIGHUP become a
//! [`TrackerEvent::Shutdown`] on the tracker queue, so an interrupted
//! recording still closes the gate and flushes the sink.

use evrec_core::TrackerEvent;
use std::sync::mpsc::Sender;

/// Install the process-wide handler. Can only be done once per process.
pub fn forward_shutdown(tx: Sender<TrackerEvent>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || request_shutdown(&tx))
}

fn request_shutdown(tx: &Sender<TrackerEvent>) {
    log::info!("Termination signal received");
    if tx.send(TrackerEvent::Shutdown).is_err() {
        log::debug!("Tracker already stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_signal_queues_shutdown() {
        let (tx, rx) = mpsc::channel();
        request_shutdown(&tx);
        assert_eq!(rx.try_recv().unwrap(), TrackerEvent::Shutdown);
    }

    #[test]
    fn test_signal_after_tracker_stopped() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        request_shutdown(&tx);
    }
}
