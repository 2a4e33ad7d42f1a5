//! JSON-lines upstream feed
//!
//! Each non-blank line is one [`UpstreamEvent`], for example:
//!
//! ```text
//! {"type":"section","section":{"section_number":0,"version":3,"service_id":1024,"transport_stream_id":32736},"events":[...]}
//! {"type":"membership","programs":[1024,1025]}
//! {"type":"payload","data":[71,0,17,16]}
//! ```
//!
//! The reader runs on its own thread and forwards into the tracker queue.
//! End of input is forwarded as [`UpstreamEvent::Ended`].

use evrec_core::{TrackerEvent, UpstreamEvent};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Cannot open feed {path:?}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("Line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
}

/// Where upstream records come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSource {
    Stdin,
    File(PathBuf),
}

impl FeedSource {
    /// `-` means standard input
    pub fn from_arg(arg: &Path) -> Self {
        if arg.as_os_str() == "-" {
            FeedSource::Stdin
        } else {
            FeedSource::File(arg.to_path_buf())
        }
    }

    fn open(&self) -> Result<Box<dyn BufRead + Send>, FeedError> {
        match self {
            FeedSource::Stdin => Ok(Box::new(BufReader::new(io::stdin()))),
            FeedSource::File(path) => {
                let file = File::open(path).map_err(|source| FeedError::Open {
                    path: path.clone(),
                    source,
                })?;
                Ok(Box::new(BufReader::new(file)))
            }
        }
    }
}

/// Parse one feed line; `None` for blank lines
pub fn parse_line(line_no: usize, line: &str) -> Result<Option<UpstreamEvent>, FeedError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|source| FeedError::Parse {
            line: line_no,
            source,
        })
}

/// Forward every record from `reader` until input ends or the queue closes.
///
/// Malformed lines are logged and skipped. A read failure is forwarded as an
/// upstream error, end of input as `Ended`.
pub fn pump<R: BufRead>(reader: R, tx: &Sender<TrackerEvent>) {
    for (idx, line) in reader.lines().enumerate() {
        let event = match line {
            Ok(line) => match parse_line(idx + 1, &line) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("Skipping feed record: {}", e);
                    continue;
                }
            },
            Err(e) => UpstreamEvent::Error {
                message: e.to_string(),
            },
        };
        let failed = matches!(event, UpstreamEvent::Error { .. });
        if tx.send(TrackerEvent::Upstream(event)).is_err() || failed {
            return;
        }
    }
    let _ = tx.send(TrackerEvent::Upstream(UpstreamEvent::Ended));
}

/// Start the reader thread
pub fn spawn(source: FeedSource, tx: Sender<TrackerEvent>) -> JoinHandle<()> {
    thread::spawn(move || match source.open() {
        Ok(reader) => pump(reader, &tx),
        Err(e) => {
            let _ = tx.send(TrackerEvent::Upstream(UpstreamEvent::Error {
                message: e.to_string(),
            }));
        }
    })
}
