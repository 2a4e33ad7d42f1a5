//! Capability interfaces for the tracker's collaborators
//!
//! The tracker never talks to a tuner, a demuxer or a file. It drives a
//! [`CaptureGate`] (the on/off valve in front of the recording sink plus
//! retune/reselect) and asks a [`ChannelResolver`] for channel names.

use crate::types::Result;
use std::io;

/// Where the capture source should be pointed after a relocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTarget {
    pub service_id: u16,
    /// Channel to retune to; `None` keeps the current tuning
    pub channel: Option<String>,
    pub transport_stream_id: Option<u16>,
}

/// A boolean-gated byte sink with a reconfigurable source
pub trait CaptureGate {
    /// Start passing captured bytes to the sink
    fn open(&mut self);

    /// Stop passing captured bytes to the sink
    fn close(&mut self);

    /// Suspend capture, switch source/program, and resume
    fn reconfigure(&mut self, target: &CaptureTarget) -> Result<()>;

    /// Offer captured bytes; dropped while the gate is closed
    fn write(&mut self, _data: &[u8]) -> io::Result<()> {
        Ok(())
    }

    /// Flush and release the sink
    fn drain(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A resolved channel directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    pub service_id: u16,
}

/// Maps a channel name and/or service id to a directory entry
pub trait ChannelResolver {
    /// First entry matching every given key; `None` keys match anything
    fn lookup(&self, name: Option<&str>, service_id: Option<u16>) -> Option<Channel>;
}

/// Command issued to a [`MemoryGate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateCommand {
    Open,
    Close,
    Reconfigure(CaptureTarget),
    Drain,
}

/// In-memory gate that records every command and buffers gated bytes
#[derive(Debug, Default)]
pub struct MemoryGate {
    pub commands: Vec<GateCommand>,
    pub written: Vec<u8>,
    open: bool,
}

impl MemoryGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Number of open/close transitions issued so far
    pub fn transitions(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, GateCommand::Open | GateCommand::Close))
            .count()
    }
}

impl CaptureGate for MemoryGate {
    fn open(&mut self) {
        self.open = true;
        self.commands.push(GateCommand::Open);
    }

    fn close(&mut self) {
        self.open = false;
        self.commands.push(GateCommand::Close);
    }

    fn reconfigure(&mut self, target: &CaptureTarget) -> Result<()> {
        self.commands.push(GateCommand::Reconfigure(target.clone()));
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.open {
            self.written.extend_from_slice(data);
        }
        Ok(())
    }

    fn drain(&mut self) -> io::Result<()> {
        self.commands.push(GateCommand::Drain);
        Ok(())
    }
}

impl<T: ChannelResolver + ?Sized> ChannelResolver for &T {
    fn lookup(&self, name: Option<&str>, service_id: Option<u16>) -> Option<Channel> {
        (**self).lookup(name, service_id)
    }
}
