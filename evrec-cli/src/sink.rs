//! Recording sink behind the capture gate
//!
//! Bytes offered while the gate is closed are dropped. Reconfiguration only
//! records the new source; tuning itself belongs to the capture side that
//! produces the feed.

use anyhow::{Context, Result};
use evrec_core::{CaptureGate, CaptureTarget};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Where the capture is taken from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSource {
    pub adapter: u32,
    pub frontend: u32,
    pub channel: String,
    pub service_id: u16,
    pub single_program: bool,
}

impl CaptureSource {
    /// dvb:// style source description
    pub fn uri(&self) -> String {
        if self.single_program {
            format!(
                "dvb://{}@{}/{}#program={}",
                self.adapter, self.frontend, self.channel, self.service_id
            )
        } else {
            format!("dvb://{}@{}/{}", self.adapter, self.frontend, self.channel)
        }
    }
}

/// Gated writer in front of the output file
pub struct SinkGate<W: Write> {
    out: W,
    source: CaptureSource,
    open: bool,
    bytes_written: u64,
}

impl SinkGate<BufWriter<File>> {
    /// Create the output file, including missing parent directories
    pub fn create(path: &Path, source: CaptureSource) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {:?}", parent))?;
        }
        let file = File::create(path)
            .with_context(|| format!("file:{:?} cannot be opened for writing", path))?;
        Ok(Self::new(BufWriter::new(file), source))
    }
}

impl<W: Write> SinkGate<W> {
    pub fn new(out: W, source: CaptureSource) -> Self {
        Self {
            out,
            source,
            open: false,
            bytes_written: 0,
        }
    }

    pub fn source(&self) -> &CaptureSource {
        &self.source
    }

    #[cfg(test)]
    fn is_open(&self) -> bool {
        self.open
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> CaptureGate for SinkGate<W> {
    fn open(&mut self) {
        log::debug!("Sink open ({})", self.source.uri());
        self.open = true;
    }

    fn close(&mut self) {
        log::debug!("Sink closed after {} bytes", self.bytes_written);
        self.open = false;
    }

    fn reconfigure(&mut self, target: &CaptureTarget) -> evrec_core::Result<()> {
        if let Some(channel) = &target.channel {
            self.source.channel = channel.clone();
        }
        self.source.service_id = target.service_id;
        log::info!("Capture source is now {}", self.source.uri());
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if !self.open {
            return Ok(());
        }
        self.out.write_all(data)?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    fn drain(&mut self) -> io::Result<()> {
        self.open = false;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> CaptureSource {
        CaptureSource {
            adapter: 0,
            frontend: 1,
            channel: "NHK-G".to_string(),
            service_id: 0x400,
            single_program: false,
        }
    }

    #[test]
    fn test_closed_gate_drops_bytes() {
        let mut gate = SinkGate::new(Vec::new(), source());
        gate.write(b"before").unwrap();
        gate.open();
        gate.write(b"during").unwrap();
        gate.close();
        gate.write(b"after").unwrap();

        assert_eq!(gate.bytes_written(), 6);
        assert_eq!(gate.into_inner(), b"during".to_vec());
    }

    #[test]
    fn test_reconfigure_updates_source() {
        let mut gate = SinkGate::new(Vec::new(), source());
        gate.reconfigure(&CaptureTarget {
            service_id: 0x408,
            channel: Some("BS1".to_string()),
            transport_stream_id: Some(0x4010),
        })
        .unwrap();
        assert_eq!(gate.source().channel, "BS1");
        assert_eq!(gate.source().service_id, 0x408);

        // No channel keeps the tuning
        gate.reconfigure(&CaptureTarget {
            service_id: 0x409,
            channel: None,
            transport_stream_id: None,
        })
        .unwrap();
        assert_eq!(gate.source().channel, "BS1");
    }

    #[test]
    fn test_source_uri() {
        let mut src = source();
        assert_eq!(src.uri(), "dvb://0@1/NHK-G");
        src.single_program = true;
        assert_eq!(src.uri(), "dvb://0@1/NHK-G#program=1024");
    }

    #[test]
    fn test_create_makes_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec").join("today").join("out.ts");

        let mut gate = SinkGate::create(&path, source()).unwrap();
        gate.open();
        gate.write(&[0x47; 188]).unwrap();
        gate.drain().unwrap();

        assert_eq!(fs::read(&path).unwrap().len(), 188);
        assert!(!gate.is_open());
    }
}
