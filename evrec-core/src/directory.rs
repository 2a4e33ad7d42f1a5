//! Channel directory (channels.conf)
//!
//! Line-oriented: `#` lines are comments, fields are separated by `:`, the
//! first field is the channel name and the last one the service id. Lines
//! with fewer than three fields are skipped. The first matching line wins.

use crate::capture::{Channel, ChannelResolver};
use std::io::{self, BufRead};

/// Parsed channel directory
#[derive(Debug, Clone, Default)]
pub struct ChannelDirectory {
    entries: Vec<Channel>,
}

impl ChannelDirectory {
    /// Parse directory text
    pub fn parse(content: &str) -> Self {
        let entries = content.lines().filter_map(parse_line).collect();
        Self { entries }
    }

    /// Read a directory from any buffered source
    pub fn from_reader<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut entries = Vec::new();
        for line in reader.lines() {
            if let Some(channel) = parse_line(&line?) {
                entries.push(channel);
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ChannelResolver for ChannelDirectory {
    fn lookup(&self, name: Option<&str>, service_id: Option<u16>) -> Option<Channel> {
        self.entries
            .iter()
            .find(|ch| {
                name.map_or(true, |n| n == ch.name)
                    && service_id.map_or(true, |sid| sid == ch.service_id)
            })
            .cloned()
    }
}

fn parse_line(line: &str) -> Option<Channel> {
    if line.starts_with('#') {
        return None;
    }
    let items: Vec<&str> = line.trim().split(':').collect();
    if items.len() < 3 {
        return None;
    }
    let last = items[items.len() - 1];
    match parse_service_id(last) {
        Some(service_id) => Some(Channel {
            name: items[0].to_string(),
            service_id,
        }),
        None => {
            log::warn!("Skipping channel {:?}: bad service id {:?}", items[0], last);
            None
        }
    }
}

/// Parse a service id with an optional base prefix (`0x`, `0o`, `0b`)
pub fn parse_service_id(text: &str) -> Option<u16> {
    let text = text.trim();
    let (digits, radix) = match text.get(..2) {
        Some("0x") | Some("0X") => (&text[2..], 16),
        Some("0o") | Some("0O") => (&text[2..], 8),
        Some("0b") | Some("0B") => (&text[2..], 2),
        _ => (text, 10),
    };
    u16::from_str_radix(digits, radix).ok()
}
