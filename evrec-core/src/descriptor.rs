//! Event group descriptor decoder
//!
//! Broadcasters attach an event group descriptor (tag `0xD6`) to an event to
//! declare that it shares content with, was moved from, or will be relayed
//! to another (service, event) pair.
//!
//! ## Layout
//! ```text
//! Byte 0:     descriptor tag (0xD6)
//! Byte 1:     descriptor length L (bytes following this field)
//! Byte 2:     group type (high nibble) | event count N (low nibble)
//! Byte 3..:   N x (service_id: u16, event_id: u16), big-endian
//! Trailer:    for group types 4/5, 8-byte entries of
//!             (original_network_id, transport_stream_id, service_id, event_id)
//! ```
//!
//! Every length check is a precondition: a descriptor that does not fit its
//! declared length is rejected with a [`DecodeError`], never partially decoded.

use crate::types::{DecodeError, EventRef, RelationRecord};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

/// Descriptor tag of the event group descriptor
pub const EVENT_GROUP_TAG: u8 = 0xD6;

/// Group type: events sharing the same content
pub const GROUP_COMMON: u8 = 1;
/// Group type: event relayed to another event of the same network
pub const GROUP_RELAYED_SAME: u8 = 2;
/// Group type: event moved from another event of the same network
pub const GROUP_MOVED_FROM: u8 = 3;
/// Group type: event relayed to an event of another network/transport
pub const GROUP_RELAYED_OTHER: u8 = 4;
/// Group type: event moved from another network/transport
pub const GROUP_MOVED_FROM_OTHER: u8 = 5;

const HEADER_LEN: usize = 2;
const EVENT_ENTRY_LEN: usize = 4;
const NETWORK_ENTRY_LEN: usize = 8;

/// Decode a complete event group descriptor (tag and length included)
pub fn decode_relation(bytes: &[u8]) -> Result<RelationRecord, DecodeError> {
    if bytes.len() < HEADER_LEN + 1 {
        return Err(DecodeError::Truncated(bytes.len()));
    }
    if bytes[0] != EVENT_GROUP_TAG {
        return Err(DecodeError::WrongTag(bytes[0]));
    }

    let declared = bytes[1] as usize;
    let group_type = (bytes[2] & 0xF0) >> 4;
    let count = (bytes[2] & 0x0F) as usize;

    let mut needed = 1 + count * EVENT_ENTRY_LEN;
    if group_type == GROUP_RELAYED_OTHER {
        needed += NETWORK_ENTRY_LEN;
    }
    if declared + HEADER_LEN != bytes.len() || declared < needed {
        return Err(DecodeError::LengthMismatch {
            declared,
            actual: bytes.len(),
            needed,
        });
    }

    let events: Vec<EventRef> = bytes[3..3 + count * EVENT_ENTRY_LEN]
        .chunks_exact(EVENT_ENTRY_LEN)
        .map(|entry| EventRef {
            service_id: BigEndian::read_u16(&entry[0..2]),
            event_id: BigEndian::read_u16(&entry[2..4]),
        })
        .collect();

    match group_type {
        GROUP_MOVED_FROM => Ok(RelationRecord::MovedFrom { candidates: events }),
        GROUP_RELAYED_SAME => {
            let first = events.first().ok_or(DecodeError::MissingCandidate)?;
            Ok(RelationRecord::RelayedToSameTransport {
                service_id: first.service_id,
                event_id: first.event_id,
            })
        }
        GROUP_RELAYED_OTHER => {
            // First destination entry follows the event loop
            let trailer = &bytes[3 + count * EVENT_ENTRY_LEN..];
            Ok(RelationRecord::RelayedToOtherTransport {
                original_network_id: BigEndian::read_u16(&trailer[0..2]),
                transport_stream_id: BigEndian::read_u16(&trailer[2..4]),
                service_id: BigEndian::read_u16(&trailer[4..6]),
                event_id: BigEndian::read_u16(&trailer[6..8]),
            })
        }
        other => Err(DecodeError::UnsupportedGroup(other)),
    }
}

/// Find the first descriptor with `tag` in a raw descriptor loop.
///
/// Returns the whole descriptor (tag and length bytes included). A loop entry
/// whose declared length runs past the buffer ends the walk.
pub fn find_descriptor(descriptors: &[u8], tag: u8) -> Option<&[u8]> {
    let mut offset = 0;
    while offset + HEADER_LEN <= descriptors.len() {
        let len = descriptors[offset + 1] as usize;
        let end = offset + HEADER_LEN + len;
        if end > descriptors.len() {
            log::debug!(
                "Descriptor loop truncated at offset {} (tag 0x{:02X}, len {})",
                offset,
                descriptors[offset],
                len
            );
            return None;
        }
        if descriptors[offset] == tag {
            return Some(&descriptors[offset..end]);
        }
        offset = end;
    }
    None
}

/// Find and decode the event group descriptor of an event, if it carries one
pub fn find_relation(descriptors: &[u8]) -> Option<Result<RelationRecord, DecodeError>> {
    find_descriptor(descriptors, EVENT_GROUP_TAG).map(decode_relation)
}

impl RelationRecord {
    /// Encode this relation as an event group descriptor
    pub fn encode(&self) -> Vec<u8> {
        let (group_type, events, trailer): (u8, Vec<EventRef>, Option<[u16; 4]>) = match self {
            RelationRecord::MovedFrom { candidates } => {
                (GROUP_MOVED_FROM, candidates.iter().take(15).copied().collect(), None)
            }
            RelationRecord::RelayedToSameTransport { service_id, event_id } => (
                GROUP_RELAYED_SAME,
                vec![EventRef {
                    service_id: *service_id,
                    event_id: *event_id,
                }],
                None,
            ),
            RelationRecord::RelayedToOtherTransport {
                original_network_id,
                transport_stream_id,
                service_id,
                event_id,
            } => (
                GROUP_RELAYED_OTHER,
                Vec::new(),
                Some([*original_network_id, *transport_stream_id, *service_id, *event_id]),
            ),
        };

        let body_len = 1
            + events.len() * EVENT_ENTRY_LEN
            + trailer.map_or(0, |_| NETWORK_ENTRY_LEN);
        let mut out = Vec::with_capacity(HEADER_LEN + body_len);
        out.push(EVENT_GROUP_TAG);
        out.push(body_len as u8);
        out.push((group_type << 4) | events.len() as u8);
        for ev in &events {
            // Writing into a Vec cannot fail
            let _ = out.write_u16::<BigEndian>(ev.service_id);
            let _ = out.write_u16::<BigEndian>(ev.event_id);
        }
        if let Some(fields) = trailer {
            for field in fields {
                let _ = out.write_u16::<BigEndian>(field);
            }
        }
        out
    }
}
