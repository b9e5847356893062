/// Announcement frame exchanged between nodes.
///
/// The frame is a fixed 12-byte record: source id, sequence number and
/// sender timestamp, each a little-endian `u32`. There is no framing or
/// checksum beyond what the link layer provides.
use crate::time::Tick;

/// Identifier of a node on the air.
pub type NodeId = u32;

/// Reserved id marking an empty table bucket. Never a legitimate node.
pub const EMPTY_ID: NodeId = 0;

/// Encoded size of an [`AnnouncePacket`] in bytes.
pub const ANNOUNCE_LEN: usize = 12;

/// Periodic broadcast announcing the sender's presence.
///
/// `sequence` increments per transmitted frame and is diagnostic only;
/// loss and duplication are neither detected nor corrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnouncePacket {
    pub source_id: NodeId,
    pub sequence: u32,
    pub timestamp: Tick,
}

impl AnnouncePacket {
    /// Serialize into the on-air layout.
    pub fn encode(&self) -> [u8; ANNOUNCE_LEN] {
        let mut buf = [0u8; ANNOUNCE_LEN];
        buf[0..4].copy_from_slice(&self.source_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.sequence.to_le_bytes());
        buf[8..12].copy_from_slice(&self.timestamp.to_le_bytes());
        buf
    }

    /// Parse a received frame. Returns `None` unless `frame` is exactly
    /// [`ANNOUNCE_LEN`] bytes.
    ///
    /// Safe to call from the radio receive callback (no allocation, no blocking).
    pub fn decode(frame: &[u8]) -> Option<Self> {
        if frame.len() != ANNOUNCE_LEN {
            return None;
        }
        let word = |at: usize| -> Option<u32> {
            let bytes: [u8; 4] = frame[at..at + 4].try_into().ok()?;
            Some(u32::from_le_bytes(bytes))
        };
        Some(Self {
            source_id: word(0)?,
            sequence: word(4)?,
            timestamp: word(8)?,
        })
    }

    /// Whether the source id is usable as a table key.
    pub fn has_valid_source(&self) -> bool {
        self.source_id != EMPTY_ID
    }
}

/// Node id derived from the station MAC: the four device-specific bytes,
/// big-endian. An all-zero tail maps to 1 so the id never collides with
/// [`EMPTY_ID`].
pub fn node_id_from_mac(mac: &[u8; 6]) -> NodeId {
    let id = u32::from_be_bytes([mac[2], mac[3], mac[4], mac[5]]);
    if id == EMPTY_ID {
        1
    } else {
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_layout_is_little_endian() {
        let pkt = AnnouncePacket {
            source_id: 0x0102_0304,
            sequence: 7,
            timestamp: 0xAABB_CCDD,
        };
        let buf = pkt.encode();
        assert_eq!(&buf[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&buf[4..8], &[7, 0, 0, 0]);
        assert_eq!(&buf[8..12], &[0xDD, 0xCC, 0xBB, 0xAA]);
    }

    #[test]
    fn decode_reads_encoded_frame() {
        let pkt = AnnouncePacket {
            source_id: 42,
            sequence: 1000,
            timestamp: 15,
        };
        assert_eq!(AnnouncePacket::decode(&pkt.encode()), Some(pkt));
    }

    #[test]
    fn decode_rejects_short_frame() {
        assert_eq!(AnnouncePacket::decode(&[1, 2, 3]), None);
        assert_eq!(AnnouncePacket::decode(&[]), None);
    }

    #[test]
    fn decode_rejects_long_frame() {
        assert_eq!(AnnouncePacket::decode(&[0u8; ANNOUNCE_LEN + 1]), None);
    }

    #[test]
    fn node_id_uses_mac_tail() {
        let mac = [0x24, 0x6F, 0x28, 0xAB, 0xCD, 0xEF];
        assert_eq!(node_id_from_mac(&mac), 0x28AB_CDEF);
    }

    #[test]
    fn node_id_never_sentinel() {
        assert_eq!(node_id_from_mac(&[0xFF, 0xFF, 0, 0, 0, 0]), 1);
    }

    #[test]
    fn sentinel_source_is_invalid() {
        let pkt = AnnouncePacket {
            source_id: EMPTY_ID,
            sequence: 1,
            timestamp: 0,
        };
        assert!(!pkt.has_valid_source());
    }
}
