/// JSON message protocol between a proximity node and its companion host.
///
/// All messages are newline-delimited JSON (NDJSON).
/// Uses `heapless` types for no_std/no-alloc operation.
use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::packet::NodeId;
use crate::proximity::ProximityEvent;
use crate::time::Tick;

/// Messages sent from the device to the companion
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum DeviceMessage {
    /// Peer confirmed nearby
    #[serde(rename = "detect")]
    Detect {
        id: NodeId,
        /// When the peer's dwell window opened (node seconds)
        since: Tick,
        /// Uptime in seconds when emitted
        ts: u32,
    },
    /// Present peer gone quiet, may still return
    #[serde(rename = "leave")]
    Leave {
        id: NodeId,
        /// Last qualifying reception (node seconds)
        since: Tick,
        ts: u32,
    },
    /// Peer confirmed gone
    #[serde(rename = "absent")]
    Absent {
        id: NodeId,
        /// Last qualifying reception (node seconds)
        since: Tick,
        /// Seconds between detection and last reception
        dwell: u32,
        ts: u32,
    },
    /// Device status report
    #[serde(rename = "status")]
    Status {
        /// Whether the slot schedule is running
        running: bool,
        /// Uptime in seconds
        uptime: u32,
        /// This node's announcement id
        node: NodeId,
        /// Peers in the neighbor table
        tracked: u8,
        /// Peers currently detected
        present: u8,
        /// New peers dropped because the table was full
        table_full: u32,
        /// Announcements sent / received since boot
        sent: u32,
        received: u32,
        /// Received below the RSSI threshold
        weak: u32,
        /// Own or sentinel source id
        rejected: u32,
        /// Events emitted since boot
        detections: u32,
        leaves: u32,
        absences: u32,
        /// Current RSSI threshold
        min_rssi: i16,
        /// Free heap in bytes
        heap_free: u32,
        /// Board identifier
        board: &'static str,
        /// Firmware version
        version: &'static str,
    },
}

impl DeviceMessage {
    /// Wrap a proximity event for the companion, stamped with uptime `ts`.
    pub fn from_event(event: &ProximityEvent, ts: u32) -> Self {
        match *event {
            ProximityEvent::Detect { id, since } => DeviceMessage::Detect { id, since, ts },
            ProximityEvent::Leave { id, since } => DeviceMessage::Leave { id, since, ts },
            ProximityEvent::Absent { id, since, dwell } => DeviceMessage::Absent {
                id,
                since,
                dwell,
                ts,
            },
        }
    }
}

/// Commands sent from the companion to the device.
///
/// Deserialized manually via [`RawCommand`] in `comm::parse_command()` because
/// `serde_json_core` does not support internally tagged enums (`deserialize_any`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    /// Resume the slot schedule
    Start,
    /// Pause the slot schedule; the radio stays off
    Stop,
    /// Request current status
    GetStatus,
    /// Update minimum RSSI threshold
    SetRssi {
        /// Minimum RSSI (negative dBm value)
        min_rssi: i16,
    },
    /// Enable or disable the buzzer (M5StickC only)
    SetBuzzer { enabled: bool },
}

/// Wire format for host commands: flat struct that `serde_json_core` can
/// deserialize without `deserialize_any`. Converted to [`HostCommand`] in
/// `comm::parse_command()`.
#[derive(Deserialize)]
pub(crate) struct RawCommand {
    pub cmd: heapless::String<16>,
    #[serde(default)]
    pub min_rssi: Option<i16>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized JSON message
pub const MAX_MSG_LEN: usize = 512;

/// Buffer type for serialized JSON messages
pub type MsgBuffer = Vec<u8, MAX_MSG_LEN>;

#[cfg(test)]
mod tests {
    use super::*;

    fn to_json(msg: &DeviceMessage, buf: &mut [u8]) -> usize {
        serde_json_core::to_slice(msg, buf).unwrap()
    }

    #[test]
    fn host_command_equality() {
        assert_eq!(HostCommand::Start, HostCommand::Start);
        assert_eq!(
            HostCommand::SetRssi { min_rssi: -75 },
            HostCommand::SetRssi { min_rssi: -75 }
        );
        assert_ne!(HostCommand::Start, HostCommand::Stop);
    }

    // ── DeviceMessage serialization ─────────────────────────────────

    #[test]
    fn serialize_detect_message() {
        let event = ProximityEvent::Detect { id: 42, since: 100 };
        let msg = DeviceMessage::from_event(&event, 115);
        let mut buf = [0u8; 128];
        let len = to_json(&msg, &mut buf);
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert_eq!(json, r#"{"type":"detect","id":42,"since":100,"ts":115}"#);
    }

    #[test]
    fn serialize_leave_message() {
        let event = ProximityEvent::Leave { id: 7, since: 20 };
        let msg = DeviceMessage::from_event(&event, 24);
        let mut buf = [0u8; 128];
        let len = to_json(&msg, &mut buf);
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert_eq!(json, r#"{"type":"leave","id":7,"since":20,"ts":24}"#);
    }

    #[test]
    fn serialize_absent_message() {
        let event = ProximityEvent::Absent {
            id: 7,
            since: 20,
            dwell: 5,
        };
        let msg = DeviceMessage::from_event(&event, 50);
        let mut buf = [0u8; 128];
        let len = to_json(&msg, &mut buf);
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains(r#""type":"absent""#));
        assert!(json.contains(r#""id":7"#));
        assert!(json.contains(r#""since":20"#));
        assert!(json.contains(r#""dwell":5"#));
    }

    #[test]
    fn serialize_status_message() {
        let msg = DeviceMessage::Status {
            running: true,
            uptime: 120,
            node: 0x1234,
            tracked: 3,
            present: 1,
            table_full: 0,
            sent: 900,
            received: 450,
            weak: 30,
            rejected: 2,
            detections: 4,
            leaves: 5,
            absences: 3,
            min_rssi: -65,
            heap_free: 48000,
            board: "test_board",
            version: "0.1.0",
        };
        let mut buf = [0u8; MAX_MSG_LEN];
        let len = to_json(&msg, &mut buf);
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains(r#""type":"status""#));
        assert!(json.contains(r#""running":true"#));
        assert!(json.contains(r#""node":4660"#));
        assert!(json.contains(r#""present":1"#));
        assert!(json.contains(r#""weak":30"#));
        assert!(json.contains(r#""leaves":5"#));
        assert!(json.contains(r#""absences":3"#));
        assert!(json.contains(r#""min_rssi":-65"#));
        assert!(json.contains(r#""board":"test_board""#));
    }

    #[test]
    fn status_fits_message_buffer() {
        let msg = DeviceMessage::Status {
            running: false,
            uptime: u32::MAX,
            node: u32::MAX,
            tracked: u8::MAX,
            present: u8::MAX,
            table_full: u32::MAX,
            sent: u32::MAX,
            received: u32::MAX,
            weak: u32::MAX,
            rejected: u32::MAX,
            detections: u32::MAX,
            leaves: u32::MAX,
            absences: u32::MAX,
            min_rssi: i16::MIN,
            heap_free: u32::MAX,
            board: "m5stickc_plus2",
            version: VERSION,
        };
        let mut buf = [0u8; MAX_MSG_LEN];
        assert!(serde_json_core::to_slice(&msg, &mut buf).is_ok());
    }

    // ── Version constant ────────────────────────────────────────────

    #[test]
    fn version_is_semver() {
        let parts: heapless::Vec<&str, 4> = VERSION.split('.').collect();
        assert_eq!(
            parts.len(),
            3,
            "VERSION should be semver (major.minor.patch)"
        );
        for part in &parts {
            assert!(part.parse::<u32>().is_ok(), "'{part}' is not a number");
        }
    }
}
