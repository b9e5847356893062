/// Communication layer: serial NDJSON transport.
///
/// The device streams detect/absent events and status reports as
/// newline-delimited JSON over serial. Commands arrive on the same line.
use crate::node::ProtocolState;
use crate::protocol::{DeviceMessage, HostCommand, RawCommand, MAX_MSG_LEN};

/// Serial baud rate
pub const SERIAL_BAUD: u32 = 115200;

// ── Serialization helpers ──────────────────────────────────────────────

/// Serialize a DeviceMessage to JSON bytes and write to the output buffer.
/// Returns the number of bytes written, or None if serialization failed.
pub fn serialize_message(msg: &DeviceMessage, buf: &mut [u8]) -> Option<usize> {
    match serde_json_core::to_slice(msg, buf) {
        Ok(len) => {
            // Append newline for NDJSON
            if len < buf.len() {
                buf[len] = b'\n';
                Some(len + 1)
            } else {
                Some(len)
            }
        }
        Err(_) => None,
    }
}

/// Deserialize a HostCommand from a JSON byte slice.
pub fn parse_command(data: &[u8]) -> Option<HostCommand> {
    let trimmed = trim_trailing_whitespace(data);
    if trimmed.is_empty() {
        return None;
    }
    let (raw, _) = serde_json_core::from_slice::<RawCommand>(trimmed).ok()?;
    match raw.cmd.as_str() {
        "start" => Some(HostCommand::Start),
        "stop" => Some(HostCommand::Stop),
        "status" => Some(HostCommand::GetStatus),
        "set_rssi" => raw.min_rssi.map(|min_rssi| HostCommand::SetRssi { min_rssi }),
        "set_buzzer" => raw.enabled.map(|enabled| HostCommand::SetBuzzer { enabled }),
        other => {
            log::warn!("Unknown host command: {}", other);
            None
        }
    }
}

/// Apply a host command to the protocol state.
///
/// Returns the new buzzer setting for `SetBuzzer`, which lives outside the
/// protocol state. `GetStatus` is answered by the caller, which owns the
/// uptime and heap figures. After `Stop` the caller switches the radio off.
pub fn handle_command<const BUCKETS: usize, const RECORDS: usize>(
    cmd: &HostCommand,
    state: &mut ProtocolState<BUCKETS, RECORDS>,
    running: &mut bool,
) -> Option<bool> {
    match *cmd {
        HostCommand::Start => {
            *running = true;
            log::info!("Schedule started by host command");
            None
        }
        HostCommand::Stop => {
            *running = false;
            state.stop();
            log::info!("Schedule stopped by host command");
            None
        }
        HostCommand::GetStatus => None,
        HostCommand::SetRssi { min_rssi } => {
            state.set_min_rssi(min_rssi);
            None
        }
        HostCommand::SetBuzzer { enabled } => {
            log::info!("Buzzer {}", if enabled { "enabled" } else { "disabled" });
            Some(enabled)
        }
    }
}

// ── Serial NDJSON reader ───────────────────────────────────────────────

/// Serial NDJSON reader state machine.
/// Accumulates bytes until a newline is found, then yields the line.
pub struct LineReader {
    buf: [u8; MAX_MSG_LEN],
    pos: usize,
    overflowed: bool,
}

impl LineReader {
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_MSG_LEN],
            pos: 0,
            overflowed: false,
        }
    }

    /// Feed a byte into the reader. Returns a complete line (without newline)
    /// when one is detected. An over-long line is dropped whole.
    pub fn feed(&mut self, byte: u8) -> Option<&[u8]> {
        if byte == b'\n' || byte == b'\r' {
            let complete = self.pos > 0 && !self.overflowed;
            let len = self.pos;
            self.pos = 0;
            self.overflowed = false;
            complete.then(|| &self.buf[..len])
        } else if self.overflowed {
            None
        } else if self.pos < self.buf.len() {
            self.buf[self.pos] = byte;
            self.pos += 1;
            None
        } else {
            self.pos = 0;
            self.overflowed = true;
            None
        }
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

fn trim_trailing_whitespace(data: &[u8]) -> &[u8] {
    let mut end = data.len();
    while end > 0 && matches!(data[end - 1], b' ' | b'\n' | b'\r' | b'\t') {
        end -= 1;
    }
    &data[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::node::DefaultProtocol;
    use crate::proximity::ProximityEvent;

    fn state() -> DefaultProtocol {
        DefaultProtocol::new(1, &NodeConfig::new())
    }

    // ── Command parsing ─────────────────────────────────────────────

    #[test]
    fn parse_simple_commands() {
        assert_eq!(parse_command(br#"{"cmd":"start"}"#), Some(HostCommand::Start));
        assert_eq!(parse_command(br#"{"cmd":"stop"}"#), Some(HostCommand::Stop));
        assert_eq!(parse_command(br#"{"cmd":"status"}"#), Some(HostCommand::GetStatus));
    }

    #[test]
    fn parse_set_rssi() {
        assert_eq!(
            parse_command(br#"{"cmd":"set_rssi","min_rssi":-72}"#),
            Some(HostCommand::SetRssi { min_rssi: -72 })
        );
    }

    #[test]
    fn parse_set_rssi_without_value_rejected() {
        assert_eq!(parse_command(br#"{"cmd":"set_rssi"}"#), None);
    }

    #[test]
    fn parse_set_buzzer() {
        assert_eq!(
            parse_command(br#"{"cmd":"set_buzzer","enabled":false}"#),
            Some(HostCommand::SetBuzzer { enabled: false })
        );
    }

    #[test]
    fn parse_trims_trailing_newline() {
        assert_eq!(parse_command(b"{\"cmd\":\"start\"}\r\n"), Some(HostCommand::Start));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_command(b""), None);
        assert_eq!(parse_command(b"   \n"), None);
        assert_eq!(parse_command(b"not json"), None);
        assert_eq!(parse_command(br#"{"cmd":"reboot"}"#), None);
    }

    // ── Command handling ────────────────────────────────────────────

    #[test]
    fn handle_start_stop() {
        let mut state = state();
        let mut running = true;
        assert_eq!(handle_command(&HostCommand::Stop, &mut state, &mut running), None);
        assert!(!running);
        handle_command(&HostCommand::Start, &mut state, &mut running);
        assert!(running);
    }

    #[test]
    fn handle_set_rssi_updates_tracker() {
        let mut state = state();
        let mut running = true;
        handle_command(&HostCommand::SetRssi { min_rssi: -80 }, &mut state, &mut running);
        let config = state.tracker().config();
        assert_eq!(config.min_rssi, -80);
        assert!(config.qualifies(-79));
    }

    #[test]
    fn handle_set_buzzer_returns_setting() {
        let mut state = state();
        let mut running = true;
        assert_eq!(
            handle_command(&HostCommand::SetBuzzer { enabled: true }, &mut state, &mut running),
            Some(true)
        );
        assert!(running);
    }

    // ── Output ──────────────────────────────────────────────────────

    #[test]
    fn serialized_message_ends_with_newline() {
        let msg = DeviceMessage::from_event(&ProximityEvent::Detect { id: 3, since: 0 }, 15);
        let mut buf = [0u8; 128];
        let len = serialize_message(&msg, &mut buf).unwrap();
        assert_eq!(buf[len - 1], b'\n');
        assert!(buf[..len - 1].ends_with(b"}"));
    }

    #[test]
    fn serialize_into_tiny_buffer_fails() {
        let msg = DeviceMessage::from_event(&ProximityEvent::Detect { id: 3, since: 0 }, 15);
        let mut buf = [0u8; 8];
        assert_eq!(serialize_message(&msg, &mut buf), None);
    }

    // ── Line reader ─────────────────────────────────────────────────

    #[test]
    fn line_reader_yields_complete_lines() {
        let mut reader = LineReader::new();
        let mut lines = std::vec::Vec::new();
        for &b in b"{\"cmd\":\"stop\"}\r\n\n{\"cmd\":\"start\"}\n" {
            if let Some(line) = reader.feed(b) {
                lines.push(line.to_vec());
            }
        }
        assert_eq!(lines.len(), 2);
        assert_eq!(parse_command(&lines[0]), Some(HostCommand::Stop));
        assert_eq!(parse_command(&lines[1]), Some(HostCommand::Start));
    }

    #[test]
    fn line_reader_drops_overlong_line() {
        let mut reader = LineReader::new();
        for _ in 0..MAX_MSG_LEN + 10 {
            assert_eq!(reader.feed(b'x'), None);
        }
        assert_eq!(reader.feed(b'\n'), None);
        for &b in b"ok" {
            reader.feed(b);
        }
        assert_eq!(reader.feed(b'\n'), Some(&b"ok"[..]));
    }
}
