/// Diagnostic message protocol.
///
/// The firmware reports what the relay is doing as newline-delimited JSON
/// (NDJSON) on the serial console. These lines are for a human or a log
/// collector; the relayed payload itself goes out on the NFC characteristic
/// as raw bytes, never wrapped in JSON.
/// Uses `heapless` types for no_std/no-alloc operation.
use heapless::Vec;
use serde::Serialize;

use crate::reader::UidString;

/// Messages emitted by the device
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum DeviceMessage<'a> {
    /// A tag was read and its payload extracted
    #[serde(rename = "tag")]
    Tag {
        uid: &'a UidString,
        /// First record kind: "text", "uri", "other"
        kind: &'static str,
        /// Sanitized payload
        payload: &'a str,
        /// Whether a host was linked and notified
        relayed: bool,
        /// Uptime in milliseconds when read
        ts: u32,
    },
    /// A detection produced no payload
    #[serde(rename = "read_error")]
    ReadError {
        /// "no_target", "unsupported_tag", "hardware_fault", "no_message",
        /// "empty_message", "payload_size_invalid"
        error: &'static str,
        ts: u32,
    },
    /// Host link came up or went down
    #[serde(rename = "link")]
    Link { connected: bool, ts: u32 },
    /// Device status report
    #[serde(rename = "status")]
    Status {
        connected: bool,
        /// Detection state: "armed", "pending", "cooldown"
        detection: &'static str,
        /// Uptime in seconds
        uptime: u32,
        /// Free heap in bytes
        heap_free: u32,
        /// Board identifier
        board: &'static str,
        /// Firmware version
        version: &'static str,
    },
}

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized JSON message.
///
/// A 255-byte payload can expand up to six-fold when every byte is a JSON
/// `\u00XX` escape.
pub const MAX_MSG_LEN: usize = 2048;

/// Buffer type for serialized JSON messages
pub type MsgBuffer = Vec<u8, MAX_MSG_LEN>;

#[cfg(test)]
mod tests {
    use super::*;

    // ── DeviceMessage serialization ─────────────────────────────────

    #[test]
    fn serialize_status_message() {
        let msg = DeviceMessage::Status {
            connected: true,
            detection: "armed",
            uptime: 120,
            heap_free: 48000,
            board: "test_board",
            version: "0.1.0",
        };
        let mut buf = [0u8; 256];
        let len = serde_json_core::to_slice(&msg, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains(r#""type":"status""#));
        assert!(json.contains(r#""connected":true"#));
        assert!(json.contains(r#""detection":"armed""#));
        assert!(json.contains(r#""uptime":120"#));
        assert!(json.contains(r#""board":"test_board""#));
    }

    #[test]
    fn serialize_tag_message() {
        let uid = UidString::try_from("04:A1:B2:C3:D4:E5:F6").unwrap();
        let msg = DeviceMessage::Tag {
            uid: &uid,
            kind: "text",
            payload: "**SNES/mario",
            relayed: false,
            ts: 1000,
        };

        let mut buf = [0u8; 512];
        let len = serde_json_core::to_slice(&msg, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains(r#""type":"tag""#));
        assert!(json.contains(r#""uid":"04:A1:B2:C3:D4:E5:F6""#));
        assert!(json.contains(r#""kind":"text""#));
        assert!(json.contains(r#""payload":"**SNES/mario""#));
        assert!(json.contains(r#""relayed":false"#));
        assert!(json.contains(r#""ts":1000"#));
    }

    #[test]
    fn tag_payload_is_json_escaped() {
        let uid = UidString::new();
        let msg = DeviceMessage::Tag {
            uid: &uid,
            kind: "other",
            payload: "say \"hi\"\n",
            relayed: true,
            ts: 0,
        };
        let mut buf = [0u8; 256];
        let len = serde_json_core::to_slice(&msg, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains(r#""payload":"say \"hi\"\n""#));
    }

    #[test]
    fn serialize_read_error_message() {
        let msg = DeviceMessage::ReadError {
            error: "payload_size_invalid",
            ts: 42,
        };
        let mut buf = [0u8; 128];
        let len = serde_json_core::to_slice(&msg, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert_eq!(
            json,
            r#"{"type":"read_error","error":"payload_size_invalid","ts":42}"#
        );
    }

    #[test]
    fn serialize_link_message() {
        let msg = DeviceMessage::Link {
            connected: false,
            ts: 7,
        };
        let mut buf = [0u8; 64];
        let len = serde_json_core::to_slice(&msg, &mut buf).unwrap();
        assert_eq!(
            &buf[..len],
            br#"{"type":"link","connected":false,"ts":7}"#
        );
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
