/// Communication layer — BLE identity and NDJSON serialization.
///
/// The relayed tag payload leaves the device on the NFC characteristic as
/// raw bytes. Diagnostics leave on serial as newline-delimited JSON.
use crate::protocol::DeviceMessage;

/// BLE GATT UUIDs for the NFC relay service.
///
/// These duplicate the string literals in the `#[gatt_service]` and `#[characteristic]`
/// proc macro attributes in `main.rs`, which only accept string literals.
#[allow(dead_code)]
pub mod ble_uuids {
    /// NFC relay service UUID
    pub const SERVICE: &str = "CE00299E-EA4B-4BB6-B631-A93F4F16E71B";
    /// NFC characteristic: tag payloads, read/write/notify
    pub const NFC_CHAR: &str = "8CD024AE-4EA5-4F06-9836-D5CA72976A40";
}

/// BLE advertising name
pub const BLE_ADV_NAME: &str = "ImperiumBLE";

/// Device Information manufacturer name
pub const BLE_MANUFACTURER: &[u8; 8] = b"Imperium";

/// Device Information PnP ID fields
pub const PNP_VENDOR_ID_SOURCE: u8 = 0x01;
pub const PNP_VENDOR_ID: u16 = 0x2301;
pub const PNP_PRODUCT_ID: u16 = 0xCDAB;
pub const PNP_PRODUCT_VERSION: u16 = 0x0001;

/// Value of the NFC characteristic before the first tag is relayed
pub const INITIAL_NFC_VALUE: &[u8] = b"none";

/// Largest value the NFC characteristic carries
pub const NFC_VALUE_LEN: usize = 255;

/// Preferred connection parameters, requested once a host connects.
/// Gamepad-grade latency: 7.5–8.75 ms interval, no slave latency.
pub const CONN_INTERVAL_MIN_US: u64 = 7_500;
pub const CONN_INTERVAL_MAX_US: u64 = 8_750;
pub const CONN_LATENCY: u16 = 0;
pub const CONN_SUPERVISION_TIMEOUT_MS: u64 = 6_000;

/// PnP ID characteristic value (Bluetooth SIG assigned layout, little endian).
pub const fn pnp_id() -> [u8; 7] {
    let vid = PNP_VENDOR_ID.to_le_bytes();
    let pid = PNP_PRODUCT_ID.to_le_bytes();
    let ver = PNP_PRODUCT_VERSION.to_le_bytes();
    [
        PNP_VENDOR_ID_SOURCE,
        vid[0],
        vid[1],
        pid[0],
        pid[1],
        ver[0],
        ver[1],
    ]
}

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
