//! Imperium library — NFC tag relay for a BLE gamepad.
//!
//! Detects a tag on a PN532 reader, extracts and sanitizes the first NDEF
//! record payload, and relays it to a linked host over a BLE notify
//! characteristic. Everything here is platform independent and testable on
//! any host with `cargo test`; the ESP32-S3 firmware binary (`main.rs`) is a
//! thin consumer that supplies the I2C bus, the IRQ line, the clock and the
//! GATT characteristic.
//!
//! Data flow, one tag:
//! - `detect` — interrupt-driven arbiter decides when a read is due
//! - `reader` / `pn532` / `ndef` — query the tag, walk Type 2 memory, take the first record
//! - `sanitize` — keep printable bytes only, bounded and terminated
//! - `relay` — notify the host if one is linked, otherwise drop
//! - `pipeline` — one foreground step tying the above together
//!
//! `protocol` and `comm` carry NDJSON diagnostics and the BLE identity,
//! `config` the tunables, `board` the pin map.

#![cfg_attr(not(test), no_std)]

pub mod board;
pub mod comm;
pub mod config;
pub mod detect;
pub mod ndef;
pub mod pipeline;
pub mod pn532;
pub mod protocol;
pub mod reader;
pub mod relay;
pub mod sanitize;
