/// Tag reader — one blocking read-and-decode of a detected tag.
///
/// The hardware family is abstracted behind [`NfcHardware`]; the reader owns
/// the Type 2 memory walk, NDEF extraction, bounds checks, and sanitizing.
/// Every failure maps to a [`ReadError`] that the pipeline logs and moves on
/// from; none of them stop detection.
use core::fmt;

use heapless::Vec;

use crate::config::{RelayConfig, MAX_TAG_MEMORY, PAYLOAD_CAPACITY};
use crate::ndef::{self, RecordKind, TlvScan, CC_MAGIC};
use crate::sanitize::{sanitize_with_capacity, SanitizedPayload};

/// Longest ISO14443A UID (triple size).
pub const MAX_UID_LEN: usize = 10;

/// Bytes returned by one Type 2 `READ` (four 4-byte pages).
pub const BLOCK_LEN: usize = 16;

/// Page holding the capability container.
const CC_PAGE: u8 = 3;

/// First page of user memory.
const USER_MEMORY_PAGE: u8 = 4;

/// Tag UID bytes.
pub type Uid = Vec<u8, MAX_UID_LEN>;

/// Formatted UID string ("04:A1:B2:C3:D4:E5:F6")
pub type UidString = heapless::String<30>;

/// A tag target reported by the reader hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Hardware-assigned logical target number.
    pub number: u8,
    pub uid: Uid,
}

/// Capability set of one reader hardware family.
///
/// `arm` starts passive detection so the chip raises its IRQ line when a
/// target enters the field; `query_target` then collects that target within
/// a bounded time.
pub trait NfcHardware {
    type Error: fmt::Debug;

    /// Reset and configure the chip.
    fn start(&mut self) -> Result<(), Self::Error>;

    /// Begin passive target detection.
    fn arm(&mut self) -> Result<(), Self::Error>;

    /// Put the chip into its lowest power state.
    fn sleep(&mut self) -> Result<(), Self::Error>;

    /// Wait up to `timeout_ms` for a detected target.
    fn query_target(&mut self, timeout_ms: u32) -> Result<Option<Target>, Self::Error>;

    /// Read 16 bytes starting at `page` of a Type 2 tag.
    fn read_block(
        &mut self,
        target: &Target,
        page: u8,
        buf: &mut [u8; BLOCK_LEN],
    ) -> Result<(), Self::Error>;
}

/// Why a read attempt produced no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    /// No target answered the query (noise, tag already removed).
    NoTarget,
    /// UID length does not match the supported tag family.
    UnsupportedTag,
    /// Bus error or timeout talking to the reader or tag.
    HardwareFault,
    /// Tag carries no NDEF message.
    NoMessage,
    /// NDEF message with zero decodable records.
    EmptyMessage,
    /// First record payload outside the configured bounds.
    PayloadSizeInvalid,
}

impl ReadError {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadError::NoTarget => "no_target",
            ReadError::UnsupportedTag => "unsupported_tag",
            ReadError::HardwareFault => "hardware_fault",
            ReadError::NoMessage => "no_message",
            ReadError::EmptyMessage => "empty_message",
            ReadError::PayloadSizeInvalid => "payload_size_invalid",
        }
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one successful read cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord<const N: usize = PAYLOAD_CAPACITY> {
    pub uid: Uid,
    pub kind: RecordKind,
    pub payload: SanitizedPayload<N>,
}

/// Tag reader bound to one hardware implementation.
///
/// `N` is the sanitized payload capacity, terminator included; longer
/// bodies are truncated to `N - 1` bytes.
pub struct TagReader<H, const N: usize = PAYLOAD_CAPACITY> {
    hw: H,
    config: RelayConfig,
}

impl<H: NfcHardware, const N: usize> TagReader<H, N> {
    pub fn new(hw: H, config: RelayConfig) -> Self {
        Self { hw, config }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn start(&mut self) -> Result<(), H::Error> {
        self.hw.start()
    }

    pub fn arm(&mut self) -> Result<(), H::Error> {
        self.hw.arm()
    }

    pub fn sleep(&mut self) -> Result<(), H::Error> {
        log::info!("Sleeping the NFC reader");
        self.hw.sleep()
    }

    /// Query, read, decode, and sanitize one tag.
    pub fn attempt_read(&mut self) -> Result<TagRecord<N>, ReadError> {
        let target = match self.hw.query_target(self.config.query_timeout_ms) {
            Ok(Some(target)) => target,
            Ok(None) => return Err(ReadError::NoTarget),
            Err(e) => {
                log::warn!("NFC target query failed: {:?}", e);
                return Err(ReadError::HardwareFault);
            }
        };

        let mut uid_str = UidString::new();
        format_uid(&target.uid, &mut uid_str);
        log::info!("Found ISO14443A tag, UID {}", uid_str);

        if target.uid.len() != self.config.uid_len {
            log::info!(
                "Unsupported tag: UID length {} (expected {})",
                target.uid.len(),
                self.config.uid_len
            );
            return Err(ReadError::UnsupportedTag);
        }

        let mut memory = [0u8; MAX_TAG_MEMORY];
        let len = self.read_user_memory(&target, &mut memory).map_err(|e| {
            log::warn!("NFC memory read failed: {:?}", e);
            ReadError::HardwareFault
        })?;

        let message = match ndef::scan_tlvs(&memory[..len]) {
            TlvScan::Message(message) => message,
            TlvScan::Absent | TlvScan::Incomplete => return Err(ReadError::NoMessage),
        };
        let record = ndef::first_record(message).ok_or(ReadError::EmptyMessage)?;

        if !self.config.payload_len_ok(record.payload.len()) {
            log::info!("Payload length {} out of bounds", record.payload.len());
            return Err(ReadError::PayloadSizeInvalid);
        }

        let body = record
            .payload
            .get(self.config.payload_header_len..)
            .unwrap_or(&[]);
        let payload = sanitize_with_capacity::<N>(body);
        log::info!("Payload ({}): {}", record.kind().as_str(), payload);

        Ok(TagRecord {
            uid: target.uid,
            kind: record.kind(),
            payload,
        })
    }

    /// Copy Type 2 user memory into `memory`, stopping as soon as the NDEF
    /// TLV is complete. Returns the number of valid bytes; 0 if the tag is
    /// not NDEF formatted.
    fn read_user_memory(
        &mut self,
        target: &Target,
        memory: &mut [u8; MAX_TAG_MEMORY],
    ) -> Result<usize, H::Error> {
        let mut block = [0u8; BLOCK_LEN];
        self.hw.read_block(target, CC_PAGE, &mut block)?;
        if block[0] != CC_MAGIC {
            log::info!("Tag is not NDEF formatted (CC {:02X})", block[0]);
            return Ok(0);
        }
        let capacity = (block[2] as usize * 8).min(MAX_TAG_MEMORY);

        let mut len = 0;
        let mut page = USER_MEMORY_PAGE;
        while len < capacity {
            self.hw.read_block(target, page, &mut block)?;
            let take = BLOCK_LEN.min(capacity - len);
            memory[len..len + take].copy_from_slice(&block[..take]);
            len += take;
            if !matches!(ndef::scan_tlvs(&memory[..len]), TlvScan::Incomplete) {
                break;
            }
            page = page.wrapping_add((BLOCK_LEN / 4) as u8);
        }
        Ok(len)
    }
}

/// Format a UID as colon-separated uppercase hex.
pub fn format_uid(uid: &[u8], buf: &mut UidString) {
    use core::fmt::Write;
    for (i, byte) in uid.iter().enumerate() {
        if i > 0 {
            let _ = buf.push(':');
        }
        let _ = write!(buf, "{:02X}", byte);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::vec::Vec as StdVec;

    pub(crate) const UID7: [u8; 7] = [0x04, 0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6];

    /// In-memory Type 2 tag behind a fake reader.
    #[derive(Default)]
    pub(crate) struct FakeHardware {
        pub uid: Option<StdVec<u8>>,
        /// Full tag memory, page 0 onwards.
        pub pages: StdVec<u8>,
        pub query_fails: bool,
        pub fail_read_at_page: Option<u8>,
        pub reads: StdVec<u8>,
        pub arms: u32,
        /// `arm` calls (counted from 1) that fail.
        pub fail_arms: StdVec<u32>,
        pub queries: u32,
        pub asleep: bool,
    }

    #[derive(Debug, PartialEq)]
    pub(crate) struct FakeError;

    impl FakeHardware {
        /// NTAG213-like tag (144 byte data area) holding `message` as NDEF TLV.
        pub(crate) fn with_message(uid: &[u8], message: &[u8]) -> Self {
            let mut pages = std::vec![0u8; 16];
            pages[12..16].copy_from_slice(&[CC_MAGIC, 0x10, 0x12, 0x00]);
            pages.push(0x03);
            pages.push(message.len() as u8);
            pages.extend_from_slice(message);
            pages.push(0xFE);
            pages.resize(16 + 144, 0);
            Self {
                uid: Some(uid.to_vec()),
                pages,
                ..Default::default()
            }
        }

        pub(crate) fn with_text(uid: &[u8], payload: &[u8]) -> Self {
            Self::with_message(uid, &short_record(payload))
        }
    }

    /// Short well-known text record carrying `payload` verbatim.
    pub(crate) fn short_record(payload: &[u8]) -> StdVec<u8> {
        let mut rec = std::vec![0xD1, 0x01, payload.len() as u8, b'T'];
        rec.extend_from_slice(payload);
        rec
    }

    impl NfcHardware for FakeHardware {
        type Error = FakeError;

        fn start(&mut self) -> Result<(), FakeError> {
            self.asleep = false;
            Ok(())
        }

        fn arm(&mut self) -> Result<(), FakeError> {
            self.arms += 1;
            if self.fail_arms.contains(&self.arms) {
                return Err(FakeError);
            }
            Ok(())
        }

        fn sleep(&mut self) -> Result<(), FakeError> {
            self.asleep = true;
            Ok(())
        }

        fn query_target(&mut self, _timeout_ms: u32) -> Result<Option<Target>, FakeError> {
            self.queries += 1;
            if self.query_fails {
                return Err(FakeError);
            }
            Ok(self.uid.as_ref().map(|uid| Target {
                number: 1,
                uid: Uid::from_slice(uid).unwrap(),
            }))
        }

        fn read_block(
            &mut self,
            _target: &Target,
            page: u8,
            buf: &mut [u8; BLOCK_LEN],
        ) -> Result<(), FakeError> {
            if self.fail_read_at_page == Some(page) {
                return Err(FakeError);
            }
            self.reads.push(page);
            let start = page as usize * 4;
            for (i, b) in buf.iter_mut().enumerate() {
                *b = self.pages.get(start + i).copied().unwrap_or(0);
            }
            Ok(())
        }
    }

    fn reader(hw: FakeHardware) -> TagReader<FakeHardware> {
        TagReader::new(hw, RelayConfig::default())
    }

    #[test]
    fn reads_text_record() {
        let mut r = reader(FakeHardware::with_text(&UID7, b"\x02enHi"));
        let record = r.attempt_read().unwrap();
        assert_eq!(record.payload.as_str(), "Hi");
        assert_eq!(record.payload.as_bytes_with_terminator(), b"Hi\0");
        assert_eq!(record.kind, RecordKind::Text);
        assert_eq!(record.uid.as_slice(), &UID7);
    }

    #[test]
    fn two_byte_header_config_reads_bare_language_code() {
        let config = RelayConfig::new().with_payload_header_len(2);
        let mut r: TagReader<_> = TagReader::new(
            FakeHardware::with_text(&UID7, &[0x65, 0x6E, b'H', b'i']),
            config,
        );
        assert_eq!(r.attempt_read().unwrap().payload.as_str(), "Hi");
    }

    #[test]
    fn payload_truncates_to_reader_capacity() {
        let hw = FakeHardware::with_text(&UID7, b"\x02enHello world");
        let mut r: TagReader<_, 8> = TagReader::new(hw, RelayConfig::default());
        let record = r.attempt_read().unwrap();
        assert_eq!(record.payload.as_str(), "Hello w");
        assert_eq!(record.payload.as_bytes_with_terminator(), b"Hello w\0");
    }

    #[test]
    fn sanitizes_payload_body() {
        let mut r = reader(FakeHardware::with_text(&UID7, b"\x02en**\x00SNES\x07/mario\xff"));
        assert_eq!(r.attempt_read().unwrap().payload.as_str(), "**SNES/mario");
    }

    #[test]
    fn no_target() {
        let mut r = reader(FakeHardware::default());
        assert_eq!(r.attempt_read(), Err(ReadError::NoTarget));
    }

    #[test]
    fn query_failure_is_hardware_fault() {
        let mut hw = FakeHardware::with_text(&UID7, b"\x02enHi");
        hw.query_fails = true;
        assert_eq!(reader(hw).attempt_read(), Err(ReadError::HardwareFault));
    }

    #[test]
    fn four_byte_uid_is_unsupported() {
        let mut r = reader(FakeHardware::with_text(&[1, 2, 3, 4], b"\x02enHi"));
        assert_eq!(r.attempt_read(), Err(ReadError::UnsupportedTag));
        assert!(r.hardware().reads.is_empty());
    }

    #[test]
    fn block_read_failure_is_hardware_fault() {
        let mut hw = FakeHardware::with_text(&UID7, b"\x02enHi");
        hw.fail_read_at_page = Some(4);
        assert_eq!(reader(hw).attempt_read(), Err(ReadError::HardwareFault));
    }

    #[test]
    fn unformatted_tag_has_no_message() {
        let mut hw = FakeHardware::with_text(&UID7, b"\x02enHi");
        hw.pages[12] = 0x00;
        assert_eq!(reader(hw).attempt_read(), Err(ReadError::NoMessage));
    }

    #[test]
    fn memory_without_ndef_tlv_has_no_message() {
        let mut hw = FakeHardware::with_text(&UID7, b"\x02enHi");
        hw.pages[16] = 0xFE;
        assert_eq!(reader(hw).attempt_read(), Err(ReadError::NoMessage));
    }

    #[test]
    fn empty_ndef_message() {
        let mut r = reader(FakeHardware::with_message(&UID7, &[]));
        assert_eq!(r.attempt_read(), Err(ReadError::EmptyMessage));
    }

    #[test]
    fn payload_too_short() {
        let mut r = reader(FakeHardware::with_text(&UID7, b"\x02en"));
        assert_eq!(r.attempt_read(), Err(ReadError::PayloadSizeInvalid));
    }

    #[test]
    fn payload_too_long() {
        // Long-form record, 300 byte payload in a larger tag
        let mut rec = std::vec![0xC1, 0x01, 0x00, 0x00, 0x01, 0x2C, b'T'];
        rec.extend_from_slice(&[b'a'; 300]);
        let mut hw = FakeHardware::with_message(&UID7, &[]);
        hw.pages.truncate(16);
        hw.pages[14] = 0x3E; // 496 byte data area
        hw.pages.extend_from_slice(&[0x03, 0xFF, 0x01, 0x33]);
        hw.pages.extend_from_slice(&rec);
        hw.pages.push(0xFE);
        assert_eq!(reader(hw).attempt_read(), Err(ReadError::PayloadSizeInvalid));
    }

    #[test]
    fn only_first_record_is_used() {
        let mut msg = short_record(b"\x02enOne");
        msg[0] = 0x91; // MB|SR, more records follow
        let mut second = short_record(b"\x02enTwo");
        second[0] = 0x51;
        msg.extend_from_slice(&second);
        let mut r = reader(FakeHardware::with_message(&UID7, &msg));
        assert_eq!(r.attempt_read().unwrap().payload.as_str(), "One");
    }

    #[test]
    fn stops_reading_once_message_complete() {
        let mut r = reader(FakeHardware::with_text(&UID7, b"\x02enHi"));
        r.attempt_read().unwrap();
        // CC page, then a single user memory block
        assert_eq!(r.hardware().reads, [3, 4]);
    }

    #[test]
    fn walks_multiple_blocks_for_long_message() {
        let text = [b'z'; 40];
        let mut payload = std::vec![0x02, b'e', b'n'];
        payload.extend_from_slice(&text);
        let mut r = reader(FakeHardware::with_text(&UID7, &payload));
        let record = r.attempt_read().unwrap();
        assert_eq!(record.payload.as_bytes(), &text);
        assert_eq!(r.hardware().reads, [3, 4, 8, 12, 16]);
    }

    #[test]
    fn start_arm_sleep_delegate() {
        let mut r = reader(FakeHardware::default());
        r.start().unwrap();
        r.arm().unwrap();
        r.sleep().unwrap();
        assert_eq!(r.hardware().arms, 1);
        assert!(r.hardware().asleep);
    }

    #[test]
    fn formats_uid() {
        let mut s = UidString::new();
        format_uid(&UID7, &mut s);
        assert_eq!(s.as_str(), "04:A1:B2:C3:D4:E5:F6");
    }

    #[test]
    fn read_error_strings() {
        assert_eq!(ReadError::PayloadSizeInvalid.as_str(), "payload_size_invalid");
        assert_eq!(std::format!("{}", ReadError::NoTarget), "no_target");
    }
}
