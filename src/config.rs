/// Tunable constants for the tag relay pipeline.
///
/// Everything the reader and arbiter need to decide "when" and "how much"
/// lives here, with compiled-in defaults matching the NTAG21x family and
/// the NDEF text record layout. The firmware holds a `const` copy; tests
/// build variants with the `with_*` builders.

/// Capacity of a sanitized payload buffer, including the terminator byte.
pub const PAYLOAD_CAPACITY: usize = 256;

/// Largest Type 2 tag user memory the reader will materialize (NTAG216).
pub const MAX_TAG_MEMORY: usize = 888;

/// Runtime configuration for detection, decoding, and relaying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Time after a read attempt before detection is re-armed.
    pub cooldown_ms: u32,
    /// Smallest accepted NDEF record payload, header included.
    pub min_payload_len: usize,
    /// Largest accepted NDEF record payload, header included.
    pub max_payload_len: usize,
    /// Leading payload bytes that are skipped before sanitizing
    /// (text record status byte + two-byte language code).
    pub payload_header_len: usize,
    /// UID length of the supported tag family (7 for Ultralight / NTAG).
    pub uid_len: usize,
    /// Upper bound on waiting for the reader to report a target.
    pub query_timeout_ms: u32,
}

impl RelayConfig {
    pub const fn new() -> Self {
        Self {
            cooldown_ms: 3_000,
            min_payload_len: 4,
            max_payload_len: 255,
            payload_header_len: 3,
            uid_len: 7,
            query_timeout_ms: 100,
        }
    }

    pub const fn with_cooldown_ms(mut self, cooldown_ms: u32) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }

    pub const fn with_payload_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_payload_len = min;
        self.max_payload_len = max;
        self
    }

    pub const fn with_payload_header_len(mut self, len: usize) -> Self {
        self.payload_header_len = len;
        self
    }

    pub const fn with_uid_len(mut self, len: usize) -> Self {
        self.uid_len = len;
        self
    }

    pub const fn with_query_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.query_timeout_ms = timeout_ms;
        self
    }

    /// Whether a record payload of `len` bytes falls inside the accepted bounds.
    pub fn payload_len_ok(&self, len: usize) -> bool {
        len >= self.min_payload_len && len <= self.max_payload_len
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new()
    }
}
