/// Payload sanitizer — raw tag bytes to a bounded printable string.
///
/// The host treats the relayed value as text, so anything that is not a
/// printable ASCII character or ASCII whitespace is dropped (not replaced).
/// The filter is order-preserving and pure.
use core::fmt;

use crate::config::PAYLOAD_CAPACITY;

/// Fixed-capacity, terminator-backed buffer of printable/whitespace ASCII.
///
/// Holds at most `N - 1` content bytes; the byte after the content is
/// always `0`. The terminator is storage-only: [`as_bytes`](Self::as_bytes)
/// never includes it, which is what goes out on the wire.
#[derive(Clone, Copy)]
pub struct SanitizedPayload<const N: usize = PAYLOAD_CAPACITY> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> SanitizedPayload<N> {
    const HAS_TERMINATOR_ROOM: () = assert!(
        N > 0,
        "payload capacity must leave room for the terminator"
    );

    /// An empty payload (terminator only).
    pub const fn new() -> Self {
        let () = Self::HAS_TERMINATOR_ROOM;
        Self { buf: [0; N], len: 0 }
    }

    /// Content bytes, terminator excluded.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Content bytes followed by the `0` terminator.
    pub fn as_bytes_with_terminator(&self) -> &[u8] {
        &self.buf[..=self.len]
    }

    pub fn as_str(&self) -> &str {
        // Only ASCII is ever stored.
        core::str::from_utf8(self.as_bytes()).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of content bytes.
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Append a byte, keeping the terminator in place. Returns `false` when full.
    fn push(&mut self, byte: u8) -> bool {
        if self.len + 1 >= N {
            return false;
        }
        self.buf[self.len] = byte;
        self.len += 1;
        self.buf[self.len] = 0;
        true
    }
}

impl<const N: usize> Default for SanitizedPayload<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PartialEq for SanitizedPayload<N> {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl<const N: usize> Eq for SanitizedPayload<N> {}

impl<const N: usize> fmt::Debug for SanitizedPayload<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SanitizedPayload({:?})", self.as_str())
    }
}

impl<const N: usize> fmt::Display for SanitizedPayload<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Printable ASCII (`0x20..=0x7E`) or one of the six ASCII whitespace bytes.
///
/// Unlike [`u8::is_ascii_whitespace`] this accepts vertical tab (`0x0B`).
#[inline]
pub fn is_printable_or_space(byte: u8) -> bool {
    matches!(byte, 0x20..=0x7E | b'\t' | b'\n' | 0x0B | 0x0C | b'\r')
}

/// Sanitize into the default-capacity payload.
pub fn sanitize(raw: &[u8]) -> SanitizedPayload {
    sanitize_with_capacity(raw)
}

/// Sanitize into a payload of capacity `N`.
///
/// Never fails: non-conforming bytes are skipped and content beyond
/// `N - 1` bytes is truncated.
pub fn sanitize_with_capacity<const N: usize>(raw: &[u8]) -> SanitizedPayload<N> {
    let mut out = SanitizedPayload::<N>::new();
    for &byte in raw.iter().filter(|&&b| is_printable_or_space(b)) {
        if !out.push(byte) {
            break;
        }
    }
    out
}
