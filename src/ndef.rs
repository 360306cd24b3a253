/// Minimal NDEF decoding for NFC Forum Type 2 tags.
///
/// Covers exactly what the relay needs: locate the NDEF message TLV in tag
/// user memory and walk its records far enough to hand back the first one.
/// Zero-copy: every returned slice borrows the memory image.
///
/// TLV block format (user memory from page 4):
///   [type] [len] [value...]         len < 0xFF
///   [type] 0xFF [len_hi] [len_lo] [value...]
/// Types: 0x00 NULL (no length), 0x01 lock control, 0x02 memory control,
///        0x03 NDEF message, 0xFD proprietary, 0xFE terminator (no length)

/// Capability container magic number (CC byte 0) for an NDEF-formatted tag.
pub const CC_MAGIC: u8 = 0xE1;

const TLV_NULL: u8 = 0x00;
const TLV_NDEF_MESSAGE: u8 = 0x03;
const TLV_TERMINATOR: u8 = 0xFE;

const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;
const TNF_MASK: u8 = 0x07;

/// TNF value for NFC Forum well-known types ("T", "U", ...).
pub const TNF_WELL_KNOWN: u8 = 0x01;

/// Outcome of scanning a (possibly partial) user memory image for the NDEF TLV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvScan<'a> {
    /// NDEF message TLV found; value bytes (possibly empty).
    Message(&'a [u8]),
    /// Memory ran out before the NDEF TLV (or its value) was complete.
    Incomplete,
    /// Terminator TLV reached without an NDEF message.
    Absent,
}

/// Scan Type 2 user memory for the first NDEF message TLV.
pub fn scan_tlvs(memory: &[u8]) -> TlvScan<'_> {
    let mut pos = 0;
    while pos < memory.len() {
        let tlv_type = memory[pos];
        match tlv_type {
            TLV_NULL => {
                pos += 1;
                continue;
            }
            TLV_TERMINATOR => return TlvScan::Absent,
            _ => {}
        }

        let Some(&len_byte) = memory.get(pos + 1) else {
            return TlvScan::Incomplete;
        };
        let (value_len, header_len) = if len_byte == 0xFF {
            match memory.get(pos + 2..pos + 4) {
                Some(&[hi, lo]) => (u16::from_be_bytes([hi, lo]) as usize, 4),
                _ => return TlvScan::Incomplete,
            }
        } else {
            (len_byte as usize, 2)
        };

        let start = pos + header_len;
        let end = start + value_len;
        if tlv_type == TLV_NDEF_MESSAGE {
            return match memory.get(start..end) {
                Some(value) => TlvScan::Message(value),
                None => TlvScan::Incomplete,
            };
        }
        // Lock control, memory control, proprietary, unknown: skip by length
        pos = end;
    }
    TlvScan::Incomplete
}

/// Coarse record classification, for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Well-known "T" (text) record
    Text,
    /// Well-known "U" (URI) record
    Uri,
    Other,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Text => "text",
            RecordKind::Uri => "uri",
            RecordKind::Other => "other",
        }
    }
}

/// A single decoded NDEF record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdefRecord<'a> {
    pub tnf: u8,
    pub record_type: &'a [u8],
    pub id: &'a [u8],
    pub payload: &'a [u8],
}

impl NdefRecord<'_> {
    pub fn kind(&self) -> RecordKind {
        match (self.tnf, self.record_type) {
            (TNF_WELL_KNOWN, b"T") => RecordKind::Text,
            (TNF_WELL_KNOWN, b"U") => RecordKind::Uri,
            _ => RecordKind::Other,
        }
    }
}

/// Iterator over the records of an NDEF message.
///
/// Stops at the first malformed or truncated record.
pub struct Records<'a> {
    message: &'a [u8],
    pos: usize,
}

/// Iterate the records of an NDEF message.
pub fn records(message: &[u8]) -> Records<'_> {
    Records { message, pos: 0 }
}

/// The first decodable record of an NDEF message, if any.
pub fn first_record(message: &[u8]) -> Option<NdefRecord<'_>> {
    records(message).next()
}

impl<'a> Iterator for Records<'a> {
    type Item = NdefRecord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (record, consumed) = parse_record(&self.message[self.pos..])?;
        self.pos += consumed;
        Some(record)
    }
}

/// Parse one record from the front of `data`; returns it and its encoded length.
fn parse_record(data: &[u8]) -> Option<(NdefRecord<'_>, usize)> {
    let header = *data.first()?;
    let type_len = *data.get(1)? as usize;
    let mut pos = 2;

    let payload_len = if header & FLAG_SR != 0 {
        let len = *data.get(pos)? as usize;
        pos += 1;
        len
    } else {
        let bytes: [u8; 4] = data.get(pos..pos + 4)?.try_into().ok()?;
        pos += 4;
        u32::from_be_bytes(bytes) as usize
    };

    let id_len = if header & FLAG_IL != 0 {
        let len = *data.get(pos)? as usize;
        pos += 1;
        len
    } else {
        0
    };

    let record_type = data.get(pos..pos + type_len)?;
    pos += type_len;
    let id = data.get(pos..pos + id_len)?;
    pos += id_len;
    let payload = data.get(pos..pos.checked_add(payload_len)?)?;
    pos += payload_len;

    Some((
        NdefRecord {
            tnf: header & TNF_MASK,
            record_type,
            id,
            payload,
        },
        pos,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Short well-known text record "en" + text, MB|ME|SR.
    fn text_record(text: &[u8]) -> std::vec::Vec<u8> {
        let mut rec = vec![0xD1, 0x01, (text.len() + 3) as u8, b'T', 0x02, b'e', b'n'];
        rec.extend_from_slice(text);
        rec
    }

    #[test]
    fn finds_ndef_tlv_after_lock_control() {
        let mut mem = vec![0x01, 0x03, 0xA0, 0x0C, 0x34];
        let rec = text_record(b"Hi");
        mem.push(0x03);
        mem.push(rec.len() as u8);
        mem.extend_from_slice(&rec);
        mem.push(0xFE);
        assert_eq!(scan_tlvs(&mem), TlvScan::Message(&rec[..]));
    }

    #[test]
    fn skips_null_tlvs() {
        let mem = [0x00, 0x00, 0x03, 0x02, 0xAA, 0xBB, 0xFE];
        assert_eq!(scan_tlvs(&mem), TlvScan::Message(&[0xAA, 0xBB]));
    }

    #[test]
    fn three_byte_length_form() {
        let mut mem = vec![0x03, 0xFF, 0x01, 0x00];
        mem.extend_from_slice(&[0x55; 256]);
        match scan_tlvs(&mem) {
            TlvScan::Message(value) => assert_eq!(value.len(), 256),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn terminator_without_message_is_absent() {
        assert_eq!(scan_tlvs(&[0x00, 0xFE, 0x03, 0x00]), TlvScan::Absent);
    }

    #[test]
    fn truncated_value_is_incomplete() {
        assert_eq!(scan_tlvs(&[0x03, 0x10, 0xD1, 0x01]), TlvScan::Incomplete);
        assert_eq!(scan_tlvs(&[0x03]), TlvScan::Incomplete);
        assert_eq!(scan_tlvs(&[0x03, 0xFF, 0x01]), TlvScan::Incomplete);
        assert_eq!(scan_tlvs(&[]), TlvScan::Incomplete);
    }

    #[test]
    fn empty_message_tlv() {
        assert_eq!(scan_tlvs(&[0x03, 0x00, 0xFE]), TlvScan::Message(&[]));
        assert!(first_record(&[]).is_none());
    }

    #[test]
    fn parses_short_text_record() {
        let rec = text_record(b"Hello");
        let record = first_record(&rec).unwrap();
        assert_eq!(record.tnf, TNF_WELL_KNOWN);
        assert_eq!(record.record_type, b"T");
        assert_eq!(record.kind(), RecordKind::Text);
        assert_eq!(record.payload, b"\x02enHello");
        assert!(record.id.is_empty());
    }

    #[test]
    fn parses_long_record_with_id() {
        // MB|ME|IL, TNF=media; type "a/b", id "7", 4-byte payload length
        let mut msg = vec![0xCA, 0x03, 0x00, 0x00, 0x01, 0x2C, 0x01];
        msg.extend_from_slice(b"a/b");
        msg.push(b'7');
        msg.extend_from_slice(&[b'z'; 300]);
        let record = first_record(&msg).unwrap();
        assert_eq!(record.tnf, 0x02);
        assert_eq!(record.id, b"7");
        assert_eq!(record.payload.len(), 300);
        assert_eq!(record.kind(), RecordKind::Other);
    }

    #[test]
    fn iterates_multiple_records() {
        let mut msg = vec![0x91, 0x01, 0x02, b'U', 0x04, b'x'];
        let mut second = text_record(b"two");
        second[0] = 0x51; // ME|SR, well-known
        msg.extend_from_slice(&second);
        let kinds: std::vec::Vec<RecordKind> = records(&msg).map(|r| r.kind()).collect();
        assert_eq!(kinds, [RecordKind::Uri, RecordKind::Text]);
    }

    #[test]
    fn truncated_record_yields_nothing() {
        // declares 10 payload bytes, carries 2
        let msg = [0xD1, 0x01, 0x0A, b'T', 0x02, b'e'];
        assert!(first_record(&msg).is_none());
        assert_eq!(records(&msg).count(), 0);
    }

    #[test]
    fn record_kind_strings() {
        assert_eq!(RecordKind::Text.as_str(), "text");
        assert_eq!(RecordKind::Uri.as_str(), "uri");
        assert_eq!(RecordKind::Other.as_str(), "other");
    }
}
