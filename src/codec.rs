//! Event record codec
//!
//! Defines the self-describing binary layout shared by the daemon and its
//! consumers:
//! - A fixed 12-byte header (`kind`, `size`, `timestamp`) in front of every record
//! - Fixed-capacity text and byte fields with truncating copies
//! - Stream parsing of concatenated records using only the `size` prefix
//!
//! All integers are little-endian and there is no padding between fields.

use thiserror::Error;

/// Length of the common record header in bytes
pub const HEADER_SIZE: usize = 12;

/// Key path capacity in UTF-16 code units, terminator included
pub const KEY_NAME_CAPACITY: usize = 256;

/// Value name capacity in UTF-16 code units, terminator included
pub const VALUE_NAME_CAPACITY: usize = 64;

/// Number of raw value bytes captured per record
pub const DATA_CAPACITY: usize = 128;

/// Payload length of a registry set-value record
pub const SET_VALUE_PAYLOAD_SIZE: usize =
    4 + 4 + KEY_NAME_CAPACITY * 2 + VALUE_NAME_CAPACITY * 2 + 4 + 4 + DATA_CAPACITY;

/// Total length of a registry set-value record
pub const SET_VALUE_RECORD_SIZE: usize = HEADER_SIZE + SET_VALUE_PAYLOAD_SIZE;

/// Errors raised while decoding or encoding records
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("truncated record header: {available} bytes available, {} required", HEADER_SIZE)]
    TruncatedHeader { available: usize },

    #[error("record size {size} is smaller than the {}-byte header", HEADER_SIZE)]
    SizeTooSmall { size: u16 },

    #[error("record declares {size} bytes but only {available} remain")]
    TruncatedRecord { size: u16, available: usize },

    #[error("record of kind {kind} must be {expected} bytes, header declares {size}")]
    SizeMismatch { kind: u16, expected: usize, size: u16 },

    #[error("record buffer holds {len} bytes but header declares {size}")]
    LengthMismatch { size: u16, len: usize },

    #[error("text field `{field}` is not null-terminated")]
    UnterminatedText { field: &'static str },

    #[error("record of {0} bytes does not fit the 16-bit size field")]
    RecordTooLarge(usize),
}

/// Tag selecting the payload variant of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    None,
    RegistrySetValue,
    /// Reserved for variants this build does not know about
    Other(u16),
}

impl RecordKind {
    pub const fn from_raw(raw: u16) -> Self {
        match raw {
            0 => RecordKind::None,
            1 => RecordKind::RegistrySetValue,
            other => RecordKind::Other(other),
        }
    }

    pub const fn as_raw(self) -> u16 {
        match self {
            RecordKind::None => 0,
            RecordKind::RegistrySetValue => 1,
            RecordKind::Other(raw) => raw,
        }
    }
}

impl From<u16> for RecordKind {
    fn from(raw: u16) -> Self {
        Self::from_raw(raw)
    }
}

/// Common header at the start of every record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub kind: RecordKind,
    /// Total record length, header included
    pub size: u16,
    /// Capture time in nanoseconds since the Unix epoch
    pub timestamp: u64,
}

impl RecordHeader {
    /// Parse a header from the start of `bytes`
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CodecError::TruncatedHeader { available: bytes.len() });
        }
        Ok(Self {
            kind: RecordKind::from_raw(read_u16(bytes, 0)),
            size: read_u16(bytes, 2),
            timestamp: read_u64(bytes, 4),
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.kind.as_raw().to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
    }

    pub fn record_len(&self) -> usize {
        usize::from(self.size)
    }
}

/// Fixed-capacity byte buffer that records how much of it is in use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedBytes<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> BoundedBytes<N> {
    pub const fn new() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    /// Copy as much of `src` as fits, zeroing the remainder.
    /// Returns the number of bytes copied.
    pub fn copy_truncating(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(N);
        self.buf[..n].copy_from_slice(&src[..n]);
        self.buf[n..].fill(0);
        self.len = n;
        n
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    fn raw(&self) -> &[u8; N] {
        &self.buf
    }
}

impl<const N: usize> Default for BoundedBytes<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-capacity UTF-16 text that always keeps a null terminator.
///
/// At most `N - 1` code units are stored. Truncation never leaves a dangling
/// high surrogate at the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedText<const N: usize> {
    units: [u16; N],
    len: usize,
}

impl<const N: usize> BoundedText<N> {
    pub const fn new() -> Self {
        Self { units: [0; N], len: 0 }
    }

    /// Copy `src` up to its first null or the capacity, whichever comes first.
    /// Returns the number of code units stored.
    pub fn copy_truncating(&mut self, src: &[u16]) -> usize {
        let src = match src.iter().position(|&u| u == 0) {
            Some(end) => &src[..end],
            None => src,
        };
        let mut n = src.len().min(N.saturating_sub(1));
        if n < src.len() && n > 0 && is_high_surrogate(src[n - 1]) {
            n -= 1;
        }
        self.units[..n].copy_from_slice(&src[..n]);
        self.units[n..].fill(0);
        self.len = n;
        n
    }

    /// Convenience wrapper over [`copy_truncating`](Self::copy_truncating) for Rust strings
    pub fn copy_str_truncating(&mut self, text: &str) -> usize {
        let units: Vec<u16> = text.encode_utf16().collect();
        self.copy_truncating(&units)
    }

    pub fn as_units(&self) -> &[u16] {
        &self.units[..self.len]
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(self.as_units())
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn decode(bytes: &[u8], field: &'static str) -> Result<Self, CodecError> {
        let mut text = Self::new();
        for (i, pair) in bytes.chunks_exact(2).take(N).enumerate() {
            text.units[i] = u16::from_le_bytes([pair[0], pair[1]]);
        }
        text.len = text
            .units
            .iter()
            .position(|&u| u == 0)
            .ok_or(CodecError::UnterminatedText { field })?;
        // anything after the terminator is ignored
        text.units[text.len..].fill(0);
        Ok(text)
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        for unit in &self.units {
            out.extend_from_slice(&unit.to_le_bytes());
        }
    }
}

impl<const N: usize> Default for BoundedText<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> From<&str> for BoundedText<N> {
    fn from(text: &str) -> Self {
        let mut bounded = Self::new();
        bounded.copy_str_truncating(text);
        bounded
    }
}

fn is_high_surrogate(unit: u16) -> bool {
    (0xD800..=0xDBFF).contains(&unit)
}

/// Payload of a registry value write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySetValueInfo {
    pub process_id: u32,
    pub thread_id: u32,
    /// Full key path, e.g. `\REGISTRY\MACHINE\SOFTWARE\Vendor`
    pub key_name: BoundedText<KEY_NAME_CAPACITY>,
    pub value_name: BoundedText<VALUE_NAME_CAPACITY>,
    /// REG_xxx type tag
    pub data_type: u32,
    /// Declared size of the written value, kept even when `data` is truncated
    pub data_size: u32,
    pub data: BoundedBytes<DATA_CAPACITY>,
}

impl RegistrySetValueInfo {
    /// Record the declared size and capture exactly `min(declared, capacity)` bytes.
    /// Bytes the caller did not supply are captured as zero.
    pub fn set_data(&mut self, declared_size: u32, bytes: &[u8]) -> usize {
        self.data_size = declared_size;
        let captured = (declared_size as usize).min(DATA_CAPACITY);
        let supplied = bytes.len().min(captured);
        let mut staged = [0u8; DATA_CAPACITY];
        staged[..supplied].copy_from_slice(&bytes[..supplied]);
        self.data.copy_truncating(&staged[..captured])
    }

    pub fn captured_data(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// True when the written value was larger than the capture buffer
    pub fn is_truncated(&self) -> bool {
        self.data_size as usize > DATA_CAPACITY
    }

    /// Serialize a complete record (header and payload) into `out`
    pub fn encode_record(&self, timestamp: u64, out: &mut Vec<u8>) {
        RecordHeader {
            kind: RecordKind::RegistrySetValue,
            size: SET_VALUE_RECORD_SIZE as u16,
            timestamp,
        }
        .write_to(out);
        self.write_payload(out);
    }

    fn write_payload(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.process_id.to_le_bytes());
        out.extend_from_slice(&self.thread_id.to_le_bytes());
        self.key_name.write_to(out);
        self.value_name.write_to(out);
        out.extend_from_slice(&self.data_type.to_le_bytes());
        out.extend_from_slice(self.data.raw());
        out.extend_from_slice(&self.data_size.to_le_bytes());
    }

    fn decode_payload(payload: &[u8]) -> Result<Self, CodecError> {
        let key_start = 8;
        let value_start = key_start + KEY_NAME_CAPACITY * 2;
        let type_start = value_start + VALUE_NAME_CAPACITY * 2;
        let data_start = type_start + 4;
        let size_start = data_start + DATA_CAPACITY;

        let data_size = read_u32(payload, size_start);
        let captured = (data_size as usize).min(DATA_CAPACITY);
        let mut data = BoundedBytes::new();
        data.copy_truncating(&payload[data_start..data_start + captured]);

        Ok(Self {
            process_id: read_u32(payload, 0),
            thread_id: read_u32(payload, 4),
            key_name: BoundedText::decode(&payload[key_start..value_start], "key_name")?,
            value_name: BoundedText::decode(&payload[value_start..type_start], "value_name")?,
            data_type: read_u32(payload, type_start),
            data_size,
            data,
        })
    }
}

/// A decoded record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRecord {
    RegistrySetValue {
        timestamp: u64,
        info: Box<RegistrySetValueInfo>,
    },
    /// A record whose kind this build does not interpret; kept verbatim
    Unknown {
        kind: RecordKind,
        timestamp: u64,
        payload: Vec<u8>,
    },
}

impl EventRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            EventRecord::RegistrySetValue { .. } => RecordKind::RegistrySetValue,
            EventRecord::Unknown { kind, .. } => *kind,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            EventRecord::RegistrySetValue { timestamp, .. }
            | EventRecord::Unknown { timestamp, .. } => *timestamp,
        }
    }

    /// Serialized length of this record
    pub fn size(&self) -> usize {
        match self {
            EventRecord::RegistrySetValue { .. } => SET_VALUE_RECORD_SIZE,
            EventRecord::Unknown { payload, .. } => HEADER_SIZE + payload.len(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(self.size());
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Append the serialized record to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        let size = u16::try_from(self.size()).map_err(|_| CodecError::RecordTooLarge(self.size()))?;
        match self {
            EventRecord::RegistrySetValue { timestamp, info } => {
                info.encode_record(*timestamp, out);
            }
            EventRecord::Unknown { kind, timestamp, payload } => {
                RecordHeader { kind: *kind, size, timestamp: *timestamp }.write_to(out);
                out.extend_from_slice(payload);
            }
        }
        Ok(())
    }

    /// Decode the record at the start of `bytes`.
    /// Returns the record and the number of bytes it occupied.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), CodecError> {
        let header = RecordHeader::parse(bytes)?;
        let size = header.record_len();
        if size < HEADER_SIZE {
            return Err(CodecError::SizeTooSmall { size: header.size });
        }
        if size > bytes.len() {
            return Err(CodecError::TruncatedRecord {
                size: header.size,
                available: bytes.len(),
            });
        }

        let payload = &bytes[HEADER_SIZE..size];
        let record = match header.kind {
            RecordKind::RegistrySetValue => {
                if size != SET_VALUE_RECORD_SIZE {
                    return Err(CodecError::SizeMismatch {
                        kind: header.kind.as_raw(),
                        expected: SET_VALUE_RECORD_SIZE,
                        size: header.size,
                    });
                }
                EventRecord::RegistrySetValue {
                    timestamp: header.timestamp,
                    info: Box::new(RegistrySetValueInfo::decode_payload(payload)?),
                }
            }
            kind => EventRecord::Unknown {
                kind,
                timestamp: header.timestamp,
                payload: payload.to_vec(),
            },
        };
        Ok((record, size))
    }
}

/// An encoded record as it travels through the queue: owned bytes whose
/// header has been validated against their length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    bytes: Box<[u8]>,
}

impl RawRecord {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, CodecError> {
        let header = RecordHeader::parse(&bytes)?;
        if header.record_len() < HEADER_SIZE {
            return Err(CodecError::SizeTooSmall { size: header.size });
        }
        if header.record_len() != bytes.len() {
            return Err(CodecError::LengthMismatch {
                size: header.size,
                len: bytes.len(),
            });
        }
        Ok(Self { bytes: bytes.into_boxed_slice() })
    }

    pub fn encode(record: &EventRecord) -> Result<Self, CodecError> {
        Self::from_bytes(record.encode()?)
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn kind(&self) -> RecordKind {
        RecordKind::from_raw(read_u16(&self.bytes, 0))
    }

    pub fn timestamp(&self) -> u64 {
        read_u64(&self.bytes, 4)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn decode(&self) -> Result<EventRecord, CodecError> {
        EventRecord::decode(&self.bytes).map(|(record, _)| record)
    }
}

/// Iterator over a byte stream of concatenated records.
///
/// Stops after the first malformed record since the stream can no longer be
/// resynchronized once a `size` field is untrustworthy.
#[derive(Debug, Clone)]
pub struct RecordStream<'a> {
    bytes: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> RecordStream<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0, failed: false }
    }
}

impl Iterator for RecordStream<'_> {
    type Item = Result<EventRecord, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.bytes.len() {
            return None;
        }
        match EventRecord::decode(&self.bytes[self.offset..]) {
            Ok((record, consumed)) => {
                self.offset += consumed;
                Some(Ok(record))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Parse a byte stream of concatenated records
pub fn records(bytes: &[u8]) -> RecordStream<'_> {
    RecordStream::new(bytes)
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_value(key: &str, value: &str, declared: u32, data: &[u8]) -> EventRecord {
        let mut info = RegistrySetValueInfo {
            process_id: 4242,
            thread_id: 17,
            key_name: BoundedText::from(key),
            value_name: BoundedText::from(value),
            data_type: 3,
            ..Default::default()
        };
        info.set_data(declared, data);
        EventRecord::RegistrySetValue {
            timestamp: 1_700_000_000_000_000_000,
            info: Box::new(info),
        }
    }

    #[test]
    fn test_set_value_record_size() {
        assert_eq!(SET_VALUE_RECORD_SIZE, 796);
        let bytes = set_value(r"\REGISTRY\MACHINE\SOFTWARE", "x", 0, &[]).encode().unwrap();
        assert_eq!(bytes.len(), SET_VALUE_RECORD_SIZE);
        let header = RecordHeader::parse(&bytes).unwrap();
        assert_eq!(header.record_len(), bytes.len());
        assert_eq!(header.kind, RecordKind::RegistrySetValue);
    }

    #[test]
    fn test_stream_round_trip_with_value_boundaries() {
        let exact: Vec<u8> = (0..DATA_CAPACITY as u8).collect();
        let oversized = vec![0xAB; 300];
        let originals = vec![
            set_value(r"\REGISTRY\MACHINE\A", "Empty", 0, &[]),
            set_value(r"\REGISTRY\MACHINE\B", "Exact", DATA_CAPACITY as u32, &exact),
            set_value(r"\REGISTRY\MACHINE\C", "Large", 300, &oversized),
        ];

        let mut stream = Vec::new();
        for record in &originals {
            record.encode_into(&mut stream).unwrap();
        }

        let parsed: Vec<EventRecord> = records(&stream).collect::<Result<_, _>>().unwrap();
        assert_eq!(parsed.len(), 3);

        match &parsed[0] {
            EventRecord::RegistrySetValue { info, .. } => {
                assert!(info.captured_data().is_empty());
                assert_eq!(info.data_size, 0);
            }
            other => panic!("unexpected record {:?}", other),
        }
        match &parsed[1] {
            EventRecord::RegistrySetValue { info, .. } => {
                assert_eq!(info.captured_data(), exact.as_slice());
                assert!(!info.is_truncated());
            }
            other => panic!("unexpected record {:?}", other),
        }
        match &parsed[2] {
            EventRecord::RegistrySetValue { info, .. } => {
                assert_eq!(info.captured_data().len(), DATA_CAPACITY);
                assert_eq!(info.data_size, 300, "declared size must survive truncation");
                assert!(info.is_truncated());
            }
            other => panic!("unexpected record {:?}", other),
        }

        // Oversized source is only captured up to capacity, so the decoded
        // record equals the original which was built the same way
        assert_eq!(parsed, originals);
    }

    #[test]
    fn test_declared_size_beyond_supplied_bytes_round_trips() {
        let original = set_value(r"\REGISTRY\MACHINE\D", "Short", 64, &[1, 2, 3]);
        let bytes = original.encode().unwrap();
        let (decoded, consumed) = EventRecord::decode(&bytes).unwrap();
        assert_eq!(consumed, SET_VALUE_RECORD_SIZE);
        assert_eq!(decoded, original);

        match decoded {
            EventRecord::RegistrySetValue { info, .. } => {
                assert_eq!(info.data_size, 64);
                assert_eq!(info.captured_data().len(), 64);
                assert_eq!(&info.captured_data()[..3], &[1u8, 2, 3]);
                assert!(info.captured_data()[3..].iter().all(|&b| b == 0));
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_data_precedes_declared_size_on_the_wire() {
        let bytes = set_value(r"\REGISTRY\MACHINE", "v", 0x0102, &[0xEE; 4]).encode().unwrap();
        // header 12, ids 8, key 512, value 128, type 4
        let data_offset = HEADER_SIZE + 8 + KEY_NAME_CAPACITY * 2 + VALUE_NAME_CAPACITY * 2 + 4;
        assert_eq!(data_offset, 664);
        assert_eq!(&bytes[data_offset..data_offset + 4], &[0xEEu8; 4]);
        let size_offset = data_offset + DATA_CAPACITY;
        assert_eq!(read_u32(&bytes, size_offset), 0x0102);
        assert_eq!(size_offset + 4, SET_VALUE_RECORD_SIZE);
    }

    #[test]
    fn test_key_name_truncated_with_terminator() {
        let long_key = format!(r"\REGISTRY\MACHINE\{}", "K".repeat(400));
        let mut text: BoundedText<KEY_NAME_CAPACITY> = BoundedText::new();
        let copied = text.copy_str_truncating(&long_key);
        assert_eq!(copied, KEY_NAME_CAPACITY - 1);

        let record = set_value(&long_key, "v", 0, &[]);
        let bytes = record.encode().unwrap();
        // last code unit of the key field is the terminator
        let key_end = HEADER_SIZE + 8 + KEY_NAME_CAPACITY * 2;
        assert_eq!(&bytes[key_end - 2..key_end], &[0u8, 0]);
    }

    #[test]
    fn test_text_truncation_does_not_split_surrogate_pair() {
        let mut text: BoundedText<4> = BoundedText::new();
        // "ab" + U+1F600 needs 4 code units; only 3 fit
        let copied = text.copy_str_truncating("ab\u{1F600}");
        assert_eq!(copied, 2);
        assert_eq!(text.to_string_lossy(), "ab");
    }

    #[test]
    fn test_text_copy_stops_at_embedded_null() {
        let mut text: BoundedText<16> = BoundedText::new();
        let copied = text.copy_truncating(&[0x61, 0x62, 0, 0x63]);
        assert_eq!(copied, 2);
        assert_eq!(text.to_string_lossy(), "ab");
    }

    #[test]
    fn test_bounded_bytes_never_overruns() {
        let mut buf: BoundedBytes<8> = BoundedBytes::new();
        assert_eq!(buf.copy_truncating(&[1; 20]), 8);
        assert_eq!(buf.as_slice(), &[1u8; 8]);
        assert_eq!(buf.copy_truncating(&[2, 2]), 2);
        assert_eq!(buf.as_slice(), &[2u8, 2]);
        assert_eq!(buf.raw()[2..], [0u8; 6]);
    }

    #[test]
    fn test_unknown_kind_is_skipped_by_size() {
        let future = EventRecord::Unknown {
            kind: RecordKind::Other(99),
            timestamp: 5,
            payload: vec![7; 33],
        };
        let known = set_value(r"\REGISTRY\MACHINE\X", "v", 4, &[1, 0, 0, 0]);

        let mut stream = future.encode().unwrap();
        known.encode_into(&mut stream).unwrap();

        let parsed: Vec<_> = records(&stream).collect::<Result<_, _>>().unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].kind(), RecordKind::Other(99));
        assert_eq!(parsed[0].size(), HEADER_SIZE + 33);
        assert_eq!(parsed[1], known);
    }

    #[test]
    fn test_stream_stops_on_malformed_size() {
        let mut stream = set_value(r"\REGISTRY\MACHINE\X", "v", 0, &[]).encode().unwrap();
        let mut bad = Vec::new();
        RecordHeader { kind: RecordKind::Other(5), size: 4, timestamp: 0 }.write_to(&mut bad);
        stream.extend_from_slice(&bad);

        let mut parsed = records(&stream);
        assert!(parsed.next().unwrap().is_ok());
        assert_eq!(parsed.next().unwrap(), Err(CodecError::SizeTooSmall { size: 4 }));
        assert!(parsed.next().is_none());
    }

    #[test]
    fn test_truncated_stream_is_reported() {
        let bytes = set_value(r"\REGISTRY\MACHINE\X", "v", 0, &[]).encode().unwrap();
        let err = EventRecord::decode(&bytes[..100]).unwrap_err();
        assert_eq!(
            err,
            CodecError::TruncatedRecord { size: SET_VALUE_RECORD_SIZE as u16, available: 100 }
        );
        assert_eq!(
            RecordHeader::parse(&bytes[..5]).unwrap_err(),
            CodecError::TruncatedHeader { available: 5 }
        );
    }

    #[test]
    fn test_raw_record_validates_length() {
        let mut bytes = set_value(r"\REGISTRY\MACHINE\X", "v", 0, &[]).encode().unwrap();
        let raw = RawRecord::from_bytes(bytes.clone()).unwrap();
        assert_eq!(raw.size(), SET_VALUE_RECORD_SIZE);
        assert_eq!(raw.kind(), RecordKind::RegistrySetValue);
        assert_eq!(raw.timestamp(), 1_700_000_000_000_000_000);

        bytes.push(0);
        assert!(matches!(
            RawRecord::from_bytes(bytes),
            Err(CodecError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_oversized_unknown_record_is_rejected() {
        let record = EventRecord::Unknown {
            kind: RecordKind::Other(3),
            timestamp: 0,
            payload: vec![0; u16::MAX as usize],
        };
        assert!(matches!(record.encode(), Err(CodecError::RecordTooLarge(_))));
    }
}
