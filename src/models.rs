//! Data models module
//!
//! Defines core data structures:
//! - ValueType: REG_xxx value type tags and their textual names
//! - SetValueNotification: a value write as delivered by a hook adapter
//! - RegistryWriteEvent: canonical decoded event for consumer output
//! - WatchConfig: consumer loop settings

use crate::codec::RegistrySetValueInfo;
use crate::hook::{KeyObject, PostOperation, SetValueInformation};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Registry value type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    None,
    Sz,
    ExpandSz,
    Binary,
    Dword,
    DwordBigEndian,
    Link,
    MultiSz,
    Qword,
    Other(u32),
}

impl ValueType {
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            0 => ValueType::None,
            1 => ValueType::Sz,
            2 => ValueType::ExpandSz,
            3 => ValueType::Binary,
            4 => ValueType::Dword,
            5 => ValueType::DwordBigEndian,
            6 => ValueType::Link,
            7 => ValueType::MultiSz,
            11 => ValueType::Qword,
            other => ValueType::Other(other),
        }
    }

    pub const fn as_raw(self) -> u32 {
        match self {
            ValueType::None => 0,
            ValueType::Sz => 1,
            ValueType::ExpandSz => 2,
            ValueType::Binary => 3,
            ValueType::Dword => 4,
            ValueType::DwordBigEndian => 5,
            ValueType::Link => 6,
            ValueType::MultiSz => 7,
            ValueType::Qword => 11,
            ValueType::Other(raw) => raw,
        }
    }

    pub fn name(self) -> String {
        match self {
            ValueType::None => "REG_NONE".to_string(),
            ValueType::Sz => "REG_SZ".to_string(),
            ValueType::ExpandSz => "REG_EXPAND_SZ".to_string(),
            ValueType::Binary => "REG_BINARY".to_string(),
            ValueType::Dword => "REG_DWORD".to_string(),
            ValueType::DwordBigEndian => "REG_DWORD_BIG_ENDIAN".to_string(),
            ValueType::Link => "REG_LINK".to_string(),
            ValueType::MultiSz => "REG_MULTI_SZ".to_string(),
            ValueType::Qword => "REG_QWORD".to_string(),
            ValueType::Other(raw) => format!("REG_TYPE_{}", raw),
        }
    }

    /// Encode a textual value the way the registry stores it for this type
    pub fn encode_text(self, text: &str) -> Result<Vec<u8>, ModelError> {
        let invalid = || ModelError::InvalidData {
            value_type: self.name(),
            input: text.to_string(),
        };
        match self {
            ValueType::None => Ok(Vec::new()),
            ValueType::Sz | ValueType::ExpandSz | ValueType::Link => Ok(utf16_bytes(text, 1)),
            ValueType::MultiSz => {
                let mut bytes = Vec::new();
                for part in text.split(';').filter(|s| !s.is_empty()) {
                    bytes.extend(utf16_bytes(part, 1));
                }
                bytes.extend_from_slice(&[0, 0]);
                Ok(bytes)
            }
            ValueType::Dword => parse_u64(text)
                .and_then(|v| u32::try_from(v).ok())
                .map(|v| v.to_le_bytes().to_vec())
                .ok_or_else(invalid),
            ValueType::DwordBigEndian => parse_u64(text)
                .and_then(|v| u32::try_from(v).ok())
                .map(|v| v.to_be_bytes().to_vec())
                .ok_or_else(invalid),
            ValueType::Qword => parse_u64(text).map(|v| v.to_le_bytes().to_vec()).ok_or_else(invalid),
            ValueType::Binary | ValueType::Other(_) => parse_hex(text).ok_or_else(invalid),
        }
    }
}

impl FromStr for ValueType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        let normalized = normalized.strip_prefix("reg-").unwrap_or(&normalized);
        match normalized {
            "none" => Ok(ValueType::None),
            "sz" => Ok(ValueType::Sz),
            "expand-sz" => Ok(ValueType::ExpandSz),
            "binary" => Ok(ValueType::Binary),
            "dword" => Ok(ValueType::Dword),
            "dword-big-endian" => Ok(ValueType::DwordBigEndian),
            "link" => Ok(ValueType::Link),
            "multi-sz" => Ok(ValueType::MultiSz),
            "qword" => Ok(ValueType::Qword),
            other => other
                .parse::<u32>()
                .map(ValueType::from_raw)
                .map_err(|_| ModelError::UnknownValueType(s.to_string())),
        }
    }
}

fn utf16_bytes(text: &str, terminators: usize) -> Vec<u8> {
    text.encode_utf16()
        .chain(std::iter::repeat(0).take(terminators))
        .flat_map(u16::to_le_bytes)
        .collect()
}

fn parse_u64(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Hex digits, optionally separated by whitespace or ':'
fn parse_hex(text: &str) -> Option<Vec<u8>> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace() && *c != ':').collect();
    hex::decode(digits).ok()
}

/// Custom error types for model conversions
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Unknown value type: {0}")]
    UnknownValueType(String),

    #[error("Invalid {value_type} data: {input}")]
    InvalidData { value_type: String, input: String },

    #[error("Invalid base64 value data: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    /// Note: bounds must match POLL_INTERVAL_MIN_MS/MAX_MS in constants.rs
    #[error("Invalid polling interval: {0}ms. Must be between 10 and 60000 milliseconds")]
    InvalidInterval(u64),

    /// Note: bounds must match HEADER_SIZE and MAX_READ_CAPACITY
    #[error("Invalid buffer size: {0}. Must be between 12 and 1048576 bytes")]
    InvalidBufferSize(usize),
}

/// A completed value write, as sent by a hook adapter over IPC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetValueNotification {
    /// Full key path
    pub key: String,
    pub value_name: String,
    pub data_type: u32,
    /// Declared size; defaults to the length of `data`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_size: Option<u32>,
    /// Base64 of the written bytes
    #[serde(default)]
    pub data: String,
    pub process_id: u32,
    #[serde(default)]
    pub thread_id: u32,
    /// Status of the write itself; negative values mean it failed
    #[serde(default)]
    pub status: i32,
}

impl SetValueNotification {
    pub fn new(key: &str, value_name: &str, value_type: ValueType, data: &[u8], process_id: u32, thread_id: u32) -> Self {
        Self {
            key: key.to_string(),
            value_name: value_name.to_string(),
            data_type: value_type.as_raw(),
            data_size: None,
            data: BASE64.encode(data),
            process_id,
            thread_id,
            status: 0,
        }
    }

    /// Split into the key path and the hook payload. The key object is left
    /// unset; whoever opens the key fills it in.
    pub fn into_post_operation(self) -> Result<(String, PostOperation), ModelError> {
        let data = BASE64.decode(self.data.as_bytes())?;
        let data_size = self
            .data_size
            .unwrap_or_else(|| u32::try_from(data.len()).unwrap_or(u32::MAX));
        let operation = PostOperation {
            status: self.status,
            object: KeyObject(0),
            process_id: self.process_id,
            thread_id: self.thread_id,
            pre_information: Some(SetValueInformation {
                value_name: self.value_name,
                data_type: self.data_type,
                data_size,
                data,
            }),
        };
        Ok((self.key, operation))
    }
}

/// Canonical event structure for registry write output.
/// Used by the consumer for both JSON and human-readable formatting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryWriteEvent {
    /// ISO 8601 capture timestamp
    pub timestamp: String,
    /// Capture time in nanoseconds since the Unix epoch
    pub timestamp_ns: u64,
    /// Event type identifier
    pub event_type: String,
    pub pid: u32,
    pub tid: u32,
    pub key: String,
    pub value: String,
    pub data_type: u32,
    pub type_name: String,
    /// Declared size of the written value
    pub data_size: u32,
    /// Number of value bytes actually captured
    pub captured: usize,
    pub truncated: bool,
    /// Rendered value data
    pub data: String,
}

impl RegistryWriteEvent {
    pub fn from_record(timestamp_ns: u64, timestamp: &str, info: &RegistrySetValueInfo, rendered: String) -> Self {
        let value_type = ValueType::from_raw(info.data_type);
        Self {
            timestamp: timestamp.to_string(),
            timestamp_ns,
            event_type: crate::constants::EVENT_REGISTRY_WRITE.to_string(),
            pid: info.process_id,
            tid: info.thread_id,
            key: info.key_name.to_string_lossy(),
            value: info.value_name.to_string_lossy(),
            data_type: info.data_type,
            type_name: value_type.name(),
            data_size: info.data_size,
            captured: info.captured_data().len(),
            truncated: info.is_truncated(),
            data: rendered,
        }
    }
}

/// Configuration for the consumer polling loop
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub socket_path: PathBuf,
    /// Delay between reads
    pub interval: Duration,
    /// Capacity offered on each read
    pub buffer_size: usize,
    /// Whether to output JSON lines
    pub output_json: bool,
}
