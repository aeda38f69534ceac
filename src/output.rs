//! Output formatting module
//!
//! Handles:
//! - Rendering captured value data per REG_xxx type
//! - Human-readable event lines
//! - JSON event lines

use anyhow::Result;
use crate::codec::RegistrySetValueInfo;
use crate::models::{RegistryWriteEvent, ValueType};

/// Create a RegistryWriteEvent from a decoded record.
/// This is the canonical way to build an event for output, so the watch
/// loop and the daemon log agree on field names.
pub fn create_write_event(timestamp_ns: u64, info: &RegistrySetValueInfo) -> Result<RegistryWriteEvent> {
    use time::OffsetDateTime;

    let timestamp = OffsetDateTime::from_unix_timestamp_nanos(i128::from(timestamp_ns))?;
    let timestamp_str = timestamp.format(&time::format_description::well_known::Iso8601::DEFAULT)?;

    let value_type = ValueType::from_raw(info.data_type);
    let rendered = render_data(value_type, info.captured_data());

    Ok(RegistryWriteEvent::from_record(timestamp_ns, &timestamp_str, info, rendered))
}

/// Render captured value bytes for display
pub fn render_data(value_type: ValueType, data: &[u8]) -> String {
    match value_type {
        ValueType::Dword if data.len() >= 4 => {
            format!("0x{:08X}", u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
        }
        ValueType::DwordBigEndian if data.len() >= 4 => {
            format!("0x{:08X}", u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
        }
        ValueType::Qword if data.len() >= 8 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&data[..8]);
            format!("0x{:016X}", u64::from_le_bytes(bytes))
        }
        ValueType::Sz | ValueType::ExpandSz | ValueType::Link => {
            let units = utf16_units(data);
            let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
            String::from_utf16_lossy(&units[..end])
        }
        ValueType::MultiSz => utf16_units(data)
            .split(|&u| u == 0)
            .filter(|s| !s.is_empty())
            .map(String::from_utf16_lossy)
            .collect::<Vec<_>>()
            .join("; "),
        _ => hex_dump(data),
    }
}

fn utf16_units(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Wall-clock time of day in local time, `HH:MM:SS.mmm`
pub fn format_clock(timestamp_ns: u64) -> String {
    let utc = chrono::DateTime::from_timestamp_nanos(i64::try_from(timestamp_ns).unwrap_or(i64::MAX));
    utc.with_timezone(&chrono::Local).format("%H:%M:%S%.3f").to_string()
}

/// Format a registry write event as a single human-readable line
pub fn format_event_human(event: &RegistryWriteEvent) -> String {
    let mut line = format!(
        "{}: Registry write PID={}: {}\\{} type: {} size: {} data: {}",
        format_clock(event.timestamp_ns),
        event.pid,
        event.key,
        event.value,
        event.data_type,
        event.data_size,
        event.data
    );
    if event.truncated {
        line.push_str(&format!(" (truncated, {} of {} bytes)", event.captured, event.data_size));
    }
    line
}

/// Format a registry write event as JSON string.
pub fn format_event_json(event: &RegistryWriteEvent) -> Result<String> {
    Ok(serde_json::to_string(event)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(data_type: ValueType, data: &[u8], declared: u32) -> RegistrySetValueInfo {
        let mut info = RegistrySetValueInfo::default();
        info.process_id = 1234;
        info.thread_id = 5678;
        info.key_name.copy_str_truncating(r"\REGISTRY\MACHINE\SOFTWARE\Test");
        info.value_name.copy_str_truncating("Setting");
        info.data_type = data_type.as_raw();
        info.set_data(declared, data);
        info
    }

    #[test]
    fn test_render_dword_and_qword() {
        assert_eq!(render_data(ValueType::Dword, &[0x78, 0x56, 0x34, 0x12]), "0x12345678");
        assert_eq!(render_data(ValueType::DwordBigEndian, &[0x12, 0x34, 0x56, 0x78]), "0x12345678");
        assert_eq!(render_data(ValueType::Qword, &[1, 0, 0, 0, 0, 0, 0, 0]), "0x0000000000000001");
        // Too short to be a DWORD, shown raw
        assert_eq!(render_data(ValueType::Dword, &[0xAB, 0xCD]), "AB CD");
    }

    #[test]
    fn test_render_strings() {
        let sz = ValueType::Sz.encode_text("hello").unwrap();
        assert_eq!(render_data(ValueType::Sz, &sz), "hello");
        // Truncated capture without a terminator still renders
        assert_eq!(render_data(ValueType::ExpandSz, &sz[..4]), "he");

        let multi = ValueType::MultiSz.encode_text("one;two").unwrap();
        assert_eq!(render_data(ValueType::MultiSz, &multi), "one; two");
    }

    #[test]
    fn test_render_binary_as_hex() {
        assert_eq!(render_data(ValueType::Binary, &[0xDE, 0xAD, 0x01]), "DE AD 01");
        assert_eq!(render_data(ValueType::Other(99), &[0x0F]), "0F");
        assert_eq!(render_data(ValueType::None, &[]), "");
    }

    #[test]
    fn test_create_write_event() {
        let info = info(ValueType::Dword, &[1, 0, 0, 0], 4);
        let event = create_write_event(1_700_000_000_123_000_000, &info).unwrap();
        assert_eq!(event.event_type, "registry_write");
        assert_eq!(event.pid, 1234);
        assert_eq!(event.tid, 5678);
        assert_eq!(event.key, r"\REGISTRY\MACHINE\SOFTWARE\Test");
        assert_eq!(event.value, "Setting");
        assert_eq!(event.type_name, "REG_DWORD");
        assert_eq!(event.data, "0x00000001");
        assert!(!event.truncated);
        assert!(event.timestamp.starts_with("2023-11-14T22:13:20.123"));
    }

    #[test]
    fn test_human_line_layout() {
        let info = info(ValueType::Dword, &[0xFF, 0, 0, 0], 4);
        let event = create_write_event(1_700_000_000_000_000_000, &info).unwrap();
        let line = format_event_human(&event);
        assert!(line.contains(r": Registry write PID=1234: \REGISTRY\MACHINE\SOFTWARE\Test\Setting type: 4 size: 4 data: 0x000000FF"));
        assert_eq!(line.as_bytes()[2], b':');
        assert_eq!(line.as_bytes()[8], b'.');
        assert!(!line.contains("truncated"));
    }

    #[test]
    fn test_human_line_marks_truncation() {
        let big = vec![0xAAu8; 300];
        let info = info(ValueType::Binary, &big, 300);
        let event = create_write_event(0, &info).unwrap();
        assert!(event.truncated);
        assert_eq!(event.captured, 128);
        assert!(format_event_human(&event).ends_with("(truncated, 128 of 300 bytes)"));
    }

    #[test]
    fn test_json_line_is_single_object() {
        let info = info(ValueType::Sz, &ValueType::Sz.encode_text("x").unwrap(), 4);
        let event = create_write_event(42, &info).unwrap();
        let json = format_event_json(&event).unwrap();
        assert!(!json.contains('\n'));
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["timestamp_ns"], 42);
        assert_eq!(parsed["data"], "x");
        assert_eq!(parsed["type_name"], "REG_SZ");
    }
}
