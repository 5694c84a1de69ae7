//! Rendering of typed keys and records.

use burrowdb_core::{KeyType, RecordType};
use clap::ValueEnum;

/// How command output is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Renders a key according to its database key type.
pub fn key_text(key_type: KeyType, bytes: &[u8]) -> String {
    match key_type {
        KeyType::UInt8
        | KeyType::UInt16
        | KeyType::UInt32
        | KeyType::UInt64
        | KeyType::RecordNumber32
        | KeyType::RecordNumber64 => unsigned(bytes),
        KeyType::Real32 | KeyType::Real64 => real(bytes),
        KeyType::Binary | KeyType::Custom => binary(bytes),
    }
}

/// Renders a record according to its database record type.
pub fn record_text(record_type: RecordType, bytes: &[u8]) -> String {
    match record_type {
        RecordType::UInt8 | RecordType::UInt16 | RecordType::UInt32 | RecordType::UInt64 => {
            unsigned(bytes)
        }
        RecordType::Real32 | RecordType::Real64 => real(bytes),
        RecordType::Binary => binary(bytes),
    }
}

fn unsigned(bytes: &[u8]) -> String {
    match bytes.len() {
        1 | 2 | 4 | 8 => {
            let mut buf = [0u8; 8];
            buf[..bytes.len()].copy_from_slice(bytes);
            u64::from_le_bytes(buf).to_string()
        }
        _ => binary(bytes),
    }
}

fn real(bytes: &[u8]) -> String {
    match bytes.len() {
        4 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).to_string(),
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            f64::from_le_bytes(buf).to_string()
        }
        _ => binary(bytes),
    }
}

/// Printable ASCII is shown quoted, anything else as hex.
fn binary(bytes: &[u8]) -> String {
    if !bytes.is_empty() && bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        format!("\"{}\"", String::from_utf8_lossy(bytes))
    } else {
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        format!("0x{hex}")
    }
}

/// Formats a byte count with a binary unit.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_little_endian() {
        assert_eq!(key_text(KeyType::UInt32, &7u32.to_le_bytes()), "7");
        assert_eq!(key_text(KeyType::RecordNumber64, &9u64.to_le_bytes()), "9");
        assert_eq!(record_text(RecordType::Real64, &2.5f64.to_le_bytes()), "2.5");
    }

    #[test]
    fn binary_values() {
        assert_eq!(key_text(KeyType::Binary, b"COUNT"), "\"COUNT\"");
        assert_eq!(record_text(RecordType::Binary, &[0, 255]), "0x00ff");
        assert_eq!(record_text(RecordType::Binary, b""), "0x");
        // wrong widths fall back to hex
        assert_eq!(key_text(KeyType::UInt32, &[1, 2, 3]), "0x010203");
    }

    #[test]
    fn sizes() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
    }
}
