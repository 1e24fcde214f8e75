//! Key and value codecs for raw BPF histogram table entries.
//!
//! The kernel program keys each log2 bucket by `(disk name, operation,
//! bucket slot)`. Depending on the table schema the key reaches userspace
//! either as bcc's textual rendering (e.g. `{ "sda" 0x1 0xb }`) or as the
//! raw C struct bytes. Both are handled here; a [`KeyLayout`] describes
//! which one to expect and where the operation code comes from.

use thiserror::Error;

/// Kernel disk name length (`DISK_NAME_LEN` in linux/genhd.h).
pub const DISK_NAME_LEN: usize = 32;

/// How raw table keys and values are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEncoding {
    /// bcc textual rendering: `{ "sda" 0x1 0xb }`, values as `0x1f3`.
    Text,
    /// Raw C struct bytes: `char disk[32]`, optional LE u64 operation,
    /// LE u64 slot. Values are LE u64.
    Binary,
}

/// Schema descriptor for one table's key format.
///
/// Tables that split per operation (e.g. `read_lat` / `write_lat`) omit the
/// operation field from the key and carry it here as `fixed_operation`.
#[derive(Debug, Clone, Copy)]
pub struct KeyLayout {
    pub encoding: KeyEncoding,
    /// Operation code for tables whose keys omit the operation field.
    pub fixed_operation: Option<u8>,
}

impl KeyLayout {
    /// Text keys with the operation code embedded in the key.
    pub const fn text() -> Self {
        Self {
            encoding: KeyEncoding::Text,
            fixed_operation: None,
        }
    }

    /// Binary keys for a table dedicated to a single operation.
    pub const fn binary_fixed(operation: u8) -> Self {
        Self {
            encoding: KeyEncoding::Binary,
            fixed_operation: Some(operation),
        }
    }
}

/// A decoded table key: which device, which I/O operation, which bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketKey {
    pub device: String,
    pub operation: u8,
    pub bucket: u64,
}

/// Errors from decoding a single raw key or value.
///
/// None of these are fatal: the caller skips the offending entry.
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("key has {found} fields, expected {expected}")]
    FieldCount { expected: usize, found: usize },

    #[error("unparseable numeral {text:?}")]
    BadNumeral { text: String },

    #[error("operation code {code} does not fit in u8")]
    OperationRange { code: u64 },

    #[error("binary key too short: {size} bytes, need {need}")]
    KeyTruncated { size: usize, need: usize },

    #[error("binary value has {size} bytes, need 8")]
    ValueTruncated { size: usize },

    #[error("key is not valid UTF-8")]
    NotUtf8,

    #[error("empty device name")]
    EmptyDevice,
}

/// Decode a raw table key according to `layout`.
pub fn decode_key(raw: &[u8], layout: &KeyLayout) -> Result<BucketKey, KeyError> {
    match layout.encoding {
        KeyEncoding::Text => decode_text_key(raw, layout.fixed_operation),
        KeyEncoding::Binary => decode_binary_key(raw, layout.fixed_operation),
    }
}

/// Decode a raw table value (an occupancy count) according to `encoding`.
pub fn decode_value(raw: &[u8], encoding: KeyEncoding) -> Result<u64, KeyError> {
    match encoding {
        KeyEncoding::Text => {
            let text = std::str::from_utf8(raw).map_err(|_| KeyError::NotUtf8)?;
            parse_numeral(text.trim_matches(|c: char| c == '\0' || c.is_whitespace()))
        }
        KeyEncoding::Binary => {
            let bytes: [u8; 8] = raw
                .get(..8)
                .and_then(|s| s.try_into().ok())
                .ok_or(KeyError::ValueTruncated { size: raw.len() })?;
            Ok(u64::from_le_bytes(bytes))
        }
    }
}

/// Parse a bcc-rendered key such as `{ "sda" 0x1 0xb }`.
///
/// With a fixed operation the key carries only device and slot fields.
fn decode_text_key(raw: &[u8], fixed_operation: Option<u8>) -> Result<BucketKey, KeyError> {
    let text = std::str::from_utf8(raw).map_err(|_| KeyError::NotUtf8)?;
    let trimmed = text.trim_matches(|c: char| matches!(c, '{' | '}' | '\0') || c.is_whitespace());
    let fields: Vec<&str> = trimmed.split_whitespace().collect();

    let expected = if fixed_operation.is_some() { 2 } else { 3 };
    if fields.len() != expected {
        return Err(KeyError::FieldCount {
            expected,
            found: fields.len(),
        });
    }

    let device = fields[0].trim_matches('"');
    if device.is_empty() {
        return Err(KeyError::EmptyDevice);
    }

    let operation = match fixed_operation {
        Some(op) => op,
        None => {
            let code = parse_numeral(fields[1])?;
            u8::try_from(code).map_err(|_| KeyError::OperationRange { code })?
        }
    };

    let bucket = parse_numeral(fields[expected - 1])?;

    Ok(BucketKey {
        device: device.to_string(),
        operation,
        bucket,
    })
}

/// Parse raw `disk_key` struct bytes: `char disk[32]`, optional LE u64
/// operation (only when the schema embeds it), LE u64 slot.
fn decode_binary_key(raw: &[u8], fixed_operation: Option<u8>) -> Result<BucketKey, KeyError> {
    let need = if fixed_operation.is_some() {
        DISK_NAME_LEN + 8
    } else {
        DISK_NAME_LEN + 16
    };
    if raw.len() < need {
        return Err(KeyError::KeyTruncated {
            size: raw.len(),
            need,
        });
    }

    let disk = &raw[..DISK_NAME_LEN];
    let name_len = disk.iter().position(|&b| b == 0).unwrap_or(DISK_NAME_LEN);
    let device = String::from_utf8_lossy(&disk[..name_len]).into_owned();
    if device.is_empty() {
        return Err(KeyError::EmptyDevice);
    }

    let (operation, slot_off) = match fixed_operation {
        Some(op) => (op, DISK_NAME_LEN),
        None => {
            let code = read_u64_le(raw, DISK_NAME_LEN);
            let op = u8::try_from(code).map_err(|_| KeyError::OperationRange { code })?;
            (op, DISK_NAME_LEN + 8)
        }
    };

    Ok(BucketKey {
        device,
        operation,
        bucket: read_u64_le(raw, slot_off),
    })
}

/// Parse a textual numeral, accepting `0x` hex or plain decimal.
fn parse_numeral(text: &str) -> Result<u64, KeyError> {
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        text.parse::<u64>()
    };

    parsed.map_err(|_| KeyError::BadNumeral {
        text: text.to_string(),
    })
}

#[inline]
fn read_u64_le(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary_key(disk: &str, operation: Option<u64>, slot: u64) -> Vec<u8> {
        let mut raw = vec![0u8; DISK_NAME_LEN];
        raw[..disk.len()].copy_from_slice(disk.as_bytes());
        if let Some(op) = operation {
            raw.extend_from_slice(&op.to_le_bytes());
        }
        raw.extend_from_slice(&slot.to_le_bytes());
        raw
    }

    #[test]
    fn test_text_key_with_operation() {
        let key = decode_key(br#"{ "sda" 0x1 0xb }"#, &KeyLayout::text()).unwrap();
        assert_eq!(key.device, "sda");
        assert_eq!(key.operation, 1);
        assert_eq!(key.bucket, 11);
    }

    #[test]
    fn test_text_key_decimal_numerals() {
        let key = decode_key(br#"{ "nvme0n1" 2 7 }"#, &KeyLayout::text()).unwrap();
        assert_eq!(key.device, "nvme0n1");
        assert_eq!(key.operation, 2);
        assert_eq!(key.bucket, 7);
    }

    #[test]
    fn test_text_key_fixed_operation() {
        let layout = KeyLayout {
            encoding: KeyEncoding::Text,
            fixed_operation: Some(0),
        };
        let key = decode_key(br#"{ "sdb" 0x5 }"#, &layout).unwrap();
        assert_eq!(key.device, "sdb");
        assert_eq!(key.operation, 0);
        assert_eq!(key.bucket, 5);
    }

    #[test]
    fn test_text_key_wrong_field_count() {
        let err = decode_key(br#"{ "sda" 0x1 }"#, &KeyLayout::text()).unwrap_err();
        assert!(matches!(
            err,
            KeyError::FieldCount {
                expected: 3,
                found: 2
            }
        ));
    }

    #[test]
    fn test_text_key_bad_numeral() {
        let err = decode_key(br#"{ "sda" 0x1 banana }"#, &KeyLayout::text()).unwrap_err();
        assert!(matches!(err, KeyError::BadNumeral { .. }));
    }

    #[test]
    fn test_text_key_operation_out_of_range() {
        let err = decode_key(br#"{ "sda" 0x1ff 0x3 }"#, &KeyLayout::text()).unwrap_err();
        assert!(matches!(err, KeyError::OperationRange { code: 0x1ff }));
    }

    #[test]
    fn test_text_key_empty_device() {
        let err = decode_key(br#"{ "" 0x1 0x3 }"#, &KeyLayout::text()).unwrap_err();
        assert!(matches!(err, KeyError::EmptyDevice));
    }

    #[test]
    fn test_text_key_not_utf8() {
        let err = decode_key(&[0xff, 0xfe, 0x20], &KeyLayout::text()).unwrap_err();
        assert!(matches!(err, KeyError::NotUtf8));
    }

    #[test]
    fn test_binary_key_fixed_operation() {
        let raw = binary_key("sda", None, 11);
        let key = decode_key(&raw, &KeyLayout::binary_fixed(1)).unwrap();
        assert_eq!(key.device, "sda");
        assert_eq!(key.operation, 1);
        assert_eq!(key.bucket, 11);
    }

    #[test]
    fn test_binary_key_embedded_operation() {
        let layout = KeyLayout {
            encoding: KeyEncoding::Binary,
            fixed_operation: None,
        };
        let raw = binary_key("vda", Some(3), 4);
        let key = decode_key(&raw, &layout).unwrap();
        assert_eq!(key.device, "vda");
        assert_eq!(key.operation, 3);
        assert_eq!(key.bucket, 4);
    }

    #[test]
    fn test_binary_key_truncated() {
        let err = decode_key(&[0u8; 16], &KeyLayout::binary_fixed(0)).unwrap_err();
        assert!(matches!(err, KeyError::KeyTruncated { size: 16, need: 40 }));
    }

    #[test]
    fn test_binary_key_full_name_no_nul() {
        // A name occupying all 32 bytes has no NUL terminator.
        let name = "a".repeat(DISK_NAME_LEN);
        let raw = binary_key(&name, None, 2);
        let key = decode_key(&raw, &KeyLayout::binary_fixed(0)).unwrap();
        assert_eq!(key.device, name);
        assert_eq!(key.bucket, 2);
    }

    #[test]
    fn test_text_value_hex() {
        assert_eq!(decode_value(b"0x1f3", KeyEncoding::Text).unwrap(), 499);
    }

    #[test]
    fn test_text_value_decimal_with_nul() {
        assert_eq!(decode_value(b"42\0", KeyEncoding::Text).unwrap(), 42);
    }

    #[test]
    fn test_text_value_garbage() {
        let err = decode_value(b"0xzz", KeyEncoding::Text).unwrap_err();
        assert!(matches!(err, KeyError::BadNumeral { .. }));
    }

    #[test]
    fn test_binary_value() {
        let raw = 499u64.to_le_bytes();
        assert_eq!(decode_value(&raw, KeyEncoding::Binary).unwrap(), 499);
    }

    #[test]
    fn test_binary_value_truncated() {
        let err = decode_value(&[1, 2, 3], KeyEncoding::Binary).unwrap_err();
        assert!(matches!(err, KeyError::ValueTruncated { size: 3 }));
    }

    #[test]
    fn test_key_error_display() {
        let e = KeyError::BadNumeral {
            text: "banana".to_string(),
        };
        assert_eq!(e.to_string(), "unparseable numeral \"banana\"");

        let e = KeyError::KeyTruncated { size: 3, need: 40 };
        assert_eq!(e.to_string(), "binary key too short: 3 bytes, need 40");
    }
}
