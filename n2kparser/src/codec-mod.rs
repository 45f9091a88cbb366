/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 */

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::bitcodec;
use crate::compile::{N2kCompiledField, N2kCompiledMessage, N2kCompiledRegistry};
use crate::model::{N2kFieldType, N2kMessageLengthType};
use sockcan::prelude::CanError;

/// Decodes and encodes whole PGN payloads against a compiled registry.
/// Stateless; clone freely, the registry is shared.
#[derive(Clone)]
pub struct N2kMessageParser {
    registry: Arc<N2kCompiledRegistry>,
}

impl N2kMessageParser {
    #[must_use]
    pub fn new(registry: Arc<N2kCompiledRegistry>) -> N2kMessageParser {
        N2kMessageParser { registry }
    }

    #[must_use]
    pub fn get_registry(&self) -> &Arc<N2kCompiledRegistry> {
        &self.registry
    }

    /// Decodes `payload` into a `{pgn, decoded}` envelope. Returns `None` for
    /// an unknown PGN so the caller can classify the frame as unsupported.
    /// Fields ending past the payload are skipped, not errors: senders
    /// truncate trailing unavailable fields.
    ///
    /// # Errors
    /// `Unsupported` when a STRING_FIX field is not byte-aligned.
    pub fn decode_to_json(&self, pgn: u32, payload: &[u8]) -> Result<Option<Value>, CanError> {
        let Some(message) = self.registry.get_message(pgn) else {
            return Ok(None);
        };

        let mut decoded = Map::new();
        let payload_bits = payload.len() * 8;

        for field in message.get_fields() {
            if field.end_bit() > payload_bits {
                break;
            }
            pack_field(field, payload, &mut decoded)?;
        }

        let mut envelope = Map::new();
        envelope.insert("pgn".to_string(), Value::from(pgn));
        envelope.insert("decoded".to_string(), Value::Object(decoded));

        Ok(Some(Value::Object(envelope)))
    }

    /// Encodes a `{pgn, decoded}` envelope into payload bytes, initialized to
    /// the N2K "unavailable" sentinel 0xFF.
    ///
    /// # Errors
    /// `InvalidArgument` on an unknown PGN, a missing `decoded` object, raw
    /// values past the field's bit range, or a FIXED message whose written
    /// fields exceed its declared length; `IllegalState` on zero resolution;
    /// `Unsupported` on unaligned STRING_FIX fields.
    pub fn encode_from_json(&self, pgn: u32, envelope: &Value) -> Result<Vec<u8>, CanError> {
        let Some(message) = self.registry.get_message(pgn) else {
            return Err(CanError::new("n2k-encode-pgn", format!("unknown PGN {pgn}")));
        };
        let Some(decoded) = envelope.get("decoded").and_then(Value::as_object) else {
            return Err(CanError::new("n2k-encode-envelope", "missing 'decoded' object"));
        };

        let payload_length = compute_payload_length_bytes(message, decoded)?;
        let mut payload = vec![0xFFu8; payload_length];

        for field in message.get_fields() {
            unpack_field(field, &mut payload, decoded)?;
        }

        Ok(payload)
    }
}

fn compute_payload_length_bytes(
    message: &N2kCompiledMessage,
    decoded: &Map<String, Value>,
) -> Result<usize, CanError> {
    let mut required_bits = message.get_minimum_length_bytes() * 8;

    for field in message.get_fields() {
        if !should_write_field(field, decoded) {
            continue;
        }
        if field.end_bit() > required_bits {
            required_bits = field.end_bit();
        }
    }

    let required_bytes = (required_bits + 7) >> 3;

    if message.get_length_type() == N2kMessageLengthType::Fixed {
        let Some(fixed_length_bytes) = message.get_fixed_length_bytes() else {
            return Err(CanError::state(
                "n2k-encode-length",
                format!("FIXED lengthType but fixedLengthBytes is missing for PGN {}", message.get_pgn()),
            ));
        };
        if required_bytes > fixed_length_bytes {
            return Err(CanError::new(
                "n2k-encode-length",
                format!(
                    "PGN {} requires {required_bytes} bytes based on provided fields, but fixed length is {fixed_length_bytes}",
                    message.get_pgn()
                ),
            ));
        }
        return Ok(fixed_length_bytes);
    }

    Ok(required_bytes)
}

fn should_write_field(field: &N2kCompiledField, decoded: &Map<String, Value>) -> bool {
    if field.is_reserved() {
        return true;
    }

    let Some(id) = field.get_id() else {
        return false;
    };
    if id.trim().is_empty() {
        return false;
    }

    if field.get_field_type() == N2kFieldType::StringFix {
        return decoded.contains_key(&format!("{id}Raw")) || decoded.contains_key(id);
    }

    decoded.contains_key(id)
}

/// Decode-side dispatch (payload bytes into the envelope).
pub(crate) fn pack_field(
    field: &N2kCompiledField,
    payload: &[u8],
    decoded: &mut Map<String, Value>,
) -> Result<(), CanError> {
    match field.get_field_type() {
        N2kFieldType::Number | N2kFieldType::Float => pack_numeric(field, payload, decoded),
        N2kFieldType::Lookup => pack_lookup(field, payload, decoded),
        N2kFieldType::StringFix => pack_string(field, payload, decoded),
        // RESERVED decodes to nothing; variable-width kinds never compile
        _ => Ok(()),
    }
}

/// Encode-side dispatch (envelope values into the payload).
pub(crate) fn unpack_field(
    field: &N2kCompiledField,
    payload: &mut [u8],
    decoded: &Map<String, Value>,
) -> Result<(), CanError> {
    match field.get_field_type() {
        N2kFieldType::Number | N2kFieldType::Float => unpack_numeric(field, payload, decoded),
        N2kFieldType::Lookup => unpack_lookup(field, payload, decoded),
        N2kFieldType::StringFix => unpack_string(field, payload, decoded),
        N2kFieldType::Reserved => {
            unpack_reserved(field, payload);
            Ok(())
        },
        _ => Ok(()),
    }
}

fn extract_field(field: &N2kCompiledField, payload: &[u8]) -> i64 {
    bitcodec::extract_bits(
        payload,
        field.get_start_byte(),
        field.get_start_bit(),
        field.get_bytes_to_read(),
        field.get_mask(),
        field.is_signed(),
        field.get_bit_length(),
    )
}

fn insert_field(field: &N2kCompiledField, payload: &mut [u8], raw_value: i64) {
    bitcodec::insert_bits(
        payload,
        field.get_start_byte(),
        field.get_start_bit(),
        field.get_bytes_to_read(),
        field.get_mask(),
        raw_value,
    );
}

fn pack_numeric(
    field: &N2kCompiledField,
    payload: &[u8],
    decoded: &mut Map<String, Value>,
) -> Result<(), CanError> {
    let Some(id) = field.get_id() else {
        return Ok(());
    };
    let raw = extract_field(field, payload);
    let value = raw as f64 * field.get_resolution() + field.get_offset();
    decoded.insert(id.to_string(), Value::from(value));
    Ok(())
}

fn unpack_numeric(
    field: &N2kCompiledField,
    payload: &mut [u8],
    decoded: &Map<String, Value>,
) -> Result<(), CanError> {
    let Some(id) = field.get_id() else {
        return Ok(());
    };
    let Some(entry) = decoded.get(id) else {
        return Ok(());
    };
    if entry.is_null() {
        return Ok(());
    }

    let Some(numeric_value) = entry.as_f64() else {
        return Err(CanError::new("n2k-field-number", format!("field {id} is not a number")));
    };

    let resolution = field.get_resolution();
    if resolution == 0.0 {
        return Err(CanError::state(
            "n2k-field-resolution",
            format!("resolution is zero for numeric field {id}"),
        ));
    }

    let unscaled = (numeric_value - field.get_offset()) / resolution;
    // nearest integer, ties away from zero
    let mut raw_value = unscaled.round() as i64;

    if field.is_signed() {
        raw_value = raw_value.clamp(field.get_raw_min(), field.get_raw_max());
    } else if raw_value < 0 {
        raw_value = 0;
    } else if (raw_value as u64) > field.get_mask() {
        raw_value = field.get_mask() as i64;
    }

    validate_raw_value(field, id, raw_value)?;
    insert_field(field, payload, raw_value);
    Ok(())
}

fn validate_raw_value(field: &N2kCompiledField, id: &str, raw_value: i64) -> Result<(), CanError> {
    if !field.is_signed() {
        if raw_value < 0 {
            return Err(CanError::new(
                "n2k-field-range",
                format!("unsigned field {id} cannot be negative"),
            ));
        }
        if (raw_value as u64) > field.get_mask() {
            return Err(CanError::new(
                "n2k-field-range",
                format!("field {id} out of range: {raw_value} max={}", field.get_mask()),
            ));
        }
        return Ok(());
    }

    let bit_length = field.get_bit_length();
    if bit_length > 0 && bit_length < 64 {
        let min = -(1i64 << (bit_length - 1));
        let max = (1i64 << (bit_length - 1)) - 1;
        if raw_value < min || raw_value > max {
            return Err(CanError::new(
                "n2k-field-range",
                format!("signed field {id} out of range: {raw_value} allowed={min}..{max}"),
            ));
        }
    }
    Ok(())
}

fn pack_lookup(
    field: &N2kCompiledField,
    payload: &[u8],
    decoded: &mut Map<String, Value>,
) -> Result<(), CanError> {
    let Some(id) = field.get_id() else {
        return Ok(());
    };
    let raw = extract_field(field, payload);
    decoded.insert(id.to_string(), Value::from((raw as u64) & field.get_mask()));
    Ok(())
}

fn unpack_lookup(
    field: &N2kCompiledField,
    payload: &mut [u8],
    decoded: &Map<String, Value>,
) -> Result<(), CanError> {
    let Some(id) = field.get_id() else {
        return Ok(());
    };
    let Some(entry) = decoded.get(id) else {
        return Ok(());
    };
    if entry.is_null() {
        return Ok(());
    }

    let Some(mut raw_value) = entry.as_i64().or_else(|| entry.as_f64().map(|value| value as i64))
    else {
        return Err(CanError::new("n2k-field-lookup", format!("field {id} is not an integer")));
    };

    // unsigned view: clamp into [0, mask]
    let bit_length = field.get_bit_length();
    if bit_length < 64 && raw_value > field.get_mask() as i64 {
        raw_value = field.get_mask() as i64;
    }
    if raw_value < 0 {
        raw_value = 0;
    }

    insert_field(field, payload, raw_value);
    Ok(())
}

fn string_region(field: &N2kCompiledField, payload_length: usize) -> (usize, usize) {
    let start = field.get_start_byte();
    let end_exclusive = payload_length.min(start + field.get_bytes_to_read());
    let safe_length = end_exclusive.saturating_sub(start);
    (start, safe_length)
}

fn require_byte_aligned(field: &N2kCompiledField) -> Result<(), CanError> {
    if field.get_start_bit() != 0 {
        return Err(CanError::unsupported(
            "n2k-string-align",
            format!(
                "STRING_FIX must be byte-aligned: {} startBit={}",
                field.get_id().unwrap_or(""),
                field.get_start_bit()
            ),
        ));
    }
    Ok(())
}

fn pack_string(
    field: &N2kCompiledField,
    payload: &[u8],
    decoded: &mut Map<String, Value>,
) -> Result<(), CanError> {
    require_byte_aligned(field)?;
    let Some(id) = field.get_id() else {
        return Ok(());
    };

    let (start, safe_length) = string_region(field, payload.len());
    if safe_length == 0 {
        decoded.insert(id.to_string(), Value::from(""));
        return Ok(());
    }

    // ISO-8859-1: every byte maps to the same code point
    let text: String =
        payload[start..start + safe_length].iter().map(|&byte| byte as char).collect();
    let trimmed = text.trim_end_matches(['\0', ' ']);
    decoded.insert(id.to_string(), Value::from(trimmed));
    Ok(())
}

fn unpack_string(
    field: &N2kCompiledField,
    payload: &mut [u8],
    decoded: &Map<String, Value>,
) -> Result<(), CanError> {
    require_byte_aligned(field)?;
    let Some(id) = field.get_id() else {
        return Ok(());
    };

    let (start, safe_length) = string_region(field, payload.len());
    if safe_length == 0 {
        return Ok(());
    }

    // deterministic padding: spaces, not NULs, not 0xFF
    payload[start..start + safe_length].fill(0x20);

    let Some(entry) = decoded.get(id) else {
        return Ok(());
    };
    if entry.is_null() {
        return Ok(());
    }
    let Some(text) = entry.as_str() else {
        return Err(CanError::new("n2k-field-string", format!("field {id} is not a string")));
    };
    if text.is_empty() {
        return Ok(());
    }

    let mut index = 0usize;
    for character in text.chars() {
        if index >= safe_length {
            break;
        }
        let code_point = character as u32;
        payload[start + index] = if code_point <= 0xFF { code_point as u8 } else { b'?' };
        index += 1;
    }
    Ok(())
}

fn unpack_reserved(field: &N2kCompiledField, payload: &mut [u8]) {
    let bit_length = field.get_bit_length();

    // fast path: whole bytes
    if field.get_start_bit() == 0 && bit_length & 7 == 0 {
        let start = field.get_start_byte();
        let length_bytes = (bit_length >> 3) as usize;
        let end_exclusive = payload.len().min(start + length_bytes);
        if end_exclusive > start {
            payload[start..end_exclusive].fill(0xFF);
        }
        return;
    }

    // slow path: fill bit-aligned regions in <= 63-bit chunks
    let mut bits_remaining = bit_length;
    let mut bit_offset = field.get_bit_offset();

    while bits_remaining > 0 {
        let chunk_bits = bits_remaining.min(63);
        let mask = (1u64 << chunk_bits) - 1;

        let chunk_start_byte = (bit_offset >> 3) as usize;
        let chunk_start_bit = bit_offset & 7;
        let bytes_to_write = ((chunk_start_bit + chunk_bits + 7) >> 3) as usize;

        bitcodec::insert_bits(payload, chunk_start_byte, chunk_start_bit, bytes_to_write, mask, -1);

        bit_offset += chunk_bits;
        bits_remaining -= chunk_bits;
    }
}
