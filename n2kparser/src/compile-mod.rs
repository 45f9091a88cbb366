/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 */

use std::collections::{HashMap, HashSet};

use crate::model::{N2kFieldDefinition, N2kFieldType, N2kMessageDefinition, N2kMessageLengthType};
use sockcan::prelude::CanError;

/// A dialect field lowered to per-access constants. Immutable once built.
#[derive(Clone, Debug)]
pub struct N2kCompiledField {
    id: Option<String>,
    name: Option<String>,
    bit_offset: u32,
    bit_length: u32,
    start_byte: usize,
    start_bit: u32,
    bytes_to_read: usize,
    mask: u64,
    signed: bool,
    resolution: f64,
    offset: f64,
    range_min: Option<f64>,
    range_max: Option<f64>,
    unit: Option<String>,
    type_in_pdf: Option<String>,
    field_type: N2kFieldType,
    reserved: bool,
    raw_min: i64,
    raw_max: i64,
}

impl N2kCompiledField {
    #[must_use]
    pub fn get_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    #[must_use]
    pub fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn get_bit_offset(&self) -> u32 {
        self.bit_offset
    }

    #[must_use]
    pub fn get_bit_length(&self) -> u32 {
        self.bit_length
    }

    /// First bit past the field, relative to the payload start.
    #[must_use]
    pub fn end_bit(&self) -> usize {
        (self.bit_offset + self.bit_length) as usize
    }

    #[must_use]
    pub fn get_start_byte(&self) -> usize {
        self.start_byte
    }

    #[must_use]
    pub fn get_start_bit(&self) -> u32 {
        self.start_bit
    }

    #[must_use]
    pub fn get_bytes_to_read(&self) -> usize {
        self.bytes_to_read
    }

    #[must_use]
    pub fn get_mask(&self) -> u64 {
        self.mask
    }

    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.signed
    }

    #[must_use]
    pub fn get_resolution(&self) -> f64 {
        self.resolution
    }

    #[must_use]
    pub fn get_offset(&self) -> f64 {
        self.offset
    }

    #[must_use]
    pub fn get_range_min(&self) -> Option<f64> {
        self.range_min
    }

    #[must_use]
    pub fn get_range_max(&self) -> Option<f64> {
        self.range_max
    }

    #[must_use]
    pub fn get_unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    #[must_use]
    pub fn get_type_in_pdf(&self) -> Option<&str> {
        self.type_in_pdf.as_deref()
    }

    #[must_use]
    pub fn get_field_type(&self) -> N2kFieldType {
        self.field_type
    }

    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.reserved
    }

    #[must_use]
    pub fn get_raw_min(&self) -> i64 {
        self.raw_min
    }

    #[must_use]
    pub fn get_raw_max(&self) -> i64 {
        self.raw_max
    }
}

/// A compiled PGN: the fast-path field list plus the original definitions for
/// introspection.
#[derive(Clone, Debug)]
pub struct N2kCompiledMessage {
    pgn: u32,
    id: Option<String>,
    description: Option<String>,
    length_type: N2kMessageLengthType,
    fixed_length_bytes: Option<usize>,
    minimum_length_bytes: usize,
    fields: Vec<N2kCompiledField>,
    definitions: Vec<N2kFieldDefinition>,
}

impl N2kCompiledMessage {
    #[must_use]
    pub fn get_pgn(&self) -> u32 {
        self.pgn
    }

    #[must_use]
    pub fn get_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    #[must_use]
    pub fn get_description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn get_length_type(&self) -> N2kMessageLengthType {
        self.length_type
    }

    #[must_use]
    pub fn get_fixed_length_bytes(&self) -> Option<usize> {
        self.fixed_length_bytes
    }

    #[must_use]
    pub fn get_minimum_length_bytes(&self) -> usize {
        self.minimum_length_bytes
    }

    #[must_use]
    pub fn get_fields(&self) -> &[N2kCompiledField] {
        &self.fields
    }

    #[must_use]
    pub fn get_definitions(&self) -> &[N2kFieldDefinition] {
        &self.definitions
    }
}

/// Immutable PGN registry, freely shareable across threads once built.
#[derive(Debug, Default)]
pub struct N2kCompiledRegistry {
    messages_by_pgn: HashMap<u32, N2kCompiledMessage>,
}

impl N2kCompiledRegistry {
    #[must_use]
    pub fn get_message(&self, pgn: u32) -> Option<&N2kCompiledMessage> {
        self.messages_by_pgn.get(&pgn)
    }

    #[must_use]
    pub fn contains_pgn(&self, pgn: u32) -> bool {
        self.messages_by_pgn.contains_key(&pgn)
    }

    #[must_use]
    pub fn get_pgns(&self) -> Vec<u32> {
        let mut pgns: Vec<u32> = self.messages_by_pgn.keys().copied().collect();
        pgns.sort_unstable();
        pgns
    }

    #[must_use]
    pub fn get_messages(&self) -> &HashMap<u32, N2kCompiledMessage> {
        &self.messages_by_pgn
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages_by_pgn.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages_by_pgn.is_empty()
    }
}

/// Lowers parsed message definitions into the immutable registry.
///
/// # Errors
/// `InvalidArgument` when a FIXED message misses `fixedLengthBytes` or
/// declares fewer bytes than its fields occupy.
pub fn compile(definitions: &[N2kMessageDefinition]) -> Result<N2kCompiledRegistry, CanError> {
    let mut messages_by_pgn = HashMap::with_capacity(definitions.len());

    for definition in definitions {
        let compiled = compile_message(definition)?;
        messages_by_pgn.insert(compiled.get_pgn(), compiled);
    }

    Ok(N2kCompiledRegistry { messages_by_pgn })
}

fn is_compile_time_fixed(field: &N2kFieldDefinition) -> bool {
    field.bit_offset.is_some()
        && field.bit_length.is_some()
        && field.field_type != N2kFieldType::StringLau
        && field.field_type != N2kFieldType::RepeatMarker
}

// over every compile-time fixed field, before id dedup, so the declared
// geometry wins even when duplicate ids are later dropped
fn compute_minimum_length_bytes(definition: &N2kMessageDefinition) -> usize {
    let mut max_bit_exclusive = 0usize;

    for field in &definition.fields {
        if !is_compile_time_fixed(field) {
            continue;
        }
        let end_bit = (field.bit_offset.unwrap_or(0) + field.bit_length.unwrap_or(0)) as usize;
        if end_bit > max_bit_exclusive {
            max_bit_exclusive = end_bit;
        }
    }

    (max_bit_exclusive + 7) >> 3
}

fn compile_field(field: &N2kFieldDefinition, bit_offset: u32, bit_length: u32) -> N2kCompiledField {
    let start_byte = (bit_offset >> 3) as usize;
    let start_bit = bit_offset & 7;
    let bytes_to_read = ((start_bit + bit_length + 7) >> 3) as usize;

    let mask = match bit_length {
        64 => u64::MAX,
        1..=63 => (1u64 << bit_length) - 1,
        _ => 0,
    };

    let (raw_min, raw_max) = if field.signed {
        match bit_length {
            0 => (0, 0),
            1..=63 => (-(1i64 << (bit_length - 1)), (1i64 << (bit_length - 1)) - 1),
            _ => (i64::MIN, i64::MAX),
        }
    } else {
        (0, mask as i64)
    };

    N2kCompiledField {
        id: field.id.clone(),
        name: field.name.clone(),
        bit_offset,
        bit_length,
        start_byte,
        start_bit,
        bytes_to_read,
        mask,
        signed: field.signed,
        resolution: field.resolution,
        offset: field.offset,
        range_min: field.range_min,
        range_max: field.range_max,
        unit: field.unit.clone(),
        type_in_pdf: field.type_in_pdf.clone(),
        field_type: field.field_type,
        reserved: field.field_type == N2kFieldType::Reserved,
        raw_min,
        raw_max,
    }
}

fn compile_message(definition: &N2kMessageDefinition) -> Result<N2kCompiledMessage, CanError> {
    let mut compiled_fields = Vec::new();
    let mut seen_ids = HashSet::new();

    for field in &definition.fields {
        if !is_compile_time_fixed(field) {
            continue;
        }

        let reserved = field.field_type == N2kFieldType::Reserved;
        if !reserved {
            let Some(id) = field.id.as_deref() else { continue };
            if id.trim().is_empty() {
                continue;
            }
            // first occurrence wins, duplicates are dropped
            if !seen_ids.insert(id.to_string()) {
                continue;
            }
        }

        let bit_offset = field.bit_offset.unwrap_or(0);
        let bit_length = field.bit_length.unwrap_or(0);
        compiled_fields.push(compile_field(field, bit_offset, bit_length));
    }

    let minimum_length_bytes = compute_minimum_length_bytes(definition);

    if definition.length_type == N2kMessageLengthType::Fixed {
        let Some(fixed_length_bytes) = definition.fixed_length_bytes else {
            return Err(CanError::new(
                "n2k-compile-length",
                format!("FIXED lengthType but fixedLengthBytes is missing for PGN {}", definition.pgn),
            ));
        };
        if fixed_length_bytes < minimum_length_bytes {
            return Err(CanError::new(
                "n2k-compile-length",
                format!(
                    "declared lengthBytes {fixed_length_bytes} is smaller than minimum {minimum_length_bytes} for PGN {}",
                    definition.pgn
                ),
            ));
        }
    }

    Ok(N2kCompiledMessage {
        pgn: definition.pgn,
        id: definition.id.clone(),
        description: definition.description.clone(),
        length_type: definition.length_type,
        fixed_length_bytes: definition.fixed_length_bytes,
        minimum_length_bytes,
        fields: compiled_fields,
        definitions: definition.fields.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(id: &str, bit_offset: u32, bit_length: u32) -> N2kFieldDefinition {
        N2kFieldDefinition {
            id: if id.is_empty() { None } else { Some(id.to_string()) },
            bit_offset: Some(bit_offset),
            bit_length: Some(bit_length),
            ..N2kFieldDefinition::default()
        }
    }

    fn message(
        pgn: u32,
        length_type: N2kMessageLengthType,
        fixed_length_bytes: Option<usize>,
        fields: Vec<N2kFieldDefinition>,
    ) -> N2kMessageDefinition {
        N2kMessageDefinition {
            pgn,
            id: Some(format!("pgn{pgn}")),
            description: None,
            priority: 6,
            pgn_type: None,
            complete: true,
            length_type,
            fixed_length_bytes,
            fields,
        }
    }

    #[test]
    fn derives_field_constants() {
        let definition = message(
            60928,
            N2kMessageLengthType::Fixed,
            Some(8),
            vec![field("uniqueNumber", 3, 21)],
        );
        let registry = compile(&[definition]).unwrap();
        let compiled = registry.get_message(60928).unwrap();
        let field = &compiled.get_fields()[0];

        assert_eq!(field.get_start_byte(), 0);
        assert_eq!(field.get_start_bit(), 3);
        assert_eq!(field.get_bytes_to_read(), 3);
        assert_eq!(field.get_mask(), (1u64 << 21) - 1);
        assert_eq!(field.get_raw_min(), 0);
        assert_eq!(field.get_raw_max(), ((1u64 << 21) - 1) as i64);
        assert_eq!(compiled.get_minimum_length_bytes(), 3);
    }

    #[test]
    fn signed_fields_get_two_complement_bounds() {
        let definition = message(
            127245,
            N2kMessageLengthType::Fixed,
            Some(8),
            vec![N2kFieldDefinition { signed: true, ..field("angleOrder", 16, 16) }],
        );
        let registry = compile(&[definition]).unwrap();
        let field = &registry.get_message(127245).unwrap().get_fields()[0];
        assert_eq!(field.get_raw_min(), -32768);
        assert_eq!(field.get_raw_max(), 32767);
    }

    #[test]
    fn drops_blank_and_duplicate_ids() {
        let definition = message(
            130_000,
            N2kMessageLengthType::Fixed,
            Some(4),
            vec![
                field("value", 0, 8),
                field("value", 8, 8),
                field("", 16, 8),
                N2kFieldDefinition {
                    field_type: N2kFieldType::Reserved,
                    ..field("", 24, 8)
                },
            ],
        );
        let registry = compile(&[definition]).unwrap();
        let compiled = registry.get_message(130_000).unwrap();

        // first `value` wins, blank non-reserved dropped, reserved kept
        assert_eq!(compiled.get_fields().len(), 2);
        assert_eq!(compiled.get_fields()[0].get_bit_offset(), 0);
        assert!(compiled.get_fields()[1].is_reserved());
        // dropped fields still count toward the minimum length
        assert_eq!(compiled.get_minimum_length_bytes(), 4);
    }

    #[test]
    fn skips_variable_width_field_types() {
        let definition = message(
            129_285,
            N2kMessageLengthType::Variable,
            None,
            vec![
                field("routeId", 0, 16),
                N2kFieldDefinition {
                    field_type: N2kFieldType::StringLau,
                    ..field("wpName", 16, 16)
                },
                N2kFieldDefinition {
                    field_type: N2kFieldType::RepeatMarker,
                    ..field("repeat", 32, 8)
                },
                N2kFieldDefinition { bit_offset: None, ..field("tail", 0, 8) },
            ],
        );
        let registry = compile(&[definition]).unwrap();
        let compiled = registry.get_message(129_285).unwrap();
        assert_eq!(compiled.get_fields().len(), 1);
        assert_eq!(compiled.get_definitions().len(), 4);
        assert_eq!(compiled.get_minimum_length_bytes(), 2);
    }

    #[test]
    fn fixed_message_must_declare_enough_bytes() {
        let short = message(
            130_001,
            N2kMessageLengthType::Fixed,
            Some(1),
            vec![field("value", 0, 16)],
        );
        assert!(compile(&[short]).is_err());

        let missing =
            message(130_002, N2kMessageLengthType::Fixed, None, vec![field("value", 0, 16)]);
        assert!(compile(&[missing]).is_err());
    }

    #[test]
    fn no_field_ends_beyond_minimum_length() {
        let definition = message(
            130_003,
            N2kMessageLengthType::Fixed,
            Some(8),
            vec![field("a", 0, 13), field("b", 13, 3), field("c", 16, 32)],
        );
        let registry = compile(&[definition]).unwrap();
        let compiled = registry.get_message(130_003).unwrap();
        let limit = compiled.get_minimum_length_bytes() * 8;
        for field in compiled.get_fields() {
            assert!(field.end_bit() <= limit);
        }
    }
}
