/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 */

use once_cell::sync::OnceCell;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::compile::{N2kCompiledField, N2kCompiledMessage, N2kCompiledRegistry};
use crate::model::N2kFieldType;
use sockcan::prelude::CanError;

/// Lazily built, cached JSON schemas (draft 2020-12), one per compiled PGN.
/// The cache is published once and then read-only, so it shares freely.
pub struct N2kSchemaRegistry {
    registry: Arc<N2kCompiledRegistry>,
    schemas_by_pgn: OnceCell<HashMap<u32, Value>>,
}

impl N2kSchemaRegistry {
    #[must_use]
    pub fn new(registry: Arc<N2kCompiledRegistry>) -> N2kSchemaRegistry {
        N2kSchemaRegistry { registry, schemas_by_pgn: OnceCell::new() }
    }

    /// # Errors
    /// `InvalidArgument` for a PGN absent from the registry.
    pub fn get_schema(&self, pgn: u32) -> Result<&Value, CanError> {
        self.schemas()
            .get(&pgn)
            .ok_or_else(|| CanError::new("n2k-schema-pgn", format!("unknown PGN: {pgn}")))
    }

    /// Every schema, sorted by PGN.
    #[must_use]
    pub fn get_schemas(&self) -> Vec<&Value> {
        let schemas = self.schemas();
        let mut pgns: Vec<u32> = schemas.keys().copied().collect();
        pgns.sort_unstable();
        pgns.iter().filter_map(|pgn| schemas.get(pgn)).collect()
    }

    #[must_use]
    pub fn list_pgns(&self) -> Vec<u32> {
        self.registry.get_pgns()
    }

    fn schemas(&self) -> &HashMap<u32, Value> {
        self.schemas_by_pgn.get_or_init(|| {
            self.registry
                .get_messages()
                .values()
                .map(|message| (message.get_pgn(), build_schema(message)))
                .collect()
        })
    }
}

fn build_title(message: &N2kCompiledMessage) -> String {
    let mut title = format!("N2K PGN {}", message.get_pgn());
    if let Some(id) = message.get_id() {
        if !id.trim().is_empty() {
            title.push(' ');
            title.push_str(id);
        }
    }
    if let Some(description) = message.get_description() {
        if !description.trim().is_empty() {
            title.push(' ');
            title.push_str(description);
        }
    }
    title
}

fn build_field_description(field: &N2kCompiledField) -> Option<String> {
    let name = field.get_name().filter(|value| !value.trim().is_empty());
    let unit = field.get_unit().filter(|value| !value.trim().is_empty());
    match (name, unit) {
        (None, None) => None,
        (Some(name), None) => Some(name.to_string()),
        (None, Some(unit)) => Some(unit.to_string()),
        (Some(name), Some(unit)) => Some(format!("{name} ({unit})")),
    }
}

fn is_string_field(field: &N2kCompiledField) -> bool {
    matches!(field.get_field_type(), N2kFieldType::StringFix | N2kFieldType::StringLau)
}

// RangeMin/RangeMax in the dialect are physical ranges; they are only
// enforceable for plainly scaled numeric fields. LOOKUP-like selectors carry
// ranges that are not strict, so they are left out.
fn should_emit_range(field: &N2kCompiledField) -> bool {
    if is_string_field(field) || field.get_field_type() == N2kFieldType::Lookup {
        return false;
    }
    if field.get_range_min().is_none() && field.get_range_max().is_none() {
        return false;
    }
    field.get_resolution() > 0.0
}

fn build_field_schema(field: &N2kCompiledField) -> Value {
    let mut property = Map::new();

    let type_name = if is_string_field(field) { "string" } else { "number" };
    property.insert("type".to_string(), Value::from(type_name));

    if let Some(description) = build_field_description(field) {
        property.insert("description".to_string(), Value::from(description));
    }

    if should_emit_range(field) {
        if let Some(minimum) = field.get_range_min() {
            property.insert("minimum".to_string(), Value::from(minimum));
        }
        if let Some(maximum) = field.get_range_max() {
            property.insert("maximum".to_string(), Value::from(maximum));
        }
    }

    let numeric = matches!(field.get_field_type(), N2kFieldType::Number | N2kFieldType::Float);
    if numeric && field.get_resolution() > 0.0 {
        property.insert("multipleOf".to_string(), Value::from(field.get_resolution()));
    }

    property.insert("x-bitLength".to_string(), Value::from(field.get_bit_length()));
    property.insert("x-bitOffset".to_string(), Value::from(field.get_bit_offset()));
    property.insert("x-signed".to_string(), Value::from(field.is_signed()));
    property.insert("x-resolution".to_string(), Value::from(field.get_resolution()));
    property.insert("x-offset".to_string(), Value::from(field.get_offset()));
    if let Some(unit) = field.get_unit().filter(|value| !value.trim().is_empty()) {
        property.insert("x-unit".to_string(), Value::from(unit));
    }
    if let Some(type_in_pdf) = field.get_type_in_pdf().filter(|value| !value.trim().is_empty()) {
        property.insert("x-typeInPdf".to_string(), Value::from(type_in_pdf));
    }
    property.insert(
        "x-fieldType".to_string(),
        Value::from(field.get_field_type().dialect_name()),
    );

    Value::Object(property)
}

fn build_schema(message: &N2kCompiledMessage) -> Value {
    let mut decoded_properties = Map::new();

    for field in message.get_fields() {
        if field.is_reserved() {
            continue;
        }
        let Some(id) = field.get_id() else { continue };
        if id.trim().is_empty() {
            continue;
        }
        decoded_properties.insert(id.to_string(), build_field_schema(field));
    }

    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": build_title(message),
        "type": "object",
        "properties": {
            "pgn": { "type": "integer", "const": message.get_pgn() },
            "decoded": {
                "type": "object",
                "properties": Value::Object(decoded_properties),
                "additionalProperties": false
            }
        },
        "required": ["pgn", "decoded"],
        "additionalProperties": false
    })
}
