/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 *
 * Reference: https://canboat.github.io/canboat/canboat.html
 */

use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs;
use std::path::Path;

use crate::model::{N2kFieldDefinition, N2kFieldType, N2kMessageDefinition, N2kMessageLengthType};
use sockcan::prelude::CanError;

/// Reads a dialect file into sorted message definitions.
///
/// # Errors
/// `IoError` when the file is unreadable, `InvalidArgument` on malformed XML
/// or dialect content.
pub fn parse_from_file(path: &Path) -> Result<Vec<N2kMessageDefinition>, CanError> {
    let xml = fs::read_to_string(path)
        .map_err(|error| CanError::io("n2k-dialect-file", error.to_string()))?;
    parse_from_str(&xml)
}

/// Parses a dialect document. `<PGNInfo>` elements are collected wherever
/// they appear under the root; messages come back sorted by PGN, fields by
/// order.
///
/// # Errors
/// `InvalidArgument` on malformed XML, a missing/invalid `<PGN>`, or an
/// unparseable numeric/length element.
pub fn parse_from_str(xml: &str) -> Result<Vec<N2kMessageDefinition>, CanError> {
    let mut reader = Reader::from_str(xml);

    let mut definitions: Vec<N2kMessageDefinition> = Vec::new();
    let mut message: Option<MessageScratch> = None;
    let mut field: Option<FieldScratch> = None;
    let mut in_fields = false;
    let mut current_tag: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Err(error) => {
                return Err(CanError::new("n2k-dialect-xml", error.to_string()));
            },
            Ok(Event::Eof) => break,
            Ok(Event::Start(element)) => {
                let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                if name == "PGNInfo" {
                    message = Some(MessageScratch::default());
                    field = None;
                    in_fields = false;
                    current_tag = None;
                } else if message.is_some() {
                    if name == "Fields" && field.is_none() {
                        in_fields = true;
                    } else if name == "Field" && in_fields {
                        field = Some(FieldScratch::default());
                    } else {
                        current_tag = Some(name);
                        text.clear();
                    }
                }
            },
            Ok(Event::Text(element)) => {
                if current_tag.is_some() {
                    let value = element
                        .unescape()
                        .map_err(|error| CanError::new("n2k-dialect-xml", error.to_string()))?;
                    text.push_str(&value);
                }
            },
            Ok(Event::CData(element)) => {
                if current_tag.is_some() {
                    text.push_str(&String::from_utf8_lossy(element.as_ref()));
                }
            },
            Ok(Event::End(element)) => {
                let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                if name == "Field" {
                    if let (Some(scratch), Some(msg)) = (field.take(), message.as_mut()) {
                        msg.fields.push(finish_field(scratch)?);
                    }
                    current_tag = None;
                } else if name == "Fields" {
                    in_fields = false;
                } else if name == "PGNInfo" {
                    if let Some(scratch) = message.take() {
                        definitions.push(finish_message(scratch)?);
                    }
                } else if current_tag.as_deref() == Some(name.as_str()) {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        let value = trimmed.to_string();
                        if let Some(scratch) = field.as_mut() {
                            scratch.set(&name, value);
                        } else if let Some(scratch) = message.as_mut() {
                            scratch.set(&name, value);
                        }
                    }
                    current_tag = None;
                    text.clear();
                }
            },
            Ok(_) => {},
        }
    }

    definitions.sort_by_key(|definition| definition.pgn);
    Ok(definitions)
}

#[derive(Default)]
struct MessageScratch {
    pgn: Option<String>,
    id: Option<String>,
    description: Option<String>,
    priority: Option<String>,
    pgn_type: Option<String>,
    complete: Option<String>,
    length: Option<String>,
    fields: Vec<N2kFieldDefinition>,
}

impl MessageScratch {
    fn set(&mut self, tag: &str, value: String) {
        match tag {
            "PGN" => self.pgn = Some(value),
            "Id" => self.id = Some(value),
            "Description" => self.description = Some(value),
            "Priority" => self.priority = Some(value),
            "Type" => self.pgn_type = Some(value),
            "Complete" => self.complete = Some(value),
            "Length" => self.length = Some(value),
            _ => {},
        }
    }
}

#[derive(Default)]
struct FieldScratch {
    order: Option<String>,
    id: Option<String>,
    name: Option<String>,
    type_in_pdf: Option<String>,
    field_type: Option<String>,
    bit_offset: Option<String>,
    bit_length: Option<String>,
    bit_start: Option<String>,
    signed: Option<String>,
    resolution: Option<String>,
    offset: Option<String>,
    range_min: Option<String>,
    range_max: Option<String>,
    unit: Option<String>,
}

impl FieldScratch {
    fn set(&mut self, tag: &str, value: String) {
        match tag {
            "Order" => self.order = Some(value),
            "Id" => self.id = Some(value),
            "Name" => self.name = Some(value),
            "TypeInPdf" => self.type_in_pdf = Some(value),
            "FieldType" => self.field_type = Some(value),
            "BitOffset" => self.bit_offset = Some(value),
            "BitLength" => self.bit_length = Some(value),
            "BitStart" => self.bit_start = Some(value),
            "Signed" => self.signed = Some(value),
            "Resolution" => self.resolution = Some(value),
            "Offset" => self.offset = Some(value),
            "RangeMin" => self.range_min = Some(value),
            "RangeMax" => self.range_max = Some(value),
            "Unit" => self.unit = Some(value),
            _ => {},
        }
    }
}

fn parse_i32(tag: &str, text: &str) -> Result<i32, CanError> {
    text.trim()
        .parse::<i32>()
        .map_err(|_error| CanError::new("n2k-dialect-value", format!("invalid <{tag}> '{text}'")))
}

fn parse_u32(tag: &str, text: &str) -> Result<u32, CanError> {
    text.trim()
        .parse::<u32>()
        .map_err(|_error| CanError::new("n2k-dialect-value", format!("invalid <{tag}> '{text}'")))
}

fn parse_f64(tag: &str, text: &str) -> Result<f64, CanError> {
    text.trim()
        .parse::<f64>()
        .map_err(|_error| CanError::new("n2k-dialect-value", format!("invalid <{tag}> '{text}'")))
}

fn parse_bool(text: Option<&str>) -> bool {
    text.is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
}

fn normalize_field_id(id: Option<String>) -> Option<String> {
    let id = id?;
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut chars = trimmed.chars();
    let first = chars.next()?;
    if first.is_uppercase() {
        Some(first.to_lowercase().collect::<String>() + chars.as_str())
    } else {
        Some(trimmed.to_string())
    }
}

fn resolve_field_type(
    field_type: Option<&str>,
    type_in_pdf: Option<&str>,
    name: Option<&str>,
) -> N2kFieldType {
    if let Some(text) = field_type {
        if let Some(resolved) = N2kFieldType::from_dialect(text) {
            return resolved;
        }
    }

    let looks_like_repeat_marker = type_in_pdf
        .is_some_and(|value| value.eq_ignore_ascii_case("Undefined"))
        || name.is_some_and(|value| value.to_lowercase().contains("repeat"));

    if looks_like_repeat_marker {
        N2kFieldType::RepeatMarker
    } else {
        N2kFieldType::Number
    }
}

fn finish_field(scratch: FieldScratch) -> Result<N2kFieldDefinition, CanError> {
    let order = match scratch.order.as_deref() {
        None => 0,
        Some(text) => parse_i32("Order", text)?,
    };

    let field_type = resolve_field_type(
        scratch.field_type.as_deref(),
        scratch.type_in_pdf.as_deref(),
        scratch.name.as_deref(),
    );

    let bit_offset = match scratch.bit_offset.as_deref() {
        None => None,
        Some(text) => Some(parse_u32("BitOffset", text)?),
    };
    let bit_length = match scratch.bit_length.as_deref() {
        None => None,
        Some(text) => Some(parse_u32("BitLength", text)?),
    };
    let bit_start = match scratch.bit_start.as_deref() {
        None => None,
        Some(text) => Some(parse_u32("BitStart", text)?),
    };

    let resolution = match scratch.resolution.as_deref() {
        None => 1.0,
        Some(text) => parse_f64("Resolution", text)?,
    };
    let offset = match scratch.offset.as_deref() {
        None => 0.0,
        Some(text) => parse_f64("Offset", text)?,
    };
    let range_min = match scratch.range_min.as_deref() {
        None => None,
        Some(text) => Some(parse_f64("RangeMin", text)?),
    };
    let range_max = match scratch.range_max.as_deref() {
        None => None,
        Some(text) => Some(parse_f64("RangeMax", text)?),
    };

    Ok(N2kFieldDefinition {
        order,
        id: normalize_field_id(scratch.id),
        name: scratch.name,
        bit_offset,
        bit_length,
        bit_start,
        signed: parse_bool(scratch.signed.as_deref()),
        field_type,
        resolution,
        offset,
        range_min,
        range_max,
        unit: scratch.unit,
        type_in_pdf: scratch.type_in_pdf,
    })
}

fn finish_message(mut scratch: MessageScratch) -> Result<N2kMessageDefinition, CanError> {
    let Some(pgn_text) = scratch.pgn.as_deref() else {
        return Err(CanError::new("n2k-dialect-pgn", "missing <PGN> in PGNInfo"));
    };
    let pgn = parse_u32("PGN", pgn_text)?;

    let priority = match scratch.priority.as_deref() {
        None => 0,
        Some(text) => parse_i32("Priority", text)?.clamp(0, 255) as u8,
    };

    let (length_type, fixed_length_bytes) = match scratch.length.as_deref() {
        None => (N2kMessageLengthType::Variable, None),
        Some(text) if text.trim().eq_ignore_ascii_case("variable") => {
            (N2kMessageLengthType::Variable, None)
        },
        Some(text) => match text.trim().parse::<usize>() {
            Ok(length_bytes) => (N2kMessageLengthType::Fixed, Some(length_bytes)),
            Err(_error) => {
                return Err(CanError::new(
                    "n2k-dialect-length",
                    format!("invalid <Length> '{text}' for PGN {pgn}"),
                ));
            },
        },
    };

    scratch.fields.sort_by_key(|field| field.order);

    Ok(N2kMessageDefinition {
        pgn,
        id: scratch.id,
        description: scratch.description,
        priority,
        pgn_type: scratch.pgn_type,
        complete: parse_bool(scratch.complete.as_deref()),
        length_type,
        fixed_length_bytes,
        fields: scratch.fields,
    })
}
