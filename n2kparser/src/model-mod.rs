/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 *
 * Reference: https://canboat.github.io/canboat/canboat.html
 */

use serde::{Deserialize, Serialize};

/// Field kinds of the CANboat-style dialect. STRING_LAU and REPEAT_MARKER
/// never enter the compiled fast path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum N2kFieldType {
    Number,
    Float,
    Lookup,
    StringFix,
    StringLau,
    RepeatMarker,
    Reserved,
}

impl N2kFieldType {
    /// Case-insensitive match against the dialect spelling.
    #[must_use]
    pub fn from_dialect(text: &str) -> Option<N2kFieldType> {
        match text.trim().to_ascii_uppercase().as_str() {
            "NUMBER" => Some(N2kFieldType::Number),
            "FLOAT" => Some(N2kFieldType::Float),
            "LOOKUP" => Some(N2kFieldType::Lookup),
            "STRING_FIX" => Some(N2kFieldType::StringFix),
            "STRING_LAU" => Some(N2kFieldType::StringLau),
            "REPEAT_MARKER" => Some(N2kFieldType::RepeatMarker),
            "RESERVED" => Some(N2kFieldType::Reserved),
            _ => None,
        }
    }

    #[must_use]
    pub fn dialect_name(&self) -> &'static str {
        match self {
            N2kFieldType::Number => "NUMBER",
            N2kFieldType::Float => "FLOAT",
            N2kFieldType::Lookup => "LOOKUP",
            N2kFieldType::StringFix => "STRING_FIX",
            N2kFieldType::StringLau => "STRING_LAU",
            N2kFieldType::RepeatMarker => "REPEAT_MARKER",
            N2kFieldType::Reserved => "RESERVED",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum N2kMessageLengthType {
    Fixed,
    Variable,
}

/// One `<Field>` of the dialect, as parsed. Bit geometry is optional here;
/// fields without it are kept for introspection but never compiled.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct N2kFieldDefinition {
    pub order: i32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub bit_offset: Option<u32>,
    pub bit_length: Option<u32>,
    pub bit_start: Option<u32>,
    pub signed: bool,
    pub field_type: N2kFieldType,
    pub resolution: f64,
    pub offset: f64,
    pub range_min: Option<f64>,
    pub range_max: Option<f64>,
    pub unit: Option<String>,
    pub type_in_pdf: Option<String>,
}

impl Default for N2kFieldDefinition {
    fn default() -> N2kFieldDefinition {
        N2kFieldDefinition {
            order: 0,
            id: None,
            name: None,
            bit_offset: None,
            bit_length: None,
            bit_start: None,
            signed: false,
            field_type: N2kFieldType::Number,
            resolution: 1.0,
            offset: 0.0,
            range_min: None,
            range_max: None,
            unit: None,
            type_in_pdf: None,
        }
    }
}

/// One `<PGNInfo>` of the dialect, fields sorted by order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct N2kMessageDefinition {
    pub pgn: u32,
    pub id: Option<String>,
    pub description: Option<String>,
    pub priority: u8,
    pub pgn_type: Option<String>,
    pub complete: bool,
    pub length_type: N2kMessageLengthType,
    pub fixed_length_bytes: Option<usize>,
    pub fields: Vec<N2kFieldDefinition>,
}
