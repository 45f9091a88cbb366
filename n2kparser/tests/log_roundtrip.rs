/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 */

//! Replays captured single-frame payloads: decode, re-pack through the
//! framing layer, receive through the handler, and compare both envelopes.

use n2kparser::prelude::*;
use serde_json::Value;

const DIALECT_XML: &str = include_str!("../dialect/n2k-dialect-sample.xml");
const FRAME_LOG: &str = include_str!("./fixtures/n2k-sample-frames.csv");

struct LogRow {
    pgn: u32,
    priority: u8,
    source: u8,
    destination: u8,
    payload: Vec<u8>,
}

fn parse_log() -> Vec<LogRow> {
    let mut rows = Vec::new();
    for line in FRAME_LOG.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let columns: Vec<&str> = line.split(',').collect();
        assert_eq!(columns.len(), 5, "malformed log line: {line}");

        let hex = columns[4];
        assert_eq!(hex.len() % 2, 0, "odd hex payload: {line}");
        let payload = (0..hex.len())
            .step_by(2)
            .map(|index| u8::from_str_radix(&hex[index..index + 2], 16).unwrap())
            .collect();

        rows.push(LogRow {
            pgn: columns[0].parse().unwrap(),
            priority: columns[1].parse().unwrap(),
            source: columns[2].parse().unwrap(),
            destination: columns[3].parse().unwrap(),
            payload,
        });
    }
    rows
}

fn assert_field_matches(pgn: u32, key: &str, first: &Value, second: &Value) {
    match (first, second) {
        (Value::String(left), Value::String(right)) => {
            assert_eq!(left, right, "pgn:{pgn} field:{key}");
        },
        (Value::Number(_), Value::Number(_)) => {
            let left = first.as_f64().unwrap();
            let right = second.as_f64().unwrap();
            assert!((left - right).abs() < 1e-9, "pgn:{pgn} field:{key} {left} != {right}");
        },
        other => panic!("pgn:{pgn} field:{key} type mismatch {other:?}"),
    }
}

#[test]
fn captured_frames_survive_decode_pack_receive() {
    let registry = load_registry_from_str(DIALECT_XML).unwrap();
    let parser = N2kMessageParser::new(registry);
    let packer = N2kFramePacker::new(parser.clone());
    let handler = N2kFrameHandler::new(parser.clone());

    let rows = parse_log();
    assert!(!rows.is_empty());

    for (number, row) in rows.iter().enumerate() {
        let envelope = parser
            .decode_to_json(row.pgn, &row.payload)
            .unwrap()
            .unwrap_or_else(|| panic!("row {number}: pgn {} not decodable", row.pgn));

        let frames = packer
            .pack(row.pgn, row.priority, row.source, row.destination, &envelope)
            .unwrap();

        let mut received = None;
        for frame in &frames {
            received = handler.on_frame(
                frame.get_id(),
                frame.is_extended(),
                frame.get_len() as usize,
                &frame.get_data(),
            );
        }

        let known = match received {
            Some(N2kMessage::Known(known)) => known,
            other => panic!("row {number}: expected KnownMessage, got {other:?}"),
        };

        assert_eq!(known.get_can_id().get_pgn(), row.pgn);
        assert_eq!(known.get_can_id().get_source_address(), row.source);

        // every field decoded from the capture must come back unchanged;
        // re-encoding may add trailing fields the truncated capture lacked
        let first = envelope["decoded"].as_object().unwrap();
        let second = known.get_decoded()["decoded"].as_object().unwrap();
        for (key, value) in first {
            let returned = second
                .get(key)
                .unwrap_or_else(|| panic!("row {number}: field {key} lost in transit"));
            assert_field_matches(row.pgn, key, value, returned);
        }
    }
}
