/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 */

use std::sync::Arc;

use canj1939::prelude::CanId;
use n2kparser::prelude::*;
use serde_json::{json, Value};
use sockcan::prelude::{CanErrorKind, CanFrame};

const DIALECT_XML: &str = include_str!("../dialect/n2k-dialect-sample.xml");

fn registry() -> Arc<N2kCompiledRegistry> {
    load_registry_from_str(DIALECT_XML).expect("sample dialect compiles")
}

fn parser() -> N2kMessageParser {
    N2kMessageParser::new(registry())
}

fn feed_frames(handler: &N2kFrameHandler, frames: &[CanFrame]) -> Option<N2kMessage> {
    let mut result = None;
    for (index, frame) in frames.iter().enumerate() {
        let outcome = handler.on_frame(
            frame.get_id(),
            frame.is_extended(),
            frame.get_len() as usize,
            &frame.get_data(),
        );
        if index + 1 < frames.len() {
            assert!(outcome.is_none(), "message completed early at frame {index}");
        } else {
            result = outcome;
        }
    }
    result
}

fn expect_known(message: Option<N2kMessage>) -> KnownMessage {
    match message {
        Some(N2kMessage::Known(known)) => known,
        other => panic!("expected KnownMessage, got {other:?}"),
    }
}

#[test]
fn single_frame_send_receive_round_trip() {
    let _ = env_logger::builder().is_test(true).try_init();
    let parser = parser();
    let packer = N2kFramePacker::new(parser.clone());
    let handler = N2kFrameHandler::new(parser);

    let envelope = json!({
        "pgn": 130_306,
        "decoded": {"sid": 7, "windSpeed": 12.25, "windAngle": 1.5708, "reference": 2}
    });

    let frames = packer.pack(130_306, 2, 0x23, 0xFF, &envelope).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].get_len(), 8);

    let known = expect_known(feed_frames(&handler, &frames));
    assert_eq!(known.get_can_id().get_pgn(), 130_306);
    assert_eq!(known.get_can_id().get_source_address(), 0x23);

    let decoded = &known.get_decoded()["decoded"];
    assert_eq!(decoded["sid"].as_f64(), Some(7.0));
    assert!((decoded["windSpeed"].as_f64().unwrap() - 12.25).abs() < 0.01);
    assert_eq!(decoded["reference"].as_i64(), Some(2));
}

#[test]
fn route_info_fragments_into_eleven_frames_and_reassembles() {
    let parser = parser();
    let packer = N2kFramePacker::new(parser.clone());
    let handler = N2kFrameHandler::new(parser.clone());

    let envelope = json!({
        "pgn": 129_285,
        "decoded": {
            "rps": 1,
            "nItems": 2,
            "databaseId": 7,
            "routeId": 3,
            "navigationDirection": 1,
            "supplementaryInfo": 0,
            "routeName": "Round the island"
        }
    });

    // 76 fixed-layout bytes: ceil((76-6)/7) + 1 frames
    let payload = parser.encode_from_json(129_285, &envelope).unwrap();
    assert_eq!(payload.len(), 76);

    let frames = packer.pack(129_285, 7, 0x42, 0xFF, &envelope).unwrap();
    assert_eq!(frames.len(), 11);

    let known = expect_known(feed_frames(&handler, &frames));
    assert_eq!(known.get_payload(), &payload[..]);

    let decoded = &known.get_decoded()["decoded"];
    assert_eq!(decoded["rps"].as_f64(), Some(1.0));
    assert_eq!(decoded["nItems"].as_f64(), Some(2.0));
    assert_eq!(decoded["routeName"].as_str(), Some("Round the island"));
    assert_eq!(decoded["navigationDirection"].as_i64(), Some(1));
}

#[test]
fn gnss_fast_packet_preserves_scaled_values() {
    let parser = parser();
    let packer = N2kFramePacker::new(parser.clone());
    let handler = N2kFrameHandler::new(parser);

    let envelope = json!({
        "pgn": 129_029,
        "decoded": {
            "sid": 4,
            "date": 19_358,
            "time": 43_200.5,
            "latitude": 47.6062,
            "longitude": -122.3321,
            "altitude": 17.5,
            "typeOfSystem": 1,
            "method": 2,
            "integrity": 1,
            "numberOfSvs": 11,
            "hdop": 0.8,
            "pdop": 1.5,
            "geoidalSeparation": -22.5,
            "referenceStations": 0
        }
    });

    let frames = packer.pack(129_029, 3, 0x10, 0xFF, &envelope).unwrap();
    // 43 bytes: frame 0 carries 6, then ceil(37/7) = 6 continuations
    assert_eq!(frames.len(), 7);

    let known = expect_known(feed_frames(&handler, &frames));
    let decoded = &known.get_decoded()["decoded"];

    assert!((decoded["latitude"].as_f64().unwrap() - 47.6062).abs() < 1e-9);
    assert!((decoded["longitude"].as_f64().unwrap() + 122.3321).abs() < 1e-9);
    assert!((decoded["altitude"].as_f64().unwrap() - 17.5).abs() < 1e-5);
    assert!((decoded["time"].as_f64().unwrap() - 43_200.5).abs() < 0.0001);
    assert_eq!(decoded["method"].as_i64(), Some(2));
    assert_eq!(decoded["numberOfSvs"].as_f64(), Some(11.0));
}

#[test]
fn product_information_spans_twenty_frames() {
    let parser = parser();
    let packer = N2kFramePacker::new(parser.clone());
    let handler = N2kFrameHandler::new(parser);

    let envelope = json!({
        "pgn": 126_996,
        "decoded": {
            "nmea2000Version": 21.0,
            "productCode": 9876,
            "modelId": "Masthead Unit",
            "softwareVersionCode": "1.0.7",
            "modelVersion": "C2",
            "modelSerialCode": "SN-1701",
            "certificationLevel": 2,
            "loadEquivalency": 1
        }
    });

    let frames = packer.pack(126_996, 6, 0x05, 0xFF, &envelope).unwrap();
    // 134 bytes: frame 0 carries 6, then ceil(128/7) = 19 continuations
    assert_eq!(frames.len(), 20);

    let known = expect_known(feed_frames(&handler, &frames));
    let decoded = &known.get_decoded()["decoded"];
    assert_eq!(decoded["modelId"].as_str(), Some("Masthead Unit"));
    assert_eq!(decoded["productCode"].as_f64(), Some(9876.0));
}

#[test]
fn fast_packet_fragment_reassemble_holds_for_all_lengths() {
    // direct assembler exercise across every representable payload length
    let can_id = CanId::parse(CanId::build(0x1F110, 6, 0x55, 0xFF).unwrap());
    let mut assembler = FastPacketAssembler::new();

    for total_length in 1usize..=223 {
        let payload: Vec<u8> = (0..total_length).map(|index| (index % 251) as u8).collect();
        let sequence_id = (total_length % 8) as u8;

        let mut frame0 = vec![0u8; 8];
        frame0[0] = (sequence_id & 0x07) << 5;
        frame0[1] = total_length as u8;
        let first_chunk = total_length.min(6);
        frame0[2..2 + first_chunk].copy_from_slice(&payload[..first_chunk]);

        let mut frames = vec![frame0];
        let mut index = first_chunk;
        let mut frame_index = 1u8;
        while index < total_length {
            let chunk = (total_length - index).min(7);
            let mut frame = vec![0u8; 8];
            frame[0] = ((sequence_id & 0x07) << 5) | (frame_index & 0x1F);
            frame[1..1 + chunk].copy_from_slice(&payload[index..index + chunk]);
            frames.push(frame);
            index += chunk;
            frame_index += 1;
        }

        assert!(frames.len() <= 32, "length {total_length}");

        let mut reassembled = None;
        for (number, frame) in frames.iter().enumerate() {
            let outcome =
                assembler.accept(&can_id, sequence_id, frame[0] & 0x1F, frame);
            if number + 1 < frames.len() {
                assert!(outcome.is_none(), "length {total_length} frame {number}");
            } else {
                reassembled = outcome;
            }
        }
        assert_eq!(reassembled.as_deref(), Some(&payload[..]), "length {total_length}");
    }
}

#[test]
fn oversized_payload_fails_with_illegal_state() {
    // a variable message wide enough to need more than 32 frames
    let wide = N2kMessageDefinition {
        pgn: 130_817,
        id: Some("wideMessage".to_string()),
        description: None,
        priority: 6,
        pgn_type: None,
        complete: true,
        length_type: N2kMessageLengthType::Variable,
        fixed_length_bytes: None,
        fields: vec![N2kFieldDefinition {
            id: Some("blob".to_string()),
            bit_offset: Some(0),
            bit_length: Some(1792),
            field_type: N2kFieldType::StringFix,
            ..N2kFieldDefinition::default()
        }],
    };
    let registry = Arc::new(n2kparser::prelude::compile(&[wide]).unwrap());
    let packer = N2kFramePacker::new(N2kMessageParser::new(registry));

    let error = packer
        .pack(130_817, 6, 0x01, 0xFF, &json!({"decoded": {"blob": "x"}}))
        .unwrap_err();
    assert_eq!(error.get_kind(), CanErrorKind::IllegalState);
}

#[test]
fn dropped_start_frame_loses_the_message_until_restart() {
    let parser = parser();
    let packer = N2kFramePacker::new(parser.clone());
    let handler = N2kFrameHandler::new(parser);

    let envelope = json!({
        "pgn": 126_996,
        "decoded": {"productCode": 1, "modelId": "M", "softwareVersionCode": "1",
                     "modelVersion": "A", "modelSerialCode": "S",
                     "nmea2000Version": 21.0, "certificationLevel": 0, "loadEquivalency": 1}
    });

    let frames = packer.pack(126_996, 6, 0x05, 0xFF, &envelope).unwrap();

    // first frame lost: the rest of the sequence produces plain frames that
    // fail to decode or nothing, never a completed fast packet
    let mut completed = 0;
    for frame in frames.iter().skip(1) {
        if let Some(N2kMessage::Known(known)) = handler.on_frame(
            frame.get_id(),
            frame.is_extended(),
            frame.get_len() as usize,
            &frame.get_data(),
        ) {
            // continuation misread as a single frame decodes only fields that
            // fit in 8 bytes; a full product-information payload cannot appear
            assert!(known.get_payload().len() <= 8);
            completed += 1;
        }
    }
    assert!(completed <= frames.len() - 1);

    // the retransmitted message goes through untouched
    let retry = packer.pack(126_996, 6, 0x05, 0xFF, &envelope).unwrap();
    let known = expect_known(feed_frames(&handler, &retry));
    assert_eq!(known.get_decoded()["decoded"]["modelId"].as_str(), Some("M"));
}

#[test]
fn handler_reports_decode_context_for_unknown_pgn() {
    let handler = N2kFrameHandler::new(parser());
    let identifier = CanId::build(0x1F777, 6, 0x11, 0xFF).unwrap();
    let message = handler.on_frame(identifier, true, 3, &[1, 2, 3]);
    match message {
        Some(N2kMessage::Unknown(unknown)) => {
            assert_eq!(unknown.get_reason(), UnknownReason::UnsupportedPgn);
            assert_eq!(unknown.get_raw_payload(), &[1, 2, 3]);
            assert_eq!(unknown.get_can_id().map(CanId::get_pgn), Some(0x1F777));
        },
        other => panic!("expected UnknownMessage, got {other:?}"),
    }
}

#[test]
fn decoded_envelope_shape_matches_contract() {
    let handler = N2kFrameHandler::new(parser());
    let identifier = CanId::build(127_250, 2, 0x09, 0xFF).unwrap();
    let known = expect_known(handler.on_frame(
        identifier,
        true,
        8,
        &[0x01, 0x10, 0x27, 0x00, 0x00, 0x00, 0x00, 0xFF],
    ));

    let envelope = known.get_decoded();
    assert!(envelope.get("pgn").is_some());
    assert!(envelope.get("decoded").map(Value::is_object).unwrap_or(false));
    assert_eq!(envelope["pgn"].as_u64(), Some(127_250));
}
