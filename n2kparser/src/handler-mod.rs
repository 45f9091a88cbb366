/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 */

use serde_json::Value;
use std::sync::{Mutex, PoisonError};

use crate::codec::N2kMessageParser;
use crate::fastpacket::FastPacketAssembler;
use crate::model::N2kMessageLengthType;
use canj1939::prelude::CanId;

const MAX_N2K_FRAME_LEN: usize = 8;
const FLAG_BITS: u32 = 0xE000_0000;

/// Why a received frame did not become a decoded message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnknownReason {
    NotExtendedFrame,
    InvalidIdentifier,
    InvalidFrame,
    UnsupportedPgn,
    DecodeFailed,
}

/// A fully decoded message with its framing context.
#[derive(Clone, Debug)]
pub struct KnownMessage {
    can_id: CanId,
    can_identifier: u32,
    payload: Vec<u8>,
    decoded: Value,
}

impl KnownMessage {
    #[must_use]
    pub fn get_can_id(&self) -> &CanId {
        &self.can_id
    }

    #[must_use]
    pub fn get_can_identifier(&self) -> u32 {
        self.can_identifier
    }

    #[must_use]
    pub fn get_payload(&self) -> &[u8] {
        &self.payload
    }

    /// The `{pgn, decoded}` envelope.
    #[must_use]
    pub fn get_decoded(&self) -> &Value {
        &self.decoded
    }
}

/// A frame (or reassembled payload) that could not be decoded, kept with
/// enough context for diagnostics.
#[derive(Clone, Debug)]
pub struct UnknownMessage {
    reason: UnknownReason,
    can_id: Option<CanId>,
    can_identifier: u32,
    data_length_code: usize,
    raw_payload: Vec<u8>,
    detail: String,
}

impl UnknownMessage {
    #[must_use]
    pub fn get_reason(&self) -> UnknownReason {
        self.reason
    }

    #[must_use]
    pub fn get_can_id(&self) -> Option<&CanId> {
        self.can_id.as_ref()
    }

    #[must_use]
    pub fn get_can_identifier(&self) -> u32 {
        self.can_identifier
    }

    #[must_use]
    pub fn get_data_length_code(&self) -> usize {
        self.data_length_code
    }

    #[must_use]
    pub fn get_raw_payload(&self) -> &[u8] {
        &self.raw_payload
    }

    #[must_use]
    pub fn get_detail(&self) -> &str {
        &self.detail
    }
}

/// Outcome of one receive step.
#[derive(Clone, Debug)]
pub enum N2kMessage {
    Known(KnownMessage),
    Unknown(UnknownMessage),
}

/// Receive-side entry point: classifies each frame, routes fast-packet
/// sequences through the assembler, decodes complete payloads.
///
/// Safe to share between threads; the assembler sits behind a mutex. Frames
/// of one logical CAN stream must still arrive in order.
pub struct N2kFrameHandler {
    parser: N2kMessageParser,
    assembler: Mutex<FastPacketAssembler>,
}

impl N2kFrameHandler {
    #[must_use]
    pub fn new(parser: N2kMessageParser) -> N2kFrameHandler {
        N2kFrameHandler { parser, assembler: Mutex::new(FastPacketAssembler::new()) }
    }

    #[must_use]
    pub fn get_parser(&self) -> &N2kMessageParser {
        &self.parser
    }

    /// Continuation frames dropped because their start frame was never seen.
    #[must_use]
    pub fn get_lost_starts(&self) -> u64 {
        self.assembler.lock().unwrap_or_else(PoisonError::into_inner).get_lost_starts()
    }

    /// Processes one incoming frame.
    ///
    /// Returns `None` while a fast-packet sequence is incomplete (or for an
    /// empty frame), otherwise a [`KnownMessage`] or an [`UnknownMessage`]
    /// explaining the rejection. Decode failures are reported inline, never
    /// raised.
    #[must_use]
    pub fn on_frame(
        &self,
        can_identifier: u32,
        extended_frame: bool,
        data_length_code: usize,
        data: &[u8],
    ) -> Option<N2kMessage> {
        if data_length_code == 0 {
            return None;
        }
        if data_length_code > MAX_N2K_FRAME_LEN {
            return Some(self.invalid_frame(
                can_identifier,
                data_length_code,
                data,
                "DLC > 8 for classic CAN/N2K",
            ));
        }
        if data.len() < data_length_code {
            return Some(self.invalid_frame(
                can_identifier,
                data_length_code,
                data,
                "data length < DLC",
            ));
        }

        let frame_data = &data[..data_length_code];

        if !extended_frame {
            return Some(N2kMessage::Unknown(UnknownMessage {
                reason: UnknownReason::NotExtendedFrame,
                can_id: None,
                can_identifier,
                data_length_code,
                raw_payload: frame_data.to_vec(),
                detail: "11-bit CAN frame (not N2K/J1939 extended frame)".to_string(),
            }));
        }

        if can_identifier & FLAG_BITS != 0 {
            return Some(N2kMessage::Unknown(UnknownMessage {
                reason: UnknownReason::InvalidIdentifier,
                can_id: None,
                can_identifier,
                data_length_code,
                raw_payload: frame_data.to_vec(),
                detail: "CAN identifier out of 29-bit range".to_string(),
            }));
        }

        let parsed_can_id = CanId::parse(can_identifier);

        let payload = self.try_assemble_payload(&parsed_can_id, frame_data)?;

        let pgn = parsed_can_id.get_pgn();

        if !self.parser.get_registry().contains_pgn(pgn) {
            return Some(N2kMessage::Unknown(UnknownMessage {
                reason: UnknownReason::UnsupportedPgn,
                can_id: Some(parsed_can_id),
                can_identifier,
                data_length_code,
                raw_payload: payload,
                detail: format!("PGN not supported by parser: {pgn}"),
            }));
        }

        match self.parser.decode_to_json(pgn, &payload) {
            Ok(Some(decoded)) => Some(N2kMessage::Known(KnownMessage {
                can_id: parsed_can_id,
                can_identifier,
                payload,
                decoded,
            })),
            Ok(None) => Some(N2kMessage::Unknown(UnknownMessage {
                reason: UnknownReason::DecodeFailed,
                can_id: Some(parsed_can_id),
                can_identifier,
                data_length_code,
                raw_payload: payload,
                detail: format!("parser returned no envelope for PGN: {pgn}"),
            })),
            Err(error) => Some(N2kMessage::Unknown(UnknownMessage {
                reason: UnknownReason::DecodeFailed,
                can_id: Some(parsed_can_id),
                can_identifier,
                data_length_code,
                raw_payload: payload,
                detail: error.to_string(),
            })),
        }
    }

    fn invalid_frame(
        &self,
        can_identifier: u32,
        data_length_code: usize,
        data: &[u8],
        detail: &str,
    ) -> N2kMessage {
        let keep = data.len().min(data_length_code);
        N2kMessage::Unknown(UnknownMessage {
            reason: UnknownReason::InvalidFrame,
            can_id: None,
            can_identifier,
            data_length_code,
            raw_payload: data[..keep].to_vec(),
            detail: detail.to_string(),
        })
    }

    // None while a fast-packet sequence is still accumulating
    fn try_assemble_payload(&self, parsed_can_id: &CanId, frame_data: &[u8]) -> Option<Vec<u8>> {
        if frame_data.is_empty() {
            return Some(frame_data.to_vec());
        }

        let first_byte = frame_data[0];
        let frame_index = first_byte & 0x1F;
        let sequence_id = (first_byte >> 5) & 0x07;

        // heuristic: a zero frame index whose length byte exceeds one frame
        // looks like a fast-packet start, unless the PGN is known to fit in
        // a single frame
        let mut looks_like_fast_packet_start =
            frame_index == 0 && frame_data.len() >= 2 && frame_data[1] > 8;

        if looks_like_fast_packet_start {
            if let Some(compiled) = self.parser.get_registry().get_message(parsed_can_id.get_pgn())
            {
                if compiled.get_length_type() == N2kMessageLengthType::Fixed
                    && compiled.get_fixed_length_bytes().is_some_and(|length| length <= 8)
                {
                    looks_like_fast_packet_start = false;
                }
            }
        }

        let mut assembler = self.assembler.lock().unwrap_or_else(PoisonError::into_inner);
        let has_in_progress = assembler.has_in_progress(parsed_can_id, sequence_id);

        if looks_like_fast_packet_start || has_in_progress {
            return assembler.accept(parsed_can_id, sequence_id, frame_index, frame_data);
        }

        Some(frame_data.to_vec())
    }
}
