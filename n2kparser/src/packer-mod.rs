/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 */

use serde_json::Value;

use crate::codec::N2kMessageParser;
use crate::sequence::N2kSequenceProvider;
use canj1939::prelude::CanId;
use sockcan::prelude::{CanError, CanFrame};

// frame 0 carries the length byte plus 6 payload bytes, continuations carry 7
const FIRST_FRAME_CHUNK: usize = 6;
const NEXT_FRAME_CHUNK: usize = 7;
const MAX_FRAME_INDEX: u8 = 31;

/// Turns `{pgn, decoded}` envelopes into extended CAN frames, splitting
/// payloads above eight bytes into a fast-packet sequence.
pub struct N2kFramePacker {
    encoder: N2kMessageParser,
    sequences: N2kSequenceProvider,
}

impl N2kFramePacker {
    #[must_use]
    pub fn new(encoder: N2kMessageParser) -> N2kFramePacker {
        N2kFramePacker { encoder, sequences: N2kSequenceProvider::new() }
    }

    #[must_use]
    pub fn with_sequences(encoder: N2kMessageParser, sequences: N2kSequenceProvider) -> N2kFramePacker {
        N2kFramePacker { encoder, sequences }
    }

    /// Emits the frames for one message, in strict ascending frame order.
    ///
    /// # Errors
    /// Propagates encode and identifier-build failures; `IllegalState` when
    /// the payload would need more than 32 frames.
    pub fn pack(
        &self,
        pgn: u32,
        priority: u8,
        source_address: u8,
        destination_address: u8,
        envelope: &Value,
    ) -> Result<Vec<CanFrame>, CanError> {
        let payload = self.encoder.encode_from_json(pgn, envelope)?;
        let can_identifier = CanId::build(pgn, priority, source_address, destination_address)?;

        if payload.len() <= 8 {
            let frame = CanFrame::new(can_identifier, true, payload.len() as u8, &payload)?;
            return Ok(vec![frame]);
        }

        self.pack_fast_packet(pgn, can_identifier, source_address, destination_address, &payload)
    }

    fn pack_fast_packet(
        &self,
        pgn: u32,
        can_identifier: u32,
        source_address: u8,
        destination_address: u8,
        payload: &[u8],
    ) -> Result<Vec<CanFrame>, CanError> {
        let sequence_id =
            self.sequences.next_sequence_id(pgn, source_address, destination_address);
        let total_length = payload.len();
        let mut frames = Vec::with_capacity(total_length / NEXT_FRAME_CHUNK + 2);

        let mut frame0 = [0u8; 8];
        frame0[0] = (sequence_id & 0x07) << 5;
        frame0[1] = (total_length & 0xFF) as u8;

        let first_chunk = total_length.min(FIRST_FRAME_CHUNK);
        frame0[2..2 + first_chunk].copy_from_slice(&payload[..first_chunk]);
        frames.push(CanFrame::new(can_identifier, true, 8, &frame0)?);

        let mut payload_index = first_chunk;
        let mut frame_index = 1u8;

        while payload_index < total_length {
            if frame_index > MAX_FRAME_INDEX {
                return Err(CanError::state(
                    "n2k-fastpacket-frames",
                    format!(
                        "fast packet exceeded 32 frames for PGN {pgn} (payload length {total_length})"
                    ),
                ));
            }

            let mut frame = [0u8; 8];
            frame[0] = ((sequence_id & 0x07) << 5) | (frame_index & 0x1F);

            let chunk = (total_length - payload_index).min(NEXT_FRAME_CHUNK);
            frame[1..1 + chunk].copy_from_slice(&payload[payload_index..payload_index + chunk]);
            payload_index += chunk;

            // fast-packet frames always go out as full 8-byte frames
            frames.push(CanFrame::new(can_identifier, true, 8, &frame)?);
            frame_index += 1;
        }

        Ok(frames)
    }
}
