/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 *
 * NMEA2000 does not use the J1939 TP mechanism but a custom FastPacket scheme.
 * Reference: https://canboat.github.io/canboat/canboat.html#pgn-126976
 * 1st packet: DATA[8] = SEQ/IDX[1] + LEN[1] + DATA[6]
 * 2nd,...:    DATA[8] = SEQ/IDX[1] + DATA[7]          (max 32 packets)
 */

use log::{debug, warn};
use std::collections::HashMap;

use canj1939::prelude::CanId;

// bounded in-progress map: lossy links can start sequences that never finish
const MAX_IN_PROGRESS: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct FastPacketKey {
    pgn: u32,
    source: u8,
    destination: u8,
    sequence_id: u8,
}

impl FastPacketKey {
    fn from_can_id(can_id: &CanId, sequence_id: u8) -> FastPacketKey {
        FastPacketKey {
            pgn: can_id.get_pgn(),
            source: can_id.get_source_address(),
            destination: can_id.get_destination_address(),
            sequence_id: sequence_id & 0x07,
        }
    }
}

struct FastPacketAssembly {
    payload: Vec<u8>,
    total_length: usize,
    tick: u64,
}

impl FastPacketAssembly {
    fn new(total_length: usize, tick: u64) -> FastPacketAssembly {
        FastPacketAssembly { payload: Vec::with_capacity(total_length), total_length, tick }
    }

    fn append(&mut self, chunk: &[u8]) {
        let remaining = self.total_length - self.payload.len();
        let to_copy = remaining.min(chunk.len());
        self.payload.extend_from_slice(&chunk[..to_copy]);
    }

    fn is_complete(&self) -> bool {
        self.payload.len() >= self.total_length
    }
}

/// Reassembles fast-packet sequences keyed by (PGN, source, destination,
/// sequence id). Calls must be serialized per receive stream.
#[derive(Default)]
pub struct FastPacketAssembler {
    in_progress: HashMap<FastPacketKey, FastPacketAssembly>,
    tick: u64,
    lost_starts: u64,
}

impl FastPacketAssembler {
    #[must_use]
    pub fn new() -> FastPacketAssembler {
        FastPacketAssembler::default()
    }

    #[must_use]
    pub fn has_in_progress(&self, can_id: &CanId, sequence_id: u8) -> bool {
        self.in_progress.contains_key(&FastPacketKey::from_can_id(can_id, sequence_id))
    }

    /// Continuation frames seen without their start frame.
    #[must_use]
    pub fn get_lost_starts(&self) -> u64 {
        self.lost_starts
    }

    /// Accepts one fast-packet frame and returns the full payload once the
    /// declared length has been accumulated.
    ///
    /// Start frames (`frame_index == 0`) carry the total length in byte 1 and
    /// up to six payload bytes; a new start discards any partial assembly for
    /// the same key. Continuations carry up to seven payload bytes; without
    /// an in-progress assembly they are dropped.
    pub fn accept(
        &mut self,
        can_id: &CanId,
        sequence_id: u8,
        frame_index: u8,
        frame_data: &[u8],
    ) -> Option<Vec<u8>> {
        self.tick += 1;
        let key = FastPacketKey::from_can_id(can_id, sequence_id);

        if frame_index == 0 {
            if frame_data.len() < 2 {
                self.in_progress.remove(&key);
                return None;
            }

            let total_length = frame_data[1] as usize;
            if total_length == 0 {
                self.in_progress.remove(&key);
                return None;
            }

            let mut assembly = FastPacketAssembly::new(total_length, self.tick);
            assembly.append(&frame_data[2..frame_data.len().min(8)]);

            if assembly.is_complete() {
                self.in_progress.remove(&key);
                return Some(assembly.payload);
            }

            if let Some(previous) = self.in_progress.insert(key, assembly) {
                warn!(
                    "fastpacket restart pgn:{} seq:{} dropped {} partial bytes",
                    key.pgn,
                    key.sequence_id,
                    previous.payload.len()
                );
            } else {
                self.evict_stalest_if_full();
            }
            return None;
        }

        let Some(assembly) = self.in_progress.get_mut(&key) else {
            // missed the start frame, nothing to attach this chunk to
            self.lost_starts += 1;
            debug!(
                "fastpacket continuation without start pgn:{} seq:{} index:{}",
                key.pgn, key.sequence_id, frame_index
            );
            return None;
        };

        assembly.tick = self.tick;
        assembly.append(&frame_data[1..frame_data.len().min(8)]);

        if assembly.is_complete() {
            return self.in_progress.remove(&key).map(|assembly| assembly.payload);
        }
        None
    }

    fn evict_stalest_if_full(&mut self) {
        if self.in_progress.len() <= MAX_IN_PROGRESS {
            return;
        }
        let stalest = self
            .in_progress
            .iter()
            .min_by_key(|(_key, assembly)| assembly.tick)
            .map(|(key, _assembly)| *key);
        if let Some(key) = stalest {
            self.in_progress.remove(&key);
            warn!("fastpacket assembly evicted pgn:{} seq:{}", key.pgn, key.sequence_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn can_id(pgn_low: u8, source: u8) -> CanId {
        // PDU2 identifier so every key is broadcast
        CanId::parse((6 << 26) | (0xF1u32 << 16) | (u32::from(pgn_low) << 8) | u32::from(source))
    }

    fn start_frame(sequence_id: u8, total_length: u8, chunk: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; 8];
        frame[0] = (sequence_id & 0x07) << 5;
        frame[1] = total_length;
        frame[2..2 + chunk.len()].copy_from_slice(chunk);
        frame
    }

    fn continuation_frame(sequence_id: u8, frame_index: u8, chunk: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; 8];
        frame[0] = ((sequence_id & 0x07) << 5) | (frame_index & 0x1F);
        frame[1..1 + chunk.len()].copy_from_slice(chunk);
        frame
    }

    #[test]
    fn single_start_frame_completes_short_payload() {
        let mut assembler = FastPacketAssembler::new();
        let id = can_id(0x10, 0x22);
        let payload = assembler.accept(&id, 0, 0, &start_frame(0, 4, &[1, 2, 3, 4]));
        assert_eq!(payload, Some(vec![1, 2, 3, 4]));
        assert!(!assembler.has_in_progress(&id, 0));
    }

    #[test]
    fn multi_frame_sequence_reassembles_in_order() {
        let mut assembler = FastPacketAssembler::new();
        let id = can_id(0x10, 0x22);
        let bytes: Vec<u8> = (0u8..16).collect();

        assert!(assembler.accept(&id, 2, 0, &start_frame(2, 16, &bytes[..6])).is_none());
        assert!(assembler.has_in_progress(&id, 2));
        assert!(assembler.accept(&id, 2, 1, &continuation_frame(2, 1, &bytes[6..13])).is_none());
        let payload = assembler.accept(&id, 2, 2, &continuation_frame(2, 2, &bytes[13..]));
        assert_eq!(payload, Some(bytes));
    }

    #[test]
    fn continuation_without_start_is_dropped_and_counted() {
        let mut assembler = FastPacketAssembler::new();
        let id = can_id(0x10, 0x22);
        assert!(assembler.accept(&id, 1, 3, &continuation_frame(1, 3, &[9; 7])).is_none());
        assert_eq!(assembler.get_lost_starts(), 1);
    }

    #[test]
    fn new_start_replaces_partial_assembly() {
        let mut assembler = FastPacketAssembler::new();
        let id = can_id(0x10, 0x22);

        assert!(assembler.accept(&id, 0, 0, &start_frame(0, 10, &[0xAA; 6])).is_none());
        // restart with a shorter message on the same key
        assert!(assembler.accept(&id, 0, 0, &start_frame(0, 8, &[0xBB; 6])).is_none());
        let payload = assembler.accept(&id, 0, 1, &continuation_frame(0, 1, &[0xBB, 0xBB]));
        assert_eq!(payload, Some(vec![0xBB; 8]));
    }

    #[test]
    fn degenerate_start_frames_drop_assembly() {
        let mut assembler = FastPacketAssembler::new();
        let id = can_id(0x10, 0x22);

        assert!(assembler.accept(&id, 0, 0, &start_frame(0, 20, &[1; 6])).is_none());
        // zero declared length clears the in-progress entry
        assert!(assembler.accept(&id, 0, 0, &start_frame(0, 0, &[])).is_none());
        assert!(!assembler.has_in_progress(&id, 0));
        // short start frame does the same
        assert!(assembler.accept(&id, 0, 0, &[0u8]).is_none());
        assert!(!assembler.has_in_progress(&id, 0));
    }

    #[test]
    fn keys_do_not_mix() {
        let mut assembler = FastPacketAssembler::new();
        let first = can_id(0x10, 0x22);
        let second = can_id(0x10, 0x23);

        assert!(assembler.accept(&first, 0, 0, &start_frame(0, 10, &[1; 6])).is_none());
        assert!(assembler.accept(&second, 0, 0, &start_frame(0, 10, &[2; 6])).is_none());

        let done_first = assembler.accept(&first, 0, 1, &continuation_frame(0, 1, &[1; 4]));
        assert_eq!(done_first, Some(vec![1; 10]));
        let done_second = assembler.accept(&second, 0, 1, &continuation_frame(0, 1, &[2; 4]));
        assert_eq!(done_second, Some(vec![2; 10]));
    }

    #[test]
    fn overfull_map_evicts_stalest_assembly() {
        let mut assembler = FastPacketAssembler::new();

        for source in 0..=MAX_IN_PROGRESS as u8 {
            let id = can_id(0x10, source);
            assert!(assembler.accept(&id, 0, 0, &start_frame(0, 20, &[source; 6])).is_none());
        }

        // the first (stalest) key was evicted to keep the map bounded
        assert!(!assembler.has_in_progress(&can_id(0x10, 0), 0));
        assert!(assembler.has_in_progress(&can_id(0x10, MAX_IN_PROGRESS as u8), 0));
    }
}
