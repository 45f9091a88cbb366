/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 */

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Allocates the 3-bit fast-packet sequence counter per (PGN, source,
/// destination). Internally synchronized; concurrent callers on the same key
/// observe a strictly increasing modulo-8 sequence.
#[derive(Default)]
pub struct N2kSequenceProvider {
    counters: Mutex<HashMap<(u32, u8, u8), u8>>,
}

impl N2kSequenceProvider {
    #[must_use]
    pub fn new() -> N2kSequenceProvider {
        N2kSequenceProvider::default()
    }

    /// First call on a key yields 0, then 1..7 and around.
    pub fn next_sequence_id(&self, pgn: u32, source_address: u8, destination_address: u8) -> u8 {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let counter = counters
            .entry((pgn, source_address, destination_address))
            .and_modify(|current| *current = (*current + 1) & 0x07)
            .or_insert(0);
        *counter
    }
}
