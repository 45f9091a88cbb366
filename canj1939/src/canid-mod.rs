/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 *
 * References:
 *    https://www.kvaser.com/about-can/higher-layer-protocols/j1939-introduction/
 *    https://www.engr.colostate.edu/~jdaily/J1939/candata.html
 */

use sockcan::prelude::CanError;

const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;
const BROADCAST_ADDR: u8 = 255;

/// Parsed 29-bit J1939/N2K identifier.
///
/// Layout:
/// - priority: bits 26..28 (3 bits)
/// - DP: bit 24, PF: bits 16..23, PS: bits 8..15
/// - SA: bits 0..7
///
/// PGN rules:
/// - PF < 240 (PDU1): PS is the destination and excluded from the PGN (low byte is 0)
/// - PF >= 240 (PDU2): PS is part of the PGN, destination is global (255)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CanId {
    priority: u8,
    pgn: u32,
    source_address: u8,
    destination_address: u8,
}

impl CanId {
    /// Parses an identifier; flag bits above bit 28 are masked off.
    #[must_use]
    pub fn parse(can_identifier: u32) -> CanId {
        let identifier = can_identifier & CAN_EFF_MASK;

        let priority = ((identifier >> 26) & 0x07) as u8;
        let pf = (identifier >> 16) & 0xFF;
        let ps = (identifier >> 8) & 0xFF;
        let source_address = (identifier & 0xFF) as u8;
        let data_page = (identifier >> 24) & 0x01;

        let (pgn, destination_address) = if pf < 240 {
            ((data_page << 16) | (pf << 8), ps as u8)
        } else {
            ((data_page << 16) | (pf << 8) | ps, BROADCAST_ADDR)
        };

        CanId { priority, pgn, source_address, destination_address }
    }

    /// Builds the 29-bit identifier for `(pgn, priority, source, destination)`.
    ///
    /// # Errors
    /// `InvalidArgument` when priority exceeds 7 or a PDU1 PGN carries a
    /// non-zero low byte.
    pub fn build(
        pgn: u32,
        priority: u8,
        source_address: u8,
        destination_address: u8,
    ) -> Result<u32, CanError> {
        if priority > 7 {
            return Err(CanError::new(
                "j1939-priority",
                format!("priority {priority} out of range 0..7"),
            ));
        }

        let data_page = (pgn >> 16) & 0x01;
        let pf = (pgn >> 8) & 0xFF;

        let ps = if pf < 240 {
            if pgn & 0xFF != 0 {
                return Err(CanError::new(
                    "j1939-pdu1-pgn",
                    format!("PDU1 pgn:{pgn:#x} must have a zero low byte"),
                ));
            }
            u32::from(destination_address)
        } else {
            pgn & 0xFF
        };

        let identifier = (u32::from(priority) << 26)
            | (data_page << 24)
            | (pf << 16)
            | (ps << 8)
            | u32::from(source_address);

        Ok(identifier & CAN_EFF_MASK)
    }

    #[must_use]
    pub fn get_priority(&self) -> u8 {
        self.priority
    }

    #[must_use]
    pub fn get_pgn(&self) -> u32 {
        self.pgn
    }

    #[must_use]
    pub fn get_source_address(&self) -> u8 {
        self.source_address
    }

    #[must_use]
    pub fn get_destination_address(&self) -> u8 {
        self.destination_address
    }

    #[must_use]
    pub fn is_pdu1(&self) -> bool {
        self.pgn & 0xFF == 0
    }

    #[must_use]
    pub fn is_pdu2(&self) -> bool {
        !self.is_pdu1()
    }

    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.destination_address == BROADCAST_ADDR
    }
}
