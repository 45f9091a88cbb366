/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 */

use crate::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Application-level wire size: 4-byte big-endian id, 1 flag byte, 8 payload bytes.
pub const CAN_FRAME_WIRE_LEN: usize = 13;

const CAN_FD_MAX_PAYLOAD: usize = 64;
const CLASSIC_CAN_MAX_PAYLOAD: usize = 8;

/// Immutable CAN or CAN-FD frame.
///
/// The identifier carries the 29 (or 11) identifier bits only; kernel flag
/// bits never reach this type. The payload is owned, and accessors hand out
/// copies so callers cannot alias internal storage.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanFrame {
    canid: u32,
    extended: bool,
    dlc: u8,
    data: Vec<u8>,
}

impl CanFrame {
    /// Builds a frame from identifier bits, frame format and payload.
    ///
    /// # Errors
    /// `InvalidArgument` when `dlc > 64` or `data` is shorter than `dlc`.
    pub fn new(canid: u32, extended: bool, dlc: u8, data: &[u8]) -> Result<CanFrame, CanError> {
        if dlc as usize > CAN_FD_MAX_PAYLOAD {
            return Err(CanError::new("can-frame-dlc", format!("DLC {dlc} out of range 0..64")));
        }
        if data.len() < dlc as usize {
            return Err(CanError::new(
                "can-frame-data",
                format!("data length {} < DLC {}", data.len(), dlc),
            ));
        }
        Ok(CanFrame { canid, extended, dlc, data: data[..dlc as usize].to_vec() })
    }

    #[must_use]
    pub fn get_id(&self) -> u32 {
        self.canid
    }

    #[must_use]
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    #[must_use]
    pub fn get_len(&self) -> u8 {
        self.dlc
    }

    /// Defensive copy of the payload; mutating it never touches the frame.
    #[must_use]
    pub fn get_data(&self) -> Vec<u8> {
        self.data.clone()
    }

    /// Decodes the 13-byte application wire layout.
    ///
    /// # Errors
    /// `InvalidArgument` on short buffers or a flag byte encoding a DLC above 8.
    pub fn from_bytes(raw: &[u8]) -> Result<CanFrame, CanError> {
        if raw.len() < CAN_FRAME_WIRE_LEN {
            return Err(CanError::new(
                "can-frame-wire",
                format!("raw CAN frame must be at least {CAN_FRAME_WIRE_LEN} bytes"),
            ));
        }
        let canid = (u32::from(raw[0]) << 24)
            | (u32::from(raw[1]) << 16)
            | (u32::from(raw[2]) << 8)
            | u32::from(raw[3]);
        let flags = raw[4];
        let extended = (flags & 0x01) != 0;
        let dlc = (flags >> 1) & 0x0F;
        if dlc as usize > CLASSIC_CAN_MAX_PAYLOAD {
            return Err(CanError::new("can-frame-wire", format!("wire DLC {dlc} above 8")));
        }
        CanFrame::new(canid, extended, dlc, &raw[5..5 + dlc as usize])
    }

    /// Encodes the 13-byte application wire layout. Payloads are truncated or
    /// zero-padded to eight bytes.
    #[must_use]
    pub fn get_raw_data(&self) -> [u8; CAN_FRAME_WIRE_LEN] {
        let mut raw = [0u8; CAN_FRAME_WIRE_LEN];
        raw[0] = ((self.canid >> 24) & 0xFF) as u8;
        raw[1] = ((self.canid >> 16) & 0xFF) as u8;
        raw[2] = ((self.canid >> 8) & 0xFF) as u8;
        raw[3] = (self.canid & 0xFF) as u8;
        let mut flags = 0u8;
        if self.extended {
            flags |= 0x01;
        }
        flags |= (self.dlc & 0x0F) << 1;
        raw[4] = flags;
        let count = self.data.len().min(CLASSIC_CAN_MAX_PAYLOAD);
        raw[5..5 + count].copy_from_slice(&self.data[..count]);
        raw
    }
}
