/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 *
 * References:
 *    https://www.kernel.org/doc/html/latest/networking/can.html
 *    include/uapi/linux/can.h
 *    include/uapi/linux/can/raw.h
 */

#![allow(dead_code)]
#![allow(non_camel_case_types)]

use std::ffi::CStr;

pub type canid_t = u32;

pub const PF_CAN: libc::c_int = 29;
pub const AF_CAN: libc::c_int = 29;
pub const CAN_RAW: libc::c_int = 1;

// SOL_CAN_BASE + CAN_RAW
pub const SOL_CAN_RAW: libc::c_int = 101;
pub const CAN_RAW_FD_FRAMES: libc::c_int = 5;

pub const SIOCGIFINDEX: libc::c_ulong = 0x8933;

pub const CAN_EFF_FLAG: canid_t = 0x8000_0000;
pub const CAN_RTR_FLAG: canid_t = 0x4000_0000;
pub const CAN_ERR_FLAG: canid_t = 0x2000_0000;

pub const CAN_SFF_MASK: canid_t = 0x0000_07FF;
pub const CAN_EFF_MASK: canid_t = 0x1FFF_FFFF;
pub const CAN_ERR_MASK: canid_t = 0x1FFF_FFFF;

pub const CAN_MAX_DLEN: usize = 8;
pub const CANFD_MAX_DLEN: usize = 64;

pub const CAN_MTU: usize = 16;
pub const CANFD_MTU: usize = 72;

pub const IFNAMSIZ: usize = 16;

/// Classical CAN frame structure (aka CAN 2.0B)
/// can_id: frame identifier plus CAN_xxx_FLAG bits
/// len:    payload length in bytes (0..8)
/// data:   payload (up to 8 bytes)
#[repr(C)]
pub struct can_frame {
    pub can_id: canid_t,
    pub len: u8,
    pub __pad: u8,
    pub __res0: u8,
    pub len8_dlc: u8,
    pub data: [u8; CAN_MAX_DLEN],
}

/// CAN flexible data rate frame structure
/// len is a plain byte count (0..64), not a DLC code
#[repr(C)]
pub struct canfd_frame {
    pub can_id: canid_t,
    pub len: u8,
    pub flags: u8,
    pub __res0: u8,
    pub __res1: u8,
    pub data: [u8; CANFD_MAX_DLEN],
}

#[repr(C)]
pub struct sockaddr_can {
    pub can_family: libc::sa_family_t,
    pub can_ifindex: libc::c_int,
    pub can_addr: [u64; 2],
}

#[repr(C)]
pub union ifreq_ifru {
    pub ifru_ivalue: libc::c_int,
    pub ifru_mtu: libc::c_int,
    pub ifru_pad: [u8; 24],
}

#[repr(C)]
pub struct ifreq {
    pub ifrn_name: [libc::c_char; IFNAMSIZ],
    pub ifr_ifru: ifreq_ifru,
}

const MAX_ERROR_LEN: usize = 256;

pub fn get_errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

pub fn get_perror() -> String {
    let errno = get_errno();
    let mut buffer = [0 as libc::c_char; MAX_ERROR_LEN];
    let status = unsafe { libc::strerror_r(errno, buffer.as_mut_ptr(), MAX_ERROR_LEN) };
    if status != 0 {
        return format!("errno:{errno}");
    }
    let cstring = unsafe { CStr::from_ptr(buffer.as_ptr()) };
    match cstring.to_str() {
        Err(_error) => format!("errno:{errno}"),
        Ok(slice) => slice.to_owned(),
    }
}
