/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 *
 * References:
 *    https://www.kernel.org/doc/html/latest/networking/can.html
 *    https://www.kernel.org/doc/html/latest/networking/can.html#raw-protocol-sockets-with-can-filters-sock-raw
 */

use bitflags::bitflags;
use log::warn;
use std::fs;
use std::mem;

use super::cglue;
use crate::prelude::*;

bitflags! {
    /// Identifier flag bits and masks as carried by the kernel can_id word.
    #[derive(PartialEq, Eq, Debug, Clone, Copy)]
    pub struct FilterMask: cglue::canid_t {
        /// SFF_MASK valid bits in standard frame id
        const SFF_MASK = cglue::CAN_SFF_MASK;
        /// EFF_MASK valid bits in extended frame id
        const EFF_MASK = cglue::CAN_EFF_MASK;
        /// EFF_FLAG indicate 29 bit extended format
        const EFF_FLAG = cglue::CAN_EFF_FLAG;
        /// RTR_FLAG remote transmission request flag
        const RTR_FLAG = cglue::CAN_RTR_FLAG;
        /// ERR_FLAG error flag
        const ERR_FLAG = cglue::CAN_ERR_FLAG;
    }
}

/// What the opened interface/socket pair can actually move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CanCapabilities {
    pub interface_fd_enabled: bool,
    pub socket_fd_enabled: bool,
    pub interface_max_payload_bytes: usize,
    pub io_max_payload_bytes: usize,
}

/// Blocking raw-frame capability consumed by the protocol layers above.
pub trait FrameIO {
    /// Blocks until one frame is available.
    ///
    /// # Errors
    /// `IoError` on kernel failure or unexpected read size, `InvalidArgument`
    /// when the frame carries RTR/ERR flag bits.
    fn read_frame(&self) -> Result<CanFrame, CanError>;

    /// Writes one frame, classic or FD depending on its DLC.
    ///
    /// # Errors
    /// `InvalidArgument` on identifier/DLC violations or when FD payloads are
    /// requested without FD support, `IoError` on kernel failure/short write.
    fn write_frame(&self, frame: &CanFrame) -> Result<(), CanError>;

    fn get_capabilities(&self) -> &CanCapabilities;

    /// # Errors
    /// `IoError` with the native errno when the kernel refuses the close.
    fn close(&self) -> Result<(), CanError>;
}

/// Thin syscall facade so the device logic can be driven without a CAN
/// interface. Production code goes through [`LibcSockSys`].
pub trait SockSys: Send + Sync {
    fn open_raw_socket(&self) -> i32;
    fn resolve_ifindex(&self, sockfd: i32, iface: &str) -> i32;
    fn bind_raw(&self, sockfd: i32, ifindex: i32) -> i32;
    fn read_frame_bytes(&self, sockfd: i32, buffer: &mut [u8]) -> isize;
    fn write_frame_bytes(&self, sockfd: i32, buffer: &[u8]) -> isize;
    fn close_socket(&self, sockfd: i32) -> i32;
    /// Ok(value) or Err(errno).
    fn read_sockopt_int(&self, sockfd: i32, level: i32, optname: i32) -> Result<i32, i32>;
    /// Interface MTU from sysfs.
    ///
    /// # Errors
    /// `IoError` when the sysfs node is unreadable or not an integer.
    fn read_iface_mtu(&self, iface: &str) -> Result<u32, CanError>;
    fn last_errno(&self) -> i32;
    fn last_error_text(&self) -> String;
}

pub struct LibcSockSys;

impl SockSys for LibcSockSys {
    fn open_raw_socket(&self) -> i32 {
        unsafe { libc::socket(cglue::PF_CAN, libc::SOCK_RAW, cglue::CAN_RAW) }
    }

    fn resolve_ifindex(&self, sockfd: i32, iface: &str) -> i32 {
        let mut ifreq: cglue::ifreq = unsafe { mem::zeroed() };
        let iname = iface.as_bytes();
        for idx in 0..cglue::IFNAMSIZ - 1 {
            if idx == iname.len() {
                break;
            }
            ifreq.ifrn_name[idx] = iname[idx] as libc::c_char;
        }
        let status = unsafe { libc::ioctl(sockfd, cglue::SIOCGIFINDEX, &ifreq) };
        if status < 0 {
            status
        } else {
            unsafe { ifreq.ifr_ifru.ifru_ivalue }
        }
    }

    fn bind_raw(&self, sockfd: i32, ifindex: i32) -> i32 {
        let mut canaddr: cglue::sockaddr_can = unsafe { mem::zeroed() };
        canaddr.can_family = cglue::AF_CAN as libc::sa_family_t;
        canaddr.can_ifindex = ifindex;
        unsafe {
            libc::bind(
                sockfd,
                (&raw const canaddr).cast::<libc::sockaddr>(),
                mem::size_of::<cglue::sockaddr_can>() as libc::socklen_t,
            )
        }
    }

    fn read_frame_bytes(&self, sockfd: i32, buffer: &mut [u8]) -> isize {
        unsafe { libc::read(sockfd, buffer.as_mut_ptr().cast::<libc::c_void>(), buffer.len()) }
    }

    fn write_frame_bytes(&self, sockfd: i32, buffer: &[u8]) -> isize {
        unsafe { libc::write(sockfd, buffer.as_ptr().cast::<libc::c_void>(), buffer.len()) }
    }

    fn close_socket(&self, sockfd: i32) -> i32 {
        unsafe { libc::close(sockfd) }
    }

    fn read_sockopt_int(&self, sockfd: i32, level: i32, optname: i32) -> Result<i32, i32> {
        let mut value: libc::c_int = 0;
        let mut length = mem::size_of::<libc::c_int>() as libc::socklen_t;
        let status = unsafe {
            libc::getsockopt(
                sockfd,
                level,
                optname,
                (&raw mut value).cast::<libc::c_void>(),
                &raw mut length,
            )
        };
        if status != 0 {
            Err(cglue::get_errno())
        } else {
            Ok(value)
        }
    }

    fn read_iface_mtu(&self, iface: &str) -> Result<u32, CanError> {
        let path = format!("/sys/class/net/{iface}/mtu");
        let text = fs::read_to_string(&path)
            .map_err(|error| CanError::io("can-iface-mtu", error.to_string()))?;
        text.trim()
            .parse::<u32>()
            .map_err(|_error| CanError::io("can-iface-mtu", format!("invalid MTU '{}' for {iface}", text.trim())))
    }

    fn last_errno(&self) -> i32 {
        cglue::get_errno()
    }

    fn last_error_text(&self) -> String {
        cglue::get_perror()
    }
}

/// Raw SocketCAN device bound to one interface.
pub struct SocketCanDevice {
    sys: Box<dyn SockSys>,
    sockfd: i32,
    iface: String,
    capabilities: CanCapabilities,
}

impl SocketCanDevice {
    /// Opens a raw CAN socket on `iface` and probes its capabilities.
    ///
    /// # Errors
    /// `IoError` when socket creation, interface resolution, bind or
    /// capability probing fails.
    pub fn open(iface: &str) -> Result<SocketCanDevice, CanError> {
        Self::open_with(Box::new(LibcSockSys), iface)
    }

    /// Same as [`SocketCanDevice::open`] over an injected syscall surface.
    ///
    /// # Errors
    /// See [`SocketCanDevice::open`].
    pub fn open_with(sys: Box<dyn SockSys>, iface: &str) -> Result<SocketCanDevice, CanError> {
        let sockfd = sys.open_raw_socket();
        if sockfd < 0 {
            return Err(CanError::io("fail-socketcan-open", sys.last_error_text())
                .with_errno(sys.last_errno()));
        }

        let index = sys.resolve_ifindex(sockfd, iface);
        if index < 0 {
            sys.close_socket(sockfd);
            return Err(CanError::io("fail-socketcan-iface", sys.last_error_text())
                .with_errno(sys.last_errno()));
        }

        let status = sys.bind_raw(sockfd, index);
        if status < 0 {
            sys.close_socket(sockfd);
            return Err(CanError::io("fail-socketcan-bind", sys.last_error_text())
                .with_errno(sys.last_errno()));
        }

        let capabilities = match Self::load_capabilities(sys.as_ref(), sockfd, iface) {
            Err(error) => {
                sys.close_socket(sockfd);
                return Err(error);
            },
            Ok(value) => value,
        };

        Ok(SocketCanDevice { sys, sockfd, iface: iface.to_owned(), capabilities })
    }

    fn from_parts(
        sys: Box<dyn SockSys>,
        capabilities: CanCapabilities,
        sockfd: i32,
        iface: &str,
    ) -> SocketCanDevice {
        SocketCanDevice { sys, sockfd, iface: iface.to_owned(), capabilities }
    }

    fn load_capabilities(
        sys: &dyn SockSys,
        sockfd: i32,
        iface: &str,
    ) -> Result<CanCapabilities, CanError> {
        let interface_fd_enabled = sys.read_iface_mtu(iface)? as usize == cglue::CANFD_MTU;
        let socket_fd_enabled =
            match sys.read_sockopt_int(sockfd, cglue::SOL_CAN_RAW, cglue::CAN_RAW_FD_FRAMES) {
                Err(errno) => {
                    return Err(CanError::io(
                        "can-sockopt-fdframes",
                        "getsockopt(CAN_RAW_FD_FRAMES) failed",
                    )
                    .with_errno(errno))
                },
                Ok(value) => value != 0,
            };

        let interface_max_payload_bytes =
            if interface_fd_enabled { cglue::CANFD_MAX_DLEN } else { cglue::CAN_MAX_DLEN };
        let io_max_payload_bytes = if interface_fd_enabled && socket_fd_enabled {
            cglue::CANFD_MAX_DLEN
        } else {
            cglue::CAN_MAX_DLEN
        };

        Ok(CanCapabilities {
            interface_fd_enabled,
            socket_fd_enabled,
            interface_max_payload_bytes,
            io_max_payload_bytes,
        })
    }

    #[must_use]
    pub fn get_iface(&self) -> &str {
        &self.iface
    }

    #[must_use]
    pub fn as_rawfd(&self) -> i32 {
        self.sockfd
    }

    fn decode_kernel_id(&self, raw_canid: u32) -> Result<(u32, bool), CanError> {
        let extended = raw_canid & FilterMask::EFF_FLAG.bits() != 0;
        if raw_canid & (FilterMask::RTR_FLAG | FilterMask::ERR_FLAG).bits() != 0 {
            return Err(CanError::new(
                "can-frame-flags",
                format!("unsupported RTR/ERR flags in canid:{raw_canid:#x}"),
            ));
        }
        let clean = if extended {
            raw_canid & FilterMask::EFF_MASK.bits()
        } else {
            raw_canid & FilterMask::SFF_MASK.bits()
        };
        Ok((clean, extended))
    }
}

impl FrameIO for SocketCanDevice {
    fn read_frame(&self) -> Result<CanFrame, CanError> {
        let mut buffer = [0u8; cglue::CANFD_MTU];
        let count = self.sys.read_frame_bytes(self.sockfd, &mut buffer);

        if count < 0 {
            return Err(CanError::io("can-read-fail", self.sys.last_error_text())
                .with_errno(self.sys.last_errno()));
        }

        if count as usize == cglue::CAN_MTU {
            let raw_canid = u32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
            let (canid, extended) = self.decode_kernel_id(raw_canid)?;
            let dlc = buffer[4];
            if dlc as usize > cglue::CAN_MAX_DLEN {
                return Err(CanError::io("can-read-frame", format!("invalid classic DLC {dlc}")));
            }
            return CanFrame::new(canid, extended, dlc, &buffer[8..8 + dlc as usize]);
        }

        if count as usize == cglue::CANFD_MTU {
            let raw_canid = u32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
            let (canid, extended) = self.decode_kernel_id(raw_canid)?;
            let len = buffer[4];
            if len as usize > cglue::CANFD_MAX_DLEN {
                return Err(CanError::io("can-read-frame", format!("invalid FD length {len}")));
            }
            return CanFrame::new(canid, extended, len, &buffer[8..8 + len as usize]);
        }

        warn!("unexpected read size {count} on {}", self.iface);
        Err(CanError::io(
            "can-read-frame",
            format!(
                "unexpected read size {count} (expected {} or {})",
                cglue::CAN_MTU,
                cglue::CANFD_MTU
            ),
        ))
    }

    fn write_frame(&self, frame: &CanFrame) -> Result<(), CanError> {
        let canid = frame.get_id();
        let dlc = frame.get_len() as usize;
        let data = frame.get_data();

        // caller must hand over identifier bits only, never a raw-with-flags id
        let mask = if frame.is_extended() {
            FilterMask::EFF_MASK.bits()
        } else {
            FilterMask::SFF_MASK.bits()
        };
        if canid & mask != canid {
            return Err(CanError::new(
                "can-write-canid",
                format!("canid:{canid:#x} contains invalid bits for this frame format"),
            ));
        }

        let raw_canid =
            if frame.is_extended() { canid | FilterMask::EFF_FLAG.bits() } else { canid };

        if dlc <= cglue::CAN_MAX_DLEN {
            let mut buffer = [0u8; cglue::CAN_MTU];
            buffer[0..4].copy_from_slice(&raw_canid.to_le_bytes());
            buffer[4] = dlc as u8;
            buffer[8..8 + dlc].copy_from_slice(&data[..dlc]);

            let count = self.sys.write_frame_bytes(self.sockfd, &buffer);
            if count < 0 {
                return Err(CanError::io("can-write-fail", self.sys.last_error_text())
                    .with_errno(self.sys.last_errno()));
            }
            if count as usize != cglue::CAN_MTU {
                return Err(CanError::io(
                    "can-write-short",
                    format!("short write {count} (expected {})", cglue::CAN_MTU),
                ));
            }
            return Ok(());
        }

        if !self.capabilities.interface_fd_enabled || !self.capabilities.socket_fd_enabled {
            return Err(CanError::new(
                "can-fd-disabled",
                format!("CAN FD not enabled for interface/socket; cannot send {dlc} bytes"),
            ));
        }

        let mut buffer = [0u8; cglue::CANFD_MTU];
        buffer[0..4].copy_from_slice(&raw_canid.to_le_bytes());
        buffer[4] = dlc as u8;
        buffer[8..8 + dlc].copy_from_slice(&data[..dlc]);

        let count = self.sys.write_frame_bytes(self.sockfd, &buffer);
        if count < 0 {
            return Err(CanError::io("can-write-fail", self.sys.last_error_text())
                .with_errno(self.sys.last_errno()));
        }
        if count as usize != cglue::CANFD_MTU {
            return Err(CanError::io(
                "can-write-short",
                format!("short write {count} (expected {})", cglue::CANFD_MTU),
            ));
        }
        Ok(())
    }

    fn get_capabilities(&self) -> &CanCapabilities {
        &self.capabilities
    }

    fn close(&self) -> Result<(), CanError> {
        let status = self.sys.close_socket(self.sockfd);
        if status != 0 {
            return Err(CanError::io("can-close-fail", self.sys.last_error_text())
                .with_errno(self.sys.last_errno()));
        }
        Ok(())
    }
}
