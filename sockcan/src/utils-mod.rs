/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 */

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad failure classes shared by every layer of the stack.
///
/// `InvalidArgument` flags caller input violating a precondition,
/// `IllegalState` flags compiled/configured state violating an internal
/// invariant, `IoError` wraps kernel failures and carries the native errno,
/// `Unsupported` flags dialect features with no implementation.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CanErrorKind {
    InvalidArgument,
    IllegalState,
    IoError,
    Unsupported,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CanError {
    kind: CanErrorKind,
    uid: String,
    info: String,
    errno: Option<i32>,
}

impl Clone for CanError {
    fn clone(&self) -> CanError {
        CanError {
            kind: self.kind,
            uid: self.uid.clone(),
            info: self.info.clone(),
            errno: self.errno,
        }
    }
}

pub trait MakeError<T> {
    fn make(kind: CanErrorKind, uid: &str, msg: T) -> CanError;
}

impl MakeError<&str> for CanError {
    fn make(kind: CanErrorKind, uid: &str, msg: &str) -> CanError {
        CanError { kind, uid: uid.to_string(), info: msg.to_string(), errno: None }
    }
}

impl MakeError<String> for CanError {
    fn make(kind: CanErrorKind, uid: &str, msg: String) -> CanError {
        CanError { kind, uid: uid.to_string(), info: msg, errno: None }
    }
}

impl CanError {
    /// Invalid caller input.
    pub fn new<T>(uid: &str, msg: T) -> CanError
    where
        CanError: MakeError<T>,
    {
        Self::make(CanErrorKind::InvalidArgument, uid, msg)
    }

    /// Broken internal invariant.
    pub fn state<T>(uid: &str, msg: T) -> CanError
    where
        CanError: MakeError<T>,
    {
        Self::make(CanErrorKind::IllegalState, uid, msg)
    }

    /// Kernel I/O failure. Attach the native code with [`CanError::with_errno`].
    pub fn io<T>(uid: &str, msg: T) -> CanError
    where
        CanError: MakeError<T>,
    {
        Self::make(CanErrorKind::IoError, uid, msg)
    }

    /// Dialect feature without an implementation.
    pub fn unsupported<T>(uid: &str, msg: T) -> CanError
    where
        CanError: MakeError<T>,
    {
        Self::make(CanErrorKind::Unsupported, uid, msg)
    }

    #[must_use]
    pub fn with_errno(mut self, errno: i32) -> CanError {
        self.errno = Some(errno);
        self
    }

    #[must_use]
    pub fn get_kind(&self) -> CanErrorKind {
        self.kind
    }

    #[must_use]
    pub fn get_uid(&self) -> String {
        self.uid.clone()
    }

    #[must_use]
    pub fn get_info(&self) -> String {
        self.info.clone()
    }

    #[must_use]
    pub fn get_errno(&self) -> Option<i32> {
        self.errno
    }
}

impl fmt::Display for CanError {
    fn fmt(&self, format: &mut fmt::Formatter) -> fmt::Result {
        match self.errno {
            Some(errno) => write!(format, "uid:{} info:{} errno:{}", self.uid, self.info, errno),
            None => write!(format, "uid:{} info:{}", self.uid, self.info),
        }
    }
}

impl fmt::Debug for CanError {
    fn fmt(&self, format: &mut fmt::Formatter) -> fmt::Result {
        write!(format, "{self}")
    }
}
