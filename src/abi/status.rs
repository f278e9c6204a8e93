//! Bridge status codes (§4.7): the `extern "C"` mirror of [`ErrorKind`].
//!
//! Named and numbered the way a generated `bridge.h` would declare them:
//! `Ok = 0`, then one variant per `ErrorKind`, so a caller on the other
//! side of the FFI boundary (Zig, C, or a BEAM NIF linking against this as
//! a cdylib) gets a stable, total mapping without ever inspecting the
//! free-form error string.

use crate::error::ErrorKind;

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok = 0,
    ErrInvalidArgument = -1,
    ErrNotFound = -2,
    ErrIo = -3,
    ErrOutOfMemory = -4,
    ErrInternal = -5,
    ErrTxnNotActive = -6,
    ErrTxnAlreadyCommitted = -7,
    ErrConstraintViolation = -8,
    ErrNotImplemented = -100,
}

impl From<ErrorKind> for StatusCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::InvalidArgument => Self::ErrInvalidArgument,
            ErrorKind::NotFound => Self::ErrNotFound,
            ErrorKind::Io => Self::ErrIo,
            ErrorKind::OutOfMemory => Self::ErrOutOfMemory,
            ErrorKind::Internal => Self::ErrInternal,
            ErrorKind::TxnNotActive => Self::ErrTxnNotActive,
            ErrorKind::TxnAlreadyCommitted => Self::ErrTxnAlreadyCommitted,
            ErrorKind::ConstraintViolation => Self::ErrConstraintViolation,
            ErrorKind::NotImplemented => Self::ErrNotImplemented,
            // `ErrorKind` is `#[non_exhaustive]`; any future variant this
            // crate doesn't know about yet surfaces to callers as internal
            // rather than failing to build.
            _ => Self::ErrInternal,
        }
    }
}
