//! Crate-wide error type and the taxonomy that backs the bridge's status codes.
//!
//! Every [`ErrorKind`] maps onto exactly one ABI status code (see
//! `crate::abi::status::StatusCode`); the mapping is total, so a caller on
//! the other side of the bridge can produce consistent HTTP/gRPC/GraphQL
//! error responses without inspecting free-form strings.

use std::borrow::Cow;

/// Error category. Each variant corresponds 1:1 to an ABI status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Malformed CBOR, missing required provenance fields, unknown op type,
    /// payload too large.
    InvalidArgument,
    /// Operation targets an entity that does not exist (block id,
    /// collection name, document id).
    NotFound,
    /// Filesystem failure, checksum mismatch on read, concurrent-open
    /// conflict.
    Io,
    /// Allocation failure.
    OutOfMemory,
    /// Invariant violation: journal sequence gap, impossible header, a
    /// database marked unrecoverable after a failed inverse application.
    Internal,
    /// A call was made against a transaction handle that is not `ACTIVE`.
    TxnNotActive,
    /// A call was made against a transaction handle that already committed.
    TxnAlreadyCommitted,
    /// Schema/constraint block rejected the write.
    ConstraintViolation,
    /// Reserved operation or proof type not yet wired up.
    NotImplemented,
}

/// A block pointer attached to an error for provenance purposes.
pub type BlockRef = u64;

/// Crate-wide error.
///
/// Carries the machine-readable [`ErrorKind`], a narrative rationale, and
/// (for constraint and I/O errors) the block ids implicated, the same shape
/// the bridge serializes into an error blob (`code`, `message`, `block_refs`,
/// `rationale`).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: Cow<'static, str>,
    block_refs: Vec<BlockRef>,
}

impl Error {
    /// Construct an error with a static message and no block references.
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message: Cow::Borrowed(message), block_refs: Vec::new() }
    }

    /// Construct an error with an owned, formatted message.
    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: Cow::Owned(message.into()), block_refs: Vec::new() }
    }

    /// Attach block references (for constraint/checksum errors).
    #[must_use]
    pub fn with_block_refs(mut self, refs: impl IntoIterator<Item = BlockRef>) -> Self {
        self.block_refs.extend(refs);
        self
    }

    /// Error category.
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable rationale.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Block ids implicated by this error, if any.
    pub fn block_refs(&self) -> &[BlockRef] {
        &self.block_refs
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

// One constructor per kind; used pervasively across modules.
macro_rules! ctor {
    ($name:ident, $kind:ident) => {
        impl Error {
            #[doc = concat!("Shorthand for `Error::new(ErrorKind::", stringify!($kind), ", ..)`.")]
            pub const fn $name(message: &'static str) -> Self {
                Self::new(ErrorKind::$kind, message)
            }
        }
    };
}

ctor!(invalid_argument, InvalidArgument);
ctor!(not_found, NotFound);
ctor!(io, Io);
ctor!(out_of_memory, OutOfMemory);
ctor!(internal, Internal);
ctor!(txn_not_active, TxnNotActive);
ctor!(txn_already_committed, TxnAlreadyCommitted);
ctor!(constraint_violation, ConstraintViolation);
ctor!(not_implemented, NotImplemented);

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::with_message(ErrorKind::Io, format!("{err}"))
    }
}

impl From<ciborium::de::Error<std::io::Error>> for Error {
    fn from(err: ciborium::de::Error<std::io::Error>) -> Self {
        Error::with_message(ErrorKind::InvalidArgument, format!("CBOR decode: {err}"))
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for Error {
    fn from(err: ciborium::ser::Error<std::io::Error>) -> Self {
        Error::with_message(ErrorKind::Internal, format!("CBOR encode: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_refs_roundtrip() {
        let e = Error::not_found("no such collection").with_block_refs([7, 8]);
        assert_eq!(e.kind(), ErrorKind::NotFound);
        assert_eq!(e.block_refs(), &[7, 8]);
        assert_eq!(e.message(), "no such collection");
    }
}
