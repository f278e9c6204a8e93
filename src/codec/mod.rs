//! Integrity codec (§4.1): CRC32C checksums and canonical CBOR.
//!
//! This is the lowest layer in the crate, block store and journal both
//! build on it, and nothing in here depends on either.

mod cbor;
mod crc;

pub use cbor::{cbor_decode, cbor_encode, tagged};
pub use crc::crc32c;

pub use ciborium::value::Value as CborValue;
