//! Superblock (§3.2): the one distinguished block at id 0.
//!
//! Unlike document/edge/schema blocks the superblock's payload isn't
//! caller-supplied CBOR, it's the allocator and recovery bookkeeping the
//! whole database hangs off. It is still stored as ordinary CBOR, though
//! (§9's "polymorphic block payloads" design note), rather than a packed
//! byte layout, since nothing here is on a hot I/O path that would benefit
//! from avoiding the codec.

use ciborium::value::Value;

use crate::allocator::Allocator;
use crate::codec::{cbor_decode, cbor_encode};
use crate::consts::BLOCK_FORMAT_VERSION;
use crate::error::{Error, Result};

/// In-memory superblock state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub format_version: u16,
    pub next_free_id: u64,
    pub free_list_head: Option<u64>,
    pub journal_head_sequence: u64,
    /// Root of the DOCUMENT-collection metadata chain (§11).
    pub document_collections_root: Option<u64>,
    /// Root of the EDGE-collection metadata chain (§11).
    pub edge_collections_root: Option<u64>,
    pub created_at: u64,
    /// Highest block-level write sequence observed before the last
    /// checkpoint, so a reopened store keeps handing out increasing
    /// sequence numbers instead of restarting at zero.
    pub last_block_sequence: u64,
    /// False after a crash; recovery must run before the database is
    /// usable, and this flag is set back to true only once recovery (or a
    /// clean shutdown) completes.
    pub last_clean_shutdown: bool,
    /// Set when an abort's inverse application itself failed (§4.5). Once
    /// true, every further write call is rejected with `ERR_INTERNAL` until
    /// an operator repairs the database out of band; there is no automatic
    /// recovery from this state.
    pub unrecoverable: bool,
}

impl Superblock {
    /// A fresh superblock for a newly created, empty database.
    pub fn new(now_micros: u64) -> Self {
        Self {
            format_version: BLOCK_FORMAT_VERSION,
            next_free_id: 1,
            free_list_head: None,
            journal_head_sequence: 0,
            document_collections_root: None,
            edge_collections_root: None,
            created_at: now_micros,
            last_block_sequence: 0,
            last_clean_shutdown: true,
            unrecoverable: false,
        }
    }

    /// Snapshot the allocator's state into the superblock.
    pub fn capture_allocator(&mut self, allocator: &Allocator) {
        self.next_free_id = allocator.next_id();
        self.free_list_head = allocator.free_list_head();
    }

    /// Rebuild an [`Allocator`] from the superblock's captured state.
    pub fn allocator(&self) -> Allocator {
        Allocator::from_parts(self.next_free_id, self.free_list_head)
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut entries = vec![
            (Value::Text("format_version".into()), Value::Integer(self.format_version.into())),
            (Value::Text("next_free_id".into()), Value::Integer(self.next_free_id.into())),
            (Value::Text("journal_head_sequence".into()), Value::Integer(self.journal_head_sequence.into())),
            (Value::Text("created_at".into()), Value::Integer(self.created_at.into())),
            (Value::Text("last_block_sequence".into()), Value::Integer(self.last_block_sequence.into())),
            (Value::Text("last_clean_shutdown".into()), Value::Bool(self.last_clean_shutdown)),
            (Value::Text("unrecoverable".into()), Value::Bool(self.unrecoverable)),
        ];
        if let Some(head) = self.free_list_head {
            entries.push((Value::Text("free_list_head".into()), Value::Integer(head.into())));
        }
        if let Some(root) = self.document_collections_root {
            entries.push((Value::Text("document_collections_root".into()), Value::Integer(root.into())));
        }
        if let Some(root) = self.edge_collections_root {
            entries.push((Value::Text("edge_collections_root".into()), Value::Integer(root.into())));
        }
        cbor_encode(&Value::Map(entries))
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let value = cbor_decode(bytes)?;
        let Value::Map(entries) = value else {
            return Err(Error::with_message(crate::error::ErrorKind::Io, "superblock payload is not a CBOR map"));
        };
        let get = |key: &str| entries.iter().find(|(k, _)| k.as_text() == Some(key)).map(|(_, v)| v);
        let as_u64 = |v: Option<&Value>| v.and_then(Value::as_integer).and_then(|i| u64::try_from(i).ok());

        Ok(Self {
            format_version: as_u64(get("format_version")).unwrap_or(BLOCK_FORMAT_VERSION as u64) as u16,
            next_free_id: as_u64(get("next_free_id")).unwrap_or(1),
            free_list_head: as_u64(get("free_list_head")),
            journal_head_sequence: as_u64(get("journal_head_sequence")).unwrap_or(0),
            document_collections_root: as_u64(get("document_collections_root")),
            edge_collections_root: as_u64(get("edge_collections_root")),
            created_at: as_u64(get("created_at")).unwrap_or(0),
            last_block_sequence: as_u64(get("last_block_sequence")).unwrap_or(0),
            last_clean_shutdown: get("last_clean_shutdown").and_then(Value::as_bool).unwrap_or(false),
            unrecoverable: get("unrecoverable").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_cbor() {
        let mut sb = Superblock::new(1234);
        sb.document_collections_root = Some(9);
        sb.last_clean_shutdown = false;
        let encoded = sb.to_cbor().unwrap();
        let decoded = Superblock::from_cbor(&encoded).unwrap();
        assert_eq!(sb, decoded);
    }

    #[test]
    fn fresh_superblock_has_no_roots() {
        let sb = Superblock::new(0);
        assert_eq!(sb.document_collections_root, None);
        assert_eq!(sb.edge_collections_root, None);
        assert!(sb.last_clean_shutdown);
    }
}
