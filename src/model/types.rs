//! Collection metadata (§3.4, §11).
//!
//! A collection is a named set of blocks of a single kind. Its binding is
//! itself durable, a `COLLECTION` block (§11), so the name→id table can be
//! rebuilt from a scan the same way the allocator rebuilds its free list
//! when the superblock is stale.

use ciborium::value::Value;

use crate::codec::{cbor_decode, cbor_encode};
use crate::error::{Error, Result};

/// Whether a collection holds documents or edges (§3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Document,
    Edge,
}

impl CollectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Edge => "edge",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "document" => Ok(Self::Document),
            "edge" => Ok(Self::Edge),
            other => Err(Error::with_message(
                crate::error::ErrorKind::InvalidArgument,
                format!("unknown collection kind {other:?}"),
            )),
        }
    }
}

/// Durable collection metadata, the payload of a `COLLECTION` block.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionMeta {
    pub name: String,
    pub kind: CollectionKind,
    pub schema_block_id: Option<u64>,
    pub constraint_block_id: Option<u64>,
    /// Head of this collection's own document/edge chain (§11's "block
    /// chaining"), linked through each member block's `prev_block`.
    pub head_block_id: Option<u64>,
    pub document_count: u64,
}

impl CollectionMeta {
    pub fn new(name: impl Into<String>, kind: CollectionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            schema_block_id: None,
            constraint_block_id: None,
            head_block_id: None,
            document_count: 0,
        }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut entries = vec![
            (Value::Text("name".into()), Value::Text(self.name.clone())),
            (Value::Text("kind".into()), Value::Text(self.kind.as_str().into())),
            (Value::Text("document_count".into()), Value::Integer(self.document_count.into())),
        ];
        if let Some(id) = self.schema_block_id {
            entries.push((Value::Text("schema_block_id".into()), Value::Integer(id.into())));
        }
        if let Some(id) = self.constraint_block_id {
            entries.push((Value::Text("constraint_block_id".into()), Value::Integer(id.into())));
        }
        if let Some(id) = self.head_block_id {
            entries.push((Value::Text("head_block_id".into()), Value::Integer(id.into())));
        }
        cbor_encode(&Value::Map(entries))
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let value = cbor_decode(bytes)?;
        let Value::Map(entries) = value else {
            return Err(Error::invalid_argument("collection metadata is not a CBOR map"));
        };
        let get = |key: &str| entries.iter().find(|(k, _)| k.as_text() == Some(key)).map(|(_, v)| v);
        let as_u64 = |v: Option<&Value>| v.and_then(Value::as_integer).and_then(|i| u64::try_from(i).ok());

        let name = get("name")
            .and_then(Value::as_text)
            .ok_or_else(|| Error::invalid_argument("collection metadata missing name"))?
            .to_string();
        let kind = CollectionKind::from_str(
            get("kind").and_then(Value::as_text).ok_or_else(|| Error::invalid_argument("collection metadata missing kind"))?,
        )?;
        Ok(Self {
            name,
            kind,
            schema_block_id: as_u64(get("schema_block_id")),
            constraint_block_id: as_u64(get("constraint_block_id")),
            head_block_id: as_u64(get("head_block_id")),
            document_count: as_u64(get("document_count")).unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_cbor() {
        let mut meta = CollectionMeta::new("users", CollectionKind::Document);
        meta.schema_block_id = Some(3);
        meta.document_count = 5;
        let bytes = meta.to_cbor().unwrap();
        assert_eq!(CollectionMeta::from_cbor(&bytes).unwrap(), meta);
    }
}
