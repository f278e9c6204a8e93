//! Operation vocabulary (§4.4): the CBOR shapes carried as a journal entry's
//! forward/inverse payloads, and as the `op_blob` the bridge's `apply`
//! accepts. Each variant is a fully resolved, replayable description of one
//! mutation, ids are assigned at plan time (block ids are cheap to reserve
//! without writing, §4.2), so applying the same `Op` twice during recovery
//! is always the same operation, never a fresh allocation.

use ciborium::value::Value;

use super::types::CollectionKind;
use crate::codec::{cbor_decode, cbor_encode};
use crate::error::{Error, Result};
use crate::journal::OpType;

/// A fully resolved model-layer operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    CollectionCreate { collection_id: u64, name: String, kind: CollectionKind },
    /// Sets the `deleted` flag on the collection's metadata block; its
    /// inverse is `CollectionRestore` (the flag is cleared, not the
    /// metadata rewritten, the bytes never left).
    CollectionDrop { collection_id: u64 },
    CollectionRestore { collection_id: u64 },

    DocInsert { collection_id: u64, doc_id: u64, body: Vec<u8> },
    /// Its own inverse: applying it again with the prior body restores the
    /// pre-image (§4.4's "read current payload to capture it as the
    /// inverse").
    DocUpdate { doc_id: u64, body: Vec<u8> },
    /// Sets the `deleted` flag and decrements the owning collection's
    /// `document_count`; its inverse is `DocUndelete` (flag cleared, count
    /// restored, same convention as `CollectionDrop`/`CollectionRestore`).
    DocDelete { collection_id: u64, doc_id: u64 },
    DocUndelete { collection_id: u64, doc_id: u64 },

    EdgeInsert {
        collection_id: u64,
        edge_id: u64,
        from_collection: String,
        from_id: u64,
        to_collection: String,
        to_id: u64,
        edge_type: String,
        properties: Vec<u8>,
    },
    EdgeUpdate { edge_id: u64, properties: Vec<u8> },
    /// Sets the `deleted` flag and decrements the owning collection's
    /// `document_count`; its inverse is `EdgeUndelete`.
    EdgeDelete { collection_id: u64, edge_id: u64 },
    EdgeUndelete { collection_id: u64, edge_id: u64 },

    SchemaSet { collection_id: u64, schema_block_id: u64, body: Vec<u8> },
    SchemaUnset { collection_id: u64, schema_block_id: u64 },
    ConstraintSet { collection_id: u64, constraint_block_id: u64, body: Vec<u8> },
    ConstraintUnset { collection_id: u64, constraint_block_id: u64 },

    MigrationAnnounce { migration_id: u64, source_collection: String, target_schema: Vec<u8> },
    /// Inverse of `MigrationAnnounce`: marks the announcement record
    /// retracted (flag-clear, same convention as `DocDelete`/`DocUndelete`).
    MigrationAnnounceRevert { migration_id: u64 },
    MigrationShadow { migration_id: u64, shadow_head: u64 },
    /// Inverse of `MigrationShadow`: marks the shadow write retracted. The
    /// shadow blocks themselves stay put; only the record is flagged.
    MigrationShadowRevert { migration_id: u64 },
    MigrationCommit { migration_id: u64, collection_id: u64, new_head: u64, prior_head: u64 },
    /// Inverse of `MigrationCommit`: swaps the collection's head back.
    MigrationRevertCommit { migration_id: u64, collection_id: u64, prior_head: u64 },
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn bytes(b: &[u8]) -> Value {
    Value::Bytes(b.to_vec())
}

fn int(n: u64) -> Value {
    Value::Integer(n.into())
}

fn map(fields: Vec<(&str, Value)>) -> Value {
    Value::Map(fields.into_iter().map(|(k, v)| (text(k), v)).collect())
}

struct Fields<'a>(&'a [(Value, Value)]);

impl<'a> Fields<'a> {
    fn get(&self, key: &str) -> Option<&'a Value> {
        self.0.iter().find(|(k, _)| k.as_text() == Some(key)).map(|(_, v)| v)
    }

    fn text(&self, key: &str) -> Result<String> {
        self.get(key)
            .and_then(Value::as_text)
            .map(str::to_string)
            .ok_or_else(|| Error::with_message(crate::error::ErrorKind::InvalidArgument, format!("op missing field {key:?}")))
    }

    fn u64(&self, key: &str) -> Result<u64> {
        self.get(key)
            .and_then(Value::as_integer)
            .and_then(|i| u64::try_from(i).ok())
            .ok_or_else(|| Error::with_message(crate::error::ErrorKind::InvalidArgument, format!("op missing field {key:?}")))
    }

    fn bytes(&self, key: &str) -> Result<Vec<u8>> {
        self.get(key)
            .and_then(Value::as_bytes)
            .cloned()
            .ok_or_else(|| Error::with_message(crate::error::ErrorKind::InvalidArgument, format!("op missing field {key:?}")))
    }
}

impl Op {
    /// The journal `op_type` this variant is recorded under. Revert/undelete
    /// variants share their forward counterpart's tag, the journal entry
    /// they appear in is itself the inverse payload of that forward op, so
    /// there is no separate "undo" op_type in the header's closed vocabulary
    /// (§3.3 lists thirteen, not twenty-one).
    pub fn op_type(&self) -> OpType {
        match self {
            Op::CollectionCreate { .. } => OpType::CollectionCreate,
            Op::CollectionDrop { .. } | Op::CollectionRestore { .. } => OpType::CollectionDrop,
            Op::DocInsert { .. } => OpType::DocInsert,
            Op::DocUpdate { .. } => OpType::DocUpdate,
            Op::DocDelete { .. } | Op::DocUndelete { .. } => OpType::DocDelete,
            Op::EdgeInsert { .. } => OpType::EdgeInsert,
            Op::EdgeUpdate { .. } => OpType::EdgeUpdate,
            Op::EdgeDelete { .. } | Op::EdgeUndelete { .. } => OpType::EdgeDelete,
            Op::SchemaSet { .. } | Op::SchemaUnset { .. } => OpType::SchemaSet,
            Op::ConstraintSet { .. } | Op::ConstraintUnset { .. } => OpType::ConstraintSet,
            Op::MigrationAnnounce { .. } | Op::MigrationAnnounceRevert { .. } => OpType::MigrationAnnounce,
            Op::MigrationShadow { .. } | Op::MigrationShadowRevert { .. } => OpType::MigrationShadow,
            Op::MigrationCommit { .. } | Op::MigrationRevertCommit { .. } => OpType::MigrationCommit,
        }
    }

    /// The primary block id this op touches, for the journal header's
    /// `affected_block` field (§3.3: "0 if multi-block").
    pub fn affected_block(&self) -> u64 {
        match self {
            Op::CollectionCreate { collection_id, .. }
            | Op::CollectionDrop { collection_id }
            | Op::CollectionRestore { collection_id } => *collection_id,
            Op::DocInsert { doc_id, .. }
            | Op::DocUpdate { doc_id, .. }
            | Op::DocDelete { doc_id, .. }
            | Op::DocUndelete { doc_id, .. } => *doc_id,
            Op::EdgeInsert { edge_id, .. }
            | Op::EdgeUpdate { edge_id, .. }
            | Op::EdgeDelete { edge_id, .. }
            | Op::EdgeUndelete { edge_id, .. } => *edge_id,
            Op::SchemaSet { schema_block_id, .. } | Op::SchemaUnset { schema_block_id, .. } => *schema_block_id,
            Op::ConstraintSet { constraint_block_id, .. } | Op::ConstraintUnset { constraint_block_id, .. } => *constraint_block_id,
            Op::MigrationAnnounce { migration_id, .. }
            | Op::MigrationAnnounceRevert { migration_id }
            | Op::MigrationShadow { migration_id, .. }
            | Op::MigrationShadowRevert { migration_id }
            | Op::MigrationCommit { migration_id, .. }
            | Op::MigrationRevertCommit { migration_id, .. } => *migration_id,
        }
    }

    fn kind_tag(&self) -> &'static str {
        match self {
            Op::CollectionCreate { .. } => "collection_create",
            Op::CollectionDrop { .. } => "collection_drop",
            Op::CollectionRestore { .. } => "collection_restore",
            Op::DocInsert { .. } => "doc_insert",
            Op::DocUpdate { .. } => "doc_update",
            Op::DocDelete { .. } => "doc_delete",
            Op::DocUndelete { .. } => "doc_undelete",
            Op::EdgeInsert { .. } => "edge_insert",
            Op::EdgeUpdate { .. } => "edge_update",
            Op::EdgeDelete { .. } => "edge_delete",
            Op::EdgeUndelete { .. } => "edge_undelete",
            Op::SchemaSet { .. } => "schema_set",
            Op::SchemaUnset { .. } => "schema_unset",
            Op::ConstraintSet { .. } => "constraint_set",
            Op::ConstraintUnset { .. } => "constraint_unset",
            Op::MigrationAnnounce { .. } => "migration_announce",
            Op::MigrationAnnounceRevert { .. } => "migration_announce_revert",
            Op::MigrationShadow { .. } => "migration_shadow",
            Op::MigrationShadowRevert { .. } => "migration_shadow_revert",
            Op::MigrationCommit { .. } => "migration_commit",
            Op::MigrationRevertCommit { .. } => "migration_revert_commit",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let value = match self {
            Op::CollectionCreate { collection_id, name, kind } => map(vec![
                ("op", text(self.kind_tag())),
                ("collection_id", int(*collection_id)),
                ("name", text(name)),
                ("kind", text(kind.as_str())),
            ]),
            Op::CollectionDrop { collection_id } | Op::CollectionRestore { collection_id } => {
                map(vec![("op", text(self.kind_tag())), ("collection_id", int(*collection_id))])
            }
            Op::DocInsert { collection_id, doc_id, body } => map(vec![
                ("op", text(self.kind_tag())),
                ("collection_id", int(*collection_id)),
                ("doc_id", int(*doc_id)),
                ("body", bytes(body)),
            ]),
            Op::DocUpdate { doc_id, body } => {
                map(vec![("op", text(self.kind_tag())), ("doc_id", int(*doc_id)), ("body", bytes(body))])
            }
            Op::DocDelete { collection_id, doc_id } | Op::DocUndelete { collection_id, doc_id } => map(vec![
                ("op", text(self.kind_tag())),
                ("collection_id", int(*collection_id)),
                ("doc_id", int(*doc_id)),
            ]),
            Op::EdgeInsert { collection_id, edge_id, from_collection, from_id, to_collection, to_id, edge_type, properties } => {
                map(vec![
                    ("op", text(self.kind_tag())),
                    ("collection_id", int(*collection_id)),
                    ("edge_id", int(*edge_id)),
                    ("from_collection", text(from_collection)),
                    ("from_id", int(*from_id)),
                    ("to_collection", text(to_collection)),
                    ("to_id", int(*to_id)),
                    ("edge_type", text(edge_type)),
                    ("properties", bytes(properties)),
                ])
            }
            Op::EdgeUpdate { edge_id, properties } => {
                map(vec![("op", text(self.kind_tag())), ("edge_id", int(*edge_id)), ("properties", bytes(properties))])
            }
            Op::EdgeDelete { collection_id, edge_id } | Op::EdgeUndelete { collection_id, edge_id } => map(vec![
                ("op", text(self.kind_tag())),
                ("collection_id", int(*collection_id)),
                ("edge_id", int(*edge_id)),
            ]),
            Op::SchemaSet { collection_id, schema_block_id, body } => map(vec![
                ("op", text(self.kind_tag())),
                ("collection_id", int(*collection_id)),
                ("schema_block_id", int(*schema_block_id)),
                ("body", bytes(body)),
            ]),
            Op::SchemaUnset { collection_id, schema_block_id } => map(vec![
                ("op", text(self.kind_tag())),
                ("collection_id", int(*collection_id)),
                ("schema_block_id", int(*schema_block_id)),
            ]),
            Op::ConstraintSet { collection_id, constraint_block_id, body } => map(vec![
                ("op", text(self.kind_tag())),
                ("collection_id", int(*collection_id)),
                ("constraint_block_id", int(*constraint_block_id)),
                ("body", bytes(body)),
            ]),
            Op::ConstraintUnset { collection_id, constraint_block_id } => map(vec![
                ("op", text(self.kind_tag())),
                ("collection_id", int(*collection_id)),
                ("constraint_block_id", int(*constraint_block_id)),
            ]),
            Op::MigrationAnnounce { migration_id, source_collection, target_schema } => map(vec![
                ("op", text(self.kind_tag())),
                ("migration_id", int(*migration_id)),
                ("source_collection", text(source_collection)),
                ("target_schema", bytes(target_schema)),
            ]),
            Op::MigrationAnnounceRevert { migration_id } => {
                map(vec![("op", text(self.kind_tag())), ("migration_id", int(*migration_id))])
            }
            Op::MigrationShadow { migration_id, shadow_head } => map(vec![
                ("op", text(self.kind_tag())),
                ("migration_id", int(*migration_id)),
                ("shadow_head", int(*shadow_head)),
            ]),
            Op::MigrationShadowRevert { migration_id } => {
                map(vec![("op", text(self.kind_tag())), ("migration_id", int(*migration_id))])
            }
            Op::MigrationCommit { migration_id, collection_id, new_head, prior_head } => map(vec![
                ("op", text(self.kind_tag())),
                ("migration_id", int(*migration_id)),
                ("collection_id", int(*collection_id)),
                ("new_head", int(*new_head)),
                ("prior_head", int(*prior_head)),
            ]),
            Op::MigrationRevertCommit { migration_id, collection_id, prior_head } => map(vec![
                ("op", text(self.kind_tag())),
                ("migration_id", int(*migration_id)),
                ("collection_id", int(*collection_id)),
                ("prior_head", int(*prior_head)),
            ]),
        };
        cbor_encode(&value)
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        let value = cbor_decode(raw)?;
        let Value::Map(entries) = value else {
            return Err(Error::invalid_argument("op payload is not a CBOR map"));
        };
        let f = Fields(&entries);
        let tag = f.text("op")?;
        Ok(match tag.as_str() {
            "collection_create" => Op::CollectionCreate {
                collection_id: f.u64("collection_id")?,
                name: f.text("name")?,
                kind: CollectionKind::from_str(&f.text("kind")?)?,
            },
            "collection_drop" => Op::CollectionDrop { collection_id: f.u64("collection_id")? },
            "collection_restore" => Op::CollectionRestore { collection_id: f.u64("collection_id")? },
            "doc_insert" => Op::DocInsert { collection_id: f.u64("collection_id")?, doc_id: f.u64("doc_id")?, body: f.bytes("body")? },
            "doc_update" => Op::DocUpdate { doc_id: f.u64("doc_id")?, body: f.bytes("body")? },
            "doc_delete" => Op::DocDelete { collection_id: f.u64("collection_id")?, doc_id: f.u64("doc_id")? },
            "doc_undelete" => Op::DocUndelete { collection_id: f.u64("collection_id")?, doc_id: f.u64("doc_id")? },
            "edge_insert" => Op::EdgeInsert {
                collection_id: f.u64("collection_id")?,
                edge_id: f.u64("edge_id")?,
                from_collection: f.text("from_collection")?,
                from_id: f.u64("from_id")?,
                to_collection: f.text("to_collection")?,
                to_id: f.u64("to_id")?,
                edge_type: f.text("edge_type")?,
                properties: f.bytes("properties")?,
            },
            "edge_update" => Op::EdgeUpdate { edge_id: f.u64("edge_id")?, properties: f.bytes("properties")? },
            "edge_delete" => Op::EdgeDelete { collection_id: f.u64("collection_id")?, edge_id: f.u64("edge_id")? },
            "edge_undelete" => Op::EdgeUndelete { collection_id: f.u64("collection_id")?, edge_id: f.u64("edge_id")? },
            "schema_set" => Op::SchemaSet {
                collection_id: f.u64("collection_id")?,
                schema_block_id: f.u64("schema_block_id")?,
                body: f.bytes("body")?,
            },
            "schema_unset" => Op::SchemaUnset { collection_id: f.u64("collection_id")?, schema_block_id: f.u64("schema_block_id")? },
            "constraint_set" => Op::ConstraintSet {
                collection_id: f.u64("collection_id")?,
                constraint_block_id: f.u64("constraint_block_id")?,
                body: f.bytes("body")?,
            },
            "constraint_unset" => {
                Op::ConstraintUnset { collection_id: f.u64("collection_id")?, constraint_block_id: f.u64("constraint_block_id")? }
            }
            "migration_announce" => Op::MigrationAnnounce {
                migration_id: f.u64("migration_id")?,
                source_collection: f.text("source_collection")?,
                target_schema: f.bytes("target_schema")?,
            },
            "migration_announce_revert" => Op::MigrationAnnounceRevert { migration_id: f.u64("migration_id")? },
            "migration_shadow" => Op::MigrationShadow { migration_id: f.u64("migration_id")?, shadow_head: f.u64("shadow_head")? },
            "migration_shadow_revert" => Op::MigrationShadowRevert { migration_id: f.u64("migration_id")? },
            "migration_commit" => Op::MigrationCommit {
                migration_id: f.u64("migration_id")?,
                collection_id: f.u64("collection_id")?,
                new_head: f.u64("new_head")?,
                prior_head: f.u64("prior_head")?,
            },
            "migration_revert_commit" => Op::MigrationRevertCommit {
                migration_id: f.u64("migration_id")?,
                collection_id: f.u64("collection_id")?,
                prior_head: f.u64("prior_head")?,
            },
            other => return Err(Error::with_message(crate::error::ErrorKind::InvalidArgument, format!("unknown op tag {other:?}"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_insert_round_trips() {
        let op = Op::DocInsert { collection_id: 3, doc_id: 9, body: vec![1, 2, 3] };
        let bytes = op.encode().unwrap();
        assert_eq!(Op::decode(&bytes).unwrap(), op);
    }

    #[test]
    fn migration_commit_round_trips() {
        let op = Op::MigrationCommit { migration_id: 1, collection_id: 2, new_head: 10, prior_head: 5 };
        let bytes = op.encode().unwrap();
        assert_eq!(Op::decode(&bytes).unwrap(), op);
    }

    #[test]
    fn undo_variants_share_their_forward_op_type() {
        let insert = Op::DocInsert { collection_id: 1, doc_id: 2, body: vec![] };
        let delete = Op::DocDelete { collection_id: 1, doc_id: 2 };
        let undelete = Op::DocUndelete { collection_id: 1, doc_id: 2 };
        assert_eq!(delete.op_type(), OpType::DocDelete);
        assert_eq!(undelete.op_type(), OpType::DocDelete);
        assert_eq!(insert.affected_block(), 2);
        assert_eq!(delete.affected_block(), 2);
    }

    #[test]
    fn rejects_unknown_op_tag() {
        let value = map(vec![("op", text("not_a_real_op"))]);
        let bytes = cbor_encode(&value).unwrap();
        assert!(Op::decode(&bytes).is_err());
    }
}
