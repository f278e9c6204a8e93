//! Caller-facing request/response vocabulary (§4.7): the shapes `apply`
//! decodes an `op_blob` into and encodes a result blob from. Unlike
//! [`crate::model::Op`] these never carry a caller-assigned block id, the
//! transaction manager resolves those against the live collection table and
//! hands them to [`crate::model::Model`]'s `plan_*` methods, then reports
//! what it resolved back in the [`Response`].

use ciborium::value::Value;

use crate::codec::{cbor_decode, cbor_encode};
use crate::error::{Error, ErrorKind, Result};
use crate::model::{CollectionKind, ConstraintRule, ConstraintSet, EdgePayload};

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
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

    fn required(&self, key: &str) -> Result<&'a Value> {
        self.get(key).ok_or_else(|| Error::with_message(ErrorKind::InvalidArgument, format!("request missing field {key:?}")))
    }

    fn text(&self, key: &str) -> Result<String> {
        self.required(key)?.as_text().map(str::to_string).ok_or_else(|| Error::invalid_argument("field is not text"))
    }

    fn u64(&self, key: &str) -> Result<u64> {
        self.required(key)?
            .as_integer()
            .and_then(|i| u64::try_from(i).ok())
            .ok_or_else(|| Error::invalid_argument("field is not a non-negative integer"))
    }

    fn bytes(&self, key: &str) -> Result<Vec<u8>> {
        self.required(key)?.as_bytes().cloned().ok_or_else(|| Error::invalid_argument("field is not a byte string"))
    }
}

/// A request decoded from an `apply(txn, op_blob)` call's op blob.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    CreateCollection { name: String, kind: CollectionKind },
    DropCollection { name: String },
    InsertDocument { collection: String, body: Vec<u8> },
    UpdateDocument { collection: String, doc_id: u64, body: Vec<u8> },
    DeleteDocument { collection: String, doc_id: u64 },
    InsertEdge { collection: String, edge: EdgePayload },
    UpdateEdge { edge_id: u64, properties: Vec<u8> },
    DeleteEdge { collection: String, edge_id: u64 },
    SetSchema { collection: String, body: Vec<u8> },
    SetConstraint { collection: String, constraints: ConstraintSet },
    AnnounceMigration { source_collection: String, target_schema: Vec<u8> },
    ShadowMigration { migration_id: u64, shadow_head: u64 },
    CommitMigration { migration_id: u64, collection_id: u64, new_head: u64 },
}

fn encode_constraint_rules(rules: &[ConstraintRule]) -> Value {
    Value::Array(
        rules
            .iter()
            .map(|rule| match rule {
                ConstraintRule::Required { field } => {
                    map(vec![("kind", text("required")), ("field", text(field))])
                }
                ConstraintRule::Unique { field } => map(vec![("kind", text("unique")), ("field", text(field))]),
                ConstraintRule::TypeOf { field, expected } => {
                    map(vec![("kind", text("type_of")), ("field", text(field)), ("type", text(expected))])
                }
            })
            .collect(),
    )
}

fn decode_constraint_rules(value: &Value) -> Result<Vec<ConstraintRule>> {
    let Value::Array(items) = value else { return Err(Error::invalid_argument("constraints is not an array")) };
    items
        .iter()
        .map(|item| {
            let Value::Map(entries) = item else { return Err(Error::invalid_argument("constraint rule is not a map")) };
            let f = Fields(entries);
            Ok(match f.text("kind")?.as_str() {
                "required" => ConstraintRule::Required { field: f.text("field")? },
                "unique" => ConstraintRule::Unique { field: f.text("field")? },
                "type_of" => ConstraintRule::TypeOf { field: f.text("field")?, expected: f.text("type")? },
                other => return Err(Error::with_message(ErrorKind::InvalidArgument, format!("unknown constraint rule kind {other:?}"))),
            })
        })
        .collect()
}

impl Request {
    fn op_tag(&self) -> &'static str {
        match self {
            Request::CreateCollection { .. } => "collection_create",
            Request::DropCollection { .. } => "collection_drop",
            Request::InsertDocument { .. } => "doc_insert",
            Request::UpdateDocument { .. } => "doc_update",
            Request::DeleteDocument { .. } => "doc_delete",
            Request::InsertEdge { .. } => "edge_insert",
            Request::UpdateEdge { .. } => "edge_update",
            Request::DeleteEdge { .. } => "edge_delete",
            Request::SetSchema { .. } => "schema_set",
            Request::SetConstraint { .. } => "constraint_set",
            Request::AnnounceMigration { .. } => "migration_announce",
            Request::ShadowMigration { .. } => "migration_shadow",
            Request::CommitMigration { .. } => "migration_commit",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let value = match self {
            Request::CreateCollection { name, kind } => {
                map(vec![("op", text(self.op_tag())), ("name", text(name)), ("kind", text(kind.as_str()))])
            }
            Request::DropCollection { name } => map(vec![("op", text(self.op_tag())), ("name", text(name))]),
            Request::InsertDocument { collection, body } => {
                map(vec![("op", text(self.op_tag())), ("collection", text(collection)), ("body", Value::Bytes(body.clone()))])
            }
            Request::UpdateDocument { collection, doc_id, body } => map(vec![
                ("op", text(self.op_tag())),
                ("collection", text(collection)),
                ("doc_id", int(*doc_id)),
                ("body", Value::Bytes(body.clone())),
            ]),
            Request::DeleteDocument { collection, doc_id } => {
                map(vec![("op", text(self.op_tag())), ("collection", text(collection)), ("doc_id", int(*doc_id))])
            }
            Request::InsertEdge { collection, edge } => map(vec![
                ("op", text(self.op_tag())),
                ("collection", text(collection)),
                ("from_collection", text(&edge.from_collection)),
                ("from_id", int(edge.from_id)),
                ("to_collection", text(&edge.to_collection)),
                ("to_id", int(edge.to_id)),
                ("edge_type", text(&edge.edge_type)),
                ("properties", Value::Bytes(edge.properties.clone())),
            ]),
            Request::UpdateEdge { edge_id, properties } => {
                map(vec![("op", text(self.op_tag())), ("edge_id", int(*edge_id)), ("properties", Value::Bytes(properties.clone()))])
            }
            Request::DeleteEdge { collection, edge_id } => {
                map(vec![("op", text(self.op_tag())), ("collection", text(collection)), ("edge_id", int(*edge_id))])
            }
            Request::SetSchema { collection, body } => {
                map(vec![("op", text(self.op_tag())), ("collection", text(collection)), ("body", Value::Bytes(body.clone()))])
            }
            Request::SetConstraint { collection, constraints } => map(vec![
                ("op", text(self.op_tag())),
                ("collection", text(collection)),
                ("constraints", encode_constraint_rules(&constraints.rules)),
            ]),
            Request::AnnounceMigration { source_collection, target_schema } => map(vec![
                ("op", text(self.op_tag())),
                ("source_collection", text(source_collection)),
                ("target_schema", Value::Bytes(target_schema.clone())),
            ]),
            Request::ShadowMigration { migration_id, shadow_head } => {
                map(vec![("op", text(self.op_tag())), ("migration_id", int(*migration_id)), ("shadow_head", int(*shadow_head))])
            }
            Request::CommitMigration { migration_id, collection_id, new_head } => map(vec![
                ("op", text(self.op_tag())),
                ("migration_id", int(*migration_id)),
                ("collection_id", int(*collection_id)),
                ("new_head", int(*new_head)),
            ]),
        };
        cbor_encode(&value)
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        let value = cbor_decode(raw)?;
        let Value::Map(entries) = value else { return Err(Error::invalid_argument("op blob is not a CBOR map")) };
        let f = Fields(&entries);
        let tag = f.text("op")?;
        Ok(match tag.as_str() {
            "collection_create" => Request::CreateCollection { name: f.text("name")?, kind: CollectionKind::from_str(&f.text("kind")?)? },
            "collection_drop" => Request::DropCollection { name: f.text("name")? },
            "doc_insert" => Request::InsertDocument { collection: f.text("collection")?, body: f.bytes("body")? },
            "doc_update" => Request::UpdateDocument { collection: f.text("collection")?, doc_id: f.u64("doc_id")?, body: f.bytes("body")? },
            "doc_delete" => Request::DeleteDocument { collection: f.text("collection")?, doc_id: f.u64("doc_id")? },
            "edge_insert" => Request::InsertEdge {
                collection: f.text("collection")?,
                edge: EdgePayload {
                    from_collection: f.text("from_collection")?,
                    from_id: f.u64("from_id")?,
                    to_collection: f.text("to_collection")?,
                    to_id: f.u64("to_id")?,
                    edge_type: f.text("edge_type")?,
                    properties: f.bytes("properties")?,
                },
            },
            "edge_update" => Request::UpdateEdge { edge_id: f.u64("edge_id")?, properties: f.bytes("properties")? },
            "edge_delete" => Request::DeleteEdge { collection: f.text("collection")?, edge_id: f.u64("edge_id")? },
            "schema_set" => Request::SetSchema { collection: f.text("collection")?, body: f.bytes("body")? },
            "constraint_set" => Request::SetConstraint {
                collection: f.text("collection")?,
                constraints: ConstraintSet { rules: decode_constraint_rules(f.required("constraints")?)? },
            },
            "migration_announce" => {
                Request::AnnounceMigration { source_collection: f.text("source_collection")?, target_schema: f.bytes("target_schema")? }
            }
            "migration_shadow" => Request::ShadowMigration { migration_id: f.u64("migration_id")?, shadow_head: f.u64("shadow_head")? },
            "migration_commit" => Request::CommitMigration {
                migration_id: f.u64("migration_id")?,
                collection_id: f.u64("collection_id")?,
                new_head: f.u64("new_head")?,
            },
            other => return Err(Error::with_message(ErrorKind::InvalidArgument, format!("unknown op tag {other:?}"))),
        })
    }
}

/// The result of a successfully applied [`Request`], returned as `apply`'s
/// result blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    CollectionCreated { collection_id: u64 },
    CollectionDropped,
    DocumentInserted { doc_id: u64 },
    DocumentUpdated,
    DocumentDeleted,
    EdgeInserted { edge_id: u64 },
    EdgeUpdated,
    EdgeDeleted,
    SchemaSet { schema_block_id: u64 },
    ConstraintSet { constraint_block_id: u64 },
    MigrationAnnounced { migration_id: u64 },
    MigrationShadowed,
    MigrationCommitted,
}

impl Response {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let value = match self {
            Response::CollectionCreated { collection_id } => map(vec![("collection_id", int(*collection_id))]),
            Response::CollectionDropped => map(vec![]),
            Response::DocumentInserted { doc_id } => map(vec![("doc_id", int(*doc_id))]),
            Response::DocumentUpdated => map(vec![]),
            Response::DocumentDeleted => map(vec![]),
            Response::EdgeInserted { edge_id } => map(vec![("edge_id", int(*edge_id))]),
            Response::EdgeUpdated => map(vec![]),
            Response::EdgeDeleted => map(vec![]),
            Response::SchemaSet { schema_block_id } => map(vec![("schema_block_id", int(*schema_block_id))]),
            Response::ConstraintSet { constraint_block_id } => map(vec![("constraint_block_id", int(*constraint_block_id))]),
            Response::MigrationAnnounced { migration_id } => map(vec![("migration_id", int(*migration_id))]),
            Response::MigrationShadowed => map(vec![]),
            Response::MigrationCommitted => map(vec![]),
        };
        cbor_encode(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_collection_round_trips() {
        let req = Request::CreateCollection { name: "users".into(), kind: CollectionKind::Document };
        let bytes = req.encode().unwrap();
        assert_eq!(Request::decode(&bytes).unwrap(), req);
    }

    #[test]
    fn set_constraint_round_trips() {
        let req = Request::SetConstraint {
            collection: "users".into(),
            constraints: ConstraintSet { rules: vec![ConstraintRule::Required { field: "email".into() }] },
        };
        let bytes = req.encode().unwrap();
        assert_eq!(Request::decode(&bytes).unwrap(), req);
    }

    #[test]
    fn rejects_unknown_op_tag() {
        let bytes = cbor_encode(&map(vec![("op", text("not_a_real_op"))])).unwrap();
        assert!(Request::decode(&bytes).is_err());
    }
}
