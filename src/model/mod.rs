//! Model layer (§3.4, §4.4, §11): collections, documents, edges, schema,
//! constraints, and migrations, all expressed as journaled block
//! operations. `Model` never writes a block itself; `plan_*` methods work
//! out what would need to change and hand back a forward/inverse [`Op`]
//! pair for the caller to journal first (§4.3's two-phase ordering), and
//! `apply_forward`/`apply_inverse` perform the actual mutation once the
//! journal entry backing it is durable.

mod collection_table;
mod constraint;
mod edge;
mod migration;
mod ops;
mod types;

pub use collection_table::CollectionTable;
pub use constraint::{ConstraintRule, ConstraintSet};
pub use edge::EdgePayload;
pub use migration::{MigrationMeta, MigrationPhase};
pub use ops::Op;
pub use types::{CollectionKind, CollectionMeta};

use crate::block::{BlockDevice, BlockStore};
use crate::consts::{BlockFlags, BlockType};
use crate::error::{Error, ErrorKind, Result};
use crate::journal::Inverse;

/// A planned mutation: the forward op to apply now, and the inverse to
/// journal alongside it so an abort or explicit rollback can undo it.
pub struct Planned {
    pub forward: Op,
    pub inverse: Inverse,
}

fn apply_inverse_of(op: Op) -> Result<Inverse> {
    Ok(Inverse::Apply(op.encode()?))
}

/// Stateless facade over the model operations. Every method takes the
/// block store and collection table it operates on explicitly; ownership
/// of both lives with the transaction manager.
pub struct Model;

impl Model {
    pub fn plan_create_collection<D: BlockDevice>(
        store: &mut BlockStore<D>,
        table: &CollectionTable,
        name: &str,
        kind: CollectionKind,
    ) -> Result<Planned> {
        if table.is_bound(name) {
            return Err(Error::with_message(ErrorKind::ConstraintViolation, format!("collection {name:?} is already bound")));
        }
        let collection_id = store.alloc_block(BlockType::Collection)?;
        let forward = Op::CollectionCreate { collection_id, name: name.to_string(), kind };
        let inverse = apply_inverse_of(Op::CollectionDrop { collection_id })?;
        Ok(Planned { forward, inverse })
    }

    pub fn plan_drop_collection(table: &CollectionTable, name: &str) -> Result<Planned> {
        let (collection_id, _) = table
            .find_by_name(name)
            .ok_or_else(|| Error::with_message(ErrorKind::NotFound, format!("no such collection {name:?}")))?;
        let forward = Op::CollectionDrop { collection_id };
        let inverse = apply_inverse_of(Op::CollectionRestore { collection_id })?;
        Ok(Planned { forward, inverse })
    }

    pub fn plan_insert_document<D: BlockDevice>(
        store: &mut BlockStore<D>,
        table: &CollectionTable,
        collection_name: &str,
        body: &[u8],
    ) -> Result<Planned> {
        let (collection_id, meta) = table
            .find_by_name(collection_name)
            .ok_or_else(|| Error::with_message(ErrorKind::NotFound, format!("no such collection {collection_name:?}")))?;
        if meta.kind != CollectionKind::Document {
            return Err(Error::with_message(ErrorKind::InvalidArgument, format!("collection {collection_name:?} does not hold documents")));
        }
        Self::check_constraints(store, meta, body)?;
        let doc_id = store.alloc_block(BlockType::Document)?;
        let forward = Op::DocInsert { collection_id, doc_id, body: body.to_vec() };
        let inverse = apply_inverse_of(Op::DocDelete { collection_id, doc_id })?;
        Ok(Planned { forward, inverse })
    }

    pub fn plan_update_document<D: BlockDevice>(
        store: &mut BlockStore<D>,
        table: &CollectionTable,
        collection_name: &str,
        doc_id: u64,
        body: &[u8],
    ) -> Result<Planned> {
        let (_, meta) = table
            .find_by_name(collection_name)
            .ok_or_else(|| Error::with_message(ErrorKind::NotFound, format!("no such collection {collection_name:?}")))?;
        Self::check_constraints(store, meta, body)?;
        let old = store.read_block(doc_id)?;
        let forward = Op::DocUpdate { doc_id, body: body.to_vec() };
        let inverse = apply_inverse_of(Op::DocUpdate { doc_id, body: old.payload })?;
        Ok(Planned { forward, inverse })
    }

    pub fn plan_delete_document(table: &CollectionTable, collection_name: &str, doc_id: u64) -> Result<Planned> {
        let (collection_id, _) = table
            .find_by_name(collection_name)
            .ok_or_else(|| Error::with_message(ErrorKind::NotFound, format!("no such collection {collection_name:?}")))?;
        let forward = Op::DocDelete { collection_id, doc_id };
        let inverse = apply_inverse_of(Op::DocUndelete { collection_id, doc_id })?;
        Ok(Planned { forward, inverse })
    }

    pub fn plan_insert_edge<D: BlockDevice>(
        store: &mut BlockStore<D>,
        table: &CollectionTable,
        collection_name: &str,
        edge: EdgePayload,
    ) -> Result<Planned> {
        let (collection_id, meta) = table
            .find_by_name(collection_name)
            .ok_or_else(|| Error::with_message(ErrorKind::NotFound, format!("no such collection {collection_name:?}")))?;
        if meta.kind != CollectionKind::Edge {
            return Err(Error::with_message(ErrorKind::InvalidArgument, format!("collection {collection_name:?} does not hold edges")));
        }
        Self::check_constraints(store, meta, &edge.properties)?;
        let edge_id = store.alloc_block(BlockType::Edge)?;
        let forward = Op::EdgeInsert {
            collection_id,
            edge_id,
            from_collection: edge.from_collection,
            from_id: edge.from_id,
            to_collection: edge.to_collection,
            to_id: edge.to_id,
            edge_type: edge.edge_type,
            properties: edge.properties,
        };
        let inverse = apply_inverse_of(Op::EdgeDelete { collection_id, edge_id })?;
        Ok(Planned { forward, inverse })
    }

    pub fn plan_update_edge<D: BlockDevice>(store: &mut BlockStore<D>, edge_id: u64, properties: &[u8]) -> Result<Planned> {
        let old = store.read_block(edge_id)?;
        let old_edge = EdgePayload::decode(&old.payload)?;
        let forward = Op::EdgeUpdate { edge_id, properties: properties.to_vec() };
        let inverse = apply_inverse_of(Op::EdgeUpdate { edge_id, properties: old_edge.properties })?;
        Ok(Planned { forward, inverse })
    }

    pub fn plan_delete_edge(table: &CollectionTable, collection_name: &str, edge_id: u64) -> Result<Planned> {
        let (collection_id, _) = table
            .find_by_name(collection_name)
            .ok_or_else(|| Error::with_message(ErrorKind::NotFound, format!("no such collection {collection_name:?}")))?;
        let forward = Op::EdgeDelete { collection_id, edge_id };
        let inverse = apply_inverse_of(Op::EdgeUndelete { collection_id, edge_id })?;
        Ok(Planned { forward, inverse })
    }

    pub fn plan_set_schema<D: BlockDevice>(
        store: &mut BlockStore<D>,
        table: &CollectionTable,
        collection_name: &str,
        body: &[u8],
    ) -> Result<Planned> {
        let (collection_id, meta) = table
            .find_by_name(collection_name)
            .ok_or_else(|| Error::with_message(ErrorKind::NotFound, format!("no such collection {collection_name:?}")))?;
        let prior = meta.schema_block_id;
        let schema_block_id = store.alloc_block(BlockType::Schema)?;
        let forward = Op::SchemaSet { collection_id, schema_block_id, body: body.to_vec() };
        let inverse = match prior {
            Some(prior_id) => {
                let prior_body = store.read_block(prior_id)?.payload;
                apply_inverse_of(Op::SchemaSet { collection_id, schema_block_id: prior_id, body: prior_body })?
            }
            None => apply_inverse_of(Op::SchemaUnset { collection_id, schema_block_id })?,
        };
        Ok(Planned { forward, inverse })
    }

    pub fn plan_set_constraint<D: BlockDevice>(
        store: &mut BlockStore<D>,
        table: &CollectionTable,
        collection_name: &str,
        constraints: &ConstraintSet,
    ) -> Result<Planned> {
        let (collection_id, meta) = table
            .find_by_name(collection_name)
            .ok_or_else(|| Error::with_message(ErrorKind::NotFound, format!("no such collection {collection_name:?}")))?;
        let prior = meta.constraint_block_id;
        let body = constraints.to_cbor()?;
        let constraint_block_id = store.alloc_block(BlockType::Constraint)?;
        let forward = Op::ConstraintSet { collection_id, constraint_block_id, body };
        let inverse = match prior {
            Some(prior_id) => {
                let prior_body = store.read_block(prior_id)?.payload;
                apply_inverse_of(Op::ConstraintSet { collection_id, constraint_block_id: prior_id, body: prior_body })?
            }
            None => apply_inverse_of(Op::ConstraintUnset { collection_id, constraint_block_id })?,
        };
        Ok(Planned { forward, inverse })
    }

    pub fn plan_announce_migration<D: BlockDevice>(
        store: &mut BlockStore<D>,
        source_collection: &str,
        target_schema: &[u8],
    ) -> Result<Planned> {
        let migration_id = store.alloc_block(BlockType::Migration)?;
        let forward = Op::MigrationAnnounce { migration_id, source_collection: source_collection.to_string(), target_schema: target_schema.to_vec() };
        let inverse = apply_inverse_of(Op::MigrationAnnounceRevert { migration_id })?;
        Ok(Planned { forward, inverse })
    }

    pub fn plan_shadow_migration<D: BlockDevice>(store: &mut BlockStore<D>, migration_id: u64, shadow_head: u64) -> Result<Planned> {
        // Validate the record exists and is in the right phase before planning.
        let record = store.read_block(migration_id)?;
        MigrationMeta::from_cbor(&record.payload)?;
        let forward = Op::MigrationShadow { migration_id, shadow_head };
        let inverse = apply_inverse_of(Op::MigrationShadowRevert { migration_id })?;
        Ok(Planned { forward, inverse })
    }

    pub fn plan_commit_migration(table: &CollectionTable, migration_id: u64, collection_id: u64, new_head: u64) -> Result<Planned> {
        let meta = table.meta(collection_id)?;
        let prior_head = meta.head_block_id.unwrap_or(0);
        let forward = Op::MigrationCommit { migration_id, collection_id, new_head, prior_head };
        let inverse = apply_inverse_of(Op::MigrationRevertCommit { migration_id, collection_id, prior_head })?;
        Ok(Planned { forward, inverse })
    }

    fn check_constraints<D: BlockDevice>(store: &mut BlockStore<D>, meta: &CollectionMeta, body: &[u8]) -> Result<()> {
        let Some(constraint_block_id) = meta.constraint_block_id else { return Ok(()) };
        let constraint_block = store.read_block(constraint_block_id)?;
        let constraints = ConstraintSet::from_cbor(&constraint_block.payload)?;
        let existing = constraint::collect_live_bodies(store, meta.head_block_id)?;
        constraint::validate(&constraints, body, &existing)
    }

    /// Apply a forward op's block-store effects. Must only be called after
    /// the journal entry carrying it (and its inverse) is durable.
    pub fn apply_forward<D: BlockDevice>(store: &mut BlockStore<D>, table: &mut CollectionTable, op: &Op, now_micros: u64) -> Result<()> {
        match op {
            Op::CollectionCreate { collection_id, name, kind } => {
                let prev = table.chain_head_for(*kind).unwrap_or(0);
                let meta = CollectionMeta::new(name.clone(), *kind);
                store.write_block(*collection_id, BlockType::Collection, prev, BlockFlags::empty(), &meta.to_cbor()?, now_micros)?;
                table.record_created(*collection_id, meta);
            }
            Op::CollectionDrop { collection_id } => {
                Self::set_collection_deleted(store, table, *collection_id, true, now_micros)?;
                table.mark_dropped(*collection_id)?;
            }
            Op::CollectionRestore { collection_id } => {
                Self::set_collection_deleted(store, table, *collection_id, false, now_micros)?;
                table.restore(*collection_id)?;
            }
            Op::DocInsert { collection_id, doc_id, body } => {
                Self::insert_member(store, table, *collection_id, *doc_id, BlockType::Document, body, now_micros)?;
            }
            Op::DocUpdate { doc_id, body } => Self::rewrite_member(store, *doc_id, body, now_micros)?,
            Op::DocDelete { collection_id, doc_id } => Self::set_member_deleted(store, table, *collection_id, *doc_id, true, now_micros)?,
            Op::DocUndelete { collection_id, doc_id } => Self::set_member_deleted(store, table, *collection_id, *doc_id, false, now_micros)?,
            Op::EdgeInsert { collection_id, edge_id, from_collection, from_id, to_collection, to_id, edge_type, properties } => {
                let payload = EdgePayload {
                    from_collection: from_collection.clone(),
                    from_id: *from_id,
                    to_collection: to_collection.clone(),
                    to_id: *to_id,
                    edge_type: edge_type.clone(),
                    properties: properties.clone(),
                }
                .encode()?;
                Self::insert_member(store, table, *collection_id, *edge_id, BlockType::Edge, &payload, now_micros)?;
            }
            Op::EdgeUpdate { edge_id, properties } => {
                let existing = store.read_block(*edge_id)?;
                let mut decoded = EdgePayload::decode(&existing.payload)?;
                decoded.properties = properties.clone();
                Self::rewrite_member(store, *edge_id, &decoded.encode()?, now_micros)?;
            }
            Op::EdgeDelete { collection_id, edge_id } => Self::set_member_deleted(store, table, *collection_id, *edge_id, true, now_micros)?,
            Op::EdgeUndelete { collection_id, edge_id } => Self::set_member_deleted(store, table, *collection_id, *edge_id, false, now_micros)?,
            Op::SchemaSet { collection_id, schema_block_id, body } => {
                store.write_block(*schema_block_id, BlockType::Schema, 0, BlockFlags::empty(), body, now_micros)?;
                let mut meta = table.meta(*collection_id)?.clone();
                meta.schema_block_id = Some(*schema_block_id);
                Self::persist_meta(store, table, *collection_id, meta, now_micros)?;
            }
            Op::SchemaUnset { collection_id, .. } => {
                let mut meta = table.meta(*collection_id)?.clone();
                meta.schema_block_id = None;
                Self::persist_meta(store, table, *collection_id, meta, now_micros)?;
            }
            Op::ConstraintSet { collection_id, constraint_block_id, body } => {
                store.write_block(*constraint_block_id, BlockType::Constraint, 0, BlockFlags::empty(), body, now_micros)?;
                let mut meta = table.meta(*collection_id)?.clone();
                meta.constraint_block_id = Some(*constraint_block_id);
                Self::persist_meta(store, table, *collection_id, meta, now_micros)?;
            }
            Op::ConstraintUnset { collection_id, .. } => {
                let mut meta = table.meta(*collection_id)?.clone();
                meta.constraint_block_id = None;
                Self::persist_meta(store, table, *collection_id, meta, now_micros)?;
            }
            Op::MigrationAnnounce { migration_id, source_collection, target_schema } => {
                let record = MigrationMeta::announce(source_collection.clone(), target_schema.clone());
                store.write_block(*migration_id, BlockType::Migration, 0, BlockFlags::empty(), &record.to_cbor()?, now_micros)?;
            }
            Op::MigrationAnnounceRevert { migration_id } => Self::set_migration_deleted(store, *migration_id, true, now_micros)?,
            Op::MigrationShadow { migration_id, shadow_head } => {
                let record = store.read_block(*migration_id)?;
                let mut meta = MigrationMeta::from_cbor(&record.payload)?;
                meta.phase = MigrationPhase::Shadowed;
                meta.shadow_head = Some(*shadow_head);
                store.write_block(*migration_id, BlockType::Migration, record.header.prev_block, record.header.flags, &meta.to_cbor()?, now_micros)?;
            }
            Op::MigrationShadowRevert { migration_id } => Self::set_migration_deleted(store, *migration_id, true, now_micros)?,
            Op::MigrationCommit { migration_id, collection_id, new_head, .. } => {
                let record = store.read_block(*migration_id)?;
                let mut record_meta = MigrationMeta::from_cbor(&record.payload)?;
                record_meta.phase = MigrationPhase::Committed;
                store.write_block(*migration_id, BlockType::Migration, record.header.prev_block, record.header.flags, &record_meta.to_cbor()?, now_micros)?;
                let mut meta = table.meta(*collection_id)?.clone();
                meta.head_block_id = Some(*new_head);
                Self::persist_meta(store, table, *collection_id, meta, now_micros)?;
            }
            Op::MigrationRevertCommit { collection_id, prior_head, .. } => {
                let mut meta = table.meta(*collection_id)?.clone();
                meta.head_block_id = if *prior_head == 0 { None } else { Some(*prior_head) };
                Self::persist_meta(store, table, *collection_id, meta, now_micros)?;
            }
        }
        Ok(())
    }

    /// Apply an inverse op's effects: structurally identical to applying a
    /// forward op, since every inverse is itself a fully resolved `Op`.
    pub fn apply_inverse<D: BlockDevice>(store: &mut BlockStore<D>, table: &mut CollectionTable, inverse: &Op, now_micros: u64) -> Result<()> {
        Self::apply_forward(store, table, inverse, now_micros)
    }

    /// Rewrite a `COLLECTION` block's bytes to match `meta` and update the
    /// in-memory table to match. Every mutation that touches `CollectionMeta`
    /// fields goes through this so a reload from disk sees the same state
    /// the in-memory table already has, `CollectionTable` is a cache of
    /// what's on disk, never the other way around.
    fn persist_meta<D: BlockDevice>(
        store: &mut BlockStore<D>,
        table: &mut CollectionTable,
        collection_id: u64,
        meta: CollectionMeta,
        now_micros: u64,
    ) -> Result<()> {
        let existing = store.read_block(collection_id)?;
        store.write_block(collection_id, BlockType::Collection, existing.header.prev_block, existing.header.flags, &meta.to_cbor()?, now_micros)?;
        table.update_meta(collection_id, meta);
        Ok(())
    }

    fn insert_member<D: BlockDevice>(
        store: &mut BlockStore<D>,
        table: &mut CollectionTable,
        collection_id: u64,
        member_id: u64,
        block_type: BlockType,
        body: &[u8],
        now_micros: u64,
    ) -> Result<()> {
        let mut meta = table.meta(collection_id)?.clone();
        let prev = meta.head_block_id.unwrap_or(0);
        store.write_block(member_id, block_type, prev, BlockFlags::empty(), body, now_micros)?;
        meta.head_block_id = Some(member_id);
        meta.document_count += 1;
        Self::persist_meta(store, table, collection_id, meta, now_micros)?;
        Ok(())
    }

    fn rewrite_member<D: BlockDevice>(store: &mut BlockStore<D>, member_id: u64, body: &[u8], now_micros: u64) -> Result<()> {
        let existing = store.read_block(member_id)?;
        store.write_block(member_id, existing.header.block_type, existing.header.prev_block, existing.header.flags, body, now_micros)?;
        Ok(())
    }

    /// Flips a document/edge member's `deleted` flag and keeps the owning
    /// collection's `document_count` truthful: decremented when the flag is
    /// set, restored when it's cleared, mirroring `insert_member`'s
    /// increment.
    fn set_member_deleted<D: BlockDevice>(
        store: &mut BlockStore<D>,
        table: &mut CollectionTable,
        collection_id: u64,
        member_id: u64,
        deleted: bool,
        now_micros: u64,
    ) -> Result<()> {
        let existing = store.read_block(member_id)?;
        let mut flags = existing.header.flags;
        flags.set(BlockFlags::DELETED, deleted);
        store.write_block(member_id, existing.header.block_type, existing.header.prev_block, flags, &existing.payload, now_micros)?;

        let mut meta = table.meta(collection_id)?.clone();
        if deleted {
            meta.document_count = meta.document_count.saturating_sub(1);
        } else {
            meta.document_count += 1;
        }
        Self::persist_meta(store, table, collection_id, meta, now_micros)?;
        Ok(())
    }

    fn set_collection_deleted<D: BlockDevice>(
        store: &mut BlockStore<D>,
        table: &CollectionTable,
        collection_id: u64,
        deleted: bool,
        now_micros: u64,
    ) -> Result<()> {
        let _ = table;
        let existing = store.read_block(collection_id)?;
        let mut flags = existing.header.flags;
        flags.set(BlockFlags::DELETED, deleted);
        store.write_block(collection_id, BlockType::Collection, existing.header.prev_block, flags, &existing.payload, now_micros)?;
        Ok(())
    }

    fn set_migration_deleted<D: BlockDevice>(store: &mut BlockStore<D>, migration_id: u64, deleted: bool, now_micros: u64) -> Result<()> {
        let existing = store.read_block(migration_id)?;
        let mut flags = existing.header.flags;
        flags.set(BlockFlags::DELETED, deleted);
        store.write_block(migration_id, BlockType::Migration, existing.header.prev_block, flags, &existing.payload, now_micros)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::FileBlockDevice;

    fn store() -> (tempfile::TempDir, BlockStore<FileBlockDevice>) {
        let dir = tempfile::tempdir().unwrap();
        let dev = FileBlockDevice::open(dir.path().join("blocks"), true).unwrap();
        (dir, BlockStore::new(dev))
    }

    #[test]
    fn create_insert_and_delete_document_round_trip() {
        let (_dir, mut store) = store();
        let mut table = CollectionTable::empty();

        let plan = Model::plan_create_collection(&mut store, &table, "users", CollectionKind::Document).unwrap();
        Model::apply_forward(&mut store, &mut table, &plan.forward, 1).unwrap();
        assert!(table.is_bound("users"));

        let body = crate::codec::cbor_encode(&ciborium::value::Value::Map(vec![(
            ciborium::value::Value::Text("name".into()),
            ciborium::value::Value::Text("ada".into()),
        )]))
        .unwrap();
        let plan = Model::plan_insert_document(&mut store, &table, "users", &body).unwrap();
        let Op::DocInsert { doc_id, .. } = plan.forward else { panic!("expected DocInsert") };
        Model::apply_forward(&mut store, &mut table, &plan.forward, 2).unwrap();
        assert_eq!(table.meta(table.find_by_name("users").unwrap().0).unwrap().document_count, 1);

        let delete = Model::plan_delete_document(&table, "users", doc_id).unwrap();
        Model::apply_forward(&mut store, &mut table, &delete.forward, 3).unwrap();
        let block = store.read_block(doc_id).unwrap();
        assert!(block.header.flags.contains(BlockFlags::DELETED));
        assert_eq!(table.meta(table.find_by_name("users").unwrap().0).unwrap().document_count, 0);

        let Inverse::Apply(inverse_bytes) = delete.inverse else { panic!("expected reversible inverse") };
        let inverse_op = Op::decode(&inverse_bytes).unwrap();
        Model::apply_inverse(&mut store, &mut table, &inverse_op, 4).unwrap();
        let block = store.read_block(doc_id).unwrap();
        assert!(!block.header.flags.contains(BlockFlags::DELETED));
        assert_eq!(table.meta(table.find_by_name("users").unwrap().0).unwrap().document_count, 1);
    }

    #[test]
    fn duplicate_collection_name_is_rejected() {
        let (_dir, mut store) = store();
        let mut table = CollectionTable::empty();
        let plan = Model::plan_create_collection(&mut store, &table, "users", CollectionKind::Document).unwrap();
        Model::apply_forward(&mut store, &mut table, &plan.forward, 1).unwrap();

        let err = Model::plan_create_collection(&mut store, &table, "users", CollectionKind::Document).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    }

    #[test]
    fn required_constraint_rejects_missing_field() {
        let (_dir, mut store) = store();
        let mut table = CollectionTable::empty();
        let plan = Model::plan_create_collection(&mut store, &table, "users", CollectionKind::Document).unwrap();
        Model::apply_forward(&mut store, &mut table, &plan.forward, 1).unwrap();

        let constraints = ConstraintSet { rules: vec![ConstraintRule::Required { field: "email".into() }] };
        let plan = Model::plan_set_constraint(&mut store, &table, "users", &constraints).unwrap();
        Model::apply_forward(&mut store, &mut table, &plan.forward, 2).unwrap();

        let body = crate::codec::cbor_encode(&ciborium::value::Value::Map(vec![(
            ciborium::value::Value::Text("name".into()),
            ciborium::value::Value::Text("ada".into()),
        )]))
        .unwrap();
        let err = Model::plan_insert_document(&mut store, &table, "users", &body).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    }
}
