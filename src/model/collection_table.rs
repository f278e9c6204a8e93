//! In-memory collection index (§4.4): an ordered list with a name lookup,
//! rebuilt at `db_open` from the `COLLECTION` block chains rooted in the
//! superblock (§11), the same way the block store's free list is rebuilt by
//! scanning when the superblock is stale.

use std::collections::HashMap;

use crate::block::{BlockDevice, BlockStore};
use crate::error::{Error, Result};

use super::types::{CollectionKind, CollectionMeta};

/// Ordered, name-indexed view over every `COLLECTION` block reachable from
/// the two per-kind chain roots.
#[derive(Debug, Default)]
pub struct CollectionTable {
    /// Collection block ids in insertion order (oldest first).
    order: Vec<u64>,
    by_name: HashMap<String, u64>,
    metas: HashMap<u64, CollectionMeta>,
    pub document_chain_head: Option<u64>,
    pub edge_chain_head: Option<u64>,
}

impl CollectionTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Rebuild the table by walking both chains from their roots. Blocks
    /// with the `deleted` flag set are kept out of the name index (so a
    /// dropped name can be reused) but remain part of the insertion-ordered
    /// list for introspection/audit purposes.
    pub fn load<D: BlockDevice>(
        store: &mut BlockStore<D>,
        document_chain_head: Option<u64>,
        edge_chain_head: Option<u64>,
    ) -> Result<Self> {
        let mut table = Self {
            document_chain_head,
            edge_chain_head,
            ..Self::default()
        };
        let mut reversed = Vec::new();
        for root in [document_chain_head, edge_chain_head] {
            let mut next = root;
            while let Some(id) = next {
                let block = store.read_block(id)?;
                next = if block.header.prev_block == 0 { None } else { Some(block.header.prev_block) };
                reversed.push((id, block));
            }
        }
        reversed.reverse();
        for (id, block) in reversed {
            let meta = CollectionMeta::from_cbor(&block.payload)?;
            table.order.push(id);
            if !block.header.flags.contains(crate::consts::BlockFlags::DELETED) {
                table.by_name.insert(meta.name.clone(), id);
            }
            table.metas.insert(id, meta);
        }
        Ok(table)
    }

    pub fn find_by_name(&self, name: &str) -> Option<(u64, &CollectionMeta)> {
        self.by_name.get(name).map(|id| (*id, &self.metas[id]))
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn meta(&self, collection_id: u64) -> Result<&CollectionMeta> {
        self.metas.get(&collection_id).ok_or_else(|| Error::not_found("no such collection block").with_block_refs([collection_id]))
    }

    pub fn chain_head_for(&self, kind: CollectionKind) -> Option<u64> {
        match kind {
            CollectionKind::Document => self.document_chain_head,
            CollectionKind::Edge => self.edge_chain_head,
        }
    }

    /// Register a freshly created collection and advance its kind's chain
    /// head. Call only after the block has actually been written.
    pub fn record_created(&mut self, collection_id: u64, meta: CollectionMeta) {
        let head = match meta.kind {
            CollectionKind::Document => &mut self.document_chain_head,
            CollectionKind::Edge => &mut self.edge_chain_head,
        };
        *head = Some(collection_id);
        self.order.push(collection_id);
        self.by_name.insert(meta.name.clone(), collection_id);
        self.metas.insert(collection_id, meta);
    }

    pub fn mark_dropped(&mut self, collection_id: u64) -> Result<()> {
        let meta = self.meta(collection_id)?.clone();
        self.by_name.remove(&meta.name);
        Ok(())
    }

    pub fn restore(&mut self, collection_id: u64) -> Result<()> {
        let meta = self.meta(collection_id)?.clone();
        self.by_name.insert(meta.name.clone(), collection_id);
        Ok(())
    }

    pub fn update_meta(&mut self, collection_id: u64, meta: CollectionMeta) {
        self.metas.insert(collection_id, meta);
    }

    /// Every live (non-dropped) collection, in insertion order.
    pub fn iter_live(&self) -> impl Iterator<Item = (u64, &CollectionMeta)> {
        self.order.iter().filter_map(move |id| {
            let meta = &self.metas[id];
            self.by_name.get(&meta.name).filter(|bound_id| *bound_id == id).map(|_| (*id, meta))
        })
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::FileBlockDevice;
    use crate::consts::{BlockFlags, BlockType};

    fn store() -> (tempfile::TempDir, BlockStore<FileBlockDevice>) {
        let dir = tempfile::tempdir().unwrap();
        let dev = FileBlockDevice::open(dir.path().join("blocks"), true).unwrap();
        (dir, BlockStore::new(dev))
    }

    #[test]
    fn load_rebuilds_insertion_order_from_chain() {
        let (_dir, mut store) = store();
        let meta_a = CollectionMeta::new("a", CollectionKind::Document);
        let id_a = store.alloc_block(BlockType::Collection).unwrap();
        store.write_block(id_a, BlockType::Collection, 0, BlockFlags::empty(), &meta_a.to_cbor().unwrap(), 1).unwrap();

        let meta_b = CollectionMeta::new("b", CollectionKind::Document);
        let id_b = store.alloc_block(BlockType::Collection).unwrap();
        store.write_block(id_b, BlockType::Collection, id_a, BlockFlags::empty(), &meta_b.to_cbor().unwrap(), 2).unwrap();

        let table = CollectionTable::load(&mut store, Some(id_b), None).unwrap();
        assert!(table.find_by_name("a").is_some());
        assert!(table.find_by_name("b").is_some());
        assert_eq!(table.document_chain_head, Some(id_b));
    }

    #[test]
    fn dropped_collection_is_excluded_from_name_lookup() {
        let (_dir, mut store) = store();
        let meta = CollectionMeta::new("a", CollectionKind::Document);
        let id = store.alloc_block(BlockType::Collection).unwrap();
        store.write_block(id, BlockType::Collection, 0, BlockFlags::DELETED, &meta.to_cbor().unwrap(), 1).unwrap();

        let table = CollectionTable::load(&mut store, Some(id), None).unwrap();
        assert!(table.find_by_name("a").is_none());
    }
}
