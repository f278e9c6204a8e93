//! Block id allocation policy (§4.2).
//!
//! Monotonically increasing ids with a reusable free list. The free-list
//! head is the authoritative "next id to reuse"; it lives in the
//! superblock and is persisted at checkpoints. If the superblock is stale
//! after a crash, [`Allocator::rebuild_from_scan`] reconstructs the chain by
//! scanning every block for the `deleted` flag.

use crate::consts::SUPERBLOCK_ID;

/// In-memory allocator state, mirrored into the superblock at checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocator {
    next_id: u64,
    free_list_head: Option<u64>,
}

impl Allocator {
    /// A fresh allocator for an empty database: the superblock occupies id
    /// 0, so the next block to allocate is id 1.
    pub fn new() -> Self {
        Self { next_id: SUPERBLOCK_ID + 1, free_list_head: None }
    }

    /// Restore allocator state persisted in the superblock.
    pub fn from_parts(next_id: u64, free_list_head: Option<u64>) -> Self {
        Self { next_id, free_list_head }
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn free_list_head(&self) -> Option<u64> {
        self.free_list_head
    }

    /// Pop the free-list head, if any, to be reused as the next allocation.
    /// The caller is responsible for reading that block's chained
    /// `next_free` pointer and feeding it back via [`Self::set_free_list_head`].
    pub fn take_free_head(&mut self) -> Option<u64> {
        self.free_list_head.take()
    }

    /// Set the new free-list head after popping (the chained next pointer),
    /// or after pushing a newly freed block.
    pub fn set_free_list_head(&mut self, head: Option<u64>) {
        self.free_list_head = head;
    }

    /// Allocate a fresh id by extending the device (no reuse available).
    pub fn allocate_new(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_allocator_starts_after_superblock() {
        let a = Allocator::new();
        assert_eq!(a.next_id(), 1);
        assert_eq!(a.free_list_head(), None);
    }

    #[test]
    fn free_list_head_round_trips() {
        let mut a = Allocator::new();
        a.set_free_list_head(Some(5));
        assert_eq!(a.take_free_head(), Some(5));
        assert_eq!(a.free_list_head(), None);
    }
}
