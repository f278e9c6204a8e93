//! Block store (§4.2): the fixed-size, checksum-verified page store.

use crate::allocator::Allocator;
use crate::codec::crc32c;
use crate::consts::{BlockFlags, BlockType, BLOCK_HEADER_SIZE, BLOCK_PAYLOAD_MAX, BLOCK_SIZE};
use crate::error::{Error, ErrorKind, Result};

use super::cache::{BlockCache, DEFAULT_CACHE_BLOCKS};
use super::device::BlockDevice;
use super::header::BlockHeader;

/// A decoded block: header plus payload bytes (payload length already
/// trimmed to `header.payload_len`).
#[derive(Debug, Clone)]
pub struct Block {
    pub header: BlockHeader,
    pub payload: Vec<u8>,
}

/// The block store: allocation, checksum-verified read/write, and free.
///
/// Generic over [`BlockDevice`] so tests can swap in an in-memory device
/// without touching a filesystem.
pub struct BlockStore<D: BlockDevice> {
    device: D,
    allocator: Allocator,
    sequence: u64,
    cache: BlockCache,
    /// Whether `write_block`/`free_block` fsync the device after writing
    /// (`db_open`'s `fsync_on_commit` option, §6.4).
    fsync: bool,
}

impl<D: BlockDevice> BlockStore<D> {
    /// Wrap a device that already holds a database (superblock at id 0).
    pub fn attach(device: D, allocator: Allocator, sequence: u64) -> Self {
        Self { device, allocator, sequence, cache: BlockCache::new(DEFAULT_CACHE_BLOCKS), fsync: true }
    }

    /// Initialize a brand-new, empty store. Does not write the superblock;
    /// callers (see `crate::db`) do that once to pin down its contents.
    pub fn new(device: D) -> Self {
        Self { device, allocator: Allocator::new(), sequence: 0, cache: BlockCache::new(DEFAULT_CACHE_BLOCKS), fsync: true }
    }

    /// Toggle fsync-on-write (`db_open`'s `fsync_on_commit` option, §6.4).
    pub fn set_fsync(&mut self, enabled: bool) {
        self.fsync = enabled;
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut Allocator {
        &mut self.allocator
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Reserve a fresh block id. Does not write any bytes, §4.2.
    pub fn alloc_block(&mut self, block_type: BlockType) -> Result<u64> {
        let _ = block_type; // kind is chosen at write time; id reservation is kind-agnostic.
        if let Some(head) = self.allocator.take_free_head() {
            // The chained next-free pointer lives in the freed block's
            // first 8 bytes; read it back before handing the id out.
            let mut buf = [0u8; BLOCK_SIZE];
            self.device.read_block(head, &mut buf)?;
            let next = u64::from_le_bytes(buf[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + 8].try_into().unwrap());
            self.allocator.set_free_list_head(if next == 0 { None } else { Some(next) });
            return Ok(head);
        }
        Ok(self.allocator.allocate_new())
    }

    /// Write the full 4096-byte image for `id`: computes the header
    /// checksum and fsyncs. `prev_block` chains this block into a
    /// collection; pass 0 for none.
    pub fn write_block(
        &mut self,
        id: u64,
        block_type: BlockType,
        prev_block: u64,
        flags: BlockFlags,
        payload: &[u8],
        now_micros: u64,
    ) -> Result<BlockHeader> {
        if payload.len() > BLOCK_PAYLOAD_MAX {
            return Err(Error::invalid_argument("payload exceeds 4032-byte block capacity"));
        }

        let sequence = self.next_sequence();
        let mut header = BlockHeader::new(block_type, id, sequence, now_micros);
        header.prev_block = prev_block;
        header.flags = flags;
        header.payload_len = payload.len() as u32;

        let mut image = [0u8; BLOCK_SIZE];
        image[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + payload.len()].copy_from_slice(payload);
        let header_for_checksum = header.encode_for_checksum();
        image[0..BLOCK_HEADER_SIZE].copy_from_slice(&header_for_checksum);
        header.checksum = crc32c(&image);
        image[44..48].copy_from_slice(&header.checksum.to_le_bytes());

        self.device.write_block(id, &image)?;
        if self.fsync {
            self.device.sync()?;
        }
        self.cache.invalidate(id);
        Ok(header)
    }

    /// Read and checksum-verify the block at `id`. Served from the
    /// read-through cache when present; a write or free always invalidates
    /// its entry first, so a cache hit is never stale.
    pub fn read_block(&mut self, id: u64) -> Result<Block> {
        if let Some(cached) = self.cache.get(id) {
            return Ok(cached.clone());
        }

        let mut image = [0u8; BLOCK_SIZE];
        self.device.read_block(id, &mut image)?;

        let header_bytes: [u8; BLOCK_HEADER_SIZE] = image[0..BLOCK_HEADER_SIZE].try_into().unwrap();
        let header = BlockHeader::decode(&header_bytes)?;

        let mut for_checksum = image;
        for_checksum[44..48].fill(0);
        let computed = crc32c(&for_checksum);
        if computed != header.checksum {
            return Err(Error::with_message(
                ErrorKind::Io,
                format!("checksum_mismatch: block {id}"),
            )
            .with_block_refs([id]));
        }

        let payload_len = header.payload_len as usize;
        if payload_len > BLOCK_PAYLOAD_MAX {
            return Err(Error::with_message(ErrorKind::Io, format!("checksum_mismatch: block {id} payload_len corrupt")).with_block_refs([id]));
        }
        let payload = image[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + payload_len].to_vec();

        let block = Block { header, payload };
        self.cache.put(id, block.clone());
        Ok(block)
    }

    /// Mark `id` deleted and return it to the free list. The block's bytes
    /// remain present until compaction (out of scope, §3.4).
    pub fn free_block(&mut self, id: u64, now_micros: u64) -> Result<()> {
        let mut block = self.read_block(id)?;
        block.header.flags |= BlockFlags::DELETED;
        block.header.modified_at = now_micros;

        let mut image = [0u8; BLOCK_SIZE];
        let current_head = self.allocator.free_list_head().unwrap_or(0);
        let mut chained_payload = vec![0u8; 8];
        chained_payload[0..8].copy_from_slice(&current_head.to_le_bytes());

        let header_for_checksum = block.header.encode_for_checksum();
        image[0..BLOCK_HEADER_SIZE].copy_from_slice(&header_for_checksum);
        image[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + 8].copy_from_slice(&chained_payload);
        let mut header = block.header;
        header.payload_len = 8;
        header.checksum = {
            let mut for_checksum = image;
            for_checksum[0..BLOCK_HEADER_SIZE].copy_from_slice(&header.encode_for_checksum());
            crc32c(&for_checksum)
        };
        image[0..BLOCK_HEADER_SIZE].copy_from_slice(&header.encode());

        self.device.write_block(id, &image)?;
        if self.fsync {
            self.device.sync()?;
        }
        self.cache.invalidate(id);
        self.allocator.set_free_list_head(Some(id));
        Ok(())
    }

    /// Reconstruct the free list by scanning every block for the `deleted`
    /// flag, used when the superblock's `last-clean-shutdown` flag is false.
    pub fn rebuild_free_list_from_scan(&mut self) -> Result<()> {
        let count = self.device.block_count();
        let mut head: Option<u64> = None;
        for id in (1..count).rev() {
            let block = match self.read_block(id) {
                Ok(b) => b,
                Err(_) => continue,
            };
            if block.header.flags.contains(BlockFlags::DELETED) {
                let next = head.unwrap_or(0);
                self.overwrite_free_chain(id, next)?;
                head = Some(id);
            }
        }
        self.allocator.set_free_list_head(head);
        Ok(())
    }

    fn overwrite_free_chain(&mut self, id: u64, next: u64) -> Result<()> {
        let mut image = [0u8; BLOCK_SIZE];
        self.device.read_block(id, &mut image)?;
        image[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + 8].copy_from_slice(&next.to_le_bytes());
        self.device.write_block(id, &image)?;
        self.cache.invalidate(id);
        Ok(())
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::device::FileBlockDevice;

    fn store() -> (tempfile::TempDir, BlockStore<FileBlockDevice>) {
        let dir = tempfile::tempdir().unwrap();
        let dev = FileBlockDevice::open(dir.path().join("blocks"), true).unwrap();
        (dir, BlockStore::new(dev))
    }

    #[test]
    fn round_trip_preserves_payload() {
        let (_dir, mut store) = store();
        let id = store.alloc_block(BlockType::Document).unwrap();
        store.write_block(id, BlockType::Document, 0, BlockFlags::empty(), b"hello", 1).unwrap();
        let block = store.read_block(id).unwrap();
        assert_eq!(block.payload, b"hello");
        assert_eq!(block.header.block_id, id);
    }

    #[test]
    fn checksum_mismatch_detected_on_bit_flip() {
        let (dir, mut store) = store();
        let id = store.alloc_block(BlockType::Document).unwrap();
        store.write_block(id, BlockType::Document, 0, BlockFlags::empty(), b"hello", 1).unwrap();
        drop(store);

        // Flip one payload bit directly on disk.
        use std::io::{Read, Seek, SeekFrom, Write};
        let path = dir.path().join("blocks");
        let mut file = std::fs::OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let offset = id * BLOCK_SIZE as u64 + BLOCK_HEADER_SIZE as u64;
        file.seek(SeekFrom::Start(offset)).unwrap();
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte).unwrap();
        byte[0] ^= 0x01;
        file.seek(SeekFrom::Start(offset)).unwrap();
        file.write_all(&byte).unwrap();
        drop(file);

        let dev = FileBlockDevice::open(&path, false).unwrap();
        let mut store = BlockStore::new(dev);
        let err = store.read_block(id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.block_refs(), &[id]);
    }

    #[test]
    fn freed_block_is_reused() {
        let (_dir, mut store) = store();
        let a = store.alloc_block(BlockType::Document).unwrap();
        store.write_block(a, BlockType::Document, 0, BlockFlags::empty(), b"x", 1).unwrap();
        store.free_block(a, 2).unwrap();

        let b = store.alloc_block(BlockType::Document).unwrap();
        assert_eq!(a, b);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::block::device::FileBlockDevice;
    use proptest::prelude::*;

    fn store() -> (tempfile::TempDir, BlockStore<FileBlockDevice>) {
        let dir = tempfile::tempdir().unwrap();
        let dev = FileBlockDevice::open(dir.path().join("blocks"), true).unwrap();
        (dir, BlockStore::new(dev))
    }

    proptest! {
        /// A block written with any payload up to the maximum capacity reads
        /// back byte-for-byte, whatever the content (§4.2's promise that a
        /// block is an opaque byte container to everything below the model
        /// layer).
        #[test]
        fn write_then_read_preserves_arbitrary_payloads(payload in proptest::collection::vec(any::<u8>(), 0..=BLOCK_PAYLOAD_MAX)) {
            let (_dir, mut store) = store();
            let id = store.alloc_block(BlockType::Document).unwrap();
            store.write_block(id, BlockType::Document, 0, BlockFlags::empty(), &payload, 1).unwrap();
            let block = store.read_block(id).unwrap();
            prop_assert_eq!(block.payload, payload);
        }

        /// Flipping any single byte within a written block's on-disk image
        /// is always caught as a checksum mismatch on the next read, the
        /// detection doesn't depend on which byte, or on the payload's
        /// content.
        #[test]
        fn any_single_bit_flip_is_detected(
            payload in proptest::collection::vec(any::<u8>(), 1..256),
            byte_offset in 0usize..BLOCK_SIZE,
            bit in 0u8..8,
        ) {
            use std::io::{Read, Seek, SeekFrom, Write};

            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("blocks");
            let id;
            {
                let dev = FileBlockDevice::open(&path, true).unwrap();
                let mut store = BlockStore::new(dev);
                id = store.alloc_block(BlockType::Document).unwrap();
                store.write_block(id, BlockType::Document, 0, BlockFlags::empty(), &payload, 1).unwrap();
            }

            let offset = id * BLOCK_SIZE as u64 + byte_offset as u64;
            let mut file = std::fs::OpenOptions::new().read(true).write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(offset)).unwrap();
            let mut byte = [0u8; 1];
            file.read_exact(&mut byte).unwrap();
            byte[0] ^= 1 << bit;
            file.seek(SeekFrom::Start(offset)).unwrap();
            file.write_all(&byte).unwrap();
            drop(file);

            let dev = FileBlockDevice::open(&path, false).unwrap();
            let mut store = BlockStore::new(dev);
            // The checksum covers the entire 4096-byte image, header,
            // payload, and zero-padded tail alike, so every offset is
            // observable, including padding past `payload_len`.
            prop_assert!(store.read_block(id).is_err());
        }
    }
}
