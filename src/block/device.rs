//! Block device abstraction.
//!
//! [`BlockDevice`] is the seam between the block store and durable storage:
//! a fixed-size, whole-block read/write interface with an explicit `sync`.
//! The default
//! implementation, [`FileBlockDevice`], backs a `BlockDevice` with a single
//! growable file (`data.blocks`, §6.2).

use crate::consts::BLOCK_SIZE;
use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// A whole-block, fixed-size storage device.
///
/// Implementors need not provide their own checksums or partial-write
/// detection, the block store layer above handles that, but a `read_block`
/// that returns fewer than `BLOCK_SIZE` bytes for an allocated block is
/// itself a detectable-on-next-read partial write, exactly as §4.2 requires.
pub trait BlockDevice: Send {
    /// Read the block at `id` into `buf`.
    fn read_block(&mut self, id: u64, buf: &mut [u8; BLOCK_SIZE]) -> Result<()>;

    /// Write `buf` as the block at `id`, extending the device if `id` is
    /// one past the current end.
    fn write_block(&mut self, id: u64, buf: &[u8; BLOCK_SIZE]) -> Result<()>;

    /// Number of blocks currently allocated on the device (including holes).
    fn block_count(&self) -> u64;

    /// Flush all writes to durable storage.
    fn sync(&mut self) -> Result<()>;
}

/// A single-file, append-or-overwrite block device.
pub struct FileBlockDevice {
    file: File,
    block_count: u64,
}

impl FileBlockDevice {
    /// Open (creating if necessary) the blocks file at `path`.
    pub fn open(path: impl AsRef<Path>, allow_create: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(allow_create)
            .open(path)?;
        let len = file.metadata()?.len();
        let block_count = len / BLOCK_SIZE as u64;
        Ok(Self { file, block_count })
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_block(&mut self, id: u64, buf: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        if id >= self.block_count {
            return Err(Error::not_found("block id beyond end of device"));
        }
        self.file.seek(SeekFrom::Start(id * BLOCK_SIZE as u64))?;
        self.file.read_exact(buf).map_err(|_| {
            Error::with_message(
                crate::error::ErrorKind::Io,
                format!("short read for block {id}: checksum_mismatch"),
            )
        })?;
        Ok(())
    }

    fn write_block(&mut self, id: u64, buf: &[u8; BLOCK_SIZE]) -> Result<()> {
        self.file.seek(SeekFrom::Start(id * BLOCK_SIZE as u64))?;
        self.file.write_all(buf)?;
        if id >= self.block_count {
            self.block_count = id + 1;
        }
        Ok(())
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut dev = FileBlockDevice::open(dir.path().join("blocks"), true).unwrap();
        let mut buf = [0u8; BLOCK_SIZE];
        buf[0] = 0xab;
        dev.write_block(0, &buf).unwrap();
        assert_eq!(dev.block_count(), 1);

        let mut read_back = [0u8; BLOCK_SIZE];
        dev.read_block(0, &mut read_back).unwrap();
        assert_eq!(read_back, buf);
    }

    #[test]
    fn read_past_end_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut dev = FileBlockDevice::open(dir.path().join("blocks"), true).unwrap();
        let mut buf = [0u8; BLOCK_SIZE];
        assert!(dev.read_block(0, &mut buf).is_err());
    }
}
