//! Block header encode/decode (§3.1).
//!
//! The header is a fixed 64-byte little-endian layout preceding every
//! block's payload. `checksum` covers the header (with the checksum field
//! itself zeroed) followed by the payload.

use crate::consts::{BlockFlags, BlockType, BLOCK_FORMAT_VERSION, BLOCK_HEADER_SIZE, BLOCK_MAGIC};
use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Decoded block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u16,
    pub block_type: BlockType,
    pub block_id: u64,
    pub sequence: u64,
    pub created_at: u64,
    pub modified_at: u64,
    pub payload_len: u32,
    pub checksum: u32,
    pub prev_block: u64,
    pub flags: BlockFlags,
}

impl BlockHeader {
    /// Build a fresh header for a first write. `checksum` is left at 0;
    /// callers compute it once the payload bytes are known.
    pub fn new(block_type: BlockType, block_id: u64, sequence: u64, now_micros: u64) -> Self {
        Self {
            version: BLOCK_FORMAT_VERSION,
            block_type,
            block_id,
            sequence,
            created_at: now_micros,
            modified_at: now_micros,
            payload_len: 0,
            checksum: 0,
            prev_block: 0,
            flags: BlockFlags::empty(),
        }
    }

    /// Serialize into the 64-byte on-disk layout.
    pub fn encode(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], BLOCK_MAGIC);
        LittleEndian::write_u16(&mut buf[4..6], self.version);
        LittleEndian::write_u16(&mut buf[6..8], self.block_type as u16);
        LittleEndian::write_u64(&mut buf[8..16], self.block_id);
        LittleEndian::write_u64(&mut buf[16..24], self.sequence);
        LittleEndian::write_u64(&mut buf[24..32], self.created_at);
        LittleEndian::write_u64(&mut buf[32..40], self.modified_at);
        LittleEndian::write_u32(&mut buf[40..44], self.payload_len);
        LittleEndian::write_u32(&mut buf[44..48], self.checksum);
        LittleEndian::write_u64(&mut buf[48..56], self.prev_block);
        LittleEndian::write_u32(&mut buf[56..60], self.flags.bits());
        // buf[60..64] is `reserved`, left zero.
        buf
    }

    /// Parse the 64-byte on-disk layout, validating the magic and block type.
    pub fn decode(buf: &[u8; BLOCK_HEADER_SIZE]) -> Result<Self> {
        let magic = LittleEndian::read_u32(&buf[0..4]);
        if magic != BLOCK_MAGIC {
            return Err(Error::io("block header magic mismatch"));
        }
        let block_type_raw = LittleEndian::read_u16(&buf[6..8]);
        let block_type = BlockType::from_u16(block_type_raw)
            .ok_or_else(|| Error::with_message(crate::error::ErrorKind::Io, format!("unknown block type tag {block_type_raw}")))?;
        let flags_raw = LittleEndian::read_u32(&buf[56..60]);
        Ok(Self {
            version: LittleEndian::read_u16(&buf[4..6]),
            block_type,
            block_id: LittleEndian::read_u64(&buf[8..16]),
            sequence: LittleEndian::read_u64(&buf[16..24]),
            created_at: LittleEndian::read_u64(&buf[24..32]),
            modified_at: LittleEndian::read_u64(&buf[32..40]),
            payload_len: LittleEndian::read_u32(&buf[40..44]),
            checksum: LittleEndian::read_u32(&buf[44..48]),
            prev_block: LittleEndian::read_u64(&buf[48..56]),
            flags: BlockFlags::from_bits_truncate(flags_raw),
        })
    }

    /// Encode with the checksum field zeroed, for checksum computation.
    pub fn encode_for_checksum(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut with_checksum = *self;
        with_checksum.checksum = 0;
        with_checksum.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let mut h = BlockHeader::new(BlockType::Document, 42, 7, 1_000_000);
        h.payload_len = 128;
        h.checksum = 0xdead_beef;
        h.prev_block = 41;
        h.flags = BlockFlags::HAS_PROVENANCE;

        let encoded = h.encode();
        let decoded = BlockHeader::decode(&encoded).unwrap();
        assert_eq!(decoded, h);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = [0u8; BLOCK_HEADER_SIZE];
        assert!(BlockHeader::decode(&buf).is_err());
    }
}
