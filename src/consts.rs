//! Format constants for the block store and journal.
//!
//! These pin down §3.1/§3.3: block geometry, the block-type tag set, the
//! named header flag bits, and the FormDB CBOR tag range.

/// Fixed block size. Every block on disk is exactly this many bytes.
pub const BLOCK_SIZE: usize = 4096;

/// Fixed block header size (leading bytes of every block).
pub const BLOCK_HEADER_SIZE: usize = 64;

/// Maximum payload bytes per block (`BLOCK_SIZE - BLOCK_HEADER_SIZE`).
pub const BLOCK_PAYLOAD_MAX: usize = BLOCK_SIZE - BLOCK_HEADER_SIZE;

/// Magic sentinel identifying a Lithoglyph block, stored little-endian in
/// the header's first 4 bytes: ASCII `LITH`.
pub const BLOCK_MAGIC: u32 = u32::from_le_bytes(*b"LITH");

/// Current on-disk block format version. Increments are additive.
pub const BLOCK_FORMAT_VERSION: u16 = 1;

/// Block id reserved for the superblock. The sole globally unique block.
pub const SUPERBLOCK_ID: u64 = 0;

/// Block kind tag, stored in the header's `type` field.
///
/// A block's type is fixed at first write; a delete sets the `deleted` flag
/// rather than repurposing the block for a different type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum BlockType {
    Superblock = 0,
    Document = 1,
    Edge = 2,
    Journal = 3,
    Schema = 4,
    Constraint = 5,
    Migration = 6,
    Free = 7,
    /// Name→id binding for a collection.
    Collection = 8,
}

impl BlockType {
    /// Decode a raw `type` field value, rejecting unknown tags.
    pub fn from_u16(raw: u16) -> Option<Self> {
        Some(match raw {
            0 => Self::Superblock,
            1 => Self::Document,
            2 => Self::Edge,
            3 => Self::Journal,
            4 => Self::Schema,
            5 => Self::Constraint,
            6 => Self::Migration,
            7 => Self::Free,
            8 => Self::Collection,
            _ => return None,
        })
    }
}

bitflags::bitflags! {
    /// Header flag bits (§3.1). Bits beyond the named ones are reserved
    /// (open question, see `DESIGN.md`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockFlags: u32 {
        const COMPRESSED     = 1 << 0;
        const ENCRYPTED      = 1 << 1;
        const DELETED        = 1 << 2;
        const IMMUTABLE      = 1 << 3;
        const HAS_PROVENANCE = 1 << 4;
    }
}

/// Fixed journal entry header size (§3.3), preceding the three variable
/// CBOR payloads.
pub const JOURNAL_HEADER_SIZE: usize = 48;

bitflags::bitflags! {
    /// Journal entry flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct JournalEntryFlags: u16 {
        /// Forward effects are not (yet, or no longer) fully applied; set
        /// when a commit's block-store phase fails (§4.3 step 3) and
        /// cleared once a compensating entry restores consistency.
        const UNCOMPLETED = 1 << 0;
        /// Inverse payload is the `IRREVERSIBLE` sentinel, not a runnable
        /// operation.
        const IRREVERSIBLE = 1 << 1;
    }
}

/// First CBOR tag in the FormDB-reserved range (§4.1). Tags 39001–39008
/// are reserved; unknown tags within the range must still decode, preserving
/// their raw inner value.
pub const CBOR_TAG_BASE: u64 = 39001;

/// CBOR tag assignments within the FormDB range. Order follows the order
/// they were introduced in (§11), since the source material gives no other
/// ordering signal.
pub mod cbor_tag {
    use super::CBOR_TAG_BASE;

    pub const BLOCK_REFERENCE: u64 = CBOR_TAG_BASE;
    pub const DOCUMENT_ID: u64 = CBOR_TAG_BASE + 1;
    pub const PROVENANCE: u64 = CBOR_TAG_BASE + 2;
    pub const PROMPT_SCORE: u64 = CBOR_TAG_BASE + 3;
    pub const PROOF_REFERENCE: u64 = CBOR_TAG_BASE + 4;
    pub const MIGRATION_REFERENCE: u64 = CBOR_TAG_BASE + 5;
    pub const CONSTRAINT_REFERENCE: u64 = CBOR_TAG_BASE + 6;
    pub const IRREVERSIBILITY_SENTINEL: u64 = CBOR_TAG_BASE + 7;

    /// Highest tag in the reserved range (inclusive).
    pub const MAX: u64 = CBOR_TAG_BASE + 7;

    /// Whether `tag` falls in the FormDB-reserved range.
    pub const fn is_reserved(tag: u64) -> bool {
        tag >= CBOR_TAG_BASE && tag <= MAX
    }
}

/// Default checkpoint threshold: trigger a superblock checkpoint once the
/// journal has accumulated this many bytes since the last one (§6.4).
pub const DEFAULT_JOURNAL_CHECKPOINT_BYTES: u64 = 16 * 1024 * 1024;

/// On-disk file names under the `db_path` directory (§6.2).
pub const BLOCKS_FILE_NAME: &str = "data.blocks";
pub const JOURNAL_FILE_NAME: &str = "data.journal";

/// Magic sentinel at the start of the journal file (§6.2): ASCII `LITHOJNL`.
/// Checked on `db_open` the same way the blocks file's per-block magic is
/// checked; a mismatch means the directory does not hold a Lithoglyph
/// database.
pub const JOURNAL_FILE_MAGIC: u64 = u64::from_le_bytes(*b"LITHOJNL");

/// Size of the journal file's leading magic, before the first entry.
pub const JOURNAL_FILE_HEADER_SIZE: usize = 8;
