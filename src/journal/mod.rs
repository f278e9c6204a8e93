//! Append-only journal (§3.3, §4.3): the sequenced entry log that every
//! mutation passes through before the block store is touched.
//!
//! Shaped like a JBD2-style journal, a single append-only log file, a
//! commit that must land before the "real" data does, and a recovery pass
//! that replays the tail on next open, but built against CBOR entries and
//! a forward/inverse/provenance payload triple instead of JBD2's
//! descriptor/commit/revoke block trio.

mod entry;
mod types;

pub use entry::EntryBuilder;
pub use types::{Inverse, JournalEntryHeader, OpType, Provenance};

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::codec::crc32c;
use crate::consts::{JournalEntryFlags, JOURNAL_FILE_HEADER_SIZE, JOURNAL_FILE_MAGIC, JOURNAL_HEADER_SIZE};
use crate::error::{Error, ErrorKind, Result};

/// A fully decoded journal entry, as produced by a scan.
#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub header: JournalEntryHeader,
    pub forward: Vec<u8>,
    pub inverse: Inverse,
    pub provenance: Provenance,
    /// Byte offset of this entry's header within the journal file, kept so
    /// [`Journal::mark_uncompleted`] can amend the flags bit in place.
    offset: u64,
}

impl JournalEntry {
    pub fn sequence(&self) -> u64 {
        self.header.sequence
    }

    pub fn op_type(&self) -> Result<OpType> {
        OpType::from_u16(self.header.op_type)
    }

    pub fn is_uncompleted(&self) -> bool {
        self.header.flags.contains(JournalEntryFlags::UNCOMPLETED)
    }
}

/// The journal: an append-only file of variable-length entries, plus the
/// in-memory bookkeeping (next sequence, offset index) needed to commit new
/// ones and amend flags on already-written ones.
pub struct Journal {
    file: File,
    tail: u64,
    next_sequence: u64,
    /// sequence -> file offset, populated by `open`'s initial scan and kept
    /// current as entries are appended.
    offsets: HashMap<u64, u64>,
    /// Whether `commit_entry`/`mark_uncompleted` fsync after writing
    /// (`db_open`'s `fsync_on_commit` option, §6.4). Weaker durability in
    /// exchange for faster commits when disabled.
    fsync: bool,
}

impl Journal {
    /// Open (creating if `allow_create`) the journal file at `path`, scanning
    /// it to recover the tail offset and next sequence number.
    pub fn open(path: impl AsRef<Path>, allow_create: bool) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let existed = path.exists();
        if !existed && !allow_create {
            return Err(Error::io("journal file missing and allow_create is false"));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(allow_create)
            .open(&path)?;

        if !existed {
            file.write_all(&JOURNAL_FILE_MAGIC.to_le_bytes())?;
            file.sync_all()?;
        } else {
            let mut magic_buf = [0u8; JOURNAL_FILE_HEADER_SIZE];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut magic_buf).map_err(|_| Error::io("journal file shorter than its magic header"))?;
            if u64::from_le_bytes(magic_buf) != JOURNAL_FILE_MAGIC {
                return Err(Error::io("journal file magic mismatch"));
            }
        }

        let mut journal = Self {
            file,
            tail: JOURNAL_FILE_HEADER_SIZE as u64,
            next_sequence: 1,
            offsets: HashMap::new(),
            fsync: true,
        };
        let entries = journal.scan_from_offset(JOURNAL_FILE_HEADER_SIZE as u64)?;
        if let Some(last) = entries.last() {
            journal.next_sequence = last.header.sequence + 1;
        }
        Ok(journal)
    }

    /// Begin building a new entry. Nothing is written until [`Self::commit_entry`].
    pub fn begin_entry(&self, op_type: OpType, affected_block: u64) -> EntryBuilder {
        EntryBuilder::new(op_type, affected_block)
    }

    /// Discard an in-flight builder without writing anything.
    pub fn rollback_entry(&self, _builder: EntryBuilder) {}

    /// Toggle fsync-on-commit (`db_open`'s `fsync_on_commit` option, §6.4).
    /// Defaults to `true`; disabling trades durability for throughput.
    pub fn set_fsync(&mut self, enabled: bool) {
        self.fsync = enabled;
    }

    /// Write and fsync a completed entry (§4.3 step 1). Returns its sequence
    /// number. The caller is responsible for applying the forward payload's
    /// block-store effects afterward (step 2) and calling
    /// [`Self::mark_uncompleted`] if that application fails (step 3).
    pub fn commit_entry(&mut self, builder: EntryBuilder, now_micros: u64) -> Result<u64> {
        let (op_type, affected_block, forward, inverse, provenance) = builder.into_parts()?;

        // Validates the mandatory actor/rationale fields before anything is
        // durable (§3.3's provenance requirement).
        Provenance::from_cbor(&provenance)?;
        let inverse_bytes = inverse.to_cbor()?;

        let sequence = self.next_sequence;
        let mut flags = JournalEntryFlags::empty();
        if inverse.is_irreversible() {
            flags |= JournalEntryFlags::IRREVERSIBLE;
        }

        let entry_len = JOURNAL_HEADER_SIZE + forward.len() + inverse_bytes.len() + provenance.len();
        let mut header = JournalEntryHeader {
            sequence,
            timestamp: now_micros,
            op_type: op_type as u16,
            flags,
            forward_len: forward.len() as u32,
            inverse_len: inverse_bytes.len() as u32,
            provenance_len: provenance.len() as u32,
            affected_block,
            checksum: 0,
            entry_len: entry_len as u32,
        };

        let mut buf = Vec::with_capacity(entry_len);
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(&forward);
        buf.extend_from_slice(&inverse_bytes);
        buf.extend_from_slice(&provenance);
        header.checksum = crc32c(&buf);
        buf[40..44].copy_from_slice(&header.checksum.to_le_bytes());

        let offset = self.tail;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&buf)?;
        if self.fsync {
            self.file.sync_data()?;
        }

        self.tail = offset + buf.len() as u64;
        self.next_sequence += 1;
        self.offsets.insert(sequence, offset);
        Ok(sequence)
    }

    /// Amend an already-written entry's flags bit in place (§4.3 step 3).
    /// The header is rewritten (and its checksum recomputed) but the
    /// payload bytes that follow it never move, the log stays append-only
    /// in content even though one header is touched after the fact.
    pub fn mark_uncompleted(&mut self, sequence: u64) -> Result<()> {
        let offset = *self.offsets.get(&sequence).ok_or_else(|| Error::not_found("no such journal sequence"))?;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut header_buf = [0u8; JOURNAL_HEADER_SIZE];
        self.file.read_exact(&mut header_buf)?;
        let mut header = JournalEntryHeader::decode(&header_buf);
        header.flags |= JournalEntryFlags::UNCOMPLETED;

        let payload_len = header.forward_len as usize + header.inverse_len as usize + header.provenance_len as usize;
        let mut payload = vec![0u8; payload_len];
        self.file.read_exact(&mut payload)?;

        let mut buf = Vec::with_capacity(JOURNAL_HEADER_SIZE + payload_len);
        header.checksum = 0;
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(&payload);
        header.checksum = crc32c(&buf);
        buf[40..44].copy_from_slice(&header.checksum.to_le_bytes());

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&buf)?;
        if self.fsync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Scan every entry from `since_offset` to the current end of file.
    /// Stops (without erroring) at the first entry whose checksum fails to
    /// validate, that marks a torn tail write, not a corrupt log (§8.7).
    fn scan_from_offset(&mut self, since_offset: u64) -> Result<Vec<JournalEntry>> {
        let len = self.file.metadata()?.len();
        let mut offset = since_offset;
        let mut entries = Vec::new();

        while offset + JOURNAL_HEADER_SIZE as u64 <= len {
            self.file.seek(SeekFrom::Start(offset))?;
            let mut header_buf = [0u8; JOURNAL_HEADER_SIZE];
            if self.file.read_exact(&mut header_buf).is_err() {
                break;
            }
            let header = JournalEntryHeader::decode(&header_buf);
            let payload_len = header.forward_len as u64 + header.inverse_len as u64 + header.provenance_len as u64;
            let declared_len = JOURNAL_HEADER_SIZE as u64 + payload_len;
            if declared_len != header.entry_len as u64 || offset + declared_len > len {
                break;
            }

            let mut forward = vec![0u8; header.forward_len as usize];
            let mut inverse_bytes = vec![0u8; header.inverse_len as usize];
            let mut provenance_bytes = vec![0u8; header.provenance_len as usize];
            self.file.read_exact(&mut forward)?;
            self.file.read_exact(&mut inverse_bytes)?;
            self.file.read_exact(&mut provenance_bytes)?;

            let mut for_checksum = Vec::with_capacity(declared_len as usize);
            let mut header_for_checksum = header;
            header_for_checksum.checksum = 0;
            for_checksum.extend_from_slice(&header_for_checksum.encode());
            for_checksum.extend_from_slice(&forward);
            for_checksum.extend_from_slice(&inverse_bytes);
            for_checksum.extend_from_slice(&provenance_bytes);
            if crc32c(&for_checksum) != header.checksum {
                break;
            }

            let inverse = Inverse::from_cbor(&inverse_bytes)?;
            let provenance = Provenance::from_cbor(&provenance_bytes)?;
            self.offsets.insert(header.sequence, offset);
            entries.push(JournalEntry { header, forward, inverse, provenance, offset });
            offset += declared_len;
        }

        self.tail = offset;
        Ok(entries)
    }

    /// All entries currently in the log, in sequence order. Used for crash
    /// recovery at `db_open` time.
    pub fn scan_all(&mut self) -> Result<Vec<JournalEntry>> {
        self.scan_from_offset(JOURNAL_FILE_HEADER_SIZE as u64)
    }

    /// Entries with `sequence > since_seq`, in order, the input to
    /// `render_journal` (§4.3, §6.3).
    pub fn entries_since(&mut self, since_seq: u64) -> Result<Vec<JournalEntry>> {
        Ok(self.scan_all()?.into_iter().filter(|e| e.header.sequence > since_seq).collect())
    }

    pub fn head_sequence(&self) -> u64 {
        self.next_sequence.saturating_sub(1)
    }
}

/// Deterministic canonical text render for a single entry (§6.3). Mirrors
/// `block::render_block`'s conventions: fixed field order, RFC 3339 UTC
/// timestamps, lowercase hex for byte blobs, sorted-key CBOR pretty-print.
pub fn render_entry(entry: &JournalEntry) -> String {
    let mut out = String::new();
    out.push_str(&format!("sequence: {}\n", entry.header.sequence));
    out.push_str(&format!("timestamp: {}\n", crate::block::format_micros(entry.header.timestamp)));
    out.push_str(&format!("op_type: {:?}\n", entry.op_type().ok()));
    out.push_str(&format!("affected_block: {}\n", entry.header.affected_block));
    out.push_str(&format!("flags: {:?}\n", entry.header.flags));
    out.push_str(&format!("actor: {}\n", entry.provenance.actor));
    out.push_str(&format!("rationale: {}\n", entry.provenance.rationale));
    match &entry.inverse {
        Inverse::Apply(_) => out.push_str("inverse: applicable\n"),
        Inverse::Irreversible { story } => out.push_str(&format!("inverse: irreversible ({story})\n")),
    }
    out
}

/// Render every *completed* entry since `since_seq`, in sequence order
/// (§4.3). An entry flagged `UNCOMPLETED` never had its forward effects
/// land, so it is not part of the durable history this renders, an abort
/// that backs one out this way leaves no committed record of the attempt.
pub fn render_journal(journal: &mut Journal, since_seq: u64) -> Result<String> {
    let mut out = String::new();
    for entry in journal.entries_since(since_seq)? {
        if entry.is_uncompleted() {
            continue;
        }
        out.push_str(&render_entry(&entry));
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{cbor_encode, CborValue};

    fn sample_op(journal: &Journal, actor: &str) -> EntryBuilder {
        let mut builder = journal.begin_entry(OpType::DocInsert, 7);
        builder.set_forward(cbor_encode(&CborValue::Map(vec![])).unwrap());
        builder.set_inverse(Inverse::Apply(cbor_encode(&CborValue::Map(vec![])).unwrap()));
        let prov = Provenance::new(actor, "smoke");
        builder.set_provenance(prov.to_cbor().unwrap());
        builder
    }

    #[test]
    fn sequence_is_monotonic_across_commits() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::open(dir.path().join("data.journal"), true).unwrap();
        let b1 = sample_op(&journal, "alice");
        let s1 = journal.commit_entry(b1, 1).unwrap();
        let b2 = sample_op(&journal, "bob");
        let s2 = journal.commit_entry(b2, 2).unwrap();
        assert!(s1 < s2);
    }

    #[test]
    fn reopen_recovers_tail_and_next_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.journal");
        {
            let mut journal = Journal::open(&path, true).unwrap();
            journal.commit_entry(sample_op(&journal, "alice"), 1).unwrap();
        }
        let mut reopened = Journal::open(&path, false).unwrap();
        let entries = reopened.scan_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(reopened.head_sequence(), 1);
    }

    #[test]
    fn render_contains_actor_and_rationale() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::open(dir.path().join("data.journal"), true).unwrap();
        journal.commit_entry(sample_op(&journal, "alice"), 1).unwrap();
        let text = render_journal(&mut journal, 0).unwrap();
        assert!(text.contains("actor: alice"));
        assert!(text.contains("rationale: smoke"));
    }

    #[test]
    fn mark_uncompleted_is_visible_after_rescan() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::open(dir.path().join("data.journal"), true).unwrap();
        let seq = journal.commit_entry(sample_op(&journal, "alice"), 1).unwrap();
        journal.mark_uncompleted(seq).unwrap();
        let entries = journal.scan_all().unwrap();
        assert!(entries[0].is_uncompleted());
    }

    #[test]
    fn rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.journal");
        std::fs::write(&path, b"NOTALITHO").unwrap();
        assert!(Journal::open(&path, false).is_err());
    }
}
