//! Database handle (§3.5, §4.3, §6.2, §6.4): the top-level object that owns
//! the block store, journal, superblock, and collection table for one
//! on-disk database directory, and runs crash recovery on open.
//!
//! One struct wrapping a device plus cached metadata, opened once and
//! handed out through a coarse-grained lock rather than re-derived per
//! call.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use ciborium::value::Value;
use parking_lot::Mutex;

use crate::allocator::Allocator;
use crate::block::{Block, BlockDevice, BlockStore, FileBlockDevice, RenderOptions};
use crate::codec::{cbor_decode, cbor_encode};
use crate::consts::{
    BlockFlags, BlockType, BLOCKS_FILE_NAME, DEFAULT_JOURNAL_CHECKPOINT_BYTES, JOURNAL_FILE_NAME, SUPERBLOCK_ID,
};
use crate::error::{Error, ErrorKind, Result};
use crate::journal::Journal;
use crate::model::{CollectionMeta, CollectionTable, ConstraintSet, Model, Op};
use crate::superblock::Superblock;
use crate::transaction::{Transaction, TxnMode};

fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Options controlling how `Database::open` behaves (§6.4). Caller-supplied
/// as a CBOR map at the bridge boundary; unknown keys are preserved by
/// simply being ignored rather than rejected, so a newer caller talking to
/// an older core degrades gracefully.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOptions {
    /// Refuse every mutating request against this handle.
    pub read_only: bool,
    /// Create the database directory and its files if they do not exist.
    pub allow_create: bool,
    /// Fsync the journal and block store after every write. Disabling this
    /// trades durability for throughput (§6.4); a crash can then lose
    /// writes that `apply` already reported as successful.
    pub fsync_on_commit: bool,
    /// Journal growth threshold, in bytes, that triggers an automatic
    /// superblock checkpoint. Advisory only in this implementation, see
    /// `DESIGN.md`'s open-question notes; every commit already checkpoints.
    pub journal_checkpoint_bytes: u64,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            allow_create: true,
            fsync_on_commit: true,
            journal_checkpoint_bytes: DEFAULT_JOURNAL_CHECKPOINT_BYTES,
        }
    }
}

impl OpenOptions {
    /// Create a new database, or open it if it already exists.
    pub fn create() -> Self {
        Self::default()
    }

    /// Open an existing database; fail rather than create one.
    pub fn open_existing() -> Self {
        Self { allow_create: false, ..Self::default() }
    }

    /// Decode from the CBOR options map the bridge passes to `db_open`.
    /// Missing keys fall back to this struct's defaults.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let defaults = Self::default();
        if bytes.is_empty() {
            return Ok(defaults);
        }
        let value = cbor_decode(bytes)?;
        let Value::Map(entries) = value else {
            return Err(Error::invalid_argument("open options is not a CBOR map"));
        };
        let get = |key: &str| entries.iter().find(|(k, _)| k.as_text() == Some(key)).map(|(_, v)| v);
        let as_bool = |v: Option<&Value>, default: bool| v.and_then(Value::as_bool).unwrap_or(default);
        let as_u64 = |v: Option<&Value>, default: u64| v.and_then(Value::as_integer).and_then(|i| u64::try_from(i).ok()).unwrap_or(default);

        Ok(Self {
            read_only: as_bool(get("read_only"), defaults.read_only),
            allow_create: as_bool(get("allow_create"), defaults.allow_create),
            fsync_on_commit: as_bool(get("fsync_on_commit"), defaults.fsync_on_commit),
            journal_checkpoint_bytes: as_u64(get("journal_checkpoint_bytes"), defaults.journal_checkpoint_bytes),
        })
    }
}

/// Everything a transaction needs a lock over: the block store, the
/// journal, the in-memory collection index, and the cached superblock.
pub(crate) struct DatabaseState<D: BlockDevice> {
    pub store: BlockStore<D>,
    pub journal: Journal,
    pub table: CollectionTable,
    pub superblock: Superblock,
}

/// Process-wide registry of currently-open database directories (§5: at
/// most one writer handle per database at a time). Keyed by canonicalized
/// path so two relative paths to the same directory still collide.
static OPEN_PATHS: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();

fn open_paths() -> &'static Mutex<HashSet<PathBuf>> {
    OPEN_PATHS.get_or_init(|| Mutex::new(HashSet::new()))
}

fn register_open_path(path: &Path) -> Result<()> {
    let mut set = open_paths().lock();
    if !set.insert(path.to_path_buf()) {
        return Err(Error::with_message(
            ErrorKind::Io,
            format!("database at {} is already open in this process", path.display()),
        ));
    }
    Ok(())
}

fn unregister_open_path(path: &Path) {
    open_paths().lock().remove(path);
}

/// An open database. Cheap to share: every mutating access goes through
/// [`Self::begin`], which serializes on a single internal mutex (§4.5, §5).
pub struct Database<D: BlockDevice = FileBlockDevice> {
    state: Mutex<DatabaseState<D>>,
    path: PathBuf,
    read_only: bool,
}

impl Database<FileBlockDevice> {
    /// Open (or create) the database rooted at `path` (§6.2): a directory
    /// holding `data.blocks` and `data.journal`. Runs crash recovery if the
    /// superblock's `last_clean_shutdown` flag is false.
    pub fn open(path: impl AsRef<Path>, opts: OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        if opts.allow_create {
            std::fs::create_dir_all(path)?;
        }
        if !path.exists() {
            return Err(Error::io("database directory does not exist and allow_create is false"));
        }
        let canonical = path.canonicalize()?;
        register_open_path(&canonical)?;

        match Self::open_locked(&canonical, &opts) {
            Ok(db) => Ok(db),
            Err(err) => {
                unregister_open_path(&canonical);
                Err(err)
            }
        }
    }

    fn open_locked(canonical: &Path, opts: &OpenOptions) -> Result<Self> {
        let blocks_path = canonical.join(BLOCKS_FILE_NAME);
        let journal_path = canonical.join(JOURNAL_FILE_NAME);
        let blocks_exists = blocks_path.exists();
        let journal_exists = journal_path.exists();

        if blocks_exists && !journal_exists {
            return Err(Error::io("journal file missing while a block file is present; database is inconsistent"));
        }
        if !blocks_exists && !opts.allow_create {
            return Err(Error::io("database does not exist and allow_create is false"));
        }

        let device = FileBlockDevice::open(&blocks_path, opts.allow_create)?;
        let fresh = device.block_count() == 0;
        let mut store = BlockStore::new(device);
        store.set_fsync(opts.fsync_on_commit);
        let mut journal = Journal::open(&journal_path, opts.allow_create)?;
        journal.set_fsync(opts.fsync_on_commit);

        let now = now_micros();
        let (superblock, table) = if fresh {
            let mut sb = Superblock::new(now);
            sb.last_clean_shutdown = false;
            let payload = sb.to_cbor()?;
            store.write_block(SUPERBLOCK_ID, BlockType::Superblock, 0, BlockFlags::empty(), &payload, now)?;
            (sb, CollectionTable::empty())
        } else {
            let block = store.read_block(SUPERBLOCK_ID)?;
            let mut sb = Superblock::from_cbor(&block.payload)?;
            *store.allocator_mut() = sb.allocator();
            store.set_sequence(sb.last_block_sequence);

            let mut table = CollectionTable::load(&mut store, sb.document_collections_root, sb.edge_collections_root)?;

            if !sb.last_clean_shutdown {
                if sb.unrecoverable {
                    return Err(Error::internal(
                        "database is marked unrecoverable after a failed abort; operator repair required",
                    ));
                }
                recover(&mut store, &mut journal, &mut table, &mut sb, now)?;
            }

            sb.last_clean_shutdown = false;
            let payload = sb.to_cbor()?;
            store.write_block(SUPERBLOCK_ID, BlockType::Superblock, 0, BlockFlags::empty(), &payload, now)?;
            (sb, table)
        };

        Ok(Self {
            state: Mutex::new(DatabaseState { store, journal, table, superblock }),
            path: canonical.to_path_buf(),
            read_only: opts.read_only,
        })
    }
}

impl<D: BlockDevice> Database<D> {
    /// Begin a transaction (§4.5). Holds the database's single internal
    /// mutex for the transaction's entire lifetime, concurrent callers
    /// simply queue (§5).
    pub fn begin(&self, mode: TxnMode) -> Result<Transaction<'_, D>> {
        if self.read_only && mode == TxnMode::ReadWrite {
            return Err(Error::invalid_argument("database was opened read_only"));
        }
        let guard = self.state.lock();
        if mode == TxnMode::ReadWrite && guard.superblock.unrecoverable {
            return Err(Error::internal(
                "database is marked unrecoverable after a failed abort; operator repair required",
            ));
        }
        Ok(Transaction::new(guard, mode))
    }

    /// Path this database was opened at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and checksum-verify a single block, rendering it as canonical
    /// text (§6.3).
    pub fn render_block(&self, block_id: u64, opts: &RenderOptions) -> Result<String> {
        let mut state = self.state.lock();
        let block = state.store.read_block(block_id)?;
        Ok(crate::block::render_block(&block, opts))
    }

    /// Render every completed journal entry since `since_seq` (§4.3, §6.3).
    pub fn render_journal(&self, since_seq: u64) -> Result<String> {
        let mut state = self.state.lock();
        crate::journal::render_journal(&mut state.journal, since_seq)
    }

    /// Every live collection's schema block, as a CBOR array of
    /// `{collection, collection_id, schema_block_id, schema}` maps (§4.7).
    pub fn introspect_schema(&self) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        let metas: Vec<(u64, CollectionMeta)> = state.table.iter_live().map(|(id, m)| (id, m.clone())).collect();
        let mut items = Vec::new();
        for (collection_id, meta) in metas {
            let Some(schema_id) = meta.schema_block_id else { continue };
            let block = state.store.read_block(schema_id)?;
            items.push(Value::Map(vec![
                (Value::Text("collection".into()), Value::Text(meta.name)),
                (Value::Text("collection_id".into()), Value::Integer(collection_id.into())),
                (Value::Text("schema_block_id".into()), Value::Integer(schema_id.into())),
                (Value::Text("schema".into()), cbor_decode(&block.payload)?),
            ]));
        }
        cbor_encode(&Value::Array(items))
    }

    /// Every live collection's constraint set, as a CBOR array of
    /// `{collection, collection_id, constraint_block_id, constraints}` maps
    /// (§4.7).
    pub fn introspect_constraints(&self) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        let metas: Vec<(u64, CollectionMeta)> = state.table.iter_live().map(|(id, m)| (id, m.clone())).collect();
        let mut items = Vec::new();
        for (collection_id, meta) in metas {
            let Some(constraint_id) = meta.constraint_block_id else { continue };
            let block = state.store.read_block(constraint_id)?;
            let constraints = ConstraintSet::from_cbor(&block.payload)?;
            items.push(Value::Map(vec![
                (Value::Text("collection".into()), Value::Text(meta.name)),
                (Value::Text("collection_id".into()), Value::Integer(collection_id.into())),
                (Value::Text("constraint_block_id".into()), Value::Integer(constraint_id.into())),
                (Value::Text("constraints".into()), constraints_to_cbor(&constraints)),
            ]));
        }
        cbor_encode(&Value::Array(items))
    }

    /// Close the database: checkpoint the superblock with
    /// `last_clean_shutdown` set and release the process-wide open-path
    /// lock. A `Database` dropped without calling this looks, to the next
    /// `open`, exactly like a crash, which is the point (§8's crash-safety
    /// property is exercised this way in tests).
    pub fn close(self) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.superblock.last_clean_shutdown = true;
            let now = now_micros();
            let payload = state.superblock.to_cbor()?;
            state.store.write_block(SUPERBLOCK_ID, BlockType::Superblock, 0, BlockFlags::empty(), &payload, now)?;
        }
        unregister_open_path(&self.path);
        Ok(())
    }
}

impl<D: BlockDevice> Drop for Database<D> {
    fn drop(&mut self) {
        unregister_open_path(&self.path);
    }
}

fn constraints_to_cbor(constraints: &ConstraintSet) -> Value {
    // `ConstraintSet::to_cbor` returns encoded bytes, not a `Value`; for
    // introspection we want it nested directly in the surrounding array
    // rather than re-wrapped as an opaque byte string.
    match constraints.to_cbor() {
        Ok(bytes) => cbor_decode(&bytes).unwrap_or(Value::Null),
        Err(_) => Value::Null,
    }
}

/// Crash recovery (§4.3, §4.2): run once at `db_open` when the superblock's
/// `last_clean_shutdown` flag is false.
///
/// The free list is rebuilt by scanning every block for the `deleted` flag,
/// since the superblock's cached head may be stale. For the journal tail
/// since the last checkpoint, each completed (non-`UNCOMPLETED`) entry is
/// checked against the block store: if the block its forward op would have
/// written is already present, its effects are assumed to have landed
/// before the crash (block writes are the last, synchronously-fsynced step
/// of `apply`, so their presence is the strongest signal this design has
/// for "did this complete"). If that block is missing, the crash happened
/// between the journal fsync and the block-store write, the entry is
/// flagged `UNCOMPLETED` in place so `render_journal` excludes it, matching
/// exactly what `Transaction::apply` itself does when it catches that same
/// failure synchronously.
///
/// This is a best-effort heuristic, not a proof: an update/delete/set op's
/// target block always already exists (it predates the op), so this scan
/// cannot distinguish "update landed" from "update never ran" for those
/// kinds. See `DESIGN.md` for the accepted scope of this limitation.
fn recover<D: BlockDevice>(
    store: &mut BlockStore<D>,
    journal: &mut Journal,
    table: &mut CollectionTable,
    superblock: &mut Superblock,
    now_micros: u64,
) -> Result<()> {
    log::warn!("database was not cleanly shut down; running crash recovery");
    store.rebuild_free_list_from_scan()?;

    let entries = journal.entries_since(superblock.journal_head_sequence)?;
    let mut incomplete = Vec::new();
    for entry in &entries {
        if entry.is_uncompleted() {
            continue;
        }
        let op = Op::decode(&entry.forward)?;
        if store.read_block(op.affected_block()).is_err() {
            incomplete.push(entry.sequence());
        }
    }
    for sequence in incomplete {
        journal.mark_uncompleted(sequence)?;
    }

    // Re-derive the collection table and allocator bookkeeping: the chain
    // walk above already reflects every block actually present on disk, so
    // nothing further needs replaying into it.
    let _ = table;
    let _ = now_micros;
    superblock.journal_head_sequence = journal.head_sequence();
    superblock.capture_allocator(store.allocator());
    superblock.last_block_sequence = store.sequence();
    log::info!("crash recovery complete: {} entries scanned", entries.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Provenance;
    use crate::model::CollectionKind;
    use crate::transaction::Request;

    #[test]
    fn fresh_open_then_close_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path(), OpenOptions::create()).unwrap();
        db.close().unwrap();

        let reopened = Database::open(dir.path(), OpenOptions::open_existing()).unwrap();
        reopened.close().unwrap();
    }

    #[test]
    fn opening_nonexistent_database_without_allow_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = Database::open(&missing, OpenOptions::open_existing()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn second_open_of_same_path_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path(), OpenOptions::create()).unwrap();
        let err = Database::open(dir.path(), OpenOptions::open_existing()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        db.close().unwrap();
        // Now that it's unregistered, opening again succeeds.
        let reopened = Database::open(dir.path(), OpenOptions::open_existing()).unwrap();
        reopened.close().unwrap();
    }

    #[test]
    fn introspect_schema_reports_live_collections_only() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path(), OpenOptions::create()).unwrap();
        {
            let mut txn = db.begin(TxnMode::ReadWrite).unwrap();
            txn.apply(
                Request::CreateCollection { name: "users".into(), kind: CollectionKind::Document },
                Provenance::new("test", "setup"),
            )
            .unwrap();
            let schema = crate::codec::cbor_encode(&Value::Map(vec![(
                Value::Text("type".into()),
                Value::Text("object".into()),
            )]))
            .unwrap();
            txn.apply(
                Request::SetSchema { collection: "users".into(), body: schema },
                Provenance::new("test", "schema"),
            )
            .unwrap();
            txn.commit().unwrap();
        }
        let bytes = db.introspect_schema().unwrap();
        let Value::Array(items) = cbor_decode(&bytes).unwrap() else { panic!("expected array") };
        assert_eq!(items.len(), 1);
        db.close().unwrap();
    }

    #[test]
    fn recovery_excludes_entry_whose_block_never_landed() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = Database::open(dir.path(), OpenOptions::create()).unwrap();
            let mut txn = db.begin(TxnMode::ReadWrite).unwrap();
            txn.apply(
                Request::CreateCollection { name: "users".into(), kind: CollectionKind::Document },
                Provenance::new("test", "setup"),
            )
            .unwrap();
            txn.commit().unwrap();
            // Drop without `close`: simulates a crash (last_clean_shutdown stays false).
            drop(txn);
            std::mem::forget(db);
        }
        unregister_open_path(&dir.path().canonicalize().unwrap());

        let reopened = Database::open(dir.path(), OpenOptions::open_existing()).unwrap();
        assert!(reopened.begin(TxnMode::ReadOnly).is_ok());
        reopened.close().unwrap();
    }
}
