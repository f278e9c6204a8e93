//! Transaction manager (§4.5): the single-writer-per-handle seam between the
//! bridge and the model layer. A `Transaction` holds the database's lock for
//! its entire lifetime, so every mutation it applies is fully serialized
//! against every other transaction on the same database.
//!
//! Each `apply` call is its own two-phase commit (§4.3): the journal entry
//! lands and fsyncs first, then the forward op's block-store effects run. An
//! abort reverses every already-applied call in this transaction, newest
//! first, by replaying each one's inverse, there is no separate undo log,
//! just the same `Model::apply_inverse` path recovery itself uses.

mod request;

pub use request::{Request, Response};

use parking_lot::MutexGuard;

use crate::block::BlockDevice;
use crate::consts::{BlockFlags, BlockType, SUPERBLOCK_ID};
use crate::db::DatabaseState;
use crate::error::{Error, ErrorKind, Result};
use crate::journal::{Inverse, Provenance};
use crate::model::{Model, Op};

/// Whether a transaction may mutate the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    ReadOnly,
    ReadWrite,
}

/// A transaction's position in its state machine (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
}

fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Maps a successfully planned forward op back onto the `Response` shape its
/// originating `Request` promised. The two always agree in kind, every
/// `Model::plan_*` used for a given `Request` variant is only ever called
/// from this one dispatch site in [`Transaction::apply`].
fn response_for(request: &Request, forward: &Op) -> Response {
    match (request, forward) {
        (Request::CreateCollection { .. }, Op::CollectionCreate { collection_id, .. }) => {
            Response::CollectionCreated { collection_id: *collection_id }
        }
        (Request::DropCollection { .. }, _) => Response::CollectionDropped,
        (Request::InsertDocument { .. }, Op::DocInsert { doc_id, .. }) => Response::DocumentInserted { doc_id: *doc_id },
        (Request::UpdateDocument { .. }, _) => Response::DocumentUpdated,
        (Request::DeleteDocument { .. }, _) => Response::DocumentDeleted,
        (Request::InsertEdge { .. }, Op::EdgeInsert { edge_id, .. }) => Response::EdgeInserted { edge_id: *edge_id },
        (Request::UpdateEdge { .. }, _) => Response::EdgeUpdated,
        (Request::DeleteEdge { .. }, _) => Response::EdgeDeleted,
        (Request::SetSchema { .. }, Op::SchemaSet { schema_block_id, .. }) => Response::SchemaSet { schema_block_id: *schema_block_id },
        (Request::SetConstraint { .. }, Op::ConstraintSet { constraint_block_id, .. }) => {
            Response::ConstraintSet { constraint_block_id: *constraint_block_id }
        }
        (Request::AnnounceMigration { .. }, Op::MigrationAnnounce { migration_id, .. }) => {
            Response::MigrationAnnounced { migration_id: *migration_id }
        }
        (Request::ShadowMigration { .. }, _) => Response::MigrationShadowed,
        (Request::CommitMigration { .. }, _) => Response::MigrationCommitted,
        _ => unreachable!("a request's planned op is always of the matching kind"),
    }
}

/// A handle to one in-flight transaction against a database. Holds the
/// database's mutex for as long as it lives, there is no optimistic
/// concurrency here, just a queue of waiters (§5).
pub struct Transaction<'db, D: BlockDevice> {
    guard: MutexGuard<'db, DatabaseState<D>>,
    mode: TxnMode,
    state: TxnState,
    /// (journal sequence, inverse) pairs for every `apply` call that has
    /// completed in this transaction, newest last. Walked in reverse on
    /// abort.
    completed: Vec<(u64, Inverse)>,
}

impl<'db, D: BlockDevice> Transaction<'db, D> {
    pub(crate) fn new(guard: MutexGuard<'db, DatabaseState<D>>, mode: TxnMode) -> Self {
        Self { guard, mode, state: TxnState::Active, completed: Vec::new() }
    }

    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            TxnState::Active => Ok(()),
            TxnState::Committed => Err(Error::txn_already_committed("transaction already committed")),
            TxnState::Aborted => Err(Error::txn_not_active("transaction already aborted")),
        }
    }

    /// Plan, journal, and apply one mutation (§4.3, §4.4).
    pub fn apply(&mut self, request: Request, provenance: Provenance) -> Result<Response> {
        self.ensure_active()?;
        if self.mode == TxnMode::ReadOnly {
            return Err(Error::with_message(
                ErrorKind::InvalidArgument,
                "cannot apply a mutation inside a read-only transaction",
            ));
        }

        let state = &mut *self.guard;
        let planned = match &request {
            Request::CreateCollection { name, kind } => Model::plan_create_collection(&mut state.store, &state.table, name, *kind)?,
            Request::DropCollection { name } => Model::plan_drop_collection(&state.table, name)?,
            Request::InsertDocument { collection, body } => {
                Model::plan_insert_document(&mut state.store, &state.table, collection, body)?
            }
            Request::UpdateDocument { collection, doc_id, body } => {
                Model::plan_update_document(&mut state.store, &state.table, collection, *doc_id, body)?
            }
            Request::DeleteDocument { collection, doc_id } => Model::plan_delete_document(&state.table, collection, *doc_id)?,
            Request::InsertEdge { collection, edge } => {
                Model::plan_insert_edge(&mut state.store, &state.table, collection, edge.clone())?
            }
            Request::UpdateEdge { edge_id, properties } => Model::plan_update_edge(&mut state.store, *edge_id, properties)?,
            Request::DeleteEdge { collection, edge_id } => Model::plan_delete_edge(&state.table, collection, *edge_id)?,
            Request::SetSchema { collection, body } => Model::plan_set_schema(&mut state.store, &state.table, collection, body)?,
            Request::SetConstraint { collection, constraints } => {
                Model::plan_set_constraint(&mut state.store, &state.table, collection, constraints)?
            }
            Request::AnnounceMigration { source_collection, target_schema } => {
                Model::plan_announce_migration(&mut state.store, source_collection, target_schema)?
            }
            Request::ShadowMigration { migration_id, shadow_head } => {
                Model::plan_shadow_migration(&mut state.store, *migration_id, *shadow_head)?
            }
            Request::CommitMigration { migration_id, collection_id, new_head } => {
                Model::plan_commit_migration(&state.table, *migration_id, *collection_id, *new_head)?
            }
        };

        let response = response_for(&request, &planned.forward);
        let now = now_micros();

        let mut builder = state.journal.begin_entry(planned.forward.op_type(), planned.forward.affected_block());
        builder.set_forward(planned.forward.encode()?);
        builder.set_inverse(planned.inverse.clone());
        builder.set_provenance(provenance.to_cbor()?);
        let sequence = state.journal.commit_entry(builder, now)?;

        if let Err(err) = Model::apply_forward(&mut state.store, &mut state.table, &planned.forward, now) {
            // The journal entry is already durable; flag it so recovery and
            // `render_journal` both know its forward effects never landed.
            state.journal.mark_uncompleted(sequence)?;
            return Err(err);
        }

        self.completed.push((sequence, planned.inverse));
        Ok(response)
    }

    /// Rewrite the superblock to reflect the current allocator, collection
    /// chain roots, and journal head (§4.2, §4.3). Called by both a
    /// successful commit and a successful abort, the latter leaves the
    /// store back where it started, but the superblock's bookkeeping (next
    /// free id, journal head) has still moved forward and must be pinned
    /// down before the handle's lock is released. Does not touch
    /// `last_clean_shutdown`: that bit tracks whether the *database* (not
    /// this one transaction) is currently mounted, and is only ever flipped
    /// by `Database::open` (clear, on mount) and `Database::close` (set, on
    /// a clean unmount).
    fn checkpoint_superblock(&mut self) -> Result<()> {
        let now = now_micros();
        let state = &mut *self.guard;
        state.superblock.capture_allocator(state.store.allocator());
        state.superblock.document_collections_root = state.table.document_chain_head;
        state.superblock.edge_collections_root = state.table.edge_chain_head;
        state.superblock.journal_head_sequence = state.journal.head_sequence();
        state.superblock.last_block_sequence = state.store.sequence();
        let payload = state.superblock.to_cbor()?;
        state.store.write_block(SUPERBLOCK_ID, BlockType::Superblock, 0, BlockFlags::empty(), &payload, now)?;
        Ok(())
    }

    /// Commit: for a read-write transaction, checkpoint the superblock so a
    /// crash before the next checkpoint has the smallest possible journal
    /// tail to replay on reopen. A read-only transaction never touched
    /// anything, so there is nothing to flush.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        if self.mode == TxnMode::ReadWrite {
            self.checkpoint_superblock()?;
        }
        self.state = TxnState::Committed;
        Ok(())
    }

    fn run_abort(&mut self) -> Result<()> {
        let now = now_micros();
        while let Some((sequence, inverse)) = self.completed.pop() {
            match inverse {
                Inverse::Apply(bytes) => {
                    let op = Op::decode(&bytes)?;
                    let state = &mut *self.guard;
                    if let Err(err) = Model::apply_inverse(&mut state.store, &mut state.table, &op, now) {
                        // The store is now in a state between two of this
                        // transaction's operations, neither what the
                        // caller asked for nor what was there before it
                        // started. There is no safe further automated step.
                        state.superblock.unrecoverable = true;
                        self.state = TxnState::Aborted;
                        return Err(err);
                    }
                    self.guard.journal.mark_uncompleted(sequence)?;
                }
                Inverse::Irreversible { story } => {
                    self.guard.superblock.unrecoverable = true;
                    self.state = TxnState::Aborted;
                    return Err(Error::with_message(
                        ErrorKind::Internal,
                        format!("refusing to abort: operation is irreversible and requires operator intervention: {story}"),
                    ));
                }
            }
        }
        if self.mode == TxnMode::ReadWrite {
            self.checkpoint_superblock()?;
        }
        self.state = TxnState::Aborted;
        Ok(())
    }

    /// Abort: reverse every completed call in this transaction, newest
    /// first. Refuses (leaving the database marked unrecoverable) if any
    /// inverse turns out to be irreversible or itself fails to apply, §4.5
    /// and §7 agree there is no safe automatic recovery from either case.
    pub fn abort(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.run_abort()
    }
}

impl<'db, D: BlockDevice> Drop for Transaction<'db, D> {
    fn drop(&mut self) {
        if self.state == TxnState::Active {
            log::warn!("transaction dropped without an explicit commit or abort; aborting automatically");
            if let Err(err) = self.run_abort() {
                log::error!("automatic abort on drop failed: {err}; database may require operator intervention");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::FileBlockDevice;
    use crate::db::{Database, OpenOptions};
    use crate::model::CollectionKind;

    fn open() -> (tempfile::TempDir, Database<FileBlockDevice>) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path(), OpenOptions::create()).unwrap();
        (dir, db)
    }

    #[test]
    fn committed_insert_is_visible_after_reopen() {
        let (dir, db) = open();
        {
            let mut txn = db.begin(TxnMode::ReadWrite).unwrap();
            txn.apply(
                Request::CreateCollection { name: "users".into(), kind: CollectionKind::Document },
                Provenance::new("test", "setup"),
            )
            .unwrap();
            txn.commit().unwrap();
        }
        drop(db);

        let reopened = Database::open(dir.path(), OpenOptions::open_existing()).unwrap();
        let mut txn = reopened.begin(TxnMode::ReadWrite).unwrap();
        let response = txn
            .apply(
                Request::InsertDocument { collection: "users".into(), body: vec![1, 2, 3] },
                Provenance::new("test", "insert"),
            )
            .unwrap();
        assert!(matches!(response, Response::DocumentInserted { .. }));
        txn.commit().unwrap();
    }

    #[test]
    fn aborted_transaction_leaves_no_trace_in_collection_table() {
        let (_dir, db) = open();
        let mut txn = db.begin(TxnMode::ReadWrite).unwrap();
        txn.apply(
            Request::CreateCollection { name: "users".into(), kind: CollectionKind::Document },
            Provenance::new("test", "setup"),
        )
        .unwrap();
        txn.abort().unwrap();
        drop(txn);

        let mut txn = db.begin(TxnMode::ReadWrite).unwrap();
        // Should succeed again: the name was freed by the abort.
        txn.apply(
            Request::CreateCollection { name: "users".into(), kind: CollectionKind::Document },
            Provenance::new("test", "retry"),
        )
        .unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn read_only_transaction_rejects_mutations() {
        let (_dir, db) = open();
        let mut txn = db.begin(TxnMode::ReadOnly).unwrap();
        let err = txn
            .apply(
                Request::CreateCollection { name: "users".into(), kind: CollectionKind::Document },
                Provenance::new("test", "should fail"),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn apply_after_commit_is_rejected() {
        let (_dir, db) = open();
        let mut txn = db.begin(TxnMode::ReadWrite).unwrap();
        txn.commit().unwrap();
        let err = txn
            .apply(
                Request::CreateCollection { name: "users".into(), kind: CollectionKind::Document },
                Provenance::new("test", "too late"),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TxnAlreadyCommitted);
    }
}
