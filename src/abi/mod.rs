//! Bridge/ABI (§4.7, §5, §6.2, §6.4, §7): the narrow `extern "C"` surface
//! every higher-level runtime, query planner, HTTP/gRPC/GraphQL layer,
//! language SDK, is meant to link against instead of reaching into the
//! Rust API directly.
//!
//! Every function here follows the same three rules:
//!
//! - Inputs that are bytes cross as `(ptr, len)` pairs and are always CBOR
//!   unless a doc comment says otherwise; they are borrowed for the call's
//!   duration, never freed by this side.
//! - Outputs that are bytes cross as an out-parameter [`Blob`], owned by
//!   this library once written and released only via [`fdb_blob_free`].
//! - Every fallible function returns a [`StatusCode`] and, on anything
//!   other than `Ok`, writes a CBOR error blob (`code`, `message`,
//!   `block_refs`, `rationale`) to its `out_error` parameter instead of
//!   unwinding, no panic or Rust `Result` ever crosses this boundary.
//!
//! Handles ([`DbHandle`], [`TxnHandle`]) are opaque pointers. A `TxnHandle`
//! is only valid for as long as the `DbHandle` that produced it is open;
//! the core does not itself track that invariant across the FFI boundary
//! (mirroring §5's note that the ABI's only concurrency guarantee is a
//! serializable order of operations on one handle), so a caller that
//! closes a database while one of its transactions is still outstanding
//! invokes undefined behavior, exactly as it would for any other
//! C-style handle API.

pub mod blob;
pub mod status;

pub use blob::{fdb_blob_free, Blob};
pub use status::StatusCode;

use std::panic::{self, AssertUnwindSafe};
use std::slice;

use ciborium::value::Value;

use crate::block::{FileBlockDevice, RenderOptions};
use crate::codec::{cbor_decode, cbor_encode};
use crate::db::{Database, OpenOptions};
use crate::error::Error;
use crate::journal::Provenance;
use crate::proof;
use crate::transaction::{Request, Transaction, TxnMode};

/// An open database, handed to callers as an opaque pointer from
/// [`fdb_db_open`] and released by [`fdb_db_close`].
pub struct DbHandle(Database<FileBlockDevice>);

/// An in-flight transaction, handed to callers as an opaque pointer from
/// [`fdb_txn_begin`] and consumed by [`fdb_txn_commit`] or
/// [`fdb_txn_abort`].
///
/// Borrows its [`DbHandle`] for `'static`: valid because the handle is a
/// raw pointer the caller promises outlives every transaction it begot,
/// the same promise any C handle API makes of its callers.
pub struct TxnHandle(Transaction<'static, FileBlockDevice>);

fn bytes_from_raw<'a>(ptr: *const u8, len: usize) -> &'a [u8] {
    if len == 0 || ptr.is_null() {
        &[]
    } else {
        // SAFETY: caller guarantees `ptr` points to `len` readable, immutable
        // bytes for the duration of this call (per this module's contract).
        unsafe { slice::from_raw_parts(ptr, len) }
    }
}

fn error_to_blob(err: &Error) -> Blob {
    let mut entries = vec![
        (Value::Text("code".into()), Value::Integer((StatusCode::from(err.kind()) as i32).into())),
        (Value::Text("message".into()), Value::Text(err.message().to_string())),
        (Value::Text("rationale".into()), Value::Text(err.message().to_string())),
    ];
    if !err.block_refs().is_empty() {
        entries.push((
            Value::Text("block_refs".into()),
            Value::Array(err.block_refs().iter().map(|&id| Value::Integer(id.into())).collect()),
        ));
    }
    let bytes = cbor_encode(&Value::Map(entries)).unwrap_or_default();
    Blob::from_vec(bytes)
}

/// Write `err` as a CBOR error blob to `*out_error`, if `out_error` is
/// non-null, and return the matching [`StatusCode`].
///
/// # Safety
/// `out_error`, if non-null, must point to a valid, writable `Blob` slot.
unsafe fn fail(err: Error, out_error: *mut Blob) -> i32 {
    log::warn!("bridge call failed: {:?}: {}", err.kind(), err.message());
    if !out_error.is_null() {
        // SAFETY: caller guarantees `out_error` is a valid writable `Blob` slot.
        unsafe { *out_error = error_to_blob(&err) };
    }
    StatusCode::from(err.kind()) as i32
}

/// Clear `*out_error` to the empty blob on success, if non-null.
///
/// # Safety
/// `out_error`, if non-null, must point to a valid, writable `Blob` slot.
unsafe fn succeed(out_error: *mut Blob) -> i32 {
    if !out_error.is_null() {
        // SAFETY: see above.
        unsafe { *out_error = Blob::empty() };
    }
    StatusCode::Ok as i32
}

/// Run `f`, converting a caught panic into `ERR_INTERNAL` rather than
/// unwinding across the FFI boundary (unwinding through a foreign frame is
/// undefined behavior).
fn catch(f: impl FnOnce() -> crate::error::Result<()> + std::panic::UnwindSafe) -> crate::error::Result<()> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(_) => Err(Error::internal("panic crossed the bridge boundary")),
    }
}

/// `version()` (§4.7): this build's `{major, minor, patch}` as a CBOR map.
///
/// # Safety
/// `out_blob` must point to a valid, writable `Blob` slot.
#[no_mangle]
pub unsafe extern "C" fn fdb_version(out_blob: *mut Blob) -> i32 {
    let mut parts = env!("CARGO_PKG_VERSION").split('.').map(|p| p.parse::<i64>().unwrap_or(0));
    let value = Value::Map(vec![
        (Value::Text("major".into()), Value::Integer(parts.next().unwrap_or(0).into())),
        (Value::Text("minor".into()), Value::Integer(parts.next().unwrap_or(0).into())),
        (Value::Text("patch".into()), Value::Integer(parts.next().unwrap_or(0).into())),
    ]);
    let bytes = cbor_encode(&value).unwrap_or_default();
    if !out_blob.is_null() {
        // SAFETY: caller guarantees `out_blob` is a valid writable `Blob` slot.
        unsafe { *out_blob = Blob::from_vec(bytes) };
    }
    StatusCode::Ok as i32
}

/// `db_open(path, opts)` (§4.7, §6.2, §6.4): open (optionally creating) the
/// database directory at `path`, running crash recovery if needed.
///
/// # Safety
/// `path_ptr`/`path_len` must describe a valid UTF-8 byte range.
/// `opts_ptr`/`opts_len` must describe a valid byte range (a CBOR options
/// map, or `len == 0` for defaults). `out_db` and `out_error` must point to
/// valid, writable slots.
#[no_mangle]
pub unsafe extern "C" fn fdb_db_open(
    path_ptr: *const u8,
    path_len: usize,
    opts_ptr: *const u8,
    opts_len: usize,
    out_db: *mut *mut DbHandle,
    out_error: *mut Blob,
) -> i32 {
    let path_bytes = bytes_from_raw(path_ptr, path_len);
    let opts_bytes = bytes_from_raw(opts_ptr, opts_len);

    let result = (|| -> crate::error::Result<*mut DbHandle> {
        let path = std::str::from_utf8(path_bytes).map_err(|_| Error::invalid_argument("db_open path is not valid UTF-8"))?;
        let opts = OpenOptions::from_cbor(opts_bytes)?;
        let db = Database::open(path, opts)?;
        Ok(Box::into_raw(Box::new(DbHandle(db))))
    })();

    match result {
        Ok(ptr) => {
            if !out_db.is_null() {
                // SAFETY: caller guarantees `out_db` is a valid writable slot.
                unsafe { *out_db = ptr };
            }
            // SAFETY: see `succeed`.
            unsafe { succeed(out_error) }
        }
        Err(err) => {
            if !out_db.is_null() {
                // SAFETY: see above.
                unsafe { *out_db = std::ptr::null_mut() };
            }
            // SAFETY: see `fail`.
            unsafe { fail(err, out_error) }
        }
    }
}

/// `db_close(db)` (§4.7): checkpoint the superblock clean and release the
/// handle. `db` must not be used again after this call, and must have no
/// outstanding [`TxnHandle`]s.
///
/// # Safety
/// `db` must be a live pointer produced by [`fdb_db_open`] and not
/// previously passed to `fdb_db_close`.
#[no_mangle]
pub unsafe extern "C" fn fdb_db_close(db: *mut DbHandle) -> i32 {
    if db.is_null() {
        return StatusCode::ErrInvalidArgument as i32;
    }
    // SAFETY: caller guarantees `db` is a live handle from `fdb_db_open`.
    let handle = unsafe { Box::from_raw(db) };
    match handle.0.close() {
        Ok(()) => StatusCode::Ok as i32,
        Err(err) => StatusCode::from(err.kind()) as i32,
    }
}

/// `txn_begin(db, mode)` (§4.5, §4.7): `mode` is `0` for `read_only`, `1`
/// for `read_write`.
///
/// # Safety
/// `db` must be a live pointer from [`fdb_db_open`], kept alive (not
/// passed to `fdb_db_close`) for at least as long as the returned
/// transaction handle lives. `out_txn`/`out_error` must be valid writable
/// slots.
#[no_mangle]
pub unsafe extern "C" fn fdb_txn_begin(db: *mut DbHandle, mode: i32, out_txn: *mut *mut TxnHandle, out_error: *mut Blob) -> i32 {
    if db.is_null() {
        // SAFETY: see `fail`.
        return unsafe { fail(Error::invalid_argument("db handle is null"), out_error) };
    }
    // SAFETY: caller guarantees `db` is live for at least as long as the
    // transaction this call produces; we hand that borrow to `Transaction`
    // as `'static` on that promise, same as any opaque-handle FFI API.
    let handle: &'static DbHandle = unsafe { &*db };
    let mode = match mode {
        0 => TxnMode::ReadOnly,
        1 => TxnMode::ReadWrite,
        _ => {
            // SAFETY: see `fail`.
            return unsafe { fail(Error::invalid_argument("txn mode must be 0 (read_only) or 1 (read_write)"), out_error) };
        }
    };

    match handle.0.begin(mode) {
        Ok(txn) => {
            let ptr = Box::into_raw(Box::new(TxnHandle(txn)));
            if !out_txn.is_null() {
                // SAFETY: caller guarantees `out_txn` is a valid writable slot.
                unsafe { *out_txn = ptr };
            }
            // SAFETY: see `succeed`.
            unsafe { succeed(out_error) }
        }
        Err(err) => {
            if !out_txn.is_null() {
                // SAFETY: see above.
                unsafe { *out_txn = std::ptr::null_mut() };
            }
            // SAFETY: see `fail`.
            unsafe { fail(err, out_error) }
        }
    }
}

/// `txn_commit(txn)` (§4.5, §4.7). Consumes `txn`; it must not be used
/// again after this call regardless of outcome.
///
/// # Safety
/// `txn` must be a live pointer from [`fdb_txn_begin`] not previously
/// passed to `fdb_txn_commit` or `fdb_txn_abort`.
#[no_mangle]
pub unsafe extern "C" fn fdb_txn_commit(txn: *mut TxnHandle, out_error: *mut Blob) -> i32 {
    if txn.is_null() {
        // SAFETY: see `fail`.
        return unsafe { fail(Error::invalid_argument("txn handle is null"), out_error) };
    }
    // SAFETY: caller guarantees `txn` is a live handle from `fdb_txn_begin`.
    let mut handle = unsafe { Box::from_raw(txn) };
    match handle.0.commit() {
        // SAFETY: see `succeed`.
        Ok(()) => unsafe { succeed(out_error) },
        // SAFETY: see `fail`.
        Err(err) => unsafe { fail(err, out_error) },
    }
}

/// `txn_abort(txn)` (§4.5, §4.7). Consumes `txn`; it must not be used
/// again after this call regardless of outcome. An `IRREVERSIBLE` inverse
/// encountered mid-abort surfaces as `ERR_INTERNAL` per §4.5's explicit
/// irreversibility story, the database is left marked unrecoverable and
/// requires operator repair.
///
/// # Safety
/// `txn` must be a live pointer from [`fdb_txn_begin`] not previously
/// passed to `fdb_txn_commit` or `fdb_txn_abort`.
#[no_mangle]
pub unsafe extern "C" fn fdb_txn_abort(txn: *mut TxnHandle, out_error: *mut Blob) -> i32 {
    if txn.is_null() {
        // SAFETY: see `fail`.
        return unsafe { fail(Error::invalid_argument("txn handle is null"), out_error) };
    }
    // SAFETY: caller guarantees `txn` is a live handle from `fdb_txn_begin`.
    let mut handle = unsafe { Box::from_raw(txn) };
    match handle.0.abort() {
        // SAFETY: see `succeed`.
        Ok(()) => unsafe { succeed(out_error) },
        // SAFETY: see `fail`.
        Err(err) => unsafe { fail(err, out_error) },
    }
}

/// Extract and re-encode the `provenance` field of a decoded `apply` op
/// blob map; the remaining fields are left for [`Request::decode`] to
/// parse directly from the original bytes.
fn split_provenance(entries: &[(Value, Value)]) -> crate::error::Result<Vec<u8>> {
    let value = entries
        .iter()
        .find(|(k, _)| k.as_text() == Some("provenance"))
        .map(|(_, v)| v.clone())
        .ok_or_else(|| Error::invalid_argument("op blob missing required provenance field"))?;
    cbor_encode(&value)
}

/// `apply(txn, op_blob)` (§4.4, §4.7): decode a CBOR op (the request's own
/// fields plus a nested `provenance` map), plan + journal + apply it
/// through the model layer, and return the encoded [`Response`] and the
/// provenance actually recorded.
///
/// # Safety
/// `txn` must be a live pointer from [`fdb_txn_begin`]. `op_ptr`/`op_len`
/// must describe a valid byte range. `out_result`, `out_provenance`, and
/// `out_error` must be valid writable `Blob` slots.
#[no_mangle]
pub unsafe extern "C" fn fdb_apply(
    txn: *mut TxnHandle,
    op_ptr: *const u8,
    op_len: usize,
    out_result: *mut Blob,
    out_provenance: *mut Blob,
    out_error: *mut Blob,
) -> i32 {
    if txn.is_null() {
        // SAFETY: see `fail`.
        return unsafe { fail(Error::invalid_argument("txn handle is null"), out_error) };
    }
    let op_bytes = bytes_from_raw(op_ptr, op_len);
    // SAFETY: caller guarantees `txn` is a live handle from `fdb_txn_begin`.
    let handle = unsafe { &mut *txn };

    let result = (|| -> crate::error::Result<(Vec<u8>, Vec<u8>)> {
        let decoded = cbor_decode(op_bytes)?;
        let Value::Map(entries) = decoded else {
            return Err(Error::invalid_argument("op blob is not a CBOR map"));
        };
        let provenance_bytes = split_provenance(&entries)?;
        let request = Request::decode(op_bytes)?;
        let provenance = Provenance::from_cbor(&provenance_bytes)?;
        let response = handle.0.apply(request, provenance.clone())?;
        Ok((response.encode()?, provenance.to_cbor()?))
    })();

    match result {
        Ok((result_bytes, provenance_bytes)) => {
            if !out_result.is_null() {
                // SAFETY: caller guarantees `out_result` is a valid writable slot.
                unsafe { *out_result = Blob::from_vec(result_bytes) };
            }
            if !out_provenance.is_null() {
                // SAFETY: caller guarantees `out_provenance` is a valid writable slot.
                unsafe { *out_provenance = Blob::from_vec(provenance_bytes) };
            }
            // SAFETY: see `succeed`.
            unsafe { succeed(out_error) }
        }
        Err(err) => {
            if !out_result.is_null() {
                // SAFETY: see above.
                unsafe { *out_result = Blob::empty() };
            }
            if !out_provenance.is_null() {
                // SAFETY: see above.
                unsafe { *out_provenance = Blob::empty() };
            }
            // SAFETY: see `fail`.
            unsafe { fail(err, out_error) }
        }
    }
}

/// `introspect_schema(db)` (§4.7): every live collection's schema block as
/// a CBOR array.
///
/// # Safety
/// `db` must be a live pointer from [`fdb_db_open`]. `out_blob`/`out_error`
/// must be valid writable slots.
#[no_mangle]
pub unsafe extern "C" fn fdb_introspect_schema(db: *mut DbHandle, out_blob: *mut Blob, out_error: *mut Blob) -> i32 {
    if db.is_null() {
        // SAFETY: see `fail`.
        return unsafe { fail(Error::invalid_argument("db handle is null"), out_error) };
    }
    // SAFETY: caller guarantees `db` is a live handle from `fdb_db_open`.
    let handle = unsafe { &*db };
    match handle.0.introspect_schema() {
        Ok(bytes) => {
            if !out_blob.is_null() {
                // SAFETY: see above.
                unsafe { *out_blob = Blob::from_vec(bytes) };
            }
            // SAFETY: see `succeed`.
            unsafe { succeed(out_error) }
        }
        // SAFETY: see `fail`.
        Err(err) => unsafe { fail(err, out_error) },
    }
}

/// `introspect_constraints(db)` (§4.7): every live collection's constraint
/// set as a CBOR array.
///
/// # Safety
/// Same as [`fdb_introspect_schema`].
#[no_mangle]
pub unsafe extern "C" fn fdb_introspect_constraints(db: *mut DbHandle, out_blob: *mut Blob, out_error: *mut Blob) -> i32 {
    if db.is_null() {
        // SAFETY: see `fail`.
        return unsafe { fail(Error::invalid_argument("db handle is null"), out_error) };
    }
    // SAFETY: caller guarantees `db` is a live handle from `fdb_db_open`.
    let handle = unsafe { &*db };
    match handle.0.introspect_constraints() {
        Ok(bytes) => {
            if !out_blob.is_null() {
                // SAFETY: see above.
                unsafe { *out_blob = Blob::from_vec(bytes) };
            }
            // SAFETY: see `succeed`.
            unsafe { succeed(out_error) }
        }
        // SAFETY: see `fail`.
        Err(err) => unsafe { fail(err, out_error) },
    }
}

/// `render_block(db, id, opts)` (§4.2, §4.7, §6.3): deterministic canonical
/// text render of one block, as a UTF-8 text blob. `opts` is currently
/// ignored (no render option keys are defined yet) but threaded through
/// for forward compatibility.
///
/// # Safety
/// `db` must be a live pointer from [`fdb_db_open`]. `opts_ptr`/`opts_len`
/// must describe a valid byte range. `out_text`/`out_error` must be valid
/// writable slots.
#[no_mangle]
pub unsafe extern "C" fn fdb_render_block(
    db: *mut DbHandle,
    block_id: u64,
    opts_ptr: *const u8,
    opts_len: usize,
    out_text: *mut Blob,
    out_error: *mut Blob,
) -> i32 {
    if db.is_null() {
        // SAFETY: see `fail`.
        return unsafe { fail(Error::invalid_argument("db handle is null"), out_error) };
    }
    let _ = bytes_from_raw(opts_ptr, opts_len);
    // SAFETY: caller guarantees `db` is a live handle from `fdb_db_open`.
    let handle = unsafe { &*db };
    match handle.0.render_block(block_id, &RenderOptions::default()) {
        Ok(text) => {
            if !out_text.is_null() {
                // SAFETY: see above.
                unsafe { *out_text = Blob::from_vec(text.into_bytes()) };
            }
            // SAFETY: see `succeed`.
            unsafe { succeed(out_error) }
        }
        // SAFETY: see `fail`.
        Err(err) => unsafe { fail(err, out_error) },
    }
}

/// `render_journal(db, since, opts)` (§4.3, §4.7, §6.3): deterministic
/// canonical text render of every completed journal entry since `since`,
/// in sequence order.
///
/// # Safety
/// Same as [`fdb_render_block`].
#[no_mangle]
pub unsafe extern "C" fn fdb_render_journal(
    db: *mut DbHandle,
    since_seq: u64,
    opts_ptr: *const u8,
    opts_len: usize,
    out_text: *mut Blob,
    out_error: *mut Blob,
) -> i32 {
    if db.is_null() {
        // SAFETY: see `fail`.
        return unsafe { fail(Error::invalid_argument("db handle is null"), out_error) };
    }
    let _ = bytes_from_raw(opts_ptr, opts_len);
    // SAFETY: caller guarantees `db` is a live handle from `fdb_db_open`.
    let handle = unsafe { &*db };
    match handle.0.render_journal(since_seq) {
        Ok(text) => {
            if !out_text.is_null() {
                // SAFETY: see above.
                unsafe { *out_text = Blob::from_vec(text.into_bytes()) };
            }
            // SAFETY: see `succeed`.
            unsafe { succeed(out_error) }
        }
        // SAFETY: see `fail`.
        Err(err) => unsafe { fail(err, out_error) },
    }
}

/// `proof_verify(blob)` (§4.6, §4.7): dispatch a CBOR `{proof_type, body}`
/// proof blob to its registered verifier and return `{valid, reason?}`.
///
/// # Safety
/// `proof_ptr`/`proof_len` must describe a valid byte range.
/// `out_result`/`out_error` must be valid writable slots.
#[no_mangle]
pub unsafe extern "C" fn fdb_proof_verify(proof_ptr: *const u8, proof_len: usize, out_result: *mut Blob, out_error: *mut Blob) -> i32 {
    let proof_bytes = bytes_from_raw(proof_ptr, proof_len);
    let outcome = catch(|| {
        let verdict = proof::verify_proof(proof_bytes)?;
        let bytes = verdict.to_cbor()?;
        if !out_result.is_null() {
            // SAFETY: caller guarantees `out_result` is a valid writable slot.
            unsafe { *out_result = Blob::from_vec(bytes) };
        }
        Ok(())
    });
    match outcome {
        // SAFETY: see `succeed`.
        Ok(()) => unsafe { succeed(out_error) },
        Err(err) => {
            if !out_result.is_null() {
                // SAFETY: see above.
                unsafe { *out_result = Blob::empty() };
            }
            // SAFETY: see `fail`.
            unsafe { fail(err, out_error) }
        }
    }
}

/// `proof_init_builtins()` (§4.6, §4.7): register the built-in proof
/// verifiers. Idempotent; safe to call more than once per process.
#[no_mangle]
pub extern "C" fn fdb_proof_init_builtins() -> i32 {
    proof::init_builtins();
    StatusCode::Ok as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::cbor_encode;

    fn provenance_value() -> Value {
        Value::Map(vec![
            (Value::Text("actor".into()), Value::Text("alice".into())),
            (Value::Text("rationale".into()), Value::Text("smoke".into())),
        ])
    }

    fn op_blob(mut fields: Vec<(&str, Value)>) -> Vec<u8> {
        fields.push(("provenance", provenance_value()));
        let map = Value::Map(fields.into_iter().map(|(k, v)| (Value::Text(k.into()), v)).collect());
        cbor_encode(&map).unwrap()
    }

    #[test]
    fn full_lifecycle_through_the_c_abi() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap().as_bytes();

        let mut db_ptr: *mut DbHandle = std::ptr::null_mut();
        let mut error = Blob::empty();
        // SAFETY: all pointers below are valid local slots / borrowed byte slices.
        let status = unsafe { fdb_db_open(path.as_ptr(), path.len(), std::ptr::null(), 0, &mut db_ptr, &mut error) };
        assert_eq!(status, StatusCode::Ok as i32);
        assert!(!db_ptr.is_null());

        let mut txn_ptr: *mut TxnHandle = std::ptr::null_mut();
        let status = unsafe { fdb_txn_begin(db_ptr, 1, &mut txn_ptr, &mut error) };
        assert_eq!(status, StatusCode::Ok as i32);
        assert!(!txn_ptr.is_null());

        let create_op = op_blob(vec![("op", Value::Text("collection_create".into())), ("name", Value::Text("users".into())), ("kind", Value::Text("document".into()))]);
        let mut result_blob = Blob::empty();
        let mut provenance_blob = Blob::empty();
        let status = unsafe {
            fdb_apply(txn_ptr, create_op.as_ptr(), create_op.len(), &mut result_blob, &mut provenance_blob, &mut error)
        };
        assert_eq!(status, StatusCode::Ok as i32);
        unsafe {
            assert!(!result_blob.ptr.is_null());
            fdb_blob_free(&mut result_blob);
            assert!(!provenance_blob.ptr.is_null());
            fdb_blob_free(&mut provenance_blob);
        }

        let status = unsafe { fdb_txn_commit(txn_ptr, &mut error) };
        assert_eq!(status, StatusCode::Ok as i32);

        let mut schema_blob = Blob::empty();
        let status = unsafe { fdb_introspect_schema(db_ptr, &mut schema_blob, &mut error) };
        assert_eq!(status, StatusCode::Ok as i32);
        unsafe { fdb_blob_free(&mut schema_blob) };

        let status = unsafe { fdb_db_close(db_ptr) };
        assert_eq!(status, StatusCode::Ok as i32);
    }

    #[test]
    fn apply_without_provenance_is_invalid_argument() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap().as_bytes();
        let mut db_ptr: *mut DbHandle = std::ptr::null_mut();
        let mut error = Blob::empty();
        unsafe { fdb_db_open(path.as_ptr(), path.len(), std::ptr::null(), 0, &mut db_ptr, &mut error) };

        let mut txn_ptr: *mut TxnHandle = std::ptr::null_mut();
        unsafe { fdb_txn_begin(db_ptr, 1, &mut txn_ptr, &mut error) };

        let bad_op = cbor_encode(&Value::Map(vec![(Value::Text("op".into()), Value::Text("collection_create".into()))])).unwrap();
        let mut result_blob = Blob::empty();
        let mut provenance_blob = Blob::empty();
        let status = unsafe { fdb_apply(txn_ptr, bad_op.as_ptr(), bad_op.len(), &mut result_blob, &mut provenance_blob, &mut error) };
        assert_eq!(status, StatusCode::ErrInvalidArgument as i32);
        unsafe {
            fdb_blob_free(&mut error);
            fdb_txn_abort(txn_ptr, &mut error);
            fdb_db_close(db_ptr);
        }
    }

    #[test]
    fn proof_verify_unknown_type_is_not_implemented() {
        fdb_proof_init_builtins();
        let blob = cbor_encode(&Value::Map(vec![(Value::Text("proof_type".into()), Value::Text("nope".into()))])).unwrap();
        let mut result = Blob::empty();
        let mut error = Blob::empty();
        let status = unsafe { fdb_proof_verify(blob.as_ptr(), blob.len(), &mut result, &mut error) };
        assert_eq!(status, StatusCode::ErrNotImplemented as i32);
        unsafe { fdb_blob_free(&mut error) };
    }

    #[test]
    fn version_reports_something_sane() {
        let mut blob = Blob::empty();
        let status = unsafe { fdb_version(&mut blob) };
        assert_eq!(status, StatusCode::Ok as i32);
        let bytes = unsafe { slice::from_raw_parts(blob.ptr, blob.len) };
        let decoded = cbor_decode(bytes).unwrap();
        assert!(matches!(decoded, Value::Map(_)));
        unsafe { fdb_blob_free(&mut blob) };
    }
}
