//! lithoglyph_core: an audit-grade database core.
//!
//! A single-writer, append-journaled store built from fixed-size
//! checksummed blocks (§3-4): a [`block`] layer for page I/O, a [`journal`]
//! for write-ahead durability, a [`model`] layer translating collection and
//! document operations into journaled block effects, a [`transaction`]
//! manager serializing callers against one [`db::Database`] handle, and a
//! [`proof`] verifier registry for externally-attached attestations.
//!
//! The [`abi`] module (behind the `abi` feature, enabled by default) is the
//! `extern "C"` bridge for non-Rust callers; everything else is ordinary
//! safe Rust.
//!
//! # Example
//!
//! ```rust,no_run
//! use lithoglyph_core::db::{Database, OpenOptions};
//! use lithoglyph_core::transaction::{Request, TxnMode};
//! use lithoglyph_core::journal::Provenance;
//! use lithoglyph_core::model::CollectionKind;
//!
//! fn main() -> lithoglyph_core::Result<()> {
//!     let db = Database::open("./data", OpenOptions::create())?;
//!     let mut txn = db.begin(TxnMode::ReadWrite)?;
//!     txn.apply(
//!         Request::CreateCollection { name: "notes".into(), kind: CollectionKind::Document },
//!         Provenance::new("example", "bootstrap"),
//!     )?;
//!     txn.commit()?;
//!     Ok(())
//! }
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

/// Crate-wide error type and taxonomy.
pub mod error;

/// CRC32C checksums and canonical CBOR encode/decode.
pub mod codec;

/// On-disk layout constants and flag bits.
pub mod consts;

/// Free-list/next-id allocator bookkeeping shared by the superblock and block store.
pub mod allocator;

/// Fixed-size block store: allocation, checksum-verified I/O, rendering.
pub mod block;

/// The distinguished superblock at block id 0.
pub mod superblock;

/// Append-only write-ahead journal.
pub mod journal;

/// Collections, documents, edges, schema, constraints, migrations.
pub mod model;

/// Per-handle transaction manager.
pub mod transaction;

/// Proof verifier registry.
pub mod proof;

/// Top-level database handle: open/close, recovery, introspection.
pub mod db;

/// Opaque-handle `extern "C"` bridge for non-Rust callers.
#[cfg(feature = "abi")]
pub mod abi;

pub use error::{Error, ErrorKind, Result};
