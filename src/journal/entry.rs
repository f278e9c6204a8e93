//! In-flight journal entry construction (§4.3).

use super::types::{Inverse, OpType};
use crate::error::{Error, Result};

/// Builder for a single journal entry. Nothing is written until
/// [`super::Journal::commit_entry`] consumes it; [`super::Journal::rollback_entry`]
/// (or simply dropping the builder) discards it without writing.
pub struct EntryBuilder {
    pub(super) op_type: OpType,
    pub(super) affected_block: u64,
    pub(super) forward: Option<Vec<u8>>,
    pub(super) inverse: Option<Inverse>,
    pub(super) provenance: Option<Vec<u8>>,
}

impl EntryBuilder {
    pub(super) fn new(op_type: OpType, affected_block: u64) -> Self {
        Self { op_type, affected_block, forward: None, inverse: None, provenance: None }
    }

    pub fn set_forward(&mut self, cbor_bytes: Vec<u8>) {
        self.forward = Some(cbor_bytes);
    }

    pub fn set_inverse(&mut self, inverse: Inverse) {
        self.inverse = Some(inverse);
    }

    /// Attach provenance. Must carry at least `actor` and `rationale`,
    /// enforced when the entry is actually committed, by which point the
    /// bytes have already been validated via `Provenance::to_cbor`.
    pub fn set_provenance(&mut self, cbor_bytes: Vec<u8>) {
        self.provenance = Some(cbor_bytes);
    }

    pub(super) fn into_parts(self) -> Result<(OpType, u64, Vec<u8>, Inverse, Vec<u8>)> {
        let forward = self.forward.ok_or_else(|| Error::invalid_argument("entry missing forward payload"))?;
        let inverse = self.inverse.ok_or_else(|| Error::invalid_argument("entry missing inverse payload"))?;
        let provenance = self.provenance.ok_or_else(|| Error::invalid_argument("entry missing provenance payload"))?;
        Ok((self.op_type, self.affected_block, forward, inverse, provenance))
    }
}
