//! Proof verifier registry (§4.6): a process-wide `proof_type → verifier`
//! dispatch table. The registry performs no cryptography itself, each
//! verifier is a plain function that inspects a decoded proof body and
//! reports whether it holds; the registry's only job is routing a blob to
//! the right one by its `proof_type` field.
//!
//! Registered once at startup via [`init_builtins`] and treated as
//! read-only afterward (§4.5's shared-resource policy), the same way the
//! teacher's block cache is sized once at attach time and never resized
//! mid-session.

use std::collections::HashMap;
use std::sync::OnceLock;

use ciborium::value::Value;
use parking_lot::RwLock;

use crate::codec::{cbor_decode, cbor_encode};
use crate::error::{Error, Result};

/// Outcome of checking a proof blob against its claimed type.
#[derive(Debug, Clone, PartialEq)]
pub struct ProofVerdict {
    pub valid: bool,
    pub reason: Option<String>,
}

impl ProofVerdict {
    pub fn valid() -> Self {
        Self { valid: true, reason: None }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self { valid: false, reason: Some(reason.into()) }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut entries = vec![(Value::Text("valid".into()), Value::Bool(self.valid))];
        if let Some(reason) = &self.reason {
            entries.push((Value::Text("reason".into()), Value::Text(reason.clone())));
        }
        cbor_encode(&Value::Map(entries))
    }
}

/// A verifier callback: takes the decoded proof body bytes, returns a
/// verdict or an error if the body itself is malformed.
pub type VerifierFn = fn(&[u8]) -> Result<ProofVerdict>;

static REGISTRY: OnceLock<RwLock<HashMap<String, VerifierFn>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<String, VerifierFn>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register (or replace) the verifier for a proof type. Exposed for
/// embedders that extend the registry beyond the built-in types; the
/// built-ins themselves go through [`init_builtins`].
pub fn register(proof_type: impl Into<String>, verifier: VerifierFn) {
    registry().write().insert(proof_type.into(), verifier);
}

/// Register the built-in proof types. Idempotent, safe to call more than
/// once (e.g. once per `db_open` in a process that opens several
/// databases); later calls just overwrite with the same function pointers.
pub fn init_builtins() {
    register("fd_proof", verify_fd_proof);
    register("normalization_step", verify_normalization_step);
}

/// Decode `proof_blob` as `{"proof_type": text, "body": bytes}`, dispatch
/// to the matching verifier, and return its verdict. An unregistered
/// `proof_type` is `ERR_NOT_IMPLEMENTED`, per §4.6.
pub fn verify_proof(proof_blob: &[u8]) -> Result<ProofVerdict> {
    let value = cbor_decode(proof_blob)?;
    let Value::Map(entries) = value else {
        return Err(Error::invalid_argument("proof blob is not a CBOR map"));
    };
    let get = |key: &str| entries.iter().find(|(k, _)| k.as_text() == Some(key)).map(|(_, v)| v);
    let proof_type = get("proof_type").and_then(Value::as_text).ok_or_else(|| Error::invalid_argument("proof blob missing proof_type"))?;
    let body = get("body").and_then(Value::as_bytes).cloned().unwrap_or_default();

    let verifier = {
        let guard = registry().read();
        guard.get(proof_type).copied()
    };
    match verifier {
        Some(f) => f(&body),
        None => Err(Error::not_implemented("no verifier registered for this proof type")),
    }
}

fn text_array(value: &Value, key: &str) -> Vec<String> {
    match value {
        Value::Map(entries) => entries
            .iter()
            .find(|(k, _)| k.as_text() == Some(key))
            .and_then(|(_, v)| v.as_array())
            .map(|items| items.iter().filter_map(Value::as_text).map(str::to_string).collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn int_field(value: &Value, key: &str) -> Option<i128> {
    match value {
        Value::Map(entries) => entries.iter().find(|(k, _)| k.as_text() == Some(key)).and_then(|(_, v)| v.as_integer()).map(i128::from),
        _ => None,
    }
}

/// Built-in functional-dependency proof: a claim that `determinant` fields
/// functionally determine `dependent` fields, backed by a pre-computed
/// count of rows that violate it in the sample the proof was built from.
fn verify_fd_proof(body: &[u8]) -> Result<ProofVerdict> {
    let value = cbor_decode(body)?;
    let determinant = text_array(&value, "determinant");
    let dependent = text_array(&value, "dependent");
    if determinant.is_empty() || dependent.is_empty() {
        return Ok(ProofVerdict::invalid("functional-dependency proof names no determinant or dependent fields"));
    }
    let violations = int_field(&value, "witness_violations").unwrap_or(0);
    if violations == 0 {
        Ok(ProofVerdict::valid())
    } else {
        Ok(ProofVerdict::invalid(format!("{violations} row(s) in the witness sample violate the claimed dependency")))
    }
}

/// Built-in normalization-step proof: a claim that splitting a collection
/// against a target schema introduces no data loss, backed by a
/// pre-computed violation count (e.g. rows that would not round-trip).
fn verify_normalization_step(body: &[u8]) -> Result<ProofVerdict> {
    let value = cbor_decode(body)?;
    let source = match &value {
        Value::Map(entries) => entries.iter().find(|(k, _)| k.as_text() == Some("source_collection")).and_then(|(_, v)| v.as_text()),
        _ => None,
    };
    if source.is_none() {
        return Ok(ProofVerdict::invalid("normalization-step proof missing source_collection"));
    }
    let violations = int_field(&value, "violations").unwrap_or(0);
    if violations == 0 {
        Ok(ProofVerdict::valid())
    } else {
        Ok(ProofVerdict::invalid(format!("{violations} row(s) would not round-trip under the proposed normalization")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(proof_type: &str, body: Value) -> Vec<u8> {
        let body_bytes = cbor_encode(&body).unwrap();
        cbor_encode(&Value::Map(vec![
            (Value::Text("proof_type".into()), Value::Text(proof_type.into())),
            (Value::Text("body".into()), Value::Bytes(body_bytes)),
        ]))
        .unwrap()
    }

    #[test]
    fn unregistered_proof_type_is_not_implemented() {
        let blob = blob("quantum_entanglement", Value::Map(vec![]));
        let err = verify_proof(&blob).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotImplemented);
    }

    #[test]
    fn fd_proof_with_no_violations_is_valid() {
        init_builtins();
        let body = Value::Map(vec![
            (Value::Text("determinant".into()), Value::Array(vec![Value::Text("email".into())])),
            (Value::Text("dependent".into()), Value::Array(vec![Value::Text("user_id".into())])),
            (Value::Text("witness_violations".into()), Value::Integer(0.into())),
        ]);
        let verdict = verify_proof(&blob("fd_proof", body)).unwrap();
        assert!(verdict.valid);
    }

    #[test]
    fn fd_proof_with_violations_is_invalid() {
        init_builtins();
        let body = Value::Map(vec![
            (Value::Text("determinant".into()), Value::Array(vec![Value::Text("email".into())])),
            (Value::Text("dependent".into()), Value::Array(vec![Value::Text("user_id".into())])),
            (Value::Text("witness_violations".into()), Value::Integer(3.into())),
        ]);
        let verdict = verify_proof(&blob("fd_proof", body)).unwrap();
        assert!(!verdict.valid);
        assert!(verdict.reason.unwrap().contains('3'));
    }

    #[test]
    fn normalization_step_proof_round_trips_through_registry() {
        init_builtins();
        let body = Value::Map(vec![
            (Value::Text("source_collection".into()), Value::Text("users".into())),
            (Value::Text("violations".into()), Value::Integer(0.into())),
        ]);
        let verdict = verify_proof(&blob("normalization_step", body)).unwrap();
        assert!(verdict.valid);
    }
}
