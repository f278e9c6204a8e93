//! Migration record payload (§11): the durable state machine backing the
//! three migration phases, `announce` (intent only), `shadow` (write to
//! new blocks while the original stays authoritative), `commit` (atomic
//! `head_block_id` swap).

use ciborium::value::Value;

use crate::codec::{cbor_decode, cbor_encode};
use crate::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    Announced,
    Shadowed,
    Committed,
}

impl MigrationPhase {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Announced => "announced",
            Self::Shadowed => "shadowed",
            Self::Committed => "committed",
        }
    }

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "announced" => Ok(Self::Announced),
            "shadowed" => Ok(Self::Shadowed),
            "committed" => Ok(Self::Committed),
            other => Err(Error::with_message(ErrorKind::InvalidArgument, format!("unknown migration phase {other:?}"))),
        }
    }
}

/// The payload of a `MIGRATION` block: one record per migration, updated in
/// place as it advances through its phases.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationMeta {
    pub source_collection: String,
    pub target_schema: Vec<u8>,
    pub phase: MigrationPhase,
    pub shadow_head: Option<u64>,
}

impl MigrationMeta {
    pub fn announce(source_collection: impl Into<String>, target_schema: Vec<u8>) -> Self {
        Self { source_collection: source_collection.into(), target_schema, phase: MigrationPhase::Announced, shadow_head: None }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut entries = vec![
            (Value::Text("source_collection".into()), Value::Text(self.source_collection.clone())),
            (Value::Text("target_schema".into()), Value::Bytes(self.target_schema.clone())),
            (Value::Text("phase".into()), Value::Text(self.phase.as_str().into())),
        ];
        if let Some(head) = self.shadow_head {
            entries.push((Value::Text("shadow_head".into()), Value::Integer(head.into())));
        }
        cbor_encode(&Value::Map(entries))
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let value = cbor_decode(bytes)?;
        let Value::Map(entries) = value else {
            return Err(Error::invalid_argument("migration record is not a CBOR map"));
        };
        let get = |key: &str| entries.iter().find(|(k, _)| k.as_text() == Some(key)).map(|(_, v)| v);
        Ok(Self {
            source_collection: get("source_collection")
                .and_then(Value::as_text)
                .ok_or_else(|| Error::invalid_argument("migration record missing source_collection"))?
                .to_string(),
            target_schema: get("target_schema").and_then(Value::as_bytes).cloned().unwrap_or_default(),
            phase: MigrationPhase::from_str(
                get("phase").and_then(Value::as_text).ok_or_else(|| Error::invalid_argument("migration record missing phase"))?,
            )?,
            shadow_head: get("shadow_head").and_then(Value::as_integer).and_then(|i| u64::try_from(i).ok()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_every_phase() {
        let mut meta = MigrationMeta::announce("users", vec![1, 2, 3]);
        assert_eq!(MigrationMeta::from_cbor(&meta.to_cbor().unwrap()).unwrap(), meta);

        meta.phase = MigrationPhase::Shadowed;
        meta.shadow_head = Some(7);
        assert_eq!(MigrationMeta::from_cbor(&meta.to_cbor().unwrap()).unwrap(), meta);

        meta.phase = MigrationPhase::Committed;
        assert_eq!(MigrationMeta::from_cbor(&meta.to_cbor().unwrap()).unwrap(), meta);
    }
}
