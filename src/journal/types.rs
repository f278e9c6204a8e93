//! Journal entry wire format (§3.3): the 48-byte header plus the three CBOR
//! payloads (forward, inverse, provenance) that follow it.

use byteorder::{ByteOrder, LittleEndian};
use ciborium::value::Value;

use crate::codec::{cbor_decode, cbor_encode, tagged};
use crate::consts::{cbor_tag, JournalEntryFlags, JOURNAL_HEADER_SIZE};
use crate::error::{Error, ErrorKind, Result};

/// Operation kind, stored in the entry header's `op_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OpType {
    CollectionCreate = 1,
    CollectionDrop = 2,
    DocInsert = 3,
    DocUpdate = 4,
    DocDelete = 5,
    EdgeInsert = 6,
    EdgeUpdate = 7,
    EdgeDelete = 8,
    SchemaSet = 9,
    ConstraintSet = 10,
    MigrationAnnounce = 11,
    MigrationShadow = 12,
    MigrationCommit = 13,
}

impl OpType {
    pub fn from_u16(raw: u16) -> Result<Self> {
        Ok(match raw {
            1 => Self::CollectionCreate,
            2 => Self::CollectionDrop,
            3 => Self::DocInsert,
            4 => Self::DocUpdate,
            5 => Self::DocDelete,
            6 => Self::EdgeInsert,
            7 => Self::EdgeUpdate,
            8 => Self::EdgeDelete,
            9 => Self::SchemaSet,
            10 => Self::ConstraintSet,
            11 => Self::MigrationAnnounce,
            12 => Self::MigrationShadow,
            13 => Self::MigrationCommit,
            other => return Err(Error::with_message(ErrorKind::InvalidArgument, format!("unknown op_type {other}"))),
        })
    }
}

/// Decoded 48-byte journal entry header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalEntryHeader {
    pub sequence: u64,
    pub timestamp: u64,
    pub op_type: u16,
    pub flags: JournalEntryFlags,
    pub forward_len: u32,
    pub inverse_len: u32,
    pub provenance_len: u32,
    pub affected_block: u64,
    pub checksum: u32,
    pub entry_len: u32,
}

impl JournalEntryHeader {
    pub fn encode(&self) -> [u8; JOURNAL_HEADER_SIZE] {
        let mut buf = [0u8; JOURNAL_HEADER_SIZE];
        LittleEndian::write_u64(&mut buf[0..8], self.sequence);
        LittleEndian::write_u64(&mut buf[8..16], self.timestamp);
        LittleEndian::write_u16(&mut buf[16..18], self.op_type);
        LittleEndian::write_u16(&mut buf[18..20], self.flags.bits());
        LittleEndian::write_u32(&mut buf[20..24], self.forward_len);
        LittleEndian::write_u32(&mut buf[24..28], self.inverse_len);
        LittleEndian::write_u32(&mut buf[28..32], self.provenance_len);
        LittleEndian::write_u64(&mut buf[32..40], self.affected_block);
        LittleEndian::write_u32(&mut buf[40..44], self.checksum);
        LittleEndian::write_u32(&mut buf[44..48], self.entry_len);
        buf
    }

    pub fn decode(buf: &[u8; JOURNAL_HEADER_SIZE]) -> Self {
        Self {
            sequence: LittleEndian::read_u64(&buf[0..8]),
            timestamp: LittleEndian::read_u64(&buf[8..16]),
            op_type: LittleEndian::read_u16(&buf[16..18]),
            flags: JournalEntryFlags::from_bits_truncate(LittleEndian::read_u16(&buf[18..20])),
            forward_len: LittleEndian::read_u32(&buf[20..24]),
            inverse_len: LittleEndian::read_u32(&buf[24..28]),
            provenance_len: LittleEndian::read_u32(&buf[28..32]),
            affected_block: LittleEndian::read_u64(&buf[32..40]),
            checksum: LittleEndian::read_u32(&buf[40..44]),
            entry_len: LittleEndian::read_u32(&buf[44..48]),
        }
    }

    /// Offset of the `flags` field within the encoded header, used to amend
    /// the `UNCOMPLETED` bit in place after a failed block-effect phase
    /// (§4.3 step 3) without rewriting the rest of an append-only entry.
    pub const FLAGS_OFFSET: usize = 18;
}

/// Inverse payload: either a runnable undo operation, or an explicit
/// irreversibility classification with a mandatory story.
#[derive(Debug, Clone, PartialEq)]
pub enum Inverse {
    Apply(Vec<u8>),
    Irreversible { story: String },
}

impl Inverse {
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        match self {
            Inverse::Apply(bytes) => Ok(bytes.clone()),
            Inverse::Irreversible { story } => {
                let value = tagged(
                    cbor_tag::IRREVERSIBILITY_SENTINEL,
                    Value::Map(vec![(Value::Text("story".into()), Value::Text(story.clone()))]),
                );
                cbor_encode(&value)
            }
        }
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let value = cbor_decode(bytes)?;
        if let Value::Tag(tag, inner) = &value {
            if *tag == cbor_tag::IRREVERSIBILITY_SENTINEL {
                let Value::Map(entries) = inner.as_ref() else {
                    return Err(Error::invalid_argument("IRREVERSIBLE sentinel must wrap a map"));
                };
                let story = entries
                    .iter()
                    .find(|(k, _)| k.as_text() == Some("story"))
                    .and_then(|(_, v)| v.as_text())
                    .ok_or_else(|| Error::invalid_argument("IRREVERSIBLE sentinel requires a story field"))?
                    .to_string();
                return Ok(Inverse::Irreversible { story });
            }
        }
        Ok(Inverse::Apply(bytes.to_vec()))
    }

    pub fn is_irreversible(&self) -> bool {
        matches!(self, Inverse::Irreversible { .. })
    }
}

/// Provenance metadata attached to every mutation (§3.3).
#[derive(Debug, Clone, PartialEq)]
pub struct Provenance {
    pub actor: String,
    pub rationale: String,
    pub source: Option<String>,
    pub timestamp: Option<u64>,
    pub confidence: Option<f64>,
    pub tags: Vec<String>,
}

impl Provenance {
    pub fn new(actor: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            rationale: rationale.into(),
            source: None,
            timestamp: None,
            confidence: None,
            tags: Vec::new(),
        }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut entries = vec![
            (Value::Text("actor".into()), Value::Text(self.actor.clone())),
            (Value::Text("rationale".into()), Value::Text(self.rationale.clone())),
        ];
        if let Some(source) = &self.source {
            entries.push((Value::Text("source".into()), Value::Text(source.clone())));
        }
        if let Some(ts) = self.timestamp {
            entries.push((Value::Text("timestamp".into()), Value::Integer(ts.into())));
        }
        if let Some(confidence) = self.confidence {
            entries.push((Value::Text("confidence".into()), Value::Float(confidence)));
        }
        if !self.tags.is_empty() {
            entries.push((
                Value::Text("tags".into()),
                Value::Array(self.tags.iter().cloned().map(Value::Text).collect()),
            ));
        }
        cbor_encode(&tagged(cbor_tag::PROVENANCE, Value::Map(entries)))
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let value = cbor_decode(bytes)?;
        let inner = match &value {
            Value::Tag(tag, inner) if *tag == cbor_tag::PROVENANCE => inner.as_ref(),
            other => other,
        };
        let Value::Map(entries) = inner else {
            return Err(Error::invalid_argument("provenance payload is not a CBOR map"));
        };
        let get = |key: &str| entries.iter().find(|(k, _)| k.as_text() == Some(key)).map(|(_, v)| v);

        let actor = get("actor")
            .and_then(Value::as_text)
            .ok_or_else(|| Error::invalid_argument("provenance missing required field: actor"))?
            .to_string();
        let rationale = get("rationale")
            .and_then(Value::as_text)
            .ok_or_else(|| Error::invalid_argument("provenance missing required field: rationale"))?
            .to_string();
        let source = get("source").and_then(Value::as_text).map(str::to_string);
        let timestamp = get("timestamp").and_then(Value::as_integer).and_then(|i| u64::try_from(i).ok());
        let confidence = get("confidence").and_then(Value::as_float);
        let tags = get("tags")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_text).map(str::to_string).collect())
            .unwrap_or_default();

        Ok(Self { actor, rationale, source, timestamp, confidence, tags })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = JournalEntryHeader {
            sequence: 7,
            timestamp: 123,
            op_type: OpType::DocInsert as u16,
            flags: JournalEntryFlags::empty(),
            forward_len: 10,
            inverse_len: 20,
            provenance_len: 30,
            affected_block: 5,
            checksum: 0xaabb,
            entry_len: 108,
        };
        assert_eq!(JournalEntryHeader::decode(&h.encode()), h);
    }

    #[test]
    fn provenance_requires_actor_and_rationale() {
        let value = Value::Map(vec![(Value::Text("actor".into()), Value::Text("alice".into()))]);
        let bytes = cbor_encode(&value).unwrap();
        assert!(Provenance::from_cbor(&bytes).is_err());
    }

    #[test]
    fn provenance_round_trips() {
        let mut p = Provenance::new("alice", "smoke test");
        p.confidence = Some(0.9);
        p.tags = vec!["t1".into()];
        let bytes = p.to_cbor().unwrap();
        let decoded = Provenance::from_cbor(&bytes).unwrap();
        assert_eq!(p, decoded);
    }

    #[test]
    fn irreversible_inverse_requires_story() {
        let value = tagged(cbor_tag::IRREVERSIBILITY_SENTINEL, Value::Map(vec![]));
        let bytes = cbor_encode(&value).unwrap();
        assert!(Inverse::from_cbor(&bytes).is_err());
    }
}
