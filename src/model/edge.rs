//! Edge payload layout (§4.4): a fixed-width header embedded in the block
//! payload, followed by CBOR-encoded properties.
//!
//! ```text
//! 64 B from_collection | 16 B from_id | 64 B to_collection
//! | 16 B to_id | 64 B edge_type | remainder: CBOR properties
//! ```

use crate::error::{Error, Result};

const NAME_FIELD: usize = 64;
const ID_FIELD: usize = 16;
const HEADER_LEN: usize = NAME_FIELD * 3 + ID_FIELD * 2;

/// Decoded edge payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgePayload {
    pub from_collection: String,
    pub from_id: u64,
    pub to_collection: String,
    pub to_id: u64,
    pub edge_type: String,
    pub properties: Vec<u8>,
}

fn write_fixed_text(buf: &mut Vec<u8>, text: &str, width: usize) -> Result<()> {
    let bytes = text.as_bytes();
    if bytes.len() > width {
        return Err(Error::invalid_argument("edge field exceeds its fixed-width slot"));
    }
    let mut field = vec![0u8; width];
    field[..bytes.len()].copy_from_slice(bytes);
    buf.extend_from_slice(&field);
    Ok(())
}

fn read_fixed_text(buf: &[u8]) -> Result<String> {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8(buf[..end].to_vec()).map_err(|_| Error::invalid_argument("edge field is not valid UTF-8"))
}

fn write_fixed_id(buf: &mut Vec<u8>, id: u64) {
    let mut field = [0u8; ID_FIELD];
    field[0..8].copy_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(&field);
}

fn read_fixed_id(buf: &[u8]) -> u64 {
    u64::from_le_bytes(buf[0..8].try_into().unwrap())
}

impl EdgePayload {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.properties.len());
        write_fixed_text(&mut buf, &self.from_collection, NAME_FIELD)?;
        write_fixed_id(&mut buf, self.from_id);
        write_fixed_text(&mut buf, &self.to_collection, NAME_FIELD)?;
        write_fixed_id(&mut buf, self.to_id);
        write_fixed_text(&mut buf, &self.edge_type, NAME_FIELD)?;
        buf.extend_from_slice(&self.properties);
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::invalid_argument("edge payload shorter than its fixed header"));
        }
        let mut pos = 0;
        let from_collection = read_fixed_text(&bytes[pos..pos + NAME_FIELD])?;
        pos += NAME_FIELD;
        let from_id = read_fixed_id(&bytes[pos..pos + ID_FIELD]);
        pos += ID_FIELD;
        let to_collection = read_fixed_text(&bytes[pos..pos + NAME_FIELD])?;
        pos += NAME_FIELD;
        let to_id = read_fixed_id(&bytes[pos..pos + ID_FIELD]);
        pos += ID_FIELD;
        let edge_type = read_fixed_text(&bytes[pos..pos + NAME_FIELD])?;
        pos += NAME_FIELD;
        let properties = bytes[pos..].to_vec();
        Ok(Self { from_collection, from_id, to_collection, to_id, edge_type, properties })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_fixed_layout() {
        let edge = EdgePayload {
            from_collection: "users".into(),
            from_id: 7,
            to_collection: "posts".into(),
            to_id: 42,
            edge_type: "authored".into(),
            properties: vec![1, 2, 3],
        };
        let bytes = edge.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 3);
        assert_eq!(EdgePayload::decode(&bytes).unwrap(), edge);
    }

    #[test]
    fn rejects_name_too_long_for_its_slot() {
        let edge = EdgePayload {
            from_collection: "x".repeat(65),
            from_id: 0,
            to_collection: "posts".into(),
            to_id: 0,
            edge_type: "t".into(),
            properties: vec![],
        };
        assert!(edge.encode().is_err());
    }
}
