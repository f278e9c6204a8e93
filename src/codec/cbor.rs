//! Canonical CBOR (RFC 8949 §4.2) encode/decode.
//!
//! `cbor_encode` always produces the canonical form: definite-length
//! containers, map keys sorted by their own canonical encoding (shorter
//! encoding first, then bytewise), and whatever shortest-form integer/float
//! encoding the underlying codec already uses. `cbor_decode` accepts any
//! valid RFC 8949 input but rejects indefinite-length items, which this
//! context never produces and never needs to accept from the wire.

use crate::error::{Error, Result};
use ciborium::value::Value;

/// Encode `value` into its canonical byte representation.
pub fn cbor_encode(value: &Value) -> Result<Vec<u8>> {
    let canonical = canonicalize(value.clone());
    let mut buf = Vec::new();
    ciborium::ser::into_writer(&canonical, &mut buf)?;
    Ok(buf)
}

/// Decode `bytes` into a [`Value`], rejecting indefinite-length items.
pub fn cbor_decode(bytes: &[u8]) -> Result<Value> {
    if has_indefinite_length_item(bytes) {
        return Err(Error::invalid_argument(
            "CBOR decode: indefinite-length items are not accepted",
        ));
    }
    let value: Value = ciborium::de::from_reader(bytes)?;
    Ok(value)
}

/// Wrap `value` in a FormDB-reserved tag (§4.1). Decoders preserve unknown
/// tags in the reserved range by keeping the raw inner value untouched.
pub fn tagged(tag: u64, value: Value) -> Value {
    Value::Tag(tag, Box::new(value))
}

/// Recursively sort map keys into canonical order and recurse into
/// arrays/tags. Canonical order per RFC 8949 §4.2.1: the key with the
/// shorter canonical encoding sorts first; ties break bytewise.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        Value::Map(entries) => {
            let mut encoded: Vec<(Vec<u8>, Value, Value)> = entries
                .into_iter()
                .map(|(k, v)| {
                    let k = canonicalize(k);
                    let v = canonicalize(v);
                    let mut kb = Vec::new();
                    // Encoding a key can only fail for non-serializable
                    // values, which Value never produces.
                    ciborium::ser::into_writer(&k, &mut kb).expect("value always encodable");
                    (kb, k, v)
                })
                .collect();
            encoded.sort_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| a.0.cmp(&b.0)));
            Value::Map(encoded.into_iter().map(|(_, k, v)| (k, v)).collect())
        }
        Value::Tag(tag, inner) => Value::Tag(tag, Box::new(canonicalize(*inner))),
        other => other,
    }
}

/// Single-pass scan for CBOR indefinite-length headers (additional info
/// 31 on major types 2, 3, 4, 5) anywhere in `bytes`. Does not attempt to
/// fully validate the input; `ciborium` is the source of truth for
/// well-formedness, this only adds the stricter indefinite-length check
/// the integrity codec requires.
fn has_indefinite_length_item(bytes: &[u8]) -> bool {
    fn walk(bytes: &[u8], pos: &mut usize) -> Option<bool> {
        let byte = *bytes.get(*pos)?;
        *pos += 1;
        let major = byte >> 5;
        let info = byte & 0x1f;

        if info == 31 {
            // Indefinite length. Major types 2/3/4/5 are the container
            // forms this codec rejects; 7 with info 31 is the `break`
            // marker and 6 doesn't use indefinite length at all.
            if matches!(major, 2 | 3 | 4 | 5) {
                return Some(true);
            }
            // Indefinite array/map/string: consume items until `break`
            // (0xff) for the types that can legally use it elsewhere in
            // the stream (shouldn't occur given the check above, but stay
            // well-formed rather than panicking on malformed input).
            loop {
                if *bytes.get(*pos)? == 0xff {
                    *pos += 1;
                    return Some(false);
                }
                if walk(bytes, pos)? {
                    return Some(true);
                }
            }
        }

        let length = match info {
            0..=23 => 0,
            24 => {
                *pos += 1;
                0
            }
            25 => {
                *pos += 2;
                0
            }
            26 => {
                *pos += 4;
                0
            }
            27 => {
                *pos += 8;
                0
            }
            _ => return None,
        };
        let _ = length;

        match major {
            0 | 1 | 7 => Some(false),
            2 | 3 => {
                let n = read_count(bytes, byte, pos)?;
                *pos += n;
                Some(false)
            }
            4 => {
                let n = read_count(bytes, byte, pos)?;
                for _ in 0..n {
                    if walk(bytes, pos)? {
                        return Some(true);
                    }
                }
                Some(false)
            }
            5 => {
                let n = read_count(bytes, byte, pos)?;
                for _ in 0..n {
                    if walk(bytes, pos)? {
                        return Some(true);
                    }
                    if walk(bytes, pos)? {
                        return Some(true);
                    }
                }
                Some(false)
            }
            6 => walk(bytes, pos),
            _ => None,
        }
    }

    // `read_count` needs the header byte's length encoding, which we've
    // already consumed above for the string/array/map major types; redo it
    // here uniformly since the non-indefinite short form encodes the count
    // directly in `info`.
    fn read_count(bytes: &[u8], header: u8, pos: &mut usize) -> Option<usize> {
        let info = header & 0x1f;
        Some(match info {
            0..=23 => info as usize,
            24 => bytes[*pos - 1] as usize,
            25 => u16::from_be_bytes([bytes[*pos - 2], bytes[*pos - 1]]) as usize,
            26 => u32::from_be_bytes([
                bytes[*pos - 4],
                bytes[*pos - 3],
                bytes[*pos - 2],
                bytes[*pos - 1],
            ]) as usize,
            27 => u64::from_be_bytes([
                bytes[*pos - 8],
                bytes[*pos - 7],
                bytes[*pos - 6],
                bytes[*pos - 5],
                bytes[*pos - 4],
                bytes[*pos - 3],
                bytes[*pos - 2],
                bytes[*pos - 1],
            ]) as usize,
            31 => return None,
            _ => return None,
        })
    }

    let mut pos = 0;
    walk(bytes, &mut pos).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_keys_are_sorted_canonically() {
        let value = Value::Map(vec![
            (Value::Text("rationale".into()), Value::Text("x".into())),
            (Value::Text("actor".into()), Value::Text("y".into())),
        ]);
        let encoded = cbor_encode(&value).unwrap();
        let decoded = cbor_decode(&encoded).unwrap();
        match decoded {
            Value::Map(entries) => {
                let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_text().unwrap()).collect();
                assert_eq!(keys, vec!["actor", "rationale"]);
            }
            _ => panic!("expected map"),
        }
    }

    #[test]
    fn round_trips_nested_structures() {
        let value = Value::Map(vec![
            (Value::Text("n".into()), Value::Integer(42.into())),
            (
                Value::Text("tags".into()),
                Value::Array(vec![Value::Text("a".into()), Value::Text("b".into())]),
            ),
        ]);
        let encoded = cbor_encode(&value).unwrap();
        let decoded = cbor_decode(&encoded).unwrap();
        assert_eq!(canonicalize(value), decoded);
    }

    #[test]
    fn rejects_indefinite_length_text_string() {
        // 0x7f = text string, indefinite length; 0x61 'a' chunk; 0xff break.
        let bytes = [0x7f, 0x61, b'a', 0xff];
        assert!(cbor_decode(&bytes).is_err());
    }

    #[test]
    fn tagged_value_preserves_reserved_tag() {
        use crate::consts::cbor_tag;
        let value = tagged(cbor_tag::DOCUMENT_ID, Value::Integer(7.into()));
        let encoded = cbor_encode(&value).unwrap();
        let decoded = cbor_decode(&encoded).unwrap();
        match decoded {
            Value::Tag(tag, inner) => {
                assert_eq!(tag, cbor_tag::DOCUMENT_ID);
                assert_eq!(*inner, Value::Integer(7.into()));
            }
            _ => panic!("expected tag"),
        }
    }
}
