//! Deterministic canonical text rendering for blocks (§4.2, §6.3).
//!
//! Field order is fixed, byte blobs render as lowercase hex, timestamps as
//! RFC 3339 UTC, and any CBOR payload pretty-prints with its (already
//! canonical) sorted keys. Two conforming implementations must produce
//! byte-identical output for the same block, so nothing here may depend on
//! hash-map iteration order, locale, or wall-clock state.

use chrono::{TimeZone, Utc};
use ciborium::value::Value;

use super::store::Block;
use crate::codec::cbor_decode;

/// Render options. Currently empty, the ABI still threads a CBOR options
/// map through, for forward compatibility, but no keys are defined yet.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {}

/// Render a decoded block to its canonical text form.
pub fn render_block(block: &Block, _opts: &RenderOptions) -> String {
    let h = &block.header;
    let mut out = String::new();
    out.push_str(&format!("block_id: {}\n", h.block_id));
    out.push_str(&format!("type: {:?}\n", h.block_type));
    out.push_str(&format!("version: {}\n", h.version));
    out.push_str(&format!("sequence: {}\n", h.sequence));
    out.push_str(&format!("created_at: {}\n", format_micros(h.created_at)));
    out.push_str(&format!("modified_at: {}\n", format_micros(h.modified_at)));
    out.push_str(&format!("payload_len: {}\n", h.payload_len));
    out.push_str(&format!("checksum: {}\n", hex::encode(h.checksum.to_le_bytes())));
    out.push_str(&format!("prev_block: {}\n", h.prev_block));
    out.push_str(&format!("flags: {:?}\n", h.flags));
    out.push_str("payload:\n");
    match cbor_decode(&block.payload) {
        Ok(value) => render_value(&value, 1, &mut out),
        Err(_) => out.push_str(&format!("  {}\n", hex::encode(&block.payload))),
    }
    out
}

/// Format a microsecond timestamp as RFC 3339 in UTC.
pub fn format_micros(micros: u64) -> String {
    let secs = (micros / 1_000_000) as i64;
    let nanos = ((micros % 1_000_000) * 1_000) as u32;
    match Utc.timestamp_opt(secs, nanos) {
        chrono::LocalResult::Single(dt) => dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
        _ => String::from("1970-01-01T00:00:00.000000Z"),
    }
}

fn render_value(value: &Value, depth: usize, out: &mut String) {
    let pad = "  ".repeat(depth);
    match value {
        Value::Map(entries) => {
            for (k, v) in entries {
                let key = render_scalar(k);
                match v {
                    Value::Map(_) | Value::Array(_) => {
                        out.push_str(&format!("{pad}{key}:\n"));
                        render_value(v, depth + 1, out);
                    }
                    _ => out.push_str(&format!("{pad}{key}: {}\n", render_scalar(v))),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Map(_) | Value::Array(_) => {
                        out.push_str(&format!("{pad}-\n"));
                        render_value(item, depth + 1, out);
                    }
                    _ => out.push_str(&format!("{pad}- {}\n", render_scalar(item))),
                }
            }
        }
        other => out.push_str(&format!("{pad}{}\n", render_scalar(other))),
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Integer(i) => format!("{}", i128::from(*i)),
        Value::Float(f) => format!("{f}"),
        Value::Text(s) => s.clone(),
        Value::Bool(b) => format!("{b}"),
        Value::Bytes(b) => hex::encode(b),
        Value::Null => "null".to_string(),
        Value::Tag(tag, inner) => format!("tag({tag}):{}", render_scalar(inner)),
        _ => "<unrepresentable>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::header::BlockHeader;
    use crate::codec::cbor_encode;
    use crate::consts::BlockType;

    #[test]
    fn render_is_deterministic_across_runs() {
        let value = Value::Map(vec![
            (Value::Text("title".into()), Value::Text("x".into())),
        ]);
        let payload = cbor_encode(&value).unwrap();
        let header = BlockHeader::new(BlockType::Document, 1, 1, 1_690_000_000_000_000);
        let block = Block { header, payload };
        let a = render_block(&block, &RenderOptions::default());
        let b = render_block(&block, &RenderOptions::default());
        assert_eq!(a, b);
        assert!(a.contains("title: x"));
    }
}
