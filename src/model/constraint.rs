//! Constraint evaluation (§4.4, §11): the three built-in kinds, `required`,
//! `unique`, `type_of`, checked against a document/edge body before its
//! write is journaled.
//!
//! This is deliberately the minimum scenario S4 and a meaningfully-enforced
//! schema need; richer kinds (foreign-key, range) are out of scope, same as
//! the full query layer (§12).

use ciborium::value::Value;

use crate::block::{BlockDevice, BlockStore};
use crate::codec::{cbor_decode, cbor_encode};
use crate::error::{Error, ErrorKind, Result};

/// One constraint rule bound to a schema field.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintRule {
    Required { field: String },
    Unique { field: String },
    TypeOf { field: String, expected: String },
}

/// The decoded payload of a `CONSTRAINT` block: an ordered list of rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintSet {
    pub rules: Vec<ConstraintRule>,
}

impl ConstraintSet {
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let rules = self
            .rules
            .iter()
            .map(|rule| match rule {
                ConstraintRule::Required { field } => Value::Map(vec![
                    (Value::Text("kind".into()), Value::Text("required".into())),
                    (Value::Text("field".into()), Value::Text(field.clone())),
                ]),
                ConstraintRule::Unique { field } => Value::Map(vec![
                    (Value::Text("kind".into()), Value::Text("unique".into())),
                    (Value::Text("field".into()), Value::Text(field.clone())),
                ]),
                ConstraintRule::TypeOf { field, expected } => Value::Map(vec![
                    (Value::Text("kind".into()), Value::Text("type_of".into())),
                    (Value::Text("field".into()), Value::Text(field.clone())),
                    (Value::Text("type".into()), Value::Text(expected.clone())),
                ]),
            })
            .collect();
        cbor_encode(&Value::Map(vec![(Value::Text("rules".into()), Value::Array(rules))]))
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let value = cbor_decode(bytes)?;
        let Value::Map(entries) = value else {
            return Err(Error::invalid_argument("constraint set is not a CBOR map"));
        };
        let rules_value = entries
            .iter()
            .find(|(k, _)| k.as_text() == Some("rules"))
            .map(|(_, v)| v)
            .and_then(Value::as_array)
            .ok_or_else(|| Error::invalid_argument("constraint set missing rules array"))?;

        let mut rules = Vec::with_capacity(rules_value.len());
        for rule in rules_value {
            let Value::Map(fields) = rule else {
                return Err(Error::invalid_argument("constraint rule is not a CBOR map"));
            };
            let get = |key: &str| fields.iter().find(|(k, _)| k.as_text() == Some(key)).and_then(|(_, v)| v.as_text());
            let kind = get("kind").ok_or_else(|| Error::invalid_argument("constraint rule missing kind"))?;
            let field = get("field").ok_or_else(|| Error::invalid_argument("constraint rule missing field"))?.to_string();
            rules.push(match kind {
                "required" => ConstraintRule::Required { field },
                "unique" => ConstraintRule::Unique { field },
                "type_of" => ConstraintRule::TypeOf {
                    field,
                    expected: get("type").ok_or_else(|| Error::invalid_argument("type_of rule missing type"))?.to_string(),
                },
                other => return Err(Error::with_message(ErrorKind::InvalidArgument, format!("unknown constraint kind {other:?}"))),
            });
        }
        Ok(Self { rules })
    }
}

fn field_of(body: &Value, field: &str) -> Option<Value> {
    match body {
        Value::Map(entries) => entries.iter().find(|(k, _)| k.as_text() == Some(field)).map(|(_, v)| v.clone()),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Integer(_) => "integer",
        Value::Float(_) => "float",
        Value::Text(_) => "text",
        Value::Bool(_) => "bool",
        Value::Bytes(_) => "bytes",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        Value::Null => "null",
        _ => "unknown",
    }
}

/// Validate a candidate document/edge body against a constraint set.
/// `existing_bodies` is the set of live sibling bodies in the same
/// collection, consulted only for `unique` rules; pass an empty slice for
/// collections with no live members yet.
pub fn validate(constraints: &ConstraintSet, body: &[u8], existing_bodies: &[Vec<u8>]) -> Result<()> {
    let value = cbor_decode(body)?;
    for rule in &constraints.rules {
        match rule {
            ConstraintRule::Required { field } => {
                if field_of(&value, field).is_none() {
                    return Err(Error::with_message(
                        ErrorKind::ConstraintViolation,
                        format!("field {field:?} is required but missing"),
                    ));
                }
            }
            ConstraintRule::TypeOf { field, expected } => {
                if let Some(v) = field_of(&value, field) {
                    if type_name(&v) != expected {
                        return Err(Error::with_message(
                            ErrorKind::ConstraintViolation,
                            format!("field {field:?} must be of type {expected:?}, got {}", type_name(&v)),
                        ));
                    }
                }
            }
            ConstraintRule::Unique { field } => {
                if let Some(candidate) = field_of(&value, field) {
                    for existing in existing_bodies {
                        let Ok(existing_value) = cbor_decode(existing) else { continue };
                        if field_of(&existing_value, field).as_ref() == Some(&candidate) {
                            return Err(Error::with_message(
                                ErrorKind::ConstraintViolation,
                                format!("field {field:?} already bound to an existing value (unique constraint)"),
                            ));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Collect the live (non-deleted) payload bytes reachable from a
/// collection's document/edge chain head, for `unique` checking.
pub fn collect_live_bodies<D: BlockDevice>(store: &mut BlockStore<D>, mut head: Option<u64>) -> Result<Vec<Vec<u8>>> {
    let mut bodies = Vec::new();
    while let Some(id) = head {
        let block = store.read_block(id)?;
        head = if block.header.prev_block == 0 { None } else { Some(block.header.prev_block) };
        if !block.header.flags.contains(crate::consts::BlockFlags::DELETED) {
            bodies.push(block.payload);
        }
    }
    Ok(bodies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_field_missing_is_rejected() {
        let constraints = ConstraintSet { rules: vec![ConstraintRule::Required { field: "email".into() }] };
        let body = cbor_encode(&Value::Map(vec![(Value::Text("name".into()), Value::Text("x".into()))])).unwrap();
        let err = validate(&constraints, &body, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    }

    #[test]
    fn unique_field_duplicate_is_rejected() {
        let constraints = ConstraintSet { rules: vec![ConstraintRule::Unique { field: "email".into() }] };
        let existing = cbor_encode(&Value::Map(vec![(Value::Text("email".into()), Value::Text("a@x.com".into()))])).unwrap();
        let candidate = cbor_encode(&Value::Map(vec![(Value::Text("email".into()), Value::Text("a@x.com".into()))])).unwrap();
        assert!(validate(&constraints, &candidate, &[existing]).is_err());
    }

    #[test]
    fn type_of_mismatch_is_rejected() {
        let constraints = ConstraintSet { rules: vec![ConstraintRule::TypeOf { field: "age".into(), expected: "integer".into() }] };
        let body = cbor_encode(&Value::Map(vec![(Value::Text("age".into()), Value::Text("old".into()))])).unwrap();
        assert!(validate(&constraints, &body, &[]).is_err());
    }

    #[test]
    fn constraint_set_round_trips() {
        let set = ConstraintSet {
            rules: vec![
                ConstraintRule::Required { field: "email".into() },
                ConstraintRule::Unique { field: "email".into() },
            ],
        };
        let bytes = set.to_cbor().unwrap();
        assert_eq!(ConstraintSet::from_cbor(&bytes).unwrap(), set);
    }
}
