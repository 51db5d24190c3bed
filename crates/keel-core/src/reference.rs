//! References between declared resources.
//!
//! An attribute value points at another resource with a JSON object:
//!
//! - `{"$ref": "model"}` — the resource's identity (its remote identifier)
//! - `{"$ref": "model", "attr": "name"}` — a value derived from one of its
//!   attributes
//!
//! References may appear anywhere inside a value, including nested arrays
//! and objects.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::addr::ResourceId;

pub const REF_KEY: &str = "$ref";
pub const ATTR_KEY: &str = "attr";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    pub target: ResourceId,
    /// `None` for an identity reference.
    pub attr: Option<String>,
}

impl Reference {
    pub fn is_identity(&self) -> bool {
        self.attr.is_none()
    }

    /// Recognise a reference object. Anything else (including objects that
    /// carry extra keys) is a plain value.
    pub fn parse(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let target = obj.get(REF_KEY)?.as_str()?;
        let attr = match obj.get(ATTR_KEY) {
            None => None,
            Some(Value::String(attr)) => Some(attr.clone()),
            Some(_) => return None,
        };
        let expected_len = if attr.is_some() { 2 } else { 1 };
        if obj.len() != expected_len {
            return None;
        }
        Some(Self {
            target: ResourceId::new(target),
            attr,
        })
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert(REF_KEY.into(), Value::String(self.target.to_string()));
        if let Some(attr) = &self.attr {
            obj.insert(ATTR_KEY.into(), Value::String(attr.clone()));
        }
        Value::Object(obj)
    }
}

/// Identity reference to `target`, for use in declared attributes.
pub fn identity_of(target: &str) -> Value {
    Reference {
        target: ResourceId::new(target),
        attr: None,
    }
    .to_value()
}

/// Reference to attribute `attr` of `target`.
pub fn attr_of(target: &str, attr: &str) -> Value {
    Reference {
        target: ResourceId::new(target),
        attr: Some(attr.to_string()),
    }
    .to_value()
}

/// Every reference contained in `value`, in document order.
pub fn collect(value: &Value) -> Vec<Reference> {
    let mut out = Vec::new();
    walk(value, &mut out);
    out
}

fn walk(value: &Value, out: &mut Vec<Reference>) {
    if let Some(reference) = Reference::parse(value) {
        out.push(reference);
        return;
    }
    match value {
        Value::Array(items) => items.iter().for_each(|v| walk(v, out)),
        Value::Object(obj) => obj.values().for_each(|v| walk(v, out)),
        _ => {}
    }
}

/// Substitute every reference in `value` using `lookup`.
///
/// Returns `None` if any reference cannot be resolved yet (its target has
/// not been created, for instance).
pub fn resolve<F>(value: &Value, lookup: &F) -> Option<Value>
where
    F: Fn(&Reference) -> Option<Value>,
{
    if let Some(reference) = Reference::parse(value) {
        return lookup(&reference);
    }
    match value {
        Value::Array(items) => items
            .iter()
            .map(|v| resolve(v, lookup))
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        Value::Object(obj) => obj
            .iter()
            .map(|(k, v)| resolve(v, lookup).map(|v| (k.clone(), v)))
            .collect::<Option<Map<_, _>>>()
            .map(Value::Object),
        other => Some(other.clone()),
    }
}
