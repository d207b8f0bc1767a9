//! Shape definitions and their canonical keys.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Primitive parameter value of a shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    /// Type-tagged encoding, so `"1"` and `1` never share a key.
    fn write_canonical(&self, out: &mut String) {
        match self {
            ParamValue::Null => out.push('n'),
            ParamValue::Bool(b) => {
                out.push_str("b:");
                out.push_str(if *b { "true" } else { "false" });
            }
            ParamValue::Int(i) => {
                out.push_str("i:");
                out.push_str(&i.to_string());
            }
            ParamValue::Float(f) => {
                out.push_str("f:");
                // -0.0 == 0.0, so they must share a key.
                let f = if *f == 0.0 { 0.0 } else { *f };
                out.push_str(&f.to_string());
            }
            ParamValue::Str(s) => {
                out.push_str("s:");
                escape_into(s, out);
            }
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<f64> for ParamValue {
    fn from(f: f64) -> Self {
        ParamValue::Float(f)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

/// A named, parameterized subscription target, e.g. "report r1".
///
/// Shape-stream attributes such as `where`, `columns` or `replica` are
/// ordinary params.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShapeDefinition {
    pub resource_type: String,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

impl ShapeDefinition {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add or replace a parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn get_param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    pub fn key(&self) -> ShapeKey {
        ShapeKey::from_definition(self)
    }
}

/// Canonical identity of a [`ShapeDefinition`].
///
/// Format: `resource?name=tag:value&name=tag:value`, params sorted by name,
/// with `%`, `?`, `&` and `=` percent-escaped in every component.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShapeKey(String);

impl ShapeKey {
    pub fn from_definition(definition: &ShapeDefinition) -> Self {
        let mut out = String::with_capacity(definition.resource_type.len() + 16);
        escape_into(&definition.resource_type, &mut out);

        // BTreeMap iteration is already name-ordered.
        for (i, (name, value)) in definition.params.iter().enumerate() {
            out.push(if i == 0 { '?' } else { '&' });
            escape_into(name, &mut out);
            out.push('=');
            value.write_canonical(&mut out);
        }

        ShapeKey(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short stable digest of the key, for log fields and thread names.
    pub fn handle(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for ShapeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShapeKey({})", self.0)
    }
}

impl fmt::Display for ShapeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&ShapeDefinition> for ShapeKey {
    fn from(definition: &ShapeDefinition) -> Self {
        ShapeKey::from_definition(definition)
    }
}

fn escape_into(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            '=' => out.push_str("%3D"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_key_format() {
        let def = ShapeDefinition::new("report").param("id", "r1");
        assert_eq!(def.key().as_str(), "report?id=s:r1");

        let bare = ShapeDefinition::new("reports");
        assert_eq!(bare.key().as_str(), "reports");
    }

    #[test]
    fn test_param_order_does_not_matter() {
        let a = ShapeDefinition::new("metric").param("id", "m1").param("version", 3i64);
        let b = ShapeDefinition::new("metric").param("version", 3i64).param("id", "m1");
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_typed_values_do_not_collide() {
        let as_str = ShapeDefinition::new("report").param("id", "1");
        let as_int = ShapeDefinition::new("report").param("id", 1i64);
        let as_float = ShapeDefinition::new("report").param("id", 1.0f64);
        assert_ne!(as_str.key(), as_int.key());
        assert_ne!(as_int.key(), as_float.key());
    }

    #[test]
    fn test_separators_in_values_are_escaped() {
        // Without escaping both would render as "t?a=s:x&b=s:y".
        let one = ShapeDefinition::new("t").param("a", "x&b=s:y");
        let two = ShapeDefinition::new("t").param("a", "x").param("b", "y");
        assert_ne!(one.key(), two.key());
    }

    #[test]
    fn test_handle_is_stable() {
        let key = ShapeDefinition::new("report").param("id", "r1").key();
        assert_eq!(key.handle(), key.clone().handle());
        assert_eq!(key.handle().len(), 16);
    }

    fn arb_param() -> impl Strategy<Value = ParamValue> {
        prop_oneof![
            Just(ParamValue::Null),
            any::<bool>().prop_map(ParamValue::Bool),
            any::<i64>().prop_map(ParamValue::Int),
            "[a-z&=?%]{0,6}".prop_map(ParamValue::Str),
        ]
    }

    fn arb_definition() -> impl Strategy<Value = ShapeDefinition> {
        (
            "[a-z?&]{1,6}",
            proptest::collection::btree_map("[a-z=&]{1,4}", arb_param(), 0..4),
        )
            .prop_map(|(resource_type, params)| ShapeDefinition {
                resource_type,
                params,
            })
    }

    proptest! {
        #[test]
        fn prop_key_is_deterministic(def in arb_definition()) {
            let copy = def.clone();
            prop_assert_eq!(def.key(), def.key());
            prop_assert_eq!(def.key(), copy.key());
        }

        #[test]
        fn prop_distinct_definitions_have_distinct_keys(
            a in arb_definition(),
            b in arb_definition(),
        ) {
            if a != b {
                prop_assert_ne!(a.key(), b.key());
            } else {
                prop_assert_eq!(a.key(), b.key());
            }
        }
    }
}
