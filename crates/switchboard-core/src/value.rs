use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::error::{ProviderError, ProviderResult};

/// Dynamically-typed value exchanged with action and trigger implementations.
pub type DynamicValue = Value;

/// Native type representation of the dynamic-value engine.
///
/// `Nil` is the engine's "no type" sentinel. It places no constraint on a
/// value, which is how `Dynamic` descriptors behave once converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    String,
    Number,
    Bool,
    Object(BTreeMap<String, ValueType>),
    Map(Box<ValueType>),
    List(Box<ValueType>),
    Nil,
}

impl ValueType {
    /// Return true for the "no type" sentinel.
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Check `value` against this type and return a normalized copy.
    ///
    /// Object members named by the type but absent from the value are filled
    /// with `null`; `null` conforms to every type. Members the object type does
    /// not name are rejected.
    pub fn conform(&self, value: &Value) -> ProviderResult<Value> {
        self.conform_at(value, "$")
    }

    fn conform_at(&self, value: &Value, path: &str) -> ProviderResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        match (self, value) {
            (Self::Nil, _)
            | (Self::String, Value::String(_))
            | (Self::Number, Value::Number(_))
            | (Self::Bool, Value::Bool(_)) => Ok(value.clone()),
            (Self::Object(fields), Value::Object(members)) => {
                if let Some(extra) = members.keys().find(|key| !fields.contains_key(*key)) {
                    return Err(ProviderError::SchemaMismatch(format!(
                        "{path}: unexpected attribute {extra:?}"
                    )));
                }

                let mut out = Map::new();
                for (name, ty) in fields {
                    let normalized = match members.get(name) {
                        Some(member) => ty.conform_at(member, &format!("{path}.{name}"))?,
                        None => Value::Null,
                    };
                    out.insert(name.clone(), normalized);
                }
                Ok(Value::Object(out))
            }
            (Self::Map(element), Value::Object(members)) => members
                .iter()
                .map(|(key, member)| {
                    element
                        .conform_at(member, &format!("{path}.{key}"))
                        .map(|normalized| (key.clone(), normalized))
                })
                .collect::<ProviderResult<Map<String, Value>>>()
                .map(Value::Object),
            (Self::List(element), Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(idx, item)| element.conform_at(item, &format!("{path}[{idx}]")))
                .collect::<ProviderResult<Vec<Value>>>()
                .map(Value::Array),
            (expected, found) => Err(ProviderError::SchemaMismatch(format!(
                "{path}: expected {expected}, found {}",
                value_kind(found)
            ))),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Number => write!(f, "number"),
            Self::Bool => write!(f, "bool"),
            Self::Object(_) => write!(f, "object"),
            Self::Map(element) => write!(f, "map of {element}"),
            Self::List(element) => write!(f, "list of {element}"),
            Self::Nil => write!(f, "any value"),
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(fields: &[(&str, ValueType)]) -> ValueType {
        ValueType::Object(
            fields
                .iter()
                .map(|(name, ty)| (name.to_string(), ty.clone()))
                .collect(),
        )
    }

    #[test]
    fn object_fills_absent_members_with_null() {
        let ty = object(&[("amount", ValueType::Number), ("note", ValueType::String)]);
        let normalized = ty.conform(&json!({"amount": 42})).unwrap();
        assert_eq!(normalized, json!({"amount": 42, "note": null}));
    }

    #[test]
    fn object_rejects_unknown_members() {
        let ty = object(&[("amount", ValueType::Number)]);
        let err = ty.conform(&json!({"amount": 1, "extra": true})).unwrap_err();
        assert!(err.to_string().contains("unexpected attribute \"extra\""));
    }

    #[test]
    fn mismatch_reports_path() {
        let ty = object(&[(
            "items",
            ValueType::List(Box::new(ValueType::Number)),
        )]);
        let err = ty.conform(&json!({"items": [1, "two"]})).unwrap_err();
        assert_eq!(
            err,
            ProviderError::SchemaMismatch("$.items[1]: expected number, found string".into())
        );
    }

    #[test]
    fn map_checks_every_value() {
        let ty = ValueType::Map(Box::new(ValueType::Bool));
        assert!(ty.conform(&json!({"a": true, "b": false})).is_ok());
        assert!(ty.conform(&json!({"a": true, "b": 1})).is_err());
    }

    #[test]
    fn nil_accepts_anything() {
        let value = json!({"anything": [1, {"nested": "yes"}]});
        assert_eq!(ValueType::Nil.conform(&value).unwrap(), value);
    }

    #[test]
    fn null_conforms_to_scalars() {
        assert_eq!(ValueType::String.conform(&Value::Null).unwrap(), Value::Null);
    }
}
