//! Reconstruct [`TypeDescriptor`] trees from types described as data.
//!
//! Two surface grammars are accepted by [`decode_type`]:
//!
//! * the constraint grammar, built from constraint leaves
//!   (`{"type": "...", "required": ..., "children": ...}`) and key/value maps
//!   whose every member is a constraint leaf;
//! * the legacy marker grammar, rooted at an `object` node carrying
//!   `type_name` / `nested_values` / `internal_type` attributes.
//!
//! Decoding is all-or-nothing: the first malformed node aborts the decode.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{ProviderError, ProviderResult};
use crate::schema::{AttrSchema, ObjectSchema};
use crate::ty::{
    PrimitiveType, TypeDescriptor, DYNAMIC_TYPE, LIST_TYPE, MAP_TYPE, OBJECT_TYPE,
};

pub const FORMAT_TYPE: &str = "type";
pub const FORMAT_REQUIRED: &str = "required";
pub const FORMAT_CHILDREN: &str = "children";

pub const TYPE_NAME_KEY: &str = "type_name";
pub const NESTED_VALUES_KEY: &str = "nested_values";
pub const INTERNAL_TYPE_KEY: &str = "internal_type";

/// Return true when `value` is a constraint leaf: a string `type` plus a
/// `required` marker. A map whose fields happen to be named `type` and
/// `required` is not a leaf.
pub fn is_constraint_node(value: &Value) -> bool {
    match value {
        Value::Object(members) => {
            members.get(FORMAT_TYPE).is_some_and(Value::is_string)
                && members.contains_key(FORMAT_REQUIRED)
        }
        _ => false,
    }
}

/// Return true when `value` is a key/value node: a structural value that is
/// not itself a constraint leaf and whose every member is one.
pub fn is_key_value_node(value: &Value) -> bool {
    match value {
        Value::Object(members) => {
            !is_constraint_node(value) && members.values().all(is_constraint_node)
        }
        _ => false,
    }
}

/// Return true when `value` matches either constraint-grammar node shape.
pub fn is_format_node(value: &Value) -> bool {
    is_constraint_node(value) || is_key_value_node(value)
}

/// Decode a self-describing type value into a [`TypeDescriptor`].
pub fn decode_type(value: &Value) -> ProviderResult<TypeDescriptor> {
    if is_format_node(value) {
        return decode_format(value, "$");
    }

    if let Value::Object(members) = value {
        if members.contains_key(TYPE_NAME_KEY) {
            return decode_legacy(value, "$", true);
        }
    }

    Err(invalid("$", "value is neither a constraint leaf nor a key/value map"))
}

/// Decode a key/value root into an attribute schema, keeping each member's
/// `required` flag.
pub fn decode_schema(value: &Value) -> ProviderResult<ObjectSchema> {
    let Value::Object(members) = value else {
        return Err(invalid("$", "schema root must be a key/value map"));
    };
    if !is_key_value_node(value) {
        return Err(invalid("$", "schema root must be a key/value map"));
    }

    let mut schema = ObjectSchema::new();
    for (name, member) in members {
        let path = format!("$.{name}");
        let required = member
            .get(FORMAT_REQUIRED)
            .and_then(Value::as_bool)
            .ok_or_else(|| invalid(&path, "required must be a bool"))?;
        let ty = decode_format(member, &path)?;
        schema = schema.with_attribute(AttrSchema {
            name: name.clone(),
            ty,
            required,
        });
    }
    Ok(schema)
}

fn decode_format(value: &Value, path: &str) -> ProviderResult<TypeDescriptor> {
    match value {
        Value::Object(members) if is_key_value_node(value) => {
            decode_members(members, path).map(TypeDescriptor::Object)
        }
        Value::Object(members) if is_constraint_node(value) => decode_constraint(members, path),
        _ => Err(invalid(
            path,
            "value is neither a constraint leaf nor a key/value map",
        )),
    }
}

fn decode_constraint(members: &Map<String, Value>, path: &str) -> ProviderResult<TypeDescriptor> {
    let type_name = members
        .get(FORMAT_TYPE)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(path, "type must be a string"))?;

    if let Some(primitive) = PrimitiveType::from_name(type_name) {
        return Ok(TypeDescriptor::Primitive(primitive));
    }

    let children_path = format!("{path}.{FORMAT_CHILDREN}");
    match type_name {
        LIST_TYPE => {
            let children = members
                .get(FORMAT_CHILDREN)
                .ok_or_else(|| invalid(path, "list node requires children"))?;
            let element = decode_format(children, &children_path)?;
            Ok(TypeDescriptor::list(element))
        }
        OBJECT_TYPE => match members.get(FORMAT_CHILDREN) {
            Some(children @ Value::Object(nested)) if is_key_value_node(children) => {
                decode_members(nested, &children_path).map(TypeDescriptor::Object)
            }
            Some(_) => Err(invalid(
                &children_path,
                "object children must be a key/value map",
            )),
            None => Err(invalid(path, "object node requires children")),
        },
        other => Err(invalid(path, &format!("unsupported type {other:?}"))),
    }
}

fn decode_members(
    members: &Map<String, Value>,
    path: &str,
) -> ProviderResult<BTreeMap<String, TypeDescriptor>> {
    members
        .iter()
        .map(|(name, member)| {
            decode_format(member, &format!("{path}.{name}")).map(|ty| (name.clone(), ty))
        })
        .collect()
}

fn decode_legacy(value: &Value, path: &str, is_root: bool) -> ProviderResult<TypeDescriptor> {
    let Value::Object(members) = value else {
        return Err(invalid(path, "type node must be an object"));
    };
    let type_name = members
        .get(TYPE_NAME_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(path, "type_name must be a string"))?;

    if is_root && type_name != OBJECT_TYPE {
        return Err(invalid(path, "root type must be an object"));
    }

    if let Some(primitive) = PrimitiveType::from_name(type_name) {
        return Ok(TypeDescriptor::Primitive(primitive));
    }

    match type_name {
        OBJECT_TYPE => {
            let Some(Value::Object(nested)) = members.get(NESTED_VALUES_KEY) else {
                return Err(invalid(
                    path,
                    "objects must have a nested_values attribute set to an object value",
                ));
            };
            nested
                .iter()
                .map(|(name, member)| {
                    decode_legacy(member, &format!("{path}.{name}"), false)
                        .map(|ty| (name.clone(), ty))
                })
                .collect::<ProviderResult<BTreeMap<_, _>>>()
                .map(TypeDescriptor::Object)
        }
        MAP_TYPE | LIST_TYPE => {
            let internal = match members.get(INTERNAL_TYPE_KEY) {
                Some(internal @ Value::Object(_)) => internal,
                _ => {
                    return Err(invalid(
                        path,
                        &format!("{type_name} must have an internal_type attribute set to an object value"),
                    ))
                }
            };
            let element = decode_legacy(internal, &format!("{path}.{INTERNAL_TYPE_KEY}"), false)?;
            if type_name == MAP_TYPE {
                Ok(TypeDescriptor::map(element))
            } else {
                Ok(TypeDescriptor::list(element))
            }
        }
        DYNAMIC_TYPE => Ok(TypeDescriptor::Dynamic),
        other => Err(invalid(path, &format!("unsupported type {other:?}"))),
    }
}

fn invalid(path: &str, reason: &str) -> ProviderError {
    ProviderError::InvalidTypeRepresentation(format!("{path}: {reason}"))
}
