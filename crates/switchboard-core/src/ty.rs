use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::value::ValueType;

pub const NUMBER_TYPE: &str = "number";
pub const BOOL_TYPE: &str = "bool";
pub const STRING_TYPE: &str = "string";
pub const OBJECT_TYPE: &str = "object";
pub const MAP_TYPE: &str = "map";
pub const LIST_TYPE: &str = "list";
pub const DYNAMIC_TYPE: &str = "dynamic";
pub const INVALID_TYPE: &str = "invalid";

/// Scalar kinds a [`TypeDescriptor`] leaf can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    String,
    Number,
    Bool,
}

impl PrimitiveType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => STRING_TYPE,
            Self::Number => NUMBER_TYPE,
            Self::Bool => BOOL_TYPE,
        }
    }

    /// Resolve a primitive from its type name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            STRING_TYPE => Some(Self::String),
            NUMBER_TYPE => Some(Self::Number),
            BOOL_TYPE => Some(Self::Bool),
            _ => None,
        }
    }
}

/// Serializable structural type used to declare configuration and output shapes.
///
/// Each node owns its children. An element-less `Map` or `List` stands for a
/// map or list of strings; an `Object` always carries its (possibly empty)
/// field map.
///
/// On the wire a descriptor is `{type_name, nested_values?, internal_type?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireType", into = "WireType")]
pub enum TypeDescriptor {
    Primitive(PrimitiveType),
    Object(BTreeMap<String, TypeDescriptor>),
    Map(Option<Box<TypeDescriptor>>),
    List(Option<Box<TypeDescriptor>>),
    /// Matches any value. Use only when the shape cannot be known ahead of time.
    Dynamic,
    /// Sentinel for a failed resolution; never a valid schema leaf.
    Invalid,
}

impl TypeDescriptor {
    pub fn string() -> Self {
        Self::Primitive(PrimitiveType::String)
    }

    pub fn number() -> Self {
        Self::Primitive(PrimitiveType::Number)
    }

    pub fn bool() -> Self {
        Self::Primitive(PrimitiveType::Bool)
    }

    /// Object with statically known field names.
    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, TypeDescriptor)>,
        K: Into<String>,
    {
        Self::Object(
            fields
                .into_iter()
                .map(|(name, ty)| (name.into(), ty))
                .collect(),
        )
    }

    /// Map with variable keys and values of `element`.
    pub fn map(element: TypeDescriptor) -> Self {
        Self::Map(Some(Box::new(element)))
    }

    pub fn list(element: TypeDescriptor) -> Self {
        Self::List(Some(Box::new(element)))
    }

    /// Wire type name of this node.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Primitive(primitive) => primitive.as_str(),
            Self::Object(_) => OBJECT_TYPE,
            Self::Map(_) => MAP_TYPE,
            Self::List(_) => LIST_TYPE,
            Self::Dynamic => DYNAMIC_TYPE,
            Self::Invalid => INVALID_TYPE,
        }
    }

    /// Return true when an `Invalid` node appears anywhere in the tree.
    pub fn contains_invalid(&self) -> bool {
        match self {
            Self::Invalid => true,
            Self::Object(fields) => fields.values().any(Self::contains_invalid),
            Self::Map(Some(element)) | Self::List(Some(element)) => element.contains_invalid(),
            Self::Primitive(_) | Self::Map(None) | Self::List(None) | Self::Dynamic => false,
        }
    }

    /// Convert to the dynamic-value engine's native type.
    pub fn to_value_type(&self) -> ValueType {
        match self {
            Self::Primitive(PrimitiveType::String) => ValueType::String,
            Self::Primitive(PrimitiveType::Number) => ValueType::Number,
            Self::Primitive(PrimitiveType::Bool) => ValueType::Bool,
            Self::Object(fields) => ValueType::Object(
                fields
                    .iter()
                    .map(|(name, ty)| (name.clone(), ty.to_value_type()))
                    .collect(),
            ),
            Self::Map(element) => ValueType::Map(Box::new(element_value_type(element))),
            Self::List(element) => ValueType::List(Box::new(element_value_type(element))),
            Self::Dynamic | Self::Invalid => ValueType::Nil,
        }
    }

    /// Rebuild a descriptor from an engine type. `Nil` maps to `Dynamic`.
    pub fn from_value_type(ty: &ValueType) -> Self {
        match ty {
            ValueType::String => Self::string(),
            ValueType::Number => Self::number(),
            ValueType::Bool => Self::bool(),
            ValueType::Object(fields) => Self::Object(
                fields
                    .iter()
                    .map(|(name, ty)| (name.clone(), Self::from_value_type(ty)))
                    .collect(),
            ),
            ValueType::Map(element) => Self::map(Self::from_value_type(element)),
            ValueType::List(element) => Self::list(Self::from_value_type(element)),
            ValueType::Nil => Self::Dynamic,
        }
    }
}

fn element_value_type(element: &Option<Box<TypeDescriptor>>) -> ValueType {
    match element {
        Some(element) => element.to_value_type(),
        None => ValueType::String,
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Map(Some(element)) | Self::List(Some(element)) => {
                write!(f, "{}({element})", self.type_name())
            }
            Self::Object(fields) => {
                write!(f, "object{{")?;
                for (idx, (name, ty)) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {ty}")?;
                }
                write!(f, "}}")
            }
            other => write!(f, "{}", other.type_name()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireType {
    type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nested_values: Option<BTreeMap<String, TypeDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    internal_type: Option<Box<TypeDescriptor>>,
}

impl TryFrom<WireType> for TypeDescriptor {
    type Error = ProviderError;

    fn try_from(wire: WireType) -> Result<Self, Self::Error> {
        let name = wire.type_name.as_str();

        if name != OBJECT_TYPE && wire.nested_values.is_some() {
            return Err(ProviderError::InvalidTypeRepresentation(format!(
                "{name} type must not carry nested_values"
            )));
        }
        if name != MAP_TYPE && name != LIST_TYPE && wire.internal_type.is_some() {
            return Err(ProviderError::InvalidTypeRepresentation(format!(
                "{name} type must not carry internal_type"
            )));
        }

        if let Some(primitive) = PrimitiveType::from_name(name) {
            return Ok(Self::Primitive(primitive));
        }

        match name {
            OBJECT_TYPE => Ok(Self::Object(wire.nested_values.unwrap_or_default())),
            MAP_TYPE => Ok(Self::Map(wire.internal_type)),
            LIST_TYPE => Ok(Self::List(wire.internal_type)),
            DYNAMIC_TYPE => Ok(Self::Dynamic),
            INVALID_TYPE => Ok(Self::Invalid),
            other => Err(ProviderError::InvalidTypeRepresentation(format!(
                "unknown type name {other:?}"
            ))),
        }
    }
}

impl From<TypeDescriptor> for WireType {
    fn from(ty: TypeDescriptor) -> Self {
        let type_name = ty.type_name().to_string();
        match ty {
            TypeDescriptor::Object(fields) => Self {
                type_name,
                nested_values: Some(fields),
                internal_type: None,
            },
            TypeDescriptor::Map(element) | TypeDescriptor::List(element) => Self {
                type_name,
                nested_values: None,
                internal_type: element,
            },
            _ => Self {
                type_name,
                nested_values: None,
                internal_type: None,
            },
        }
    }
}
