use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProviderError, ProviderResult};
use crate::ty::TypeDescriptor;

/// A single typed attribute of a configuration object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeDescriptor,
    pub required: bool,
}

impl AttrSchema {
    pub fn required(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
        }
    }
}

/// A nested configuration block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSchema {
    pub name: String,
    pub nested: ObjectSchema,
    pub required: bool,
}

impl BlockSchema {
    pub fn required(name: impl Into<String>, nested: ObjectSchema) -> Self {
        Self {
            name: name.into(),
            nested,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, nested: ObjectSchema) -> Self {
        Self {
            name: name.into(),
            nested,
            required: false,
        }
    }
}

/// Required/optional attributes and blocks accepted by a configuration object.
///
/// Schemas arrive already decoded from the configuration language and are
/// treated as immutable data here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSchema {
    #[serde(default)]
    pub attributes: BTreeMap<String, AttrSchema>,
    #[serde(default)]
    pub blocks: BTreeMap<String, BlockSchema>,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute, keyed by its name.
    pub fn with_attribute(mut self, attr: AttrSchema) -> Self {
        self.attributes.insert(attr.name.clone(), attr);
        self
    }

    /// Add a nested block, keyed by its name.
    pub fn with_block(mut self, block: BlockSchema) -> Self {
        self.blocks.insert(block.name.clone(), block);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.blocks.is_empty()
    }

    /// Object type implied by every attribute and block of this schema.
    pub fn implied_type(&self) -> TypeDescriptor {
        let attributes = self
            .attributes
            .iter()
            .map(|(name, attr)| (name.clone(), attr.ty.clone()));
        let blocks = self
            .blocks
            .iter()
            .map(|(name, block)| (name.clone(), block.nested.implied_type()));
        TypeDescriptor::Object(attributes.chain(blocks).collect())
    }

    /// Validate names and attribute types.
    pub fn validate(&self) -> ProviderResult<()> {
        self.validate_at("$")
    }

    fn validate_at(&self, path: &str) -> ProviderResult<()> {
        for (key, attr) in &self.attributes {
            validate_entry_name(path, key, &attr.name)?;
            if attr.ty.contains_invalid() {
                return Err(ProviderError::InvalidSchema(format!(
                    "{path}.{key}: attribute type contains an invalid node"
                )));
            }
        }

        for (key, block) in &self.blocks {
            validate_entry_name(path, key, &block.name)?;
            if self.attributes.contains_key(key) {
                return Err(ProviderError::InvalidSchema(format!(
                    "{path}.{key}: name is used by both an attribute and a block"
                )));
            }
            block.nested.validate_at(&format!("{path}.{key}"))?;
        }

        Ok(())
    }

    /// Enforce presence rules on a value already normalized against
    /// [`ObjectSchema::implied_type`].
    pub fn check_required(&self, value: &Value) -> ProviderResult<()> {
        self.check_required_at(value, "$")
    }

    fn check_required_at(&self, value: &Value, path: &str) -> ProviderResult<()> {
        let Value::Object(members) = value else {
            return Err(ProviderError::SchemaMismatch(format!(
                "{path}: expected object"
            )));
        };

        for (name, attr) in &self.attributes {
            let present = members.get(name).is_some_and(|member| !member.is_null());
            if attr.required && !present {
                return Err(ProviderError::SchemaMismatch(format!(
                    "{path}: missing required attribute {name:?}"
                )));
            }
        }

        for (name, block) in &self.blocks {
            match members.get(name) {
                Some(member) if !member.is_null() => block
                    .nested
                    .check_required_at(member, &format!("{path}.{name}"))?,
                _ if block.required => {
                    return Err(ProviderError::SchemaMismatch(format!(
                        "{path}: missing required block {name:?}"
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

fn validate_entry_name(path: &str, key: &str, name: &str) -> ProviderResult<()> {
    if name.trim().is_empty() {
        return Err(ProviderError::InvalidSchema(format!(
            "{path}: entry names must not be empty"
        )));
    }
    if key != name {
        return Err(ProviderError::InvalidSchema(format!(
            "{path}: entry keyed {key:?} is named {name:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payment_schema() -> ObjectSchema {
        ObjectSchema::new()
            .with_attribute(AttrSchema::required("amount", TypeDescriptor::number()))
            .with_attribute(AttrSchema::optional("note", TypeDescriptor::string()))
            .with_block(BlockSchema::optional(
                "retry",
                ObjectSchema::new()
                    .with_attribute(AttrSchema::required("attempts", TypeDescriptor::number())),
            ))
    }

    #[test]
    fn implied_type_composes_attributes_and_blocks() {
        assert_eq!(
            payment_schema().implied_type(),
            TypeDescriptor::object([
                ("amount", TypeDescriptor::number()),
                ("note", TypeDescriptor::string()),
                (
                    "retry",
                    TypeDescriptor::object([("attempts", TypeDescriptor::number())]),
                ),
            ])
        );
    }

    #[test]
    fn empty_schema_implies_empty_object() {
        assert_eq!(
            ObjectSchema::new().implied_type(),
            TypeDescriptor::Object(BTreeMap::new())
        );
    }

    #[test]
    fn validate_accepts_well_formed_schema() {
        payment_schema().validate().unwrap();
    }

    #[test]
    fn validate_rejects_invalid_leaf() {
        let schema = ObjectSchema::new().with_attribute(AttrSchema::required(
            "bad",
            TypeDescriptor::map(TypeDescriptor::Invalid),
        ));
        let err = schema.validate().unwrap_err();
        assert!(matches!(err, ProviderError::InvalidSchema(_)));
    }

    #[test]
    fn validate_rejects_name_collision() {
        let schema = ObjectSchema::new()
            .with_attribute(AttrSchema::optional("retry", TypeDescriptor::bool()))
            .with_block(BlockSchema::optional("retry", ObjectSchema::new()));
        let err = schema.validate().unwrap_err();
        assert!(err.to_string().contains("both an attribute and a block"));
    }

    #[test]
    fn validate_rejects_mismatched_key() {
        let mut schema = ObjectSchema::new();
        schema.attributes.insert(
            "alias".to_string(),
            AttrSchema::required("real", TypeDescriptor::string()),
        );
        assert!(schema.validate().is_err());
    }

    #[test]
    fn check_required_reports_missing_attribute() {
        let err = payment_schema()
            .check_required(&json!({"amount": null, "note": "x", "retry": null}))
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::SchemaMismatch("$: missing required attribute \"amount\"".into())
        );
    }

    #[test]
    fn check_required_recurses_into_present_blocks() {
        let err = payment_schema()
            .check_required(&json!({"amount": 1, "note": null, "retry": {"attempts": null}}))
            .unwrap_err();
        assert!(err.to_string().contains("$.retry: missing required attribute"));
    }

    #[test]
    fn required_block_must_be_present() {
        let schema = ObjectSchema::new().with_block(BlockSchema::required("auth", ObjectSchema::new()));
        assert!(schema.check_required(&json!({"auth": null})).is_err());
        assert!(schema.check_required(&json!({"auth": {}})).is_ok());
    }

    #[test]
    fn serde_round_trips_schema() {
        let schema = payment_schema();
        let encoded = serde_json::to_string(&schema).unwrap();
        let decoded: ObjectSchema = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, schema);
    }
}
