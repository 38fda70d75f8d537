use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};

use crate::codec::{decode_input, encode_output};
use crate::error::{ProviderError, ProviderResult};
use crate::schema::{BlockSchema, ObjectSchema};
use crate::ty::TypeDescriptor;
use crate::value::DynamicValue;

/// Shape declarations shared by actions and triggers.
pub trait Function: Send + Sync {
    /// Required/optional attributes and blocks accepted in configuration. This
    /// covers general settings as well as details of one interaction.
    fn configuration_schema(&self) -> ProviderResult<ObjectSchema>;

    /// Type of a successful result, used to turn output bytes back into a
    /// dynamic value and to validate configuration that references it.
    fn output_type(&self) -> ProviderResult<TypeDescriptor>;
}

/// A named, synchronously evaluated provider operation.
pub trait Action: Function {
    fn evaluate(&self, context_id: &str, input: DynamicValue) -> ProviderResult<DynamicValue>;
}

/// A named event source managed through subscriptions.
pub trait Trigger: Function {}

/// Decode `input`, evaluate `action`, and encode its result.
pub fn invoke_action_evaluation(
    action: &dyn Action,
    context_id: &str,
    input: &[u8],
) -> ProviderResult<Vec<u8>> {
    let schema = action.configuration_schema()?;
    let value = decode_input(input, &schema)?;
    let result = action.evaluate(context_id, value)?;
    let output_type = action.output_type()?;
    encode_output(&result, &output_type)
}

/// Actions and triggers of one provider, resolved by name.
///
/// Built once while the provider initializes; lookups of unregistered names
/// fail with `UnknownAction` / `UnknownTrigger`.
#[derive(Default)]
pub struct FunctionRegistry {
    actions: BTreeMap<String, Box<dyn Action>>,
    triggers: BTreeMap<String, Box<dyn Trigger>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_action(&mut self, name: &str, action: Box<dyn Action>) -> Result<()> {
        validate_function_name("action", name)?;
        if self.actions.contains_key(name) {
            bail!("duplicate action name: {}", name);
        }
        validate_declarations(action.as_ref())
            .with_context(|| format!("action {name} declares an invalid schema"))?;
        self.actions.insert(name.to_string(), action);
        Ok(())
    }

    pub fn register_trigger(&mut self, key: &str, trigger: Box<dyn Trigger>) -> Result<()> {
        validate_function_name("trigger", key)?;
        if self.triggers.contains_key(key) {
            bail!("duplicate trigger key: {}", key);
        }
        validate_declarations(trigger.as_ref())
            .with_context(|| format!("trigger {key} declares an invalid schema"))?;
        self.triggers.insert(key.to_string(), trigger);
        Ok(())
    }

    pub fn action_names(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }

    pub fn trigger_key_names(&self) -> Vec<String> {
        self.triggers.keys().cloned().collect()
    }

    pub fn action(&self, name: &str) -> ProviderResult<&dyn Action> {
        self.actions
            .get(name)
            .map(|action| action.as_ref())
            .ok_or_else(|| ProviderError::UnknownAction(name.to_string()))
    }

    pub fn trigger(&self, key: &str) -> ProviderResult<&dyn Trigger> {
        self.triggers
            .get(key)
            .map(|trigger| trigger.as_ref())
            .ok_or_else(|| ProviderError::UnknownTrigger(key.to_string()))
    }

    pub fn action_configuration_schema(&self, name: &str) -> ProviderResult<ObjectSchema> {
        self.action(name)?.configuration_schema()
    }

    pub fn action_output_type(&self, name: &str) -> ProviderResult<TypeDescriptor> {
        self.action(name)?.output_type()
    }

    /// Evaluate the named action on raw input bytes.
    pub fn evaluate_action(
        &self,
        context_id: &str,
        name: &str,
        input: &[u8],
    ) -> ProviderResult<Vec<u8>> {
        let action = self.action(name)?;
        tracing::debug!(context_id, action = name, "evaluating action");
        invoke_action_evaluation(action, context_id, input)
    }

    /// Subscription configuration covering every trigger: one optional block
    /// per trigger key holding that trigger's own schema.
    pub fn trigger_configuration_schema(&self) -> ProviderResult<ObjectSchema> {
        let mut schema = ObjectSchema::new();
        for (key, trigger) in &self.triggers {
            schema = schema.with_block(BlockSchema::optional(
                key.clone(),
                trigger.configuration_schema()?,
            ));
        }
        Ok(schema)
    }

    pub fn trigger_output_type(&self, key: &str) -> ProviderResult<TypeDescriptor> {
        self.trigger(key)?.output_type()
    }
}

fn validate_function_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("{kind} name must not be empty");
    }
    if name.trim() != name {
        bail!("{kind} name {:?} has leading/trailing whitespace", name);
    }
    Ok(())
}

fn validate_declarations<F: Function + ?Sized>(function: &F) -> ProviderResult<()> {
    function.configuration_schema()?.validate()?;
    if function.output_type()?.contains_invalid() {
        return Err(ProviderError::InvalidSchema(
            "output type contains an invalid node".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttrSchema;
    use serde_json::json;

    struct Double;

    impl Function for Double {
        fn configuration_schema(&self) -> ProviderResult<ObjectSchema> {
            Ok(ObjectSchema::new()
                .with_attribute(AttrSchema::required("amount", TypeDescriptor::number())))
        }

        fn output_type(&self) -> ProviderResult<TypeDescriptor> {
            Ok(TypeDescriptor::object([("doubled", TypeDescriptor::number())]))
        }
    }

    impl Action for Double {
        fn evaluate(&self, _context_id: &str, input: DynamicValue) -> ProviderResult<DynamicValue> {
            let amount = input["amount"]
                .as_f64()
                .ok_or_else(|| ProviderError::Failed("amount missing".into()))?;
            Ok(json!({"doubled": amount * 2.0}))
        }
    }

    struct Misbehaving;

    impl Function for Misbehaving {
        fn configuration_schema(&self) -> ProviderResult<ObjectSchema> {
            Ok(ObjectSchema::new())
        }

        fn output_type(&self) -> ProviderResult<TypeDescriptor> {
            Ok(TypeDescriptor::string())
        }
    }

    impl Action for Misbehaving {
        fn evaluate(&self, _context_id: &str, _input: DynamicValue) -> ProviderResult<DynamicValue> {
            Ok(json!(12))
        }
    }

    struct Webhook;

    impl Function for Webhook {
        fn configuration_schema(&self) -> ProviderResult<ObjectSchema> {
            Ok(ObjectSchema::new()
                .with_attribute(AttrSchema::required("path", TypeDescriptor::string())))
        }

        fn output_type(&self) -> ProviderResult<TypeDescriptor> {
            Ok(TypeDescriptor::Dynamic)
        }
    }

    impl Trigger for Webhook {}

    struct BrokenSchema;

    impl Function for BrokenSchema {
        fn configuration_schema(&self) -> ProviderResult<ObjectSchema> {
            Ok(ObjectSchema::new()
                .with_attribute(AttrSchema::required("x", TypeDescriptor::Invalid)))
        }

        fn output_type(&self) -> ProviderResult<TypeDescriptor> {
            Ok(TypeDescriptor::string())
        }
    }

    impl Trigger for BrokenSchema {}

    fn registry() -> FunctionRegistry {
        let mut reg = FunctionRegistry::new();
        reg.register_action("double", Box::new(Double)).unwrap();
        reg.register_action("misbehave", Box::new(Misbehaving)).unwrap();
        reg.register_trigger("webhook", Box::new(Webhook)).unwrap();
        reg
    }

    #[test]
    fn evaluate_action_round_trips_bytes() {
        let out = registry()
            .evaluate_action("ctx", "double", br#"{"amount": 21}"#)
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value, json!({"doubled": 42.0}));
    }

    #[test]
    fn unknown_action_fails_closed() {
        let err = registry().evaluate_action("ctx", "nope", b"{}").unwrap_err();
        assert_eq!(err, ProviderError::UnknownAction("nope".into()));
        assert!(matches!(
            registry().action_output_type("nope").unwrap_err(),
            ProviderError::UnknownAction(_)
        ));
    }

    #[test]
    fn bad_input_is_schema_mismatch() {
        let err = registry()
            .evaluate_action("ctx", "double", br#"{"amount": "x"}"#)
            .unwrap_err();
        assert!(matches!(err, ProviderError::SchemaMismatch(_)));
    }

    #[test]
    fn nonconforming_result_is_schema_mismatch() {
        let err = registry()
            .evaluate_action("ctx", "misbehave", b"{}")
            .unwrap_err();
        assert!(matches!(err, ProviderError::SchemaMismatch(_)));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = registry();
        let err = reg.register_action("double", Box::new(Double)).unwrap_err();
        assert!(err.to_string().contains("duplicate action name"));
    }

    #[test]
    fn invalid_declarations_are_rejected() {
        let mut reg = FunctionRegistry::new();
        let err = reg
            .register_trigger("broken", Box::new(BrokenSchema))
            .unwrap_err();
        assert!(err.to_string().contains("trigger broken declares an invalid schema"));
    }

    #[test]
    fn names_are_sorted() {
        assert_eq!(registry().action_names(), vec!["double", "misbehave"]);
        assert_eq!(registry().trigger_key_names(), vec!["webhook"]);
    }

    #[test]
    fn trigger_schema_has_block_per_trigger() {
        let schema = registry().trigger_configuration_schema().unwrap();
        let block = &schema.blocks["webhook"];
        assert!(!block.required);
        assert!(block.nested.attributes["path"].required);
    }

    #[test]
    fn unknown_trigger_fails_closed() {
        assert_eq!(
            registry().trigger_output_type("cron").unwrap_err(),
            ProviderError::UnknownTrigger("cron".into())
        );
    }
}
