//! In-process provider used by the adapter and runtime tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde_json::json;
use switchboard_core::{
    decode_input, decode_value, Action, AttrSchema, DynamicValue, Function, FunctionRegistry,
    GlobalConfig, ObjectSchema, Provider, ProviderConfig, ProviderError, ProviderResult,
    RunnerProvider, RunnerSnapshot, SubscriptionStore, Trigger, TypeDescriptor,
};

pub(crate) const CONTEXT: &str = "acme";

struct Double;

impl Function for Double {
    fn configuration_schema(&self) -> ProviderResult<ObjectSchema> {
        Ok(ObjectSchema::new()
            .with_attribute(AttrSchema::required("amount", TypeDescriptor::number()))
            .with_attribute(AttrSchema::optional("note", TypeDescriptor::string())))
    }

    fn output_type(&self) -> ProviderResult<TypeDescriptor> {
        Ok(TypeDescriptor::object([("doubled", TypeDescriptor::number())]))
    }
}

impl Action for Double {
    fn evaluate(&self, _context_id: &str, input: DynamicValue) -> ProviderResult<DynamicValue> {
        let amount = input["amount"]
            .as_f64()
            .ok_or_else(|| ProviderError::Failed("amount is not a number".into()))?;
        Ok(json!({ "doubled": amount * 2.0 }))
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

/// Provider with one action (`double`) and one trigger (`webhook`).
pub(crate) struct DemoProvider {
    functions: FunctionRegistry,
    subscriptions: SubscriptionStore,
    fail_init: bool,
    init_calls: Mutex<usize>,
}

impl DemoProvider {
    pub(crate) fn new() -> Self {
        let mut functions = FunctionRegistry::new();
        functions
            .register_action("double", Box::new(Double))
            .expect("register double");
        functions
            .register_trigger("webhook", Box::new(Webhook))
            .expect("register webhook");
        Self {
            functions,
            subscriptions: SubscriptionStore::new(),
            fail_init: false,
            init_calls: Mutex::new(0),
        }
    }

    /// A provider whose `init` always fails.
    pub(crate) fn failing() -> Self {
        Self {
            fail_init: true,
            ..Self::new()
        }
    }

    pub(crate) fn init_calls(&self) -> usize {
        *self.init_calls.lock().unwrap()
    }

    fn subscription_state(
        &self,
        subscription_id: &str,
        input: &[u8],
    ) -> ProviderResult<Vec<u8>> {
        let config = decode_input(input, &self.functions.trigger_configuration_schema()?)?;
        serde_json::to_vec(&json!({ "subscription_id": subscription_id, "config": config }))
            .map_err(|err| ProviderError::Failed(err.to_string()))
    }
}

impl Provider for DemoProvider {
    fn init(&self, runner: &dyn RunnerProvider) -> ProviderResult<ProviderConfig> {
        *self.init_calls.lock().unwrap() += 1;
        if self.fail_init {
            return Err(ProviderError::Failed("vendor credentials rejected".into()));
        }
        let schema = self.init_schema()?;
        for bytes in runner.user_config().values() {
            decode_input(bytes, &schema)?;
        }
        Ok(ProviderConfig {
            subscriptions_registered_together: true,
        })
    }

    fn init_schema(&self) -> ProviderResult<ObjectSchema> {
        Ok(ObjectSchema::new()
            .with_attribute(AttrSchema::required("token", TypeDescriptor::string())))
    }

    fn map_payload_to_trigger_key(&self, payload: &[u8]) -> ProviderResult<String> {
        let event = decode_value(payload, &TypeDescriptor::Dynamic)?;
        let kind = event
            .get("kind")
            .and_then(|kind| kind.as_str())
            .ok_or_else(|| ProviderError::SchemaMismatch("$: missing \"kind\"".into()))?;
        self.functions.trigger(kind)?;
        Ok(kind.to_string())
    }

    fn action_names(&self) -> ProviderResult<Vec<String>> {
        Ok(self.functions.action_names())
    }

    fn action_evaluate(
        &self,
        context_id: &str,
        name: &str,
        input: &[u8],
    ) -> ProviderResult<Vec<u8>> {
        self.functions.evaluate_action(context_id, name, input)
    }

    fn action_configuration_schema(&self, name: &str) -> ProviderResult<ObjectSchema> {
        self.functions.action_configuration_schema(name)
    }

    fn action_output_type(&self, name: &str) -> ProviderResult<TypeDescriptor> {
        self.functions.action_output_type(name)
    }

    fn trigger_key_names(&self) -> ProviderResult<Vec<String>> {
        Ok(self.functions.trigger_key_names())
    }

    fn trigger_configuration_schema(&self) -> ProviderResult<ObjectSchema> {
        self.functions.trigger_configuration_schema()
    }

    fn trigger_output_type(&self, key: &str) -> ProviderResult<TypeDescriptor> {
        self.functions.trigger_output_type(key)
    }

    fn create_subscription(&self, context_id: &str, input: &[u8]) -> ProviderResult<Vec<u8>> {
        self.subscriptions
            .create(context_id, |id| self.subscription_state(id, input))
            .map(|subscription| subscription.state)
    }

    fn read_subscription(
        &self,
        context_id: &str,
        subscription_id: &str,
    ) -> ProviderResult<Vec<u8>> {
        self.subscriptions
            .read(context_id, subscription_id)
            .map(|subscription| subscription.state)
    }

    fn update_subscription(
        &self,
        context_id: &str,
        subscription_id: &str,
        input: &[u8],
    ) -> ProviderResult<Vec<u8>> {
        self.subscriptions.read(context_id, subscription_id)?;
        let state = self.subscription_state(subscription_id, input)?;
        self.subscriptions
            .update(context_id, subscription_id, state)
            .map(|subscription| subscription.state)
    }

    fn delete_subscription(&self, context_id: &str, subscription_id: &str) -> ProviderResult<()> {
        self.subscriptions
            .delete(context_id, subscription_id)
            .map(|_| ())
    }
}

/// Runner data with one valid context.
pub(crate) fn runner() -> RunnerSnapshot {
    RunnerSnapshot {
        global_config: GlobalConfig {
            public_ingest_uri: "https://hooks.example.com/ingest".into(),
            private_ingest_uri: "http://127.0.0.1:9400/ingest".into(),
        },
        user_config: BTreeMap::from([(CONTEXT.to_string(), br#"{"token":"t-1"}"#.to_vec())]),
    }
}

/// Subscription id recorded in a state produced by [`DemoProvider`].
pub(crate) fn subscription_id(state: &[u8]) -> String {
    let state: serde_json::Value = serde_json::from_slice(state).unwrap();
    state["subscription_id"].as_str().unwrap().to_string()
}
