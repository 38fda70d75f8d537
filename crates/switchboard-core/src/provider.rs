use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;
use crate::schema::ObjectSchema;
use crate::ty::TypeDescriptor;

/// Details about the runner instance that providers may use as they see fit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Where HTTP-based triggers should be registered.
    pub public_ingest_uri: String,
    /// Where subscriptions received directly by the provider (queues, pollers)
    /// should deliver events.
    pub private_ingest_uri: String,
}

/// Static flags a provider reports from `init`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// True when one subscription covers every trigger, false when each
    /// trigger is subscribed individually.
    pub subscriptions_registered_together: bool,
}

/// Runner-owned data handed to a provider during `init`.
pub trait RunnerProvider {
    /// User configuration per context id. Each value must decode against the
    /// provider's `init_schema`.
    fn user_config(&self) -> BTreeMap<String, Vec<u8>>;

    fn global_config(&self) -> GlobalConfig;

    /// User configuration for one context.
    fn user_config_for(&self, context_id: &str) -> Option<Vec<u8>> {
        self.user_config().remove(context_id)
    }
}

/// A captured copy of runner data, e.g. rebuilt on the provider side of a
/// process boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerSnapshot {
    pub global_config: GlobalConfig,
    pub user_config: BTreeMap<String, Vec<u8>>,
}

impl RunnerSnapshot {
    pub fn capture(runner: &dyn RunnerProvider) -> Self {
        Self {
            global_config: runner.global_config(),
            user_config: runner.user_config(),
        }
    }
}

impl RunnerProvider for RunnerSnapshot {
    fn user_config(&self) -> BTreeMap<String, Vec<u8>> {
        self.user_config.clone()
    }

    fn global_config(&self) -> GlobalConfig {
        self.global_config.clone()
    }

    fn user_config_for(&self, context_id: &str) -> Option<Vec<u8>> {
        self.user_config.get(context_id).cloned()
    }
}

/// Method contract every integration provider implements.
///
/// Calls may arrive concurrently; implementations that keep mutable
/// per-context state (subscriptions, caches) guard it themselves. Every
/// method returns a `ProviderResult` so remote adapters can surface transport
/// failures through the same signature.
pub trait Provider: Send + Sync {
    /// Called once after loading. An error leaves the provider unusable.
    fn init(&self, runner: &dyn RunnerProvider) -> ProviderResult<ProviderConfig>;

    /// Schema that each context's user configuration must satisfy.
    fn init_schema(&self) -> ProviderResult<ObjectSchema>;

    /// Map an inbound event payload to the trigger key it belongs to.
    fn map_payload_to_trigger_key(&self, payload: &[u8]) -> ProviderResult<String>;

    fn action_names(&self) -> ProviderResult<Vec<String>>;

    /// Evaluate a named action. `input` must conform to the action's
    /// configuration schema; the result conforms to its output type.
    fn action_evaluate(&self, context_id: &str, name: &str, input: &[u8])
        -> ProviderResult<Vec<u8>>;

    fn action_configuration_schema(&self, name: &str) -> ProviderResult<ObjectSchema>;

    fn action_output_type(&self, name: &str) -> ProviderResult<TypeDescriptor>;

    fn trigger_key_names(&self) -> ProviderResult<Vec<String>>;

    fn trigger_configuration_schema(&self) -> ProviderResult<ObjectSchema>;

    fn trigger_output_type(&self, key: &str) -> ProviderResult<TypeDescriptor>;

    /// Subscribe for one or all triggers and return the initial state.
    fn create_subscription(&self, context_id: &str, input: &[u8]) -> ProviderResult<Vec<u8>>;

    fn read_subscription(&self, context_id: &str, subscription_id: &str)
        -> ProviderResult<Vec<u8>>;

    /// Replace a subscription and return its new state.
    fn update_subscription(
        &self,
        context_id: &str,
        subscription_id: &str,
        input: &[u8],
    ) -> ProviderResult<Vec<u8>>;

    /// Release the vendor-side registration. The subscription id is dead afterwards.
    fn delete_subscription(&self, context_id: &str, subscription_id: &str) -> ProviderResult<()>;
}

impl<P: Provider + ?Sized> Provider for Arc<P> {
    fn init(&self, runner: &dyn RunnerProvider) -> ProviderResult<ProviderConfig> {
        (**self).init(runner)
    }

    fn init_schema(&self) -> ProviderResult<ObjectSchema> {
        (**self).init_schema()
    }

    fn map_payload_to_trigger_key(&self, payload: &[u8]) -> ProviderResult<String> {
        (**self).map_payload_to_trigger_key(payload)
    }

    fn action_names(&self) -> ProviderResult<Vec<String>> {
        (**self).action_names()
    }

    fn action_evaluate(
        &self,
        context_id: &str,
        name: &str,
        input: &[u8],
    ) -> ProviderResult<Vec<u8>> {
        (**self).action_evaluate(context_id, name, input)
    }

    fn action_configuration_schema(&self, name: &str) -> ProviderResult<ObjectSchema> {
        (**self).action_configuration_schema(name)
    }

    fn action_output_type(&self, name: &str) -> ProviderResult<TypeDescriptor> {
        (**self).action_output_type(name)
    }

    fn trigger_key_names(&self) -> ProviderResult<Vec<String>> {
        (**self).trigger_key_names()
    }

    fn trigger_configuration_schema(&self) -> ProviderResult<ObjectSchema> {
        (**self).trigger_configuration_schema()
    }

    fn trigger_output_type(&self, key: &str) -> ProviderResult<TypeDescriptor> {
        (**self).trigger_output_type(key)
    }

    fn create_subscription(&self, context_id: &str, input: &[u8]) -> ProviderResult<Vec<u8>> {
        (**self).create_subscription(context_id, input)
    }

    fn read_subscription(
        &self,
        context_id: &str,
        subscription_id: &str,
    ) -> ProviderResult<Vec<u8>> {
        (**self).read_subscription(context_id, subscription_id)
    }

    fn update_subscription(
        &self,
        context_id: &str,
        subscription_id: &str,
        input: &[u8],
    ) -> ProviderResult<Vec<u8>> {
        (**self).update_subscription(context_id, subscription_id, input)
    }

    fn delete_subscription(&self, context_id: &str, subscription_id: &str) -> ProviderResult<()> {
        (**self).delete_subscription(context_id, subscription_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRunner;

    impl RunnerProvider for FixedRunner {
        fn user_config(&self) -> BTreeMap<String, Vec<u8>> {
            BTreeMap::from([
                ("ctx-a".to_string(), br#"{"token":"a"}"#.to_vec()),
                ("ctx-b".to_string(), br#"{"token":"b"}"#.to_vec()),
            ])
        }

        fn global_config(&self) -> GlobalConfig {
            GlobalConfig {
                public_ingest_uri: "https://hooks.example.com".into(),
                private_ingest_uri: "http://10.0.0.2:9000".into(),
            }
        }
    }

    #[test]
    fn user_config_for_selects_context() {
        assert_eq!(
            FixedRunner.user_config_for("ctx-b"),
            Some(br#"{"token":"b"}"#.to_vec())
        );
        assert_eq!(FixedRunner.user_config_for("missing"), None);
    }

    #[test]
    fn snapshot_captures_runner_data() {
        let snapshot = RunnerSnapshot::capture(&FixedRunner);
        assert_eq!(snapshot.user_config.len(), 2);
        assert_eq!(
            snapshot.global_config().public_ingest_uri,
            "https://hooks.example.com"
        );
        assert_eq!(
            snapshot.user_config_for("ctx-a"),
            Some(br#"{"token":"a"}"#.to_vec())
        );
    }

    #[test]
    fn provider_config_serializes_flag() {
        let encoded = serde_json::to_value(ProviderConfig {
            subscriptions_registered_together: true,
        })
        .unwrap();
        assert_eq!(encoded["subscriptions_registered_together"], true);
    }
}
