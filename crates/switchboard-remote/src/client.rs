use std::sync::atomic::{AtomicI64, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use switchboard_config::RunnerConfig;
use switchboard_core::{
    ObjectSchema, Provider, ProviderConfig, ProviderError, ProviderResult, RunnerProvider,
    TypeDescriptor,
};

use crate::protocol::{
    method, provider_error_from_jsonrpc, ActionEvalParams, BytesResult, HandshakeParams,
    HandshakeResult, InitParams, JsonRpcRequestEnvelope, NameParams, PayloadParams, RequestId,
    SubscriptionParams, JSONRPC_VERSION, PROTOCOL_VERSION,
};
use crate::transport::Transport;

/// Client-side adapter: every [`Provider`] method becomes one request/response
/// exchange over a [`Transport`].
///
/// Calls are not retried. Failures to complete an exchange surface as
/// `ProviderError::Transport`; everything else is the provider's own error.
pub struct ProviderRpcClient<T: Transport> {
    transport: T,
    next_id: AtomicI64,
}

impl<T: Transport> ProviderRpcClient<T> {
    /// Perform the handshake and return a connected client.
    pub fn connect(transport: T) -> ProviderResult<Self> {
        Self::connect_checked(transport, |_| Ok(()))
    }

    /// Handshake, additionally requiring the runner configuration's
    /// `protocol_version` requirement to accept the provider's version.
    pub fn connect_for(transport: T, config: &RunnerConfig) -> ProviderResult<Self> {
        Self::connect_checked(transport, |version| config.supports_protocol(version))
    }

    fn connect_checked<F>(transport: T, accept: F) -> ProviderResult<Self>
    where
        F: FnOnce(u32) -> anyhow::Result<()>,
    {
        let client = Self {
            transport,
            next_id: AtomicI64::new(1),
        };

        let result: HandshakeResult = client
            .call(method::HANDSHAKE, &HandshakeParams::current())
            .map_err(|err| ProviderError::Transport(format!("handshake failed: {err}")))?;
        accept(result.protocol_version)
            .map_err(|err| ProviderError::Transport(format!("handshake failed: {err:#}")))?;
        if result.protocol_version != PROTOCOL_VERSION {
            return Err(ProviderError::Transport(format!(
                "handshake failed: provider speaks protocol version {} but runner speaks {}",
                result.protocol_version, PROTOCOL_VERSION
            )));
        }

        tracing::debug!(protocol_version = PROTOCOL_VERSION, "connected to provider");
        Ok(client)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn call<P, R>(&self, method: &str, params: &P) -> ProviderResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(|err| {
            ProviderError::Transport(format!("failed to encode {method} params: {err}"))
        })?;
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let request = JsonRpcRequestEnvelope::new(id.clone(), method, params);

        let response = self.transport.call(&request)?;
        if response.jsonrpc != JSONRPC_VERSION || response.id != id {
            return Err(ProviderError::Transport(format!(
                "mismatched response envelope for {method}"
            )));
        }
        if let Some(error) = response.error {
            return Err(provider_error_from_jsonrpc(&error));
        }

        serde_json::from_value(response.result.unwrap_or(Value::Null)).map_err(|err| {
            ProviderError::Transport(format!("undecodable {method} result: {err}"))
        })
    }

    fn call_bytes<P: Serialize>(&self, method: &str, params: &P) -> ProviderResult<Vec<u8>> {
        self.call::<P, BytesResult>(method, params)
            .map(|result| result.data)
    }
}

impl<T: Transport> Provider for ProviderRpcClient<T> {
    fn init(&self, runner: &dyn RunnerProvider) -> ProviderResult<ProviderConfig> {
        let params = InitParams {
            global_config: runner.global_config(),
            user_config: runner.user_config(),
        };
        self.call(method::INIT, &params)
    }

    fn init_schema(&self) -> ProviderResult<ObjectSchema> {
        self.call(method::INIT_SCHEMA, &Value::Null)
    }

    fn map_payload_to_trigger_key(&self, payload: &[u8]) -> ProviderResult<String> {
        let params = PayloadParams {
            payload: payload.to_vec(),
        };
        self.call(method::MAP_PAYLOAD_TO_TRIGGER_KEY, &params)
    }

    fn action_names(&self) -> ProviderResult<Vec<String>> {
        self.call(method::ACTION_NAMES, &Value::Null)
    }

    fn action_evaluate(
        &self,
        context_id: &str,
        name: &str,
        input: &[u8],
    ) -> ProviderResult<Vec<u8>> {
        let params = ActionEvalParams {
            context_id: context_id.to_string(),
            name: name.to_string(),
            input: input.to_vec(),
        };
        self.call_bytes(method::ACTION_EVALUATE, &params)
    }

    fn action_configuration_schema(&self, name: &str) -> ProviderResult<ObjectSchema> {
        self.call(method::ACTION_CONFIGURATION_SCHEMA, &name_params(name))
    }

    fn action_output_type(&self, name: &str) -> ProviderResult<TypeDescriptor> {
        self.call(method::ACTION_OUTPUT_TYPE, &name_params(name))
    }

    fn trigger_key_names(&self) -> ProviderResult<Vec<String>> {
        self.call(method::TRIGGER_KEY_NAMES, &Value::Null)
    }

    fn trigger_configuration_schema(&self) -> ProviderResult<ObjectSchema> {
        self.call(method::TRIGGER_CONFIGURATION_SCHEMA, &Value::Null)
    }

    fn trigger_output_type(&self, key: &str) -> ProviderResult<TypeDescriptor> {
        self.call(method::TRIGGER_OUTPUT_TYPE, &name_params(key))
    }

    fn create_subscription(&self, context_id: &str, input: &[u8]) -> ProviderResult<Vec<u8>> {
        let params = subscription_params(context_id, None, Some(input));
        self.call_bytes(method::CREATE_SUBSCRIPTION, &params)
    }

    fn read_subscription(
        &self,
        context_id: &str,
        subscription_id: &str,
    ) -> ProviderResult<Vec<u8>> {
        let params = subscription_params(context_id, Some(subscription_id), None);
        self.call_bytes(method::READ_SUBSCRIPTION, &params)
    }

    fn update_subscription(
        &self,
        context_id: &str,
        subscription_id: &str,
        input: &[u8],
    ) -> ProviderResult<Vec<u8>> {
        let params = subscription_params(context_id, Some(subscription_id), Some(input));
        self.call_bytes(method::UPDATE_SUBSCRIPTION, &params)
    }

    fn delete_subscription(&self, context_id: &str, subscription_id: &str) -> ProviderResult<()> {
        let params = subscription_params(context_id, Some(subscription_id), None);
        self.call(method::DELETE_SUBSCRIPTION, &params)
    }
}

fn name_params(name: &str) -> NameParams {
    NameParams {
        name: name.to_string(),
    }
}

fn subscription_params(
    context_id: &str,
    subscription_id: Option<&str>,
    input: Option<&[u8]>,
) -> SubscriptionParams {
    SubscriptionParams {
        context_id: context_id.to_string(),
        subscription_id: subscription_id.map(str::to_string),
        input: input.map(<[u8]>::to_vec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;
    use std::sync::Arc;
    use std::thread;

    use serde_json::json;
    use switchboard_core::{decode_value, PrimitiveType};

    use crate::fixture::{runner, subscription_id, DemoProvider, CONTEXT};
    use crate::protocol::JsonRpcResponseEnvelope;
    use crate::server::ProviderRpcServer;
    use crate::transport::pipe::pipe;
    use crate::transport::{LocalTransport, StreamTransport};

    fn local_client(provider: DemoProvider) -> ProviderRpcClient<LocalTransport> {
        let server = Arc::new(ProviderRpcServer::new(provider));
        ProviderRpcClient::connect(LocalTransport::new(server)).unwrap()
    }

    fn ready_client() -> ProviderRpcClient<LocalTransport> {
        let client = local_client(DemoProvider::new());
        client.init(&runner()).unwrap();
        client
    }

    /// Transport that answers every request with a canned response.
    struct Canned(fn(&JsonRpcRequestEnvelope) -> JsonRpcResponseEnvelope);

    impl Transport for Canned {
        fn call(
            &self,
            request: &JsonRpcRequestEnvelope,
        ) -> ProviderResult<JsonRpcResponseEnvelope> {
            Ok((self.0)(request))
        }
    }

    #[test]
    fn init_reports_provider_config() {
        let client = local_client(DemoProvider::new());
        let config = client.init(&runner()).unwrap();
        assert!(config.subscriptions_registered_together);
    }

    #[test]
    fn introspection_crosses_the_boundary() {
        let client = ready_client();
        assert_eq!(client.action_names().unwrap(), vec!["double"]);
        assert_eq!(client.trigger_key_names().unwrap(), vec!["webhook"]);

        let schema = client.action_configuration_schema("double").unwrap();
        assert!(schema.attributes["amount"].required);
        assert!(!schema.attributes["note"].required);

        assert_eq!(
            client.action_output_type("double").unwrap(),
            TypeDescriptor::object([("doubled", TypeDescriptor::number())])
        );
        assert_eq!(
            client.trigger_output_type("webhook").unwrap(),
            TypeDescriptor::Dynamic
        );
        assert!(client
            .trigger_configuration_schema()
            .unwrap()
            .blocks
            .contains_key("webhook"));
    }

    #[test]
    fn action_evaluate_decodes_with_output_type() {
        let client = ready_client();
        let output = client
            .action_evaluate(CONTEXT, "double", br#"{"amount": 42}"#)
            .unwrap();
        let ty = client.action_output_type("double").unwrap();
        let value = decode_value(&output, &ty).unwrap();
        assert_eq!(value["doubled"], json!(84.0));
    }

    #[test]
    fn domain_errors_are_not_transport_errors() {
        let client = ready_client();

        let err = client
            .action_evaluate(CONTEXT, "double", br#"{"amount": "x"}"#)
            .unwrap_err();
        assert!(matches!(err, ProviderError::SchemaMismatch(_)));
        assert!(!err.is_unreachable());

        assert_eq!(
            client.action_evaluate(CONTEXT, "triple", b"{}").unwrap_err(),
            ProviderError::UnknownAction("triple".into())
        );
        assert_eq!(
            client
                .map_payload_to_trigger_key(br#"{"kind": "cron"}"#)
                .unwrap_err(),
            ProviderError::UnknownTrigger("cron".into())
        );
    }

    #[test]
    fn payload_maps_to_trigger_key() {
        let client = ready_client();
        assert_eq!(
            client
                .map_payload_to_trigger_key(br#"{"kind": "webhook", "body": {}}"#)
                .unwrap(),
            "webhook"
        );
    }

    #[test]
    fn subscription_lifecycle_over_rpc() {
        let client = ready_client();
        let created = client
            .create_subscription(CONTEXT, br#"{"webhook": {"path": "/orders"}}"#)
            .unwrap();
        let id = subscription_id(&created);

        assert_eq!(client.read_subscription(CONTEXT, &id).unwrap(), created);

        let updated = client
            .update_subscription(CONTEXT, &id, br#"{"webhook": {"path": "/refunds"}}"#)
            .unwrap();
        let state: Value = serde_json::from_slice(&updated).unwrap();
        assert_eq!(state["config"]["webhook"]["path"], "/refunds");
        assert_eq!(client.read_subscription(CONTEXT, &id).unwrap(), updated);

        client.delete_subscription(CONTEXT, &id).unwrap();
        let expected = ProviderError::unknown_subscription(CONTEXT, &id);
        assert_eq!(client.read_subscription(CONTEXT, &id).unwrap_err(), expected);
        assert_eq!(
            client
                .update_subscription(CONTEXT, &id, br#"{"webhook": {"path": "/x"}}"#)
                .unwrap_err(),
            expected
        );
        assert_eq!(client.delete_subscription(CONTEXT, &id).unwrap_err(), expected);
    }

    #[test]
    fn failed_init_makes_provider_unavailable() {
        let client = local_client(DemoProvider::failing());
        assert!(matches!(
            client.init(&runner()).unwrap_err(),
            ProviderError::Failed(_)
        ));

        let err = client.action_names().unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
        assert!(err.is_unreachable());
    }

    #[test]
    fn connect_rejects_protocol_mismatch() {
        let transport = Canned(|request| {
            JsonRpcResponseEnvelope::result(
                request.id.clone(),
                json!({ "protocol_version": PROTOCOL_VERSION + 1 }),
            )
        });
        let err = ProviderRpcClient::connect(transport).err().unwrap();
        assert!(matches!(err, ProviderError::Transport(message) if message.contains("handshake failed")));
    }

    fn runner_config(requirement: &str) -> RunnerConfig {
        RunnerConfig::from_toml_str(&format!(
            r#"
protocol_version = "{requirement}"

[global]
public_ingest_uri = "https://hooks.example.com/ingest"
private_ingest_uri = "http://127.0.0.1:9400/ingest"
"#
        ))
        .unwrap()
    }

    #[test]
    fn connect_for_enforces_configured_protocol_requirement() {
        let server = Arc::new(ProviderRpcServer::new(DemoProvider::new()));

        let accepted = ProviderRpcClient::connect_for(
            LocalTransport::new(Arc::clone(&server)),
            &runner_config("^2"),
        );
        assert!(accepted.is_ok());

        let err = ProviderRpcClient::connect_for(
            LocalTransport::new(server),
            &runner_config(">=3"),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            ProviderError::Transport(message)
                if message.contains("runner requires protocol_version >=3 but provider speaks 2")
        ));
    }

    #[test]
    fn mismatched_response_id_is_transport_error() {
        let transport = Canned(|request| {
            let result = if request.method == method::HANDSHAKE {
                json!({ "protocol_version": PROTOCOL_VERSION })
            } else {
                json!(["double"])
            };
            let id = if request.method == method::HANDSHAKE {
                request.id.clone()
            } else {
                RequestId::Number(-1)
            };
            JsonRpcResponseEnvelope::result(id, result)
        });
        let client = ProviderRpcClient::connect(transport).unwrap();
        assert!(matches!(
            client.action_names().unwrap_err(),
            ProviderError::Transport(_)
        ));
    }

    #[test]
    fn undecodable_result_is_transport_error() {
        let transport = Canned(|request| {
            let result = if request.method == method::HANDSHAKE {
                json!({ "protocol_version": PROTOCOL_VERSION })
            } else {
                json!({ "type_name": "tuple" })
            };
            JsonRpcResponseEnvelope::result(request.id.clone(), result)
        });
        let client = ProviderRpcClient::connect(transport).unwrap();
        assert!(matches!(
            client.action_output_type("double").unwrap_err(),
            ProviderError::Transport(_)
        ));
    }

    #[test]
    fn client_works_over_a_stream() {
        let (request_reader, request_writer) = pipe();
        let (response_reader, response_writer) = pipe();
        let server = Arc::new(ProviderRpcServer::new(DemoProvider::new()));
        let serving = Arc::clone(&server);
        let handle = thread::spawn(move || {
            serving.serve(BufReader::new(request_reader), response_writer)
        });

        let client =
            ProviderRpcClient::connect(StreamTransport::new(response_reader, request_writer))
                .unwrap();
        client.init(&runner()).unwrap();
        assert_eq!(
            client.action_output_type("double").unwrap(),
            TypeDescriptor::object([("doubled", TypeDescriptor::Primitive(PrimitiveType::Number))])
        );

        drop(client);
        handle.join().unwrap().unwrap();
    }
}
