use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use switchboard_core::{GlobalConfig, ProviderError};

/// JSON-RPC protocol version used for provider transport.
pub const JSONRPC_VERSION: &str = "2.0";
/// Provider protocol version exchanged during `Plugin.Handshake`.
pub const PROTOCOL_VERSION: u32 = 2;
/// Environment variable a runner sets before launching a provider binary.
pub const MAGIC_COOKIE_KEY: &str = "Switchboard";
/// Expected value of [`MAGIC_COOKIE_KEY`].
pub const MAGIC_COOKIE_VALUE: &str = "Plugin";

/// RPC method names.
pub mod method {
    pub const HANDSHAKE: &str = "Plugin.Handshake";
    pub const INIT: &str = "Plugin.Init";
    pub const INIT_SCHEMA: &str = "Plugin.InitSchema";
    pub const MAP_PAYLOAD_TO_TRIGGER_KEY: &str = "Plugin.MapPayloadToTriggerKey";
    pub const ACTION_NAMES: &str = "Plugin.ActionNames";
    pub const ACTION_CONFIGURATION_SCHEMA: &str = "Plugin.ActionConfigurationSchema";
    pub const ACTION_OUTPUT_TYPE: &str = "Plugin.ActionOutputType";
    pub const ACTION_EVALUATE: &str = "Plugin.ActionEvaluate";
    pub const TRIGGER_KEY_NAMES: &str = "Plugin.TriggerKeyNames";
    pub const TRIGGER_CONFIGURATION_SCHEMA: &str = "Plugin.TriggerConfigurationSchema";
    pub const TRIGGER_OUTPUT_TYPE: &str = "Plugin.TriggerOutputType";
    pub const CREATE_SUBSCRIPTION: &str = "Plugin.CreateSubscription";
    pub const READ_SUBSCRIPTION: &str = "Plugin.ReadSubscription";
    pub const UPDATE_SUBSCRIPTION: &str = "Plugin.UpdateSubscription";
    pub const DELETE_SUBSCRIPTION: &str = "Plugin.DeleteSubscription";

    pub const ALL: [&str; 15] = [
        HANDSHAKE,
        INIT,
        INIT_SCHEMA,
        MAP_PAYLOAD_TO_TRIGGER_KEY,
        ACTION_NAMES,
        ACTION_CONFIGURATION_SCHEMA,
        ACTION_OUTPUT_TYPE,
        ACTION_EVALUATE,
        TRIGGER_KEY_NAMES,
        TRIGGER_CONFIGURATION_SCHEMA,
        TRIGGER_OUTPUT_TYPE,
        CREATE_SUBSCRIPTION,
        READ_SUBSCRIPTION,
        UPDATE_SUBSCRIPTION,
        DELETE_SUBSCRIPTION,
    ];
}

/// Provider JSON-RPC error codes.
pub mod error_code {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    /// Provider is not initialized, failed init, or the handshake is missing.
    pub const PROVIDER_UNAVAILABLE: i32 = -32003;
    pub const INVALID_TYPE_REPRESENTATION: i32 = -32010;
    pub const SCHEMA_MISMATCH: i32 = -32011;
    pub const UNKNOWN_ACTION: i32 = -32012;
    pub const UNKNOWN_TRIGGER: i32 = -32013;
    /// `data` carries `context_id` and `subscription_id`.
    pub const UNKNOWN_SUBSCRIPTION: i32 = -32014;
    pub const INVALID_SCHEMA: i32 = -32015;
    pub const PROVIDER_FAILURE: i32 = -32016;
    /// The provider itself lost a downstream connection (vendor API, queue).
    pub const PROVIDER_TRANSPORT: i32 = -32017;
}

/// JSON-RPC request/response ID type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
    Null,
}

/// JSON-RPC error payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequestEnvelope {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequestEnvelope {
    pub fn new(id: RequestId, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponseEnvelope {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponseEnvelope {
    pub fn result(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Parameters for `Plugin.Handshake`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeParams {
    pub protocol_version: u32,
    pub magic_cookie_key: String,
    pub magic_cookie_value: String,
}

impl HandshakeParams {
    /// Handshake parameters for this build of the protocol.
    pub fn current() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            magic_cookie_key: MAGIC_COOKIE_KEY.to_string(),
            magic_cookie_value: MAGIC_COOKIE_VALUE.to_string(),
        }
    }
}

/// Result payload for `Plugin.Handshake`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResult {
    pub protocol_version: u32,
}

/// Handshake negotiation failures. Both are fatal for the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    ProtocolVersionMismatch { runner: u32, provider: u32 },
    MagicCookieMismatch { key: String, value: String },
}

impl HandshakeError {
    pub fn code(&self) -> i32 {
        error_code::INVALID_REQUEST
    }

    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        JsonRpcError::new(self.code(), self.to_string())
    }
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProtocolVersionMismatch { runner, provider } => write!(
                f,
                "runner speaks protocol version {runner} but provider speaks {provider}"
            ),
            Self::MagicCookieMismatch { key, value } => {
                write!(f, "magic cookie mismatch: {key}={value}")
            }
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Check runner handshake params against this provider's protocol.
pub fn negotiate_handshake(params: &HandshakeParams) -> Result<HandshakeResult, HandshakeError> {
    if params.magic_cookie_key != MAGIC_COOKIE_KEY || params.magic_cookie_value != MAGIC_COOKIE_VALUE
    {
        return Err(HandshakeError::MagicCookieMismatch {
            key: params.magic_cookie_key.clone(),
            value: params.magic_cookie_value.clone(),
        });
    }
    if params.protocol_version != PROTOCOL_VERSION {
        return Err(HandshakeError::ProtocolVersionMismatch {
            runner: params.protocol_version,
            provider: PROTOCOL_VERSION,
        });
    }
    Ok(HandshakeResult {
        protocol_version: PROTOCOL_VERSION,
    })
}

/// Parameters for `Plugin.Init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitParams {
    pub global_config: GlobalConfig,
    #[serde(default, with = "base64_map")]
    pub user_config: BTreeMap<String, Vec<u8>>,
}

/// Parameters for `Plugin.ActionEvaluate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEvalParams {
    pub context_id: String,
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub input: Vec<u8>,
}

/// Parameters shared by the subscription methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionParams {
    pub context_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_opt")]
    pub input: Option<Vec<u8>>,
}

impl SubscriptionParams {
    pub fn require_subscription_id(&self) -> Result<&str, JsonRpcError> {
        self.subscription_id
            .as_deref()
            .ok_or_else(|| JsonRpcError::new(error_code::INVALID_PARAMS, "missing subscription_id"))
    }

    pub fn require_input(&self) -> Result<&[u8], JsonRpcError> {
        self.input
            .as_deref()
            .ok_or_else(|| JsonRpcError::new(error_code::INVALID_PARAMS, "missing input"))
    }
}

/// Parameters for methods addressing one action or trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameParams {
    pub name: String,
}

/// Parameters for `Plugin.MapPayloadToTriggerKey`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadParams {
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

/// Byte payload returned by evaluate and subscription methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BytesResult {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Wire mapping of the provider error taxonomy.
pub trait ProviderErrorExt {
    fn code(&self) -> i32;

    fn to_jsonrpc_error(&self) -> JsonRpcError;
}

impl ProviderErrorExt for ProviderError {
    fn code(&self) -> i32 {
        match self {
            Self::InvalidTypeRepresentation(_) => error_code::INVALID_TYPE_REPRESENTATION,
            Self::SchemaMismatch(_) => error_code::SCHEMA_MISMATCH,
            Self::InvalidSchema(_) => error_code::INVALID_SCHEMA,
            Self::UnknownAction(_) => error_code::UNKNOWN_ACTION,
            Self::UnknownTrigger(_) => error_code::UNKNOWN_TRIGGER,
            Self::UnknownSubscription { .. } => error_code::UNKNOWN_SUBSCRIPTION,
            Self::Failed(_) => error_code::PROVIDER_FAILURE,
            Self::Unavailable(_) => error_code::PROVIDER_UNAVAILABLE,
            Self::Transport(_) => error_code::PROVIDER_TRANSPORT,
        }
    }

    fn to_jsonrpc_error(&self) -> JsonRpcError {
        let data = match self {
            Self::UnknownSubscription {
                context_id,
                subscription_id,
            } => json!({ "context_id": context_id, "subscription_id": subscription_id }),
            Self::InvalidTypeRepresentation(detail)
            | Self::SchemaMismatch(detail)
            | Self::InvalidSchema(detail)
            | Self::UnknownAction(detail)
            | Self::UnknownTrigger(detail)
            | Self::Failed(detail)
            | Self::Unavailable(detail)
            | Self::Transport(detail) => json!({ "detail": detail }),
        };
        JsonRpcError {
            code: self.code(),
            message: self.to_string(),
            data: Some(data),
        }
    }
}

/// Rebuild a provider error from a JSON-RPC error response.
///
/// Protocol-level codes and anything unrecognized become `Transport`.
pub fn provider_error_from_jsonrpc(error: &JsonRpcError) -> ProviderError {
    let detail = || {
        error
            .data
            .as_ref()
            .and_then(|data| data.get("detail"))
            .and_then(Value::as_str)
            .unwrap_or(error.message.as_str())
            .to_string()
    };

    match error.code {
        error_code::INVALID_TYPE_REPRESENTATION => {
            ProviderError::InvalidTypeRepresentation(detail())
        }
        error_code::SCHEMA_MISMATCH => ProviderError::SchemaMismatch(detail()),
        error_code::INVALID_SCHEMA => ProviderError::InvalidSchema(detail()),
        error_code::UNKNOWN_ACTION => ProviderError::UnknownAction(detail()),
        error_code::UNKNOWN_TRIGGER => ProviderError::UnknownTrigger(detail()),
        error_code::PROVIDER_FAILURE => ProviderError::Failed(detail()),
        error_code::PROVIDER_UNAVAILABLE => ProviderError::Unavailable(detail()),
        error_code::PROVIDER_TRANSPORT => ProviderError::Transport(detail()),
        error_code::UNKNOWN_SUBSCRIPTION => {
            let field = |name: &str| {
                error
                    .data
                    .as_ref()
                    .and_then(|data| data.get(name))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            };
            match (field("context_id"), field("subscription_id")) {
                (Some(context_id), Some(subscription_id)) => ProviderError::UnknownSubscription {
                    context_id,
                    subscription_id,
                },
                _ => ProviderError::Transport(format!(
                    "unknown-subscription error without ids: {}",
                    error.message
                )),
            }
        }
        code => ProviderError::Transport(format!("rpc error {code}: {}", error.message)),
    }
}

/// Base64 string encoding for byte fields.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(de::Error::custom)
    }
}

pub(crate) mod base64_opt {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| STANDARD.decode(encoded.as_bytes()).map_err(de::Error::custom))
            .transpose()
    }
}

pub(crate) mod base64_map {
    use std::collections::BTreeMap;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        map.iter()
            .map(|(key, bytes)| (key.as_str(), STANDARD.encode(bytes)))
            .collect::<BTreeMap<_, _>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        BTreeMap::<String, String>::deserialize(deserializer)?
            .into_iter()
            .map(|(key, encoded)| {
                STANDARD
                    .decode(encoded.as_bytes())
                    .map(|bytes| (key, bytes))
                    .map_err(de::Error::custom)
            })
            .collect()
    }
}
