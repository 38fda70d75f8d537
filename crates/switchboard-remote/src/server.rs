use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use switchboard_core::logging::{self, LogSettings};
use switchboard_core::{Provider, ProviderConfig, ProviderResult, RunnerSnapshot};

use crate::protocol::{
    error_code, method, negotiate_handshake, ActionEvalParams, BytesResult, HandshakeParams,
    InitParams, JsonRpcError, JsonRpcRequestEnvelope, JsonRpcResponseEnvelope, NameParams,
    PayloadParams, ProviderErrorExt, RequestId, SubscriptionParams, JSONRPC_VERSION,
    MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE,
};

/// Lifecycle of the provider behind a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderState {
    Uninitialized,
    Ready(ProviderConfig),
    /// `Init` failed; terminal.
    Failed(String),
}

/// Handshake status of one runner connection.
#[derive(Debug, Default)]
pub struct Connection {
    handshake_complete: AtomicBool,
    rejected: AtomicBool,
}

impl Connection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handshake_complete(&self) -> bool {
        self.handshake_complete.load(Ordering::SeqCst)
    }

    /// True once the runner failed the handshake; the connection is dead.
    pub fn rejected(&self) -> bool {
        self.rejected.load(Ordering::SeqCst)
    }
}

/// Server-side adapter: unmarshals request envelopes, dispatches them to the
/// local provider, and marshals results or errors back.
pub struct ProviderRpcServer {
    provider: Box<dyn Provider>,
    state: RwLock<ProviderState>,
}

impl ProviderRpcServer {
    pub fn new<P: Provider + 'static>(provider: P) -> Self {
        Self {
            provider: Box::new(provider),
            state: RwLock::new(ProviderState::Uninitialized),
        }
    }

    pub fn state(&self) -> ProviderState {
        match self.state.read() {
            Ok(state) => state.clone(),
            Err(_) => ProviderState::Failed("provider state lock poisoned".to_string()),
        }
    }

    /// Serve one connection: the handshake followed by a request loop.
    ///
    /// Returns when the reader reaches EOF, or with an error when the runner
    /// fails the handshake or the stream breaks.
    pub fn serve<R: BufRead, W: Write>(&self, reader: R, mut writer: W) -> Result<()> {
        let connection = Connection::new();

        for line in reader.lines() {
            let line = line.context("failed to read request line")?;
            if line.trim().is_empty() {
                continue;
            }

            let response = self.handle_line(&connection, &line);
            writer
                .write_all(response.as_bytes())
                .and_then(|()| writer.write_all(b"\n"))
                .and_then(|()| writer.flush())
                .context("failed to write response line")?;

            if connection.rejected() {
                bail!("runner handshake rejected; closing connection");
            }
        }

        tracing::info!("request stream closed");
        Ok(())
    }

    /// Serve over stdin/stdout after checking that a runner launched us.
    ///
    /// Logs for `component` go to stderr and the shared log directory, unless
    /// the hosting binary already installed a subscriber.
    pub fn serve_stdio(&self, component: &str) -> Result<()> {
        check_magic_cookie(|key| std::env::var(key).ok())?;
        install_logging(&LogSettings::for_component(component));
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        self.serve(stdin.lock(), stdout.lock())
    }

    /// Handle one encoded request and return the encoded response.
    pub fn handle_line(&self, connection: &Connection, line: &str) -> String {
        let response = match serde_json::from_str::<Value>(line) {
            Ok(raw) => match serde_json::from_value::<JsonRpcRequestEnvelope>(raw.clone()) {
                Ok(request) => self.handle_request(connection, request),
                Err(err) => JsonRpcResponseEnvelope::error(
                    request_id_of(&raw),
                    JsonRpcError::new(
                        error_code::INVALID_REQUEST,
                        format!("invalid JSON-RPC request: {err}"),
                    ),
                ),
            },
            Err(err) => JsonRpcResponseEnvelope::error(
                RequestId::Null,
                JsonRpcError::new(error_code::PARSE_ERROR, format!("parse error: {err}")),
            ),
        };

        serde_json::to_string(&response).unwrap_or_else(|err| {
            format!(
                r#"{{"jsonrpc":"{JSONRPC_VERSION}","id":null,"error":{{"code":{},"message":"failed to encode response: {}"}}}}"#,
                error_code::PROVIDER_FAILURE,
                err.to_string().replace('"', "'")
            )
        })
    }

    /// Handle one decoded request.
    pub fn handle_request(
        &self,
        connection: &Connection,
        request: JsonRpcRequestEnvelope,
    ) -> JsonRpcResponseEnvelope {
        if request.jsonrpc != JSONRPC_VERSION {
            return JsonRpcResponseEnvelope::error(
                request.id,
                JsonRpcError::new(
                    error_code::INVALID_REQUEST,
                    format!("unsupported jsonrpc version: {}", request.jsonrpc),
                ),
            );
        }

        match self.dispatch(connection, &request) {
            Ok(result) => JsonRpcResponseEnvelope::result(request.id, result),
            Err(error) => {
                tracing::debug!(
                    method = %request.method,
                    code = error.code,
                    "request failed: {}",
                    error.message
                );
                JsonRpcResponseEnvelope::error(request.id, error)
            }
        }
    }

    fn dispatch(
        &self,
        connection: &Connection,
        request: &JsonRpcRequestEnvelope,
    ) -> std::result::Result<Value, JsonRpcError> {
        if connection.rejected() {
            return Err(JsonRpcError::new(
                error_code::PROVIDER_UNAVAILABLE,
                "connection failed the handshake",
            ));
        }

        if request.method == method::HANDSHAKE {
            return self.handshake(connection, request);
        }

        if !connection.handshake_complete() {
            return Err(JsonRpcError::new(
                error_code::PROVIDER_UNAVAILABLE,
                format!("{} must be completed first", method::HANDSHAKE),
            ));
        }

        if !method::ALL.contains(&request.method.as_str()) {
            return Err(JsonRpcError::new(
                error_code::METHOD_NOT_FOUND,
                format!("unsupported method: {}", request.method),
            ));
        }

        match request.method.as_str() {
            method::INIT => self.init(parse_params(request)?),
            method::INIT_SCHEMA => {
                self.require_not_failed()?;
                respond(self.provider.init_schema())
            }
            _ => {
                self.require_ready()?;
                self.dispatch_ready(request)
            }
        }
    }

    fn handshake(
        &self,
        connection: &Connection,
        request: &JsonRpcRequestEnvelope,
    ) -> std::result::Result<Value, JsonRpcError> {
        if connection.handshake_complete() {
            return Err(JsonRpcError::new(
                error_code::INVALID_REQUEST,
                format!("{} already completed", method::HANDSHAKE),
            ));
        }

        let params: HandshakeParams = parse_params(request)?;
        match negotiate_handshake(&params) {
            Ok(result) => {
                connection.handshake_complete.store(true, Ordering::SeqCst);
                tracing::info!(protocol_version = result.protocol_version, "handshake completed");
                encode_result(&result)
            }
            Err(err) => {
                connection.rejected.store(true, Ordering::SeqCst);
                tracing::error!("handshake rejected: {err}");
                Err(err.to_jsonrpc_error())
            }
        }
    }

    fn init(&self, params: InitParams) -> std::result::Result<Value, JsonRpcError> {
        let mut state = self.state.write().map_err(|_| {
            JsonRpcError::new(
                error_code::PROVIDER_UNAVAILABLE,
                "provider state lock poisoned",
            )
        })?;

        match &*state {
            ProviderState::Uninitialized => {}
            ProviderState::Ready(_) => {
                return Err(JsonRpcError::new(
                    error_code::INVALID_REQUEST,
                    "provider is already initialized",
                ))
            }
            ProviderState::Failed(reason) => return Err(unavailable(reason)),
        }

        let runner = RunnerSnapshot {
            global_config: params.global_config,
            user_config: params.user_config,
        };
        match self.provider.init(&runner) {
            Ok(config) => {
                tracing::info!(
                    contexts = runner.user_config.len(),
                    subscriptions_registered_together = config.subscriptions_registered_together,
                    "provider initialized"
                );
                *state = ProviderState::Ready(config);
                encode_result(&config)
            }
            Err(err) => {
                tracing::error!("provider init failed: {err}");
                *state = ProviderState::Failed(err.to_string());
                Err(err.to_jsonrpc_error())
            }
        }
    }

    fn dispatch_ready(
        &self,
        request: &JsonRpcRequestEnvelope,
    ) -> std::result::Result<Value, JsonRpcError> {
        let provider = self.provider.as_ref();
        match request.method.as_str() {
            method::MAP_PAYLOAD_TO_TRIGGER_KEY => {
                let params: PayloadParams = parse_params(request)?;
                respond(provider.map_payload_to_trigger_key(&params.payload))
            }
            method::ACTION_NAMES => respond(provider.action_names()),
            method::ACTION_CONFIGURATION_SCHEMA => {
                let params: NameParams = parse_params(request)?;
                respond(provider.action_configuration_schema(&params.name))
            }
            method::ACTION_OUTPUT_TYPE => {
                let params: NameParams = parse_params(request)?;
                respond(provider.action_output_type(&params.name))
            }
            method::ACTION_EVALUATE => {
                let params: ActionEvalParams = parse_params(request)?;
                respond_bytes(provider.action_evaluate(
                    &params.context_id,
                    &params.name,
                    &params.input,
                ))
            }
            method::TRIGGER_KEY_NAMES => respond(provider.trigger_key_names()),
            method::TRIGGER_CONFIGURATION_SCHEMA => respond(provider.trigger_configuration_schema()),
            method::TRIGGER_OUTPUT_TYPE => {
                let params: NameParams = parse_params(request)?;
                respond(provider.trigger_output_type(&params.name))
            }
            method::CREATE_SUBSCRIPTION => {
                let params: SubscriptionParams = parse_params(request)?;
                respond_bytes(
                    provider.create_subscription(&params.context_id, params.require_input()?),
                )
            }
            method::READ_SUBSCRIPTION => {
                let params: SubscriptionParams = parse_params(request)?;
                respond_bytes(provider.read_subscription(
                    &params.context_id,
                    params.require_subscription_id()?,
                ))
            }
            method::UPDATE_SUBSCRIPTION => {
                let params: SubscriptionParams = parse_params(request)?;
                respond_bytes(provider.update_subscription(
                    &params.context_id,
                    params.require_subscription_id()?,
                    params.require_input()?,
                ))
            }
            method::DELETE_SUBSCRIPTION => {
                let params: SubscriptionParams = parse_params(request)?;
                respond(provider.delete_subscription(
                    &params.context_id,
                    params.require_subscription_id()?,
                ))
            }
            other => Err(JsonRpcError::new(
                error_code::METHOD_NOT_FOUND,
                format!("unsupported method: {other}"),
            )),
        }
    }

    fn require_ready(&self) -> std::result::Result<(), JsonRpcError> {
        match self.state() {
            ProviderState::Ready(_) => Ok(()),
            ProviderState::Uninitialized => Err(JsonRpcError::new(
                error_code::PROVIDER_UNAVAILABLE,
                format!("provider is not initialized; call {} first", method::INIT),
            )),
            ProviderState::Failed(reason) => Err(unavailable(&reason)),
        }
    }

    fn require_not_failed(&self) -> std::result::Result<(), JsonRpcError> {
        match self.state() {
            ProviderState::Failed(reason) => Err(unavailable(&reason)),
            _ => Ok(()),
        }
    }
}

/// Fail unless the process was launched by a runner that set the magic cookie.
pub fn check_magic_cookie(lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
    match lookup(MAGIC_COOKIE_KEY) {
        Some(value) if value == MAGIC_COOKIE_VALUE => Ok(()),
        _ => bail!(
            "this binary is a switchboard provider and must be launched by a runner \
             (expected {MAGIC_COOKIE_KEY}={MAGIC_COOKIE_VALUE} in the environment)"
        ),
    }
}

/// Install the logging subscriber for a provider process. Returns false when
/// one is already in place or the log file cannot be opened; serving goes on
/// either way.
fn install_logging(settings: &LogSettings) -> bool {
    match logging::init_with(settings) {
        Ok(()) => {
            tracing::info!(component = %settings.component, "provider logging initialized");
            true
        }
        Err(err) => {
            tracing::debug!("provider logging not installed: {err:#}");
            false
        }
    }
}

fn parse_params<T: DeserializeOwned>(
    request: &JsonRpcRequestEnvelope,
) -> std::result::Result<T, JsonRpcError> {
    serde_json::from_value(request.params.clone()).map_err(|err| {
        JsonRpcError::new(
            error_code::INVALID_PARAMS,
            format!("invalid params for {}: {err}", request.method),
        )
    })
}

fn respond<T: Serialize>(result: ProviderResult<T>) -> std::result::Result<Value, JsonRpcError> {
    let value = result.map_err(|err| err.to_jsonrpc_error())?;
    encode_result(&value)
}

fn respond_bytes(result: ProviderResult<Vec<u8>>) -> std::result::Result<Value, JsonRpcError> {
    respond(result.map(|data| BytesResult { data }))
}

fn encode_result<T: Serialize>(value: &T) -> std::result::Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|err| {
        JsonRpcError::new(
            error_code::PROVIDER_FAILURE,
            format!("failed to encode result: {err}"),
        )
    })
}

fn unavailable(reason: &str) -> JsonRpcError {
    JsonRpcError::new(
        error_code::PROVIDER_UNAVAILABLE,
        format!("provider failed to initialize: {reason}"),
    )
}

fn request_id_of(raw: &Value) -> RequestId {
    raw.get("id")
        .cloned()
        .and_then(|id| serde_json::from_value(id).ok())
        .unwrap_or(RequestId::Null)
}
