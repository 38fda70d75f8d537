use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Result};
use switchboard_core::{
    decode_input, Provider, ProviderConfig, ProviderError, RunnerProvider,
};

/// Runtime manager failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    UnknownProvider(String),
    NotInitialized(String),
    /// `init` failed earlier; the provider is never invoked again.
    InitFailed { provider: String, reason: String },
    Provider {
        provider: String,
        error: ProviderError,
    },
}

impl RuntimeError {
    /// Return true when the provider cannot be reached or used any more.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::InitFailed { .. } => true,
            Self::Provider { error, .. } => error.is_unreachable(),
            Self::UnknownProvider(_) | Self::NotInitialized(_) => false,
        }
    }

    /// The provider's own error, if the call reached it.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Provider { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownProvider(name) => write!(f, "unknown provider: {name}"),
            Self::NotInitialized(name) => write!(f, "provider is not initialized: {name}"),
            Self::InitFailed { provider, reason } => {
                write!(f, "provider {provider} failed to initialize: {reason}")
            }
            Self::Provider { provider, error } => write!(f, "provider {provider}: {error}"),
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Provider { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Lifecycle of one registered provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Registered,
    Ready(ProviderConfig),
    Failed(String),
}

/// Registry of named providers on the runner side.
///
/// Each provider is initialized at most once. Subscription state returned by
/// read and update calls is remembered per `(context_id, subscription_id)`
/// as a last-seen copy; the provider stays the source of truth.
#[derive(Default)]
pub struct ProviderRuntime {
    providers: BTreeMap<String, ManagedProvider>,
}

struct ManagedProvider {
    provider: Box<dyn Provider>,
    status: Mutex<ProviderStatus>,
    last_states: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

impl ProviderRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, provider: Box<dyn Provider>) -> Result<()> {
        if name.trim().is_empty() {
            bail!("provider name must not be empty");
        }
        if self.providers.contains_key(name) {
            bail!("duplicate provider name: {}", name);
        }

        self.providers.insert(
            name.to_string(),
            ManagedProvider {
                provider,
                status: Mutex::new(ProviderStatus::Registered),
                last_states: Mutex::new(BTreeMap::new()),
            },
        );
        Ok(())
    }

    /// Return all registered provider names in sorted order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn status(&self, name: &str) -> Result<ProviderStatus, RuntimeError> {
        let managed = self.managed(name)?;
        Ok(lock(name, &managed.status)?.clone())
    }

    /// Initialize a provider with runner data.
    ///
    /// Each context's user configuration is checked against the provider's
    /// init schema first; a mismatch is reported without calling `init`.
    /// A ready provider returns its recorded configuration again.
    pub fn init(
        &self,
        name: &str,
        runner: &dyn RunnerProvider,
    ) -> Result<ProviderConfig, RuntimeError> {
        let managed = self.managed(name)?;
        let mut status = lock(name, &managed.status)?;

        match &*status {
            ProviderStatus::Ready(config) => return Ok(*config),
            ProviderStatus::Failed(reason) => {
                return Err(RuntimeError::InitFailed {
                    provider: name.to_string(),
                    reason: reason.clone(),
                })
            }
            ProviderStatus::Registered => {}
        }

        let schema = managed
            .provider
            .init_schema()
            .map_err(|error| provider_error(name, error))?;
        for (context_id, bytes) in runner.user_config() {
            decode_input(&bytes, &schema).map_err(|error| {
                tracing::warn!(
                    provider = name,
                    context_id = %context_id,
                    "user config rejected: {error}"
                );
                provider_error(name, error)
            })?;
        }

        match managed.provider.init(runner) {
            Ok(config) => {
                tracing::info!(provider = name, "provider initialized");
                *status = ProviderStatus::Ready(config);
                Ok(config)
            }
            Err(error) => {
                tracing::error!(provider = name, "provider init failed: {error}");
                *status = ProviderStatus::Failed(error.to_string());
                Err(provider_error(name, error))
            }
        }
    }

    /// Initialize every registered provider, in name order.
    pub fn init_all(
        &self,
        runner: &dyn RunnerProvider,
    ) -> Vec<(String, Result<ProviderConfig, RuntimeError>)> {
        self.providers
            .keys()
            .map(|name| (name.clone(), self.init(name, runner)))
            .collect()
    }

    /// Borrow a ready provider for direct calls, e.g. schema introspection.
    pub fn provider(&self, name: &str) -> Result<&dyn Provider, RuntimeError> {
        let managed = self.managed(name)?;
        let status = lock(name, &managed.status)?.clone();
        match status {
            ProviderStatus::Ready(_) => Ok(managed.provider.as_ref()),
            ProviderStatus::Registered => Err(RuntimeError::NotInitialized(name.to_string())),
            ProviderStatus::Failed(reason) => Err(RuntimeError::InitFailed {
                provider: name.to_string(),
                reason,
            }),
        }
    }

    pub fn evaluate_action(
        &self,
        name: &str,
        context_id: &str,
        action: &str,
        input: &[u8],
    ) -> Result<Vec<u8>, RuntimeError> {
        self.provider(name)?
            .action_evaluate(context_id, action, input)
            .map_err(|error| provider_error(name, error))
    }

    pub fn map_payload_to_trigger_key(
        &self,
        name: &str,
        payload: &[u8],
    ) -> Result<String, RuntimeError> {
        self.provider(name)?
            .map_payload_to_trigger_key(payload)
            .map_err(|error| provider_error(name, error))
    }

    pub fn create_subscription(
        &self,
        name: &str,
        context_id: &str,
        input: &[u8],
    ) -> Result<Vec<u8>, RuntimeError> {
        self.provider(name)?
            .create_subscription(context_id, input)
            .map_err(|error| provider_error(name, error))
    }

    pub fn read_subscription(
        &self,
        name: &str,
        context_id: &str,
        subscription_id: &str,
    ) -> Result<Vec<u8>, RuntimeError> {
        let result = self
            .provider(name)?
            .read_subscription(context_id, subscription_id);
        self.record(name, context_id, subscription_id, result)
    }

    pub fn update_subscription(
        &self,
        name: &str,
        context_id: &str,
        subscription_id: &str,
        input: &[u8],
    ) -> Result<Vec<u8>, RuntimeError> {
        let result = self
            .provider(name)?
            .update_subscription(context_id, subscription_id, input);
        self.record(name, context_id, subscription_id, result)
    }

    /// Delete a subscription and forget its last-seen state.
    pub fn delete_subscription(
        &self,
        name: &str,
        context_id: &str,
        subscription_id: &str,
    ) -> Result<(), RuntimeError> {
        let result = self
            .provider(name)?
            .delete_subscription(context_id, subscription_id);
        if matches!(
            result,
            Ok(()) | Err(ProviderError::UnknownSubscription { .. })
        ) {
            self.forget(name, context_id, subscription_id)?;
        }
        result.map_err(|error| provider_error(name, error))
    }

    /// Last state the provider returned for a subscription, if any.
    pub fn last_state(
        &self,
        name: &str,
        context_id: &str,
        subscription_id: &str,
    ) -> Result<Option<Vec<u8>>, RuntimeError> {
        let managed = self.managed(name)?;
        Ok(lock(name, &managed.last_states)?
            .get(&(context_id.to_string(), subscription_id.to_string()))
            .cloned())
    }

    fn record(
        &self,
        name: &str,
        context_id: &str,
        subscription_id: &str,
        result: Result<Vec<u8>, ProviderError>,
    ) -> Result<Vec<u8>, RuntimeError> {
        match result {
            Ok(state) => {
                let managed = self.managed(name)?;
                lock(name, &managed.last_states)?.insert(
                    (context_id.to_string(), subscription_id.to_string()),
                    state.clone(),
                );
                Ok(state)
            }
            Err(error) => {
                if matches!(error, ProviderError::UnknownSubscription { .. }) {
                    self.forget(name, context_id, subscription_id)?;
                }
                Err(provider_error(name, error))
            }
        }
    }

    fn forget(
        &self,
        name: &str,
        context_id: &str,
        subscription_id: &str,
    ) -> Result<(), RuntimeError> {
        let managed = self.managed(name)?;
        lock(name, &managed.last_states)?
            .remove(&(context_id.to_string(), subscription_id.to_string()));
        Ok(())
    }

    fn managed(&self, name: &str) -> Result<&ManagedProvider, RuntimeError> {
        self.providers
            .get(name)
            .ok_or_else(|| RuntimeError::UnknownProvider(name.to_string()))
    }
}

fn provider_error(name: &str, error: ProviderError) -> RuntimeError {
    RuntimeError::Provider {
        provider: name.to_string(),
        error,
    }
}

fn lock<'a, T>(name: &str, mutex: &'a Mutex<T>) -> Result<MutexGuard<'a, T>, RuntimeError> {
    mutex.lock().map_err(|_| {
        provider_error(
            name,
            ProviderError::Failed("runtime lock poisoned".to_string()),
        )
    })
}
