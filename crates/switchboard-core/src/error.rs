use std::fmt;

/// Result alias for provider-boundary operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Failures surfaced across the runner/provider boundary.
///
/// Domain failures (`InvalidTypeRepresentation` through `Failed`) are
/// call-scoped and returned to the immediate caller. `Unavailable` means the
/// provider instance can no longer be invoked, and `Transport` means the remote
/// call could not be completed at all; callers treat both as provider-unreachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    InvalidTypeRepresentation(String),
    SchemaMismatch(String),
    InvalidSchema(String),
    UnknownAction(String),
    UnknownTrigger(String),
    UnknownSubscription {
        context_id: String,
        subscription_id: String,
    },
    /// Provider-specific failure raised by action or subscription logic.
    Failed(String),
    Unavailable(String),
    Transport(String),
}

impl ProviderError {
    /// Shorthand for an `UnknownSubscription` error.
    pub fn unknown_subscription(context_id: &str, subscription_id: &str) -> Self {
        Self::UnknownSubscription {
            context_id: context_id.to_string(),
            subscription_id: subscription_id.to_string(),
        }
    }

    /// Return true when the error means the provider cannot be reached or used.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Unavailable(_))
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTypeRepresentation(msg) => {
                write!(f, "invalid type representation: {msg}")
            }
            Self::SchemaMismatch(msg) => write!(f, "schema mismatch: {msg}"),
            Self::InvalidSchema(msg) => write!(f, "invalid schema: {msg}"),
            Self::UnknownAction(name) => write!(f, "unknown action: {name}"),
            Self::UnknownTrigger(key) => write!(f, "unknown trigger key: {key}"),
            Self::UnknownSubscription {
                context_id,
                subscription_id,
            } => write!(
                f,
                "unknown subscription {subscription_id} in context {context_id}"
            ),
            Self::Failed(msg) => write!(f, "provider failure: {msg}"),
            Self::Unavailable(msg) => write!(f, "provider unavailable: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}
