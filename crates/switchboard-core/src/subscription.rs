use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{ProviderError, ProviderResult};

/// A stateful registration of runner interest in trigger events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub context_id: String,
    pub subscription_id: String,
    /// Opaque provider-defined state.
    pub state: Vec<u8>,
}

/// In-memory subscription records for provider implementations.
///
/// Records are keyed by `(context_id, subscription_id)`. Ids are assigned on
/// create and never reused, so a deleted id stays unknown for good.
#[derive(Debug, Default)]
pub struct SubscriptionStore {
    inner: Mutex<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    next_id: u64,
    live: BTreeMap<(String, String), Subscription>,
}

impl SubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a subscription. `build` receives the assigned id and returns the
    /// initial state; nothing is recorded if it fails.
    ///
    /// `build` runs without the store lock held, so it may call back into the
    /// store and a slow vendor registration does not stall other callers. The
    /// id is reserved up front and burned if `build` fails.
    pub fn create<F>(&self, context_id: &str, build: F) -> ProviderResult<Subscription>
    where
        F: FnOnce(&str) -> ProviderResult<Vec<u8>>,
    {
        let subscription_id = {
            let mut inner = self.lock()?;
            inner.next_id += 1;
            format!("sub-{}", inner.next_id)
        };
        let state = build(&subscription_id)?;

        let subscription = Subscription {
            context_id: context_id.to_string(),
            subscription_id: subscription_id.clone(),
            state,
        };
        self.lock()?.live.insert(
            (context_id.to_string(), subscription_id),
            subscription.clone(),
        );
        tracing::debug!(
            context_id,
            subscription_id = %subscription.subscription_id,
            "subscription created"
        );
        Ok(subscription)
    }

    pub fn read(&self, context_id: &str, subscription_id: &str) -> ProviderResult<Subscription> {
        self.lock()?
            .live
            .get(&key(context_id, subscription_id))
            .cloned()
            .ok_or_else(|| ProviderError::unknown_subscription(context_id, subscription_id))
    }

    /// Replace the state of a live subscription.
    pub fn update(
        &self,
        context_id: &str,
        subscription_id: &str,
        state: Vec<u8>,
    ) -> ProviderResult<Subscription> {
        let mut inner = self.lock()?;
        let record = inner
            .live
            .get_mut(&key(context_id, subscription_id))
            .ok_or_else(|| ProviderError::unknown_subscription(context_id, subscription_id))?;
        record.state = state;
        Ok(record.clone())
    }

    /// Remove a subscription and return its final record.
    pub fn delete(&self, context_id: &str, subscription_id: &str) -> ProviderResult<Subscription> {
        let removed = self
            .lock()?
            .live
            .remove(&key(context_id, subscription_id))
            .ok_or_else(|| ProviderError::unknown_subscription(context_id, subscription_id))?;
        tracing::debug!(context_id, subscription_id, "subscription deleted");
        Ok(removed)
    }

    /// Live subscriptions of one context, ordered by id.
    pub fn list(&self, context_id: &str) -> ProviderResult<Vec<Subscription>> {
        Ok(self
            .lock()?
            .live
            .values()
            .filter(|subscription| subscription.context_id == context_id)
            .cloned()
            .collect())
    }

    fn lock(&self) -> ProviderResult<MutexGuard<'_, StoreInner>> {
        self.inner
            .lock()
            .map_err(|_| ProviderError::Failed("subscription store lock poisoned".to_string()))
    }
}

fn key(context_id: &str, subscription_id: &str) -> (String, String) {
    (context_id.to_string(), subscription_id.to_string())
}
