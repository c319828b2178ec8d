use crate::models::MarketEvent;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Consumer of market events (candles, ratios, open interest).
///
/// An observer that returns an error is dropped from its [`ObserverSet`].
#[async_trait]
pub trait MarketObserver: Send + Sync {
    fn name(&self) -> &str;

    async fn on_event(&self, event: &MarketEvent) -> anyhow::Result<()>;
}

/// Registered observers. Clones share the same registry.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Arc<Mutex<Vec<Arc<dyn MarketObserver>>>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Registering the same `Arc` twice is a no-op.
    pub fn register(&self, observer: Arc<dyn MarketObserver>) {
        let mut observers = match self.observers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
            return;
        }
        tracing::debug!(observer = observer.name(), "Observer registered");
        observers.push(observer);
    }

    pub fn remove(&self, observer: &Arc<dyn MarketObserver>) -> bool {
        let mut observers = match self.observers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = observers.len();
        observers.retain(|o| !Arc::ptr_eq(o, observer));
        observers.len() != before
    }

    pub fn clear(&self) {
        match self.observers.lock() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    pub fn len(&self) -> usize {
        match self.observers.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn MarketObserver>> {
        match self.observers.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Deliver `event` to every observer in registration order.
    ///
    /// The lock is not held across deliveries. Failing observers are removed
    /// after the round; returns how many were delivered successfully.
    pub async fn notify(&self, event: &MarketEvent) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();

        for observer in self.snapshot() {
            match observer.on_event(event).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::error!(
                        observer = observer.name(),
                        event = event.kind(),
                        "Observer failed, removing it: {:#}",
                        e
                    );
                    failed.push(observer);
                }
            }
        }

        for observer in &failed {
            self.remove(observer);
        }

        delivered
    }
}
