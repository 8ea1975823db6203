//! Dispatch Routing
//!
//! Registry of subscribers for named dispatch events. Subscribers run
//! synchronously, in registration order, each behind its own failure
//! boundary.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use crate::infrastructure::metrics;

/// Subscriber callback: `(event_name, payload)`
pub type DispatchHandler = Arc<dyn Fn(&str, &Value) -> anyhow::Result<()> + Send + Sync>;

/// Event name to ordered subscriber list
#[derive(Default)]
pub struct DispatchRegistry {
    named: DashMap<String, Vec<DispatchHandler>>,
    catch_all: RwLock<Vec<DispatchHandler>>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for one event name.
    pub fn subscribe<F>(&self, event_name: impl Into<String>, handler: F)
    where
        F: Fn(&str, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.named
            .entry(event_name.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Register a subscriber for every dispatch event.
    pub fn subscribe_all<F>(&self, handler: F)
    where
        F: Fn(&str, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.catch_all.write().push(Arc::new(handler));
    }

    pub fn subscriber_count(&self, event_name: &str) -> usize {
        self.named.get(event_name).map(|h| h.len()).unwrap_or(0)
    }

    /// Deliver a payload to the subscribers of `event_name`, then to the
    /// catch-all subscribers. Returns how many subscribers failed.
    pub fn publish(&self, event_name: &str, payload: &Value) -> usize {
        // Snapshot so handlers may register further subscribers
        let mut handlers: Vec<DispatchHandler> = self
            .named
            .get(event_name)
            .map(|h| h.value().clone())
            .unwrap_or_default();
        handlers.extend(self.catch_all.read().iter().cloned());

        if handlers.is_empty() {
            tracing::trace!(event = event_name, "No subscribers for dispatch event");
            return 0;
        }

        let mut failures = 0;
        for (index, handler) in handlers.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(event_name, payload)));
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            failures += 1;
            metrics::record_subscriber_failure(event_name);
            tracing::error!(
                event = event_name,
                subscriber = index,
                error = %error,
                "Dispatch subscriber failed"
            );
        }
        failures
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

impl std::fmt::Debug for DispatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRegistry")
            .field("events", &self.named.len())
            .field("catch_all", &self.catch_all.read().len())
            .finish()
    }
}
