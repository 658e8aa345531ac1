//! Per-socket event listener registry.
//!
//! Maps event names to ordered listener lists. Dispatch always runs against a
//! snapshot taken when it starts, so listeners may add or remove listeners
//! (including themselves) while being invoked.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use sio_core::error::DispatchError;

use crate::ack::AckResponder;
use crate::value::Value;

/// Handle returned by `on`/`once`, used to remove that listener again.
pub type SubscriptionId = u64;

/// What a listener returns. Errors are reported, never propagated.
pub type ListenerResult = anyhow::Result<()>;

/// A registered event callback.
pub type Listener = Arc<dyn Fn(&Event) -> ListenerResult + Send + Sync>;

/// An event delivered to listeners.
#[derive(Debug, Clone)]
pub struct Event {
    name: String,
    args: Vec<Value>,
    ack: Option<AckResponder>,
}

impl Event {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
            ack: None,
        }
    }

    pub(crate) fn with_ack(mut self, ack: Option<AckResponder>) -> Self {
        self.ack = ack;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Argument at `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Responder for server-initiated acks. `None` when the sender did not
    /// ask for one.
    pub fn ack(&self) -> Option<&AckResponder> {
        self.ack.as_ref()
    }
}

#[derive(Clone)]
struct ListenerEntry {
    id: SubscriptionId,
    once: bool,
    listener: Listener,
}

/// Event name -> ordered listeners for one socket.
pub struct EventRegistry {
    namespace: String,
    next_id: AtomicU64,
    listeners: Mutex<HashMap<String, Vec<ListenerEntry>>>,
}

impl EventRegistry {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Register a persistent listener.
    pub fn on<F>(&self, event: &str, listener: F) -> SubscriptionId
    where
        F: Fn(&Event) -> ListenerResult + Send + Sync + 'static,
    {
        self.insert(event, false, Arc::new(listener))
    }

    /// Register a listener that is removed before its first invocation.
    pub fn once<F>(&self, event: &str, listener: F) -> SubscriptionId
    where
        F: Fn(&Event) -> ListenerResult + Send + Sync + 'static,
    {
        self.insert(event, true, Arc::new(listener))
    }

    fn insert(&self, event: &str, once: bool, listener: Listener) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(ListenerEntry { id, once, listener });
        id
    }

    /// Remove the listener `id` from `event`, or every listener of `event`
    /// when `id` is `None`. Removing something that is not there is a no-op.
    pub fn off(&self, event: &str, id: Option<SubscriptionId>) {
        let mut listeners = self.listeners.lock();
        match id {
            None => {
                listeners.remove(event);
            }
            Some(id) => {
                if let Some(entries) = listeners.get_mut(event) {
                    entries.retain(|entry| entry.id != id);
                    if entries.is_empty() {
                        listeners.remove(event);
                    }
                }
            }
        }
    }

    /// Remove every listener for every event.
    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.lock().get(event).map_or(0, Vec::len)
    }

    pub fn has_listeners(&self, event: &str) -> bool {
        self.listener_count(event) > 0
    }

    /// Names of all events that currently have listeners, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.listeners.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Invoke the listeners registered for `event.name()` at this moment, in
    /// insertion order. One-shot listeners are unregistered before anything
    /// runs. A failing or panicking listener does not stop the others; its
    /// failure is returned.
    pub fn dispatch(&self, event: &Event) -> Vec<DispatchError> {
        let snapshot = self.take_snapshot(event.name());
        if snapshot.is_empty() {
            debug!("no listeners for '{}' on {}", event.name(), self.namespace);
            return Vec::new();
        }

        let mut failures = Vec::new();
        for entry in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (entry.listener)(event)));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{e:#}"),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };
            failures.push(DispatchError {
                namespace: self.namespace.clone(),
                event: event.name().to_string(),
                listener: entry.id,
                message,
            });
        }
        failures
    }

    fn take_snapshot(&self, event: &str) -> Vec<ListenerEntry> {
        let mut listeners = self.listeners.lock();
        let Some(entries) = listeners.get_mut(event) else {
            return Vec::new();
        };
        let snapshot = entries.clone();
        entries.retain(|entry| !entry.once);
        if entries.is_empty() {
            listeners.remove(event);
        }
        snapshot
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
