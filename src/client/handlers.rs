//! Local event handler table for the Sync Agent.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// A UI-side callback for one event name. Receives the envelope's `data`.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Returned by `on`; pass it to `off` to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

#[derive(Default)]
pub struct HandlerTable {
    next_id: u64,
    by_event: HashMap<String, Vec<(HandlerId, Handler)>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, event: impl Into<String>, handler: Handler) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.by_event
            .entry(event.into())
            .or_default()
            .push((id, handler));
        id
    }

    pub fn remove(&mut self, event: &str, id: HandlerId) -> bool {
        let Some(handlers) = self.by_event.get_mut(event) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            self.by_event.remove(event);
        }
        removed
    }

    /// Snapshot of the handlers for `event`, in registration order.
    pub fn handlers_for(&self, event: &str) -> Vec<Handler> {
        self.by_event
            .get(event)
            .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }

    /// Drop every handler. Returns how many were registered.
    pub fn clear(&mut self) -> usize {
        let count = self.len();
        self.by_event.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.by_event.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_event.is_empty()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .by_event
            .iter()
            .map(|(event, handlers)| (event.as_str(), handlers.len()))
            .collect();
        f.debug_struct("HandlerTable")
            .field("handlers", &counts)
            .finish()
    }
}
