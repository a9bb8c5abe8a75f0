//! Type-keyed fan-out of inbound messages and status changes.
//!
//! Callbacks run synchronously on the manager actor's task, one after another. Each call is
//! isolated with `catch_unwind`: a panicking subscriber is logged and the remaining subscribers
//! still receive the event. The registry lock is released before any callback runs, so callbacks
//! may subscribe or unsubscribe freely.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tracing::error;

use crate::core::{ConnectionStatus, RealtimeMessage, WILDCARD_TYPE};

pub type MessageHandler = Arc<dyn Fn(&RealtimeMessage) + Send + Sync>;
pub type StatusListener = Arc<dyn Fn(&str, &ConnectionStatus) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<String, Vec<(u64, MessageHandler)>>,
    status_listeners: Vec<(u64, StatusListener)>,
}

impl Registry {
    fn next_id(&mut self) -> u64 {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }
}

#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<RwLock<Registry>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `message_type` (`"*"` for every message).
    ///
    /// Registering the same `Arc` twice for one type is a no-op; both handles then refer to the
    /// single registration.
    pub fn subscribe(&self, message_type: impl Into<String>, handler: MessageHandler) -> Subscription {
        let message_type = message_type.into();
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);

        let existing = registry.handlers.get(&message_type).and_then(|entries| {
            entries
                .iter()
                .find(|(_, registered)| same_callback(registered, &handler))
                .map(|(id, _)| *id)
        });
        let id = match existing {
            Some(id) => id,
            None => {
                let id = registry.next_id();
                registry
                    .handlers
                    .entry(message_type.clone())
                    .or_default()
                    .push((id, handler));
                id
            }
        };

        Subscription {
            registry: Arc::downgrade(&self.registry),
            key: SubscriptionKey::Message { message_type, id },
        }
    }

    pub fn subscribe_fn<F>(&self, message_type: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&RealtimeMessage) + Send + Sync + 'static,
    {
        self.subscribe(message_type, Arc::new(callback))
    }

    /// Register a listener called with `(endpoint, status)` on every status change.
    pub fn on_status_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&str, &ConnectionStatus) + Send + Sync + 'static,
    {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let id = registry.next_id();
        registry.status_listeners.push((id, Arc::new(listener)));
        Subscription {
            registry: Arc::downgrade(&self.registry),
            key: SubscriptionKey::Status { id },
        }
    }

    pub fn handler_count(&self, message_type: &str) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .get(message_type)
            .map_or(0, Vec::len)
    }

    /// Deliver to type subscribers and wildcard subscribers. Returns how many callbacks ran
    /// to completion.
    pub fn dispatch(&self, message: &RealtimeMessage) -> usize {
        let targets: Vec<MessageHandler> = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            let typed = registry.handlers.get(&message.kind).into_iter().flatten();
            let wildcard = if message.kind == WILDCARD_TYPE {
                None
            } else {
                registry.handlers.get(WILDCARD_TYPE)
            };
            typed
                .chain(wildcard.into_iter().flatten())
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        let mut delivered = 0;
        for handler in targets {
            match catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(()) => delivered += 1,
                Err(panic) => error!(
                    message_type = %message.kind,
                    panic = %panic_message(panic.as_ref()),
                    "subscriber callback panicked; continuing with remaining subscribers"
                ),
            }
        }
        delivered
    }

    pub(crate) fn notify_status(&self, endpoint: &str, status: &ConnectionStatus) {
        let listeners: Vec<StatusListener> = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            registry
                .status_listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };

        for listener in listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(endpoint, status))) {
                error!(
                    endpoint,
                    panic = %panic_message(panic.as_ref()),
                    "status listener panicked"
                );
            }
        }
    }
}

fn same_callback(a: &MessageHandler, b: &MessageHandler) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[derive(Debug)]
enum SubscriptionKey {
    Message { message_type: String, id: u64 },
    Status { id: u64 },
}

/// Handle returned by subscribe calls; `unsubscribe` removes exactly that registration.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<RwLock<Registry>>,
    key: SubscriptionKey,
}

impl Subscription {
    pub fn unsubscribe(self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.write().unwrap_or_else(PoisonError::into_inner);
        match self.key {
            SubscriptionKey::Message { message_type, id } => {
                if let Some(entries) = registry.handlers.get_mut(&message_type) {
                    entries.retain(|(entry_id, _)| *entry_id != id);
                    if entries.is_empty() {
                        registry.handlers.remove(&message_type);
                    }
                }
            }
            SubscriptionKey::Status { id } => {
                registry.status_listeners.retain(|(entry_id, _)| *entry_id != id);
            }
        }
    }
}
