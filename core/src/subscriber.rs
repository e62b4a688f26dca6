//! Event subscribers and the registry the dispatcher routes through.
//!
//! Subscribers run *after* the raising commit, once per delivery attempt.
//! Delivery is at-least-once: a subscriber may see the same event again when
//! another subscriber of the same message failed, or when a batch was claimed
//! but never recorded. Handlers must tolerate duplicates.

use crate::event::{DomainEvent, EventKind};
use crate::persistence::BoxFuture;
use crate::shutdown::Cancellation;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A subscriber could not handle an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The handler failed; the text is stored on the outbox row.
    #[error("{0}")]
    Failed(String),

    /// The handler gave up because shutdown was requested.
    #[error("delivery cancelled")]
    Cancelled,
}

impl DeliveryError {
    /// Handler failure with the given reason.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Reacts to published domain events.
///
/// # Dyn Compatibility
///
/// `handle` returns a boxed future so subscribers can be stored as
/// `Arc<dyn EventSubscriber>`.
pub trait EventSubscriber: Send + Sync {
    /// Name used in logs and error text.
    fn name(&self) -> &str;

    /// Handle one event.
    ///
    /// Long-running handlers should watch `cancellation` and return
    /// [`DeliveryError::Cancelled`] when it fires.
    ///
    /// # Errors
    ///
    /// Any [`DeliveryError`] leaves the message pending for retry.
    fn handle<'a>(
        &'a self,
        event: &'a DomainEvent,
        cancellation: &'a Cancellation,
    ) -> BoxFuture<'a, Result<(), DeliveryError>>;
}

/// Subscribers per event kind, in registration order.
///
/// Built once at startup, then shared read-only.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    routes: HashMap<EventKind, Vec<Arc<dyn EventSubscriber>>>,
}

impl SubscriberRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber` for `kind`. Subscribers of a kind run in
    /// registration order.
    #[must_use]
    pub fn subscribe(mut self, kind: EventKind, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.routes.entry(kind).or_default().push(subscriber);
        self
    }

    /// Register `subscriber` for every event kind.
    #[must_use]
    pub fn subscribe_all(mut self, subscriber: &Arc<dyn EventSubscriber>) -> Self {
        for kind in EventKind::ALL {
            self = self.subscribe(kind, Arc::clone(subscriber));
        }
        self
    }

    /// Subscribers registered for `kind`, possibly none.
    #[must_use]
    pub fn subscribers_for(&self, kind: EventKind) -> &[Arc<dyn EventSubscriber>] {
        self.routes.get(&kind).map_or(&[][..], Vec::as_slice)
    }

    /// Total number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in EventKind::ALL {
            let names: Vec<&str> = self.subscribers_for(kind).iter().map(|s| s.name()).collect();
            if !names.is_empty() {
                map.entry(&kind.as_str(), &names);
            }
        }
        map.finish()
    }
}
