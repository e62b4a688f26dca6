//! Subscribers for dispatcher tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use lodgebook_core::persistence::BoxFuture;
use lodgebook_core::{BookingId, Cancellation, DeliveryError, DomainEvent, EventSubscriber};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared log of handled events. Clones share the log.
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<(String, DomainEvent)>>>,
}

impl EventLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, subscriber: &str, event: &DomainEvent) {
        self.events
            .lock()
            .unwrap()
            .push((subscriber.to_string(), event.clone()));
    }

    /// Every `(subscriber, event)` pair, in handling order.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, DomainEvent)> {
        self.events.lock().unwrap().clone()
    }

    /// Events handled by `subscriber`, in handling order.
    #[must_use]
    pub fn events_for(&self, subscriber: &str) -> Vec<DomainEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == subscriber)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Number of times `booking_id` was handled by anyone.
    #[must_use]
    pub fn deliveries_of(&self, booking_id: BookingId) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, event)| event.booking_id() == booking_id)
            .count()
    }

    /// Total entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Whether nothing was handled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Succeeds and records every event.
#[derive(Clone, Debug)]
pub struct RecordingSubscriber {
    name: String,
    log: EventLog,
}

impl RecordingSubscriber {
    /// Record into a fresh log.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_log(name, EventLog::new())
    }

    /// Record into a shared log.
    #[must_use]
    pub fn with_log(name: impl Into<String>, log: EventLog) -> Self {
        Self {
            name: name.into(),
            log,
        }
    }

    /// The log this subscriber writes to.
    #[must_use]
    pub fn log(&self) -> EventLog {
        self.log.clone()
    }

    /// Events this subscriber handled.
    #[must_use]
    pub fn events(&self) -> Vec<DomainEvent> {
        self.log.events_for(&self.name)
    }
}

impl EventSubscriber for RecordingSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle<'a>(
        &'a self,
        event: &'a DomainEvent,
        _cancellation: &'a Cancellation,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        Box::pin(async move {
            self.log.push(&self.name, event);
            Ok(())
        })
    }
}

/// Fails a fixed number of times, then records like [`RecordingSubscriber`].
#[derive(Debug)]
pub struct FlakySubscriber {
    inner: RecordingSubscriber,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakySubscriber {
    /// Fail the first `failures` calls.
    #[must_use]
    pub fn new(name: impl Into<String>, failures: usize) -> Self {
        Self::with_log(name, failures, EventLog::new())
    }

    /// Fail the first `failures` calls, recording successes into `log`.
    #[must_use]
    pub fn with_log(name: impl Into<String>, failures: usize, log: EventLog) -> Self {
        Self {
            inner: RecordingSubscriber::with_log(name, log),
            failures_left: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Never succeed.
    #[must_use]
    pub fn always_failing(name: impl Into<String>) -> Self {
        Self::new(name, usize::MAX)
    }

    /// Calls so far, failed or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Events handled successfully.
    #[must_use]
    pub fn events(&self) -> Vec<DomainEvent> {
        self.inner.events()
    }
}

impl EventSubscriber for FlakySubscriber {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn handle<'a>(
        &'a self,
        event: &'a DomainEvent,
        cancellation: &'a Cancellation,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failed {
                return Err(DeliveryError::failed(format!("{} unavailable", self.inner.name())));
            }
            self.inner.handle(event, cancellation).await
        })
    }
}

/// Takes `delay` per event unless cancelled first.
#[derive(Debug)]
pub struct SlowSubscriber {
    inner: RecordingSubscriber,
    delay: Duration,
}

impl SlowSubscriber {
    /// Sleep `delay` before recording each event.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            inner: RecordingSubscriber::new(name),
            delay,
        }
    }

    /// Events handled to completion.
    #[must_use]
    pub fn events(&self) -> Vec<DomainEvent> {
        self.inner.events()
    }
}

impl EventSubscriber for SlowSubscriber {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn handle<'a>(
        &'a self,
        event: &'a DomainEvent,
        cancellation: &'a Cancellation,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        Box::pin(async move {
            tokio::select! {
                () = tokio::time::sleep(self.delay) => self.inner.handle(event, cancellation).await,
                () = cancellation.cancelled() => Err(DeliveryError::Cancelled),
            }
        })
    }
}
