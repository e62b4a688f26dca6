//! Integration tests for the outbox dispatcher
//!
//! Covers ordering, batching, retry, cancellation and non-reentrancy against
//! the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use chrono::Utc;
use lodgebook_core::outbox::NewOutboxMessage;
use lodgebook_core::persistence::BoxFuture;
use lodgebook_core::{
    BookingId, Cancellation, DeliveryError, DomainEvent, EventKind, EventSubscriber, ShutdownTrigger,
    SubscriberRegistry, shutdown_channel,
};
use lodgebook_runtime::{DispatchError, DispatcherConfig, DispatcherPhase, OutboxDispatcher};
use lodgebook_testing::{EventLog, FlakySubscriber, InMemoryStore, RecordingSubscriber, SlowSubscriber, test_clock};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

fn dispatcher(store: &InMemoryStore, registry: SubscriberRegistry, batch_size: usize) -> OutboxDispatcher {
    OutboxDispatcher::new(
        Arc::new(store.clone()),
        Arc::new(registry),
        Arc::new(test_clock()),
        DispatcherConfig::default().with_batch_size(batch_size),
    )
}

/// Seed `count` reservation events and return them in insertion order.
fn seed(store: &InMemoryStore, count: usize) -> Vec<DomainEvent> {
    (0..count)
        .map(|_| {
            let event = DomainEvent::BookingReserved {
                booking_id: BookingId::new(),
            };
            store.push_outbox_message(NewOutboxMessage::from_event(&event, Utc::now()).unwrap());
            event
        })
        .collect()
}

fn all_kinds(subscriber: Arc<dyn EventSubscriber>) -> SubscriberRegistry {
    SubscriberRegistry::new().subscribe_all(&subscriber)
}

/// Triggers shutdown after handling its first event.
struct ShutdownAfterFirst {
    inner: RecordingSubscriber,
    trigger: ShutdownTrigger,
}

impl EventSubscriber for ShutdownAfterFirst {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn handle<'a>(
        &'a self,
        event: &'a DomainEvent,
        cancellation: &'a Cancellation,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        Box::pin(async move {
            self.inner.handle(event, cancellation).await?;
            self.trigger.trigger();
            Ok(())
        })
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test]
async fn delivers_in_insertion_order_and_marks_processed() {
    let store = InMemoryStore::new();
    let seeded = seed(&store, 3);
    let recorder = Arc::new(RecordingSubscriber::new("audit"));
    let dispatcher = dispatcher(&store, all_kinds(recorder.clone()), 10);

    let report = dispatcher.run_once(&Cancellation::never()).await.unwrap();

    assert_eq!(report.claimed, 3);
    assert_eq!(report.delivered, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(recorder.events(), seeded);
    assert!(store.pending_messages().is_empty());
    assert!(store.outbox_messages().iter().all(|m| m.processed_at.is_some() && m.error.is_none()));
    assert_eq!(dispatcher.phase(), DispatcherPhase::Idle);
}

#[tokio::test]
async fn batch_size_limits_each_tick() {
    let store = InMemoryStore::new();
    let seeded = seed(&store, 5);
    let recorder = Arc::new(RecordingSubscriber::new("audit"));
    let dispatcher = dispatcher(&store, all_kinds(recorder.clone()), 2);

    let report = dispatcher.run_once(&Cancellation::never()).await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(store.pending_messages().len(), 3);

    dispatcher.run_once(&Cancellation::never()).await.unwrap();
    dispatcher.run_once(&Cancellation::never()).await.unwrap();
    let last = dispatcher.run_once(&Cancellation::never()).await.unwrap();

    assert_eq!(last.claimed, 0);
    assert_eq!(recorder.events(), seeded);
}

#[tokio::test]
async fn message_without_subscribers_is_marked_processed() {
    let store = InMemoryStore::new();
    seed(&store, 1);
    let recorder = Arc::new(RecordingSubscriber::new("cancellations"));
    let registry = SubscriberRegistry::new().subscribe(EventKind::BookingCancelled, recorder.clone());
    let dispatcher = dispatcher(&store, registry, 10);

    let report = dispatcher.run_once(&Cancellation::never()).await.unwrap();

    assert_eq!(report.delivered, 1);
    assert!(recorder.events().is_empty());
    assert!(store.pending_messages().is_empty());
}

#[tokio::test]
async fn subscribers_of_a_kind_run_in_registration_order() {
    let store = InMemoryStore::new();
    seed(&store, 1);
    let log = EventLog::new();
    let registry = SubscriberRegistry::new()
        .subscribe(
            EventKind::BookingReserved,
            Arc::new(RecordingSubscriber::with_log("email", log.clone())),
        )
        .subscribe(
            EventKind::BookingReserved,
            Arc::new(RecordingSubscriber::with_log("calendar", log.clone())),
        );

    dispatcher(&store, registry, 10)
        .run_once(&Cancellation::never())
        .await
        .unwrap();

    let names: Vec<_> = log.entries().into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["email", "calendar"]);
}

// ============================================================================
// Failure and retry
// ============================================================================

#[tokio::test]
async fn failing_subscriber_keeps_message_pending_until_it_recovers() {
    let store = InMemoryStore::new();
    let seeded = seed(&store, 1);
    let flaky = Arc::new(FlakySubscriber::new("email", 2));
    let dispatcher = dispatcher(&store, all_kinds(flaky.clone()), 10);

    for _ in 0..2 {
        let report = dispatcher.run_once(&Cancellation::never()).await.unwrap();
        assert_eq!(report.failed, 1);
        let pending = store.pending_messages();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].error.as_deref(), Some("email: email unavailable"));
    }

    let report = dispatcher.run_once(&Cancellation::never()).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(flaky.attempts(), 3);
    assert_eq!(flaky.events(), seeded);
    let message = &store.outbox_messages()[0];
    assert!(message.processed_at.is_some());
    assert!(message.error.is_none());
}

#[tokio::test]
async fn first_failure_stops_the_message_but_not_the_batch() {
    let store = InMemoryStore::new();
    let seeded = seed(&store, 1);
    let later = DomainEvent::BookingConfirmed {
        booking_id: BookingId::new(),
    };
    store.push_outbox_message(NewOutboxMessage::from_event(&later, Utc::now()).unwrap());

    let failing = Arc::new(FlakySubscriber::always_failing("email"));
    let audit = Arc::new(RecordingSubscriber::new("audit"));
    let registry = SubscriberRegistry::new()
        .subscribe(EventKind::BookingReserved, failing.clone())
        .subscribe(EventKind::BookingReserved, audit.clone())
        .subscribe(EventKind::BookingConfirmed, audit.clone());

    let report = dispatcher(&store, registry, 10)
        .run_once(&Cancellation::never())
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(audit.events(), vec![later]);
    let pending = store.pending_messages();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].decode().unwrap(), seeded[0]);
}

#[tokio::test]
async fn failing_messages_filling_a_batch_hold_back_later_ones() {
    let store = InMemoryStore::new();
    let stuck = seed(&store, 1);
    let later = DomainEvent::BookingConfirmed {
        booking_id: BookingId::new(),
    };
    store.push_outbox_message(NewOutboxMessage::from_event(&later, Utc::now()).unwrap());

    let failing = Arc::new(FlakySubscriber::always_failing("email"));
    let audit = Arc::new(RecordingSubscriber::new("audit"));
    let registry = || {
        SubscriberRegistry::new()
            .subscribe(EventKind::BookingReserved, failing.clone())
            .subscribe(EventKind::BookingConfirmed, audit.clone())
    };

    // Strict insertion order: the oldest pending message is always claimed
    // first, so a batch made only of failing messages never reaches newer ones.
    let narrow = dispatcher(&store, registry(), 1);
    for _ in 0..5 {
        let report = narrow.run_once(&Cancellation::never()).await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.failed, 1);
    }
    assert!(audit.events().is_empty());
    assert_eq!(store.pending_messages().len(), 2);
    assert_eq!(failing.attempts(), 5);

    // Once the batch has room past the failing message, the later one goes out
    // and the failing one keeps being retried.
    let report = dispatcher(&store, registry(), 2)
        .run_once(&Cancellation::never())
        .await
        .unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(audit.events(), vec![later]);
    let pending = store.pending_messages();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].decode().unwrap(), stuck[0]);
    assert!(pending[0].error.is_some());
}

#[tokio::test]
async fn earlier_subscribers_see_retried_messages_again() {
    let store = InMemoryStore::new();
    let seeded = seed(&store, 1);
    let audit = Arc::new(RecordingSubscriber::new("audit"));
    let flaky = Arc::new(FlakySubscriber::new("email", 1));
    let registry = SubscriberRegistry::new()
        .subscribe(EventKind::BookingReserved, audit.clone())
        .subscribe(EventKind::BookingReserved, flaky.clone());
    let dispatcher = dispatcher(&store, registry, 10);

    dispatcher.run_once(&Cancellation::never()).await.unwrap();
    dispatcher.run_once(&Cancellation::never()).await.unwrap();

    assert_eq!(audit.events(), vec![seeded[0].clone(), seeded[0].clone()]);
    assert_eq!(flaky.events(), seeded);
    assert!(store.pending_messages().is_empty());
}

#[tokio::test]
async fn undecodable_message_is_recorded_as_failed() {
    let store = InMemoryStore::new();
    store.push_outbox_message(NewOutboxMessage {
        id: uuid::Uuid::new_v4(),
        occurred_at: Utc::now(),
        event_type: "BookingTeleported.v1".to_string(),
        payload: serde_json::json!({}),
    });
    let seeded = seed(&store, 1);
    let recorder = Arc::new(RecordingSubscriber::new("audit"));

    let report = dispatcher(&store, all_kinds(recorder.clone()), 10)
        .run_once(&Cancellation::never())
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(recorder.events(), seeded);
    let pending = store.pending_messages();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].error.as_deref().unwrap().contains("Unknown event type"));
}

#[tokio::test]
async fn failed_record_leaves_messages_pending_for_redelivery() {
    let store = InMemoryStore::new();
    seed(&store, 2);
    let recorder = Arc::new(RecordingSubscriber::new("audit"));
    let dispatcher = dispatcher(&store, all_kinds(recorder.clone()), 10);
    store.fail_next_record();

    let err = dispatcher.run_once(&Cancellation::never()).await.unwrap_err();

    assert!(matches!(err, DispatchError::Persistence(_)));
    assert_eq!(store.pending_messages().len(), 2);
    assert_eq!(store.claimed_count(), 0);
    assert_eq!(dispatcher.phase(), DispatcherPhase::Idle);

    dispatcher.run_once(&Cancellation::never()).await.unwrap();
    assert_eq!(recorder.events().len(), 4);
    assert!(store.pending_messages().is_empty());
}

#[tokio::test]
async fn failed_claim_is_reported() {
    let store = InMemoryStore::new();
    seed(&store, 1);
    store.fail_next_claims(1);
    let dispatcher = dispatcher(&store, SubscriberRegistry::new(), 10);

    let err = dispatcher.run_once(&Cancellation::never()).await.unwrap_err();

    assert!(matches!(err, DispatchError::Persistence(_)));
    assert_eq!(store.pending_messages().len(), 1);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn cancelled_before_tick_claims_nothing() {
    let store = InMemoryStore::new();
    seed(&store, 2);
    let recorder = Arc::new(RecordingSubscriber::new("audit"));
    let (trigger, cancellation) = shutdown_channel();
    trigger.trigger();

    let report = dispatcher(&store, all_kinds(recorder.clone()), 10)
        .run_once(&cancellation)
        .await
        .unwrap();

    assert_eq!(report.claimed, 0);
    assert!(recorder.events().is_empty());
    assert_eq!(store.pending_messages().len(), 2);
}

#[tokio::test]
async fn cancellation_mid_batch_records_what_was_delivered() {
    let store = InMemoryStore::new();
    let seeded = seed(&store, 3);
    let (trigger, cancellation) = shutdown_channel();
    let subscriber = Arc::new(ShutdownAfterFirst {
        inner: RecordingSubscriber::new("audit"),
        trigger,
    });

    let report = dispatcher(&store, all_kinds(subscriber.clone()), 10)
        .run_once(&cancellation)
        .await
        .unwrap();

    assert_eq!(report.claimed, 3);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(subscriber.inner.events(), vec![seeded[0].clone()]);
    let pending: Vec<_> = store
        .pending_messages()
        .iter()
        .map(|m| m.decode().unwrap())
        .collect();
    assert_eq!(pending, seeded[1..].to_vec());
    assert_eq!(store.claimed_count(), 0);
}

#[tokio::test]
async fn subscriber_abandoning_for_shutdown_leaves_message_untouched() {
    let store = InMemoryStore::new();
    seed(&store, 1);
    let slow = Arc::new(SlowSubscriber::new("slow", Duration::from_secs(60)));
    let dispatcher = Arc::new(dispatcher(&store, all_kinds(slow.clone()), 10));
    let (trigger, cancellation) = shutdown_channel();

    let task = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.run_once(&cancellation).await })
    };
    wait_for(|| dispatcher.phase() == DispatcherPhase::Delivering).await;
    trigger.trigger();
    let report = task.await.unwrap().unwrap();

    assert_eq!(report.skipped, 1);
    let pending = store.pending_messages();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].error.is_none());
    assert!(slow.events().is_empty());
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn overlapping_tick_is_refused() {
    let store = InMemoryStore::new();
    seed(&store, 1);
    let slow = Arc::new(SlowSubscriber::new("slow", Duration::from_millis(200)));
    let dispatcher = Arc::new(dispatcher(&store, all_kinds(slow.clone()), 10));

    let first = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.run_once(&Cancellation::never()).await })
    };
    wait_for(|| dispatcher.phase() == DispatcherPhase::Delivering).await;

    let second = dispatcher.run_once(&Cancellation::never()).await;
    assert_eq!(second, Err(DispatchError::AlreadyRunning));
    assert_eq!(store.claimed_count(), 1);

    let report = first.await.unwrap().unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(slow.events().len(), 1);
    assert_eq!(dispatcher.phase(), DispatcherPhase::Idle);
}

#[tokio::test]
async fn parallel_dispatchers_never_deliver_a_message_twice() {
    let store = InMemoryStore::new();
    let seeded = seed(&store, 6);
    let slow = Arc::new(SlowSubscriber::new("slow", Duration::from_millis(5)));
    let first = dispatcher(&store, all_kinds(slow.clone()), 2);
    let second = dispatcher(&store, all_kinds(slow.clone()), 2);

    while !store.pending_messages().is_empty() {
        let never_a = Cancellation::never();
        let never_b = Cancellation::never();
        let (a, b) = tokio::join!(first.run_once(&never_a), second.run_once(&never_b),);
        a.unwrap();
        b.unwrap();
    }

    let delivered = slow.events();
    assert_eq!(delivered.len(), 6);
    let unique: HashSet<_> = delivered.iter().map(DomainEvent::booking_id).collect();
    assert_eq!(unique.len(), 6);
    let expected: HashSet<_> = seeded.iter().map(DomainEvent::booking_id).collect();
    assert_eq!(unique, expected);
}

// ============================================================================
// Background loop
// ============================================================================

#[tokio::test]
async fn spawned_loop_drains_outbox_and_stops_on_shutdown() {
    lodgebook_testing::init_test_tracing();
    let store = InMemoryStore::new();
    let seeded = seed(&store, 3);
    let recorder = Arc::new(RecordingSubscriber::new("audit"));
    let dispatcher = Arc::new(OutboxDispatcher::new(
        Arc::new(store.clone()),
        Arc::new(all_kinds(recorder.clone())),
        Arc::new(test_clock()),
        DispatcherConfig::default()
            .with_batch_size(1)
            .with_poll_interval(Duration::from_millis(10)),
    ));
    let (trigger, shutdown) = shutdown_channel();

    let handle = Arc::clone(&dispatcher).spawn(shutdown);
    wait_for(|| store.pending_messages().is_empty()).await;
    trigger.trigger();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("dispatcher did not stop")
        .unwrap();
    assert_eq!(recorder.events(), seeded);

    // Nothing runs after shutdown
    seed(&store, 1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.pending_messages().len(), 1);
}
