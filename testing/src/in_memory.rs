//! In-memory persistence for fast, deterministic tests.
//!
//! [`InMemoryStore`] implements both [`BookingStore`] and [`OutboxStore`] over
//! one shared state, so a test can reserve through the service and then drive
//! the dispatcher against the very rows the commit wrote.
//!
//! Commits are staged on a copy of the state and swapped in only when every
//! check passes, which gives the same all-or-nothing visibility as a database
//! transaction. Faults can be injected to exercise the failure paths.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use chrono::{DateTime, Utc};
use lodgebook_core::outbox::{ClaimedBatch, DeliveryOutcome, NewOutboxMessage, OutboxMessage, OutboxStore};
use lodgebook_core::persistence::{BookingStore, BoxFuture, CommitError, PersistenceError};
use lodgebook_core::unit_of_work::ChangeSet;
use lodgebook_core::{Apartment, ApartmentId, Booking, BookingId, DateRange, Version};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
struct State {
    apartments: HashMap<ApartmentId, Apartment>,
    bookings: HashMap<BookingId, Booking>,
    outbox: Vec<OutboxMessage>,
    next_sequence: i64,
    claimed: HashSet<Uuid>,
}

impl State {
    fn apply(&mut self, changes: ChangeSet) -> Result<usize, CommitError> {
        let rows = changes.row_count();

        for mut apartment in changes.apartments {
            let stored = self.apartments.get(&apartment.id).map(|a| a.version);
            if stored.is_some_and(|v| v != apartment.version)
                || (stored.is_none() && !apartment.version.is_initial())
            {
                return Err(CommitError::apartment_conflict(&apartment));
            }
            apartment.version = apartment.version.next();
            self.apartments.insert(apartment.id, apartment);
        }

        for mut booking in changes.bookings {
            let stored = self.bookings.get(&booking.id).map(|b| b.version);
            if stored.is_some_and(|v| v != booking.version)
                || (stored.is_none() && !booking.version.is_initial())
            {
                return Err(CommitError::booking_conflict(&booking));
            }
            booking.version = booking.version.next();
            self.bookings.insert(booking.id, booking);
        }

        for message in changes.outbox {
            self.append_outbox(message)?;
        }

        Ok(rows)
    }

    fn append_outbox(&mut self, message: NewOutboxMessage) -> Result<(), PersistenceError> {
        if self.outbox.iter().any(|m| m.id == message.id) {
            return Err(PersistenceError::Database(format!(
                "duplicate outbox message id {}",
                message.id
            )));
        }
        self.next_sequence += 1;
        self.outbox.push(OutboxMessage {
            sequence: self.next_sequence,
            id: message.id,
            occurred_at: message.occurred_at,
            event_type: message.event_type,
            payload: message.payload,
            processed_at: None,
            error: None,
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Faults {
    fail_commits_after_aggregates: usize,
    fail_claims: usize,
    fail_records: usize,
    commit_latency: Option<Duration>,
}

/// Shared-state store for tests. Cloning shares the state.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    faults: Arc<Mutex<Faults>>,
    commits: Arc<Mutex<usize>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a new apartment and return it as stored (version 1).
    #[must_use]
    pub fn insert_apartment(&self, mut apartment: Apartment) -> Apartment {
        apartment.version = Version::INITIAL.next();
        self.state
            .lock()
            .unwrap()
            .apartments
            .insert(apartment.id, apartment.clone());
        apartment
    }

    /// Append a raw outbox row, bypassing the unit of work.
    pub fn push_outbox_message(&self, message: NewOutboxMessage) {
        self.state.lock().unwrap().append_outbox(message).unwrap();
    }

    /// Delay every commit by `latency` before it takes the lock, so concurrent
    /// commands interleave between load and commit.
    pub fn set_commit_latency(&self, latency: Duration) {
        self.faults.lock().unwrap().commit_latency = Some(latency);
    }

    /// Fail the next commit after the aggregates were staged but before the
    /// outbox rows were written.
    pub fn fail_next_commit(&self) {
        self.faults.lock().unwrap().fail_commits_after_aggregates += 1;
    }

    /// Fail the next `count` claims.
    pub fn fail_next_claims(&self, count: usize) {
        self.faults.lock().unwrap().fail_claims += count;
    }

    /// Fail the next batch record.
    pub fn fail_next_record(&self) {
        self.faults.lock().unwrap().fail_records += 1;
    }

    /// Stored apartment.
    #[must_use]
    pub fn apartment(&self, id: ApartmentId) -> Option<Apartment> {
        self.state.lock().unwrap().apartments.get(&id).cloned()
    }

    /// Stored booking.
    #[must_use]
    pub fn booking(&self, id: BookingId) -> Option<Booking> {
        self.state.lock().unwrap().bookings.get(&id).cloned()
    }

    /// Every stored booking.
    #[must_use]
    pub fn bookings(&self) -> Vec<Booking> {
        self.state.lock().unwrap().bookings.values().cloned().collect()
    }

    /// Every outbox row, in insertion order.
    #[must_use]
    pub fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.state.lock().unwrap().outbox.clone()
    }

    /// Outbox rows not yet processed, in insertion order.
    #[must_use]
    pub fn pending_messages(&self) -> Vec<OutboxMessage> {
        self.state
            .lock()
            .unwrap()
            .outbox
            .iter()
            .filter(|m| m.is_pending())
            .cloned()
            .collect()
    }

    /// Number of messages currently held by a live claim.
    #[must_use]
    pub fn claimed_count(&self) -> usize {
        self.state.lock().unwrap().claimed.len()
    }

    /// Number of successful commits.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        *self.commits.lock().unwrap()
    }

    fn take_fault(&self, pick: impl FnOnce(&mut Faults) -> &mut usize) -> bool {
        let mut faults = self.faults.lock().unwrap();
        let counter = pick(&mut faults);
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }
}

impl BookingStore for InMemoryStore {
    fn load_apartment(
        &self,
        id: ApartmentId,
    ) -> BoxFuture<'_, Result<Option<Apartment>, PersistenceError>> {
        Box::pin(async move { Ok(self.apartment(id)) })
    }

    fn load_booking(
        &self,
        id: BookingId,
    ) -> BoxFuture<'_, Result<Option<Booking>, PersistenceError>> {
        Box::pin(async move { Ok(self.booking(id)) })
    }

    fn overlapping_bookings(
        &self,
        apartment_id: ApartmentId,
        period: DateRange,
    ) -> BoxFuture<'_, Result<Vec<Booking>, PersistenceError>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            Ok(state
                .bookings
                .values()
                .filter(|b| {
                    b.apartment_id == apartment_id && b.status.is_active() && b.period.overlaps(&period)
                })
                .cloned()
                .collect())
        })
    }

    fn commit(&self, changes: ChangeSet) -> BoxFuture<'_, Result<usize, CommitError>> {
        Box::pin(async move {
            let latency = self.faults.lock().unwrap().commit_latency;
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            let inject_failure = self.take_fault(|f| &mut f.fail_commits_after_aggregates);

            let mut state = self.state.lock().unwrap();
            let mut staged = state.clone();
            let ChangeSet {
                apartments,
                bookings,
                outbox,
            } = changes;
            let mut rows = staged.apply(ChangeSet {
                apartments,
                bookings,
                outbox: Vec::new(),
            })?;

            if inject_failure {
                return Err(PersistenceError::Database("injected commit failure".to_string()).into());
            }
            for message in outbox {
                staged.append_outbox(message)?;
                rows += 1;
            }

            *state = staged;
            *self.commits.lock().unwrap() += 1;
            Ok(rows)
        })
    }
}

impl OutboxStore for InMemoryStore {
    fn claim(&self, limit: usize) -> BoxFuture<'_, Result<Box<dyn ClaimedBatch>, PersistenceError>> {
        Box::pin(async move {
            if self.take_fault(|f| &mut f.fail_claims) {
                return Err(PersistenceError::Database("injected claim failure".to_string()));
            }

            let mut state = self.state.lock().unwrap();
            let messages: Vec<OutboxMessage> = state
                .outbox
                .iter()
                .filter(|m| m.is_pending() && !state.claimed.contains(&m.id))
                .take(limit)
                .cloned()
                .collect();
            state.claimed.extend(messages.iter().map(|m| m.id));

            let fail_record = self.take_fault(|f| &mut f.fail_records);
            Ok(Box::new(InMemoryBatch {
                messages,
                state: Arc::clone(&self.state),
                fail_record,
            }) as Box<dyn ClaimedBatch>)
        })
    }

    fn pending_count(&self) -> BoxFuture<'_, Result<u64, PersistenceError>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            Ok(state.outbox.iter().filter(|m| m.is_pending()).count() as u64)
        })
    }
}

/// Claim over in-memory rows. Released on drop.
struct InMemoryBatch {
    messages: Vec<OutboxMessage>,
    state: Arc<Mutex<State>>,
    fail_record: bool,
}

impl ClaimedBatch for InMemoryBatch {
    fn messages(&self) -> &[OutboxMessage] {
        &self.messages
    }

    fn record(
        self: Box<Self>,
        outcomes: Vec<DeliveryOutcome>,
    ) -> BoxFuture<'static, Result<usize, PersistenceError>> {
        Box::pin(async move {
            if self.fail_record {
                return Err(PersistenceError::Database("injected record failure".to_string()));
            }

            let owned: HashSet<Uuid> = self.messages.iter().map(|m| m.id).collect();
            let mut state = self.state.lock().unwrap();
            let mut updated = 0;
            for outcome in outcomes {
                if !owned.contains(&outcome.message_id()) {
                    continue;
                }
                let Some(row) = state.outbox.iter_mut().find(|m| m.id == outcome.message_id()) else {
                    continue;
                };
                match outcome {
                    DeliveryOutcome::Delivered { processed_at, .. } => mark_processed(row, processed_at),
                    DeliveryOutcome::Failed { error, .. } => row.error = Some(error),
                }
                updated += 1;
            }
            Ok(updated)
        })
    }
}

fn mark_processed(row: &mut OutboxMessage, at: DateTime<Utc>) {
    row.processed_at = Some(at);
    row.error = None;
}

impl Drop for InMemoryBatch {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            for message in &self.messages {
                state.claimed.remove(&message.id);
            }
        }
    }
}
