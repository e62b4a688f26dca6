//! Domain events and the per-aggregate event buffer.
//!
//! Domain events are immutable facts raised by aggregate operations. They live
//! in the raising aggregate's [`EventBuffer`] until the
//! [`UnitOfWork`](crate::unit_of_work::UnitOfWork) drains them into outbox
//! messages; they are never persisted on their own.
//!
//! # Closed set of events
//!
//! [`DomainEvent`] is a closed enum. Subscribers are looked up by its
//! payload-free discriminant [`EventKind`], whose string form is the type
//! discriminator stored next to every outbox payload.
//!
//! # Event Naming Convention
//!
//! Type names carry a version suffix (`"BookingReserved.v1"`) so the payload
//! schema can evolve without breaking messages that are still pending.

use crate::booking::BookingId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error types for event operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to serialize an event into an outbox payload.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize an outbox payload.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// Unknown event type encountered during deserialization.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// The stored type discriminator disagrees with the payload.
    #[error("Event type mismatch: message says {declared}, payload holds {actual}")]
    TypeMismatch {
        /// Discriminator stored with the message
        declared: String,
        /// Discriminator found in the payload
        actual: &'static str,
    },
}

/// Every event the booking domain can raise.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    /// A booking was reserved
    #[serde(rename = "BookingReserved.v1")]
    BookingReserved {
        /// Booking identity
        booking_id: BookingId,
    },
    /// A reserved booking was confirmed
    #[serde(rename = "BookingConfirmed.v1")]
    BookingConfirmed {
        /// Booking identity
        booking_id: BookingId,
    },
    /// A reserved booking was rejected
    #[serde(rename = "BookingRejected.v1")]
    BookingRejected {
        /// Booking identity
        booking_id: BookingId,
    },
    /// A confirmed booking was completed
    #[serde(rename = "BookingCompleted.v1")]
    BookingCompleted {
        /// Booking identity
        booking_id: BookingId,
    },
    /// A confirmed booking was cancelled
    #[serde(rename = "BookingCancelled.v1")]
    BookingCancelled {
        /// Booking identity
        booking_id: BookingId,
    },
}

impl DomainEvent {
    /// Discriminant of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::BookingReserved { .. } => EventKind::BookingReserved,
            Self::BookingConfirmed { .. } => EventKind::BookingConfirmed,
            Self::BookingRejected { .. } => EventKind::BookingRejected,
            Self::BookingCompleted { .. } => EventKind::BookingCompleted,
            Self::BookingCancelled { .. } => EventKind::BookingCancelled,
        }
    }

    /// Type discriminator stored with the outbox message.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Booking the event is about.
    #[must_use]
    pub const fn booking_id(&self) -> BookingId {
        match self {
            Self::BookingReserved { booking_id }
            | Self::BookingConfirmed { booking_id }
            | Self::BookingRejected { booking_id }
            | Self::BookingCompleted { booking_id }
            | Self::BookingCancelled { booking_id } => *booking_id,
        }
    }

    /// Serialize into an outbox payload.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if serialization fails.
    pub fn to_payload(&self) -> Result<serde_json::Value, EventError> {
        serde_json::to_value(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Rebuild an event from an outbox message's discriminator and payload.
    ///
    /// # Errors
    ///
    /// - [`EventError::UnknownEventType`] if `event_type` is not a known kind
    /// - [`EventError::DeserializationError`] if the payload does not parse
    /// - [`EventError::TypeMismatch`] if the payload holds a different kind
    pub fn from_payload(event_type: &str, payload: &serde_json::Value) -> Result<Self, EventError> {
        let declared = EventKind::parse(event_type)?;
        let event: Self = serde_json::from_value(payload.clone())
            .map_err(|e| EventError::DeserializationError(e.to_string()))?;

        if event.kind() != declared {
            return Err(EventError::TypeMismatch {
                declared: event_type.to_string(),
                actual: event.event_type(),
            });
        }
        Ok(event)
    }
}

/// Payload-free discriminant of [`DomainEvent`], used to route to subscribers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// See [`DomainEvent::BookingReserved`]
    BookingReserved,
    /// See [`DomainEvent::BookingConfirmed`]
    BookingConfirmed,
    /// See [`DomainEvent::BookingRejected`]
    BookingRejected,
    /// See [`DomainEvent::BookingCompleted`]
    BookingCompleted,
    /// See [`DomainEvent::BookingCancelled`]
    BookingCancelled,
}

impl EventKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::BookingReserved,
        Self::BookingConfirmed,
        Self::BookingRejected,
        Self::BookingCompleted,
        Self::BookingCancelled,
    ];

    /// Stable type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BookingReserved => "BookingReserved.v1",
            Self::BookingConfirmed => "BookingConfirmed.v1",
            Self::BookingRejected => "BookingRejected.v1",
            Self::BookingCompleted => "BookingCompleted.v1",
            Self::BookingCancelled => "BookingCancelled.v1",
        }
    }

    /// Parse a stored type name.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnknownEventType`] for names outside the closed set.
    pub fn parse(s: &str) -> Result<Self, EventError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EventError::UnknownEventType(s.to_string()))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events raised by one aggregate and not yet harvested.
///
/// Append-only until drained. [`EventBuffer::drain`] returns the events in
/// raise order and leaves the buffer empty in the same step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventBuffer<E> {
    events: Vec<E>,
}

impl<E> EventBuffer<E> {
    /// Create an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Append an event. No deduplication.
    pub fn raise(&mut self, event: E) {
        self.events.push(event);
    }

    /// Take every buffered event, oldest first, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<E> {
        std::mem::take(&mut self.events)
    }

    /// Events raised so far, oldest first.
    #[must_use]
    pub fn pending(&self) -> &[E] {
        &self.events
    }

    /// Number of buffered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl<E> Default for EventBuffer<E> {
    fn default() -> Self {
        Self::new()
    }
}
