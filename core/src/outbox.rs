//! Transactional outbox.
//!
//! Domain events are written as [`NewOutboxMessage`] rows in the same commit
//! as the aggregates that raised them. The dispatcher later claims pending
//! rows through an [`OutboxStore`], delivers them, and records one
//! [`DeliveryOutcome`] per message.
//!
//! # Claims
//!
//! [`OutboxStore::claim`] returns a [`ClaimedBatch`]. While the batch is alive
//! its messages are invisible to other claimers. [`ClaimedBatch::record`]
//! applies every outcome in one commit and releases the claim. Dropping the
//! batch without recording releases the claim and changes nothing, so the
//! messages are delivered again on a later claim.
//!
//! # Message states
//!
//! ```text
//! pending (processed_at = NULL, error = NULL)
//!   ├─ delivered ──► processed_at = t, error = NULL     (terminal)
//!   └─ failed    ──► processed_at = NULL, error = text  (still pending, retried)
//! ```

use crate::event::{DomainEvent, EventError};
use crate::persistence::{BoxFuture, PersistenceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outbox row about to be written by a unit of work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOutboxMessage {
    /// Unique message id
    pub id: Uuid,
    /// When the raising commit took place
    pub occurred_at: DateTime<Utc>,
    /// Type discriminator, see [`EventKind::as_str`](crate::event::EventKind::as_str)
    pub event_type: String,
    /// Serialized event
    pub payload: serde_json::Value,
}

impl NewOutboxMessage {
    /// Serialize `event` into a fresh outbox row.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if the payload cannot be built.
    pub fn from_event(event: &DomainEvent, occurred_at: DateTime<Utc>) -> Result<Self, EventError> {
        Ok(Self {
            id: Uuid::new_v4(),
            occurred_at,
            event_type: event.event_type().to_string(),
            payload: event.to_payload()?,
        })
    }
}

/// Stored outbox row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Insertion order assigned by the store, strictly increasing
    pub sequence: i64,
    /// Unique message id
    pub id: Uuid,
    /// When the raising commit took place
    pub occurred_at: DateTime<Utc>,
    /// Type discriminator
    pub event_type: String,
    /// Serialized event
    pub payload: serde_json::Value,
    /// Set once every subscriber succeeded
    pub processed_at: Option<DateTime<Utc>>,
    /// Text of the most recent delivery failure
    pub error: Option<String>,
}

impl OutboxMessage {
    /// Whether the message still needs delivering.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.processed_at.is_none()
    }

    /// Decode the payload back into a domain event.
    ///
    /// # Errors
    ///
    /// See [`DomainEvent::from_payload`].
    pub fn decode(&self) -> Result<DomainEvent, EventError> {
        DomainEvent::from_payload(&self.event_type, &self.payload)
    }
}

/// Result of delivering one claimed message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Every subscriber succeeded.
    Delivered {
        /// Message id
        message_id: Uuid,
        /// Completion time
        processed_at: DateTime<Utc>,
    },
    /// Decoding or a subscriber failed; the message stays pending.
    Failed {
        /// Message id
        message_id: Uuid,
        /// Failure text stored on the row
        error: String,
    },
}

impl DeliveryOutcome {
    /// Id of the message this outcome belongs to.
    #[must_use]
    pub const fn message_id(&self) -> Uuid {
        match self {
            Self::Delivered { message_id, .. } | Self::Failed { message_id, .. } => *message_id,
        }
    }

    /// Whether the message was delivered.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Messages claimed for delivery.
///
/// Dropping the batch without calling [`ClaimedBatch::record`] releases the
/// claim with no state change.
pub trait ClaimedBatch: Send {
    /// Claimed messages, oldest first.
    fn messages(&self) -> &[OutboxMessage];

    /// Apply `outcomes` in one commit and release the claim.
    ///
    /// Returns the number of rows updated. Messages of the batch with no
    /// outcome stay pending untouched.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the commit fails; no outcome is applied.
    fn record(
        self: Box<Self>,
        outcomes: Vec<DeliveryOutcome>,
    ) -> BoxFuture<'static, Result<usize, PersistenceError>>;
}

/// Source of pending outbox messages.
pub trait OutboxStore: Send + Sync {
    /// Claim up to `limit` pending messages in insertion order, skipping
    /// messages held by another claim.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the store fails.
    fn claim(&self, limit: usize) -> BoxFuture<'_, Result<Box<dyn ClaimedBatch>, PersistenceError>>;

    /// Number of messages not yet processed.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the store fails.
    fn pending_count(&self) -> BoxFuture<'_, Result<u64, PersistenceError>>;
}
