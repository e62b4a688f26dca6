//! Outbox Dispatcher Job.
//!
//! Periodically claims pending outbox messages and delivers each one to the
//! subscribers registered for its event kind.
//!
//! # Tick
//!
//! ```text
//! Idle ─► Claiming ─► Delivering ─► Recording ─► Idle
//! ```
//!
//! - **Claiming**: take up to `batch_size` pending messages, oldest first
//! - **Delivering**: for each message in order, decode it and run its
//!   subscribers one after another; the first failure stops that message
//! - **Recording**: write every outcome in one commit
//!
//! # Guarantees
//!
//! - **At-least-once**: a message is marked processed only after every
//!   subscriber succeeded. Failed messages keep their error text and are
//!   retried on every later tick, without limit.
//! - **Strict FIFO**: every tick claims the oldest pending messages, failed
//!   or not. A failing message does not stop the rest of its batch, but if
//!   `batch_size` messages at the head of the table keep failing, every tick
//!   claims those same messages and newer ones wait behind them
//!   (head-of-line blocking). There is no attempt cap or dead letter table
//!   to move them aside.
//! - **Non-reentrant**: a tick that starts while another is running returns
//!   [`DispatchError::AlreadyRunning`] without touching the store.
//! - **Cancellation**: checked before each message. Messages not yet
//!   attempted stay pending; outcomes already produced are still recorded.

use crate::config::DispatcherConfig;
use crate::metrics::DispatchMetrics;
use lodgebook_core::environment::Clock;
use lodgebook_core::outbox::{DeliveryOutcome, OutboxMessage, OutboxStore};
use lodgebook_core::persistence::PersistenceError;
use lodgebook_core::{Cancellation, DeliveryError, SubscriberRegistry};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Why a tick did not run to completion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Another tick is in progress.
    #[error("Outbox dispatcher is already running")]
    AlreadyRunning,

    /// Claiming or recording failed; nothing was recorded.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Where the dispatcher is within a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatcherPhase {
    /// Between ticks
    Idle = 0,
    /// Waiting for the store to hand out a batch
    Claiming = 1,
    /// Running subscribers
    Delivering = 2,
    /// Writing outcomes
    Recording = 3,
}

impl DispatcherPhase {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Claiming,
            2 => Self::Delivering,
            3 => Self::Recording,
            _ => Self::Idle,
        }
    }
}

/// Summary of one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Messages claimed
    pub claimed: usize,
    /// Messages every subscriber accepted
    pub delivered: usize,
    /// Messages whose decoding or a subscriber failed
    pub failed: usize,
    /// Claimed messages left untouched because of cancellation
    pub skipped: usize,
}

/// Delivers committed outbox messages to subscribers.
pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    subscribers: Arc<SubscriberRegistry>,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
    running: Mutex<()>,
    phase: AtomicU8,
}

impl OutboxDispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        store: Arc<dyn OutboxStore>,
        subscribers: Arc<SubscriberRegistry>,
        clock: Arc<dyn Clock>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            subscribers,
            clock,
            config,
            running: Mutex::new(()),
            phase: AtomicU8::new(DispatcherPhase::Idle as u8),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> DispatcherPhase {
        DispatcherPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Settings in use.
    #[must_use]
    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Run one tick.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::AlreadyRunning`] if another tick is in progress
    /// - [`DispatchError::Persistence`] if claiming or recording fails
    pub async fn run_once(&self, cancellation: &Cancellation) -> Result<DispatchReport, DispatchError> {
        let Ok(_running) = self.running.try_lock() else {
            debug!("Outbox dispatch skipped: previous tick still running");
            return Err(DispatchError::AlreadyRunning);
        };
        let _phase = PhaseGuard(&self.phase);
        let started = Instant::now();
        let result = self.tick(cancellation).await;
        DispatchMetrics::record_duration(started.elapsed());
        if result.is_err() {
            DispatchMetrics::record_error();
        }
        result
    }

    async fn tick(&self, cancellation: &Cancellation) -> Result<DispatchReport, DispatchError> {
        let mut report = DispatchReport::default();
        if cancellation.is_cancelled() {
            return Ok(report);
        }

        self.set_phase(DispatcherPhase::Claiming);
        let batch = self
            .store
            .claim(self.config.batch_size())
            .await
            .inspect_err(|e| error!(error = %e, "Failed to claim outbox messages"))?;
        let messages: Vec<OutboxMessage> = batch.messages().to_vec();
        report.claimed = messages.len();
        if messages.is_empty() {
            return Ok(report);
        }
        DispatchMetrics::record_claimed(messages.len());

        self.set_phase(DispatcherPhase::Delivering);
        let mut outcomes = Vec::with_capacity(messages.len());
        for message in &messages {
            if cancellation.is_cancelled() {
                info!(sequence = message.sequence, "Shutdown requested, leaving remaining messages pending");
                break;
            }
            match self.deliver(message, cancellation).await {
                Some(outcome) => outcomes.push(outcome),
                None => break,
            }
        }
        report.delivered = outcomes.iter().filter(|o| o.is_delivered()).count();
        report.failed = outcomes.len() - report.delivered;
        report.skipped = messages.len() - outcomes.len();

        self.set_phase(DispatcherPhase::Recording);
        if outcomes.is_empty() {
            return Ok(report);
        }
        batch
            .record(outcomes)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to record delivery outcomes"))?;
        DispatchMetrics::record_outcomes(report.delivered, report.failed);
        Ok(report)
    }

    /// Deliver one message. `None` means delivery was abandoned for shutdown
    /// and the message must stay untouched.
    async fn deliver(&self, message: &OutboxMessage, cancellation: &Cancellation) -> Option<DeliveryOutcome> {
        let event = match message.decode() {
            Ok(event) => event,
            Err(err) => {
                warn!(
                    message_id = %message.id,
                    event_type = %message.event_type,
                    error = %err,
                    "Outbox message could not be decoded"
                );
                return Some(DeliveryOutcome::Failed {
                    message_id: message.id,
                    error: err.to_string(),
                });
            }
        };

        for subscriber in self.subscribers.subscribers_for(event.kind()) {
            match subscriber.handle(&event, cancellation).await {
                Ok(()) => {}
                Err(DeliveryError::Cancelled) => {
                    info!(
                        message_id = %message.id,
                        subscriber = subscriber.name(),
                        "Delivery abandoned for shutdown"
                    );
                    return None;
                }
                Err(err) => {
                    warn!(
                        message_id = %message.id,
                        sequence = message.sequence,
                        event_type = %message.event_type,
                        subscriber = subscriber.name(),
                        error = %err,
                        "Subscriber failed, message stays pending"
                    );
                    return Some(DeliveryOutcome::Failed {
                        message_id: message.id,
                        error: format!("{}: {err}", subscriber.name()),
                    });
                }
            }
        }

        debug!(message_id = %message.id, event_type = %message.event_type, "Outbox message delivered");
        Some(DeliveryOutcome::Delivered {
            message_id: message.id,
            processed_at: self.clock.now(),
        })
    }

    fn set_phase(&self, phase: DispatcherPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    /// Run ticks every `poll_interval` until `shutdown` fires.
    ///
    /// Missed ticks are skipped, never bunched. A tick in progress when
    /// shutdown fires stops before its next message and records what it did.
    #[must_use]
    pub fn spawn(self: Arc<Self>, shutdown: Cancellation) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    async fn run(&self, shutdown: Cancellation) {
        info!(
            batch_size = self.config.batch_size(),
            poll_interval_ms = u64::try_from(self.config.poll_interval().as_millis()).unwrap_or(u64::MAX),
            "Outbox dispatcher started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Outbox dispatcher received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_once(&shutdown).await {
                        Ok(report) if report.claimed == 0 => debug!("No pending outbox messages"),
                        Ok(report) => info!(
                            claimed = report.claimed,
                            delivered = report.delivered,
                            failed = report.failed,
                            skipped = report.skipped,
                            "Outbox dispatch tick finished"
                        ),
                        Err(DispatchError::AlreadyRunning) => debug!("Outbox dispatch tick overlapped, skipped"),
                        Err(err) => error!(error = %err, "Outbox dispatch tick failed"),
                    }
                }
            }
        }

        info!("Outbox dispatcher stopped");
    }
}

/// Resets the phase to idle when a tick ends, however it ends.
struct PhaseGuard<'a>(&'a AtomicU8);

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.0.store(DispatcherPhase::Idle as u8, Ordering::SeqCst);
    }
}
