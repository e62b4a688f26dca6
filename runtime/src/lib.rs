//! # Lodgebook Runtime
//!
//! Application services on top of `lodgebook-core`.
//!
//! ## Core Components
//!
//! - **Reservation Service**: reserve, confirm, reject, complete and cancel
//!   bookings, each as one atomic unit of work
//! - **Outbox Dispatcher**: periodic job delivering committed outbox messages
//!   to subscribers, at least once and in commit order
//! - **Metrics**: counters and histograms for both
//!
//! ## Example
//!
//! ```ignore
//! use lodgebook_runtime::{DispatcherConfig, OutboxDispatcher, ReservationService, ReserveBooking};
//!
//! let service = ReservationService::new(store.clone(), Arc::new(StandardPricing), clock.clone());
//! let booking_id = service.reserve(ReserveBooking { apartment_id, user_id, period }).await?;
//!
//! let (trigger, shutdown) = shutdown_channel();
//! let dispatcher = Arc::new(OutboxDispatcher::new(outbox, subscribers, clock, DispatcherConfig::from_env()?));
//! let handle = dispatcher.spawn(shutdown);
//! // ...
//! trigger.trigger();
//! handle.await?;
//! ```

/// Dispatcher configuration from the environment
pub mod config;

/// Outbox Dispatcher Job
pub mod dispatcher;

/// Prometheus metrics for observability
pub mod metrics;

/// Booking command service
pub mod reservation;

pub use config::{ConfigError, DispatcherConfig};
pub use dispatcher::{DispatchError, DispatchReport, DispatcherPhase, OutboxDispatcher};
pub use reservation::{CommandError, ReservationService, ReserveBooking};
