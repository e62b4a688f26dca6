//! Cooperative cancellation.
//!
//! A [`ShutdownTrigger`] flips a shared flag once; every [`Cancellation`]
//! cloned from the same channel observes it, either by polling
//! [`Cancellation::is_cancelled`] or by awaiting [`Cancellation::cancelled`]
//! inside a `tokio::select!`.

use tokio::sync::watch;

/// Create a linked trigger / cancellation pair.
#[must_use]
pub fn shutdown_channel() -> (ShutdownTrigger, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Cancellation { rx })
}

/// Sending half. Triggering is idempotent.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Signal every linked [`Cancellation`].
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Another cancellation linked to this trigger.
    #[must_use]
    pub fn subscribe(&self) -> Cancellation {
        Cancellation {
            rx: self.tx.subscribe(),
        }
    }

    /// Whether [`ShutdownTrigger::trigger`] has been called.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiving half, cheap to clone.
#[derive(Clone, Debug)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    /// A cancellation that never fires.
    #[must_use]
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    /// Whether shutdown was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested.
    ///
    /// If the trigger is dropped without firing, this never resolves.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
