//! Cancellation and shutdown signalling
//!
//! The signal is a closable channel that never carries a message: closing it
//! (or dropping the trigger) wakes every waiter at once.

use async_channel::{Receiver, Sender};

/// Create a connected trigger/signal pair
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = async_channel::bounded(1);
    (
        ShutdownTrigger { tx },
        ShutdownSignal {
            rx,
            _keepalive: None,
        },
    )
}

/// Requests shutdown
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Sender<()>,
}

impl ShutdownTrigger {
    /// Signal shutdown to every connected [`ShutdownSignal`]
    pub fn trigger(&self) {
        self.tx.close();
    }
}

/// Observes shutdown requests
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: Receiver<()>,
    _keepalive: Option<Sender<()>>,
}

impl ShutdownSignal {
    /// A signal that is never triggered
    pub fn never() -> Self {
        let (tx, rx) = async_channel::bounded(1);
        Self {
            rx,
            _keepalive: Some(tx),
        }
    }

    /// Whether shutdown has been requested
    pub fn is_triggered(&self) -> bool {
        self.rx.is_closed()
    }

    /// Wait until shutdown is requested
    pub async fn wait(&self) {
        while self.rx.recv().await.is_ok() {}
    }
}
