//! Cooperative shutdown signalling.
//!
//! The daemon owns a single [`ShutdownController`]; the router and every
//! worker receive a cloned [`ShutdownToken`] at spawn. Tripping the
//! controller (explicitly or by dropping it) wakes every token at once.
//!
//! Built on channel disconnect semantics: the controller holds the only
//! sender of a channel that never carries a message, so closing it is
//! observed by all receivers simultaneously.

use flume::{Receiver, Sender};

/// Owning side of the shutdown signal.
pub struct ShutdownController {
    tx: Sender<()>,
}

/// Observing side of the shutdown signal. Cheap to clone.
#[derive(Clone)]
pub struct ShutdownToken {
    rx: Receiver<()>,
}

/// Create a connected controller/token pair.
#[must_use]
pub fn channel() -> (ShutdownController, ShutdownToken) {
    let (tx, rx) = flume::unbounded();
    (ShutdownController { tx }, ShutdownToken { rx })
}

impl ShutdownController {
    /// Trip the signal, waking every token.
    pub fn shutdown(self) {
        drop(self.tx);
    }
}

impl ShutdownToken {
    /// Whether the signal has been tripped.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.rx.is_disconnected()
    }

    /// Wait until the signal is tripped.
    pub async fn wait(&self) {
        // The sender never transmits, so this resolves only on disconnect.
        let _ = self.rx.recv_async().await;
    }
}
