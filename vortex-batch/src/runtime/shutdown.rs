//! Graceful shutdown handling
//!
//! Level-triggered shutdown signalling shared by every pipeline worker.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Shutdown signal shared across all stages of a running pipeline
///
/// Once raised it stays raised, so workers that start waiting after the
/// signal still observe it.
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Create a new shutdown signal
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Trigger shutdown
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }

    /// Check whether shutdown has been triggered
    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolve once shutdown has been triggered
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // Err means every sender is gone, which only happens at teardown
        let _ = receiver.wait_for(|&stopped| stopped).await;
    }

    /// Await `future` unless shutdown wins the race first.
    pub async fn guard<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            output = future => Some(output),
        }
    }

    /// Send on a bounded channel, giving up on shutdown or a closed receiver.
    ///
    /// Returns false when the caller should stop producing.
    pub async fn send<T>(&self, sender: &mpsc::Sender<T>, value: T) -> bool {
        matches!(self.guard(sender.send(value)).await, Some(Ok(())))
    }
}

impl Clone for ShutdownSignal {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_signal() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();

        // Spawn task waiting for shutdown
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            42
        });

        // Trigger shutdown
        signal.shutdown();

        // Task should complete
        let result = handle.await.unwrap();
        assert_eq!(result, 42);
        assert!(signal.is_shutdown());
    }

    #[tokio::test]
    async fn test_late_waiter_sees_signal() {
        let signal = ShutdownSignal::new();
        signal.shutdown();

        // Subscribing after the fact must not hang
        signal.cancelled().await;
        assert!(signal.guard(std::future::pending::<()>()).await.is_none());
    }

    #[tokio::test]
    async fn test_send_unblocks_on_shutdown() {
        let signal = ShutdownSignal::new();
        let (tx, _rx) = mpsc::channel::<u32>(1);

        assert!(signal.send(&tx, 1).await);

        // Channel is full now; the second send only returns through shutdown
        let stopper = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            stopper.shutdown();
        });
        assert!(!signal.send(&tx, 2).await);
    }
}
