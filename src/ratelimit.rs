//! Token-bucket rate limiter
//!
//! The bucket is a bounded mpsc channel of tickets. It starts full; a
//! refill task then pushes one ticket per interval. When the bucket is
//! full the refill blocks on the channel instead of being discarded, so a
//! drained bucket sees a steady one-per-interval cadence.

use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::error::LimiterClosed;
use crate::types::Shutdown;

pub struct RateLimiter {
    tickets: Mutex<mpsc::Receiver<()>>,
    shutdown: Shutdown,
}

impl RateLimiter {
    /// Create a limiter with its own shutdown signal
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(interval: Duration, burst: usize) -> Self {
        Self::with_shutdown(interval, burst, Shutdown::new())
    }

    /// Create a limiter that stops when `shutdown` fires
    pub fn with_shutdown(interval: Duration, burst: usize, shutdown: Shutdown) -> Self {
        let burst = burst.max(1);
        let (tx, rx) = mpsc::channel(burst);

        for _ in 0..burst {
            // Capacity is exactly `burst`, so pre-filling cannot fail
            let _ = tx.try_send(());
        }

        tokio::spawn(refill(tx, interval, shutdown.clone()));

        Self {
            tickets: Mutex::new(rx),
            shutdown,
        }
    }

    /// Wait for a ticket
    ///
    /// Fails immediately once the limiter is closed, including for callers
    /// already waiting.
    pub async fn acquire(&self) -> Result<(), LimiterClosed> {
        if self.shutdown.is_triggered() {
            return Err(LimiterClosed);
        }

        tokio::select! {
            biased;
            _ = self.shutdown.wait() => Err(LimiterClosed),
            ticket = async {
                let mut tickets = self.tickets.lock().await;
                tickets.recv().await
            } => ticket.ok_or(LimiterClosed),
        }
    }

    /// Stop the refill task and fail all pending and future acquisitions
    pub fn close(&self) {
        self.shutdown.trigger();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_triggered()
    }
}

async fn refill(tx: mpsc::Sender<()>, interval: Duration, shutdown: Shutdown) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            sent = tx.send(()) => {
                if sent.is_err() {
                    // Limiter dropped
                    break;
                }
            }
        }
    }
    debug!("Rate limiter refill stopped");
}
