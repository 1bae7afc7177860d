//! Bounded hand-off between trap ingestion and trap processing
//!
//! The ingestion side never waits for space: a full queue drops the newest
//! trap and logs it. SNMP traps are fire-and-forget, so there is nobody to
//! push back on. The processing side awaits the next trap.

use crate::trap::DecodedTrap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// Queue was at capacity, the trap was discarded
    Dropped,
    /// The processor has gone away
    Closed,
}

#[derive(Debug, Clone)]
pub struct RelaySender {
    inner: mpsc::Sender<DecodedTrap>,
    dropped: Arc<AtomicU64>,
}

#[derive(Debug)]
pub struct RelayReceiver {
    inner: mpsc::Receiver<DecodedTrap>,
}

/// Create a relay queue holding at most `capacity` traps.
///
/// # Panics
///
/// Panics if `capacity` is zero; configuration validation rejects that first.
pub fn bounded(capacity: usize) -> (RelaySender, RelayReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        RelaySender {
            inner: tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        RelayReceiver { inner: rx },
    )
}

impl RelaySender {
    pub fn enqueue(&self, trap: DecodedTrap) -> EnqueueOutcome {
        match self.inner.try_send(trap) {
            Ok(()) => EnqueueOutcome::Enqueued,
            Err(mpsc::error::TrySendError::Full(trap)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                error!(
                    "Trap queue is full ({} slots), dropping trap {} from {} ({} dropped so far)",
                    self.capacity(),
                    trap.id,
                    trap.source_address,
                    total
                );
                EnqueueOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(trap)) => {
                warn!(
                    "Trap queue closed, discarding trap {} from {}",
                    trap.id, trap.source_address
                );
                EnqueueOutcome::Closed
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.max_capacity()
    }

    /// Number of traps currently waiting
    pub fn len(&self) -> usize {
        self.inner.max_capacity() - self.inner.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl RelayReceiver {
    /// Wait for the next trap. `None` once all senders are gone and the queue is empty.
    pub async fn dequeue(&mut self) -> Option<DecodedTrap> {
        self.inner.recv().await
    }

    pub fn try_dequeue(&mut self) -> Option<DecodedTrap> {
        self.inner.try_recv().ok()
    }

    /// Stop accepting new traps; already queued traps stay readable
    pub fn close(&mut self) {
        self.inner.close();
    }
}
