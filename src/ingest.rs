//! Ingestion boundary: admission filter followed by the relay queue
//!
//! Runs on the transport's receive path. It only checks the block list and
//! hands the trap to the queue, so it never waits on the processor.

use crate::blocklist::{BlockList, BlockReason};
use crate::relay_queue::{EnqueueOutcome, RelaySender};
use crate::trap::{DecodedTrap, TrapSource};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Queued,
    Blocked(BlockReason),
    Dropped,
    Closed,
}

#[derive(Clone)]
pub struct TrapIngestor {
    blocklist: Arc<BlockList>,
    queue: RelaySender,
}

impl TrapIngestor {
    pub fn new(blocklist: Arc<BlockList>, queue: RelaySender) -> Self {
        Self { blocklist, queue }
    }

    pub fn ingest(&self, trap: DecodedTrap) -> IngestOutcome {
        if let Err(reason) = self.blocklist.admits(&trap) {
            warn!(
                "Blocked trap {} from {} ({})",
                trap.id, trap.source_address, reason
            );
            return IngestOutcome::Blocked(reason);
        }

        info!("Received {}", trap);
        debug!("Varbinds for trap {}: {}", trap.id, trap.varbind_dump());

        match self.queue.enqueue(trap) {
            EnqueueOutcome::Enqueued => IngestOutcome::Queued,
            EnqueueOutcome::Dropped => IngestOutcome::Dropped,
            EnqueueOutcome::Closed => IngestOutcome::Closed,
        }
    }

    pub fn queue(&self) -> &RelaySender {
        &self.queue
    }
}

impl TrapSource for TrapIngestor {
    fn on_trap(&self, trap: DecodedTrap) {
        let _ = self.ingest(trap);
    }
}
