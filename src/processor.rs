//! Trap processor: the single consumer of the relay queue
//!
//! Pulls admitted traps off the queue, builds events and appends them to the
//! event store. A trap that fails to build is logged and dropped; the loop
//! always moves on to the next one.

use crate::event::Event;
use crate::event_builder::EventBuilder;
use crate::event_store::EventStore;
use crate::relay_queue::RelayReceiver;
use crate::trap::DecodedTrap;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub processed: u64,
    pub failed: u64,
}

pub struct TrapProcessor {
    builder: EventBuilder,
    store: Arc<EventStore>,
    trap_receiver: RelayReceiver,
    shutdown_receiver: mpsc::UnboundedReceiver<()>,
    completion_sender: Option<oneshot::Sender<ProcessorStats>>,
    stats: ProcessorStats,
}

impl TrapProcessor {
    pub fn new(
        builder: EventBuilder,
        store: Arc<EventStore>,
        trap_receiver: RelayReceiver,
        shutdown_receiver: mpsc::UnboundedReceiver<()>,
        completion_sender: Option<oneshot::Sender<ProcessorStats>>,
    ) -> Self {
        Self {
            builder,
            store,
            trap_receiver,
            shutdown_receiver,
            completion_sender,
            stats: ProcessorStats::default(),
        }
    }

    /// Build and store the event for one trap; `None` if the trap was dropped
    pub fn process_trap(&mut self, trap: &DecodedTrap) -> Option<Arc<Event>> {
        match self.builder.build(trap) {
            Ok(event) => {
                let event = self.store.append(event);
                self.stats.processed += 1;
                info!("Processed trap {} into event: {:?}", trap.id, event);
                Some(event)
            }
            Err(e) => {
                self.stats.failed += 1;
                error!("Error processing trap {}: {:#} (trap: {:?})", trap.id, e, trap);
                None
            }
        }
    }

    pub fn stats(&self) -> ProcessorStats {
        self.stats
    }

    /// Run until every queue sender is gone or a shutdown signal arrives
    pub async fn start(mut self) -> Result<ProcessorStats> {
        info!("Trap processor started");

        let mut shutdown_armed = true;

        loop {
            tokio::select! {
                trap_option = self.trap_receiver.dequeue() => {
                    match trap_option {
                        Some(trap) => {
                            debug!("Dequeued {}", trap);
                            self.process_trap(&trap);
                        }
                        None => {
                            debug!("Trap queue closed and empty");
                            break;
                        }
                    }
                }

                shutdown_signal = self.shutdown_receiver.recv(), if shutdown_armed => {
                    if shutdown_signal.is_some() {
                        info!("Trap processor received shutdown signal");
                        self.drain();
                        break;
                    }
                    // Controller went away without asking us to stop
                    shutdown_armed = false;
                }
            }
        }

        info!(
            "Trap processor stopped: {} processed, {} failed",
            self.stats.processed, self.stats.failed
        );

        if let Some(sender) = self.completion_sender.take() {
            let _ = sender.send(self.stats);
        }

        Ok(self.stats)
    }

    /// Best-effort pass over traps that were already queued at shutdown
    fn drain(&mut self) {
        self.trap_receiver.close();

        let mut drained = 0u64;
        while let Some(trap) = self.trap_receiver.try_dequeue() {
            self.process_trap(&trap);
            drained += 1;
        }

        if drained > 0 {
            info!("Processed {} queued trap(s) during shutdown", drained);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessorConfig;
    use crate::event::EventState;
    use crate::relay_queue;
    use crate::rules::SNMP_TRAP_OID;
    use crate::trap::Varbind;

    fn trap(source: &str, timestamp: &str, trap_oid: &str) -> DecodedTrap {
        DecodedTrap::new(
            source,
            timestamp,
            vec![
                Varbind::new("1.3.6.1.2.1.1.3.0", "100"),
                Varbind::new(SNMP_TRAP_OID, trap_oid),
            ],
        )
    }

    fn processor_parts() -> (
        relay_queue::RelaySender,
        mpsc::UnboundedSender<()>,
        Arc<EventStore>,
        TrapProcessor,
    ) {
        let builder = ProcessorConfig::default().compile().unwrap();
        let store = Arc::new(EventStore::new());
        let (queue_tx, queue_rx) = relay_queue::bounded(16);
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let processor = TrapProcessor::new(builder, Arc::clone(&store), queue_rx, shutdown_rx, None);
        (queue_tx, shutdown_tx, store, processor)
    }

    #[tokio::test]
    async fn test_malformed_trap_does_not_stop_the_loop() {
        let (queue_tx, _shutdown_tx, store, processor) = processor_parts();

        queue_tx.enqueue(trap("10.0.0.1", "not-a-time", "1.3.6.1.4.1.9.0.5"));
        queue_tx.enqueue(trap("10.0.0.2", "2024-05-01T10:00:00Z", "1.3.6.1.4.1.9.0.5"));
        drop(queue_tx);

        let stats = processor.start().await.unwrap();

        assert_eq!(stats, ProcessorStats { processed: 1, failed: 1 });
        let events = store.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].element_name, "10.0.0.2");
    }

    #[tokio::test]
    async fn test_each_admitted_trap_yields_one_event_in_order() {
        let (queue_tx, _shutdown_tx, store, processor) = processor_parts();

        queue_tx.enqueue(trap("10.0.0.1", "2024-05-01T10:00:00Z", "1.3.6.1.4.1.9.0.5"));
        queue_tx.enqueue(trap("10.0.0.2", "2024-05-01T10:00:01Z", "1.3.6.1.4.1.9.0.1"));
        queue_tx.enqueue(trap("10.0.0.3", "2024-05-01T10:00:02Z", "1.3.6.1.4.1.2636.4.1.1"));
        drop(queue_tx);

        processor.start().await.unwrap();

        let events = store.snapshot();
        let sources: Vec<&str> = events.iter().map(|e| e.element_name.as_str()).collect();
        assert_eq!(sources, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        assert_eq!(events[0].event_state, EventState::Active);
        assert_eq!(events[1].event_state, EventState::InActive);
        assert_eq!(events[1].clear_time.as_deref(), Some("2024-05-01T10:00:01Z"));
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_processor_and_reports() {
        let builder = ProcessorConfig::default().compile().unwrap();
        let store = Arc::new(EventStore::new());
        let (queue_tx, queue_rx) = relay_queue::bounded(4);
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let processor =
            TrapProcessor::new(builder, Arc::clone(&store), queue_rx, shutdown_rx, Some(done_tx));

        let handle = tokio::spawn(processor.start());
        queue_tx.enqueue(trap("10.0.0.1", "2024-05-01T10:00:00Z", "1.3.6.1.4.1.9.0.5"));
        shutdown_tx.send(()).unwrap();

        let stats = done_rx.await.unwrap();
        assert_eq!(handle.await.unwrap().unwrap(), stats);
        assert_eq!(stats.processed, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(
            queue_tx.enqueue(trap("10.0.0.2", "2024-05-01T10:00:00Z", "1.3.6.1.4.1.9.0.5")),
            relay_queue::EnqueueOutcome::Closed
        );
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_keeps_processor_running() {
        let (queue_tx, shutdown_tx, store, processor) = processor_parts();
        drop(shutdown_tx);

        let handle = tokio::spawn(processor.start());
        queue_tx.enqueue(trap("10.0.0.1", "2024-05-01T10:00:00Z", "1.3.6.1.4.1.9.0.5"));
        drop(queue_tx);

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(store.len(), 1);
    }
}
