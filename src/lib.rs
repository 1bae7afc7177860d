//! Trapline Library
//!
//! SNMP trap ingestion with an admission block list, a bounded relay queue
//! and a regex rule engine that turns each admitted trap into a normalised
//! event record held in an in-memory store.

pub mod blocklist;
pub mod config;
pub mod event;
pub mod event_builder;
pub mod event_store;
pub mod ingest;
pub mod processor;
pub mod relay_queue;
pub mod rules;
pub mod snmp_codec;
pub mod snmp_listener;
pub mod status;
pub mod trap;

pub use blocklist::{BlockList, BlockReason};
pub use config::Config;
pub use event::{Event, EventState};
pub use event_builder::EventBuilder;
pub use event_store::EventStore;
pub use ingest::{IngestOutcome, TrapIngestor};
pub use processor::{ProcessorStats, TrapProcessor};
pub use snmp_listener::SnmpListener;
pub use status::{AppState, StatusServer};
pub use trap::{DecodedTrap, TrapSource, Varbind};
