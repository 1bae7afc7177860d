//! Admission filter for incoming traps
//!
//! Holds the blocked sender and blocked OID sets. The same `BlockList` is
//! shared between the ingestion path and the administrative endpoints; every
//! mutation happens under one write lock so a concurrent `is_blocked` sees
//! either the old or the new sets, never a mix.

use crate::config::ListenerConfig;
use crate::trap::{normalise_oid, DecodedTrap};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct BlockSets {
    oids: HashSet<String>,
    senders: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct BlockList {
    sets: RwLock<BlockSets>,
}

/// Why a trap was refused admission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    Sender(String),
    Oid(String),
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Sender(sender) => write!(f, "blocked sender {}", sender),
            BlockReason::Oid(oid) => write!(f, "blocked OID {}", oid),
        }
    }
}

/// Point-in-time copy of both sets, sorted for stable output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockListSnapshot {
    pub blocked_oids: Vec<String>,
    pub blocked_senders: Vec<String>,
}

impl BlockList {
    pub fn new<O, S>(oids: O, senders: S) -> Self
    where
        O: IntoIterator<Item = String>,
        S: IntoIterator<Item = String>,
    {
        Self {
            sets: RwLock::new(BlockSets {
                oids: oids
                    .into_iter()
                    .map(|oid| normalise_oid(&oid).to_string())
                    .collect(),
                senders: senders.into_iter().collect(),
            }),
        }
    }

    /// Seed the block list from the listener section of the configuration
    pub fn from_config(config: &ListenerConfig) -> Self {
        let list = Self::new(
            config.blocked_oids.iter().cloned(),
            config.blocked_senders.iter().cloned(),
        );
        let sets = list.sets.read();
        info!(
            "Block list initialised with {} OID(s) and {} sender(s)",
            sets.oids.len(),
            sets.senders.len()
        );
        drop(sets);
        list
    }

    pub fn is_blocked(&self, source_address: &str, oid: &str) -> bool {
        let sets = self.sets.read();
        sets.senders.contains(source_address) || sets.oids.contains(normalise_oid(oid))
    }

    /// Check a whole trap. A single blocked varbind OID rejects the entire trap.
    pub fn admits(&self, trap: &DecodedTrap) -> Result<(), BlockReason> {
        let sets = self.sets.read();

        if sets.senders.contains(&trap.source_address) {
            return Err(BlockReason::Sender(trap.source_address.clone()));
        }

        match trap
            .varbinds
            .iter()
            .find(|vb| sets.oids.contains(normalise_oid(&vb.oid)))
        {
            Some(vb) => Err(BlockReason::Oid(vb.oid.clone())),
            None => Ok(()),
        }
    }

    /// Returns true when the OID was not blocked before
    pub fn block_oid(&self, oid: &str) -> bool {
        let oid = normalise_oid(oid);
        let changed = self.sets.write().oids.insert(oid.to_string());
        if changed {
            info!("Blocked OID: {}", oid);
        } else {
            debug!("OID {} already blocked", oid);
        }
        changed
    }

    pub fn unblock_oid(&self, oid: &str) -> bool {
        let oid = normalise_oid(oid);
        let changed = self.sets.write().oids.remove(oid);
        if changed {
            info!("Unblocked OID: {}", oid);
        } else {
            debug!("OID {} was not blocked", oid);
        }
        changed
    }

    pub fn block_sender(&self, sender: &str) -> bool {
        let changed = self.sets.write().senders.insert(sender.to_string());
        if changed {
            info!("Blocked sender: {}", sender);
        } else {
            debug!("Sender {} already blocked", sender);
        }
        changed
    }

    pub fn unblock_sender(&self, sender: &str) -> bool {
        let changed = self.sets.write().senders.remove(sender);
        if changed {
            info!("Unblocked sender: {}", sender);
        } else {
            debug!("Sender {} was not blocked", sender);
        }
        changed
    }

    pub fn snapshot(&self) -> BlockListSnapshot {
        let sets = self.sets.read();
        let mut blocked_oids: Vec<String> = sets.oids.iter().cloned().collect();
        let mut blocked_senders: Vec<String> = sets.senders.iter().cloned().collect();
        drop(sets);

        blocked_oids.sort();
        blocked_senders.sort();
        BlockListSnapshot {
            blocked_oids,
            blocked_senders,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trap::Varbind;
    use std::sync::Arc;

    fn trap_from(source: &str, oids: &[&str]) -> DecodedTrap {
        DecodedTrap::new(
            source,
            "2024-05-01T10:00:00Z",
            oids.iter().map(|oid| Varbind::new(*oid, "x")).collect(),
        )
    }

    #[test]
    fn test_is_blocked_matches_sender_or_oid() {
        let list = BlockList::new(
            vec!["1.3.6.1.4.1.9.9.41".to_string()],
            vec!["192.168.1.50".to_string()],
        );

        assert!(list.is_blocked("192.168.1.50", "1.3.6.1.2.1.1.3.0"));
        assert!(list.is_blocked("10.0.0.1", "1.3.6.1.4.1.9.9.41"));
        assert!(!list.is_blocked("10.0.0.1", "1.3.6.1.2.1.1.3.0"));
    }

    #[test]
    fn test_any_blocked_varbind_rejects_whole_trap() {
        let list = BlockList::new(vec!["1.3.6.1.4.1.99.1".to_string()], Vec::new());
        let trap = trap_from(
            "10.0.0.1",
            &["1.3.6.1.2.1.1.3.0", "1.3.6.1.4.1.99.1", "1.3.6.1.2.1.2.2.1.1"],
        );

        assert_eq!(
            list.admits(&trap),
            Err(BlockReason::Oid("1.3.6.1.4.1.99.1".to_string()))
        );
    }

    #[test]
    fn test_oid_match_ignores_leading_dot() {
        let list = BlockList::new(vec![".1.3.6.1.4.1.99.1".to_string()], Vec::new());

        assert!(list.is_blocked("10.0.0.1", "1.3.6.1.4.1.99.1"));
        assert!(list.admits(&trap_from("10.0.0.1", &[".1.3.6.1.4.1.99.1"])).is_err());
        assert!(!list.block_oid("1.3.6.1.4.1.99.1"));

        assert!(list.block_oid("1.3.6.1.4.1.99.2"));
        assert!(list.admits(&trap_from("10.0.0.1", &[".1.3.6.1.4.1.99.2"])).is_err());
        assert!(list.unblock_oid(".1.3.6.1.4.1.99.2"));
        assert_eq!(list.snapshot().blocked_oids, vec!["1.3.6.1.4.1.99.1".to_string()]);
    }

    #[test]
    fn test_blocked_sender_rejects_trap_without_varbinds() {
        let list = BlockList::new(Vec::new(), vec!["10.0.0.9".to_string()]);
        assert_eq!(
            list.admits(&trap_from("10.0.0.9", &[])),
            Err(BlockReason::Sender("10.0.0.9".to_string()))
        );
        assert_eq!(list.admits(&trap_from("10.0.0.8", &[])), Ok(()));
    }

    #[test]
    fn test_block_oid_is_idempotent() {
        let list = BlockList::default();

        assert!(list.block_oid("1.2.3"));
        let once = list.snapshot();
        assert!(!list.block_oid("1.2.3"));
        assert_eq!(list.snapshot(), once);
        assert_eq!(once.blocked_oids, vec!["1.2.3".to_string()]);
    }

    #[test]
    fn test_unblock_of_unknown_entries_is_noop() {
        let list = BlockList::new(vec!["1.2.3".to_string()], vec!["10.0.0.1".to_string()]);
        let before = list.snapshot();

        assert!(!list.unblock_oid("9.9.9"));
        assert!(!list.unblock_sender("10.0.0.2"));
        assert_eq!(list.snapshot(), before);
    }

    #[test]
    fn test_block_then_unblock_restores_state() {
        let list = BlockList::new(vec!["1.2.3".to_string()], Vec::new());
        let before = list.snapshot();

        list.block_oid("4.5.6");
        list.block_sender("172.16.0.1");
        assert!(list.is_blocked("172.16.0.1", "0"));
        list.unblock_oid("4.5.6");
        list.unblock_sender("172.16.0.1");

        assert_eq!(list.snapshot(), before);
        assert!(!list.is_blocked("172.16.0.1", "4.5.6"));
    }

    #[test]
    fn test_concurrent_mutation_and_reads() {
        let list = Arc::new(BlockList::default());

        let writer = {
            let list = Arc::clone(&list);
            std::thread::spawn(move || {
                for i in 0..500 {
                    let oid = format!("1.3.6.1.4.1.{}", i);
                    list.block_oid(&oid);
                    list.unblock_oid(&oid);
                }
                list.block_oid("1.3.6.1.4.1.final");
            })
        };

        let reader = {
            let list = Arc::clone(&list);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let _ = list.is_blocked("10.0.0.1", "1.3.6.1.4.1.7");
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();

        assert_eq!(
            list.snapshot().blocked_oids,
            vec!["1.3.6.1.4.1.final".to_string()]
        );
    }
}
