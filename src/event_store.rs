//! In-memory, append-only event store
//!
//! One writer (the processor) and any number of readers. Events are wrapped
//! in `Arc` so a snapshot only copies pointers; an event is fully built
//! before it is pushed, so readers never observe a partial record.

use crate::event::Event;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct EventStore {
    events: RwLock<Vec<Arc<Event>>>,
}

/// The `{"events": [...]}` document served on the read boundary
#[derive(Debug, Clone, Serialize)]
pub struct EventsDocument {
    pub events: Vec<Arc<Event>>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, event: Event) -> Arc<Event> {
        let event = Arc::new(event);
        self.events.write().push(Arc::clone(&event));
        event
    }

    /// Current contents in insertion order
    pub fn snapshot(&self) -> Vec<Arc<Event>> {
        self.events.read().clone()
    }

    pub fn to_document(&self) -> EventsDocument {
        EventsDocument {
            events: self.snapshot(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventFields;

    fn event(name: &str, clear: bool) -> Event {
        Event::new(
            EventFields {
                element_name: "10.0.0.1".to_string(),
                event_name: name.to_string(),
                timestamp: "2024-05-01T10:00:00Z".to_string(),
                event_type: "SNMP_TRAP".to_string(),
                enrichments: [None, Some("rack7".to_string()), None, None, None],
                ..Default::default()
            },
            clear,
        )
    }

    #[test]
    fn test_snapshot_returns_appended_events_unchanged() {
        let store = EventStore::new();
        let first = event("linkDown", false);
        let second = event("linkUp", true);

        store.append(first.clone());
        store.append(second.clone());

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(*snapshot[0], first);
        assert_eq!(*snapshot[1], second);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_appends() {
        let store = EventStore::new();
        store.append(event("a", false));

        let before = store.snapshot();
        store.append(event("b", false));

        assert_eq!(before.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_document_shape() {
        let store = EventStore::new();
        assert!(store.is_empty());
        assert_eq!(
            serde_json::to_value(store.to_document()).unwrap(),
            serde_json::json!({ "events": [] })
        );

        store.append(event("coldStart", false));
        let doc = serde_json::to_value(store.to_document()).unwrap();
        assert_eq!(doc["events"][0]["eventName"], "coldStart");
        assert_eq!(doc["events"][0]["enrich2"], "rack7");
        assert!(doc["events"][0]["clearTime"].is_null());
    }

    #[test]
    fn test_readers_run_alongside_writer() {
        let store = Arc::new(EventStore::new());

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..200 {
                    store.append(event(&format!("e{}", i), i % 2 == 0));
                }
            })
        };

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        for e in store.snapshot() {
                            assert_eq!(e.clear_time.is_some(), e.is_clear());
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        let names: Vec<String> = store.snapshot().iter().map(|e| e.event_name.clone()).collect();
        assert_eq!(names.len(), 200);
        assert_eq!(names[0], "e0");
        assert_eq!(names[199], "e199");
    }
}
