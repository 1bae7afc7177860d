//! Normalised event record produced from one admitted trap

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventState {
    Active,
    InActive,
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventState::Active => f.write_str("Active"),
            EventState::InActive => f.write_str("InActive"),
        }
    }
}

/// Fields extracted or derived for one trap, before lifecycle state is applied
#[derive(Debug, Clone, Default)]
pub struct EventFields {
    pub element_name: String,
    pub instance_name: String,
    pub event_name: String,
    pub raw_varbinds: String,
    pub severity: String,
    pub event_type: String,
    pub timestamp: String,
    pub enrichments: [Option<String>; 5],
    pub event_class: String,
}

/// Immutable once built. `clear_time` is present exactly when the state is `InActive`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub element_name: String,
    pub instance_name: String,
    pub event_name: String,
    pub event: String,
    pub event_text: String,
    pub severity: String,
    pub event_type: String,
    pub create_time: String,
    pub updated_time: String,
    pub clear_time: Option<String>,
    pub enrich1: Option<String>,
    pub enrich2: Option<String>,
    pub enrich3: Option<String>,
    pub enrich4: Option<String>,
    pub enrich5: Option<String>,
    pub event_state: EventState,
    pub event_class: String,
}

impl Event {
    /// Assemble the record; `is_clear` drives both `clear_time` and `event_state`
    pub fn new(fields: EventFields, is_clear: bool) -> Self {
        let EventFields {
            element_name,
            instance_name,
            event_name,
            raw_varbinds,
            severity,
            event_type,
            timestamp,
            enrichments: [enrich1, enrich2, enrich3, enrich4, enrich5],
            event_class,
        } = fields;

        let (clear_time, event_state) = if is_clear {
            (Some(timestamp.clone()), EventState::InActive)
        } else {
            (None, EventState::Active)
        };

        Self {
            element_name,
            instance_name,
            event_name,
            event: raw_varbinds.clone(),
            event_text: raw_varbinds,
            severity,
            event_type,
            create_time: timestamp.clone(),
            updated_time: timestamp,
            clear_time,
            enrich1,
            enrich2,
            enrich3,
            enrich4,
            enrich5,
            event_state,
            event_class,
        }
    }

    pub fn is_clear(&self) -> bool {
        self.event_state == EventState::InActive
    }
}
