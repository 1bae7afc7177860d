//! Decoded trap model and the ingestion boundary trait
//!
//! A `DecodedTrap` is what the transport hands to the pipeline: the sender,
//! the receive timestamp and the ordered variable bindings, already rendered
//! as strings.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// OIDs compare equal with or without a leading dot
pub fn normalise_oid(oid: &str) -> &str {
    oid.strip_prefix('.').unwrap_or(oid)
}

/// Quote a value for the audit dump, escaping `\` and `'`
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\\' || c == '\'' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Varbind {
    pub oid: String,
    pub value: String,
}

impl Varbind {
    pub fn new(oid: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedTrap {
    /// Local correlation id for log lines, never forwarded into an Event
    pub id: Uuid,
    pub source_address: String,
    /// ISO-8601 receive time
    pub timestamp: String,
    pub varbinds: Vec<Varbind>,
}

impl DecodedTrap {
    pub fn new(
        source_address: impl Into<String>,
        timestamp: impl Into<String>,
        varbinds: Vec<Varbind>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_address: source_address.into(),
            timestamp: timestamp.into(),
            varbinds,
        }
    }

    /// Build a trap stamped with the current UTC time
    pub fn received_now(source_address: impl Into<String>, varbinds: Vec<Varbind>) -> Self {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        Self::new(source_address, timestamp, varbinds)
    }

    /// Render the varbinds the way they are kept for audit in `event`/`eventText`
    pub fn varbind_dump(&self) -> String {
        let rendered: Vec<String> = self
            .varbinds
            .iter()
            .map(|vb| format!("{{'oid': {}, 'value': {}}}", quote(&vb.oid), quote(&vb.value)))
            .collect();
        format!("[{}]", rendered.join(", "))
    }
}

impl fmt::Display for DecodedTrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trap {} from {} at {} ({} varbinds)",
            self.id,
            self.source_address,
            self.timestamp,
            self.varbinds.len()
        )
    }
}

/// Push-style ingestion boundary.
///
/// Implementations are called from the transport's receive path and must
/// return promptly: no blocking on queue space, no rule evaluation.
pub trait TrapSource: Send + Sync {
    fn on_trap(&self, trap: DecodedTrap);
}
