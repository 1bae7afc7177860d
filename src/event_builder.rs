//! Event builder and lifecycle state derivation
//!
//! Turns an admitted trap into an `Event`: resolves the trap OID, applies the
//! matching extraction rules, classifies the vendor event class and decides
//! whether the trap clears a condition.

use crate::event::{Event, EventFields};
use crate::rules::{self, EnrichmentDirective, RuleBook};
use crate::trap::{normalise_oid, DecodedTrap};
use anyhow::Result;
use chrono::{DateTime, NaiveDateTime};
use tracing::debug;

pub const DEFAULT_EVENT_TYPE: &str = "SNMP_TRAP";

/// Ordered vendor to OID-prefix mapping.
///
/// The first vendor in declaration order whose prefix starts the trap OID
/// wins, even if a later vendor has a longer prefix.
#[derive(Debug, Clone)]
pub struct VendorClassifier {
    vendors: Vec<(String, String)>,
    default_class: String,
}

impl VendorClassifier {
    pub fn new(vendors: Vec<(String, String)>, default_class: impl Into<String>) -> Self {
        let vendors = vendors
            .into_iter()
            .map(|(vendor, prefix)| {
                let prefix = normalise_oid(&prefix).to_string();
                (vendor, prefix)
            })
            .collect();
        Self {
            vendors,
            default_class: default_class.into(),
        }
    }

    pub fn classify(&self, trap_oid: Option<&str>) -> String {
        let Some(trap_oid) = trap_oid else {
            return self.default_class.clone();
        };

        self.vendors
            .iter()
            .find(|(_, prefix)| trap_oid.starts_with(prefix.as_str()))
            .map(|(vendor, _)| format!("{}Alert", capitalise(vendor)))
            .unwrap_or_else(|| self.default_class.clone())
    }
}

/// "cisco" -> "Cisco", "HPE" -> "Hpe"
fn capitalise(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Suffix heuristic for clear traps.
///
/// This is a naming convention some vendor MIBs follow, not an SNMP rule:
/// a trap OID ending in one of the suffixes is treated as a clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearPolicy {
    suffixes: Vec<String>,
}

impl Default for ClearPolicy {
    fn default() -> Self {
        Self::new(vec![".0.1".to_string(), ".0.2".to_string()])
    }
}

impl ClearPolicy {
    pub fn new(suffixes: Vec<String>) -> Self {
        Self { suffixes }
    }

    pub fn is_clear(&self, trap_oid: Option<&str>) -> bool {
        trap_oid.is_some_and(|oid| self.suffixes.iter().any(|suffix| oid.ends_with(suffix.as_str())))
    }
}

#[derive(Debug, Clone)]
pub struct EventBuilder {
    rules: RuleBook,
    classifier: VendorClassifier,
    clear_policy: ClearPolicy,
    enrichments: [EnrichmentDirective; 5],
    event_type: String,
}

impl EventBuilder {
    pub fn new(
        rules: RuleBook,
        classifier: VendorClassifier,
        clear_policy: ClearPolicy,
        enrichments: [EnrichmentDirective; 5],
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            rules,
            classifier,
            clear_policy,
            enrichments,
            event_type: event_type.into(),
        }
    }

    /// Build the event for one trap. Fails only for traps that cannot yield a
    /// valid record: no sender, or a timestamp that is not ISO-8601.
    pub fn build(&self, trap: &DecodedTrap) -> Result<Event> {
        if trap.source_address.trim().is_empty() {
            anyhow::bail!("trap {} has no source address", trap.id);
        }
        validate_timestamp(&trap.timestamp)?;

        let varbinds = trap.varbinds.as_slice();
        let trap_oid = rules::resolve_trap_oid(varbinds);
        let rule_set = self.rules.select_rules(trap_oid);

        debug!(
            "Trap {} resolved to trap OID {:?}",
            trap.id,
            trap_oid.unwrap_or("<none>")
        );

        let fields = EventFields {
            element_name: trap.source_address.clone(),
            instance_name: rules::extract_field(varbinds, &rule_set.instance_name),
            event_name: rules::extract_field(varbinds, &rule_set.event_name),
            raw_varbinds: trap.varbind_dump(),
            severity: rules::extract_field(varbinds, &rule_set.severity),
            event_type: self.event_type.clone(),
            timestamp: trap.timestamp.clone(),
            enrichments: self
                .enrichments
                .each_ref()
                .map(|directive| directive.resolve(varbinds)),
            event_class: self.classifier.classify(trap_oid),
        };

        Ok(Event::new(fields, self.clear_policy.is_clear(trap_oid)))
    }
}

/// ISO-8601 local date-time forms, extended and basic, to the minute or finer
const ISO_LOCAL_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y%m%dT%H%M%S%.f",
    "%Y%m%dT%H%M",
];

/// Accept any ISO-8601 date-time: RFC 3339, extended or basic format,
/// minute or second precision, with `Z`, `±hh`, `±hhmm`, `±hh:mm` or no offset
fn validate_timestamp(timestamp: &str) -> Result<()> {
    if DateTime::parse_from_rfc3339(timestamp).is_ok() {
        return Ok(());
    }

    let local = split_utc_offset(timestamp).map(|local| local.replace(',', "."));
    if let Some(local) = local {
        if ISO_LOCAL_FORMATS
            .iter()
            .any(|format| NaiveDateTime::parse_from_str(&local, format).is_ok())
        {
            return Ok(());
        }
    }

    anyhow::bail!("timestamp '{}' is not ISO-8601", timestamp)
}

/// Local part of a timestamp once a valid UTC designator or offset is removed
fn split_utc_offset(timestamp: &str) -> Option<&str> {
    if let Some(local) = timestamp.strip_suffix('Z') {
        return Some(local);
    }

    let time_start = timestamp.find('T')?;
    let Some(sign) = timestamp[time_start..].rfind(|c: char| c == '+' || c == '-') else {
        return Some(timestamp);
    };
    let sign = time_start + sign;

    let (hours, minutes) = match timestamp[sign + 1..].as_bytes() {
        [h1, h2] => ([*h1, *h2], [b'0', b'0']),
        [h1, h2, m1, m2] | [h1, h2, b':', m1, m2] => ([*h1, *h2], [*m1, *m2]),
        _ => return None,
    };
    let two_digits = |pair: [u8; 2]| -> Option<u8> {
        pair.iter()
            .all(u8::is_ascii_digit)
            .then(|| (pair[0] - b'0') * 10 + (pair[1] - b'0'))
    };
    if two_digits(hours)? > 23 || two_digits(minutes)? > 59 {
        return None;
    }

    Some(&timestamp[..sign])
}
