//! Rule engine: trap OID resolution, field extraction and enrichment
//!
//! Extraction rules are regular expressions compiled once when the
//! configuration is loaded. Each event field has an ordered list of rules;
//! the first rule whose varbind is present and whose pattern captures wins.

use crate::config::{ExtractionRuleConfig, ExtractionRulesConfig};
use crate::trap::{normalise_oid, Varbind};
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashMap;

/// snmpTrapOID.0
pub const SNMP_TRAP_OID: &str = "1.3.6.1.6.3.1.1.4.1.0";

/// Value used for any field no rule could extract
pub const UNKNOWN: &str = "unknown";

/// Find the notification OID carried in the snmpTrapOID.0 varbind.
///
/// Transports differ on whether OIDs carry a leading dot, so both
/// `.1.3.6.1.6.3.1.1.4.1.0` and `1.3.6.1.6.3.1.1.4.1.0` are accepted. The
/// returned trap OID is normalised the same way.
pub fn resolve_trap_oid(varbinds: &[Varbind]) -> Option<&str> {
    find_varbind(varbinds, SNMP_TRAP_OID).map(normalise_oid)
}

/// Value of the first varbind whose OID equals `oid`, ignoring a leading dot
pub fn find_varbind<'a>(varbinds: &'a [Varbind], oid: &str) -> Option<&'a str> {
    let oid = normalise_oid(oid);
    varbinds
        .iter()
        .find(|vb| normalise_oid(&vb.oid) == oid)
        .map(|vb| vb.value.as_str())
}

#[derive(Debug, Clone)]
pub struct ExtractionRule {
    pub varbind_oid: String,
    pub pattern: Regex,
}

impl ExtractionRule {
    pub fn compile(config: &ExtractionRuleConfig) -> Result<Self> {
        if config.varbind_oid.trim().is_empty() {
            anyhow::bail!("Extraction rule has an empty varbind_oid");
        }

        let pattern = Regex::new(&config.pattern)
            .with_context(|| format!("Invalid extraction pattern '{}'", config.pattern))?;

        // Group 0 is the whole match, so a usable pattern has at least two
        if pattern.captures_len() < 2 {
            anyhow::bail!(
                "Extraction pattern '{}' has no capture group",
                config.pattern
            );
        }

        Ok(Self {
            varbind_oid: normalise_oid(&config.varbind_oid).to_string(),
            pattern,
        })
    }

    /// Capture group 1 of this rule against the varbinds, if any
    fn apply<'a>(&self, varbinds: &'a [Varbind]) -> Option<&'a str> {
        let value = find_varbind(varbinds, &self.varbind_oid)?;
        if value.is_empty() {
            return None;
        }
        self.pattern
            .captures(value)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

/// Apply rules in declared order, falling back to `"unknown"`
pub fn extract_field(varbinds: &[Varbind], rules: &[ExtractionRule]) -> String {
    rules
        .iter()
        .find_map(|rule| rule.apply(varbinds))
        .unwrap_or(UNKNOWN)
        .to_string()
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionRuleSet {
    pub instance_name: Vec<ExtractionRule>,
    pub event_name: Vec<ExtractionRule>,
    pub severity: Vec<ExtractionRule>,
}

impl ExtractionRuleSet {
    pub fn compile(config: &ExtractionRulesConfig) -> Result<Self> {
        Ok(Self {
            instance_name: compile_field("instance_name", &config.instance_name)?,
            event_name: compile_field("event_name", &config.event_name)?,
            severity: compile_field("severity", &config.severity)?,
        })
    }
}

fn compile_field(field: &str, rules: &[ExtractionRuleConfig]) -> Result<Vec<ExtractionRule>> {
    rules
        .iter()
        .enumerate()
        .map(|(idx, rule)| {
            ExtractionRule::compile(rule).with_context(|| format!("{} rule #{}", field, idx + 1))
        })
        .collect()
}

/// Per-trap-OID rule sets with a default fallback
#[derive(Debug, Clone, Default)]
pub struct RuleBook {
    per_oid: HashMap<String, ExtractionRuleSet>,
    default: ExtractionRuleSet,
}

impl RuleBook {
    pub fn new(per_oid: HashMap<String, ExtractionRuleSet>, default: ExtractionRuleSet) -> Self {
        Self { per_oid, default }
    }

    pub fn compile(
        per_oid: &HashMap<String, ExtractionRulesConfig>,
        default: &ExtractionRulesConfig,
    ) -> Result<Self> {
        let default = ExtractionRuleSet::compile(default)
            .context("Invalid default extraction rules")?;

        let mut compiled = HashMap::with_capacity(per_oid.len());
        for (trap_oid, rules) in per_oid {
            let set = ExtractionRuleSet::compile(rules)
                .with_context(|| format!("Invalid extraction rules for trap OID {}", trap_oid))?;
            compiled.insert(normalise_oid(trap_oid).to_string(), set);
        }

        Ok(Self::new(compiled, default))
    }

    /// Exact-key lookup; no prefix or wildcard matching
    pub fn select_rules(&self, trap_oid: Option<&str>) -> &ExtractionRuleSet {
        trap_oid
            .and_then(|oid| self.per_oid.get(normalise_oid(oid)))
            .unwrap_or(&self.default)
    }

    pub fn len(&self) -> usize {
        self.per_oid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.per_oid.is_empty()
    }
}

/// Where an enrichment slot takes its value from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EnrichmentDirective {
    Static(String),
    Varbind(String),
    #[default]
    None,
}

impl EnrichmentDirective {
    /// Parse `static:<literal>` or `varbind:<oid>`; an empty string leaves the slot unset
    pub fn parse(directive: &str) -> Result<Self> {
        if directive.is_empty() {
            return Ok(Self::None);
        }

        if let Some(literal) = directive.strip_prefix("static:") {
            Ok(Self::Static(literal.to_string()))
        } else if let Some(oid) = directive.strip_prefix("varbind:") {
            let oid = normalise_oid(oid);
            if oid.is_empty() {
                anyhow::bail!("Enrichment directive '{}' names no OID", directive);
            }
            Ok(Self::Varbind(oid.to_string()))
        } else {
            anyhow::bail!(
                "Unknown enrichment directive '{}' (expected static:<value> or varbind:<oid>)",
                directive
            )
        }
    }

    pub fn resolve(&self, varbinds: &[Varbind]) -> Option<String> {
        match self {
            Self::Static(literal) => Some(literal.clone()),
            Self::Varbind(oid) => find_varbind(varbinds, oid).map(str::to_string),
            Self::None => None,
        }
    }
}
