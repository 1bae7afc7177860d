//! Configuration management for Trapline
//!
//! Typed configuration for the listener, the processing rules, the status
//! surface and logging. Files are YAML (`.yaml`/`.yml`) or JSON (`.json`).
//! Everything is validated and the rules are compiled at startup; a
//! configuration that does not validate stops the process before any trap
//! is accepted.

use crate::event_builder::{ClearPolicy, EventBuilder, VendorClassifier, DEFAULT_EVENT_TYPE};
use crate::rules::{EnrichmentDirective, RuleBook};
use anyhow::{Context, Result};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub listener: ListenerConfig,
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub status: StatusConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub port: u16,
    pub bind_address: String,
    pub community_strings: Vec<String>,
    pub snmp_version: Vec<SnmpVersion>,
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
    pub queue_size: usize,
    #[serde(default)]
    pub blocked_oids: Vec<String>,
    #[serde(default)]
    pub blocked_senders: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnmpVersion {
    V1,
    V2c,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_event_type")]
    pub event_type: String,
    #[serde(default = "default_clear_suffixes")]
    pub clear_suffixes: Vec<String>,
    /// Rule sets keyed by exact trap OID
    pub extraction_rules: HashMap<String, ExtractionRulesConfig>,
    pub default_extraction: ExtractionRulesConfig,
    pub event_classes: EventClassesConfig,
    /// Every slot must be present; `''` leaves it unset
    pub enrichments: EnrichmentsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionRulesConfig {
    pub instance_name: Vec<ExtractionRuleConfig>,
    pub event_name: Vec<ExtractionRuleConfig>,
    pub severity: Vec<ExtractionRuleConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRuleConfig {
    pub varbind_oid: String,
    pub pattern: String,
}

/// Vendor to OID-prefix map plus the fallback class.
///
/// Written as a single map with a `default` entry; the vendor entries keep
/// their declaration order because classification is first-match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventClassesConfig {
    pub default_class: String,
    pub vendors: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentsConfig {
    pub enrich1: String,
    pub enrich2: String,
    pub enrich3: String,
    pub enrich4: String,
    pub enrich5: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub console_output: bool,
    pub file_output: Option<String>,
    #[serde(default = "default_rotation_strategy")]
    pub rotation_strategy: String,
}

fn default_max_packet_size() -> usize { 8192 }
fn default_event_type() -> String { DEFAULT_EVENT_TYPE.to_string() }
fn default_clear_suffixes() -> Vec<String> { vec![".0.1".to_string(), ".0.2".to_string()] }
fn default_rotation_strategy() -> String { "daily".to_string() }

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const ROTATION_STRATEGIES: [&str; 3] = ["daily", "hourly", "never"];
/// Upper bound on buffered traps; the queue allocates per slot block
pub const MAX_QUEUE_SIZE: usize = 1_000_000;

impl Serialize for EventClassesConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.vendors.len() + 1))?;
        map.serialize_entry("default", &self.default_class)?;
        for (vendor, prefix) in &self.vendors {
            map.serialize_entry(vendor, prefix)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EventClassesConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EventClassesVisitor;

        impl<'de> Visitor<'de> for EventClassesVisitor {
            type Value = EventClassesConfig;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of vendor names to OID prefixes with a 'default' class")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut default_class = None;
                let mut vendors = Vec::new();

                while let Some((key, value)) = map.next_entry::<String, String>()? {
                    if key == "default" {
                        default_class = Some(value);
                    } else {
                        vendors.push((key, value));
                    }
                }

                let default_class = default_class.ok_or_else(|| de::Error::missing_field("default"))?;
                Ok(EventClassesConfig {
                    default_class,
                    vendors,
                })
            }
        }

        deserializer.deserialize_map(EventClassesVisitor)
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: 162,
            bind_address: "0.0.0.0".to_string(),
            community_strings: vec!["public".to_string()],
            snmp_version: vec![SnmpVersion::V1, SnmpVersion::V2c],
            max_packet_size: default_max_packet_size(),
            queue_size: 1000,
            blocked_oids: Vec::new(),
            blocked_senders: Vec::new(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        let rule = |oid: &str, pattern: &str| ExtractionRuleConfig {
            varbind_oid: oid.to_string(),
            pattern: pattern.to_string(),
        };

        // CISCO-SYSLOG-MIB clogMessageGenerated
        let mut extraction_rules = HashMap::new();
        extraction_rules.insert(
            "1.3.6.1.4.1.9.9.41.2.0.1".to_string(),
            ExtractionRulesConfig {
                instance_name: vec![rule("1.3.6.1.4.1.9.9.41.1.2.3.1.2", r"(\S+)")],
                event_name: vec![rule("1.3.6.1.4.1.9.9.41.1.2.3.1.4", r"(\S+)")],
                severity: vec![rule("1.3.6.1.4.1.9.9.41.1.2.3.1.3", r"(\d+)")],
            },
        );

        Self {
            event_type: default_event_type(),
            clear_suffixes: default_clear_suffixes(),
            extraction_rules,
            default_extraction: ExtractionRulesConfig {
                instance_name: vec![
                    rule("1.3.6.1.2.1.2.2.1.2", r"(.+)"),
                    rule("1.3.6.1.2.1.1.5.0", r"(.+)"),
                ],
                event_name: vec![rule("1.3.6.1.6.3.1.1.4.1.0", r"(.+)")],
                severity: vec![rule("1.3.6.1.4.1.9.9.41.1.2.3.1.3", r"(\d+)")],
            },
            event_classes: EventClassesConfig {
                default_class: "SNMPAlert".to_string(),
                vendors: vec![
                    ("cisco".to_string(), "1.3.6.1.4.1.9".to_string()),
                    ("juniper".to_string(), "1.3.6.1.4.1.2636".to_string()),
                    ("arista".to_string(), "1.3.6.1.4.1.30065".to_string()),
                ],
            },
            enrichments: EnrichmentsConfig {
                enrich1: "static:production".to_string(),
                enrich2: "varbind:1.3.6.1.2.1.1.5.0".to_string(),
                ..Default::default()
            },
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_output: true,
            file_output: Some("./logs/trapline.log".to_string()),
            rotation_strategy: default_rotation_strategy(),
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("json")
}

impl Config {
    /// Load configuration from a YAML or JSON file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        if is_json(path) {
            serde_json::from_str(&content).context("Failed to parse configuration JSON")
        } else {
            serde_yaml::from_str(&content).context("Failed to parse configuration YAML")
        }
    }

    /// Save configuration, format chosen by file extension
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = if is_json(path) {
            serde_json::to_string_pretty(self).context("Failed to serialise configuration")?
        } else {
            serde_yaml::to_string(self).context("Failed to serialise configuration")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create configuration directory")?;
        }

        tokio::fs::write(path, content)
            .await
            .context("Failed to write configuration file")?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.listener.validate().context("Invalid listener configuration")?;
        self.processor.validate().context("Invalid processor configuration")?;

        if self.status.enabled {
            if self.status.port == 0 {
                anyhow::bail!("Invalid status port: {}", self.status.port);
            }
            self.status
                .bind_address
                .parse::<IpAddr>()
                .with_context(|| format!("Invalid status bind address: {}", self.status.bind_address))?;
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Invalid log level '{}' (expected one of {:?})",
                self.logging.level,
                LOG_LEVELS
            );
        }
        if !ROTATION_STRATEGIES.contains(&self.logging.rotation_strategy.as_str()) {
            anyhow::bail!(
                "Invalid rotation strategy '{}' (expected one of {:?})",
                self.logging.rotation_strategy,
                ROTATION_STRATEGIES
            );
        }

        Ok(())
    }
}

impl ListenerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Invalid port number: {}", self.port);
        }
        self.bind_address
            .parse::<IpAddr>()
            .with_context(|| format!("Invalid bind address: {}", self.bind_address))?;

        if self.community_strings.is_empty() {
            anyhow::bail!("At least one community string must be configured");
        }
        if self.snmp_version.is_empty() {
            anyhow::bail!("At least one SNMP version must be enabled");
        }
        if self.max_packet_size == 0 {
            anyhow::bail!("max_packet_size must be greater than zero");
        }
        if self.queue_size == 0 || self.queue_size > MAX_QUEUE_SIZE {
            anyhow::bail!(
                "queue_size must be between 1 and {}, got {}",
                MAX_QUEUE_SIZE,
                self.queue_size
            );
        }

        for sender in &self.blocked_senders {
            sender
                .parse::<IpAddr>()
                .with_context(|| format!("Blocked sender is not an IP address: '{}'", sender))?;
        }
        if self.blocked_oids.iter().any(|oid| oid.trim().is_empty()) {
            anyhow::bail!("Blocked OID list contains an empty entry");
        }

        Ok(())
    }

    pub fn accepts_version(&self, version: SnmpVersion) -> bool {
        self.snmp_version.contains(&version)
    }
}

impl ProcessorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.event_type.trim().is_empty() {
            anyhow::bail!("event_type cannot be empty");
        }
        if self.clear_suffixes.iter().any(|s| s.is_empty()) {
            anyhow::bail!("clear_suffixes cannot contain an empty suffix");
        }
        if self.event_classes.default_class.trim().is_empty() {
            anyhow::bail!("event_classes.default cannot be empty");
        }
        for (vendor, prefix) in &self.event_classes.vendors {
            if prefix.trim().is_empty() {
                anyhow::bail!("event_classes.{} has an empty OID prefix", vendor);
            }
        }

        self.compile().map(|_| ())
    }

    /// Compile rules, classifier and enrichment directives into an `EventBuilder`
    pub fn compile(&self) -> Result<EventBuilder> {
        let rules = RuleBook::compile(&self.extraction_rules, &self.default_extraction)?;
        debug!("Compiled extraction rules for {} trap OID(s)", rules.len());

        let e = &self.enrichments;
        let mut enrichments: [EnrichmentDirective; 5] = Default::default();
        for (idx, (slot, raw)) in enrichments
            .iter_mut()
            .zip([&e.enrich1, &e.enrich2, &e.enrich3, &e.enrich4, &e.enrich5])
            .enumerate()
        {
            *slot = EnrichmentDirective::parse(raw)
                .with_context(|| format!("Invalid enrichments.enrich{}", idx + 1))?;
        }

        Ok(EventBuilder::new(
            rules,
            VendorClassifier::new(
                self.event_classes.vendors.clone(),
                self.event_classes.default_class.clone(),
            ),
            ClearPolicy::new(self.clear_suffixes.clone()),
            enrichments,
            self.event_type.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_YAML: &str = r#"
listener:
  port: 1162
  bind_address: 127.0.0.1
  community_strings: [public, ops]
  snmp_version: [V2c]
  queue_size: 50
  blocked_oids: ["1.3.6.1.4.1.9.9.43.2.0.1"]
  blocked_senders: ["192.168.10.4"]
processor:
  extraction_rules:
    "1.3.6.1.4.1.9.9.41.2.0.1":
      instance_name: []
      event_name: []
      severity:
        - varbind_oid: "1.3.6.1.4.1.9.9.41.1.2.3.1.3"
          pattern: '(\d+)'
  default_extraction:
    instance_name: []
    event_name:
      - varbind_oid: "1.3.6.1.6.3.1.1.4.1.0"
        pattern: '(.+)'
    severity: []
  event_classes:
    juniper: "1.3.6.1.4.1.2636"
    default: NetworkAlert
    cisco: "1.3.6.1.4.1.9"
  enrichments:
    enrich1: "static:lab"
    enrich2: ""
    enrich3: "varbind:1.3.6.1.2.1.1.5.0"
    enrich4: ""
    enrich5: ""
status:
  enabled: false
  bind_address: 127.0.0.1
  port: 8081
logging:
  level: debug
  console_output: true
  file_output: null
"#;

    #[test]
    fn test_parse_yaml_keeps_vendor_order() {
        let config: Config = serde_yaml::from_str(SAMPLE_YAML).unwrap();

        assert_eq!(config.listener.port, 1162);
        assert_eq!(config.listener.max_packet_size, 8192);
        assert_eq!(config.processor.event_type, "SNMP_TRAP");
        assert_eq!(config.processor.clear_suffixes, vec![".0.1", ".0.2"]);
        assert_eq!(config.processor.event_classes.default_class, "NetworkAlert");
        assert_eq!(
            config.processor.event_classes.vendors,
            vec![
                ("juniper".to_string(), "1.3.6.1.4.1.2636".to_string()),
                ("cisco".to_string(), "1.3.6.1.4.1.9".to_string()),
            ]
        );
        assert_eq!(config.processor.enrichments.enrich2, "");
        assert_eq!(config.logging.rotation_strategy, "daily");
        config.validate().unwrap();
    }

    #[test]
    fn test_event_classes_without_default_is_rejected() {
        let yaml = SAMPLE_YAML.replace("    default: NetworkAlert\n", "");
        let err = serde_yaml::from_str::<Config>(&yaml).unwrap_err();
        assert!(err.to_string().contains("default"));
    }

    #[test]
    fn test_missing_required_section_is_rejected() {
        let yaml = SAMPLE_YAML.replace("  queue_size: 50\n", "");
        assert!(serde_yaml::from_str::<Config>(&yaml).is_err());
    }

    #[test]
    fn test_missing_rule_and_enrichment_keys_are_rejected() {
        let without_severity = SAMPLE_YAML.replacen("    severity: []\n", "", 1);
        let err = serde_yaml::from_str::<Config>(&without_severity).unwrap_err();
        assert!(err.to_string().contains("severity"));

        let empty_default = SAMPLE_YAML.replace(
            "  default_extraction:\n    instance_name: []\n",
            "  default_extraction: {}\n  unused_extraction:\n    instance_name: []\n",
        );
        assert!(serde_yaml::from_str::<Config>(&empty_default).is_err());

        let without_enrich4 = SAMPLE_YAML.replace("    enrich4: \"\"\n", "");
        let err = serde_yaml::from_str::<Config>(&without_enrich4).unwrap_err();
        assert!(err.to_string().contains("enrich4"));

        let without_block = SAMPLE_YAML.replace("  enrichments:\n", "  unused_enrichments:\n");
        let err = serde_yaml::from_str::<Config>(&without_block).unwrap_err();
        assert!(err.to_string().contains("enrichments"));
    }

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.listener.queue_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.listener.queue_size = usize::MAX;
        assert!(config.validate().is_err());
        config.listener.queue_size = MAX_QUEUE_SIZE;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.listener.blocked_senders = vec!["not-an-ip".to_string()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.processor.default_extraction.severity = vec![ExtractionRuleConfig {
            varbind_oid: "1.2.3".to_string(),
            pattern: "[unclosed(".to_string(),
        }];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.processor.enrichments.enrich4 = "lookup:site".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.status.port = 0;
        assert!(config.validate().is_err());
        config.status.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_compile_builds_working_event_builder() {
        let config: Config = serde_yaml::from_str(SAMPLE_YAML).unwrap();
        let builder = config.processor.compile().unwrap();

        let trap = crate::trap::DecodedTrap::new(
            "10.0.0.1",
            "2024-05-01T10:00:00Z",
            vec![
                crate::trap::Varbind::new("1.3.6.1.6.3.1.1.4.1.0", "1.3.6.1.4.1.9.9.41.2.0.1"),
                crate::trap::Varbind::new("1.3.6.1.4.1.9.9.41.1.2.3.1.3", "4"),
                crate::trap::Varbind::new("1.3.6.1.2.1.1.5.0", "lab-sw1"),
            ],
        );
        let event = builder.build(&trap).unwrap();

        assert_eq!(event.severity, "4");
        assert_eq!(event.event_name, "unknown");
        assert_eq!(event.event_class, "CiscoAlert");
        assert_eq!(event.enrich1.as_deref(), Some("lab"));
        assert_eq!(event.enrich2, None);
        assert_eq!(event.enrich3.as_deref(), Some("lab-sw1"));
        assert!(event.is_clear());
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip_both_formats() {
        let dir = tempfile::tempdir().unwrap();

        for name in ["trapline.yaml", "trapline.json"] {
            let path = dir.path().join("nested").join(name);
            Config::default().save_to_file(&path).await.unwrap();

            let loaded = Config::load_from_file(&path).await.unwrap();
            loaded.validate().unwrap();
            assert_eq!(
                loaded.processor.event_classes,
                ProcessorConfig::default().event_classes
            );
            assert_eq!(loaded.listener.queue_size, 1000);
        }
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_from_file(dir.path().join("absent.yaml")).await.is_err());
    }
}
