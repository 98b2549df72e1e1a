//! The already-parsed, already-validated configuration tree the core
//! consumes (§1). Parsing itself (`TryFrom<&[u8]>` via `serde_yaml`) and
//! the invariant checks in `validate()` are the one piece of "parsing and
//! schema validation" the core still owns per §7 (`ConfigValidation`,
//! `ConfigReload`): the *zone-shape* invariants described below, not
//! the surrounding file-format/CLI plumbing.

pub mod records;

use std::collections::HashMap;

use log::LevelFilter;
use serde::Deserialize;

use crate::error::{Error, ErrorKind, Result};
use records::RecordsCollection;

pub const DEFAULT_CONFIG_PATH: &str = "./tungsten.yaml";
pub const DEFAULT_PORT: u16 = 53;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub zones: HashMap<String, ZoneConfig>,
    #[serde(default = "default_port")]
    pub default_port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LogConfig {
    pub fn level_filter(&self) -> LevelFilter {
        self.level.parse().unwrap_or(LevelFilter::Info)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ZoneConfig {
    #[serde(rename = "static_records")]
    pub static_records: RecordsCollection,
    pub forward_enabled: bool,
    pub forward_addresses: Vec<String>,
    pub tailnet: Option<TailnetConfig>,
    pub recursion_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TailnetConfig {
    pub machine_subdomain: String,
    pub cname_subdomain: String,
    #[serde(default = "default_ttl")]
    pub machine_ttl: u32,
    #[serde(default = "default_ttl")]
    pub cname_ttl: u32,
}

fn default_ttl() -> u32 {
    3600
}

impl TryFrom<&[u8]> for Config {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let config: Config = serde_yaml::from_slice(bytes)?;
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Checks the zone-shape invariants from the Data Model (§3). The shared
    /// Tailnet Directory handle being attached/detached with the
    /// `tailnet` field, is enforced by `ZoneInstance::initialize` rather
    /// than here, since it concerns runtime wiring, not the config shape.
    pub fn validate(&self) -> Result<()> {
        for (name, zone) in &self.zones {
            if !is_valid_zone_name(name) {
                return Err(Error::new(
                    ErrorKind::ConfigValidation,
                    format!("zone name {:?} must end with '.' and not start with '.' unless it is the root zone", name),
                ));
            }

            for subdomain in zone.static_records.subdomains() {
                if subdomain != subdomain.to_lowercase() {
                    return Err(Error::new(
                        ErrorKind::ConfigValidation,
                        format!(
                            "zone {:?}: static record key {:?} must be lowercase",
                            name, subdomain
                        ),
                    ));
                }
            }

            if zone.forward_enabled && zone.forward_addresses.is_empty() {
                return Err(Error::new(
                    ErrorKind::ConfigValidation,
                    format!(
                        "zone {:?}: forward_enabled is true but forward_addresses is empty",
                        name
                    ),
                ));
            }

            if let Some(tailnet) = &zone.tailnet {
                if !is_valid_subdomain_part(&tailnet.machine_subdomain) {
                    return Err(Error::new(
                        ErrorKind::ConfigValidation,
                        format!(
                            "zone {:?}: tailnet.machine_subdomain {:?} must begin and end with '.'",
                            name, tailnet.machine_subdomain
                        ),
                    ));
                }
                if !is_valid_subdomain_part(&tailnet.cname_subdomain) {
                    return Err(Error::new(
                        ErrorKind::ConfigValidation,
                        format!(
                            "zone {:?}: tailnet.cname_subdomain {:?} must begin and end with '.'",
                            name, tailnet.cname_subdomain
                        ),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Every zone name ends with `.` and does not start with `.` unless it
/// is the single character `.` (root).
pub fn is_valid_zone_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    if name.len() == 1 {
        return name == ".";
    }
    !name.starts_with('.') && name.ends_with('.')
}

/// Tailnet subdomain config strings must begin AND end with `.`
/// unless the single character `.`.
pub fn is_valid_subdomain_part(part: &str) -> bool {
    if part.is_empty() {
        return false;
    }
    if part.len() == 1 {
        return part == ".";
    }
    part.starts_with('.') && part.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_name_validation() {
        assert!(is_valid_zone_name("."));
        assert!(is_valid_zone_name("example.com."));
        assert!(!is_valid_zone_name("example.com"));
        assert!(!is_valid_zone_name(".example.com."));
        assert!(!is_valid_zone_name(""));
    }

    #[test]
    fn subdomain_part_validation() {
        assert!(is_valid_subdomain_part("."));
        assert!(is_valid_subdomain_part(".ts."));
        assert!(!is_valid_subdomain_part(".ts"));
        assert!(!is_valid_subdomain_part("ts."));
    }

    #[test]
    fn rejects_forward_enabled_without_addresses() {
        let yaml = r#"
zones:
  "example.com.":
    forward_enabled: true
    forward_addresses: []
"#;
        let err = Config::try_from(yaml.as_bytes()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConfigValidation);
    }

    #[test]
    fn rejects_uppercase_static_record_keys() {
        let yaml = r#"
zones:
  "example.com.":
    static_records:
      A:
        WWW:
          - address: "1.2.3.4"
"#;
        let err = Config::try_from(yaml.as_bytes()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConfigValidation);
    }

    #[test]
    fn accepts_minimal_valid_zone() {
        let yaml = r#"
zones:
  "example.com.":
    static_records:
      A:
        www:
          - address: "1.2.3.4"
            ttl: 300
"#;
        let config = Config::try_from(yaml.as_bytes()).unwrap();
        let zone = &config.zones["example.com."];
        assert_eq!(zone.static_records.a["www"][0].ttl, 300);
    }
}
