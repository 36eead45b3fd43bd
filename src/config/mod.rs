//! Configuration types and loading
//!
//! The file is JSON: logging, an optional country database path, named
//! ingresses and egresses, named rules, and the route. Rules and the
//! route are applied to the router at startup and re-validated there;
//! `validate` catches the structural problems earlier, with file-level
//! context.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::router::{AdapterKind, Route, Rule};

/// Top-level configuration tree
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging options
    pub log: LogConfig,
    /// Path to the country database, if country rules are used
    pub geo_db: Option<PathBuf>,
    /// Client-facing listeners by name
    pub ingresses: HashMap<String, IngressConfig>,
    /// Outbound adapters by name
    pub egresses: HashMap<String, EgressConfig>,
    /// Named routing rules
    pub rules: HashMap<String, Rule>,
    /// Rule order and default egress
    pub route: Route,
}

/// Logging options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (`trace`..`error`)
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One client-facing listener
#[derive(Debug, Clone, Deserialize)]
pub struct IngressConfig {
    /// Adapter kind accepting the traffic
    pub kind: AdapterKind,
    /// Listen address
    pub listen: SocketAddr,
}

/// One outbound adapter
#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// Adapter kind initiating the traffic
    pub kind: AdapterKind,
    /// Next-hop host, required for proxy kinds
    #[serde(default)]
    pub host: Option<String>,
    /// Next-hop port, required for proxy kinds
    #[serde(default)]
    pub port: Option<u16>,
}

impl Config {
    /// Check cross-references and per-entry requirements
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first
    /// problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, ingress) in &self.ingresses {
            if ingress.kind != AdapterKind::Http {
                return Err(ConfigError::validation(format!(
                    "ingress '{name}': unsupported kind {}",
                    ingress.kind
                )));
            }
        }

        for (name, egress) in &self.egresses {
            match egress.kind {
                AdapterKind::Http => {
                    if egress.host.is_none() || egress.port.is_none() {
                        return Err(ConfigError::validation(format!(
                            "egress '{name}': http requires host and port"
                        )));
                    }
                }
                AdapterKind::Direct | AdapterKind::Reject => {}
                other => {
                    return Err(ConfigError::validation(format!(
                        "egress '{name}': unsupported kind {other}"
                    )));
                }
            }
        }

        for name in &self.route.rules {
            if !self.rules.contains_key(name) {
                return Err(ConfigError::validation(format!(
                    "route references unknown rule '{name}'"
                )));
            }
        }
        if let Some(default) = &self.route.default {
            if default != "direct" && default != "reject" && !self.egresses.contains_key(default) {
                return Err(ConfigError::validation(format!(
                    "route default references unknown egress '{default}'"
                )));
            }
        }

        Ok(())
    }
}

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns [`ConfigError`] if the file cannot be read, parsed, or
/// validated.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    debug!(path = %path.display(), "loading configuration");

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&contents)
        .map_err(|e| ConfigError::ParseError(format!("{e} in {}", path.display())))?;
    config.validate()?;

    info!(
        ingresses = config.ingresses.len(),
        egresses = config.egresses.len(),
        rules = config.rules.len(),
        "configuration loaded"
    );
    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns [`ConfigError`] if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "log": {"level": "debug"},
        "ingresses": {"main": {"kind": "http", "listen": "127.0.0.1:8118"}},
        "egresses": {"upstream": {"kind": "http", "host": "proxy.internal", "port": 3128}},
        "rules": {"internal": {"egress": "upstream", "domains": ["corp.example"]}},
        "route": {"rules": ["internal"], "default": "direct"}
    }"#;

    #[test]
    fn test_load_sample() {
        let config = load_config_str(SAMPLE).unwrap();
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.ingresses["main"].listen.port(), 8118);
        assert_eq!(config.egresses["upstream"].port, Some(3128));
        assert_eq!(config.route.rules, vec!["internal"]);
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = load_config_str("{}").unwrap();
        assert!(config.ingresses.is_empty());
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_http_egress_requires_address() {
        let json = r#"{"egresses": {"u": {"kind": "http"}}}"#;
        assert!(matches!(
            load_config_str(json),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_route_must_reference_known_rule() {
        let json = r#"{"route": {"rules": ["ghost"]}}"#;
        assert!(load_config_str(json).is_err());
    }

    #[test]
    fn test_route_default_must_be_known() {
        let json = r#"{"route": {"default": "ghost"}}"#;
        assert!(load_config_str(json).is_err());

        let json = r#"{"route": {"default": "reject"}}"#;
        assert!(load_config_str(json).is_ok());
    }

    #[test]
    fn test_unsupported_ingress_kind() {
        let json = r#"{"ingresses": {"s": {"kind": "socks5", "listen": "127.0.0.1:1080"}}}"#;
        assert!(load_config_str(json).is_err());
    }
}
