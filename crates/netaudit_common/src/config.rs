//! Audit run configuration
//!
//! Loaded from a TOML file; every section has serde defaults so a missing
//! or partial file still yields a usable configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

/// How IP address text is collapsed into a grouping key.
///
/// The backing stores are inconsistent about whether `10.0.0.1/24` and
/// `10.0.0.1` mean the same address, so the collapse rule is explicit
/// configuration rather than a hidden default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpKeyPolicy {
    /// Key on the host address only; prefix lengths are stripped.
    HostOnly,
    /// Key on the full CIDR text; `10.0.0.1/24` and `10.0.0.1/25` differ.
    WithPrefix,
}

impl Default for IpKeyPolicy {
    fn default() -> Self {
        Self::HostOnly
    }
}

impl IpKeyPolicy {
    /// Canonical grouping key for an address string.
    ///
    /// Parses through `std::net` so textual variants of one address
    /// (leading zeros, IPv6 case) map to the same key. Unparseable input
    /// falls back to the trimmed raw string so grouping stays total.
    pub fn canonical_key(&self, address: &str) -> String {
        let trimmed = address.trim();
        let (host, prefix) = match trimmed.split_once('/') {
            Some((host, prefix)) => (host, Some(prefix)),
            None => (trimmed, None),
        };
        match host.parse::<std::net::IpAddr>() {
            Ok(ip) => match (self, prefix) {
                (IpKeyPolicy::HostOnly, _) | (IpKeyPolicy::WithPrefix, None) => ip.to_string(),
                (IpKeyPolicy::WithPrefix, Some(prefix)) => format!("{}/{}", ip, prefix),
            },
            Err(_) => trimmed.to_string(),
        }
    }
}

/// Remediation executor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationConfig {
    /// Per-session deadline for opening and driving a device session.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,

    /// Upper bound on concurrently remediated targets.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_session_timeout_secs() -> u64 {
    30
}

fn default_max_concurrency() -> usize {
    4
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: default_session_timeout_secs(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Top-level audit configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub ip_key_policy: IpKeyPolicy,

    #[serde(default)]
    pub remediation: RemediationConfig,
}

impl AuditConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        debug!("Loaded audit config from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is
    /// missing. Parse errors still fail.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_only_collapses_prefix_forms() {
        let policy = IpKeyPolicy::HostOnly;
        assert_eq!(policy.canonical_key("10.0.0.1/24"), "10.0.0.1");
        assert_eq!(policy.canonical_key("10.0.0.1"), "10.0.0.1");
        assert_eq!(policy.canonical_key(" 10.0.0.1/32 "), "10.0.0.1");
    }

    #[test]
    fn test_with_prefix_keeps_prefix_distinct() {
        let policy = IpKeyPolicy::WithPrefix;
        assert_eq!(policy.canonical_key("10.0.0.1/24"), "10.0.0.1/24");
        assert_ne!(
            policy.canonical_key("10.0.0.1/24"),
            policy.canonical_key("10.0.0.1/25")
        );
    }

    #[test]
    fn test_canonical_key_normalizes_ipv6_case() {
        let policy = IpKeyPolicy::HostOnly;
        assert_eq!(
            policy.canonical_key("2001:DB8::1"),
            policy.canonical_key("2001:db8::1")
        );
    }

    #[test]
    fn test_canonical_key_unparseable_falls_back_to_raw() {
        let policy = IpKeyPolicy::HostOnly;
        assert_eq!(policy.canonical_key(" not-an-ip "), "not-an-ip");
    }

    #[test]
    fn test_config_defaults() {
        let config = AuditConfig::default();
        assert_eq!(config.ip_key_policy, IpKeyPolicy::HostOnly);
        assert_eq!(config.remediation.session_timeout_secs, 30);
        assert_eq!(config.remediation.max_concurrency, 4);
    }

    #[test]
    fn test_config_load_partial_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("netaudit.toml");
        fs::write(&path, "ip_key_policy = \"withprefix\"\n").unwrap();

        let config = AuditConfig::load(&path).unwrap();
        assert_eq!(config.ip_key_policy, IpKeyPolicy::WithPrefix);
        assert_eq!(config.remediation.max_concurrency, 4);
    }

    #[test]
    fn test_config_load_or_default_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = AuditConfig::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, AuditConfig::default());
    }
}
