//! Configuration file support for docknatd.
//!
//! Loads and validates the daemon configuration from a TOML file.
//! Default location: /etc/docknat/docknat.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use docknat_common::{NatError, NatResult};

use crate::mapping::{Equivalence, MatchPolicy};
use crate::tables;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/docknat/docknat.toml";

/// Firewall table configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IptablesConfig {
    /// Netfilter table holding the forwarding rules
    #[serde(default = "default_table")]
    pub table: String,

    /// Chain the forwarding rules live in
    #[serde(default = "default_chain")]
    pub chain: String,
}

/// Container runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Docker network whose container addresses are forwarded to
    #[serde(default = "default_network")]
    pub network: String,
}

/// Reconciliation loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Seconds between reconciliation cycles
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// How installed rules are matched against container ports
    #[serde(default)]
    pub equivalence: Equivalence,

    /// Install tcp and udp rules together for every mapping
    #[serde(default = "default_paired_protocols")]
    pub paired_protocols: bool,

    /// Log planned changes without applying them
    #[serde(default)]
    pub dry_run: bool,
}

/// Complete docknatd configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocknatConfig {
    #[serde(default)]
    pub iptables: IptablesConfig,

    #[serde(default)]
    pub docker: DockerConfig,

    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

fn default_table() -> String {
    tables::NAT_TABLE_NAME.to_string()
}

fn default_chain() -> String {
    tables::PREROUTING_CHAIN_NAME.to_string()
}

fn default_network() -> String {
    tables::DEFAULT_BRIDGE_NETWORK.to_string()
}

fn default_interval() -> u64 {
    5
}

fn default_paired_protocols() -> bool {
    true
}

impl Default for IptablesConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            chain: default_chain(),
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            equivalence: Equivalence::default(),
            paired_protocols: default_paired_protocols(),
            dry_run: false,
        }
    }
}

impl DocknatConfig {
    /// Reads `path`. A missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> NatResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                NatError::invalid_config(
                    path.display().to_string(),
                    format!("failed to parse: {}", e),
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(NatError::Io(e)),
        }
    }

    /// Reads [`DEFAULT_CONFIG_PATH`].
    pub fn load() -> NatResult<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Interval between cycles as Duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.reconcile.interval_secs)
    }

    /// Matching policy for the diff and apply steps
    pub fn policy(&self) -> MatchPolicy {
        MatchPolicy {
            equivalence: self.reconcile.equivalence,
            paired_protocols: self.reconcile.paired_protocols,
        }
    }

    /// Rejects empty names and a zero interval.
    pub fn validate(&self) -> NatResult<()> {
        if self.iptables.table.trim().is_empty() {
            return Err(NatError::invalid_config("iptables.table", "must not be empty"));
        }

        if self.iptables.chain.trim().is_empty() {
            return Err(NatError::invalid_config("iptables.chain", "must not be empty"));
        }

        if self.docker.network.trim().is_empty() {
            return Err(NatError::invalid_config("docker.network", "must not be empty"));
        }

        if self.reconcile.interval_secs == 0 {
            return Err(NatError::invalid_config(
                "reconcile.interval_secs",
                "must be > 0",
            ));
        }

        Ok(())
    }
}
