//! Firewall table access.
//!
//! The reconciler only needs three capabilities from the firewall: list a
//! chain, append a rule unless it is already there, and delete a rule.
//! [`FirewallTable`] captures exactly that so the core can run against an
//! in-memory table in tests; [`IptablesCmd`] is the production backend.

use std::fmt;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use tracing::{debug, instrument};

use docknat_common::shell::{self, quote_args, shellquote, IPTABLES_CMD};
use docknat_common::{NatError, NatResult};

use crate::mapping::{PortMapping, Protocol};
use crate::tables::{flags, DNAT_TARGET};

/// iptables exit status for "no such rule" on `-C` and `-D`.
const IPTABLES_RULE_ABSENT: i32 = 1;

/// One DNAT rule, in the form passed to `iptables -A/-C/-D`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleSpec {
    pub protocol: Protocol,
    pub public_port: u16,
    pub destination_address: Ipv4Addr,
    pub destination_port: u16,
    /// Arguments read back from the chain. Used verbatim when present.
    installed: Option<Vec<String>>,
}

impl RuleSpec {
    /// Builds the rule forwarding `mapping` for `protocol`.
    pub fn dnat(mapping: &PortMapping, protocol: Protocol) -> Self {
        Self {
            protocol,
            public_port: mapping.public_port,
            destination_address: mapping.bridge_address,
            destination_port: mapping.private_port,
            installed: None,
        }
    }

    /// The rule exactly as `mapping` was read from the chain, if it was.
    /// `iptables -D` only matches a rule given with all of its options.
    pub fn installed(mapping: &PortMapping) -> Option<Self> {
        let args = mapping.rule_args.clone()?;
        Some(Self {
            installed: Some(args),
            ..Self::dnat(mapping, mapping.protocol)
        })
    }

    /// Installed arguments, when this rule was read back from the chain.
    pub fn installed_args(&self) -> Option<&[String]> {
        self.installed.as_deref()
    }

    /// Rule arguments, without table and chain.
    pub fn args(&self) -> Vec<String> {
        if let Some(args) = &self.installed {
            return args.clone();
        }
        vec![
            flags::PROTOCOL.to_string(),
            self.protocol.to_string(),
            flags::DPORT.to_string(),
            self.public_port.to_string(),
            flags::JUMP.to_string(),
            DNAT_TARGET.to_string(),
            flags::TO_DESTINATION.to_string(),
            format!("{}:{}", self.destination_address, self.destination_port),
        ]
    }
}

impl fmt::Display for RuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.args().join(" "))
    }
}

/// Access to one netfilter table.
///
/// Implementations must make `append_unique` idempotent and report a delete
/// of an absent rule as [`NatError::RuleNotFound`].
#[async_trait]
pub trait FirewallTable: Send + Sync {
    /// Lists a chain in `iptables -S` form. The first line is the chain
    /// header.
    async fn list(&self, table: &str, chain: &str) -> NatResult<Vec<String>>;

    /// Appends `rule` unless an identical rule is already in the chain.
    async fn append_unique(&self, table: &str, chain: &str, rule: &RuleSpec) -> NatResult<()>;

    /// Deletes the first rule identical to `rule`.
    async fn delete(&self, table: &str, chain: &str, rule: &RuleSpec) -> NatResult<()>;
}

/// [`FirewallTable`] backed by the `iptables` command.
#[derive(Debug, Clone)]
pub struct IptablesCmd {
    binary: String,
}

impl IptablesCmd {
    /// Uses `/sbin/iptables`.
    pub fn new() -> Self {
        Self::with_binary(IPTABLES_CMD)
    }

    /// Uses a different iptables binary (e.g. `iptables-legacy`).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// `-w` waits for the xtables lock instead of failing when another
    /// process (dockerd) holds it.
    fn command(&self, op: &str, table: &str, chain: &str, rule: Option<&RuleSpec>) -> String {
        let mut cmd = format!(
            "{} -w -t {} {} {}",
            self.binary,
            shellquote(table),
            op,
            shellquote(chain)
        );
        if let Some(rule) = rule {
            cmd.push(' ');
            cmd.push_str(&quote_args(&rule.args()));
        }
        cmd
    }

    /// Returns true if `rule` is already in the chain.
    pub async fn exists(&self, table: &str, chain: &str, rule: &RuleSpec) -> NatResult<bool> {
        let cmd = self.command("-C", table, chain, Some(rule));
        let result = shell::exec(&cmd).await?;
        match result.exit_code {
            0 => Ok(true),
            IPTABLES_RULE_ABSENT => Ok(false),
            _ => Err(result.into_error(&cmd)),
        }
    }
}

impl Default for IptablesCmd {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FirewallTable for IptablesCmd {
    #[instrument(skip(self))]
    async fn list(&self, table: &str, chain: &str) -> NatResult<Vec<String>> {
        let cmd = self.command("-S", table, chain, None);
        let stdout = shell::exec_or_throw(&cmd).await?;
        Ok(stdout.lines().map(str::to_string).collect())
    }

    #[instrument(skip(self, rule), fields(rule = %rule))]
    async fn append_unique(&self, table: &str, chain: &str, rule: &RuleSpec) -> NatResult<()> {
        if self.exists(table, chain, rule).await? {
            debug!("Rule already present");
            return Ok(());
        }
        let cmd = self.command("-A", table, chain, Some(rule));
        shell::exec_or_throw(&cmd).await?;
        Ok(())
    }

    #[instrument(skip(self, rule), fields(rule = %rule))]
    async fn delete(&self, table: &str, chain: &str, rule: &RuleSpec) -> NatResult<()> {
        let cmd = self.command("-D", table, chain, Some(rule));
        let result = shell::exec(&cmd).await?;
        match result.exit_code {
            0 => Ok(()),
            IPTABLES_RULE_ABSENT => Err(NatError::rule_not_found(table, chain, rule.to_string())),
            _ => Err(result.into_error(&cmd)),
        }
    }
}
