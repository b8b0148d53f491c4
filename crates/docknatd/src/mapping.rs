//! Port mapping records and the sets the reconciler compares.
//!
//! A [`PortMapping`] is a plain value: it has no identity beyond its fields,
//! and two mappings with the same rule content are interchangeable.
//! Whether two *different* mappings describe the same forwarding rule is
//! decided by a [`MatchPolicy`].

use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Transport protocol of a forwarding rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Both protocols, in the order rules are installed when paired.
    pub const ALL: [Protocol; 2] = [Protocol::Tcp, Protocol::Udp];

    /// Returns the name as used by iptables and Docker.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol name other than `tcp` or `udp`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported protocol '{0}'")]
pub struct UnsupportedProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnsupportedProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(UnsupportedProtocol(s.to_string())),
        }
    }
}

/// One forwarded port: `public_port` on the host lands on
/// `bridge_address:private_port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortMapping {
    /// Container address on the bridge network.
    pub bridge_address: Ipv4Addr,
    /// Host port, 0 means unknown.
    pub public_port: u16,
    /// Container port, 0 means unknown.
    pub private_port: u16,
    /// Transport protocol.
    pub protocol: Protocol,
    /// Host address the publication was bound to. Informational only.
    pub source_address: Option<String>,
    /// Arguments of the installed rule (without `-A <chain>`), for mappings
    /// read back from the firewall.
    pub rule_args: Option<Vec<String>>,
}

impl PortMapping {
    /// Creates a mapping with no source address.
    pub fn new(
        bridge_address: Ipv4Addr,
        public_port: u16,
        private_port: u16,
        protocol: Protocol,
    ) -> Self {
        Self {
            bridge_address,
            public_port,
            private_port,
            protocol,
            source_address: None,
            rule_args: None,
        }
    }

    /// Attaches the host address the port was published on.
    pub fn with_source_address(mut self, source_address: impl Into<String>) -> Self {
        self.source_address = Some(source_address.into());
        self
    }

    /// Records the arguments the rule was installed with.
    pub fn with_rule_args(mut self, args: impl Into<Vec<String>>) -> Self {
        self.rule_args = Some(args.into());
        self
    }

    /// Returns true if both ports are known. Only live mappings may reach the
    /// diff.
    pub fn is_live(&self) -> bool {
        self.public_port != 0 && self.private_port != 0
    }

    /// The fields that end up in the installed rule.
    fn rule_content(&self) -> (Ipv4Addr, u16, u16, Protocol, Option<&[String]>) {
        (
            self.bridge_address,
            self.public_port,
            self.private_port,
            self.protocol,
            self.rule_args.as_deref(),
        )
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{} -> {}:{}",
            self.source_address.as_deref().unwrap_or("*"),
            self.public_port,
            self.protocol,
            self.bridge_address,
            self.private_port
        )
    }
}

/// How strictly two mappings must agree to count as the same rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Equivalence {
    /// Public and private port only. A backend address change with
    /// unchanged ports is not detected.
    #[default]
    Loose,
    /// Ports plus bridge address, and protocol unless protocols are paired.
    Strict,
}

/// Identity of a mapping under a [`MatchPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MappingKey {
    pub public_port: u16,
    pub private_port: u16,
    pub bridge_address: Option<Ipv4Addr>,
    pub protocol: Option<Protocol>,
}

/// Equivalence policy used by the diff and apply steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchPolicy {
    pub equivalence: Equivalence,
    /// Install and remove tcp and udp together for every mapping.
    pub paired_protocols: bool,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            equivalence: Equivalence::Loose,
            paired_protocols: true,
        }
    }
}

impl MatchPolicy {
    /// Computes the comparison key of a mapping.
    pub fn key(&self, mapping: &PortMapping) -> MappingKey {
        let strict = self.equivalence == Equivalence::Strict;
        MappingKey {
            public_port: mapping.public_port,
            private_port: mapping.private_port,
            bridge_address: strict.then_some(mapping.bridge_address),
            protocol: (strict && !self.paired_protocols).then_some(mapping.protocol),
        }
    }

    /// Returns true if both mappings describe the same forwarding rule.
    pub fn equivalent(&self, a: &PortMapping, b: &PortMapping) -> bool {
        self.key(a) == self.key(b)
    }

    /// Protocols a mapping expands to when it is installed or removed.
    pub fn protocols_for(&self, mapping: &PortMapping) -> Vec<Protocol> {
        if self.paired_protocols {
            Protocol::ALL.to_vec()
        } else {
            vec![mapping.protocol]
        }
    }
}

/// Ordered collection of mappings, one entry per distinct rule content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingSet {
    mappings: Vec<PortMapping>,
}

impl MappingSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a mapping. Returns false if a mapping with the same rule
    /// content is already present (only `source_address` may differ).
    /// Installed rules that differ in their extra options are kept apart.
    pub fn insert(&mut self, mapping: PortMapping) -> bool {
        let content = mapping.rule_content();
        if self.mappings.iter().any(|m| m.rule_content() == content) {
            return false;
        }
        self.mappings.push(mapping);
        true
    }

    /// Drops mappings with a zero port, logging each one. Returns the number
    /// dropped.
    pub fn retain_live(&mut self, origin: &str) -> usize {
        let before = self.mappings.len();
        self.mappings.retain(|m| {
            if !m.is_live() {
                warn!(origin = %origin, mapping = %m, "Dropping mapping with port 0");
            }
            m.is_live()
        });
        before - self.mappings.len()
    }

    /// Returns true if any member is equivalent to `mapping` under `policy`.
    pub fn contains_equivalent(&self, policy: &MatchPolicy, mapping: &PortMapping) -> bool {
        let key = policy.key(mapping);
        self.mappings.iter().any(|m| policy.key(m) == key)
    }

    /// Returns the set of keys of all members under `policy`.
    pub fn keys(&self, policy: &MatchPolicy) -> HashSet<MappingKey> {
        self.mappings.iter().map(|m| policy.key(m)).collect()
    }

    /// Number of mappings.
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Returns true if there are no mappings.
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Iterates in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, PortMapping> {
        self.mappings.iter()
    }
}

impl FromIterator<PortMapping> for MappingSet {
    fn from_iter<I: IntoIterator<Item = PortMapping>>(iter: I) -> Self {
        let mut set = MappingSet::new();
        set.extend(iter);
        set
    }
}

impl Extend<PortMapping> for MappingSet {
    fn extend<I: IntoIterator<Item = PortMapping>>(&mut self, iter: I) {
        for mapping in iter {
            self.insert(mapping);
        }
    }
}

impl IntoIterator for MappingSet {
    type Item = PortMapping;
    type IntoIter = std::vec::IntoIter<PortMapping>;

    fn into_iter(self) -> Self::IntoIter {
        self.mappings.into_iter()
    }
}

impl<'a> IntoIterator for &'a MappingSet {
    type Item = &'a PortMapping;
    type IntoIter = std::slice::Iter<'a, PortMapping>;

    fn into_iter(self) -> Self::IntoIter {
        self.mappings.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(addr: [u8; 4], public: u16, private: u16, protocol: Protocol) -> PortMapping {
        PortMapping::new(Ipv4Addr::from(addr), public, private, protocol)
    }

    #[test]
    fn test_protocol_from_str() {
        assert_eq!("tcp".parse::<Protocol>(), Ok(Protocol::Tcp));
        assert_eq!("UDP".parse::<Protocol>(), Ok(Protocol::Udp));
        assert_eq!(
            "sctp".parse::<Protocol>(),
            Err(UnsupportedProtocol("sctp".to_string()))
        );
    }

    #[test]
    fn test_is_live() {
        assert!(mapping([172, 17, 0, 2], 80, 8080, Protocol::Tcp).is_live());
        assert!(!mapping([172, 17, 0, 2], 0, 8080, Protocol::Tcp).is_live());
        assert!(!mapping([172, 17, 0, 2], 80, 0, Protocol::Tcp).is_live());
    }

    #[test]
    fn test_display() {
        let m = mapping([172, 17, 0, 5], 30134, 8777, Protocol::Udp)
            .with_source_address("0.0.0.0");
        assert_eq!(m.to_string(), "0.0.0.0:30134/udp -> 172.17.0.5:8777");
    }

    #[test]
    fn test_loose_key_ignores_address_and_protocol() {
        let policy = MatchPolicy::default();
        let a = mapping([172, 17, 0, 2], 5432, 5432, Protocol::Tcp);
        let b = mapping([172, 17, 0, 9], 5432, 5432, Protocol::Udp);
        assert!(policy.equivalent(&a, &b));

        let c = mapping([172, 17, 0, 2], 5432, 5433, Protocol::Tcp);
        assert!(!policy.equivalent(&a, &c));
    }

    #[test]
    fn test_strict_key() {
        let paired = MatchPolicy {
            equivalence: Equivalence::Strict,
            paired_protocols: true,
        };
        let single = MatchPolicy {
            equivalence: Equivalence::Strict,
            paired_protocols: false,
        };
        let a = mapping([172, 17, 0, 2], 80, 80, Protocol::Tcp);
        let moved = mapping([172, 17, 0, 3], 80, 80, Protocol::Tcp);
        let udp = mapping([172, 17, 0, 2], 80, 80, Protocol::Udp);

        assert!(!paired.equivalent(&a, &moved));
        assert!(paired.equivalent(&a, &udp));
        assert!(!single.equivalent(&a, &udp));
    }

    #[test]
    fn test_protocols_for() {
        let m = mapping([172, 17, 0, 2], 80, 80, Protocol::Udp);
        assert_eq!(
            MatchPolicy::default().protocols_for(&m),
            vec![Protocol::Tcp, Protocol::Udp]
        );
        let single = MatchPolicy {
            paired_protocols: false,
            ..MatchPolicy::default()
        };
        assert_eq!(single.protocols_for(&m), vec![Protocol::Udp]);
    }

    #[test]
    fn test_set_dedups_on_rule_content() {
        let mut set = MappingSet::new();
        assert!(set.insert(
            mapping([172, 17, 0, 2], 80, 8080, Protocol::Tcp).with_source_address("0.0.0.0")
        ));
        assert!(!set.insert(
            mapping([172, 17, 0, 2], 80, 8080, Protocol::Tcp).with_source_address("::")
        ));
        assert!(set.insert(mapping([172, 17, 0, 2], 80, 8080, Protocol::Udp)));
        assert!(set.insert(
            mapping([172, 17, 0, 2], 80, 8080, Protocol::Tcp).with_rule_args(["-i", "eth0"].map(String::from))
        ));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_retain_live() {
        let mut set: MappingSet = vec![
            mapping([172, 17, 0, 2], 80, 8080, Protocol::Tcp),
            mapping([172, 17, 0, 3], 0, 8080, Protocol::Tcp),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.retain_live("test"), 1);
        assert_eq!(set.len(), 1);
        assert!(set.iter().all(PortMapping::is_live));
    }
}
