//! In-memory collaborators for the integration suite.
//!
//! Both fakes are cheap handles over shared state, so a test can keep a
//! clone to inspect or poke at the table while a `NatMgr` owns the other.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use docknat_common::{NatError, NatResult};
use docknatd::{ContainerInfo, ContainerInspector, FirewallTable, PublishedPort, RuleSpec};

/// One iptables chain held in memory, listed the way `iptables -S` does.
#[derive(Debug, Clone, Default)]
pub struct FakeIptables {
    rules: Arc<Mutex<Vec<String>>>,
    unavailable: Arc<AtomicBool>,
    reject_port: Arc<Mutex<Option<u16>>>,
}

impl FakeIptables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from existing `-A ...` lines.
    pub fn with_rules(lines: &[&str]) -> Self {
        let fake = Self::new();
        fake.rules
            .lock()
            .unwrap()
            .extend(lines.iter().map(|l| l.to_string()));
        fake
    }

    /// Renders `rule` the way `iptables -S` prints it back.
    pub fn render(chain: &str, rule: &RuleSpec) -> String {
        if let Some(args) = rule.installed_args() {
            return format!("-A {} {}", chain, args.join(" "));
        }
        format!(
            "-A {} -p {proto} -m {proto} --dport {} -j DNAT --to-destination {}:{}",
            chain,
            rule.public_port,
            rule.destination_address,
            rule.destination_port,
            proto = rule.protocol,
        )
    }

    pub fn rules(&self) -> Vec<String> {
        self.rules.lock().unwrap().clone()
    }

    pub fn sorted_rules(&self) -> Vec<String> {
        let mut rules = self.rules();
        rules.sort();
        rules
    }

    /// Removes a rule behind the reconciler's back.
    pub fn remove_line(&self, line: &str) {
        self.rules.lock().unwrap().retain(|l| l != line);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes every append for `port` fail.
    pub fn reject_port(&self, port: Option<u16>) {
        *self.reject_port.lock().unwrap() = port;
    }

    fn check_available(&self) -> NatResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(NatError::unavailable("iptables", "simulated outage"));
        }
        Ok(())
    }
}

#[async_trait]
impl FirewallTable for FakeIptables {
    async fn list(&self, _table: &str, chain: &str) -> NatResult<Vec<String>> {
        self.check_available()?;
        let mut lines = vec![format!("-P {} ACCEPT", chain)];
        lines.extend(self.rules());
        Ok(lines)
    }

    async fn append_unique(&self, _table: &str, chain: &str, rule: &RuleSpec) -> NatResult<()> {
        self.check_available()?;
        if *self.reject_port.lock().unwrap() == Some(rule.public_port) {
            return Err(NatError::ShellCommandFailed {
                command: format!("iptables -A {} {}", chain, rule),
                exit_code: 2,
                output: "simulated rejection".to_string(),
            });
        }

        let line = Self::render(chain, rule);
        let mut rules = self.rules.lock().unwrap();
        if !rules.contains(&line) {
            rules.push(line);
        }
        Ok(())
    }

    async fn delete(&self, table: &str, chain: &str, rule: &RuleSpec) -> NatResult<()> {
        self.check_available()?;
        let line = Self::render(chain, rule);
        let mut rules = self.rules.lock().unwrap();
        match rules.iter().position(|l| *l == line) {
            Some(index) => {
                rules.remove(index);
                Ok(())
            }
            None => Err(NatError::rule_not_found(table, chain, rule.to_string())),
        }
    }
}

/// A container runtime whose containers the test sets directly.
#[derive(Debug, Clone, Default)]
pub struct FakeInspector {
    containers: Arc<Mutex<Vec<ContainerInfo>>>,
    unavailable: Arc<AtomicBool>,
}

impl FakeInspector {
    pub fn new(containers: Vec<ContainerInfo>) -> Self {
        Self {
            containers: Arc::new(Mutex::new(containers)),
            unavailable: Arc::default(),
        }
    }

    pub fn set_containers(&self, containers: Vec<ContainerInfo>) {
        *self.containers.lock().unwrap() = containers;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContainerInspector for FakeInspector {
    async fn list_containers(&self) -> NatResult<Vec<ContainerInfo>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(NatError::unavailable("docker", "simulated outage"));
        }
        Ok(self.containers.lock().unwrap().clone())
    }
}

/// A container on the `bridge` network publishing `(public, private, proto)`.
pub fn container(id: &str, address: &str, ports: &[(u16, u16, &str)]) -> ContainerInfo {
    ContainerInfo {
        id: id.to_string(),
        published_ports: ports
            .iter()
            .map(|&(public, private, protocol)| PublishedPort {
                ip: Some("0.0.0.0".to_string()),
                private_port: private,
                public_port: Some(public),
                protocol: protocol.to_string(),
            })
            .collect(),
        network_addresses: HashMap::from([("bridge".to_string(), address.to_string())]),
    }
}

/// Ten rules, tcp and udp for five port pairs.
pub const PAIRED_RULES: [&str; 10] = [
    "-A PREROUTING -p tcp -m tcp --dport 30134 -j DNAT --to-destination 172.17.0.5:8777",
    "-A PREROUTING -p udp -m udp --dport 30134 -j DNAT --to-destination 172.17.0.5:8777",
    "-A PREROUTING -p tcp -m tcp --dport 20023 -j DNAT --to-destination 172.17.0.4:9090",
    "-A PREROUTING -p udp -m udp --dport 20023 -j DNAT --to-destination 172.17.0.4:9090",
    "-A PREROUTING -p udp -m udp --dport 5432 -j DNAT --to-destination 172.17.0.2:5432",
    "-A PREROUTING -p tcp -m tcp --dport 5432 -j DNAT --to-destination 172.17.0.2:5432",
    "-A PREROUTING -p tcp -m tcp --dport 25790 -j DNAT --to-destination 172.17.0.8:80",
    "-A PREROUTING -p udp -m udp --dport 25790 -j DNAT --to-destination 172.17.0.8:80",
    "-A PREROUTING -p tcp -m tcp --dport 25412 -j DNAT --to-destination 172.17.0.6:80",
    "-A PREROUTING -p udp -m udp --dport 25412 -j DNAT --to-destination 172.17.0.6:80",
];

/// The same table with the tcp rules of 30134 and 20023 missing.
pub const INCOMPLETE_RULES: [&str; 8] = [
    "-A PREROUTING -p udp -m udp --dport 30134 -j DNAT --to-destination 172.17.0.5:8777",
    "-A PREROUTING -p udp -m udp --dport 20023 -j DNAT --to-destination 172.17.0.4:9090",
    "-A PREROUTING -p udp -m udp --dport 5432 -j DNAT --to-destination 172.17.0.2:5432",
    "-A PREROUTING -p tcp -m tcp --dport 5432 -j DNAT --to-destination 172.17.0.2:5432",
    "-A PREROUTING -p tcp -m tcp --dport 25790 -j DNAT --to-destination 172.17.0.8:80",
    "-A PREROUTING -p udp -m udp --dport 25790 -j DNAT --to-destination 172.17.0.8:80",
    "-A PREROUTING -p tcp -m tcp --dport 25412 -j DNAT --to-destination 172.17.0.6:80",
    "-A PREROUTING -p udp -m udp --dport 25412 -j DNAT --to-destination 172.17.0.6:80",
];
