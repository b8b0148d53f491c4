//! Docker NAT synchronisation daemon.
//!
//! This crate implements the `docknatd` daemon, which keeps the iptables
//! DNAT rules of one chain in line with the ports published by the running
//! Docker containers.
//!
//! # Responsibilities
//!
//! - Read the published ports of running containers on one Docker network
//! - Parse the DNAT rules installed in the chain back into mappings
//! - Add missing rules and remove stale ones, every interval
//!
//! # Defaults
//!
//! | Setting | Value |
//! |---------|-------|
//! | Table | `nat` |
//! | Chain | `PREROUTING` |
//! | Network | `bridge` |
//! | Interval | 5 s |
//!
//! # Example
//!
//! ```ignore
//! use docknatd::{DocknatConfig, DockerInspector, IptablesCmd, NatMgr};
//!
//! let config = DocknatConfig::load()?;
//! let mut mgr = NatMgr::new(IptablesCmd::new(), DockerInspector::connect().await?, &config);
//! mgr.run(shutdown).await;
//! ```

pub mod apply;
pub mod config;
pub mod diff;
pub mod docker;
pub mod firewall;
pub mod mapping;
mod nat_mgr;
pub mod rule_parser;
mod tables;

#[cfg(test)]
mod mocks;

pub use apply::{ApplyEngine, ApplyReport};
pub use config::DocknatConfig;
pub use diff::{diff, Diff};
pub use docker::{ContainerInfo, ContainerInspector, DockerInspector, PublishedPort};
pub use firewall::{FirewallTable, IptablesCmd, RuleSpec};
pub use mapping::{Equivalence, MappingSet, MatchPolicy, PortMapping, Protocol};
pub use nat_mgr::{CycleReport, NatMgr};
pub use tables::*;
