//! NatMgr - keeps the DNAT chain in sync with the running containers.
//!
//! Every cycle reads the desired mappings from the container runtime and the
//! installed mappings from the firewall, diffs them, and applies the diff.
//! A cycle that cannot read either side changes nothing; the next tick
//! retries.

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use docknat_common::NatResult;

use crate::apply::{ApplyEngine, ApplyReport};
use crate::config::DocknatConfig;
use crate::diff::diff;
use crate::docker::{desired_mappings, ContainerInspector};
use crate::firewall::FirewallTable;
use crate::mapping::{MappingSet, MatchPolicy};
use crate::rule_parser::parse_listing;

/// Summary of one reconciliation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Desired mappings read from the container runtime.
    pub desired: usize,
    /// Mappings parsed from the installed chain.
    pub actual: usize,
    /// Mappings missing from the chain.
    pub to_add: usize,
    /// Stale mappings found in the chain.
    pub to_remove: usize,
    pub apply: ApplyReport,
}

impl CycleReport {
    /// Returns true if the cycle found nothing to change.
    pub fn in_sync(&self) -> bool {
        self.to_add == 0 && self.to_remove == 0
    }
}

/// Reconciles one chain of one table against one container network.
pub struct NatMgr<F, C> {
    firewall: F,
    inspector: C,
    table: String,
    chain: String,
    network: String,
    interval: Duration,
    policy: MatchPolicy,
    dry_run: bool,
    cycles: u64,
}

impl<F, C> NatMgr<F, C>
where
    F: FirewallTable,
    C: ContainerInspector,
{
    /// Creates a manager from a validated configuration.
    pub fn new(firewall: F, inspector: C, config: &DocknatConfig) -> Self {
        Self {
            firewall,
            inspector,
            table: config.iptables.table.clone(),
            chain: config.iptables.chain.clone(),
            network: config.docker.network.clone(),
            interval: config.interval(),
            policy: config.policy(),
            dry_run: config.reconcile.dry_run,
            cycles: 0,
        }
    }

    /// Overrides the configured dry-run setting.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn firewall(&self) -> &F {
        &self.firewall
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Number of cycles run so far, failed ones included.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Mappings the running containers ask for.
    pub async fn desired_mappings(&self) -> NatResult<MappingSet> {
        let containers = self.inspector.list_containers().await?;
        Ok(desired_mappings(&containers, &self.network))
    }

    /// Mappings currently installed in the chain.
    pub async fn actual_mappings(&self) -> NatResult<MappingSet> {
        let lines = self.firewall.list(&self.table, &self.chain).await?;
        Ok(parse_listing(lines))
    }

    /// Runs one read-diff-apply cycle.
    ///
    /// Errors only when a collaborator cannot be read; individual rule
    /// failures are counted in the report.
    #[instrument(skip(self), fields(cycle = self.cycles + 1))]
    pub async fn reconcile_once(&mut self) -> NatResult<CycleReport> {
        self.cycles += 1;

        let desired = self.desired_mappings().await?;
        let actual = self.actual_mappings().await?;
        let changes = diff(&desired, &actual, &self.policy);

        let mut report = CycleReport {
            desired: desired.len(),
            actual: actual.len(),
            to_add: changes.to_add.len(),
            to_remove: changes.to_remove.len(),
            apply: ApplyReport::default(),
        };

        if changes.is_empty() {
            debug!(mappings = report.desired, "Chain in sync");
            return Ok(report);
        }

        for mapping in &changes.to_remove {
            debug!(mapping = %mapping, "Stale mapping");
        }
        for mapping in &changes.to_add {
            debug!(mapping = %mapping, "Missing mapping");
        }

        report.apply = ApplyEngine::new(&self.firewall, &self.table, &self.chain, self.policy)
            .with_dry_run(self.dry_run)
            .apply(&changes)
            .await;

        info!(
            desired = report.desired,
            actual = report.actual,
            added = report.apply.added,
            removed = report.apply.removed,
            failed = report.apply.failed,
            "Reconciled chain"
        );
        if !report.apply.is_clean() {
            warn!(failed = report.apply.failed, "Some rules failed, retrying next cycle");
        }

        Ok(report)
    }

    /// Reconciles every interval until `shutdown` is cancelled.
    ///
    /// The first cycle runs immediately. Cancellation is only observed
    /// between cycles, so a cycle in progress always finishes.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!(
            table = %self.table,
            chain = %self.chain,
            network = %self.network,
            interval_secs = self.interval.as_secs(),
            dry_run = self.dry_run,
            "Starting reconciliation loop"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.reconcile_once().await {
                error!(error = %e, "Reconciliation cycle failed");
            }
        }

        info!(cycles = self.cycles, "Reconciliation loop stopped");
    }
}
