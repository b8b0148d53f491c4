//! Applies a [`Diff`] to the firewall, one rule at a time.
//!
//! A failed rule is logged and counted, and the batch moves on. There is no
//! rollback: whatever is left unconverged stays in the next cycle's diff.

use std::collections::HashSet;

use tracing::{error, info, warn};

use crate::diff::Diff;
use crate::firewall::{FirewallTable, RuleSpec};
use crate::mapping::{MappingSet, MatchPolicy};

/// Outcome counts of one apply pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Rules appended (or already present).
    pub added: usize,
    /// Rules deleted.
    pub removed: usize,
    /// Deletes that found no matching rule.
    pub not_found: usize,
    /// Appends or deletes that failed.
    pub failed: usize,
    /// Operations skipped because of dry-run mode.
    pub planned: usize,
}

impl ApplyReport {
    /// Returns true if no operation failed.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Expands mappings into rule specs, one per protocol, without duplicates.
pub fn rules_for(mappings: &MappingSet, policy: &MatchPolicy) -> Vec<RuleSpec> {
    let mut seen = HashSet::new();
    mappings
        .iter()
        .flat_map(|m| {
            policy
                .protocols_for(m)
                .into_iter()
                .map(move |protocol| RuleSpec::dnat(m, protocol))
        })
        .filter(|rule| seen.insert(rule.clone()))
        .collect()
}

/// Rule specs that delete `mappings`.
///
/// Mappings read back from the chain are deleted exactly as installed, one
/// rule each; every installed rule of a stale pair is its own mapping.
/// Others expand per protocol like [`rules_for`].
pub fn removal_rules_for(mappings: &MappingSet, policy: &MatchPolicy) -> Vec<RuleSpec> {
    let mut seen = HashSet::new();
    mappings
        .iter()
        .flat_map(|m| match RuleSpec::installed(m) {
            Some(rule) => vec![rule],
            None => policy
                .protocols_for(m)
                .into_iter()
                .map(|protocol| RuleSpec::dnat(m, protocol))
                .collect(),
        })
        .filter(|rule| seen.insert(rule.clone()))
        .collect()
}

/// Mutates one chain of a [`FirewallTable`].
pub struct ApplyEngine<'a, F: FirewallTable + ?Sized> {
    firewall: &'a F,
    table: &'a str,
    chain: &'a str,
    policy: MatchPolicy,
    dry_run: bool,
}

impl<'a, F: FirewallTable + ?Sized> ApplyEngine<'a, F> {
    pub fn new(firewall: &'a F, table: &'a str, chain: &'a str, policy: MatchPolicy) -> Self {
        Self {
            firewall,
            table,
            chain,
            policy,
            dry_run: false,
        }
    }

    /// Log operations instead of performing them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Applies removals, then additions.
    pub async fn apply(&self, diff: &Diff) -> ApplyReport {
        let mut report = ApplyReport::default();
        self.remove(&diff.to_remove, &mut report).await;
        self.add(&diff.to_add, &mut report).await;
        report
    }

    /// Deletes the rules of every mapping in `mappings`.
    pub async fn remove(&self, mappings: &MappingSet, report: &mut ApplyReport) {
        for rule in removal_rules_for(mappings, &self.policy) {
            if self.dry_run {
                info!(rule = %rule, "Would remove rule");
                report.planned += 1;
                continue;
            }

            match self.firewall.delete(self.table, self.chain, &rule).await {
                Ok(()) => {
                    info!(rule = %rule, "Removed rule");
                    report.removed += 1;
                }
                Err(e) if e.is_not_found() => {
                    warn!(rule = %rule, "Rule match not found, skipping removal");
                    report.not_found += 1;
                }
                Err(e) => {
                    error!(rule = %rule, error = %e, "Failed to remove rule");
                    report.failed += 1;
                }
            }
        }
    }

    /// Installs the rules of every mapping in `mappings`.
    pub async fn add(&self, mappings: &MappingSet, report: &mut ApplyReport) {
        for rule in rules_for(mappings, &self.policy) {
            if self.dry_run {
                info!(rule = %rule, "Would add rule");
                report.planned += 1;
                continue;
            }

            match self.firewall.append_unique(self.table, self.chain, &rule).await {
                Ok(()) => {
                    info!(rule = %rule, "Added rule");
                    report.added += 1;
                }
                Err(e) => {
                    error!(rule = %rule, error = %e, "Failed to add rule");
                    report.failed += 1;
                }
            }
        }
    }
}
