//! Desired versus actual mapping comparison.

use crate::mapping::{MappingSet, MatchPolicy};

/// Changes needed to bring the actual table to the desired state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// Desired mappings with no equivalent installed rule.
    pub to_add: MappingSet,
    /// Installed mappings with no equivalent desired mapping.
    pub to_remove: MappingSet,
}

impl Diff {
    /// Returns true if nothing needs to change.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Classifies mappings as to-add or to-remove under `policy`.
///
/// Mappings whose keys appear on both sides are left alone even when their
/// non-key fields differ. Output keeps the input order.
pub fn diff(desired: &MappingSet, actual: &MappingSet, policy: &MatchPolicy) -> Diff {
    let desired_keys = desired.keys(policy);
    let actual_keys = actual.keys(policy);

    let to_add = desired
        .iter()
        .filter(|m| !actual_keys.contains(&policy.key(m)))
        .cloned()
        .collect();
    let to_remove = actual
        .iter()
        .filter(|m| !desired_keys.contains(&policy.key(m)))
        .cloned()
        .collect();

    Diff { to_add, to_remove }
}
