//! mockall doubles for the collaborator traits.

use async_trait::async_trait;
use mockall::mock;

use docknat_common::NatResult;

use crate::docker::{ContainerInfo, ContainerInspector};
use crate::firewall::{FirewallTable, RuleSpec};

mock! {
    pub Firewall {}

    #[async_trait]
    impl FirewallTable for Firewall {
        async fn list(&self, table: &str, chain: &str) -> NatResult<Vec<String>>;
        async fn append_unique(&self, table: &str, chain: &str, rule: &RuleSpec) -> NatResult<()>;
        async fn delete(&self, table: &str, chain: &str, rule: &RuleSpec) -> NatResult<()>;
    }
}

mock! {
    pub Inspector {}

    #[async_trait]
    impl ContainerInspector for Inspector {
        async fn list_containers(&self) -> NatResult<Vec<ContainerInfo>>;
    }
}
