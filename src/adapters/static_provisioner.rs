//! Static Provisioner Adapter
//!
//! For nodes started outside the manager (systemd units, a compose file, a
//! StatefulSet) that join through `POST /cluster/register`. It cannot start
//! or stop anything; node health comes from the HTTP probe alone.

use async_trait::async_trait;
use tracing::debug;

use crate::domain::ports::{InventoryEntry, ProvisionedNode, Provisioner};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct StaticProvisioner;

impl StaticProvisioner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provisioner for StaticProvisioner {
    async fn create(&self, name: &str, _replica_count: usize) -> Result<Vec<ProvisionedNode>> {
        Err(Error::ProvisionerFailure(format!(
            "static provisioner cannot start node {}; start it externally and register it",
            name
        )))
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        debug!("Static node {} left running; stop it externally", id);
        Ok(())
    }

    async fn inventory(&self) -> Result<Vec<InventoryEntry>> {
        Ok(Vec::new())
    }

    fn tracks_lifecycle(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_static_provisioner_contract() {
        let provisioner = StaticProvisioner::new();
        assert_matches!(
            provisioner.create("a", 1).await,
            Err(Error::ProvisionerFailure(_))
        );
        provisioner.destroy("a").await.unwrap();
        assert!(provisioner.inventory().await.unwrap().is_empty());
        assert!(!provisioner.tracks_lifecycle());
    }
}
