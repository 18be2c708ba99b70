//! Node Registry
//!
//! Topology changes: creating masters with replicas through the provisioner,
//! registering externally started nodes, deleting masters (with or without a
//! data hand-off), and rebuilding the registry from the provisioner's
//! inventory at startup.
//!
//! New masters enter the ring as `Initializing`. Their data arrives later,
//! when the health monitor first sees them Online.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::node::{normalize_address, Node};
use super::rebalance::RebalanceCoordinator;
use super::state::ClusterState;
use crate::domain::{ClusterEvent, EventPublisher, NodeRole, ProvisionedNode, Provisioner};
use crate::error::{Error, Result};
use crate::metrics;

/// Smallest accepted copy count (master only)
pub const MIN_REPLICA_COUNT: usize = 1;

/// Largest accepted copy count
pub const MAX_REPLICA_COUNT: usize = 10;

/// Result of removing a master
#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    /// Name of the removed master
    pub removed: String,

    /// Whether the data hand-off was skipped
    pub forced: bool,

    /// Keys handed to the successor
    pub moved_keys: usize,

    /// Nodes whose process could not be torn down
    pub failed_teardown: Vec<String>,
}

/// Creates, registers, deletes and restores masters
pub struct NodeRegistry {
    state: Arc<ClusterState>,
    provisioner: Arc<dyn Provisioner>,
    rebalancer: Arc<RebalanceCoordinator>,
    events: Arc<dyn EventPublisher>,
}

impl NodeRegistry {
    pub fn new(
        state: Arc<ClusterState>,
        provisioner: Arc<dyn Provisioner>,
        rebalancer: Arc<RebalanceCoordinator>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            state,
            provisioner,
            rebalancer,
            events,
        }
    }

    pub fn state(&self) -> &Arc<ClusterState> {
        &self.state
    }

    /// Provision a master plus `replica_count - 1` replicas and put the master
    /// on the ring.
    #[instrument(skip(self))]
    pub async fn create_node(&self, name: &str, replica_count: usize) -> Result<Vec<ProvisionedNode>> {
        if !(MIN_REPLICA_COUNT..=MAX_REPLICA_COUNT).contains(&replica_count) {
            return Err(Error::InvalidTopologyRequest(format!(
                "replica count must be between {} and {}, got {}",
                MIN_REPLICA_COUNT, MAX_REPLICA_COUNT, replica_count
            )));
        }
        if name.trim().is_empty() {
            return Err(Error::InvalidTopologyRequest(
                "node name must not be empty".to_string(),
            ));
        }
        if self.state.master(name).is_some() {
            return Err(Error::InvalidTopologyRequest(format!(
                "node {} is already registered",
                name
            )));
        }

        let provisioned = self
            .provisioner
            .create(name, replica_count)
            .await
            .map_err(|e| match e {
                Error::ProvisionerFailure(_) | Error::InvalidTopologyRequest(_) => e,
                other => Error::ProvisionerFailure(other.to_string()),
            })?;

        let Some((master, replicas)) = provisioned.split_first() else {
            return Err(Error::ProvisionerFailure(format!(
                "provisioner {} returned no nodes for {}",
                self.provisioner.name(),
                name
            )));
        };

        if master.name != name {
            self.discard(&provisioned).await;
            return Err(Error::ProvisionerFailure(format!(
                "provisioner {} named the master {} instead of {}",
                self.provisioner.name(),
                master.name,
                name
            )));
        }

        let node = master.clone().into_node().with_replicas(
            replicas.iter().cloned().map(ProvisionedNode::into_node).collect(),
        );
        if let Err(e) = self.admit(node).await {
            self.discard(&provisioned).await;
            return Err(e);
        }

        info!(
            "Created node {} with {} replicas via {}",
            master.name,
            replicas.len(),
            self.provisioner.name()
        );
        Ok(provisioned)
    }

    /// Remove a master. Unless `force` is set its data is first handed to the
    /// ring successor; a failed hand-off leaves the node in place.
    #[instrument(skip(self))]
    pub async fn delete_node(&self, name: &str, force: bool) -> Result<DeleteOutcome> {
        let master = self
            .state
            .master(name)
            .ok_or_else(|| Error::NotFound(format!("node {}", name)))?;

        let moved_keys = if force {
            info!("Force-deleting {} without moving its data", name);
            0
        } else {
            self.rebalancer.rebalance_before_delete(name).await?.moved_keys
        };

        self.state.remove_master(name);
        metrics::REGISTERED_MASTERS.set(self.state.len() as i64);

        let failed_teardown = self
            .teardown(master.write_set().map(|n| (n.name.clone(), n.id.clone())))
            .await;

        self.publish(ClusterEvent::NodeRemoved {
            name: name.to_string(),
            forced: force,
            failed_teardown: failed_teardown.clone(),
            timestamp: Utc::now(),
        })
        .await;

        Ok(DeleteOutcome {
            removed: name.to_string(),
            forced: force,
            moved_keys,
            failed_teardown,
        })
    }

    /// Register an externally started node as a master.
    ///
    /// Re-registering a known address returns the existing record.
    #[instrument(skip(self))]
    pub async fn register(&self, name: &str, address: &str) -> Result<Node> {
        let address = normalize_address(address);
        if name.trim().is_empty() || address.is_empty() {
            return Err(Error::InvalidTopologyRequest(
                "name and address are required".to_string(),
            ));
        }

        if let Some(existing) = self.state.find_by_address(&address) {
            info!("Address {} already registered as {}", address, existing.name);
            return Ok(existing);
        }

        if let Some(existing) = self.state.master(name) {
            return Err(Error::InvalidTopologyRequest(format!(
                "node {} is already registered at {}",
                name, existing.address
            )));
        }

        let node = Node::new(name, name, address);
        self.admit(node.clone()).await?;
        Ok(node)
    }

    /// Rebuild the registry from the provisioner's inventory.
    ///
    /// Returns the number of masters restored. Already registered masters
    /// are left alone.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Result<usize> {
        let inventory = self.provisioner.inventory().await?;

        let mut restored = 0;
        for entry in inventory.iter().filter(|e| e.role == NodeRole::Master) {
            if self.state.master(&entry.name).is_some() {
                continue;
            }

            let replicas: Vec<Node> = inventory
                .iter()
                .filter(|e| matches!(&e.role, NodeRole::Replica { master } if *master == entry.name))
                .map(|e| Node::new(e.name.clone(), e.id.clone(), e.address.clone()))
                .collect();

            let node = Node::new(entry.name.clone(), entry.id.clone(), entry.address.clone())
                .with_replicas(replicas);
            self.admit(node).await?;
            restored += 1;
        }

        for entry in &inventory {
            if let NodeRole::Replica { master } = &entry.role {
                if !inventory.iter().any(|e| e.role == NodeRole::Master && e.name == *master) {
                    warn!("Replica {} belongs to unknown master {}", entry.name, master);
                }
            }
        }

        info!("Restored {} masters from {} inventory", restored, self.provisioner.name());
        Ok(restored)
    }

    async fn admit(&self, node: Node) -> Result<()> {
        let event = ClusterEvent::NodeRegistered {
            name: node.name.clone(),
            address: node.address.clone(),
            replicas: node.replicas.iter().map(|r| r.name.clone()).collect(),
            timestamp: Utc::now(),
        };
        self.state.register_master(node)?;
        metrics::REGISTERED_MASTERS.set(self.state.len() as i64);
        self.publish(event).await;
        Ok(())
    }

    /// Destroy node processes concurrently, returning the names that failed
    /// Tear down nodes that were provisioned but never registered
    async fn discard(&self, provisioned: &[ProvisionedNode]) {
        let failed = self
            .teardown(provisioned.iter().map(|p| (p.name.clone(), p.id.clone())))
            .await;
        if !failed.is_empty() {
            warn!("Could not clean up unregistered nodes: {:?}", failed);
        }
    }

    async fn teardown<I>(&self, nodes: I) -> Vec<String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let results = join_all(nodes.into_iter().map(|(name, id)| async move {
            let result = self.provisioner.destroy(&id).await;
            (name, result)
        }))
        .await;

        results
            .into_iter()
            .filter_map(|(name, result)| match result {
                Ok(()) => None,
                Err(e) => {
                    warn!("Failed to tear down {}: {}", name, e);
                    Some(name)
                }
            })
            .collect()
    }

    async fn publish(&self, event: ClusterEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!("Failed to publish registry event: {}", e);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryEventCollector, InMemoryFleet, InMemoryProvisioner};
    use crate::cluster::{NodeStatus, ReplicatedAccess};
    use assert_matches::assert_matches;
    use serde_json::json;

    struct Fixture {
        provisioner: Arc<InMemoryProvisioner>,
        state: Arc<ClusterState>,
        access: Arc<ReplicatedAccess>,
        events: Arc<InMemoryEventCollector>,
        registry: NodeRegistry,
    }

    fn fixture() -> Fixture {
        let fleet = Arc::new(InMemoryFleet::new());
        let provisioner = Arc::new(InMemoryProvisioner::new(fleet.clone()));
        let state = Arc::new(ClusterState::new());
        let access = Arc::new(ReplicatedAccess::new(state.clone(), fleet));
        let events = Arc::new(InMemoryEventCollector::new());
        let rebalancer = Arc::new(RebalanceCoordinator::new(access.clone(), events.clone()));
        let registry = NodeRegistry::new(state.clone(), provisioner.clone(), rebalancer, events.clone());
        Fixture {
            provisioner,
            state,
            access,
            events,
            registry,
        }
    }

    #[tokio::test]
    async fn test_replica_count_bounds() {
        let fx = fixture();
        for count in [0, 11] {
            assert_matches!(
                fx.registry.create_node("a", count).await,
                Err(Error::InvalidTopologyRequest(_))
            );
        }
        assert!(fx.state.is_empty());

        assert_eq!(fx.registry.create_node("a", 1).await.unwrap().len(), 1);
        assert_eq!(fx.registry.create_node("b", 10).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_create_registers_initializing_master_with_replicas() {
        let fx = fixture();
        let created = fx.registry.create_node("d", 3).await.unwrap();
        assert_eq!(created.len(), 3);

        let master = fx.state.master("d").unwrap();
        assert_eq!(master.status, NodeStatus::Initializing);
        assert_eq!(master.replicas.len(), 2);
        assert!(master.replicas.iter().all(|r| r.status == NodeStatus::Initializing));
        assert_eq!(fx.events.event_types(), vec!["NodeRegistered"]);
    }

    /// Provisioner that registers the master under a generated name
    struct RenamingProvisioner(Arc<InMemoryProvisioner>);

    #[async_trait::async_trait]
    impl Provisioner for RenamingProvisioner {
        async fn create(&self, name: &str, replica_count: usize) -> Result<Vec<ProvisionedNode>> {
            self.0.create(&format!("node-{}-1a2b3c4d", name), replica_count).await
        }

        async fn destroy(&self, id: &str) -> Result<()> {
            self.0.destroy(id).await
        }

        async fn inventory(&self) -> Result<Vec<crate::domain::InventoryEntry>> {
            self.0.inventory().await
        }

        fn name(&self) -> &'static str {
            "renaming"
        }
    }

    #[tokio::test]
    async fn test_renamed_master_is_refused_and_torn_down() {
        let fx = fixture();
        let renaming = Arc::new(RenamingProvisioner(fx.provisioner.clone()));
        let rebalancer = Arc::new(RebalanceCoordinator::new(fx.access.clone(), fx.events.clone()));
        let registry = NodeRegistry::new(fx.state.clone(), renaming, rebalancer, fx.events.clone());

        assert_matches!(
            registry.create_node("d", 3).await,
            Err(Error::ProvisionerFailure(_))
        );
        assert!(fx.state.is_empty());
        assert!(fx.provisioner.inventory().await.unwrap().is_empty());
        assert!(fx.provisioner.fleet().is_empty());
    }

    #[tokio::test]
    async fn test_created_node_is_addressable_by_requested_name() {
        let fx = fixture();
        let created = fx.registry.create_node("d", 2).await.unwrap();
        assert_eq!(created[0].name, "d");

        assert_matches!(
            fx.registry.create_node("d", 2).await,
            Err(Error::InvalidTopologyRequest(_))
        );

        let outcome = fx.registry.delete_node("d", true).await.unwrap();
        assert_eq!(outcome.removed, "d");
        assert!(fx.state.master("d").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let fx = fixture();
        fx.registry.create_node("a", 1).await.unwrap();
        assert_matches!(
            fx.registry.create_node("a", 1).await,
            Err(Error::InvalidTopologyRequest(_))
        );
    }

    #[tokio::test]
    async fn test_provisioner_failure_registers_nothing() {
        let fx = fixture();
        fx.provisioner.fail_create(true);
        assert_matches!(
            fx.registry.create_node("a", 2).await,
            Err(Error::ProvisionerFailure(_))
        );
        assert!(fx.state.is_empty());
    }

    #[tokio::test]
    async fn test_register_is_idempotent_by_address() {
        let fx = fixture();
        let first = fx.registry.register("n1", "http://10.0.0.1:8080").await.unwrap();
        let again = fx.registry.register("n1", "http://10.0.0.1:8080/").await.unwrap();
        assert_eq!(first, again);
        assert_eq!(fx.state.len(), 1);

        assert_matches!(
            fx.registry.register("n1", "http://10.0.0.2:8080").await,
            Err(Error::InvalidTopologyRequest(_))
        );
        assert_matches!(
            fx.registry.register("", "http://10.0.0.3:8080").await,
            Err(Error::InvalidTopologyRequest(_))
        );
    }

    #[tokio::test]
    async fn test_delete_unknown_node() {
        let fx = fixture();
        assert_matches!(
            fx.registry.delete_node("ghost", false).await,
            Err(Error::NotFound(_))
        );
    }

    #[tokio::test]
    async fn test_last_node_delete_needs_force() {
        let fx = fixture();
        fx.registry.create_node("solo", 2).await.unwrap();

        assert_matches!(
            fx.registry.delete_node("solo", false).await,
            Err(Error::RebalanceAborted { .. })
        );
        assert!(fx.state.master("solo").is_some());

        let outcome = fx.registry.delete_node("solo", true).await.unwrap();
        assert!(outcome.forced);
        assert!(outcome.failed_teardown.is_empty());
        assert!(fx.state.is_empty());
        assert!(fx.provisioner.fleet().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_failures_reported() {
        let fx = fixture();
        fx.registry.create_node("a", 2).await.unwrap();
        fx.registry.create_node("b", 1).await.unwrap();
        fx.provisioner.fail_destroy_of("a-replica-1");

        let outcome = fx.registry.delete_node("a", false).await.unwrap();
        assert_eq!(outcome.failed_teardown, vec!["a-replica-1"]);
        assert!(fx.state.master("a").is_none());
    }

    #[tokio::test]
    async fn test_delete_hands_data_to_successor() {
        let fx = fixture();
        for name in ["a", "b", "c"] {
            fx.registry.create_node(name, 1).await.unwrap();
        }
        for i in 0..30 {
            fx.access.write(&format!("k{}", i), json!(i), None).await.unwrap();
        }

        fx.registry.delete_node("b", false).await.unwrap();
        for i in 0..30 {
            assert_eq!(fx.access.read(&format!("k{}", i)).await.unwrap(), json!(i));
        }
    }

    #[tokio::test]
    async fn test_restore_from_inventory() {
        let fx = fixture();
        fx.provisioner.adopt("m1", NodeRole::Master, "running");
        fx.provisioner.adopt(
            "m1-r",
            NodeRole::Replica {
                master: "m1".to_string(),
            },
            "running",
        );
        fx.provisioner.adopt("m2", NodeRole::Master, "exited");

        assert_eq!(fx.registry.restore().await.unwrap(), 2);
        let m1 = fx.state.master("m1").unwrap();
        assert_eq!(m1.status, NodeStatus::Initializing);
        assert_eq!(m1.replicas[0].name, "m1-r");

        assert_eq!(fx.registry.restore().await.unwrap(), 0);
    }
}
