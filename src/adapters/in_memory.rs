//! In-Memory Fleet Adapter
//!
//! Cache nodes hosted inside the current process. [`InMemoryFleet`] serves the
//! `NodeClient` port directly from local [`CacheStore`]s keyed by address,
//! and [`InMemoryProvisioner`] creates and destroys entries in that fleet.
//!
//! Used by the test suite and by the manager's `--provisioner memory` mode.
//! Failure injection (unreachable nodes, rejected writes, failing inventory)
//! lets tests drive the error paths of the coordination layer.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::cluster::{normalize_address, Node};
use crate::domain::ports::{
    CacheItemRequest, CacheItemResponse, DeleteManyResponse, InventoryEntry, NodeClient,
    NodeHealthReport, NodeRole, ProvisionedNode, Provisioner,
};
use crate::error::{Error, Result};
use crate::store::{CacheStore, Clock, Lookup, SystemClock};

/// Address scheme for in-process nodes
pub const MEMORY_SCHEME: &str = "mem://";

/// Address of the in-process node called `name`
pub fn memory_address(name: &str) -> String {
    format!("{}{}", MEMORY_SCHEME, name)
}

struct FleetNode {
    store: Arc<CacheStore>,
    reachable: AtomicBool,
    /// Status returned for writes and deletes; 0 means accept
    reject_status: AtomicU16,
}

// =============================================================================
// Fleet
// =============================================================================

/// Set of in-process cache nodes sharing one clock
pub struct InMemoryFleet {
    nodes: DashMap<String, Arc<FleetNode>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryFleet {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFleet {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Fleet whose stores all read time from `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            nodes: DashMap::new(),
            clock,
        }
    }

    /// Start a node named `name` and return its record (id = name)
    pub fn spawn_node(&self, name: &str) -> Node {
        let address = memory_address(name);
        self.add_address(&address);
        Node::new(name, name, address)
    }

    /// Ensure a store exists at `address`
    pub fn add_address(&self, address: &str) -> Arc<CacheStore> {
        let entry = self
            .nodes
            .entry(normalize_address(address))
            .or_insert_with(|| {
                Arc::new(FleetNode {
                    store: Arc::new(CacheStore::with_clock(self.clock.clone())),
                    reachable: AtomicBool::new(true),
                    reject_status: AtomicU16::new(0),
                })
            });
        entry.store.clone()
    }

    pub fn remove(&self, address: &str) -> bool {
        self.nodes.remove(&normalize_address(address)).is_some()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.nodes.contains_key(&normalize_address(address))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct handle on the store at `address`
    pub fn store(&self, address: &str) -> Option<Arc<CacheStore>> {
        self.nodes
            .get(&normalize_address(address))
            .map(|n| n.store.clone())
    }

    /// Make the node at `address` fail every call as unreachable
    pub fn set_reachable(&self, address: &str, reachable: bool) {
        if let Some(node) = self.nodes.get(&normalize_address(address)) {
            node.reachable.store(reachable, Ordering::SeqCst);
        }
    }

    /// Make writes and deletes on `address` answer with `status`
    pub fn reject_writes(&self, address: &str, status: Option<u16>) {
        if let Some(node) = self.nodes.get(&normalize_address(address)) {
            node.reject_status.store(status.unwrap_or(0), Ordering::SeqCst);
        }
    }

    fn reach(&self, node: &Node) -> Result<Arc<FleetNode>> {
        let target = self
            .nodes
            .get(&node.address)
            .map(|n| Arc::clone(n.value()))
            .ok_or_else(|| Error::NodeUnavailable {
                node: node.name.clone(),
                reason: format!("no process at {}", node.address),
            })?;

        if !target.reachable.load(Ordering::SeqCst) {
            return Err(Error::NodeUnavailable {
                node: node.name.clone(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(target)
    }

    fn reach_for_write(&self, node: &Node) -> Result<Arc<FleetNode>> {
        let target = self.reach(node)?;
        match target.reject_status.load(Ordering::SeqCst) {
            0 => Ok(target),
            status => Err(Error::NodeRequest {
                node: node.name.clone(),
                status,
                message: "write rejected".to_string(),
            }),
        }
    }
}

#[async_trait]
impl NodeClient for InMemoryFleet {
    async fn get_item(&self, node: &Node, key: &str) -> Result<Value> {
        match self.reach(node)?.store.lookup(key) {
            Lookup::Hit(item) => Ok(item.value),
            Lookup::Expired | Lookup::Missing => Err(Error::NotFound(format!("key {}", key))),
        }
    }

    async fn set_item(&self, node: &Node, item: &CacheItemRequest) -> Result<()> {
        let target = self.reach_for_write(node)?;
        target
            .store
            .set(item.key.clone(), item.value.clone(), item.ttl_duration());
        Ok(())
    }

    async fn set_items(&self, node: &Node, items: &[CacheItemRequest]) -> Result<()> {
        let target = self.reach_for_write(node)?;
        target.store.set_many(
            items
                .iter()
                .map(|i| (i.key.clone(), i.value.clone(), i.ttl_duration())),
        );
        Ok(())
    }

    async fn delete_items(&self, node: &Node, keys: &[String]) -> Result<DeleteManyResponse> {
        let target = self.reach_for_write(node)?;
        Ok(target.store.delete_many(keys).into())
    }

    async fn snapshot(&self, node: &Node) -> Result<Vec<CacheItemResponse>> {
        let target = self.reach(node)?;
        let now = self.clock.now();
        Ok(target
            .store
            .snapshot()
            .iter()
            .map(|item| CacheItemResponse::from_item(item, now))
            .collect())
    }

    async fn health(&self, node: &Node, _timeout: Duration) -> Result<NodeHealthReport> {
        let target = self.reach(node)?;
        Ok(NodeHealthReport {
            status: "healthy".to_string(),
            item_count: target.store.len(),
        })
    }
}

// =============================================================================
// Provisioner
// =============================================================================

/// Provisioner that starts nodes inside an [`InMemoryFleet`]
pub struct InMemoryProvisioner {
    fleet: Arc<InMemoryFleet>,
    records: DashMap<String, InventoryEntry>,
    fail_create: AtomicBool,
    fail_inventory: AtomicBool,
    fail_destroy: DashSet<String>,
}

impl InMemoryProvisioner {
    pub fn new(fleet: Arc<InMemoryFleet>) -> Self {
        Self {
            fleet,
            records: DashMap::new(),
            fail_create: AtomicBool::new(false),
            fail_inventory: AtomicBool::new(false),
            fail_destroy: DashSet::new(),
        }
    }

    pub fn fleet(&self) -> &Arc<InMemoryFleet> {
        &self.fleet
    }

    /// Set the lifecycle state string of the node called `name`
    pub fn set_state(&self, name: &str, state: &str) -> bool {
        let mut found = false;
        for mut record in self.records.iter_mut() {
            if record.name == name {
                record.state = state.to_string();
                found = true;
            }
        }
        found
    }

    /// Mark every node as running
    pub fn set_all_running(&self) {
        for mut record in self.records.iter_mut() {
            record.state = "running".to_string();
        }
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_inventory(&self, fail: bool) {
        self.fail_inventory.store(fail, Ordering::SeqCst);
    }

    /// Make teardown of the node called `name` fail
    pub fn fail_destroy_of(&self, name: &str) {
        self.fail_destroy.insert(name.to_string());
    }

    /// Record an existing fleet node, as if it had been found at startup
    pub fn adopt(&self, name: &str, role: NodeRole, state: &str) -> ProvisionedNode {
        let address = memory_address(name);
        self.fleet.add_address(&address);
        let id = Uuid::new_v4().to_string();
        self.records.insert(
            id.clone(),
            InventoryEntry {
                id: id.clone(),
                name: name.to_string(),
                address: address.clone(),
                role,
                state: state.to_string(),
            },
        );
        ProvisionedNode {
            name: name.to_string(),
            id,
            address,
        }
    }
}

#[async_trait]
impl Provisioner for InMemoryProvisioner {
    async fn create(&self, name: &str, replica_count: usize) -> Result<Vec<ProvisionedNode>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::ProvisionerFailure(format!(
                "cannot start nodes for {}",
                name
            )));
        }

        let replica_names: Vec<String> = (1..replica_count)
            .map(|i| format!("{}-replica-{}", name, i))
            .collect();
        if let Some(taken) = std::iter::once(name)
            .chain(replica_names.iter().map(String::as_str))
            .find(|n| self.fleet.contains(&memory_address(n)))
        {
            return Err(Error::InvalidTopologyRequest(format!(
                "address {} is already in use",
                memory_address(taken)
            )));
        }

        let mut created = vec![self.adopt(name, NodeRole::Master, "created")];
        for replica_name in &replica_names {
            created.push(self.adopt(
                replica_name,
                NodeRole::Replica {
                    master: name.to_string(),
                },
                "created",
            ));
        }

        debug!("Started {} in-memory nodes for {}", created.len(), name);
        Ok(created)
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        let (_, record) = self
            .records
            .remove(id)
            .ok_or_else(|| Error::ProvisionerFailure(format!("no node with id {}", id)))?;

        if self.fail_destroy.contains(&record.name) {
            self.records.insert(id.to_string(), record.clone());
            return Err(Error::ProvisionerFailure(format!(
                "failed to stop {}",
                record.name
            )));
        }

        self.fleet.remove(&record.address);
        Ok(())
    }

    async fn inventory(&self) -> Result<Vec<InventoryEntry>> {
        if self.fail_inventory.load(Ordering::SeqCst) {
            return Err(Error::ProvisionerFailure("inventory unavailable".to_string()));
        }
        Ok(self.records.iter().map(|r| r.value().clone()).collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ManualClock;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[tokio::test]
    async fn test_fleet_serves_node_client() {
        let fleet = InMemoryFleet::new();
        let node = fleet.spawn_node("a");

        fleet
            .set_item(&node, &CacheItemRequest::new("k", json!(1), None))
            .await
            .unwrap();
        assert_eq!(fleet.get_item(&node, "k").await.unwrap(), json!(1));
        assert_matches!(fleet.get_item(&node, "nope").await, Err(Error::NotFound(_)));

        let outcome = fleet
            .delete_items(&node, &["k".to_string(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(outcome.deleted, vec!["k"]);
        assert_eq!(outcome.not_found, vec!["nope"]);
    }

    #[tokio::test]
    async fn test_unreachable_and_rejecting_nodes() {
        let fleet = InMemoryFleet::new();
        let node = fleet.spawn_node("a");
        let item = CacheItemRequest::new("k", json!(1), None);

        fleet.reject_writes(&node.address, Some(507));
        assert_matches!(
            fleet.set_item(&node, &item).await,
            Err(Error::NodeRequest { status: 507, .. })
        );

        fleet.set_reachable(&node.address, false);
        let err = fleet.health(&node, Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_snapshot_reports_remaining_ttl() {
        let clock = Arc::new(ManualClock::new());
        let fleet = InMemoryFleet::with_clock(clock.clone());
        let node = fleet.spawn_node("a");

        fleet
            .set_item(&node, &CacheItemRequest::new("k", json!(1), Some(Duration::from_secs(60))))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(20));

        let items = fleet.snapshot(&node).await.unwrap();
        assert_eq!(items[0].ttl, Some(60));
        assert_eq!(items[0].remaining_ttl, Some(40));
    }

    #[tokio::test]
    async fn test_provisioner_lifecycle() {
        let fleet = Arc::new(InMemoryFleet::new());
        let provisioner = InMemoryProvisioner::new(fleet.clone());

        let created = provisioner.create("d", 3).await.unwrap();
        assert_eq!(created.len(), 3);
        assert_eq!(created[0].name, "d");
        assert_eq!(fleet.len(), 3);

        let inventory = provisioner.inventory().await.unwrap();
        assert_eq!(inventory.len(), 3);
        assert!(inventory.iter().all(|e| e.state == "created"));
        assert_eq!(
            inventory.iter().filter(|e| e.role == NodeRole::Master).count(),
            1
        );

        provisioner.destroy(&created[1].id).await.unwrap();
        assert_eq!(fleet.len(), 2);
        assert_matches!(
            provisioner.destroy(&created[1].id).await,
            Err(Error::ProvisionerFailure(_))
        );
    }

    #[tokio::test]
    async fn test_create_refuses_address_in_use() {
        let fleet = Arc::new(InMemoryFleet::new());
        let provisioner = InMemoryProvisioner::new(fleet.clone());
        provisioner.create("a", 2).await.unwrap();

        // a master named like a replica of `a` would share its store
        assert_matches!(
            provisioner.create("a-replica-1", 1).await,
            Err(Error::InvalidTopologyRequest(_))
        );
        // as would a new master whose replica lands on an existing node
        assert_matches!(
            provisioner.create("a-replica", 2).await,
            Err(Error::InvalidTopologyRequest(_))
        );
        assert_eq!(fleet.len(), 2);
        assert_eq!(provisioner.inventory().await.unwrap().len(), 2);
    }
}
