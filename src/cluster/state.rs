//! Shared Cluster State
//!
//! One explicit handle owning the hash ring and the registry of masters. It is
//! passed as `Arc<ClusterState>` to every component instead of living in a
//! process-wide global.
//!
//! Lock order is registry then ring. Both are `parking_lot` locks whose guards
//! are not `Send`, so they cannot be held across an `.await`.

use std::collections::BTreeMap;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::node::{normalize_address, Node, NodeStatus};
use crate::error::{Error, Result};
use crate::ring::HashRing;

/// One ring position with the registry view of its master
#[derive(Debug, Clone, Serialize)]
pub struct RingSlot {
    pub position: usize,
    pub hash: String,
    pub name: String,
    pub address: String,
    pub status: NodeStatus,
    pub replicas: Vec<String>,
}

/// Ring plus registry, kept consistent with each other
#[derive(Debug, Default)]
pub struct ClusterState {
    registry: RwLock<BTreeMap<String, Node>>,
    ring: Mutex<HashRing>,
}

impl ClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a master to the registry and the ring.
    ///
    /// Fails with `InvalidTopologyRequest` if the name is taken.
    pub fn register_master(&self, node: Node) -> Result<()> {
        let mut registry = self.registry.write();
        if registry.contains_key(&node.name) {
            return Err(Error::InvalidTopologyRequest(format!(
                "node {} is already registered",
                node.name
            )));
        }

        self.ring.lock().add_node(&node.name);
        registry.insert(node.name.clone(), node);
        Ok(())
    }

    /// Remove a master from the ring and the registry
    pub fn remove_master(&self, name: &str) -> Option<Node> {
        let mut registry = self.registry.write();
        let removed = registry.remove(name)?;
        self.ring.lock().remove_node(name);
        Some(removed)
    }

    /// Master responsible for `key`, with its replicas
    pub fn owner_of(&self, key: &str) -> Result<Node> {
        let registry = self.registry.read();
        let ring = self.ring.lock();
        let name = ring.owner(key)?;
        registry
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("ring entry {} has no registry record", name)))
    }

    /// Name of the master responsible for `key`
    pub fn owner_name(&self, key: &str) -> Result<String> {
        self.ring.lock().owner(key).map(str::to_string)
    }

    /// Master that follows `name` on the ring
    pub fn successor_of(&self, name: &str) -> Result<Node> {
        let registry = self.registry.read();
        let ring = self.ring.lock();
        let next = ring.successor(name)?;
        registry
            .get(next)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("ring entry {} has no registry record", next)))
    }

    pub fn master(&self, name: &str) -> Option<Node> {
        self.registry.read().get(name).cloned()
    }

    /// All masters in ring order
    pub fn masters(&self) -> Vec<Node> {
        let registry = self.registry.read();
        let ring = self.ring.lock();
        ring.entries()
            .iter()
            .filter_map(|e| registry.get(&e.node_name).cloned())
            .collect()
    }

    /// A master or replica by name
    pub fn find_node(&self, name: &str) -> Option<Node> {
        self.registry
            .read()
            .values()
            .find_map(|m| m.find(name).cloned())
    }

    /// A master or replica by address
    pub fn find_by_address(&self, address: &str) -> Option<Node> {
        let address = normalize_address(address);
        self.registry
            .read()
            .values()
            .find_map(|m| m.write_set().find(|n| n.address == address).cloned())
    }

    /// Update the status of a master or replica. Returns the previous status.
    pub fn set_status(&self, name: &str, status: NodeStatus) -> Option<NodeStatus> {
        let mut registry = self.registry.write();
        registry.values_mut().find_map(|m| {
            m.find_mut(name)
                .map(|n| std::mem::replace(&mut n.status, status))
        })
    }

    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.read().is_empty()
    }

    /// Ring positions joined with registry records, for monitoring
    pub fn ring_snapshot(&self) -> Vec<RingSlot> {
        let registry = self.registry.read();
        let ring = self.ring.lock();
        ring.entries()
            .iter()
            .enumerate()
            .filter_map(|(position, entry)| {
                let node = registry.get(&entry.node_name)?;
                Some(RingSlot {
                    position,
                    hash: entry.short_hash(),
                    name: node.name.clone(),
                    address: node.address.clone(),
                    status: node.status,
                    replicas: node.replicas.iter().map(|r| r.name.clone()).collect(),
                })
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn master(name: &str, replicas: &[&str]) -> Node {
        Node::new(name, name, format!("http://{}:8080", name)).with_replicas(
            replicas
                .iter()
                .map(|r| Node::new(*r, *r, format!("http://{}:8080", r)))
                .collect(),
        )
    }

    #[test]
    fn test_register_keeps_ring_and_registry_in_step() {
        let state = ClusterState::new();
        state.register_master(master("a", &[])).unwrap();
        state.register_master(master("b", &["b-r1"])).unwrap();

        assert_eq!(state.len(), 2);
        assert_eq!(state.ring_snapshot().len(), 2);
        assert_matches!(
            state.register_master(master("a", &[])),
            Err(Error::InvalidTopologyRequest(_))
        );
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_owner_of_returns_registered_master() {
        let state = ClusterState::new();
        assert_matches!(state.owner_of("k"), Err(Error::NoNodesAvailable));

        state.register_master(master("a", &["a-r1"])).unwrap();
        let owner = state.owner_of("k").unwrap();
        assert_eq!(owner.name, "a");
        assert_eq!(owner.replicas.len(), 1);
    }

    #[test]
    fn test_remove_master() {
        let state = ClusterState::new();
        state.register_master(master("a", &[])).unwrap();
        state.register_master(master("b", &[])).unwrap();

        assert!(state.remove_master("a").is_some());
        assert!(state.remove_master("a").is_none());
        assert_eq!(state.owner_name("anything").unwrap(), "b");
        assert_matches!(state.successor_of("a"), Err(Error::NodeNotFound(_)));
    }

    #[test]
    fn test_set_status_reaches_replicas() {
        let state = ClusterState::new();
        state.register_master(master("a", &["a-r1"])).unwrap();

        assert_eq!(
            state.set_status("a-r1", NodeStatus::Online),
            Some(NodeStatus::Initializing)
        );
        assert_eq!(state.find_node("a-r1").unwrap().status, NodeStatus::Online);
        assert_eq!(state.master("a").unwrap().status, NodeStatus::Initializing);
        assert_eq!(state.set_status("ghost", NodeStatus::Online), None);
    }

    #[test]
    fn test_find_by_address_normalizes() {
        let state = ClusterState::new();
        state.register_master(master("a", &["a-r1"])).unwrap();

        assert_eq!(state.find_by_address("http://a-r1:8080/").unwrap().name, "a-r1");
        assert!(state.find_by_address("http://nope:8080").is_none());
    }

    #[test]
    fn test_masters_in_ring_order() {
        let state = ClusterState::new();
        for name in ["a", "b", "c", "d"] {
            state.register_master(master(name, &[])).unwrap();
        }
        let ring = HashRing::from_nodes(["a", "b", "c", "d"]);
        let names: Vec<String> = state.masters().into_iter().map(|n| n.name).collect();
        assert_eq!(names, ring.node_names());
    }
}
