//! Domain Ports (Port/Adapter Pattern)
//!
//! The coordination layer talks to the outside world only through these
//! traits. Adapters in [`crate::adapters`] provide the concrete HTTP, Kubernetes
//! and in-memory implementations.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    Coordination Layer                      │
//! │   ReplicatedAccess │ RebalanceCoordinator │ HealthMonitor  │
//! └────────────────────────────────────────────────────────────┘
//!                 │ NodeClient   │ Provisioner  │ EventPublisher
//!                 ▼              ▼              ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │   HttpNodeClient │ KubernetesProvisioner │ LoggingPublisher │
//! │   InMemoryFleet  │ InMemoryProvisioner   │ EventCollector   │
//! └────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::events::ClusterEvent;
use crate::cluster::{Node, NodeStatus};
use crate::error::Result;
use crate::store::{CacheItem, DeleteSummary};

// =============================================================================
// Wire Types
// =============================================================================

/// Whole seconds for a TTL, rounding any fraction up
pub fn ttl_to_secs(ttl: Duration) -> u64 {
    ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)
}

/// Body of single and batch writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheItemRequest {
    pub key: String,
    pub value: Value,
    /// Seconds to live; absent means never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

impl CacheItemRequest {
    pub fn new(key: impl Into<String>, value: Value, ttl: Option<Duration>) -> Self {
        Self {
            key: key.into(),
            value,
            ttl: ttl.map(ttl_to_secs),
        }
    }

    pub fn ttl_duration(&self) -> Option<Duration> {
        self.ttl.map(Duration::from_secs)
    }
}

/// One item as returned by a node's full snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheItemResponse {
    pub key: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Original TTL in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    /// TTL left when the snapshot was taken, measured on the node's own clock
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_ttl: Option<u64>,
}

impl CacheItemResponse {
    pub fn from_item(item: &CacheItem, now: DateTime<Utc>) -> Self {
        Self {
            key: item.key.clone(),
            value: item.value.clone(),
            created_at: item.created_at,
            last_accessed: item.last_accessed,
            ttl: item.ttl.map(ttl_to_secs),
            remaining_ttl: item.remaining_ttl(now).map(ttl_to_secs),
        }
    }

    /// Re-write request that keeps the item's original expiry window
    pub fn to_migration_request(&self) -> CacheItemRequest {
        CacheItemRequest {
            key: self.key.clone(),
            value: self.value.clone(),
            ttl: self.remaining_ttl.or(self.ttl),
        }
    }
}

/// Result of a bulk delete on a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteManyResponse {
    pub deleted: Vec<String>,
    pub not_found: Vec<String>,
}

impl From<DeleteSummary> for DeleteManyResponse {
    fn from(summary: DeleteSummary) -> Self {
        Self {
            deleted: summary.deleted,
            not_found: summary.not_found,
        }
    }
}

/// Liveness report from a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHealthReport {
    pub status: String,
    pub item_count: usize,
}

/// A node and everything it holds, for the monitor endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeWithData {
    pub name: String,
    pub id: String,
    pub address: String,
    pub status: NodeStatus,
    pub items: Vec<CacheItemResponse>,
    #[serde(default)]
    pub replicas: Vec<NodeWithData>,
}

/// Live reachability probe of one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeProbe {
    pub name: String,
    pub address: String,
    pub reachable: bool,
    pub latency_ms: u64,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// =============================================================================
// Node Client Port
// =============================================================================

/// Data-plane access to a single cache node.
///
/// Transport failures and timeouts surface as `Error::NodeUnavailable`,
/// non-success answers as `Error::NodeRequest` with the node's status code.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Read one value. Absent and expired keys are `Error::NotFound`.
    async fn get_item(&self, node: &Node, key: &str) -> Result<Value>;

    /// Write one item.
    async fn set_item(&self, node: &Node, item: &CacheItemRequest) -> Result<()>;

    /// Write a batch of items.
    async fn set_items(&self, node: &Node, items: &[CacheItemRequest]) -> Result<()>;

    /// Delete a batch of keys, reporting which were absent.
    async fn delete_items(&self, node: &Node, keys: &[String]) -> Result<DeleteManyResponse>;

    /// All live items held by the node.
    async fn snapshot(&self, node: &Node) -> Result<Vec<CacheItemResponse>>;

    /// Liveness probe bounded by `timeout`.
    async fn health(&self, node: &Node, timeout: Duration) -> Result<NodeHealthReport>;
}

// =============================================================================
// Provisioner Port
// =============================================================================

/// A node process created by the provisioner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedNode {
    pub name: String,
    pub id: String,
    pub address: String,
}

impl ProvisionedNode {
    pub fn into_node(self) -> Node {
        Node::new(self.name, self.id, self.address)
    }
}

/// Role of an inventoried node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Master,
    Replica { master: String },
}

/// One node process as currently known to the provisioner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub id: String,
    pub name: String,
    pub address: String,
    pub role: NodeRole,
    /// Lifecycle state string ("running", "exited", ...)
    pub state: String,
}

/// Creates and destroys the processes backing cache nodes.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Start one master and `replica_count - 1` replicas. The master is first.
    async fn create(&self, name: &str, replica_count: usize) -> Result<Vec<ProvisionedNode>>;

    /// Tear down one node process.
    async fn destroy(&self, id: &str) -> Result<()>;

    /// Every node process the provisioner manages.
    async fn inventory(&self) -> Result<Vec<InventoryEntry>>;

    /// Whether `inventory` is authoritative for node lifecycle.
    ///
    /// When false, a node missing from the inventory is assumed to be running
    /// and its status is decided by the HTTP probe alone.
    fn tracks_lifecycle(&self) -> bool {
        true
    }

    /// Provisioner name for logging
    fn name(&self) -> &'static str;
}

// =============================================================================
// Event Publisher Port
// =============================================================================

/// Sink for cluster events (audit log, tests).
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: ClusterEvent) -> Result<()>;

    async fn publish_all(&self, events: Vec<ClusterEvent>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ttl_rounds_up() {
        assert_eq!(ttl_to_secs(Duration::from_secs(5)), 5);
        assert_eq!(ttl_to_secs(Duration::from_millis(5001)), 6);
        assert_eq!(ttl_to_secs(Duration::ZERO), 0);
    }

    #[test]
    fn test_request_without_ttl_omits_field() {
        let req = CacheItemRequest::new("k", json!("v"), None);
        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(body, json!({"key": "k", "value": "v"}));

        let parsed: CacheItemRequest = serde_json::from_value(json!({"key": "k", "value": 1})).unwrap();
        assert_eq!(parsed.ttl_duration(), None);
    }

    #[test]
    fn test_migration_request_keeps_remaining_window() {
        let now = Utc::now();
        let mut item = CacheItem::new("k", json!(1), Some(Duration::from_secs(60)), now);
        item.created_at = now - chrono::Duration::seconds(45);

        let resp = CacheItemResponse::from_item(&item, now);
        assert_eq!(resp.ttl, Some(60));
        assert_eq!(resp.remaining_ttl, Some(15));
        assert_eq!(resp.to_migration_request().ttl, Some(15));
    }

    #[test]
    fn test_migration_request_without_ttl() {
        let item = CacheItem::new("k", json!(1), None, Utc::now());
        let resp = CacheItemResponse::from_item(&item, Utc::now());
        assert_eq!(resp.to_migration_request().ttl, None);
    }
}
