//! Replicated Data Access
//!
//! Routes reads and writes to the master that owns a key. Writes go to the
//! master first, then to each replica in list order; the first failure stops
//! the fan-out and nothing is rolled back. Reads only touch the master.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::try_join_all;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::node::Node;
use super::state::ClusterState;
use crate::domain::{CacheItemRequest, CacheItemResponse, NodeClient, NodeProbe, NodeWithData};
use crate::error::{Error, Result};
use crate::metrics;

/// Default bound on a single `/health` probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Cluster-wide read/write path over the node client
pub struct ReplicatedAccess {
    state: Arc<ClusterState>,
    client: Arc<dyn NodeClient>,
    probe_timeout: Duration,
}

impl ReplicatedAccess {
    pub fn new(state: Arc<ClusterState>, client: Arc<dyn NodeClient>) -> Self {
        Self {
            state,
            client,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn state(&self) -> &Arc<ClusterState> {
        &self.state
    }

    pub fn client(&self) -> &Arc<dyn NodeClient> {
        &self.client
    }

    // =========================================================================
    // Key Operations
    // =========================================================================

    /// Store `value` under `key` on the owning master and all its replicas
    #[instrument(skip(self, value), fields(key = %key))]
    pub async fn write(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let result = self.write_inner(key, value, ttl).await;
        metrics::record_cache_request("write", result.is_ok());
        result
    }

    async fn write_inner(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let master = self.state.owner_of(key)?;
        let item = CacheItemRequest::new(key, value, ttl);

        self.client.set_item(&master, &item).await?;
        debug!("Wrote {} to master {}", key, master.name);

        for replica in &master.replicas {
            self.client
                .set_item(replica, &item)
                .await
                .map_err(|e| partial_failure(replica, e))?;
        }

        Ok(())
    }

    /// Read `key` from its owning master
    #[instrument(skip(self), fields(key = %key))]
    pub async fn read(&self, key: &str) -> Result<Value> {
        let result = async {
            let master = self.state.owner_of(key)?;
            self.client.get_item(&master, key).await
        }
        .await;
        metrics::record_cache_request("read", result.is_ok());
        result
    }

    /// Remove `key` from its owning master and replicas
    #[instrument(skip(self), fields(key = %key))]
    pub async fn delete(&self, key: &str) -> Result<()> {
        let result = self.delete_inner(key).await;
        metrics::record_cache_request("delete", result.is_ok());
        result
    }

    async fn delete_inner(&self, key: &str) -> Result<()> {
        let master = self.state.owner_of(key)?;
        let keys = [key.to_string()];

        let outcome = self.client.delete_items(&master, &keys).await?;
        if outcome.deleted.is_empty() {
            return Err(Error::NotFound(format!("key {}", key)));
        }

        for replica in &master.replicas {
            self.client
                .delete_items(replica, &keys)
                .await
                .map_err(|e| partial_failure(replica, e))?;
        }

        Ok(())
    }

    // =========================================================================
    // Batch Operations
    // =========================================================================

    /// Write a batch to `node` and then to each of its replicas
    pub async fn write_batch(&self, node: &Node, items: &[CacheItemRequest]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        for target in node.write_set() {
            self.client.set_items(target, items).await?;
        }
        Ok(())
    }

    /// Delete a batch from `node` and then from each of its replicas
    pub async fn delete_batch(&self, node: &Node, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        for target in node.write_set() {
            self.client.delete_items(target, keys).await?;
        }
        Ok(())
    }

    /// Every live item on `node` (the master copy only)
    pub async fn snapshot(&self, node: &Node) -> Result<Vec<CacheItemResponse>> {
        self.client.snapshot(node).await
    }

    // =========================================================================
    // Monitoring
    // =========================================================================

    /// Every master and replica with its full contents.
    ///
    /// A single unreachable node fails the whole aggregate.
    #[instrument(skip(self))]
    pub async fn all_nodes_with_data(&self) -> Result<Vec<NodeWithData>> {
        let masters = self.state.masters();
        if masters.is_empty() {
            return Err(Error::NotFound("no nodes registered".to_string()));
        }

        try_join_all(masters.iter().map(|m| self.node_with_data(m))).await
    }

    async fn node_with_data(&self, master: &Node) -> Result<NodeWithData> {
        let replicas = try_join_all(master.replicas.iter().map(|r| async move {
            let items = self.client.snapshot(r).await?;
            Ok::<_, Error>(with_data(r, items, Vec::new()))
        }))
        .await?;

        let items = self.client.snapshot(master).await?;
        Ok(with_data(master, items, replicas))
    }

    /// Live `/health` probe of one registered master or replica
    #[instrument(skip(self))]
    pub async fn probe(&self, name: &str) -> Result<NodeProbe> {
        let node = self
            .state
            .find_node(name)
            .ok_or_else(|| Error::NotFound(format!("node {}", name)))?;

        let started = Instant::now();
        let result = self.client.health(&node, self.probe_timeout).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let probe = match result {
            Ok(report) => NodeProbe {
                name: node.name,
                address: node.address,
                reachable: true,
                latency_ms,
                status: node.status,
                item_count: Some(report.item_count),
                error: None,
            },
            Err(e) => {
                warn!("Probe of {} failed: {}", name, e);
                NodeProbe {
                    name: node.name,
                    address: node.address,
                    reachable: false,
                    latency_ms,
                    status: node.status,
                    item_count: None,
                    error: Some(e.to_string()),
                }
            }
        };
        Ok(probe)
    }
}

fn with_data(node: &Node, items: Vec<CacheItemResponse>, replicas: Vec<NodeWithData>) -> NodeWithData {
    NodeWithData {
        name: node.name.clone(),
        id: node.id.clone(),
        address: node.address.clone(),
        status: node.status,
        items,
        replicas,
    }
}

fn partial_failure(replica: &Node, err: Error) -> Error {
    warn!("Replica {} rejected write after master accepted it: {}", replica.name, err);
    Error::PartialReplicationFailure {
        node: replica.name.clone(),
        status: err.status_code(),
        message: err.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================
