//! ringcache - Distributed In-Memory Key-Value Cache
//!
//! Independent cache nodes coordinated by a cluster manager. Every key is
//! assigned to one master node by consistent hashing and copied to that
//! master's replicas. Data is redistributed when masters join, leave or
//! come back Online.
//!
//! # Architecture
//!
//! ```text
//!   client ──► Manager (api::cluster)
//!                 │ ReplicatedAccess ── HashRing ── ClusterState
//!                 │ NodeRegistry ────── Provisioner (k8s / static / memory)
//!                 │ NodeHealthMonitor ─ RebalanceCoordinator
//!                 ▼
//!            Node (api::node) ── CacheStore
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Infrastructure adapters implementing domain ports
//! - [`api`] - hyper servers for the manager and node surfaces
//! - [`cluster`] - Cluster state, replication, rebalancing, health
//! - [`domain`] - Ports, wire types and events
//! - [`error`] - Error types
//! - [`metrics`] - Prometheus metrics
//! - [`ring`] - Consistent hash ring
//! - [`store`] - Per-node cache store with TTL

pub mod adapters;
pub mod api;
pub mod cluster;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod ring;
pub mod store;

// Re-export commonly used types
pub use cluster::{
    ClusterState, Node, NodeHealthMonitor, NodeRegistry, NodeStatus, RebalanceCoordinator,
    ReplicatedAccess,
};
pub use error::{Error, Result};
pub use ring::HashRing;
pub use store::CacheStore;
