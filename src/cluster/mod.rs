//! Cluster Coordination
//!
//! Everything the manager does on top of the hash ring:
//!
//! - **State** (`state.rs`) - ring plus master registry behind one handle
//! - **Access** (`access.rs`) - replicated reads and writes
//! - **Rebalance** (`rebalance.rs`) - key migration on join and leave
//! - **Registry** (`registry.rs`) - create, register, delete and restore masters
//! - **Health** (`health.rs`) - periodic status reconciliation

mod access;
mod health;
mod node;
mod rebalance;
mod registry;
mod state;

pub use access::{ReplicatedAccess, DEFAULT_PROBE_TIMEOUT};
pub use health::{HealthMonitorConfig, NodeHealthMonitor, PollSummary};
pub use node::{normalize_address, Node, NodeStatus, ProvisionerState};
pub use rebalance::{RebalanceCoordinator, RebalanceReport, RebalanceState, RebalanceStep};
pub use registry::{DeleteOutcome, NodeRegistry, MAX_REPLICA_COUNT, MIN_REPLICA_COUNT};
pub use state::{ClusterState, RingSlot};
