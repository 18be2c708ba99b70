//! Cluster Events
//!
//! Immutable records of topology and health changes, published through the
//! [`EventPublisher`](super::ports::EventPublisher) port for audit logging and
//! for assertions in tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::NodeStatus;

/// Which topology change a rebalance serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebalanceDirection {
    /// Keys move from the successor into a node that became Online
    Join,
    /// Keys move from a leaving node into its successor
    Leave,
}

impl std::fmt::Display for RebalanceDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RebalanceDirection::Join => write!(f, "join"),
            RebalanceDirection::Leave => write!(f, "leave"),
        }
    }
}

/// Something that happened to the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClusterEvent {
    /// A master (and its replicas) entered the registry
    NodeRegistered {
        name: String,
        address: String,
        replicas: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// The health monitor observed a new status
    NodeStatusChanged {
        name: String,
        from: NodeStatus,
        to: NodeStatus,
        timestamp: DateTime<Utc>,
    },

    RebalanceStarted {
        direction: RebalanceDirection,
        source: String,
        destination: String,
        timestamp: DateTime<Utc>,
    },

    RebalanceCompleted {
        direction: RebalanceDirection,
        source: String,
        destination: String,
        moved_keys: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Copy step failed; the topology change was refused
    RebalanceAborted {
        direction: RebalanceDirection,
        source: String,
        destination: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A master left the registry
    NodeRemoved {
        name: String,
        forced: bool,
        failed_teardown: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

impl ClusterEvent {
    /// Event type name, matching the serde tag
    pub fn event_type(&self) -> &'static str {
        match self {
            ClusterEvent::NodeRegistered { .. } => "NodeRegistered",
            ClusterEvent::NodeStatusChanged { .. } => "NodeStatusChanged",
            ClusterEvent::RebalanceStarted { .. } => "RebalanceStarted",
            ClusterEvent::RebalanceCompleted { .. } => "RebalanceCompleted",
            ClusterEvent::RebalanceAborted { .. } => "RebalanceAborted",
            ClusterEvent::NodeRemoved { .. } => "NodeRemoved",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ClusterEvent::NodeRegistered { timestamp, .. }
            | ClusterEvent::NodeStatusChanged { timestamp, .. }
            | ClusterEvent::RebalanceStarted { timestamp, .. }
            | ClusterEvent::RebalanceCompleted { timestamp, .. }
            | ClusterEvent::RebalanceAborted { timestamp, .. }
            | ClusterEvent::NodeRemoved { timestamp, .. } => *timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_matches_serde_tag() {
        let event = ClusterEvent::NodeStatusChanged {
            name: "node-a".into(),
            from: NodeStatus::Initializing,
            to: NodeStatus::Online,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type());
        assert_eq!(json["to"], "Online");
    }
}
