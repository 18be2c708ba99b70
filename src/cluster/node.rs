//! Node Model
//!
//! A master [`Node`] owns its ordered replica list; replicas never point back.
//! Health is tracked as a tagged [`NodeStatus`], derived from the provisioner's
//! state string through [`ProvisionerState`].

use serde::{Deserialize, Serialize};

/// Observed health of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Created but not yet reachable
    Initializing,
    /// Running and answering probes
    Online,
    /// Stopped, paused or unreachable
    Offline,
    /// Dead or in an unknown state
    Error,
    /// Provisioner has no record of the backing process
    NotFound,
}

impl NodeStatus {
    pub fn is_online(&self) -> bool {
        *self == NodeStatus::Online
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Initializing => write!(f, "Initializing"),
            NodeStatus::Online => write!(f, "Online"),
            NodeStatus::Offline => write!(f, "Offline"),
            NodeStatus::Error => write!(f, "Error"),
            NodeStatus::NotFound => write!(f, "NotFound"),
        }
    }
}

/// Lifecycle state reported by the provisioner for a node's process/container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionerState {
    Created,
    Running,
    Restarting,
    Paused,
    Exited,
    Dead,
    Unknown(String),
}

impl ProvisionerState {
    /// Parse a provisioner state string (case-insensitive)
    pub fn parse(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "created" => ProvisionerState::Created,
            "running" => ProvisionerState::Running,
            "restarting" => ProvisionerState::Restarting,
            "paused" => ProvisionerState::Paused,
            "exited" => ProvisionerState::Exited,
            "dead" => ProvisionerState::Dead,
            _ => ProvisionerState::Unknown(state.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProvisionerState::Created => "created",
            ProvisionerState::Running => "running",
            ProvisionerState::Restarting => "restarting",
            ProvisionerState::Paused => "paused",
            ProvisionerState::Exited => "exited",
            ProvisionerState::Dead => "dead",
            ProvisionerState::Unknown(s) => s,
        }
    }
}

impl From<&ProvisionerState> for NodeStatus {
    fn from(state: &ProvisionerState) -> Self {
        match state {
            ProvisionerState::Running => NodeStatus::Online,
            ProvisionerState::Created | ProvisionerState::Restarting => NodeStatus::Initializing,
            ProvisionerState::Paused | ProvisionerState::Exited => NodeStatus::Offline,
            ProvisionerState::Dead | ProvisionerState::Unknown(_) => NodeStatus::Error,
        }
    }
}

/// A cache node known to the cluster manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique name; masters are placed on the ring by it
    pub name: String,
    /// Opaque provisioner handle
    pub id: String,
    /// Base URL of the node's HTTP surface
    pub address: String,
    pub status: NodeStatus,
    /// Ordered replicas (empty for replicas themselves)
    #[serde(default)]
    pub replicas: Vec<Node>,
}

impl Node {
    /// New node in the `Initializing` state
    pub fn new(name: impl Into<String>, id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            address: normalize_address(&address.into()),
            status: NodeStatus::Initializing,
            replicas: Vec::new(),
        }
    }

    pub fn with_replicas(mut self, replicas: Vec<Node>) -> Self {
        self.replicas = replicas;
        self
    }

    /// The master followed by its replicas, in write order
    pub fn write_set(&self) -> impl Iterator<Item = &Node> {
        std::iter::once(self).chain(self.replicas.iter())
    }

    /// Find this node or one of its replicas by name
    pub fn find(&self, name: &str) -> Option<&Node> {
        self.write_set().find(|n| n.name == name)
    }

    pub(crate) fn find_mut(&mut self, name: &str) -> Option<&mut Node> {
        if self.name == name {
            return Some(self);
        }
        self.replicas.iter_mut().find(|n| n.name == name)
    }
}

/// Strip trailing slashes so endpoint joins are uniform
pub fn normalize_address(address: &str) -> String {
    address.trim().trim_end_matches('/').to_string()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping_table() {
        let cases = [
            ("running", NodeStatus::Online),
            ("created", NodeStatus::Initializing),
            ("restarting", NodeStatus::Initializing),
            ("paused", NodeStatus::Offline),
            ("exited", NodeStatus::Offline),
            ("dead", NodeStatus::Error),
            ("removing", NodeStatus::Error),
            ("", NodeStatus::Error),
        ];

        for (state, expected) in cases {
            let parsed = ProvisionerState::parse(state);
            assert_eq!(NodeStatus::from(&parsed), expected, "state {:?}", state);
        }
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(ProvisionerState::parse("Running"), ProvisionerState::Running);
        assert_eq!(ProvisionerState::parse(" EXITED "), ProvisionerState::Exited);
        assert_eq!(ProvisionerState::parse("odd").as_str(), "odd");
    }

    #[test]
    fn test_status_display_and_serde() {
        assert_eq!(NodeStatus::NotFound.to_string(), "NotFound");
        let json = serde_json::to_string(&NodeStatus::Online).unwrap();
        assert_eq!(json, "\"Online\"");
    }

    #[test]
    fn test_new_node_is_initializing_with_normalized_address() {
        let node = Node::new("a", "id-a", "http://a:8080/");
        assert_eq!(node.status, NodeStatus::Initializing);
        assert_eq!(node.address, "http://a:8080");
    }

    #[test]
    fn test_write_set_order() {
        let master = Node::new("m", "1", "http://m").with_replicas(vec![
            Node::new("r1", "2", "http://r1"),
            Node::new("r2", "3", "http://r2"),
        ]);

        let names: Vec<&str> = master.write_set().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["m", "r1", "r2"]);
        assert!(master.find("r2").is_some());
        assert!(master.find("r3").is_none());
    }
}
