//! Domain Layer
//!
//! - **Ports** (`ports.rs`) - trait abstractions for nodes, provisioning and events,
//!   plus the JSON wire types exchanged with nodes
//! - **Events** (`events.rs`) - cluster events for audit and tests

pub mod events;
pub mod ports;

pub use events::{ClusterEvent, RebalanceDirection};
pub use ports::{
    ttl_to_secs, CacheItemRequest, CacheItemResponse, DeleteManyResponse, EventPublisher,
    InventoryEntry, NodeClient, NodeHealthReport, NodeProbe, NodeRole, NodeWithData,
    ProvisionedNode, Provisioner,
};
