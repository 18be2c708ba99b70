//! Infrastructure Adapters
//!
//! This module contains adapter implementations for the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │       NodeClient │ Provisioner │ EventPublisher             │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ HttpNodeClient │ KubernetesProvisioner │ StaticProvisioner  │ │
//! │  │ InMemoryFleet  │ InMemoryProvisioner   │ LoggingPublisher   │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use ringcache::adapters::{HttpNodeClient, HttpNodeClientConfig};
//! use ringcache::cluster::{ClusterState, ReplicatedAccess};
//!
//! # async fn demo() -> ringcache::Result<()> {
//! let client = Arc::new(HttpNodeClient::new(HttpNodeClientConfig::default())?);
//! let access = ReplicatedAccess::new(Arc::new(ClusterState::new()), client);
//! let _value = access.read("user:42").await?;
//! # Ok(())
//! # }
//! ```

mod event_publisher;
mod http_node;
mod in_memory;
mod kubernetes;
mod static_provisioner;

pub use event_publisher::{InMemoryEventCollector, LoggingEventPublisher};
pub use http_node::{
    register_with_manager, ErrorBody, HttpNodeClient, HttpNodeClientConfig, RegisterRequest,
};
pub use in_memory::{memory_address, InMemoryFleet, InMemoryProvisioner, MEMORY_SCHEME};
pub use kubernetes::{pod_state, KubernetesProvisioner, KubernetesProvisionerConfig};
pub use static_provisioner::StaticProvisioner;
