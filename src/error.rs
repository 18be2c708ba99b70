//! Error types for ringcache
//!
//! Every coordination-layer operation returns [`Result`], so expected failures
//! (missing key, unreachable node, refused topology change) travel as values
//! carrying a message and an HTTP status code.

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cluster manager and cache nodes
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Data Plane Errors
    // =========================================================================
    /// Key or node absent, or the key expired
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network or timeout failure while talking to a node
    #[error("Node {node} unavailable: {reason}")]
    NodeUnavailable { node: String, reason: String },

    /// Node answered, but with a non-success status
    #[error("Node {node} responded with {status}: {message}")]
    NodeRequest {
        node: String,
        status: u16,
        message: String,
    },

    /// Master accepted the write but a replica did not
    #[error("Write applied on master but failed on replica {node} ({status}): {message}")]
    PartialReplicationFailure {
        node: String,
        status: u16,
        message: String,
    },

    // =========================================================================
    // Topology Errors
    // =========================================================================
    /// Replica count out of range, duplicate registration and similar
    #[error("Invalid topology request: {0}")]
    InvalidTopologyRequest(String),

    /// Migration copy step failed; topology change refused
    #[error("Rebalance aborted for node {node}: {reason}")]
    RebalanceAborted { node: String, reason: String },

    /// Node process could not be created or destroyed
    #[error("Provisioner failure: {0}")]
    ProvisionerFailure(String),

    /// Ring has no entries
    #[error("No nodes available for caching")]
    NoNodesAvailable,

    /// Named node is not on the ring
    #[error("Node not found on ring: {0}")]
    NodeNotFound(String),

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status code surfaced to clients for this error.
    ///
    /// Statuses reported by a node pass through unchanged so callers see the
    /// code of the layer that actually failed.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound(_) | Error::NodeNotFound(_) => 404,
            Error::NodeUnavailable { .. } | Error::NoNodesAvailable => 503,
            Error::NodeRequest { status, .. } => *status,
            Error::PartialReplicationFailure { .. } => 502,
            Error::InvalidTopologyRequest(_) => 400,
            Error::RebalanceAborted { .. } => 409,
            Error::ProvisionerFailure(_)
            | Error::Kube(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Internal(_) => 500,
        }
    }

    /// True for transport-level failures (as opposed to application errors).
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::NodeUnavailable { .. })
    }

    /// Name of the node responsible for the failure, when known.
    pub fn node(&self) -> Option<&str> {
        match self {
            Error::NodeUnavailable { node, .. }
            | Error::NodeRequest { node, .. }
            | Error::PartialReplicationFailure { node, .. }
            | Error::RebalanceAborted { node, .. } => Some(node),
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
