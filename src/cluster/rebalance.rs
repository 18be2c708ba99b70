//! Rebalance Coordinator
//!
//! Moves keys between masters when the ring changes shape. Every run copies
//! before it deletes, so a failure part way leaves the source data intact.
//!
//! # Join
//!
//! When a master becomes Online, the keys it now owns still sit on its ring
//! successor. They are copied to the new master and its replicas, then
//! removed from the successor and its replicas.
//!
//! # Leave
//!
//! Before a master is removed, its whole contents are copied to its successor
//! and the successor's replicas. The leaving node is torn down afterwards, so
//! nothing is deleted from it.
//!
//! Classification re-hashes keys against the ring as it is when the snapshot
//! returns, not against a copy taken atomically with the read.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::access::ReplicatedAccess;
use super::node::Node;
use super::state::ClusterState;
use crate::domain::{CacheItemRequest, ClusterEvent, EventPublisher, RebalanceDirection};
use crate::error::{Error, Result};
use crate::metrics;

// =============================================================================
// Rebalance State Machine
// =============================================================================

/// States in a rebalance run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RebalanceState {
    /// Initial state
    Idle,
    /// Reading the source node's contents
    Snapshotting,
    /// Selecting keys owned by the destination
    Classifying,
    /// Writing keys to the destination and its replicas
    Copying,
    /// Deleting moved keys from the source and its replicas
    Purging,
    /// Run finished
    Completed,
    /// Run stopped; source data untouched
    Aborted,
}

impl std::fmt::Display for RebalanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RebalanceState::Idle => write!(f, "Idle"),
            RebalanceState::Snapshotting => write!(f, "Snapshotting"),
            RebalanceState::Classifying => write!(f, "Classifying"),
            RebalanceState::Copying => write!(f, "Copying"),
            RebalanceState::Purging => write!(f, "Purging"),
            RebalanceState::Completed => write!(f, "Completed"),
            RebalanceState::Aborted => write!(f, "Aborted"),
        }
    }
}

/// A step in a rebalance run
#[derive(Debug, Clone, Serialize)]
pub struct RebalanceStep {
    pub state: RebalanceState,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub duration_ms: Option<u64>,
}

/// Result of a rebalance run
#[derive(Debug, Clone, Serialize)]
pub struct RebalanceReport {
    pub direction: RebalanceDirection,

    /// Node the keys are read from
    pub source: String,

    /// Node the keys are written to
    pub destination: String,

    /// Final state
    pub state: RebalanceState,

    /// Keys copied to the destination
    pub moved_keys: usize,

    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: Duration,

    /// Reason if aborted
    pub error: Option<String>,

    /// Step-by-step log
    pub steps: Vec<RebalanceStep>,
}

impl RebalanceReport {
    fn new(direction: RebalanceDirection, source: &str, destination: &str) -> Self {
        let now = Utc::now();
        Self {
            direction,
            source: source.to_string(),
            destination: destination.to_string(),
            state: RebalanceState::Idle,
            moved_keys: 0,
            start_time: now,
            end_time: now,
            duration: Duration::ZERO,
            error: None,
            steps: vec![],
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == RebalanceState::Completed
    }

    /// Record a state transition
    fn transition(&mut self, state: RebalanceState, message: &str) {
        let now = Utc::now();
        let last_step_time = self
            .steps
            .last()
            .map(|s| s.timestamp)
            .unwrap_or(self.start_time);
        let duration_ms = (now - last_step_time).num_milliseconds().max(0) as u64;

        self.state = state;
        self.steps.push(RebalanceStep {
            state,
            timestamp: now,
            message: message.to_string(),
            duration_ms: Some(duration_ms),
        });

        self.end_time = now;
        self.duration = (now - self.start_time).to_std().unwrap_or(Duration::ZERO);
    }

    fn abort(&mut self, reason: &str) {
        self.transition(RebalanceState::Aborted, reason);
        self.error = Some(reason.to_string());
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Runs join and leave migrations
pub struct RebalanceCoordinator {
    state: Arc<ClusterState>,
    access: Arc<ReplicatedAccess>,
    events: Arc<dyn EventPublisher>,
}

impl RebalanceCoordinator {
    pub fn new(access: Arc<ReplicatedAccess>, events: Arc<dyn EventPublisher>) -> Self {
        Self {
            state: access.state().clone(),
            access,
            events,
        }
    }

    /// Pull the keys `name` now owns from its ring successor
    #[instrument(skip(self))]
    pub async fn rebalance_after_create(&self, name: &str) -> Result<RebalanceReport> {
        let destination = self
            .state
            .master(name)
            .ok_or_else(|| Error::NodeNotFound(name.to_string()))?;
        let source = self.state.successor_of(name)?;

        let mut report = RebalanceReport::new(RebalanceDirection::Join, &source.name, name);
        if source.name == destination.name {
            report.transition(RebalanceState::Completed, "Single node ring, nothing to move");
            return Ok(report);
        }

        self.publish_started(&report).await;
        report.transition(
            RebalanceState::Snapshotting,
            &format!("Reading contents of {}", source.name),
        );
        let items = match self.access.snapshot(&source).await {
            Ok(items) => items,
            Err(e) => return Err(self.aborted(report, e).await),
        };

        report.transition(
            RebalanceState::Classifying,
            &format!("Classifying {} keys", items.len()),
        );
        let mut moving = Vec::new();
        for item in &items {
            match self.state.owner_name(&item.key) {
                Ok(owner) if owner == name => moving.push(item.to_migration_request()),
                Ok(_) => {}
                Err(e) => return Err(self.aborted(report, e).await),
            }
        }
        debug!("{} of {} keys on {} now belong to {}", moving.len(), items.len(), source.name, name);

        if let Err(e) = self.copy(&mut report, &destination, &moving).await {
            return Err(self.aborted(report, e).await);
        }

        report.transition(
            RebalanceState::Purging,
            &format!("Removing {} moved keys from {}", moving.len(), source.name),
        );
        let keys: Vec<String> = moving.into_iter().map(|i| i.key).collect();
        if let Err(e) = self.access.delete_batch(&source, &keys).await {
            return Err(self.aborted(report, e).await);
        }

        self.completed(report).await
    }

    /// Push every key on `name` to its ring successor before it leaves
    #[instrument(skip(self))]
    pub async fn rebalance_before_delete(&self, name: &str) -> Result<RebalanceReport> {
        let source = self
            .state
            .master(name)
            .ok_or_else(|| Error::NotFound(format!("node {}", name)))?;
        let destination = self.state.successor_of(name)?;

        let mut report = RebalanceReport::new(RebalanceDirection::Leave, name, &destination.name);
        if destination.name == source.name {
            return Err(self
                .aborted_with(report, "last node on the ring, nowhere to move its data".to_string())
                .await);
        }

        self.publish_started(&report).await;
        report.transition(
            RebalanceState::Snapshotting,
            &format!("Reading contents of {}", name),
        );
        let items = match self.access.snapshot(&source).await {
            Ok(items) => items,
            Err(e) => return Err(self.aborted(report, e).await),
        };

        let moving: Vec<CacheItemRequest> = items.iter().map(|i| i.to_migration_request()).collect();
        if let Err(e) = self.copy(&mut report, &destination, &moving).await {
            return Err(self.aborted(report, e).await);
        }

        self.completed(report).await
    }

    async fn copy(
        &self,
        report: &mut RebalanceReport,
        destination: &Node,
        items: &[CacheItemRequest],
    ) -> Result<()> {
        report.transition(
            RebalanceState::Copying,
            &format!(
                "Copying {} keys to {} and {} replicas",
                items.len(),
                destination.name,
                destination.replicas.len()
            ),
        );
        self.access.write_batch(destination, items).await?;
        report.moved_keys = items.len();
        Ok(())
    }

    async fn publish_started(&self, report: &RebalanceReport) {
        self.publish(ClusterEvent::RebalanceStarted {
            direction: report.direction,
            source: report.source.clone(),
            destination: report.destination.clone(),
            timestamp: Utc::now(),
        })
        .await;
    }

    async fn completed(&self, mut report: RebalanceReport) -> Result<RebalanceReport> {
        report.transition(
            RebalanceState::Completed,
            &format!("Moved {} keys", report.moved_keys),
        );
        info!(
            "Rebalance ({}) {} -> {} completed: {} keys in {:?}",
            report.direction, report.source, report.destination, report.moved_keys, report.duration
        );

        let direction = report.direction.to_string();
        metrics::REBALANCES
            .with_label_values(&[direction.as_str(), "completed"])
            .inc();
        metrics::KEYS_MOVED
            .with_label_values(&[direction.as_str()])
            .inc_by(report.moved_keys as u64);

        self.publish(ClusterEvent::RebalanceCompleted {
            direction: report.direction,
            source: report.source.clone(),
            destination: report.destination.clone(),
            moved_keys: report.moved_keys,
            duration_ms: report.duration.as_millis() as u64,
            timestamp: Utc::now(),
        })
        .await;

        Ok(report)
    }

    async fn aborted(&self, report: RebalanceReport, cause: Error) -> Error {
        self.aborted_with(report, cause.to_string()).await
    }

    async fn aborted_with(&self, mut report: RebalanceReport, reason: String) -> Error {
        let node = match report.direction {
            RebalanceDirection::Join => report.destination.clone(),
            RebalanceDirection::Leave => report.source.clone(),
        };
        report.abort(&reason);
        warn!(
            "Rebalance ({}) {} -> {} aborted after {} steps: {}",
            report.direction,
            report.source,
            report.destination,
            report.steps.len(),
            reason
        );

        metrics::REBALANCES
            .with_label_values(&[report.direction.to_string().as_str(), "aborted"])
            .inc();

        self.publish(ClusterEvent::RebalanceAborted {
            direction: report.direction,
            source: report.source.clone(),
            destination: report.destination.clone(),
            reason: reason.clone(),
            timestamp: Utc::now(),
        })
        .await;

        Error::RebalanceAborted { node, reason }
    }

    async fn publish(&self, event: ClusterEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!("Failed to publish rebalance event: {}", e);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
