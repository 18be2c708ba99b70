//! Node Health Monitor
//!
//! Periodically reconciles every master and replica against the provisioner's
//! inventory and a live `/health` probe.
//!
//! ```text
//!   inventory state ──► ProvisionerState ──► NodeStatus
//!                                               │ Online?
//!                                               ▼
//!                                        GET /health ── fail ──► Offline
//! ```
//!
//! A master moving from any other status to Online pulls its keys from its
//! ring successor before the new status is recorded. If that rebalance
//! fails the old status is kept, so the next pass tries again. The monitor
//! never removes nodes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::node::{Node, NodeStatus, ProvisionerState};
use super::rebalance::RebalanceCoordinator;
use super::state::ClusterState;
use crate::domain::{ClusterEvent, EventPublisher, NodeClient, Provisioner};
use crate::metrics;

/// Configuration for the health monitor
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Time between passes
    pub poll_interval: Duration,

    /// Bound on each `/health` probe
    pub probe_timeout: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// What one pass observed
#[derive(Debug, Clone, Default)]
pub struct PollSummary {
    /// Nodes examined (masters and replicas)
    pub checked: usize,

    /// Nodes whose status changed
    pub changed: usize,

    /// Masters that came Online and received their keys
    pub rebalanced: Vec<String>,

    /// Masters that came Online but whose rebalance failed
    pub rebalance_failures: Vec<String>,

    /// True when the inventory could not be read and the pass did nothing
    pub skipped: bool,
}

/// Background reconciler of node status
pub struct NodeHealthMonitor {
    config: HealthMonitorConfig,
    state: Arc<ClusterState>,
    provisioner: Arc<dyn Provisioner>,
    client: Arc<dyn NodeClient>,
    rebalancer: Arc<RebalanceCoordinator>,
    events: Arc<dyn EventPublisher>,
}

impl NodeHealthMonitor {
    pub fn new(
        config: HealthMonitorConfig,
        state: Arc<ClusterState>,
        provisioner: Arc<dyn Provisioner>,
        client: Arc<dyn NodeClient>,
        rebalancer: Arc<RebalanceCoordinator>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            config,
            state,
            provisioner,
            client,
            rebalancer,
            events,
        }
    }

    /// Run passes on the configured interval until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Health monitor started (interval {:?}, probe timeout {:?})",
            self.config.poll_interval, self.config.probe_timeout
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Health monitor stopping");
                    break;
                }
                _ = interval.tick() => {
                    let summary = self.poll_once().await;
                    debug!(
                        checked = summary.checked,
                        changed = summary.changed,
                        skipped = summary.skipped,
                        "Health pass finished"
                    );
                }
            }
        }
    }

    /// One reconciliation pass over every registered node
    #[instrument(skip(self))]
    pub async fn poll_once(&self) -> PollSummary {
        let timer = metrics::HEALTH_POLL_SECONDS.start_timer();
        let mut summary = PollSummary::default();

        let inventory = match self.provisioner.inventory().await {
            Ok(inventory) => inventory,
            Err(e) => {
                warn!("Skipping health pass, inventory unavailable: {}", e);
                summary.skipped = true;
                return summary;
            }
        };
        let states: HashMap<String, String> =
            inventory.into_iter().map(|e| (e.id, e.state)).collect();

        for master in self.state.masters() {
            for node in master.write_set() {
                summary.checked += 1;
                let observed = self.observe(node, &states).await;

                let is_master = node.name == master.name;
                if is_master && !node.status.is_online() && observed.is_online() {
                    match self.rebalancer.rebalance_after_create(&node.name).await {
                        Ok(report) => {
                            info!("{} is Online, received {} keys", node.name, report.moved_keys);
                            summary.rebalanced.push(node.name.clone());
                        }
                        Err(e) => {
                            warn!("{} is Online but rebalance failed, retrying next pass: {}", node.name, e);
                            summary.rebalance_failures.push(node.name.clone());
                            continue;
                        }
                    }
                }

                if self.apply(node, observed).await {
                    summary.changed += 1;
                }
            }
        }

        timer.observe_duration();
        summary
    }

    /// Status implied by the inventory, confirmed by a probe when Online
    async fn observe(&self, node: &Node, states: &HashMap<String, String>) -> NodeStatus {
        let status = match states.get(&node.id) {
            Some(state) => NodeStatus::from(&ProvisionerState::parse(state)),
            None if !self.provisioner.tracks_lifecycle() => {
                NodeStatus::from(&ProvisionerState::Running)
            }
            None => NodeStatus::NotFound,
        };

        if !status.is_online() {
            return status;
        }

        match self.client.health(node, self.config.probe_timeout).await {
            Ok(_) => NodeStatus::Online,
            Err(e) => {
                debug!("Probe of {} failed: {}", node.name, e);
                NodeStatus::Offline
            }
        }
    }

    /// Record `status`; returns true if it differs from the previous one
    async fn apply(&self, node: &Node, status: NodeStatus) -> bool {
        let Some(previous) = self.state.set_status(&node.name, status) else {
            // removed while the pass was running
            return false;
        };
        if previous == status {
            return false;
        }

        info!("{} status {} -> {}", node.name, previous, status);
        metrics::STATUS_CHANGES
            .with_label_values(&[status.to_string().as_str()])
            .inc();

        let event = ClusterEvent::NodeStatusChanged {
            name: node.name.clone(),
            from: previous,
            to: status,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.events.publish(event).await {
            warn!("Failed to publish status event: {}", e);
        }
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
