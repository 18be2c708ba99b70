//! Kubernetes Provisioner Adapter
//!
//! Implements the `Provisioner` port with one Pod per cache node. Pods are
//! labelled so the manager can rediscover its fleet after a restart:
//!
//! | Label | Value |
//! |---|---|
//! | `app` | `ringcache` |
//! | `ringcache/master` | ring name of the master the pod belongs to |
//! | `ringcache/replica` | `true` for replicas, `false` for masters |
//!
//! The master pod is named after the requested node, so the pod name is also
//! the ring name; replicas get `<master>-replica-<8 hex>`.
//!
//! Each pod sets `hostname` and `subdomain` so it is reachable at
//! `http://<pod>.<service>.<namespace>.svc:<port>` through a headless service.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::future::join_all;
use k8s_openapi::api::core::v1::{Container, ContainerPort, EnvVar, Pod, PodSpec};
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams};
use kube::Client;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::ports::{InventoryEntry, NodeRole, ProvisionedNode, Provisioner};
use crate::error::{Error, Result};

pub const APP_LABEL: &str = "app";
pub const APP_NAME: &str = "ringcache";
pub const MASTER_LABEL: &str = "ringcache/master";
pub const REPLICA_LABEL: &str = "ringcache/replica";

const DNS_LABEL_MAX: usize = 63;
const REPLICA_SUFFIX_LEN: usize = "-replica-".len() + 8;

/// Configuration for the Kubernetes provisioner
#[derive(Debug, Clone)]
pub struct KubernetesProvisionerConfig {
    /// Namespace the node pods live in
    pub namespace: String,

    /// Container image running `ringcache node`
    pub image: String,

    /// Headless service giving pods stable DNS names
    pub service: String,

    /// Port the node HTTP surface listens on
    pub port: u16,
}

impl Default for KubernetesProvisionerConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            image: "ringcache:latest".to_string(),
            service: "ringcache-nodes".to_string(),
            port: 8080,
        }
    }
}

/// Pod-per-node provisioner
#[derive(Clone)]
pub struct KubernetesProvisioner {
    client: Client,
    config: KubernetesProvisionerConfig,
}

impl KubernetesProvisioner {
    pub fn new(client: Client, config: KubernetesProvisionerConfig) -> Self {
        Self { client, config }
    }

    fn pods_api(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    /// Check that a requested node name can be used verbatim as a pod name.
    ///
    /// Pod names are DNS-1123 labels; the longest replica name
    /// (`<name>-replica-<8 hex>`) must fit as well.
    pub fn validate_node_name(name: &str) -> Result<()> {
        let max = DNS_LABEL_MAX - REPLICA_SUFFIX_LEN;
        let valid_chars = name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
        let valid_ends = !name.starts_with('-') && !name.ends_with('-');

        if name.is_empty() || name.len() > max || !valid_chars || !valid_ends {
            return Err(Error::InvalidTopologyRequest(format!(
                "node name {:?} must be a lowercase DNS label of at most {} characters",
                name, max
            )));
        }
        Ok(())
    }

    /// Pod name for a replica of `master`: `<master>-replica-<8 hex chars>`
    fn replica_pod_name(master: &str) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-replica-{}", master, &suffix[..8])
    }

    /// Pod names for a master and its replicas, master first
    fn pod_plan(name: &str, replica_count: usize) -> Result<Vec<String>> {
        Self::validate_node_name(name)?;
        Ok(std::iter::once(name.to_string())
            .chain((1..replica_count).map(|_| Self::replica_pod_name(name)))
            .collect())
    }

    async fn create_pod(&self, pod_name: &str, master: &str, replica: bool) -> Result<ProvisionedNode> {
        let pod = self.build_pod(pod_name, master, replica);
        self.pods_api()
            .create(&PostParams::default(), &pod)
            .await
            .map_err(|e| {
                Error::ProvisionerFailure(format!("failed to create pod {}: {}", pod_name, e))
            })?;

        Ok(ProvisionedNode {
            name: pod_name.to_string(),
            id: pod_name.to_string(),
            address: self.address(pod_name),
        })
    }

    async fn rollback(&self, created: &[ProvisionedNode]) {
        let results = join_all(created.iter().map(|node| self.delete_pod(&node.id))).await;
        for (node, result) in created.iter().zip(results) {
            if let Err(e) = result {
                warn!(pod = %node.id, "Rollback failed: {}", e);
            }
        }
    }

    fn address(&self, pod_name: &str) -> String {
        format!(
            "http://{}.{}.{}.svc:{}",
            pod_name, self.config.service, self.config.namespace, self.config.port
        )
    }

    fn build_pod(&self, pod_name: &str, master: &str, replica: bool) -> Pod {
        let labels: BTreeMap<String, String> = [
            (APP_LABEL.to_string(), APP_NAME.to_string()),
            (MASTER_LABEL.to_string(), master.to_string()),
            (REPLICA_LABEL.to_string(), replica.to_string()),
        ]
        .into();

        Pod {
            metadata: ObjectMeta {
                name: Some(pod_name.to_string()),
                namespace: Some(self.config.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(PodSpec {
                hostname: Some(pod_name.to_string()),
                subdomain: Some(self.config.service.clone()),
                containers: vec![Container {
                    name: "ringcache".to_string(),
                    image: Some(self.config.image.clone()),
                    args: Some(vec![
                        "node".to_string(),
                        "--listen-addr".to_string(),
                        format!("0.0.0.0:{}", self.config.port),
                    ]),
                    env: Some(vec![EnvVar {
                        name: "RINGCACHE_NODE_NAME".to_string(),
                        value: Some(pod_name.to_string()),
                        ..Default::default()
                    }]),
                    ports: Some(vec![ContainerPort {
                        container_port: i32::from(self.config.port),
                        name: Some("http".to_string()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn to_inventory(&self, pod: &Pod) -> Option<InventoryEntry> {
        let name = pod.metadata.name.clone()?;
        let labels = pod.metadata.labels.as_ref()?;
        let master = labels.get(MASTER_LABEL)?;
        let role = if labels.get(REPLICA_LABEL).map(String::as_str) == Some("true") {
            NodeRole::Replica {
                master: master.clone(),
            }
        } else {
            NodeRole::Master
        };

        Some(InventoryEntry {
            id: name.clone(),
            address: self.address(&name),
            name,
            role,
            state: pod_state(pod).to_string(),
        })
    }

    async fn delete_pod(&self, pod_name: &str) -> Result<()> {
        match self
            .pods_api()
            .delete(pod_name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(pod = %pod_name, "Pod already gone");
                Ok(())
            }
            Err(e) => Err(Error::ProvisionerFailure(format!(
                "failed to delete pod {}: {}",
                pod_name, e
            ))),
        }
    }
}

impl std::fmt::Debug for KubernetesProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesProvisioner")
            .field("config", &self.config)
            .finish()
    }
}

/// Translate pod phase and container state into a provisioner state string
pub fn pod_state(pod: &Pod) -> &'static str {
    if pod.metadata.deletion_timestamp.is_some() {
        return "exited";
    }

    let Some(status) = pod.status.as_ref() else {
        return "created";
    };

    match status.phase.as_deref() {
        Some("Pending") => "created",
        Some("Running") => {
            let container = status
                .container_statuses
                .as_ref()
                .and_then(|statuses| statuses.first())
                .and_then(|s| s.state.as_ref());
            match container {
                Some(state) if state.running.is_some() => "running",
                Some(state) if state.terminated.is_some() => "exited",
                Some(state) if state.waiting.is_some() => "restarting",
                _ => "created",
            }
        }
        Some("Succeeded") => "exited",
        Some("Failed") => "dead",
        _ => "unknown",
    }
}

#[async_trait]
impl Provisioner for KubernetesProvisioner {
    #[instrument(skip(self))]
    async fn create(&self, name: &str, replica_count: usize) -> Result<Vec<ProvisionedNode>> {
        let plan = Self::pod_plan(name, replica_count)?;
        let Some((master_pod, replica_pods)) = plan.split_first() else {
            return Ok(Vec::new());
        };

        let master = self.create_pod(master_pod, name, false).await?;

        let results = join_all(
            replica_pods
                .iter()
                .map(|pod_name| self.create_pod(pod_name, name, true)),
        )
        .await;

        let mut created = vec![master];
        let mut first_error = None;
        for result in results {
            match result {
                Ok(node) => created.push(node),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            warn!(master = %name, "Replica creation failed, rolling back {} pods: {}", created.len(), e);
            self.rollback(&created).await;
            return Err(e);
        }

        info!(master = %name, "Created {} pods", created.len());
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn destroy(&self, id: &str) -> Result<()> {
        self.delete_pod(id).await
    }

    async fn inventory(&self) -> Result<Vec<InventoryEntry>> {
        let params = ListParams::default().labels(&format!("{}={}", APP_LABEL, APP_NAME));
        let list = self
            .pods_api()
            .list(&params)
            .await
            .map_err(|e| Error::ProvisionerFailure(format!("failed to list pods: {}", e)))?;

        Ok(list
            .items
            .iter()
            .filter_map(|pod| self.to_inventory(pod))
            .collect())
    }

    fn name(&self) -> &'static str {
        "kubernetes"
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStateWaiting,
        ContainerStatus, PodStatus,
    };

    fn pod_with(phase: &str, state: Option<ContainerState>) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                container_statuses: state.map(|s| {
                    vec![ContainerStatus {
                        name: "ringcache".to_string(),
                        state: Some(s),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_state_translation() {
        let running = ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        };
        let waiting = ContainerState {
            waiting: Some(ContainerStateWaiting::default()),
            ..Default::default()
        };
        let terminated = ContainerState {
            terminated: Some(ContainerStateTerminated::default()),
            ..Default::default()
        };

        assert_eq!(pod_state(&Pod::default()), "created");
        assert_eq!(pod_state(&pod_with("Pending", None)), "created");
        assert_eq!(pod_state(&pod_with("Running", Some(running))), "running");
        assert_eq!(pod_state(&pod_with("Running", Some(waiting))), "restarting");
        assert_eq!(pod_state(&pod_with("Running", Some(terminated))), "exited");
        assert_eq!(pod_state(&pod_with("Failed", None)), "dead");
        assert_eq!(pod_state(&pod_with("Unknown", None)), "unknown");
    }

    #[test]
    fn test_master_pod_keeps_requested_name() {
        let plan = KubernetesProvisioner::pod_plan("cache-d", 3).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0], "cache-d");

        for replica in &plan[1..] {
            assert!(replica.starts_with("cache-d-replica-"));
            assert_eq!(replica.len(), "cache-d".len() + REPLICA_SUFFIX_LEN);
        }
        assert_ne!(plan[1], plan[2]);
    }

    #[test]
    fn test_single_copy_plan_is_master_only() {
        assert_eq!(KubernetesProvisioner::pod_plan("solo", 1).unwrap(), vec!["solo"]);
    }

    #[test]
    fn test_node_name_must_be_dns_label() {
        for bad in ["", "D", "has_underscore", "-lead", "trail-", "a.b"] {
            assert_matches!(
                KubernetesProvisioner::validate_node_name(bad),
                Err(Error::InvalidTopologyRequest(_)),
                "{:?}",
                bad
            );
        }

        let longest = "a".repeat(DNS_LABEL_MAX - REPLICA_SUFFIX_LEN);
        assert!(KubernetesProvisioner::validate_node_name(&longest).is_ok());
        assert!(KubernetesProvisioner::validate_node_name(&format!("{}a", longest)).is_err());
        assert!(KubernetesProvisioner::validate_node_name("node-7").is_ok());
    }
}
