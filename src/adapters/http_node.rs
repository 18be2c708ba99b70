//! HTTP Node Client Adapter
//!
//! Implements the `NodeClient` port against the node HTTP surface with
//! reqwest. Every call carries a timeout; transport errors and timeouts become
//! `Error::NodeUnavailable`, non-success answers become `Error::NodeRequest`
//! with the node's own status code (404 and 410 on reads become `NotFound`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::cluster::Node;
use crate::domain::ports::{
    CacheItemRequest, CacheItemResponse, DeleteManyResponse, NodeClient, NodeHealthReport,
};
use crate::error::{Error, Result};

/// Configuration for the HTTP node client
#[derive(Debug, Clone)]
pub struct HttpNodeClientConfig {
    /// Timeout for data-plane calls
    pub request_timeout: Duration,

    /// Timeout for establishing a connection
    pub connect_timeout: Duration,
}

impl Default for HttpNodeClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

/// Error body shared by both HTTP surfaces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub status: u16,
}

/// Body of `POST /cluster/register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub address: String,
}

/// reqwest-backed node client
#[derive(Debug, Clone)]
pub struct HttpNodeClient {
    config: HttpNodeClientConfig,
    client: Client,
}

impl HttpNodeClient {
    pub fn new(config: HttpNodeClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &HttpNodeClientConfig {
        &self.config
    }

    fn url(node: &Node, path: &str) -> String {
        format!("{}{}", node.address, path)
    }

    fn unavailable(node: &Node, err: reqwest::Error) -> Error {
        let reason = if err.is_timeout() {
            "request timed out".to_string()
        } else {
            err.to_string()
        };
        Error::NodeUnavailable {
            node: node.name.clone(),
            reason,
        }
    }

    /// Turn a non-success response into `NodeRequest`, keeping the node's message
    async fn rejected(node: &Node, response: Response) -> Error {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error)
            .unwrap_or(text);
        Error::NodeRequest {
            node: node.name.clone(),
            status,
            message,
        }
    }

    async fn decode<T: DeserializeOwned>(node: &Node, response: Response) -> Result<T> {
        response.json().await.map_err(|e| Error::NodeRequest {
            node: node.name.clone(),
            status: 502,
            message: format!("malformed response: {}", e),
        })
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    #[instrument(skip(self, node), fields(node = %node.name))]
    async fn get_item(&self, node: &Node, key: &str) -> Result<Value> {
        // `/cache/all` is the snapshot route on the node
        if key == "all" {
            return self
                .snapshot(node)
                .await?
                .into_iter()
                .find(|item| item.key == key)
                .map(|item| item.value)
                .ok_or_else(|| Error::NotFound(format!("key {}", key)));
        }

        let url = Self::url(node, &format!("/cache/{}", urlencoding::encode(key)));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::unavailable(node, e))?;

        match response.status() {
            s if s.is_success() => Self::decode(node, response).await,
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                Err(Error::NotFound(format!("key {}", key)))
            }
            _ => Err(Self::rejected(node, response).await),
        }
    }

    #[instrument(skip(self, node, item), fields(node = %node.name, key = %item.key))]
    async fn set_item(&self, node: &Node, item: &CacheItemRequest) -> Result<()> {
        let response = self
            .client
            .put(Self::url(node, "/cache/single"))
            .json(item)
            .send()
            .await
            .map_err(|e| Self::unavailable(node, e))?;

        if !response.status().is_success() {
            return Err(Self::rejected(node, response).await);
        }
        Ok(())
    }

    #[instrument(skip(self, node, items), fields(node = %node.name, count = items.len()))]
    async fn set_items(&self, node: &Node, items: &[CacheItemRequest]) -> Result<()> {
        let response = self
            .client
            .put(Self::url(node, "/cache/multiple"))
            .json(items)
            .send()
            .await
            .map_err(|e| Self::unavailable(node, e))?;

        if !response.status().is_success() {
            return Err(Self::rejected(node, response).await);
        }
        debug!("Wrote {} items", items.len());
        Ok(())
    }

    #[instrument(skip(self, node, keys), fields(node = %node.name, count = keys.len()))]
    async fn delete_items(&self, node: &Node, keys: &[String]) -> Result<DeleteManyResponse> {
        let response = self
            .client
            .post(Self::url(node, "/cache/delete/multiple"))
            .json(keys)
            .send()
            .await
            .map_err(|e| Self::unavailable(node, e))?;

        if !response.status().is_success() {
            return Err(Self::rejected(node, response).await);
        }
        Self::decode(node, response).await
    }

    #[instrument(skip(self, node), fields(node = %node.name))]
    async fn snapshot(&self, node: &Node) -> Result<Vec<CacheItemResponse>> {
        let response = self
            .client
            .get(Self::url(node, "/cache/all"))
            .send()
            .await
            .map_err(|e| Self::unavailable(node, e))?;

        if !response.status().is_success() {
            return Err(Self::rejected(node, response).await);
        }
        Self::decode(node, response).await
    }

    async fn health(&self, node: &Node, timeout: Duration) -> Result<NodeHealthReport> {
        let response = self
            .client
            .get(Self::url(node, "/health"))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::unavailable(node, e))?;

        if !response.status().is_success() {
            return Err(Self::rejected(node, response).await);
        }
        Self::decode(node, response).await
    }
}

/// Announce a node to the manager at `manager_url`
#[instrument]
pub async fn register_with_manager(manager_url: &str, name: &str, address: &str) -> Result<Node> {
    let client = Client::builder()
        .timeout(HttpNodeClientConfig::default().request_timeout)
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

    let url = format!("{}/cluster/register", manager_url.trim_end_matches('/'));
    let response = client
        .post(&url)
        .json(&RegisterRequest {
            name: name.to_string(),
            address: address.to_string(),
        })
        .send()
        .await
        .map_err(|e| Error::NodeUnavailable {
            node: "manager".to_string(),
            reason: e.to_string(),
        })?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        return Err(Error::NodeRequest {
            node: "manager".to_string(),
            status,
            message: text,
        });
    }

    response.json().await.map_err(|e| Error::NodeRequest {
        node: "manager".to_string(),
        status: 502,
        message: format!("malformed response: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = HttpNodeClientConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_unavailable() {
        let client = HttpNodeClient::new(HttpNodeClientConfig {
            request_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_millis(200),
        })
        .unwrap();
        // Port 9 on loopback is the discard service; nothing listens there in CI.
        let node = Node::new("ghost", "ghost", "http://127.0.0.1:9");

        let err = client
            .health(&node, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(err.node(), Some("ghost"));
    }

    #[test]
    fn test_error_body_shape() {
        let body: ErrorBody =
            serde_json::from_str(r#"{"error":"Not found: key k","status":404}"#).unwrap();
        assert_eq!(body.status, 404);
    }
}
