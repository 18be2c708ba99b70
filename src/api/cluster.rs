//! Manager HTTP Surface
//!
//! | Method | Path | Body / Response |
//! |---|---|---|
//! | POST | `/cluster/register` | `{name, address}` → node |
//! | GET | `/cluster/cache/{key}` | `{key, value}` |
//! | PUT | `/cluster/cache` | `CacheItemRequest` |
//! | DELETE | `/cluster/cache/{key}` | |
//! | POST | `/cluster/nodes/create/{name}/{replicaCount}` | `[ProvisionedNode]` |
//! | DELETE | `/cluster/nodes/delete/{name}?force=bool` | `DeleteOutcome` |
//! | GET | `/monitor/nodes` | `[NodeWithData]` |
//! | GET | `/monitor/node/status/{name}` | `NodeProbe` |
//! | GET | `/monitor/ring` | `[RingSlot]` |
//! | GET | `/healthz`, `/metrics` | |

use std::sync::Arc;

use hyper::body::Incoming;
use hyper::{Method, Request, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    decode_segment, error_body, metrics_response, not_found_route, ok_json, query_param,
    read_json, result_response, segments, text_response, HttpResponse,
};
use crate::adapters::RegisterRequest;
use crate::cluster::{ClusterState, NodeRegistry, ReplicatedAccess};
use crate::domain::CacheItemRequest;

/// Key and value returned by a cluster read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheValue {
    pub key: String,
    pub value: Value,
}

/// Shared handles for the manager handler
#[derive(Clone)]
pub struct ManagerContext {
    pub state: Arc<ClusterState>,
    pub access: Arc<ReplicatedAccess>,
    pub registry: Arc<NodeRegistry>,
}

impl ManagerContext {
    pub fn new(access: Arc<ReplicatedAccess>, registry: Arc<NodeRegistry>) -> Self {
        Self {
            state: access.state().clone(),
            access,
            registry,
        }
    }
}

/// Route one manager request
pub async fn handle(ctx: ManagerContext, req: Request<Incoming>) -> HttpResponse {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let parts = segments(&path);

    match (&method, parts.as_slice()) {
        (&Method::GET, ["healthz"]) | (&Method::GET, ["livez"]) => text_response(StatusCode::OK, "ok"),
        (&Method::GET, ["metrics"]) => metrics_response(),

        (&Method::POST, ["cluster", "register"]) => {
            let body: RegisterRequest = match read_json(req).await {
                Ok(body) => body,
                Err(response) => return response,
            };
            result_response(ctx.registry.register(&body.name, &body.address).await)
        }

        (&Method::GET, ["cluster", "cache", key]) => {
            let key = match decode_segment(key) {
                Ok(key) => key,
                Err(response) => return response,
            };
            let result = ctx.access.read(&key).await.map(|value| CacheValue { key, value });
            result_response(result)
        }

        (&Method::PUT, ["cluster", "cache"]) => {
            let item: CacheItemRequest = match read_json(req).await {
                Ok(item) => item,
                Err(response) => return response,
            };
            if item.key.is_empty() {
                return error_body(StatusCode::BAD_REQUEST, "key must not be empty");
            }
            let ttl = item.ttl_duration();
            let result = ctx.access.write(&item.key, item.value, ttl).await;
            result_response(result.map(|()| serde_json::json!({ "key": item.key })))
        }

        (&Method::DELETE, ["cluster", "cache", key]) => {
            let key = match decode_segment(key) {
                Ok(key) => key,
                Err(response) => return response,
            };
            let result = ctx.access.delete(&key).await;
            result_response(result.map(|()| serde_json::json!({ "key": key })))
        }

        (&Method::POST, ["cluster", "nodes", "create", name, count]) => {
            let name = match decode_segment(name) {
                Ok(name) => name,
                Err(response) => return response,
            };
            let Ok(count) = count.parse::<usize>() else {
                return error_body(
                    StatusCode::BAD_REQUEST,
                    format!("replica count must be a number, got {}", count),
                );
            };
            result_response(ctx.registry.create_node(&name, count).await)
        }

        (&Method::DELETE, ["cluster", "nodes", "delete", name]) => {
            let name = match decode_segment(name) {
                Ok(name) => name,
                Err(response) => return response,
            };
            let force = match query_param(query.as_deref(), "force").as_deref() {
                None | Some("false") => false,
                Some("") | Some("true") => true,
                Some(other) => {
                    return error_body(
                        StatusCode::BAD_REQUEST,
                        format!("force must be true or false, got {}", other),
                    )
                }
            };
            result_response(ctx.registry.delete_node(&name, force).await)
        }

        (&Method::GET, ["monitor", "nodes"]) => result_response(ctx.access.all_nodes_with_data().await),

        (&Method::GET, ["monitor", "node", "status", name]) => {
            let name = match decode_segment(name) {
                Ok(name) => name,
                Err(response) => return response,
            };
            result_response(ctx.access.probe(&name).await)
        }

        (&Method::GET, ["monitor", "ring"]) => ok_json(&ctx.state.ring_snapshot()),

        _ => not_found_route(),
    }
}
