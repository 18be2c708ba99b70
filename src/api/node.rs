//! Node HTTP Surface
//!
//! The data plane of a single cache node, backed by a local [`CacheStore`].
//!
//! | Method | Path | Response |
//! |---|---|---|
//! | GET | `/cache/all` | `[CacheItemResponse]` |
//! | GET | `/cache/{key}` | value; 404 missing, 410 expired |
//! | PUT | `/cache/single` | body `CacheItemRequest` |
//! | PUT | `/cache/multiple` | body `[CacheItemRequest]` |
//! | POST | `/cache/delete/multiple` | body `[key]` → `DeleteManyResponse` |
//! | GET | `/health` | `NodeHealthReport` |
//!
//! `/cache/all` is matched before `/cache/{key}`, so a key literally named
//! `all` cannot be read through `/cache/{key}`; clients find it in the
//! snapshot instead.

use std::sync::Arc;

use hyper::body::Incoming;
use hyper::{Method, Request, StatusCode};
use serde_json::json;
use tracing::debug;

use super::{
    decode_segment, error_body, metrics_response, not_found_route, ok_json, read_json, segments,
    text_response, HttpResponse,
};
use crate::domain::{CacheItemRequest, CacheItemResponse, DeleteManyResponse, NodeHealthReport};
use crate::metrics;
use crate::store::{CacheStore, Lookup};

/// Shared handles for the node handler
#[derive(Clone)]
pub struct NodeContext {
    pub name: Arc<str>,
    pub store: Arc<CacheStore>,
}

impl NodeContext {
    pub fn new(name: impl Into<Arc<str>>, store: Arc<CacheStore>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }
}

/// Route one node request
pub async fn handle(ctx: NodeContext, req: Request<Incoming>) -> HttpResponse {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let parts = segments(&path);

    match (&method, parts.as_slice()) {
        (&Method::GET, ["health"]) => ok_json(&NodeHealthReport {
            status: "healthy".to_string(),
            item_count: ctx.store.len(),
        }),
        (&Method::GET, ["healthz"]) => text_response(StatusCode::OK, "ok"),
        (&Method::GET, ["metrics"]) => {
            metrics::STORE_ITEMS.set(ctx.store.len() as i64);
            metrics_response()
        }

        (&Method::GET, ["cache", "all"]) => {
            let now = ctx.store.clock().now();
            let items: Vec<CacheItemResponse> = ctx
                .store
                .snapshot()
                .iter()
                .map(|item| CacheItemResponse::from_item(item, now))
                .collect();
            ok_json(&items)
        }

        (&Method::GET, ["cache", key]) => {
            let key = match decode_segment(key) {
                Ok(key) => key,
                Err(response) => return response,
            };
            match ctx.store.lookup(&key) {
                Lookup::Hit(item) => ok_json(&item.value),
                Lookup::Expired => error_body(StatusCode::GONE, format!("key {} expired", key)),
                Lookup::Missing => error_body(StatusCode::NOT_FOUND, format!("key {} not found", key)),
            }
        }

        (&Method::PUT, ["cache", "single"]) => {
            let item: CacheItemRequest = match read_json(req).await {
                Ok(item) => item,
                Err(response) => return response,
            };
            let ttl = item.ttl_duration();
            ctx.store.set(item.key.clone(), item.value, ttl);
            ok_json(&json!({ "key": item.key }))
        }

        (&Method::PUT, ["cache", "multiple"]) => {
            let items: Vec<CacheItemRequest> = match read_json(req).await {
                Ok(items) => items,
                Err(response) => return response,
            };
            let written = ctx.store.set_many(items.into_iter().map(|i| {
                let ttl = i.ttl_duration();
                (i.key, i.value, ttl)
            }));
            debug!(node = %ctx.name, "Stored {} items", written);
            ok_json(&json!({ "written": written }))
        }

        (&Method::POST, ["cache", "delete", "multiple"]) => {
            let keys: Vec<String> = match read_json(req).await {
                Ok(keys) => keys,
                Err(response) => return response,
            };
            ok_json(&DeleteManyResponse::from(ctx.store.delete_many(&keys)))
        }

        _ => not_found_route(),
    }
}
