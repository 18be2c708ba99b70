//! HTTP Surfaces
//!
//! Both the manager and the node speak JSON over plain HTTP/1.1 served by
//! hyper. Each surface is a single async handler function; this module owns
//! the accept loop and the request/response helpers they share.
//!
//! Error bodies always have the shape `{"error": "<message>", "status": <code>}`.

pub mod cluster;
pub mod node;

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::adapters::ErrorBody;
use crate::error::{Error, Result};
use crate::metrics;

pub use cluster::ManagerContext;
pub use node::NodeContext;

/// Response type produced by every handler
pub type HttpResponse = Response<Full<Bytes>>;

/// Bind a listener on `addr` ("host:port")
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid listen address {}: {}", addr, e)))?;

    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind {}: {}", addr, e)))
}

/// Accept connections on `listener` and serve each with `handler` until
/// `cancel` fires. In-flight connections finish on their own tasks.
pub async fn serve<H, Fut>(
    listener: TcpListener,
    surface: &'static str,
    handler: H,
    cancel: CancellationToken,
) -> Result<()>
where
    H: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    let local = listener.local_addr()?;
    info!("{} server listening on {}", surface, local);

    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => {
                info!("{} server on {} shutting down", surface, local);
                return Ok(());
            }
            accepted = listener.accept() => accepted
                .map_err(|e| Error::Internal(format!("{} server accept error: {}", surface, e)))?,
        };

        let io = TokioIo::new(stream);
        let handler = handler.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let handler = handler.clone();
                async move {
                    debug!(method = %req.method(), path = %req.uri().path(), "Request");
                    Ok::<_, Infallible>(handler(req).await)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("{} server connection error from {}: {}", surface, peer, e);
            }
        });
    }
}

// =============================================================================
// Response Helpers
// =============================================================================

pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> HttpResponse {
    match serde_json::to_vec(body) {
        Ok(bytes) => Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(bytes)))
            .unwrap_or_else(|_| fallback_response()),
        Err(e) => error_body(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode response: {}", e),
        ),
    }
}

pub(crate) fn ok_json<T: Serialize>(body: &T) -> HttpResponse {
    json_response(StatusCode::OK, body)
}

pub(crate) fn error_body(status: StatusCode, message: impl Into<String>) -> HttpResponse {
    json_response(
        status,
        &ErrorBody {
            error: message.into(),
            status: status.as_u16(),
        },
    )
}

/// Map an error onto its HTTP status and standard body
pub(crate) fn error_response(err: &Error) -> HttpResponse {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_body(status, err.to_string())
}

pub(crate) fn result_response<T: Serialize>(result: Result<T>) -> HttpResponse {
    match result {
        Ok(body) => ok_json(&body),
        Err(e) => error_response(&e),
    }
}

pub(crate) fn not_found_route() -> HttpResponse {
    error_body(StatusCode::NOT_FOUND, "no such route")
}

pub(crate) fn text_response(status: StatusCode, body: &'static str) -> HttpResponse {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| fallback_response())
}

pub(crate) fn metrics_response() -> HttpResponse {
    match metrics::gather() {
        Ok((content_type, buffer)) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .body(Full::new(Bytes::from(buffer)))
            .unwrap_or_else(|_| fallback_response()),
        Err(e) => error_response(&e),
    }
}

fn fallback_response() -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from_static(b"internal error")));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

// =============================================================================
// Request Helpers
// =============================================================================

/// Read and decode a JSON body; a malformed body becomes a 400 response
pub(crate) async fn read_json<T: DeserializeOwned>(
    req: Request<Incoming>,
) -> std::result::Result<T, HttpResponse> {
    let bytes = req
        .into_body()
        .collect()
        .await
        .map_err(|e| error_body(StatusCode::BAD_REQUEST, format!("Failed to read body: {}", e)))?
        .to_bytes();

    serde_json::from_slice(&bytes)
        .map_err(|e| error_body(StatusCode::BAD_REQUEST, format!("Invalid JSON body: {}", e)))
}

/// Non-empty path segments, still percent-encoded
pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Percent-decode a path segment
pub(crate) fn decode_segment(segment: &str) -> std::result::Result<String, HttpResponse> {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .map_err(|e| error_body(StatusCode::BAD_REQUEST, format!("Invalid path segment: {}", e)))
}

/// Value of a query parameter, if present
pub(crate) fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        (k == name).then(|| urlencoding::decode(v).map(|v| v.into_owned()).unwrap_or_default())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_and_decoding() {
        assert_eq!(segments("/cluster/cache/a%2Fb/"), vec!["cluster", "cache", "a%2Fb"]);
        assert_eq!(decode_segment("a%2Fb%20c").unwrap(), "a/b c");
    }

    #[test]
    fn test_query_param() {
        assert_eq!(query_param(Some("force=true&x=1"), "force").as_deref(), Some("true"));
        assert_eq!(query_param(Some("force"), "force").as_deref(), Some(""));
        assert_eq!(query_param(Some("x=1"), "force"), None);
        assert_eq!(query_param(None, "force"), None);
    }

    #[test]
    fn test_error_response_status() {
        let response = error_response(&Error::RebalanceAborted {
            node: "a".into(),
            reason: "nope".into(),
        });
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = error_response(&Error::NodeRequest {
            node: "a".into(),
            status: 507,
            message: "full".into(),
        });
        assert_eq!(response.status().as_u16(), 507);
    }
}
