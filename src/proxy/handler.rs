//! Forwarding request handler
//!
//! Picks one upstream proxy per inbound request, relays the request through it
//! and queues the outcome for the health tracker. The relay itself is done by
//! an [`UpstreamClient`], which owns the HTTP/SOCKS negotiation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use http::header::{HeaderValue, CONTENT_TYPE, HOST};
use http::{HeaderMap, Method};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use tracing::{debug, error, instrument, warn};
use url::Url;

use crate::config::ForwardLatency;
use crate::error::{Result, RotatorError};
use crate::models::Proxy;
use crate::pool::ProxySelector;
use crate::services::HealthReporter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A request ready to be relayed upstream
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The upstream answer, fully buffered
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Sends one request through a given upstream proxy
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(&self, proxy: &Proxy, request: OutboundRequest) -> Result<UpstreamResponse>;
}

/// Upper bound on cached per-proxy clients before the cache is reset
const MAX_CACHED_CLIENTS: usize = 1024;

/// reqwest-backed upstream client, one pooled client per upstream proxy.
///
/// Clients are keyed by proxy id and dropped when a relay through them fails,
/// so retired and deleted proxies do not keep connection pools alive.
pub struct ReqwestUpstream {
    timeout: Duration,
    clients: DashMap<i32, (String, reqwest::Client)>,
}

impl ReqwestUpstream {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: DashMap::new(),
        }
    }

    fn client_for(&self, proxy: &Proxy) -> Result<reqwest::Client> {
        let upstream = proxy.upstream_url()?;
        let key = upstream.to_string();

        if let Some(entry) = self.clients.get(&proxy.id) {
            let (cached_url, client) = entry.value();
            if *cached_url == key {
                return Ok(client.clone());
            }
        }

        let client = reqwest::Client::builder()
            .proxy(reqwest::Proxy::all(upstream)?)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(self.timeout)
            .build()?;

        if self.clients.len() >= MAX_CACHED_CLIENTS && !self.clients.contains_key(&proxy.id) {
            debug!(cached = self.clients.len(), "Resetting upstream client cache");
            self.clients.clear();
        }
        self.clients.insert(proxy.id, (key, client.clone()));
        Ok(client)
    }

    fn evict(&self, id: i32) {
        if self.clients.remove(&id).is_some() {
            debug!(id = id, "Dropped cached upstream client");
        }
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstream {
    async fn send(&self, proxy: &Proxy, request: OutboundRequest) -> Result<UpstreamResponse> {
        // A proxy whose client cannot be built is the proxy's fault
        let client = self
            .client_for(proxy)
            .map_err(|e| RotatorError::UpstreamFailed(e.to_string()))?;

        let relayed = relay(&client, request).await;
        if relayed.is_err() {
            self.evict(proxy.id);
        }
        relayed
    }
}

async fn relay(client: &reqwest::Client, request: OutboundRequest) -> Result<UpstreamResponse> {
    let response = client
        .request(request.method, &request.url)
        .headers(request.headers)
        .body(request.body)
        .send()
        .await?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;

    Ok(UpstreamResponse {
        status,
        headers,
        body,
    })
}

/// Forwarding request handler
pub struct ProxyHandler {
    selector: Arc<dyn ProxySelector>,
    upstream: Arc<dyn UpstreamClient>,
    reporter: HealthReporter,
    latency: ForwardLatency,
    max_body_size: usize,
}

impl ProxyHandler {
    pub fn new(
        selector: Arc<dyn ProxySelector>,
        upstream: Arc<dyn UpstreamClient>,
        reporter: HealthReporter,
        latency: ForwardLatency,
        max_body_size: usize,
    ) -> Self {
        Self {
            selector,
            upstream,
            reporter,
            latency,
            max_body_size,
        }
    }

    /// Handle one inbound request. Failures become error responses.
    #[instrument(skip(self, req), fields(method = %req.method(), uri = %req.uri()))]
    pub async fn handle<B>(&self, req: Request<B>, client_ip: &str) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        if req.method() == Method::CONNECT {
            debug!(client = client_ip, "Rejecting CONNECT request");
            return error_response(
                StatusCode::NOT_IMPLEMENTED,
                "CONNECT tunnelling is not supported",
            );
        }

        let request = match build_outbound(req, self.max_body_size).await {
            Ok(request) => request,
            Err(e) => return error_response(e.status_code(), &e.to_string()),
        };

        let proxy = match self.selector.select().await {
            Ok(proxy) => proxy,
            Err(RotatorError::PoolExhausted) => {
                warn!("No proxy available for {}", request.url);
                return error_response(StatusCode::SERVICE_UNAVAILABLE, "No proxies available");
            }
            Err(e) => {
                error!("Proxy selection failed: {}", e);
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Proxy selection failed");
            }
        };

        debug!(
            id = proxy.id,
            address = %proxy.address(),
            client = client_ip,
            "Forwarding {} {}",
            request.method,
            request.url
        );

        let started = Instant::now();
        match self.upstream.send(&proxy, request).await {
            Ok(upstream) => {
                let measured = u32::try_from(started.elapsed().as_millis()).unwrap_or(u32::MAX);
                let reported = match self.latency {
                    ForwardLatency::Measured => measured,
                    ForwardLatency::Fixed(ms) => ms,
                };
                self.reporter.report_success(proxy.id, reported);
                into_response(upstream)
            }
            Err(RotatorError::InvalidRequest(reason)) => {
                // Rejected before anything reached the proxy
                debug!(id = proxy.id, reason = %reason, "Request could not be relayed");
                error_response(StatusCode::BAD_REQUEST, &reason)
            }
            Err(e) => {
                warn!(id = proxy.id, address = %proxy.address(), error = %e, "Relay failed");
                self.reporter.report_failure(proxy.id);
                let status = match e {
                    RotatorError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                error_response(status, "Upstream proxy failed")
            }
        }
    }
}

/// Resolve the absolute target URL and buffer at most `max_body_size` bytes
async fn build_outbound<B>(req: Request<B>, max_body_size: usize) -> Result<OutboundRequest>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let (parts, body) = req.into_parts();

    let url = if parts.uri.scheme().is_some() && parts.uri.authority().is_some() {
        parts.uri.to_string()
    } else {
        let host = parts
            .headers
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| RotatorError::InvalidRequest("Missing target host".into()))?;
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("http://{}{}", host, path)
    };
    let url = Url::parse(&url)
        .map_err(|e| RotatorError::InvalidRequest(format!("Invalid target URL {}: {}", url, e)))?
        .to_string();

    let body = Limited::new(body, max_body_size)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                RotatorError::PayloadTooLarge {
                    limit: max_body_size,
                }
            } else {
                RotatorError::InvalidRequest(format!("Failed to read body: {}", e))
            }
        })?
        .to_bytes();

    Ok(OutboundRequest {
        method: parts.method,
        url,
        headers: strip_hop_by_hop(&parts.headers),
        body,
    })
}

fn into_response(upstream: UpstreamResponse) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(upstream.body));
    *response.status_mut() = upstream.status;
    *response.headers_mut() = strip_hop_by_hop(&upstream.headers);
    response
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop_header(name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
