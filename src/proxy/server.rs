//! Forwarding server implementation using hyper
//!
//! Accepts plain HTTP proxy requests and hands each one to the [`ProxyHandler`].

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use crate::config::ProxyServerConfig;
use crate::error::{Result, RotatorError};
use crate::pool::ProxySelector;
use crate::proxy::handler::{ProxyHandler, ReqwestUpstream, UpstreamClient};
use crate::services::HealthReporter;

/// Forwarding server
pub struct ProxyServer {
    config: ProxyServerConfig,
    handler: Arc<ProxyHandler>,
}

impl ProxyServer {
    /// Create a forwarding server that relays through reqwest
    pub fn new(
        config: ProxyServerConfig,
        selector: Arc<dyn ProxySelector>,
        reporter: HealthReporter,
    ) -> Self {
        let upstream = Arc::new(ReqwestUpstream::new(Duration::from_secs(
            config.request_timeout.max(1),
        )));
        Self::with_upstream(config, selector, upstream, reporter)
    }

    pub fn with_upstream(
        config: ProxyServerConfig,
        selector: Arc<dyn ProxySelector>,
        upstream: Arc<dyn UpstreamClient>,
        reporter: HealthReporter,
    ) -> Self {
        let handler = Arc::new(ProxyHandler::new(
            selector,
            upstream,
            reporter,
            config.forward_latency,
            config.max_body_size,
        ));

        Self { config, handler }
    }

    /// Run the forwarding server
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| {
                RotatorError::InvalidConfig(format!("Invalid proxy server address: {}", e))
            })?;

        let listener = TcpListener::bind(addr).await?;
        info!("Forwarding server listening on {}", addr);

        self.serve(listener, &mut shutdown).await
    }

    /// Accept connections on an already bound listener until shutdown
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            let handler = self.handler.clone();

                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, client_addr, handler).await {
                                    debug!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Forwarding server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Handle a single connection
    async fn handle_connection(
        stream: TcpStream,
        client_addr: SocketAddr,
        handler: Arc<ProxyHandler>,
    ) -> Result<()> {
        let io = TokioIo::new(stream);
        let client_ip = client_addr.ip().to_string();

        let service = service_fn(move |req: Request<Incoming>| {
            let handler = handler.clone();
            let client_ip = client_ip.clone();

            async move { Ok::<_, Infallible>(handler.handle(req, &client_ip).await) }
        });

        http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(io, service)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForwardLatency;
    use crate::pool::CandidateSelector;
    use crate::repository::MemoryProxyRepository;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn config() -> ProxyServerConfig {
        ProxyServerConfig {
            port: 0,
            host: "127.0.0.1".into(),
            request_timeout: 5,
            forward_latency: ForwardLatency::Measured,
            report_queue_capacity: 8,
            max_body_size: 1024,
        }
    }

    #[tokio::test]
    async fn test_serves_until_shutdown() {
        let repo = Arc::new(MemoryProxyRepository::new());
        let (reporter, _worker) = HealthReporter::channel(8);
        let server = Arc::new(ProxyServer::new(
            config(),
            Arc::new(CandidateSelector::new(repo)),
            reporter,
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = watch::channel(false);

        let task = {
            let server = server.clone();
            tokio::spawn(async move { server.serve(listener, &mut rx).await })
        };

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 503"), "{}", response);

        tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }
}
