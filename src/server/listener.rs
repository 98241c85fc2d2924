//! Relay server listener
//!
//! Handles the TCP accept loop and serves each connection over HTTP/1.1.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};

use super::config::ServerConfig;
use super::service::ProxyService;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::store::StoreBackend;
use crate::upstream::Upstream;

/// Coalescing fetch relay server
pub struct ProxyServer {
    config: ServerConfig,
    service: ProxyService,
}

impl ProxyServer {
    /// Create a new server over a storage backend and an upstream
    pub fn new(
        config: ServerConfig,
        backend: Arc<dyn StoreBackend>,
        upstream: Arc<dyn Upstream>,
    ) -> Self {
        let dispatcher = Dispatcher::new(backend, upstream, config.dispatcher.clone());
        Self::with_dispatcher(config, Arc::new(dispatcher))
    }

    /// Create a new server around an existing dispatcher
    pub fn with_dispatcher(config: ServerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        let service = ProxyService::new(dispatcher, config.homepage.as_str())
            .example_interval(config.example_interval);
        Self { config, service }
    }

    /// Get a reference to the dispatcher
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        self.service.dispatcher()
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already bound listener until `shutdown`
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "Relay server listening");

        // Spawn eviction task for expired resources
        let eviction_handle = self.dispatcher().spawn_eviction_task();

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        // Stop eviction task on shutdown
        eviction_handle.abort();

        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        tracing::debug!(peer = %peer_addr, "New connection");

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::warn!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let service = self.service.clone();
        tokio::spawn(async move {
            let handler = service_fn(move |request: Request<Incoming>| {
                let service = service.clone();
                async move {
                    let (parts, body) = request.into_parts();
                    let response = match body.collect().await {
                        Ok(collected) => {
                            let request = Request::from_parts(parts, collected.to_bytes());
                            service.handle(request).await
                        }
                        Err(e) => service.reject(&Error::RequestBody(e)),
                    };
                    Ok::<_, Infallible>(response)
                }
            });

            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(socket), handler)
                .await
            {
                tracing::debug!(peer = %peer_addr, error = %e, "Connection error");
            }

            tracing::debug!(peer = %peer_addr, "Connection closed");
        });
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}
