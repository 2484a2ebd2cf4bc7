//! HTTP server exposing a [`Dispatcher`] on a single POST endpoint

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use aspect_rpc_server::Dispatcher;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::{Result, RpcHttpHandler};

/// Configuration for the HTTP RPC server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_address: SocketAddr,
    /// Path for the RPC endpoint
    pub rpc_path: String,
    /// Maximum request body size
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8000)),
            rpc_path: "/rpc".to_string(),
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

/// Builder for [`RpcHttpServer`]
pub struct RpcHttpServerBuilder {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl RpcHttpServerBuilder {
    pub fn new(dispatcher: impl Into<Arc<Dispatcher>>) -> Self {
        Self {
            config: ServerConfig::default(),
            dispatcher: dispatcher.into(),
        }
    }

    /// Set the bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.config.bind_address = addr;
        self
    }

    /// Set the RPC endpoint path
    pub fn rpc_path(mut self, path: impl Into<String>) -> Self {
        self.config.rpc_path = path.into();
        self
    }

    /// Set maximum request body size
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> RpcHttpServer {
        RpcHttpServer {
            config: Arc::new(self.config),
            dispatcher: self.dispatcher,
        }
    }
}

/// HTTP front end for a [`Dispatcher`]
pub struct RpcHttpServer {
    config: Arc<ServerConfig>,
    dispatcher: Arc<Dispatcher>,
}

impl RpcHttpServer {
    pub fn builder(dispatcher: impl Into<Arc<Dispatcher>>) -> RpcHttpServerBuilder {
        RpcHttpServerBuilder::new(dispatcher)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Bind the configured address and serve until the listener fails
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("HTTP RPC server listening on {}", listener.local_addr()?);
        info!("RPC endpoint available at: {}", self.config.rpc_path);

        let handler = RpcHttpHandler::new(Arc::clone(&self.config), Arc::clone(&self.dispatcher));

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            debug!("New connection from {}", peer_addr);

            let handler = handler.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let handler = handler.clone();
                    async move { Ok::<_, Infallible>(handler.handle(req, Some(peer_addr)).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    let err_str = err.to_string();
                    if err_str.contains("connection closed before message completed") {
                        debug!("Client disconnected (normal): {}", err);
                    } else {
                        error!("Error serving connection: {}", err);
                    }
                }
            });
        }
    }
}
