//! # Aspect RPC HTTP
//!
//! HTTP transport for [`aspect_rpc_server::Dispatcher`]. A single POST
//! endpoint reads the request body, hands it to the dispatcher and writes the
//! response envelope back as JSON.
//!
//! ## Features
//! - hyper 1 server on tokio, one task per connection
//! - Request headers exposed to filters as scope metadata
//! - Peer address available to filters as a [`PeerAddr`] scope extension
//! - Bounded body reads (`413` with a failure envelope when exceeded)
//!
//! ```rust,no_run
//! use aspect_rpc_http::RpcHttpServer;
//! use aspect_rpc_server::prelude::*;
//!
//! struct Calc;
//!
//! impl Calc {
//!     fn add(&self, a: i64, b: i64) -> RpcResult<i64> {
//!         Ok(a + b)
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = Dispatcher::builder()
//!     .service(ServiceBuilder::singleton("Calc", Calc).method("Add", Calc::add))
//!     .build()?;
//!
//! let server = RpcHttpServer::builder(dispatcher)
//!     .bind_address("127.0.0.1:8080".parse()?)
//!     .rpc_path("/rpc")
//!     .build();
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod handler;
pub mod server;

pub use handler::{PeerAddr, RpcHttpHandler};
pub use server::{RpcHttpServer, RpcHttpServerBuilder, ServerConfig};

/// Result type for HTTP transport operations
pub type Result<T> = std::result::Result<T, HttpError>;

/// HTTP transport errors
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
