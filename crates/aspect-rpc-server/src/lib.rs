//! # Aspect RPC Server
//!
//! A transport-agnostic RPC dispatcher. A request names a registered service,
//! one of its methods and a list of positional arguments; the dispatcher
//! resolves the method, reconciles the arguments against the declared
//! parameter types, runs the method through an ordered chain of filters and
//! packages the result into a response envelope.
//!
//! ## Features
//! - Startup-built registry of strongly typed method thunks (no runtime reflection)
//! - Synchronous and asynchronous methods share one invocation path
//! - Method, class and global filter tiers composed once and cached per method
//! - Onion pipeline: filters may wrap, repeat or short-circuit the call
//! - Request-scoped filter instantiation instead of mutating shared filters
//!
//! ```rust
//! use aspect_rpc_server::prelude::*;
//! use serde_json::json;
//!
//! struct Calc;
//!
//! impl Calc {
//!     fn add(&self, a: i64, b: i64) -> RpcResult<i64> {
//!         Ok(a + b)
//!     }
//! }
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//! let dispatcher = Dispatcher::builder()
//!     .service(ServiceBuilder::singleton("Calc", Calc).method("Add", Calc::add))
//!     .build()
//!     .unwrap();
//!
//! let response = dispatcher
//!     .dispatch_bytes(br#"{"TypeFullName":"Calc","MethodName":"Add","Paramters":[2,3]}"#, RequestScope::new())
//!     .await;
//! assert_eq!(response.code, 200);
//! assert_eq!(response.data, Some(json!(5)));
//! # });
//! ```

pub mod coerce;
pub mod context;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod method;
pub mod pipeline;
pub mod prelude;
pub mod registry;
pub mod scope;

// Re-export main types
pub use context::InvocationContext;
pub use dispatcher::{
    DispatchOutcome, DispatchState, Dispatcher, DispatcherBuilder, DispatcherConfig,
};
pub use envelope::{RequestEnvelope, ResponseEnvelope};
pub use error::{RegistryError, RpcError, RpcResult};
pub use filter::{
    FilterEntry, FilterFactory, FilterResolver, FilterTier, FnFilter, MethodKey, RpcFilter,
    ScopedFilter, filter_fn,
};
pub use method::{
    AsyncMethod, Invocation, MethodArgs, MethodDescriptor, MethodInvoker, ServiceInstance,
    SyncMethod,
};
pub use pipeline::{MethodEndpoint, Next, Pipeline, PipelineBuilder, ResponseStage, Terminal};
pub use registry::{ServiceBuilder, ServiceDescriptor, ServiceFactory, ServiceRegistry};
pub use scope::RequestScope;

/// Envelope status codes
pub mod status_codes {
    /// The method ran and `Data` carries its return value
    pub const SUCCESS: i32 = 200;
    /// The request failed; `Message` explains why
    pub const FAILURE: i32 = 500;
}
