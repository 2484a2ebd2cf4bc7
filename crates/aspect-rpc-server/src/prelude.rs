//! Prelude module for common dispatcher imports
//!
//! ```rust
//! use aspect_rpc_server::prelude::*;
//!
//! // Dispatcher, services, filters and envelopes are now in scope
//! ```

// Dispatch core
pub use crate::{
    DispatchOutcome, DispatchState, Dispatcher, DispatcherBuilder, DispatcherConfig,
    InvocationContext, RequestEnvelope, RequestScope, ResponseEnvelope, RpcError, RpcResult,
};

// Service registration
pub use crate::{ServiceBuilder, ServiceDescriptor, ServiceFactory, ServiceRegistry};

// Filters and pipeline
pub use crate::filter::builtins::{TimeoutFilter, TracingFilter};
pub use crate::{FilterFactory, FilterTier, Next, RpcFilter, ScopedFilter, filter_fn};

// Essential async trait for filter implementations
pub use async_trait::async_trait;

pub use serde::{Deserialize, Serialize};
pub use std::sync::Arc;
