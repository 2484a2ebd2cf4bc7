//! Filters (aspects) wrapped around method invocations
//!
//! A filter receives the [`InvocationContext`](crate::InvocationContext) and a
//! [`Next`](crate::Next) continuation. It may run code before and after the
//! rest of the chain, skip the chain entirely (short-circuit), or call it more
//! than once.
//!
//! Filters are declared at three tiers and always resolve in this order:
//!
//! 1. **Method** - attached to a single method
//! 2. **Class** - attached to every method of a service
//! 3. **Global** - attached to every method of every service
//!
//! # Examples
//!
//! ```rust
//! use aspect_rpc_server::prelude::*;
//! use async_trait::async_trait;
//!
//! struct RequireApiKey;
//!
//! #[async_trait]
//! impl RpcFilter for RequireApiKey {
//!     async fn invoke(&self, ctx: &mut InvocationContext, next: Next<'_>) -> RpcResult<()> {
//!         if ctx.scope().metadata_str("x-api-key").is_none() {
//!             ctx.respond(ResponseEnvelope::failure("missing api key"));
//!             return Ok(());
//!         }
//!         next.run(ctx).await
//!     }
//! }
//! ```

pub mod builtins;
pub mod resolver;
pub mod traits;

pub use resolver::{FilterResolver, MethodKey};
pub use traits::{
    FilterEntry, FilterFactory, FilterSource, FilterTier, FnFilter, RpcFilter, ScopedFilter,
    filter_fn,
};
